//! Constants shared across the storage core. Grounded on the shape of
//! `InterchangeDB`'s `common/config.rs`: the page geometry is fixed at
//! compile time rather than threaded through every constructor.

use std::time::Duration;

/// Fixed page size. 32 KiB, per the data model.
pub const PAGE_SIZE: usize = 32 * 1024;

/// Size of the fixed page header: page_id, page_lsn, recovery_lsn,
/// page_type, checksum, each an 8 byte field.
pub const PAGE_HEADER_SIZE: usize = 8 * 5;

pub const PAGE_BODY_SIZE: usize = PAGE_SIZE - PAGE_HEADER_SIZE;

/// A page id reserved for the meta page.
pub const META_PAGE_ID: u64 = 0;

/// Sentinel meaning "no pending LSN" / "page is clean", serialized in
/// the `recovery_lsn` header field.
pub const INFINITE_LSN: u64 = u64::MAX;

/// Soft cap on a single key+value payload: roughly page/6, so three
/// entries plus the three fence/foster slots can never starve a page.
pub const MAX_PAYLOAD_SIZE: usize = PAGE_BODY_SIZE / 6;

/// Default interval between fuzzy checkpoints.
pub const DEFAULT_CHECKPOINT_INTERVAL: Duration = Duration::from_secs(60);

/// Default interval between LSM memtable flush attempts.
pub const DEFAULT_LSM_FLUSH_INTERVAL: Duration = Duration::from_millis(200);

/// Default interval between LSM background merges.
pub const DEFAULT_LSM_MERGE_INTERVAL: Duration = Duration::from_secs(5);

/// VM cache block size.
pub const VM_CACHE_BLOCK_SIZE: usize = 4 * 1024;

/// VM cache memory budget: how many blocks may be resident at once,
/// expressed as total bytes. Bounds the small/main/ghost FIFOs.
pub const VM_CACHE_MEMORY_BUDGET: usize = 4 * 1024 * 1024;

/// Address space reserved up front for a blob file's anonymous
/// mapping. Only touched pages become physically resident, so this
/// just needs to exceed the largest a blob file will realistically
/// grow to in one run.
pub const LSM_BLOB_MAX_FILE_SIZE: usize = 64 * 1024 * 1024;

/// Inline thresholds for LSM sorted-run entries; keys/values larger
/// than this live in the blob file instead of the run's entry array.
pub const LSM_INLINE_KEY_LEN: usize = 12;
pub const LSM_INLINE_VALUE_LEN: usize = 8;

/// Log writer ring buffer capacity.
pub const LOG_RING_BUFFER_SIZE: usize = 1024 * 1024;

/// Poll interval of the log writer's flush worker.
pub const LOG_FLUSH_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Default page pool capacity, in number of 32 KiB pages (≈32 MiB).
pub const DEFAULT_PAGE_POOL_CAPACITY: usize = 1024;
