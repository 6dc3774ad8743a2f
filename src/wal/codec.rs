//! Bridges [`LogRecord`] to the byte-offset-addressed [`LogWriter`]:
//! each record is framed as `len(u32 LE) | encoded record`, so a
//! record's LSN is the offset of its frame and any later reader can
//! both decode it directly (knowing `len`) and step to the next frame
//! without maintaining a separate index.

use crate::error::Result;
use crate::types::Lsn;
use crate::wal::log_record::LogRecord;
use crate::wal::log_writer::LogWriter;

pub fn append_record(log: &LogWriter, mut record: LogRecord) -> Result<LogRecord> {
    let payload = record.encode();
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    let lsn = log.append(&frame);
    record.lsn = lsn;
    Ok(record)
}

/// Decodes the record whose frame starts at `lsn`, returning it along
/// with the LSN of the next frame -- used by the analysis/redo
/// passes' forward scan.
pub fn read_record_at(log: &LogWriter, lsn: Lsn) -> Result<(LogRecord, Lsn)> {
    let len_bytes = log.read_range(lsn, lsn + 4)?;
    let len = u32::from_le_bytes(len_bytes.try_into().unwrap()) as u64;
    let payload = log.read_range(lsn + 4, lsn + 4 + len)?;
    let record = LogRecord::decode_at(lsn, &payload)?;
    Ok((record, lsn + 4 + len))
}
