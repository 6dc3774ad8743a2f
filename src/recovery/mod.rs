//! Analysis/redo/undo recovery and single-page recovery, per §4.F.

pub mod recovery_manager;

pub use recovery_manager::{ActiveTxnTable, DirtyPageTable, RecoveryManager};
