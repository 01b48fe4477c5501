//! Local persistence — watermark cursor, sent tracker, and the run lock.
//!
//! Every state file is JSON written via temp-file-then-rename.

pub mod atomic;
pub mod cursor;
pub mod lock;
pub mod sent;

pub use cursor::{CursorStore, Watermark};
pub use lock::RunLock;
pub use sent::{SentRecord, SentTracker};
