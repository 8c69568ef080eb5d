pub mod classify;
pub mod coordinator;
pub mod events;

pub use classify::{DUPLICATE_RESOLVED, DuplicateDetector};
pub use coordinator::{DrainOutcome, DrainReport, SyncCoordinator};
pub use events::SyncEvent;
