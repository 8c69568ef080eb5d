pub mod queued_actions;
pub mod receipts;
pub mod sync_markers;
