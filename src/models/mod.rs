pub mod queued_action;
pub mod receipt;

pub use queued_action::{ActionStatus, ActionType, QueueMetadata, QueuedAction};
pub use receipt::SyncReceipt;

use chrono::{DateTime, Utc};

/// Timestamps are stored as unix milliseconds so that SQL ordering matches time ordering.
pub(crate) fn from_millis(column: &str, millis: i64) -> Result<DateTime<Utc>, sqlx::Error> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: format!("timestamp out of range: {millis}").into(),
    })
}
