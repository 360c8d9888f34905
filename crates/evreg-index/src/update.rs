use chrono::{DateTime, Utc};
use evreg_types::{ContentMeta, Record, Status, StatusChange};

/// A partial update merged into an existing [`Record`].
///
/// History entries are appended in order. Nothing already in the history is
/// touched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordUpdate {
    /// New mirrored status, if it changed.
    pub status: Option<Status>,
    pub append_history: Vec<StatusChange>,
    /// Replacement content metadata, e.g. after a late pin.
    pub content: Option<ContentMeta>,
    /// Becomes the record's `updated_at`.
    pub at: DateTime<Utc>,
}

impl RecordUpdate {
    /// Mirror one ledger-confirmed status change.
    pub fn status_change(change: StatusChange) -> Self {
        Self {
            status: Some(change.status),
            at: change.at,
            append_history: vec![change],
            content: None,
        }
    }

    /// Replace the content metadata only.
    pub fn content(meta: ContentMeta, at: DateTime<Utc>) -> Self {
        Self {
            status: None,
            append_history: Vec::new(),
            content: Some(meta),
            at,
        }
    }

    pub fn apply_to(&self, record: &mut Record) {
        if let Some(status) = self.status {
            record.status = status;
        }
        record
            .status_history
            .extend(self.append_history.iter().cloned());
        if let Some(content) = &self.content {
            record.content = content.clone();
        }
        if self.at > record.updated_at {
            record.updated_at = self.at;
        }
    }
}
