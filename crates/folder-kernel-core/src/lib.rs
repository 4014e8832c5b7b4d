//! Core model for the folder taxonomy kernel.
//!
//! Holds the folder tree (an arena addressed by folder id), the undo/redo
//! [`HistoryEngine`], the import/export formats, the heuristic change
//! checksum, and the [`ErrorReporter`] seam used to push failures outward.
//! Nothing in this crate performs I/O.

pub mod checksum;
pub mod folder;
pub mod formats;
pub mod history;
pub mod report;
pub mod tree;

pub use checksum::{checksum_json, rolling_hash};
pub use folder::{Folder, FolderId};
pub use formats::{
    folders_to_csv, folders_to_json, parse_folder_csv, parse_folder_json, ImportError,
};
pub use history::{
    ActionId, ActionPayload, ActionType, HistoryAction, HistoryEngine, HistoryError,
    DEFAULT_HISTORY_LIMIT,
};
pub use report::{ErrorReporter, MemoryReporter, ReportedEvent, TracingReporter};
pub use tree::{FolderTree, TreeError};

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Format a timestamp as RFC 3339, falling back to unix seconds.
#[must_use]
pub fn rfc3339(value: OffsetDateTime) -> String {
    value.format(&Rfc3339).unwrap_or_else(|_| value.unix_timestamp().to_string())
}

/// Current UTC time as an RFC 3339 string.
#[must_use]
pub fn now_rfc3339() -> String {
    rfc3339(OffsetDateTime::now_utc())
}
