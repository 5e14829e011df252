//! Kiln rebuild decisions.
//!
//! Classifies the differences between the last built and the desired state
//! of an image into typed changes, folds the ones that require a build into a
//! [`ChangeSummary`], and renders summaries for build logs.

#![forbid(unsafe_code)]

pub mod change;
pub mod diff;
pub mod error;
pub mod snapshot;
pub mod summary;

pub use change::{BuildConfig, BuildpackInfo, Change};
pub use diff::{diff_summary, line_diff, render_changes, render_record, DiffLine, DiffSummary};
pub use error::{ChangeError, Result};
pub use snapshot::{detect_changes, BuildSnapshot};
pub use summary::{parse_changes, ChangeProcessor, ChangeRecord, ChangeSummary};

/// Detect, evaluate and fold the changes between two snapshots.
pub fn summarize(old: &BuildSnapshot, new: &BuildSnapshot) -> Result<ChangeSummary> {
    ChangeProcessor::new().process_all(detect_changes(old, new)).summarize()
}
