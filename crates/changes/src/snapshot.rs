//! Build-relevant state of an image, compared pairwise to find changes.

use serde::{Deserialize, Serialize};

use crate::change::{BuildConfig, BuildpackInfo, Change};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSnapshot {
    pub config: BuildConfig,
    #[serde(default)]
    pub buildpacks: Vec<BuildpackInfo>,
    #[serde(default)]
    pub extensions: Vec<BuildpackInfo>,
    /// Run image reference, digest included.
    #[serde(default)]
    pub run_image: String,
    /// Value of the manual trigger annotation, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_at: Option<String>,
}

/// Candidate changes between the last built state and the desired one, in
/// canonical order: trigger, commit, config, buildpack, extension, stack.
///
/// Candidates are not filtered; whether each requires a build is evaluated
/// by the aggregator.
pub fn detect_changes(old: &BuildSnapshot, new: &BuildSnapshot) -> Vec<Change> {
    let mut out = Vec::with_capacity(6);
    if let Some(at) = new.triggered_at.as_deref().filter(|t| !t.is_empty()) {
        if old.triggered_at.as_deref() != Some(at) {
            out.push(Change::trigger(at));
        }
    }
    if let (Some(o), Some(n)) = (old.config.source.git_revision(), new.config.source.git_revision()) {
        out.push(Change::commit(o, n));
    }
    out.push(Change::config(&old.config, &new.config));
    out.push(Change::buildpacks(&old.buildpacks, &new.buildpacks));
    out.push(Change::extensions(&old.extensions, &new.extensions));
    if !old.run_image.is_empty() && !new.run_image.is_empty() {
        out.push(Change::stack(&old.run_image, &new.run_image));
    }
    out
}
