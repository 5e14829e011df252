//! The five kinds of difference that can justify a rebuild.
//!
//! Each [`Change`] carries its old and new values; whether it actually
//! requires a build is decided by [`Change::is_build_required`] when asked,
//! never at construction.

use k8s_openapi::api::core::v1::{EnvVar, ResourceRequirements};
use kiln_core::{BuildReason, Priority, ServiceBinding, SourceConfig};
use oci_distribution::Reference;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::{ChangeError, Result};

/// One buildpack or extension as recorded in the build metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildpackInfo {
    pub id: String,
    #[serde(default)]
    pub version: String,
}

/// Inputs whose change counts as a configuration change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    #[serde(default)]
    pub env: Vec<EnvVar>,
    #[serde(default)]
    pub resources: ResourceRequirements,
    #[serde(default)]
    pub services: Vec<ServiceBinding>,
    pub source: SourceConfig,
}

impl BuildConfig {
    /// Revision moves are reported as commits, so the config comparison
    /// ignores them.
    pub fn without_revision(&self) -> BuildConfig {
        BuildConfig { source: self.source.without_revision(), ..self.clone() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Trigger { message: String },
    Commit { old: String, new: String },
    Config { old: BuildConfig, new: BuildConfig },
    /// `reason` is [`BuildReason::Buildpack`] or [`BuildReason::Extension`].
    Buildpack { reason: BuildReason, old: Vec<BuildpackInfo>, new: Vec<BuildpackInfo> },
    /// Old and new run image references.
    Stack { old: String, new: String },
}

impl Change {
    pub fn trigger(triggered_at: &str) -> Self {
        Change::Trigger { message: format!("A new build was manually triggered on {}", triggered_at) }
    }

    pub fn commit(old: impl Into<String>, new: impl Into<String>) -> Self {
        Change::Commit { old: old.into(), new: new.into() }
    }

    /// Payloads keep the real revisions; only the comparison blanks them.
    pub fn config(old: &BuildConfig, new: &BuildConfig) -> Self {
        Change::Config { old: old.clone(), new: new.clone() }
    }

    pub fn buildpacks(old: &[BuildpackInfo], new: &[BuildpackInfo]) -> Self {
        Change::Buildpack { reason: BuildReason::Buildpack, old: sorted(old), new: sorted(new) }
    }

    pub fn extensions(old: &[BuildpackInfo], new: &[BuildpackInfo]) -> Self {
        Change::Buildpack { reason: BuildReason::Extension, old: sorted(old), new: sorted(new) }
    }

    pub fn stack(old_run_image: impl Into<String>, new_run_image: impl Into<String>) -> Self {
        Change::Stack { old: old_run_image.into(), new: new_run_image.into() }
    }

    pub fn reason(&self) -> BuildReason {
        match self {
            Change::Trigger { .. } => BuildReason::Trigger,
            Change::Commit { .. } => BuildReason::Commit,
            Change::Config { .. } => BuildReason::Config,
            Change::Buildpack { reason, .. } => *reason,
            Change::Stack { .. } => BuildReason::Stack,
        }
    }

    pub fn priority(&self) -> Priority {
        match self {
            Change::Trigger { .. } | Change::Commit { .. } | Change::Config { .. } => Priority::HIGH,
            Change::Buildpack { .. } | Change::Stack { .. } => Priority::LOW,
        }
    }

    pub fn old_value(&self) -> Result<Json> {
        match self {
            Change::Trigger { .. } => Ok(Json::String(String::new())),
            Change::Commit { old, .. } | Change::Stack { old, .. } => Ok(Json::String(old.clone())),
            Change::Config { old, .. } => to_json(old),
            Change::Buildpack { old, .. } => to_json(old),
        }
    }

    pub fn new_value(&self) -> Result<Json> {
        match self {
            Change::Trigger { message } => Ok(Json::String(message.clone())),
            Change::Commit { new, .. } | Change::Stack { new, .. } => Ok(Json::String(new.clone())),
            Change::Config { new, .. } => to_json(new),
            Change::Buildpack { new, .. } => to_json(new),
        }
    }

    /// Stack changes fail when either run image lacks a resolvable digest;
    /// that is an error, not "no change".
    pub fn is_build_required(&self) -> Result<bool> {
        match self {
            Change::Trigger { message } => Ok(!message.is_empty()),
            Change::Commit { old, new } => Ok(old != new),
            Change::Config { old, new } => Ok(old.without_revision() != new.without_revision()),
            Change::Buildpack { old, new, .. } => Ok(sorted(old) != sorted(new)),
            Change::Stack { old, new } => {
                let (old_digest, new_digest) = (run_image_digest(old), run_image_digest(new));
                match (old_digest, new_digest) {
                    (Ok(o), Ok(n)) => Ok(o != n),
                    (Err(a), Err(b)) => Err(ChangeError::Stack(format!("{}; {}", a, b))),
                    (Err(e), _) | (_, Err(e)) => Err(ChangeError::Stack(e)),
                }
            }
        }
    }
}

fn sorted(list: &[BuildpackInfo]) -> Vec<BuildpackInfo> {
    let mut out = list.to_vec();
    out.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.version.cmp(&b.version)));
    out
}

fn to_json<T: Serialize>(v: &T) -> Result<Json> {
    serde_json::to_value(v).map_err(ChangeError::Serialize)
}

fn run_image_digest(image: &str) -> std::result::Result<String, String> {
    let reference: Reference = image.parse().map_err(|e| format!("parsing run image '{}': {}", image, e))?;
    reference.digest().map(str::to_string).ok_or_else(|| format!("run image '{}' has no digest", image))
}
