//! Planner configuration: helper images and the platform API ceiling.
//!
//! Defaults live here; `kilnctl` layers `KILN_*` variables and flags on top.

use serde::{Deserialize, Serialize};

use crate::version::PlatformApi;

pub const DEFAULT_BUILD_INIT_IMAGE: &str = "ghcr.io/kiln-build/build-init:latest";
pub const DEFAULT_BUILD_INIT_WINDOWS_IMAGE: &str = "ghcr.io/kiln-build/build-init-windows:latest";
pub const DEFAULT_COMPLETION_IMAGE: &str = "ghcr.io/kiln-build/completion:latest";
pub const DEFAULT_COMPLETION_WINDOWS_IMAGE: &str = "ghcr.io/kiln-build/completion-windows:latest";
pub const DEFAULT_REBASE_IMAGE: &str = "ghcr.io/kiln-build/rebase:latest";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanConfig {
    pub build_init_image: String,
    pub build_init_windows_image: String,
    pub completion_image: String,
    pub completion_windows_image: String,
    pub rebase_image: String,
    /// Highest platform API the controller may negotiate, if capped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_platform_api: Option<PlatformApi>,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            build_init_image: DEFAULT_BUILD_INIT_IMAGE.to_string(),
            build_init_windows_image: DEFAULT_BUILD_INIT_WINDOWS_IMAGE.to_string(),
            completion_image: DEFAULT_COMPLETION_IMAGE.to_string(),
            completion_windows_image: DEFAULT_COMPLETION_WINDOWS_IMAGE.to_string(),
            rebase_image: DEFAULT_REBASE_IMAGE.to_string(),
            max_platform_api: None,
        }
    }
}

impl PlanConfig {
    pub fn build_init_image(&self, windows: bool) -> &str {
        if windows {
            &self.build_init_windows_image
        } else {
            &self.build_init_image
        }
    }

    pub fn completion_image(&self, windows: bool) -> &str {
        if windows {
            &self.completion_windows_image
        } else {
            &self.completion_image
        }
    }
}
