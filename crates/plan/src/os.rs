//! OS adaptation of build steps.
//!
//! Windows pods need every step to wait for the network before running and
//! use `USERPROFILE` instead of `HOME`. Each difference is a named pass so the
//! whole Windows/Linux divergence is visible in one list; Linux gets an empty
//! list and containers pass through untouched.

use k8s_openapi::api::core::v1::{Container, VolumeMount};
use kiln_core::constants::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepPass {
    /// Mount the shared launcher volume.
    NetworkWaitVolume,
    /// Run the step through the launcher, which waits until `probe_host`
    /// resolves.
    NetworkWaitLauncher { probe_host: String },
    /// Rename `HOME` to `USERPROFILE` on steps that declare it.
    UserProfileHome,
}

impl StepPass {
    pub fn name(&self) -> &'static str {
        match self {
            StepPass::NetworkWaitVolume => "network-wait-volume",
            StepPass::NetworkWaitLauncher { .. } => "network-wait-launcher",
            StepPass::UserProfileHome => "userprofile-home",
        }
    }

    pub fn apply(&self, mut c: Container) -> Container {
        match self {
            StepPass::NetworkWaitVolume => {
                c.volume_mounts.get_or_insert_with(Vec::new).push(VolumeMount {
                    name: NETWORK_WAIT_VOLUME.to_string(),
                    mount_path: NETWORK_WAIT_PATH.to_string(),
                    ..Default::default()
                });
            }
            StepPass::NetworkWaitLauncher { probe_host } => {
                let mut args = vec![probe_host.clone(), NETWORK_WAIT_SEPARATOR.to_string()];
                args.extend(c.command.take().unwrap_or_default());
                args.extend(c.args.take().unwrap_or_default());
                c.command = Some(vec![NETWORK_WAIT_LAUNCHER_COMMAND.to_string()]);
                c.args = Some(args);
            }
            StepPass::UserProfileHome => {
                if let Some(env) = c.env.as_mut() {
                    for var in env.iter_mut().filter(|v| v.name == HOME_ENV) {
                        var.name = USERPROFILE_ENV.to_string();
                    }
                }
            }
        }
        c
    }
}

/// Ordered passes applied to every step of one pod.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsAdapter {
    passes: Vec<StepPass>,
}

impl OsAdapter {
    pub fn linux() -> Self {
        Self::default()
    }

    pub fn windows(probe_host: &str) -> Self {
        Self {
            passes: vec![
                StepPass::NetworkWaitVolume,
                StepPass::NetworkWaitLauncher { probe_host: probe_host.to_string() },
                StepPass::UserProfileHome,
            ],
        }
    }

    pub fn for_os(windows: bool, probe_host: &str) -> Self {
        if windows {
            Self::windows(probe_host)
        } else {
            Self::linux()
        }
    }

    pub fn passes(&self) -> &[StepPass] {
        &self.passes
    }

    pub fn is_identity(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn apply(&self, c: Container) -> Container {
        self.passes.iter().fold(c, |c, pass| pass.apply(c))
    }
}
