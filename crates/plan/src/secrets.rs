//! Credential classification: turns resolved secrets into volumes, mounts and
//! the argument strings the prepare and completion steps understand.
//!
//! Three independent passes:
//! - git/registry credentials (`classify_credentials`)
//! - image signing keys (`classify_signing_keys`)
//! - image pull secrets (`classify_image_pull`)
//!
//! Secrets that match no rule are skipped without error.

use k8s_openapi::api::core::v1::{SecretVolumeSource, Volume, VolumeMount};
use kiln_core::constants::*;
use kiln_core::{CredentialObject, SecretKind};
use rustc_hash::FxHashSet;
use tracing::debug;

/// Volumes, mounts and arguments produced by one classification pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SecretMounts {
    pub volumes: Vec<Volume>,
    pub mounts: Vec<VolumeMount>,
    pub args: Vec<String>,
}

impl SecretMounts {
    fn push(&mut self, volume_name: String, secret_name: &str, mount_path: String) {
        self.volumes.push(secret_volume(&volume_name, secret_name));
        self.mounts.push(VolumeMount { name: volume_name, mount_path, read_only: Some(true), ..Default::default() });
    }
}

/// Which credentials a step may receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialScope {
    All,
    /// Registry credentials only; the rebase step never touches git.
    RegistryOnly,
}

pub(crate) fn secret_volume(volume_name: &str, secret_name: &str) -> Volume {
    Volume {
        name: volume_name.to_string(),
        secret: Some(SecretVolumeSource { secret_name: Some(secret_name.to_string()), ..Default::default() }),
        ..Default::default()
    }
}

fn credential_arg(secret: &CredentialObject, scope: CredentialScope) -> Option<String> {
    let docker = secret.annotation(DOCKER_ANNOTATION);
    let git = secret.annotation(GIT_ANNOTATION);
    let arg = match (&secret.kind, docker, git) {
        (SecretKind::BasicAuth, Some(registry), _) => format!("-basic-docker={}={}", secret.name, registry),
        (SecretKind::DockerConfigJson, _, _) => format!("-dockerconfig={}", secret.name),
        (SecretKind::DockerCfg, _, _) => format!("-dockercfg={}", secret.name),
        _ if scope == CredentialScope::RegistryOnly => return None,
        (SecretKind::BasicAuth, None, Some(url)) => format!("-basic-git={}={}", secret.name, url),
        (SecretKind::SshAuth, _, _) => format!("-ssh-git={}={}", secret.name, git.unwrap_or_default()),
        _ => return None,
    };
    Some(arg)
}

/// Volume names use the secret's position in `secrets`, so skipped entries
/// leave gaps rather than shifting later names.
pub fn classify_credentials(secrets: &[CredentialObject], scope: CredentialScope) -> SecretMounts {
    let mut out = SecretMounts::default();
    for (i, secret) in secrets.iter().enumerate() {
        let Some(arg) = credential_arg(secret, scope) else {
            debug!(secret = %secret.name, "skipping unclassified secret");
            continue;
        };
        out.push(format!("{}{}", SECRET_VOLUME_PREFIX, i), &secret.name, format!("{}/{}", SECRETS_PATH, secret.name));
        out.args.push(arg);
    }
    out
}

pub fn classify_signing_keys(secrets: &[CredentialObject]) -> SecretMounts {
    let mut out = SecretMounts::default();
    for (i, secret) in secrets.iter().enumerate() {
        if !secret.signing_key {
            continue;
        }
        out.push(
            format!("{}{}", COSIGN_VOLUME_PREFIX, i),
            &secret.name,
            format!("{}/{}", COSIGN_SECRETS_PATH, secret.name),
        );
        if let Some(repo) = secret.annotation(COSIGN_REPOSITORY_ANNOTATION) {
            out.args.push(format!("-cosign-repositories={}={}", secret.name, repo));
        }
        if let Some(media_types) = secret.annotation(COSIGN_DOCKER_MEDIA_TYPES_ANNOTATION) {
            out.args.push(format!("-cosign-docker-media-types={}={}", secret.name, media_types));
        }
    }
    out
}

/// Builder pull secrets come first; a name seen twice keeps its first slot.
pub fn classify_image_pull(builder: &[String], request: &[String]) -> SecretMounts {
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    let mut out = SecretMounts::default();
    for name in builder.iter().chain(request.iter()) {
        if name.is_empty() || !seen.insert(name.as_str()) {
            continue;
        }
        let idx = seen.len() - 1;
        out.push(
            format!("{}{}", IMAGE_PULL_VOLUME_PREFIX, idx),
            name,
            format!("{}/{}", IMAGE_PULL_SECRETS_PATH, name),
        );
        out.args.push(format!("-imagepull={}", name));
    }
    out
}
