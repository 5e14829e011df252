//! Build request, builder and credential model consumed by the planner.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Affinity, EnvVar, ResourceRequirements, Toleration};
use serde::{Deserialize, Serialize};

use crate::constants::*;

/// One desired build, assembled by the reconciler from an image resource,
/// its resolved source, a builder snapshot and the previous build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRequest {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Image tags to publish; the first one is the primary tag.
    pub tags: Vec<String>,
    pub builder: BuilderRef,
    #[serde(default)]
    pub service_account_name: String,
    pub source: SourceConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_build: Option<LastBuild>,
    #[serde(default)]
    pub resources: ResourceRequirements,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing: Option<ImageSigning>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<ServiceBinding>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default)]
    pub scheduling: Scheduling,
    /// Empty, the literal `now`, or a unix timestamp in seconds.
    #[serde(default)]
    pub creation_time: String,
    #[serde(default)]
    pub default_process: String,
    /// Comma-joined reasons from the change summary that requested this build.
    #[serde(default)]
    pub build_reason: String,
    /// Serialized changes payload from the same summary.
    #[serde(default)]
    pub build_changes: String,
}

impl BuildRequest {
    /// Primary tag (empty when the request carries none).
    pub fn tag(&self) -> &str {
        self.tags.first().map(String::as_str).unwrap_or("")
    }

    pub fn additional_tags(&self) -> &[String] {
        self.tags.get(1..).unwrap_or(&[])
    }

    pub fn volume_cache(&self) -> Option<&str> {
        match &self.cache {
            Some(CacheConfig::Volume(v)) if !v.claim_name.is_empty() => Some(v.claim_name.as_str()),
            _ => None,
        }
    }

    pub fn registry_cache(&self) -> Option<&str> {
        match &self.cache {
            Some(CacheConfig::Registry(r)) if !r.tag.is_empty() => Some(r.tag.as_str()),
            _ => None,
        }
    }

    pub fn signing_configured(&self) -> bool {
        self.signing.is_some()
    }

    /// A stack-only change on a build whose previous image was produced with
    /// the builder's current stack can be served by swapping the run image.
    pub fn rebasable(&self, builder_stack: &str) -> bool {
        self.build_reason == crate::BuildReason::Stack.as_str()
            && self.last_build.as_ref().map(|lb| lb.stack_id == builder_stack).unwrap_or(false)
    }

    pub fn previous_image(&self) -> Option<&str> {
        self.last_build.as_ref().map(|lb| lb.image.as_str()).filter(|s| !s.is_empty())
    }

    pub fn previous_cache_image(&self) -> Option<&str> {
        self.last_build.as_ref().map(|lb| lb.cache_image.as_str()).filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuilderRef {
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    #[serde(flatten)]
    pub source: Source,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
}

impl SourceConfig {
    pub fn git_revision(&self) -> Option<&str> {
        match &self.source {
            Source::Git(g) => Some(g.revision.as_str()),
            _ => None,
        }
    }

    /// Copy with the git revision blanked; other source kinds are returned as is.
    pub fn without_revision(&self) -> SourceConfig {
        let mut out = self.clone();
        if let Source::Git(g) = &mut out.source {
            g.revision.clear();
        }
        out
    }
}

/// Exactly one source kind per build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Source {
    Git(GitSource),
    Blob(BlobSource),
    Registry(RegistrySource),
}

impl Source {
    /// Environment the prepare step uses to fetch the source.
    pub fn env_vars(&self) -> Vec<EnvVar> {
        match self {
            Source::Git(g) => vec![
                env(GIT_URL_ENV, &g.url),
                env(GIT_REVISION_ENV, &g.revision),
                env(GIT_INITIALIZE_SUBMODULES_ENV, &g.initialize_submodules.to_string()),
            ],
            Source::Blob(b) => vec![
                env(BLOB_URL_ENV, &b.url),
                env(BLOB_STRIP_COMPONENTS_ENV, &b.strip_components.to_string()),
                env(BLOB_AUTH_ENV, &b.auth.to_string()),
            ],
            Source::Registry(r) => vec![env(REGISTRY_IMAGE_ENV, &r.image)],
        }
    }

    /// Pull secrets required to fetch the source itself.
    pub fn image_pull_secrets(&self) -> &[String] {
        match self {
            Source::Registry(r) => &r.image_pull_secrets,
            _ => &[],
        }
    }
}

fn env(name: &str, value: &str) -> EnvVar {
    EnvVar { name: name.to_string(), value: Some(value.to_string()), ..Default::default() }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitSource {
    pub url: String,
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub initialize_submodules: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobSource {
    pub url: String,
    #[serde(default)]
    pub strip_components: i64,
    #[serde(default)]
    pub auth: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySource {
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<String>,
}

/// At most one cache mode per build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CacheConfig {
    Volume(VolumeCache),
    Registry(RegistryCache),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeCache {
    pub claim_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryCache {
    pub tag: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastBuild {
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub cache_image: String,
    #[serde(default)]
    pub stack_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSigning {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notary: Option<NotaryConfig>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cosign_annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotaryConfig {
    pub url: String,
    pub secret_name: String,
}

/// Credentials or configuration exposed to buildpacks under the service
/// binding root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ServiceBinding {
    /// Reference to a cluster object; only `Secret` is mountable.
    Service(ServiceRef),
    /// Legacy CNB binding: metadata ConfigMap plus optional secret.
    Cnb(CnbBinding),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRef {
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CnbBinding {
    pub name: String,
    pub metadata_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scheduling {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_deadline_seconds: Option<i64>,
}

/// Resolved builder snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuilderCapabilities {
    pub stack_id: String,
    pub run_image: String,
    pub uid: i64,
    pub gid: i64,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub platform_apis: Vec<String>,
}

impl BuilderCapabilities {
    pub fn is_windows(&self) -> bool {
        self.os == WINDOWS_OS
    }

    /// OS label value for node selection; builders that do not report one run on linux.
    pub fn os_label(&self) -> &str {
        if self.os.is_empty() {
            "linux"
        } else {
            &self.os
        }
    }
}

/// Secret type tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SecretKind {
    BasicAuth,
    SshAuth,
    DockerConfigJson,
    DockerCfg,
    Other(String),
}

impl From<String> for SecretKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            SECRET_TYPE_BASIC_AUTH => SecretKind::BasicAuth,
            SECRET_TYPE_SSH_AUTH => SecretKind::SshAuth,
            SECRET_TYPE_DOCKER_CONFIG_JSON => SecretKind::DockerConfigJson,
            SECRET_TYPE_DOCKER_CFG => SecretKind::DockerCfg,
            _ => SecretKind::Other(s),
        }
    }
}

impl From<SecretKind> for String {
    fn from(k: SecretKind) -> Self {
        match k {
            SecretKind::BasicAuth => SECRET_TYPE_BASIC_AUTH.to_string(),
            SecretKind::SshAuth => SECRET_TYPE_SSH_AUTH.to_string(),
            SecretKind::DockerConfigJson => SECRET_TYPE_DOCKER_CONFIG_JSON.to_string(),
            SecretKind::DockerCfg => SECRET_TYPE_DOCKER_CFG.to_string(),
            SecretKind::Other(s) => s,
        }
    }
}

/// A secret as seen by the planner: only the name, type, annotations and
/// whether it carries signing key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialObject {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SecretKind,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub signing_key: bool,
}

impl CredentialObject {
    pub fn new(name: impl Into<String>, kind: SecretKind) -> Self {
        Self { name: name.into(), kind, annotations: BTreeMap::new(), signing_key: false }
    }

    pub fn with_annotation(mut self, key: &str, value: &str) -> Self {
        self.annotations.insert(key.to_string(), value.to_string());
        self
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_decodes_from_single_key() {
        let v = serde_json::json!({
            "git": { "url": "https://github.com/acme/app", "revision": "abc" },
            "subPath": "api"
        });
        let s: SourceConfig = serde_json::from_value(v).unwrap();
        assert_eq!(s.git_revision(), Some("abc"));
        assert_eq!(s.sub_path.as_deref(), Some("api"));
        assert_eq!(s.without_revision().git_revision(), Some(""));
    }

    #[test]
    fn source_env_vars_per_kind() {
        let blob = Source::Blob(BlobSource { url: "https://x/y.tgz".into(), strip_components: 1, auth: true });
        let names: Vec<_> = blob.env_vars().into_iter().map(|e| (e.name, e.value.unwrap())).collect();
        assert_eq!(
            names,
            vec![
                ("BLOB_URL".to_string(), "https://x/y.tgz".to_string()),
                ("BLOB_STRIP_COMPONENTS".to_string(), "1".to_string()),
                ("BLOB_AUTH".to_string(), "true".to_string()),
            ]
        );
        let reg = Source::Registry(RegistrySource { image: "reg.io/src".into(), image_pull_secrets: vec![] });
        assert_eq!(reg.env_vars()[0].name, "REGISTRY_IMAGE");
    }

    #[test]
    fn secret_kind_round_trips_through_type_strings() {
        let c: CredentialObject = serde_json::from_value(serde_json::json!({
            "name": "creds",
            "type": "kubernetes.io/dockerconfigjson"
        }))
        .unwrap();
        assert_eq!(c.kind, SecretKind::DockerConfigJson);
        let other: SecretKind = "Opaque".to_string().into();
        assert_eq!(String::from(other), "Opaque");
    }

    #[test]
    fn empty_cache_claim_is_not_a_volume_cache() {
        let mut req = BuildRequest {
            name: "b".into(),
            namespace: String::new(),
            labels: BTreeMap::new(),
            tags: vec!["reg.io/app".into()],
            builder: BuilderRef::default(),
            service_account_name: String::new(),
            source: SourceConfig { source: Source::Git(GitSource::default()), sub_path: None },
            cache: Some(CacheConfig::Volume(VolumeCache { claim_name: String::new() })),
            last_build: None,
            resources: Default::default(),
            signing: None,
            services: vec![],
            env: vec![],
            scheduling: Scheduling::default(),
            creation_time: String::new(),
            default_process: String::new(),
            build_reason: String::new(),
            build_changes: String::new(),
        };
        assert!(req.volume_cache().is_none());
        req.cache = Some(CacheConfig::Registry(RegistryCache { tag: "reg.io/cache".into() }));
        assert_eq!(req.registry_cache(), Some("reg.io/cache"));
        assert!(!req.rebasable("io.stack"));
    }
}
