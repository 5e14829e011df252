//! Names and paths shared with the lifecycle binaries baked into builder
//! images. These strings are a wire contract; changing any of them breaks
//! builds on existing builders.

#![forbid(unsafe_code)]

// ---------------- Containers ----------------
pub const PREPARE_CONTAINER: &str = "prepare";
pub const ANALYZE_CONTAINER: &str = "analyze";
pub const DETECT_CONTAINER: &str = "detect";
pub const RESTORE_CONTAINER: &str = "restore";
pub const BUILD_CONTAINER: &str = "build";
pub const EXPORT_CONTAINER: &str = "export";
pub const REBASE_CONTAINER: &str = "rebase";
pub const COMPLETION_CONTAINER: &str = "completion";

// ---------------- Commands ----------------
pub const ANALYZER_COMMAND: &str = "/cnb/lifecycle/analyzer";
pub const DETECTOR_COMMAND: &str = "/cnb/lifecycle/detector";
pub const RESTORER_COMMAND: &str = "/cnb/lifecycle/restorer";
pub const BUILDER_COMMAND: &str = "/cnb/lifecycle/builder";
pub const EXPORTER_COMMAND: &str = "/cnb/lifecycle/exporter";
pub const COMPLETION_COMMAND: &str = "/cnb/process/completion";
pub const BUILD_INIT_COMMAND: &str = "/cnb/process/build-init";
pub const REBASE_COMMAND: &str = "/cnb/process/rebase";
pub const NETWORK_WAIT_LAUNCHER_COMMAND: &str = "/networkWait/network-wait-launcher";
pub const NETWORK_WAIT_SEPARATOR: &str = "--";

// ---------------- Volumes (name, mount path) ----------------
pub const WORKSPACE_VOLUME: &str = "workspace-dir";
pub const WORKSPACE_PATH: &str = "/workspace";
pub const HOME_VOLUME: &str = "home-dir";
pub const HOME_PATH: &str = "/builder/home";
pub const LAYERS_VOLUME: &str = "layers-dir";
pub const LAYERS_PATH: &str = "/layers";
pub const PROJECT_METADATA_PATH: &str = "/projectMetadata";
pub const PLATFORM_VOLUME: &str = "platform-dir";
pub const PLATFORM_PATH: &str = "/platform";
pub const CACHE_VOLUME: &str = "cache-dir";
pub const CACHE_PATH: &str = "/cache";
pub const REPORT_VOLUME: &str = "report-dir";
pub const REPORT_DIR_PATH: &str = "/var/report";
pub const NOTARY_VOLUME: &str = "notary-dir";
pub const NOTARY_PATH: &str = "/var/notary/v1";
pub const NETWORK_WAIT_VOLUME: &str = "network-wait-launcher-dir";
pub const NETWORK_WAIT_PATH: &str = "/networkWait";

pub const REPORT_TOML_PATH: &str = "/var/report/report.toml";
pub const SERVICE_BINDING_ROOT: &str = "/platform/bindings";

// ---------------- Credential volumes ----------------
pub const SECRET_VOLUME_PREFIX: &str = "secret-volume-";
pub const COSIGN_VOLUME_PREFIX: &str = "secret-volume-cosign-";
pub const IMAGE_PULL_VOLUME_PREFIX: &str = "image-pull-secret-volume-";
pub const SECRETS_PATH: &str = "/var/build-secrets";
pub const COSIGN_SECRETS_PATH: &str = "/var/build-secrets/cosign";
pub const IMAGE_PULL_SECRETS_PATH: &str = "/var/build-secrets/imagepull";

// ---------------- Environment ----------------
pub const HOME_ENV: &str = "HOME";
pub const USERPROFILE_ENV: &str = "USERPROFILE";
pub const SERVICE_BINDING_ROOT_ENV: &str = "SERVICE_BINDING_ROOT";
pub const PLATFORM_API_ENV: &str = "CNB_PLATFORM_API";
pub const CACHE_TAG_ENV: &str = "CACHE_TAG";
pub const SOURCE_DATE_EPOCH_ENV: &str = "SOURCE_DATE_EPOCH";
pub const RUN_IMAGE_ENV: &str = "CNB_RUN_IMAGE";
pub const BUILD_CHANGES_ENV: &str = "BUILD_CHANGES";
pub const GIT_URL_ENV: &str = "GIT_URL";
pub const GIT_REVISION_ENV: &str = "GIT_REVISION";
pub const GIT_INITIALIZE_SUBMODULES_ENV: &str = "GIT_INITIALIZE_SUBMODULES";
pub const BLOB_URL_ENV: &str = "BLOB_URL";
pub const BLOB_STRIP_COMPONENTS_ENV: &str = "BLOB_STRIP_COMPONENTS";
pub const BLOB_AUTH_ENV: &str = "BLOB_AUTH";
pub const REGISTRY_IMAGE_ENV: &str = "REGISTRY_IMAGE";
pub const SOURCE_SUB_PATH_ENV: &str = "SOURCE_SUB_PATH";
pub const PLATFORM_ENV_VARS_ENV: &str = "PLATFORM_ENV_VARS";
pub const IMAGE_TAG_ENV: &str = "IMAGE_TAG";
pub const DNS_PROBE_HOSTNAME_ENV: &str = "DNS_PROBE_HOSTNAME";

// ---------------- Credential annotations ----------------
pub const GIT_ANNOTATION: &str = "kiln.dev/git";
pub const DOCKER_ANNOTATION: &str = "kiln.dev/docker";
pub const COSIGN_REPOSITORY_ANNOTATION: &str = "kiln.dev/cosign.repository";
pub const COSIGN_DOCKER_MEDIA_TYPES_ANNOTATION: &str = "kiln.dev/cosign.docker-media-types";
pub const COSIGN_KEY_DATA: &str = "cosign.key";

// ---------------- Secret types ----------------
pub const SECRET_TYPE_BASIC_AUTH: &str = "kubernetes.io/basic-auth";
pub const SECRET_TYPE_SSH_AUTH: &str = "kubernetes.io/ssh-auth";
pub const SECRET_TYPE_DOCKER_CONFIG_JSON: &str = "kubernetes.io/dockerconfigjson";
pub const SECRET_TYPE_DOCKER_CFG: &str = "kubernetes.io/dockercfg";

// ---------------- Pod ----------------
pub const OS_LABEL: &str = "kubernetes.io/os";
pub const WINDOWS_OS: &str = "windows";
pub const BUILD_POD_SUFFIX: &str = "-build-pod";
pub const SECRET_BINDING_KIND: &str = "Secret";
