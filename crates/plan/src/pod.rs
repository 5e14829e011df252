//! Build pod synthesis.
//!
//! Compiles a [`BuildRequest`] plus the builder snapshot and resolved
//! credentials into a pod whose init containers drive the CNB lifecycle:
//!
//! - platform API `< 0.7`: prepare, detect, analyze, restore, build, export
//! - platform API `>= 0.7`: prepare, analyze, detect, restore, build, export
//! - stack-only rebuild on an unchanged stack: a single rebase step
//!
//! `completion` is always the pod's only regular container.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Capabilities, Container, EmptyDirVolumeSource, EnvVar, LocalObjectReference, Pod, PodSecurityContext, PodSpec,
    SeccompProfile, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kiln_core::constants::*;
use kiln_core::{BuildRequest, BuilderCapabilities, Clock, CredentialObject, PlanConfig, PlanError, PlatformApi, Result};
use metrics::counter;
use oci_distribution::Reference;
use tracing::{debug, info, warn};

use crate::bindings::binding_mounts;
use crate::cache::CacheStrategy;
use crate::os::OsAdapter;
use crate::platform::{Negotiator, LOWEST_PLATFORM_API};
use crate::secrets::{classify_credentials, classify_image_pull, classify_signing_keys, secret_volume, CredentialScope, SecretMounts};

/// Everything besides the request that shapes the pod.
#[derive(Clone, Copy)]
pub struct BuildContext<'a> {
    pub builder: &'a BuilderCapabilities,
    /// Secrets attached to the build's service account.
    pub secrets: &'a [CredentialObject],
    /// Image pull secrets attached to the build's service account.
    pub image_pull_secrets: &'a [String],
    pub config: &'a PlanConfig,
    pub clock: &'a dyn Clock,
}

pub fn build_pod(request: &BuildRequest, ctx: &BuildContext<'_>) -> Result<Pod> {
    let res = plan(request, ctx);
    match &res {
        Ok(_) => counter!("plan_pods_total", 1u64),
        Err(e) => {
            counter!("plan_errors_total", 1u64);
            warn!(build = %request.name, error = %e, "build pod synthesis failed");
        }
    }
    res
}

fn plan(req: &BuildRequest, ctx: &BuildContext<'_>) -> Result<Pod> {
    if req.tags.is_empty() {
        return Err(PlanError::MissingTag);
    }
    let windows = ctx.builder.is_windows();
    let api = Negotiator::for_build(req.signing_configured(), windows)
        .with_ceiling(ctx.config.max_platform_api.as_ref())
        .negotiate(&ctx.builder.platform_apis)?;
    let tag = parse_reference(req.tag())?;
    let adapter = OsAdapter::for_os(windows, tag.resolve_registry());
    let cache = CacheStrategy::select(req, windows);
    let completion = completion_step(req, ctx, &cache, windows);

    if req.rebasable(&ctx.builder.stack_id) {
        info!(build = %req.name, stack = %ctx.builder.stack_id, "stack-only change; planning rebase");
        counter!("plan_rebase_total", 1u64);
        return rebase_pod(req, ctx, &api, &adapter, completion);
    }
    debug!(build = %req.name, platform_api = %api, cache = ?cache, windows, "planning build pod");

    let creds = classify_credentials(ctx.secrets, CredentialScope::All);
    let pulls = classify_image_pull(&req.builder.image_pull_secrets, &request_pull_secrets(req, ctx));
    let bindings = binding_mounts(&req.services)?;
    let epoch = source_date_epoch(&req.creation_time, ctx.clock)?;
    let platform_env = serde_json::to_string(&req.env)?;

    let legacy = api < PlatformApi::new(0, 7);
    let app_dir = app_dir(req.source.sub_path.as_deref());
    let builder_image = req.builder.image.as_str();
    let mut steps = Steps::new(&adapter, container_security_context(windows));

    let mut prepare_env = req.source.source.env_vars();
    prepare_env.extend([
        env(SOURCE_SUB_PATH_ENV, req.source.sub_path.as_deref().unwrap_or_default()),
        env(PLATFORM_ENV_VARS_ENV, &platform_env),
        env(IMAGE_TAG_ENV, req.tag()),
        env(DNS_PROBE_HOSTNAME_ENV, tag.resolve_registry()),
        env(BUILD_CHANGES_ENV, &req.build_changes),
        env(PLATFORM_API_ENV, &api.to_string()),
        env(HOME_ENV, HOME_PATH),
    ]);
    let mut prepare_mounts = Vec::new();
    prepare_mounts.extend(creds.mounts.iter().cloned());
    prepare_mounts.extend(pulls.mounts.iter().cloned());
    prepare_mounts.extend([
        mount(PLATFORM_VOLUME, PLATFORM_PATH),
        mount(WORKSPACE_VOLUME, WORKSPACE_PATH),
        mount(HOME_VOLUME, HOME_PATH),
        mount(LAYERS_VOLUME, PROJECT_METADATA_PATH),
    ]);
    steps.push(Container {
        name: PREPARE_CONTAINER.to_string(),
        image: Some(ctx.config.build_init_image(windows).to_string()),
        command: Some(vec![BUILD_INIT_COMMAND.to_string()]),
        args: Some(creds.args.iter().chain(pulls.args.iter()).cloned().collect()),
        env: Some(prepare_env),
        volume_mounts: Some(prepare_mounts),
        ..Default::default()
    });

    let mut analyze_args = vec!["-layers=/layers".to_string(), "-analyzed=/layers/analyzed.toml".to_string()];
    if legacy {
        analyze_args.push("-group=/layers/group.toml".to_string());
    } else {
        analyze_args.push(format!("-run-image={}", ctx.builder.run_image));
        analyze_args.extend(req.additional_tags().iter().map(|t| format!("-tag={}", t)));
    }
    analyze_args.extend(cache.analyze_args(&api));
    if let Some(prev) = req.previous_image() {
        analyze_args.push(format!("-previous-image={}", prev));
    }
    analyze_args.push(req.tag().to_string());
    let mut analyze_mounts = vec![
        mount(LAYERS_VOLUME, LAYERS_PATH),
        mount(WORKSPACE_VOLUME, WORKSPACE_PATH),
        mount(HOME_VOLUME, HOME_PATH),
    ];
    if legacy {
        analyze_mounts.extend(cache.mounts());
    }
    let analyze = lifecycle_step(
        ANALYZE_CONTAINER,
        builder_image,
        ANALYZER_COMMAND,
        analyze_args,
        vec![env(HOME_ENV, HOME_PATH), env(PLATFORM_API_ENV, &api.to_string())],
        analyze_mounts,
        req,
    );

    let mut detect_mounts = vec![
        mount(LAYERS_VOLUME, LAYERS_PATH),
        mount(PLATFORM_VOLUME, PLATFORM_PATH),
        mount(WORKSPACE_VOLUME, WORKSPACE_PATH),
    ];
    detect_mounts.extend(bindings.mounts.iter().cloned());
    let detect = lifecycle_step(
        DETECT_CONTAINER,
        builder_image,
        DETECTOR_COMMAND,
        vec![
            format!("-app={}", app_dir),
            "-group=/layers/group.toml".to_string(),
            "-plan=/layers/plan.toml".to_string(),
        ],
        vec![env(SERVICE_BINDING_ROOT_ENV, SERVICE_BINDING_ROOT), env(PLATFORM_API_ENV, &api.to_string())],
        detect_mounts,
        req,
    );

    if legacy {
        steps.push(detect);
        steps.push(analyze);
    } else {
        steps.push(analyze);
        steps.push(detect);
    }

    let mut restore_args = vec!["-group=/layers/group.toml".to_string(), "-layers=/layers".to_string()];
    restore_args.extend(cache.restore_args());
    let mut restore_mounts = vec![mount(LAYERS_VOLUME, LAYERS_PATH), mount(HOME_VOLUME, HOME_PATH)];
    restore_mounts.extend(cache.mounts());
    steps.push(lifecycle_step(
        RESTORE_CONTAINER,
        builder_image,
        RESTORER_COMMAND,
        restore_args,
        vec![env(HOME_ENV, HOME_PATH), env(PLATFORM_API_ENV, &api.to_string())],
        restore_mounts,
        req,
    ));

    let mut build_mounts = vec![
        mount(LAYERS_VOLUME, LAYERS_PATH),
        mount(PLATFORM_VOLUME, PLATFORM_PATH),
        mount(WORKSPACE_VOLUME, WORKSPACE_PATH),
    ];
    build_mounts.extend(bindings.mounts.iter().cloned());
    steps.push(lifecycle_step(
        BUILD_CONTAINER,
        builder_image,
        BUILDER_COMMAND,
        vec![
            "-layers=/layers".to_string(),
            format!("-app={}", app_dir),
            "-group=/layers/group.toml".to_string(),
            "-plan=/layers/plan.toml".to_string(),
        ],
        vec![env(SERVICE_BINDING_ROOT_ENV, SERVICE_BINDING_ROOT), env(PLATFORM_API_ENV, &api.to_string())],
        build_mounts,
        req,
    ));

    let mut export_args = vec![
        "-layers=/layers".to_string(),
        format!("-app={}", app_dir),
        "-group=/layers/group.toml".to_string(),
    ];
    if legacy {
        export_args.push(format!("-run-image={}", ctx.builder.run_image));
    } else {
        export_args.push("-analyzed=/layers/analyzed.toml".to_string());
    }
    export_args.push("-project-metadata=/layers/project-metadata.toml".to_string());
    if api > LOWEST_PLATFORM_API {
        export_args.push(format!("-report={}", REPORT_TOML_PATH));
    }
    if let Some(arg) = process_type_arg(req, &api) {
        export_args.push(arg);
    }
    export_args.extend(cache.export_args());
    export_args.extend(req.tags.iter().cloned());
    let mut export_env = vec![
        env(HOME_ENV, HOME_PATH),
        env(PLATFORM_API_ENV, &api.to_string()),
        env(RUN_IMAGE_ENV, &ctx.builder.run_image),
    ];
    if let Some(epoch) = epoch {
        export_env.push(env(SOURCE_DATE_EPOCH_ENV, &epoch.to_string()));
    }
    let mut export_mounts = vec![
        mount(LAYERS_VOLUME, LAYERS_PATH),
        mount(WORKSPACE_VOLUME, WORKSPACE_PATH),
        mount(HOME_VOLUME, HOME_PATH),
        mount(REPORT_VOLUME, REPORT_DIR_PATH),
    ];
    export_mounts.extend(cache.mounts());
    steps.push(lifecycle_step(EXPORT_CONTAINER, builder_image, EXPORTER_COMMAND, export_args, export_env, export_mounts, req));

    let mut volumes = Vec::new();
    volumes.extend(creds.volumes);
    volumes.extend(completion.signing.volumes.iter().cloned());
    volumes.extend(pulls.volumes);
    volumes.extend(bindings.volumes);
    volumes.extend(
        [WORKSPACE_VOLUME, HOME_VOLUME, LAYERS_VOLUME, PLATFORM_VOLUME, REPORT_VOLUME].into_iter().map(empty_dir),
    );
    volumes.extend(cache.volume());
    volumes.extend(completion.notary_volume.iter().cloned());
    if windows {
        volumes.push(empty_dir(NETWORK_WAIT_VOLUME));
    }

    let completion = steps.finish(completion.container);
    Ok(assemble(req, ctx, steps.containers, completion, volumes))
}

fn rebase_pod(
    req: &BuildRequest,
    ctx: &BuildContext<'_>,
    api: &PlatformApi,
    adapter: &OsAdapter,
    completion: Completion,
) -> Result<Pod> {
    let last_image = req.previous_image().ok_or(PlanError::MissingLastBuild)?;
    let windows = ctx.builder.is_windows();
    let creds = classify_credentials(ctx.secrets, CredentialScope::RegistryOnly);
    let pulls = classify_image_pull(&req.builder.image_pull_secrets, &request_pull_secrets(req, ctx));

    let mut args = vec![
        "--run-image".to_string(),
        ctx.builder.run_image.clone(),
        "--last-built-image".to_string(),
        last_image.to_string(),
        "--report".to_string(),
        REPORT_TOML_PATH.to_string(),
    ];
    args.extend(creds.args.iter().cloned());
    args.extend(pulls.args.iter().cloned());
    args.extend(req.tags.iter().cloned());

    let mut mounts = Vec::new();
    mounts.extend(creds.mounts.iter().cloned());
    mounts.extend(pulls.mounts.iter().cloned());
    mounts.push(mount(HOME_VOLUME, HOME_PATH));
    mounts.push(mount(REPORT_VOLUME, REPORT_DIR_PATH));

    let mut steps = Steps::new(adapter, container_security_context(windows));
    steps.push(Container {
        name: REBASE_CONTAINER.to_string(),
        image: Some(ctx.config.rebase_image.clone()),
        command: Some(vec![REBASE_COMMAND.to_string()]),
        args: Some(args),
        env: Some(vec![
            env(BUILD_CHANGES_ENV, &req.build_changes),
            env(PLATFORM_API_ENV, &api.to_string()),
            env(HOME_ENV, HOME_PATH),
        ]),
        volume_mounts: Some(mounts),
        ..Default::default()
    });

    let mut volumes = Vec::new();
    volumes.extend(creds.volumes);
    volumes.extend(completion.signing.volumes.iter().cloned());
    volumes.extend(pulls.volumes);
    volumes.extend([HOME_VOLUME, REPORT_VOLUME].into_iter().map(empty_dir));
    volumes.extend(completion.notary_volume.iter().cloned());
    if windows {
        volumes.push(empty_dir(NETWORK_WAIT_VOLUME));
    }

    let completion = steps.finish(completion.container);
    Ok(assemble(req, ctx, steps.containers, completion, volumes))
}

/// The completion container plus the volumes only it mounts.
struct Completion {
    container: Container,
    signing: SecretMounts,
    notary_volume: Option<Volume>,
}

fn completion_step(req: &BuildRequest, ctx: &BuildContext<'_>, cache: &CacheStrategy<'_>, windows: bool) -> Completion {
    let signing = classify_signing_keys(ctx.secrets);
    let mut args = Vec::new();
    let mut mounts = vec![mount(REPORT_VOLUME, REPORT_DIR_PATH), mount(HOME_VOLUME, HOME_PATH)];
    let mut notary_volume = None;
    if let Some(cfg) = &req.signing {
        if let Some(notary) = cfg.notary.as_ref().filter(|n| !n.url.is_empty()) {
            args.push(format!("-notary-v1-url={}", notary.url));
            mounts.push(mount(NOTARY_VOLUME, NOTARY_PATH));
            notary_volume = Some(secret_volume(NOTARY_VOLUME, &notary.secret_name));
        }
        args.extend(cfg.cosign_annotations.iter().map(|(k, v)| format!("-cosign-annotations={}={}", k, v)));
    }
    args.extend(signing.args.iter().cloned());
    mounts.extend(signing.mounts.iter().cloned());

    let mut env_vars = vec![env(HOME_ENV, HOME_PATH)];
    if let Some(tag) = cache.cache_tag() {
        env_vars.push(env(CACHE_TAG_ENV, tag));
    }

    Completion {
        container: Container {
            name: COMPLETION_CONTAINER.to_string(),
            image: Some(ctx.config.completion_image(windows).to_string()),
            command: Some(vec![COMPLETION_COMMAND.to_string()]),
            args: Some(args),
            env: Some(env_vars),
            volume_mounts: Some(mounts),
            ..Default::default()
        },
        signing,
        notary_volume,
    }
}

/// Collects init containers, applying OS passes and the security context to each.
struct Steps<'a> {
    adapter: &'a OsAdapter,
    security: Option<SecurityContext>,
    containers: Vec<Container>,
}

impl<'a> Steps<'a> {
    fn new(adapter: &'a OsAdapter, security: Option<SecurityContext>) -> Self {
        Self { adapter, security, containers: Vec::new() }
    }

    fn adapt(&self, mut c: Container) -> Container {
        c.security_context = self.security.clone();
        self.adapter.apply(c)
    }

    fn push(&mut self, c: Container) {
        let c = self.adapt(c);
        self.containers.push(c);
    }

    fn finish(&self, completion: Container) -> Container {
        self.adapt(completion)
    }
}

fn assemble(
    req: &BuildRequest,
    ctx: &BuildContext<'_>,
    init_containers: Vec<Container>,
    completion: Container,
    volumes: Vec<Volume>,
) -> Pod {
    let sched = &req.scheduling;
    let mut node_selector: BTreeMap<String, String> = sched.node_selector.clone();
    node_selector.insert(OS_LABEL.to_string(), ctx.builder.os_label().to_string());
    let pull_secrets: Vec<LocalObjectReference> = req
        .builder
        .image_pull_secrets
        .iter()
        .map(|name| LocalObjectReference { name: Some(name.clone()) })
        .collect();

    Pod {
        metadata: ObjectMeta {
            name: Some(format!("{}{}", req.name, BUILD_POD_SUFFIX)),
            namespace: Some(req.namespace.clone()).filter(|s| !s.is_empty()),
            labels: Some(req.labels.clone()).filter(|l| !l.is_empty()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            init_containers: Some(init_containers),
            containers: vec![completion],
            volumes: Some(volumes),
            restart_policy: Some("Never".to_string()),
            service_account_name: Some(req.service_account_name.clone()).filter(|s| !s.is_empty()),
            image_pull_secrets: Some(pull_secrets).filter(|p| !p.is_empty()),
            node_selector: Some(node_selector),
            tolerations: Some(sched.tolerations.clone()).filter(|t| !t.is_empty()),
            affinity: sched.affinity.clone(),
            runtime_class_name: sched.runtime_class_name.clone(),
            scheduler_name: sched.scheduler_name.clone(),
            priority_class_name: sched.priority_class_name.clone(),
            active_deadline_seconds: sched.active_deadline_seconds,
            security_context: pod_security_context(ctx.builder),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn lifecycle_step(
    name: &str,
    image: &str,
    command: &str,
    args: Vec<String>,
    env: Vec<EnvVar>,
    mounts: Vec<VolumeMount>,
    req: &BuildRequest,
) -> Container {
    Container {
        name: name.to_string(),
        image: Some(image.to_string()),
        command: Some(vec![command.to_string()]),
        args: Some(args),
        env: Some(env),
        volume_mounts: Some(mounts),
        resources: Some(req.resources.clone()),
        ..Default::default()
    }
}

/// Unset default process: only lifecycles between the lowest supported
/// version and 0.5 need `web` spelled out.
fn process_type_arg(req: &BuildRequest, api: &PlatformApi) -> Option<String> {
    if !req.default_process.is_empty() {
        return Some(format!("-process-type={}", req.default_process));
    }
    if *api > LOWEST_PLATFORM_API && *api <= PlatformApi::new(0, 5) {
        return Some("-process-type=web".to_string());
    }
    None
}

/// Resolve the creation-time directive into a `SOURCE_DATE_EPOCH` value.
/// Timestamps are signed decimals, so `+5` and pre-epoch values pass.
pub fn source_date_epoch(directive: &str, clock: &dyn Clock) -> Result<Option<i64>> {
    match directive {
        "" => Ok(None),
        "now" => Ok(Some(clock.now().timestamp())),
        value => value
            .parse::<i64>()
            .map(Some)
            .map_err(|source| PlanError::InvalidCreationTime { value: value.to_string(), source }),
    }
}

fn parse_reference(s: &str) -> Result<Reference> {
    s.parse::<Reference>()
        .map_err(|e| PlanError::InvalidReference { reference: s.to_string(), reason: e.to_string() })
}

fn request_pull_secrets(req: &BuildRequest, ctx: &BuildContext<'_>) -> Vec<String> {
    ctx.image_pull_secrets.iter().chain(req.source.source.image_pull_secrets()).cloned().collect()
}

fn app_dir(sub_path: Option<&str>) -> String {
    match sub_path.map(|s| s.trim_matches('/')).filter(|s| !s.is_empty()) {
        Some(sub) => format!("{}/{}", WORKSPACE_PATH, sub),
        None => WORKSPACE_PATH.to_string(),
    }
}

fn container_security_context(windows: bool) -> Option<SecurityContext> {
    if windows {
        return None;
    }
    Some(SecurityContext {
        run_as_non_root: Some(true),
        allow_privilege_escalation: Some(false),
        privileged: Some(false),
        capabilities: Some(Capabilities { drop: Some(vec!["ALL".to_string()]), ..Default::default() }),
        seccomp_profile: Some(SeccompProfile { type_: "RuntimeDefault".to_string(), ..Default::default() }),
        ..Default::default()
    })
}

fn pod_security_context(builder: &BuilderCapabilities) -> Option<PodSecurityContext> {
    if builder.is_windows() {
        return None;
    }
    Some(PodSecurityContext {
        run_as_user: Some(builder.uid),
        run_as_group: Some(builder.gid),
        fs_group: Some(builder.gid),
        ..Default::default()
    })
}

fn env(name: &str, value: &str) -> EnvVar {
    EnvVar { name: name.to_string(), value: Some(value.to_string()), ..Default::default() }
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount { name: name.to_string(), mount_path: path.to_string(), ..Default::default() }
}

fn empty_dir(name: &str) -> Volume {
    Volume { name: name.to_string(), empty_dir: Some(EmptyDirVolumeSource::default()), ..Default::default() }
}
