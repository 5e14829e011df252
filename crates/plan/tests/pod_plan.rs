#![forbid(unsafe_code)]

use chrono::{TimeZone, Utc};
use k8s_openapi::api::core::v1::{Container, Pod};
use kiln_core::{BuildRequest, BuilderCapabilities, CredentialObject, FixedClock, PlanConfig, PlanError, SecretKind};
use kiln_plan::{build_pod, BuildContext};
use serde_json::json;

const PRIMARY: &str = "reg.io/acme/app:latest";
const RUN_IMAGE: &str = "reg.io/acme/run@sha256:1111111111111111111111111111111111111111111111111111111111111111";

fn base() -> serde_json::Value {
    json!({
        "name": "app-build-1",
        "namespace": "dev",
        "tags": [PRIMARY, "reg.io/acme/app:v1"],
        "builder": { "image": "reg.io/acme/builder:base", "imagePullSecrets": ["builder-pull"] },
        "serviceAccountName": "builder-sa",
        "source": { "git": { "url": "https://github.com/acme/app", "revision": "abc123" } }
    })
}

fn request(v: serde_json::Value) -> BuildRequest {
    serde_json::from_value(v).unwrap()
}

fn caps(os: &str, apis: &[&str]) -> BuilderCapabilities {
    BuilderCapabilities {
        stack_id: "io.acme.stack".into(),
        run_image: RUN_IMAGE.into(),
        uid: 1000,
        gid: 1001,
        os: os.into(),
        platform_apis: apis.iter().map(|s| s.to_string()).collect(),
    }
}

fn plan_with(req: &BuildRequest, builder: &BuilderCapabilities, secrets: &[CredentialObject]) -> Result<Pod, PlanError> {
    let config = PlanConfig::default();
    let clock = FixedClock(Utc.timestamp_opt(1_700_000_000, 0).unwrap());
    let ctx = BuildContext { builder, secrets, image_pull_secrets: &["sa-pull".to_string()], config: &config, clock: &clock };
    build_pod(req, &ctx)
}

fn plan(req: &BuildRequest, builder: &BuilderCapabilities) -> Pod {
    plan_with(req, builder, &[]).unwrap()
}

fn init(pod: &Pod) -> &[Container] {
    pod.spec.as_ref().unwrap().init_containers.as_deref().unwrap()
}

fn step<'a>(pod: &'a Pod, name: &str) -> &'a Container {
    init(pod).iter().find(|c| c.name == name).unwrap()
}

fn names(pod: &Pod) -> Vec<&str> {
    init(pod).iter().map(|c| c.name.as_str()).collect()
}

fn args(c: &Container) -> Vec<&str> {
    c.args.as_deref().unwrap_or_default().iter().map(String::as_str).collect()
}

fn env<'a>(c: &'a Container, name: &str) -> Option<&'a str> {
    c.env.as_deref().unwrap_or_default().iter().find(|e| e.name == name).and_then(|e| e.value.as_deref())
}

fn volume_names(pod: &Pod) -> Vec<&str> {
    pod.spec.as_ref().unwrap().volumes.as_deref().unwrap().iter().map(|v| v.name.as_str()).collect()
}

#[test]
fn legacy_order_and_analyze_without_previous_image() {
    let pod = plan(&request(base()), &caps("linux", &["0.6"]));
    assert_eq!(names(&pod), vec!["prepare", "detect", "analyze", "restore", "build", "export"]);
    assert_eq!(
        args(step(&pod, "analyze")),
        vec!["-layers=/layers", "-analyzed=/layers/analyzed.toml", "-group=/layers/group.toml", PRIMARY]
    );
    let spec = pod.spec.as_ref().unwrap();
    assert_eq!(spec.containers.len(), 1);
    assert_eq!(spec.containers[0].name, "completion");
}

#[test]
fn analyze_carries_previous_image_before_primary_tag() {
    let mut v = base();
    v["lastBuild"] = json!({ "image": "reg.io/acme/app@sha256:prev", "stackId": "io.acme.stack" });
    let pod = plan(&request(v), &caps("linux", &["0.6"]));
    let a = args(step(&pod, "analyze"));
    assert_eq!(a[a.len() - 2], "-previous-image=reg.io/acme/app@sha256:prev");
    assert_eq!(a[a.len() - 1], PRIMARY);
}

#[test]
fn modern_order_moves_analyze_first() {
    let pod = plan(&request(base()), &caps("linux", &["0.7", "0.8"]));
    assert_eq!(names(&pod), vec!["prepare", "analyze", "detect", "restore", "build", "export"]);
    let analyze = args(step(&pod, "analyze"));
    assert!(analyze.contains(&format!("-run-image={}", RUN_IMAGE).as_str()));
    assert!(analyze.contains(&"-tag=reg.io/acme/app:v1"));
    assert!(!analyze.contains(&"-group=/layers/group.toml"));
    let export = step(&pod, "export");
    assert!(args(export).contains(&"-analyzed=/layers/analyzed.toml"));
    assert_eq!(env(export, "CNB_PLATFORM_API"), Some("0.8"));
    assert_eq!(env(export, "CNB_RUN_IMAGE"), Some(RUN_IMAGE));
    assert_eq!(&args(export)[args(export).len() - 2..], &[PRIMARY, "reg.io/acme/app:v1"]);
}

#[test]
fn report_and_process_type_follow_platform_api() {
    let req = request(base());

    let lowest = args(step(&plan(&req, &caps("linux", &["0.3"])), "export")).join(" ");
    assert!(!lowest.contains("-report="));
    assert!(!lowest.contains("-process-type"));
    assert!(lowest.contains(&format!("-run-image={}", RUN_IMAGE)));

    let mid = args(step(&plan(&req, &caps("linux", &["0.5"])), "export")).join(" ");
    assert!(mid.contains("-report=/var/report/report.toml"));
    assert!(mid.contains("-process-type=web"));

    let late = args(step(&plan(&req, &caps("linux", &["0.6"])), "export")).join(" ");
    assert!(!late.contains("-process-type"));

    let mut v = base();
    v["defaultProcess"] = json!("worker");
    let explicit = args(step(&plan(&request(v), &caps("linux", &["0.9"])), "export")).join(" ");
    assert!(explicit.contains("-process-type=worker"));
}

#[test]
fn fixed_clock_plans_are_identical() {
    let mut v = base();
    v["creationTime"] = json!("now");
    let req = request(v);
    let builder = caps("linux", &["0.9"]);
    let first = plan(&req, &builder);
    assert_eq!(first, plan(&req, &builder));
    assert_eq!(env(step(&first, "export"), "SOURCE_DATE_EPOCH"), Some("1700000000"));
}

#[test]
fn explicit_creation_time_and_none() {
    let mut v = base();
    v["creationTime"] = json!("1566172801");
    let pod = plan(&request(v), &caps("linux", &["0.9"]));
    assert_eq!(env(step(&pod, "export"), "SOURCE_DATE_EPOCH"), Some("1566172801"));

    let pod = plan(&request(base()), &caps("linux", &["0.9"]));
    assert_eq!(env(step(&pod, "export"), "SOURCE_DATE_EPOCH"), None);
}

#[test]
fn stack_change_on_same_stack_rebases() {
    let mut v = base();
    v["buildReason"] = json!("STACK");
    v["cache"] = json!({ "volume": { "claimName": "app-cache" } });
    v["lastBuild"] = json!({ "image": "reg.io/acme/app@sha256:prev", "stackId": "io.acme.stack" });
    let pod = plan(&request(v), &caps("linux", &["0.9"]));
    let spec = pod.spec.as_ref().unwrap();
    assert_eq!(names(&pod), vec!["rebase"]);
    assert_eq!(spec.containers.len(), 1);
    assert!(!volume_names(&pod).contains(&"cache-dir"));
    let rebase = args(step(&pod, "rebase"));
    assert_eq!(
        &rebase[..6],
        &["--run-image", RUN_IMAGE, "--last-built-image", "reg.io/acme/app@sha256:prev", "--report", "/var/report/report.toml"]
    );
    assert!(rebase.contains(&"-imagepull=builder-pull"));
    assert_eq!(&rebase[rebase.len() - 2..], &[PRIMARY, "reg.io/acme/app:v1"]);
}

#[test]
fn stack_change_on_new_stack_runs_full_build() {
    let mut v = base();
    v["buildReason"] = json!("STACK");
    v["lastBuild"] = json!({ "image": "reg.io/acme/app@sha256:prev", "stackId": "io.other.stack" });
    let pod = plan(&request(v), &caps("linux", &["0.9"]));
    assert_eq!(init(&pod).len(), 6);

    let mut v = base();
    v["buildReason"] = json!("STACK,CONFIG");
    v["lastBuild"] = json!({ "image": "reg.io/acme/app@sha256:prev", "stackId": "io.acme.stack" });
    assert_eq!(init(&plan(&request(v), &caps("linux", &["0.9"]))).len(), 6);
}

#[test]
fn rebase_only_receives_registry_credentials() {
    let mut v = base();
    v["buildReason"] = json!("STACK");
    v["lastBuild"] = json!({ "image": "reg.io/acme/app@sha256:prev", "stackId": "io.acme.stack" });
    let secrets = vec![
        CredentialObject::new("git-ssh", SecretKind::SshAuth).with_annotation("kiln.dev/git", "git@github.com"),
        CredentialObject::new("regcreds", SecretKind::DockerConfigJson),
    ];
    let pod = plan_with(&request(v), &caps("linux", &["0.9"]), &secrets).unwrap();
    let rebase = args(step(&pod, "rebase"));
    assert!(rebase.contains(&"-dockerconfig=regcreds"));
    assert!(!rebase.iter().any(|a| a.starts_with("-ssh-git")));
}

#[test]
fn windows_steps_wait_for_network() {
    let mut v = base();
    v["cache"] = json!({ "volume": { "claimName": "app-cache" } });
    let pod = plan(&request(v), &caps("windows", &["0.6"]));
    for c in init(&pod) {
        let mounts = c.volume_mounts.as_deref().unwrap();
        assert!(mounts.iter().any(|m| m.name == "network-wait-launcher-dir"), "{}", c.name);
        assert!(c.security_context.is_none());
        assert_eq!(c.command.as_deref().unwrap(), &["/networkWait/network-wait-launcher".to_string()]);
        assert_eq!(&args(c)[..2], &["reg.io", "--"]);
    }
    assert_eq!(args(step(&pod, "prepare"))[2], "/cnb/process/build-init");
    let analyze = step(&pod, "analyze");
    assert_eq!(args(analyze)[2], "/cnb/lifecycle/analyzer");
    assert_eq!(env(analyze, "USERPROFILE"), Some("/builder/home"));
    assert_eq!(env(analyze, "HOME"), None);

    let vols = volume_names(&pod);
    assert!(vols.contains(&"network-wait-launcher-dir"));
    assert!(!vols.contains(&"cache-dir"));
    let spec = pod.spec.as_ref().unwrap();
    assert!(spec.security_context.is_none());
    assert_eq!(spec.node_selector.as_ref().unwrap()["kubernetes.io/os"], "windows");
    assert_eq!(spec.containers[0].image.as_deref(), Some("ghcr.io/kiln-build/completion-windows:latest"));
    assert_eq!(spec.containers[0].command.as_deref().unwrap(), &["/networkWait/network-wait-launcher".to_string()]);
    assert_eq!(&args(&spec.containers[0])[..3], &["reg.io", "--", "/cnb/process/completion"]);
}

#[test]
fn linux_pod_level_settings() {
    let mut v = base();
    v["scheduling"] = json!({ "nodeSelector": { "disk": "ssd" }, "activeDeadlineSeconds": 600 });
    let pod = plan(&request(v), &caps("", &["0.9"]));
    assert_eq!(pod.metadata.name.as_deref(), Some("app-build-1-build-pod"));
    assert_eq!(pod.metadata.namespace.as_deref(), Some("dev"));
    let spec = pod.spec.as_ref().unwrap();
    assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
    assert_eq!(spec.service_account_name.as_deref(), Some("builder-sa"));
    assert_eq!(spec.active_deadline_seconds, Some(600));
    let selector = spec.node_selector.as_ref().unwrap();
    assert_eq!(selector["disk"], "ssd");
    assert_eq!(selector["kubernetes.io/os"], "linux");
    let psc = spec.security_context.as_ref().unwrap();
    assert_eq!((psc.run_as_user, psc.run_as_group, psc.fs_group), (Some(1000), Some(1001), Some(1001)));
    let pulls: Vec<_> = spec.image_pull_secrets.as_deref().unwrap().iter().map(|r| r.name.clone().unwrap()).collect();
    assert_eq!(pulls, vec!["builder-pull"]);
    for c in init(&pod) {
        let sc = c.security_context.as_ref().unwrap();
        assert_eq!(sc.allow_privilege_escalation, Some(false));
        assert_eq!(sc.run_as_non_root, Some(true));
    }
}

#[test]
fn prepare_wires_source_and_credentials() {
    let mut v = base();
    v["source"]["subPath"] = json!("svc/api");
    v["env"] = json!([{ "name": "BP_JVM_VERSION", "value": "17" }]);
    let secrets = vec![
        CredentialObject::new("gitbasic", SecretKind::BasicAuth).with_annotation("kiln.dev/git", "https://github.com"),
        CredentialObject::new("ignored", SecretKind::Other("Opaque".into())),
        CredentialObject::new("regcreds", SecretKind::DockerConfigJson),
    ];
    let pod = plan_with(&request(v), &caps("linux", &["0.9"]), &secrets).unwrap();
    let prepare = step(&pod, "prepare");
    assert_eq!(
        args(prepare),
        vec!["-basic-git=gitbasic=https://github.com", "-dockerconfig=regcreds", "-imagepull=builder-pull", "-imagepull=sa-pull"]
    );
    assert_eq!(env(prepare, "GIT_URL"), Some("https://github.com/acme/app"));
    assert_eq!(env(prepare, "GIT_REVISION"), Some("abc123"));
    assert_eq!(env(prepare, "SOURCE_SUB_PATH"), Some("svc/api"));
    assert_eq!(env(prepare, "DNS_PROBE_HOSTNAME"), Some("reg.io"));
    assert_eq!(env(prepare, "PLATFORM_ENV_VARS"), Some(r#"[{"name":"BP_JVM_VERSION","value":"17"}]"#));
    assert!(args(step(&pod, "detect")).contains(&"-app=/workspace/svc/api"));

    let vols = volume_names(&pod);
    assert_eq!(
        &vols[..4],
        &["secret-volume-0", "secret-volume-2", "image-pull-secret-volume-0", "image-pull-secret-volume-1"]
    );
}

#[test]
fn cache_modes_reach_their_steps() {
    let mut v = base();
    v["cache"] = json!({ "volume": { "claimName": "app-cache" } });
    let pod = plan(&request(v), &caps("linux", &["0.6"]));
    assert!(args(step(&pod, "analyze")).contains(&"-cache-dir=/cache"));
    assert!(args(step(&pod, "restore")).contains(&"-cache-dir=/cache"));
    assert!(args(step(&pod, "export")).contains(&"-cache-dir=/cache"));
    assert!(volume_names(&pod).contains(&"cache-dir"));

    let mut v = base();
    v["cache"] = json!({ "registry": { "tag": "reg.io/acme/app-cache" } });
    v["lastBuild"] = json!({ "image": "reg.io/acme/app@sha256:prev", "cacheImage": "reg.io/acme/app-cache@sha256:c0" });
    let pod = plan(&request(v), &caps("linux", &["0.9"]));
    assert!(args(step(&pod, "restore")).contains(&"-cache-image=reg.io/acme/app-cache@sha256:c0"));
    assert!(args(step(&pod, "export")).contains(&"-cache-image=reg.io/acme/app-cache"));
    assert!(args(step(&pod, "analyze")).contains(&"-cache-image=reg.io/acme/app-cache@sha256:c0"));
    let completion = &pod.spec.as_ref().unwrap().containers[0];
    assert_eq!(env(completion, "CACHE_TAG"), Some("reg.io/acme/app-cache"));
}

#[test]
fn signing_adds_completion_args_and_volumes() {
    let mut v = base();
    v["signing"] = json!({
        "notary": { "url": "https://notary.acme.io", "secretName": "notary-creds" },
        "cosignAnnotations": { "team": "core" }
    });
    let mut key = CredentialObject::new("cosign-key", SecretKind::Other("Opaque".into()))
        .with_annotation("kiln.dev/cosign.repository", "reg.io/acme/sigs");
    key.signing_key = true;
    let pod = plan_with(&request(v), &caps("linux", &["0.3", "0.4"]), &[key]).unwrap();
    let completion = &pod.spec.as_ref().unwrap().containers[0];
    assert_eq!(
        args(completion),
        vec![
            "-notary-v1-url=https://notary.acme.io",
            "-cosign-annotations=team=core",
            "-cosign-repositories=cosign-key=reg.io/acme/sigs",
        ]
    );
    let vols = volume_names(&pod);
    assert!(vols.contains(&"notary-dir"));
    assert!(vols.contains(&"secret-volume-cosign-0"));
    assert_eq!(env(step(&pod, "export"), "CNB_PLATFORM_API"), Some("0.4"));
}

#[test]
fn service_bindings_mount_into_detect_and_build() {
    let mut v = base();
    v["services"] = json!([{ "service": { "kind": "Secret", "name": "db" } }]);
    let pod = plan(&request(v), &caps("linux", &["0.9"]));
    for name in ["detect", "build"] {
        let c = step(&pod, name);
        assert_eq!(env(c, "SERVICE_BINDING_ROOT"), Some("/platform/bindings"));
        assert!(c.volume_mounts.as_deref().unwrap().iter().any(|m| m.mount_path == "/platform/bindings/db"));
    }
}

#[test]
fn failures_are_typed() {
    let builder = caps("linux", &["0.9"]);

    let mut v = base();
    v["tags"] = json!(["Not A Tag"]);
    assert!(matches!(plan_with(&request(v), &builder, &[]), Err(PlanError::InvalidReference { .. })));

    let mut v = base();
    v["creationTime"] = json!("yesterday");
    assert!(matches!(plan_with(&request(v), &builder, &[]), Err(PlanError::InvalidCreationTime { .. })));

    let mut v = base();
    v["services"] = json!([{ "service": { "kind": "ConfigMap", "name": "cfg" } }]);
    let err = plan_with(&request(v), &builder, &[]).unwrap_err();
    assert_eq!(err.to_string(), "unsupported binding type: ConfigMap");

    let mut v = base();
    v["services"] = json!([
        { "service": { "kind": "Secret", "name": "db" } },
        { "cnb": { "name": "db", "metadataRef": "db-meta" } }
    ]);
    assert!(matches!(plan_with(&request(v), &builder, &[]), Err(PlanError::DuplicateBinding(_))));

    let mut v = base();
    v["tags"] = json!([]);
    assert!(matches!(plan_with(&request(v), &builder, &[]), Err(PlanError::MissingTag)));

    let mut v = base();
    v["buildReason"] = json!("STACK");
    v["lastBuild"] = json!({ "stackId": "io.acme.stack" });
    assert!(matches!(plan_with(&request(v), &builder, &[]), Err(PlanError::MissingLastBuild)));

    let err = plan_with(&request(base()), &caps("windows", &["0.3", "0.2"]), &[]).unwrap_err();
    assert_eq!(err.to_string(), "unsupported builder platform API versions: 0.3,0.2");
}
