use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use kiln_changes::{BuildSnapshot, ChangeSummary};
use kiln_core::{BuildRequest, BuilderCapabilities, Clock, CredentialObject, FixedClock, PlanConfig, PlatformApi, SystemClock};
use kiln_plan::{build_pod, BuildContext, Negotiator};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "kilnctl", version, about = "Kiln CLI: build pods and rebuild decisions")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Yaml)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Yaml,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render the build pod for a build request
    Plan {
        /// Build request (YAML or JSON, `-` for stdin)
        #[arg(long = "request")]
        request: PathBuf,
        /// Builder capabilities (YAML or JSON)
        #[arg(long = "builder")]
        builder: PathBuf,
        /// Secrets available to the build (list of credential objects)
        #[arg(long = "secrets")]
        secrets: Option<PathBuf>,
        /// Extra image pull secret names from the service account
        #[arg(long = "pull-secret")]
        pull_secrets: Vec<String>,
        /// Resolve secrets from the request's service account in the cluster
        #[arg(long = "from-cluster", action = ArgAction::SetTrue)]
        from_cluster: bool,
        /// Pin the clock (RFC 3339) so `now` creation times are reproducible
        #[arg(long = "now")]
        now: Option<String>,
        #[command(flatten)]
        images: ImageArgs,
    },
    /// Negotiate a platform API against a builder's advertised versions
    Negotiate {
        /// Builder platform APIs, comma separated
        #[arg(long = "builder-apis", value_delimiter = ',')]
        builder_apis: Vec<String>,
        #[arg(long = "signing", action = ArgAction::SetTrue)]
        signing: bool,
        #[arg(long = "windows", action = ArgAction::SetTrue)]
        windows: bool,
        #[arg(long = "max-platform-api", env = "KILN_MAX_PLATFORM_API")]
        max_platform_api: Option<String>,
    },
    /// Summarize the changes between the last built and the desired state
    Changes {
        #[arg(long = "old")]
        old: PathBuf,
        #[arg(long = "new")]
        new: PathBuf,
    },
    /// Print the build log rendering of a change summary
    Diff {
        /// Change summary as printed by `changes`
        #[arg(long = "summary")]
        summary: PathBuf,
    },
}

/// Helper images and the platform API ceiling; flags override `KILN_*`.
#[derive(Args, Debug)]
struct ImageArgs {
    #[arg(long = "build-init-image", env = "KILN_BUILD_INIT_IMAGE")]
    build_init_image: Option<String>,
    #[arg(long = "build-init-windows-image", env = "KILN_BUILD_INIT_WINDOWS_IMAGE")]
    build_init_windows_image: Option<String>,
    #[arg(long = "completion-image", env = "KILN_COMPLETION_IMAGE")]
    completion_image: Option<String>,
    #[arg(long = "completion-windows-image", env = "KILN_COMPLETION_WINDOWS_IMAGE")]
    completion_windows_image: Option<String>,
    #[arg(long = "rebase-image", env = "KILN_REBASE_IMAGE")]
    rebase_image: Option<String>,
    #[arg(long = "max-platform-api", env = "KILN_MAX_PLATFORM_API")]
    max_platform_api: Option<String>,
}

impl ImageArgs {
    fn into_config(self) -> Result<PlanConfig> {
        let mut cfg = PlanConfig::default();
        let overrides = [
            (self.build_init_image, &mut cfg.build_init_image),
            (self.build_init_windows_image, &mut cfg.build_init_windows_image),
            (self.completion_image, &mut cfg.completion_image),
            (self.completion_windows_image, &mut cfg.completion_windows_image),
            (self.rebase_image, &mut cfg.rebase_image),
        ];
        for (value, slot) in overrides {
            if let Some(v) = value.filter(|v| !v.is_empty()) {
                *slot = v;
            }
        }
        cfg.max_platform_api = parse_ceiling(self.max_platform_api.as_deref())?;
        Ok(cfg)
    }
}

fn parse_ceiling(raw: Option<&str>) -> Result<Option<PlatformApi>> {
    raw.filter(|s| !s.is_empty())
        .map(|s| PlatformApi::parse(s).with_context(|| format!("invalid platform API ceiling '{}'", s)))
        .transpose()
}

fn init_tracing() {
    let env = std::env::var("KILN_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KILN_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid KILN_METRICS_ADDR; expected host:port");
        }
    }
}

/// Read a YAML (or JSON) document from a file, or stdin for `-`.
fn load<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).context("reading stdin")?;
        buf
    } else {
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?
    };
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn emit<T: Serialize>(output: Output, value: &T) -> Result<()> {
    match output {
        Output::Yaml => print!("{}", serde_yaml::to_string(value)?),
        Output::Json => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

fn clock(now: Option<&str>) -> Result<Box<dyn Clock>> {
    match now {
        Some(s) => {
            let at = DateTime::parse_from_rfc3339(s).with_context(|| format!("invalid --now '{}'", s))?;
            Ok(Box::new(FixedClock(at.with_timezone(&Utc))))
        }
        None => Ok(Box::new(SystemClock)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Plan { request, builder, secrets, pull_secrets, from_cluster, now, images } => {
            let req: BuildRequest = load(&request)?;
            let caps: BuilderCapabilities = load(&builder)?;
            let mut creds: Vec<CredentialObject> = match &secrets {
                Some(p) => load(p)?,
                None => Vec::new(),
            };
            let mut pulls = pull_secrets;
            if from_cluster {
                if req.service_account_name.is_empty() {
                    return Err(anyhow!("--from-cluster needs serviceAccountName on the request"));
                }
                let client = kiln_kubehub::get_kube_client().await?;
                let sa = kiln_kubehub::resolve_service_account(client, &req.namespace, &req.service_account_name).await?;
                creds.extend(sa.secrets);
                pulls.extend(sa.image_pull_secrets);
            }
            let config = images.into_config()?;
            let clock = clock(now.as_deref())?;
            info!(build = %req.name, secrets = creds.len(), "plan invoked");
            let ctx = BuildContext {
                builder: &caps,
                secrets: &creds,
                image_pull_secrets: &pulls,
                config: &config,
                clock: clock.as_ref(),
            };
            let pod = build_pod(&req, &ctx)?;
            emit(cli.output, &pod)?;
        }
        Commands::Negotiate { builder_apis, signing, windows, max_platform_api } => {
            let ceiling = parse_ceiling(max_platform_api.as_deref())?;
            let api = Negotiator::for_build(signing, windows).with_ceiling(ceiling.as_ref()).negotiate(&builder_apis)?;
            match cli.output {
                Output::Yaml => println!("{}", api),
                Output::Json => println!("{}", serde_json::json!({ "platformApi": api })),
            }
        }
        Commands::Changes { old, new } => {
            let old: BuildSnapshot = load(&old)?;
            let new: BuildSnapshot = load(&new)?;
            let summary = kiln_changes::summarize(&old, &new)?;
            if !summary.has_changes {
                warn!("no changes require a build");
            }
            emit(cli.output, &summary)?;
        }
        Commands::Diff { summary } => {
            let summary: ChangeSummary = load(&summary)?;
            print!("{}", kiln_changes::render_changes(&summary.reasons, &summary.changes)?);
        }
    }

    Ok(())
}
