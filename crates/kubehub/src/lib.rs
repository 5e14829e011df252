//! Kiln kubehub: resolves the credentials a build may use from its service
//! account.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use futures::future::try_join_all;
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use kiln_core::constants::COSIGN_KEY_DATA;
use kiln_core::{CredentialObject, SecretKind};
use kube::{api::Api, Client};
use rustc_hash::FxHashSet;
use tracing::{debug, info, warn};

pub async fn get_kube_client() -> Result<Client> {
    Client::try_default().await.context("creating kube client")
}

/// Secrets and pull secret names attached to one service account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceAccountCredentials {
    pub secrets: Vec<CredentialObject>,
    pub image_pull_secrets: Vec<String>,
}

/// Planner view of a secret. Secrets without a name are skipped.
pub fn credential_from_secret(secret: &Secret) -> Option<CredentialObject> {
    let name = secret.metadata.name.clone().filter(|n| !n.is_empty())?;
    let kind = SecretKind::from(secret.type_.clone().unwrap_or_else(|| "Opaque".to_string()));
    let mut out = CredentialObject::new(name, kind);
    out.annotations = secret.metadata.annotations.clone().unwrap_or_default();
    out.signing_key = secret.data.as_ref().map(|d| d.contains_key(COSIGN_KEY_DATA)).unwrap_or(false);
    Some(out)
}

/// Secret names listed on the service account, first occurrence kept.
pub fn secret_names(sa: &ServiceAccount) -> Vec<String> {
    let refs = sa.secrets.as_deref().unwrap_or_default();
    dedupe(refs.iter().filter_map(|r| r.name.as_deref()))
}

pub fn image_pull_secret_names(sa: &ServiceAccount) -> Vec<String> {
    let refs = sa.image_pull_secrets.as_deref().unwrap_or_default();
    dedupe(refs.iter().filter_map(|r| r.name.as_deref()))
}

fn dedupe<'a>(names: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    names.filter(|n| !n.is_empty() && seen.insert(*n)).map(str::to_string).collect()
}

/// Fetch a service account and the secrets it references. Referenced
/// secrets that no longer exist are logged and skipped.
pub async fn resolve_service_account(client: Client, namespace: &str, name: &str) -> Result<ServiceAccountCredentials> {
    let sas: Api<ServiceAccount> = Api::namespaced(client.clone(), namespace);
    let sa = sas.get(name).await.with_context(|| format!("getting service account {}/{}", namespace, name))?;

    let secrets: Api<Secret> = Api::namespaced(client, namespace);
    let names = secret_names(&sa);
    let fetched = try_join_all(names.iter().map(|n| {
        let api = secrets.clone();
        async move { api.get_opt(n).await.with_context(|| format!("getting secret {}/{}", namespace, n)) }
    }))
    .await?;

    let mut out = ServiceAccountCredentials { image_pull_secrets: image_pull_secret_names(&sa), ..Default::default() };
    for (n, secret) in names.iter().zip(fetched) {
        match secret.as_ref().and_then(credential_from_secret) {
            Some(c) => {
                debug!(secret = %c.name, kind = ?c.kind, "resolved secret");
                out.secrets.push(c);
            }
            None => warn!(secret = %n, namespace, "service account references missing secret"),
        }
    }
    info!(
        service_account = %name,
        namespace,
        secrets = out.secrets.len(),
        pull_secrets = out.image_pull_secrets.len(),
        "service account credentials resolved"
    );
    Ok(out)
}
