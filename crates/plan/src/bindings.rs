//! Service binding volumes mounted under the service binding root.

use k8s_openapi::api::core::v1::{ConfigMapVolumeSource, Volume, VolumeMount};
use kiln_core::constants::{SECRET_BINDING_KIND, SERVICE_BINDING_ROOT};
use kiln_core::{PlanError, Result, ServiceBinding};
use rustc_hash::FxHashSet;

use crate::secrets::secret_volume;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindingMounts {
    pub volumes: Vec<Volume>,
    pub mounts: Vec<VolumeMount>,
}

impl BindingMounts {
    fn add(&mut self, volume: Volume, mount_path: String) {
        self.mounts.push(VolumeMount {
            name: volume.name.clone(),
            mount_path,
            read_only: Some(true),
            ..Default::default()
        });
        self.volumes.push(volume);
    }
}

/// Each binding mounts at `<root>/<name>`, so names must be unique across
/// both kinds.
pub fn binding_mounts(services: &[ServiceBinding]) -> Result<BindingMounts> {
    let mut out = BindingMounts::default();
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    for binding in services {
        let name = match binding {
            ServiceBinding::Service(svc) => svc.name.as_str(),
            ServiceBinding::Cnb(cnb) => cnb.name.as_str(),
        };
        if !seen.insert(name) {
            return Err(PlanError::DuplicateBinding(name.to_string()));
        }
        match binding {
            ServiceBinding::Service(svc) => {
                if svc.kind != SECRET_BINDING_KIND {
                    return Err(PlanError::UnsupportedBinding(svc.kind.clone()));
                }
                out.add(
                    secret_volume(&format!("service-binding-secret-{}", svc.name), &svc.name),
                    format!("{}/{}", SERVICE_BINDING_ROOT, svc.name),
                );
            }
            ServiceBinding::Cnb(cnb) => {
                let metadata = Volume {
                    name: format!("binding-metadata-{}", cnb.name),
                    config_map: Some(ConfigMapVolumeSource { name: Some(cnb.metadata_ref.clone()), ..Default::default() }),
                    ..Default::default()
                };
                out.add(metadata, format!("{}/{}/metadata", SERVICE_BINDING_ROOT, cnb.name));
                if let Some(secret) = cnb.secret_ref.as_deref().filter(|s| !s.is_empty()) {
                    out.add(
                        secret_volume(&format!("binding-secret-{}", cnb.name), secret),
                        format!("{}/{}/secret", SERVICE_BINDING_ROOT, cnb.name),
                    );
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::{CnbBinding, ServiceRef};

    #[test]
    fn secret_service_binding_mounts_under_root() {
        let b = ServiceBinding::Service(ServiceRef { kind: "Secret".into(), name: "db".into(), api_version: "v1".into() });
        let out = binding_mounts(&[b]).unwrap();
        assert_eq!(out.volumes[0].name, "service-binding-secret-db");
        assert_eq!(out.mounts[0].mount_path, "/platform/bindings/db");
    }

    #[test]
    fn cnb_binding_mounts_metadata_and_optional_secret() {
        let with = ServiceBinding::Cnb(CnbBinding { name: "mq".into(), metadata_ref: "mq-meta".into(), secret_ref: Some("mq-creds".into()) });
        let without = ServiceBinding::Cnb(CnbBinding { name: "cfg".into(), metadata_ref: "cfg-meta".into(), secret_ref: None });
        let out = binding_mounts(&[with, without]).unwrap();
        let paths: Vec<_> = out.mounts.iter().map(|m| m.mount_path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["/platform/bindings/mq/metadata", "/platform/bindings/mq/secret", "/platform/bindings/cfg/metadata"]
        );
    }

    #[test]
    fn repeated_binding_name_is_rejected() {
        let svc = ServiceBinding::Service(ServiceRef { kind: "Secret".into(), name: "db".into(), api_version: "v1".into() });
        let cnb = ServiceBinding::Cnb(CnbBinding { name: "db".into(), metadata_ref: "db-meta".into(), secret_ref: None });
        let err = binding_mounts(&[svc.clone(), svc.clone()]).unwrap_err();
        assert!(matches!(err, PlanError::DuplicateBinding(ref n) if n == "db"));
        assert_eq!(binding_mounts(&[svc, cnb]).unwrap_err().to_string(), "duplicate service binding name: db");
    }

    #[test]
    fn non_secret_service_is_rejected() {
        let b = ServiceBinding::Service(ServiceRef { kind: "ConfigMap".into(), name: "x".into(), api_version: String::new() });
        let err = binding_mounts(&[b]).unwrap_err();
        assert_eq!(err.to_string(), "unsupported binding type: ConfigMap");
    }
}
