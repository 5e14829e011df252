//! Cache strategy: which lifecycle phases get cache arguments and whether a
//! persistent volume is mounted.

use k8s_openapi::api::core::v1::{PersistentVolumeClaimVolumeSource, Volume, VolumeMount};
use kiln_core::constants::{CACHE_PATH, CACHE_VOLUME};
use kiln_core::{BuildRequest, PlatformApi};
use smallvec::{smallvec, SmallVec};

pub type CacheArgs = SmallVec<[String; 1]>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheStrategy<'a> {
    None,
    Volume { claim_name: &'a str },
    Registry { tag: &'a str, previous: Option<&'a str> },
}

impl<'a> CacheStrategy<'a> {
    /// Volume caches are not available on Windows nodes; such builds fall
    /// through to the registry cache if one is set, else run uncached.
    pub fn select(request: &'a BuildRequest, windows: bool) -> Self {
        if let Some(claim_name) = request.volume_cache() {
            if !windows {
                return CacheStrategy::Volume { claim_name };
            }
        }
        if let Some(tag) = request.registry_cache() {
            return CacheStrategy::Registry { tag, previous: request.previous_cache_image() };
        }
        CacheStrategy::None
    }

    /// Arguments for analyze/restore.
    fn generic_args(&self) -> CacheArgs {
        match self {
            CacheStrategy::None => SmallVec::new(),
            CacheStrategy::Volume { .. } => smallvec![format!("-cache-dir={}", CACHE_PATH)],
            CacheStrategy::Registry { previous, .. } => match previous {
                Some(prev) => smallvec![format!("-cache-image={}", prev)],
                None => SmallVec::new(),
            },
        }
    }

    /// Analyze only takes the cache dir in the pre-0.7 argument shape. The
    /// previous cache image is passed at every version.
    pub fn analyze_args(&self, api: &PlatformApi) -> CacheArgs {
        match self {
            CacheStrategy::Volume { .. } if *api >= PlatformApi::new(0, 7) => SmallVec::new(),
            _ => self.generic_args(),
        }
    }

    pub fn restore_args(&self) -> CacheArgs {
        self.generic_args()
    }

    pub fn export_args(&self) -> CacheArgs {
        match self {
            CacheStrategy::None => SmallVec::new(),
            CacheStrategy::Volume { .. } => smallvec![format!("-cache-dir={}", CACHE_PATH)],
            CacheStrategy::Registry { tag, .. } => smallvec![format!("-cache-image={}", tag)],
        }
    }

    pub fn cache_tag(&self) -> Option<&'a str> {
        match self {
            CacheStrategy::Registry { tag, .. } => Some(*tag),
            _ => None,
        }
    }

    pub fn volume(&self) -> Option<Volume> {
        match self {
            CacheStrategy::Volume { claim_name } => Some(Volume {
                name: CACHE_VOLUME.to_string(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: claim_name.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            _ => None,
        }
    }

    pub fn mounts(&self) -> Vec<VolumeMount> {
        match self {
            CacheStrategy::Volume { .. } => vec![VolumeMount {
                name: CACHE_VOLUME.to_string(),
                mount_path: CACHE_PATH.to_string(),
                ..Default::default()
            }],
            _ => Vec::new(),
        }
    }
}
