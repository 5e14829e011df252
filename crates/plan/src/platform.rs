//! Platform API negotiation between the controller and a builder's lifecycle.

use kiln_core::{PlanError, PlatformApi, Result};
use tracing::debug;

/// Versions the controller can drive, highest first.
pub static SUPPORTED_PLATFORM_APIS: [PlatformApi; 7] = [
    PlatformApi::new(0, 9),
    PlatformApi::new(0, 8),
    PlatformApi::new(0, 7),
    PlatformApi::new(0, 6),
    PlatformApi::new(0, 5),
    PlatformApi::new(0, 4),
    PlatformApi::new(0, 3),
];

/// Report files and Windows support arrived in 0.4; signing and Windows
/// builds negotiate from this narrower list.
pub static SUPPORTED_PLATFORM_APIS_WITH_REPORT: [PlatformApi; 6] = [
    PlatformApi::new(0, 9),
    PlatformApi::new(0, 8),
    PlatformApi::new(0, 7),
    PlatformApi::new(0, 6),
    PlatformApi::new(0, 5),
    PlatformApi::new(0, 4),
];

pub static LOWEST_PLATFORM_API: PlatformApi = PlatformApi::new(0, 3);

/// Picks the highest version both sides speak.
#[derive(Debug, Clone, Copy)]
pub struct Negotiator<'a> {
    supported: &'a [PlatformApi],
    ceiling: Option<&'a PlatformApi>,
}

impl<'a> Negotiator<'a> {
    /// `supported` must be ordered highest first.
    pub fn new(supported: &'a [PlatformApi]) -> Self {
        Self { supported, ceiling: None }
    }

    /// Negotiator for a build with the given constraints.
    pub fn for_build(signing: bool, windows: bool) -> Negotiator<'static> {
        if signing || windows {
            Negotiator::new(&SUPPORTED_PLATFORM_APIS_WITH_REPORT)
        } else {
            Negotiator::new(&SUPPORTED_PLATFORM_APIS)
        }
    }

    pub fn with_ceiling<'b>(self, ceiling: Option<&'b PlatformApi>) -> Negotiator<'b>
    where
        'a: 'b,
    {
        Negotiator { supported: self.supported, ceiling }
    }

    pub fn negotiate(&self, builder_apis: &[String]) -> Result<PlatformApi> {
        let advertised: Vec<PlatformApi> = builder_apis.iter().filter_map(|s| PlatformApi::parse(s).ok()).collect();
        for candidate in self.supported {
            if let Some(max) = self.ceiling {
                if candidate > max {
                    continue;
                }
            }
            if advertised.iter().any(|v| v == candidate) {
                debug!(platform_api = %candidate, "negotiated platform API");
                return Ok(candidate.clone());
            }
        }
        Err(PlanError::UnsupportedPlatformApi(builder_apis.join(",")))
    }
}
