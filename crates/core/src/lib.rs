//! Kiln core types, wire constants and errors.

#![forbid(unsafe_code)]

pub mod config;
pub mod constants;
pub mod error;
pub mod model;
pub mod version;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use config::PlanConfig;
pub use error::{PlanError, Result};
pub use model::*;
pub use version::PlatformApi;

/// Source of the single wall-clock read the engine performs.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to a single instant; keeps plans reproducible.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Why a build was requested. Serialized as the upper-case tag used in the
/// build reason annotation and the changes payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum BuildReason {
    Config,
    Commit,
    Buildpack,
    Extension,
    Stack,
    Trigger,
}

impl BuildReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildReason::Config => "CONFIG",
            BuildReason::Commit => "COMMIT",
            BuildReason::Buildpack => "BUILDPACK",
            BuildReason::Extension => "EXTENSION",
            BuildReason::Stack => "STACK",
            BuildReason::Trigger => "TRIGGER",
        }
    }
}

impl std::fmt::Display for BuildReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build scheduling priority. Tiers are sparse so that callers can slot
/// intermediate priorities later without renumbering.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Priority(pub i32);

impl Priority {
    pub const NONE: Priority = Priority(0);
    pub const LOW: Priority = Priority(1);
    pub const HIGH: Priority = Priority(1000);
}
