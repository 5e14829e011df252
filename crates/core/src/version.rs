//! CNB platform API versions.
//!
//! Builders advertise versions as `MAJOR.MINOR` strings; they are held as
//! semver versions with a zero patch so that comparisons follow semantic
//! ordering (`0.10 > 0.9`).

use std::fmt;
use std::str::FromStr;

use semver::Version;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlatformApi(Version);

impl PlatformApi {
    pub const fn new(major: u64, minor: u64) -> Self {
        Self(Version::new(major, minor, 0))
    }

    pub fn parse(s: &str) -> Result<Self, semver::Error> {
        let s = s.trim();
        if s.split('.').count() == 2 {
            Version::parse(&format!("{}.0", s)).map(Self)
        } else {
            Version::parse(s).map(Self)
        }
    }
}

impl FromStr for PlatformApi {
    type Err = semver::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PlatformApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = &self.0;
        if v.patch == 0 && v.pre.is_empty() && v.build.is_empty() {
            write!(f, "{}.{}", v.major, v.minor)
        } else {
            write!(f, "{}", v)
        }
    }
}

impl Serialize for PlatformApi {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PlatformApi {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
