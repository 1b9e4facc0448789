//! Target platforms (`os/arch`)

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// An `os/arch[/variant]` platform; equality of platforms is decided on `os/arch`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
    pub variant: Option<String>,
}

impl Platform {
    pub fn new(os: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            architecture: architecture.into(),
            variant: None,
        }
    }

    pub fn linux_amd64() -> Self {
        Self::new("linux", "amd64")
    }

    /// `os/arch`, the form manifest list entries are compared in
    pub fn os_arch(&self) -> String {
        format!("{}/{}", self.os, self.architecture)
    }

    /// Whether a manifest list entry provides this platform
    pub fn is_provided_by(&self, os: &str, architecture: &str) -> bool {
        self.os == os && self.architecture == architecture
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::linux_amd64()
    }
}

impl FromStr for Platform {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        let os = parts.next().unwrap_or_default();
        let architecture = parts.next().unwrap_or_default();
        let variant = parts.next();

        if os.is_empty() || architecture.is_empty() || parts.next().is_some() {
            return Err(CoreError::InvalidPlatform(s.to_string()));
        }
        if variant.is_some_and(str::is_empty) {
            return Err(CoreError::InvalidPlatform(s.to_string()));
        }

        Ok(Self {
            os: os.to_string(),
            architecture: architecture.to_string(),
            variant: variant.map(str::to_string),
        })
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{}", variant)?;
        }
        Ok(())
    }
}

impl Serialize for Platform {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Platform {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Union of platforms, deduplicated on `os/arch`, first occurrence kept
pub fn merge_platforms<'a>(platforms: impl IntoIterator<Item = &'a Platform>) -> Vec<Platform> {
    let mut merged: Vec<Platform> = Vec::new();
    for platform in platforms {
        if !merged
            .iter()
            .any(|p| p.is_provided_by(&platform.os, &platform.architecture))
        {
            merged.push(platform.clone());
        }
    }
    merged
}
