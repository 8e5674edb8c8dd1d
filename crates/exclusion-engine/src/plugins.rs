//! Build plugins that exclusions are written into.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ExclusionError;

/// Default group id Maven assumes when a plugin omits `groupId`.
pub const MAVEN_PLUGINS_GROUP: &str = "org.apache.maven.plugins";

/// Surefire version pinned when a unit has to declare the plugin itself
/// and no management block supplies one.
pub const SUREFIRE_VERSION: &str = "2.22.2";

/// `groupId:artifactId` coordinates of a build plugin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PluginKey {
    pub group_id: String,
    pub artifact_id: String,
}

impl PluginKey {
    pub fn new(group_id: impl Into<String>, artifact_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
        }
    }

    /// The test runner plugin; execution-level exclusions go here.
    pub fn surefire() -> Self {
        Self::new(MAVEN_PLUGINS_GROUP, "maven-surefire-plugin")
    }
}

impl fmt::Display for PluginKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group_id, self.artifact_id)
    }
}

/// Coverage-instrumenting RTS tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RtsTool {
    Ekstazi,
    Jcgeks,
}

impl RtsTool {
    pub fn name(&self) -> &'static str {
        match self {
            RtsTool::Ekstazi => "ekstazi",
            RtsTool::Jcgeks => "jcgeks",
        }
    }

    /// Maven plugin implementing the tool; instrumentation-level exclusions go here.
    pub fn plugin(&self) -> PluginKey {
        match self {
            RtsTool::Ekstazi => PluginKey::new("org.ekstazi", "ekstazi-maven-plugin"),
            RtsTool::Jcgeks => PluginKey::new("org.jcgeks", "jcgeks-maven-plugin"),
        }
    }

    pub fn version(&self) -> &'static str {
        match self {
            RtsTool::Ekstazi => "5.3.0",
            RtsTool::Jcgeks => "1.0.0",
        }
    }
}

impl fmt::Display for RtsTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RtsTool {
    type Err = ExclusionError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ekstazi" => Ok(RtsTool::Ekstazi),
            "jcgeks" => Ok(RtsTool::Jcgeks),
            other => Err(ExclusionError::UnknownTool(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_plugins() {
        assert_eq!(RtsTool::Ekstazi.plugin().artifact_id, "ekstazi-maven-plugin");
        assert_eq!(RtsTool::Jcgeks.plugin().group_id, "org.jcgeks");
        assert_eq!(PluginKey::surefire().to_string(), "org.apache.maven.plugins:maven-surefire-plugin");
    }

    #[test]
    fn test_tool_from_str() {
        assert_eq!("JcgEks".parse::<RtsTool>().unwrap(), RtsTool::Jcgeks);
        assert!("starts".parse::<RtsTool>().is_err());
    }
}
