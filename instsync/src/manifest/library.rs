//! Library entries of a version manifest.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::platform::Platform;

/// Base URL for libraries that do not name their own.
pub const DEFAULT_LIBRARY_BASE: &str = "https://s3.amazonaws.com/Minecraft.Download/libraries/";

/// Placeholder in native classifiers replaced by the pointer width.
const ARCH_PLACEHOLDER: &str = "${arch}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Allow,
    Disallow,
}

/// OS constraint of a rule. `version` is carried but not evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OsRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub action: RuleAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<OsRule>,
}

impl Rule {
    fn applies_to(&self, platform: &Platform) -> bool {
        match self.os.as_ref().and_then(|os| os.name.as_deref()) {
            None => true,
            Some(name) => name == platform.os.manifest_name(),
        }
    }
}

/// A dependency library named by a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryReference {
    /// Maven coordinate (`group:artifact:version`) or an opaque path.
    pub name: String,

    /// Base URL the storage path is appended to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<Rule>,

    /// OS name to classifier. Present only on native libraries.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub natives: BTreeMap<String, String>,

    /// Explicit activity flag; takes precedence over rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

impl LibraryReference {
    /// A library with no rules, natives or URL override.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: None,
            rules: Vec::new(),
            natives: BTreeMap::new(),
            active: None,
        }
    }

    pub fn is_native(&self) -> bool {
        !self.natives.is_empty()
    }

    /// Evaluate the rule list. The last applicable rule decides; with no
    /// rules the library is allowed everywhere.
    pub fn is_allowed(&self, platform: &Platform) -> bool {
        if self.rules.is_empty() {
            return true;
        }
        self.rules
            .iter()
            .filter(|rule| rule.applies_to(platform))
            .last()
            .map_or(false, |rule| rule.action == RuleAction::Allow)
    }

    /// Native classifier for `platform`, with the arch placeholder filled in.
    pub fn classifier(&self, platform: &Platform) -> Option<String> {
        self.natives
            .get(platform.os.manifest_name())
            .map(|c| c.replace(ARCH_PLACEHOLDER, &platform.arch_bits.to_string()))
    }

    /// Whether this library should be installed on `platform`.
    pub fn is_active(&self, platform: &Platform) -> bool {
        if let Some(active) = self.active {
            return active;
        }
        if !self.is_allowed(platform) {
            return false;
        }
        !self.is_native() || self.classifier(platform).is_some()
    }

    /// Relative storage path under the libraries directory.
    ///
    /// `org.lwjgl:lwjgl:2.9.0` becomes `org/lwjgl/lwjgl/2.9.0/lwjgl-2.9.0.jar`
    /// (plus `-<classifier>` for natives). Names that are not Maven
    /// coordinates are used as-is.
    pub fn storage_path(&self, platform: &Platform) -> String {
        let parts: Vec<&str> = self.name.split(':').collect();
        let [group, artifact, version] = parts.as_slice() else {
            return self.name.clone();
        };
        if group.is_empty() || artifact.is_empty() || version.is_empty() {
            return self.name.clone();
        }

        let file = match self.classifier(platform) {
            Some(classifier) => format!("{}-{}-{}.jar", artifact, version, classifier),
            None => format!("{}-{}.jar", artifact, version),
        };
        format!(
            "{}/{}/{}/{}",
            group.replace('.', "/"),
            artifact,
            version,
            file
        )
    }

    /// Remote URL of the library file.
    pub fn download_url(&self, platform: &Platform) -> String {
        let base = self.url.as_deref().unwrap_or(DEFAULT_LIBRARY_BASE);
        let path = self.storage_path(platform);
        if base.ends_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::platform::OsKind;

    const LINUX64: Platform = Platform {
        os: OsKind::Linux,
        arch_bits: 64,
    };
    const WIN32: Platform = Platform {
        os: OsKind::Windows,
        arch_bits: 32,
    };
    const OSX64: Platform = Platform {
        os: OsKind::Osx,
        arch_bits: 64,
    };

    fn parse(json: &str) -> LibraryReference {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_library_without_rules_is_active() {
        let lib = LibraryReference::new("net.sf.jopt-simple:jopt-simple:4.5");
        assert!(lib.is_active(&LINUX64));
        assert!(lib.is_active(&WIN32));
    }

    #[test]
    fn test_last_applicable_rule_wins() {
        let lib = parse(
            r#"{
                "name": "org.lwjgl.lwjgl:lwjgl:2.9.1-nightly",
                "rules": [
                    {"action": "allow"},
                    {"action": "disallow", "os": {"name": "osx"}}
                ]
            }"#,
        );
        assert!(lib.is_active(&LINUX64));
        assert!(!lib.is_active(&OSX64));
    }

    #[test]
    fn test_allow_only_for_one_os() {
        let lib = parse(
            r#"{
                "name": "org.lwjgl.lwjgl:lwjgl:2.9.1-nightly",
                "rules": [{"action": "allow", "os": {"name": "osx", "version": "^10\\.5"}}]
            }"#,
        );
        assert!(lib.is_active(&OSX64));
        assert!(!lib.is_active(&LINUX64));
    }

    #[test]
    fn test_native_classifier_and_arch() {
        let lib = parse(
            r#"{
                "name": "tv.twitch:twitch-platform:5.16",
                "natives": {"linux": "natives-linux", "windows": "natives-windows-${arch}"}
            }"#,
        );
        assert!(lib.is_native());
        assert_eq!(lib.classifier(&WIN32).as_deref(), Some("natives-windows-32"));
        assert_eq!(
            lib.storage_path(&LINUX64),
            "tv/twitch/twitch-platform/5.16/twitch-platform-5.16-natives-linux.jar"
        );
        // No classifier for this OS means nothing to install.
        assert!(!lib.is_active(&OSX64));
    }

    #[test]
    fn test_explicit_active_flag_overrides_rules() {
        let lib = parse(r#"{"name": "a", "active": true, "rules": [{"action": "disallow"}]}"#);
        assert!(lib.is_active(&LINUX64));

        let lib = parse(r#"{"name": "b", "active": false}"#);
        assert!(!lib.is_active(&LINUX64));
    }

    #[test]
    fn test_storage_path() {
        let lib = LibraryReference::new("org.lwjgl.lwjgl:lwjgl_util:2.9.0");
        assert_eq!(
            lib.storage_path(&LINUX64),
            "org/lwjgl/lwjgl/lwjgl_util/2.9.0/lwjgl_util-2.9.0.jar"
        );

        assert_eq!(LibraryReference::new("a").storage_path(&LINUX64), "a");
        assert_eq!(
            LibraryReference::new("too:many:colons:here").storage_path(&LINUX64),
            "too:many:colons:here"
        );
    }

    #[test]
    fn test_download_url() {
        let lib = LibraryReference::new("com.google.guava:guava:14.0");
        assert_eq!(
            lib.download_url(&LINUX64),
            "https://s3.amazonaws.com/Minecraft.Download/libraries/com/google/guava/guava/14.0/guava-14.0.jar"
        );

        let mut custom = LibraryReference::new("a");
        custom.url = Some("http://mirror.example.com/libs".to_string());
        assert_eq!(custom.download_url(&LINUX64), "http://mirror.example.com/libs/a");
    }
}
