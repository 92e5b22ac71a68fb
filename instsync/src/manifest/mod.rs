//! Version manifest model.
//!
//! A manifest (`<id>.json`) names a release and lists the libraries it
//! needs. Only the fields the update pipeline reads are modelled; unknown
//! fields are ignored.
//!
//! Which libraries get installed is a pure function of the manifest and a
//! [`Platform`]: natives first, then normal libraries, each in manifest
//! order, inactive entries dropped.

mod library;
mod platform;

pub use library::{LibraryReference, OsRule, Rule, RuleAction, DEFAULT_LIBRARY_BASE};
pub use platform::{OsKind, Platform};

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// Newest manifest format this crate understands.
pub const SUPPORTED_LAUNCHER_VERSION: u32 = 13;

/// Parsed contents of a version manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestDocument {
    pub id: String,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_class: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minecraft_arguments: Option<String>,

    #[serde(default)]
    pub minimum_launcher_version: u32,

    #[serde(default)]
    pub libraries: Vec<LibraryReference>,
}

impl ManifestDocument {
    /// Parse manifest bytes. `origin` is only used in error messages.
    pub fn parse(bytes: &[u8], origin: &Path) -> SyncResult<Self> {
        let manifest: Self =
            serde_json::from_slice(bytes).map_err(|e| SyncError::MetadataInvalid {
                path: origin.to_path_buf(),
                reason: e.to_string(),
            })?;
        manifest.validate(origin)?;
        Ok(manifest)
    }

    /// Read and parse a manifest file.
    pub fn load(path: &Path) -> SyncResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| SyncError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&bytes, path)
    }

    fn validate(&self, origin: &Path) -> SyncResult<()> {
        if self.id.trim().is_empty() {
            return Err(SyncError::MetadataInvalid {
                path: origin.to_path_buf(),
                reason: "missing version id".to_string(),
            });
        }
        if self.minimum_launcher_version > SUPPORTED_LAUNCHER_VERSION {
            return Err(SyncError::UnsupportedManifest {
                id: self.id.clone(),
                required: self.minimum_launcher_version,
                supported: SUPPORTED_LAUNCHER_VERSION,
            });
        }
        Ok(())
    }

    /// Active native libraries, in manifest order.
    pub fn active_native_libraries(&self, platform: &Platform) -> Vec<&LibraryReference> {
        self.libraries
            .iter()
            .filter(|lib| lib.is_native() && lib.is_active(platform))
            .collect()
    }

    /// Active non-native libraries, in manifest order.
    pub fn active_normal_libraries(&self, platform: &Platform) -> Vec<&LibraryReference> {
        self.libraries
            .iter()
            .filter(|lib| !lib.is_native() && lib.is_active(platform))
            .collect()
    }

    /// Every library to install: natives, then normal libraries.
    pub fn artifact_libraries(&self, platform: &Platform) -> Vec<&LibraryReference> {
        let mut libraries = self.active_native_libraries(platform);
        libraries.extend(self.active_normal_libraries(platform));
        libraries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINUX64: Platform = Platform {
        os: OsKind::Linux,
        arch_bits: 64,
    };

    fn origin() -> &'static Path {
        Path::new("version.json")
    }

    #[test]
    fn test_parse_minimal_manifest() {
        let bytes = br#"{"id":"1.6.4","libraries":[{"name":"a","active":true,"extract":{"exclude":["META-INF/"]}}]}"#;
        let manifest = ManifestDocument::parse(bytes, origin()).unwrap();

        assert_eq!(manifest.id, "1.6.4");
        assert_eq!(manifest.libraries.len(), 1);
        assert_eq!(manifest.libraries[0].active, Some(true));
        assert_eq!(manifest.minimum_launcher_version, 0);
    }

    #[test]
    fn test_parse_full_manifest() {
        let bytes = br#"{
            "id": "1.6.4",
            "time": "2013-09-19T15:52:37+00:00",
            "releaseTime": "2013-09-19T15:52:37+00:00",
            "type": "release",
            "minecraftArguments": "--username ${auth_player_name}",
            "minimumLauncherVersion": 9,
            "mainClass": "net.minecraft.client.main.Main",
            "libraries": []
        }"#;
        let manifest = ManifestDocument::parse(bytes, origin()).unwrap();

        assert_eq!(manifest.kind.as_deref(), Some("release"));
        assert_eq!(manifest.main_class.as_deref(), Some("net.minecraft.client.main.Main"));
        assert_eq!(manifest.minimum_launcher_version, 9);
    }

    #[test]
    fn test_malformed_json_is_metadata_invalid() {
        let err = ManifestDocument::parse(b"{\"id\": \"1.6", origin()).unwrap_err();
        assert!(matches!(err, SyncError::MetadataInvalid { .. }));
    }

    #[test]
    fn test_missing_or_empty_id_is_rejected() {
        assert!(matches!(
            ManifestDocument::parse(br#"{"libraries":[]}"#, origin()),
            Err(SyncError::MetadataInvalid { .. })
        ));
        assert!(matches!(
            ManifestDocument::parse(br#"{"id":"  "}"#, origin()),
            Err(SyncError::MetadataInvalid { .. })
        ));
    }

    #[test]
    fn test_too_new_manifest_is_rejected() {
        let err = ManifestDocument::parse(br#"{"id":"2.0","minimumLauncherVersion":14}"#, origin())
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::UnsupportedManifest {
                required: 14,
                supported: SUPPORTED_LAUNCHER_VERSION,
                ..
            }
        ));
    }

    #[test]
    fn test_artifact_libraries_put_natives_first() {
        let bytes = br#"{
            "id": "1.6.4",
            "libraries": [
                {"name": "n:one:1"},
                {"name": "x:native-a:1", "natives": {"linux": "natives-linux"}},
                {"name": "n:skipped:1", "rules": [{"action": "allow", "os": {"name": "windows"}}]},
                {"name": "n:two:1"},
                {"name": "x:native-b:1", "natives": {"linux": "natives-linux"}},
                {"name": "x:native-win-only:1", "natives": {"windows": "natives-windows"}}
            ]
        }"#;
        let manifest = ManifestDocument::parse(bytes, origin()).unwrap();

        let names: Vec<&str> = manifest
            .artifact_libraries(&LINUX64)
            .iter()
            .map(|lib| lib.name.as_str())
            .collect();
        assert_eq!(
            names,
            vec!["x:native-a:1", "x:native-b:1", "n:one:1", "n:two:1"]
        );
    }

    #[test]
    fn test_load_reads_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("version.json");
        std::fs::write(&path, br#"{"id":"1.5.2"}"#).unwrap();

        assert_eq!(ManifestDocument::load(&path).unwrap().id, "1.5.2");
        assert!(matches!(
            ManifestDocument::load(&temp.path().join("missing.json")),
            Err(SyncError::ReadFailed { .. })
        ));
    }
}
