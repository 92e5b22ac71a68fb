//! Version catalog: which version identifiers exist.

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// One known release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionDescriptor {
    pub id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_time: Option<String>,
}

impl VersionDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: None,
            release_time: None,
        }
    }
}

/// Resolves version identifiers.
pub trait VersionCatalog: Send + Sync {
    /// Look up `id`. `None` means the version is unknown.
    fn resolve(&self, id: &str) -> Option<VersionDescriptor>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestVersions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
}

/// The remote version list (`versions.json`) or any in-memory equivalent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionList {
    #[serde(default)]
    pub latest: LatestVersions,
    #[serde(default)]
    pub versions: Vec<VersionDescriptor>,
}

impl VersionList {
    pub fn from_descriptors(versions: Vec<VersionDescriptor>) -> Self {
        Self {
            latest: LatestVersions::default(),
            versions,
        }
    }

    /// Parse the remote version list JSON.
    pub fn parse(bytes: &[u8]) -> SyncResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| SyncError::MetadataInvalid {
            path: "versions.json".into(),
            reason: e.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Descriptor of the latest release, if the list names one.
    pub fn latest_release(&self) -> Option<&VersionDescriptor> {
        let id = self.latest.release.as_deref()?;
        self.versions.iter().find(|v| v.id == id)
    }
}

impl VersionCatalog for VersionList {
    fn resolve(&self, id: &str) -> Option<VersionDescriptor> {
        self.versions.iter().find(|v| v.id == id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST: &[u8] = br#"{
        "latest": {"snapshot": "13w42b", "release": "1.6.4"},
        "versions": [
            {"id": "13w42b", "time": "2013-10-18T15:04:31+02:00", "releaseTime": "2013-10-18T15:04:31+02:00", "type": "snapshot"},
            {"id": "1.6.4", "releaseTime": "2013-09-19T15:52:37+00:00", "type": "release"},
            {"id": "1.6.2", "type": "release"}
        ]
    }"#;

    #[test]
    fn test_parse_version_list() {
        let list = VersionList::parse(LIST).unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list.latest.snapshot.as_deref(), Some("13w42b"));
        assert_eq!(list.latest_release().map(|v| v.id.as_str()), Some("1.6.4"));
    }

    #[test]
    fn test_resolve() {
        let list = VersionList::parse(LIST).unwrap();
        let found = list.resolve("1.6.4").unwrap();
        assert_eq!(found.kind.as_deref(), Some("release"));
        assert!(list.resolve("9.9.9").is_none());
    }

    #[test]
    fn test_from_descriptors() {
        let list = VersionList::from_descriptors(vec![VersionDescriptor::new("1.5.2")]);
        assert!(list.resolve("1.5.2").is_some());
        assert!(list.latest_release().is_none());
        assert!(!list.is_empty());
    }

    #[test]
    fn test_parse_garbage() {
        assert!(matches!(
            VersionList::parse(b"[1, 2"),
            Err(SyncError::MetadataInvalid { .. })
        ));
    }
}
