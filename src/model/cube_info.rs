use crate::model::app_id::{ApplicationId, ReleaseStatus};
use serde::{Deserialize, Serialize};

/// Persister record summary for a cube revision. Mirrors what the storage
/// layer indexes without necessarily decompressing cube data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CubeInfo {
    pub id: i64,
    pub tenant: String,
    pub app: String,
    pub version: String,
    pub status: ReleaseStatus,
    pub branch: String,
    pub name: String,
    pub sha1: String,
    /// SHA-1 of the HEAD revision this branch copy was taken from, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head_sha1: Option<String>,
    pub revision: i64,
    /// True when the branch copy diverged from its HEAD ancestor.
    pub changed: bool,
    pub created_at: String,
    pub created_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Raw cube JSON, present only when the search asked for it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cube_json: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_data: Option<String>,
}

impl CubeInfo {
    pub fn app_id(&self) -> ApplicationId {
        ApplicationId {
            tenant: self.tenant.clone(),
            app: self.app.clone(),
            version: self.version.clone(),
            status: self.status,
            branch: self.branch.clone(),
        }
    }
}

/// Flags steering [`crate::store::traits::Persister::search`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    pub exact_match_name: bool,
    pub active_records_only: bool,
    pub deleted_records_only: bool,
    pub changed_records_only: bool,
    pub include_cube_data: bool,
    pub include_test_data: bool,
    pub include_notes: bool,
}

impl SearchOptions {
    pub fn active_only() -> Self {
        SearchOptions {
            active_records_only: true,
            ..Default::default()
        }
    }
}
