use crate::error::{CubeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The integration branch every app starts from.
pub const HEAD: &str = "HEAD";
/// Version reserved for system/bootstrap configuration cubes.
pub const BOOT_VERSION: &str = "0.0.0";

pub const SYS_BOOTSTRAP: &str = "sys.bootstrap";
pub const SYS_PERMISSIONS: &str = "sys.permissions";
pub const SYS_USERGROUPS: &str = "sys.usergroups";
pub const SYS_BRANCH_PERMISSIONS: &str = "sys.branch.permissions";
pub const SYS_LOCK: &str = "sys.lock";
pub const SYS_CLASSPATH: &str = "sys.classpath";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseStatus {
    Snapshot,
    Release,
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseStatus::Snapshot => write!(f, "SNAPSHOT"),
            ReleaseStatus::Release => write!(f, "RELEASE"),
        }
    }
}

impl ReleaseStatus {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SNAPSHOT" => Ok(ReleaseStatus::Snapshot),
            "RELEASE" => Ok(ReleaseStatus::Release),
            other => Err(CubeError::illegal_argument(format!(
                "'{}' is not a release status (expected SNAPSHOT or RELEASE)",
                other
            ))),
        }
    }
}

/// Immutable coordinate of a branched, versioned application namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationId {
    pub tenant: String,
    pub app: String,
    pub version: String,
    pub status: ReleaseStatus,
    pub branch: String,
}

impl ApplicationId {
    pub fn new(
        tenant: impl Into<String>,
        app: impl Into<String>,
        version: impl Into<String>,
        status: ReleaseStatus,
        branch: impl Into<String>,
    ) -> Result<Self> {
        let id = ApplicationId {
            tenant: tenant.into(),
            app: app.into(),
            version: version.into(),
            status,
            branch: branch.into(),
        };
        id.validate()?;
        Ok(id)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tenant.trim().is_empty() {
            return Err(CubeError::illegal_argument("tenant cannot be empty"));
        }
        if self.app.trim().is_empty() {
            return Err(CubeError::illegal_argument("app cannot be empty"));
        }
        if self.branch.trim().is_empty() {
            return Err(CubeError::illegal_argument("branch cannot be empty"));
        }
        validate_version(&self.version)?;
        Ok(())
    }

    /// The `0.0.0/SNAPSHOT/HEAD` slot of this tenant/app holding `sys.*`
    /// configuration cubes.
    pub fn as_bootstrap(&self) -> ApplicationId {
        ApplicationId {
            tenant: self.tenant.clone(),
            app: self.app.clone(),
            version: BOOT_VERSION.to_string(),
            status: ReleaseStatus::Snapshot,
            branch: HEAD.to_string(),
        }
    }

    /// Same coordinate on a different branch.
    pub fn with_branch(&self, branch: impl Into<String>) -> ApplicationId {
        ApplicationId {
            branch: branch.into(),
            ..self.clone()
        }
    }

    /// Same coordinate at a different version.
    pub fn with_version(&self, version: impl Into<String>) -> ApplicationId {
        ApplicationId {
            version: version.into(),
            ..self.clone()
        }
    }

    pub fn with_status(&self, status: ReleaseStatus) -> ApplicationId {
        ApplicationId {
            status,
            ..self.clone()
        }
    }

    pub fn is_head(&self) -> bool {
        self.branch.eq_ignore_ascii_case(HEAD)
    }

    pub fn is_bootstrap_version(&self) -> bool {
        self.version == BOOT_VERSION
    }

    pub fn is_snapshot(&self) -> bool {
        self.status == ReleaseStatus::Snapshot
    }

    pub fn is_release(&self) -> bool {
        self.status == ReleaseStatus::Release
    }

    /// Two ids address the same app if tenant and app match case-insensitively.
    pub fn same_app(&self, other: &ApplicationId) -> bool {
        self.tenant.eq_ignore_ascii_case(&other.tenant) && self.app.eq_ignore_ascii_case(&other.app)
    }

    /// Canonical lowercase cache key.
    pub fn cache_key(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.tenant.to_lowercase(),
            self.app.to_lowercase(),
            self.version,
            self.status,
            self.branch.to_lowercase()
        )
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.tenant, self.app, self.version, self.status, self.branch
        )
    }
}

pub fn validate_version(version: &str) -> Result<()> {
    let parts: Vec<&str> = version.split('.').collect();
    let ok = parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    if ok {
        Ok(())
    } else {
        Err(CubeError::illegal_argument(format!(
            "'{}' is not a valid version (expected major.minor.patch)",
            version
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(version: &str, branch: &str) -> ApplicationId {
        ApplicationId::new("acme", "alpha", version, ReleaseStatus::Snapshot, branch).unwrap()
    }

    #[test]
    fn validates_version_format() {
        assert!(ApplicationId::new("t", "a", "1.0", ReleaseStatus::Snapshot, HEAD).is_err());
        assert!(ApplicationId::new("t", "a", "1.0.x", ReleaseStatus::Snapshot, HEAD).is_err());
        assert!(ApplicationId::new("t", "a", "1.0.0", ReleaseStatus::Snapshot, HEAD).is_ok());
        assert!(ApplicationId::new("", "a", "1.0.0", ReleaseStatus::Snapshot, HEAD).is_err());
    }

    #[test]
    fn bootstrap_coordinate_pins_version_and_branch() {
        let id = app("1.2.3", "feature").as_bootstrap();
        assert_eq!(id.version, BOOT_VERSION);
        assert_eq!(id.branch, HEAD);
        assert!(id.is_snapshot());
        assert!(id.is_bootstrap_version());
    }

    #[test]
    fn cache_key_is_case_insensitive() {
        let a = ApplicationId::new("Acme", "Alpha", "1.0.0", ReleaseStatus::Snapshot, "HEAD")
            .unwrap();
        let b = ApplicationId::new("acme", "alpha", "1.0.0", ReleaseStatus::Snapshot, "head")
            .unwrap();
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn head_detection_ignores_case() {
        assert!(app("1.0.0", "head").is_head());
        assert!(!app("1.0.0", "jane.doe").is_head());
    }
}
