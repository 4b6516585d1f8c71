use serde::{Deserialize, Serialize};

/// Caller identity bound to a single request for permission checks and the
/// audit trail. Never stored globally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    pub user_email: Option<String>,
    pub user_name: Option<String>,
}

impl UserContext {
    /// Create a new UserContext with just a user ID
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_email: None,
            user_name: None,
        }
    }

    /// Create a UserContext with full user information
    pub fn with_details(user_id: String, email: Option<String>, name: Option<String>) -> Self {
        Self {
            user_id,
            user_email: email,
            user_name: name,
        }
    }

    /// System user for internal operations (bootstrap seeding, migrations).
    pub fn system() -> Self {
        Self {
            user_id: "system".to_string(),
            user_email: None,
            user_name: Some("System".to_string()),
        }
    }

    /// Fallback identity when a request carries no user header: the `user`
    /// entry of the process params blob, else a development default.
    pub fn default_user() -> Self {
        Self::new(crate::config::system_params().default_user.clone())
    }
}

impl Default for UserContext {
    fn default() -> Self {
        Self::default_user()
    }
}
