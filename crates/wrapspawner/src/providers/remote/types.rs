//! Wire types for the hub token API and the profile service.

use serde::{Deserialize, Serialize};

use crate::profile::LauncherConfig;

/// Body of a user token request to the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRequest {
    pub note: String,
    /// Token lifetime in seconds.
    pub expires_in: u64,
}

impl TokenRequest {
    pub fn for_user(user: &str, expires_in: u64) -> Self {
        Self {
            note: format!("spawner-init-{user}"),
            expires_in,
        }
    }
}

/// Hub response to a token request.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

/// Profile service response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteProfilesResponse {
    #[serde(default)]
    pub profiles: Vec<RemoteProfileRecord>,
}

/// One profile as returned by the service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteProfileRecord {
    pub description: String,
    pub profile_id: String,
    #[serde(default)]
    pub spawner: Option<String>,
    #[serde(default)]
    pub options: LauncherConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_token_request_body() {
        assert_eq!(
            serde_json::to_value(TokenRequest::for_user("alice", 300)).unwrap(),
            json!({"note": "spawner-init-alice", "expires_in": 300})
        );
    }

    #[test]
    fn test_profiles_response_parsing() {
        let response: RemoteProfilesResponse = serde_json::from_value(json!({
            "profiles": [
                {"description": "GPU", "profile_id": "gpu", "spawner": "batch", "options": {"queue": "gpu"}},
                {"description": "Small", "profile_id": "small"}
            ]
        }))
        .unwrap();
        assert_eq!(response.profiles.len(), 2);
        assert_eq!(response.profiles[0].spawner.as_deref(), Some("batch"));
        assert!(response.profiles[1].options.is_empty());
    }
}
