//! HTTP client for the hub token API and the profile service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url, header};

use super::error::{RemoteError, RemoteResult};
use super::types::{RemoteProfileRecord, RemoteProfilesResponse, TokenRequest, TokenResponse};

/// Calls the remote provider makes. Faked in tests.
#[async_trait]
pub trait HubApi: Send + Sync {
    /// Ask the hub for a short-lived token acting as `user`.
    async fn issue_user_token(&self, hub_api_url: &str, user: &str) -> RemoteResult<String>;

    /// Fetch the profile list with a user token.
    async fn fetch_profiles(&self, token: &str) -> RemoteResult<Vec<RemoteProfileRecord>>;
}

/// Client for the hub API and the profile service.
#[derive(Debug, Clone)]
pub struct HubClient {
    /// HTTP client.
    client: Client,
    /// Profile service endpoint.
    profiles_url: String,
    /// Service token used to issue user tokens.
    api_token: String,
    /// Lifetime of issued user tokens in seconds.
    token_expires_in: u64,
}

impl HubClient {
    pub fn new(
        profiles_url: impl Into<String>,
        api_token: impl Into<String>,
        token_expires_in: u64,
        timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            profiles_url: profiles_url.into(),
            api_token: api_token.into(),
            token_expires_in,
        }
    }

    pub fn profiles_url(&self) -> &str {
        &self.profiles_url
    }

    /// Parse JSON on success, map failures to status-carrying errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> RemoteResult<T> {
        let status = response.status();

        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| RemoteError::ParseError(format!("Failed to parse response: {}", e)));
        }

        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(RemoteError::Unauthorized { status, body })
            }
            _ => Err(RemoteError::Status { status, body }),
        }
    }
}

/// `<hub_api_url>/users/<user>/tokens`, with the user name as one encoded segment.
fn token_url(hub_api_url: &str, user: &str) -> RemoteResult<Url> {
    let mut url =
        Url::parse(hub_api_url).map_err(|e| RemoteError::InvalidUrl(format!("{hub_api_url}: {e}")))?;
    url.path_segments_mut()
        .map_err(|()| RemoteError::InvalidUrl(hub_api_url.to_string()))?
        .pop_if_empty()
        .extend(["users", user, "tokens"]);
    Ok(url)
}

#[async_trait]
impl HubApi for HubClient {
    async fn issue_user_token(&self, hub_api_url: &str, user: &str) -> RemoteResult<String> {
        let url = token_url(hub_api_url, user)?;
        let response = self
            .client
            .post(url)
            .header(header::AUTHORIZATION, format!("token {}", self.api_token))
            .json(&TokenRequest::for_user(user, self.token_expires_in))
            .send()
            .await?;

        let issued: TokenResponse = self.handle_response(response).await?;
        Ok(issued.token)
    }

    async fn fetch_profiles(&self, token: &str) -> RemoteResult<Vec<RemoteProfileRecord>> {
        let response = self
            .client
            .get(&self.profiles_url)
            .header(header::AUTHORIZATION, format!("token {}", token))
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        let data: RemoteProfilesResponse = self.handle_response(response).await?;
        Ok(data.profiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = HubClient::new(
            "http://127.0.0.1:8003/profiles",
            "service-token",
            300,
            Duration::from_secs(5),
        );
        assert_eq!(client.profiles_url(), "http://127.0.0.1:8003/profiles");
        assert_eq!(client.token_expires_in, 300);
    }

    #[test]
    fn test_token_url_encodes_user_as_one_segment() {
        let url = token_url("http://hub:8081/hub/api/", "alice").unwrap();
        assert_eq!(url.as_str(), "http://hub:8081/hub/api/users/alice/tokens");

        let url = token_url("http://hub:8081/hub/api", "a b/../admin?x#y").unwrap();
        assert_eq!(
            url.as_str(),
            "http://hub:8081/hub/api/users/a%20b%2F..%2Fadmin%3Fx%23y/tokens"
        );
    }

    #[test]
    fn test_token_url_rejects_unusable_hub_url() {
        assert!(matches!(
            token_url("not a url", "alice"),
            Err(RemoteError::InvalidUrl(_))
        ));
        assert!(matches!(
            token_url("mailto:hub@example.org", "alice"),
            Err(RemoteError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_request_failure() {
        let client = HubClient::new("http://127.0.0.1:9/profiles", "t", 300, Duration::from_secs(2));
        let err = client.fetch_profiles("user-token").await.unwrap_err();
        assert!(matches!(err, RemoteError::RequestFailed(_)));
        assert!(!err.is_auth_failure());
    }
}
