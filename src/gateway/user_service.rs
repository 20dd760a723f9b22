//! HTTP client for the user management service.
//!
//! Every request carries `Authorization: Bearer <service token>` and goes through
//! the [`ResilientGateway`] under its own operation name, so each endpoint has an
//! independent breaker.

use std::time::Duration;

use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::classification::{classify_status, CallError};
use super::resilient::{GatewayError, ResilientGateway};
use crate::config::PeerServiceConfig;
use crate::constants::operations;

/// Eligibility details attached to a candidate profile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestEligibilityInfo {
    #[serde(default)]
    pub job_position: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
}

/// Candidate profile as served by the user management service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(alias = "_id", default)]
    pub id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub education_level: Option<String>,
    #[serde(default)]
    pub job_position: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub test_eligibility_info: Option<TestEligibilityInfo>,
}

impl UserProfile {
    /// A profile is only worth caching when it can be contacted
    pub fn has_email(&self) -> bool {
        self.email.as_deref().is_some_and(|email| !email.trim().is_empty())
    }
}

/// Result of a credential check. A refusal is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum CredentialCheck {
    Accepted(serde_json::Value),
    Rejected { status: u16, message: String },
}

/// Result of token revocation. Failure is reported, never raised.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenRevocation {
    Revoked(serde_json::Value),
    Failed { reason: String },
}

#[derive(Debug, Serialize)]
struct CredentialsBody<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Clone)]
pub struct UserServiceClient {
    http: Client,
    base_url: Url,
    service_token: String,
    gateway: ResilientGateway,
}

impl UserServiceClient {
    pub fn new(config: &PeerServiceConfig, gateway: ResilientGateway) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(Duration::from_secs(2))
            .build()
            .map_err(|e| GatewayError::Configuration(format!("HTTP client build failed: {e}")))?;

        let base_url = Url::parse(config.base_url.trim_end_matches('/')).map_err(|e| {
            GatewayError::Configuration(format!("invalid base_url '{}': {e}", config.base_url))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::Configuration(format!(
                "base_url '{}' cannot be used as a base",
                config.base_url
            )));
        }

        info!(
            base_url = %base_url,
            service_token_configured = !config.service_token.is_empty(),
            "User service client configured"
        );

        Ok(Self {
            http,
            base_url,
            service_token: config.service_token.clone(),
            gateway,
        })
    }

    pub async fn validate_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> Result<CredentialCheck, GatewayError> {
        debug!(email, "Validating credentials");
        let url = self.endpoint(&["validate-credentials"])?;

        let result = self
            .gateway
            .call(operations::VALIDATE_CREDENTIALS, || async {
                let response = self
                    .http
                    .post(url)
                    .bearer_auth(&self.service_token)
                    .json(&CredentialsBody { email, password })
                    .send()
                    .await?;
                read_json::<serde_json::Value>(response).await
            })
            .await;

        match result {
            Ok(body) => Ok(CredentialCheck::Accepted(body)),
            Err(GatewayError::Client {
                status, message, ..
            }) => {
                debug!(email, status, "Credentials refused");
                Ok(CredentialCheck::Rejected { status, message })
            }
            Err(error) => Err(error),
        }
    }

    /// `Ok(None)` when the user does not exist
    pub async fn get_user_by_id(&self, user_id: &str) -> Result<Option<UserProfile>, GatewayError> {
        debug!(user_id, "Fetching user by id");
        let url = self.endpoint(&["service", user_id])?;
        self.lookup(operations::GET_USER_BY_ID, url).await
    }

    /// `Ok(None)` when no user has this email
    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<UserProfile>, GatewayError> {
        debug!(email, "Fetching user by email");
        let url = self.endpoint(&["by-email", email])?;
        self.lookup(operations::GET_USER_BY_EMAIL, url).await
    }

    pub async fn increment_token_version(&self, user_id: &str) -> TokenRevocation {
        let url = match self.endpoint(&["increment-token-version", user_id]) {
            Ok(url) => url,
            Err(error) => {
                return TokenRevocation::Failed {
                    reason: error.to_string(),
                }
            }
        };

        let result = self
            .gateway
            .call(operations::INCREMENT_TOKEN_VERSION, || async {
                let response = self
                    .http
                    .post(url)
                    .bearer_auth(&self.service_token)
                    .send()
                    .await?;
                read_json::<serde_json::Value>(response).await
            })
            .await;

        match result {
            Ok(body) => TokenRevocation::Revoked(body),
            Err(error) => {
                warn!(user_id, error = %error, "Failed to invalidate user tokens");
                TokenRevocation::Failed {
                    reason: error.to_string(),
                }
            }
        }
    }

    async fn lookup(&self, operation: &str, url: Url) -> Result<Option<UserProfile>, GatewayError> {
        self.gateway
            .call(operation, || async {
                let response = self
                    .http
                    .get(url)
                    .bearer_auth(&self.service_token)
                    .send()
                    .await?;
                if response.status() == reqwest::StatusCode::NOT_FOUND {
                    return Ok(None);
                }
                read_json::<UserProfile>(response).await.map(Some)
            })
            .await
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, GatewayError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| GatewayError::Configuration("base_url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, CallError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|e| CallError::provider(format!("invalid response body: {e}")));
    }

    let fallback = status
        .canonical_reason()
        .unwrap_or("request failed")
        .to_string();
    let message = response
        .json::<serde_json::Value>()
        .await
        .ok()
        .and_then(|body| body.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or(fallback);

    Err(classify_status(status.as_u16(), message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerConfig;
    use crate::resilience::CircuitBreakerManager;
    use std::sync::Arc;

    fn client(base_url: &str) -> UserServiceClient {
        let config = PeerServiceConfig {
            base_url: base_url.to_string(),
            ..Default::default()
        };
        let gateway = ResilientGateway::new(Arc::new(CircuitBreakerManager::from_config(
            &CircuitBreakerConfig::default(),
        )));
        UserServiceClient::new(&config, gateway).unwrap()
    }

    #[test]
    fn test_endpoint_building_encodes_segments() {
        let client = client("http://localhost:3001/api/users/");

        let by_id = client.endpoint(&["service", "abc123"]).unwrap();
        assert_eq!(by_id.as_str(), "http://localhost:3001/api/users/service/abc123");

        let by_email = client.endpoint(&["by-email", "a b@example.com"]).unwrap();
        assert_eq!(
            by_email.as_str(),
            "http://localhost:3001/api/users/by-email/a%20b@example.com"
        );
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let gateway = ResilientGateway::new(Arc::new(CircuitBreakerManager::from_config(
            &CircuitBreakerConfig::default(),
        )));
        let config = PeerServiceConfig {
            base_url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            UserServiceClient::new(&config, gateway),
            Err(GatewayError::Configuration(_))
        ));
    }

    #[test]
    fn test_profile_deserializes_peer_shape() {
        let profile: UserProfile = serde_json::from_value(serde_json::json!({
            "_id": "u-1",
            "email": "jane@example.com",
            "firstName": "Jane",
            "lastName": "Doe",
            "educationLevel": "Master",
            "testEligibilityInfo": { "jobPosition": "Engineer", "company": "ACME" },
            "role": "candidate"
        }))
        .unwrap();

        assert_eq!(profile.id.as_deref(), Some("u-1"));
        assert!(profile.has_email());
        assert_eq!(
            profile.test_eligibility_info.unwrap().company.as_deref(),
            Some("ACME")
        );
        assert!(!UserProfile::default().has_email());
    }
}
