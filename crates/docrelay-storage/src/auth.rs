//! Service-account authentication for the Google APIs.
//!
//! A signed RS256 assertion is exchanged at the credentials' `token_uri`
//! for a short-lived bearer token, which is cached until shortly before it
//! expires.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use docrelay_core::config::accounts::ServiceAccountCredentials;
use docrelay_core::error::AppError;
use docrelay_core::result::AppResult;

use crate::http::{check_response, map_reqwest_error};

/// OAuth scope granting full Drive access.
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime requested for each assertion.
const ASSERTION_TTL_SECONDS: i64 = 3600;

/// Cached tokens are refreshed this long before they expire.
const REFRESH_MARGIN_SECONDS: i64 = 60;

/// Claims of the assertion sent to the token endpoint.
#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Mints and caches bearer tokens for one service account.
pub struct ServiceAccountAuth {
    client: reqwest::Client,
    client_email: String,
    token_uri: String,
    scope: String,
    encoding_key: EncodingKey,
    cached: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for ServiceAccountAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountAuth")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .field("scope", &self.scope)
            .finish()
    }
}

impl ServiceAccountAuth {
    /// Creates the authenticator. Fails if the private key is not a valid
    /// PEM-encoded RSA key.
    pub fn new(
        client: reqwest::Client,
        credentials: &ServiceAccountCredentials,
        scope: &str,
    ) -> AppResult<Self> {
        // Keys pasted into env vars often carry literal "\n" sequences.
        let pem = credentials.private_key.replace("\\n", "\n");
        let encoding_key = EncodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| {
            AppError::configuration(format!(
                "Invalid private key for {}: {e}",
                credentials.client_email
            ))
        })?;

        Ok(Self {
            client,
            client_email: credentials.client_email.clone(),
            token_uri: credentials.token_uri.clone(),
            scope: scope.to_string(),
            encoding_key,
            cached: Mutex::new(None),
        })
    }

    /// Returns a valid bearer token, fetching a new one if needed.
    pub async fn access_token(&self) -> AppResult<String> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();

        if let Some(token) = cached.as_ref() {
            if token.expires_at - Duration::seconds(REFRESH_MARGIN_SECONDS) > now {
                return Ok(token.token.clone());
            }
        }

        let fresh = self.fetch_token(now).await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    /// Signs the assertion for the given issue time.
    fn assertion(&self, now: DateTime<Utc>) -> AppResult<String> {
        let claims = AssertionClaims {
            iss: &self.client_email,
            scope: &self.scope,
            aud: &self.token_uri,
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_TTL_SECONDS,
        };

        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::internal(format!("Failed to sign token assertion: {e}")))
    }

    async fn fetch_token(&self, now: DateTime<Utc>) -> AppResult<CachedToken> {
        let assertion = self.assertion(now)?;

        let response = self
            .client
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", &assertion)])
            .send()
            .await
            .map_err(|e| map_reqwest_error("Token request failed", e))?;

        let body: TokenResponse = check_response("Token request rejected", response)
            .await?
            .json()
            .await
            .map_err(|e| map_reqwest_error("Invalid token response", e))?;

        debug!(
            client_email = %self.client_email,
            expires_in = body.expires_in,
            "Obtained access token"
        );

        Ok(CachedToken {
            token: body.access_token,
            expires_at: now + Duration::seconds(body.expires_in),
        })
    }
}
