//! External identity verifier (§4.E): resolves a candidate nickname to a
//! verified-participant status against the configured identity service.

use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::future::Cache;
use parking_lot::Mutex;
use serde::Deserialize;

use crate::config::IdentityConfig;
use crate::error::AppError;

const TOKEN_SAFETY_MARGIN: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantStatus {
    VerifiedActive { nickname: String },
    VerifiedNonActive { nickname: String },
    NotFound,
}

/// Cached alongside a successful or not-found lookup; never constructed for
/// a transient failure, which is not cacheable.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CachedStatus {
    Found(ParticipantStatus),
    NotFound,
}

#[derive(Debug, Clone)]
struct Token {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Instant,
}

impl Token {
    fn is_valid(&self) -> bool {
        Instant::now() + TOKEN_SAFETY_MARGIN < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: u64,
}

/// The identity API's participant status, six values wide — only `Active`
/// maps to `VerifiedActive`; every other status still identifies a real
/// participant, just not an active one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum ParticipantApiStatus {
    Active,
    TemporaryBlocking,
    Expelled,
    Blocked,
    Frozen,
    StudyCompleted,
}

#[derive(Debug, Deserialize)]
struct ParticipantResponse {
    login: String,
    status: ParticipantApiStatus,
}

/// Verifies external participant identities. Cheap to clone: the HTTP
/// client, token slot, and result cache are all shared behind `Arc`/
/// internal locking.
#[derive(Clone)]
pub struct IdentityVerifier {
    http: reqwest::Client,
    config: IdentityConfig,
    token: Arc<Mutex<Option<Token>>>,
    results: Cache<String, CachedStatus>,
}

impl IdentityVerifier {
    pub fn new(config: IdentityConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        let results = Cache::builder()
            .max_capacity(50_000)
            .expire_after(ResultExpiry {
                success_ttl: Duration::from_secs(config.success_ttl_secs),
                not_found_ttl: Duration::from_secs(config.failure_ttl_secs),
            })
            .build();

        Ok(Self {
            http,
            config,
            token: Arc::new(Mutex::new(None)),
            results,
        })
    }

    /// `nickname` is treated as the cache key as well as the lookup query —
    /// the identity service is keyed by nickname, not by platform user id.
    pub async fn get_participant(&self, nickname: &str) -> Result<ParticipantStatus, AppError> {
        if let Some(hit) = self.results.get(nickname).await {
            return Ok(match hit {
                CachedStatus::Found(status) => status,
                CachedStatus::NotFound => ParticipantStatus::NotFound,
            });
        }

        let status = self.lookup_with_retry(nickname).await?;

        let cached = match &status {
            ParticipantStatus::NotFound => CachedStatus::NotFound,
            other => CachedStatus::Found(other.clone()),
        };
        self.results.insert(nickname.to_string(), cached).await;

        Ok(status)
    }

    async fn lookup_with_retry(&self, nickname: &str) -> Result<ParticipantStatus, AppError> {
        let retry_cfg = crate::config::RetryConfig {
            max_retries: 3,
            initial_delay: Duration::from_millis(200),
            multiplier: 2.0,
        };
        let cancel = tokio_util::sync::CancellationToken::new();
        crate::retry::retry(retry_cfg, &cancel, || self.lookup_once(nickname))
            .await
            .map_err(|exhausted| exhausted.source)
    }

    async fn lookup_once(&self, nickname: &str) -> Result<ParticipantStatus, AppError> {
        let token = self.valid_token().await?;
        let url = format!(
            "{}/v1/participants/{}",
            self.config.base_url.trim_end_matches('/'),
            nickname
        );

        let response = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        match response.status() {
            reqwest::StatusCode::OK => {
                let body: ParticipantResponse = response.json().await.map_err(|e| {
                    AppError::Permanent(format!("malformed identity response: {e}"))
                })?;
                Ok(match body.status {
                    ParticipantApiStatus::Active => {
                        ParticipantStatus::VerifiedActive { nickname: body.login }
                    }
                    _ => ParticipantStatus::VerifiedNonActive { nickname: body.login },
                })
            }
            reqwest::StatusCode::NOT_FOUND => Ok(ParticipantStatus::NotFound),
            reqwest::StatusCode::UNAUTHORIZED => {
                self.refresh_token().await?;
                Err(AppError::Transient("identity token rejected, refreshed".into()))
            }
            reqwest::StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(1);
                tokio::time::sleep(Duration::from_secs(retry_after)).await;
                Err(AppError::Transient("identity service rate-limited us".into()))
            }
            status if status.is_server_error() => {
                Err(AppError::Transient(format!("identity service returned {status}")))
            }
            status => Err(AppError::Permanent(format!(
                "unexpected identity service status {status}"
            ))),
        }
    }

    /// Returns a token good for at least `TOKEN_SAFETY_MARGIN` longer,
    /// refreshing (or acquiring fresh) under the mutex so only one refresh
    /// is ever in flight per process.
    async fn valid_token(&self) -> Result<String, AppError> {
        {
            let guard = self.token.lock();
            if let Some(token) = guard.as_ref() {
                if token.is_valid() {
                    return Ok(token.access_token.clone());
                }
            }
        }
        self.refresh_token().await
    }

    async fn refresh_token(&self) -> Result<String, AppError> {
        let refresh_token = self.token.lock().as_ref().and_then(|t| t.refresh_token.clone());

        let response = if let Some(refresh_token) = refresh_token {
            self.http
                .post(format!("{}/oauth/token", self.config.base_url.trim_end_matches('/')))
                .form(&[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token.as_str()),
                    ("client_id", self.config.client_id.as_str()),
                ])
                .send()
                .await
        } else {
            let credentials = std::env::var(&self.config.credentials_env).map_err(|_| {
                AppError::Permanent(format!(
                    "identity credentials env var {} not set",
                    self.config.credentials_env
                ))
            })?;
            let (username, password) = credentials.split_once(':').ok_or_else(|| {
                AppError::Permanent("identity credentials must be username:password".into())
            })?;
            self.http
                .post(format!("{}/oauth/token", self.config.base_url.trim_end_matches('/')))
                .form(&[
                    ("grant_type", "password"),
                    ("username", username),
                    ("password", password),
                    ("client_id", self.config.client_id.as_str()),
                ])
                .send()
                .await
        };

        let response = response.map_err(classify_reqwest_error)?;
        if !response.status().is_success() {
            return Err(AppError::Transient(format!(
                "identity token endpoint returned {}",
                response.status()
            )));
        }
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::Permanent(format!("malformed token response: {e}")))?;

        let token = Token {
            access_token: body.access_token.clone(),
            refresh_token: body.refresh_token,
            expires_at: Instant::now() + Duration::from_secs(body.expires_in),
        };
        *self.token.lock() = Some(token);

        Ok(body.access_token)
    }
}

/// Classifies a `reqwest::Error` the way the match engine classifies
/// `sqlx::Error`: timeouts and connection failures are worth retrying,
/// anything else (a malformed request, a body that fails to build) is not.
fn classify_reqwest_error(err: reqwest::Error) -> AppError {
    if err.is_timeout() || err.is_connect() {
        AppError::Transient(format!("identity service unreachable: {err}"))
    } else {
        AppError::Permanent(format!("identity request failed: {err}"))
    }
}

struct ResultExpiry {
    success_ttl: Duration,
    not_found_ttl: Duration,
}

impl moka::Expiry<String, CachedStatus> for ResultExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedStatus,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(match value {
            CachedStatus::Found(_) => self.success_ttl,
            CachedStatus::NotFound => self.not_found_ttl,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_validity_respects_safety_margin() {
        let token = Token {
            access_token: "x".into(),
            refresh_token: None,
            expires_at: Instant::now() + Duration::from_secs(60),
        };
        assert!(!token.is_valid());

        let token = Token {
            access_token: "x".into(),
            refresh_token: None,
            expires_at: Instant::now() + Duration::from_secs(3600),
        };
        assert!(token.is_valid());
    }
}
