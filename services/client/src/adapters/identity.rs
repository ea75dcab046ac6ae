//! services/client/src/adapters/identity.rs
//!
//! This module contains the identity provider adapter, the concrete
//! implementation of the `IdentityProvider` port. It talks to the identity
//! toolkit REST API (password sign-in and secure-token refresh) and keeps the
//! signed-in session either in memory or in `<data_dir>/session.json`.
//! Tokens are never logged.

use crate::config::IdentityConfig;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use quiz_core::domain::Identity;
use quiz_core::ports::{IdentityProvider, Persistence, PortError, PortResult, SignInError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};
use url::Url;

const SESSION_FILE: &str = "session.json";

/// Tokens closer than this to expiry are refreshed before use.
const EXPIRY_SKEW_SECS: i64 = 60;

/// Refresh failures that mean the session is gone for good.
const REVOKED_SESSION_CODES: &[&str] = &[
    "TOKEN_EXPIRED",
    "INVALID_REFRESH_TOKEN",
    "USER_DISABLED",
    "USER_NOT_FOUND",
];

//=========================================================================================
// Interactive Credentials
//=========================================================================================

#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// The interactive half of sign-in (the provider's "popup").
#[async_trait]
pub trait CredentialPrompt: Send + Sync {
    /// Asks the user for credentials. `None` means the prompt was dismissed.
    async fn request_credentials(&self) -> Option<Credentials>;
}

//=========================================================================================
// Session Records
//=========================================================================================

/// The part of a session that survives restarts when persistence is durable.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSession {
    uid: String,
    email: Option<String>,
    display_name: Option<String>,
    refresh_token: String,
}

impl StoredSession {
    fn identity(&self) -> Identity {
        Identity {
            uid: self.uid.clone(),
            email: self.email.clone(),
            display_name: self.display_name.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    id_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn new(id_token: String, expires_in: &str) -> Self {
        let secs = expires_in.trim().parse::<i64>().unwrap_or(3600);
        Self {
            id_token,
            expires_at: Utc::now() + ChronoDuration::seconds(secs),
        }
    }

    fn is_usable(&self) -> bool {
        Utc::now() + ChronoDuration::seconds(EXPIRY_SKEW_SECS) < self.expires_at
    }
}

struct ActiveSession {
    stored: StoredSession,
    token: Option<CachedToken>,
    /// Persistence chosen at sign-in; later preference changes do not apply.
    persistence: Persistence,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    local_id: String,
    email: Option<String>,
    display_name: Option<String>,
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

pub struct FirebaseIdentityAdapter {
    http: reqwest::Client,
    config: IdentityConfig,
    prompt: Arc<dyn CredentialPrompt>,
    session_path: PathBuf,
    session: Mutex<Option<ActiveSession>>,
    current: watch::Sender<Option<Identity>>,
    persistence: std::sync::Mutex<Persistence>,
    sign_in_gate: Mutex<()>,
}

impl FirebaseIdentityAdapter {
    /// Creates the adapter, restoring a durable session from `data_dir` if one exists.
    pub fn new(
        config: IdentityConfig,
        data_dir: &Path,
        prompt: Arc<dyn CredentialPrompt>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let session_path = data_dir.join(SESSION_FILE);

        let restored = load_session(&session_path).map(|stored| {
            info!("Restored signed-in session for {}", stored.uid);
            ActiveSession {
                stored,
                token: None,
                persistence: Persistence::Durable,
            }
        });
        let identity = restored.as_ref().map(|s| s.stored.identity());
        let (current, _) = watch::channel(identity);

        Ok(Self {
            http,
            config,
            prompt,
            session_path,
            session: Mutex::new(restored),
            current,
            persistence: std::sync::Mutex::new(Persistence::Ephemeral),
            sign_in_gate: Mutex::new(()),
        })
    }

    fn endpoint(&self, base: &Url, suffix: &str) -> Url {
        let mut url = base.clone();
        if !suffix.is_empty() {
            let path = format!("{}/{}", url.path().trim_end_matches('/'), suffix);
            url.set_path(&path);
        }
        url.query_pairs_mut().append_pair("key", &self.config.api_key);
        url
    }

    fn pending_persistence(&self) -> Persistence {
        *self
            .persistence
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    async fn request_sign_in(&self, credentials: &Credentials) -> Result<SignInResponse, SignInError> {
        let url = self.endpoint(&self.config.auth_url, "accounts:signInWithPassword");
        let response = self
            .http
            .post(url)
            .json(&serde_json::json!({
                "email": credentials.email,
                "password": credentials.password,
                "returnSecureToken": true,
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    SignInError::NetworkError(e.to_string())
                } else {
                    SignInError::Unknown(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let code = provider_error_code(&body).unwrap_or_else(|| format!("HTTP {}", status));
            return Err(SignInError::Unknown(code));
        }
        response
            .json::<SignInResponse>()
            .await
            .map_err(|e| SignInError::Unknown(e.to_string()))
    }

    /// Exchanges the refresh token for a new ID token. Holds the session lock.
    async fn refresh(&self, slot: &mut Option<ActiveSession>) -> PortResult<String> {
        let Some(active) = slot.as_mut() else {
            return Err(PortError::Unauthorized);
        };

        let url = self.endpoint(&self.config.token_url, "");
        let response = self
            .http
            .post(url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", active.stored.refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                error!("Token refresh request failed: {}", e);
                PortError::Unexpected(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let code = provider_error_code(&body).unwrap_or_else(|| format!("HTTP {}", status));
            if REVOKED_SESSION_CODES.iter().any(|c| code.starts_with(c)) {
                warn!("Session for {} was revoked ({}), signing out", active.stored.uid, code);
                *slot = None;
                self.remove_session_file();
                self.current.send_replace(None);
                return Err(PortError::Unauthorized);
            }
            return Err(PortError::Unexpected(format!("token refresh failed: {}", code)));
        }

        let refreshed: RefreshResponse = response
            .json()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        active.stored.refresh_token = refreshed.refresh_token;
        let token = CachedToken::new(refreshed.id_token, &refreshed.expires_in);
        let id_token = token.id_token.clone();
        active.token = Some(token);
        if active.persistence == Persistence::Durable {
            if let Err(e) = save_session(&self.session_path, &active.stored) {
                warn!("Failed to persist refreshed session: {}", e);
            }
        }
        debug!("Refreshed ID token for {}", active.stored.uid);
        Ok(id_token)
    }

    fn remove_session_file(&self) {
        if let Err(e) = fs::remove_file(&self.session_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", self.session_path.display(), e);
            }
        }
    }
}

//=========================================================================================
// `IdentityProvider` Trait Implementation
//=========================================================================================

#[async_trait]
impl IdentityProvider for FirebaseIdentityAdapter {
    async fn sign_in(&self) -> Result<Identity, SignInError> {
        let _gate = self
            .sign_in_gate
            .try_lock()
            .map_err(|_| SignInError::PopupConflict)?;

        let credentials = self
            .prompt
            .request_credentials()
            .await
            .ok_or(SignInError::PopupCancelled)?;

        let response = self.request_sign_in(&credentials).await?;
        let persistence = self.pending_persistence();
        let stored = StoredSession {
            uid: response.local_id,
            email: response.email.or(Some(credentials.email)),
            display_name: response.display_name.filter(|n| !n.is_empty()),
            refresh_token: response.refresh_token,
        };
        let identity = stored.identity();

        match persistence {
            Persistence::Durable => {
                if let Err(e) = save_session(&self.session_path, &stored) {
                    warn!("Failed to persist session: {}", e);
                }
            }
            Persistence::Ephemeral => self.remove_session_file(),
        }

        *self.session.lock().await = Some(ActiveSession {
            stored,
            token: Some(CachedToken::new(response.id_token, &response.expires_in)),
            persistence,
        });
        self.current.send_replace(Some(identity.clone()));
        info!("Signed in as {}", identity.uid);
        Ok(identity)
    }

    async fn sign_out(&self) -> PortResult<()> {
        *self.session.lock().await = None;
        self.remove_session_file();
        self.current.send_replace(None);
        info!("Signed out");
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.current.subscribe()
    }

    fn current_identity(&self) -> Option<Identity> {
        self.current.borrow().clone()
    }

    async fn fresh_token(&self, force_refresh: bool) -> PortResult<String> {
        let mut slot = self.session.lock().await;
        let active = slot.as_ref().ok_or(PortError::Unauthorized)?;
        if !force_refresh {
            if let Some(token) = active.token.as_ref().filter(|t| t.is_usable()) {
                return Ok(token.id_token.clone());
            }
        }
        self.refresh(&mut slot).await
    }

    fn set_persistence(&self, persistence: Persistence) -> PortResult<()> {
        *self
            .persistence
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = persistence;
        Ok(())
    }
}

//=========================================================================================
// Helpers
//=========================================================================================

/// Extracts `error.message` from a provider error body.
fn provider_error_code(body: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    json.get("error")?
        .get("message")?
        .as_str()
        .map(str::to_string)
}

fn load_session(path: &Path) -> Option<StoredSession> {
    let contents = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&contents) {
        Ok(stored) => Some(stored),
        Err(e) => {
            warn!("Ignoring unreadable session at {}: {}", path.display(), e);
            None
        }
    }
}

/// Saves the session with restricted permissions (0600).
fn save_session(path: &Path, stored: &StoredSession) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let contents = serde_json::to_string_pretty(stored)?;

    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        file.write_all(contents.as_bytes())?;
    }

    #[cfg(not(unix))]
    {
        fs::write(path, contents)?;
    }

    Ok(())
}
