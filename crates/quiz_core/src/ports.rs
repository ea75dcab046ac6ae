//! crates/quiz_core/src/ports.rs
//!
//! Defines the service contracts (traits) the quiz client is built on.
//! These traits form the boundary of the hexagonal architecture, keeping the
//! session and quiz controllers independent of the identity provider SDK,
//! the HTTP stack and the storage used for preferences.

use async_trait::async_trait;
use tokio::sync::watch;

use crate::domain::{
    AnswerFeedback, AttemptHandle, Identity, Profile, ProfileUpdate, Question, QuizResult,
    Registration, Topic,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (network, storage).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    /// The remote resource does not exist. For token verification this is the
    /// expected "new user" signal.
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Unauthorized")]
    Unauthorized,
    /// The server rejected the request; the message is meant for the user.
    #[error("{0}")]
    Validation(String),
    /// Connectivity failures, timeouts, 5xx responses and malformed payloads.
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// Failures of the interactive sign-in flow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignInError {
    #[error("sign-in popup was closed by the user")]
    PopupCancelled,
    #[error("another sign-in popup is already open")]
    PopupConflict,
    #[error("network error during sign-in: {0}")]
    NetworkError(String),
    #[error("sign-in failed: {0}")]
    Unknown(String),
}

impl SignInError {
    /// The message shown to the user for this failure.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::PopupCancelled => "Sign-in was cancelled.",
            Self::PopupConflict => "Another sign-in is already in progress.",
            Self::NetworkError(_) => "Network error during sign-in. Please check your connection.",
            Self::Unknown(_) => "Login failed. Please try again.",
        }
    }
}

/// How long a provider session survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    /// Survives restarts of the client.
    Durable,
    /// Lives only as long as the current process.
    Ephemeral,
}

impl Persistence {
    pub fn from_remember_me(remember_me: bool) -> Self {
        if remember_me {
            Self::Durable
        } else {
            Self::Ephemeral
        }
    }
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Runs the interactive sign-in flow.
    async fn sign_in(&self) -> Result<Identity, SignInError>;

    async fn sign_out(&self) -> PortResult<()>;

    /// Subscribes to identity changes.
    ///
    /// The receiver observes the current identity immediately and every later
    /// change (sign-in, sign-out, expiry). Dropping the receiver unsubscribes.
    /// A change is published only after the call that caused it has finished
    /// updating the provider's own state.
    fn subscribe(&self) -> watch::Receiver<Option<Identity>>;

    fn current_identity(&self) -> Option<Identity>;

    /// Returns an ID token for the signed-in identity, refreshing it when
    /// `force_refresh` is set or the cached token is about to expire.
    async fn fresh_token(&self, force_refresh: bool) -> PortResult<String>;

    /// Selects the persistence used by the next sign-in.
    fn set_persistence(&self, persistence: Persistence) -> PortResult<()>;
}

/// Durable client-side preferences.
pub trait PreferenceStore: Send + Sync {
    fn remember_me(&self) -> PortResult<bool>;

    fn set_remember_me(&self, remember_me: bool) -> PortResult<()>;
}

#[async_trait]
pub trait QuizBackend: Send + Sync {
    // --- Profile ---
    /// Exchanges an identity token for the stored profile.
    async fn verify_token(&self, token: &str) -> PortResult<Profile>;

    async fn register(&self, identity: &Identity, registration: &Registration)
        -> PortResult<Profile>;

    async fn get_profile(&self) -> PortResult<Profile>;

    async fn update_profile(&self, update: &ProfileUpdate) -> PortResult<Profile>;

    // --- Catalog ---
    async fn list_interests(&self) -> PortResult<Vec<String>>;

    async fn list_topics(&self) -> PortResult<Vec<Topic>>;

    // --- Quiz attempts ---
    async fn generate_quiz(&self, topic: &str, num_questions: u32) -> PortResult<String>;

    async fn fetch_quiz(&self, quiz_id: &str) -> PortResult<Vec<Question>>;

    async fn start_quiz(&self, quiz_id: &str) -> PortResult<AttemptHandle>;

    async fn submit_answer(
        &self,
        attempt_id: &str,
        question_id: &str,
        answer: &str,
    ) -> PortResult<AnswerFeedback>;

    async fn complete_quiz(&self, attempt_id: &str) -> PortResult<QuizResult>;
}
