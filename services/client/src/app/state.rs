//! services/client/src/app/state.rs
//!
//! Defines the observable state published by the session controller.

use quiz_core::domain::{Identity, Profile};
use std::fmt;

//=========================================================================================
// SessionPhase
//=========================================================================================

/// Where the signed-in user currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Anonymous,
    AuthCheckInProgress,
    ProfileCheckInProgress,
    NeedsRegistration,
    Registering,
    Authenticated,
    Error,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Anonymous => "anonymous",
            SessionPhase::AuthCheckInProgress => "checking sign-in",
            SessionPhase::ProfileCheckInProgress => "checking profile",
            SessionPhase::NeedsRegistration => "needs registration",
            SessionPhase::Registering => "registering",
            SessionPhase::Authenticated => "authenticated",
            SessionPhase::Error => "error",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//=========================================================================================
// SessionState
//=========================================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadingFlags {
    /// A sign-in is in flight.
    pub auth: bool,
    /// A registration request is in flight.
    pub registration: bool,
    /// The token-verification loop is running.
    pub profile_check: bool,
}

impl LoadingFlags {
    pub fn any(&self) -> bool {
        self.auth || self.registration || self.profile_check
    }
}

/// A snapshot of the session, as seen by the view layer.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub identity: Option<Identity>,
    pub profile: Option<Profile>,
    pub loading: LoadingFlags,
    pub error: Option<String>,
    pub remember_me: bool,
}

impl SessionState {
    pub fn new(remember_me: bool) -> Self {
        Self {
            phase: SessionPhase::Anonymous,
            identity: None,
            profile: None,
            loading: LoadingFlags::default(),
            error: None,
            remember_me,
        }
    }

    /// Returns to the signed-out state. The remember-me preference survives.
    pub(crate) fn reset(&mut self) {
        *self = Self::new(self.remember_me);
    }

    pub fn is_signed_out(&self) -> bool {
        self.identity.is_none() && self.profile.is_none() && !self.loading.any()
    }
}
