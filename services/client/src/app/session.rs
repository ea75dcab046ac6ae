//! services/client/src/app/session.rs
//!
//! The session controller: the state machine that owns sign-in, the profile
//! check against the backend, registration and logout. The current state is
//! published through a `watch` channel; identity changes reported by the
//! provider are consumed by a listener task owned by the controller.

use crate::app::state::{SessionPhase, SessionState};
use chrono::Local;
use quiz_core::domain::{Identity, Profile, ProfileUpdate, RegistrationData};
use quiz_core::ports::{
    IdentityProvider, Persistence, PortError, PortResult, PreferenceStore, QuizBackend,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const CONNECTIVITY_ERROR: &str = "Error connecting to the server.";
const REGISTRATION_FALLBACK: &str = "Registration failed";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("cannot {action} while the session is {phase}")]
    InvalidState {
        action: &'static str,
        phase: SessionPhase,
    },

    /// Shown inline by the registration form.
    #[error("{0}")]
    Registration(String),

    #[error(transparent)]
    Port(#[from] PortError),
}

//=========================================================================================
// Retry Policy
//=========================================================================================

/// Bounded exponential backoff for the profile check.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed `attempt` (1-indexed): 1s, 2s, 4s, ...
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

//=========================================================================================
// SessionController
//=========================================================================================

pub struct SessionController {
    inner: Arc<Inner>,
    listener: CancellationToken,
}

struct Inner {
    identity: Arc<dyn IdentityProvider>,
    backend: Arc<dyn QuizBackend>,
    preferences: Arc<dyn PreferenceStore>,
    state: watch::Sender<SessionState>,
    retry: RetryPolicy,
    /// Bumped whenever a session ends or a new one begins; work started under
    /// an older generation must not touch the state.
    generation: AtomicU64,
}

impl SessionController {
    /// Creates the controller and starts listening for identity changes.
    /// Must be called from within a tokio runtime.
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        backend: Arc<dyn QuizBackend>,
        preferences: Arc<dyn PreferenceStore>,
    ) -> Self {
        Self::with_retry(identity, backend, preferences, RetryPolicy::default())
    }

    pub fn with_retry(
        identity: Arc<dyn IdentityProvider>,
        backend: Arc<dyn QuizBackend>,
        preferences: Arc<dyn PreferenceStore>,
        retry: RetryPolicy,
    ) -> Self {
        let remember_me = preferences.remember_me().unwrap_or_else(|e| {
            warn!("Failed to read the remember-me preference: {}", e);
            false
        });

        let mut initial = SessionState::new(remember_me);
        if identity.current_identity().is_some() {
            initial.phase = SessionPhase::AuthCheckInProgress;
        }
        let (state, _) = watch::channel(initial);

        let changes = identity.subscribe();
        let inner = Arc::new(Inner {
            identity,
            backend,
            preferences,
            state,
            retry,
            generation: AtomicU64::new(0),
        });

        let listener = CancellationToken::new();
        tokio::spawn(listen(inner.clone(), changes, listener.clone()));

        Self { inner, listener }
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    /// Returns a receiver that observes every state change. Dropping it unsubscribes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Signs in through the provider, then runs the profile check.
    ///
    /// Sign-in and profile-check failures end up in the state's `error` field;
    /// only a call from the wrong phase is returned as an error.
    pub async fn login(&self) -> Result<(), SessionError> {
        let inner = &self.inner;
        let mut generation = 0;
        let mut refused = None;
        inner.state.send_if_modified(|s| {
            if !matches!(s.phase, SessionPhase::Anonymous | SessionPhase::Error) {
                refused = Some(s.phase);
                return false;
            }
            generation = inner.next_generation();
            s.phase = SessionPhase::AuthCheckInProgress;
            s.loading.auth = true;
            s.error = None;
            true
        });
        if let Some(phase) = refused {
            return Err(SessionError::InvalidState {
                action: "log in",
                phase,
            });
        }

        let remember_me = inner.state.borrow().remember_me;
        if let Err(e) = inner
            .identity
            .set_persistence(Persistence::from_remember_me(remember_me))
        {
            warn!("Failed to apply session persistence: {}", e);
        }

        match inner.identity.sign_in().await {
            Ok(identity) => {
                info!("Signed in as {}", identity.uid);
                let adopted = inner.state.send_if_modified(|s| {
                    if !inner.is_current(generation) {
                        return false;
                    }
                    s.identity = Some(identity.clone());
                    s.profile = None;
                    s.phase = SessionPhase::ProfileCheckInProgress;
                    s.loading.auth = false;
                    s.loading.profile_check = true;
                    true
                });
                if adopted {
                    inner.check_registration(&identity, generation).await;
                }
            }
            Err(e) => {
                warn!("Sign-in failed: {}", e);
                inner.state.send_if_modified(|s| {
                    if !inner.is_current(generation) {
                        return false;
                    }
                    s.reset();
                    s.phase = SessionPhase::Error;
                    s.error = Some(e.user_message().to_string());
                    true
                });
            }
        }
        Ok(())
    }

    /// Signs out and returns to `Anonymous` from any phase.
    pub async fn logout(&self) {
        self.inner.end_session(None).await;
    }

    /// Creates the backend profile for the signed-in identity.
    ///
    /// Failures are returned to the caller for inline display; the session
    /// stays in `NeedsRegistration`.
    pub async fn complete_registration(
        &self,
        data: RegistrationData,
    ) -> Result<Profile, SessionError> {
        let inner = &self.inner;
        let (identity, phase) = {
            let state = inner.state.borrow();
            (state.identity.clone(), state.phase)
        };
        let identity = match identity {
            Some(identity) if phase == SessionPhase::NeedsRegistration => identity,
            _ => {
                return Err(SessionError::InvalidState {
                    action: "register",
                    phase,
                })
            }
        };

        let registration = data
            .validate(Local::now().date_naive())
            .map_err(|e| SessionError::Registration(e.to_string()))?;

        let generation = inner.generation.load(Ordering::SeqCst);
        inner.state.send_modify(|s| {
            s.phase = SessionPhase::Registering;
            s.loading.registration = true;
        });

        let result = inner.backend.register(&identity, &registration).await;
        match result {
            Ok(profile) => {
                info!("Registered profile for {}", identity.uid);
                inner.state.send_if_modified(|s| {
                    if !inner.is_current(generation) {
                        return false;
                    }
                    s.profile = Some(profile.clone());
                    s.phase = SessionPhase::Authenticated;
                    s.loading.registration = false;
                    s.error = None;
                    true
                });
                Ok(profile)
            }
            Err(e) => {
                warn!("Registration failed: {}", e);
                inner.state.send_if_modified(|s| {
                    if !inner.is_current(generation) {
                        return false;
                    }
                    s.phase = SessionPhase::NeedsRegistration;
                    s.loading.registration = false;
                    true
                });
                let message = match e {
                    PortError::Validation(message) if !message.is_empty() => message,
                    _ => REGISTRATION_FALLBACK.to_string(),
                };
                Err(SessionError::Registration(message))
            }
        }
    }

    /// Replaces the cached profile.
    pub fn update_user_data(&self, profile: Profile) -> Result<(), SessionError> {
        self.inner.require_authenticated("update the profile")?;
        self.inner.state.send_modify(|s| s.profile = Some(profile));
        Ok(())
    }

    /// Re-reads the profile from the backend.
    pub async fn reload_profile(&self) -> Result<Profile, SessionError> {
        self.inner.require_authenticated("reload the profile")?;
        let profile = self.inner.backend.get_profile().await?;
        self.inner.adopt_profile(&profile);
        Ok(profile)
    }

    pub async fn save_profile(&self, update: ProfileUpdate) -> Result<Profile, SessionError> {
        self.inner.require_authenticated("save the profile")?;
        let profile = self.inner.backend.update_profile(&update).await?;
        self.inner.adopt_profile(&profile);
        Ok(profile)
    }

    /// Sets or clears the displayed error.
    pub fn set_error(&self, error: Option<String>) {
        self.inner.state.send_if_modified(|s| {
            if s.error == error {
                return false;
            }
            s.error = error;
            true
        });
    }

    /// Persists the remember-me choice. It applies from the next sign-in.
    pub fn set_remember_me(&self, remember_me: bool) -> Result<(), SessionError> {
        self.inner.preferences.set_remember_me(remember_me)?;
        self.inner.state.send_modify(|s| s.remember_me = remember_me);
        Ok(())
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.listener.cancel();
    }
}

//=========================================================================================
// State Machine Internals
//=========================================================================================

impl Inner {
    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn require_authenticated(&self, action: &'static str) -> Result<(), SessionError> {
        let phase = self.state.borrow().phase;
        if phase != SessionPhase::Authenticated {
            return Err(SessionError::InvalidState { action, phase });
        }
        Ok(())
    }

    fn adopt_profile(&self, profile: &Profile) {
        self.state.send_if_modified(|s| {
            if s.phase != SessionPhase::Authenticated {
                return false;
            }
            s.profile = Some(profile.clone());
            true
        });
    }

    /// Exchanges a fresh token for the profile, retrying with backoff.
    async fn check_registration(&self, identity: &Identity, generation: u64) {
        let max_attempts = self.retry.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            if !self.is_current(generation) {
                debug!("Profile check for {} was superseded", identity.uid);
                return;
            }

            match self.verify().await {
                Ok(profile) => {
                    let phase = if profile.is_registered {
                        SessionPhase::Authenticated
                    } else {
                        SessionPhase::NeedsRegistration
                    };
                    info!("Profile check for {} finished: {}", identity.uid, phase);
                    self.finish_check(generation, Some(profile), phase);
                    return;
                }
                Err(PortError::NotFound(_)) => {
                    info!("No profile for {}, registration required", identity.uid);
                    self.finish_check(generation, None, SessionPhase::NeedsRegistration);
                    return;
                }
                Err(e) if attempt < max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        "Profile check attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt, max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(
                        "Profile check failed after {} attempts: {}",
                        max_attempts, e
                    );
                    if self.is_current(generation) {
                        self.end_session(Some(CONNECTIVITY_ERROR)).await;
                    }
                    return;
                }
            }
        }
    }

    async fn verify(&self) -> PortResult<Profile> {
        let token = self.identity.fresh_token(false).await?;
        self.backend.verify_token(&token).await
    }

    fn finish_check(&self, generation: u64, profile: Option<Profile>, phase: SessionPhase) {
        self.state.send_if_modified(|s| {
            if !self.is_current(generation) {
                return false;
            }
            s.profile = profile;
            s.phase = phase;
            s.error = None;
            s.loading.profile_check = false;
            true
        });
    }

    /// Signs out and resets the state. With an error, the session lands in
    /// `Error` instead of `Anonymous`.
    async fn end_session(&self, error: Option<&str>) {
        self.next_generation();
        if let Err(e) = self.identity.sign_out().await {
            warn!("Sign-out failed, resetting local session anyway: {}", e);
        }
        self.state.send_modify(|s| {
            s.reset();
            if let Some(message) = error {
                s.phase = SessionPhase::Error;
                s.error = Some(message.to_string());
            }
        });
        info!("Session ended");
    }

    /// Reacts to an identity change the controller did not cause itself.
    fn on_identity_changed(self: &Arc<Self>, identity: Option<Identity>) {
        match identity {
            Some(identity) => {
                let mut generation = 0;
                let adopted = self.state.send_if_modified(|s| {
                    let login_in_flight = s.loading.auth && s.identity.is_none();
                    let already_held = s.identity.as_ref().map(|i| &i.uid) == Some(&identity.uid);
                    if login_in_flight || already_held {
                        return false;
                    }
                    generation = self.next_generation();
                    s.identity = Some(identity.clone());
                    s.profile = None;
                    s.error = None;
                    s.phase = SessionPhase::ProfileCheckInProgress;
                    s.loading.profile_check = true;
                    true
                });
                if adopted {
                    info!("Provider reported identity {}, checking profile", identity.uid);
                    let inner = self.clone();
                    tokio::spawn(async move {
                        inner.check_registration(&identity, generation).await;
                    });
                }
            }
            None => {
                self.state.send_if_modified(|s| {
                    let awaiting_startup =
                        s.phase == SessionPhase::AuthCheckInProgress && !s.loading.auth;
                    if s.identity.is_none() && !awaiting_startup {
                        return false;
                    }
                    info!("Provider reported sign-out");
                    self.next_generation();
                    s.reset();
                    true
                });
            }
        }
    }
}

async fn listen(
    inner: Arc<Inner>,
    mut changes: watch::Receiver<Option<Identity>>,
    cancel: CancellationToken,
) {
    loop {
        let identity = changes.borrow_and_update().clone();
        inner.on_identity_changed(identity);

        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    debug!("Identity listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, FakeBackend, FakeIdentity, MemoryPreferences};
    use quiz_core::ports::SignInError;
    use tokio::time::Instant;

    struct Harness {
        identity: Arc<FakeIdentity>,
        backend: Arc<FakeBackend>,
        preferences: Arc<MemoryPreferences>,
        controller: Arc<SessionController>,
    }

    fn harness(identity: FakeIdentity, backend: FakeBackend) -> Harness {
        let identity = Arc::new(identity);
        let backend = Arc::new(backend);
        let preferences = Arc::new(MemoryPreferences::default());
        let controller = Arc::new(SessionController::new(
            identity.clone(),
            backend.clone(),
            preferences.clone(),
        ));
        Harness {
            identity,
            backend,
            preferences,
            controller,
        }
    }

    fn backend_with(results: Vec<PortResult<Profile>>) -> FakeBackend {
        let backend = FakeBackend::default();
        backend.script_verify(results);
        backend
    }

    fn offline() -> PortResult<Profile> {
        Err(PortError::Unexpected("connection refused".to_string()))
    }

    fn not_found() -> PortResult<Profile> {
        Err(PortError::NotFound("/verify-token".to_string()))
    }

    async fn needs_registration() -> Harness {
        let h = harness(FakeIdentity::signed_out(), backend_with(vec![not_found()]));
        h.controller.login().await.unwrap();
        assert_eq!(h.controller.state().phase, SessionPhase::NeedsRegistration);
        h
    }

    #[test]
    fn test_retry_delays_double() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_reaches_authenticated() {
        let h = harness(
            FakeIdentity::signed_out(),
            backend_with(vec![Ok(testing::profile(true))]),
        );
        assert_eq!(h.controller.state().phase, SessionPhase::Anonymous);

        h.controller.login().await.unwrap();

        let state = h.controller.state();
        assert_eq!(state.phase, SessionPhase::Authenticated);
        assert_eq!(state.identity, Some(testing::identity()));
        assert_eq!(state.profile, Some(testing::profile(true)));
        assert_eq!(state.error, None);
        assert!(!state.loading.any());
        assert_eq!(h.backend.verify_calls.load(Ordering::SeqCst), 1);
        assert_eq!(*h.identity.persistence.lock().unwrap(), Some(Persistence::Ephemeral));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_means_registration_on_any_attempt() {
        for failures_before in 0..3 {
            let mut script: Vec<PortResult<Profile>> = (0..failures_before).map(|_| offline()).collect();
            script.push(not_found());
            let h = harness(FakeIdentity::signed_out(), backend_with(script));

            h.controller.login().await.unwrap();

            let state = h.controller.state();
            assert_eq!(state.phase, SessionPhase::NeedsRegistration);
            assert_eq!(state.profile, None);
            assert_eq!(state.error, None);
            assert!(state.identity.is_some());
            assert_eq!(
                h.backend.verify_calls.load(Ordering::SeqCst),
                failures_before + 1
            );
            assert_eq!(h.identity.sign_outs.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregistered_profile_needs_registration() {
        let h = harness(
            FakeIdentity::signed_out(),
            backend_with(vec![Ok(testing::profile(false))]),
        );
        h.controller.login().await.unwrap();

        let state = h.controller.state();
        assert_eq!(state.phase, SessionPhase::NeedsRegistration);
        assert_eq!(state.profile, Some(testing::profile(false)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_failures_force_logout() {
        let h = harness(FakeIdentity::signed_out(), backend_with(vec![]));
        let started = Instant::now();

        h.controller.login().await.unwrap();

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3) && elapsed < Duration::from_secs(4));

        let state = h.controller.state();
        assert_eq!(state.phase, SessionPhase::Error);
        assert_eq!(state.identity, None);
        assert_eq!(state.profile, None);
        assert_eq!(state.error.as_deref(), Some(CONNECTIVITY_ERROR));
        assert!(!state.loading.any());
        assert_eq!(h.backend.verify_calls.load(Ordering::SeqCst), 3);
        assert_eq!(h.identity.sign_outs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_failure_counts_as_attempt() {
        let h = harness(FakeIdentity::signed_out(), backend_with(vec![]));
        *h.identity.token_error.lock().unwrap() =
            Some(PortError::Unexpected("token service down".to_string()));

        h.controller.login().await.unwrap();

        assert_eq!(h.controller.state().phase, SessionPhase::Error);
        assert_eq!(h.backend.verify_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.identity.sign_outs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_during_profile_check() {
        let h = harness(
            FakeIdentity::signed_out(),
            backend_with(vec![offline(), Ok(testing::profile(true))]),
        );

        let login = tokio::spawn({
            let controller = h.controller.clone();
            async move { controller.login().await }
        });
        while h.backend.verify_calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(h.controller.state().phase, SessionPhase::ProfileCheckInProgress);

        h.controller.logout().await;
        login.await.unwrap().unwrap();

        let state = h.controller.state();
        assert_eq!(state.phase, SessionPhase::Anonymous);
        assert!(state.is_signed_out());
        assert_eq!(state.error, None);
        assert_eq!(h.backend.verify_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.identity.sign_outs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_logout_resets_even_when_sign_out_fails() {
        let h = harness(
            FakeIdentity::signed_out(),
            backend_with(vec![Ok(testing::profile(true))]),
        );
        h.controller.login().await.unwrap();
        h.controller.set_error(Some("stale".to_string()));
        h.identity.fail_sign_out.store(true, Ordering::SeqCst);

        h.controller.logout().await;

        let state = h.controller.state();
        assert_eq!(state.phase, SessionPhase::Anonymous);
        assert!(state.is_signed_out());
        assert_eq!(state.error, None);
    }

    #[tokio::test]
    async fn test_sign_in_errors_map_to_messages() {
        let cases = [
            (SignInError::PopupCancelled, "Sign-in was cancelled."),
            (
                SignInError::PopupConflict,
                "Another sign-in is already in progress.",
            ),
            (
                SignInError::NetworkError("offline".to_string()),
                "Network error during sign-in. Please check your connection.",
            ),
            (
                SignInError::Unknown("boom".to_string()),
                "Login failed. Please try again.",
            ),
        ];
        for (err, message) in cases {
            let h = harness(FakeIdentity::signed_out(), FakeBackend::default());
            h.identity.sign_in_results.lock().unwrap().push_back(Err(err));

            h.controller.login().await.unwrap();

            let state = h.controller.state();
            assert_eq!(state.phase, SessionPhase::Error);
            assert_eq!(state.error.as_deref(), Some(message));
            assert!(state.is_signed_out());
        }
    }

    #[tokio::test]
    async fn test_login_retry_after_error_clears_it() {
        let h = harness(
            FakeIdentity::signed_out(),
            backend_with(vec![Ok(testing::profile(true))]),
        );
        h.identity
            .sign_in_results
            .lock()
            .unwrap()
            .push_back(Err(SignInError::PopupCancelled));

        h.controller.login().await.unwrap();
        assert_eq!(h.controller.state().phase, SessionPhase::Error);

        h.controller.login().await.unwrap();
        let state = h.controller.state();
        assert_eq!(state.phase, SessionPhase::Authenticated);
        assert_eq!(state.error, None);
        assert_eq!(h.identity.sign_ins.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_login_refused_when_signed_in() {
        let h = harness(
            FakeIdentity::signed_out(),
            backend_with(vec![Ok(testing::profile(true))]),
        );
        h.controller.login().await.unwrap();

        let err = h.controller.login().await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidState {
                phase: SessionPhase::Authenticated,
                ..
            }
        ));
        assert_eq!(h.identity.sign_ins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remember_me_sets_durable_persistence() {
        let h = harness(
            FakeIdentity::signed_out(),
            backend_with(vec![Ok(testing::profile(true))]),
        );
        h.controller.set_remember_me(true).unwrap();
        assert!(h.preferences.remember_me().unwrap());
        assert!(h.controller.state().remember_me);

        h.controller.login().await.unwrap();
        assert_eq!(*h.identity.persistence.lock().unwrap(), Some(Persistence::Durable));

        h.controller.logout().await;
        assert!(h.controller.state().remember_me);
    }

    #[tokio::test]
    async fn test_startup_identity_is_checked() {
        let h = harness(
            FakeIdentity::signed_in(),
            backend_with(vec![Ok(testing::profile(true))]),
        );
        assert_eq!(h.controller.state().phase, SessionPhase::AuthCheckInProgress);

        let mut states = h.controller.subscribe();
        let state = states
            .wait_for(|s| s.phase == SessionPhase::Authenticated)
            .await
            .unwrap()
            .clone();

        assert_eq!(state.identity, Some(testing::identity()));
        assert_eq!(h.identity.sign_ins.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_provider_sign_out_resets_session() {
        let h = harness(
            FakeIdentity::signed_out(),
            backend_with(vec![Ok(testing::profile(true))]),
        );
        h.controller.login().await.unwrap();
        let mut states = h.controller.subscribe();

        h.identity.publish(None);

        let state = states
            .wait_for(|s| s.phase == SessionPhase::Anonymous)
            .await
            .unwrap()
            .clone();
        assert!(state.is_signed_out());
    }

    #[tokio::test]
    async fn test_listener_stops_when_controller_dropped() {
        let h = harness(FakeIdentity::signed_out(), FakeBackend::default());
        tokio::task::yield_now().await;
        assert_eq!(h.identity.subscribers(), 1);

        drop(h.controller);

        tokio::time::timeout(Duration::from_secs(1), async {
            while h.identity.subscribers() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_registration_success() {
        let h = needs_registration().await;
        *h.backend.register_result.lock().unwrap() = Some(Ok(testing::profile(true)));

        let profile = h
            .controller
            .complete_registration(RegistrationData {
                name: "Ada".to_string(),
                birthdate: "2000-01-01".to_string(),
                interests: vec!["nutrition".to_string()],
            })
            .await
            .unwrap();

        assert_eq!(profile, testing::profile(true));
        let state = h.controller.state();
        assert_eq!(state.phase, SessionPhase::Authenticated);
        assert_eq!(state.profile, Some(profile));
        assert!(!state.loading.registration);

        let registrations = h.backend.registrations.lock().unwrap();
        assert_eq!(registrations.len(), 1);
        assert_eq!(registrations[0].0, testing::identity());
        assert_eq!(registrations[0].1.name, "Ada");
    }

    #[tokio::test]
    async fn test_underage_registration_is_rejected_locally() {
        let h = needs_registration().await;
        let today = Local::now().date_naive().format("%Y-%m-%d").to_string();

        let err = h
            .controller
            .complete_registration(RegistrationData {
                name: "Kid".to_string(),
                birthdate: today,
                interests: vec![],
            })
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "You must be at least 13 years old to register."
        );
        assert_eq!(h.controller.state().phase, SessionPhase::NeedsRegistration);
        assert!(h.backend.registrations.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_server_registration_error_is_returned() {
        let h = needs_registration().await;
        *h.backend.register_result.lock().unwrap() =
            Some(Err(PortError::Validation("Name already taken".to_string())));

        let data = RegistrationData {
            name: "Ada".to_string(),
            birthdate: "2000-01-01".to_string(),
            interests: vec![],
        };
        let err = h.controller.complete_registration(data.clone()).await.unwrap_err();
        assert_eq!(err.to_string(), "Name already taken");

        let state = h.controller.state();
        assert_eq!(state.phase, SessionPhase::NeedsRegistration);
        assert_eq!(state.error, None);
        assert!(!state.loading.registration);

        *h.backend.register_result.lock().unwrap() =
            Some(Err(PortError::Unexpected("HTTP 500".to_string())));
        let err = h.controller.complete_registration(data).await.unwrap_err();
        assert_eq!(err.to_string(), REGISTRATION_FALLBACK);
    }

    #[tokio::test]
    async fn test_registration_refused_outside_needs_registration() {
        let h = harness(FakeIdentity::signed_out(), FakeBackend::default());
        let err = h
            .controller
            .complete_registration(RegistrationData::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_profile_updates_require_authenticated() {
        let h = needs_registration().await;
        assert!(h.controller.update_user_data(testing::profile(true)).is_err());

        let h = harness(
            FakeIdentity::signed_out(),
            backend_with(vec![Ok(testing::profile(true))]),
        );
        h.controller.login().await.unwrap();

        let mut renamed = testing::profile(true);
        renamed.name = "Ada Lovelace".to_string();
        h.controller.update_user_data(renamed.clone()).unwrap();
        assert_eq!(h.controller.state().profile, Some(renamed));
        assert_eq!(h.controller.state().phase, SessionPhase::Authenticated);
    }

    #[tokio::test]
    async fn test_reload_and_save_profile() {
        let h = harness(
            FakeIdentity::signed_out(),
            backend_with(vec![Ok(testing::profile(true))]),
        );
        h.controller.login().await.unwrap();
        *h.backend.stored_profile.lock().unwrap() = Some(testing::profile(true));

        let saved = h
            .controller
            .save_profile(ProfileUpdate {
                interests: Some(vec!["fitness".to_string()]),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(saved.interests, vec!["fitness".to_string()]);
        assert_eq!(h.controller.state().profile, Some(saved.clone()));

        let reloaded = h.controller.reload_profile().await.unwrap();
        assert_eq!(reloaded, saved);
    }

    #[tokio::test]
    async fn test_set_error_is_explicit() {
        let h = harness(FakeIdentity::signed_out(), FakeBackend::default());
        h.controller.set_error(Some("Please sign in again.".to_string()));
        assert_eq!(h.controller.state().error.as_deref(), Some("Please sign in again."));
        h.controller.set_error(None);
        assert_eq!(h.controller.state().error, None);
    }
}
