//! In-memory implementations of the core ports, shared by the unit tests.

use async_trait::async_trait;
use quiz_core::domain::{
    AnswerFeedback, AttemptHandle, Identity, Profile, ProfileUpdate, Question, QuizResult,
    Registration, Topic,
};
use quiz_core::ports::{
    IdentityProvider, Persistence, PortError, PortResult, PreferenceStore, QuizBackend,
    SignInError,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::watch;

pub(crate) fn identity() -> Identity {
    Identity {
        uid: "uid-1".to_string(),
        email: Some("ada@example.com".to_string()),
        display_name: Some("Ada".to_string()),
    }
}

pub(crate) fn profile(is_registered: bool) -> Profile {
    Profile {
        id: "uid-1".to_string(),
        email: "ada@example.com".to_string(),
        name: "Ada".to_string(),
        birthdate: None,
        interests: vec!["nutrition".to_string()],
        age_group: None,
        difficulty: None,
        quiz_score_average: None,
        is_registered,
    }
}

//=========================================================================================
// Identity provider
//=========================================================================================

pub(crate) struct FakeIdentity {
    current: watch::Sender<Option<Identity>>,
    token: Mutex<String>,
    pub sign_in_results: Mutex<VecDeque<Result<Identity, SignInError>>>,
    pub refresh_error: Mutex<Option<PortError>>,
    pub token_error: Mutex<Option<PortError>>,
    pub forced_refreshes: AtomicUsize,
    pub sign_ins: AtomicUsize,
    pub sign_outs: AtomicUsize,
    pub fail_sign_out: AtomicBool,
    pub persistence: Mutex<Option<Persistence>>,
}

impl FakeIdentity {
    fn with_identity(identity: Option<Identity>) -> Self {
        let (current, _) = watch::channel(identity);
        Self {
            current,
            token: Mutex::new("stale".to_string()),
            sign_in_results: Mutex::new(VecDeque::new()),
            refresh_error: Mutex::new(None),
            token_error: Mutex::new(None),
            forced_refreshes: AtomicUsize::new(0),
            sign_ins: AtomicUsize::new(0),
            sign_outs: AtomicUsize::new(0),
            fail_sign_out: AtomicBool::new(false),
            persistence: Mutex::new(None),
        }
    }

    pub fn signed_in() -> Self {
        Self::with_identity(Some(identity()))
    }

    pub fn signed_out() -> Self {
        Self::with_identity(None)
    }

    /// Simulates a provider-side change (sign-in elsewhere, expiry).
    pub fn publish(&self, identity: Option<Identity>) {
        self.current.send_replace(identity);
    }

    /// Number of live identity subscriptions.
    pub fn subscribers(&self) -> usize {
        self.current.receiver_count()
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn sign_in(&self) -> Result<Identity, SignInError> {
        self.sign_ins.fetch_add(1, Ordering::SeqCst);
        let result = self
            .sign_in_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(identity()));
        if let Ok(identity) = &result {
            self.current.send_replace(Some(identity.clone()));
        }
        result
    }

    async fn sign_out(&self) -> PortResult<()> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("sign-out failed".to_string()));
        }
        self.current.send_replace(None);
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.current.subscribe()
    }

    fn current_identity(&self) -> Option<Identity> {
        self.current.borrow().clone()
    }

    async fn fresh_token(&self, force_refresh: bool) -> PortResult<String> {
        if let Some(err) = self.token_error.lock().unwrap().clone() {
            return Err(err);
        }
        if force_refresh {
            self.forced_refreshes.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.refresh_error.lock().unwrap().clone() {
                return Err(err);
            }
            *self.token.lock().unwrap() = "fresh".to_string();
        }
        Ok(self.token.lock().unwrap().clone())
    }

    fn set_persistence(&self, persistence: Persistence) -> PortResult<()> {
        *self.persistence.lock().unwrap() = Some(persistence);
        Ok(())
    }
}

//=========================================================================================
// Preferences
//=========================================================================================

#[derive(Default)]
pub(crate) struct MemoryPreferences {
    remember_me: AtomicBool,
}

impl PreferenceStore for MemoryPreferences {
    fn remember_me(&self) -> PortResult<bool> {
        Ok(self.remember_me.load(Ordering::SeqCst))
    }

    fn set_remember_me(&self, remember_me: bool) -> PortResult<()> {
        self.remember_me.store(remember_me, Ordering::SeqCst);
        Ok(())
    }
}

//=========================================================================================
// Backend
//=========================================================================================

/// A scripted backend. Verification results are consumed in order; once the
/// script runs out every call fails with a connectivity error.
#[derive(Default)]
pub(crate) struct FakeBackend {
    pub verify_results: Mutex<VecDeque<PortResult<Profile>>>,
    pub verify_calls: AtomicUsize,
    pub register_result: Mutex<Option<PortResult<Profile>>>,
    pub registrations: Mutex<Vec<(Identity, Registration)>>,
    pub stored_profile: Mutex<Option<Profile>>,
    pub generate_result: Mutex<Option<PortResult<String>>>,
    pub questions: Mutex<Option<PortResult<Vec<Question>>>>,
    pub start_result: Mutex<Option<PortResult<AttemptHandle>>>,
    pub submissions: Mutex<Vec<(String, String, String)>>,
    pub fail_submissions: AtomicBool,
    pub completions: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn script_verify(&self, results: Vec<PortResult<Profile>>) {
        *self.verify_results.lock().unwrap() = results.into();
    }

    fn questions_snapshot(&self) -> Vec<Question> {
        match self.questions.lock().unwrap().as_ref() {
            Some(Ok(questions)) => questions.clone(),
            _ => Vec::new(),
        }
    }
}

fn offline<T>() -> PortResult<T> {
    Err(PortError::Unexpected("connection refused".to_string()))
}

#[async_trait]
impl QuizBackend for FakeBackend {
    async fn verify_token(&self, _token: &str) -> PortResult<Profile> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        self.verify_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(offline)
    }

    async fn register(
        &self,
        identity: &Identity,
        registration: &Registration,
    ) -> PortResult<Profile> {
        self.registrations
            .lock()
            .unwrap()
            .push((identity.clone(), registration.clone()));
        self.register_result
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(offline)
    }

    async fn get_profile(&self) -> PortResult<Profile> {
        self.stored_profile
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| PortError::NotFound("/profile".to_string()))
    }

    async fn update_profile(&self, update: &ProfileUpdate) -> PortResult<Profile> {
        let mut stored = self.stored_profile.lock().unwrap();
        let profile = stored
            .as_mut()
            .ok_or_else(|| PortError::NotFound("/profile".to_string()))?;
        if let Some(name) = &update.name {
            profile.name = name.clone();
        }
        if let Some(interests) = &update.interests {
            profile.interests = interests.clone();
        }
        if update.birthdate.is_some() {
            profile.birthdate = update.birthdate;
        }
        Ok(profile.clone())
    }

    async fn list_interests(&self) -> PortResult<Vec<String>> {
        Ok(vec!["nutrition".to_string(), "fitness".to_string()])
    }

    async fn list_topics(&self) -> PortResult<Vec<Topic>> {
        Ok(vec![Topic::from_title("Pregnancy")])
    }

    async fn generate_quiz(&self, _topic: &str, _num_questions: u32) -> PortResult<String> {
        self.generate_result
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(offline)
    }

    async fn fetch_quiz(&self, _quiz_id: &str) -> PortResult<Vec<Question>> {
        self.questions.lock().unwrap().clone().unwrap_or_else(offline)
    }

    async fn start_quiz(&self, _quiz_id: &str) -> PortResult<AttemptHandle> {
        self.start_result
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(offline)
    }

    async fn submit_answer(
        &self,
        attempt_id: &str,
        question_id: &str,
        answer: &str,
    ) -> PortResult<AnswerFeedback> {
        self.submissions.lock().unwrap().push((
            attempt_id.to_string(),
            question_id.to_string(),
            answer.to_string(),
        ));
        if self.fail_submissions.load(Ordering::SeqCst) {
            return offline();
        }
        let question = self
            .questions_snapshot()
            .into_iter()
            .find(|q| q.question_id == question_id)
            .ok_or_else(|| PortError::NotFound(question_id.to_string()))?;
        Ok(AnswerFeedback {
            is_correct: question.correct_answer == answer,
            correct_answer: question.correct_answer,
            explanation: question.explanation,
        })
    }

    async fn complete_quiz(&self, attempt_id: &str) -> PortResult<QuizResult> {
        self.completions.lock().unwrap().push(attempt_id.to_string());
        let questions = self.questions_snapshot();
        let submissions = self.submissions.lock().unwrap().clone();
        let correct = questions
            .iter()
            .filter(|q| {
                submissions
                    .iter()
                    .any(|(a, qid, answer)| a == attempt_id && *qid == q.question_id && *answer == q.correct_answer)
            })
            .count() as u32;
        let total = questions.len() as u32;
        Ok(QuizResult {
            status: "completed".to_string(),
            score: if total == 0 {
                0.0
            } else {
                f64::from(correct) * 100.0 / f64::from(total)
            },
            correct_answers: correct,
            total_questions: total,
        })
    }
}
