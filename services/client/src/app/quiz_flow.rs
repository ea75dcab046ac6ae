//! services/client/src/app/quiz_flow.rs
//!
//! Drives one quiz from generation to the final result: generate, fetch,
//! start an attempt, record answers (submitted in the background) and
//! complete the attempt.

use crate::app::session::CONNECTIVITY_ERROR;
use quiz_core::domain::{AnswerFeedback, AttemptHandle, Question, QuizResult};
use quiz_core::ports::{PortError, QuizBackend};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum QuizFlowError {
    #[error("cannot {action} while the quiz is {phase}")]
    InvalidPhase {
        action: &'static str,
        phase: QuizPhase,
    },

    #[error("answer the last question before submitting")]
    SubmitUnavailable,

    #[error(transparent)]
    Port(#[from] PortError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuizPhase {
    Generating,
    Fetching,
    /// Questions are loaded; waiting for the user to start.
    Ready,
    Starting,
    InProgress,
    Completing,
    Completed,
    /// Terminal. Holds the message shown to the user.
    Failed(String),
}

impl fmt::Display for QuizPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuizPhase::Generating => f.write_str("generating"),
            QuizPhase::Fetching => f.write_str("fetching"),
            QuizPhase::Ready => f.write_str("ready"),
            QuizPhase::Starting => f.write_str("starting"),
            QuizPhase::InProgress => f.write_str("in progress"),
            QuizPhase::Completing => f.write_str("completing"),
            QuizPhase::Completed => f.write_str("completed"),
            QuizPhase::Failed(message) => write!(f, "failed ({})", message),
        }
    }
}

type PendingSubmission = (usize, JoinHandle<Option<AnswerFeedback>>);

pub struct QuizFlow {
    backend: Arc<dyn QuizBackend>,
    topic: String,
    phase: QuizPhase,
    quiz_id: Option<String>,
    questions: Vec<Question>,
    attempt: Option<AttemptHandle>,
    answers: Vec<Option<String>>,
    feedback: Vec<Option<AnswerFeedback>>,
    pending: Vec<PendingSubmission>,
    current: usize,
    result: Option<QuizResult>,
}

impl QuizFlow {
    pub fn new(backend: Arc<dyn QuizBackend>, topic: impl Into<String>) -> Self {
        Self {
            backend,
            topic: topic.into(),
            phase: QuizPhase::Generating,
            quiz_id: None,
            questions: Vec::new(),
            attempt: None,
            answers: Vec::new(),
            feedback: Vec::new(),
            pending: Vec::new(),
            current: 0,
            result: None,
        }
    }

    /// Generates and fetches a quiz for `topic`. The returned flow is either
    /// `Ready` or `Failed`.
    pub async fn load(
        backend: Arc<dyn QuizBackend>,
        topic: impl Into<String>,
        num_questions: u32,
    ) -> Self {
        let mut flow = Self::new(backend, topic);
        if let Err(e) = flow.prepare(num_questions).await {
            debug!("Quiz preparation stopped: {}", e);
        }
        flow
    }

    /// Runs the generate and fetch steps. Neither is retried.
    pub async fn prepare(&mut self, num_questions: u32) -> Result<(), QuizFlowError> {
        self.require(QuizPhase::Generating, "generate a quiz")?;

        let quiz_id = match self.backend.generate_quiz(&self.topic, num_questions).await {
            Ok(id) => id,
            Err(e) => return Err(self.fail("generate quiz", e)),
        };
        info!("Generated quiz {} on '{}'", quiz_id, self.topic);
        self.quiz_id = Some(quiz_id.clone());
        self.phase = QuizPhase::Fetching;

        let questions = match self.backend.fetch_quiz(&quiz_id).await {
            Ok(questions) => questions,
            Err(e) => return Err(self.fail("fetch quiz", e)),
        };
        if questions.is_empty() {
            return Err(self.fail(
                "fetch quiz",
                PortError::Unexpected(format!("quiz {} has no questions", quiz_id)),
            ));
        }

        self.answers = vec![None; questions.len()];
        self.feedback = vec![None; questions.len()];
        self.questions = questions;
        self.current = 0;
        self.phase = QuizPhase::Ready;
        Ok(())
    }

    /// Starts an attempt on the loaded quiz.
    pub async fn start(&mut self) -> Result<&AttemptHandle, QuizFlowError> {
        self.require(QuizPhase::Ready, "start")?;
        let Some(quiz_id) = self.quiz_id.clone() else {
            return Err(self.fail(
                "start quiz",
                PortError::Unexpected("no quiz loaded".to_string()),
            ));
        };

        self.phase = QuizPhase::Starting;
        match self.backend.start_quiz(&quiz_id).await {
            Ok(handle) => {
                info!(
                    "Started attempt {} on quiz {} ({})",
                    handle.attempt_id, quiz_id, handle.status
                );
                self.phase = QuizPhase::InProgress;
                Ok(self.attempt.insert(handle))
            }
            Err(e) => Err(self.fail("start quiz", e)),
        }
    }

    /// Records `answer` for the current question and submits it in the
    /// background. Returns `false` if the question was already answered;
    /// recorded answers never change.
    pub fn submit_answer(&mut self, answer: impl Into<String>) -> Result<bool, QuizFlowError> {
        self.require(QuizPhase::InProgress, "answer")?;
        let index = self.current;
        let (Some(slot), Some(question), Some(attempt)) = (
            self.answers.get_mut(index),
            self.questions.get(index),
            self.attempt.as_ref(),
        ) else {
            return Ok(false);
        };
        if slot.is_some() {
            debug!("Question {} already answered", question.question_id);
            return Ok(false);
        }

        let answer = answer.into();
        *slot = Some(answer.clone());

        let backend = self.backend.clone();
        let attempt_id = attempt.attempt_id.clone();
        let question_id = question.question_id.clone();
        let handle = tokio::spawn(async move {
            match backend
                .submit_answer(&attempt_id, &question_id, &answer)
                .await
            {
                Ok(feedback) => Some(feedback),
                Err(e) => {
                    warn!("Failed to submit answer for question {}: {}", question_id, e);
                    None
                }
            }
        });
        self.pending.push((index, handle));
        Ok(true)
    }

    /// Waits for every background submission and collects its feedback.
    pub async fn settle(&mut self) {
        for (index, handle) in std::mem::take(&mut self.pending) {
            match handle.await {
                Ok(Some(feedback)) => {
                    if let Some(slot) = self.feedback.get_mut(index) {
                        *slot = Some(feedback);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Answer submission task failed: {}", e),
            }
        }
    }

    /// Finalizes the attempt once every pending answer has reached the server.
    pub async fn complete(&mut self) -> Result<&QuizResult, QuizFlowError> {
        self.require(QuizPhase::InProgress, "submit")?;
        if !self.can_submit() {
            return Err(QuizFlowError::SubmitUnavailable);
        }
        let Some(attempt_id) = self.attempt.as_ref().map(|a| a.attempt_id.clone()) else {
            return Err(self.fail(
                "complete quiz",
                PortError::Unexpected("no active attempt".to_string()),
            ));
        };

        self.phase = QuizPhase::Completing;
        self.settle().await;

        match self.backend.complete_quiz(&attempt_id).await {
            Ok(result) => {
                info!("Completed attempt {}: {}", attempt_id, result.summary());
                self.phase = QuizPhase::Completed;
                Ok(self.result.insert(result))
            }
            Err(e) => Err(self.fail("complete quiz", e)),
        }
    }

    //=====================================================================================
    // Navigation
    //=====================================================================================

    pub fn next(&mut self) -> bool {
        if self.is_last_question() {
            return false;
        }
        self.current += 1;
        true
    }

    pub fn previous(&mut self) -> bool {
        if self.current == 0 {
            return false;
        }
        self.current -= 1;
        true
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current_question(&self) -> Option<&Question> {
        self.questions.get(self.current)
    }

    pub fn is_last_question(&self) -> bool {
        self.current + 1 >= self.questions.len()
    }

    /// "Submit" replaces "next" on the last question and stays disabled
    /// until that question is answered.
    pub fn can_submit(&self) -> bool {
        self.phase == QuizPhase::InProgress
            && self.is_last_question()
            && matches!(self.answers.get(self.current), Some(Some(_)))
    }

    //=====================================================================================
    // Accessors
    //=====================================================================================

    pub fn phase(&self) -> &QuizPhase {
        &self.phase
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn quiz_id(&self) -> Option<&str> {
        self.quiz_id.as_deref()
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn attempt(&self) -> Option<&AttemptHandle> {
        self.attempt.as_ref()
    }

    pub fn answer(&self, index: usize) -> Option<&str> {
        self.answers.get(index)?.as_deref()
    }

    pub fn feedback(&self, index: usize) -> Option<&AnswerFeedback> {
        self.feedback.get(index)?.as_ref()
    }

    pub fn result(&self) -> Option<&QuizResult> {
        self.result.as_ref()
    }

    fn require(&self, expected: QuizPhase, action: &'static str) -> Result<(), QuizFlowError> {
        if self.phase != expected {
            return Err(QuizFlowError::InvalidPhase {
                action,
                phase: self.phase.clone(),
            });
        }
        Ok(())
    }

    fn fail(&mut self, step: &str, e: PortError) -> QuizFlowError {
        error!("Failed to {} on '{}': {}", step, self.topic, e);
        self.phase = QuizPhase::Failed(CONNECTIVITY_ERROR.to_string());
        QuizFlowError::Port(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBackend;
    use std::sync::atomic::Ordering;

    fn question(n: usize) -> Question {
        Question {
            question_id: format!("qq{}", n),
            prompt: format!("Question {}?", n),
            options: vec!["A".to_string(), "B".to_string(), "C".to_string()],
            correct_answer: "A".to_string(),
            explanation: Some(format!("Because {}", n)),
            learning_point: None,
        }
    }

    fn quiz_backend(count: usize) -> Arc<FakeBackend> {
        let backend = FakeBackend::default();
        *backend.generate_result.lock().unwrap() = Some(Ok("q1".to_string()));
        *backend.questions.lock().unwrap() = Some(Ok((1..=count).map(question).collect()));
        *backend.start_result.lock().unwrap() = Some(Ok(AttemptHandle {
            attempt_id: "a1".to_string(),
            status: "in_progress".to_string(),
        }));
        Arc::new(backend)
    }

    async fn started(backend: &Arc<FakeBackend>) -> QuizFlow {
        let mut flow = QuizFlow::load(backend.clone(), "Pregnancy", 5).await;
        assert_eq!(flow.phase(), &QuizPhase::Ready);
        flow.start().await.unwrap();
        flow
    }

    #[tokio::test]
    async fn test_pregnancy_quiz_end_to_end() {
        let backend = quiz_backend(5);
        let mut flow = QuizFlow::load(backend.clone(), "Pregnancy", 5).await;
        assert_eq!(flow.quiz_id(), Some("q1"));
        assert_eq!(flow.questions().len(), 5);

        let attempt = flow.start().await.unwrap();
        assert_eq!(attempt.attempt_id, "a1");
        assert_eq!(attempt.status, "in_progress");

        for answer in ["A", "B", "A", "C", "A"] {
            assert!(flow.submit_answer(answer).unwrap());
            flow.next();
        }
        assert!(flow.can_submit());

        let result = flow.complete().await.unwrap().clone();
        assert_eq!(result.status, "completed");
        assert_eq!(result.correct_answers, 3);
        assert_eq!(result.total_questions, 5);
        assert_eq!(result.summary(), "60%. 3 out of 5.");
        assert_eq!(flow.phase(), &QuizPhase::Completed);

        let submissions = backend.submissions.lock().unwrap();
        assert_eq!(submissions.len(), 5);
        assert!(submissions.iter().all(|(attempt, _, _)| attempt == "a1"));
        assert_eq!(*backend.completions.lock().unwrap(), vec!["a1".to_string()]);
        assert!(flow.feedback(0).unwrap().is_correct);
        assert!(!flow.feedback(1).unwrap().is_correct);
    }

    #[tokio::test]
    async fn test_answers_are_immutable() {
        let backend = quiz_backend(2);
        let mut flow = started(&backend).await;

        assert!(flow.submit_answer("B").unwrap());
        assert!(!flow.submit_answer("A").unwrap());
        flow.settle().await;

        assert_eq!(flow.answer(0), Some("B"));
        assert_eq!(backend.submissions.lock().unwrap().len(), 1);

        flow.next();
        flow.previous();
        assert!(!flow.submit_answer("C").unwrap());
        assert_eq!(flow.answer(0), Some("B"));
    }

    #[tokio::test]
    async fn test_submit_requires_answer_on_last_question() {
        let backend = quiz_backend(2);
        let mut flow = started(&backend).await;

        assert!(!flow.can_submit());
        assert!(!flow.previous());
        assert!(flow.next());
        assert!(flow.is_last_question());
        assert!(!flow.next());
        assert!(!flow.can_submit());
        assert!(matches!(
            flow.complete().await,
            Err(QuizFlowError::SubmitUnavailable)
        ));
        assert_eq!(flow.phase(), &QuizPhase::InProgress);

        flow.submit_answer("A").unwrap();
        assert!(flow.can_submit());
        let result = flow.complete().await.unwrap();
        assert_eq!(result.correct_answers, 1);
    }

    #[tokio::test]
    async fn test_failed_submissions_do_not_block() {
        let backend = quiz_backend(1);
        backend.fail_submissions.store(true, Ordering::SeqCst);
        let mut flow = started(&backend).await;

        assert!(flow.submit_answer("A").unwrap());
        flow.settle().await;
        assert_eq!(flow.feedback(0), None);
        assert_eq!(flow.answer(0), Some("A"));

        assert!(flow.complete().await.is_ok());
        assert_eq!(flow.phase(), &QuizPhase::Completed);
    }

    #[tokio::test]
    async fn test_generate_failure_is_terminal() {
        let backend = Arc::new(FakeBackend::default());
        let mut flow = QuizFlow::load(backend, "Pregnancy", 5).await;

        assert_eq!(
            flow.phase(),
            &QuizPhase::Failed(CONNECTIVITY_ERROR.to_string())
        );
        assert!(flow.quiz_id().is_none());
        assert!(matches!(
            flow.start().await,
            Err(QuizFlowError::InvalidPhase { .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_failure_is_terminal() {
        let backend = FakeBackend::default();
        *backend.generate_result.lock().unwrap() = Some(Ok("q1".to_string()));
        let mut flow = QuizFlow::new(Arc::new(backend), "Pregnancy");

        assert!(flow.prepare(5).await.is_err());
        assert_eq!(
            flow.phase(),
            &QuizPhase::Failed(CONNECTIVITY_ERROR.to_string())
        );
        assert_eq!(flow.quiz_id(), Some("q1"));
        assert!(flow.questions().is_empty());
    }

    #[tokio::test]
    async fn test_answering_before_start_is_refused() {
        let backend = quiz_backend(1);
        let mut flow = QuizFlow::load(backend, "Pregnancy", 1).await;
        assert!(matches!(
            flow.submit_answer("A"),
            Err(QuizFlowError::InvalidPhase { .. })
        ));
    }
}
