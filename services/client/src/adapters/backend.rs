//! services/client/src/adapters/backend.rs
//!
//! This module contains the remote API adapter, the concrete implementation of
//! the `QuizBackend` port from the core crate. Server payloads are loosely
//! shaped; every response is parsed into a record struct here and validated
//! into the strict domain type before it leaves the adapter.

use crate::adapters::http::{ApiClient, Auth};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use quiz_core::domain::{
    age_on, AgeGroup, AnswerFeedback, AttemptHandle, DifficultyLevel, Identity, Profile,
    ProfileUpdate, Question, QuizResult, Registration, Topic, MAX_INTERESTS,
};
use quiz_core::ports::{PortError, PortResult, QuizBackend};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `QuizBackend` port over the JSON API.
pub struct HttpBackend {
    api: ApiClient,
}

impl HttpBackend {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

//=========================================================================================
// Wire Records
//=========================================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileRecord {
    #[serde(alias = "uid")]
    id: Option<String>,
    email: Option<String>,
    #[serde(alias = "username")]
    name: Option<String>,
    birthdate: Option<String>,
    interests: Option<Vec<String>>,
    #[serde(alias = "age_group")]
    age_group: Option<String>,
    #[serde(alias = "difficulty_level", alias = "difficulty")]
    difficulty_level: Option<String>,
    #[serde(alias = "quiz_score_average", alias = "averageScore", alias = "average_score")]
    quiz_score_average: Option<f64>,
    #[serde(alias = "is_registered")]
    is_registered: Option<bool>,
}

impl ProfileRecord {
    fn to_domain(self, today: NaiveDate) -> PortResult<Profile> {
        let id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| PortError::Unexpected("profile payload has no id".to_string()))?;

        let birthdate = self.birthdate.as_deref().and_then(|raw| {
            let parsed = parse_date(raw);
            if parsed.is_none() && !raw.trim().is_empty() {
                warn!("Profile {} has an unreadable birthdate '{}'", id, raw);
            }
            parsed
        });

        let age_group = self
            .age_group
            .as_deref()
            .and_then(AgeGroup::parse)
            .or_else(|| {
                birthdate
                    .and_then(|b| age_on(b, today))
                    .and_then(AgeGroup::from_age)
            });

        let mut interests = self.interests.unwrap_or_default();
        if interests.len() > MAX_INTERESTS {
            warn!(
                "Profile {} has {} interests, keeping the first {}",
                id,
                interests.len(),
                MAX_INTERESTS
            );
            interests.truncate(MAX_INTERESTS);
        }

        Ok(Profile {
            id,
            email: self.email.unwrap_or_default(),
            name: self.name.unwrap_or_default(),
            birthdate,
            interests,
            age_group,
            difficulty: self.difficulty_level.as_deref().and_then(DifficultyLevel::parse),
            quiz_score_average: self.quiz_score_average,
            is_registered: self.is_registered.unwrap_or(true),
        })
    }
}

/// Accepts `YYYY-MM-DD` as well as full timestamps.
fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| raw.get(..10).and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()))
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VerifyResponse {
    Wrapped { user: ProfileRecord },
    Bare(ProfileRecord),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GenerateResponse {
    Id(String),
    Object {
        #[serde(alias = "quizId")]
        quiz_id: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuestionRecord {
    #[serde(alias = "question_id", alias = "id")]
    question_id: Option<Value>,
    #[serde(alias = "question")]
    prompt: String,
    options: Vec<String>,
    #[serde(alias = "correct_answer")]
    correct_answer: String,
    explanation: Option<String>,
    #[serde(alias = "learning_point")]
    learning_point: Option<String>,
}

impl QuestionRecord {
    fn to_domain(self, position: usize) -> PortResult<Question> {
        if self.options.is_empty() {
            return Err(PortError::Unexpected(format!(
                "question {} has no options",
                position
            )));
        }
        let question_id = match self.question_id {
            Some(Value::String(id)) => id,
            Some(Value::Number(id)) => id.to_string(),
            _ => position.to_string(),
        };
        Ok(Question {
            question_id,
            prompt: self.prompt,
            options: self.options,
            correct_answer: self.correct_answer,
            explanation: self.explanation,
            learning_point: self.learning_point,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum QuizResponse {
    List(Vec<QuestionRecord>),
    Wrapped { questions: Vec<QuestionRecord> },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttemptRecord {
    #[serde(alias = "attempt_id")]
    attempt_id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeedbackRecord {
    #[serde(alias = "is_correct")]
    is_correct: bool,
    #[serde(alias = "correct_answer")]
    correct_answer: String,
    explanation: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResultRecord {
    status: String,
    score: f64,
    #[serde(alias = "correctAnswers")]
    correct_answers: u32,
    #[serde(alias = "totalQuestions")]
    total_questions: u32,
}

impl ResultRecord {
    fn to_domain(self) -> PortResult<QuizResult> {
        if self.correct_answers > self.total_questions || !(0.0..=100.0).contains(&self.score) {
            return Err(PortError::Unexpected(format!(
                "inconsistent quiz result: score {} with {}/{}",
                self.score, self.correct_answers, self.total_questions
            )));
        }
        Ok(QuizResult {
            status: self.status,
            score: self.score,
            correct_answers: self.correct_answers,
            total_questions: self.total_questions,
        })
    }
}

//=========================================================================================
// Request Payloads
//=========================================================================================

#[derive(Serialize)]
struct VerifyTokenRequest<'a> {
    token: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest<'a> {
    name: &'a str,
    birthdate: String,
    interests: &'a [String],
    id: &'a str,
    email: &'a str,
    is_registered: bool,
}

#[derive(Serialize)]
struct ProfileUpdateRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    birthdate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    interests: Option<&'a [String]>,
}

#[derive(Serialize)]
struct GenerateQuizRequest<'a> {
    topic: &'a str,
    num_questions: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AttemptRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    quiz_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    attempt_id: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitAnswerRequest<'a> {
    attempt_id: &'a str,
    question_id: &'a str,
    answer: &'a str,
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

//=========================================================================================
// `QuizBackend` Trait Implementation
//=========================================================================================

#[async_trait]
impl QuizBackend for HttpBackend {
    async fn verify_token(&self, token: &str) -> PortResult<Profile> {
        let response: VerifyResponse = self
            .api
            .request(
                Method::POST,
                "/verify-token",
                Some(&VerifyTokenRequest { token }),
                Auth::Anonymous,
            )
            .await?;
        let record = match response {
            VerifyResponse::Wrapped { user } => user,
            VerifyResponse::Bare(record) => record,
        };
        record.to_domain(today())
    }

    async fn register(
        &self,
        identity: &Identity,
        registration: &Registration,
    ) -> PortResult<Profile> {
        let body = RegisterRequest {
            name: &registration.name,
            birthdate: registration.birthdate.format("%Y-%m-%d").to_string(),
            interests: &registration.interests,
            id: &identity.uid,
            email: identity.email.as_deref().unwrap_or_default(),
            is_registered: true,
        };
        let record: ProfileRecord = self
            .api
            .request(Method::POST, "/register", Some(&body), Auth::Anonymous)
            .await?;
        record.to_domain(today())
    }

    async fn get_profile(&self) -> PortResult<Profile> {
        let record: ProfileRecord = self.api.get("/profile").await?;
        record.to_domain(today())
    }

    async fn update_profile(&self, update: &ProfileUpdate) -> PortResult<Profile> {
        let body = ProfileUpdateRequest {
            name: update.name.as_deref(),
            birthdate: update.birthdate.map(|d| d.format("%Y-%m-%d").to_string()),
            interests: update.interests.as_deref(),
        };
        let record: ProfileRecord = self.api.put("/profile", &body).await?;
        record.to_domain(today())
    }

    async fn list_interests(&self) -> PortResult<Vec<String>> {
        self.api.get("/interests").await
    }

    async fn list_topics(&self) -> PortResult<Vec<Topic>> {
        let titles: Vec<String> = self.api.get("/topics").await?;
        Ok(titles.into_iter().map(Topic::from_title).collect())
    }

    async fn generate_quiz(&self, topic: &str, num_questions: u32) -> PortResult<String> {
        let response: GenerateResponse = self
            .api
            .post(
                "/generate_quiz",
                &GenerateQuizRequest {
                    topic,
                    num_questions,
                },
            )
            .await?;
        let quiz_id = match response {
            GenerateResponse::Id(id) => id,
            GenerateResponse::Object { quiz_id } => quiz_id,
        };
        debug!("Generated quiz {} for topic '{}'", quiz_id, topic);
        Ok(quiz_id)
    }

    async fn fetch_quiz(&self, quiz_id: &str) -> PortResult<Vec<Question>> {
        let response: QuizResponse = self.api.get(&format!("/quiz/{}", quiz_id)).await?;
        let records = match response {
            QuizResponse::List(records) => records,
            QuizResponse::Wrapped { questions } => questions,
        };
        if records.is_empty() {
            return Err(PortError::Unexpected(format!("quiz {} has no questions", quiz_id)));
        }
        records
            .into_iter()
            .enumerate()
            .map(|(position, record)| record.to_domain(position))
            .collect()
    }

    async fn start_quiz(&self, quiz_id: &str) -> PortResult<AttemptHandle> {
        let record: AttemptRecord = self
            .api
            .post(
                "/quiz/start",
                &AttemptRequest {
                    quiz_id: Some(quiz_id),
                    attempt_id: None,
                },
            )
            .await?;
        Ok(AttemptHandle {
            attempt_id: record.attempt_id,
            status: record.status,
        })
    }

    async fn submit_answer(
        &self,
        attempt_id: &str,
        question_id: &str,
        answer: &str,
    ) -> PortResult<AnswerFeedback> {
        let record: FeedbackRecord = self
            .api
            .post(
                "/quiz/submit-answer",
                &SubmitAnswerRequest {
                    attempt_id,
                    question_id,
                    answer,
                },
            )
            .await?;
        Ok(AnswerFeedback {
            is_correct: record.is_correct,
            correct_answer: record.correct_answer,
            explanation: record.explanation,
        })
    }

    async fn complete_quiz(&self, attempt_id: &str) -> PortResult<QuizResult> {
        let record: ResultRecord = self
            .api
            .post(
                "/quiz/complete",
                &AttemptRequest {
                    quiz_id: None,
                    attempt_id: Some(attempt_id),
                },
            )
            .await?;
        record.to_domain()
    }
}
