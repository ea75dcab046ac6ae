//! crates/quiz_core/src/domain.rs
//!
//! Defines the pure, core data structures for the quiz client.
//! These structs are independent of any transport or serialization format;
//! the adapters parse server payloads into them at the boundary.

use chrono::{Datelike, NaiveDate};
use std::fmt;

/// Minimum age, in whole years, required to register.
pub const MIN_REGISTRATION_AGE: u32 = 13;

/// Maximum number of interest tags a profile may carry.
pub const MAX_INTERESTS: usize = 3;

//=========================================================================================
// Identity and Profile
//=========================================================================================

/// The authenticated principal reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

/// Age bands used by the content generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeGroup {
    Teen,
    YoungAdult,
    Adult,
    Mature,
}

impl AgeGroup {
    /// Returns the band for an age in years, or `None` below the registration minimum.
    pub fn from_age(age: u32) -> Option<Self> {
        match age {
            0..=12 => None,
            13..=19 => Some(Self::Teen),
            20..=35 => Some(Self::YoungAdult),
            36..=50 => Some(Self::Adult),
            _ => Some(Self::Mature),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Teen => "13-19",
            Self::YoungAdult => "20-35",
            Self::Adult => "36-50",
            Self::Mature => "50+",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "13-19" | "teen" => Some(Self::Teen),
            "20-35" | "young_adult" => Some(Self::YoungAdult),
            "36-50" | "adult" => Some(Self::Adult),
            "50+" | "mature" => Some(Self::Mature),
            _ => None,
        }
    }
}

impl fmt::Display for AgeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DifficultyLevel {
    Beginner,
    Intermediate,
    Advanced,
}

impl DifficultyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "beginner" => Some(Self::Beginner),
            "intermediate" => Some(Self::Intermediate),
            "advanced" => Some(Self::Advanced),
            _ => None,
        }
    }
}

impl fmt::Display for DifficultyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The application-level user record kept by the server.
///
/// The client only ever holds a cached copy, which may be stale.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub id: String,
    pub email: String,
    pub name: String,
    pub birthdate: Option<NaiveDate>,
    pub interests: Vec<String>,
    pub age_group: Option<AgeGroup>,
    pub difficulty: Option<DifficultyLevel>,
    /// Average of the user's historical quiz scores, as a percentage.
    pub quiz_score_average: Option<f64>,
    pub is_registered: bool,
}

/// Partial profile edit sent to the server. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub birthdate: Option<NaiveDate>,
    pub interests: Option<Vec<String>>,
}

//=========================================================================================
// Registration
//=========================================================================================

/// Errors raised by client-side registration validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    #[error("Please enter your name.")]
    EmptyName,
    #[error("Please enter a valid birth date (YYYY-MM-DD).")]
    InvalidBirthdate(String),
    #[error("You must be at least 13 years old to register.")]
    TooYoung,
    #[error("You can select at most 3 interests.")]
    TooManyInterests(usize),
}

/// Raw registration form input, as typed by the user.
#[derive(Debug, Clone, Default)]
pub struct RegistrationData {
    pub name: String,
    pub birthdate: String,
    pub interests: Vec<String>,
}

/// Registration data that passed client-side validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub name: String,
    pub birthdate: NaiveDate,
    pub interests: Vec<String>,
}

impl RegistrationData {
    /// Validates the form against `today`, producing a `Registration`.
    pub fn validate(self, today: NaiveDate) -> Result<Registration, RegistrationError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(RegistrationError::EmptyName);
        }

        let raw = self.birthdate.trim();
        let birthdate = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|_| RegistrationError::InvalidBirthdate(raw.to_string()))?;

        match age_on(birthdate, today) {
            Some(age) if age >= MIN_REGISTRATION_AGE => {}
            _ => return Err(RegistrationError::TooYoung),
        }

        if self.interests.len() > MAX_INTERESTS {
            return Err(RegistrationError::TooManyInterests(self.interests.len()));
        }

        Ok(Registration {
            name,
            birthdate,
            interests: self.interests,
        })
    }
}

/// Age in completed years on `today`; `None` if the birthdate lies in the future.
pub fn age_on(birthdate: NaiveDate, today: NaiveDate) -> Option<u32> {
    if birthdate > today {
        return None;
    }
    let mut years = today.year() - birthdate.year();
    if (today.month(), today.day()) < (birthdate.month(), birthdate.day()) {
        years -= 1;
    }
    u32::try_from(years).ok()
}

//=========================================================================================
// Topics and Quizzes
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub title: String,
    pub tags: Vec<String>,
    pub difficulty: Vec<DifficultyLevel>,
}

impl Topic {
    /// Builds a topic from a bare title; the server does not send tags yet.
    pub fn from_title(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            tags: Vec::new(),
            difficulty: Vec::new(),
        }
    }
}

/// A single multiple-choice question of a generated quiz.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub question_id: String,
    pub prompt: String,
    pub options: Vec<String>,
    pub correct_answer: String,
    pub explanation: Option<String>,
    pub learning_point: Option<String>,
}

/// Identifies an active attempt, as returned when a quiz is started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptHandle {
    pub attempt_id: String,
    pub status: String,
}

/// Per-answer verdict returned by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerFeedback {
    pub is_correct: bool,
    pub correct_answer: String,
    pub explanation: Option<String>,
}

/// Summary of a completed attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct QuizResult {
    pub status: String,
    /// Percentage score, 0..=100.
    pub score: f64,
    pub correct_answers: u32,
    pub total_questions: u32,
}

impl QuizResult {
    /// Human readable summary, e.g. `60%. 3 out of 5.`
    pub fn summary(&self) -> String {
        let score = (self.score * 100.0).round() / 100.0;
        format!(
            "{}%. {} out of {}.",
            score, self.correct_answers, self.total_questions
        )
    }
}
