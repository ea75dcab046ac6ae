pub mod domain;
pub mod ports;

pub use domain::{
    AgeGroup, AnswerFeedback, AttemptHandle, DifficultyLevel, Identity, Profile, ProfileUpdate,
    Question, QuizResult, Registration, RegistrationData, RegistrationError, Topic,
};
pub use ports::{
    IdentityProvider, Persistence, PortError, PortResult, PreferenceStore, QuizBackend,
    SignInError,
};
