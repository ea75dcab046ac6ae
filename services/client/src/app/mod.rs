pub mod quiz_flow;
pub mod session;
pub mod state;

// Re-export the controllers so the binary (the view layer) can reach them directly.
pub use quiz_flow::{QuizFlow, QuizPhase};
pub use session::SessionController;
pub use state::{LoadingFlags, SessionPhase, SessionState};
