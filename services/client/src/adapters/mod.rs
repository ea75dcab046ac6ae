pub mod backend;
pub mod http;
pub mod identity;
pub mod preferences;

pub use backend::HttpBackend;
pub use http::ApiClient;
pub use identity::{CredentialPrompt, Credentials, FirebaseIdentityAdapter};
pub use preferences::FilePreferenceStore;
