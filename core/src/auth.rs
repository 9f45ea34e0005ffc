use std::sync::RwLock;

pub const FOREMAN_API_KEY_ENV_VAR: &str = "FOREMAN_API_KEY";

/// Holds the credential handed to model clients. Sessions share one manager
/// so a refreshed credential is visible to every conversation.
#[derive(Debug, Default)]
pub struct AuthManager {
    credential: RwLock<Option<String>>,
}

impl AuthManager {
    pub fn from_credential(credential: Option<String>) -> Self {
        Self {
            credential: RwLock::new(credential),
        }
    }

    pub fn from_env() -> Self {
        Self::from_credential(std::env::var(FOREMAN_API_KEY_ENV_VAR).ok())
    }

    pub fn current_credential(&self) -> Option<String> {
        match self.credential.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set_credential(&self, credential: Option<String>) {
        match self.credential.write() {
            Ok(mut guard) => *guard = credential,
            Err(poisoned) => *poisoned.into_inner() = credential,
        }
    }
}
