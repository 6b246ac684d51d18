use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{GateError, Result};

/// The session cookie pair the stateful probe authenticates with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCookies {
    pub login_session_id: String,
    pub login_secure_id: String,
}

impl SessionCookies {
    /// Render as a Cookie header value.
    pub fn header(&self) -> String {
        format!(
            "login_session_id={};login_secure_id={}",
            self.login_session_id, self.login_secure_id
        )
    }
}

/// Persisted session credentials. One active session per probe instance;
/// validity is checked externally, not here.
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn load(&self) -> Result<SessionCookies> {
        let text = tokio::fs::read_to_string(&self.path).await?;
        serde_json::from_str(&text)
            .map_err(|e| GateError::Session(format!("invalid session file: {e}")))
    }

    pub async fn save(&self, cookies: &SessionCookies) -> Result<()> {
        let text = serde_json::to_string(cookies)
            .map_err(|e| GateError::Session(format!("failed to encode session: {e}")))?;
        tokio::fs::write(&self.path, text).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path().join("session.json"));
        let cookies = SessionCookies {
            login_session_id: "sid".to_string(),
            login_secure_id: "sec".to_string(),
        };

        store.save(&cookies).await.unwrap();
        assert_eq!(store.load().await.unwrap(), cookies);
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path().join("absent.json"));
        assert!(store.load().await.is_err());
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        tokio::fs::write(&path, "{not json").await.unwrap();
        let store = CredentialStore::new(path);
        assert!(matches!(store.load().await, Err(GateError::Session(_))));
    }

    #[test]
    fn header_joins_both_values() {
        let cookies = SessionCookies {
            login_session_id: "a".to_string(),
            login_secure_id: "b".to_string(),
        };
        assert_eq!(cookies.header(), "login_session_id=a;login_secure_id=b");
    }
}
