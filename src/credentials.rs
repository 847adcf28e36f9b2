/// file: src/credentials.rs
/// description: bearer token sources consulted when the command channel connects
use serde_json::Value;
use std::path::PathBuf;
use tracing::{debug, warn};

pub trait CredentialSource: Send + Sync {
    /// Current bearer token, or `None` when the user is not signed in.
    fn bearer_token(&self) -> Option<String>;
}

fn non_blank(token: Option<String>) -> Option<String> {
    token
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

#[derive(Debug, Clone, Default)]
pub struct StaticCredential {
    token: Option<String>,
}

impl StaticCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }
}

impl CredentialSource for StaticCredential {
    fn bearer_token(&self) -> Option<String> {
        non_blank(self.token.clone())
    }
}

#[derive(Debug, Clone)]
pub struct EnvCredential {
    var: String,
}

impl EnvCredential {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl CredentialSource for EnvCredential {
    fn bearer_token(&self) -> Option<String> {
        non_blank(std::env::var(&self.var).ok())
    }
}

/// Persisted client auth state. The token is read from `accessToken`,
/// either at the top level or nested under `state`.
#[derive(Debug, Clone)]
pub struct AuthStateFile {
    path: PathBuf,
}

impl AuthStateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn extract(document: &Value) -> Option<String> {
        let token = document
            .get("accessToken")
            .or_else(|| document.get("state").and_then(|s| s.get("accessToken")))?;
        token.as_str().map(str::to_string)
    }
}

impl CredentialSource for AuthStateFile {
    fn bearer_token(&self) -> Option<String> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                debug!("Auth state {} unavailable: {}", self.path.display(), e);
                return None;
            }
        };

        match serde_json::from_str::<Value>(&raw) {
            Ok(document) => non_blank(Self::extract(&document)),
            Err(e) => {
                warn!("Auth state {} is not valid JSON: {}", self.path.display(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "tradewire-{}-{}.json",
            name,
            uuid::Uuid::new_v4()
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn static_blank_token_is_absent() {
        assert_eq!(StaticCredential::new("  ").bearer_token(), None);
        assert_eq!(StaticCredential::none().bearer_token(), None);
        assert_eq!(
            StaticCredential::new("tok").bearer_token().as_deref(),
            Some("tok")
        );
    }

    #[test]
    fn missing_env_var_is_absent() {
        let source = EnvCredential::new(format!("TRADEWIRE_TEST_{}", uuid::Uuid::new_v4().simple()));
        assert_eq!(source.bearer_token(), None);
    }

    #[test]
    fn reads_nested_persisted_token() {
        let path = temp_file(
            "nested",
            r#"{"state":{"accessToken":"jwt-1","user":{"id":1}},"version":0}"#,
        );
        assert_eq!(
            AuthStateFile::new(&path).bearer_token().as_deref(),
            Some("jwt-1")
        );
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn reads_top_level_token() {
        let path = temp_file("flat", r#"{"accessToken":"jwt-2"}"#);
        assert_eq!(
            AuthStateFile::new(&path).bearer_token().as_deref(),
            Some("jwt-2")
        );
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn signed_out_or_unreadable_state_is_absent() {
        let path = temp_file("signed-out", r#"{"state":{"accessToken":null}}"#);
        assert_eq!(AuthStateFile::new(&path).bearer_token(), None);
        std::fs::remove_file(path).ok();

        let garbage = temp_file("garbage", "{not json");
        assert_eq!(AuthStateFile::new(&garbage).bearer_token(), None);
        std::fs::remove_file(garbage).ok();

        assert_eq!(
            AuthStateFile::new("/nonexistent/tradewire/auth.json").bearer_token(),
            None
        );
    }
}
