use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use skysync_types::AuthToken;

use super::IdentityProvider;

/// Identity with a token held in memory. Used by tests and by hosts that
/// obtain tokens some other way.
#[derive(Debug, Default)]
pub struct StaticIdentity {
    token: Mutex<AuthToken>,
}

impl StaticIdentity {
    pub fn new(token: &str) -> Self {
        Self {
            token: Mutex::new(AuthToken::new(token)),
        }
    }

    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn set_token(&self, token: &str) {
        if let Ok(mut guard) = self.token.lock() {
            *guard = AuthToken::new(token);
        }
    }

    pub fn sign_out(&self) {
        if let Ok(mut guard) = self.token.lock() {
            *guard = AuthToken::unauthenticated();
        }
    }

    fn current(&self) -> AuthToken {
        self.token
            .lock()
            .map(|t| t.clone())
            .unwrap_or_else(|_| AuthToken::unauthenticated())
    }
}

impl IdentityProvider for StaticIdentity {
    fn validate_auth(&self, _interactive: bool) -> AuthToken {
        self.current()
    }

    fn access_token(&self) -> AuthToken {
        self.current()
    }
}

/// Credentials file written by whatever performs the login flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    /// Unix seconds; absent means the token does not expire
    #[serde(default)]
    pub expires_at: Option<u64>,
}

/// Identity read from `~/.config/skysync/credentials.json`. Read-only: the
/// sync core never persists tokens.
#[derive(Debug, Clone)]
pub struct TokenFileIdentity {
    path: PathBuf,
}

impl TokenFileIdentity {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The default credentials location, if a config dir exists.
    pub fn default_location() -> Option<Self> {
        dirs::config_dir().map(|d| Self::new(d.join("skysync").join("credentials.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_valid(&self) -> AuthToken {
        let Ok(json) = fs::read_to_string(&self.path) else {
            return AuthToken::unauthenticated();
        };
        let creds: Credentials = match serde_json::from_str(&json) {
            Ok(c) => c,
            Err(e) => {
                log::warn!(target: "auth", "unreadable credentials {}: {}", self.path.display(), e);
                return AuthToken::unauthenticated();
            }
        };

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        match creds.expires_at {
            Some(expiry) if expiry <= now => {
                log::info!(target: "auth", "access token expired");
                AuthToken::unauthenticated()
            }
            _ => AuthToken::new(creds.access_token),
        }
    }
}

impl IdentityProvider for TokenFileIdentity {
    fn validate_auth(&self, _interactive: bool) -> AuthToken {
        self.read_valid()
    }

    fn access_token(&self) -> AuthToken {
        self.read_valid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_identity_sign_in_and_out() {
        let identity = StaticIdentity::signed_out();
        assert!(identity.validate_auth(true).is_empty());
        identity.set_token("t1");
        assert_eq!(identity.access_token().as_str(), "t1");
        identity.sign_out();
        assert!(identity.access_token().is_empty());
    }

    #[test]
    fn token_file_missing_is_unauthenticated() {
        let dir = tempfile::tempdir().unwrap();
        let identity = TokenFileIdentity::new(dir.path().join("credentials.json"));
        assert!(identity.validate_auth(false).is_empty());
    }

    #[test]
    fn token_file_valid_and_expired() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let identity = TokenFileIdentity::new(&path);

        fs::write(&path, r#"{"access_token":"live"}"#).unwrap();
        assert_eq!(identity.validate_auth(false).as_str(), "live");

        fs::write(&path, r#"{"access_token":"old","expires_at":1}"#).unwrap();
        assert!(identity.validate_auth(false).is_empty());

        fs::write(&path, "not json").unwrap();
        assert!(identity.access_token().is_empty());
    }
}
