use ember_http::connection::Connection;
use sha2::{Digest, Sha256};
use tracing::trace;

use super::AuthStore;

/// Checks the credentials a request presented.
///
/// The username and password have been placed in [`Connection::username`] and
/// [`Connection::password`] by the auth scheme or the login form.
#[cfg_attr(test, mockall::automock)]
pub trait PasswordVerifier {
    fn verify(&self, conn: &Connection, store: &AuthStore) -> bool;
}

/// Encodes a password the way it is stored in the route file: lowercase hex SHA-256 of
/// `username:realm:password`.
pub fn encode_password(username: &str, realm: &str, password: &str) -> String {
    hex::encode(Sha256::digest(format!("{username}:{realm}:{password}")))
}

/// Compares against the encoded passwords of the [`AuthStore`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FileVerifier;

impl PasswordVerifier for FileVerifier {
    fn verify(&self, conn: &Connection, store: &AuthStore) -> bool {
        let (Some(username), Some(password)) = (conn.username.as_deref(), conn.password.as_deref()) else {
            return false;
        };
        let Some(user) = store.user(username) else {
            trace!(username, "unknown user");
            return false;
        };
        let matched = encode_password(username, store.realm(), password) == user.password();
        trace!(username, matched, "verify password");
        matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_http::limits::ConnConfig;
    use triomphe::Arc;

    fn connection(username: Option<&str>, password: Option<&str>) -> Connection {
        let addr = "127.0.0.1:80".parse().unwrap();
        let mut conn = Connection::new(1, addr, addr, false, Arc::new(ConnConfig::default()));
        conn.username = username.map(str::to_owned);
        conn.password = password.map(str::to_owned);
        conn
    }

    #[test]
    fn test_encode_password() {
        let encoded = encode_password("joshua", "example.com", "pass1");
        assert_eq!(encoded.len(), 64);
        assert_eq!(encoded, encoded.to_lowercase());
        assert_ne!(encoded, encode_password("joshua", "other.realm", "pass1"));
    }

    #[test]
    fn test_file_verifier() {
        let mut store = AuthStore::new("example.com");
        store.add_user("joshua", &encode_password("joshua", "example.com", "pass1"), ["user"]).unwrap();

        assert!(FileVerifier.verify(&connection(Some("joshua"), Some("pass1")), &store));
        assert!(!FileVerifier.verify(&connection(Some("joshua"), Some("wrong")), &store));
        assert!(!FileVerifier.verify(&connection(Some("mary"), Some("pass1")), &store));
        assert!(!FileVerifier.verify(&connection(Some("joshua"), None), &store));
    }
}
