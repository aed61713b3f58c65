use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ember_http::connection::Connection;
use http::header;
use tracing::debug;

/// How a route obtains credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthType {
    /// `Authorization: Basic`, challenged with `WWW-Authenticate`.
    Basic,
    /// A login page posting to the `login` action; the identity is kept in the session.
    Form,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthTypeError {
    #[error("digest authentication is not supported")]
    Digest,
    #[error("unknown authentication type {0}")]
    Unknown(String),
}

impl FromStr for AuthType {
    type Err = AuthTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "basic" => Ok(AuthType::Basic),
            "form" => Ok(AuthType::Form),
            "digest" => Err(AuthTypeError::Digest),
            other => Err(AuthTypeError::Unknown(other.to_owned())),
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AuthType {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthType::Basic => "basic",
            AuthType::Form => "form",
        }
    }

    /// Whether the scheme carries credentials on every request rather than in a session.
    pub fn is_interactive(self) -> bool {
        self == AuthType::Form
    }

    /// Extracts username and password from the `Authorization` details of the request.
    ///
    /// Undecodable details leave an empty username, which is treated as not logged in.
    pub fn parse_details(self, conn: &mut Connection) -> bool {
        match self {
            AuthType::Basic => {
                let details = conn.request().and_then(|r| r.auth_details.clone()).unwrap_or_default();
                let decoded = STANDARD.decode(details.trim()).ok().and_then(|bytes| String::from_utf8(bytes).ok());
                match decoded.as_deref().and_then(|s| s.split_once(':')) {
                    Some((username, password)) => {
                        conn.username = Some(username.to_owned());
                        conn.password = Some(password.to_owned());
                    }
                    None => {
                        debug!(conn = conn.id(), "undecodable basic credentials");
                        conn.username = Some(String::new());
                        conn.password = Some(String::new());
                    }
                }
                true
            }
            AuthType::Form => false,
        }
    }

    /// Adds the login challenge to the pending response.
    pub fn ask_login(self, conn: &mut Connection, realm: &str) {
        if self == AuthType::Basic {
            conn.set_header(header::WWW_AUTHENTICATE, &format!("Basic realm=\"{realm}\""));
        }
    }
}
