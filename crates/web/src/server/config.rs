use std::path::PathBuf;
use std::time::Duration;

use ember_http::limits::{ConnConfig, Limits, ResponseConfig};

/// Server-wide settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Root directory of the documents served by routes without a directory of their own.
    pub documents: PathBuf,
    /// Page served for directory requests.
    pub index: String,
    /// Realm of the user database and of Basic challenges.
    pub realm: String,
    /// Name of the cookie carrying the session id.
    pub session_cookie: String,
    pub session_lifespan: Duration,
    /// Most sessions alive at once; creating another fails.
    pub session_limit: usize,
    /// Period of the expired-session sweep.
    pub prune_interval: Duration,
    pub limits: Limits,
    pub response: ResponseConfig,
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder { config: Self::default() }
    }

    /// The part of the configuration every connection shares.
    pub fn conn_config(&self) -> ConnConfig {
        ConnConfig { limits: self.limits.clone(), response: self.response.clone() }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            documents: PathBuf::from("web"),
            index: "index.html".to_owned(),
            realm: "ember".to_owned(),
            session_cookie: "ember-session".to_owned(),
            session_lifespan: Duration::from_secs(1800),
            session_limit: 100,
            prune_interval: Duration::from_secs(60),
            limits: Limits::default(),
            response: ResponseConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    #[must_use]
    pub fn documents(mut self, documents: impl Into<PathBuf>) -> Self {
        self.config.documents = documents.into();
        self
    }

    #[must_use]
    pub fn index(mut self, index: impl Into<String>) -> Self {
        self.config.index = index.into();
        self
    }

    #[must_use]
    pub fn realm(mut self, realm: impl Into<String>) -> Self {
        self.config.realm = realm.into();
        self
    }

    #[must_use]
    pub fn session_cookie(mut self, name: impl Into<String>) -> Self {
        self.config.session_cookie = name.into();
        self
    }

    #[must_use]
    pub fn session_lifespan(mut self, lifespan: Duration) -> Self {
        self.config.session_lifespan = lifespan;
        self
    }

    #[must_use]
    pub fn session_limit(mut self, limit: usize) -> Self {
        self.config.session_limit = limit;
        self
    }

    #[must_use]
    pub fn prune_interval(mut self, interval: Duration) -> Self {
        self.config.prune_interval = interval;
        self
    }

    #[must_use]
    pub fn limits(mut self, limits: Limits) -> Self {
        self.config.limits = limits;
        self
    }

    #[must_use]
    pub fn response(mut self, response: ResponseConfig) -> Self {
        self.config.response = response;
        self
    }

    pub fn build(self) -> ServerConfig {
        self.config
    }
}
