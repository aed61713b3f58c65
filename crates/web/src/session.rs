//! Server-side sessions.
//!
//! A [`SessionStore`] maps opaque session ids to [`Session`] records, each carrying its own
//! variable table. Ids are the hex SHA-256 of random bytes mixed with connection entropy, so they
//! cannot be guessed from the peer or the time. A session lives for its lifespan after the last
//! access; [`SessionStore::prune`] is run periodically by the server to drop expired ones.

use std::time::{Duration, Instant};

use ember_http::symbol::{SymbolTable, Value};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{debug, trace, warn};

/// Session variable holding the name of the logged-in user.
pub const SESSION_USERNAME: &str = "_:username:_";

#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    lifespan: Duration,
    expires: Instant,
    vars: SymbolTable,
}

impl Session {
    fn new(id: String, now: Instant, lifespan: Duration) -> Self {
        Self { id, lifespan, expires: now + lifespan, vars: SymbolTable::new() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn expires(&self) -> Instant {
        self.expires
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires
    }

    /// Extends the session by its lifespan from `now`.
    pub fn touch(&mut self, now: Instant) {
        self.expires = now + self.lifespan;
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get_str(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.set(name, value.into());
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.vars.delete(name).is_some()
    }

    pub fn vars(&self) -> &SymbolTable {
        &self.vars
    }
}

#[derive(Debug)]
pub struct SessionStore {
    sessions: SymbolTable<Session>,
    lifespan: Duration,
    limit: usize,
    created: u64,
}

impl SessionStore {
    pub fn new(lifespan: Duration, limit: usize) -> Self {
        Self { sessions: SymbolTable::new(), lifespan, limit, created: 0 }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn lifespan(&self) -> Duration {
        self.lifespan
    }

    /// Creates a session and returns its id.
    ///
    /// When the store is at its limit, expired sessions are pruned first; if it is still full no
    /// session is created.
    pub fn create(&mut self, now: Instant, entropy: &str) -> Option<String> {
        if self.sessions.len() >= self.limit && self.prune(now) == 0 {
            warn!(limit = self.limit, "too many sessions");
            return None;
        }
        loop {
            let id = self.generate_id(now, entropy);
            if self.sessions.set_if_absent(&id, Value::Symbol(Session::new(id.clone(), now, self.lifespan))) {
                debug!(session = %id, "session created");
                return Some(id);
            }
        }
    }

    fn generate_id(&mut self, now: Instant, entropy: &str) -> String {
        self.created += 1;
        let mut random = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut random);

        let mut hasher = Sha256::new();
        hasher.update(random);
        hasher.update(self.created.to_le_bytes());
        hasher.update(entropy.as_bytes());
        hasher.update(format!("{now:?}").as_bytes());
        hex::encode(&hasher.finalize()[..16])
    }

    /// A live session, without extending it.
    pub fn get(&self, id: &str, now: Instant) -> Option<&Session> {
        self.sessions.lookup(id).and_then(Value::as_symbol).filter(|s| !s.is_expired(now))
    }

    /// A live session, extended by its lifespan.
    pub fn get_mut(&mut self, id: &str, now: Instant) -> Option<&mut Session> {
        let session = self.sessions.lookup_mut(id).and_then(Value::as_symbol_mut)?;
        if session.is_expired(now) {
            return None;
        }
        session.touch(now);
        Some(session)
    }

    pub fn destroy(&mut self, id: &str) -> bool {
        let removed = self.sessions.delete(id).is_some();
        if removed {
            debug!(session = %id, "session destroyed");
        }
        removed
    }

    /// Drops every session expired at `now` and returns how many were dropped.
    pub fn prune(&mut self, now: Instant) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, value| value.as_symbol().is_some_and(|s| !s.is_expired(now)));
        let pruned = before - self.sessions.len();
        trace!(pruned, remaining = self.sessions.len(), "prune sessions");
        pruned
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }
}

/// Finds the value of cookie `name` in a `Cookie` header value.
pub fn find_cookie<'a>(cookies: &'a str, name: &str) -> Option<&'a str> {
    cookies.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key.trim() == name).then(|| value.trim().trim_matches('"'))
    })
}
