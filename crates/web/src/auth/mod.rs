//! Users, roles and abilities.
//!
//! An ability is a plain permission name. A role is a named set of abilities, and an entry of that
//! set may itself name another role. A user holds a list of roles (or bare abilities); the
//! effective ability set of a user is the flat expansion of that list, computed once after
//! loading with [`AuthStore::compute_abilities`].
//!
//! Password checking goes through [`PasswordVerifier`]; the authentication flow itself lives on
//! [`RequestContext`](crate::RequestContext).

mod login;
mod scheme;
mod verify;

pub use scheme::AuthType;
pub use verify::{FileVerifier, PasswordVerifier, encode_password};

#[cfg(test)]
pub use verify::MockPasswordVerifier;

use std::collections::BTreeSet;
use std::fmt;

use ember_http::symbol::{SymbolTable, Value};
use thiserror::Error;
use tracing::{error, trace};

/// Deepest role nesting followed while expanding abilities.
pub const MAX_ROLE_DEPTH: usize = 20;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("user {name} already exists")]
    DuplicateUser { name: String },

    #[error("role {name} already exists")]
    DuplicateRole { name: String },

    #[error("unknown user {name}")]
    UnknownUser { name: String },

    #[error("{kind} is missing a name")]
    MissingName { kind: &'static str },
}

#[derive(Debug, Clone)]
pub struct User {
    name: String,
    password: String,
    roles: Vec<String>,
    abilities: BTreeSet<String>,
}

impl User {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The stored password, as produced by [`encode_password`].
    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    /// Effective abilities after the last [`AuthStore::compute_abilities`].
    pub fn abilities(&self) -> &BTreeSet<String> {
        &self.abilities
    }

    pub fn can(&self, ability: &str) -> bool {
        self.abilities.contains(ability)
    }
}

#[derive(Debug, Clone)]
pub struct Role {
    name: String,
    abilities: Vec<String>,
}

impl Role {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn abilities(&self) -> &[String] {
        &self.abilities
    }
}

/// The user and role database.
#[derive(Debug)]
pub struct AuthStore {
    realm: String,
    users: SymbolTable<User>,
    roles: SymbolTable<Role>,
}

impl AuthStore {
    pub fn new(realm: impl Into<String>) -> Self {
        Self { realm: realm.into(), users: SymbolTable::new(), roles: SymbolTable::new() }
    }

    /// Realm used for password encoding and the basic challenge.
    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn add_user<I, S>(&mut self, name: &str, password: &str, roles: I) -> Result<(), AuthError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if name.is_empty() {
            return Err(AuthError::MissingName { kind: "user" });
        }
        let user = User {
            name: name.to_owned(),
            password: password.to_owned(),
            roles: roles.into_iter().map(Into::into).collect(),
            abilities: BTreeSet::new(),
        };
        if !self.users.set_if_absent(name, Value::Symbol(user)) {
            return Err(AuthError::DuplicateUser { name: name.to_owned() });
        }
        Ok(())
    }

    pub fn remove_user(&mut self, name: &str) -> Result<(), AuthError> {
        self.users.delete(name).map(drop).ok_or_else(|| AuthError::UnknownUser { name: name.to_owned() })
    }

    pub fn set_password(&mut self, name: &str, password: &str) -> Result<(), AuthError> {
        let user = self.user_mut(name)?;
        password.clone_into(&mut user.password);
        Ok(())
    }

    /// Replaces the roles of a user and recomputes its abilities.
    pub fn set_roles<I, S>(&mut self, name: &str, roles: I) -> Result<(), AuthError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let roles: Vec<String> = roles.into_iter().map(Into::into).collect();
        let abilities = self.expand(name, &roles);
        let user = self.user_mut(name)?;
        user.roles = roles;
        user.abilities = abilities;
        Ok(())
    }

    pub fn add_role<I, S>(&mut self, name: &str, abilities: I) -> Result<(), AuthError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if name.is_empty() {
            return Err(AuthError::MissingName { kind: "role" });
        }
        let role = Role { name: name.to_owned(), abilities: abilities.into_iter().map(Into::into).collect() };
        if !self.roles.set_if_absent(name, Value::Symbol(role)) {
            return Err(AuthError::DuplicateRole { name: name.to_owned() });
        }
        Ok(())
    }

    /// Removes a role. Users keep the abilities computed before the removal.
    pub fn remove_role(&mut self, name: &str) -> bool {
        self.roles.delete(name).is_some()
    }

    pub fn user(&self, name: &str) -> Option<&User> {
        self.users.lookup(name).and_then(Value::as_symbol)
    }

    fn user_mut(&mut self, name: &str) -> Result<&mut User, AuthError> {
        self.users
            .lookup_mut(name)
            .and_then(Value::as_symbol_mut)
            .ok_or_else(|| AuthError::UnknownUser { name: name.to_owned() })
    }

    pub fn role(&self, name: &str) -> Option<&Role> {
        self.roles.lookup(name).and_then(Value::as_symbol)
    }

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.iter().filter_map(|(_, v)| v.as_symbol())
    }

    pub fn roles(&self) -> impl Iterator<Item = &Role> {
        self.roles.iter().filter_map(|(_, v)| v.as_symbol())
    }

    /// Recomputes the effective abilities of every user.
    pub fn compute_abilities(&mut self) {
        let users: Vec<(String, Vec<String>)> = self.users().map(|u| (u.name.clone(), u.roles.clone())).collect();
        for (name, roles) in users {
            let abilities = self.expand(&name, &roles);
            if let Ok(user) = self.user_mut(&name) {
                user.abilities = abilities;
            }
        }
    }

    fn expand(&self, user: &str, roles: &[String]) -> BTreeSet<String> {
        let mut abilities = BTreeSet::new();
        let mut expanded = BTreeSet::new();
        for role in roles {
            if let Err(Recursive(name)) = self.expand_role(&mut abilities, &mut expanded, role, 0) {
                error!(user, role = %name, "recursive ability definition");
                break;
            }
        }
        trace!(user, ?abilities, "computed abilities");
        abilities
    }

    /// Adds `name` to `abilities`, or every ability it expands to when it names a role.
    /// Roles in `expanded` were already added in full and are skipped.
    fn expand_role<'a>(
        &'a self,
        abilities: &mut BTreeSet<String>,
        expanded: &mut BTreeSet<&'a str>,
        name: &'a str,
        depth: usize,
    ) -> Result<(), Recursive> {
        if depth > MAX_ROLE_DEPTH {
            return Err(Recursive(name.to_owned()));
        }
        if expanded.contains(name) {
            return Ok(());
        }
        match self.role(name) {
            Some(role) => {
                for ability in &role.abilities {
                    self.expand_role(abilities, expanded, ability, depth + 1)?;
                }
                expanded.insert(name);
            }
            None => {
                abilities.insert(name.to_owned());
            }
        }
        Ok(())
    }

    /// Whether the user holds every required ability.
    ///
    /// A requirement of the form `a|b` is met by holding any one of the alternatives.
    pub fn can<S: AsRef<str>>(&self, username: &str, required: &[S]) -> bool {
        let Some(user) = self.user(username) else { return false };
        required.iter().all(|ability| ability.as_ref().split('|').any(|alt| user.can(alt.trim())))
    }
}

/// Role at which expansion exceeded [`MAX_ROLE_DEPTH`].
#[derive(Debug)]
struct Recursive(String);

/// Password checking plus the user database it checks against.
pub struct Auth {
    store: AuthStore,
    verifier: Box<dyn PasswordVerifier>,
}

impl Auth {
    pub fn new(store: AuthStore, verifier: Box<dyn PasswordVerifier>) -> Self {
        Self { store, verifier }
    }

    pub fn store(&self) -> &AuthStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut AuthStore {
        &mut self.store
    }

    pub fn verifier(&self) -> &dyn PasswordVerifier {
        self.verifier.as_ref()
    }

    pub fn set_verifier(&mut self, verifier: Box<dyn PasswordVerifier>) {
        self.verifier = verifier;
    }
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Auth").field("store", &self.store).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> AuthStore {
        let mut store = AuthStore::new("example.com");
        store.add_role("manager", ["view", "edit"]).unwrap();
        store.add_role("administrator", ["manager", "purge"]).unwrap();
        store.add_user("joshua", "pw", ["administrator"]).unwrap();
        store.add_user("mary", "pw", ["manager", "print"]).unwrap();
        store.compute_abilities();
        store
    }

    #[test]
    fn test_nested_roles_expand() {
        let store = store();
        let joshua = store.user("joshua").unwrap();
        assert_eq!(joshua.abilities().iter().map(String::as_str).collect::<Vec<_>>(), ["edit", "purge", "view"]);

        let mary = store.user("mary").unwrap();
        assert!(mary.can("print"));
        assert!(!mary.can("purge"));
        assert!(!mary.can("manager"));
    }

    #[test]
    fn test_alternative_abilities() {
        let store = store();
        assert!(store.can("mary", &["purge|print"]));
        assert!(store.can("mary", &["view", "edit"]));
        assert!(!store.can("mary", &["view", "purge"]));
        assert!(!store.can("nobody", &["view"]));
        assert!(store.can::<&str>("mary", &[]));
    }

    #[test]
    fn test_wide_role_graph_expands_each_role_once() {
        let mut store = AuthStore::new("example.com");
        let depth = MAX_ROLE_DEPTH - 1;
        for level in 0..depth {
            let next = [format!("left{}", level + 1), format!("right{}", level + 1)];
            store.add_role(&format!("left{level}"), next.clone()).unwrap();
            store.add_role(&format!("right{level}"), next).unwrap();
        }
        store.add_role(&format!("left{depth}"), ["read"]).unwrap();
        store.add_role(&format!("right{depth}"), ["write"]).unwrap();
        store.add_user("wide", "pw", ["left0", "right0"]).unwrap();
        store.compute_abilities();

        let user = store.user("wide").unwrap();
        assert_eq!(user.abilities().iter().map(String::as_str).collect::<Vec<_>>(), ["read", "write"]);
    }

    #[test]
    fn test_ability_cycle_terminates() {
        let mut store = AuthStore::new("example.com");
        store.add_role("role1", ["role2", "read"]).unwrap();
        store.add_role("role2", ["role1", "write"]).unwrap();
        store.add_user("cyclic", "pw", ["role1"]).unwrap();
        store.compute_abilities();

        // expansion stops at the depth bound instead of looping
        let user = store.user("cyclic").unwrap();
        assert!(!user.can("role1"));
        assert!(user.abilities().len() <= 2);
    }

    #[test]
    fn test_duplicates_rejected() {
        let mut store = store();
        assert!(matches!(store.add_user("mary", "x", ["a"]), Err(AuthError::DuplicateUser { .. })));
        assert!(matches!(store.add_role("manager", ["a"]), Err(AuthError::DuplicateRole { .. })));
        assert!(matches!(store.add_user("", "x", ["a"]), Err(AuthError::MissingName { .. })));
    }

    #[test]
    fn test_set_roles_recomputes() {
        let mut store = store();
        store.set_roles("mary", ["administrator"]).unwrap();
        assert!(store.user("mary").unwrap().can("purge"));
        assert!(store.set_roles("nobody", ["x"]).is_err());
        store.remove_user("mary").unwrap();
        assert!(store.user("mary").is_none());
    }
}
