//! The route and auth configuration file.
//!
//! One directive per line, `#` starts a comment:
//!
//! ```text
//! role name=manager abilities=view,edit
//! user name=joshua password=2f3c... roles=manager
//! route uri=/action handler=action
//! route uri=/admin auth=basic abilities=manage redirect=401@/login.html
//! route uri=/ extensions=html|css|js methods=GET|HEAD
//! ```
//!
//! Values may be double quoted. List values are separated by spaces, tabs, commas or pipes
//! (abilities only by the first three, a pipe there separates alternatives). `none` stands for an
//! empty list. Routes are appended to the table in file order.

use std::fs;
use std::path::{Path, PathBuf};

use http::Method;
use thiserror::Error;
use tracing::{debug, info};

use crate::auth::{AuthError, AuthStore, AuthType};
use crate::route::{Route, RouteError, RouteTable, filter};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Io { path: PathBuf, source: std::io::Error },

    #[error("line {line}: unknown directive {directive}")]
    UnknownDirective { line: usize, directive: String },

    #[error("line {line}: unknown key {key} for {directive}")]
    UnknownKey { line: usize, directive: &'static str, key: String },

    #[error("line {line}: {reason}")]
    BadValue { line: usize, reason: String },
}

impl ConfigError {
    fn bad_value(line: usize, reason: impl Into<String>) -> Self {
        Self::BadValue { line, reason: reason.into() }
    }
}

/// Loads a configuration file into `routes` and `auth`, then computes user abilities.
pub fn load(path: impl AsRef<Path>, routes: &mut RouteTable, auth: &mut AuthStore) -> Result<(), ConfigError> {
    let path = path.as_ref();
    let source = fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_owned(), source })?;
    parse(&source, routes, auth)?;
    info!(path = %path.display(), routes = routes.len(), "configuration loaded");
    Ok(())
}

/// Parses configuration text. See the [module docs](self) for the format.
pub fn parse(source: &str, routes: &mut RouteTable, auth: &mut AuthStore) -> Result<(), ConfigError> {
    for (index, text) in source.lines().enumerate() {
        let line = index + 1;
        let text = text.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }
        let (directive, rest) = text.split_once([' ', '\t']).unwrap_or((text, ""));
        let pairs = tokenize(rest, line)?;
        match directive.trim_end_matches(':') {
            "route" => {
                let route = parse_route(&pairs, line)?;
                debug!(line, prefix = route.prefix(), handler = route.handler(), "route");
                routes.add(route);
            }
            "user" => parse_user(&pairs, line, auth)?,
            "role" => parse_role(&pairs, line, auth)?,
            _ => return Err(ConfigError::UnknownDirective { line, directive: directive.to_owned() }),
        }
    }
    auth.compute_abilities();
    Ok(())
}

/// Splits `key=value` tokens. Quoted values may contain blanks.
fn tokenize(text: &str, line: usize) -> Result<Vec<(&str, &str)>, ConfigError> {
    let mut pairs = Vec::new();
    let mut rest = text.trim_start();
    while !rest.is_empty() {
        let Some((key, after)) = rest.split_once('=') else {
            return Err(ConfigError::bad_value(line, format!("expected key=value at {rest}")));
        };
        let (value, next) = if let Some(quoted) = after.strip_prefix('"') {
            let end = quoted.find('"').ok_or_else(|| ConfigError::bad_value(line, "unterminated quote"))?;
            (&quoted[..end], &quoted[end + 1..])
        } else {
            let end = after.find([' ', '\t']).unwrap_or(after.len());
            (&after[..end], &after[end..])
        };
        pairs.push((key.trim(), value));
        rest = next.trim_start();
    }
    Ok(pairs)
}

fn list(value: &str, separators: &[char]) -> Vec<String> {
    if value == "none" {
        return Vec::new();
    }
    value.split(separators).filter(|item| !item.is_empty()).map(str::to_owned).collect()
}

fn words(value: &str) -> Vec<String> {
    list(value, &[' ', '\t', ',', '|'])
}

fn abilities(value: &str) -> Vec<String> {
    list(value, &[' ', '\t', ','])
}

fn parse_route(pairs: &[(&str, &str)], line: usize) -> Result<Route, ConfigError> {
    let uri = pairs.iter().find(|(key, _)| *key == "uri").map(|(_, value)| *value);
    let uri = uri.ok_or_else(|| ConfigError::bad_value(line, "route is missing uri"))?;
    let mut builder = Route::builder(uri);

    for &(key, value) in pairs {
        builder = match key {
            "uri" => builder,
            "handler" => builder.handler(value),
            "dir" => builder.dir(value),
            "protocol" => builder.with(filter::protocol(value)),
            "abilities" => builder.abilities(abilities(value)),
            "extensions" => {
                let extensions = words(value);
                if extensions.is_empty() { builder } else { builder.with(filter::extensions(extensions)) }
            }
            "methods" => {
                let methods = words(value)
                    .iter()
                    .map(|m| Method::from_bytes(m.to_ascii_uppercase().as_bytes()))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| ConfigError::bad_value(line, format!("bad method list {value}: {e}")))?;
                if methods.is_empty() { builder } else { builder.methods(filter::methods(methods)) }
            }
            "auth" => match value {
                "none" | "" => builder,
                value => builder.auth(value.parse::<AuthType>().map_err(|e| ConfigError::bad_value(line, e.to_string()))?),
            },
            "redirect" => {
                let (status, target) = parse_redirect(value, line)?;
                builder.redirect(status, target)
            }
            key => return Err(ConfigError::UnknownKey { line, directive: "route", key: key.to_owned() }),
        };
    }
    builder.build().map_err(|e: RouteError| ConfigError::bad_value(line, e.to_string()))
}

/// `STATUS@URI`, where `*` or a missing status applies to any status.
fn parse_redirect(value: &str, line: usize) -> Result<(u16, &str), ConfigError> {
    let Some((status, uri)) = value.split_once('@') else {
        return Ok((0, value));
    };
    let status = match status {
        "*" | "" => 0,
        status => status.parse().map_err(|_| ConfigError::bad_value(line, format!("bad redirect status {status}")))?,
    };
    if uri.is_empty() {
        return Err(ConfigError::bad_value(line, "redirect is missing a target"));
    }
    Ok((status, uri))
}

fn parse_user(pairs: &[(&str, &str)], line: usize, auth: &mut AuthStore) -> Result<(), ConfigError> {
    let (mut name, mut password, mut roles) = ("", "", Vec::new());
    for &(key, value) in pairs {
        match key {
            "name" => name = value,
            "password" => password = value,
            "roles" => roles = abilities(value),
            key => return Err(ConfigError::UnknownKey { line, directive: "user", key: key.to_owned() }),
        }
    }
    auth.add_user(name, password, roles).map_err(|e: AuthError| ConfigError::bad_value(line, e.to_string()))
}

fn parse_role(pairs: &[(&str, &str)], line: usize, auth: &mut AuthStore) -> Result<(), ConfigError> {
    let (mut name, mut granted) = ("", Vec::new());
    for &(key, value) in pairs {
        match key {
            "name" => name = value,
            "abilities" => granted = abilities(value),
            key => return Err(ConfigError::UnknownKey { line, directive: "role", key: key.to_owned() }),
        }
    }
    auth.add_role(name, granted).map_err(|e: AuthError| ConfigError::bad_value(line, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use std::io::Write;

    const CONFIG: &str = indoc! {r#"
        # roles first, users may refer to them
        role name=manager abilities=view,edit
        role: name=administrator abilities="manager manage"
        user name=joshua password=5f4d roles=administrator
        user name=mary password=a1b2 roles=view

        route uri=/action handler=action
        route uri=/admin auth=basic abilities=manage redirect=401@/login.html
        route uri=/old handler=redirect redirect=*@/new.html
        route uri=/ extensions=html|css methods=GET,HEAD abilities=none
    "#};

    fn parse_str(source: &str) -> Result<(RouteTable, AuthStore), ConfigError> {
        let mut routes = RouteTable::new();
        let mut auth = AuthStore::new("example.com");
        parse(source, &mut routes, &mut auth)?;
        Ok((routes, auth))
    }

    #[test]
    fn test_parse() {
        let (routes, auth) = parse_str(CONFIG).unwrap();
        let prefixes: Vec<_> = routes.iter().map(Route::prefix).collect();
        assert_eq!(prefixes, ["/action", "/admin", "/old", "/"]);

        let admin = routes.get(1).unwrap();
        assert_eq!(admin.auth(), Some(AuthType::Basic));
        assert_eq!(admin.abilities(), ["manage"]);
        assert_eq!(admin.redirect_for(401), Some("/login.html"));
        assert_eq!(admin.handler(), "file");
        assert_eq!(routes.get(2).unwrap().redirect_for(200), Some("/new.html"));
        assert!(routes.get(3).unwrap().abilities().is_empty());

        let joshua = auth.user("joshua").unwrap();
        assert!(joshua.can("edit"));
        assert!(joshua.can("manage"));
        assert!(auth.user("mary").unwrap().can("view"));
    }

    #[test]
    fn test_errors_carry_line() {
        let err = parse_str("route uri=/\nfrobnicate x=1").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownDirective { line: 2, .. }));

        let err = parse_str("route uri=/ colour=red").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKey { line: 1, directive: "route", .. }));

        let err = parse_str("\n\nroute uri=/ auth=digest").unwrap_err();
        assert!(matches!(err, ConfigError::BadValue { line: 3, .. }));

        let err = parse_str("route handler=file").unwrap_err();
        assert!(matches!(err, ConfigError::BadValue { line: 1, .. }));

        let err = parse_str("user name=a password=b\nuser name=a password=c").unwrap_err();
        assert!(matches!(err, ConfigError::BadValue { line: 2, .. }));
    }

    #[test]
    fn test_tokenize_quotes() {
        let pairs = tokenize(r#"name="big boss" abilities=a|b"#, 1).unwrap();
        assert_eq!(pairs, [("name", "big boss"), ("abilities", "a|b")]);
        assert!(tokenize(r#"name="open"#, 1).is_err_and(|e| matches!(e, ConfigError::BadValue { .. })));
        assert_eq!(abilities("a|b, c"), ["a|b", "c"]);
        assert_eq!(words("GET|HEAD, POST"), ["GET", "HEAD", "POST"]);
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CONFIG.as_bytes()).unwrap();

        let mut routes = RouteTable::new();
        let mut auth = AuthStore::new("example.com");
        load(file.path(), &mut routes, &mut auth).unwrap();
        assert_eq!(routes.len(), 4);

        let err = load("/nonexistent/route.txt", &mut routes, &mut auth).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
