use http::StatusCode;
use tracing::{debug, trace, warn};

use super::AuthType;
use crate::request::RequestContext;
use crate::session::SESSION_USERNAME;

impl RequestContext<'_> {
    /// Establishes the identity the route requires.
    ///
    /// A username bound to the session is trusted without checking the password again.
    /// Otherwise the credentials of the request are verified and, on success, bound to the
    /// session. On failure a challenge (or the route's 401 redirect) has been sent.
    pub fn authenticate(&mut self) -> bool {
        let Some(auth_type) = self.route().auth() else {
            return true;
        };

        if let Some(username) = self.session_var(SESSION_USERNAME) {
            trace!(conn = self.conn().id(), username, "cached authentication");
            self.conn_mut().username = Some(username);
            return true;
        }

        let request_type = self.conn().request().and_then(|r| r.auth_type.clone());
        if request_type.as_deref().is_some_and(|t| t != auth_type.as_str()) {
            self.error(StatusCode::UNAUTHORIZED, "Access Denied. Wrong authentication protocol type.");
            return false;
        }
        let has_details = self.conn().request().is_some_and(|r| r.auth_details.is_some());
        if has_details {
            auth_type.parse_details(self.conn_mut());
        }

        if self.conn().username.as_deref().is_none_or(str::is_empty) {
            self.ask_login(auth_type);
            self.error(StatusCode::UNAUTHORIZED, "Access Denied. User not logged in.");
            return false;
        }
        if !self.verify() {
            self.ask_login(auth_type);
            self.error(StatusCode::UNAUTHORIZED, "Access Denied. Unknown User.");
            return false;
        }

        if let Some(username) = self.conn().username.clone() {
            debug!(conn = self.conn().id(), username, "authenticated");
            self.set_session_var(SESSION_USERNAME, &username);
        }
        true
    }

    /// Checks the route's required abilities against the request identity.
    pub fn can(&mut self) -> bool {
        let required = self.route().abilities();
        if required.is_empty() {
            return true;
        }
        if self.conn().username.is_none() {
            self.conn_mut().username = self.session_var(SESSION_USERNAME);
        }
        let Some(username) = self.conn().username.clone() else {
            self.error(StatusCode::UNAUTHORIZED, "Access Denied. User not logged in.");
            return false;
        };
        let store = self.auth().store();
        if store.user(&username).is_none() {
            self.error(StatusCode::UNAUTHORIZED, "Access Denied. Unknown User.");
            return false;
        }
        if !store.can(&username, required) {
            warn!(conn = self.conn().id(), username, ?required, "insufficient abilities");
            self.error(StatusCode::UNAUTHORIZED, "Access Denied. Insufficient capabilities.");
            return false;
        }
        true
    }

    /// Whether the request identity holds every ability in a space or comma separated list.
    /// Unlike [`can`](Self::can) nothing is sent on failure.
    pub fn can_string(&self, abilities: &str) -> bool {
        let Some(username) = self.conn().username.as_deref() else {
            return false;
        };
        let required: Vec<&str> = abilities.split([' ', ',']).filter(|a| !a.is_empty()).collect();
        self.auth().store().can(username, &required)
    }

    /// Verifies `username` and `password` and binds the user to the session.
    pub fn login_user(&mut self, username: &str, password: &str) -> bool {
        let conn = self.conn_mut();
        conn.username = Some(username.to_owned());
        conn.password = Some(password.to_owned());
        if !self.verify() {
            debug!(conn = self.conn().id(), username, "password does not match");
            return false;
        }
        debug!(conn = self.conn().id(), username, "login successful");
        self.set_session_var(SESSION_USERNAME, username)
    }

    /// Unbinds the user and ends the session.
    pub fn logout_user(&mut self) {
        self.remove_session_var(SESSION_USERNAME);
        self.destroy_session();
        self.conn_mut().username = None;
    }

    /// The auth scheme in effect: the route's, else the scheme the request presented.
    pub fn auth_type(&self) -> Option<AuthType> {
        self.route().auth().or_else(|| self.conn().request().and_then(|r| r.auth_type.as_deref()?.parse().ok()))
    }

    pub fn ask_login(&mut self, auth_type: AuthType) {
        let realm = self.auth().store().realm();
        auth_type.ask_login(self.conn_mut(), realm);
    }

    fn verify(&self) -> bool {
        let auth = self.auth();
        auth.verifier().verify(self.conn(), auth.store())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{MockPasswordVerifier, encode_password};
    use crate::request::tests::Fixture;
    use crate::route::Route;
    use crate::testing::{connection, flush};

    fn fixture(route: Route) -> Fixture {
        let mut fixture = Fixture::new(route);
        let store = fixture.auth.store_mut();
        store.add_role("administrator", ["admin", "view"]).unwrap();
        store.add_user("joshua", &encode_password("joshua", "example.com", "pass1"), ["administrator"]).unwrap();
        store.add_user("mary", &encode_password("mary", "example.com", "pass2"), ["view"]).unwrap();
        store.compute_abilities();
        fixture
    }

    fn basic(credentials: &str) -> String {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
        format!("GET /admin/ HTTP/1.1\r\nAuthorization: Basic {encoded}\r\n\r\n")
    }

    #[test]
    fn test_basic_challenge() {
        let mut fixture = fixture(Route::builder("/admin").auth(AuthType::Basic).ability("admin").build().unwrap());
        let mut conn = connection("GET /admin/ HTTP/1.1\r\n\r\n");
        assert!(!fixture.context(&mut conn).authenticate());

        let out = flush(&mut conn);
        assert!(out.starts_with("HTTP/1.1 401 Unauthorized\r\n"));
        assert!(out.contains("www-authenticate: Basic realm=\"example.com\"\r\n"));
        assert!(conn.is_keep_alive());
    }

    #[test]
    fn test_basic_login_binds_session() {
        let mut fixture = fixture(Route::builder("/admin").auth(AuthType::Basic).ability("admin").build().unwrap());
        let mut conn = connection(&basic("joshua:pass1"));
        let mut ctx = fixture.context(&mut conn);
        assert!(ctx.authenticate());
        assert!(ctx.can());
        assert_eq!(ctx.session_var(SESSION_USERNAME).as_deref(), Some("joshua"));
        assert_eq!(fixture.sessions.len(), 1);
    }

    #[test]
    fn test_wrong_password_and_protocol() {
        let mut fixture = fixture(Route::builder("/admin").auth(AuthType::Basic).build().unwrap());
        let mut conn = connection(&basic("joshua:nope"));
        assert!(!fixture.context(&mut conn).authenticate());
        assert!(flush(&mut conn).contains("Unknown User"));

        let mut conn = connection("GET /admin/ HTTP/1.1\r\nAuthorization: Digest username=\"joshua\"\r\n\r\n");
        assert!(!fixture.context(&mut conn).authenticate());
        assert!(flush(&mut conn).contains("Wrong authentication protocol type"));
    }

    #[test]
    fn test_insufficient_abilities() {
        let mut fixture = fixture(Route::builder("/admin").auth(AuthType::Basic).ability("admin").build().unwrap());
        let mut conn = connection(&basic("mary:pass2"));
        let mut ctx = fixture.context(&mut conn);
        assert!(ctx.authenticate());
        assert!(!ctx.can());
        assert!(flush(&mut conn).contains("Insufficient capabilities"));
    }

    #[test]
    fn test_alternative_abilities_on_route() {
        let route = Route::builder("/").ability("admin|view").build().unwrap();
        let mut fixture = fixture(route);
        let mut conn = connection("GET / HTTP/1.1\r\n\r\n");
        conn.username = Some("mary".to_owned());
        let mut ctx = fixture.context(&mut conn);
        assert!(ctx.can());
        assert!(ctx.can_string("view"));
        assert!(!ctx.can_string("view, admin"));
    }

    #[test]
    fn test_form_redirects_to_login_page() {
        let route = Route::builder("/").auth(AuthType::Form).redirect(401, "/login.html").build().unwrap();
        let mut fixture = fixture(route);
        let mut conn = connection("GET /private.html HTTP/1.1\r\nHost: device\r\n\r\n");
        assert!(!fixture.context(&mut conn).authenticate());

        let out = flush(&mut conn);
        assert!(out.starts_with("HTTP/1.1 302 Found\r\n"));
        assert!(out.contains("location: http://device/login.html\r\n"));
        assert!(!out.contains("www-authenticate"));
    }

    #[test]
    fn test_cached_authentication_skips_verifier() {
        let route = Route::builder("/").auth(AuthType::Form).build().unwrap();
        let mut fixture = fixture(route);
        let mut verifier = MockPasswordVerifier::new();
        verifier.expect_verify().times(1).returning(|conn, _| conn.password.as_deref() == Some("secret"));
        fixture.auth.set_verifier(Box::new(verifier));

        let mut conn = connection("POST /action/login HTTP/1.1\r\n\r\n");
        let mut ctx = fixture.context(&mut conn);
        assert!(ctx.login_user("mary", "secret"));
        let id = ctx.session_id().unwrap();

        let mut conn = connection(&format!("GET / HTTP/1.1\r\nCookie: ember-session={id}\r\n\r\n"));
        let mut ctx = fixture.context(&mut conn);
        assert!(ctx.authenticate());
        assert_eq!(ctx.conn().username.as_deref(), Some("mary"));

        ctx.logout_user();
        assert!(ctx.session_id().is_none());
        assert!(fixture.sessions.is_empty());
    }
}
