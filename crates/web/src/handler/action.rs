use std::fmt;

use ember_http::symbol::{SymbolTable, Value};
use http::StatusCode;
use tracing::{debug, trace};

use super::RequestHandler;
use crate::auth::AuthType;
use crate::request::RequestContext;

/// A named callback served under `/action/NAME`.
pub trait Action {
    /// Produces the whole response.
    fn run(&self, ctx: &mut RequestContext<'_>);
}

impl<F> Action for F
where
    F: Fn(&mut RequestContext<'_>),
{
    fn run(&self, ctx: &mut RequestContext<'_>) {
        (self)(ctx);
    }
}

/// Dispatches the first path segment after the route prefix to a named [`Action`].
pub struct ActionHandler {
    actions: SymbolTable<Box<dyn Action>>,
}

impl ActionHandler {
    /// A handler with the `login` and `logout` actions.
    pub fn new() -> Self {
        let mut handler = Self { actions: SymbolTable::new() };
        handler.define("login", login);
        handler.define("logout", logout);
        handler
    }

    /// Registers an action, replacing one of the same name.
    pub fn define<A: Action + 'static>(&mut self, name: &str, action: A) {
        self.actions.set(name, Value::Symbol(Box::new(action) as Box<dyn Action>));
    }

    pub fn get(&self, name: &str) -> Option<&dyn Action> {
        self.actions.lookup(name).and_then(Value::as_symbol).map(|action| &**action)
    }
}

impl Default for ActionHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ActionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.actions.iter().map(|(name, _)| name)).finish()
    }
}

impl RequestHandler for ActionHandler {
    fn service(&self, ctx: &mut RequestContext<'_>) -> bool {
        let rest = ctx.path().strip_prefix(ctx.route().prefix()).unwrap_or_default();
        let name = rest.trim_start_matches('/').split('/').next().unwrap_or_default().to_owned();
        if name.is_empty() {
            ctx.error(StatusCode::NOT_FOUND, "Missing action name");
            return true;
        }
        match self.get(&name) {
            Some(action) => {
                trace!(conn = ctx.conn().id(), action = %name, "run action");
                action.run(ctx);
            }
            None => ctx.error(StatusCode::NOT_FOUND, &format!("Action {name} is not defined")),
        }
        true
    }
}

/// Verifies the `username` and `password` variables and binds the user to the session.
fn login(ctx: &mut RequestContext<'_>) {
    let username = ctx.var("username").unwrap_or_default().to_owned();
    let password = ctx.var("password").unwrap_or_default().to_owned();

    if ctx.login_user(&username, &password) {
        ctx.set_session_var("loginStatus", "ok");
        match ctx.session_var("referrer") {
            Some(referrer) => ctx.redirect(&referrer),
            None => {
                if !ctx.redirect_by_status(StatusCode::OK) {
                    ctx.redirect("/");
                }
            }
        }
    } else {
        debug!(conn = ctx.conn().id(), username, "login failed");
        if let Some(auth_type) = ctx.auth_type() {
            ctx.ask_login(auth_type);
        }
        ctx.set_session_var("loginStatus", "failed");
        ctx.error(StatusCode::UNAUTHORIZED, "Access Denied. Login failed.");
    }
}

fn logout(ctx: &mut RequestContext<'_>) {
    ctx.logout_user();
    if ctx.auth_type() == Some(AuthType::Basic) {
        ctx.error(StatusCode::UNAUTHORIZED, "Logged out.");
    } else if !ctx.redirect_by_status(StatusCode::OK) {
        ctx.redirect("/");
    }
}
