//! An embedded web server built on the `ember-http` connection engine
//!
//! `ember-web` adds policy to the protocol core: an ordered route table, named request handlers,
//! users with roles and abilities, Basic and form authentication, cookie sessions and a
//! single-threaded server loop that drives every connection through a readiness multiplexer.
//!
//! # Example
//!
//! ```no_run
//! use ember_web::handler::handler_fn;
//! use ember_web::route::Route;
//! use ember_web::{Server, ServerConfig};
//! use http::StatusCode;
//! use std::sync::atomic::AtomicBool;
//!
//! fn main() -> Result<(), ember_web::ServerError> {
//!     let hello = handler_fn(|ctx| {
//!         let name = ctx.var("name").unwrap_or("world").to_owned();
//!         ctx.conn_mut().response(StatusCode::OK, format!("Hello {name}!\r\n").as_bytes());
//!         true
//!     });
//!
//!     let mut server = Server::builder()
//!         .config(ServerConfig::builder().documents("web").build())
//!         .handler("hello", hello)
//!         .route(Route::builder("/hello").handler("hello").build().unwrap())
//!         .open()?;
//!     server.listen("127.0.0.1:8080".parse().unwrap())?;
//!     server.service_events(&AtomicBool::new(false))
//! }
//! ```
//!
//! # Modules
//!
//! - [`route`]: routes, route filters and the route table
//! - [`handler`]: the [`RequestHandler`] trait, the handler registry and built-in handlers
//! - [`auth`]: users, roles, abilities and password verification
//! - [`session`]: the session store
//! - [`config`]: the route and user configuration file
//! - [`server`]: the server loop and route resolution

pub mod auth;
pub mod config;
pub mod handler;
pub mod route;
pub mod server;
pub mod session;

mod request;

#[cfg(test)]
mod testing;

pub use handler::{Handlers, RequestHandler};
pub use request::RequestContext;
pub use route::{Route, RouteTable};
pub use server::{Server, ServerBuilder, ServerConfig, ServerError};
