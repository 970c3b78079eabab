//! Practicum Admin
//!
//! Administrative backend for issuing and grading practice assignments:
//! role-based access control, consumable registration keys and the
//! account registration workflow built on them.

pub mod access;
pub mod api;
pub mod auth;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod jobs;
pub mod keys;
pub mod registration;
pub mod request;
pub mod server;

pub use config::ServerConfig;
pub use context::AppContext;
pub use error::{AdminError, AdminResult};
pub use request::{Principal, RequestContext};
