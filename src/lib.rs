#![doc = "The `taskguard` library crate."]
#![doc = ""]
#![doc = "Authentication, authorization and rate limiting for the TaskForge task tracker:"]
#![doc = "password hashing, bearer tokens, identity resolution, ownership checks and request"]
#![doc = "throttling, plus the actix-web glue and user stores the main binary (`main.rs`) wires up."]

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod rate_limit;
pub mod routes;
pub mod state;
pub mod store;

// The application factory lives in main.rs; the integration tests build the same App inline.

pub use crate::error::{AppError, AuthError};
pub use crate::state::AppState;
