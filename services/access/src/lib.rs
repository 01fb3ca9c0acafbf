//! Library access control core
//!
//! Issues short-lived encrypted QR access tokens and decides entry/exit
//! scans against them. The pipeline for one scan:
//!
//! 1. [`token`] opens the scanned string with a key from [`keys`]
//! 2. [`validator`] checks expiry, replay and subscription state
//! 3. [`session`] derives the user's state from the [`scan_log`] and applies the scan
//! 4. the decision is committed to the scan log before it is reported
//!
//! [`service::AccessService`] ties these together; [`routes`] exposes it over HTTP.

pub mod clock;
pub mod config;
pub mod error;
pub mod keys;
pub mod middleware;
pub mod models;
pub mod repositories;
pub mod routes;
pub mod scan_log;
pub mod service;
pub mod session;
pub mod state;
pub mod subscription;
pub mod token;
pub mod validation;
pub mod validator;

pub use state::AppState;
