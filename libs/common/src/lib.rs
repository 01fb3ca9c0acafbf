//! Shared infrastructure for the library access services
//!
//! This crate holds the pieces every service needs regardless of domain:
//! the PostgreSQL pool that backs the scan log, the Redis client used as the
//! remote key channel, and the infrastructure error type both of them report.

pub mod cache;
pub mod database;
pub mod error;
