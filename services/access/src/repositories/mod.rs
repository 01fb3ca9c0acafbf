//! PostgreSQL adapters for the access core ports

pub mod scan_events;
pub mod subscriptions;

pub use scan_events::PgScanLog;
pub use subscriptions::PgSubscriptionStore;
