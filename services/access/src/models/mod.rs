//! Access core models

pub mod scan;
pub mod subscription;
pub mod user;

// Re-export for convenience
pub use scan::{DenialReason, ScanAttempt, ScanEvent, ScanResult, ScanType};
pub use subscription::{Subscription, SubscriptionStatus};
pub use user::UserId;
