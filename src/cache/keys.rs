//! Type-safe cache key builders

use std::fmt;

pub const VERSION: &str = "v1";

pub mod rate_limit {
    use super::*;
    use crate::services::rate_limiter::ActionClass;

    pub const NAMESPACE: &str = "ratelimit";

    /// Sorted set of admission timestamps for one identity and action class
    #[derive(Debug, Clone)]
    pub struct WindowKey {
        pub identity: String,
        pub action: ActionClass,
    }

    impl WindowKey {
        pub fn new(identity: impl Into<String>, action: ActionClass) -> Self {
            Self {
                identity: identity.into(),
                action,
            }
        }
    }

    impl fmt::Display for WindowKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(
                f,
                "{}:{}:{}:{}",
                VERSION,
                NAMESPACE,
                self.action.as_str(),
                self.identity
            )
        }
    }
}
