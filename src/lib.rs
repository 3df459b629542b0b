pub mod backend;
pub mod config;
pub mod error;
pub mod handlers;
pub mod key;
pub mod middleware;
pub mod policy;
pub mod rate_limiter;
pub mod server;

pub use config::Config;
pub use error::{Error, Result};
pub use policy::RateLimitConfig;
pub use rate_limiter::{RateLimitDecision, RateLimiter};
pub use server::create_app;
