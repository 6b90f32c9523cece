pub mod binance;
pub mod core;
pub mod logging;
pub mod mock;
pub mod rate_limiter;

pub use rate_limiter::RateLimiter;
