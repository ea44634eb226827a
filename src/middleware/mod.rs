//! HTTP middleware: live-mode gating (Layer 3), request logging, and per-IP
//! rate limiting.

pub mod logging;
pub mod mode;
pub mod rate_limit;

pub use logging::request_logging;
pub use mode::{mode_middleware, EffectiveMode, BLOCK_REASONS_HEADER, MODE_HEADER};
pub use rate_limit::{rate_limit_middleware, RateLimitConfig, RateLimiter};
