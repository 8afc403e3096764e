pub mod rate_limit;
pub mod requests_logging;
pub mod security_headers;

pub use rate_limit::{RateLimitContext, RateLimiter};
pub use requests_logging::{log_requests, RequestsLoggingLevel};
pub use security_headers::security_headers;
