//! Local API authentication.

mod middleware;

pub use middleware::AuthUser;
