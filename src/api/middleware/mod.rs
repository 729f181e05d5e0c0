//! Request pipeline: security headers wrap everything, then rate limiting,
//! then CSRF. Session checks happen in the handlers that need a user.

pub(crate) mod csrf;
pub(crate) mod headers;
pub(crate) mod rate_limit;
