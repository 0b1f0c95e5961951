//! NDM challenge/response authentication.
//!
//! The router answers an unauthenticated `GET /auth` with `401` and two
//! headers, `X-NDM-Realm` and `X-NDM-Challenge`. Logging in means posting
//! `{"login": ..., "password": solve(...)}` back to `/auth`.
//!
//! - `challenge` - challenge extraction and the digest solver
//! - `credentials` - login/password record

mod challenge;
mod credentials;

pub use challenge::{solve, AuthError, Challenge, LoginRequest};
pub use credentials::Credentials;

/// Router endpoint used for both the probe and the login.
pub const AUTH_PATH: &str = "/auth";
