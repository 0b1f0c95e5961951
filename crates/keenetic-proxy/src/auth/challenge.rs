//! Challenge extraction and the credential digest.

use hyper::header::HeaderName;
use md5::Md5;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use super::Credentials;
use crate::proxy::headers::{X_NDM_CHALLENGE, X_NDM_REALM};
use crate::proxy::ProxyResponse;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("router challenge is missing the {0} header")]
    MissingHeader(&'static str),
    #[error("router challenge header {0} is not valid text")]
    InvalidHeader(&'static str),
}

/// Realm and nonce from a `401` answer to the auth probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub realm: String,
    pub nonce: String,
}

impl Challenge {
    /// Read `X-NDM-Realm` and `X-NDM-Challenge` from a probe response.
    ///
    /// Either header being absent is an error; no digest is ever computed
    /// over missing fields.
    pub fn from_response(response: &ProxyResponse) -> Result<Self, AuthError> {
        Ok(Self {
            realm: header_text(response, &X_NDM_REALM, "X-NDM-Realm")?,
            nonce: header_text(response, &X_NDM_CHALLENGE, "X-NDM-Challenge")?,
        })
    }

    /// Digest answering this challenge for `credentials`.
    pub fn answer(&self, credentials: &Credentials) -> String {
        solve(
            credentials.login(),
            credentials.password(),
            &self.realm,
            &self.nonce,
        )
    }
}

fn header_text(
    response: &ProxyResponse,
    name: &HeaderName,
    display: &'static str,
) -> Result<String, AuthError> {
    let value = response
        .header(name)
        .ok_or(AuthError::MissingHeader(display))?;
    value
        .to_str()
        .map(str::to_string)
        .map_err(|_| AuthError::InvalidHeader(display))
}

/// Compute the NDM credential digest.
///
/// `sha256_hex(nonce + md5_hex("{login}:{realm}:{password}"))`, both
/// encodings lower-case. The construction must match the router firmware
/// bit for bit.
pub fn solve(login: &str, password: &str, realm: &str, nonce: &str) -> String {
    let inner = hex::encode(Md5::digest(format!("{login}:{realm}:{password}").as_bytes()));

    let mut hasher = Sha256::new();
    hasher.update(nonce.as_bytes());
    hasher.update(inner.as_bytes());
    hex::encode(hasher.finalize())
}

/// JSON body of the login `POST /auth`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub login: String,
    pub password: String,
}

impl LoginRequest {
    pub fn new(credentials: &Credentials, challenge: &Challenge) -> Self {
        Self {
            login: credentials.login().to_string(),
            password: challenge.answer(credentials),
        }
    }

    pub fn into_json(self) -> Value {
        json!({ "login": self.login, "password": self.password })
    }
}
