//! Forwarding state machine.
//!
//! One inbound request drives one forwarding cycle:
//!
//! ```text
//! ForwardFirst --401--> AuthProbe --401--> AuthLogin --200--> ForwardRetry --> Done
//!      |                   |  \                 |
//!      +--other--> Done    |   +--200--> ForwardRetry
//!                          +--other--> Done     +--other--> Done
//! ```
//!
//! `ForwardRetry` always leads to `Done`, so a request is retried at most
//! once and the router never sees more than one login per cycle. When the
//! authentication sub-cycle gives up, the client gets the router's original
//! `401`.

use hyper::{Method, StatusCode};
use tracing::{debug, error, info, warn};

use super::{ProxyError, ProxyRequest, ProxyResponse, RouterTransport};
use crate::auth::{Challenge, Credentials, LoginRequest, AUTH_PATH};
use crate::metrics;

/// Named states of a forwarding cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    /// Send the client request for the first time.
    ForwardFirst,
    /// `GET /auth` to learn whether the session is valid and fetch a challenge.
    AuthProbe,
    /// `POST /auth` with the challenge answer.
    AuthLogin,
    /// Send the client request again, after (re)authentication.
    ForwardRetry,
    /// The current candidate response is final.
    Done,
}

/// Transition table: the state that follows `state` once the router has
/// answered the call made in it with `status`.
pub fn transition(state: CycleState, status: StatusCode) -> CycleState {
    use CycleState::*;

    match (state, status) {
        (ForwardFirst, StatusCode::UNAUTHORIZED) => AuthProbe,
        (ForwardFirst, _) => Done,
        (AuthProbe, StatusCode::OK) => ForwardRetry,
        (AuthProbe, StatusCode::UNAUTHORIZED) => AuthLogin,
        (AuthProbe, _) => Done,
        (AuthLogin, StatusCode::OK) => ForwardRetry,
        (AuthLogin, _) => Done,
        (ForwardRetry, _) | (Done, _) => Done,
    }
}

/// Drives forwarding cycles against one router.
///
/// Shared by every connection; all mutable state lives in the transport's
/// cookie session.
pub struct ForwardingEngine<T> {
    transport: T,
    credentials: Credentials,
}

impl<T: RouterTransport> ForwardingEngine<T> {
    pub fn new(transport: T, credentials: Credentials) -> Self {
        Self {
            transport,
            credentials,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run one forwarding cycle and return the response for the client.
    ///
    /// Transport failures and unusable challenges end the cycle with an
    /// error. A rejected probe or login does not: the original `401` is
    /// returned instead.
    pub async fn handle(&self, request: &ProxyRequest) -> Result<ProxyResponse, ProxyError> {
        let mut state = CycleState::ForwardFirst;
        let mut candidate: Option<ProxyResponse> = None;
        let mut challenge: Option<Challenge> = None;

        while state != CycleState::Done {
            state = match state {
                CycleState::ForwardFirst | CycleState::ForwardRetry => {
                    let response = self.transport.send(request).await?;
                    let next = transition(state, response.status);
                    candidate = Some(response);
                    next
                }
                CycleState::AuthProbe => {
                    info!(
                        "Router returned 401 for {} {}, authenticating",
                        request.method, request.path
                    );
                    let probe = self
                        .transport
                        .send_auth(Method::GET, AUTH_PATH, None)
                        .await?;
                    let next = transition(state, probe.status);
                    match next {
                        CycleState::ForwardRetry => {
                            debug!("Session already authenticated, retrying request");
                            metrics::record_auth_attempt("session_valid");
                        }
                        CycleState::AuthLogin => {
                            challenge = Some(Challenge::from_response(&probe).map_err(|e| {
                                error!("Unusable authentication challenge: {}", e);
                                metrics::record_auth_attempt("missing_challenge");
                                e
                            })?);
                        }
                        _ => {
                            warn!(
                                "Authentication probe returned {}, returning original response",
                                probe.status
                            );
                            metrics::record_auth_attempt("probe_aborted");
                        }
                    }
                    next
                }
                CycleState::AuthLogin => {
                    let challenge = challenge.take().ok_or(ProxyError::IncompleteCycle)?;
                    let login = LoginRequest::new(&self.credentials, &challenge).into_json();
                    let response = self
                        .transport
                        .send_auth(Method::POST, AUTH_PATH, Some(&login))
                        .await?;
                    let next = transition(state, response.status);
                    if next == CycleState::ForwardRetry {
                        info!(
                            "Authenticated as '{}' in realm '{}'",
                            self.credentials.login(),
                            challenge.realm
                        );
                        metrics::record_auth_attempt("login_ok");
                    } else {
                        error!(
                            "Router rejected login as '{}' with status {}",
                            self.credentials.login(),
                            response.status.as_u16()
                        );
                        metrics::record_auth_attempt("login_failed");
                    }
                    next
                }
                CycleState::Done => CycleState::Done,
            };
        }

        candidate.ok_or(ProxyError::IncompleteCycle)
    }
}
