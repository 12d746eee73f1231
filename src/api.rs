// API client module: a small blocking HTTP client for the IRMS admin
// service. Every call is synchronous; a batch issues one call per row.

use std::fmt;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::record::SubjectPayload;
use crate::session::Session;

const LOGIN_PATH: &str = "/authorize/admin";
const SUBJECT_PATH: &str = "/admin/records";

/// Status recorded for an accepted reply that carries no message.
pub const DEFAULT_SUCCESS_STATUS: &str = "Inserted";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("could not decode response: {0}")]
    Decode(#[source] serde_json::Error),

    /// Server-reported login failure, verbatim.
    #[error("{0}")]
    Auth(String),
}

/// Why a submission did not reach a decodable server reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    InvalidRequest,
    RequestFailed,
    UndecodableResponse,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportError::InvalidRequest => "request formation failed",
            TransportError::RequestFailed => "request failed",
            TransportError::UndecodableResponse => "could not decode response",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    Transport(TransportError),
    /// The server refused the credential (401/403).
    Unauthorized(String),
    /// The server understood the call and declined it, e.g. a duplicate.
    Rejected(String),
}

impl Failure {
    /// Failures that will repeat for every following row.
    pub fn is_systemic(&self) -> bool {
        !matches!(self, Failure::Rejected(_))
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Transport(error) => write!(f, "{error}"),
            Failure::Unauthorized(message) => write!(f, "unauthorized: {message}"),
            Failure::Rejected(message) => f.write_str(message),
        }
    }
}

/// Result of one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Success(String),
    Failure(Failure),
}

impl SubmissionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SubmissionOutcome::Success(_))
    }

    /// The message the server sent back, if the call got that far.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            SubmissionOutcome::Success(message)
            | SubmissionOutcome::Failure(Failure::Unauthorized(message))
            | SubmissionOutcome::Failure(Failure::Rejected(message)) => Some(message),
            SubmissionOutcome::Failure(Failure::Transport(_)) => None,
        }
    }
}

impl fmt::Display for SubmissionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionOutcome::Success(message) => f.write_str(message),
            SubmissionOutcome::Failure(failure) => write!(f, "{failure}"),
        }
    }
}

/// Issues one record submission under a session.
pub trait RecordSubmitter {
    fn submit<P: Serialize>(&self, endpoint: &str, payload: &P, session: &Session)
        -> SubmissionOutcome;
}

/// Login request payload.
#[derive(Serialize, Debug)]
struct AuthRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// Login reply: a token on success, a message on failure.
#[derive(Deserialize, Debug)]
struct AuthResponse {
    token: Option<String>,
    msg: Option<Value>,
}

/// Reply shape shared by the admin endpoints. `msg` is kept as a
/// `serde_json::Value` because the server is not strict about its type.
#[derive(Deserialize, Debug, Default)]
struct ServerReply {
    msg: Option<Value>,
    error: Option<Value>,
    success: Option<bool>,
}

impl ServerReply {
    fn message(&self) -> Option<String> {
        self.msg.as_ref().or(self.error.as_ref()).map(value_text)
    }

    fn is_rejection(&self) -> bool {
        self.success == Some(false) || self.error.is_some()
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Simple API client that holds a reqwest blocking client and the base URL
/// of the admin service.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let client = Client::builder().build().map_err(ApiError::Client)?;
        Ok(ApiClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Authorization header for the session; empty when there is no token.
    fn auth_headers(session: &Session) -> Result<HeaderMap, TransportError> {
        let mut headers = HeaderMap::new();
        if !session.token().is_empty() {
            let value = HeaderValue::from_str(&format!("Bearer {}", session.token()))
                .map_err(|_| TransportError::InvalidRequest)?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Exchange credentials for a session. The server's reason for a refusal
    /// is returned verbatim.
    pub fn login(&self, email: &str, password: &str) -> Result<Session, ApiError> {
        let res = self
            .client
            .post(self.url(LOGIN_PATH))
            .json(&AuthRequest { email, password })
            .send()?;
        let status = res.status();
        let body = res.text()?;
        let reply: AuthResponse = serde_json::from_str(&body).map_err(ApiError::Decode)?;
        if let Some(msg) = reply.msg.as_ref() {
            return Err(ApiError::Auth(value_text(msg)));
        }
        match reply.token {
            Some(token) if status.is_success() => Ok(Session::new(&self.base_url, token)),
            _ => Err(ApiError::Auth(format!("login failed: {status}"))),
        }
    }

    /// Create a single subject.
    pub fn insert_subject(&self, payload: &SubjectPayload, session: &Session) -> SubmissionOutcome {
        self.submit(SUBJECT_PATH, payload, session)
    }
}

impl RecordSubmitter for ApiClient {
    fn submit<P: Serialize>(
        &self,
        endpoint: &str,
        payload: &P,
        session: &Session,
    ) -> SubmissionOutcome {
        let headers = match Self::auth_headers(session) {
            Ok(headers) => headers,
            Err(error) => return SubmissionOutcome::Failure(Failure::Transport(error)),
        };
        let url = self.url(endpoint);
        debug!(%url, "submitting");
        let res = match self.client.post(&url).headers(headers).json(payload).send() {
            Ok(res) => res,
            Err(error) => {
                warn!(%url, %error, "request failed");
                return SubmissionOutcome::Failure(Failure::Transport(
                    TransportError::RequestFailed,
                ));
            }
        };
        let status = res.status();
        match res.text() {
            Ok(body) => classify(status, &body),
            Err(error) => {
                warn!(%url, %error, "could not read response body");
                SubmissionOutcome::Failure(Failure::Transport(TransportError::UndecodableResponse))
            }
        }
    }
}

/// Decide the outcome from the reply. A decodable reply is not necessarily
/// an accepted one: the status code and the reply's own fields both count.
fn classify(status: StatusCode, body: &str) -> SubmissionOutcome {
    let reply = serde_json::from_str::<ServerReply>(body);
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        let message = reply
            .ok()
            .and_then(|reply| reply.message())
            .unwrap_or_else(|| status.to_string());
        return SubmissionOutcome::Failure(Failure::Unauthorized(message));
    }
    let reply = match reply {
        Ok(reply) => reply,
        Err(_) => {
            return SubmissionOutcome::Failure(Failure::Transport(
                TransportError::UndecodableResponse,
            ))
        }
    };
    if !status.is_success() || reply.is_rejection() {
        let message = reply.message().unwrap_or_else(|| status.to_string());
        SubmissionOutcome::Failure(Failure::Rejected(message))
    } else {
        let message = reply
            .message()
            .unwrap_or_else(|| DEFAULT_SUCCESS_STATUS.to_string());
        SubmissionOutcome::Success(message)
    }
}
