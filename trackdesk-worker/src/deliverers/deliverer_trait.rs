/// Core Deliverer trait and request types
///
/// # Example
///
/// ```no_run
/// use trackdesk_worker::deliverers::{Deliverer, DeliveryRequest, DeliveryResponse, DeliveryResult};
/// use async_trait::async_trait;
///
/// struct StdoutDeliverer;
///
/// #[async_trait]
/// impl Deliverer for StdoutDeliverer {
///     fn name(&self) -> &str {
///         "stdout"
///     }
///
///     async fn deliver(&self, request: DeliveryRequest) -> DeliveryResult<DeliveryResponse> {
///         println!("{} {}", request.method, request.url);
///         Ok(DeliveryResponse::new(200))
///     }
/// }
/// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Transport error; the request never produced an HTTP status
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("Request timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

pub type DeliveryResult<T> = Result<T, DeliveryError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeliveryMethod {
    Get,
    Post,
}

impl DeliveryMethod {
    /// Parses the stored method, defaulting to POST
    pub fn from_stored(method: &str) -> Self {
        if method.eq_ignore_ascii_case("GET") {
            DeliveryMethod::Get
        } else {
            DeliveryMethod::Post
        }
    }
}

impl fmt::Display for DeliveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryMethod::Get => write!(f, "GET"),
            DeliveryMethod::Post => write!(f, "POST"),
        }
    }
}

/// Prepared outbound request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRequest {
    pub method: DeliveryMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl DeliveryRequest {
    /// JSON POST with the given headers
    pub fn post_json(url: impl Into<String>, body: Vec<u8>, headers: Vec<(String, String)>) -> Self {
        let mut headers = headers;
        headers.push(("Content-Type".to_string(), "application/json".to_string()));

        Self {
            method: DeliveryMethod::Post,
            url: url.into(),
            headers,
            body: Some(body),
        }
    }

    /// Bodyless GET
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: DeliveryMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// First header value with this name, ignoring case
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Response status and a short body excerpt for the delivery log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResponse {
    pub status: u16,
    pub body_excerpt: Option<String>,
}

impl DeliveryResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            body_excerpt: None,
        }
    }

    /// Any 2xx counts as delivered
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Deliverer: Send + Sync {
    /// Used for logging
    fn name(&self) -> &str;

    /// Sends one request
    ///
    /// Returns `Ok` whenever the server answered, whatever the status.
    async fn deliver(&self, request: DeliveryRequest) -> DeliveryResult<DeliveryResponse>;
}
