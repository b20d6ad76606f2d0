/// `reqwest` transport
///
/// Redirects are not followed: a 3xx from a webhook endpoint is reported as
/// a failure like any other non-2xx status.

use super::{Deliverer, DeliveryError, DeliveryMethod, DeliveryRequest, DeliveryResponse, DeliveryResult};
use async_trait::async_trait;
use std::time::Duration;

/// Bytes of response body kept for the delivery log
const BODY_EXCERPT_LEN: usize = 512;

const USER_AGENT: &str = concat!("Trackdesk-Webhooks/", env!("CARGO_PKG_VERSION"));

pub struct HttpDeliverer {
    client: reqwest::Client,
}

impl HttpDeliverer {
    pub fn new(timeout: Duration) -> DeliveryResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        Ok(Self { client })
    }
}

fn classify(err: reqwest::Error) -> DeliveryError {
    if err.is_timeout() {
        DeliveryError::Timeout
    } else if err.is_connect() {
        DeliveryError::Connect(err.to_string())
    } else if err.is_builder() {
        DeliveryError::InvalidRequest(err.to_string())
    } else {
        DeliveryError::Transport(err.to_string())
    }
}

fn excerpt(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut end = trimmed.len().min(BODY_EXCERPT_LEN);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    Some(trimmed[..end].to_string())
}

#[async_trait]
impl Deliverer for HttpDeliverer {
    fn name(&self) -> &str {
        "http"
    }

    async fn deliver(&self, request: DeliveryRequest) -> DeliveryResult<DeliveryResponse> {
        let mut builder = match request.method {
            DeliveryMethod::Get => self.client.get(&request.url),
            DeliveryMethod::Post => self.client.post(&request.url),
        };

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        Ok(DeliveryResponse {
            status,
            body_excerpt: excerpt(&body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt() {
        assert_eq!(excerpt("  "), None);
        assert_eq!(excerpt(" ok \n").as_deref(), Some("ok"));

        let long = "é".repeat(BODY_EXCERPT_LEN);
        let cut = excerpt(&long).unwrap();
        assert!(cut.len() <= BODY_EXCERPT_LEN);
        assert!(cut.chars().all(|c| c == 'é'));
    }

    #[tokio::test]
    async fn test_invalid_url_is_an_error() {
        let deliverer = HttpDeliverer::new(Duration::from_secs(1)).unwrap();
        let result = deliverer.deliver(DeliveryRequest::get("not a url")).await;
        assert!(result.is_err());
    }
}
