/// Recording deliverer for tests
///
/// Answers each request with the next scripted outcome, repeating the last
/// one once the script runs out, and keeps every request it was given.
///
/// ```no_run
/// use trackdesk_worker::deliverers::{MockDeliverer, DeliveryError};
///
/// // First call fails at the transport, then 500, then 200 forever
/// let mock = MockDeliverer::scripted(vec![
///     Err(DeliveryError::Timeout),
///     Ok(500),
///     Ok(200),
/// ]);
/// ```

use super::{Deliverer, DeliveryError, DeliveryRequest, DeliveryResponse, DeliveryResult};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

type Outcome = Result<u16, DeliveryError>;

#[derive(Clone, Default)]
pub struct MockDeliverer {
    script: Arc<Mutex<Vec<Outcome>>>,
    requests: Arc<Mutex<Vec<DeliveryRequest>>>,
}

impl MockDeliverer {
    /// Always answers 200
    pub fn new() -> Self {
        Self::with_status(200)
    }

    pub fn with_status(status: u16) -> Self {
        Self::scripted(vec![Ok(status)])
    }

    pub fn scripted(outcomes: Vec<Outcome>) -> Self {
        let mut script = outcomes;
        script.reverse();
        Self {
            script: Arc::new(Mutex::new(script)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Requests received so far, oldest first
    pub fn requests(&self) -> Vec<DeliveryRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn next_outcome(&self) -> Outcome {
        let mut script = self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match script.len() {
            0 => Ok(200),
            1 => script[0].clone(),
            _ => script.pop().unwrap_or(Ok(200)),
        }
    }
}

#[async_trait]
impl Deliverer for MockDeliverer {
    fn name(&self) -> &str {
        "mock"
    }

    async fn deliver(&self, request: DeliveryRequest) -> DeliveryResult<DeliveryResponse> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request);

        self.next_outcome().map(DeliveryResponse::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_requests() {
        let mock = MockDeliverer::new();
        mock.deliver(DeliveryRequest::get("https://a.example.com/pb")).await.unwrap();
        mock.deliver(DeliveryRequest::get("https://b.example.com/pb")).await.unwrap();

        let urls: Vec<String> = mock.requests().into_iter().map(|r| r.url).collect();
        assert_eq!(urls, vec!["https://a.example.com/pb", "https://b.example.com/pb"]);
    }

    #[tokio::test]
    async fn test_script_repeats_last_outcome() {
        let mock = MockDeliverer::scripted(vec![Err(DeliveryError::Timeout), Ok(500), Ok(204)]);
        let request = DeliveryRequest::get("https://example.com");

        assert_eq!(mock.deliver(request.clone()).await, Err(DeliveryError::Timeout));
        assert_eq!(mock.deliver(request.clone()).await.unwrap().status, 500);
        assert_eq!(mock.deliver(request.clone()).await.unwrap().status, 204);
        assert_eq!(mock.deliver(request).await.unwrap().status, 204);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let mock = MockDeliverer::new();
        let clone = mock.clone();
        clone.deliver(DeliveryRequest::get("https://example.com")).await.unwrap();
        assert_eq!(mock.requests().len(), 1);
    }
}
