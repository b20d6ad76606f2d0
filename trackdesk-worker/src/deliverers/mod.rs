/// Delivery transports
///
/// A deliverer sends one prepared HTTP request and reports the response
/// status. Retry and bookkeeping stay in the orchestrator, so a transport only
/// needs to implement [`Deliverer::deliver`].
///
/// - **Http**: `reqwest` client used in production
/// - **Mock**: records requests and answers with scripted statuses, for tests

pub mod deliverer_trait;
pub mod http;
pub mod mock;

pub use deliverer_trait::{
    Deliverer, DeliveryError, DeliveryMethod, DeliveryRequest, DeliveryResponse, DeliveryResult,
};
pub use http::HttpDeliverer;
pub use mock::MockDeliverer;
