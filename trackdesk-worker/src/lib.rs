//! # Trackdesk Worker Library
//!
//! Sends the outbound HTTP calls the API enqueues: signed webhook POSTs to
//! tenant endpoints and postback GETs to affiliate trackers.
//!
//! ## Modules
//!
//! - `queue`: claims and settles rows in the `deliveries` table
//! - `deliverers`: the HTTP seam (reqwest in production, mock in tests)
//! - `orchestrator`: the poll, send and record loop
//! - `backoff`: retry schedule
//! - `config`: environment configuration
//!
//! ## Example
//!
//! ```no_run
//! use trackdesk_worker::deliverers::{Deliverer, MockDeliverer};
//!
//! let deliverer = MockDeliverer::new();
//! println!("Deliverer: {}", deliverer.name());
//! ```

pub mod backoff;
pub mod config;
pub mod deliverers;
pub mod orchestrator;
pub mod queue;
