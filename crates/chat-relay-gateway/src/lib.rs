//! HTTP gateway for the chat relay.
//!
//! Hosts the two streaming relay endpoints (`/api/chat` and `/api/research`),
//! validates request bodies, and hands each accepted request to a relay task
//! whose frames become the response body.

pub mod handlers;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod profiles;
pub mod server;
pub mod state;

pub use profiles::EndpointProfile;
pub use server::{build_router, start_gateway};
pub use state::AppState;
