//! HTTP gateway that submits generation requests and streams session
//! snapshots as Server-Sent Events, with bearer auth and a health endpoint.

mod error;
mod handlers;
mod router;
mod server;

pub use error::GatewayError;
pub use server::GatewayServer;
