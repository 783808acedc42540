#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]

pub mod cors;
pub mod error;
pub mod gateway;
pub mod recover;
pub mod relay;
pub mod route;
pub mod server;
pub mod transport;

pub use error::GatewayError;
pub use gateway::Gateway;
pub use recover::{StreamAborted, abort_stream};
pub use relay::{RelayError, StreamRelay};
pub use server::{GatewayServer, ServeError, ServerStatus, serve};
pub use transport::{ErrorClass, TransportError, UpstreamClient};
