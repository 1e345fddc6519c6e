//! Echo server binary.
//!
//! Listens on `ECHO_SERVER_ADDR` (default `127.0.0.1:5000`). `LOG_FORMAT`
//! selects `json` or `pretty` logs and `RUST_LOG` the filter.

#![allow(
    clippy::multiple_crate_versions,
    reason = "transitive dependencies from axum and hyper"
)]

use std::net::SocketAddr;

use requests_echo_server::{
    DEFAULT_ADDR, ServerError,
    observability::{LogFormat, init_observability},
    serve,
};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    init_observability(LogFormat::from_env());

    let raw = std::env::var("ECHO_SERVER_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_owned());
    let addr: SocketAddr = raw.parse().map_err(|e| ServerError::InvalidAddress(format!("{raw}: {e}")))?;

    serve(TcpListener::bind(addr).await?).await
}
