//! requests-echo-server: a local httpbin-style fixture.
//!
//! Echoes requests back as JSON and answers with configurable statuses and
//! redirects, so the keyword library can be tested without network access.
//!
//! # Endpoints
//!
//! | Path | Behavior |
//! |------|----------|
//! | `/` | plain-text banner |
//! | `/headers` | request headers |
//! | `/anything[/*]`, `/get` | url, args, headers, origin, method, form, data, files, json |
//! | `/status/{codes}` | `code` or weighted `code:weight,...` |
//! | `/redirect-to?url=..&status_code=..` | raw `Location`, status 300-399 (default 302) |
//! | `/redirect/{n}` | `n` relative redirects ending at `/get` |
//! | `/cookies`, `/cookies/set?k=v`, `/cookies/delete?k` | cookie echo, `Set-Cookie` and expiry |
//! | `/basic-auth/{user}/{passwd}` | HTTP basic challenge |
//! | `/digest-auth/auth/{user}/{passwd}` | HTTP digest challenge (MD5, `qop=auth`) |
//! | `/delay/{secs}` | answers after a delay (capped at 10 s) |
//!
//! # Examples
//!
//! ```no_run
//! # fn main() -> std::io::Result<()> {
//! let addr = requests_echo_server::spawn_on_thread()?;
//! println!("echo server on http://{addr}");
//! # Ok(())
//! # }
//! ```

#![allow(
    clippy::multiple_crate_versions,
    reason = "transitive dependencies from axum and hyper"
)]

use std::{io, net::SocketAddr, thread};

use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info};

pub mod observability;
mod routes;

/// Default listen address of the binary.
pub const DEFAULT_ADDR: &str = "127.0.0.1:5000";

/// Errors raised while starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listen address could not be parsed.
    #[error("invalid listen address: {0}")]
    InvalidAddress(String),

    /// Binding or serving failed.
    #[error("server I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Builds the router with every endpoint.
#[must_use]
pub fn router() -> Router {
    routes::router()
}

/// Serves requests on `listener` until the process exits.
///
/// # Errors
///
/// Returns [`ServerError::Io`] if accepting connections fails.
pub async fn serve(listener: TcpListener) -> Result<(), ServerError> {
    let addr = listener.local_addr()?;
    info!(%addr, "Echo server listening");
    axum::serve(listener, router().into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}

/// Starts the server on an ephemeral loopback port in a background thread.
///
/// The thread owns its own runtime, so blocking callers can use the server
/// without an async context. Returns the bound address.
///
/// # Errors
///
/// Returns an error if the port cannot be bound or the thread cannot start.
pub fn spawn_on_thread() -> io::Result<SocketAddr> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    listener.set_nonblocking(true)?;
    let addr = listener.local_addr()?;

    thread::Builder::new().name(format!("echo-server-{}", addr.port())).spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(error = %e, "Failed to start echo server runtime");
                return;
            }
        };
        let outcome = runtime.block_on(async move { serve(TcpListener::from_std(listener)?).await });
        if let Err(e) = outcome {
            error!(error = %e, "Echo server stopped");
        }
    })?;

    Ok(addr)
}
