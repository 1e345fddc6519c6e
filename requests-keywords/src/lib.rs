//! requests-keywords: HTTP Keywords for Table-Driven Test Automation
//!
//! A keyword library that lets a test runner issue HTTP requests through named
//! sessions and assert on the responses. Networking is delegated to
//! [`reqwest`]; this crate adds the session registry, URL merging, body
//! encoding, retry policy, redirect history and status assertions on top.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │   Test runner    │  calls keywords by name
//! └────────┬─────────┘
//!          │
//! ┌────────▼──────────────────────────────────────────┐
//! │              RequestsLibrary (keywords)           │
//! │  ┌──────────────┐  ┌────────────┐  ┌───────────┐  │
//! │  │   Session    │  │ Dispatcher │  │  Status   │  │
//! │  │   Registry   │──│ url merge, │──│ assertion │  │
//! │  │              │  │ body, auth │  │           │  │
//! │  └──────────────┘  └─────┬──────┘  └───────────┘  │
//! └──────────────────────────┼────────────────────────┘
//!                            │ retry policy
//! ┌──────────────────────────▼────────────────────────┐
//! │        Transport (HttpTransport over reqwest)     │
//! └───────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use requests_keywords::{CallOptions, RequestsLibrary, SessionOptions};
//!
//! # fn example() -> requests_keywords::Result<()> {
//! let mut library = RequestsLibrary::new()?;
//!
//! let options = SessionOptions::default()
//!     .with_header("Accept", "application/json")
//!     .with_retry_status_list(["502", "503"]);
//! library.create_session("api", "https://api.example.com/v1", options)?;
//!
//! let response = library.post_on_session(
//!     "api",
//!     "/users",
//!     CallOptions::default().with_data(vec![("name", "ferris")]),
//!     Some("created"),
//!     None,
//! )?;
//! println!("{}", response.text());
//!
//! library.close();
//! # Ok(())
//! # }
//! ```
//!
//! # Module Organization
//!
//! - [`keywords`]: the blocking keyword façade
//! - [`session`]: sessions, credentials and the alias registry
//! - [`dispatch`]: per-call options and the request pipeline
//! - [`body`]: request data normalization
//! - [`transport`]: sealed transport abstraction and the HTTP implementation
//! - [`reliability`]: retry with exponential backoff
//! - [`status`]: status names and assertions
//! - [`logging`]: request/response logging with credential redaction
//! - [`config`]: TOML configuration
//! - [`error`]: error types
//!
//! # Error Handling
//!
//! All operations return [`Result<T, KeywordError>`](error::Result). Network
//! failures and status failures are separate variants:
//!
//! ```rust,no_run
//! use requests_keywords::{CallOptions, KeywordError, RequestsLibrary};
//!
//! # fn example(library: &mut RequestsLibrary) {
//! match library.get("http://localhost:9/", CallOptions::default(), None, None) {
//!     Ok(response) => println!("{}", response.status()),
//!     Err(KeywordError::Transport(e)) => eprintln!("{} failure: {e}", e.kind()),
//!     Err(KeywordError::HttpStatus { status, .. }) => eprintln!("server answered {status}"),
//!     Err(e) => eprintln!("{e}"),
//! }
//! # }
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![allow(
    clippy::multiple_crate_versions,
    reason = "transitive dependencies from reqwest and rustls"
)]

pub mod body;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod keywords;
pub mod logging;
pub mod reliability;
pub mod response;
pub mod session;
pub mod status;
pub mod transport;
mod url_merge;

pub use body::{FilePart, RequestData, StreamBody};
pub use config::LibraryConfig;
pub use dispatch::CallOptions;
pub use error::{KeywordError, Result, TransportError, TransportErrorKind};
pub use keywords::RequestsLibrary;
pub use response::{Response, SetCookie};
pub use session::{Auth, Authenticator, ClientCert, Session, SessionOptions, SessionRegistry, Timeout, Verify};
pub use status::{ExpectedStatus, check_status, parse_named_status};
pub use url_merge::merge_url;
