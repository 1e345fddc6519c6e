//! Credential descriptors attached to sessions or single calls.

use std::{fmt, sync::Arc};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::{
    Method,
    header::{AUTHORIZATION, HeaderMap, HeaderValue},
};
use url::Url;

use crate::error::{KeywordError, Result};

/// Caller-supplied authentication that edits outgoing requests.
///
/// Implementations typically insert an `Authorization` header or a signed
/// query parameter.
///
/// # Examples
///
/// ```
/// use requests_keywords::{Authenticator, Result};
/// use reqwest::{Method, header::{HeaderMap, HeaderValue}};
/// use url::Url;
///
/// #[derive(Debug)]
/// struct ApiKey(&'static str);
///
/// impl Authenticator for ApiKey {
///     fn authenticate(&self, _method: &Method, _url: &Url, headers: &mut HeaderMap) -> Result<()> {
///         headers.insert("x-api-key", HeaderValue::from_static(self.0));
///         Ok(())
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + fmt::Debug {
    /// Applies credentials to a request about to be sent.
    ///
    /// # Errors
    ///
    /// Implementations return an error to abort the request.
    fn authenticate(&self, method: &Method, url: &Url, headers: &mut HeaderMap) -> Result<()>;
}

/// Authentication scheme for a session or call.
#[derive(Clone)]
pub enum Auth {
    /// HTTP Basic.
    Basic {
        /// User name.
        username: String,
        /// Password.
        password: String,
    },
    /// HTTP Digest, answered after the server's `401` challenge.
    Digest {
        /// User name.
        username: String,
        /// Password.
        password: String,
    },
    /// Caller-supplied authenticator.
    Custom(Arc<dyn Authenticator>),
    /// NTLM. Requires a transport with NTLM capability.
    Ntlm {
        /// Windows domain.
        domain: String,
        /// User name without domain.
        username: String,
        /// Password.
        password: String,
    },
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic { username, .. } => {
                f.debug_struct("Basic").field("username", username).field("password", &"***").finish()
            }
            Self::Digest { username, .. } => {
                f.debug_struct("Digest").field("username", username).field("password", &"***").finish()
            }
            Self::Custom(authenticator) => f.debug_tuple("Custom").field(authenticator).finish(),
            Self::Ntlm { domain, username, .. } => f
                .debug_struct("Ntlm")
                .field("domain", domain)
                .field("username", username)
                .field("password", &"***")
                .finish(),
        }
    }
}

impl Auth {
    /// HTTP Basic credentials.
    #[must_use]
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic { username: username.into(), password: password.into() }
    }

    /// HTTP Digest credentials.
    #[must_use]
    pub fn digest(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Digest { username: username.into(), password: password.into() }
    }

    /// Wraps a custom authenticator.
    #[must_use]
    pub fn custom(authenticator: Arc<dyn Authenticator>) -> Self {
        Self::Custom(authenticator)
    }

    /// NTLM credentials from a `[domain, username, password]` triple.
    ///
    /// # Errors
    ///
    /// Returns [`KeywordError::ConfigurationError`] unless exactly three values are given.
    pub fn ntlm<S: AsRef<str>>(credentials: &[S]) -> Result<Self> {
        let [domain, username, password] = credentials else {
            return Err(KeywordError::ConfigurationError(format!(
                "NTLM authentication requires a domain, username and password triple, got {} values",
                credentials.len()
            )));
        };
        Ok(Self::Ntlm {
            domain: domain.as_ref().to_owned(),
            username: username.as_ref().to_owned(),
            password: password.as_ref().to_owned(),
        })
    }

    /// Short scheme name for logging.
    #[must_use]
    pub const fn scheme(&self) -> &'static str {
        match self {
            Self::Basic { .. } => "basic",
            Self::Digest { .. } => "digest",
            Self::Custom(_) => "custom",
            Self::Ntlm { .. } => "ntlm",
        }
    }

    /// `DOMAIN\user` form of NTLM credentials.
    #[must_use]
    pub fn ntlm_principal(&self) -> Option<String> {
        match self {
            Self::Ntlm { domain, username, .. } => Some(format!("{domain}\\{username}")),
            _ => None,
        }
    }

    /// Applies pre-emptive credentials to an outgoing request.
    ///
    /// Digest credentials are not pre-emptive and leave the headers untouched.
    ///
    /// # Errors
    ///
    /// Returns [`KeywordError::ConfigurationError`] for NTLM, and propagates
    /// errors from a custom authenticator.
    pub(crate) fn apply(&self, method: &Method, url: &Url, headers: &mut HeaderMap) -> Result<()> {
        match self {
            Self::Basic { username, password } => {
                headers.insert(AUTHORIZATION, basic_header(username, password)?);
                Ok(())
            }
            Self::Digest { .. } => Ok(()),
            Self::Custom(authenticator) => authenticator.authenticate(method, url, headers),
            Self::Ntlm { .. } => Err(KeywordError::ConfigurationError(
                "NTLM authentication is not available in this transport".to_owned(),
            )),
        }
    }
}

fn basic_header(username: &str, password: &str) -> Result<HeaderValue> {
    let token = STANDARD.encode(format!("{username}:{password}"));
    let mut value = HeaderValue::from_str(&format!("Basic {token}"))
        .map_err(|e| KeywordError::InvalidInput(format!("invalid basic credentials: {e}")))?;
    value.set_sensitive(true);
    Ok(value)
}
