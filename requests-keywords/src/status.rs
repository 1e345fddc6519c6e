//! Status assertions against numeric, named, or wildcard expectations.

use std::{fmt, str::FromStr};

use crate::{
    error::{KeywordError, Result},
    response::Response,
};

/// Status names and their aliases, in the order later entries take precedence.
const STATUS_NAMES: &[(u16, &[&str])] = &[
    (100, &["continue"]),
    (101, &["switching_protocols"]),
    (102, &["processing"]),
    (103, &["checkpoint", "early_hints"]),
    (122, &["uri_too_long", "request_uri_too_long"]),
    (200, &["ok", "okay", "all_ok", "all_okay", "all_good", "\\o/", "✓"]),
    (201, &["created"]),
    (202, &["accepted"]),
    (203, &["non_authoritative_info", "non_authoritative_information"]),
    (204, &["no_content"]),
    (205, &["reset_content", "reset"]),
    (206, &["partial_content", "partial"]),
    (207, &["multi_status", "multiple_status", "multi_stati", "multiple_stati"]),
    (208, &["already_reported"]),
    (226, &["im_used"]),
    (300, &["multiple_choices"]),
    (301, &["moved_permanently", "moved", "\\o-"]),
    (302, &["found"]),
    (303, &["see_other", "other"]),
    (304, &["not_modified"]),
    (305, &["use_proxy"]),
    (306, &["switch_proxy"]),
    (307, &["temporary_redirect", "temporary_moved", "temporary"]),
    (308, &["permanent_redirect", "resume_incomplete", "resume"]),
    (400, &["bad_request", "bad"]),
    (401, &["unauthorized"]),
    (402, &["payment_required", "payment"]),
    (403, &["forbidden"]),
    (404, &["not_found", "-o-"]),
    (405, &["method_not_allowed", "not_allowed"]),
    (406, &["not_acceptable"]),
    (407, &["proxy_authentication_required", "proxy_auth", "proxy_authentication"]),
    (408, &["request_timeout", "timeout"]),
    (409, &["conflict"]),
    (410, &["gone"]),
    (411, &["length_required"]),
    (412, &["precondition_failed", "precondition"]),
    (413, &["request_entity_too_large", "content_too_large"]),
    (414, &["request_uri_too_large", "uri_too_long"]),
    (415, &["unsupported_media_type", "unsupported_media", "media_type"]),
    (416, &["requested_range_not_satisfiable", "requested_range", "range_not_satisfiable"]),
    (417, &["expectation_failed"]),
    (418, &["im_a_teapot", "teapot", "i_am_a_teapot"]),
    (421, &["misdirected_request"]),
    (422, &["unprocessable_entity", "unprocessable", "unprocessable_content"]),
    (423, &["locked"]),
    (424, &["failed_dependency", "dependency"]),
    (425, &["unordered_collection", "unordered", "too_early"]),
    (426, &["upgrade_required", "upgrade"]),
    (428, &["precondition_required", "precondition"]),
    (429, &["too_many_requests", "too_many"]),
    (431, &["header_fields_too_large", "fields_too_large"]),
    (444, &["no_response", "none"]),
    (449, &["retry_with", "retry"]),
    (450, &["blocked_by_windows_parental_controls", "parental_controls"]),
    (451, &["unavailable_for_legal_reasons", "legal_reasons"]),
    (499, &["client_closed_request"]),
    (500, &["internal_server_error", "server_error", "/o\\", "✗"]),
    (501, &["not_implemented"]),
    (502, &["bad_gateway"]),
    (503, &["service_unavailable", "unavailable"]),
    (504, &["gateway_timeout"]),
    (505, &["http_version_not_supported", "http_version"]),
    (506, &["variant_also_negotiates"]),
    (507, &["insufficient_storage"]),
    (509, &["bandwidth_limit_exceeded", "bandwidth"]),
    (510, &["not_extended"]),
    (511, &["network_authentication_required", "network_auth", "network_authentication"]),
];

/// Resolves a human-readable status name to its code.
///
/// Matching is case-insensitive and treats spaces as underscores, so
/// `"Not Found"`, `"not found"` and `"NOT_FOUND"` all resolve to 404.
///
/// # Errors
///
/// Returns [`KeywordError::UnknownStatusName`] for names with no known code.
pub fn parse_named_status(name: &str) -> Result<u16> {
    let key = name.trim().to_lowercase().replace(' ', "_");
    STATUS_NAMES
        .iter()
        .rev()
        .find(|(_, names)| names.contains(&key.as_str()))
        .map(|(code, _)| *code)
        .ok_or_else(|| KeywordError::UnknownStatusName(name.to_owned()))
}

/// What a status assertion expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectedStatus {
    /// Exact status code.
    Code(u16),
    /// Status name, resolved when the assertion runs.
    Named(String),
    /// Matches every status.
    Any,
}

impl ExpectedStatus {
    /// Resolves to a concrete code, or `None` for [`ExpectedStatus::Any`].
    ///
    /// # Errors
    ///
    /// Returns [`KeywordError::UnknownStatusName`] for an unrecognized name.
    pub fn resolve(&self) -> Result<Option<u16>> {
        match self {
            Self::Code(code) => Ok(Some(*code)),
            Self::Named(name) => parse_named_status(name).map(Some),
            Self::Any => Ok(None),
        }
    }
}

impl FromStr for ExpectedStatus {
    type Err = KeywordError;

    fn from_str(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("any") || trimmed.eq_ignore_ascii_case("anything") {
            return Ok(Self::Any);
        }
        if let Ok(code) = trimmed.parse::<u16>() {
            return Ok(Self::Code(code));
        }
        if trimmed.is_empty() {
            return Err(KeywordError::InvalidInput("expected status must not be empty".to_owned()));
        }
        Ok(Self::Named(trimmed.to_owned()))
    }
}

impl From<u16> for ExpectedStatus {
    fn from(code: u16) -> Self {
        Self::Code(code)
    }
}

impl fmt::Display for ExpectedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "{code}"),
            Self::Named(name) => f.write_str(name),
            Self::Any => f.write_str("any"),
        }
    }
}

/// Checks `response` against `expected`.
///
/// With no expectation the response must not be a client or server error.
/// `message`, when given, prefixes the failure text.
///
/// # Errors
///
/// - [`KeywordError::HttpStatus`] when `expected` is `None` and the status is 400 or above
/// - [`KeywordError::StatusMismatch`] when the status differs from the expected code
/// - [`KeywordError::UnknownStatusName`] when a named expectation is not recognized
///
/// # Examples
///
/// ```
/// use requests_keywords::{ExpectedStatus, Response, check_status};
/// use reqwest::{Method, header::HeaderMap};
///
/// let response = Response::new(404, HeaderMap::new(), Vec::new(), "http://h/missing", Method::GET);
///
/// check_status(Some(&"not found".parse().unwrap()), &response, None).unwrap();
/// check_status(Some(&ExpectedStatus::Any), &response, None).unwrap();
/// assert!(check_status(None, &response, None).is_err());
/// ```
pub fn check_status(expected: Option<&ExpectedStatus>, response: &Response, message: Option<&str>) -> Result<()> {
    let Some(expected) = expected else {
        return response.raise_for_status();
    };
    let Some(code) = expected.resolve()? else {
        return Ok(());
    };
    if response.status() == code {
        return Ok(());
    }
    Err(KeywordError::StatusMismatch {
        url: response.url().to_owned(),
        expected: code,
        actual: response.status(),
        message: message.map(|m| format!("{m} ")).unwrap_or_default(),
    })
}
