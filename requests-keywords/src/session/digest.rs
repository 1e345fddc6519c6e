//! HTTP Digest authentication (RFC 7616) challenge/response.
//!
//! Supports MD5 and SHA-256 with their `-sess` variants and `qop=auth`.

use std::fmt::Write as _;

use md5::Md5;
use sha2::{Digest as _, Sha256};

/// Digest hash algorithm announced by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestAlgorithm {
    /// No `algorithm` parameter; behaves as MD5 and is not echoed back.
    #[default]
    Unspecified,
    /// MD5.
    Md5,
    /// MD5-sess.
    Md5Sess,
    /// SHA-256.
    Sha256,
    /// SHA-256-sess.
    Sha256Sess,
}

impl DigestAlgorithm {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "md5" => Some(Self::Md5),
            "md5-sess" => Some(Self::Md5Sess),
            "sha-256" => Some(Self::Sha256),
            "sha-256-sess" => Some(Self::Sha256Sess),
            _ => None,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Unspecified => "",
            Self::Md5 => "MD5",
            Self::Md5Sess => "MD5-sess",
            Self::Sha256 => "SHA-256",
            Self::Sha256Sess => "SHA-256-sess",
        }
    }

    const fn is_session(self) -> bool {
        matches!(self, Self::Md5Sess | Self::Sha256Sess)
    }

    fn hex_hash(self, input: &str) -> String {
        let digest: Vec<u8> = match self {
            Self::Sha256 | Self::Sha256Sess => Sha256::digest(input.as_bytes()).to_vec(),
            Self::Unspecified | Self::Md5 | Self::Md5Sess => Md5::digest(input.as_bytes()).to_vec(),
        };
        hex::encode(digest)
    }
}

/// A parsed `WWW-Authenticate: Digest ...` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    realm: String,
    nonce: String,
    opaque: Option<String>,
    algorithm: DigestAlgorithm,
    qop_auth: bool,
}

impl DigestChallenge {
    /// Parses a full header value such as `Digest realm="r", nonce="n", qop="auth"`.
    ///
    /// Returns `None` for other schemes, unsupported algorithms, or a missing nonce.
    #[must_use]
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, params) = header.split_once(char::is_whitespace)?;
        if !scheme.eq_ignore_ascii_case("digest") {
            return None;
        }

        let mut challenge = Self {
            realm: String::new(),
            nonce: String::new(),
            opaque: None,
            algorithm: DigestAlgorithm::default(),
            qop_auth: false,
        };

        for part in split_params(params) {
            let (key, value) = parse_param(part)?;
            match key.to_ascii_lowercase().as_str() {
                "realm" => value.clone_into(&mut challenge.realm),
                "nonce" => value.clone_into(&mut challenge.nonce),
                "opaque" => challenge.opaque = Some(value.to_owned()),
                "algorithm" => challenge.algorithm = DigestAlgorithm::parse(value)?,
                "qop" => {
                    challenge.qop_auth =
                        value.split(',').any(|qop| qop.trim().eq_ignore_ascii_case("auth"));
                }
                _ => {}
            }
        }

        (!challenge.nonce.is_empty()).then_some(challenge)
    }

    /// Realm announced by the server.
    #[must_use]
    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Builds the `Authorization` header value answering this challenge.
    #[must_use]
    pub fn authorization(
        &self,
        method: &str,
        uri: &str,
        username: &str,
        password: &str,
        nonce_count: u32,
        cnonce: &str,
    ) -> String {
        let nc = format!("{nonce_count:08x}");
        let response = self.response(method, uri, username, password, cnonce, &nc);

        let mut header = format!(
            "Digest username=\"{username}\", realm=\"{}\", nonce=\"{}\", uri=\"{uri}\"",
            self.realm, self.nonce
        );
        if self.algorithm != DigestAlgorithm::Unspecified {
            let _ = write!(header, ", algorithm={}", self.algorithm.as_str());
        }
        let _ = write!(header, ", response=\"{response}\"");
        if let Some(opaque) = &self.opaque {
            let _ = write!(header, ", opaque=\"{opaque}\"");
        }
        if self.qop_auth {
            let _ = write!(header, ", qop=auth, nc={nc}, cnonce=\"{cnonce}\"");
        }
        header
    }

    fn response(&self, method: &str, uri: &str, username: &str, password: &str, cnonce: &str, nc: &str) -> String {
        let hash = |input: &str| self.algorithm.hex_hash(input);

        let mut ha1 = hash(&format!("{username}:{}:{password}", self.realm));
        if self.algorithm.is_session() {
            ha1 = hash(&format!("{ha1}:{}:{cnonce}", self.nonce));
        }
        let ha2 = hash(&format!("{method}:{uri}"));

        if self.qop_auth {
            hash(&format!("{ha1}:{}:{nc}:{cnonce}:auth:{ha2}", self.nonce))
        } else {
            hash(&format!("{ha1}:{}:{ha2}", self.nonce))
        }
    }
}

/// Generates a random 16-hex-digit client nonce.
#[must_use]
pub fn generate_cnonce() -> String {
    format!("{:016x}", rand::random::<u64>())
}

/// Splits challenge parameters on commas outside quotes.
fn split_params(params: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;

    for (i, c) in params.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                let part = params[start..i].trim();
                if !part.is_empty() {
                    parts.push(part);
                }
                start = i + 1;
            }
            _ => {}
        }
    }
    let last = params[start..].trim();
    if !last.is_empty() {
        parts.push(last);
    }
    parts
}

fn parse_param(param: &str) -> Option<(&str, &str)> {
    let (key, value) = param.split_once('=')?;
    let value = value.trim();
    let value = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')).unwrap_or(value);
    Some((key.trim(), value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_challenge() {
        let challenge = DigestChallenge::parse(
            r#"Digest realm="testrealm@host.com", nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093", qop="auth,auth-int""#,
        )
        .unwrap();
        assert_eq!(challenge.realm(), "testrealm@host.com");
        assert_eq!(challenge.nonce, "dcd98b7102dd2f0e8b11d0f600bfb0c093");
        assert!(challenge.qop_auth);
        assert_eq!(challenge.algorithm, DigestAlgorithm::Unspecified);
    }

    #[test]
    fn test_parse_rejects_other_schemes_and_missing_nonce() {
        assert!(DigestChallenge::parse(r#"Basic realm="x""#).is_none());
        assert!(DigestChallenge::parse(r#"Digest realm="x""#).is_none());
        assert!(DigestChallenge::parse(r#"Digest realm="x", nonce="n", algorithm=SHA-512-256"#).is_none());
    }

    #[test]
    fn test_parse_quoted_comma() {
        let challenge = DigestChallenge::parse(r#"Digest realm="a, b", nonce="n", opaque="o""#).unwrap();
        assert_eq!(challenge.realm(), "a, b");
        assert_eq!(challenge.opaque.as_deref(), Some("o"));
    }

    #[test]
    fn test_rfc2617_example_response() {
        let challenge = DigestChallenge::parse(
            r#"Digest realm="testrealm@host.com", qop="auth", nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093", opaque="5ccc069c403ebaf9f0171e9517f40e41""#,
        )
        .unwrap();
        let header =
            challenge.authorization("GET", "/dir/index.html", "Mufasa", "Circle Of Life", 1, "0a4f113b");
        assert!(header.contains(r#"response="6629fae49393a05397450978507c4ef1""#), "{header}");
        assert!(header.contains("nc=00000001"));
        assert!(header.contains(r#"opaque="5ccc069c403ebaf9f0171e9517f40e41""#));
        assert!(!header.contains("algorithm="));
    }

    #[test]
    fn test_sha256_algorithm_echoed() {
        let challenge = DigestChallenge::parse(r#"Digest realm="r", nonce="n", algorithm=SHA-256"#).unwrap();
        let header = challenge.authorization("GET", "/", "u", "p", 1, "c");
        assert!(header.contains("algorithm=SHA-256"));
        assert!(!header.contains("qop="));
    }

    #[test]
    fn test_cnonce_format() {
        let cnonce = generate_cnonce();
        assert_eq!(cnonce.len(), 16);
        assert!(cnonce.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
