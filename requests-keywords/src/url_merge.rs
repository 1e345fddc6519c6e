//! Combines a session base URL with a per-call URI.

use url::Url;

/// Builds the final request URL from an optional session base and a call URI.
///
/// - Without a base, `uri` is returned unchanged.
/// - An absolute `uri` (own scheme and host) overrides the base.
/// - An empty `uri` yields the base unchanged.
/// - Otherwise `uri` is appended after the base path with exactly one `/` at
///   the join point. Slashes elsewhere in `uri` are kept as given.
///
/// # Examples
///
/// ```
/// use requests_keywords::merge_url;
///
/// assert_eq!(merge_url(Some("http://h/p"), "e"), "http://h/p/e");
/// assert_eq!(merge_url(Some("http://h//"), "/e"), "http://h/e");
/// assert_eq!(merge_url(Some("http://h"), "/e//"), "http://h/e//");
/// assert_eq!(merge_url(Some("http://h"), "https://other"), "https://other");
/// assert_eq!(merge_url(None, "relative"), "relative");
/// ```
#[must_use]
pub fn merge_url(base: Option<&str>, uri: &str) -> String {
    let Some(base) = base else {
        return uri.to_owned();
    };
    if uri.is_empty() {
        return base.to_owned();
    }
    if is_absolute(uri) {
        return uri.to_owned();
    }

    let base = base.trim_end_matches('/');
    let tail = uri.strip_prefix('/').unwrap_or(uri);
    format!("{base}/{tail}")
}

fn is_absolute(uri: &str) -> bool {
    Url::parse(uri).is_ok_and(|url| url.has_host())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_no_session_returns_uri() {
        assert_eq!(merge_url(None, "http://thisisa.url"), "http://thisisa.url");
        assert_eq!(merge_url(None, "/only/path"), "/only/path");
    }

    #[test]
    fn test_empty_uri_returns_base() {
        assert_eq!(merge_url(Some("http://www.domain.com"), ""), "http://www.domain.com");
        assert_eq!(merge_url(Some("http://www.domain.com/"), ""), "http://www.domain.com/");
    }

    #[test]
    fn test_join_slash_normalized() {
        assert_eq!(merge_url(Some("http://www.domain.com"), "endpoint"), "http://www.domain.com/endpoint");
        assert_eq!(merge_url(Some("http://www.domain.com/"), "endpoint"), "http://www.domain.com/endpoint");
        assert_eq!(merge_url(Some("http://www.domain.com"), "/endpoint"), "http://www.domain.com/endpoint");
        assert_eq!(merge_url(Some("http://www.domain.com/"), "/endpoint"), "http://www.domain.com/endpoint");
        assert_eq!(merge_url(Some("http://h//"), "e"), "http://h/e");
    }

    #[test]
    fn test_base_path_is_kept() {
        assert_eq!(merge_url(Some("http://h/p"), "e"), "http://h/p/e");
        assert_eq!(merge_url(Some("http://h/p/"), "e"), "http://h/p/e");
        assert_eq!(merge_url(Some("http://h/api/v1"), "/users/7"), "http://h/api/v1/users/7");
    }

    #[test]
    fn test_trailing_slashes_preserved() {
        assert_eq!(merge_url(Some("http://h"), "/e//"), "http://h/e//");
        assert_eq!(merge_url(Some("http://h"), "a//b/"), "http://h/a//b/");
    }

    #[test]
    fn test_absolute_uri_overrides_base() {
        assert_eq!(merge_url(Some("http://h/p"), "https://other"), "https://other");
        assert_eq!(
            merge_url(Some("http://h"), "http://other.example.com/x?y=1"),
            "http://other.example.com/x?y=1"
        );
    }

    #[test]
    fn test_query_in_uri_is_appended() {
        assert_eq!(merge_url(Some("http://h"), "/anything?a=1"), "http://h/anything?a=1");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_single_join_slash(
            base_slashes in 0usize..4,
            lead_slash in any::<bool>(),
            segment in "[a-z0-9]{1,12}",
        ) {
            let base = format!("http://example.test/base{}", "/".repeat(base_slashes));
            let uri = if lead_slash { format!("/{segment}") } else { segment.clone() };
            let merged = merge_url(Some(&base), &uri);
            prop_assert_eq!(merged, format!("http://example.test/base/{segment}"));
        }

        #[test]
        fn prop_without_base_is_identity(uri in "[a-zA-Z0-9/:._-]{0,40}") {
            prop_assert_eq!(merge_url(None, &uri), uri);
        }

        #[test]
        fn prop_uri_tail_preserved(
            segment in "[a-z]{1,8}",
            trailing in 0usize..5,
        ) {
            let uri = format!("/{segment}{}", "/".repeat(trailing));
            let merged = merge_url(Some("http://h"), &uri);
            prop_assert!(merged.ends_with(&uri));
        }
    }
}
