//! Alias-keyed session store.

use std::collections::{BTreeMap, btree_map::Entry};

use tracing::{debug, info};

use super::{Auth, Session, SessionOptions, header_map};
use crate::{
    error::{KeywordError, Result},
    transport::Transport,
};

/// Owns every live session of a library instance.
///
/// Re-registering an alias replaces and drops the previous session.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: BTreeMap<String, Session>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a session, validates its connection settings through `transport`
    /// and registers it under `alias`.
    ///
    /// # Errors
    ///
    /// - [`KeywordError::ConfigurationError`] for invalid retry settings,
    ///   NTLM credentials on a transport without NTLM, or connection settings
    ///   the transport rejects (unreadable CA bundle or client certificate)
    /// - [`KeywordError::InvalidUrl`] if `base_url` is not absolute
    pub fn create<T: Transport>(
        &mut self,
        transport: &T,
        alias: &str,
        base_url: &str,
        options: SessionOptions,
    ) -> Result<&mut Session> {
        if matches!(options.auth, Some(Auth::Ntlm { .. })) && !transport.supports_ntlm() {
            return Err(KeywordError::ConfigurationError(format!(
                "NTLM authentication is not supported by the {} transport",
                transport.protocol_name()
            )));
        }
        let session = Session::build(alias, base_url, options)?;
        transport.validate(&session.connect_options())?;

        info!(alias, base_url, "Creating session");
        debug!(
            alias,
            verify = ?session.verify(),
            retry = ?session.retry().map(|policy| policy.max_retries),
            auth = session.auth().map(Auth::scheme),
            "Session settings"
        );
        Ok(self.insert(session))
    }

    /// Registers an already built session, replacing any with the same alias.
    pub fn insert(&mut self, session: Session) -> &mut Session {
        match self.sessions.entry(session.alias().to_owned()) {
            Entry::Occupied(mut slot) => {
                debug!(alias = slot.key().as_str(), "Replacing existing session");
                slot.insert(session);
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(session),
        }
    }

    /// Returns `true` if `alias` is registered. Never fails.
    #[must_use]
    pub fn exists(&self, alias: &str) -> bool {
        self.sessions.contains_key(alias)
    }

    /// Looks up a session.
    ///
    /// # Errors
    ///
    /// Returns [`KeywordError::NoSuchSession`] naming the registered aliases.
    pub fn switch(&self, alias: &str) -> Result<&Session> {
        self.sessions.get(alias).ok_or_else(|| self.no_such_session(alias))
    }

    /// Looks up a session for mutation.
    ///
    /// # Errors
    ///
    /// Returns [`KeywordError::NoSuchSession`] naming the registered aliases.
    pub fn switch_mut(&mut self, alias: &str) -> Result<&mut Session> {
        // A `get_mut` borrow returned from one branch stays live in the miss
        // branch, so the miss is detected before borrowing mutably.
        if !self.sessions.contains_key(alias) {
            return Err(self.no_such_session(alias));
        }
        self.sessions.get_mut(alias).ok_or_else(|| KeywordError::NoSuchSession {
            alias: alias.to_owned(),
            registered: Vec::new(),
        })
    }

    /// Merges headers and cookies into a session; the new values win.
    ///
    /// # Errors
    ///
    /// - [`KeywordError::NoSuchSession`] for an unknown alias
    /// - [`KeywordError::InvalidInput`] for malformed headers
    pub fn update<K, V>(&mut self, alias: &str, headers: &[(K, V)], cookies: &[(K, V)]) -> Result<()>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let headers = header_map(headers)?;
        let cookies = cookies.iter().map(|(k, v)| (k.as_ref().to_owned(), v.as_ref().to_owned())).collect();
        self.switch_mut(alias)?.merge(headers, cookies);
        debug!(alias, "Session updated");
        Ok(())
    }

    /// Drops every session.
    pub fn delete_all(&mut self) {
        if !self.sessions.is_empty() {
            info!(count = self.sessions.len(), "Deleting all sessions");
        }
        self.sessions.clear();
    }

    /// Registered aliases in sorted order.
    #[must_use]
    pub fn aliases(&self) -> Vec<String> {
        self.sessions.keys().cloned().collect()
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if no session is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn no_such_session(&self, alias: &str) -> KeywordError {
        KeywordError::NoSuchSession { alias: alias.to_owned(), registered: self.aliases() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    fn registry_with(aliases: &[&str]) -> SessionRegistry {
        let transport = MockTransport::new();
        let mut registry = SessionRegistry::new();
        for alias in aliases {
            registry.create(&transport, alias, "http://localhost", SessionOptions::default()).unwrap();
        }
        registry
    }

    #[test]
    fn test_create_and_exists() {
        let registry = registry_with(&["api"]);
        assert!(registry.exists("api"));
        assert!(!registry.exists("other"));
        assert_eq!(registry.switch("api").unwrap().base_url(), "http://localhost");
    }

    #[test]
    fn test_recreate_replaces_session() {
        let transport = MockTransport::new();
        let mut registry = registry_with(&["api"]);
        registry.create(&transport, "api", "http://other.test", SessionOptions::default()).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.switch("api").unwrap().base_url(), "http://other.test");
    }

    #[test]
    fn test_switch_unknown_lists_registered() {
        let registry = registry_with(&["b", "a"]);
        let error = registry.switch("missing").unwrap_err();
        match &error {
            KeywordError::NoSuchSession { alias, registered } => {
                assert_eq!(alias, "missing");
                assert_eq!(registered, &["a", "b"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(error.to_string().contains("'missing'"));
    }

    #[test]
    fn test_switch_mut_unknown_lists_registered() {
        let mut registry = registry_with(&["b", "a"]);
        match registry.switch_mut("missing") {
            Err(KeywordError::NoSuchSession { alias, registered }) => {
                assert_eq!(alias, "missing");
                assert_eq!(registered, ["a", "b"]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(registry.switch_mut("a").unwrap().alias(), "a");
    }

    #[test]
    fn test_update_merges() {
        let mut registry = registry_with(&["api"]);
        registry.update("api", &[("X-Token", "1")], &[("session", "abc")]).unwrap();
        registry.update("api", &[("x-token", "2")], &[]).unwrap();
        let session = registry.switch("api").unwrap();
        assert_eq!(session.headers()["X-Token"], "2");
        assert_eq!(session.cookies()["session"], "abc");
        assert!(matches!(
            registry.update::<&str, &str>("nope", &[], &[]),
            Err(KeywordError::NoSuchSession { .. })
        ));
    }

    #[test]
    fn test_delete_all() {
        let mut registry = registry_with(&["a", "b"]);
        registry.delete_all();
        assert!(registry.is_empty());
        assert!(!registry.exists("a"));
    }

    #[test]
    fn test_ntlm_requires_capability() {
        let transport = MockTransport::new();
        let mut registry = SessionRegistry::new();
        let auth = Auth::ntlm(&["DOMAIN", "user", "pass"]).unwrap();
        let result =
            registry.create(&transport, "ntlm", "http://localhost", SessionOptions::default().with_auth(auth));
        assert!(matches!(result, Err(KeywordError::ConfigurationError(_))));
        assert!(!registry.exists("ntlm"));
    }

    #[test]
    fn test_transport_validation_rejects_session() {
        let transport = MockTransport::new().rejecting_connect_options();
        let mut registry = SessionRegistry::new();
        let result = registry.create(&transport, "api", "http://localhost", SessionOptions::default());
        assert!(matches!(result, Err(KeywordError::ConfigurationError(_))));
        assert!(registry.is_empty());
    }
}
