//! Server-side sessions: the session record, the store interface consumed by
//! the request-context core, and an in-memory store implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use crate::config::SessionConfig;
use crate::error::AppResult;
use crate::tprintln;

/// Typed claims carried by a session. The session attribute bag of the wire
/// contract is exactly this one claim, so it is a struct rather than a
/// string-keyed map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionClaims {
    pub username: String,
}

#[derive(Debug, Clone)]
pub struct Session {
    /// Opaque server-generated id, referenced by the client via the cookie.
    pub id: String,
    pub claims: SessionClaims,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Key -> session-blob store with TTL. The request-context core only holds a
/// transient `Session` for the duration of one request; the store owns the
/// records.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns `None` for unknown or expired ids.
    async fn get(&self, id: &str) -> AppResult<Option<Session>>;
    async fn put(&self, session: &Session) -> AppResult<()>;
    async fn delete(&self, id: &str) -> AppResult<()>;
    /// Build (but do not store) a fresh session with a generated id and an
    /// expiry derived from the configured timeout.
    fn create(&self, claims: SessionClaims) -> Session;
}

fn gen_id(min_length: usize) -> String {
    // random token, base64url without padding; at least `min_length` chars
    let nbytes = std::cmp::max(32, min_length);
    let mut buf = vec![0u8; nbytes];
    let _ = getrandom::getrandom(&mut buf);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
}

/// Process-local session store. A session's expiry is fixed at creation
/// (`get` does not refresh it); expired entries are pruned lazily on `get`.
pub struct MemorySessionStore {
    ttl: Duration,
    min_id_length: usize,
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new(config: &SessionConfig) -> Self {
        let ttl = Duration::from_std(config.timeout)
            .unwrap_or_else(|_| Duration::seconds(30 * 60));
        Self {
            ttl,
            min_id_length: config.min_id_length,
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, id: &str) -> AppResult<Option<Session>> {
        let now = Utc::now();
        let mut drop_key: Option<String> = None;
        let out = {
            let map = self.sessions.read();
            match map.get(id) {
                Some(session) if session.expires_at > now => Some(session.clone()),
                Some(_) => {
                    drop_key = Some(id.to_string());
                    None
                }
                None => None,
            }
        };
        if let Some(key) = drop_key {
            self.sessions.write().remove(&key);
        }
        Ok(out)
    }

    async fn put(&self, session: &Session) -> AppResult<()> {
        self.sessions.write().insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> AppResult<()> {
        let removed = self.sessions.write().remove(id).is_some();
        tprintln!("session.delete id={} removed={}", id, removed);
        Ok(())
    }

    fn create(&self, claims: SessionClaims) -> Session {
        let now = Utc::now();
        let session = Session {
            id: gen_id(self.min_id_length),
            claims,
            created_at: now,
            expires_at: now + self.ttl,
        };
        tprintln!(
            "session.create user={} id={} ttl_secs={}",
            session.claims.username,
            session.id,
            self.ttl.num_seconds()
        );
        session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use std::time::Duration as StdDuration;

    fn store() -> MemorySessionStore {
        MemorySessionStore::new(&SessionConfig::default())
    }

    fn claims(username: &str) -> SessionClaims {
        SessionClaims { username: username.to_string() }
    }

    #[tokio::test]
    async fn create_put_get_round_trip() {
        let store = store();
        let session = store.create(claims("alice"));
        store.put(&session).await.unwrap();

        let found = store.get(&session.id).await.unwrap().unwrap();
        assert_eq!(found.claims.username, "alice");
        assert_eq!(found.id, session.id);
        assert!(found.expires_at > found.created_at);
    }

    #[tokio::test]
    async fn get_unknown_id_is_none() {
        let store = store();
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_removes_session() {
        let store = store();
        let session = store.create(claims("bob"));
        store.put(&session).await.unwrap();
        store.delete(&session.id).await.unwrap();
        assert!(store.get(&session.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_session_is_pruned_on_get() {
        let config = SessionConfig { timeout: StdDuration::from_secs(0), ..SessionConfig::default() };
        let store = MemorySessionStore::new(&config);
        let session = store.create(claims("carol"));
        store.put(&session).await.unwrap();
        assert!(store.get(&session.id).await.unwrap().is_none());
        assert!(store.sessions.read().is_empty());
    }

    #[tokio::test]
    async fn get_does_not_refresh_expiry() {
        let store = store();
        let session = store.create(claims("dave"));
        store.put(&session).await.unwrap();

        let first = store.get(&session.id).await.unwrap().unwrap();
        let second = store.get(&session.id).await.unwrap().unwrap();
        assert_eq!(first.expires_at, session.expires_at);
        assert_eq!(second.expires_at, session.expires_at);
    }

    #[test]
    fn generated_ids_honor_minimum_length_and_are_unique() {
        let config = SessionConfig { min_id_length: 64, ..SessionConfig::default() };
        let store = MemorySessionStore::new(&config);
        let a = store.create(claims("a"));
        let b = store.create(claims("a"));
        assert!(a.id.len() >= 64);
        assert_ne!(a.id, b.id);
    }
}
