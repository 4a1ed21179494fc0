//! Per-request context and the acquisition protocol that produces it.
//!
//! Every operation goes through `RequestContextManager`: it acquires a
//! database connection, optionally resolves the authenticated user from the
//! session cookie, and either hands the handler a ready `RequestContext` or
//! short-circuits to a terminal `Outcome`. The context is the single funnel
//! for reporting the handler's result: its terminal methods consume `self`,
//! so a request can neither deliver twice nor hold its connection past the
//! outcome. Connection release happens on the terminal transition, never
//! before, never twice.

use std::sync::Arc;

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::config::SessionConfig;
use crate::cookie;
use crate::db::ConnectionSource;
use crate::error::{AppError, AppResult};
use crate::model::User;
use crate::session::{Session, SessionStore};
use crate::store::UserStore;

/// Transport-level response: status, headers, optional byte payload.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub payload: Option<Vec<u8>>,
}

impl ApiResponse {
    pub fn empty(status: StatusCode) -> Self {
        Self { status, headers: HeaderMap::new(), payload: None }
    }

    pub fn json<T: Serialize>(status: StatusCode, value: &T) -> AppResult<Self> {
        let payload = serde_json::to_vec(value)
            .map_err(|e| AppError::internal("serialize_error", e.to_string()))?;
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, header::HeaderValue::from_static("application/json"));
        Ok(Self { status, headers, payload: Some(payload) })
    }
}

/// Single-use completion token. One `Outcome` is produced per request; there
/// is no other way to finish one.
#[derive(Debug)]
pub struct Outcome(Result<ApiResponse, AppError>);

impl Outcome {
    /// Terminal response, including business-rule outcomes like 404/400/401.
    pub fn respond(response: ApiResponse) -> Self {
        Outcome(Ok(response))
    }

    /// Terminal infrastructure failure, delivered to the client as a 5xx.
    pub fn error(error: AppError) -> Self {
        Outcome(Err(error))
    }

    pub fn into_result(self) -> Result<ApiResponse, AppError> {
        self.0
    }
}

impl IntoResponse for Outcome {
    fn into_response(self) -> Response {
        match self.0 {
            Ok(api) => {
                let mut response =
                    (api.status, api.payload.unwrap_or_default()).into_response();
                response.headers_mut().extend(api.headers);
                response
            }
            Err(error) => {
                let status = StatusCode::from_u16(error.http_status())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                let body = serde_json::json!({ "message": error.message() });
                (status, axum::Json(body)).into_response()
            }
        }
    }
}

/// Unwraps a `Result<T, Outcome>`, returning the short-circuit `Outcome` from
/// the enclosing handler on failure.
#[macro_export]
macro_rules! try_outcome {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(outcome) => return outcome,
        }
    };
}

/// Per-request resource bundle: the exclusively-owned database connection plus
/// the resolved session/user when the operation required authentication.
pub struct RequestContext<C> {
    conn: C,
    session: Option<Session>,
    user: Option<User>,
}

impl<C> RequestContext<C> {
    fn anonymous(conn: C) -> Self {
        Self { conn, session: None, user: None }
    }

    fn authenticated(conn: C, session: Session, user: User) -> Self {
        Self { conn, session: Some(session), user: Some(user) }
    }

    pub fn conn(&mut self) -> &mut C {
        &mut self.conn
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    /// The only sanctioned way to observe a repository result: a failure
    /// releases the connection and becomes the request's failed outcome; a
    /// success hands the value and the still-open context back.
    pub fn check<T>(self, result: AppResult<T>) -> Result<(Self, T), Outcome> {
        match result {
            Ok(value) => Ok((self, value)),
            Err(error) => Err(self.fail(error)),
        }
    }

    /// Release the connection, then deliver `response` as the successful
    /// outcome.
    pub fn succeed(self, response: ApiResponse) -> Outcome {
        drop(self.conn);
        Outcome::respond(response)
    }

    /// Release the connection, then deliver a failed outcome.
    pub fn fail(self, error: AppError) -> Outcome {
        drop(self.conn);
        Outcome::error(error)
    }
}

/// Produces `RequestContext`s, or short-circuits to a terminal outcome before
/// any handler logic runs.
pub struct RequestContextManager<P: ConnectionSource> {
    pool: Arc<P>,
    sessions: Arc<dyn SessionStore>,
    users: Arc<dyn UserStore<P::Conn>>,
    config: Arc<SessionConfig>,
}

impl<P: ConnectionSource> RequestContextManager<P> {
    pub fn new(
        pool: Arc<P>,
        sessions: Arc<dyn SessionStore>,
        users: Arc<dyn UserStore<P::Conn>>,
        config: Arc<SessionConfig>,
    ) -> Self {
        Self { pool, sessions, users, config }
    }

    pub fn session_store(&self) -> &dyn SessionStore {
        self.sessions.as_ref()
    }

    pub fn session_config(&self) -> &SessionConfig {
        &self.config
    }

    /// Acquire a connection without resolving any identity.
    pub async fn anonymous(&self) -> Result<RequestContext<P::Conn>, Outcome> {
        match self.pool.acquire().await {
            Ok(conn) => Ok(RequestContext::anonymous(conn)),
            Err(error) => Err(Outcome::error(error)),
        }
    }

    /// Resolve the session cookie and its user, then acquire a connection.
    ///
    /// A missing cookie and an unknown/expired session are the same normal
    /// "not authenticated" outcome (401 logout response), never an error.
    /// Collaborator failures at any stage propagate as failed outcomes, with
    /// the connection released first if one was acquired.
    pub async fn authenticated(
        &self,
        headers: &HeaderMap,
    ) -> Result<RequestContext<P::Conn>, Outcome> {
        let session = match self.session_from_headers(headers).await {
            Ok(session) => session,
            Err(error) => return Err(Outcome::error(error)),
        };
        let Some(session) = session else {
            return Err(Outcome::respond(self.logout_response_with_status(
                headers,
                StatusCode::UNAUTHORIZED,
            )));
        };

        let mut conn = match self.pool.acquire().await {
            Ok(conn) => conn,
            Err(error) => return Err(Outcome::error(error)),
        };

        let user = match self
            .users
            .get_by_username(&mut conn, &session.claims.username)
            .await
        {
            Ok(user) => user,
            Err(error) => {
                drop(conn);
                return Err(Outcome::error(error));
            }
        };
        let Some(user) = user else {
            // Stale session: the referenced account is gone. Drop the session
            // and answer as if the client were never authenticated.
            return match self.sessions.delete(&session.id).await {
                Ok(()) => {
                    drop(conn);
                    Err(Outcome::respond(self.logout_response_with_status(
                        headers,
                        StatusCode::UNAUTHORIZED,
                    )))
                }
                Err(error) => {
                    drop(conn);
                    Err(Outcome::error(error))
                }
            };
        };

        Ok(RequestContext::authenticated(conn, session, user))
    }

    /// Look up the session referenced by the request's cookie. No cookie
    /// means no store round trip.
    pub async fn session_from_headers(
        &self,
        headers: &HeaderMap,
    ) -> AppResult<Option<Session>> {
        match cookie::request_cookie(headers, &self.config.cookie_name) {
            Some(value) => self.sessions.get(&value).await,
            None => Ok(None),
        }
    }

    /// The canonical cookie-clearing response: empty payload, and when the
    /// inbound request carried the session cookie, a `Set-Cookie` that expires
    /// it client-side. Logout, expired sessions and unauthenticated access all
    /// converge here.
    pub fn logout_response(&self, headers: &HeaderMap) -> ApiResponse {
        let mut response = ApiResponse::empty(StatusCode::OK);
        if let Some(value) = cookie::request_cookie(headers, &self.config.cookie_name) {
            response
                .headers
                .insert(header::SET_COOKIE, cookie::clear_cookie_header(&self.config, &value));
        }
        response
    }

    fn logout_response_with_status(&self, headers: &HeaderMap, status: StatusCode) -> ApiResponse {
        let mut response = self.logout_response(headers);
        response.status = status;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionClaims;
    use async_trait::async_trait;
    use axum::http::HeaderValue;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockConn {
        closed: Arc<AtomicUsize>,
    }

    impl Drop for MockConn {
        fn drop(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct MockPool {
        error: Option<AppError>,
        acquired: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ConnectionSource for MockPool {
        type Conn = MockConn;

        async fn acquire(&self) -> AppResult<MockConn> {
            if let Some(error) = &self.error {
                return Err(error.clone());
            }
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(MockConn { closed: self.closed.clone() })
        }
    }

    struct MockSessions {
        session: Option<Session>,
        get_error: Option<AppError>,
        delete_error: Option<AppError>,
        gets: Arc<AtomicUsize>,
        deleted: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl SessionStore for MockSessions {
        async fn get(&self, id: &str) -> AppResult<Option<Session>> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = &self.get_error {
                return Err(error.clone());
            }
            Ok(self.session.clone().filter(|s| s.id == id))
        }

        async fn put(&self, _session: &Session) -> AppResult<()> {
            Ok(())
        }

        async fn delete(&self, id: &str) -> AppResult<()> {
            if let Some(error) = &self.delete_error {
                return Err(error.clone());
            }
            self.deleted.lock().push(id.to_string());
            Ok(())
        }

        fn create(&self, claims: SessionClaims) -> Session {
            session("fresh", &claims.username)
        }
    }

    struct MockUsers {
        user: Option<User>,
        error: Option<AppError>,
    }

    #[async_trait]
    impl UserStore<MockConn> for MockUsers {
        async fn get_by_username(
            &self,
            _conn: &mut MockConn,
            _username: &str,
        ) -> AppResult<Option<User>> {
            if let Some(error) = &self.error {
                return Err(error.clone());
            }
            Ok(self.user.clone())
        }

        async fn insert(&self, _conn: &mut MockConn, _user: &User) -> AppResult<()> {
            Ok(())
        }
    }

    fn session(id: &str, username: &str) -> Session {
        let now = Utc::now();
        Session {
            id: id.to_string(),
            claims: SessionClaims { username: username.to_string() },
            created_at: now,
            expires_at: now + chrono::Duration::minutes(30),
        }
    }

    fn user(username: &str) -> User {
        User { username: username.to_string(), password: "pw".to_string(), version: Some(0) }
    }

    #[derive(Default)]
    struct Fixture {
        pool_error: Option<AppError>,
        session: Option<Session>,
        session_get_error: Option<AppError>,
        session_delete_error: Option<AppError>,
        user: Option<User>,
        user_error: Option<AppError>,
    }

    struct Harness {
        manager: RequestContextManager<MockPool>,
        acquired: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
        session_gets: Arc<AtomicUsize>,
        deleted: Arc<Mutex<Vec<String>>>,
    }

    fn harness(fixture: Fixture) -> Harness {
        let acquired = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));
        let session_gets = Arc::new(AtomicUsize::new(0));
        let deleted = Arc::new(Mutex::new(Vec::new()));
        let pool = MockPool {
            error: fixture.pool_error,
            acquired: acquired.clone(),
            closed: closed.clone(),
        };
        let sessions = MockSessions {
            session: fixture.session,
            get_error: fixture.session_get_error,
            delete_error: fixture.session_delete_error,
            gets: session_gets.clone(),
            deleted: deleted.clone(),
        };
        let users = MockUsers { user: fixture.user, error: fixture.user_error };
        let manager = RequestContextManager::new(
            Arc::new(pool),
            Arc::new(sessions),
            Arc::new(users),
            Arc::new(SessionConfig::default()),
        );
        Harness { manager, acquired, closed, session_gets, deleted }
    }

    fn headers_with_session(id: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("blog.session={}", id)).unwrap(),
        );
        headers
    }

    fn db_error(marker: &str) -> AppError {
        AppError::db("db_error", marker)
    }

    #[tokio::test]
    async fn anonymous_acquires_and_releases_exactly_once() {
        let h = harness(Fixture::default());
        let ctx = h.manager.anonymous().await.expect("context");
        assert!(ctx.session().is_none());
        assert!(ctx.user().is_none());
        assert_eq!(h.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(h.closed.load(Ordering::SeqCst), 0);

        let outcome = ctx.succeed(ApiResponse::empty(StatusCode::OK));
        assert_eq!(h.closed.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.into_result().unwrap().status, StatusCode::OK);
    }

    #[tokio::test]
    async fn anonymous_pool_failure_propagates_unchanged() {
        let h = harness(Fixture { pool_error: Some(db_error("pool down")), ..Fixture::default() });
        let outcome = h.manager.anonymous().await.err().expect("short circuit");
        assert_eq!(outcome.into_result().unwrap_err(), db_error("pool down"));
        assert_eq!(h.closed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn authenticated_delivers_context_with_session_and_user() {
        let h = harness(Fixture {
            session: Some(session("sid-1", "alice")),
            user: Some(user("alice")),
            ..Fixture::default()
        });
        let ctx = h.manager.authenticated(&headers_with_session("sid-1")).await.expect("context");
        assert_eq!(ctx.user().unwrap().username, "alice");
        assert_eq!(ctx.session().unwrap().id, "sid-1");
        assert_eq!(h.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(h.closed.load(Ordering::SeqCst), 0);

        ctx.succeed(ApiResponse::empty(StatusCode::OK));
        assert_eq!(h.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn authenticated_without_cookie_is_401_without_store_or_pool() {
        let h = harness(Fixture { user: Some(user("alice")), ..Fixture::default() });
        let outcome = h.manager.authenticated(&HeaderMap::new()).await.err().expect("401");
        let response = outcome.into_result().unwrap();
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert!(response.headers.get(header::SET_COOKIE).is_none());
        assert!(response.payload.is_none());
        assert_eq!(h.session_gets.load(Ordering::SeqCst), 0);
        assert_eq!(h.acquired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn authenticated_unknown_session_is_401_with_cookie_clear() {
        let h = harness(Fixture::default());
        let outcome =
            h.manager.authenticated(&headers_with_session("gone")).await.err().expect("401");
        let response = outcome.into_result().unwrap();
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        let set_cookie = response.headers.get(header::SET_COOKIE).unwrap().to_str().unwrap();
        assert!(set_cookie.starts_with("blog.session=gone"));
        assert!(set_cookie.contains("Max-Age=0"));
        assert_eq!(h.acquired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn authenticated_session_store_error_propagates() {
        let h = harness(Fixture {
            session_get_error: Some(db_error("store unreachable")),
            ..Fixture::default()
        });
        let outcome =
            h.manager.authenticated(&headers_with_session("sid-1")).await.err().expect("failure");
        assert_eq!(outcome.into_result().unwrap_err(), db_error("store unreachable"));
        assert_eq!(h.acquired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn authenticated_pool_failure_propagates() {
        let h = harness(Fixture {
            session: Some(session("sid-1", "alice")),
            pool_error: Some(db_error("pool exhausted")),
            ..Fixture::default()
        });
        let outcome =
            h.manager.authenticated(&headers_with_session("sid-1")).await.err().expect("failure");
        assert_eq!(outcome.into_result().unwrap_err(), db_error("pool exhausted"));
    }

    #[tokio::test]
    async fn authenticated_user_lookup_error_closes_connection_first() {
        let h = harness(Fixture {
            session: Some(session("sid-1", "alice")),
            user_error: Some(db_error("select failed")),
            ..Fixture::default()
        });
        let outcome =
            h.manager.authenticated(&headers_with_session("sid-1")).await.err().expect("failure");
        assert_eq!(outcome.into_result().unwrap_err(), db_error("select failed"));
        assert_eq!(h.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_session_is_deleted_and_answered_with_cookie_clear() {
        let h = harness(Fixture {
            session: Some(session("sid-1", "ghost")),
            ..Fixture::default()
        });
        let outcome =
            h.manager.authenticated(&headers_with_session("sid-1")).await.err().expect("401");
        let response = outcome.into_result().unwrap();
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        let set_cookie = response.headers.get(header::SET_COOKIE).unwrap().to_str().unwrap();
        assert!(set_cookie.contains("Max-Age=0"));
        assert_eq!(h.deleted.lock().as_slice(), ["sid-1"]);
        assert_eq!(h.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_session_delete_failure_propagates_with_connection_closed() {
        let h = harness(Fixture {
            session: Some(session("sid-1", "ghost")),
            session_delete_error: Some(db_error("delete failed")),
            ..Fixture::default()
        });
        let outcome =
            h.manager.authenticated(&headers_with_session("sid-1")).await.err().expect("failure");
        assert_eq!(outcome.into_result().unwrap_err(), db_error("delete failed"));
        assert_eq!(h.closed.load(Ordering::SeqCst), 1);
        assert!(h.deleted.lock().is_empty());
    }

    #[tokio::test]
    async fn logout_responses_converge_on_one_cookie_clear_encoding() {
        // unknown session and stale session must clear the cookie identically
        let unknown = harness(Fixture::default());
        let stale = harness(Fixture {
            session: Some(session("sid-1", "ghost")),
            ..Fixture::default()
        });
        let headers = headers_with_session("sid-1");

        let a = unknown.manager.authenticated(&headers).await.err().unwrap();
        let b = stale.manager.authenticated(&headers).await.err().unwrap();
        let a = a.into_result().unwrap();
        let b = b.into_result().unwrap();
        assert_eq!(
            a.headers.get(header::SET_COOKIE).unwrap(),
            b.headers.get(header::SET_COOKIE).unwrap()
        );
    }

    #[tokio::test]
    async fn check_releases_connection_on_repository_error() {
        let h = harness(Fixture::default());
        let ctx = h.manager.anonymous().await.expect("context");
        let outcome = ctx.check::<()>(Err(db_error("query failed"))).err().expect("failure");
        assert_eq!(h.closed.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.into_result().unwrap_err(), db_error("query failed"));
    }

    #[tokio::test]
    async fn check_keeps_connection_open_on_success() {
        let h = harness(Fixture::default());
        let ctx = h.manager.anonymous().await.expect("context");
        let (ctx, value) = ctx.check(Ok(7)).expect("still open");
        assert_eq!(value, 7);
        assert_eq!(h.closed.load(Ordering::SeqCst), 0);
        ctx.fail(db_error("later"));
        assert_eq!(h.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_requests_each_release_their_own_connection() {
        let h = harness(Fixture::default());
        let (a, b) = tokio::join!(h.manager.anonymous(), h.manager.anonymous());
        let a = a.expect("context a");
        let b = b.expect("context b");
        assert_eq!(h.acquired.load(Ordering::SeqCst), 2);
        a.succeed(ApiResponse::empty(StatusCode::OK));
        b.succeed(ApiResponse::empty(StatusCode::NO_CONTENT));
        assert_eq!(h.closed.load(Ordering::SeqCst), 2);
    }
}
