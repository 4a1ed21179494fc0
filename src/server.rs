//! HTTP surface: axum router, state wiring and the serve loop.
//!
//! The route functions here are thin: decode the body, then delegate to the
//! operation handler. A body that fails to decode is answered with the 400
//! validation payload before any connection is acquired. State and router are
//! generic over the connection source so the whole route layer can be driven
//! against mock collaborators.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::info;

use crate::config::AppConfig;
use crate::context::{ApiResponse, Outcome, RequestContextManager};
use crate::db::{ConnectionSource, Db, DbConn};
use crate::handlers;
use crate::model::{ArticleCreationRequest, ClientError, LoginForm, RegistrationForm};
use crate::security::{CredentialVerifier, PlaintextVerifier};
use crate::session::{MemorySessionStore, SessionStore};
use crate::store::{ArticleStore, SqlArticleStore, SqlUserStore, UserStore};

pub struct AppState<P: ConnectionSource> {
    manager: Arc<RequestContextManager<P>>,
    articles: Arc<dyn ArticleStore<P::Conn>>,
    users: Arc<dyn UserStore<P::Conn>>,
    verifier: Arc<dyn CredentialVerifier>,
}

impl<P: ConnectionSource> AppState<P> {
    pub fn new(
        manager: Arc<RequestContextManager<P>>,
        articles: Arc<dyn ArticleStore<P::Conn>>,
        users: Arc<dyn UserStore<P::Conn>>,
        verifier: Arc<dyn CredentialVerifier>,
    ) -> Self {
        Self { manager, articles, users, verifier }
    }
}

impl<P: ConnectionSource> Clone for AppState<P> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            articles: self.articles.clone(),
            users: self.users.clone(),
            verifier: self.verifier.clone(),
        }
    }
}

fn bad_body(rejection: JsonRejection) -> Outcome {
    let error = ClientError {
        message: rejection.body_text(),
        parameter_name: Some("body".to_string()),
    };
    match ApiResponse::json(StatusCode::BAD_REQUEST, &error) {
        Ok(response) => Outcome::respond(response),
        Err(error) => Outcome::error(error),
    }
}

async fn list_articles<P: ConnectionSource>(State(state): State<AppState<P>>) -> Outcome {
    handlers::get_all_articles(&state.manager, state.articles.as_ref()).await
}

async fn article_by_id<P: ConnectionSource>(
    State(state): State<AppState<P>>,
    Path(id): Path<String>,
) -> Outcome {
    handlers::get_article_by_id(&state.manager, state.articles.as_ref(), &id).await
}

async fn create_article<P: ConnectionSource>(
    State(state): State<AppState<P>>,
    headers: HeaderMap,
    body: Result<Json<ArticleCreationRequest>, JsonRejection>,
) -> Outcome {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    handlers::insert_article(&state.manager, state.articles.as_ref(), &headers, request).await
}

async fn modify_article<P: ConnectionSource>(
    State(state): State<AppState<P>>,
    headers: HeaderMap,
    body: Result<Json<ArticleCreationRequest>, JsonRejection>,
) -> Outcome {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    handlers::update_article(&state.manager, state.articles.as_ref(), &headers, request).await
}

async fn register<P: ConnectionSource>(
    State(state): State<AppState<P>>,
    body: Result<Json<RegistrationForm>, JsonRejection>,
) -> Outcome {
    let Json(form) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    handlers::register(&state.manager, state.users.as_ref(), form).await
}

async fn login<P: ConnectionSource>(
    State(state): State<AppState<P>>,
    body: Result<Json<LoginForm>, JsonRejection>,
) -> Outcome {
    let Json(form) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    handlers::login(&state.manager, state.users.as_ref(), state.verifier.as_ref(), form).await
}

async fn logout<P: ConnectionSource>(
    State(state): State<AppState<P>>,
    headers: HeaderMap,
) -> Outcome {
    handlers::logout(&state.manager, &headers).await
}

async fn current_user<P: ConnectionSource>(
    State(state): State<AppState<P>>,
    headers: HeaderMap,
) -> Outcome {
    handlers::current_user(&state.manager, &headers).await
}

pub fn router<P: ConnectionSource + 'static>(state: AppState<P>) -> Router {
    Router::new()
        .route(
            "/articles",
            get(list_articles::<P>).post(create_article::<P>).put(modify_article::<P>),
        )
        .route("/articles/{id}", get(article_by_id::<P>))
        .route("/users", post(register::<P>))
        .route("/session", post(login::<P>).delete(logout::<P>))
        .route("/session/user", get(current_user::<P>))
        .with_state(state)
}

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let db = Arc::new(Db::connect(&config).await?);
    let session_config = Arc::new(config.session.clone());
    let sessions: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new(&config.session));
    let users: Arc<dyn UserStore<DbConn>> = Arc::new(SqlUserStore::new());
    let articles: Arc<dyn ArticleStore<DbConn>> = Arc::new(SqlArticleStore::new());
    let manager = Arc::new(RequestContextManager::new(
        db,
        sessions,
        users.clone(),
        session_config,
    ));
    let state = AppState::new(manager, articles, users, Arc::new(PlaintextVerifier));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port)).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}
