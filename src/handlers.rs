//! Operation handlers.
//!
//! Each handler obtains its `RequestContext` from the manager, runs its
//! repository calls through `check`, and finishes with exactly one terminal
//! call. Business-rule outcomes (404 missing article, 400 duplicate username,
//! 400 bad credentials) are successful deliveries, not errors.

use axum::http::{header, HeaderMap, StatusCode};
use serde::Serialize;

use crate::context::{ApiResponse, Outcome, RequestContext, RequestContextManager};
use crate::cookie;
use crate::db::ConnectionSource;
use crate::error::AppError;
use crate::model::{Article, ArticleCreationRequest, ClientError, LoginForm, RegistrationForm, User};
use crate::security::CredentialVerifier;
use crate::session::SessionClaims;
use crate::store::{ArticleStore, UserStore};
use crate::try_outcome;

fn respond_json<C, T: Serialize>(
    ctx: RequestContext<C>,
    status: StatusCode,
    value: &T,
) -> Outcome {
    match ApiResponse::json(status, value) {
        Ok(response) => ctx.succeed(response),
        Err(error) => ctx.fail(error),
    }
}

pub async fn get_all_articles<P: ConnectionSource>(
    manager: &RequestContextManager<P>,
    articles: &dyn ArticleStore<P::Conn>,
) -> Outcome {
    let mut ctx = try_outcome!(manager.anonymous().await);
    let result = articles.get_all(ctx.conn()).await;
    let (ctx, list) = try_outcome!(ctx.check(result));
    respond_json(ctx, StatusCode::OK, &list)
}

pub async fn get_article_by_id<P: ConnectionSource>(
    manager: &RequestContextManager<P>,
    articles: &dyn ArticleStore<P::Conn>,
    id: &str,
) -> Outcome {
    let mut ctx = try_outcome!(manager.anonymous().await);
    let result = articles.get_by_id(ctx.conn(), id).await;
    let (ctx, found) = try_outcome!(ctx.check(result));
    match found {
        Some(article) => respond_json(ctx, StatusCode::OK, &article),
        None => ctx.succeed(ApiResponse::empty(StatusCode::NOT_FOUND)),
    }
}

pub async fn insert_article<P: ConnectionSource>(
    manager: &RequestContextManager<P>,
    articles: &dyn ArticleStore<P::Conn>,
    headers: &HeaderMap,
    request: ArticleCreationRequest,
) -> Outcome {
    let mut ctx = try_outcome!(manager.authenticated(headers).await);
    let author = match ctx.user().cloned() {
        Some(user) => user,
        None => return ctx.fail(AppError::internal("internal", "authenticated context without user")),
    };
    let article = Article {
        id: request.id,
        title: request.title,
        content: request.content,
        author,
    };
    let result = articles.insert(ctx.conn(), &article).await;
    let (ctx, ()) = try_outcome!(ctx.check(result));
    ctx.succeed(ApiResponse::empty(StatusCode::NO_CONTENT))
}

pub async fn update_article<P: ConnectionSource>(
    manager: &RequestContextManager<P>,
    articles: &dyn ArticleStore<P::Conn>,
    headers: &HeaderMap,
    request: ArticleCreationRequest,
) -> Outcome {
    let mut ctx = try_outcome!(manager.authenticated(headers).await);
    let result = articles.get_by_id(ctx.conn(), &request.id).await;
    let (mut ctx, existing) = try_outcome!(ctx.check(result));
    let Some(existing) = existing else {
        return ctx.succeed(ApiResponse::empty(StatusCode::NOT_FOUND));
    };
    let article = Article {
        id: request.id,
        title: request.title,
        content: request.content,
        author: existing.author,
    };
    let result = articles.update(ctx.conn(), &article).await;
    let (ctx, ()) = try_outcome!(ctx.check(result));
    ctx.succeed(ApiResponse::empty(StatusCode::NO_CONTENT))
}

pub async fn register<P: ConnectionSource>(
    manager: &RequestContextManager<P>,
    users: &dyn UserStore<P::Conn>,
    form: RegistrationForm,
) -> Outcome {
    let mut ctx = try_outcome!(manager.anonymous().await);
    let result = users.get_by_username(ctx.conn(), &form.username).await;
    let (mut ctx, existing) = try_outcome!(ctx.check(result));
    if existing.is_some() {
        let error = ClientError {
            message: format!("user {} already exists", form.username),
            parameter_name: Some("username".to_string()),
        };
        return respond_json(ctx, StatusCode::BAD_REQUEST, &error);
    }
    let user = User { username: form.username, password: form.password, version: None };
    let result = users.insert(ctx.conn(), &user).await;
    let (ctx, ()) = try_outcome!(ctx.check(result));
    ctx.succeed(ApiResponse::empty(StatusCode::NO_CONTENT))
}

pub async fn login<P: ConnectionSource>(
    manager: &RequestContextManager<P>,
    users: &dyn UserStore<P::Conn>,
    verifier: &dyn CredentialVerifier,
    form: LoginForm,
) -> Outcome {
    let mut ctx = try_outcome!(manager.anonymous().await);
    let result = users.get_by_username(ctx.conn(), &form.username).await;
    let (ctx, found) = try_outcome!(ctx.check(result));
    // Unknown username and wrong password are indistinguishable to the client.
    let Some(user) = found else {
        return ctx.succeed(ApiResponse::empty(StatusCode::BAD_REQUEST));
    };
    if !verifier.verify(&form.password, &user.password) {
        return ctx.succeed(ApiResponse::empty(StatusCode::BAD_REQUEST));
    }

    let session = manager
        .session_store()
        .create(SessionClaims { username: user.username.clone() });
    if let Err(error) = manager.session_store().put(&session).await {
        return ctx.fail(error);
    }
    let mut response = match ApiResponse::json(StatusCode::OK, &user) {
        Ok(response) => response,
        Err(error) => return ctx.fail(error),
    };
    response.headers.insert(
        header::SET_COOKIE,
        cookie::session_cookie_header(manager.session_config(), &session.id),
    );
    ctx.succeed(response)
}

pub async fn current_user<P: ConnectionSource>(
    manager: &RequestContextManager<P>,
    headers: &HeaderMap,
) -> Outcome {
    let ctx = try_outcome!(manager.authenticated(headers).await);
    let user = match ctx.user().cloned() {
        Some(user) => user,
        None => return ctx.fail(AppError::internal("internal", "authenticated context without user")),
    };
    respond_json(ctx, StatusCode::OK, &user)
}

/// Logout never touches the database: it resolves the session straight from
/// the store, deletes it, and answers with the cookie-clearing response.
pub async fn logout<P: ConnectionSource>(
    manager: &RequestContextManager<P>,
    headers: &HeaderMap,
) -> Outcome {
    let session = match manager.session_from_headers(headers).await {
        Ok(session) => session,
        Err(error) => return Outcome::error(error),
    };
    let Some(session) = session else {
        return Outcome::respond(ApiResponse::empty(StatusCode::UNAUTHORIZED));
    };
    if let Err(error) = manager.session_store().delete(&session.id).await {
        return Outcome::error(error);
    }
    Outcome::respond(manager.logout_response(headers))
}
