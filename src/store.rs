//! SQL-backed repositories.
//!
//! There is one canonical CRUD shape, `SqlCrudStore`, parameterized by an
//! `EntityMapping` that owns the statement text and the row/argument
//! conversions for exactly one entity. The narrow `ArticleStore`/`UserStore`
//! traits are what the handlers and the request-context core consume; they are
//! generic over the connection type so tests can substitute a mock connection.

use std::marker::PhantomData;

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgConnection, PgRow};
use sqlx::query::Query;
use sqlx::{Postgres, Row};

use crate::db::DbConn;
use crate::error::{AppError, AppResult};
use crate::model::{Article, User};

/// Statement text and conversions for one entity. One mapping per entity,
/// one entity per mapping.
pub trait EntityMapping: Send + Sync + 'static {
    type Entity: Send + Sync + 'static;

    const SELECT_ALL_SQL: &'static str;
    const SELECT_BY_ID_SQL: &'static str;
    const INSERT_SQL: &'static str;
    const UPDATE_SQL: &'static str;

    fn entity(row: &PgRow) -> AppResult<Self::Entity>;
    fn bind_insert<'q>(
        query: Query<'q, Postgres, PgArguments>,
        entity: &'q Self::Entity,
    ) -> Query<'q, Postgres, PgArguments>;
    fn bind_update<'q>(
        query: Query<'q, Postgres, PgArguments>,
        entity: &'q Self::Entity,
    ) -> Query<'q, Postgres, PgArguments>;
}

/// Generic CRUD over a prepared-statement mapping. Each call is a single
/// statement on the caller's connection (per-statement autocommit; callers
/// needing atomicity across steps must open a transaction themselves).
pub struct SqlCrudStore<M: EntityMapping> {
    _mapping: PhantomData<M>,
}

impl<M: EntityMapping> SqlCrudStore<M> {
    pub fn new() -> Self {
        Self { _mapping: PhantomData }
    }

    pub async fn get_by_id(
        &self,
        conn: &mut PgConnection,
        id: &str,
    ) -> AppResult<Option<M::Entity>> {
        let row = sqlx::query(M::SELECT_BY_ID_SQL)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        row.map(|r| M::entity(&r)).transpose()
    }

    pub async fn get_all(&self, conn: &mut PgConnection) -> AppResult<Vec<M::Entity>> {
        let rows = sqlx::query(M::SELECT_ALL_SQL).fetch_all(&mut *conn).await?;
        rows.iter().map(M::entity).collect()
    }

    pub async fn insert(&self, conn: &mut PgConnection, entity: &M::Entity) -> AppResult<()> {
        M::bind_insert(sqlx::query(M::INSERT_SQL), entity)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    pub async fn update(&self, conn: &mut PgConnection, entity: &M::Entity) -> AppResult<()> {
        // The statement returns the bumped version row; no row means the
        // target vanished between the caller's existence check and here.
        let row = M::bind_update(sqlx::query(M::UPDATE_SQL), entity)
            .fetch_optional(&mut *conn)
            .await?;
        row.map(|_| ())
            .ok_or_else(|| AppError::db("db_error", "update affected no rows"))
    }
}

impl<M: EntityMapping> Default for SqlCrudStore<M> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ArticleMapping;

impl EntityMapping for ArticleMapping {
    type Entity = Article;

    const SELECT_ALL_SQL: &'static str = "select article.id article_id, article.title article_title, \
         article.content article_content, appuser.username user_username \
         from article join appuser on article.author_id = appuser.username";
    const SELECT_BY_ID_SQL: &'static str = "select article.id article_id, article.title article_title, \
         article.content article_content, appuser.username user_username \
         from article join appuser on article.author_id = appuser.username \
         where article.id = $1";
    const INSERT_SQL: &'static str =
        "insert into article(id, title, content, author_id) values ($1, $2, $3, $4)";
    const UPDATE_SQL: &'static str =
        "update article set title = $1, content = $2, version = version + 1 \
         where id = $3 returning version";

    fn entity(row: &PgRow) -> AppResult<Article> {
        Ok(Article {
            id: row.try_get("article_id")?,
            title: row.try_get("article_title")?,
            content: row.try_get("article_content")?,
            author: User {
                username: row.try_get("user_username")?,
                password: String::new(),
                version: None,
            },
        })
    }

    fn bind_insert<'q>(
        query: Query<'q, Postgres, PgArguments>,
        entity: &'q Article,
    ) -> Query<'q, Postgres, PgArguments> {
        query
            .bind(&entity.id)
            .bind(&entity.title)
            .bind(&entity.content)
            .bind(&entity.author.username)
    }

    fn bind_update<'q>(
        query: Query<'q, Postgres, PgArguments>,
        entity: &'q Article,
    ) -> Query<'q, Postgres, PgArguments> {
        query.bind(&entity.title).bind(&entity.content).bind(&entity.id)
    }
}

pub struct UserMapping;

impl EntityMapping for UserMapping {
    type Entity = User;

    const SELECT_ALL_SQL: &'static str = "select username, password, version from appuser";
    const SELECT_BY_ID_SQL: &'static str =
        "select username, password, version from appuser where username = $1";
    const INSERT_SQL: &'static str = "insert into appuser(username, password) values ($1, $2)";
    const UPDATE_SQL: &'static str =
        "update appuser set password = $1, version = version + 1 \
         where username = $2 returning version";

    fn entity(row: &PgRow) -> AppResult<User> {
        Ok(User {
            username: row.try_get("username")?,
            password: row.try_get("password")?,
            version: row.try_get("version")?,
        })
    }

    fn bind_insert<'q>(
        query: Query<'q, Postgres, PgArguments>,
        entity: &'q User,
    ) -> Query<'q, Postgres, PgArguments> {
        query.bind(&entity.username).bind(&entity.password)
    }

    fn bind_update<'q>(
        query: Query<'q, Postgres, PgArguments>,
        entity: &'q User,
    ) -> Query<'q, Postgres, PgArguments> {
        query.bind(&entity.password).bind(&entity.username)
    }
}

/// Article repository as consumed by the handlers.
#[async_trait]
pub trait ArticleStore<C: Send>: Send + Sync {
    async fn get_by_id(&self, conn: &mut C, id: &str) -> AppResult<Option<Article>>;
    async fn get_all(&self, conn: &mut C) -> AppResult<Vec<Article>>;
    async fn insert(&self, conn: &mut C, article: &Article) -> AppResult<()>;
    async fn update(&self, conn: &mut C, article: &Article) -> AppResult<()>;
}

/// User repository as consumed by the handlers and the context manager.
#[async_trait]
pub trait UserStore<C: Send>: Send + Sync {
    async fn get_by_username(&self, conn: &mut C, username: &str) -> AppResult<Option<User>>;
    async fn insert(&self, conn: &mut C, user: &User) -> AppResult<()>;
}

pub struct SqlArticleStore {
    crud: SqlCrudStore<ArticleMapping>,
}

impl SqlArticleStore {
    pub fn new() -> Self {
        Self { crud: SqlCrudStore::new() }
    }
}

impl Default for SqlArticleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArticleStore<DbConn> for SqlArticleStore {
    async fn get_by_id(&self, conn: &mut DbConn, id: &str) -> AppResult<Option<Article>> {
        self.crud.get_by_id(&mut **conn, id).await
    }

    async fn get_all(&self, conn: &mut DbConn) -> AppResult<Vec<Article>> {
        self.crud.get_all(&mut **conn).await
    }

    async fn insert(&self, conn: &mut DbConn, article: &Article) -> AppResult<()> {
        self.crud.insert(&mut **conn, article).await
    }

    async fn update(&self, conn: &mut DbConn, article: &Article) -> AppResult<()> {
        self.crud.update(&mut **conn, article).await
    }
}

pub struct SqlUserStore {
    crud: SqlCrudStore<UserMapping>,
}

impl SqlUserStore {
    pub fn new() -> Self {
        Self { crud: SqlCrudStore::new() }
    }
}

impl Default for SqlUserStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserStore<DbConn> for SqlUserStore {
    async fn get_by_username(&self, conn: &mut DbConn, username: &str) -> AppResult<Option<User>> {
        self.crud.get_by_id(&mut **conn, username).await
    }

    async fn insert(&self, conn: &mut DbConn, user: &User) -> AppResult<()> {
        self.crud.insert(&mut **conn, user).await
    }
}
