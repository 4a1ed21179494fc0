//! Request/response body models of the API contract.
//!
//! Field names follow the contract's JSON shapes; these types are plain DTOs
//! and carry no behavior beyond (de)serialization.

use serde::{Deserialize, Serialize};

/// A registered account. `username` is the stable identity; `version` is an
/// optimistic-concurrency counter bumped by the database on update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub version: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Article {
    pub id: String,
    pub title: String,
    pub content: String,
    pub author: User,
}

/// Insert/update body. Authorship is never taken from the body; it is assigned
/// from the request context's resolved user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArticleCreationRequest {
    pub id: String,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

/// The 400 validation payload: `parameterName` identifies the offending
/// parameter when it is known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientError {
    pub message: String,
    #[serde(rename = "parameterName", skip_serializing_if = "Option::is_none")]
    pub parameter_name: Option<String>,
}
