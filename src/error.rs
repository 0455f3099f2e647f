use std::collections::BTreeMap;
use std::fmt;

use actix_web::http::{header, StatusCode};
use actix_web::{HttpResponse, ResponseError};
use log::error;
use serde::Serialize;
use serde_json::json;

/// Per-field validation messages, serialized as `{ "field": ["msg", ...] }`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<&'static str, Vec<String>>);

impl FieldErrors {
    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.entry(field).or_default().push(message.into());
    }

    #[cfg(test)]
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    #[cfg(test)]
    pub fn fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.0.keys().copied()
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            if !first {
                f.write_str("; ")?;
            }
            first = false;
            write!(f, "{}: {}", field, messages.join(" "))?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    Validation(FieldErrors),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unsupported media type {0:?}")]
    UnsupportedMediaType(String),
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i32 },
    #[error("authentication credentials were not provided")]
    Unauthorized,
    #[error("invalid token")]
    InvalidToken,
    #[error("permission denied")]
    Forbidden,
    #[error("database error: {0}")]
    Database(#[from] postgres::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("blocking task failed")]
    Blocking(#[from] actix_web::error::BlockingError),
    #[error("store error: {0}")]
    Store(String),
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

impl Error {
    pub fn segment_not_found(id: i32) -> Error {
        Error::NotFound { kind: "road segment", id }
    }

    pub fn reading_not_found(id: i32) -> Error {
        Error::NotFound { kind: "speed reading", id }
    }

    fn detail(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "Not found.",
            Error::Unauthorized => "Authentication credentials were not provided.",
            Error::InvalidToken => "Invalid token.",
            Error::Forbidden => "You do not have permission to perform this action.",
            _ => "A server error occurred.",
        }
    }
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation(_) | Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Unauthorized | Error::InvalidToken => StatusCode::UNAUTHORIZED,
            Error::Forbidden => StatusCode::FORBIDDEN,
            Error::Database(_)
            | Error::Pool(_)
            | Error::Blocking(_)
            | Error::Store(_)
            | Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut builder = HttpResponse::build(self.status_code());
        match self {
            Error::Validation(errors) => builder.json(errors),
            Error::BadRequest(detail) => builder.json(json!({ "detail": detail })),
            Error::UnsupportedMediaType(media_type) => builder.json(json!({
                "detail": format!("Unsupported media type \"{}\" in request.", media_type)
            })),
            Error::Unauthorized | Error::InvalidToken => builder
                .insert_header((header::WWW_AUTHENTICATE, "Token"))
                .json(json!({ "detail": self.detail() })),
            Error::Database(_)
            | Error::Pool(_)
            | Error::Blocking(_)
            | Error::Store(_)
            | Error::Config(_) => {
                error!("{}", self);
                builder.json(json!({ "detail": self.detail() }))
            }
            _ => builder.json(json!({ "detail": self.detail() })),
        }
    }
}
