use actix_web::http::header;
use actix_web::{web, HttpRequest};
use log::warn;
use rand::Rng;

use crate::error::Error;
use crate::models::User;
use crate::routes::blocking;
use crate::store::Store;

const SCHEME: &str = "Token";
const TOKEN_BYTES: usize = 20;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Principal {
    Anonymous,
    User(User),
}

/// Only authenticated administrators may mutate data.
pub fn can_write(principal: &Principal) -> bool {
    match principal {
        Principal::Anonymous => false,
        Principal::User(user) => user.is_admin,
    }
}

/// Turns a failed `can_write` into the error the caller should see:
/// 401 for anonymous callers, 403 for authenticated non-admins.
pub fn check_write(principal: &Principal) -> Result<(), Error> {
    match principal {
        _ if can_write(principal) => Ok(()),
        Principal::Anonymous => Err(Error::Unauthorized),
        Principal::User(_) => Err(Error::Forbidden),
    }
}

/// Extracts the key from `Authorization: Token <key>`.
///
/// `None` when the header is absent or uses another scheme; an error when
/// the scheme matches but the credentials are malformed.
pub fn token_from_header(value: Option<&str>) -> Result<Option<String>, Error> {
    let value = match value {
        Some(v) => v,
        None => return Ok(None),
    };
    let mut parts = value.split_whitespace();
    match parts.next() {
        Some(scheme) if scheme.eq_ignore_ascii_case(SCHEME) => {}
        _ => return Ok(None),
    }
    match (parts.next(), parts.next()) {
        (Some(key), None) => Ok(Some(key.to_string())),
        _ => Err(Error::InvalidToken),
    }
}

pub fn resolve(store: &dyn Store, token: Option<&str>) -> Result<Principal, Error> {
    match token {
        None => Ok(Principal::Anonymous),
        Some(key) => match store.user_for_token(key)? {
            Some(user) => Ok(Principal::User(user)),
            None => Err(Error::InvalidToken),
        },
    }
}

/// Resolves the caller and fails unless they may write. Called by the route
/// middleware for every table entry marked `Capability::Write`.
pub async fn require_write(req: &HttpRequest, store: &web::Data<dyn Store>) -> Result<Principal, Error> {
    let header_value = req
        .headers()
        .get(header::AUTHORIZATION)
        .map(|v| v.to_str().map_err(|_| Error::InvalidToken))
        .transpose()?;
    let token = token_from_header(header_value)?;
    let principal = blocking(store, move |store| resolve(store, token.as_deref())).await?;
    if let Err(e) = check_write(&principal) {
        warn!("rejected {} {}: {}", req.method(), req.path(), e);
        return Err(e);
    }
    Ok(principal)
}

/// 40 lowercase hex characters.
pub fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    (0..TOKEN_BYTES)
        .map(|_| format!("{:02x}", rng.gen::<u8>()))
        .collect()
}
