//! Session cookies.
//!
//! The session cookie carries the opaque session id and nothing else. The
//! remember-me cookie carries `{userId, sessionId}` as base64 JSON so a client
//! can be restored after the short cookie is gone.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::models::Session;

pub const SESSION_COOKIE: &str = "session_id";
pub const REMEMBER_ME_COOKIE: &str = "remember_me";

/// Payload of the remember-me cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RememberMeToken {
    pub user_id: String,
    pub session_id: String,
}

fn build(name: &str, value: &str, max_age: i64, secure: bool) -> String {
    // Omit Secure in dev so plain http://localhost works.
    let secure_flag = if secure { " Secure;" } else { "" };
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax;{} Max-Age={}",
        name, value, secure_flag, max_age
    )
}

/// `Set-Cookie` value for the session id, living as long as the session.
pub fn session_cookie(session: &Session, now: DateTime<Utc>, secure: bool) -> String {
    build(SESSION_COOKIE, &session.id, session.remaining_secs(now), secure)
}

/// `Set-Cookie` value for the remember-me token.
pub fn remember_me_cookie(session: &Session, now: DateTime<Utc>, secure: bool) -> String {
    let token = RememberMeToken {
        user_id: session.user_id.clone(),
        session_id: session.id.clone(),
    };
    build(
        REMEMBER_ME_COOKIE,
        &encode_remember_me(&token),
        session.remaining_secs(now),
        secure,
    )
}

pub fn clear_session_cookie(secure: bool) -> String {
    build(SESSION_COOKIE, "", 0, secure)
}

pub fn clear_remember_me_cookie(secure: bool) -> String {
    build(REMEMBER_ME_COOKIE, "", 0, secure)
}

pub fn encode_remember_me(token: &RememberMeToken) -> String {
    // Serializing two strings cannot fail.
    let json = serde_json::to_vec(token).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(json)
}

/// Decode a remember-me value. Anything malformed is `None`.
pub fn decode_remember_me(value: &str) -> Option<RememberMeToken> {
    let bytes = URL_SAFE_NO_PAD.decode(value.trim()).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Parse a `Cookie` request header into name/value pairs.
pub fn parse_cookie_header(header: &str) -> HashMap<String, String> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Session id from a `Cookie` header, if present and non-empty.
pub fn session_id_from_header(header: &str) -> Option<String> {
    parse_cookie_header(header)
        .remove(SESSION_COOKIE)
        .filter(|v| !v.is_empty())
}
