//! Authenticated identity returned by a successful `login`.
//!
//! The identity is an immutable snapshot.  The session replaces it wholesale
//! after every (re-)login and hands out `Arc` clones, so a reader on another
//! worker task never observes a half-updated value.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::protocol::codec::{self, InboundMessage};

/// Error type for login responses that cannot be turned into an identity.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    /// The response has no `result` object.
    #[error("login response has no result object")]
    MissingResult,

    /// A required attribute of `result` is missing or not a string.
    #[error("login response is missing `{0}`")]
    MissingField(&'static str),
}

/// User id, auth token and token expiry of the logged-in user.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthenticatedIdentity {
    user_id: String,
    auth_token: String,
    token_expires: Option<SystemTime>,
}

impl AuthenticatedIdentity {
    /// Creates an identity from its parts.
    pub fn new(
        user_id: impl Into<String>,
        auth_token: impl Into<String>,
        token_expires: Option<SystemTime>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            auth_token: auth_token.into(),
            token_expires,
        }
    }

    /// Extracts the identity from a `login` method result:
    ///
    /// ```json
    /// {"msg":"result","id":"2","result":{
    ///     "id":"Ey8ts3FCqjjF5fZkn",
    ///     "token":"9HqLlyZOugoStsXCUfD_0YdwnNnunAJF8V47U3QHXSq",
    ///     "tokenExpires":{"$date":1480377601000},
    ///     "type":"password"}}
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] when `result`, `result.id` or `result.token`
    /// is missing.  A missing or malformed `tokenExpires` is tolerated.
    pub fn from_login_response(message: &InboundMessage) -> Result<Self, IdentityError> {
        let result = message
            .result()
            .and_then(|r| r.as_object())
            .ok_or(IdentityError::MissingResult)?;

        let user_id = codec::text(result, "id").ok_or(IdentityError::MissingField("id"))?;
        let auth_token =
            codec::text(result, "token").ok_or(IdentityError::MissingField("token"))?;
        let token_expires = result
            .get("tokenExpires")
            .and_then(codec::millis)
            .map(|ms| UNIX_EPOCH + Duration::from_millis(ms));

        Ok(Self::new(user_id, auth_token, token_expires))
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn auth_token(&self) -> &str {
        &self.auth_token
    }

    pub fn token_expires(&self) -> Option<SystemTime> {
        self.token_expires
    }

    /// Returns `true` if the token has an expiry that lies before `now`.
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        self.token_expires.is_some_and(|expires| expires <= now)
    }
}

// The token is a bearer credential; keep it out of log output.
impl fmt::Debug for AuthenticatedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatedIdentity")
            .field("user_id", &self.user_id)
            .field("auth_token", &"<redacted>")
            .field("token_expires", &self.token_expires)
            .finish()
    }
}
