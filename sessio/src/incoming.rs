use crate::{SessionId, config::SessionCookieConfig, wire::WireClientState};
use biscotti::RequestCookies;
use serde_json::Value;
use std::collections::HashMap;

/// The session information attached to the incoming request.
///
/// Built using [`IncomingSession::extract`].
pub struct IncomingSession {
    pub(crate) id: SessionId,
    pub(crate) client_state: HashMap<String, Value>,
}

impl IncomingSession {
    /// Extract a session cookie from the incoming request, if it exists.
    ///
    /// If the cookie is not found, or if the cookie is invalid, this method will return `None`.
    pub fn extract(cookies: &RequestCookies<'_>, config: &SessionCookieConfig) -> Option<Self> {
        let cookie = cookies.get(&config.name)?;
        match serde_json::from_str::<WireClientState>(cookie.value()) {
            Ok(s) => Some(Self {
                id: s.session_id,
                client_state: s.user_values.into_owned(),
            }),
            Err(e) => {
                tracing::warn!(
                    error.message = %e,
                    "Invalid client state for session, creating a new session."
                );
                None
            }
        }
    }

    /// Assemble an [`IncomingSession`] from a session id and a client-side
    /// state, bypassing cookie extraction.
    ///
    /// Primarily useful for testing.
    pub fn from_parts(id: SessionId, client_state: HashMap<String, Value>) -> Self {
        Self { id, client_state }
    }
}
