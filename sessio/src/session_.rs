use biscotti::{RemovalCookie, ResponseCookie};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::borrow::Cow;
use std::collections::HashMap;

use crate::SessionConfig;
use crate::SessionId;
use crate::SessionStore;
use crate::config::{
    MissingServerState, ServerStateCreation, SessionCookieKind, TtlExtensionTrigger,
};
use crate::incoming::IncomingSession;
use crate::store::SessionRecordRef;
use crate::store::errors::{DeleteError, LoadError};
use crate::wire::WireClientState;
use errors::{
    FinalizeError, ServerGetError, ServerSetError, StateSide, SyncError, ValueDeserializationError,
    ValueSerializationError,
};

/// The current HTTP session.
///
/// Each session has a client-side state, carried inside the session cookie,
/// and a server-side state, persisted in your chosen storage backend.
/// The two states are distinct bags of values: the same key can be attached
/// to different values on each side.
///
/// The server-side state is loaded lazily: the storage backend is not
/// queried until the first time you try to read or write a server-side
/// value.
pub struct Session {
    id: CurrentSessionId,
    server_state: ServerState,
    client_state: ClientState,
    invalidated: bool,
    store: SessionStore,
    config: SessionConfig,
}

impl std::fmt::Debug for Session {
    // Deliberately opaque: the session id must not end up in logs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CurrentSessionId {
    Existing(SessionId),
    ToBeRenamed { old: SessionId, new: SessionId },
    NewlyGenerated(SessionId),
}

impl CurrentSessionId {
    fn new_id(&self) -> SessionId {
        match self {
            Self::Existing(id) => *id,
            Self::ToBeRenamed { new, .. } => *new,
            Self::NewlyGenerated(id) => *id,
        }
    }

    fn old_id(&self) -> Option<SessionId> {
        match self {
            Self::Existing(id) => Some(*id),
            Self::ToBeRenamed { old, .. } => Some(*old),
            Self::NewlyGenerated(..) => None,
        }
    }
}

#[derive(Debug, Clone)]
enum ClientState {
    MarkedForDeletion,
    Unchanged { state: HashMap<String, Value> },
    Updated { state: HashMap<String, Value> },
}

#[derive(Debug, Clone)]
enum ServerState {
    NotLoaded,
    Unchanged {
        state: HashMap<String, Value>,
        ttl: std::time::Duration,
    },
    DoesNotExist,
    MarkedForDeletion,
    Changed {
        state: HashMap<String, Value>,
    },
}

impl Session {
    /// Create a new HTTP session.
    ///
    /// It is a continuation of the existing session if there was a valid session cookie
    /// attached to the request.
    /// It is a brand-new session otherwise.
    pub fn new(
        store: &SessionStore,
        config: &SessionConfig,
        incoming_session: Option<IncomingSession>,
    ) -> Self {
        let (client_state, previous_session_id) = match incoming_session {
            Some(s) => (s.client_state, Some(s.id)),
            None => (Default::default(), None),
        };
        let (id, server_state) = match previous_session_id {
            Some(id) => (CurrentSessionId::Existing(id), ServerState::NotLoaded),
            None => (
                CurrentSessionId::NewlyGenerated(SessionId::random()),
                ServerState::DoesNotExist,
            ),
        };
        Self {
            id,
            server_state,
            client_state: ClientState::Unchanged {
                state: client_state,
            },
            invalidated: false,
            store: store.clone(),
            config: config.clone(),
        }
    }

    /// Read values from the client-side state attached to this session.
    pub fn client(&self) -> ClientSessionState<'_> {
        ClientSessionState(&self.client_state)
    }

    /// Read or mutate the client-side state attached to this session.
    pub fn client_mut(&mut self) -> ClientSessionStateMut<'_> {
        ClientSessionStateMut(&mut self.client_state)
    }

    /// Get the value associated with `key` from the server-side state.
    ///
    /// If the value is not found, `None` is returned.
    /// If the value cannot be deserialized into the expected type, an error is returned.
    pub async fn get<T: DeserializeOwned>(&mut self, key: &str) -> Result<Option<T>, ServerGetError> {
        self.get_raw(key)
            .await?
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| {
                ValueDeserializationError {
                    key: key.to_owned(),
                    side: StateSide::Server,
                    source: e,
                }
                .into()
            })
    }

    /// Get the raw JSON value associated with `key` from the server-side state.
    pub async fn get_raw(&mut self, key: &str) -> Result<Option<Value>, LoadError> {
        self.force_load().await?;
        match &self.server_state {
            ServerState::MarkedForDeletion => {
                tracing::debug!(session.key = %key, "Tried to access a server-side value on a session marked for deletion.");
                Ok(None)
            }
            ServerState::NotLoaded => {
                unreachable!("Server state should have been loaded by now.")
            }
            ServerState::Unchanged { state, .. } | ServerState::Changed { state } => {
                Ok(state.get(key).cloned())
            }
            ServerState::DoesNotExist => Ok(None),
        }
    }

    /// Set a value in the server-side state for the given key.
    ///
    /// If the value cannot be serialized, an error is returned.
    pub async fn insert<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: T,
    ) -> Result<(), ServerSetError> {
        let key = key.into();
        let value = serde_json::to_value(value).map_err(|e| ValueSerializationError {
            key: key.clone(),
            side: StateSide::Server,
            source: e,
        })?;
        self.insert_raw(key, value).await?;
        Ok(())
    }

    /// Set a raw JSON value in the server-side state for the given key.
    ///
    /// If the key already exists, the old value is returned.
    pub async fn insert_raw(
        &mut self,
        key: impl Into<String>,
        value: Value,
    ) -> Result<Option<Value>, LoadError> {
        let key = key.into();
        self.force_load().await?;
        let mut existing_state;
        match &mut self.server_state {
            ServerState::MarkedForDeletion => {
                tracing::debug!(session.key = %key, "Tried to set a server-side value on a session marked for deletion.");
                return Ok(None);
            }
            ServerState::NotLoaded => {
                unreachable!("Server state should have been loaded by now.")
            }
            ServerState::Unchanged { state, .. } | ServerState::Changed { state } => {
                existing_state = std::mem::take(state);
            }
            ServerState::DoesNotExist => {
                existing_state = HashMap::new();
            }
        };
        let old_value = existing_state.insert(key, value);
        self.server_state = ServerState::Changed {
            state: existing_state,
        };
        Ok(old_value)
    }

    /// Remove the value associated with `key` from the server-side state.
    ///
    /// If the key exists, the removed value is returned.
    /// If the removed value cannot be deserialized into the expected type, an error is returned.
    pub async fn remove<T: DeserializeOwned>(
        &mut self,
        key: &str,
    ) -> Result<Option<T>, ServerGetError> {
        self.remove_raw(key)
            .await?
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| {
                ValueDeserializationError {
                    key: key.to_owned(),
                    side: StateSide::Server,
                    source: e,
                }
                .into()
            })
    }

    /// Remove the value associated with `key` from the server-side state.
    ///
    /// If the key exists, the removed value is returned.
    pub async fn remove_raw(&mut self, key: &str) -> Result<Option<Value>, LoadError> {
        self.force_load().await?;
        match &mut self.server_state {
            ServerState::MarkedForDeletion => {
                tracing::debug!(session.key = %key, "Tried to delete a server-side value on a session marked for deletion.");
                Ok(None)
            }
            ServerState::DoesNotExist => Ok(None),
            ServerState::NotLoaded => {
                unreachable!("Server state should have been loaded by now.")
            }
            ServerState::Unchanged { state, .. } | ServerState::Changed { state } => {
                let Some(value) = state.remove(key) else {
                    return Ok(None);
                };
                let state = std::mem::take(state);
                self.server_state = ServerState::Changed { state };
                Ok(Some(value))
            }
        }
    }

    /// Delete the session record from the store.
    ///
    /// This doesn't destroy the whole session—you must invoke
    /// [`Session::invalidate`] if that's your goal.
    pub fn delete(&mut self) {
        self.server_state = ServerState::MarkedForDeletion;
    }

    /// Remove all key-value pairs from the server-side state.
    ///
    /// This doesn't delete the session record from the store—you must invoke
    /// [`Session::delete`] if you want to delete the record altogether.
    pub async fn clear(&mut self) -> Result<(), LoadError> {
        self.force_load().await?;
        match &mut self.server_state {
            ServerState::MarkedForDeletion | ServerState::DoesNotExist => {}
            ServerState::NotLoaded => {
                unreachable!("Server state should have been loaded by now.")
            }
            ServerState::Unchanged { state, .. } => {
                if !state.is_empty() {
                    self.server_state = ServerState::Changed {
                        state: HashMap::new(),
                    };
                }
            }
            ServerState::Changed { state } => {
                state.clear();
            }
        }
        Ok(())
    }

    /// Returns `true` if the server-side state is empty.
    pub async fn is_empty(&mut self) -> Result<bool, LoadError> {
        self.force_load().await?;
        let is_empty = match &self.server_state {
            ServerState::MarkedForDeletion | ServerState::DoesNotExist => true,
            ServerState::NotLoaded => {
                unreachable!("Server state should have been loaded by now.")
            }
            ServerState::Unchanged { state, .. } | ServerState::Changed { state } => {
                state.is_empty()
            }
        };
        Ok(is_empty)
    }

    /// Generate a new session identifier and attach it to this session.
    /// The session state is preserved on both the client-side and the server-side.
    ///
    /// This method is useful for security reasons, as it can help prevent
    /// session fixation attacks.
    pub fn cycle_id(&mut self) {
        let old = self.id.old_id();
        let new = SessionId::random();

        // Integrity check.
        assert_ne!(
            old,
            Some(new),
            "The newly generated session ID is the same as the old one. This should be impossible."
        );

        self.id = match old {
            Some(old) => CurrentSessionId::ToBeRenamed { old, new },
            None => CurrentSessionId::NewlyGenerated(new),
        };
    }

    /// Invalidate the session.
    ///
    /// The server-side session state will be marked for deletion.
    /// The client-side cookie will be removed from the client using a removal cookie.
    ///
    /// After calling this method, the session is considered invalid and should not be used anymore.
    /// All further operations on the session will be no-ops.
    pub fn invalidate(&mut self) {
        self.server_state = ServerState::MarkedForDeletion;
        self.client_state = ClientState::MarkedForDeletion;
        self.invalidated = true;
    }

    /// Returns `true` if [`Session::invalidate`] has been called on this
    /// session.
    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    /// Sync the session state with the store and compute the cookie that
    /// should be attached to the outgoing response, if any.
    ///
    /// You rarely need to call this method yourself: it is invoked by
    /// [`SessionLayer`][crate::SessionLayer] after the request handler has
    /// run.
    pub async fn finalize(&mut self) -> Result<Option<ResponseCookie<'static>>, FinalizeError> {
        self.sync().await?;

        let cookie_config = &self.config.cookie;
        let cookie_name = cookie_config.name.clone();

        match &self.client_state {
            ClientState::MarkedForDeletion => {
                if self.id.old_id().is_none() {
                    // There is no cookie to remove on the client: the session
                    // never left the server.
                    return Ok(None);
                }
                let mut cookie = RemovalCookie::new(cookie_name);
                if let Some(domain) = cookie_config.domain.as_deref() {
                    cookie = cookie.set_domain(domain.to_owned());
                }
                if let Some(path) = cookie_config.path.as_deref() {
                    cookie = cookie.set_path(path.to_owned());
                }
                Ok(Some(cookie.into()))
            }
            ClientState::Updated {
                state: client_state,
            }
            | ClientState::Unchanged {
                state: client_state,
            } => {
                let server_record_exists = match &self.server_state {
                    ServerState::Unchanged { .. } => Some(true),
                    ServerState::DoesNotExist => Some(false),
                    ServerState::NotLoaded => None,
                    ServerState::MarkedForDeletion | ServerState::Changed { .. } => {
                        unreachable!("The server state has just been synchronized.")
                    }
                };
                // The session is new, we don't have a server-side record, and the client state is empty.
                // We don't need to create a session cookie in this case.
                if self.id.old_id().is_none()
                    && !server_record_exists.unwrap_or(true)
                    && client_state.is_empty()
                {
                    return Ok(None);
                }
                // A continuation of an existing session whose cookie content is
                // unchanged: the client already has the exact cookie we would
                // send, so we stay silent unless the cookie should be rolled.
                let client_state_unchanged =
                    matches!(&self.client_state, ClientState::Unchanged { .. });
                let id_unchanged = matches!(&self.id, CurrentSessionId::Existing(_));
                if id_unchanged && client_state_unchanged && !cookie_config.rolling {
                    return Ok(None);
                }
                let value = WireClientState {
                    session_id: self.id.new_id(),
                    user_values: Cow::Borrowed(client_state),
                };
                let value = serde_json::to_string(&value)?;
                let mut cookie = ResponseCookie::new(cookie_name, value);
                if let Some(domain) = cookie_config.domain.as_deref() {
                    cookie = cookie.set_domain(domain.to_owned());
                }
                if let Some(path) = cookie_config.path.as_deref() {
                    cookie = cookie.set_path(path.to_owned());
                }
                if let Some(same_site) = cookie_config.same_site {
                    cookie = cookie.set_same_site(same_site);
                }
                if cookie_config.secure {
                    cookie = cookie.set_secure(true);
                }
                if cookie_config.http_only {
                    cookie = cookie.set_http_only(true);
                }
                if cookie_config.kind == SessionCookieKind::Persistent {
                    let max_age = self
                        .config
                        .state
                        .ttl
                        .try_into()
                        .unwrap_or(biscotti::time::SignedDuration::MAX);
                    cookie = cookie.set_max_age(max_age);
                }
                Ok(Some(cookie))
            }
        }
    }

    /// Sync the in-memory representation of the server-side state
    /// with the store.
    ///
    /// In most cases, you don't need to invoke this method manually: it is
    /// done for you by [`Session::finalize`], which is in turn invoked by
    /// [`SessionLayer`][crate::SessionLayer].
    pub async fn sync(&mut self) -> Result<(), SyncError> {
        let state_config = &self.config.state;
        let fresh_ttl = state_config.ttl;
        let create_if_empty = {
            let has_client_side = self.id.old_id().is_some()
                || matches!(self.client_state, ClientState::Updated { .. });
            has_client_side && state_config.server_state_creation == ServerStateCreation::NeverSkip
        };
        match &self.server_state {
            ServerState::DoesNotExist => match self.id {
                CurrentSessionId::NewlyGenerated(id) | CurrentSessionId::Existing(id) => {
                    if create_if_empty {
                        self.store
                            .create(&id, SessionRecordRef::empty(fresh_ttl))
                            .await?;
                    }
                }
                CurrentSessionId::ToBeRenamed { .. } => {
                    // Nothing to do.
                }
            },
            ServerState::NotLoaded => {
                match self.id {
                    CurrentSessionId::Existing(_) => {
                        // Nothing to do.
                    }
                    CurrentSessionId::ToBeRenamed { old, new } => {
                        if old != new {
                            self.store.change_id(&old, &new).await?;
                        }
                    }
                    CurrentSessionId::NewlyGenerated(..) => {
                        unreachable!(
                            "A newly generated session cannot have a 'NotLoaded' server state. It must be set to 'DoesNotExist'."
                        )
                    }
                };
            }
            ServerState::Unchanged {
                state,
                ttl: remaining_ttl,
            } => {
                match self.id {
                    CurrentSessionId::Existing(old) => {
                        if state_config.extend_ttl == TtlExtensionTrigger::OnStateLoadsAndChanges {
                            let extend = state_config
                                .ttl_extension_threshold
                                .map(|ratio| *remaining_ttl < fresh_ttl.mul_f32(ratio.inner()))
                                .unwrap_or(true);
                            if extend {
                                self.store.update_ttl(&old, fresh_ttl).await?;
                            }
                        }
                    }
                    CurrentSessionId::ToBeRenamed { old, new } => {
                        if old != new {
                            if let Err(e) = self.store.delete(&old).await {
                                match e {
                                    DeleteError::UnknownId(_) => {
                                        // The record expired after we loaded it.
                                        // We already have the state in memory,
                                        // so nothing is lost.
                                    }
                                    _ => return Err(e.into()),
                                }
                            }
                            let record = SessionRecordRef {
                                state: Cow::Borrowed(state),
                                ttl: fresh_ttl,
                            };
                            self.store.create(&new, record).await?;
                        }
                    }
                    CurrentSessionId::NewlyGenerated(new) => {
                        if create_if_empty {
                            self.store
                                .create(&new, SessionRecordRef::empty(fresh_ttl))
                                .await?;
                        }

                        // Integrity check.
                        assert!(
                            state.is_empty(),
                            "Server state is not empty on a new session, \
                            but the state is marked as 'unchanged'. This is a bug in `sessio`"
                        );
                    }
                };
            }
            ServerState::MarkedForDeletion => match self.id.old_id() {
                Some(id) => {
                    if let Err(e) = self.store.delete(&id).await {
                        match e {
                            // As long as no server-side state is stored against
                            // this id, we're good.
                            DeleteError::UnknownId(_) => {}
                            _ => return Err(e.into()),
                        }
                    }
                }
                None => {
                    tracing::trace!(
                        "The server session state was marked for deletion, but there was no session to delete. This is a no-op."
                    )
                }
            },
            ServerState::Changed { state } => {
                let record = SessionRecordRef {
                    state: Cow::Borrowed(state),
                    ttl: fresh_ttl,
                };
                match self.id {
                    CurrentSessionId::Existing(id) => {
                        self.store.update(&id, record).await?;
                    }
                    CurrentSessionId::ToBeRenamed { old, new } => {
                        if old != new {
                            if let Err(e) = self.store.delete(&old).await {
                                match e {
                                    DeleteError::UnknownId(_) => {
                                        // The record may have expired between this
                                        // delete operation and the first (successful)
                                        // load we performed at the beginning of this
                                        // request processing task.
                                        // Since we already have the value in memory,
                                        // this is not an issue.
                                    }
                                    _ => {
                                        return Err(e.into());
                                    }
                                }
                            }
                            self.store.create(&new, record).await?;
                        } else {
                            self.store.update(&old, record).await?;
                        }
                    }
                    CurrentSessionId::NewlyGenerated(id) => {
                        self.store.create(&id, record).await?;
                    }
                }
            }
        };

        self.server_state = {
            // The replacement value doesn't matter, we overwrite it right
            // below. `MarkedForDeletion` is free to create.
            let old_state =
                std::mem::replace(&mut self.server_state, ServerState::MarkedForDeletion);
            match old_state {
                ServerState::Changed { state } => ServerState::Unchanged {
                    state,
                    ttl: fresh_ttl,
                },
                ServerState::Unchanged { state, ttl } => ServerState::Unchanged { state, ttl },
                ServerState::MarkedForDeletion => ServerState::DoesNotExist,
                ServerState::NotLoaded => ServerState::NotLoaded,
                ServerState::DoesNotExist => {
                    if create_if_empty {
                        ServerState::Unchanged {
                            state: HashMap::new(),
                            ttl: fresh_ttl,
                        }
                    } else {
                        ServerState::DoesNotExist
                    }
                }
            }
        };
        Ok(())
    }

    /// Load the server-side state from the store.
    /// This method does nothing if the server-side state has already been loaded.
    ///
    /// After calling this method, the server-side state will be loaded
    /// and cached in memory, so that subsequent reads and writes will
    /// operate on the in-memory state.
    pub async fn force_load(&mut self) -> Result<(), LoadError> {
        // All other cases either imply that we've already loaded the
        // server state or that we don't need to (e.g. delete).
        if !matches!(self.server_state, ServerState::NotLoaded) {
            return Ok(());
        }
        let Some(session_id) = self.id.old_id() else {
            return Ok(());
        };
        let record = self.store.load(&session_id).await?;
        self.server_state = match record {
            Some(r) => ServerState::Unchanged {
                state: r.state,
                ttl: r.ttl,
            },
            None => {
                let tolerated = self.config.state.server_state_creation
                    == ServerStateCreation::SkipIfEmpty
                    || self.config.state.missing_server_state == MissingServerState::Allow;
                if tolerated {
                    ServerState::DoesNotExist
                } else {
                    // The record may have expired (or been garbage-collected)
                    // between the time the request came in and now.
                    tracing::warn!(
                        "There is no server-side state for the current session, \
                        even though one was expected. Invalidating the session."
                    );
                    self.invalidate();
                    return Ok(());
                }
            }
        };
        Ok(())
    }
}

/// A read-only reference to the client-side state of a session.
pub struct ClientSessionState<'session>(&'session ClientState);

impl<'session> ClientSessionState<'session> {
    /// Get the value associated with `key` from the client-side state.
    ///
    /// If the value is not found, `None` is returned.
    /// If the value is found, but it cannot be deserialized into the expected type, an error is returned.
    pub fn get<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, ValueDeserializationError> {
        client_get(self.0, key)
    }

    /// Get the raw JSON value associated with `key` from the client-side state.
    pub fn get_raw(&self, key: &str) -> Option<&'session Value> {
        client_get_raw(self.0, key)
    }

    /// Returns `true` if the client-side state is empty.
    pub fn is_empty(&self) -> bool {
        client_is_empty(self.0)
    }
}

/// A mutable reference to the client-side state of a session.
pub struct ClientSessionStateMut<'session>(&'session mut ClientState);

impl ClientSessionStateMut<'_> {
    /// Get the value associated with `key` from the client-side state.
    ///
    /// If the value is not found, `None` is returned.
    /// If the value is found, but it cannot be deserialized into the expected type, an error is returned.
    pub fn get<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, ValueDeserializationError> {
        client_get(self.0, key)
    }

    /// Get the raw JSON value associated with `key` from the client-side state.
    pub fn get_raw(&self, key: &str) -> Option<&Value> {
        client_get_raw(self.0, key)
    }

    /// Returns `true` if the client-side state is empty.
    pub fn is_empty(&self) -> bool {
        client_is_empty(self.0)
    }

    /// Set a value in the client-side state for the given key.
    ///
    /// If the value cannot be serialized, an error is returned.
    pub fn insert<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: T,
    ) -> Result<(), ValueSerializationError> {
        let key = key.into();
        let value = serde_json::to_value(value).map_err(|e| ValueSerializationError {
            key: key.clone(),
            side: StateSide::Client,
            source: e,
        })?;
        self.insert_raw(key, value);
        Ok(())
    }

    /// Set a raw JSON value in the client-side state for the given key.
    ///
    /// If the key already exists, the value is updated and the old value is returned.
    pub fn insert_raw(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        match &mut self.0 {
            ClientState::MarkedForDeletion => {
                tracing::trace!(
                    "Attempted to set a client-side value on a session marked for deletion."
                );
                None
            }
            ClientState::Updated { state } => state.insert(key.into(), value),
            ClientState::Unchanged { state } => {
                let value = state.insert(key.into(), value);
                *self.0 = ClientState::Updated {
                    state: std::mem::take(state),
                };
                value
            }
        }
    }

    /// Remove the value associated with `key` from the client-side state.
    ///
    /// If the key exists, the removed value is returned.
    /// If the removed value cannot be deserialized into the expected type, an error is returned.
    pub fn remove<T: DeserializeOwned>(
        &mut self,
        key: &str,
    ) -> Result<Option<T>, ValueDeserializationError> {
        self.remove_raw(key)
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| ValueDeserializationError {
                key: key.to_owned(),
                side: StateSide::Client,
                source: e,
            })
    }

    /// Remove the value associated with `key` from the client-side state.
    ///
    /// If the key exists, the removed value is returned.
    pub fn remove_raw(&mut self, key: &str) -> Option<Value> {
        match &mut self.0 {
            ClientState::MarkedForDeletion => None,
            ClientState::Updated { state } => state.remove(key),
            ClientState::Unchanged { state } => {
                let value = state.remove(key)?;
                *self.0 = ClientState::Updated {
                    state: std::mem::take(state),
                };
                Some(value)
            }
        }
    }

    /// Remove all key-value pairs from the client-side state.
    ///
    /// This doesn't invalidate the session—you must invoke [`Session::invalidate`]
    /// if you want to delete the session altogether.
    pub fn clear(&mut self) {
        match &mut self.0 {
            ClientState::MarkedForDeletion => {}
            ClientState::Updated { state } => state.clear(),
            ClientState::Unchanged { state } => {
                if !state.is_empty() {
                    *self.0 = ClientState::Updated {
                        state: HashMap::new(),
                    };
                }
            }
        }
    }
}

fn client_get<T: DeserializeOwned>(
    state: &ClientState,
    key: &str,
) -> Result<Option<T>, ValueDeserializationError> {
    client_get_raw(state, key)
        .map(|value| serde_json::from_value(value.clone()))
        .transpose()
        .map_err(|e| ValueDeserializationError {
            key: key.to_owned(),
            side: StateSide::Client,
            source: e,
        })
}

fn client_get_raw<'session>(state: &'session ClientState, key: &str) -> Option<&'session Value> {
    match state {
        ClientState::MarkedForDeletion => {
            tracing::trace!(
                "Attempted to get a client-side value on a session marked for deletion."
            );
            None
        }
        ClientState::Unchanged { state } | ClientState::Updated { state } => state.get(key),
    }
}

fn client_is_empty(state: &ClientState) -> bool {
    match state {
        ClientState::MarkedForDeletion => true,
        ClientState::Unchanged { state } | ClientState::Updated { state } => state.is_empty(),
    }
}

/// Errors that can occur when interacting with the session state.
pub mod errors {
    use crate::store::errors::{
        ChangeIdError, CreateError, DeleteError, LoadError, UpdateError, UpdateTtlError,
    };

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    /// The error returned by [`Session::sync`][super::Session::sync].
    pub enum SyncError {
        #[error("Failed to create a new session record")]
        CreateError(#[from] CreateError),
        #[error("Failed to update a session record")]
        UpdateError(#[from] UpdateError),
        #[error("Failed to delete a session record")]
        DeleteError(#[from] DeleteError),
        #[error("Failed to update the TTL for a session record")]
        UpdateTtlError(#[from] UpdateTtlError),
        #[error("Failed to change the session id for a session record")]
        ChangeIdError(#[from] ChangeIdError),
    }

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    /// The error returned by fallible read operations on the server-side session state.
    pub enum ServerGetError {
        #[error("Failed to load the session record")]
        LoadError(#[from] LoadError),
        #[error(transparent)]
        DeserializationError(#[from] ValueDeserializationError),
    }

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    /// The error returned by fallible write operations on the server-side session state.
    pub enum ServerSetError {
        #[error("Failed to load the session record")]
        LoadError(#[from] LoadError),
        #[error(transparent)]
        SerializationError(#[from] ValueSerializationError),
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// The side of the session state an operation was targeting.
    pub enum StateSide {
        /// The state carried inside the session cookie.
        Client,
        /// The state persisted in the storage backend.
        Server,
    }

    impl std::fmt::Display for StateSide {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                StateSide::Client => write!(f, "client-side"),
                StateSide::Server => write!(f, "server-side"),
            }
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    #[error("Failed to deserialize the value associated with `{key}` in the {side} session state")]
    /// The error returned when a session value cannot be deserialized into
    /// the expected type.
    pub struct ValueDeserializationError {
        /// The key of the value that we failed to deserialize.
        pub key: String,
        /// The side of the session state the value belongs to.
        pub side: StateSide,
        #[source]
        /// The underlying deserialization error.
        pub source: serde_json::Error,
    }

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    #[error(
        "Failed to serialize the value that would have been associated with `{key}` in the {side} session state"
    )]
    /// The error returned when a session value cannot be serialized.
    pub struct ValueSerializationError {
        /// The key of the value that we failed to serialize.
        pub key: String,
        /// The side of the session state the value belongs to.
        pub side: StateSide,
        #[source]
        /// The underlying serialization error.
        pub source: serde_json::Error,
    }

    /// The error returned by [`Session::finalize`][super::Session::finalize].
    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    pub enum FinalizeError {
        #[error("Failed to serialize the client-side session state")]
        SerializationError(#[from] serde_json::Error),
        #[error("Failed to sync the server-side session state")]
        SyncErr(#[from] SyncError),
    }

    impl FinalizeError {
        /// The status code of the response that should be returned to the
        /// client when session finalization fails.
        pub fn status_code(&self) -> http::StatusCode {
            http::StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
