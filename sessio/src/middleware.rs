use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use biscotti::{Processor, RequestCookies, ResponseCookies};
use http::header::{COOKIE, SET_COOKIE};
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode};
use tokio::sync::{Mutex, MutexGuard};
use tower::{Layer, Service};

use crate::{IncomingSession, Session, SessionConfig, SessionStore};

/// A [`tower::Layer`] that equips every request with a [`Session`].
///
/// On the way in, the session cookie (if any) is parsed out of the `Cookie`
/// headers and verified/decrypted according to the rules of the provided
/// [`Processor`]. The resulting [`Session`] is exposed to request handlers
/// via [`SessionHandle`], available from the request extensions.
///
/// On the way out, the session is finalized: the server-side state is synced
/// with the storage backend and, when warranted, a `Set-Cookie` header is
/// appended to the response.
///
/// # Example
///
/// ```rust,no_run
/// use biscotti::{Key, Processor, ProcessorConfig, config::{CryptoAlgorithm, CryptoRule}};
/// use sessio::{SessionConfig, SessionLayer, SessionStore};
/// # fn store() -> SessionStore { unimplemented!() }
///
/// let config = SessionConfig::default();
/// let processor: Processor = {
///     let mut cookie_config = ProcessorConfig::default();
///     cookie_config.crypto_rules.push(CryptoRule {
///         cookie_names: vec![config.cookie.name.clone()],
///         algorithm: CryptoAlgorithm::Signing,
///         key: Key::generate(),
///         fallbacks: vec![],
///     });
///     cookie_config.into()
/// };
/// let layer = SessionLayer::new(store(), processor).with_config(config);
/// ```
#[derive(Clone)]
pub struct SessionLayer {
    store: SessionStore,
    processor: Arc<Processor>,
    config: Arc<SessionConfig>,
}

impl std::fmt::Debug for SessionLayer {
    // The processor holds cryptographic keys: keep it out of the output.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLayer")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SessionLayer {
    /// Create a new [`SessionLayer`] with the default [`SessionConfig`].
    ///
    /// The processor determines how session cookies are signed or encrypted.
    /// An incoming session cookie that fails verification is discarded and
    /// the request proceeds with a fresh session.
    pub fn new(store: SessionStore, processor: Processor) -> Self {
        Self {
            store,
            processor: Arc::new(processor),
            config: Arc::new(SessionConfig::default()),
        }
    }

    /// Override the session configuration.
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = Arc::new(config);
        self
    }
}

impl<S> Layer<S> for SessionLayer {
    type Service = SessionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SessionService {
            inner,
            store: self.store.clone(),
            processor: Arc::clone(&self.processor),
            config: Arc::clone(&self.config),
        }
    }
}

/// The [`tower::Service`] produced by [`SessionLayer`].
#[derive(Clone)]
pub struct SessionService<S> {
    inner: S,
    store: SessionStore,
    processor: Arc<Processor>,
    config: Arc<SessionConfig>,
}

impl<S: std::fmt::Debug> std::fmt::Debug for SessionService<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionService")
            .field("inner", &self.inner)
            .field("store", &self.store)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for SessionService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Default + Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let store = self.store.clone();
        let processor = Arc::clone(&self.processor);
        let config = Arc::clone(&self.config);
        // The service on the left of `mem::replace` is the one that has been
        // polled to readiness.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let incoming = extract_incoming_session(req.headers(), &processor, &config);
            let handle = SessionHandle::new(Session::new(&store, &config, incoming));
            req.extensions_mut().insert(handle.clone());

            let mut response = inner.call(req).await?;

            let outcome = handle.lock().await.finalize().await;
            match outcome {
                Ok(Some(cookie)) => {
                    let mut response_cookies = ResponseCookies::new();
                    response_cookies.insert(cookie);
                    for value in response_cookies.header_values(&processor) {
                        match HeaderValue::from_str(&value) {
                            Ok(value) => {
                                response.headers_mut().append(SET_COOKIE, value);
                            }
                            Err(_) => {
                                tracing::error!(
                                    "The session cookie cannot be represented as a valid `Set-Cookie` header value."
                                );
                                return Ok(server_error_response());
                            }
                        }
                    }
                    Ok(response)
                }
                Ok(None) => Ok(response),
                Err(e) => {
                    tracing::error!(
                        error.message = %e,
                        error.details = ?e,
                        "Failed to finalize the session for the current request."
                    );
                    Ok(status_response(e.status_code()))
                }
            }
        })
    }
}

/// A cloneable handle to the [`Session`] attached to the current request.
///
/// [`SessionLayer`] inserts a handle into the request extensions; all clones
/// point at the same session. Handlers lock the handle to read or mutate the
/// session state.
#[derive(Debug, Clone)]
pub struct SessionHandle(Arc<Mutex<Session>>);

impl SessionHandle {
    /// Wrap a [`Session`] into a shareable handle.
    pub fn new(session: Session) -> Self {
        Self(Arc::new(Mutex::new(session)))
    }

    /// Acquire exclusive access to the underlying [`Session`].
    ///
    /// The lock is released when the returned guard is dropped. Don't hold
    /// it across calls that may want to acquire it again.
    pub async fn lock(&self) -> MutexGuard<'_, Session> {
        self.0.lock().await
    }
}

fn extract_incoming_session(
    headers: &HeaderMap,
    processor: &Processor,
    config: &SessionConfig,
) -> Option<IncomingSession> {
    let mut cookies = RequestCookies::new();
    for header in headers.get_all(COOKIE) {
        let Ok(header) = header.to_str() else {
            tracing::warn!("A `Cookie` header is not valid UTF-8. Skipping it.");
            continue;
        };
        if let Err(e) = cookies.extend_from_header(header, processor) {
            // A cookie that fails signature verification (or is otherwise
            // malformed) must not take the whole request down: the client
            // simply doesn't get to resume a session with it.
            tracing::warn!(
                error.message = %e,
                "Failed to parse a `Cookie` header. Its cookies are ignored."
            );
        }
    }
    IncomingSession::extract(&cookies, &config.cookie)
}

fn server_error_response<ResBody: Default>() -> Response<ResBody> {
    status_response(StatusCode::INTERNAL_SERVER_ERROR)
}

fn status_response<ResBody: Default>(status: StatusCode) -> Response<ResBody> {
    let mut response = Response::new(ResBody::default());
    *response.status_mut() = status;
    response
}
