//! Handler dispatcher — routes inbound requests by type tag.
//!
//! Only messages whose id matched no pending request reach the dispatcher.
//! Registering a handler for a tag that already has one replaces it.

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::ipc::registry::MessageRegistry;
use crate::messages::{CatalogueMessage, Payload, Request};
use crate::types::{Error, ProtocolError, Result};

/// Callback for one inbound message kind.
///
/// `Ok(Some(payload))` is written back as the response; `Ok(None)` sends
/// nothing.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, request: Payload) -> Result<Option<Payload>>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Payload>>> + Send + 'static,
{
    async fn handle(&self, request: Payload) -> Result<Option<Payload>> {
        (self.0)(request).await
    }
}

struct TypedHandler<R, F> {
    f: F,
    _request: PhantomData<fn(R)>,
}

#[async_trait]
impl<R, F, Fut> Handler for TypedHandler<R, F>
where
    R: Request,
    F: Fn(R) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R::Response>> + Send + 'static,
{
    async fn handle(&self, request: Payload) -> Result<Option<Payload>> {
        let request = R::try_from(request).map_err(|other| {
            Error::handler(format!(
                "{} handler received {}",
                R::TYPE_TAG,
                other.type_tag()
            ))
        })?;
        let response = (self.f)(request).await?;
        Ok(Some(response.into()))
    }
}

/// Type tag → handler table. Lookups clone the handler out of the lock.
#[derive(Default)]
pub struct HandlerDispatcher {
    handlers: RwLock<HashMap<String, Arc<dyn Handler>>>,
}

impl fmt::Debug for HandlerDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.read();
        f.debug_struct("HandlerDispatcher")
            .field("types", &handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl HandlerDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `type_tag`, replacing any previous one.
    ///
    /// Lookups use canonical tags, so `type_tag` must not be an alias;
    /// [`CommService`](crate::ipc::CommService) resolves aliases before
    /// registering. Returns `true` when a handler was replaced.
    pub fn register_handler(&self, type_tag: impl Into<String>, handler: impl Handler) -> bool {
        let type_tag = type_tag.into();
        let replaced = self
            .handlers
            .write()
            .insert(type_tag.clone(), Arc::new(handler))
            .is_some();
        if replaced {
            tracing::debug!("Replaced handler: {}", type_tag);
        } else {
            tracing::debug!("Registered handler: {}", type_tag);
        }
        replaced
    }

    /// Register an async closure over raw payloads.
    pub fn register_fn<F, Fut>(&self, type_tag: impl Into<String>, f: F) -> bool
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Payload>>> + Send + 'static,
    {
        self.register_handler(type_tag, FnHandler(f))
    }

    /// Register a typed handler for a catalogue request.
    pub fn on<R, F, Fut>(&self, f: F) -> bool
    where
        R: Request,
        F: Fn(R) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R::Response>> + Send + 'static,
    {
        self.register_handler(
            R::TYPE_TAG,
            TypedHandler {
                f,
                _request: PhantomData,
            },
        )
    }

    pub fn unregister(&self, type_tag: &str) -> bool {
        self.handlers.write().remove(type_tag).is_some()
    }

    pub fn contains(&self, type_tag: &str) -> bool {
        self.handlers.read().contains_key(type_tag)
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn handler(&self, type_tag: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.read().get(type_tag).cloned()
    }

    /// Run the handler registered for the request's type tag.
    ///
    /// A failing (or panicking) handler becomes a `success=false` response
    /// when the paired response type is error-shaped, and an
    /// [`Error::Handler`] otherwise.
    pub async fn dispatch(
        &self,
        registry: &MessageRegistry,
        request: Payload,
    ) -> Result<Option<Payload>> {
        let type_tag = request.type_tag().to_string();
        let handler = self
            .handler(&type_tag)
            .ok_or_else(|| ProtocolError::UnhandledType(type_tag.clone()))?;

        let outcome = AssertUnwindSafe(handler.handle(request))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(Error::handler("handler panicked")));

        match outcome {
            Ok(response) => Ok(response),
            Err(err) => {
                let message = failure_message(&err);
                tracing::warn!("Handler for {} failed: {}", type_tag, message);
                registry
                    .failure_response(&type_tag, &message)
                    .map(Some)
                    .ok_or_else(|| {
                        Error::handler(format!("{} handler failed: {}", type_tag, message))
                    })
            }
        }
    }
}

fn failure_message(err: &Error) -> String {
    match err {
        Error::Handler(message) => message.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{
        LoadPlanningDataRequest, LoadPlanningDataResponse, Outcome, StopRegistrationRequest,
        StopRegistrationResponse, UpdateAntennaSampleRequest,
    };
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_dispatch_typed_handler() {
        let registry = MessageRegistry::with_catalogue();
        let dispatcher = HandlerDispatcher::new();
        dispatcher.on(|request: LoadPlanningDataRequest| async move {
            if request.skeleton_dir_path.is_empty() {
                Ok(LoadPlanningDataResponse::failed("no skeleton"))
            } else {
                Ok(LoadPlanningDataResponse::ok())
            }
        });

        let response = dispatcher
            .dispatch(
                &registry,
                LoadPlanningDataRequest {
                    skeleton_dir_path: "/a".into(),
                    ..Default::default()
                }
                .into(),
            )
            .await
            .unwrap();
        assert_eq!(response, Some(LoadPlanningDataResponse::ok().into()));
    }

    #[tokio::test]
    async fn test_unhandled_type_is_protocol_error() {
        let registry = MessageRegistry::with_catalogue();
        let dispatcher = HandlerDispatcher::new();
        let err = dispatcher
            .dispatch(&registry, StopRegistrationRequest {}.into())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::UnhandledType(tag)) if tag == "StopRegistrationRequest"
        ));
    }

    #[tokio::test]
    async fn test_second_registration_replaces_first() {
        let registry = MessageRegistry::with_catalogue();
        let dispatcher = HandlerDispatcher::new();
        assert!(!dispatcher.on(|_: StopRegistrationRequest| async {
            Ok(StopRegistrationResponse::failed("first"))
        }));
        assert!(dispatcher.on(|_: StopRegistrationRequest| async {
            Ok(StopRegistrationResponse::failed("second"))
        }));
        assert_eq!(dispatcher.len(), 1);

        let response = dispatcher
            .dispatch(&registry, StopRegistrationRequest {}.into())
            .await
            .unwrap();
        assert_eq!(
            response,
            Some(StopRegistrationResponse::failed("second").into())
        );
    }

    #[tokio::test]
    async fn test_handler_error_becomes_failure_response() {
        let registry = MessageRegistry::with_catalogue();
        let dispatcher = HandlerDispatcher::new();
        dispatcher.on(|_: StopRegistrationRequest| async {
            Err::<StopRegistrationResponse, _>(Error::handler("tracker offline"))
        });

        let response = dispatcher
            .dispatch(&registry, StopRegistrationRequest {}.into())
            .await
            .unwrap();
        assert_eq!(
            response,
            Some(StopRegistrationResponse::failed("tracker offline").into())
        );
    }

    #[tokio::test]
    async fn test_handler_error_without_error_shape_is_reported() {
        let registry = MessageRegistry::with_catalogue();
        let dispatcher = HandlerDispatcher::new();
        dispatcher.register_fn("UpdateAntennaSampleRequest", |_| async {
            Err(Error::handler("bad sample"))
        });

        let err = dispatcher
            .dispatch(&registry, UpdateAntennaSampleRequest::default().into())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Handler(msg) if msg.contains("bad sample")));
    }

    async fn explode(_: Payload) -> Result<Option<Payload>> {
        panic!("handler bug")
    }

    #[tokio::test]
    async fn test_panicking_handler_is_contained() {
        let registry = MessageRegistry::with_catalogue();
        let dispatcher = HandlerDispatcher::new();
        dispatcher.register_fn("StopRegistrationRequest", explode);

        let response = dispatcher
            .dispatch(&registry, StopRegistrationRequest {}.into())
            .await
            .unwrap();
        assert_eq!(
            response,
            Some(StopRegistrationResponse::failed("handler panicked").into())
        );
    }

    #[tokio::test]
    async fn test_unregister() {
        let dispatcher = HandlerDispatcher::new();
        dispatcher.register_fn("StopRegistrationRequest", |_| async { Ok(None) });
        assert!(dispatcher.contains("StopRegistrationRequest"));
        assert!(dispatcher.unregister("StopRegistrationRequest"));
        assert!(dispatcher.is_empty());
    }
}
