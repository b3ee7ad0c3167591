//! Service handle: one registry, one dispatcher and one config shared by every
//! connection it creates.

use std::future::Future;
use std::sync::Arc;
use tokio::net::ToSocketAddrs;

use crate::ipc::connection::Connection;
use crate::ipc::dispatcher::{Handler, HandlerDispatcher};
use crate::ipc::registry::{MessageRegistry, PayloadSchema};
use crate::ipc::server::CommServer;
use crate::messages::{Payload, Request};
use crate::types::{CommConfig, Result};

#[derive(Debug)]
pub(crate) struct ServiceShared {
    pub(crate) registry: MessageRegistry,
    pub(crate) dispatcher: HandlerDispatcher,
    pub(crate) config: CommConfig,
}

/// Entry point for both roles.
///
/// ```no_run
/// use catheter_comm::{CommService, CommConfig};
/// use catheter_comm::messages::{LoadPlanningDataRequest, LoadPlanningDataResponse, Outcome};
///
/// # async fn run() -> catheter_comm::Result<()> {
/// let service = CommService::new(CommConfig::default());
/// service.on(|_: LoadPlanningDataRequest| async { Ok(LoadPlanningDataResponse::ok()) });
/// let server = service.bind("127.0.0.1:8000").await?;
/// server.serve().await
/// # }
/// ```
///
/// Clones share the same state. Independent services in one process do not.
#[derive(Debug, Clone)]
pub struct CommService {
    shared: Arc<ServiceShared>,
}

impl CommService {
    /// Service with the full message catalogue registered.
    pub fn new(config: CommConfig) -> Self {
        Self::with_registry(config, MessageRegistry::with_catalogue())
    }

    pub fn with_registry(config: CommConfig, registry: MessageRegistry) -> Self {
        Self {
            shared: Arc::new(ServiceShared {
                registry,
                dispatcher: HandlerDispatcher::new(),
                config,
            }),
        }
    }

    pub fn config(&self) -> &CommConfig {
        &self.shared.config
    }

    pub fn registry(&self) -> &MessageRegistry {
        &self.shared.registry
    }

    pub fn dispatcher(&self) -> &HandlerDispatcher {
        &self.shared.dispatcher
    }

    /// Add a message type at runtime.
    pub fn register_message_type(&self, type_tag: impl Into<String>, schema: PayloadSchema) {
        self.shared.registry.register(type_tag, schema);
    }

    /// See [`HandlerDispatcher::register_handler`]. Alias tags are registered
    /// under their canonical spelling.
    pub fn register_handler(&self, type_tag: impl Into<String>, handler: impl Handler) -> bool {
        let type_tag = self.shared.registry.canonical_tag(&type_tag.into());
        self.shared.dispatcher.register_handler(type_tag, handler)
    }

    pub fn register_fn<F, Fut>(&self, type_tag: impl Into<String>, f: F) -> bool
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Payload>>> + Send + 'static,
    {
        let type_tag = self.shared.registry.canonical_tag(&type_tag.into());
        self.shared.dispatcher.register_fn(type_tag, f)
    }

    /// Typed handler for a catalogue request. Last registration wins.
    pub fn on<R, F, Fut>(&self, f: F) -> bool
    where
        R: Request,
        F: Fn(R) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R::Response>> + Send + 'static,
    {
        self.shared.dispatcher.on(f)
    }

    /// Open a client connection. Fails with `Error::Config` when the service
    /// config does not validate.
    pub async fn connect(&self, addr: impl ToSocketAddrs) -> Result<Connection> {
        Connection::connect(addr, self.shared.clone()).await
    }

    /// Bind a listener. Call [`CommServer::serve`] to start accepting.
    ///
    /// Fails with `Error::Config` when the service config does not validate.
    pub async fn bind(&self, addr: impl ToSocketAddrs) -> Result<CommServer> {
        CommServer::bind(addr, self.shared.clone()).await
    }
}

impl Default for CommService {
    fn default() -> Self {
        Self::new(CommConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{
        InitContinuousRegistrationResponse, Outcome, StopRegistrationRequest,
        StopRegistrationResponse, LEGACY_INIT_REQUEST_TAG,
    };

    #[test]
    fn test_clones_share_handlers() {
        let service = CommService::default();
        let clone = service.clone();
        clone.on(|_: StopRegistrationRequest| async { Ok(StopRegistrationResponse::ok()) });
        assert!(service.dispatcher().contains("StopRegistrationRequest"));
    }

    #[test]
    fn test_handler_under_alias_tag_is_registered_canonically() {
        let service = CommService::default();
        service.register_fn(LEGACY_INIT_REQUEST_TAG, |_| async {
            Ok(Some(Payload::from(InitContinuousRegistrationResponse::ok())))
        });
        assert!(service
            .dispatcher()
            .contains("InitContinuousRegistrationRequest"));
        assert!(!service.dispatcher().contains(LEGACY_INIT_REQUEST_TAG));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_before_opening_sockets() {
        let service = CommService::new(CommConfig {
            max_connections: 0,
            ..CommConfig::default()
        });
        let err = service.bind("127.0.0.1:0").await.unwrap_err();
        assert!(matches!(err, crate::Error::Config(msg) if msg.contains("max_connections")));

        let service = CommService::new(CommConfig {
            max_frame_bytes: 0,
            ..CommConfig::default()
        });
        let err = service.connect("127.0.0.1:9").await.unwrap_err();
        assert!(matches!(err, crate::Error::Config(msg) if msg.contains("max_frame_bytes")));
    }

    #[test]
    fn test_independent_services_do_not_share_state() {
        let a = CommService::default();
        let b = CommService::default();
        a.register_message_type("CalibrateRequest", PayloadSchema::opaque());
        assert!(a.registry().contains("CalibrateRequest"));
        assert!(!b.registry().contains("CalibrateRequest"));
    }
}
