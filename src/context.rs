//! Process-scoped bridge state.
//!
//! A [`PlatformContext`] bundles everything the bridge keeps alive for the
//! process: the handle table, the resource gateway and, on hosted platforms,
//! the thread attacher with its pinned host references. It is created once
//! with one of the `init_*` constructors and torn down once with
//! [`PlatformContext::teardown`].
//!
//! Code that cannot receive the context explicitly (the C ABI in
//! [`crate::ffi`]) reaches it through [`install`] and [`current`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::info;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::attach::{HostObject, HostRuntime, ThreadAttacher};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::handles::HandleTable;
use crate::platform::{
    FilesystemBackend, HostedBackend, PlatformBackend, PlatformServices, ResourceGateway,
    Transport,
};

pub struct PlatformContext {
    config: BridgeConfig,
    handles: Arc<HandleTable>,
    gateway: Arc<ResourceGateway>,
    attacher: Option<Arc<ThreadAttacher>>,
    torn_down: AtomicBool,
}

impl PlatformContext {
    /// Direct filesystem backend with the HTTP transport.
    pub fn init_filesystem(config: BridgeConfig) -> Result<Self> {
        let backend = FilesystemBackend::new(&config)?;
        Ok(Self::assemble(config, Arc::new(backend), None))
    }

    pub fn init_filesystem_with_transport(
        config: BridgeConfig,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let backend = FilesystemBackend::with_transport(&config, transport);
        Self::assemble(config, Arc::new(backend), None)
    }

    /// Backend delegating to the host's platform services object.
    pub fn init_hosted(
        config: BridgeConfig,
        runtime: Arc<dyn HostRuntime>,
        services_object: HostObject,
        services: Arc<dyn PlatformServices>,
    ) -> Result<Self> {
        let attacher = Arc::new(ThreadAttacher::new(runtime));
        let backend = HostedBackend::new(Arc::clone(&attacher), services_object, services)?;
        Ok(Self::assemble(config, Arc::new(backend), Some(attacher)))
    }

    fn assemble(
        config: BridgeConfig,
        backend: Arc<dyn PlatformBackend>,
        attacher: Option<Arc<ThreadAttacher>>,
    ) -> Self {
        let handles = Arc::new(HandleTable::new());
        let gateway = Arc::new(ResourceGateway::new(
            backend,
            Arc::clone(&handles),
            config.network_timeout(),
        ));
        info!("platform bridge initialised ({} backend)", gateway.backend_name());
        Self {
            config,
            handles,
            gateway,
            attacher,
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn handles(&self) -> &Arc<HandleTable> {
        &self.handles
    }

    pub fn gateway(&self) -> &Arc<ResourceGateway> {
        &self.gateway
    }

    pub fn attacher(&self) -> Option<&Arc<ThreadAttacher>> {
        self.attacher.as_ref()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Unbinds live video sinks through the platform, then releases every
    /// handle and all host state.
    ///
    /// # Panics
    ///
    /// Panics when called twice.
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            panic!("platform context torn down twice");
        }
        let sinks = self.gateway.destroy_video_sinks();
        let released = self.handles.drain();
        if let Some(attacher) = &self.attacher {
            attacher.release_process_state();
        }
        info!("platform bridge torn down ({released} handle(s), {sinks} video sink(s))");
    }
}

impl fmt::Debug for PlatformContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformContext")
            .field("backend", &self.gateway.backend_name())
            .field("handles", &self.handles.len())
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}

static PROCESS: Lazy<RwLock<Option<Arc<PlatformContext>>>> = Lazy::new(|| RwLock::new(None));

/// Makes `context` the process-wide context. Fails if one is installed.
pub fn install(context: PlatformContext) -> Result<Arc<PlatformContext>> {
    let mut slot = PROCESS.write();
    if slot.is_some() {
        return Err(BridgeError::Config(
            "a platform context is already installed".into(),
        ));
    }
    let context = Arc::new(context);
    *slot = Some(Arc::clone(&context));
    Ok(context)
}

/// The installed process-wide context, if any.
pub fn current() -> Option<Arc<PlatformContext>> {
    PROCESS.read().clone()
}

/// Uninstalls and tears down the process-wide context. Returns false when
/// nothing was installed.
pub fn shutdown() -> bool {
    let context = PROCESS.write().take();
    match context {
        Some(context) => {
            context.teardown();
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocking::Outcome;
    use crate::platform::TransportCallback;
    use std::time::Duration;

    struct NeverTransport;

    impl Transport for NeverTransport {
        fn fetch(&self, _url: &str, _timeout: Duration, callback: TransportCallback) {
            callback(Ok(Outcome::Cancelled));
        }
    }

    fn context() -> PlatformContext {
        PlatformContext::init_filesystem_with_transport(
            BridgeConfig::default(),
            Arc::new(NeverTransport),
        )
    }

    #[test]
    fn teardown_drains_handles() {
        let context = context();
        let handle = context.handles().create(Arc::new(1u64));
        context.teardown();
        assert!(context.is_torn_down());
        assert!(!context.handles().contains(handle));
    }

    #[test]
    #[should_panic(expected = "torn down twice")]
    fn second_teardown_is_fatal() {
        let context = context();
        context.teardown();
        context.teardown();
    }

    #[test]
    fn gateway_uses_configured_timeout() {
        let config = BridgeConfig {
            network_timeout_secs: 5,
            ..BridgeConfig::default()
        };
        let context =
            PlatformContext::init_filesystem_with_transport(config, Arc::new(NeverTransport));
        assert_eq!(context.gateway().network_timeout(), Duration::from_secs(5));
        assert_eq!(context.gateway().backend_name(), "filesystem");
        assert!(context.attacher().is_none());
    }
}
