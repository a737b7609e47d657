//! # Service Runtime
//!
//! Owns the process lifecycle of a service: opens the [`SecretStore`],
//! builds the access-key-gated HTTPS listener from the loaded TLS material and
//! funnels every unrecoverable condition through [`ServiceRuntime::fatal`].
//!
//! ```text
//! start() ─► create_listener() ─► SecretStore::open()
//!                                 TLS key / certificate / access key
//!                                 router + pipeline
//!         ─► listen()           ─► bind + serve      (Idle → Started)
//! fatal() ─► graceful close      ─► Stopped ─► exit(1) when asked
//! ```
//!
//! The [`Scheduler`] is owned alongside but runs independently of the
//! listener.

pub mod shutdown;
pub mod signals;

pub use shutdown::{ProcessExit, ShutdownHook};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use axum::Router;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::{self, ApiState};
use crate::config::{Config, ServiceOptions};
use crate::errors::{Error, Result};
use crate::scheduler::Scheduler;
use crate::secrets::{SecretServiceConnector, SecretStore, SecretString};

/// Upper bound on waiting for in-flight connections during a fatal close.
const GRACEFUL_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle of the runtime; `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Idle,
    Started,
    Stopped,
}

/// Router and TLS material ready to be bound.
struct PreparedListener {
    acceptor: TlsAcceptor,
    router: Router,
}

struct RunningListener {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<Result<()>>,
}

#[derive(Default)]
struct Inner {
    access_key: Option<SecretString>,
    prepared: Option<PreparedListener>,
    listener: Option<RunningListener>,
}

pub struct ServiceRuntime {
    config: Config,
    secrets: Arc<SecretStore>,
    scheduler: Arc<Scheduler>,
    shutdown_hook: Arc<dyn ShutdownHook>,
    routes: StdMutex<Option<Router>>,
    inner: Mutex<Inner>,
    state: watch::Sender<ServiceState>,
    exiting: AtomicBool,
}

impl ServiceRuntime {
    /// Runtime whose secret store talks to `connector`.
    pub fn new(config: Config, connector: Arc<dyn SecretServiceConnector>) -> Self {
        let settings = config.secrets.store_settings(&config.service.namespace, config.environment);
        let secrets = Arc::new(SecretStore::new(connector, settings));
        let scheduler = Arc::new(Scheduler::new(config.scheduler));
        Self::from_parts(config, secrets, scheduler)
    }

    /// Runtime over an existing store and scheduler.
    pub fn from_parts(
        config: Config,
        secrets: Arc<SecretStore>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        let (state, _) = watch::channel(ServiceState::Idle);
        Self {
            config,
            secrets,
            scheduler,
            shutdown_hook: Arc::new(ProcessExit),
            routes: StdMutex::new(None),
            inner: Mutex::new(Inner::default()),
            state,
            exiting: AtomicBool::new(false),
        }
    }

    pub fn with_shutdown_hook(mut self, hook: Arc<dyn ShutdownHook>) -> Self {
        self.shutdown_hook = hook;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn service(&self) -> &ServiceOptions {
        &self.config.service
    }

    pub fn secrets(&self) -> &Arc<SecretStore> {
        &self.secrets
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn state(&self) -> ServiceState {
        *self.state.borrow()
    }

    pub fn is_started(&self) -> bool {
        self.state() == ServiceState::Started
    }

    /// Register service routes. They sit behind the access gate and must be
    /// added before [`create_listener`](Self::create_listener).
    pub fn add_routes(&self, routes: Router) {
        let mut current = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        *current = Some(match current.take() {
            Some(existing) => existing.merge(routes),
            None => routes,
        });
    }

    /// Address the listener is bound to, once started.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.lock().await.listener.as_ref().map(|listener| listener.local_addr)
    }

    /// Access key loaded by [`create_listener`](Self::create_listener).
    pub async fn access_key(&self) -> Option<SecretString> {
        self.inner.lock().await.access_key.clone()
    }

    /// Log `err`, run the fatal path and hand the error back.
    async fn fail(&self, err: Error) -> Error {
        error!(error = %err, "Unrecoverable startup failure");
        self.fatal(true).await;
        err
    }

    fn required_secret(&self, name: &str) -> Result<SecretString> {
        self.secrets.get(name).map_err(|e| {
            Error::fatal(format!("Required secret '{}' is unavailable: {}", name, e))
        })
    }

    /// Open the secret store and prepare the gated HTTPS router.
    ///
    /// Every failure here is fatal: a sealed or unreachable secret service,
    /// missing TLS material or access key, or unusable PEM. Does nothing once
    /// the runtime has started.
    pub async fn create_listener(&self) -> Result<()> {
        match self.state() {
            ServiceState::Started => {
                debug!("Service already started, listener not rebuilt");
                return Ok(());
            }
            ServiceState::Stopped => return Err(Error::fatal("Service runtime has stopped")),
            ServiceState::Idle => {}
        }

        if let Err(e) = self.secrets.open().await {
            return Err(self.fail(e.into()).await);
        }

        let names = self.config.tls_secret_names();
        let material = self.required_secret(names.key).and_then(|key| {
            let certificate = self.required_secret(names.certificate)?;
            let access_key = self.required_secret(names.access_key)?;
            Ok((key, certificate, access_key))
        });
        let (key, certificate, access_key) = match material {
            Ok(material) => material,
            Err(e) => return Err(self.fail(e).await),
        };

        let acceptor =
            match api::tls_acceptor_from_pem(&certificate, names.certificate, &key, names.key) {
                Ok(acceptor) => acceptor,
                Err(e) => return Err(self.fail(e.into()).await),
            };

        let state =
            ApiState::new(access_key.clone(), &self.config.service.namespace, &self.config.api);
        let service_routes = self.routes.lock().unwrap_or_else(|e| e.into_inner()).take();
        let router = api::build_router(state, service_routes);

        let mut inner = self.inner.lock().await;
        inner.access_key = Some(access_key);
        inner.prepared = Some(PreparedListener { acceptor, router });
        debug!("HTTPS listener prepared");
        Ok(())
    }

    /// Bind and start serving. A second call while started is a no-op; bind
    /// failure is fatal.
    pub async fn listen(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match self.state() {
            ServiceState::Started => {
                info!("Service already started");
                return Ok(());
            }
            ServiceState::Stopped => return Err(Error::fatal("Service runtime has stopped")),
            ServiceState::Idle => {}
        }

        let prepared = inner
            .prepared
            .take()
            .ok_or_else(|| Error::internal("listen() called before create_listener()"))?;

        let address = self.config.api.socket_address();
        let tcp = match api::bind(&address).await {
            Ok(tcp) => tcp,
            Err(e) => {
                drop(inner);
                return Err(self.fail(e).await);
            }
        };
        let local_addr = match tcp.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                drop(inner);
                return Err(self.fail(e.into()).await);
            }
        };

        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let task = tokio::spawn(api::serve_tls(tcp, prepared.acceptor, prepared.router, async move {
            shutdown.cancelled().await
        }));

        inner.listener = Some(RunningListener { local_addr, cancel, task });
        self.state.send_replace(ServiceState::Started);

        info!(
            service = %self.config.service.name,
            version = %self.config.service.version,
            address = %local_addr,
            "Service listening"
        );
        Ok(())
    }

    /// `create_listener` followed by `listen`.
    pub async fn start(&self) -> Result<()> {
        self.create_listener().await?;
        self.listen().await
    }

    /// Close the listener without exiting the process.
    pub async fn stop(&self) {
        self.fatal(false).await
    }

    /// Single choke point for unrecoverable conditions.
    ///
    /// Closes the listener if it is running (failures are logged), marks the
    /// runtime stopped and, when `should_exit` is set, ends the process with
    /// status 1. The exit hook runs at most once per runtime.
    pub async fn fatal(&self, should_exit: bool) {
        let listener = {
            let mut inner = self.inner.lock().await;
            inner.prepared = None;
            inner.listener.take()
        };
        self.state.send_replace(ServiceState::Stopped);

        if let Some(listener) = listener {
            listener.cancel.cancel();
            let mut task = listener.task;
            match tokio::time::timeout(GRACEFUL_CLOSE_TIMEOUT, &mut task).await {
                Ok(Ok(Ok(()))) => debug!("Listener closed"),
                Ok(Ok(Err(e))) => warn!(error = %e, "Listener closed with error"),
                Ok(Err(e)) => warn!(error = %e, "Listener task failed"),
                Err(_) => {
                    warn!("Listener did not close in time, aborting");
                    task.abort();
                }
            }
        }

        if should_exit && !self.exiting.swap(true, Ordering::SeqCst) {
            error!("Stopping service due to fatal error");
            self.shutdown_hook.exit(1);
        }
    }

    /// Resolves once the runtime reaches [`ServiceState::Stopped`].
    pub async fn wait_for_shutdown(&self) {
        let mut state = self.state.subscribe();
        let _ = state.wait_for(|state| *state == ServiceState::Stopped).await;
    }
}
