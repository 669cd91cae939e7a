use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::RouteError;
use crate::event::{self, RouterEvent, StreamEvent, StreamEventKind};
use crate::media::{ApplicationInfo, MediaStream, VHostAppName};
use crate::result::Result;

use super::application::RouterApplication;
use super::pull::PullCoordinator;
use super::tap::{MirrorPosition, StreamTap};
use super::{ConnectorId, ConnectorType, ObserverId, Orchestrator, RouteConnector, RouteObserver};

/// Process-wide registry of router applications, keyed by
/// (virtual host, application). Created once at startup and shut down with
/// `close`.
pub struct RouterCore {
    config: Config,
    applications: RwLock<HashMap<VHostAppName, Arc<RouterApplication>>>,
    pulls: PullCoordinator,
    orchestrator: RwLock<Option<Arc<dyn Orchestrator>>>,
    event_sender: broadcast::Sender<RouterEvent>,
    next_app_id: AtomicU32,
}

impl RouterCore {
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new(Self {
            config,
            applications: RwLock::new(HashMap::new()),
            pulls: PullCoordinator::new(),
            orchestrator: RwLock::new(None),
            event_sender: event::channel(16),
            next_app_id: AtomicU32::new(1),
        })
    }

    pub async fn set_orchestrator(&self, orchestrator: Arc<dyn Orchestrator>) {
        let mut slot = self.orchestrator.write().await;
        *slot = Some(orchestrator);
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<RouterEvent> {
        self.event_sender.subscribe()
    }

    pub(crate) fn emit_stream_event(&self, kind: StreamEventKind, app: &VHostAppName, stream: &str) {
        let _ = self.event_sender.send(RouterEvent::Stream(StreamEvent {
            kind,
            app: app.clone(),
            stream: stream.to_string(),
        }));
    }

    /// Create the application registry for `name`. Creating an existing
    /// application returns the running instance.
    pub async fn create_application(self: &Arc<Self>, name: VHostAppName) -> Arc<RouterApplication> {
        let mut applications = self.applications.write().await;
        if let Some(existing) = applications.get(&name) {
            return existing.clone();
        }
        let id = self.next_app_id.fetch_add(1, Ordering::Relaxed);
        let application = RouterApplication::new(
            ApplicationInfo::new(id, name.clone()),
            self.config.router.clone(),
            Arc::downgrade(self),
        );
        applications.insert(name.clone(), application.clone());
        info!("[{}] application created", name);
        application
    }

    pub async fn delete_application(&self, name: &VHostAppName) -> Result<()> {
        let application = self
            .applications
            .write()
            .await
            .remove(name)
            .ok_or_else(|| RouteError::no_such_application(name))?;
        application.close().await;
        info!("[{}] application deleted", name);
        Ok(())
    }

    pub async fn application(&self, name: &VHostAppName) -> Result<Arc<RouterApplication>> {
        self.applications
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| RouteError::no_such_application(name))
    }

    pub async fn register_connector(
        &self,
        name: &VHostAppName,
        connector: Arc<dyn RouteConnector>,
    ) -> Result<ConnectorId> {
        Ok(self.application(name).await?.register_connector(connector).await)
    }

    pub async fn unregister_connector(&self, name: &VHostAppName, id: ConnectorId) -> Result<()> {
        self.application(name).await?.unregister_connector(id).await;
        Ok(())
    }

    pub async fn register_observer(
        &self,
        name: &VHostAppName,
        observer: Arc<dyn RouteObserver>,
    ) -> Result<ObserverId> {
        Ok(self.application(name).await?.register_observer(observer).await)
    }

    pub async fn unregister_observer(&self, name: &VHostAppName, id: ObserverId) -> Result<()> {
        self.application(name).await?.unregister_observer(id).await;
        Ok(())
    }

    /// Materialize a stream that is not present locally by asking a provider
    /// able to pull `url`'s scheme, then wait for it to come up. Concurrent
    /// requests for the same stream share one provider call.
    pub async fn request_pull_stream(
        &self,
        url: &str,
        name: &VHostAppName,
        stream_name: &str,
    ) -> Result<Arc<MediaStream>> {
        let name = match self.orchestrator.read().await.clone() {
            Some(orchestrator) => orchestrator.resolve_application_name(&name.vhost, &name.app),
            None => name.clone(),
        };
        let application = self.application(&name).await?;
        if let Some(router_stream) = application.inbound_stream(stream_name).await {
            return Ok(router_stream.current().await);
        }

        let scheme = url
            .split_once("://")
            .map(|(scheme, _)| scheme)
            .filter(|scheme| !scheme.is_empty())
            .ok_or_else(|| RouteError::pull_unsupported_scheme(url))?;

        let key = (name.clone(), stream_name.to_string());
        let (leader, mut receiver) = self.pulls.begin(key.clone()).await;
        if leader {
            let Some(provider) = application.pull_provider(scheme).await else {
                self.pulls.cancel(&key).await;
                return Err(RouteError::pull_unsupported_scheme(scheme));
            };
            info!(
                "[{}] [{}] pulling from {}",
                name, stream_name, url
            );
            let pull_url = url.to_string();
            let pull_name = name.clone();
            let pull_stream_name = stream_name.to_string();
            tokio::spawn(async move {
                if !provider
                    .pull_stream(&pull_url, &pull_name, &pull_stream_name)
                    .await
                {
                    warn!("[{}] [{}] provider pull failed", pull_name, pull_stream_name);
                }
            });
        } else {
            crate::metrics::PULL_COALESCED.inc();
            debug!("[{}] [{}] joining in-flight pull", name, stream_name);
        }

        let deadline = Duration::from_millis(self.config.router.pull_timeout_ms);
        let outcome = timeout(deadline, async {
            loop {
                let ready = receiver.borrow_and_update().clone();
                if let Some(stream) = ready {
                    return Some(stream);
                }
                if receiver.changed().await.is_err() {
                    return None;
                }
            }
        })
        .await;

        match outcome {
            Ok(Some(stream)) => Ok(stream),
            Ok(None) | Err(_) => {
                if leader {
                    self.pulls.cancel(&key).await;
                }
                Err(RouteError::pull_timeout(format!(
                    "{}/{}",
                    name, stream_name
                )))
            }
        }
    }

    /// Called by applications when a provider stream becomes Prepared, to
    /// resolve any pull waiting on it.
    pub(crate) async fn complete_pull(&self, name: &VHostAppName, stream: &Arc<MediaStream>) {
        let key = (name.clone(), stream.name().to_string());
        self.pulls.complete(&key, stream.clone()).await;
    }

    /// Attach `tap` as a mirror of (application, stream) at `position`.
    pub async fn mirror_stream(
        &self,
        tap: &Arc<StreamTap>,
        name: &VHostAppName,
        stream_name: &str,
        position: MirrorPosition,
    ) -> Result<()> {
        let application = self.application(name).await?;
        if tap.is_attached().await {
            return Err(RouteError::already_attached(stream_name));
        }

        let router_stream = match position {
            MirrorPosition::Inbound => {
                application
                    .find_stream(
                        stream_name,
                        &[ConnectorType::Provider, ConnectorType::Relay],
                    )
                    .await
            }
            MirrorPosition::Outbound => {
                match application
                    .find_stream(stream_name, &[ConnectorType::Transcoder])
                    .await
                {
                    Some(router_stream) => Some(router_stream),
                    None if application.publisher_bypass_active().await => {
                        application
                            .find_stream(
                                stream_name,
                                &[ConnectorType::Provider, ConnectorType::Relay],
                            )
                            .await
                    }
                    None => None,
                }
            }
        };

        let Some(router_stream) = router_stream else {
            if application.has_stream_named(stream_name).await {
                return Err(RouteError::invalid_position(format!(
                    "{} has no {:?} stage",
                    stream_name, position
                )));
            }
            return Err(RouteError::no_such_stream(stream_name));
        };

        router_stream.add_tap(tap.clone()).await;
        tap.attach(name.clone(), router_stream.current().await.id())
            .await;
        info!(
            "[{}] [{}] tap attached at {:?}",
            name, stream_name, position
        );
        Ok(())
    }

    /// Detach `tap` and discard whatever it still buffers.
    pub async fn unmirror_stream(&self, tap: &Arc<StreamTap>) -> Result<()> {
        let Some(anchor) = tap.take_anchor().await else {
            return Err(RouteError::no_such_stream("tap is not attached"));
        };
        if let Ok(application) = self.application(&anchor.app).await {
            if let Some(router_stream) = application.stream_by_id(anchor.stream_id).await {
                router_stream.remove_tap(tap).await;
            }
        }
        tap.detach().await;
        Ok(())
    }

    /// Snapshot every live stream, across applications. `names` filters by
    /// stream name; an empty filter returns everything.
    pub async fn info(&self, names: Vec<String>) -> Vec<super::message::StreamInfo> {
        let mut names = names;
        names.retain(|name| !name.trim().is_empty());
        let applications: Vec<Arc<RouterApplication>> =
            self.applications.read().await.values().cloned().collect();
        let mut infos = Vec::new();
        for application in applications {
            for info in application.info().await {
                if names.is_empty() || names.contains(&info.name) {
                    infos.push(info);
                }
            }
        }
        infos
    }

    /// Cancel pending pulls, stop every stream worker and drop all
    /// applications.
    pub async fn close(&self) {
        self.pulls.cancel_all().await;
        let applications: Vec<Arc<RouterApplication>> = {
            let mut map = self.applications.write().await;
            map.drain().map(|(_, application)| application).collect()
        };
        for application in applications {
            application.close().await;
        }
        info!("router core closed");
    }
}
