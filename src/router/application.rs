use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::RwLock;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::config::RouterConfig;
use crate::error::RouteError;
use crate::event::StreamEventKind;
use crate::media::{ApplicationInfo, MediaPacket, MediaStream, MediaTrack, StreamDescriptor};
use crate::metrics;
use crate::result::Result;

use super::core::RouterCore;
use super::message::StreamInfo;
use super::stream::{RouterStream, StreamState};
use super::{
    same_instance, ConnectorId, ConnectorType, ObserverId, ObserverType, RouteConnector,
    RouteObserver,
};

struct ConnectorRegistration {
    id: ConnectorId,
    kind: ConnectorType,
    connector: Arc<dyn RouteConnector>,
}

struct ObserverRegistration {
    id: ObserverId,
    kind: ObserverType,
    observer: Arc<dyn RouteObserver>,
}

/// Registry of one application's connectors, observers and live streams.
/// Owns every `RouterStream` minted for the application.
pub struct RouterApplication {
    info: ApplicationInfo,
    config: RouterConfig,
    core: Weak<RouterCore>,
    connectors: RwLock<Vec<ConnectorRegistration>>,
    observers: RwLock<Vec<ObserverRegistration>>,
    streams: RwLock<HashMap<u32, Arc<RouterStream>>>,
    next_stream_id: AtomicU32,
    next_registration_id: AtomicU64,
}

impl std::fmt::Debug for RouterApplication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterApplication")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

impl RouterApplication {
    pub(crate) fn new(info: ApplicationInfo, config: RouterConfig, core: Weak<RouterCore>) -> Arc<Self> {
        Arc::new(Self {
            info,
            config,
            core,
            connectors: RwLock::new(Vec::new()),
            observers: RwLock::new(Vec::new()),
            streams: RwLock::new(HashMap::new()),
            next_stream_id: AtomicU32::new(1),
            next_registration_id: AtomicU64::new(1),
        })
    }

    pub fn application_info(&self) -> &ApplicationInfo {
        &self.info
    }

    /// Register a connector. Re-registering the same instance returns the
    /// existing id.
    pub async fn register_connector(&self, connector: Arc<dyn RouteConnector>) -> ConnectorId {
        let mut connectors = self.connectors.write().await;
        if let Some(existing) = connectors
            .iter()
            .find(|reg| same_instance(&reg.connector, &connector))
        {
            return existing.id;
        }
        let id = self.next_registration_id.fetch_add(1, Ordering::Relaxed);
        let kind = connector.connector_type();
        connectors.push(ConnectorRegistration {
            id,
            kind,
            connector,
        });
        info!("[{}] connector {} registered as {:?}", self.info.name, id, kind);
        id
    }

    pub async fn unregister_connector(&self, id: ConnectorId) {
        self.connectors.write().await.retain(|reg| reg.id != id);
    }

    /// Register an observer. Streams already running fan a synthesized
    /// `on_stream_created` out to it; its video then starts at the next
    /// keyframe. The registry lock is held across the synthesis so no frame
    /// can race ahead of the synthesized create.
    pub async fn register_observer(&self, observer: Arc<dyn RouteObserver>) -> ObserverId {
        let kind = observer.observer_type();
        let mut observers = self.observers.write().await;
        if let Some(existing) = observers
            .iter()
            .find(|reg| same_instance(&reg.observer, &observer))
        {
            return existing.id;
        }
        let id = self.next_registration_id.fetch_add(1, Ordering::Relaxed);
        observers.push(ObserverRegistration {
            id,
            kind,
            observer: observer.clone(),
        });
        info!("[{}] observer {} registered as {:?}", self.info.name, id, kind);

        let has_transcoder = observers
            .iter()
            .any(|reg| reg.kind == ObserverType::Transcoder);
        let bypass = self.config.publisher_bypass_transcoder && !has_transcoder;
        let streams: Vec<Arc<RouterStream>> = self.streams.read().await.values().cloned().collect();
        for router_stream in streams {
            if router_stream.state() < StreamState::Prepared {
                continue;
            }
            if !Self::matrix(router_stream.origin(), kind, bypass) {
                continue;
            }
            let stream = router_stream.current().await;
            observer.on_stream_created(stream.clone()).await;
            observer.on_stream_prepared(stream).await;
        }
        id
    }

    pub async fn unregister_observer(&self, id: ObserverId) {
        self.observers.write().await.retain(|reg| reg.id != id);
    }

    /// Used by providers to avoid ingesting the same stream twice.
    pub async fn is_existing_inbound_stream(&self, stream_name: &str) -> bool {
        self.inbound_stream(stream_name).await.is_some()
    }

    pub async fn inbound_stream(&self, stream_name: &str) -> Option<Arc<RouterStream>> {
        self.find_stream(
            stream_name,
            &[ConnectorType::Provider, ConnectorType::Relay],
        )
        .await
    }

    pub async fn find_stream(
        &self,
        stream_name: &str,
        origins: &[ConnectorType],
    ) -> Option<Arc<RouterStream>> {
        let streams = self.streams.read().await;
        for router_stream in streams.values() {
            if !origins.contains(&router_stream.origin()) {
                continue;
            }
            if router_stream.current().await.name() == stream_name {
                return Some(router_stream.clone());
            }
        }
        None
    }

    pub async fn stream_by_id(&self, id: u32) -> Option<Arc<RouterStream>> {
        self.streams.read().await.get(&id).cloned()
    }

    pub async fn has_stream_named(&self, stream_name: &str) -> bool {
        let streams = self.streams.read().await;
        for router_stream in streams.values() {
            if router_stream.current().await.name() == stream_name {
                return true;
            }
        }
        false
    }

    /// A connector announces a new stream. The stream is delivered to every
    /// role-compatible observer and becomes Prepared only when all of them
    /// accept.
    pub async fn on_stream_created(
        self: &Arc<Self>,
        connector_id: ConnectorId,
        descriptor: StreamDescriptor,
    ) -> Result<Arc<MediaStream>> {
        let kind = self
            .connector_kind(connector_id)
            .await
            .ok_or_else(|| RouteError::unauthorized_connector(connector_id))?;

        {
            let streams = self.streams.read().await;
            for router_stream in streams.values() {
                if router_stream.origin() == kind
                    && router_stream.current().await.name() == descriptor.name
                {
                    return Err(RouteError::duplicate_connector(format!(
                        "stream {} already owned within {}",
                        descriptor.name, self.info.name
                    )));
                }
            }
        }

        let stream_id = self.next_stream_id.fetch_add(1, Ordering::Relaxed);
        let stream = Arc::new(MediaStream::new(
            stream_id,
            self.info.name.clone(),
            descriptor,
        ));
        let router_stream = RouterStream::new(
            Arc::downgrade(self),
            stream.clone(),
            connector_id,
            kind,
            self.config.queue_capacity(),
            Duration::from_millis(self.config.producer_block_ms),
        );
        self.streams
            .write()
            .await
            .insert(stream_id, router_stream.clone());
        info!(
            "[{}] [{}] stream created by connector {} ({:?})",
            self.info.name,
            stream.name(),
            connector_id,
            kind
        );

        let observers = self.observers_for(kind).await;
        for (observer_id, observer) in &observers {
            if !observer.on_stream_created(stream.clone()).await {
                warn!(
                    "[{}] [{}] observer {} refused stream, aborting create",
                    self.info.name,
                    stream.name(),
                    observer_id
                );
                self.streams.write().await.remove(&stream_id);
                router_stream.stop().await;
                return Err(RouteError::stream_rejected(stream.name()));
            }
        }
        for (_, observer) in &observers {
            observer.on_stream_prepared(stream.clone()).await;
        }
        router_stream.set_state(StreamState::Prepared);
        metrics::STREAM.inc();

        if let Some(core) = self.core.upgrade() {
            core.emit_stream_event(StreamEventKind::Up, &self.info.name, stream.name());
            if matches!(kind, ConnectorType::Provider | ConnectorType::Relay) {
                core.complete_pull(&self.info.name, &stream).await;
            }
        }
        Ok(stream)
    }

    /// A connector signals that the track set or a decoder configuration
    /// changed mid-stream. Observers hear about it before any packet
    /// enqueued afterwards.
    pub async fn on_stream_updated(
        &self,
        connector_id: ConnectorId,
        stream_id: u32,
        tracks: Vec<MediaTrack>,
    ) -> Result<Arc<MediaStream>> {
        let router_stream = self
            .stream_by_id(stream_id)
            .await
            .ok_or_else(|| RouteError::no_such_stream(stream_id))?;
        if router_stream.owner() != connector_id {
            return Err(RouteError::unauthorized_connector(connector_id));
        }
        let updated = Arc::new(router_stream.current().await.with_tracks(tracks));
        router_stream.replace_stream(updated.clone()).await;
        info!(
            "[{}] [{}] stream updated",
            self.info.name,
            updated.name()
        );
        Ok(updated)
    }

    /// Tear a stream down. The worker drains first, so no observer sees a
    /// frame after its `on_stream_deleted`.
    pub async fn on_stream_deleted(&self, connector_id: ConnectorId, stream_id: u32) -> Result<()> {
        let router_stream = {
            let streams = self.streams.read().await;
            let router_stream = streams
                .get(&stream_id)
                .ok_or_else(|| RouteError::no_such_stream(stream_id))?;
            if router_stream.owner() != connector_id {
                return Err(RouteError::unauthorized_connector(connector_id));
            }
            router_stream.clone()
        };
        self.streams.write().await.remove(&stream_id);
        self.finish_stream(&router_stream).await;
        Ok(())
    }

    async fn finish_stream(&self, router_stream: &Arc<RouterStream>) {
        router_stream.stop().await;
        let stream = router_stream.current().await;
        for (observer_id, observer) in self.observers_for(router_stream.origin()).await {
            if !observer.on_stream_deleted(stream.clone()).await {
                debug!(
                    "[{}] [{}] observer {} failed stream delete",
                    self.info.name,
                    stream.name(),
                    observer_id
                );
            }
        }
        router_stream.detach_taps().await;
        metrics::STREAM.dec();
        if let Some(core) = self.core.upgrade() {
            core.emit_stream_event(StreamEventKind::Down, &self.info.name, stream.name());
        }
        info!("[{}] [{}] stream deleted", self.info.name, stream.name());
    }

    /// A packet from the owning connector. Non-fatal failures (unknown
    /// stream, wrong owner, not yet prepared) surface as errors; the stream
    /// keeps running.
    pub async fn on_packet_received(
        &self,
        connector_id: ConnectorId,
        stream_id: u32,
        packet: MediaPacket,
    ) -> Result<()> {
        let router_stream = self
            .stream_by_id(stream_id)
            .await
            .ok_or_else(|| RouteError::no_such_stream(stream_id))?;
        if router_stream.owner() != connector_id {
            return Err(RouteError::unauthorized_connector(connector_id));
        }
        let stream = router_stream.current().await;
        if !stream.is_on_air() {
            stream.set_on_air();
        }
        if router_stream.state() == StreamState::Prepared {
            router_stream.set_state(StreamState::Started);
        }
        router_stream.enqueue(Arc::new(packet)).await
    }

    /// Routing matrix: which observers receive traffic originated by `origin`
    /// connectors.
    pub(crate) async fn observers_for(
        &self,
        origin: ConnectorType,
    ) -> Vec<(ObserverId, Arc<dyn RouteObserver>)> {
        let observers = self.observers.read().await;
        let has_transcoder = observers
            .iter()
            .any(|reg| reg.kind == ObserverType::Transcoder);
        let bypass = self.config.publisher_bypass_transcoder && !has_transcoder;
        observers
            .iter()
            .filter(|reg| Self::matrix(origin, reg.kind, bypass))
            .map(|reg| (reg.id, reg.observer.clone()))
            .collect()
    }

    fn matrix(origin: ConnectorType, kind: ObserverType, bypass: bool) -> bool {
        match origin {
            ConnectorType::Provider | ConnectorType::Relay => match kind {
                ObserverType::Transcoder | ObserverType::Orchestrator => true,
                ObserverType::Publisher | ObserverType::Relay => bypass,
            },
            ConnectorType::Transcoder => matches!(
                kind,
                ObserverType::Publisher | ObserverType::Relay | ObserverType::Orchestrator
            ),
        }
    }

    /// Whether publishers currently attach straight to provider output.
    pub(crate) async fn publisher_bypass_active(&self) -> bool {
        if !self.config.publisher_bypass_transcoder {
            return false;
        }
        let observers = self.observers.read().await;
        !observers
            .iter()
            .any(|reg| reg.kind == ObserverType::Transcoder)
    }

    /// First provider-role connector able to pull `scheme` URLs.
    pub(crate) async fn pull_provider(&self, scheme: &str) -> Option<Arc<dyn RouteConnector>> {
        let connectors = self.connectors.read().await;
        connectors
            .iter()
            .find(|reg| {
                matches!(reg.kind, ConnectorType::Provider | ConnectorType::Relay)
                    && reg.connector.can_pull(scheme)
            })
            .map(|reg| reg.connector.clone())
    }

    /// Snapshot every live stream of this application.
    pub async fn info(&self) -> Vec<StreamInfo> {
        let streams: Vec<Arc<RouterStream>> = self.streams.read().await.values().cloned().collect();
        let mut infos = Vec::with_capacity(streams.len());
        for router_stream in streams {
            infos.push(router_stream.info().await);
        }
        infos.sort_by_key(|info| info.id);
        infos
    }

    async fn connector_kind(&self, id: ConnectorId) -> Option<ConnectorType> {
        let connectors = self.connectors.read().await;
        connectors
            .iter()
            .find(|reg| reg.id == id)
            .map(|reg| reg.kind)
    }

    /// Stop every stream and clear the registries.
    pub(crate) async fn close(&self) {
        let streams: Vec<Arc<RouterStream>> = {
            let mut map = self.streams.write().await;
            map.drain().map(|(_, router_stream)| router_stream).collect()
        };
        for router_stream in streams {
            self.finish_stream(&router_stream).await;
        }
        self.connectors.write().await.clear();
        self.observers.write().await.clear();
        info!("[{}] application closed", self.info.name);
    }
}
