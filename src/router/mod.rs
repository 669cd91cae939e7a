use std::sync::Arc;

use async_trait::async_trait;

use crate::media::{BitstreamFormat, MediaPacket, MediaStream, MediaTrack, VHostAppName};

pub mod application;
pub mod core;
pub mod message;
mod pull;
pub mod stream;
pub mod tap;

pub use application::RouterApplication;
pub use self::core::RouterCore;
pub use message::{StreamInfo, TrackInfo};
pub use stream::{RouterStream, StreamState};
pub use tap::{MirrorPosition, StreamTap};

pub type ConnectorId = u64;
pub type ObserverId = u64;

/// Role of a registered connector; decides which observers receive its
/// streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorType {
    Provider,
    Transcoder,
    Relay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverType {
    Publisher,
    Transcoder,
    Relay,
    Orchestrator,
}

/// Ingest side of the router: a module that injects streams and packets into
/// an application. Lifecycle and packet delivery flow from the connector into
/// `RouterApplication`; the router only calls back for pull-on-demand.
#[async_trait]
pub trait RouteConnector: Send + Sync {
    fn connector_type(&self) -> ConnectorType;

    /// Whether this connector can materialize streams from URLs of `scheme`.
    fn can_pull(&self, scheme: &str) -> bool {
        let _ = scheme;
        false
    }

    /// Ask the connector to ingest `stream_name` from `url`. The stream
    /// arrives later through the regular `on_stream_created` path.
    async fn pull_stream(&self, url: &str, app: &VHostAppName, stream_name: &str) -> bool {
        let _ = (url, app, stream_name);
        false
    }
}

/// Egress side of the router. Calls are made from the owning stream's worker
/// and must return quickly; a slow observer stalls that one stream.
#[async_trait]
pub trait RouteObserver: Send + Sync {
    fn observer_type(&self) -> ObserverType;

    /// Framing this observer needs for a track. `None` keeps the connector's
    /// origin framing.
    fn desired_format(&self, stream: &MediaStream, track: &MediaTrack) -> Option<BitstreamFormat> {
        let _ = (stream, track);
        None
    }

    async fn on_stream_created(&self, stream: Arc<MediaStream>) -> bool;

    /// Fired once every observer has accepted `on_stream_created`.
    async fn on_stream_prepared(&self, stream: Arc<MediaStream>) -> bool {
        let _ = stream;
        true
    }

    async fn on_stream_updated(&self, stream: Arc<MediaStream>) -> bool;

    async fn on_stream_deleted(&self, stream: Arc<MediaStream>) -> bool;

    /// Deliver one packet. The packet is immutable; consume it synchronously
    /// or copy it out.
    async fn on_send_frame(&self, stream: Arc<MediaStream>, packet: Arc<MediaPacket>) -> bool;
}

/// Collaborator that owns naming and stream placement decisions above the
/// router. Implemented elsewhere; the router only consumes this surface.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Resolve aliases for a requested (virtual host, application) pair.
    fn resolve_application_name(&self, vhost: &str, app: &str) -> VHostAppName;

    /// Arrange a provider pull for a stream the router does not hold.
    /// Readiness is signaled by the provider's own `on_stream_created`.
    async fn request_pull_stream(&self, url: &str, app: &VHostAppName, stream_name: &str) -> bool;
}

/// Thin-pointer comparison for registration identity; vtable pointers are not
/// stable enough for `Arc::ptr_eq` on trait objects.
pub(crate) fn same_instance<T: ?Sized, U: ?Sized>(a: &Arc<T>, b: &Arc<U>) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}
