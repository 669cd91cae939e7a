use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::media::{MediaPacket, VHostAppName};

const TAP_QUEUE_CAPACITY: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorPosition {
    /// Packets exactly as the connector delivered them, before any
    /// transcoding.
    Inbound,
    /// Packets after transcoding (or bypass), with no bitstream preference.
    Outbound,
}

pub(crate) struct TapAnchor {
    pub(crate) app: VHostAppName,
    pub(crate) stream_id: u32,
}

/// Out-of-band mirror of one stream. Attach with
/// `RouterCore::mirror_stream`; packets arrive on an internal bounded queue
/// and are dropped (counted) when the listener lags.
pub struct StreamTap {
    sender: mpsc::Sender<Arc<MediaPacket>>,
    receiver: Mutex<mpsc::Receiver<Arc<MediaPacket>>>,
    anchor: Mutex<Option<TapAnchor>>,
    dropped: AtomicU64,
}

impl StreamTap {
    pub fn new() -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(TAP_QUEUE_CAPACITY);
        Arc::new(Self {
            sender,
            receiver: Mutex::new(receiver),
            anchor: Mutex::new(None),
            dropped: AtomicU64::new(0),
        })
    }

    /// Next mirrored packet; `None` once detached and drained.
    pub async fn recv(&self) -> Option<Arc<MediaPacket>> {
        self.receiver.lock().await.recv().await
    }

    pub fn dropped_packets(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn push(&self, packet: Arc<MediaPacket>) {
        if self.sender.try_send(packet).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("tap listener lagging, packet dropped");
        }
    }

    pub(crate) async fn is_attached(&self) -> bool {
        self.anchor.lock().await.is_some()
    }

    pub(crate) async fn attach(&self, app: VHostAppName, stream_id: u32) {
        let mut anchor = self.anchor.lock().await;
        *anchor = Some(TapAnchor { app, stream_id });
    }

    pub(crate) async fn take_anchor(&self) -> Option<TapAnchor> {
        self.anchor.lock().await.take()
    }

    /// Clear the anchor and discard everything still buffered.
    pub(crate) async fn detach(&self) {
        let _ = self.take_anchor().await;
        let mut receiver = self.receiver.lock().await;
        while receiver.try_recv().is_ok() {}
    }
}
