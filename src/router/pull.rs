use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use crate::media::{MediaStream, VHostAppName};

pub(crate) type PullKey = (VHostAppName, String);
type PullSlot = watch::Sender<Option<Arc<MediaStream>>>;

/// Coalesces concurrent pull requests for the same (application, stream)
/// onto a single in-flight provider call. The first caller becomes the
/// leader; everyone waits on the same watch channel.
#[derive(Default)]
pub(crate) struct PullCoordinator {
    inflight: Mutex<HashMap<PullKey, PullSlot>>,
}

impl PullCoordinator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Join or open the in-flight pull for `key`. Returns whether the caller
    /// leads (and must invoke the provider) plus the readiness receiver.
    pub(crate) async fn begin(
        &self,
        key: PullKey,
    ) -> (bool, watch::Receiver<Option<Arc<MediaStream>>>) {
        let mut inflight = self.inflight.lock().await;
        if let Some(slot) = inflight.get(&key) {
            return (false, slot.subscribe());
        }
        let (sender, receiver) = watch::channel(None);
        inflight.insert(key, sender);
        (true, receiver)
    }

    /// Resolve an in-flight pull with the stream that just came up. A miss is
    /// fine: the stream arrived outside any pull, or after the leader gave up.
    pub(crate) async fn complete(&self, key: &PullKey, stream: Arc<MediaStream>) {
        if let Some(slot) = self.inflight.lock().await.remove(key) {
            let _ = slot.send(Some(stream));
        }
    }

    /// Abandon an in-flight pull; waiting followers see the channel close.
    pub(crate) async fn cancel(&self, key: &PullKey) {
        self.inflight.lock().await.remove(key);
    }

    pub(crate) async fn cancel_all(&self) {
        self.inflight.lock().await.clear();
    }
}
