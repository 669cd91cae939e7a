use tokio::sync::broadcast;

use crate::media::VHostAppName;

#[derive(Clone, Debug)]
pub enum RouterEvent {
    Stream(StreamEvent),
}

#[derive(Clone, Debug)]
pub struct StreamEvent {
    pub kind: StreamEventKind,
    pub app: VHostAppName,
    pub stream: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEventKind {
    Up,
    Down,
}

/// Event sender with a detached keepalive subscriber, so emitting never
/// fails while no listener is attached.
pub(crate) fn channel(capacity: usize) -> broadcast::Sender<RouterEvent> {
    let (sender, mut keepalive) = broadcast::channel(capacity);
    tokio::spawn(async move { while keepalive.recv().await.is_ok() {} });
    sender
}
