use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::adapt::BitstreamAdapter;
use crate::error::RouteError;
use crate::media::{
    BitstreamFormat, MediaPacket, MediaStream, MediaType, PacketType, VideoProfile,
};
use crate::metrics;
use crate::result::Result;

use super::application::RouterApplication;
use super::message::{StreamInfo, TrackInfo};
use super::tap::StreamTap;
use super::{same_instance, ConnectorId, ConnectorType, ObserverId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum StreamState {
    Created = 0,
    Prepared = 1,
    Started = 2,
    Stopped = 3,
}

impl StreamState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => StreamState::Created,
            1 => StreamState::Prepared,
            2 => StreamState::Started,
            _ => StreamState::Stopped,
        }
    }
}

enum InputItem {
    Packet(Arc<MediaPacket>),
    Updated(Arc<MediaStream>),
}

/// Serialized delivery pipeline for one live stream: a bounded input queue
/// filled by the owning connector and drained by a single worker task that
/// fans packets out to the application's observers.
pub struct RouterStream {
    app: Weak<RouterApplication>,
    stream: RwLock<Arc<MediaStream>>,
    owner: ConnectorId,
    origin: ConnectorType,
    state: AtomicU8,
    capacity: usize,
    producer_block: Duration,
    queue: Mutex<VecDeque<InputItem>>,
    space_free: Notify,
    ready: Notify,
    dropped: AtomicU64,
    delivered: AtomicU64,
    taps: RwLock<Vec<Arc<StreamTap>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RouterStream {
    pub(crate) fn new(
        app: Weak<RouterApplication>,
        stream: Arc<MediaStream>,
        owner: ConnectorId,
        origin: ConnectorType,
        capacity: usize,
        producer_block: Duration,
    ) -> Arc<Self> {
        let router_stream = Arc::new(Self {
            app,
            stream: RwLock::new(stream),
            owner,
            origin,
            state: AtomicU8::new(StreamState::Created as u8),
            capacity,
            producer_block,
            queue: Mutex::new(VecDeque::new()),
            space_free: Notify::new(),
            ready: Notify::new(),
            dropped: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            taps: RwLock::new(Vec::new()),
            worker: Mutex::new(None),
        });
        let worker = tokio::spawn(supervise(router_stream.clone()));
        {
            // new() runs before the stream is published anywhere, so the
            // worker slot is free.
            let mut slot = router_stream.worker.try_lock().unwrap();
            *slot = Some(worker);
        }
        router_stream
    }

    pub fn state(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: StreamState) {
        self.state.store(state as u8, Ordering::Release);
        self.ready.notify_one();
        self.space_free.notify_one();
    }

    pub fn owner(&self) -> ConnectorId {
        self.owner
    }

    pub fn origin(&self) -> ConnectorType {
        self.origin
    }

    pub async fn current(&self) -> Arc<MediaStream> {
        self.stream.read().await.clone()
    }

    pub fn dropped_packets(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn delivered_packets(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub async fn info(&self) -> StreamInfo {
        let stream = self.current().await;
        StreamInfo {
            id: stream.id(),
            name: stream.name().to_string(),
            uuid: stream.uuid(),
            app: stream.app().clone(),
            state: self.state(),
            origin: self.origin,
            owner: self.owner,
            created_at: stream.created_at(),
            on_air: stream.is_on_air(),
            delivered_packets: self.delivered_packets(),
            dropped_packets: self.dropped_packets(),
            tracks: stream
                .tracks()
                .iter()
                .map(|track| TrackInfo {
                    id: track.id,
                    media_type: track.media_type,
                    codec: track.codec,
                    bitrate: track.bitrate,
                    width: track.video.as_ref().map(|v| v.width).unwrap_or(0),
                    height: track.video.as_ref().map(|v| v.height).unwrap_or(0),
                })
                .collect(),
        }
    }

    /// Enqueue one packet from the owning connector. Blocks up to the
    /// configured bound on a full queue, then falls into the drop policy.
    pub(crate) async fn enqueue(&self, packet: Arc<MediaPacket>) -> Result<()> {
        let mut waited = false;
        loop {
            match self.state() {
                StreamState::Prepared | StreamState::Started => {}
                _ => {
                    let stream = self.stream.read().await;
                    return Err(RouteError::stream_not_ready(stream.name()));
                }
            }
            {
                let mut queue = self.queue.lock().await;
                if queue.len() < self.capacity {
                    queue.push_back(InputItem::Packet(packet));
                    self.ready.notify_one();
                    return Ok(());
                }
                if waited {
                    self.shed(&mut queue, &packet);
                    queue.push_back(InputItem::Packet(packet));
                    self.ready.notify_one();
                    return Ok(());
                }
            }
            waited = true;
            let _ = timeout(self.producer_block, self.space_free.notified()).await;
        }
    }

    /// Make room for `incoming` on a saturated queue. Key video packets are
    /// never shed; the queue grows past capacity instead.
    fn shed(&self, queue: &mut VecDeque<InputItem>, incoming: &MediaPacket) {
        let mut shed = 0u64;
        while queue.len() >= self.capacity {
            let victim = queue.iter().position(|item| match item {
                InputItem::Packet(queued) => match incoming.media_type() {
                    MediaType::Audio => queued.media_type() == MediaType::Audio,
                    MediaType::Video => {
                        queued.media_type() == MediaType::Video && !queued.is_key()
                    }
                    MediaType::Data => queued.media_type() == MediaType::Data,
                },
                InputItem::Updated(_) => false,
            });
            match victim {
                Some(index) => {
                    queue.remove(index);
                    shed += 1;
                }
                None => break,
            }
        }
        if shed > 0 {
            self.dropped.fetch_add(shed, Ordering::Relaxed);
            metrics::PACKET_DROPPED.inc_by(shed);
            debug!(
                "input queue overflow, shed {} packet(s), {} total",
                shed,
                self.dropped.load(Ordering::Relaxed)
            );
        }
    }

    /// Metadata backfill from the worker (parsed track dimensions). The track
    /// set semantics are unchanged, so there is no observer fanout.
    pub(crate) async fn refresh_stream(&self, refreshed: Arc<MediaStream>) {
        let mut slot = self.stream.write().await;
        *slot = refreshed;
    }

    /// Swap in a refreshed track set and let the worker fan the update out
    /// ahead of any packet enqueued after it.
    pub(crate) async fn replace_stream(&self, updated: Arc<MediaStream>) {
        {
            let mut slot = self.stream.write().await;
            *slot = updated.clone();
        }
        let mut queue = self.queue.lock().await;
        queue.push_back(InputItem::Updated(updated));
        self.ready.notify_one();
    }

    /// Signal the worker to drain and exit, then wait for it. Remaining
    /// queued packets are discarded.
    pub(crate) async fn stop(&self) {
        self.set_state(StreamState::Stopped);
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!("stream worker ended abnormally: {}", err);
            }
        }
        self.queue.lock().await.clear();
    }

    pub(crate) async fn add_tap(&self, tap: Arc<StreamTap>) {
        self.taps.write().await.push(tap);
    }

    pub(crate) async fn remove_tap(&self, tap: &Arc<StreamTap>) {
        self.taps
            .write()
            .await
            .retain(|attached| !same_instance(attached, tap));
    }

    pub(crate) async fn detach_taps(&self) {
        let taps = std::mem::take(&mut *self.taps.write().await);
        for tap in taps {
            tap.detach().await;
        }
    }
}

/// Per-observer delivery bookkeeping owned by the worker task.
struct DeliveryContext {
    current: Arc<MediaStream>,
    adapter: BitstreamAdapter,
    known: HashSet<ObserverId>,
    await_key: HashSet<(ObserverId, u32)>,
    targets: HashMap<(ObserverId, u32), BitstreamFormat>,
    delivered_any: bool,
}

impl DeliveryContext {
    fn new(current: Arc<MediaStream>) -> Self {
        let mut adapter = BitstreamAdapter::new();
        adapter.prime(&current);
        Self {
            current,
            adapter,
            known: HashSet::new(),
            await_key: HashSet::new(),
            targets: HashMap::new(),
            delivered_any: false,
        }
    }

    async fn on_updated(&mut self, router_stream: &Arc<RouterStream>, updated: Arc<MediaStream>) {
        self.current = updated.clone();
        // Re-assert the registry copy in case a metadata backfill wrote over
        // it while this update sat in the queue.
        router_stream.refresh_stream(updated.clone()).await;
        self.adapter.reset(&updated);
        self.targets.clear();
        let Some(app) = router_stream.app.upgrade() else {
            return;
        };
        for (id, observer) in app.observers_for(router_stream.origin).await {
            if !observer.on_stream_updated(updated.clone()).await {
                debug!(
                    "[{}] observer {} rejected stream update",
                    updated.name(),
                    id
                );
            }
        }
    }

    /// Give a video track the dimensions parsed out of its SPS when the
    /// connector supplied none.
    async fn backfill_video_profile(&mut self, router_stream: &Arc<RouterStream>, track_id: u32) {
        let needs_profile = match self.current.track(track_id) {
            Some(track) => track.media_type == MediaType::Video && track.video.is_none(),
            None => false,
        };
        if !needs_profile {
            return;
        }
        let Some((width, height, framerate)) = self.adapter.video_profile(track_id) else {
            return;
        };
        let tracks = self
            .current
            .tracks()
            .iter()
            .cloned()
            .map(|mut track| {
                if track.id == track_id {
                    track.video = Some(VideoProfile {
                        width,
                        height,
                        framerate,
                    });
                }
                track
            })
            .collect();
        let refreshed = Arc::new(self.current.with_tracks(tracks));
        self.current = refreshed.clone();
        router_stream.refresh_stream(refreshed).await;
        debug!(
            "[{}] track {} dimensions {}x{} taken from SPS",
            self.current.name(),
            track_id,
            width,
            height
        );
    }

    async fn dispatch(&mut self, router_stream: &Arc<RouterStream>, packet: Arc<MediaPacket>) {
        // Taps mirror the connector's framing untouched.
        for tap in router_stream.taps.read().await.iter() {
            tap.push(packet.clone());
        }

        let Some(app) = router_stream.app.upgrade() else {
            return;
        };
        self.backfill_video_profile(router_stream, packet.track_id())
            .await;
        let Some(track) = self.current.track(packet.track_id()).cloned() else {
            debug!(
                "[{}] packet for unknown track {}",
                self.current.name(),
                packet.track_id()
            );
            return;
        };

        let observers = app.observers_for(router_stream.origin).await;
        let live: HashSet<ObserverId> = observers.iter().map(|(id, _)| *id).collect();
        self.known.retain(|id| live.contains(id));
        self.targets.retain(|(id, _), _| live.contains(id));
        self.await_key.retain(|(id, _)| live.contains(id));

        // One adaptation per distinct target format, shared across observers.
        let mut adapted: HashMap<
            BitstreamFormat,
            (Option<Arc<MediaPacket>>, Option<Arc<MediaPacket>>),
        > = HashMap::new();

        for (id, observer) in observers {
            if self.known.insert(id) && self.delivered_any {
                // Joined mid-stream: hold video back until the next keyframe.
                for track in self.current.tracks() {
                    if track.media_type == MediaType::Video {
                        self.await_key.insert((id, track.id));
                    }
                }
            }

            if self.await_key.contains(&(id, packet.track_id())) {
                if packet.packet_type() == PacketType::SequenceHeader {
                    // Configuration flows through without opening the gate.
                } else if packet.is_key() {
                    self.await_key.remove(&(id, packet.track_id()));
                } else {
                    continue;
                }
            }

            let target = *self.targets.entry((id, packet.track_id())).or_insert_with(|| {
                observer
                    .desired_format(&self.current, &track)
                    .unwrap_or(track.origin_format)
            });

            let (config, outgoing) = match adapted.get(&target) {
                Some(entry) => entry.clone(),
                None => {
                    let entry = match self.adapter.adapt(&track, &packet, target) {
                        Ok(result) => (result.config, result.packet),
                        Err(err) => {
                            metrics::ADAPT_FAILURE.inc();
                            debug!(
                                "[{}] dropping packet, adaptation to {:?} failed: {}",
                                self.current.name(),
                                target,
                                err
                            );
                            (None, None)
                        }
                    };
                    adapted.insert(target, entry.clone());
                    entry
                }
            };

            if let Some(config) = config {
                observer.on_send_frame(self.current.clone(), config).await;
            }
            if let Some(outgoing) = outgoing {
                if !observer.on_send_frame(self.current.clone(), outgoing).await {
                    debug!("[{}] observer {} rejected frame", self.current.name(), id);
                }
                self.delivered_any = true;
            }
        }
    }
}

/// Panics inside the worker stop at this boundary; the stream goes Stopped
/// instead of taking the process down.
async fn supervise(router_stream: Arc<RouterStream>) {
    let worker = tokio::spawn(worker_loop(router_stream.clone()));
    if let Err(err) = worker.await {
        router_stream.set_state(StreamState::Stopped);
        warn!("stream worker panicked: {}", err);
    }
}

async fn worker_loop(router_stream: Arc<RouterStream>) {
    // Hold every packet until the stream create fanout has completed.
    loop {
        match router_stream.state() {
            StreamState::Created => router_stream.ready.notified().await,
            StreamState::Stopped => {
                router_stream.queue.lock().await.clear();
                return;
            }
            _ => break,
        }
    }

    let current = router_stream.current().await;
    info!("[{}] [{}] stream worker up", current.app(), current.name());
    let mut context = DeliveryContext::new(current);

    loop {
        let item = { router_stream.queue.lock().await.pop_front() };
        let Some(item) = item else {
            if router_stream.state() == StreamState::Stopped {
                break;
            }
            router_stream.ready.notified().await;
            continue;
        };
        router_stream.space_free.notify_one();
        if router_stream.state() == StreamState::Stopped {
            break;
        }
        match item {
            InputItem::Updated(updated) => context.on_updated(&router_stream, updated).await,
            InputItem::Packet(packet) => {
                context.dispatch(&router_stream, packet).await;
                router_stream.delivered.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    router_stream.queue.lock().await.clear();
    info!(
        "[{}] [{}] stream worker down, {} packet(s) dropped",
        context.current.app(),
        context.current.name(),
        router_stream.dropped_packets()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{CodecId, KeyFlag, MediaTrack, StreamDescriptor, Timebase, VHostAppName};
    use bytes::Bytes;

    fn test_stream(capacity: usize) -> Arc<RouterStream> {
        let track = MediaTrack::new(
            0,
            MediaType::Video,
            CodecId::H264,
            Timebase::new(1, 90000),
            BitstreamFormat::H264AnnexB,
        );
        let stream = Arc::new(MediaStream::new(
            1,
            VHostAppName::new("default", "live"),
            StreamDescriptor::new("test", vec![track]),
        ));
        RouterStream::new(
            Weak::new(),
            stream,
            1,
            ConnectorType::Provider,
            capacity,
            Duration::from_millis(10),
        )
    }

    fn video_packet(dts: i64, flag: KeyFlag) -> Arc<MediaPacket> {
        Arc::new(MediaPacket::new(
            0,
            MediaType::Video,
            BitstreamFormat::H264AnnexB,
            PacketType::Nalu,
            dts,
            dts,
            33,
            flag,
            Bytes::from_static(&[0, 0, 0, 1, 0x41]),
        ))
    }

    #[tokio::test]
    async fn test_rejects_before_prepared() {
        let router_stream = test_stream(4);
        let err = router_stream
            .enqueue(video_packet(0, KeyFlag::Key))
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::StreamNotReady(_)));
        router_stream.stop().await;
    }

    #[tokio::test]
    async fn test_shed_keeps_key_packets() {
        let router_stream = test_stream(4);
        // Bypass the worker so the queue stays full.
        {
            let mut queue = router_stream.queue.lock().await;
            queue.push_back(InputItem::Packet(video_packet(0, KeyFlag::Key)));
            queue.push_back(InputItem::Packet(video_packet(33, KeyFlag::NonKey)));
            queue.push_back(InputItem::Packet(video_packet(66, KeyFlag::NonKey)));
            queue.push_back(InputItem::Packet(video_packet(99, KeyFlag::NonKey)));
        }
        let mut queue = router_stream.queue.lock().await;
        router_stream.shed(&mut queue, &video_packet(132, KeyFlag::NonKey));
        assert_eq!(queue.len(), 3);
        assert_eq!(router_stream.dropped_packets(), 1);
        // The key packet survived at the front.
        match queue.front().unwrap() {
            InputItem::Packet(p) => assert!(p.is_key()),
            _ => panic!("expected packet"),
        }
        drop(queue);
        router_stream.stop().await;
    }

    #[tokio::test]
    async fn test_shed_never_drops_all_keys() {
        let router_stream = test_stream(2);
        {
            let mut queue = router_stream.queue.lock().await;
            queue.push_back(InputItem::Packet(video_packet(0, KeyFlag::Key)));
            queue.push_back(InputItem::Packet(video_packet(33, KeyFlag::Key)));
        }
        let mut queue = router_stream.queue.lock().await;
        router_stream.shed(&mut queue, &video_packet(66, KeyFlag::Key));
        // Nothing sheddable: the queue grows past capacity instead.
        assert_eq!(queue.len(), 2);
        assert_eq!(router_stream.dropped_packets(), 0);
        drop(queue);
        router_stream.stop().await;
    }
}
