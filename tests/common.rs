#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use tokio::time::Instant;

use mediaroute::config::Config;
use mediaroute::media::{
    AudioProfile, BitstreamFormat, ChannelLayout, CodecId, KeyFlag, MediaPacket, MediaStream,
    MediaTrack, MediaType, PacketType, StreamDescriptor, Timebase, VHostAppName,
};
use mediaroute::router::{
    ConnectorId, ConnectorType, ObserverType, RouteConnector, RouteObserver, RouterApplication,
    RouterCore,
};

pub const START_CODE: [u8; 4] = [0, 0, 0, 1];
pub const TEST_SPS: [u8; 11] = [
    0x67, 0x42, 0xC0, 0x0A, 0xD9, 0x1E, 0x84, 0x00, 0x00, 0x03, 0x00,
];
pub const TEST_PPS: [u8; 4] = [0x68, 0xCE, 0x3C, 0x80];

pub fn h264_track(id: u32) -> MediaTrack {
    MediaTrack::new(
        id,
        MediaType::Video,
        CodecId::H264,
        Timebase::new(1, 1000),
        BitstreamFormat::H264AnnexB,
    )
}

pub fn aac_adts_track(id: u32) -> MediaTrack {
    MediaTrack::new(
        id,
        MediaType::Audio,
        CodecId::Aac,
        Timebase::new(1, 1000),
        BitstreamFormat::AacAdts,
    )
    .with_audio(AudioProfile {
        sample_rate: 48000,
        channels: 2,
        layout: ChannelLayout::Stereo,
    })
}

pub fn h264_seq_header(track: u32) -> MediaPacket {
    let mut payload = BytesMut::new();
    payload.put_slice(&START_CODE);
    payload.put_slice(&TEST_SPS);
    payload.put_slice(&START_CODE);
    payload.put_slice(&TEST_PPS);
    MediaPacket::new(
        track,
        MediaType::Video,
        BitstreamFormat::H264AnnexB,
        PacketType::SequenceHeader,
        0,
        0,
        0,
        KeyFlag::Key,
        payload.freeze(),
    )
}

pub fn h264_nalu(track: u32, dts: i64, idr: bool) -> MediaPacket {
    let mut payload = BytesMut::new();
    payload.put_slice(&START_CODE);
    payload.put_slice(if idr {
        &[0x65, 0x88, 0x80, 0x10]
    } else {
        &[0x41, 0x9A, 0x20, 0x04]
    });
    MediaPacket::new(
        track,
        MediaType::Video,
        BitstreamFormat::H264AnnexB,
        PacketType::Nalu,
        dts,
        dts,
        33,
        if idr { KeyFlag::Key } else { KeyFlag::NonKey },
        payload.freeze(),
    )
}

pub fn hevc_track(id: u32) -> MediaTrack {
    MediaTrack::new(
        id,
        MediaType::Video,
        CodecId::H265,
        Timebase::new(1, 1000),
        BitstreamFormat::HevcAnnexB,
    )
}

pub fn hevc_nalu(track: u32, dts: i64, irap: bool) -> MediaPacket {
    let mut payload = BytesMut::new();
    payload.put_slice(&START_CODE);
    // 0x26 -> IDR_W_RADL, 0x02 -> trailing picture
    payload.put_slice(if irap {
        &[0x26, 0x01, 0xAF, 0x08]
    } else {
        &[0x02, 0x01, 0xD0, 0x09]
    });
    MediaPacket::new(
        track,
        MediaType::Video,
        BitstreamFormat::HevcAnnexB,
        PacketType::Nalu,
        dts,
        dts,
        33,
        if irap { KeyFlag::Key } else { KeyFlag::NonKey },
        payload.freeze(),
    )
}

pub fn opus_track(id: u32) -> MediaTrack {
    MediaTrack::new(
        id,
        MediaType::Audio,
        CodecId::Opus,
        Timebase::new(1, 48000),
        BitstreamFormat::Opus,
    )
    .with_audio(AudioProfile {
        sample_rate: 48000,
        channels: 2,
        layout: ChannelLayout::Stereo,
    })
}

pub fn opus_packet(track: u32, dts: i64) -> MediaPacket {
    MediaPacket::new(
        track,
        MediaType::Audio,
        BitstreamFormat::Opus,
        PacketType::Raw,
        dts,
        dts,
        960,
        KeyFlag::Key,
        BytesMut::from(&[0xFC, 0xFF, 0xFE][..]).freeze(),
    )
}

/// Calls an observer saw, in arrival order.
#[derive(Clone)]
pub enum ObserverCall {
    Created,
    Prepared,
    Updated,
    Deleted,
    Frame(Arc<MediaPacket>),
}

pub struct RecordingObserver {
    kind: ObserverType,
    format: Option<BitstreamFormat>,
    frame_delay: Option<Duration>,
    accept_create: bool,
    create_delay: Option<Duration>,
    pub log: Mutex<Vec<ObserverCall>>,
}

impl RecordingObserver {
    pub fn publisher(format: Option<BitstreamFormat>) -> Arc<Self> {
        Arc::new(Self {
            kind: ObserverType::Publisher,
            format,
            frame_delay: None,
            accept_create: true,
            create_delay: None,
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn transcoder() -> Arc<Self> {
        Arc::new(Self {
            kind: ObserverType::Transcoder,
            format: None,
            frame_delay: None,
            accept_create: true,
            create_delay: None,
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn slow_publisher(format: Option<BitstreamFormat>, frame_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            kind: ObserverType::Publisher,
            format,
            frame_delay: Some(frame_delay),
            accept_create: true,
            create_delay: None,
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn rejecting_publisher() -> Arc<Self> {
        Arc::new(Self {
            kind: ObserverType::Publisher,
            format: None,
            frame_delay: None,
            accept_create: false,
            create_delay: None,
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn publisher_with_slow_create(create_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            kind: ObserverType::Publisher,
            format: None,
            frame_delay: None,
            accept_create: true,
            create_delay: Some(create_delay),
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn frames(&self) -> Vec<Arc<MediaPacket>> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter_map(|call| match call {
                ObserverCall::Frame(packet) => Some(packet.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn frames_for_track(&self, track: u32) -> Vec<Arc<MediaPacket>> {
        self.frames()
            .into_iter()
            .filter(|packet| packet.track_id() == track)
            .collect()
    }

    pub fn frame_count(&self) -> usize {
        self.frames().len()
    }

    pub fn count(&self, probe: fn(&ObserverCall) -> bool) -> usize {
        self.log.lock().unwrap().iter().filter(|c| probe(c)).count()
    }

    pub fn created_count(&self) -> usize {
        self.count(|c| matches!(c, ObserverCall::Created))
    }

    pub fn updated_count(&self) -> usize {
        self.count(|c| matches!(c, ObserverCall::Updated))
    }

    pub fn deleted_count(&self) -> usize {
        self.count(|c| matches!(c, ObserverCall::Deleted))
    }

    fn record(&self, call: ObserverCall) {
        self.log.lock().unwrap().push(call);
    }
}

#[async_trait]
impl RouteObserver for RecordingObserver {
    fn observer_type(&self) -> ObserverType {
        self.kind
    }

    fn desired_format(&self, _stream: &MediaStream, track: &MediaTrack) -> Option<BitstreamFormat> {
        // Only redirect tracks whose codec family matches the requested
        // framing; audio keeps its origin when a video format is asked for.
        match (self.format, track.media_type) {
            (Some(format), MediaType::Video)
                if matches!(
                    format,
                    BitstreamFormat::H264AnnexB
                        | BitstreamFormat::H264Avcc
                        | BitstreamFormat::HevcAnnexB
                        | BitstreamFormat::Hvcc
                ) =>
            {
                Some(format)
            }
            (Some(format), MediaType::Audio)
                if matches!(format, BitstreamFormat::AacAdts | BitstreamFormat::AacRaw) =>
            {
                Some(format)
            }
            _ => None,
        }
    }

    async fn on_stream_created(&self, _stream: Arc<MediaStream>) -> bool {
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        self.record(ObserverCall::Created);
        self.accept_create
    }

    async fn on_stream_prepared(&self, _stream: Arc<MediaStream>) -> bool {
        self.record(ObserverCall::Prepared);
        true
    }

    async fn on_stream_updated(&self, _stream: Arc<MediaStream>) -> bool {
        self.record(ObserverCall::Updated);
        true
    }

    async fn on_stream_deleted(&self, _stream: Arc<MediaStream>) -> bool {
        self.record(ObserverCall::Deleted);
        true
    }

    async fn on_send_frame(&self, _stream: Arc<MediaStream>, packet: Arc<MediaPacket>) -> bool {
        if let Some(delay) = self.frame_delay {
            tokio::time::sleep(delay).await;
        }
        self.record(ObserverCall::Frame(packet));
        true
    }
}

/// What a pulling connector does once the router asks it to materialize a
/// stream.
#[derive(Clone)]
pub struct PullBehavior {
    pub app: Arc<RouterApplication>,
    pub connector_id: ConnectorId,
    pub tracks: Vec<MediaTrack>,
    pub delay: Duration,
    pub create: bool,
}

pub struct TestConnector {
    kind: ConnectorType,
    pub pulls: Mutex<Vec<String>>,
    pub behavior: Mutex<Option<PullBehavior>>,
}

impl TestConnector {
    pub fn provider() -> Arc<Self> {
        Arc::new(Self {
            kind: ConnectorType::Provider,
            pulls: Mutex::new(Vec::new()),
            behavior: Mutex::new(None),
        })
    }

    pub fn transcoder() -> Arc<Self> {
        Arc::new(Self {
            kind: ConnectorType::Transcoder,
            pulls: Mutex::new(Vec::new()),
            behavior: Mutex::new(None),
        })
    }

    pub fn set_pull_behavior(&self, behavior: PullBehavior) {
        *self.behavior.lock().unwrap() = Some(behavior);
    }

    pub fn pull_count(&self) -> usize {
        self.pulls.lock().unwrap().len()
    }
}

#[async_trait]
impl RouteConnector for TestConnector {
    fn connector_type(&self) -> ConnectorType {
        self.kind
    }

    fn can_pull(&self, scheme: &str) -> bool {
        scheme == "test"
    }

    async fn pull_stream(&self, url: &str, _app: &VHostAppName, stream_name: &str) -> bool {
        self.pulls.lock().unwrap().push(url.to_string());
        let behavior = self.behavior.lock().unwrap().clone();
        let Some(behavior) = behavior else {
            return true;
        };
        if !behavior.create {
            return true;
        }
        if behavior.delay > Duration::ZERO {
            tokio::time::sleep(behavior.delay).await;
        }
        behavior
            .app
            .on_stream_created(
                behavior.connector_id,
                StreamDescriptor::new(stream_name, behavior.tracks.clone()),
            )
            .await
            .is_ok()
    }
}

pub struct Fixture {
    pub core: Arc<RouterCore>,
    pub app: Arc<RouterApplication>,
    pub name: VHostAppName,
}

/// Core + one application, with publishers attached straight to providers so
/// single-stage tests see traffic.
pub async fn fixture(tune: impl FnOnce(&mut Config)) -> Fixture {
    let mut config = Config::default();
    config.router.publisher_bypass_transcoder = true;
    tune(&mut config);
    mediaroute::log::init(&config.log);
    let core = RouterCore::new(config);
    let name = VHostAppName::new("default", "live");
    let app = core.create_application(name.clone()).await;
    Fixture { core, app, name }
}

pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}
