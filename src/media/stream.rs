use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use uuid::Uuid;

use super::application::VHostAppName;
use super::track::MediaTrack;

/// What a connector hands over when announcing a stream: the name and the
/// track set. Ids, uuid and timestamps are minted by the router application.
#[derive(Debug, Clone)]
pub struct StreamDescriptor {
    pub name: String,
    pub tracks: Vec<MediaTrack>,
}

impl StreamDescriptor {
    pub fn new(name: impl ToString, tracks: Vec<MediaTrack>) -> Self {
        Self {
            name: name.to_string(),
            tracks,
        }
    }
}

/// Named multi-track logical unit owned by one connector. The track set is
/// fixed between creation and a stream update; an update swaps in a new
/// `MediaStream` value under the same identity.
#[derive(Debug)]
pub struct MediaStream {
    id: u32,
    name: String,
    uuid: Uuid,
    app: VHostAppName,
    tracks: Vec<MediaTrack>,
    created_at: i64,
    on_air: AtomicBool,
}

impl MediaStream {
    pub(crate) fn new(id: u32, app: VHostAppName, descriptor: StreamDescriptor) -> Self {
        Self {
            id,
            name: descriptor.name,
            uuid: Uuid::new_v4(),
            app,
            tracks: descriptor.tracks,
            created_at: Utc::now().timestamp_millis(),
            on_air: AtomicBool::new(false),
        }
    }

    /// Same stream identity with a refreshed track set, for stream updates.
    pub(crate) fn with_tracks(&self, tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            uuid: self.uuid,
            app: self.app.clone(),
            tracks,
            created_at: self.created_at,
            on_air: AtomicBool::new(self.is_on_air()),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn app(&self) -> &VHostAppName {
        &self.app
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn track(&self, id: u32) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn is_on_air(&self) -> bool {
        self.on_air.load(Ordering::Relaxed)
    }

    pub(crate) fn set_on_air(&self) {
        self.on_air.store(true, Ordering::Relaxed);
    }
}
