use uuid::Uuid;

use crate::media::{CodecId, MediaType, VHostAppName};

use super::stream::StreamState;
use super::{ConnectorId, ConnectorType};

/// Snapshot of one live stream, for admin/inspection surfaces.
#[derive(Clone, Debug)]
pub struct StreamInfo {
    pub id: u32,
    pub name: String,
    pub uuid: Uuid,
    pub app: VHostAppName,
    pub state: StreamState,
    pub origin: ConnectorType,
    pub owner: ConnectorId,
    pub created_at: i64,
    pub on_air: bool,
    /// Packets the worker fanned out (counted once per packet, not per
    /// observer).
    pub delivered_packets: u64,
    pub dropped_packets: u64,
    pub tracks: Vec<TrackInfo>,
}

#[derive(Clone, Debug)]
pub struct TrackInfo {
    pub id: u32,
    pub media_type: MediaType,
    pub codec: CodecId,
    pub bitrate: u32,
    /// Zero until known, either from the connector or parsed out of the SPS.
    pub width: u32,
    pub height: u32,
}
