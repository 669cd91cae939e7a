mod application;
mod packet;
mod stream;
mod track;

pub use application::{ApplicationInfo, VHostAppName};
pub use packet::{BitstreamFormat, FragmentationHeader, KeyFlag, MediaPacket, MediaType, PacketType};
pub use stream::{MediaStream, StreamDescriptor};
pub use track::{AudioProfile, ChannelLayout, CodecId, MediaTrack, Timebase, VideoProfile};
