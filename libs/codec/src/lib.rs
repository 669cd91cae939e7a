pub mod aac;
pub mod annexb;
pub mod bits;
pub mod h264;
pub mod h265;
pub mod opus;
