use lazy_static::lazy_static;
use prometheus::{Gauge, IntCounter, Registry, TextEncoder};

lazy_static! {
    pub static ref STREAM: Gauge = Gauge::new("stream", "live stream number").unwrap();
    pub static ref PACKET_DROPPED: IntCounter =
        IntCounter::new("packet_dropped", "packets dropped by queue overflow policy").unwrap();
    pub static ref ADAPT_FAILURE: IntCounter =
        IntCounter::new("adapt_failure", "packets dropped by bitstream adaptation errors").unwrap();
    pub static ref PULL_COALESCED: IntCounter =
        IntCounter::new("pull_coalesced", "pull requests joined onto an in-flight pull").unwrap();
    pub static ref REGISTRY: Registry =
        Registry::new_custom(Some("mediaroute".to_string()), None).unwrap();
    pub static ref ENCODER: TextEncoder = TextEncoder::new();
}

pub fn metrics_register() {
    REGISTRY.register(Box::new(STREAM.clone())).unwrap();
    REGISTRY.register(Box::new(PACKET_DROPPED.clone())).unwrap();
    REGISTRY.register(Box::new(ADAPT_FAILURE.clone())).unwrap();
    REGISTRY.register(Box::new(PULL_COALESCED.clone())).unwrap();
}

pub fn gather() -> String {
    ENCODER.encode_to_string(&REGISTRY.gather()).unwrap()
}
