#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    TCP,
    UDP,
    Other(u8),
}

/// Transport-layer endpoints of a single packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportFlow {
    pub transport: Transport,
    pub src_port: u16,
    pub dst_port: u16,
}

/// Metadata extracted from one packet, folded into the profiles of the
/// addresses it concerns.
#[derive(Debug, Clone, Default)]
pub struct Observation {
    pub timestamp: f64,
    /// Captured bytes of the whole frame. Its length is what profiles count.
    pub data: Vec<u8>,
    pub flow: Option<TransportFlow>,
    /// Application payload carried by the transport layer, if any.
    pub payload: Vec<u8>,
}

impl Observation {
    pub fn new(timestamp: f64, data: Vec<u8>) -> Self {
        Self {
            timestamp,
            data,
            flow: None,
            payload: Vec::new(),
        }
    }

    pub fn with_flow(mut self, transport: Transport, src_port: u16, dst_port: u16) -> Self {
        self.flow = Some(TransportFlow {
            transport,
            src_port,
            dst_port,
        });
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
