use crate::observation::{Observation, Transport, TransportFlow};
use etherparse::{NetHeaders, PacketHeaders, TransportHeader};
use std::net::IpAddr;
use tracing::trace;

/// An Ethernet frame reduced to the addresses it concerns and the
/// observation that should be folded into their profiles.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub src_ip: Option<IpAddr>,
    pub dst_ip: Option<IpAddr>,
    pub observation: Observation,
}

impl DecodedFrame {
    /// Addresses this frame contributes to, source first.
    pub fn addresses(&self) -> impl Iterator<Item = IpAddr> + '_ {
        self.src_ip.iter().chain(self.dst_ip.iter()).copied()
    }
}

pub fn decode_frame(frame: &[u8], timestamp: f64) -> Result<DecodedFrame, String> {
    let headers = PacketHeaders::from_ethernet_slice(frame).map_err(|err| {
        trace!(error = ?err, "Failed to parse packet headers");
        format!("header parse error: {err:?}")
    })?;

    let mut decoded = DecodedFrame {
        src_ip: None,
        dst_ip: None,
        observation: Observation::new(timestamp, frame.to_vec()),
    };

    if let Some(net) = &headers.net {
        match net {
            NetHeaders::Ipv4(ip, _) => {
                decoded.src_ip = Some(IpAddr::from(ip.source));
                decoded.dst_ip = Some(IpAddr::from(ip.destination));
            }
            NetHeaders::Ipv6(ip, _) => {
                decoded.src_ip = Some(IpAddr::from(ip.source));
                decoded.dst_ip = Some(IpAddr::from(ip.destination));
            }
            _ => {}
        }
    }

    let payload = headers.payload.slice();

    if let Some(transport) = &headers.transport {
        match transport {
            TransportHeader::Tcp(tcp) => {
                decoded.observation.flow = Some(TransportFlow {
                    transport: Transport::TCP,
                    src_port: tcp.source_port,
                    dst_port: tcp.destination_port,
                });
                decoded.observation.payload = payload.to_vec();
            }
            TransportHeader::Udp(udp) => {
                decoded.observation.flow = Some(TransportFlow {
                    transport: Transport::UDP,
                    src_port: udp.source_port,
                    dst_port: udp.destination_port,
                });
                decoded.observation.payload = payload.to_vec();
            }
            _ => {}
        }
    }

    Ok(decoded)
}
