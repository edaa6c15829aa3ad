use super::ProtocolClassifier;
use crate::observation::{Observation, Transport};
use crate::profile::ProtocolDetail;
use std::collections::HashMap;

const CLASSIFIER_NAME: &str = "port";

/// Well-known-port classifier. Reports at most one protocol per packet,
/// preferring the lower (service-side) port.
pub struct PortClassifier {
    services: HashMap<(Transport, u16), (&'static str, &'static str)>,
}

impl Default for PortClassifier {
    fn default() -> Self {
        let mut classifier = Self {
            services: HashMap::new(),
        };

        classifier.register(Transport::TCP, 21, "FTP", "FileTransfer");
        classifier.register(Transport::TCP, 22, "SSH", "RemoteAccess");
        classifier.register(Transport::TCP, 23, "Telnet", "RemoteAccess");
        classifier.register(Transport::TCP, 25, "SMTP", "Email");
        classifier.register(Transport::TCP, 53, "DNS", "Network");
        classifier.register(Transport::UDP, 53, "DNS", "Network");
        classifier.register(Transport::UDP, 67, "DHCP", "Network");
        classifier.register(Transport::UDP, 68, "DHCP", "Network");
        classifier.register(Transport::TCP, 80, "HTTP", "Web");
        classifier.register(Transport::TCP, 110, "POP3", "Email");
        classifier.register(Transport::UDP, 123, "NTP", "System");
        classifier.register(Transport::TCP, 143, "IMAP", "Email");
        classifier.register(Transport::UDP, 161, "SNMP", "Network");
        classifier.register(Transport::TCP, 443, "TLS", "Web");
        classifier.register(Transport::UDP, 443, "QUIC", "Web");
        classifier.register(Transport::TCP, 445, "SMB", "FileTransfer");
        classifier.register(Transport::UDP, 5353, "MDNS", "Network");
        classifier.register(Transport::TCP, 3389, "RDP", "RemoteAccess");

        classifier
    }
}

impl PortClassifier {
    pub fn register(
        &mut self,
        transport: Transport,
        port: u16,
        protocol: &'static str,
        category: &'static str,
    ) {
        self.services.insert((transport, port), (protocol, category));
    }
}

impl ProtocolClassifier for PortClassifier {
    fn classify(&self, observation: &Observation) -> HashMap<String, ProtocolDetail> {
        let mut detected = HashMap::new();
        let Some(flow) = observation.flow else {
            return detected;
        };

        let (low, high) = if flow.src_port <= flow.dst_port {
            (flow.src_port, flow.dst_port)
        } else {
            (flow.dst_port, flow.src_port)
        };

        let service = self
            .services
            .get(&(flow.transport, low))
            .or_else(|| self.services.get(&(flow.transport, high)));

        if let Some((protocol, category)) = service {
            detected.insert(
                protocol.to_string(),
                ProtocolDetail {
                    category: category.to_string(),
                    classifier: CLASSIFIER_NAME.to_string(),
                },
            );
        }
        detected
    }
}
