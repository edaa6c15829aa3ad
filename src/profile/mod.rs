//! Per-address behavioral profiles and the store that aggregates them.

use crate::observation::{Observation, Transport};
use crate::resolvers::FingerprintLabeler;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub mod store;


pub use store::{ProfileEntry, ProfileStore, StoreConfig};

/// Record type tag written into output headers for profile files.
pub const PROFILE_RECORD_TYPE: &str = "IPProfile";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub country: String,
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
    pub asn: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortStats {
    pub total_bytes: u64,
    pub tcp_count: u64,
    pub udp_count: u64,
}

impl PortStats {
    fn add(&mut self, bytes: u64, transport: Transport) {
        self.total_bytes += bytes;
        match transport {
            Transport::TCP => self.tcp_count += 1,
            Transport::UDP => self.udp_count += 1,
            Transport::Other(_) => {}
        }
    }
}

/// Classifier-provided description of a protocol, stored on first sight.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolDetail {
    pub category: String,
    pub classifier: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolStats {
    pub packet_count: u64,
    pub detail: ProtocolDetail,
}

/// How `timestamp_last` reacts to an observation older than the current
/// value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LastSeenPolicy {
    /// Every observation overwrites the value, in lock acquisition order.
    LastCall,
    /// Only a newer timestamp advances the value.
    #[default]
    MaxTimestamp,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub address: String,
    pub packet_count: u64,
    pub byte_count: u64,
    pub timestamp_first: f64,
    pub timestamp_last: f64,
    pub geolocation: Option<Location>,
    pub dns_names: Vec<String>,
    pub source_ports: BTreeMap<String, PortStats>,
    pub destination_ports: BTreeMap<String, PortStats>,
    pub tls_fingerprints: BTreeMap<String, String>,
    pub server_names: BTreeMap<String, u64>,
    pub protocols: BTreeMap<String, ProtocolStats>,
}

/// Facts about a single packet that do not depend on any profile state.
#[derive(Debug, Clone, Default)]
pub struct PacketFacts {
    pub server_name: Option<String>,
    pub fingerprint: Option<String>,
    pub protocols: HashMap<String, ProtocolDetail>,
}

impl Profile {
    /// Builds the profile for a newly seen address from its first
    /// observation.
    pub fn create(
        address: &str,
        observation: &Observation,
        facts: &PacketFacts,
        geolocation: Option<Location>,
        dns_names: Vec<String>,
        labeler: &dyn FingerprintLabeler,
    ) -> Self {
        let mut profile = Profile {
            address: address.to_string(),
            timestamp_first: observation.timestamp,
            timestamp_last: observation.timestamp,
            geolocation,
            dns_names,
            ..Default::default()
        };
        profile.absorb(observation, facts, labeler);
        profile
    }

    /// Folds a further observation into an existing profile.
    pub fn merge(
        &mut self,
        observation: &Observation,
        facts: &PacketFacts,
        labeler: &dyn FingerprintLabeler,
        policy: LastSeenPolicy,
    ) {
        match policy {
            LastSeenPolicy::LastCall => self.timestamp_last = observation.timestamp,
            LastSeenPolicy::MaxTimestamp => {
                if observation.timestamp > self.timestamp_last {
                    self.timestamp_last = observation.timestamp;
                }
            }
        }
        self.absorb(observation, facts, labeler);
    }

    fn absorb(
        &mut self,
        observation: &Observation,
        facts: &PacketFacts,
        labeler: &dyn FingerprintLabeler,
    ) {
        let length = observation.len();
        self.packet_count += 1;
        self.byte_count += length;

        if let Some(flow) = observation.flow {
            self.source_ports
                .entry(flow.src_port.to_string())
                .or_default()
                .add(length, flow.transport);
            self.destination_ports
                .entry(flow.dst_port.to_string())
                .or_default()
                .add(length, flow.transport);
        }

        if let Some(sni) = facts.server_name.as_deref().filter(|s| !s.is_empty()) {
            *self.server_names.entry(sni.to_string()).or_insert(0) += 1;
        }

        if let Some(hash) = &facts.fingerprint
            && !self.tls_fingerprints.contains_key(hash)
        {
            let label = labeler.label(hash);
            self.tls_fingerprints.insert(hash.clone(), label);
        }

        for (name, detail) in &facts.protocols {
            match self.protocols.get_mut(name) {
                Some(stats) => stats.packet_count += 1,
                None => {
                    self.protocols.insert(
                        name.clone(),
                        ProtocolStats {
                            packet_count: 1,
                            detail: detail.clone(),
                        },
                    );
                }
            }
        }
    }
}
