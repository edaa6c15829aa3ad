//! Lookup and inspection services the profile store consults.
//!
//! Each concern sits behind its own trait so a host can plug in real
//! geolocation databases, resolvers or DPI engines. The implementations in
//! this module are local-only defaults.

use crate::decoder::HandshakeInspector;
use crate::error::ResolveError;
use crate::observation::Observation;
use crate::profile::{Location, Profile, ProtocolDetail};
use std::collections::HashMap;
use std::sync::Arc;

pub mod classify;
pub mod dns;
pub mod fingerprint;

pub use classify::PortClassifier;
pub use dns::PassiveDns;
pub use fingerprint::FingerprintTable;

pub trait Geolocator: Send + Sync {
    /// `Ok(None)` when the address is simply not in the database.
    fn locate(&self, address: &str) -> Result<Option<Location>, ResolveError>;
}

pub trait NameResolver: Send + Sync {
    fn resolve(&self, address: &str, local_only: bool) -> Result<Vec<String>, ResolveError>;

    /// Lets a resolver learn from traffic before profiles are updated.
    fn observe(&self, _observation: &Observation) {}
}

pub trait FingerprintLabeler: Send + Sync {
    fn label(&self, hash: &str) -> String;
}

pub trait ProtocolClassifier: Send + Sync {
    /// One entry per distinct protocol detected in this packet.
    fn classify(&self, observation: &Observation) -> HashMap<String, ProtocolDetail>;

    /// Called once after the store's final flush.
    fn shutdown(&self) {}
}

pub trait TlsInspector: Send + Sync {
    /// Server name indication carried by a ClientHello.
    fn server_name(&self, observation: &Observation) -> Option<String>;

    /// Handshake fingerprint hash of a Client or Server Hello.
    fn fingerprint(&self, observation: &Observation) -> Option<String>;
}

pub trait MetricsRecorder: Send + Sync {
    fn record(&self, profile: &Profile);
}

pub struct NoGeolocation;

impl Geolocator for NoGeolocation {
    fn locate(&self, _address: &str) -> Result<Option<Location>, ResolveError> {
        Ok(None)
    }
}

#[derive(Clone)]
pub struct Collaborators {
    pub geolocator: Arc<dyn Geolocator>,
    pub names: Arc<dyn NameResolver>,
    pub labeler: Arc<dyn FingerprintLabeler>,
    pub classifier: Arc<dyn ProtocolClassifier>,
    pub tls: Arc<dyn TlsInspector>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            geolocator: Arc::new(NoGeolocation),
            names: Arc::new(PassiveDns::new()),
            labeler: Arc::new(FingerprintTable::new()),
            classifier: Arc::new(PortClassifier::default()),
            tls: Arc::new(HandshakeInspector),
        }
    }
}

impl Collaborators {
    pub fn with_geolocator(mut self, geolocator: Arc<dyn Geolocator>) -> Self {
        self.geolocator = geolocator;
        self
    }

    pub fn with_names(mut self, names: Arc<dyn NameResolver>) -> Self {
        self.names = names;
        self
    }

    pub fn with_labeler(mut self, labeler: Arc<dyn FingerprintLabeler>) -> Self {
        self.labeler = labeler;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ProtocolClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_tls(mut self, tls: Arc<dyn TlsInspector>) -> Self {
        self.tls = tls;
        self
    }
}

#[cfg(test)]
mod tests;
