use super::FingerprintLabeler;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Static fingerprint hash → software label table.
#[derive(Default)]
pub struct FingerprintTable {
    labels: RwLock<HashMap<String, String>>,
}

impl FingerprintTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_labels<I, K, V>(labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let table = labels
            .into_iter()
            .map(|(hash, label)| (hash.into(), label.into()))
            .collect();
        Self {
            labels: RwLock::new(table),
        }
    }

    pub fn insert(&self, hash: impl Into<String>, label: impl Into<String>) {
        self.labels.write().insert(hash.into(), label.into());
    }
}

impl FingerprintLabeler for FingerprintTable {
    fn label(&self, hash: &str) -> String {
        self.labels.read().get(hash).cloned().unwrap_or_default()
    }
}
