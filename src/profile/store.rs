use super::{LastSeenPolicy, PacketFacts, Profile};
use crate::decoder::decode_frame;
use crate::error::{Error, Result};
use crate::observation::Observation;
use crate::resolvers::{Collaborators, MetricsRecorder};
use crate::writer::RecordSink;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    /// Resolve DNS names from local data only.
    pub local_dns: bool,
    pub last_seen: LastSeenPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            local_dns: true,
            last_seen: LastSeenPolicy::default(),
        }
    }
}

/// A live profile together with its own lock.
pub struct ProfileEntry {
    profile: Mutex<Profile>,
    /// Set under the profile lock once the profile has been written out by
    /// eviction; updaters that raced with the eviction start over.
    retired: AtomicBool,
}

impl ProfileEntry {
    fn new(profile: Profile) -> Self {
        Self {
            profile: Mutex::new(profile),
            retired: AtomicBool::new(false),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Profile> {
        self.profile.lock()
    }

    pub fn snapshot(&self) -> Profile {
        self.profile.lock().clone()
    }
}

/// Concurrent address → profile registry.
///
/// Lookups take the store lock only briefly; merges run under the
/// individual profile lock so that unrelated addresses never contend. A miss
/// keeps the store lock across first-time resolution so that at most one
/// profile is ever created per address.
pub struct ProfileStore {
    profiles: Mutex<HashMap<String, Arc<ProfileEntry>>>,
    collaborators: Collaborators,
    config: StoreConfig,
    metrics: Option<Arc<dyn MetricsRecorder>>,
    records_written: AtomicU64,
}

impl ProfileStore {
    pub fn new(collaborators: Collaborators, config: StoreConfig) -> Self {
        Self {
            profiles: Mutex::new(HashMap::new()),
            collaborators,
            config,
            metrics: None,
            records_written: AtomicU64::new(0),
        }
    }

    pub fn with_metrics(mut self, recorder: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = Some(recorder);
        self
    }

    pub fn len(&self) -> usize {
        self.profiles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.lock().is_empty()
    }

    pub fn get(&self, address: &str) -> Option<Arc<ProfileEntry>> {
        self.profiles.lock().get(address).cloned()
    }

    pub fn records_written(&self) -> u64 {
        self.records_written.load(Ordering::Relaxed)
    }

    /// Folds `observation` into the profile for `address`, creating it on
    /// first sight. Returns `None` for an empty address.
    pub fn get_or_update(
        &self,
        address: &str,
        observation: &Observation,
    ) -> Option<Arc<ProfileEntry>> {
        if address.is_empty() {
            return None;
        }
        let facts = self.inspect(observation);

        loop {
            let mut profiles = self.profiles.lock();
            if let Some(entry) = profiles.get(address).cloned() {
                drop(profiles);

                let mut profile = entry.lock();
                if entry.retired.load(Ordering::Acquire) {
                    trace!(address, "Profile was evicted during update; retrying");
                    continue;
                }
                profile.merge(
                    observation,
                    &facts,
                    self.collaborators.labeler.as_ref(),
                    self.config.last_seen,
                );
                drop(profile);
                return Some(entry);
            }

            let profile = self.create_profile(address, observation, &facts);
            let entry = Arc::new(ProfileEntry::new(profile));
            profiles.insert(address.to_string(), Arc::clone(&entry));
            debug!(address, profiles = profiles.len(), "Created profile");
            return Some(entry);
        }
    }

    /// Decodes an Ethernet frame and updates the profiles of its source and
    /// destination addresses. Returns the number of profiles touched.
    pub fn observe_frame(&self, frame: &[u8], timestamp: f64) -> usize {
        let decoded = match decode_frame(frame, timestamp) {
            Ok(decoded) => decoded,
            Err(err) => {
                trace!(error = %err, "Skipping undecodable frame");
                return 0;
            }
        };

        self.collaborators.names.observe(&decoded.observation);

        let mut touched = 0;
        for ip in decoded.addresses() {
            if self
                .get_or_update(&ip.to_string(), &decoded.observation)
                .is_some()
            {
                touched += 1;
            }
        }
        touched
    }

    /// Writes every live profile to `sink`, each under its own lock.
    /// Profiles stay in the store. Returns the number of records written.
    pub fn flush(&self, sink: &dyn RecordSink<Profile>) -> Result<usize> {
        let entries: Vec<(String, Arc<ProfileEntry>)> = self
            .profiles
            .lock()
            .iter()
            .map(|(address, entry)| (address.clone(), Arc::clone(entry)))
            .collect();
        info!(profiles = entries.len(), "Flushing profiles");

        let mut written = 0;
        for (address, entry) in entries {
            let profile = entry.lock();
            if entry.retired.load(Ordering::Acquire) {
                continue;
            }
            self.finalize(&profile, sink).map_err(|source| {
                error!(address = %address, error = %source, "Failed to write profile during flush");
                Error::Flush {
                    address: address.clone(),
                    source: Box::new(source),
                }
            })?;
            written += 1;
        }
        Ok(written)
    }

    /// Final flush at teardown, followed by the classifier's shutdown hook.
    pub fn finish(self, sink: &dyn RecordSink<Profile>) -> Result<usize> {
        let written = self.flush(sink)?;
        self.collaborators.classifier.shutdown();
        info!(written, "Profile store finished");
        Ok(written)
    }

    /// Writes one profile and removes it from the store. Returns `false` if
    /// the address is unknown. On a write failure the profile stays live and
    /// untouched.
    ///
    /// The profile lock is held from the write until removal, so updaters
    /// either merge before the write or start a fresh profile after it.
    /// Lock order is profile then store; no other path holds the store lock
    /// while waiting for a profile lock.
    pub fn evict(&self, address: &str, sink: &dyn RecordSink<Profile>) -> Result<bool> {
        let Some(entry) = self.get(address) else {
            return Ok(false);
        };

        let profile = entry.lock();
        if entry.retired.load(Ordering::Acquire) {
            return Ok(false);
        }
        if let Err(err) = self.finalize(&profile, sink) {
            warn!(address, error = %err, "Failed to write evicted profile; keeping it");
            return Err(err);
        }

        let mut profiles = self.profiles.lock();
        if profiles
            .get(address)
            .is_some_and(|live| Arc::ptr_eq(live, &entry))
        {
            profiles.remove(address);
        }
        entry.retired.store(true, Ordering::Release);
        drop(profiles);
        drop(profile);

        debug!(address, "Evicted profile");
        Ok(true)
    }

    fn finalize(&self, profile: &Profile, sink: &dyn RecordSink<Profile>) -> Result<()> {
        if let Some(metrics) = &self.metrics {
            metrics.record(profile);
        }
        sink.write_record(profile)?;
        self.records_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn inspect(&self, observation: &Observation) -> PacketFacts {
        PacketFacts {
            server_name: self.collaborators.tls.server_name(observation),
            fingerprint: self.collaborators.tls.fingerprint(observation),
            protocols: self.collaborators.classifier.classify(observation),
        }
    }

    fn create_profile(&self, address: &str, observation: &Observation, facts: &PacketFacts) -> Profile {
        let geolocation = match self.collaborators.geolocator.locate(address) {
            Ok(location) => location,
            Err(err) => {
                warn!(address, error = %err, "Geolocation lookup failed");
                None
            }
        };

        let dns_names = match self
            .collaborators
            .names
            .resolve(address, self.config.local_dns)
        {
            Ok(names) => names,
            Err(err) => {
                warn!(address, error = %err, "DNS name lookup failed");
                Vec::new()
            }
        };

        Profile::create(
            address,
            observation,
            facts,
            geolocation,
            dns_names,
            self.collaborators.labeler.as_ref(),
        )
    }
}
