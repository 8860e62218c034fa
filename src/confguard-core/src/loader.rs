//! Configuration loader: bootstrap, staleness check, central update.
//!
//! ## Flow
//!
//! ```text
//! init_configuration()
//!   ├─ bootstrap      cache (if committed) or bundled default → verify → publish
//!   ├─ staleness      days since lastCheckedAt >= update interval?
//!   └─ central check  (single-flight per cache dir, bounded by fetch_timeout)
//!        ├─ probe signature ── identical ─→ advance lastCheckedAt
//!        └─ differs → fetch document + key → verify
//!             ├─ rejected  ─→ keep current, advance lastCheckedAt
//!             ├─ not newer ─→ keep current, advance lastCheckedAt
//!             └─ newer     ─→ commit cache, record metadata, publish
//! ```
//!
//! Transport failures and timeouts leave both timestamps untouched and are
//! returned as [`ConfigError::UpdateCheckFailed`]; the bootstrapped document
//! stays published.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

use chrono::{DateTime, Utc};
use confguard_crypto::constant_time_eq;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::artifacts::{ArtifactSource, ArtifactTriple, VerifiedTriple};
use crate::bundled::BundledSource;
use crate::cache::LocalCacheStore;
use crate::cell::{ConfigurationCell, ConfigurationHandle};
use crate::central::CentralRepository;
use crate::config::{BundledProperties, LoaderConfig};
use crate::document::{parse_meta, ConfigurationDocument, DocumentMeta};
use crate::error::ConfigError;
use crate::metadata::MetadataStore;
use crate::verifier::{normalize_signature, SignatureVerifier};

/// Loader lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoaderState {
    /// Nothing published yet.
    Uninitialized,
    /// A verified local document is published.
    Bootstrapped,
    /// The check interval has elapsed; a central check is about to run.
    StaleCheckPending,
    /// The published document is current as of the last completed check.
    Fresh,
    /// A newer central document is being committed.
    Updating,
    /// A newer central document was accepted.
    Updated,
    /// The last central check could not complete.
    UpdateSkipped,
}

/// What the central check concluded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpdateOutcome {
    /// The check interval has not elapsed; no network access.
    NotDue,
    /// The central signature matches the published one.
    Unchanged,
    /// A newer document was accepted.
    Updated {
        /// Previous serial.
        from: u64,
        /// Accepted serial.
        to: u64,
    },
    /// The central triple failed verification or was not a configuration.
    RejectedSignature,
    /// The central document verified but was not newer.
    RolledBack {
        /// Serial offered by the central service.
        candidate: u64,
        /// Serial kept.
        current: u64,
    },
    /// Another caller completed a check while this one waited.
    SatisfiedByConcurrentCheck,
}

impl fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotDue => f.write_str("not due"),
            Self::Unchanged => f.write_str("unchanged"),
            Self::Updated { from, to } => write!(f, "updated {} -> {}", from, to),
            Self::RejectedSignature => f.write_str("rejected (verification failed)"),
            Self::RolledBack { candidate, current } => {
                write!(f, "rejected rollback to {} (current {})", candidate, current)
            },
            Self::SatisfiedByConcurrentCheck => f.write_str("satisfied by concurrent check"),
        }
    }
}

/// Result of a successful [`ConfigurationLoader::init_configuration`].
#[derive(Debug, Clone)]
pub struct InitReport {
    /// The published document.
    pub document: Arc<ConfigurationDocument>,
    /// Origin of the published bytes.
    pub source: ArtifactSource,
    /// Central check result.
    pub update: UpdateOutcome,
}

/// Per-cache-directory single-flight slot.
///
/// `lock` spans a whole central check. `writes` is held, never across an
/// await, around every cache commit and metadata write, including the ones
/// made during bootstrap.
struct FlightSlot {
    lock: tokio::sync::Mutex<()>,
    writes: Mutex<()>,
    /// Number of central checks completed under `lock`.
    completed: AtomicU64,
}

impl FlightSlot {
    fn new() -> Self {
        Self {
            lock: tokio::sync::Mutex::new(()),
            writes: Mutex::new(()),
            completed: AtomicU64::new(0),
        }
    }

    fn writes(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Live slots only. An entry dies with the last loader call holding it.
fn flights() -> &'static Mutex<HashMap<PathBuf, Weak<FlightSlot>>> {
    static FLIGHTS: OnceLock<Mutex<HashMap<PathBuf, Weak<FlightSlot>>>> = OnceLock::new();
    FLIGHTS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Canonical form of `dir`, including a cache directory that does not exist
/// yet: the deepest existing ancestor is canonicalized and the rest appended.
fn slot_key(dir: &Path) -> PathBuf {
    let absolute = if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(dir))
            .unwrap_or_else(|_| dir.to_path_buf())
    };

    let mut missing = Vec::new();
    let mut cursor = absolute.as_path();
    loop {
        if let Ok(found) = std::fs::canonicalize(cursor) {
            return missing.iter().rev().fold(found, |acc, part| acc.join(part));
        }
        match (cursor.parent(), cursor.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                cursor = parent;
            },
            _ => return absolute,
        }
    }
}

fn flight_slot(cache_dir: &Path) -> Arc<FlightSlot> {
    let key = slot_key(cache_dir);
    let mut map = flights().lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(live) = map.get(&key).and_then(Weak::upgrade) {
        return live;
    }
    map.retain(|_, slot| slot.strong_count() > 0);
    let slot = Arc::new(FlightSlot::new());
    map.insert(key, Arc::downgrade(&slot));
    slot
}

/// Whole days since `last_checked`; `None` (never checked) is always stale.
fn is_stale(last_checked: Option<DateTime<Utc>>, interval_days: u32, now: DateTime<Utc>) -> bool {
    match last_checked {
        None => true,
        Some(at) => (now - at).num_days() >= i64::from(interval_days),
    }
}

/// Network phase result, produced inside the timeout.
enum Probe {
    Unchanged,
    Candidate(ArtifactTriple),
}

/// Sequences cache, bundled default, central service and the published cell.
pub struct ConfigurationLoader {
    config: LoaderConfig,
    bundled: BundledSource,
    central: Arc<dyn CentralRepository>,
    cache: LocalCacheStore,
    metadata: MetadataStore,
    verifier: SignatureVerifier,
    cell: Arc<ConfigurationCell>,
    state: Mutex<LoaderState>,
}

impl ConfigurationLoader {
    /// Create a loader. Nothing is read until the first call.
    pub fn new(
        config: LoaderConfig,
        bundled: BundledSource,
        central: Arc<dyn CentralRepository>,
    ) -> Self {
        Self {
            cache: LocalCacheStore::new(&config.cache_dir),
            metadata: MetadataStore::new(&config.metadata_path),
            config,
            bundled,
            central,
            verifier: SignatureVerifier::new(),
            cell: Arc::new(ConfigurationCell::new()),
            state: Mutex::new(LoaderState::Uninitialized),
        }
    }

    /// Read handle for consumers.
    pub fn handle(&self) -> ConfigurationHandle {
        ConfigurationHandle::new(Arc::clone(&self.cell))
    }

    /// The last published document.
    pub fn current(&self) -> Result<Arc<ConfigurationDocument>, ConfigError> {
        self.cell.load().ok_or(ConfigError::NotInitialized)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LoaderState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: LoaderState) {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *guard != state {
            debug!(from = ?*guard, to = ?state, "Loader: state transition");
            *guard = state;
        }
    }

    /// Local cache store used by this loader.
    pub fn cache(&self) -> &LocalCacheStore {
        &self.cache
    }

    /// Metadata store used by this loader.
    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    /// Bootstrap, then run the central check if it is due.
    ///
    /// # Errors
    ///
    /// - `BundledVerificationFailed` / `BundledUnavailable` (fatal) when no
    ///   verified document can be published at all.
    /// - `UpdateCheckFailed` when the central service could not be reached;
    ///   the bootstrapped document stays published.
    #[instrument(skip(self), fields(cache = ?self.config.cache_dir))]
    pub async fn init_configuration(&self) -> Result<InitReport, ConfigError> {
        let properties = self.bundled.properties()?;
        let interval = self
            .config
            .update_interval_days
            .unwrap_or(properties.update_interval_days);

        self.bootstrap_with(&properties)?;
        let update = self.refresh(Some(interval)).await?;

        let document = self.current()?;
        info!(
            serial = document.serial(),
            source = %document.source(),
            update = %update,
            "Loader: configuration initialized"
        );
        Ok(InitReport {
            source: document.source(),
            document,
            update,
        })
    }

    /// Publish a verified local document without contacting the network.
    ///
    /// This is a full bootstrap: on a first run it seeds the cache from the
    /// bundled default and writes the initial metadata, exactly like
    /// [`init_configuration`](Self::init_configuration) minus the central
    /// check.
    ///
    /// # Errors
    ///
    /// Fatal bundled-default errors, or `PropertiesError` for a malformed
    /// bundled properties file.
    #[instrument(skip(self), fields(cache = ?self.config.cache_dir))]
    pub fn load_local(&self) -> Result<Arc<ConfigurationDocument>, ConfigError> {
        let properties = self.bundled.properties()?;
        self.bootstrap_with(&properties)
    }

    /// Run the central check now, ignoring the update interval.
    ///
    /// # Errors
    ///
    /// `NotInitialized` before a bootstrap, `UpdateCheckFailed` on transport
    /// failure.
    #[instrument(skip(self), fields(cache = ?self.config.cache_dir))]
    pub async fn check_for_update(&self) -> Result<UpdateOutcome, ConfigError> {
        self.current()?;
        self.refresh(None).await
    }

    fn bootstrap_with(
        &self,
        properties: &BundledProperties,
    ) -> Result<Arc<ConfigurationDocument>, ConfigError> {
        let slot = flight_slot(self.cache.dir());
        let _writes = slot.writes();
        let known = self.metadata.load();

        let cached = if self.cache.exists() {
            match self.open_cache() {
                Ok(found) => Some(found),
                Err(e) if e.is_cache_corruption() => {
                    warn!(error = %e, "Loader: cache corrupt, falling back to bundled default");
                    None
                },
                Err(e) => return Err(e),
            }
        } else {
            debug!("Loader: no committed cache");
            None
        };

        let known_serial = known
            .accepted_serial
            .into_iter()
            .chain(cached.as_ref().map(|(_, meta)| meta.serial))
            .max();
        let bundle_declared_newer = match (properties.version_serial, known_serial) {
            (Some(bundled), Some(known)) => bundled > known,
            _ => false,
        };

        let (verified, meta) = match cached {
            Some((verified, meta)) if !bundle_declared_newer => (verified, meta),
            cached => {
                let (bundled, bundled_meta) = self.open_bundled()?;
                match cached {
                    Some((verified, meta)) if meta.serial >= bundled_meta.serial => {
                        warn!(
                            declared = ?properties.version_serial,
                            bundled = bundled_meta.serial,
                            cached = meta.serial,
                            "Loader: bundled default is not newer than cache, keeping cache"
                        );
                        (verified, meta)
                    },
                    cached => {
                        if cached.is_some() {
                            info!(
                                serial = bundled_meta.serial,
                                "Loader: bundled default is newer than cache"
                            );
                        }
                        if let Err(e) = self.cache.commit_atomic(&bundled) {
                            warn!(error = %e, "Loader: could not seed cache from bundled default");
                        }
                        (bundled, bundled_meta)
                    },
                }
            },
        };

        let metadata = match self.metadata.reconcile(meta.issued_at, meta.serial) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "Loader: could not persist bootstrap metadata");
                let mut fallback = self.metadata.load();
                fallback.reconcile_with(meta.issued_at, meta.serial);
                fallback
            },
        };

        let document = ConfigurationDocument::from_verified(
            verified,
            metadata.last_checked_at.unwrap_or(meta.issued_at),
            metadata.last_updated_at.unwrap_or(meta.issued_at),
        )?;
        let published = self.cell.publish(document);
        self.set_state(LoaderState::Bootstrapped);

        info!(
            serial = published.serial(),
            source = %published.source(),
            "Loader: bootstrapped"
        );
        Ok(published)
    }

    fn open_cache(&self) -> Result<(VerifiedTriple, DocumentMeta), ConfigError> {
        let triple = self.cache.read()?;
        let verified = self.verifier.verify(triple)?;
        let meta = parse_meta(verified.document())?;
        Ok((verified, meta))
    }

    fn open_bundled(&self) -> Result<(VerifiedTriple, DocumentMeta), ConfigError> {
        let triple = self.bundled.read()?;
        let verified = self.verifier.verify(triple).map_err(|e| {
            warn!(error = %e, "Loader: bundled default failed verification");
            ConfigError::BundledVerificationFailed {
                reason: e.to_string(),
            }
        })?;
        let meta = parse_meta(verified.document()).map_err(|e| {
            ConfigError::BundledVerificationFailed {
                reason: e.to_string(),
            }
        })?;
        Ok((verified, meta))
    }

    /// Staleness decision plus central check. `None` forces the check.
    ///
    /// A caller that had to wait for the flight re-reads both the in-process
    /// completion counter and `lastCheckedAt`. If either moved, the check it
    /// wanted has already happened.
    async fn refresh(&self, interval_days: Option<u32>) -> Result<UpdateOutcome, ConfigError> {
        let slot = flight_slot(self.cache.dir());
        let generation = slot.completed.load(Ordering::Acquire);
        let checked_before = self.metadata.last_checked_at();
        if let Some(interval) = interval_days {
            if !is_stale(checked_before, interval, Utc::now()) {
                debug!(last_checked_at = ?checked_before, interval, "Loader: check not due");
                self.set_state(LoaderState::Fresh);
                return Ok(UpdateOutcome::NotDue);
            }
        }
        self.set_state(LoaderState::StaleCheckPending);

        let _guard = slot.lock.lock().await;

        let counter_moved = slot.completed.load(Ordering::Acquire) != generation;
        let checked_moved = matches!(
            (checked_before, self.metadata.last_checked_at()),
            (Some(before), Some(after)) if after > before
        );
        if counter_moved || checked_moved {
            info!(counter_moved, checked_moved, "Loader: check completed by a concurrent caller");
            self.adopt_concurrent_result()?;
            self.set_state(LoaderState::Fresh);
            return Ok(UpdateOutcome::SatisfiedByConcurrentCheck);
        }

        let current = self.current()?;
        let timeout = self.config.fetch_timeout;
        let probe = match tokio::time::timeout(timeout, self.probe(&current)).await {
            Ok(Ok(probe)) => probe,
            Ok(Err(e)) => {
                warn!(error = %e, "Loader: central check failed");
                self.set_state(LoaderState::UpdateSkipped);
                return Err(ConfigError::update_check_failed(e));
            },
            Err(_) => {
                warn!(after = ?timeout, "Loader: central check timed out");
                self.set_state(LoaderState::UpdateSkipped);
                return Err(ConfigError::update_check_failed(ConfigError::Timeout {
                    after: timeout,
                }));
            },
        };

        let outcome = {
            let _writes = slot.writes();
            self.apply(&current, probe)?
        };
        slot.completed.fetch_add(1, Ordering::AcqRel);
        Ok(outcome)
    }

    #[instrument(skip_all, fields(serial = current.serial()))]
    async fn probe(&self, current: &ConfigurationDocument) -> Result<Probe, ConfigError> {
        let signature = self.central.fetch_signature().await?;
        if constant_time_eq(
            &normalize_signature(&signature),
            current.artifacts().normalized_signature(),
        ) {
            debug!("Loader: central signature unchanged");
            return Ok(Probe::Unchanged);
        }

        debug!("Loader: central signature differs, fetching document");
        let document = self.central.fetch_configuration().await?;
        let public_key = self.central.fetch_public_key().await?;
        Ok(Probe::Candidate(ArtifactTriple::new(
            document.into_bytes(),
            public_key,
            signature,
            ArtifactSource::Central,
        )))
    }

    fn apply(
        &self,
        current: &ConfigurationDocument,
        probe: Probe,
    ) -> Result<UpdateOutcome, ConfigError> {
        let now = Utc::now();

        let candidate = match probe {
            Probe::Unchanged => {
                self.keep_current(current, now)?;
                return Ok(UpdateOutcome::Unchanged);
            },
            Probe::Candidate(triple) => triple,
        };

        let verified = match self.verifier.verify(candidate) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Loader: central configuration rejected");
                self.keep_current(current, now)?;
                return Ok(UpdateOutcome::RejectedSignature);
            },
        };
        let candidate_meta = match parse_meta(verified.document()) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "Loader: central configuration unparsable");
                self.keep_current(current, now)?;
                return Ok(UpdateOutcome::RejectedSignature);
            },
        };

        let accepted = self.metadata.accepted_serial();
        let newer = candidate_meta.serial > current.serial()
            && accepted.map_or(true, |a| candidate_meta.serial >= a);
        if !newer {
            warn!(
                candidate = candidate_meta.serial,
                current = current.serial(),
                accepted = ?accepted,
                "Loader: central configuration is not newer, discarding"
            );
            self.keep_current(current, now)?;
            return Ok(UpdateOutcome::RolledBack {
                candidate: candidate_meta.serial,
                current: current.serial(),
            });
        }

        self.set_state(LoaderState::Updating);
        self.cache.commit_atomic(&verified)?;
        self.metadata.record_accepted(now, candidate_meta.serial)?;
        let document = ConfigurationDocument::from_verified(verified, now, now)?;
        self.cell.publish(document);
        self.set_state(LoaderState::Updated);

        info!(
            from = current.serial(),
            to = candidate_meta.serial,
            "Loader: configuration updated"
        );
        self.set_state(LoaderState::Fresh);
        Ok(UpdateOutcome::Updated {
            from: current.serial(),
            to: candidate_meta.serial,
        })
    }

    /// Completed check without a new document: advance `lastCheckedAt` only.
    fn keep_current(&self, current: &ConfigurationDocument, now: DateTime<Utc>) -> Result<(), ConfigError> {
        self.metadata.set_last_checked_at(now)?;
        self.cell
            .publish(current.with_timestamps(now, current.last_updated_at()));
        self.set_state(LoaderState::Fresh);
        Ok(())
    }

    /// After another caller's check: pick up a newer committed cache and the
    /// refreshed timestamps.
    fn adopt_concurrent_result(&self) -> Result<(), ConfigError> {
        let current = self.current()?;
        let metadata = self.metadata.load();
        let checked = metadata.last_checked_at.unwrap_or(current.last_checked_at());
        let updated = metadata.last_updated_at.unwrap_or(current.last_updated_at());

        if let Ok((verified, meta)) = self.open_cache() {
            if meta.serial > current.serial() {
                let document = ConfigurationDocument::from_verified(verified, checked, updated)?;
                self.cell.publish(document);
                return Ok(());
            }
        }
        self.cell.publish(current.with_timestamps(checked, updated));
        Ok(())
    }
}

impl fmt::Debug for ConfigurationLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigurationLoader")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("bundled", &self.bundled)
            .finish_non_exhaustive()
    }
}
