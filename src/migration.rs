//! Ordered probing of backends for the newest available document.
//!
//! Candidates, in priority order:
//! 1. primary backend, current schema
//! 2. primary backend, previous schema
//! 3. remote document store snapshot
//! 4. secondary fallback (compact backup)
//! 5. compiled defaults
//!
//! The first candidate that yields a document wins and is written back into
//! the primary backend, so the next start stops at step 1. A primary that
//! could not be read is never written back over: its bytes may still hold
//! the only copy of the catalog.

use crate::backends::{BackendKind, PersistenceBackend};
use crate::document::Document;
use crate::error::{Result, StoreError};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where a loaded document came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeSource {
    Primary,
    PrimaryLegacy,
    Remote,
    Fallback,
    Defaults,
}

impl fmt::Display for ProbeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProbeSource::Primary => "primary",
            ProbeSource::PrimaryLegacy => "primary-legacy",
            ProbeSource::Remote => "remote",
            ProbeSource::Fallback => "fallback",
            ProbeSource::Defaults => "defaults",
        };
        f.write_str(name)
    }
}

/// A candidate that failed to load.
#[derive(Debug)]
pub struct ProbeFailure {
    pub source: ProbeSource,
    pub backend: BackendKind,
    pub error: StoreError,
}

/// Result of running the chain.
#[derive(Debug)]
pub struct MigrationOutcome {
    pub document: Document,
    pub source: ProbeSource,
    pub failures: Vec<ProbeFailure>,
    /// Set when promoting the winner into the primary backend failed.
    pub backfill_error: Option<StoreError>,
}

impl MigrationOutcome {
    /// Every probed backend failed and the compiled defaults were used.
    pub fn all_backends_failed(&self) -> bool {
        self.source == ProbeSource::Defaults && !self.failures.is_empty()
    }

    /// The primary backend errored (as opposed to being empty).
    pub fn primary_unreadable(&self) -> bool {
        self.failures
            .iter()
            .any(|f| matches!(f.source, ProbeSource::Primary | ProbeSource::PrimaryLegacy))
    }
}

struct Probe {
    source: ProbeSource,
    backend: Arc<dyn PersistenceBackend>,
}

impl Probe {
    fn load(&self) -> Result<Option<Document>> {
        match self.source {
            ProbeSource::PrimaryLegacy => self.backend.load_legacy(),
            _ => self.backend.load(),
        }
    }
}

/// Strategy list over [`PersistenceBackend`]s.
#[derive(Clone)]
pub struct MigrationChain {
    primary: Arc<dyn PersistenceBackend>,
    remote: Option<Arc<dyn PersistenceBackend>>,
    fallback: Option<Arc<dyn PersistenceBackend>>,
}

impl MigrationChain {
    pub fn new(primary: Arc<dyn PersistenceBackend>) -> Self {
        Self {
            primary,
            remote: None,
            fallback: None,
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn PersistenceBackend>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn PersistenceBackend>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    fn probes(&self) -> Vec<Probe> {
        let mut probes = vec![
            Probe {
                source: ProbeSource::Primary,
                backend: Arc::clone(&self.primary),
            },
            Probe {
                source: ProbeSource::PrimaryLegacy,
                backend: Arc::clone(&self.primary),
            },
        ];
        if let Some(remote) = &self.remote {
            probes.push(Probe {
                source: ProbeSource::Remote,
                backend: Arc::clone(remote),
            });
        }
        if let Some(fallback) = &self.fallback {
            probes.push(Probe {
                source: ProbeSource::Fallback,
                backend: Arc::clone(fallback),
            });
        }
        probes
    }

    /// Probe every candidate in order and promote the winner.
    pub fn run(&self) -> MigrationOutcome {
        let mut outcome = self.discover();
        self.backfill(&mut outcome);
        outcome
    }

    /// Try every candidate in order without writing anything.
    pub fn discover(&self) -> MigrationOutcome {
        let mut failures = Vec::new();

        for probe in self.probes() {
            match probe.load() {
                Ok(Some(document)) => {
                    info!(source = %probe.source, backend = %probe.backend.kind(), "loaded document");
                    return MigrationOutcome {
                        document,
                        source: probe.source,
                        failures,
                        backfill_error: None,
                    };
                }
                Ok(None) => {
                    debug!(source = %probe.source, backend = %probe.backend.kind(), "no document");
                }
                Err(error) => {
                    warn!(
                        source = %probe.source,
                        backend = %probe.backend.kind(),
                        corrupt = error.is_corruption(),
                        %error,
                        "probe failed, trying next candidate"
                    );
                    failures.push(ProbeFailure {
                        source: probe.source,
                        backend: probe.backend.kind(),
                        error,
                    });
                }
            }
        }

        info!("no stored document found, using compiled defaults");
        MigrationOutcome {
            document: Document::seed(),
            source: ProbeSource::Defaults,
            failures,
            backfill_error: None,
        }
    }

    /// Write the winner of [`discover`](Self::discover) into the primary backend.
    ///
    /// Skipped when the primary itself won, and when it errored: only an
    /// empty primary is filled.
    pub fn backfill(&self, outcome: &mut MigrationOutcome) {
        if outcome.source == ProbeSource::Primary {
            return;
        }
        if outcome.primary_unreadable() {
            warn!(
                source = %outcome.source,
                backend = %self.primary.kind(),
                "primary backend unreadable, leaving its contents untouched"
            );
            return;
        }

        match self.primary.save(&outcome.document) {
            Ok(()) => {
                debug!(source = %outcome.source, backend = %self.primary.kind(), "back-filled primary backend");
            }
            Err(error) => {
                warn!(source = %outcome.source, %error, "failed to back-fill primary backend");
                outcome.backfill_error = Some(error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{LocalKvBackend, LocalKvStore, MemoryBackend};

    /// Backend whose every call fails.
    struct Broken;

    impl PersistenceBackend for Broken {
        fn kind(&self) -> BackendKind {
            BackendKind::DurableStore
        }
        fn load(&self) -> Result<Option<Document>> {
            Err(StoreError::BackendUnavailable("handle missing".into()))
        }
        fn save(&self, _document: &Document) -> Result<()> {
            Err(StoreError::BackendUnavailable("handle missing".into()))
        }
    }

    fn named(name: &str) -> Document {
        let mut doc = Document::seed();
        doc.settings.site_name = name.to_string();
        doc
    }

    #[test]
    fn test_fresh_chain_uses_defaults_and_backfills() {
        let primary = Arc::new(MemoryBackend::new());
        let chain = MigrationChain::new(primary.clone());

        let outcome = chain.run();
        assert_eq!(outcome.source, ProbeSource::Defaults);
        assert!(!outcome.all_backends_failed());
        assert_eq!(primary.load().unwrap(), Some(Document::seed()));

        // Next run short-circuits at the primary
        assert_eq!(chain.run().source, ProbeSource::Primary);
    }

    #[test]
    fn test_priority_order() {
        let primary = Arc::new(MemoryBackend::new());
        let remote = Arc::new(MemoryBackend::with_document(named("remote")));
        let fallback = Arc::new(MemoryBackend::with_document(named("fallback")));

        let chain = MigrationChain::new(primary.clone())
            .with_remote(remote)
            .with_fallback(fallback);

        let outcome = chain.run();
        assert_eq!(outcome.source, ProbeSource::Remote);
        assert_eq!(outcome.document.settings.site_name, "remote");
        assert_eq!(primary.load().unwrap().unwrap().settings.site_name, "remote");
    }

    #[test]
    fn test_legacy_key_is_promoted() {
        let kv = Arc::new(LocalKvStore::in_memory());
        kv.set("db_v2", r#"{"settings":{"siteName":"legacy"}}"#).unwrap();
        let primary = Arc::new(
            LocalKvBackend::new(kv.clone(), "db_v3").with_legacy_keys(vec!["db_v2".into()]),
        );

        let outcome = MigrationChain::new(primary).run();
        assert_eq!(outcome.source, ProbeSource::PrimaryLegacy);
        assert!(kv.get("db_v3").unwrap().is_some());
    }

    #[test]
    fn test_failures_advance_to_fallback() {
        let fallback = Arc::new(MemoryBackend::with_document(named("backup")));
        let chain = MigrationChain::new(Arc::new(Broken))
            .with_remote(Arc::new(Broken))
            .with_fallback(fallback);

        let outcome = chain.run();
        assert_eq!(outcome.source, ProbeSource::Fallback);
        // Primary current + remote failed; legacy uses the default `Ok(None)`
        assert_eq!(outcome.failures.len(), 2);
        assert!(outcome.primary_unreadable());
        // Unreadable primary is not written to
        assert!(outcome.backfill_error.is_none());
    }

    #[test]
    fn test_unreadable_primary_not_overwritten() {
        let kv = Arc::new(LocalKvStore::in_memory());
        kv.set("db_v3", "{\"settings\": 42, \"users\": [").unwrap();
        let primary = Arc::new(LocalKvBackend::new(kv.clone(), "db_v3"));
        let fallback = Arc::new(MemoryBackend::with_document(named("backup")));

        let outcome = MigrationChain::new(primary).with_fallback(fallback).run();
        assert_eq!(outcome.source, ProbeSource::Fallback);
        assert_eq!(
            kv.get("db_v3").unwrap().as_deref(),
            Some("{\"settings\": 42, \"users\": [")
        );
    }

    #[test]
    fn test_discover_writes_nothing() {
        let primary = Arc::new(MemoryBackend::new());
        let fallback = Arc::new(MemoryBackend::with_document(named("backup")));
        let chain = MigrationChain::new(primary.clone()).with_fallback(fallback);

        let mut outcome = chain.discover();
        assert_eq!(outcome.source, ProbeSource::Fallback);
        assert!(primary.is_empty());

        chain.backfill(&mut outcome);
        assert_eq!(primary.load().unwrap().unwrap().settings.site_name, "backup");
    }

    #[test]
    fn test_all_failed_reports_defaults() {
        let outcome = MigrationChain::new(Arc::new(Broken)).run();
        assert_eq!(outcome.source, ProbeSource::Defaults);
        assert!(outcome.all_backends_failed());
        assert_eq!(outcome.document, Document::seed());
    }
}
