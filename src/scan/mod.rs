//! Incremental scan controller
//!
//! One pass: list every root, decide per program whether stored facts are reused,
//! rebuild the macro catalog from the macro root, then extract, resolve and
//! persist every selected program on a worker pool.
//!
//! # Phases
//! 1. Listing and selection (mtime gate, full rescan, `missing` flags)
//! 2. Macro-root fetch and extraction, merged into the catalog (barrier)
//! 3. Catalog drift: unchanged programs whose macro calls now resolve elsewhere
//! 4. Fetch, extract, resolve and persist each selected program

pub mod plan;

use globset::GlobSet;
use rayon::prelude::*;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::catalog::{CatalogSlot, DuplicateMacro, MacroCatalogBuilder};
use crate::config::{ConfigError, ScanConfig};
use crate::error_codes;
use crate::extract::{extract, ExtractedFacts};
use crate::resolve::{resolve_program, ProgramMeta, ResolveOptions};
use crate::source::{is_under, read_with_retry, FileSource, RetryPolicy, SourceError};
use crate::store::{FactStore, ProgramFlag};

pub use plan::{ListedProgram, SelectionReason};

/// Progress callback: (programs processed, programs selected)
pub type ScanProgress<'a> = dyn Fn(usize, usize) + Send + Sync + 'a;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Ordering violation: {0}")]
    OrderingViolation(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Cannot list root {root}: {source}")]
    Listing {
        root: String,
        #[source]
        source: SourceError,
    },

    #[error("Store failure: {0}")]
    Store(String),

    #[error("Cannot start worker pool: {0}")]
    WorkerPool(String),
}

impl ScanError {
    pub fn code(&self) -> &'static str {
        match self {
            ScanError::OrderingViolation(_) => error_codes::SASMAP_SCN_001_ORDERING_VIOLATION,
            ScanError::Config(e) => e.code(),
            ScanError::Listing { .. } => error_codes::SASMAP_SRC_001_LIST_FAILED,
            ScanError::Store(_) => error_codes::SASMAP_SCN_002_STORE_FAILED,
            ScanError::WorkerPool(_) => error_codes::SASMAP_SCN_003_WORKER_POOL,
        }
    }
}

fn store_err(e: anyhow::Error) -> ScanError {
    ScanError::Store(format!("{:#}", e))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScannedProgram {
    pub path: String,
    pub reason: SelectionReason,
    pub operations: usize,
    pub dependencies: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedRead {
    pub path: String,
    pub error: String,
}

/// Outcome of one scan pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub scan_timestamp: String,
    /// Programs in the merged listing
    pub listed: usize,
    pub scanned: Vec<ScannedProgram>,
    /// Listed programs whose stored facts were reused
    pub unchanged: usize,
    /// Selected programs skipped after exhausting read retries
    pub failed: Vec<FailedRead>,
    /// Stored programs absent from the listing
    pub missing: Vec<String>,
    /// Previously missing programs listed again
    pub reappeared: Vec<String>,
    pub catalog_built: bool,
    pub catalog_size: usize,
    pub catalog_complete: bool,
    pub duplicate_macros: Vec<DuplicateMacro>,
    pub duration_ms: u64,
}

impl ScanReport {
    pub fn selected(&self) -> usize {
        self.scanned.len() + self.failed.len()
    }
}

enum Outcome {
    Persisted(ScannedProgram),
    ReadFailed(FailedRead),
}

/// Scan pass driver bound to one configuration, source and store
pub struct Scanner<'a> {
    config: &'a ScanConfig,
    source: Arc<dyn FileSource>,
    store: &'a dyn FactStore,
    options: ResolveOptions,
    policy: RetryPolicy,
    exclude: GlobSet,
}

impl<'a> Scanner<'a> {
    /// Validate the configuration and prepare the resolution tables
    pub fn new(
        config: &'a ScanConfig,
        source: Arc<dyn FileSource>,
        store: &'a dyn FactStore,
    ) -> Result<Self, ScanError> {
        config.validate()?;
        Ok(Self {
            config,
            source,
            store,
            options: ResolveOptions::from_config(config)?,
            policy: RetryPolicy::from_config(&config.remote),
            exclude: config.exclude_set()?,
        })
    }

    fn keep(&self, path: &str) -> bool {
        self.config.has_extension(path) && !self.exclude.is_match(path)
    }

    fn fetch(&self, path: &str) -> Result<String, SourceError> {
        read_with_retry(&self.source, path, &self.policy)
    }

    /// Run one pass
    ///
    /// # Returns
    /// The pass report; read failures are reported there, not as errors
    ///
    /// # Errors
    /// Listing failures, store failures and ordering violations abort the pass.
    /// Programs persisted before the abort keep their new facts.
    pub fn run(&self, progress: Option<&ScanProgress<'_>>) -> Result<ScanReport, ScanError> {
        let started = Instant::now();
        let mut report = ScanReport {
            scan_timestamp: chrono::Utc::now().to_rfc3339(),
            catalog_complete: true,
            ..ScanReport::default()
        };
        let macro_root = self.config.macro_root();

        let mut per_root = Vec::new();
        for root in self.config.ordered_roots() {
            let entries = self.source.list(&root).map_err(|source| ScanError::Listing {
                root: root.clone(),
                source,
            })?;
            debug!(root = %root, entries = entries.len(), "Root listed");
            per_root.push((root, entries));
        }
        let listing = plan::merge_listings(per_root, &macro_root, |p| self.keep(p));
        report.listed = listing.len();

        let stored = self.store.stored_mtimes().map_err(store_err)?;
        let mut selected: HashMap<&str, SelectionReason> = HashMap::new();
        for program in &listing {
            let stored_mtime = stored.get(&program.path).copied();
            if let Some(reason) = plan::select(program.mtime, stored_mtime, self.config.full_rescan) {
                debug!(path = %program.path, reason = reason.as_str(), "Selected");
                selected.insert(program.path.as_str(), reason);
            }
        }

        self.update_missing_flags(&listing, &stored, &mut report)?;

        // Barrier: the whole macro root is fetched and merged before any resolution
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .thread_name(|i| format!("sasmap-worker-{}", i))
            .build()
            .map_err(|e| ScanError::WorkerPool(e.to_string()))?;

        let slot = CatalogSlot::new();
        let macro_root_missing = report.missing.iter().any(|p| is_under(p, &macro_root));
        let mut prefetched: HashMap<String, Result<ExtractedFacts, SourceError>> = HashMap::new();
        if !selected.is_empty() || macro_root_missing {
            let macro_programs: Vec<&ListedProgram> =
                listing.iter().filter(|p| p.in_macro_root).collect();
            let fetched: Vec<(String, Result<ExtractedFacts, SourceError>)> = pool.install(|| {
                macro_programs
                    .par_iter()
                    .map(|p| (p.path.clone(), self.fetch(&p.path).map(|text| extract(&text))))
                    .collect()
            });

            let mut builder = MacroCatalogBuilder::new();
            for (path, result) in &fetched {
                match result {
                    Ok(facts) => builder.add_program(path, &facts.macro_defs),
                    Err(e) => {
                        warn!(path = %path, error = %e, "Macro root program unreadable; catalog incomplete");
                        builder.mark_incomplete();
                    }
                }
            }
            let catalog = slot.publish(builder.build())?;
            report.catalog_built = true;
            report.catalog_size = catalog.len();
            report.catalog_complete = catalog.is_complete();
            report.duplicate_macros = catalog.duplicates().to_vec();
            info!(
                macros = catalog.len(),
                programs = macro_programs.len(),
                complete = catalog.is_complete(),
                "Macro catalog built"
            );
            prefetched = fetched.into_iter().collect();
        }

        // Drift is only judged against a complete catalog
        if let Ok(catalog) = slot.get() {
            if catalog.is_complete() {
                let candidates: HashSet<&str> = listing
                    .iter()
                    .map(|p| p.path.as_str())
                    .filter(|p| !selected.contains_key(p))
                    .collect();
                let stored_calls = self.store.macro_call_dependencies().map_err(store_err)?;
                for path in plan::catalog_drift(&stored_calls, catalog, &candidates) {
                    if let Some(program) = listing.iter().find(|p| p.path == path) {
                        info!(path = %path, "Macro catalog changed; re-resolving");
                        selected.insert(program.path.as_str(), SelectionReason::CatalogChanged);
                    }
                }
            }
        }

        // Re-resolution of unchanged content never moves the stored mtime backwards
        let work: Vec<(&ListedProgram, SelectionReason, i64)> = listing
            .iter()
            .filter_map(|p| {
                selected.get(p.path.as_str()).map(|r| {
                    let mtime = match (r, stored.get(&p.path)) {
                        (SelectionReason::CatalogChanged, Some(&previous)) => previous.max(p.mtime),
                        _ => p.mtime,
                    };
                    (p, *r, mtime)
                })
            })
            .collect();
        report.unchanged = listing.len() - work.len();

        let total = work.len();
        let done = AtomicUsize::new(0);
        let scan_timestamp = report.scan_timestamp.clone();
        let outcomes: Vec<Outcome> = pool.install(|| {
            work.par_iter()
                .map(|(program, reason, mtime)| {
                    let outcome = self.process(
                        program,
                        *reason,
                        *mtime,
                        &slot,
                        &prefetched,
                        &scan_timestamp,
                    );
                    let n = done.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(cb) = progress {
                        cb(n, total);
                    }
                    outcome
                })
                .collect::<Result<Vec<_>, ScanError>>()
        })?;

        for outcome in outcomes {
            match outcome {
                Outcome::Persisted(scanned) => report.scanned.push(scanned),
                Outcome::ReadFailed(failed) => report.failed.push(failed),
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            listed = report.listed,
            scanned = report.scanned.len(),
            unchanged = report.unchanged,
            failed = report.failed.len(),
            missing = report.missing.len(),
            duration_ms = report.duration_ms,
            "Scan pass complete"
        );
        Ok(report)
    }

    /// Flag stored programs absent from the listing, clear flags of returning ones
    fn update_missing_flags(
        &self,
        listing: &[ListedProgram],
        stored: &HashMap<String, i64>,
        report: &mut ScanReport,
    ) -> Result<(), ScanError> {
        let previously_missing: HashSet<String> = self
            .store
            .flags()
            .map_err(store_err)?
            .into_iter()
            .filter(|f| f.flag == ProgramFlag::Missing)
            .map(|f| f.path)
            .collect();

        for program in listing {
            if previously_missing.contains(&program.path) {
                self.store
                    .clear_flag(&program.path, ProgramFlag::Missing)
                    .map_err(store_err)?;
                info!(path = %program.path, "Missing program reappeared");
                report.reappeared.push(program.path.clone());
            }
        }

        report.missing = plan::missing_programs(listing, stored);
        for path in &report.missing {
            if !previously_missing.contains(path) {
                warn!(path = %path, "Stored program no longer listed; flagged missing");
            }
            self.store
                .set_flag(path, ProgramFlag::Missing, Some("absent from listing"))
                .map_err(store_err)?;
        }
        Ok(())
    }

    /// Extract, resolve and persist one program
    fn process(
        &self,
        program: &ListedProgram,
        reason: SelectionReason,
        mtime: i64,
        slot: &CatalogSlot,
        prefetched: &HashMap<String, Result<ExtractedFacts, SourceError>>,
        scan_timestamp: &str,
    ) -> Result<Outcome, ScanError> {
        let extracted: Cow<'_, ExtractedFacts> = match prefetched.get(&program.path) {
            Some(Ok(facts)) => Cow::Borrowed(facts),
            Some(Err(e)) => return self.read_failed(program, e),
            None => match self.fetch(&program.path) {
                Ok(text) => Cow::Owned(extract(&text)),
                Err(e) => return self.read_failed(program, &e),
            },
        };

        let catalog = slot.get()?;
        let meta = ProgramMeta {
            path: &program.path,
            mtime,
            scan_timestamp,
        };
        let facts = resolve_program(&meta, &extracted, catalog, &self.options);
        self.store.replace_program_facts(&facts).map_err(store_err)?;

        debug!(
            path = %program.path,
            reason = reason.as_str(),
            operations = facts.operations.len(),
            dependencies = facts.dependencies.len(),
            "Program persisted"
        );
        Ok(Outcome::Persisted(ScannedProgram {
            path: program.path.clone(),
            reason,
            operations: facts.operations.len(),
            dependencies: facts.dependencies.len(),
        }))
    }

    fn read_failed(&self, program: &ListedProgram, error: &SourceError) -> Result<Outcome, ScanError> {
        let detail = error.to_string();
        warn!(
            path = %program.path,
            error = %detail,
            code = error_codes::SASMAP_SRC_002_READ_FAILED,
            "Read failed; keeping stored facts"
        );
        self.store
            .set_flag(&program.path, ProgramFlag::ReadFailed, Some(&detail))
            .map_err(store_err)?;
        Ok(Outcome::ReadFailed(FailedRead {
            path: program.path.clone(),
            error: detail,
        }))
    }
}

/// Run one scan pass
///
/// The configuration is validated first; an invalid configuration fails before
/// any listing or read.
pub fn run_scan(
    config: &ScanConfig,
    source: Arc<dyn FileSource>,
    store: &dyn FactStore,
    progress: Option<&ScanProgress<'_>>,
) -> Result<ScanReport, ScanError> {
    Scanner::new(config, source, store)?.run(progress)
}
