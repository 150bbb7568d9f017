//! File selection for one scan pass
//!
//! Pure decisions over a listing and the stored mtimes. Nothing here touches the
//! source or the store.

use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::catalog::MacroCatalog;
use crate::facts::{DependencyTarget, ProgramDependency};
use crate::source::RemoteEntry;

/// Why a program is re-extracted this pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    New,
    Modified,
    FullRescan,
    /// Unchanged source, but a macro it calls now resolves elsewhere
    CatalogChanged,
}

impl SelectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionReason::New => "new",
            SelectionReason::Modified => "modified",
            SelectionReason::FullRescan => "full_rescan",
            SelectionReason::CatalogChanged => "catalog_changed",
        }
    }
}

/// One program in the merged listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListedProgram {
    pub path: String,
    pub mtime: i64,
    /// Root whose listing supplied this entry
    pub root: String,
    pub in_macro_root: bool,
}

/// Merge per-root listings into one entry per path
///
/// # Arguments
/// * `per_root` - listings in processing order (macro root first)
/// * `macro_root` - normalized macro root
/// * `keep` - path filter (extensions, exclude globs)
///
/// # Guarantees
/// - A path listed under several roots appears once, taken from the first root
///   in processing order
/// - Output order is processing order, then listing order within a root
pub fn merge_listings<F>(
    per_root: Vec<(String, Vec<RemoteEntry>)>,
    macro_root: &str,
    keep: F,
) -> Vec<ListedProgram>
where
    F: Fn(&str) -> bool,
{
    let mut seen: HashSet<String> = HashSet::new();
    let mut merged = Vec::new();
    for (root, entries) in per_root {
        for entry in entries {
            if !keep(&entry.path) || !seen.insert(entry.path.clone()) {
                continue;
            }
            merged.push(ListedProgram {
                path: entry.path,
                mtime: entry.mtime,
                root: root.clone(),
                in_macro_root: root == macro_root,
            });
        }
    }
    merged
}

/// mtime gate
///
/// Selected when new, when strictly newer than stored, or always on a full
/// rescan. Equal or older mtimes keep the stored facts.
pub fn select(listed_mtime: i64, stored_mtime: Option<i64>, full_rescan: bool) -> Option<SelectionReason> {
    match stored_mtime {
        None => Some(SelectionReason::New),
        Some(_) if full_rescan => Some(SelectionReason::FullRescan),
        Some(stored) if listed_mtime > stored => Some(SelectionReason::Modified),
        Some(_) => None,
    }
}

/// Stored programs absent from the listing, sorted
pub fn missing_programs(listing: &[ListedProgram], stored: &HashMap<String, i64>) -> Vec<String> {
    let listed: HashSet<&str> = listing.iter().map(|p| p.path.as_str()).collect();
    let mut missing: Vec<String> = stored
        .keys()
        .filter(|path| !listed.contains(path.as_str()))
        .cloned()
        .collect();
    missing.sort();
    missing
}

/// Unselected programs whose stored macro-call targets disagree with `catalog`
///
/// `candidates` are the programs eligible for re-resolution (listed and not
/// already selected). Returns sorted, deduplicated paths.
pub fn catalog_drift(
    stored_calls: &[ProgramDependency],
    catalog: &MacroCatalog,
    candidates: &HashSet<&str>,
) -> Vec<String> {
    let mut drifted: Vec<String> = stored_calls
        .iter()
        .filter(|dep| candidates.contains(dep.source.as_str()))
        .filter(|dep| {
            let current = match catalog.lookup(&dep.reference) {
                Some(path) => DependencyTarget::Program(path.to_string()),
                None => DependencyTarget::Unknown,
            };
            current != dep.target
        })
        .map(|dep| dep.source.clone())
        .collect();
    drifted.sort();
    drifted.dedup();
    drifted
}
