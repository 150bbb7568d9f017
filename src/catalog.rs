//! Macro catalog: macro name -> defining program in the macro root
//!
//! The catalog is rebuilt every scan pass from the macro root's extraction
//! results and then frozen. Resolution of any program, including the macro-root
//! programs themselves, only starts once the frozen catalog is available.

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;
use tracing::warn;

use crate::extract::MacroRef;
use crate::scan::ScanError;

/// A macro name defined by more than one macro-root program
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DuplicateMacro {
    pub name: String,
    /// Program whose definition is kept
    pub kept: String,
    pub ignored: String,
}

/// Collects definitions from macro-root programs in any order
#[derive(Debug, Default)]
pub struct MacroCatalogBuilder {
    /// program path -> lower-cased macro names it defines
    definitions: BTreeMap<String, Vec<String>>,
    incomplete: bool,
}

impl MacroCatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_program(&mut self, path: &str, defs: &[MacroRef]) {
        let names = self.definitions.entry(path.to_string()).or_default();
        names.extend(defs.iter().map(|d| d.name.to_ascii_lowercase()));
    }

    /// Record that a macro-root program could not be read this pass
    pub fn mark_incomplete(&mut self) {
        self.incomplete = true;
    }

    /// Freeze the catalog
    ///
    /// Programs are applied in sorted path order, so the first program in that
    /// order wins a duplicate name regardless of the order they were added in.
    pub fn build(self) -> MacroCatalog {
        let mut entries: HashMap<String, String> = HashMap::new();
        let mut duplicates = Vec::new();

        for (path, names) in self.definitions {
            for name in names {
                match entries.get(&name) {
                    Some(kept) if *kept == path => {}
                    Some(kept) => {
                        warn!(
                            macro_name = %name,
                            kept = %kept,
                            ignored = %path,
                            "Duplicate macro definition in macro root"
                        );
                        duplicates.push(DuplicateMacro {
                            name,
                            kept: kept.clone(),
                            ignored: path.clone(),
                        });
                    }
                    None => {
                        entries.insert(name, path.clone());
                    }
                }
            }
        }

        MacroCatalog {
            entries,
            duplicates,
            complete: !self.incomplete,
        }
    }
}

/// Immutable macro catalog for one scan pass
#[derive(Debug, Clone, Default)]
pub struct MacroCatalog {
    entries: HashMap<String, String>,
    duplicates: Vec<DuplicateMacro>,
    complete: bool,
}

impl MacroCatalog {
    /// Defining program of `name` (case-insensitive)
    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn duplicates(&self) -> &[DuplicateMacro] {
        &self.duplicates
    }

    /// False when a macro-root program could not be read this pass
    pub fn is_complete(&self) -> bool {
        self.complete
    }
}

/// Write-once holder for the pass's catalog
///
/// Resolution asks the slot for the catalog; asking before the macro-root
/// barrier has filled it is an ordering violation.
#[derive(Debug, Default)]
pub struct CatalogSlot {
    inner: OnceLock<MacroCatalog>,
}

impl CatalogSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the catalog; a second publish is an ordering violation
    pub fn publish(&self, catalog: MacroCatalog) -> Result<&MacroCatalog, ScanError> {
        self.inner
            .set(catalog)
            .map_err(|_| ScanError::OrderingViolation("macro catalog published twice".into()))?;
        self.get()
    }

    pub fn get(&self) -> Result<&MacroCatalog, ScanError> {
        self.inner.get().ok_or_else(|| {
            ScanError::OrderingViolation("resolution requested before macro catalog was built".into())
        })
    }
}
