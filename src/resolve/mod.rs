//! Reference resolution: raw extracted facts -> final structured facts
//!
//! Resolution runs per program in two passes: build the position-ordered macro
//! variable trace, then resolve every candidate against it, the program's LIBNAME
//! bindings, the configured known librefs and the macro catalog.
//!
//! Nothing here fails on an unresolvable reference. Anything that cannot be
//! pinned down is stored with engine or target `unknown`.

pub mod libname;
pub mod trace;

use std::collections::HashMap;

use crate::catalog::MacroCatalog;
use crate::config::{ConfigError, ScanConfig};
use crate::extract::text::{has_placeholder, split_dataset_ref, unquote};
use crate::extract::{
    ExtractedFacts, IncludeDirective, MacroRef, PassThroughConnection, TableCandidate,
};
use crate::facts::{
    CredentialFinding, DependencyKind, DependencyTarget, Engine, OperationKind, ProgramDependency,
    ProgramFacts, ProgramRecord, TableOperation,
};

pub use libname::{LibnameBinding, LibnameTable, WriteScope};
pub use trace::{MacroVarTrace, Substitution};

/// Configuration-derived tables used by every resolution in a pass
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    pub known_librefs: HashMap<String, Engine>,
    pub write_scope: WriteScope,
    pub connection_bindings: Vec<(String, String)>,
}

impl ResolveOptions {
    pub fn from_config(config: &ScanConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            known_librefs: config.known_libref_engines()?,
            write_scope: WriteScope::new(&config.snowflake_write_scope),
            connection_bindings: config.connection_bindings(),
        })
    }
}

impl Default for ResolveOptions {
    fn default() -> Self {
        let config = ScanConfig::default();
        Self {
            known_librefs: HashMap::new(),
            write_scope: WriteScope::new(&config.snowflake_write_scope),
            connection_bindings: config.connection_bindings(),
        }
    }
}

/// Identity of the program being resolved
#[derive(Debug, Clone)]
pub struct ProgramMeta<'a> {
    pub path: &'a str,
    pub mtime: i64,
    pub scan_timestamp: &'a str,
}

/// A resolved table identifier with the components used for scope gating
struct ResolvedTable {
    table: String,
    engine: Engine,
    scope_components: Vec<String>,
}

impl ResolvedTable {
    fn new(table: String, engine: Engine) -> Self {
        Self {
            table,
            engine,
            scope_components: Vec::new(),
        }
    }
}

/// Per-program resolution state (trace and LIBNAME table built once)
pub struct ProgramResolver<'a> {
    facts: &'a ExtractedFacts,
    catalog: &'a MacroCatalog,
    options: &'a ResolveOptions,
    trace: MacroVarTrace,
    libnames: LibnameTable,
}

impl<'a> ProgramResolver<'a> {
    pub fn new(
        facts: &'a ExtractedFacts,
        catalog: &'a MacroCatalog,
        options: &'a ResolveOptions,
    ) -> Self {
        let trace = MacroVarTrace::build(facts, &options.connection_bindings);
        let libnames = LibnameTable::build(&facts.libnames, &trace);
        Self {
            facts,
            catalog,
            options,
            trace,
            libnames,
        }
    }

    /// Produce the complete fact set for the program
    pub fn resolve(&self, meta: &ProgramMeta<'_>) -> ProgramFacts {
        let mut operations: Vec<(usize, TableOperation)> = self
            .facts
            .table_writes
            .iter()
            .map(|c| (c.offset, self.table_operation(meta.path, c, OperationKind::Write)))
            .chain(
                self.facts
                    .table_reads
                    .iter()
                    .map(|c| (c.offset, self.table_operation(meta.path, c, OperationKind::Read))),
            )
            .collect();
        // Writes were chained first, so a stable sort keeps write-before-read on ties
        operations.sort_by_key(|(offset, _)| *offset);

        let mut dependencies: Vec<(usize, ProgramDependency)> = self
            .facts
            .includes
            .iter()
            .map(|inc| (inc.offset, self.include_dependency(meta.path, inc)))
            .chain(
                self.facts
                    .macro_calls
                    .iter()
                    .map(|call| (call.offset, self.macro_dependency(meta.path, call))),
            )
            .collect();
        dependencies.sort_by_key(|(offset, _)| *offset);

        let libnames = self
            .libnames
            .bindings()
            .iter()
            .map(|b| b.to_mapping(meta.path))
            .collect();

        let credential_findings = self
            .facts
            .credentials
            .iter()
            .map(|c| CredentialFinding {
                source_line: c.line,
                keyword: c.keyword.clone(),
                matched: c.value.clone(),
            })
            .collect();

        ProgramFacts {
            program: ProgramRecord {
                path: meta.path.to_string(),
                mtime: meta.mtime,
                scan_timestamp: meta.scan_timestamp.to_string(),
                credential_findings,
            },
            operations: operations.into_iter().map(|(_, op)| op).collect(),
            dependencies: dependencies.into_iter().map(|(_, d)| d).collect(),
            libnames,
        }
    }

    fn table_operation(
        &self,
        program: &str,
        candidate: &TableCandidate,
        operation: OperationKind,
    ) -> TableOperation {
        let resolved = self.resolve_table(candidate);
        let in_scope = operation == OperationKind::Read
            || resolved.engine != Engine::Snowflake
            || self
                .options
                .write_scope
                .contains(resolved.scope_components.iter().map(String::as_str));
        TableOperation {
            program: program.to_string(),
            table: resolved.table,
            engine: resolved.engine,
            operation,
            source_line: candidate.line,
            in_scope,
        }
    }

    /// Resolve a table candidate to an identifier and engine
    ///
    /// # Behavior
    /// Tried in order, first hit wins:
    /// 1. inside a pass-through block: the engine of the block's connection
    /// 2. libref still holding a macro reference: `unknown.<table>` / `unknown`
    /// 3. a LIBNAME binding for the libref
    /// 4. a configured known libref
    /// 5. `work` or a one-level name: `work`
    /// 6. otherwise `<libref>.<table>` / `unknown`
    ///
    /// A quoted physical path is a `base` table named by the path. A numbered
    /// range `lib.a1-lib.a3` resolves through its first member and keeps the
    /// range in the table name.
    fn resolve_table(&self, candidate: &TableCandidate) -> ResolvedTable {
        let substituted = self.trace.substitute(&candidate.reference, candidate.offset);
        if let Some(path) = physical_path(&substituted.text) {
            // Table identifiers are stored lower-cased, paths included
            return ResolvedTable::new(path.to_ascii_lowercase(), Engine::Base);
        }
        match split_range(&candidate.reference) {
            Some((first, last)) => {
                let first = self.trace.substitute(first, candidate.offset);
                let last = self.trace.substitute(last, candidate.offset);
                let mut resolved = self.resolve_member(candidate, &first.text);
                let last = split_dataset_ref(&last.text)
                    .pop()
                    .unwrap_or_default()
                    .replace('"', "")
                    .to_ascii_lowercase();
                resolved.table = format!("{}-{}", resolved.table, last);
                resolved
            }
            None => self.resolve_member(candidate, &substituted.text),
        }
    }

    fn resolve_member(&self, candidate: &TableCandidate, reference: &str) -> ResolvedTable {
        let parts: Vec<String> = split_dataset_ref(reference)
            .into_iter()
            .map(|p| p.replace('"', "").to_ascii_lowercase())
            .filter(|p| !p.is_empty())
            .collect();

        if let Some(region) = candidate.region {
            let engine = self.region_engine(region);
            let scope_components = match parts.len() {
                0 | 1 => Vec::new(),
                2 => vec![parts[0].clone()],
                n => vec![parts[n - 3].clone(), parts[n - 2].clone()],
            };
            return ResolvedTable {
                table: parts.join("."),
                engine,
                scope_components,
            };
        }

        let (libref, table) = match parts.as_slice() {
            [] => return ResolvedTable::new(crate::facts::UNKNOWN.to_string(), Engine::Unknown),
            [name] => {
                if has_placeholder(name) {
                    return ResolvedTable::new(format!("unknown.{}", name), Engine::Unknown);
                }
                return ResolvedTable::new(format!("work.{}", name), Engine::Work);
            }
            [libref, rest @ ..] => (libref.as_str(), rest.join(".")),
        };

        if has_placeholder(libref) {
            return ResolvedTable::new(format!("unknown.{}", table), Engine::Unknown);
        }

        if let Some(binding) = self.libnames.binding_for(libref, candidate.offset) {
            return match binding.engine {
                Engine::Oracle => {
                    let schema = binding.schema.as_deref().unwrap_or(libref);
                    ResolvedTable::new(format!("{}.{}", schema, table), Engine::Oracle)
                }
                Engine::Snowflake if !binding.is_unresolved() => {
                    let components: Vec<String> = binding
                        .database
                        .iter()
                        .chain(binding.schema.iter())
                        .cloned()
                        .collect();
                    let mut qualified = components.join(".");
                    qualified.push('.');
                    qualified.push_str(&table);
                    ResolvedTable {
                        table: qualified,
                        engine: Engine::Snowflake,
                        scope_components: components,
                    }
                }
                engine => ResolvedTable::new(format!("{}.{}", libref, table), engine),
            };
        }

        if let Some(engine) = self.options.known_librefs.get(libref) {
            return ResolvedTable {
                table: format!("{}.{}", libref, table),
                engine: *engine,
                scope_components: vec![libref.to_string()],
            };
        }

        if libref == "work" {
            return ResolvedTable::new(format!("work.{}", table), Engine::Work);
        }

        ResolvedTable::new(format!("{}.{}", libref, table), Engine::Unknown)
    }

    /// Engine of the connection a pass-through block runs against
    ///
    /// A block names its connection alias; without one, the latest connection
    /// opened before the block is used.
    fn region_engine(&self, region_idx: usize) -> Engine {
        let Some(region) = self.facts.regions.get(region_idx) else {
            return Engine::Unknown;
        };
        let connection: Option<&PassThroughConnection> = match &region.alias {
            Some(alias) => {
                let matching: Vec<&PassThroughConnection> = self
                    .facts
                    .connections
                    .iter()
                    .filter(|c| c.alias == *alias)
                    .collect();
                matching
                    .iter()
                    .rev()
                    .find(|c| c.offset <= region.start)
                    .or_else(|| matching.first())
                    .copied()
            }
            None => self
                .facts
                .connections
                .iter()
                .filter(|c| c.offset <= region.start)
                .last(),
        };

        match connection {
            Some(conn) => match (&conn.engine, &conn.using_libref) {
                (Some(token), _) => {
                    let engine = Engine::from_sas_token(token);
                    if engine == Engine::Unknown {
                        // CONNECT TO with an alias-only token such as a libref name
                        self.libnames
                            .binding_for(token, conn.offset)
                            .map_or(Engine::Unknown, |b| b.engine)
                    } else {
                        engine
                    }
                }
                (None, Some(libref)) => self
                    .libnames
                    .binding_for(libref, conn.offset)
                    .map_or(Engine::Unknown, |b| b.engine),
                (None, None) => Engine::Unknown,
            },
            None => Engine::Unknown,
        }
    }

    fn include_dependency(&self, program: &str, inc: &IncludeDirective) -> ProgramDependency {
        let substituted = self.trace.substitute(&inc.path, inc.offset);
        let target = if !substituted.unresolved && is_path_like(&substituted.text) {
            DependencyTarget::Program(substituted.text)
        } else {
            DependencyTarget::Unknown
        };
        ProgramDependency {
            source: program.to_string(),
            target,
            kind: DependencyKind::Include,
            reference: inc.path.clone(),
            source_line: inc.line,
        }
    }

    /// `%name` looks `name` up in the catalog; `%&var` first expands `var` as
    /// seen from the call and stores the expanded name as its reference
    fn macro_dependency(&self, program: &str, call: &MacroRef) -> ProgramDependency {
        let name = if has_placeholder(&call.name) {
            self.dynamic_macro_name(call)
        } else {
            Some(call.name.clone())
        };
        let target = match name.as_deref().and_then(|n| self.catalog.lookup(n)) {
            Some(path) => DependencyTarget::Program(path.to_string()),
            None => DependencyTarget::Unknown,
        };
        ProgramDependency {
            source: program.to_string(),
            target,
            kind: DependencyKind::MacroCall,
            reference: name.unwrap_or_else(|| call.name.clone()),
            source_line: call.line,
        }
    }

    fn dynamic_macro_name(&self, call: &MacroRef) -> Option<String> {
        let substituted = self.trace.substitute(&call.name, call.offset);
        if substituted.unresolved {
            return None;
        }
        let name: String = substituted
            .text
            .trim()
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        (!name.is_empty()).then_some(name)
    }
}

/// Resolve one program's extracted facts
pub fn resolve_program(
    meta: &ProgramMeta<'_>,
    facts: &ExtractedFacts,
    catalog: &MacroCatalog,
    options: &ResolveOptions,
) -> ProgramFacts {
    ProgramResolver::new(facts, catalog, options).resolve(meta)
}

/// The path inside a quoted dataset reference such as `'/data/x.sas7bdat'`
fn physical_path(reference: &str) -> Option<&str> {
    let inner = unquote(reference);
    let quoted = inner.len() < reference.trim().len();
    (quoted && (is_path_like(inner) || inner.to_ascii_lowercase().ends_with(".sas7bdat")))
        .then_some(inner)
}

/// Halves of a numbered range list `a1-a3`, split at the first unquoted `-`
fn split_range(reference: &str) -> Option<(&str, &str)> {
    let mut quote = None;
    for (i, c) in reference.char_indices() {
        match (quote, c) {
            (None, '"') | (None, '\'') => quote = Some(c),
            (Some(q), _) if c == q => quote = None,
            (None, '-') => return Some((&reference[..i], &reference[i + 1..])),
            _ => {}
        }
    }
    None
}

/// Include targets that look like a file path rather than a fileref
pub fn is_path_like(s: &str) -> bool {
    s.contains('/') || s.contains('\\') || s.to_ascii_lowercase().ends_with(".sas")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MacroCatalogBuilder;
    use crate::extract::extract;
    use crate::facts::ResolutionSource;

    fn resolve_with(src: &str, catalog: &MacroCatalog, options: &ResolveOptions) -> ProgramFacts {
        let facts = extract(src);
        let meta = ProgramMeta {
            path: "/prod/jobs/job.sas",
            mtime: 100,
            scan_timestamp: "2026-01-01T00:00:00Z",
        };
        resolve_program(&meta, &facts, catalog, options)
    }

    fn resolve(src: &str) -> ProgramFacts {
        resolve_with(src, &MacroCatalog::default(), &ResolveOptions::default())
    }

    fn ops(facts: &ProgramFacts) -> Vec<(String, Engine, OperationKind, bool)> {
        facts
            .operations
            .iter()
            .map(|o| (o.table.clone(), o.engine, o.operation, o.in_scope))
            .collect()
    }

    #[test]
    fn test_oracle_libname_resolution() {
        let f = resolve("libname dw oracle path=prod schema=DBO;\ndata dw.Customers; set dw.raw; run;");
        assert_eq!(
            ops(&f),
            vec![
                ("dbo.customers".to_string(), Engine::Oracle, OperationKind::Write, true),
                ("dbo.raw".to_string(), Engine::Oracle, OperationKind::Read, true),
            ]
        );
        assert_eq!(f.libnames.len(), 1);
        assert_eq!(f.libnames[0].resolution, ResolutionSource::Static);
    }

    #[test]
    fn test_snowflake_scope_gating() {
        let src = "%let sch = DATALAB_ILSNP;\n\
                   libname good snow database=SOME_DB schema=&sch;\n\
                   libname bad snow database=SOME_DB schema=SOME_OTHER_SCHEMA;\n\
                   data good.t1; set bad.src; run;\n\
                   data bad.t2; run;";
        let f = resolve(src);
        assert_eq!(
            ops(&f),
            vec![
                ("some_db.datalab_ilsnp.t1".to_string(), Engine::Snowflake, OperationKind::Write, true),
                ("some_db.some_other_schema.src".to_string(), Engine::Snowflake, OperationKind::Read, true),
                ("some_db.some_other_schema.t2".to_string(), Engine::Snowflake, OperationKind::Write, false),
            ]
        );
        assert_eq!(f.libnames[0].resolution, ResolutionSource::MacroVariableTrace);
        assert_eq!(f.libnames[0].target.as_deref(), Some("some_db.datalab_ilsnp"));
    }

    #[test]
    fn test_connection_macro_scopes_writes() {
        let src = "%datalab_connections;\nlibname sf snow database=&sf_database schema=&sf_schema;\ndata sf.out; run;";
        let f = resolve(src);
        assert_eq!(f.operations[0].table, "lis_dtalab_wrkgrp_spc_db.dl_t1_ils_analytics.out");
        assert!(f.operations[0].in_scope);
        assert!(f.dependencies.is_empty());
    }

    #[test]
    fn test_unresolved_snowflake_libname_is_out_of_scope() {
        let f = resolve("libname sf snow database=&missing schema=x;\ndata sf.out; run;");
        assert_eq!(
            ops(&f),
            vec![("sf.out".to_string(), Engine::Snowflake, OperationKind::Write, false)]
        );
        assert_eq!(f.libnames[0].resolution, ResolutionSource::Unknown);
    }

    #[test]
    fn test_fallback_order() {
        let mut options = ResolveOptions::default();
        options.known_librefs.insert("dwh".to_string(), Engine::Oracle);
        let src = "data one; set work.two dwh.three other.four &lib..five; run;";
        let f = resolve_with(src, &MacroCatalog::default(), &options);
        assert_eq!(
            ops(&f),
            vec![
                ("work.one".to_string(), Engine::Work, OperationKind::Write, true),
                ("work.two".to_string(), Engine::Work, OperationKind::Read, true),
                ("dwh.three".to_string(), Engine::Oracle, OperationKind::Read, true),
                ("other.four".to_string(), Engine::Unknown, OperationKind::Read, true),
                ("unknown.five".to_string(), Engine::Unknown, OperationKind::Read, true),
            ]
        );
    }

    #[test]
    fn test_macro_variable_libref_resolved_by_position() {
        let src = "%let lib = dw;\nlibname dw oracle schema=ods;\ndata &lib..a; run;\n%let lib = elsewhere;\ndata &lib..b; run;";
        let f = resolve(src);
        let tables: Vec<_> = f.operations.iter().map(|o| o.table.as_str()).collect();
        assert_eq!(tables, vec!["ods.a", "elsewhere.b"]);
    }

    #[test]
    fn test_pass_through_uses_connection_engine() {
        let src = "proc sql;\nconnect to snowflake as sf (server=x);\nexecute(insert into DATALAB_ILSNP.target select * from raw_db.stage.src) by sf;\nexecute(create table other.x (id int)) by sf;\nquit;";
        let f = resolve(src);
        assert_eq!(
            ops(&f),
            vec![
                ("datalab_ilsnp.target".to_string(), Engine::Snowflake, OperationKind::Write, true),
                ("raw_db.stage.src".to_string(), Engine::Snowflake, OperationKind::Read, true),
                ("other.x".to_string(), Engine::Snowflake, OperationKind::Write, false),
            ]
        );
    }

    #[test]
    fn test_includes() {
        let src = "%let root = /prod/common;\n%include \"&root/setup.sas\";\n%include myfref;\n%include \"&nowhere/x.sas\";";
        let f = resolve(src);
        let deps: Vec<_> = f
            .dependencies
            .iter()
            .map(|d| (d.target.clone(), d.reference.as_str(), d.source_line))
            .collect();
        assert_eq!(
            deps,
            vec![
                (DependencyTarget::Program("/prod/common/setup.sas".to_string()), "&root/setup.sas", 2),
                (DependencyTarget::Unknown, "myfref", 3),
                (DependencyTarget::Unknown, "&nowhere/x.sas", 4),
            ]
        );
    }

    #[test]
    fn test_macro_calls_against_catalog() {
        let mut builder = MacroCatalogBuilder::new();
        builder.add_program(
            "/prod/macros/load.sas",
            &[MacroRef {
                name: "load_data".to_string(),
                offset: 0,
                line: 1,
            }],
        );
        let catalog = builder.build();
        let f = resolve_with("%LOAD_DATA(x=1);\n%not_there;", &catalog, &ResolveOptions::default());
        assert_eq!(f.dependencies.len(), 2);
        assert_eq!(
            f.dependencies[0].target,
            DependencyTarget::Program("/prod/macros/load.sas".to_string())
        );
        assert_eq!(f.dependencies[0].kind, DependencyKind::MacroCall);
        assert!(f.dependencies[1].target.is_unknown());
        assert_eq!(f.dependencies[1].reference, "not_there");
    }

    #[test]
    fn test_dynamic_macro_call_resolved_through_trace() {
        let mut builder = MacroCatalogBuilder::new();
        builder.add_program(
            "/prod/macros/load.sas",
            &[MacroRef {
                name: "load_data".to_string(),
                offset: 0,
                line: 1,
            }],
        );
        let catalog = builder.build();
        let src = "%&m;\n%let m = load_data;\n%&m;\n%let m = nowhere;\n%&m.;";
        let f = resolve_with(src, &catalog, &ResolveOptions::default());
        let deps: Vec<_> = f
            .dependencies
            .iter()
            .map(|d| (d.target.clone(), d.reference.as_str(), d.kind))
            .collect();
        assert_eq!(
            deps,
            vec![
                (DependencyTarget::Unknown, "&m", DependencyKind::MacroCall),
                (
                    DependencyTarget::Program("/prod/macros/load.sas".to_string()),
                    "load_data",
                    DependencyKind::MacroCall
                ),
                (DependencyTarget::Unknown, "nowhere", DependencyKind::MacroCall),
            ]
        );
    }

    #[test]
    fn test_range_prefix_and_physical_path_tables() {
        let src = "libname dw oracle schema=ods;\n\
                   data all; set sales1-sales3 dw.m1-dw.m3 dw.jan: '/d/X.sas7bdat'; run;";
        let f = resolve(src);
        assert_eq!(
            ops(&f),
            vec![
                ("work.all".to_string(), Engine::Work, OperationKind::Write, true),
                ("work.sales1-sales3".to_string(), Engine::Work, OperationKind::Read, true),
                ("ods.m1-m3".to_string(), Engine::Oracle, OperationKind::Read, true),
                ("ods.jan:".to_string(), Engine::Oracle, OperationKind::Read, true),
                ("/d/x.sas7bdat".to_string(), Engine::Base, OperationKind::Read, true),
            ]
        );
    }

    #[test]
    fn test_credentials_pass_through() {
        let f = resolve("libname o oracle user=scott password=tiger;");
        let found: Vec<_> = f
            .program
            .credential_findings
            .iter()
            .map(|c| (c.keyword.as_str(), c.matched.as_str()))
            .collect();
        assert_eq!(found, vec![("user", "scott"), ("password", "tiger")]);
    }

    #[test]
    fn test_every_candidate_yields_one_fact() {
        let src = "data a b c; set d e; run; proc sql; create table f as select * from g, h join i on 1=1; quit;";
        let raw = extract(src);
        let f = resolve(src);
        assert_eq!(f.operations.len(), raw.table_writes.len() + raw.table_reads.len());
        assert_eq!(f.operations.len(), 9);
    }
}
