//! LIBNAME bindings and Snowflake write-scope gating

use crate::extract::LibnameStatement;
use crate::facts::{Engine, LibnameMapping, ResolutionSource};

use super::trace::MacroVarTrace;

/// A resolved LIBNAME statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibnameBinding {
    pub libref: String,
    pub engine: Engine,
    pub resolution: ResolutionSource,
    /// Oracle schema (lower-case)
    pub schema: Option<String>,
    /// Snowflake database (lower-case)
    pub database: Option<String>,
    /// Physical path for base libraries
    pub path: Option<String>,
    pub offset: usize,
    pub line: usize,
}

impl LibnameBinding {
    /// Resolve one LIBNAME statement as seen from its own position
    ///
    /// # Behavior
    /// - `ORACLE`: schema from a literal `SCHEMA=`, else the libref; always `static`
    /// - `SNOW`/`SNOWFLAKE`: `DATABASE=`/`SCHEMA=` through the macro variable trace;
    ///   `static` when both were literal, `macro-variable-trace` when a reference
    ///   was substituted, `unknown` when one stayed unresolved
    /// - a quoted path or `BASE`/`V9`: engine `base`, `static`
    /// - anything else: engine and resolution `unknown`
    pub fn resolve(stmt: &LibnameStatement, trace: &MacroVarTrace) -> Self {
        let mut binding = LibnameBinding {
            libref: stmt.libref.clone(),
            engine: Engine::Unknown,
            resolution: ResolutionSource::Unknown,
            schema: None,
            database: None,
            path: stmt.path.clone(),
            offset: stmt.offset,
            line: stmt.line,
        };

        let engine = match &stmt.engine {
            Some(token) => Engine::from_sas_token(token),
            None if stmt.path.is_some() => Engine::Base,
            None => Engine::Unknown,
        };

        match engine {
            Engine::Oracle => {
                binding.engine = Engine::Oracle;
                binding.resolution = ResolutionSource::Static;
                let schema = stmt.option("schema").unwrap_or(&stmt.libref);
                binding.schema = Some(schema.to_ascii_lowercase());
            }
            Engine::Snowflake => {
                binding.engine = Engine::Snowflake;
                let database = stmt.option("database").or_else(|| stmt.option("db"));
                let schema = stmt.option("schema");
                if database.is_none() && schema.is_none() {
                    return binding;
                }

                let mut substituted = false;
                let mut unresolved = false;
                let mut resolve_part = |raw: Option<&str>| {
                    raw.map(|raw| {
                        let s = trace.substitute(raw, stmt.offset);
                        substituted |= s.substituted;
                        unresolved |= s.unresolved;
                        s.text.to_ascii_lowercase()
                    })
                };
                let database = resolve_part(database);
                let schema = resolve_part(schema);

                if unresolved {
                    binding.resolution = ResolutionSource::Unknown;
                } else {
                    binding.resolution = if substituted {
                        ResolutionSource::MacroVariableTrace
                    } else {
                        ResolutionSource::Static
                    };
                    binding.database = database;
                    binding.schema = schema;
                }
            }
            Engine::Base => {
                binding.engine = Engine::Base;
                binding.resolution = ResolutionSource::Static;
            }
            Engine::Work | Engine::Unknown => {}
        }
        binding
    }

    /// Snowflake binding whose database/schema could not be resolved
    pub fn is_unresolved(&self) -> bool {
        self.resolution == ResolutionSource::Unknown
    }

    /// Stored target: schema, path or `database.schema`
    pub fn target(&self) -> Option<String> {
        match self.engine {
            Engine::Oracle => self.schema.clone(),
            Engine::Snowflake => match (&self.database, &self.schema) {
                (Some(db), Some(schema)) => Some(format!("{}.{}", db, schema)),
                (Some(only), None) | (None, Some(only)) => Some(only.clone()),
                (None, None) => None,
            },
            _ => self.path.clone(),
        }
    }

    pub fn to_mapping(&self, program: &str) -> LibnameMapping {
        LibnameMapping {
            libref: self.libref.clone(),
            engine: self.engine,
            resolution: self.resolution,
            target: self.target(),
            source_program: program.to_string(),
            source_line: self.line,
        }
    }
}

/// All LIBNAME bindings of one program, ordered by position
#[derive(Debug, Clone, Default)]
pub struct LibnameTable {
    bindings: Vec<LibnameBinding>,
}

impl LibnameTable {
    pub fn build(statements: &[LibnameStatement], trace: &MacroVarTrace) -> Self {
        let mut bindings: Vec<LibnameBinding> = statements
            .iter()
            .map(|s| LibnameBinding::resolve(s, trace))
            .collect();
        bindings.sort_by_key(|b| b.offset);
        Self { bindings }
    }

    pub fn bindings(&self) -> &[LibnameBinding] {
        &self.bindings
    }

    /// Binding for `libref` as seen from `position`
    ///
    /// The latest LIBNAME for the libref at or before the position; when none
    /// precedes it, the earliest one in the program.
    pub fn binding_for(&self, libref: &str, position: usize) -> Option<&LibnameBinding> {
        let mut matching = self
            .bindings
            .iter()
            .filter(|b| b.libref.eq_ignore_ascii_case(libref));
        let first = matching.next()?;
        let mut best = if first.offset <= position { Some(first) } else { None };
        for b in matching {
            if b.offset <= position {
                best = Some(b);
            }
        }
        Some(best.unwrap_or(first))
    }
}

/// Snowflake write-scope check
///
/// A write is in scope when any of its database/schema components equals one
/// of the designated identifiers, ignoring case.
#[derive(Debug, Clone)]
pub struct WriteScope {
    designated: Vec<String>,
}

impl WriteScope {
    pub fn new<I, S>(designated: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            designated: designated
                .into_iter()
                .map(|s| s.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn contains<'a, I>(&self, components: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        components
            .into_iter()
            .any(|c| self.designated.iter().any(|d| d.eq_ignore_ascii_case(c)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::extract;

    fn table(src: &str) -> LibnameTable {
        let facts = extract(src);
        let trace = MacroVarTrace::build(&facts, &[]);
        LibnameTable::build(&facts.libnames, &trace)
    }

    #[test]
    fn test_oracle_static_schema() {
        let t = table("libname dw oracle path=prod schema='DBO' user=&u;");
        let b = &t.bindings()[0];
        assert_eq!(b.engine, Engine::Oracle);
        assert_eq!(b.resolution, ResolutionSource::Static);
        assert_eq!(b.target().as_deref(), Some("dbo"));

        let t = table("libname dw oracle path=prod;");
        assert_eq!(t.bindings()[0].target().as_deref(), Some("dw"));
    }

    #[test]
    fn test_snowflake_through_trace() {
        let t = table("%let db = MYDB;\n%let sch = MYSCH;\nlibname sf snow database=&db schema=&sch;");
        let b = &t.bindings()[0];
        assert_eq!(b.engine, Engine::Snowflake);
        assert_eq!(b.resolution, ResolutionSource::MacroVariableTrace);
        assert_eq!(b.target().as_deref(), Some("mydb.mysch"));
    }

    #[test]
    fn test_snowflake_literal_is_static() {
        let t = table("libname sf snowflake database=DB1 schema=S1;");
        assert_eq!(t.bindings()[0].resolution, ResolutionSource::Static);
    }

    #[test]
    fn test_snowflake_unresolved() {
        let t = table("libname sf snow database=&nowhere schema=S1;");
        let b = &t.bindings()[0];
        assert!(b.is_unresolved());
        assert_eq!(b.target(), None);
    }

    #[test]
    fn test_base_and_other_engines() {
        let t = table("libname loc '/data/x';\nlibname v v9 '/data/y';\nlibname od odbc dsn=foo;");
        let engines: Vec<_> = t.bindings().iter().map(|b| (b.engine, b.resolution)).collect();
        assert_eq!(
            engines,
            vec![
                (Engine::Base, ResolutionSource::Static),
                (Engine::Base, ResolutionSource::Static),
                (Engine::Unknown, ResolutionSource::Unknown),
            ]
        );
        assert_eq!(t.bindings()[0].target().as_deref(), Some("/data/x"));
    }

    #[test]
    fn test_binding_position_rules() {
        let src = "data a; set x.t; run;\nlibname x oracle schema=first;\ndata b; set x.t; run;\nlibname x oracle schema=second;\ndata c; set x.t; run;";
        let t = table(src);
        let at = |needle: &str| src.find(needle).unwrap();
        assert_eq!(t.binding_for("x", at("data a")).unwrap().schema.as_deref(), Some("first"));
        assert_eq!(t.binding_for("X", at("data b")).unwrap().schema.as_deref(), Some("first"));
        assert_eq!(t.binding_for("x", at("data c")).unwrap().schema.as_deref(), Some("second"));
        assert!(t.binding_for("y", 0).is_none());
    }

    #[test]
    fn test_write_scope() {
        let scope = WriteScope::new(["LIS_DTALAB_WRKGRP_SPC_DB", "DATALAB_ILSNP"]);
        assert!(scope.contains(["other_db", "datalab_ilsnp"]));
        assert!(scope.contains(["lis_dtalab_wrkgrp_spc_db"]));
        assert!(!scope.contains(["some_other_schema"]));
    }
}
