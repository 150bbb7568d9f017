//! The fixed pattern table
//!
//! Every recognition rule the extractor knows is one [`PatternSpec`] row. Rows are
//! grouped by [`Category`] and compiled once; [`super::extract`] runs them all
//! through a single dispatch loop that interprets each row by its [`Shape`].

use once_cell::sync::Lazy;
use regex::Regex;

/// Dataset reference: one or more dot-separated levels, each built from name
/// characters, macro variable references (`&var` / `&var.`) or a double-quoted part.
pub const DATASET: &str = r#"(?:&+[A-Za-z_]\w*\.?|"[^"\n]*"|[A-Za-z_])(?:&+[A-Za-z_]\w*\.?|"[^"\n]*"|[\w.])*"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    TableWrite,
    TableRead,
    Include,
    MacroDef,
    MacroCall,
    Libname,
    Let,
    Credential,
    Connect,
    PassThrough,
}

/// How a match of a row is turned into candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Group 1 is a single dataset reference
    Dataset,
    /// Group 1 is a DATA-step style list: whitespace separated, options in
    /// parentheses, `name=value` options and anything after `/` ignored
    DatasetList,
    /// The match ends where a SQL FROM list begins; the list runs to the next `;`
    /// and is cut at the first clause keyword. Entries are comma separated, each a
    /// dataset with an optional alias
    FromList,
    /// Named groups are copied out as fields
    Fields,
    /// Start of a parenthesised pass-through block; the extractor finds its extent
    Region,
}

/// One row of the pattern table
#[derive(Debug, Clone, Copy)]
pub struct PatternSpec {
    pub name: &'static str,
    pub category: Category,
    pub shape: Shape,
    pub pattern: &'static str,
    /// Skip the whole match when this word appears in the list (case-insensitive)
    pub unless_word: Option<&'static str>,
    /// Run against the raw text instead of the comment-masked text
    pub raw_text: bool,
}

const fn row(
    name: &'static str,
    category: Category,
    shape: Shape,
    pattern: &'static str,
) -> PatternSpec {
    PatternSpec {
        name,
        category,
        shape,
        pattern,
        unless_word: None,
        raw_text: false,
    }
}

/// Statement-start anchor: beginning of a line, right after a `;`, or right
/// after a `%name` / `%name(...)` macro invocation written without a semicolon
macro_rules! stmt {
    ($body:literal) => {
        concat!(r"(?im)(?:^|;|%[A-Za-z_]\w*(?:\([^;()]*\))?)\s*", $body)
    };
}

/// Splices [`DATASET`] into a pattern (kept in sync by `test_dataset_inlined`)
macro_rules! ds {
    () => {
        r#"((?:&+[A-Za-z_]\w*\.?|"[^"\n]*"|[A-Za-z_])(?:&+[A-Za-z_]\w*\.?|"[^"\n]*"|[\w.])*)"#
    };
}

pub static PATTERNS: &[PatternSpec] = &[
    // ---- table writes ----
    row("data_step", Category::TableWrite, Shape::DatasetList, stmt!(r"data\s+([^;=\s][^;]*)")),
    row(
        "create_table",
        Category::TableWrite,
        Shape::Dataset,
        concat!(
            r"(?i)\bcreate\s+(?:or\s+replace\s+)?(?:(?:local\s+|global\s+)?(?:temporary|temp|transient|volatile)\s+)?(?:table|view)\s+(?:if\s+not\s+exists\s+)?",
            ds!()
        ),
    ),
    row(
        "insert_into",
        Category::TableWrite,
        Shape::Dataset,
        concat!(r"(?i)\binsert\s+(?:overwrite\s+)?into\s+", ds!()),
    ),
    row(
        "sql_update",
        Category::TableWrite,
        Shape::Dataset,
        concat!(r"(?i)\bupdate\s+", ds!(), r"(?:\s+(?:as\s+)?\w+)?\s+set\b"),
    ),
    row(
        "sql_merge",
        Category::TableWrite,
        Shape::Dataset,
        concat!(r"(?i)\bmerge\s+into\s+", ds!()),
    ),
    row(
        "proc_append",
        Category::TableWrite,
        Shape::Dataset,
        concat!(r"(?i)\bproc\s+append\b[^;]*?\bbase\s*=\s*", ds!()),
    ),
    row(
        "append_base",
        Category::TableWrite,
        Shape::Dataset,
        concat!(r"(?i)\bappend\s+[^;]*?\bbase\s*=\s*", ds!()),
    ),
    row(
        "out_option",
        Category::TableWrite,
        Shape::Dataset,
        concat!(r"(?i)\bout\s*=\s*", ds!()),
    ),
    // ---- table reads ----
    PatternSpec {
        // SQL `UPDATE t` / `SET col = value WHERE ...` on its own line
        unless_word: Some("where"),
        ..row("set_stmt", Category::TableRead, Shape::DatasetList, stmt!(r"set\s+([^;]*)"))
    },
    PatternSpec {
        unless_word: Some("into"),
        ..row("merge_stmt", Category::TableRead, Shape::DatasetList, stmt!(r"merge\s+([^;]*)"))
    },
    PatternSpec {
        unless_word: Some("set"),
        ..row("update_stmt", Category::TableRead, Shape::DatasetList, stmt!(r"update\s+([^;]*)"))
    },
    row(
        "sql_merge_using",
        Category::TableRead,
        Shape::Dataset,
        concat!(
            r"(?i)\bmerge\s+into\s+",
            r#"(?:&+[A-Za-z_]\w*\.?|"[^"\n]*"|[A-Za-z_])(?:&+[A-Za-z_]\w*\.?|"[^"\n]*"|[\w.])*"#,
            r"(?:\s+(?:as\s+)?\w+)?\s+using\s+",
            ds!()
        ),
    ),
    row("from_clause", Category::TableRead, Shape::FromList, r"(?i)\bfrom\s+"),
    row("join_clause", Category::TableRead, Shape::Dataset, concat!(r"(?i)\bjoin\s+", ds!())),
    row(
        "append_data",
        Category::TableRead,
        Shape::Dataset,
        concat!(r"(?i)\bappend\s+[^;]*?\bdata\s*=\s*", ds!()),
    ),
    row(
        "proc_data",
        Category::TableRead,
        Shape::Dataset,
        concat!(r"(?i)\bproc\s+\w+\b[^;]*?\bdata\s*=\s*", ds!()),
    ),
    // ---- program references ----
    row(
        "include",
        Category::Include,
        Shape::Fields,
        r#"(?i)%inc(?:lude)?\b\s*(?:'(?P<squoted>[^']*)'|"(?P<dquoted>[^"]*)"|(?P<bare>[^\s;'"]+))"#,
    ),
    row("macro_def", Category::MacroDef, Shape::Fields, r"(?i)%macro\s+(?P<name>[A-Za-z_]\w*)"),
    row("macro_call", Category::MacroCall, Shape::Fields, r"%(?P<name>[A-Za-z_]\w*)"),
    row(
        "macro_call_dynamic",
        Category::MacroCall,
        Shape::Fields,
        r"%(?P<name>&+[A-Za-z_]\w*\.?)",
    ),
    // ---- bindings ----
    row(
        "libname",
        Category::Libname,
        Shape::Fields,
        stmt!(r"libname\s+(?P<libref>[A-Za-z_]\w*)\s+(?P<rest>[^;]*)"),
    ),
    row(
        "let",
        Category::Let,
        Shape::Fields,
        r"(?i)%let\s+(?P<name>[A-Za-z_]\w*)\s*=(?P<value>[^;]*)",
    ),
    row(
        "connect_to",
        Category::Connect,
        Shape::Fields,
        r"(?i)\bconnect\s+to\s+(?P<engine>\w+)(?:\s+as\s+(?P<alias>\w+))?",
    ),
    row(
        "connect_using",
        Category::Connect,
        Shape::Fields,
        r"(?i)\bconnect\s+using\s+(?P<libref>\w+)(?:\s+as\s+(?P<alias>\w+))?",
    ),
    row("execute_block", Category::PassThrough, Shape::Region, r"(?i)\bexecute\s*\("),
    row(
        "execute_by_block",
        Category::PassThrough,
        Shape::Region,
        r"(?i)\bexecute\s+by\s+(?P<alias>\w+)\s*\(",
    ),
    row(
        "connection_to_block",
        Category::PassThrough,
        Shape::Region,
        r"(?i)\bconnection\s+to\s+(?P<alias>\w+)\s*\(",
    ),
    // ---- literal credentials (raw text: comments are leaks too) ----
    PatternSpec {
        raw_text: true,
        ..row(
            "credential_literal",
            Category::Credential,
            Shape::Fields,
            r#"(?i)\b(?P<keyword>user|username|uid|password|pwd|pw|pass)\s*=\s*(?P<value>'[^'\n]*'|"[^"\n]*"|[^\s;)'"]+)"#,
        )
    },
];

/// A row with its compiled regex
pub struct CompiledPattern {
    pub spec: &'static PatternSpec,
    pub regex: Regex,
}

/// Compiled pattern table; a row whose regex fails to compile is dropped
pub static COMPILED: Lazy<Vec<CompiledPattern>> = Lazy::new(|| {
    PATTERNS
        .iter()
        .filter_map(|spec| {
            Regex::new(spec.pattern)
                .ok()
                .map(|regex| CompiledPattern { spec, regex })
        })
        .collect()
});

/// Anchored form of [`DATASET`], used to validate list tokens
pub static DATASET_TOKEN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(&format!("^{}", DATASET)).ok());

/// Macro-language statements and functions that are never macro calls
pub const MACRO_KEYWORDS: &[&str] = &[
    "abort", "bquote", "by", "cmpres", "copy", "datatyp", "display", "do", "else", "end",
    "eval", "global", "goto", "if", "inc", "include", "index", "input", "kcmpres", "keydef",
    "label", "left", "length", "let", "local", "lowcase", "macro", "mend", "nrbquote",
    "nrquote", "nrstr", "put", "qcmpres", "qleft", "qlowcase", "qscan", "qsubstr",
    "qsysfunc", "qtrim", "quote", "qupcase", "return", "run", "scan", "str", "substr", "superq",
    "symdel", "symexist", "symglobl", "symlocal", "syscall", "sysevalf", "sysexec",
    "sysfunc", "sysget", "syslput", "sysmacdelete", "sysmacexist", "sysmexecdepth",
    "sysmexecname", "sysrput", "then", "to", "trim", "tslit", "unquote", "until", "upcase",
    "verify", "while", "window",
];

/// Names that are never table candidates
pub const RESERVED_DATASETS: &[&str] = &["_null_", "_data_", "_last_"];

/// Keywords that end a SQL FROM list
pub const FROM_STOP_WORDS: &[&str] = &[
    "where", "group", "order", "having", "join", "inner", "left", "right", "full", "cross",
    "natural", "outer", "on", "union", "except", "intersect", "limit", "qualify",
    "using",
];

pub fn is_macro_keyword(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    MACRO_KEYWORDS.binary_search(&lower.as_str()).is_ok()
}

pub fn is_reserved_dataset(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    RESERVED_DATASETS.contains(&lower.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_pattern_compiles() {
        assert_eq!(COMPILED.len(), PATTERNS.len());
        assert!(DATASET_TOKEN.is_some());
    }

    #[test]
    fn test_pattern_names_unique() {
        let mut names = std::collections::HashSet::new();
        for spec in PATTERNS {
            assert!(names.insert(spec.name), "duplicate pattern name {}", spec.name);
        }
    }

    #[test]
    fn test_dataset_inlined() {
        let inlined = ds!();
        assert_eq!(&inlined[1..inlined.len() - 1], DATASET);
    }

    #[test]
    fn test_statement_anchor() {
        let re = Regex::new(stmt!(r"data\s+(\w+)")).unwrap();
        for src in ["data a;", "x;data a;", "%setup\ndata a;", "%setup data a;", "%setup(x=1) data a;"] {
            assert_eq!(re.captures(src).map(|c| c[1].to_string()).as_deref(), Some("a"), "{}", src);
        }
        assert!(re.captures("proc print data=a;").is_none());
    }

    #[test]
    fn test_macro_keywords_sorted() {
        let mut sorted = MACRO_KEYWORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, MACRO_KEYWORDS);
        assert!(is_macro_keyword("LET"));
        assert!(is_macro_keyword("sysfunc"));
        assert!(!is_macro_keyword("load_data"));
    }
}
