//! Pattern-based fact extraction from SAS source text
//!
//! [`extract`] is a pure function: one file's text in, raw line-tagged candidates
//! out. Nothing here resolves macro variables, librefs or macro names; that is
//! the resolver's job.
//!
//! Extraction is inclusion-biased. Anything that could denote a table or program
//! through macro expansion is emitted as a candidate; a false positive is
//! acceptable, a silent omission is not.

pub mod patterns;
pub mod text;

use regex::Captures;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use patterns::{Category, CompiledPattern, Shape, COMPILED, DATASET_TOKEN, FROM_STOP_WORDS};
use text::{flatten_parens, find_unquoted, mask_comments, matching_paren, unquote, LineIndex};

/// Side-effecting macro that binds the Snowflake connection variables
pub const CONNECTION_MACRO: &str = "datalab_connections";

/// A table reference candidate, unresolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCandidate {
    /// Dataset reference as written, e.g. `mylib.customers` or `&lib..t`
    pub reference: String,
    pub offset: usize,
    pub line: usize,
    /// Name of the pattern row that produced it
    pub pattern: String,
    /// Index into [`ExtractedFacts::regions`] when inside a pass-through block
    pub region: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncludeDirective {
    pub path: String,
    pub quoted: bool,
    pub offset: usize,
    pub line: usize,
}

/// A `%macro name` definition or a `%name` invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroRef {
    pub name: String,
    pub offset: usize,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibnameStatement {
    /// Lower-cased libref
    pub libref: String,
    /// Engine token as written, absent for `libname x '/path';`
    pub engine: Option<String>,
    /// First quoted physical path, if any
    pub path: Option<String>,
    /// Option pairs with lower-cased keys and unquoted values
    pub options: Vec<(String, String)>,
    pub offset: usize,
    pub line: usize,
}

impl LibnameStatement {
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LetAssignment {
    /// Lower-cased variable name
    pub name: String,
    pub value: String,
    pub offset: usize,
    pub line: usize,
}

/// `CONNECT TO engine [AS alias]` or `CONNECT USING libref [AS alias]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassThroughConnection {
    pub engine: Option<String>,
    pub using_libref: Option<String>,
    /// Lower-cased alias; defaults to the engine token or libref
    pub alias: String,
    pub offset: usize,
    pub line: usize,
}

/// Byte range of an `EXECUTE(...)` or `CONNECTION TO alias (...)` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassThroughRegion {
    pub alias: Option<String>,
    pub start: usize,
    pub end: usize,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialHit {
    pub keyword: String,
    pub value: String,
    pub offset: usize,
    pub line: usize,
}

/// Everything the extractor found in one file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedFacts {
    pub table_writes: Vec<TableCandidate>,
    pub table_reads: Vec<TableCandidate>,
    pub includes: Vec<IncludeDirective>,
    pub macro_defs: Vec<MacroRef>,
    pub macro_calls: Vec<MacroRef>,
    /// Invocations of [`CONNECTION_MACRO`]
    pub connection_setups: Vec<MacroRef>,
    pub libnames: Vec<LibnameStatement>,
    pub lets: Vec<LetAssignment>,
    pub connections: Vec<PassThroughConnection>,
    pub regions: Vec<PassThroughRegion>,
    pub credentials: Vec<CredentialHit>,
}

impl ExtractedFacts {
    /// Index of the pass-through region containing `offset`
    pub fn region_at(&self, offset: usize) -> Option<usize> {
        self.regions
            .iter()
            .position(|r| r.start <= offset && offset < r.end)
    }
}

/// Extract raw facts from one SAS file
///
/// # Behavior
/// 1. Mask block comments and comment statements (offsets preserved)
/// 2. Run every row of the pattern table against the masked text (credential
///    rows against the raw text)
/// 3. Attach pass-through regions to table candidates that fall inside them
///
/// # Guarantees
/// - Every fact carries a 1-indexed line and a byte offset into `source`
/// - A table token matched by two rows of the same category is emitted once
/// - `_null_`, `_data_` and `_last_` are never table candidates
/// - Each category is ordered by offset
pub fn extract(source: &str) -> ExtractedFacts {
    let masked = mask_comments(source);
    let lines = LineIndex::new(source);
    let mut facts = ExtractedFacts::default();
    let mut seen_tokens: HashSet<(Category, usize)> = HashSet::new();

    for compiled in COMPILED.iter() {
        let spec = compiled.spec;
        let haystack = if spec.raw_text { source } else { masked.as_str() };
        for caps in compiled.regex.captures_iter(haystack) {
            dispatch(compiled, &caps, haystack, &lines, &mut facts, &mut seen_tokens);
        }
    }

    facts.table_writes.sort_by_key(|c| c.offset);
    facts.table_reads.sort_by_key(|c| c.offset);
    facts.includes.sort_by_key(|c| c.offset);
    facts.macro_defs.sort_by_key(|c| c.offset);
    facts.macro_calls.sort_by_key(|c| c.offset);
    facts.connection_setups.sort_by_key(|c| c.offset);
    facts.libnames.sort_by_key(|c| c.offset);
    facts.lets.sort_by_key(|c| c.offset);
    facts.connections.sort_by_key(|c| c.offset);
    facts.regions.sort_by_key(|r| r.start);
    facts.credentials.sort_by_key(|c| c.offset);

    let regions: Vec<Option<usize>> = facts
        .table_writes
        .iter()
        .chain(facts.table_reads.iter())
        .map(|c| facts.region_at(c.offset))
        .collect();
    for (candidate, region) in facts
        .table_writes
        .iter_mut()
        .chain(facts.table_reads.iter_mut())
        .zip(regions)
    {
        candidate.region = region;
    }

    facts
}

/// Interpret one match according to its row's shape and category
fn dispatch(
    compiled: &CompiledPattern,
    caps: &Captures<'_>,
    haystack: &str,
    lines: &LineIndex,
    facts: &mut ExtractedFacts,
    seen: &mut HashSet<(Category, usize)>,
) {
    let spec = compiled.spec;
    match spec.shape {
        Shape::Dataset | Shape::DatasetList | Shape::FromList => {
            let tokens = if spec.shape == Shape::FromList {
                let Some(m) = caps.get(0) else { return };
                if follows_disconnect(&haystack[..m.start()]) {
                    return;
                }
                let end = haystack[m.end()..]
                    .find(';')
                    .map_or(haystack.len(), |p| m.end() + p);
                from_list(&haystack[m.end()..end], m.end())
            } else {
                let Some(group) = caps.get(1) else { return };
                if spec.shape == Shape::Dataset {
                    vec![(group.start(), group.as_str().to_string())]
                } else {
                    dataset_list(group.as_str(), group.start(), spec.unless_word)
                }
            };
            for (offset, reference) in tokens {
                if !is_table_token(&reference) || !seen.insert((spec.category, offset)) {
                    continue;
                }
                let candidate = TableCandidate {
                    reference,
                    offset,
                    line: lines.line_of(offset),
                    pattern: spec.name.to_string(),
                    region: None,
                };
                if spec.category == Category::TableWrite {
                    facts.table_writes.push(candidate);
                } else {
                    facts.table_reads.push(candidate);
                }
            }
        }
        Shape::Region => {
            let Some(m) = caps.get(0) else { return };
            let open = m.end() - 1;
            let Some(close) = matching_paren(haystack, open) else { return };
            let alias = caps
                .name("alias")
                .map(|a| a.as_str().to_ascii_lowercase())
                .or_else(|| trailing_by_alias(&haystack[close + 1..]));
            facts.regions.push(PassThroughRegion {
                alias,
                start: open + 1,
                end: close,
                line: lines.line_of(m.start()),
            });
        }
        Shape::Fields => fields(spec.category, caps, lines, facts),
    }
}

fn fields(category: Category, caps: &Captures<'_>, lines: &LineIndex, facts: &mut ExtractedFacts) {
    let Some(whole) = caps.get(0) else { return };
    let field = |name: &str| caps.name(name).map(|m| m.as_str());

    match category {
        Category::Include => {
            let (path, quoted) = match (field("squoted"), field("dquoted"), field("bare")) {
                (Some(p), _, _) | (_, Some(p), _) => (p, true),
                (_, _, Some(p)) => (p, false),
                _ => return,
            };
            facts.includes.push(IncludeDirective {
                path: path.trim().to_string(),
                quoted,
                offset: whole.start(),
                line: lines.line_of(whole.start()),
            });
        }
        Category::MacroDef | Category::MacroCall => {
            let Some(name) = caps.name("name") else { return };
            let macro_ref = MacroRef {
                name: name.as_str().to_string(),
                offset: whole.start(),
                line: lines.line_of(whole.start()),
            };
            if category == Category::MacroDef {
                facts.macro_defs.push(macro_ref);
            } else if name.as_str().eq_ignore_ascii_case(CONNECTION_MACRO) {
                facts.connection_setups.push(macro_ref);
            } else if !patterns::is_macro_keyword(name.as_str()) {
                facts.macro_calls.push(macro_ref);
            }
        }
        Category::Libname => {
            let (Some(libref), Some(rest)) = (field("libref"), field("rest")) else { return };
            let (engine, path, options) = parse_libname_rest(rest);
            if engine
                .as_deref()
                .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "clear" | "list"))
            {
                return;
            }
            let offset = caps.name("libref").map_or(whole.start(), |m| m.start());
            facts.libnames.push(LibnameStatement {
                libref: libref.to_ascii_lowercase(),
                engine,
                path,
                options,
                offset,
                line: lines.line_of(offset),
            });
        }
        Category::Let => {
            let (Some(name), Some(value)) = (field("name"), field("value")) else { return };
            facts.lets.push(LetAssignment {
                name: name.to_ascii_lowercase(),
                value: value.trim().to_string(),
                offset: whole.start(),
                line: lines.line_of(whole.start()),
            });
        }
        Category::Connect => {
            let engine = field("engine").map(str::to_string);
            let using_libref = field("libref").map(|l| l.to_ascii_lowercase());
            let alias = field("alias")
                .map(str::to_string)
                .or_else(|| engine.clone())
                .or_else(|| using_libref.clone())
                .unwrap_or_default()
                .to_ascii_lowercase();
            facts.connections.push(PassThroughConnection {
                engine,
                using_libref,
                alias,
                offset: whole.start(),
                line: lines.line_of(whole.start()),
            });
        }
        Category::Credential => {
            let (Some(keyword), Some(raw_value)) = (field("keyword"), field("value")) else {
                return;
            };
            let value = unquote(raw_value);
            if value.is_empty() || value.starts_with('&') || value.starts_with('%') {
                return;
            }
            facts.credentials.push(CredentialHit {
                keyword: keyword.to_ascii_lowercase(),
                value: value.to_string(),
                offset: whole.start(),
                line: lines.line_of(whole.start()),
            });
        }
        Category::TableWrite | Category::TableRead | Category::PassThrough => {}
    }
}

/// `DISCONNECT FROM alias` is not a FROM clause
fn follows_disconnect(before: &str) -> bool {
    let trimmed = before.trim_end();
    trimmed
        .len()
        .checked_sub(10)
        .and_then(|start| trimmed.get(start..))
        .is_some_and(|tail| tail.eq_ignore_ascii_case("disconnect"))
}

/// `) BY alias` following an `EXECUTE(...)` block
fn trailing_by_alias(after: &str) -> Option<String> {
    let rest = after.trim_start();
    if !rest.get(..2).is_some_and(|kw| kw.eq_ignore_ascii_case("by")) {
        return None;
    }
    let rest = &rest[2..];
    if !rest.starts_with(|c: char| c.is_whitespace()) {
        return None;
    }
    let alias: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    (!alias.is_empty()).then(|| alias.to_ascii_lowercase())
}

fn is_table_token(reference: &str) -> bool {
    let trimmed = reference.trim_end_matches('.');
    !trimmed.is_empty() && !patterns::is_reserved_dataset(trimmed)
}

/// Whole-token match against the dataset reference grammar
fn dataset_token(token: &str) -> bool {
    DATASET_TOKEN
        .as_ref()
        .and_then(|re| re.find(token))
        .is_some_and(|m| m.end() == token.len())
}

/// Dataset list entries beyond the plain grammar: numbered ranges (`a1-a3`),
/// name prefixes (`lib.jan:`) and quoted physical paths (`'/d/x.sas7bdat'`)
fn list_token(token: &str) -> bool {
    if dataset_token(token) {
        return true;
    }
    if let Some(prefix) = token.strip_suffix(':') {
        return dataset_token(prefix);
    }
    let bytes = token.as_bytes();
    if bytes.len() > 2 && bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\'' {
        return true;
    }
    match token.split_once('-') {
        Some((first, last)) => dataset_token(first) && dataset_token(last),
        None => false,
    }
}

/// Split `text` into whitespace-separated tokens with absolute offsets
fn tokens_with_offsets(text: &str, base: usize) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices() {
        let sep = c.is_whitespace() || c == ',';
        match (start, sep) {
            (None, false) => start = Some(i),
            (Some(s), true) => {
                out.push((base + s, &text[s..i]));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        out.push((base + s, &text[s..]));
    }
    out
}

/// DATA / SET / MERGE / UPDATE dataset lists
fn dataset_list(list: &str, base: usize, unless_word: Option<&str>) -> Vec<(usize, String)> {
    let flat = flatten_parens(list);
    let flat = match find_unquoted(&flat, b'/') {
        Some(slash) => &flat[..slash],
        None => flat.as_str(),
    };
    // Blank the parentheses themselves so `a(keep=x)` tokenizes as `a`
    let flat: String = flat
        .chars()
        .map(|c| if c == '(' || c == ')' { ' ' } else { c })
        .collect();

    let tokens = tokens_with_offsets(&flat, base);
    if let Some(word) = unless_word {
        if tokens.iter().any(|(_, t)| t.eq_ignore_ascii_case(word)) {
            return Vec::new();
        }
    }

    let mut out: Vec<(usize, String)> = Vec::new();
    let mut skip_next = false;
    for (offset, token) in tokens {
        if skip_next {
            skip_next = false;
            continue;
        }
        if token == "=" {
            // `end = eof`: drop the option name, skip its value
            out.pop();
            skip_next = true;
            continue;
        }
        if token.starts_with('=') {
            out.pop();
            continue;
        }
        if token.ends_with('=') {
            skip_next = true;
            continue;
        }
        if token.contains('=') {
            continue;
        }
        if list_token(token) {
            out.push((offset, token.to_string()));
        }
    }
    out
}

/// SQL FROM lists: `a, b x, c as y where ...`
fn from_list(list: &str, base: usize) -> Vec<(usize, String)> {
    let flat = flatten_parens(list);
    let cut = stop_word_position(&flat).unwrap_or(flat.len());
    let flat = &flat[..cut];

    let mut out = Vec::new();
    let mut entry_start = 0;
    for (i, c) in flat.char_indices().chain(std::iter::once((flat.len(), ','))) {
        if c != ',' {
            continue;
        }
        let start = entry_start;
        entry_start = i + 1;
        let entry = &flat[start..i];
        let entry_trimmed = entry.trim_start();
        if entry_trimmed.starts_with('(') {
            continue;
        }
        let Some((rel, token)) = tokens_with_offsets(entry, start).into_iter().next() else {
            continue;
        };
        // `lib.t(where=...)` keeps only the dataset part
        let token = token.split('(').next().unwrap_or(token);
        let lower = token.to_ascii_lowercase();
        if lower == "connection" || lower.starts_with("dictionary.") {
            continue;
        }
        if list_token(token) {
            out.push((base + rel, token.to_string()));
        }
    }
    out
}

/// Byte position of the first clause keyword at nesting depth zero
fn stop_word_position(flat: &str) -> Option<usize> {
    let bytes = flat.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_alphabetic() && (i == 0 || !is_word_byte(bytes[i - 1])) {
            let start = i;
            while i < bytes.len() && is_word_byte(bytes[i]) {
                i += 1;
            }
            let word = flat[start..i].to_ascii_lowercase();
            if FROM_STOP_WORDS.contains(&word.as_str()) {
                return Some(start);
            }
        } else {
            i += 1;
        }
    }
    None
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'&' || b == b'.'
}

/// Split a LIBNAME statement tail into engine token, quoted path and options
fn parse_libname_rest(rest: &str) -> (Option<String>, Option<String>, Vec<(String, String)>) {
    let chars: Vec<(usize, char)> = rest.char_indices().collect();
    let mut engine = None;
    let mut path = None;
    let mut options = Vec::new();
    let mut i = 0;

    let read_quoted = |start: usize| -> (String, usize) {
        let q = chars[start].1;
        let mut j = start + 1;
        let mut value = String::new();
        while j < chars.len() && chars[j].1 != q {
            value.push(chars[j].1);
            j += 1;
        }
        (value, (j + 1).min(chars.len()))
    };

    while i < chars.len() {
        let c = chars[i].1;
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '\'' || c == '"' {
            let (value, next) = read_quoted(i);
            if path.is_none() {
                path = Some(value);
            }
            i = next;
            continue;
        }
        if c == '(' {
            // Concatenated library list; not a single binding
            let byte = chars[i].0;
            let close = matching_paren(rest, byte).unwrap_or(rest.len());
            i = chars.iter().position(|(b, _)| *b > close).unwrap_or(chars.len());
            continue;
        }

        let word_start = i;
        while i < chars.len() && !chars[i].1.is_whitespace() && chars[i].1 != '=' {
            i += 1;
        }
        let word: String = chars[word_start..i].iter().map(|(_, c)| c).collect();

        let mut j = i;
        while j < chars.len() && chars[j].1.is_whitespace() {
            j += 1;
        }
        if j < chars.len() && chars[j].1 == '=' {
            j += 1;
            while j < chars.len() && chars[j].1.is_whitespace() {
                j += 1;
            }
            let (value, next) = if j < chars.len() && (chars[j].1 == '\'' || chars[j].1 == '"') {
                read_quoted(j)
            } else if j < chars.len() && chars[j].1 == '(' {
                let byte = chars[j].0;
                let close = matching_paren(rest, byte).unwrap_or(rest.len());
                let next = chars.iter().position(|(b, _)| *b > close).unwrap_or(chars.len());
                let value = rest.get(byte..=close).unwrap_or(&rest[byte..]);
                (value.to_string(), next)
            } else {
                let vs = j;
                while j < chars.len() && !chars[j].1.is_whitespace() {
                    j += 1;
                }
                (chars[vs..j].iter().map(|(_, c)| c).collect(), j)
            };
            options.push((word.to_ascii_lowercase(), value));
            i = next;
        } else {
            if engine.is_none() && path.is_none() && options.is_empty() && !word.is_empty() {
                engine = Some(word);
            }
            i = j.max(i + 1);
        }
    }

    (engine, path, options)
}
