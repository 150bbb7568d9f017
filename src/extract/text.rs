//! Offset-preserving text utilities for SAS source
//!
//! Everything here keeps byte offsets stable: masked regions are replaced with
//! ASCII spaces (newlines kept), so an offset into the masked text is also an
//! offset into the original text and line numbers are unchanged.

/// Replace comments with spaces, preserving byte offsets and newlines
///
/// # Behavior
/// - `/* ... */` block comments are masked wherever they appear outside quotes
/// - comment statements `* ... ;` and `%* ... ;` are masked when they start a statement
/// - quoted strings (`'...'`, `"..."`) are left untouched
///
/// An unterminated block comment masks to the end of the text.
pub fn mask_comments(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = bytes.to_vec();
    let mut i = 0;
    let mut at_statement_start = true;
    let mut quote: Option<u8> = None;

    while i < bytes.len() {
        let b = bytes[i];

        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }

        if b == b'/' && bytes.get(i + 1) == Some(&b'*') {
            let end = find_from(bytes, i + 2, b"*/").map_or(bytes.len(), |p| p + 2);
            blank(&mut out, i, end);
            i = end;
            continue;
        }

        if at_statement_start
            && (b == b'*' || (b == b'%' && bytes.get(i + 1) == Some(&b'*')))
        {
            let end = bytes[i..]
                .iter()
                .position(|&c| c == b';')
                .map_or(bytes.len(), |p| i + p + 1);
            blank(&mut out, i, end);
            i = end;
            continue;
        }

        match b {
            b'\'' | b'"' => {
                quote = Some(b);
                at_statement_start = false;
            }
            b';' => at_statement_start = true,
            c if c.is_ascii_whitespace() => {}
            _ => at_statement_start = false,
        }
        i += 1;
    }

    // Masked ranges always cover whole characters, so the bytes stay valid UTF-8
    String::from_utf8(out).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

fn find_from(haystack: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| from + p)
}

fn blank(out: &mut [u8], start: usize, end: usize) {
    for b in &mut out[start..end] {
        if *b != b'\n' && *b != b'\r' {
            *b = b' ';
        }
    }
}

/// Maps byte offsets to 1-indexed line numbers
#[derive(Debug, Clone)]
pub struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            text.bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i + 1),
        );
        Self { line_starts }
    }

    /// 1-indexed line containing `offset`
    pub fn line_of(&self, offset: usize) -> usize {
        match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx + 1,
            Err(idx) => idx,
        }
    }
}

/// First occurrence of `target` outside quoted text
pub fn find_unquoted(text: &str, target: u8) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (i, &b) in text.as_bytes().iter().enumerate() {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None if b == target => return Some(i),
            None => {}
        }
    }
    None
}

/// Index of the parenthesis closing the one at `open`, skipping quoted text
///
/// Returns None when `open` is not a `(` or the parenthesis is never closed.
pub fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    if bytes.get(open) != Some(&b'(') {
        return None;
    }
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
            continue;
        }
        match b {
            b'\'' | b'"' => quote = Some(b),
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Blank out everything nested inside parentheses, keeping the parentheses
///
/// Text after an unbalanced `)` is cut (returned length is the cut point), since a
/// closing parenthesis with no opener ends the enclosing clause.
pub fn flatten_parens(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut depth = 0usize;
    for c in text.chars() {
        match c {
            '(' => {
                if depth == 0 {
                    out.push('(');
                } else {
                    out.push(' ');
                }
                depth += 1;
            }
            ')' => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
                out.push(if depth == 0 { ')' } else { ' ' });
            }
            _ if depth > 0 => {
                for _ in 0..c.len_utf8() {
                    out.push(' ');
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Split a dataset reference into its dot-separated levels
///
/// A macro variable reference consumes one trailing dot as its terminator, so
/// `&lib..customers` splits into `["&lib.", "customers"]` while `&lib.customers`
/// is a single level. Double-quoted name parts are kept whole.
pub fn split_dataset_ref(reference: &str) -> Vec<String> {
    let chars: Vec<char> = reference.chars().collect();
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '&' => {
                while i < chars.len() && chars[i] == '&' {
                    current.push('&');
                    i += 1;
                }
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    current.push(chars[i]);
                    i += 1;
                }
                if i < chars.len() && chars[i] == '.' {
                    current.push('.');
                    i += 1;
                }
            }
            '"' => {
                current.push('"');
                i += 1;
                while i < chars.len() && chars[i] != '"' {
                    current.push(chars[i]);
                    i += 1;
                }
                if i < chars.len() {
                    current.push('"');
                    i += 1;
                }
            }
            '.' => {
                parts.push(std::mem::take(&mut current));
                i += 1;
            }
            _ => {
                current.push(c);
                i += 1;
            }
        }
    }
    parts.push(current);
    parts.retain(|p| !p.is_empty());
    parts
}

/// True when `s` still contains a macro variable reference
pub fn has_placeholder(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.iter().enumerate().any(|(i, &b)| {
        b == b'&'
            && bytes
                .get(i + 1)
                .is_some_and(|n| n.is_ascii_alphabetic() || *n == b'_' || *n == b'&')
    })
}

/// Strip one layer of matching single or double quotes
pub fn unquote(s: &str) -> &str {
    let s = s.trim();
    if s.len() >= 2 {
        let first = s.as_bytes()[0];
        let last = s.as_bytes()[s.len() - 1];
        if (first == b'\'' || first == b'"') && first == last {
            return &s[1..s.len() - 1];
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_block_comment_keeps_offsets() {
        let src = "data a; /* set hidden;\n more */ set b;";
        let masked = mask_comments(src);
        assert_eq!(masked.len(), src.len());
        assert!(!masked.contains("hidden"));
        assert!(masked.contains("set b;"));
        assert_eq!(masked.matches('\n').count(), 1);
    }

    #[test]
    fn test_mask_comment_statements() {
        let src = "* set old.table;\ndata a;\n  %* set other.table;\n  set b;\nrun;";
        let masked = mask_comments(src);
        assert!(!masked.contains("old.table"));
        assert!(!masked.contains("other.table"));
        assert!(masked.contains("set b;"));
    }

    #[test]
    fn test_mask_ignores_star_mid_statement() {
        let src = "proc sql; select * from a; quit;";
        assert_eq!(mask_comments(src), src);
    }

    #[test]
    fn test_mask_ignores_comment_markers_in_quotes() {
        let src = "%let p = '/data/*'; set b;";
        assert_eq!(mask_comments(src), src);
    }

    #[test]
    fn test_line_index() {
        let idx = LineIndex::new("a\nb\n\nc");
        assert_eq!(idx.line_of(0), 1);
        assert_eq!(idx.line_of(2), 2);
        assert_eq!(idx.line_of(4), 3);
        assert_eq!(idx.line_of(5), 4);
    }

    #[test]
    fn test_matching_paren_skips_quotes() {
        let s = "execute(insert into t values (')')) by sf";
        let close = matching_paren(s, 7).unwrap();
        assert_eq!(&s[close + 1..], " by sf");
    }

    #[test]
    fn test_flatten_parens() {
        assert_eq!(flatten_parens("a (b, c), d"), "a (    ), d");
        assert_eq!(flatten_parens("a, b) where"), "a, b");
    }

    #[test]
    fn test_split_dataset_ref() {
        assert_eq!(split_dataset_ref("mylib.customers"), vec!["mylib", "customers"]);
        assert_eq!(split_dataset_ref("&lib..customers"), vec!["&lib.", "customers"]);
        assert_eq!(split_dataset_ref("&lib.customers"), vec!["&lib.customers"]);
        assert_eq!(split_dataset_ref("db.sch.t"), vec!["db", "sch", "t"]);
        assert_eq!(split_dataset_ref("tbl_&yr"), vec!["tbl_&yr"]);
    }

    #[test]
    fn test_has_placeholder() {
        assert!(has_placeholder("&lib."));
        assert!(has_placeholder("a&&b"));
        assert!(!has_placeholder("a & b"));
        assert!(!has_placeholder("plain"));
    }

    #[test]
    fn test_find_unquoted() {
        assert_eq!(find_unquoted("a b / view=x", b'/'), Some(4));
        assert_eq!(find_unquoted("'/d/x.sas7bdat' / view=x", b'/'), Some(16));
        assert_eq!(find_unquoted("\"a/b\"", b'/'), None);
    }
}
