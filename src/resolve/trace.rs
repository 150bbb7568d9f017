//! Position-ordered macro variable trace for one program
//!
//! The trace holds every `%let` assignment in the program plus the synthetic
//! assignments made by the connection-setup macro, ordered by byte offset. A
//! reference resolves to the latest assignment strictly before its own position.

use crate::extract::ExtractedFacts;

/// Recursion bound for values that reference other variables
const MAX_EXPANSION_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Assignment {
    name: String,
    value: String,
    offset: usize,
}

/// Outcome of substituting macro variable references in a piece of text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    pub text: String,
    /// At least one reference was replaced
    pub substituted: bool,
    /// At least one reference was left in place
    pub unresolved: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MacroVarTrace {
    assignments: Vec<Assignment>,
}

impl MacroVarTrace {
    /// Build the trace for a program
    ///
    /// `connection_bindings` are bound at the offset of every connection-setup
    /// call and take part in last-assignment-wins like any `%let`.
    pub fn build(facts: &ExtractedFacts, connection_bindings: &[(String, String)]) -> Self {
        let mut assignments: Vec<Assignment> = facts
            .lets
            .iter()
            .map(|l| Assignment {
                name: l.name.clone(),
                value: l.value.clone(),
                offset: l.offset,
            })
            .collect();

        for call in &facts.connection_setups {
            assignments.extend(connection_bindings.iter().map(|(name, value)| Assignment {
                name: name.clone(),
                value: value.clone(),
                offset: call.offset,
            }));
        }

        // Stable: bindings of one call keep their table order
        assignments.sort_by_key(|a| a.offset);
        Self { assignments }
    }

    /// Latest assignment of `name` strictly before `position`
    fn lookup(&self, name: &str, position: usize) -> Option<&Assignment> {
        let end = self.assignments.partition_point(|a| a.offset < position);
        self.assignments[..end]
            .iter()
            .rev()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }

    /// Replace `&var` / `&var.` references in `text`, as seen from `position`
    ///
    /// # Behavior
    /// - `&var` resolves to the latest assignment before `position`; a value that
    ///   itself holds references is expanded as seen from its own `%let`
    /// - `&&var` indirection is never resolved and is left as written
    /// - a variable with no earlier assignment is left as written
    pub fn substitute(&self, text: &str, position: usize) -> Substitution {
        self.substitute_depth(text, position, 0)
    }

    fn substitute_depth(&self, text: &str, position: usize, depth: usize) -> Substitution {
        let chars: Vec<char> = text.chars().collect();
        let mut out = String::with_capacity(text.len());
        let mut substituted = false;
        let mut unresolved = false;
        let mut i = 0;

        while i < chars.len() {
            if chars[i] != '&' {
                out.push(chars[i]);
                i += 1;
                continue;
            }

            let start = i;
            let mut amps = 0;
            while i < chars.len() && chars[i] == '&' {
                amps += 1;
                i += 1;
            }
            let name_start = i;
            if i < chars.len() && (chars[i].is_ascii_alphabetic() || chars[i] == '_') {
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
            }
            if name_start == i {
                // Bare ampersand, not a reference
                out.extend(&chars[start..i]);
                continue;
            }
            let name: String = chars[name_start..i].iter().collect();
            let has_dot = i < chars.len() && chars[i] == '.';
            if has_dot {
                i += 1;
            }

            let resolved = if amps == 1 && depth < MAX_EXPANSION_DEPTH {
                self.lookup(&name, position).map(|a| {
                    let inner = self.substitute_depth(&a.value, a.offset, depth + 1);
                    if inner.unresolved {
                        unresolved = true;
                    }
                    inner.text
                })
            } else {
                None
            };

            match resolved {
                Some(value) => {
                    out.push_str(&value);
                    substituted = true;
                }
                None => {
                    out.extend(&chars[start..i]);
                    unresolved = true;
                }
            }
        }

        Substitution {
            text: out,
            substituted,
            unresolved,
        }
    }
}
