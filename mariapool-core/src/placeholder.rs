//! Identifier placeholders (`%d`, `%t`) for statement text.
//!
//! Bound parameters only cover values, so database and table names are
//! spliced into the SQL text before binding:
//!
//! - a single name replaces every `%d` (or `%t`)
//! - a list replaces `%d0`, `%d1`, ... positionally and leaves a bare `%d` alone
//!
//! Names are quoted with backticks; embedded backticks are doubled.

use serde::{Deserialize, Serialize};

/// Identifier substitution argument: one name or an indexed list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Identifiers {
    One(String),
    Many(Vec<String>),
}

impl From<&str> for Identifiers {
    fn from(name: &str) -> Self {
        Self::One(name.to_string())
    }
}

impl From<String> for Identifiers {
    fn from(name: String) -> Self {
        Self::One(name)
    }
}

impl From<&String> for Identifiers {
    fn from(name: &String) -> Self {
        Self::One(name.clone())
    }
}

impl<S: Into<String>> From<Vec<S>> for Identifiers {
    fn from(names: Vec<S>) -> Self {
        Self::Many(names.into_iter().map(Into::into).collect())
    }
}

impl<S: Into<String> + Clone> From<&[S]> for Identifiers {
    fn from(names: &[S]) -> Self {
        Self::Many(names.iter().cloned().map(Into::into).collect())
    }
}

impl<S: Into<String>, const N: usize> From<[S; N]> for Identifiers {
    fn from(names: [S; N]) -> Self {
        Self::Many(names.into_iter().map(Into::into).collect())
    }
}

/// Quote an identifier with backticks
pub fn quote_identifier(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    push_quoted(&mut out, name);
    out
}

fn push_quoted(out: &mut String, name: &str) {
    out.push('`');
    for ch in name.chars() {
        if ch == '`' {
            out.push('`');
        }
        out.push(ch);
    }
    out.push('`');
}

/// Replace `%d`/`%t` tokens in `sql`.
///
/// Single pass: text produced by a substitution is never rescanned, and
/// indexed tokens read their digits greedily (`%d10` is index 10) except
/// that a leading `0` is a complete index (`%d01` is `%d0` followed by
/// `1`). Tokens with an out-of-range index are left as written.
pub fn substitute(
    sql: &str,
    databases: Option<&Identifiers>,
    tables: Option<&Identifiers>,
) -> String {
    if databases.is_none() && tables.is_none() {
        return sql.to_string();
    }

    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len() + 16);
    let mut copied = 0;
    let mut i = 0;

    while i + 1 < bytes.len() {
        if bytes[i] != b'%' {
            i += 1;
            continue;
        }

        let names = match bytes[i + 1] {
            b'd' => databases,
            b't' => tables,
            _ => None,
        };
        let Some(names) = names else {
            i += 1;
            continue;
        };

        match names {
            Identifiers::One(name) => {
                out.push_str(&sql[copied..i]);
                push_quoted(&mut out, name);
                i += 2;
                copied = i;
            }
            Identifiers::Many(list) => {
                let digits = i + 2;
                let mut end = digits;
                if bytes.get(digits) == Some(&b'0') {
                    // `0` never leads a longer index: `%d01` is `%d0` then `1`
                    end += 1;
                } else {
                    while end < bytes.len() && bytes[end].is_ascii_digit() {
                        end += 1;
                    }
                }

                let name = sql[digits..end]
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| list.get(index));

                if let Some(name) = name {
                    out.push_str(&sql[copied..i]);
                    push_quoted(&mut out, name);
                    copied = end;
                }
                i = end;
            }
        }
    }

    out.push_str(&sql[copied..]);
    out
}
