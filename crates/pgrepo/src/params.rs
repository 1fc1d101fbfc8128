//! Named statement parameters.
//!
//! Statements produced by the builder reference their values through named
//! placeholders (`@param_0`, `@param_1`, ...). PostgreSQL only understands
//! positional `$n` markers, so [`bind_positional`] rewrites the text right
//! before execution.

use crate::error::{OrmError, OrmResult};
use crate::value::FieldMap;
use serde_json::Value;
use std::collections::HashMap;

/// Marker that introduces a named placeholder in statement text.
pub const PLACEHOLDER_SIGIL: char = '@';

/// Name of the `n`-th placeholder minted by a builder.
pub(crate) fn placeholder_name(n: usize) -> String {
    format!("param_{n}")
}

/// Placeholder name -> bound value, in registration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(FieldMap);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `value` under `name` (without the `@`). Rebinding a name replaces its value.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn as_map(&self) -> &FieldMap {
        &self.0
    }
}

impl From<FieldMap> for Params {
    fn from(map: FieldMap) -> Self {
        Self(map)
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// If `sql[at..]` opens a region whose contents are never SQL tokens, return the
/// index just past it.
///
/// Covers `'...'` literals (with `''` doubling, and backslash escapes in `E'...'`),
/// `"..."` identifiers, `-- ...` line comments, nested `/* ... */` block comments
/// and `$tag$ ... $tag$` bodies. An unterminated region runs to the end of the text.
pub(crate) fn skip_opaque(sql: &str, at: usize) -> Option<usize> {
    let bytes = sql.as_bytes();
    let next = bytes.get(at + 1).copied();
    match bytes[at] {
        b'\'' => {
            let escaped = at > 0
                && matches!(bytes[at - 1], b'E' | b'e')
                && !(at > 1 && is_ident_byte(bytes[at - 2]));
            Some(skip_quoted(bytes, at, b'\'', escaped))
        }
        b'"' => Some(skip_quoted(bytes, at, b'"', false)),
        b'-' if next == Some(b'-') => Some(
            sql[at..]
                .find('\n')
                .map_or(sql.len(), |offset| at + offset + 1),
        ),
        b'/' if next == Some(b'*') => Some(skip_block_comment(bytes, at)),
        b'$' => skip_dollar_quoted(sql, at),
        _ => None,
    }
}

fn skip_quoted(bytes: &[u8], open: usize, quote: u8, backslash_escapes: bool) -> usize {
    let mut i = open + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if backslash_escapes => i += 2,
            b if b == quote => {
                if bytes.get(i + 1) == Some(&quote) {
                    i += 2;
                } else {
                    return i + 1;
                }
            }
            _ => i += 1,
        }
    }
    bytes.len()
}

fn skip_block_comment(bytes: &[u8], open: usize) -> usize {
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        match (bytes[i], bytes.get(i + 1).copied()) {
            (b'/', Some(b'*')) => {
                depth += 1;
                i += 2;
            }
            (b'*', Some(b'/')) => {
                depth -= 1;
                i += 2;
                if depth == 0 {
                    return i;
                }
            }
            _ => i += 1,
        }
    }
    bytes.len()
}

fn skip_dollar_quoted(sql: &str, open: usize) -> Option<usize> {
    let bytes = sql.as_bytes();
    // `a$b` is an identifier and `$1` a positional parameter, neither opens a body.
    if open > 0 && is_ident_byte(bytes[open - 1]) {
        return None;
    }
    let mut i = open + 1;
    if bytes.get(i).is_some_and(|&b| is_ident_start(b)) {
        while bytes.get(i).is_some_and(|&b| is_ident_byte(b)) {
            i += 1;
        }
    }
    if bytes.get(i) != Some(&b'$') {
        return None;
    }
    let tag = &sql[open..=i];
    let body = i + 1;
    Some(
        sql[body..]
            .find(tag)
            .map_or(sql.len(), |offset| body + offset + tag.len()),
    )
}

/// Rewrite `@name` placeholders to `$1..$n` and collect their values in positional order.
///
/// Each distinct name gets one position, numbered by first appearance; repeated
/// references reuse it. Quoted literals and identifiers, comments and dollar-quoted
/// bodies are copied untouched, as are operators such as `@>` or `@@`.
///
/// A placeholder without a bound value is a structural error, and so is a bound
/// value that the text never references.
pub fn bind_positional<'p>(sql: &str, params: &'p Params) -> OrmResult<(String, Vec<&'p Value>)> {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut values: Vec<&'p Value> = Vec::new();
    let mut positions: HashMap<&str, usize> = HashMap::new();

    // `sql[copied..i]` is pending verbatim text.
    let mut copied = 0;
    let mut i = 0;
    while i < bytes.len() {
        if let Some(end) = skip_opaque(sql, i) {
            i = end;
            continue;
        }
        let is_placeholder = bytes[i] == PLACEHOLDER_SIGIL as u8
            && !(i > 0 && is_ident_byte(bytes[i - 1]))
            && bytes.get(i + 1).is_some_and(|&b| is_ident_start(b));
        if !is_placeholder {
            i += 1;
            continue;
        }

        let start = i + 1;
        let mut end = start;
        while bytes.get(end).is_some_and(|&b| is_ident_byte(b)) {
            end += 1;
        }
        let name = &sql[start..end];
        let (bound_name, value) = params
            .0
            .get_key_value(name)
            .ok_or_else(|| OrmError::structural(format!("unbound placeholder @{name}")))?;

        let position = match positions.get(bound_name.as_str()) {
            Some(&pos) => pos,
            None => {
                values.push(value);
                positions.insert(bound_name.as_str(), values.len());
                values.len()
            }
        };
        out.push_str(&sql[copied..i]);
        out.push('$');
        out.push_str(&position.to_string());
        copied = end;
        i = end;
    }
    out.push_str(&sql[copied..]);

    if let Some(unused) = params.0.keys().find(|name| !positions.contains_key(name.as_str())) {
        return Err(OrmError::structural(format!(
            "parameter @{unused} is bound but never referenced"
        )));
    }

    Ok((out, values))
}
