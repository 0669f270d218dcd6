//! Named parameters.
//!
//! Statements may be written with `:name` placeholders. They are rewritten
//! into positional `?` parameters before being prepared, and the returned
//! [`BindMapping`] tells which positions each name stands for.

use std::collections::HashMap;

mod scanner;

use scanner::{State, is_block_comment_end, is_block_comment_start, is_line_comment_start, scan_name};

/// Positions of the named parameters of a statement.
///
/// A name used several times maps to every position it appears at. Each
/// occurrence of such a name is also reachable on its own as `name1`,
/// `name2`, ... unless the statement already uses those names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindMapping {
    names: HashMap<String, Vec<usize>>,
    count: usize,
}

impl BindMapping {
    /// Number of positional parameters of the statement.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Positions bound by `name`, with or without its leading `:`.
    ///
    /// When `name` itself is unknown, `name1` and `name2` are tried: an
    /// insert-or-update statement names the insert and update sides of a
    /// column that way, and a value bound by the bare name goes to both.
    #[must_use]
    pub fn positions(&self, name: &str) -> Vec<usize> {
        let key = name.strip_prefix(':').unwrap_or(name);
        if let Some(positions) = self.names.get(key) {
            return positions.clone();
        }
        ["1", "2"]
            .iter()
            .filter_map(|suffix| self.names.get(&format!("{key}{suffix}")))
            .flatten()
            .copied()
            .collect()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        !self.positions(name).is_empty()
    }

    fn push(&mut self, name: &str) {
        self.names
            .entry(name.to_owned())
            .or_default()
            .push(self.count);
        self.count += 1;
    }

    fn alias_repeated_names(&mut self) {
        let aliases: Vec<(String, usize)> = self
            .names
            .iter()
            .filter(|(_, positions)| positions.len() > 1)
            .flat_map(|(name, positions)| {
                positions
                    .iter()
                    .enumerate()
                    .map(move |(occurrence, position)| {
                        (format!("{name}{}", occurrence + 1), *position)
                    })
            })
            .collect();
        for (alias, position) in aliases {
            self.names.entry(alias).or_insert_with(|| vec![position]);
        }
    }
}

/// Rewrite the `:name` placeholders of `sql` into `?` parameters.
///
/// Quoted strings, quoted identifiers and comments are left untouched, as is
/// the `::` cast operator.
///
/// ```rust
/// use broker_sql_pool::translation::translate_named_placeholders;
///
/// let (sql, mapping) =
///     translate_named_placeholders("UPDATE hosts SET name = :name WHERE host_id = :host_id");
/// assert_eq!(sql, "UPDATE hosts SET name = ? WHERE host_id = ?");
/// assert_eq!(mapping.positions(":host_id"), vec![1]);
/// ```
#[must_use]
pub fn translate_named_placeholders(sql: &str) -> (String, BindMapping) {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut mapping = BindMapping::default();
    let mut state = State::Normal;
    let mut copied = 0;
    let mut idx = 0;

    while idx < bytes.len() {
        let b = bytes[idx];
        match state {
            State::Normal => match b {
                b'\'' => state = State::SingleQuoted,
                b'"' => state = State::DoubleQuoted,
                b'`' => state = State::BackQuoted,
                _ if is_line_comment_start(bytes, idx) => state = State::LineComment,
                _ if is_block_comment_start(bytes, idx) => {
                    state = State::BlockComment;
                    idx += 1;
                }
                b':' if bytes.get(idx + 1) == Some(&b':') => idx += 1,
                b':' => {
                    if let Some(end) = scan_name(bytes, idx + 1) {
                        out.push_str(&sql[copied..idx]);
                        out.push('?');
                        mapping.push(&sql[idx + 1..end]);
                        copied = end;
                        idx = end;
                        continue;
                    }
                }
                _ => {}
            },
            // A doubled quote closes then reopens the literal.
            State::SingleQuoted => {
                if b == b'\'' {
                    state = State::Normal;
                }
            }
            State::DoubleQuoted => {
                if b == b'"' {
                    state = State::Normal;
                }
            }
            State::BackQuoted => {
                if b == b'`' {
                    state = State::Normal;
                }
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment => {
                if is_block_comment_end(bytes, idx) {
                    state = State::Normal;
                    idx += 1;
                }
            }
        }
        idx += 1;
    }

    out.push_str(&sql[copied..]);
    mapping.alias_repeated_names();
    (out, mapping)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_names_in_order() {
        let (sql, mapping) = translate_named_placeholders(
            "INSERT INTO services (host_id, service_id, output) VALUES (:host_id, :service_id, :output)",
        );
        assert_eq!(
            sql,
            "INSERT INTO services (host_id, service_id, output) VALUES (?, ?, ?)"
        );
        assert_eq!(mapping.len(), 3);
        assert_eq!(mapping.positions(":host_id"), vec![0]);
        assert_eq!(mapping.positions("output"), vec![2]);
        assert!(!mapping.contains(":state"));
    }

    #[test]
    fn skips_literals_comments_and_casts() {
        let (sql, mapping) = translate_named_placeholders(
            "SELECT ':a', \"b:c\", `:d` -- :e\n/* :f */ FROM t WHERE x = :x AND y::text = 'it''s :g'",
        );
        assert_eq!(
            sql,
            "SELECT ':a', \"b:c\", `:d` -- :e\n/* :f */ FROM t WHERE x = ? AND y::text = 'it''s :g'"
        );
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping.positions(":x"), vec![0]);
    }

    #[test]
    fn lone_colon_is_kept() {
        let (sql, mapping) = translate_named_placeholders("SELECT 1 : 2, :");
        assert_eq!(sql, "SELECT 1 : 2, :");
        assert!(mapping.is_empty());
    }

    #[test]
    fn repeated_names_bind_every_occurrence() {
        let (sql, mapping) = translate_named_placeholders(
            "UPDATE hosts SET last_check = :now WHERE host_id = :host_id AND last_check < :now",
        );
        assert_eq!(
            sql,
            "UPDATE hosts SET last_check = ? WHERE host_id = ? AND last_check < ?"
        );
        assert_eq!(mapping.len(), 3);
        assert_eq!(mapping.positions(":now"), vec![0, 2]);
        assert_eq!(mapping.positions(":now1"), vec![0]);
        assert_eq!(mapping.positions(":now2"), vec![2]);
    }

    #[test]
    fn numbered_spellings_answer_the_bare_name() {
        let (_, mapping) = translate_named_placeholders(
            "INSERT INTO hosts (host_id, name) VALUES (:host_id, :name1) ON DUPLICATE KEY UPDATE name = :name2",
        );
        assert_eq!(mapping.positions(":name"), vec![1, 2]);
        assert_eq!(mapping.positions(":name2"), vec![2]);
        assert_eq!(mapping.positions(":host_id"), vec![0]);
    }
}
