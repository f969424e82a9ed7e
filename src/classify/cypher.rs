//! Structural classifier distinguishing read-only from write-class Cypher.
//!
//! The classifier never executes or fully parses the query: it strips
//! comments and string literals, unifies multi-word keywords, extracts
//! `CALL { … }` subqueries via balanced-brace scanning, and looks at
//! procedure-call prefixes. It is intentionally conservative — unknown
//! procedures default to WRITE — because the read-only gate must never let
//! a write slip through as READ (see [`classify_cypher`]'s monotonicity
//! property, exercised in this module's tests).

use regex::Regex;
use std::sync::OnceLock;

/// Classification verdict plus confidence in `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub verdict: Verdict,
    pub confidence: f64,
}

impl Classification {
    #[must_use]
    pub fn is_write(&self) -> bool {
        matches!(self.verdict, Verdict::Write)
    }
}

const WRITE_KEYWORDS: &[&str] = &[
    "CREATE",
    "MERGE",
    "DELETE",
    "DETACH DELETE",
    "SET",
    "REMOVE",
    "FOREACH",
    "CREATE INDEX",
    "DROP INDEX",
    "CREATE CONSTRAINT",
    "DROP CONSTRAINT",
];

const READ_KEYWORDS: &[&str] = &[
    "MATCH",
    "OPTIONAL MATCH",
    "WITH",
    "WHERE",
    "RETURN",
    "SHOW",
    "PROFILE",
    "EXPLAIN",
    "UNION",
    "UNION ALL",
];

fn comment_and_string_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)//[^\n]*|/\*.*?\*/|'(?:[^'\\]|\\.)*'|"(?:[^"\\]|\\.)*""#).unwrap()
    })
}

fn procedure_call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([A-Za-z_][\w]*(?:\.[A-Za-z_][\w]*)+)\s*\(").unwrap())
}

/// Replace string literals and comments with spaces of equal length, so
/// offsets stay stable but their contents can never be mistaken for
/// keywords.
fn strip_comments_and_strings(query: &str) -> String {
    comment_and_string_re()
        .replace_all(query, |caps: &regex::Captures| " ".repeat(caps[0].len()))
        .into_owned()
}

/// Unify the multi-word keywords into single tokens by uppercasing the
/// whole string and normalizing internal whitespace, then scanning for each
/// phrase in order of most-specific first.
fn unified_keywords_present(text: &str, keywords: &[&str]) -> bool {
    let normalized = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase();
    keywords.iter().any(|kw| contains_word_boundary(&normalized, kw))
}

fn contains_word_boundary(haystack: &str, needle: &str) -> bool {
    let needle = needle.to_uppercase();
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(&needle) {
        let abs = start + pos;
        let before_ok = abs == 0 || !haystack.as_bytes()[abs - 1].is_ascii_alphanumeric();
        let after = abs + needle.len();
        let after_ok = after >= haystack.len() || !haystack.as_bytes()[after].is_ascii_alphanumeric();
        if before_ok && after_ok {
            return true;
        }
        start = abs + 1;
    }
    false
}

/// Extract the contents of every balanced `{ … }` block that immediately
/// follows a `CALL` keyword — i.e. `CALL { subquery }` — for separate
/// scanning.
fn extract_call_subqueries(text: &str) -> Vec<String> {
    let upper = text.to_uppercase();
    let bytes = text.as_bytes();
    let mut subqueries = Vec::new();
    let mut search_from = 0;

    while let Some(call_pos) = upper[search_from..].find("CALL") {
        let abs_call = search_from + call_pos;
        let after_call = abs_call + 4;
        let mut i = after_call;
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i < bytes.len() && bytes[i] == b'{' {
            let mut depth = 0usize;
            let start = i;
            let mut end = None;
            for (offset, &b) in bytes[i..].iter().enumerate() {
                match b {
                    b'{' => depth += 1,
                    b'}' => {
                        depth -= 1;
                        if depth == 0 {
                            end = Some(i + offset);
                            break;
                        }
                    }
                    _ => {}
                }
            }
            if let Some(end) = end {
                subqueries.push(text[start + 1..end].to_string());
                search_from = end + 1;
                continue;
            }
        }
        search_from = abs_call + 4;
    }

    subqueries
}

/// Classify a procedure-call prefix like `apoc.create.node` or
/// `db.labels`. Returns `None` if `text` contains no procedure call.
fn classify_procedure_calls(text: &str) -> Option<Classification> {
    let mut worst: Option<Classification> = None;
    for caps in procedure_call_re().captures_iter(text) {
        let name = caps[1].to_lowercase();
        let classification = if name.starts_with("apoc.create") {
            Classification {
                verdict: Verdict::Write,
                confidence: 0.95,
            }
        } else if name.starts_with("apoc.meta") {
            Classification {
                verdict: Verdict::Read,
                confidence: 0.9,
            }
        } else if ["get", "list", "show", "meta"]
            .iter()
            .any(|hint| name.contains(hint))
        {
            Classification {
                verdict: Verdict::Read,
                confidence: 0.6,
            }
        } else {
            Classification {
                verdict: Verdict::Write,
                confidence: 0.8,
            }
        };

        worst = Some(match worst {
            Some(prev) if prev.is_write() => prev,
            _ => classification,
        });
    }
    worst
}

/// Classify a single `stripped` query body (no comments/strings), ignoring
/// any `CALL { … }` subqueries — callers should invoke
/// [`extract_call_subqueries`] separately and fold in their verdicts.
fn classify_flat(stripped: &str) -> Classification {
    if unified_keywords_present(stripped, WRITE_KEYWORDS) {
        return Classification {
            verdict: Verdict::Write,
            confidence: 0.95,
        };
    }
    if let Some(proc_verdict) = classify_procedure_calls(stripped) {
        if proc_verdict.is_write() {
            return proc_verdict;
        }
    }
    if unified_keywords_present(stripped, READ_KEYWORDS) {
        return Classification {
            verdict: Verdict::Read,
            confidence: 0.9,
        };
    }
    if let Some(proc_verdict) = classify_procedure_calls(stripped) {
        return proc_verdict;
    }
    Classification {
        verdict: Verdict::Read,
        confidence: 0.5,
    }
}

/// Classify a raw Cypher query as READ or WRITE.
///
/// Monotonic: introducing a WRITE keyword anywhere outside a string literal
/// or comment never downgrades the result from WRITE to READ, because every
/// branch that can produce WRITE takes priority over every branch that
/// produces READ.
#[must_use]
pub fn classify_cypher(query: &str) -> Classification {
    let stripped = strip_comments_and_strings(query);

    for subquery in extract_call_subqueries(&stripped) {
        if classify_flat(&subquery).is_write() {
            return Classification {
                verdict: Verdict::Write,
                confidence: 0.95,
            };
        }
    }

    classify_flat(&stripped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_match_return_is_read() {
        let c = classify_cypher("MATCH (n:Person) RETURN n");
        assert_eq!(c.verdict, Verdict::Read);
    }

    #[test]
    fn create_is_write() {
        let c = classify_cypher("CREATE (n:Person {name: 'Alice'})");
        assert_eq!(c.verdict, Verdict::Write);
    }

    #[test]
    fn detach_delete_is_write() {
        let c = classify_cypher("MATCH (n) DETACH DELETE n");
        assert_eq!(c.verdict, Verdict::Write);
    }

    #[test]
    fn write_keyword_inside_string_literal_is_ignored() {
        let c = classify_cypher("MATCH (n:Person {note: 'please CREATE nothing'}) RETURN n");
        assert_eq!(c.verdict, Verdict::Read);
    }

    #[test]
    fn write_keyword_inside_comment_is_ignored() {
        let c = classify_cypher("MATCH (n) RETURN n // CREATE is just a comment here");
        assert_eq!(c.verdict, Verdict::Read);
    }

    #[test]
    fn apoc_create_procedure_is_write() {
        let c = classify_cypher("CALL apoc.create.node(['Label'], {}) YIELD node RETURN node");
        assert_eq!(c.verdict, Verdict::Write);
    }

    #[test]
    fn apoc_meta_procedure_is_read() {
        let c = classify_cypher("CALL apoc.meta.schema() YIELD value RETURN value");
        assert_eq!(c.verdict, Verdict::Read);
    }

    #[test]
    fn unknown_procedure_defaults_to_write() {
        let c = classify_cypher("CALL custom.mystery.op() YIELD x RETURN x");
        assert_eq!(c.verdict, Verdict::Write);
        assert!((c.confidence - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_procedure_with_list_hint_is_read() {
        let c = classify_cypher("CALL custom.list.things() YIELD x RETURN x");
        assert_eq!(c.verdict, Verdict::Read);
    }

    #[test]
    fn call_subquery_with_write_forces_write() {
        let c = classify_cypher("MATCH (n) CALL { MATCH (m) SET m.x = 1 } RETURN n");
        assert_eq!(c.verdict, Verdict::Write);
    }

    #[test]
    fn create_index_and_drop_constraint_are_write() {
        assert_eq!(classify_cypher("CREATE INDEX ON :Person(name)").verdict, Verdict::Write);
        assert_eq!(
            classify_cypher("DROP CONSTRAINT ON (p:Person) ASSERT p.id IS UNIQUE").verdict,
            Verdict::Write
        );
    }

    #[test]
    fn monotonicity_adding_write_keyword_never_downgrades() {
        let base = "MATCH (n:Person) WHERE n.age > 21 RETURN n";
        let mutated = "MATCH (n:Person) WHERE n.age > 21 SET n.flag = true RETURN n";
        assert_eq!(classify_cypher(base).verdict, Verdict::Read);
        assert_eq!(classify_cypher(mutated).verdict, Verdict::Write);
    }
}
