//! # Label Query Compilation
//!
//! Translates label query disjunctions into SQLite predicates over the
//! `labels` column, so the engine can skip non-matching rows before they
//! are unmarshaled.
//!
//! The compilation is deliberately conservative: any term it cannot
//! express (ordering operators, keys containing a double quote) simply
//! drops out of the emitted predicate, widening it. Callers MUST therefore
//! re-apply the original query in memory to every row the engine returns —
//! see [`query`](crate::query).

use crate::query::{LabelOp, LabelQuery, LabelTerm};

const SQL_TRUE: &str = "true";
const SQL_FALSE: &str = "false";

/// Compiles a disjunction of label queries into a SQLite condition.
///
/// An empty disjunction compiles to `true`. The result may be wider than
/// the original query; the in-memory predicate stays authoritative.
pub fn compile_label_queries(queries: &[LabelQuery]) -> String {
    let compiled: Vec<String> = queries.iter().map(compile_label_query).collect();

    if compiled.is_empty() {
        return SQL_TRUE.to_string();
    }

    compiled.join(" OR ")
}

/// Compiles a single label query (a conjunction of terms).
pub fn compile_label_query(query: &LabelQuery) -> String {
    let terms: Vec<String> = query
        .terms
        .iter()
        .filter_map(compile_term)
        .map(|term| format!("({term})"))
        .collect();

    if terms.is_empty() {
        return SQL_TRUE.to_string();
    }

    format!("({})", terms.join(" AND "))
}

/// Quotes a value for embedding in a SQLite query: single quotes are
/// doubled, everything else passes through.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Compiles one term, or `None` when the term cannot be pushed down.
fn compile_term(term: &LabelTerm) -> Option<String> {
    if term.key.contains('"') {
        // a double quote cannot be escaped inside a SQLite JSON path
        return None;
    }

    // SQLite JSON path form for object field access: $."key"
    let selector = format!("labels ->> {}", quote(&format!("$.\"{}\"", term.key)));

    let compiled = match term.op {
        LabelOp::Exists => {
            if term.invert {
                format!("{selector} IS NULL")
            } else {
                format!("{selector} IS NOT NULL")
            }
        }
        LabelOp::Equal => match term.values.first() {
            None => constant(term.invert),
            Some(value) => {
                if term.invert {
                    format!("{selector} != {}", quote(value))
                } else {
                    format!("{selector} = {}", quote(value))
                }
            }
        },
        LabelOp::In => {
            if term.values.is_empty() {
                constant(term.invert)
            } else {
                let quoted: Vec<String> = term.values.iter().map(|v| quote(v)).collect();

                if term.invert {
                    format!("{selector} NOT IN ({})", quoted.join(", "))
                } else {
                    format!("{selector} IN ({})", quoted.join(", "))
                }
            }
        }
        LabelOp::Lt | LabelOp::Lte | LabelOp::LtNumeric | LabelOp::LteNumeric => {
            // not expressible against the JSON extraction; degrade
            return None;
        }
    };

    Some(compiled)
}

/// An empty operand list can never match: constant false, or constant true
/// when the term is inverted.
fn constant(invert: bool) -> String {
    if invert {
        SQL_TRUE.to_string()
    } else {
        SQL_FALSE.to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_disjunction() {
        assert_eq!(compile_label_queries(&[]), "true");
    }

    #[test]
    fn test_exists() {
        let query = LabelQuery::new(vec![LabelTerm::exists("env")]);
        assert_eq!(
            compile_label_query(&query),
            r#"((labels ->> '$."env"' IS NOT NULL))"#
        );

        let query = LabelQuery::new(vec![LabelTerm::exists("env").inverted()]);
        assert_eq!(
            compile_label_query(&query),
            r#"((labels ->> '$."env"' IS NULL))"#
        );
    }

    #[test]
    fn test_equal() {
        let query = LabelQuery::new(vec![LabelTerm::equal("env", "prod")]);
        assert_eq!(
            compile_label_query(&query),
            r#"((labels ->> '$."env"' = 'prod'))"#
        );

        let query = LabelQuery::new(vec![LabelTerm::equal("env", "prod").inverted()]);
        assert_eq!(
            compile_label_query(&query),
            r#"((labels ->> '$."env"' != 'prod'))"#
        );
    }

    #[test]
    fn test_in() {
        let query = LabelQuery::new(vec![LabelTerm::in_set("tier", ["web", "db"])]);
        assert_eq!(
            compile_label_query(&query),
            r#"((labels ->> '$."tier"' IN ('web', 'db')))"#
        );

        let query = LabelQuery::new(vec![LabelTerm::in_set("tier", ["web"]).inverted()]);
        assert_eq!(
            compile_label_query(&query),
            r#"((labels ->> '$."tier"' NOT IN ('web')))"#
        );
    }

    #[test]
    fn test_empty_operands_compile_to_constants() {
        let empty_equal = LabelTerm {
            key: "env".to_string(),
            op: LabelOp::Equal,
            values: Vec::new(),
            invert: false,
        };
        assert_eq!(
            compile_label_query(&LabelQuery::new(vec![empty_equal.clone()])),
            "((false))"
        );
        assert_eq!(
            compile_label_query(&LabelQuery::new(vec![empty_equal.inverted()])),
            "((true))"
        );

        let empty_in = LabelTerm {
            key: "env".to_string(),
            op: LabelOp::In,
            values: Vec::new(),
            invert: false,
        };
        assert_eq!(
            compile_label_query(&LabelQuery::new(vec![empty_in])),
            "((false))"
        );
    }

    #[test]
    fn test_value_quoting() {
        let query = LabelQuery::new(vec![LabelTerm::equal(
            "key.with.dots",
            "value'with'quotes",
        )]);
        assert_eq!(
            compile_label_query(&query),
            r#"((labels ->> '$."key.with.dots"' = 'value''with''quotes'))"#
        );

        // double quotes in values pass through untouched
        let query = LabelQuery::new(vec![LabelTerm::equal("k", "va\"lue")]);
        assert_eq!(
            compile_label_query(&query),
            r#"((labels ->> '$."k"' = 'va"lue'))"#
        );
    }

    #[test]
    fn test_unsupported_terms_degrade() {
        // a key with a double quote cannot be embedded in the JSON path
        let query = LabelQuery::new(vec![LabelTerm::equal("bad\"key", "v")]);
        assert_eq!(compile_label_query(&query), "true");

        // ordering operators are not pushed down
        let lt = LabelTerm {
            key: "weight".to_string(),
            op: LabelOp::Lt,
            values: vec!["10".to_string()],
            invert: false,
        };
        assert_eq!(compile_label_query(&LabelQuery::new(vec![lt.clone()])), "true");

        // supported terms in the same query still compile
        let query = LabelQuery::new(vec![lt, LabelTerm::exists("env")]);
        assert_eq!(
            compile_label_query(&query),
            r#"((labels ->> '$."env"' IS NOT NULL))"#
        );
    }

    #[test]
    fn test_disjunction_joins_with_or() {
        let queries = vec![
            LabelQuery::new(vec![LabelTerm::equal("env", "prod")]),
            LabelQuery::new(vec![LabelTerm::exists("canary")]),
        ];
        assert_eq!(
            compile_label_queries(&queries),
            r#"((labels ->> '$."env"' = 'prod')) OR ((labels ->> '$."canary"' IS NOT NULL))"#
        );
    }
}
