//! # Label and Id Queries
//!
//! In-memory predicates used by List and the kind watches. A label query
//! is a conjunction of [`LabelTerm`]s; a request carries a disjunction of
//! such queries (any query matching admits the resource).
//!
//! The SQL compiler in [`filter`](crate::filter) pushes a conservative
//! subset of these predicates into the engine; the full predicate here is
//! always re-applied to every returned row, so the two must agree on the
//! operators the compiler supports.

use std::collections::BTreeMap;

// =============================================================================
// Terms
// =============================================================================

/// A label term operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelOp {
    /// The label key is present.
    Exists,
    /// The label value equals the single term value.
    Equal,
    /// The label value is one of the term values.
    In,
    /// The label value is lexicographically less than the term value.
    Lt,
    /// The label value is lexicographically less than or equal.
    Lte,
    /// The label value is numerically less than the term value.
    LtNumeric,
    /// The label value is numerically less than or equal.
    LteNumeric,
}

/// A single label predicate: key, operator, values and an invert flag.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelTerm {
    /// The label key the term interrogates.
    pub key: String,
    /// The comparison operator.
    pub op: LabelOp,
    /// Operator operands; `Equal` and the ordering operators use the first
    /// value, `In` uses all of them, `Exists` uses none.
    pub values: Vec<String>,
    /// Negates the term result.
    pub invert: bool,
}

impl LabelTerm {
    /// Builds an `Exists` term.
    pub fn exists(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            op: LabelOp::Exists,
            values: Vec::new(),
            invert: false,
        }
    }

    /// Builds an `Equal` term.
    pub fn equal(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            op: LabelOp::Equal,
            values: vec![value.into()],
            invert: false,
        }
    }

    /// Builds an `In` term.
    pub fn in_set<I, V>(key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        Self {
            key: key.into(),
            op: LabelOp::In,
            values: values.into_iter().map(Into::into).collect(),
            invert: false,
        }
    }

    /// Inverts the term.
    pub fn inverted(mut self) -> Self {
        self.invert = !self.invert;
        self
    }

    /// Evaluates the term against a label map.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let matches = self.matches_inner(labels);

        if self.invert {
            !matches
        } else {
            matches
        }
    }

    fn matches_inner(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key);

        if self.op == LabelOp::Exists {
            return value.is_some();
        }

        let Some(value) = value else {
            return false;
        };

        let Some(operand) = self.values.first() else {
            // empty operand list never matches; mirrors the SQL compiler's
            // constant-false translation
            return false;
        };

        match self.op {
            LabelOp::Exists => unreachable!("handled above"),
            LabelOp::Equal => value == operand,
            LabelOp::In => self.values.iter().any(|v| v == value),
            LabelOp::Lt => value < operand,
            LabelOp::Lte => value <= operand,
            LabelOp::LtNumeric | LabelOp::LteNumeric => {
                let (Ok(left), Ok(right)) = (value.parse::<f64>(), operand.parse::<f64>()) else {
                    return false;
                };

                if self.op == LabelOp::LtNumeric {
                    left < right
                } else {
                    left <= right
                }
            }
        }
    }
}

// =============================================================================
// Queries
// =============================================================================

/// A conjunction of label terms.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelQuery {
    /// Terms, all of which must match.
    pub terms: Vec<LabelTerm>,
}

impl LabelQuery {
    /// Builds a query from terms.
    pub fn new(terms: Vec<LabelTerm>) -> Self {
        Self { terms }
    }

    /// Evaluates the conjunction; an empty query matches everything.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.terms.iter().all(|term| term.matches(labels))
    }
}

/// Evaluates a disjunction of label queries; an empty disjunction matches
/// everything.
pub fn queries_match(queries: &[LabelQuery], labels: &BTreeMap<String, String>) -> bool {
    if queries.is_empty() {
        return true;
    }

    queries.iter().any(|query| query.matches(labels))
}

/// An id predicate: exact membership in a set of ids.
///
/// An empty query matches every id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdQuery {
    ids: Vec<String>,
}

impl IdQuery {
    /// Builds a query matching exactly the given ids.
    pub fn matching<I, V>(ids: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    /// Evaluates the predicate.
    pub fn matches(&self, id: &str) -> bool {
        self.ids.is_empty() || self.ids.iter().any(|candidate| candidate == id)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_exists() {
        let l = labels(&[("env", "prod")]);

        assert!(LabelTerm::exists("env").matches(&l));
        assert!(!LabelTerm::exists("region").matches(&l));
        assert!(LabelTerm::exists("region").inverted().matches(&l));
    }

    #[test]
    fn test_equal() {
        let l = labels(&[("env", "prod")]);

        assert!(LabelTerm::equal("env", "prod").matches(&l));
        assert!(!LabelTerm::equal("env", "dev").matches(&l));
        assert!(LabelTerm::equal("env", "dev").inverted().matches(&l));

        // missing key: no match, inverted matches
        assert!(!LabelTerm::equal("region", "eu").matches(&l));
        assert!(LabelTerm::equal("region", "eu").inverted().matches(&l));
    }

    #[test]
    fn test_in() {
        let l = labels(&[("tier", "web")]);

        assert!(LabelTerm::in_set("tier", ["db", "web"]).matches(&l));
        assert!(!LabelTerm::in_set("tier", ["db", "cache"]).matches(&l));
        assert!(LabelTerm::in_set("tier", ["db", "cache"]).inverted().matches(&l));
    }

    #[test]
    fn test_empty_operands() {
        let l = labels(&[("env", "prod")]);

        let empty_equal = LabelTerm {
            key: "env".to_string(),
            op: LabelOp::Equal,
            values: Vec::new(),
            invert: false,
        };
        assert!(!empty_equal.matches(&l));
        assert!(empty_equal.clone().inverted().matches(&l));

        let empty_in = LabelTerm {
            key: "env".to_string(),
            op: LabelOp::In,
            values: Vec::new(),
            invert: false,
        };
        assert!(!empty_in.matches(&l));
    }

    #[test]
    fn test_ordering_ops() {
        let l = labels(&[("weight", "10")]);

        let lt = |values: &str| LabelTerm {
            key: "weight".to_string(),
            op: LabelOp::Lt,
            values: vec![values.to_string()],
            invert: false,
        };

        // lexicographic: "10" < "9"
        assert!(lt("9").matches(&l));
        assert!(!lt("10").matches(&l));

        let lt_numeric = |values: &str| LabelTerm {
            key: "weight".to_string(),
            op: LabelOp::LtNumeric,
            values: vec![values.to_string()],
            invert: false,
        };

        // numeric: 10 > 9
        assert!(!lt_numeric("9").matches(&l));
        assert!(lt_numeric("11").matches(&l));

        // unparsable operand never matches
        assert!(!lt_numeric("heavy").matches(&l));
    }

    #[test]
    fn test_query_disjunction() {
        let l = labels(&[("env", "prod")]);

        let prod = LabelQuery::new(vec![LabelTerm::equal("env", "prod")]);
        let dev = LabelQuery::new(vec![LabelTerm::equal("env", "dev")]);

        assert!(queries_match(&[], &l));
        assert!(queries_match(&[prod.clone()], &l));
        assert!(queries_match(&[dev.clone(), prod], &l));
        assert!(!queries_match(&[dev], &l));
    }

    #[test]
    fn test_id_query() {
        assert!(IdQuery::default().matches("anything"));
        assert!(IdQuery::matching(["a", "b"]).matches("a"));
        assert!(!IdQuery::matching(["a", "b"]).matches("c"));
    }
}
