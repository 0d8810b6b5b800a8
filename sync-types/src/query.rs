//! Collection query parameters: sorting, paging and conditions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sort direction for collection reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDir {
    /// Smallest first.
    #[default]
    #[serde(alias = "ASC")]
    Asc,
    /// Largest first.
    #[serde(alias = "DESC")]
    Desc,
}

/// `options.sort` on a collection read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    /// Sort-indexed property to order by (unordered when absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by: Option<String>,
    /// Direction.
    #[serde(default)]
    pub dir: SortDir,
    /// `"<start>-<count>"` range with a 1-indexed start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<String>,
    /// Force lexicographic ordering of the property values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpha: Option<bool>,
}

/// Comparison operator usable in `options.where`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    /// Equal.
    #[serde(rename = "==")]
    Eq,
    /// Not equal.
    #[serde(rename = "!=")]
    Ne,
    /// Less than.
    #[serde(rename = "<")]
    Lt,
    /// Less than or equal.
    #[serde(rename = "<=")]
    Le,
    /// Greater than.
    #[serde(rename = ">")]
    Gt,
    /// Greater than or equal.
    #[serde(rename = ">=")]
    Ge,
}

/// A single `field op value` filter applied to collection read results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Record field to test.
    pub field: String,
    /// Operator.
    pub op: CompareOp,
    /// Right-hand operand.
    pub value: Value,
}
