//! Sort-by-pattern evaluation and `start-count` ranges.
//!
//! Backends gather `(member, weight)` pairs for a membership set and hand
//! them to [`SortQuery::apply`], so every backend orders results the same
//! way. The weight of a member is the value stored at the query pattern
//! with `*` replaced by the member's id.

use std::cmp::Ordering;

use thiserror::Error;

use crate::keys::{id_from_record_key, sort_key};

/// Marker pattern meaning "do not sort, return raw membership order".
pub const NOSORT: &str = "nosort";

/// Errors raised while evaluating a sort.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SortError {
    /// A weight could not be read as a number in a numeric sort.
    #[error("sort weight for {member} is not numeric: {value:?}")]
    NotNumeric {
        /// Set member whose weight failed to parse.
        member: String,
        /// The offending weight.
        value: String,
    },

    /// The `start-count` range is malformed.
    #[error("invalid range {0:?}: expected \"<start>-<count>\"")]
    InvalidRange(String),
}

/// A page of results: skip `offset`, keep at most `count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeLimit {
    /// Zero-based offset.
    pub offset: usize,
    /// Maximum number of results.
    pub count: usize,
}

impl RangeLimit {
    /// Parse `"<start>-<count>"` where `start` is 1-indexed.
    ///
    /// A start of `0` is treated as `1`.
    pub fn parse(spec: &str) -> Result<Self, SortError> {
        let invalid = || SortError::InvalidRange(spec.to_string());
        let (start, count) = spec.trim().split_once('-').ok_or_else(invalid)?;
        let start: usize = start.trim().parse().map_err(|_| invalid())?;
        let count: usize = count.trim().parse().map_err(|_| invalid())?;
        Ok(Self {
            offset: start.saturating_sub(1),
            count,
        })
    }

    /// Apply the range to an ordered sequence.
    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        items.into_iter().skip(self.offset).take(self.count).collect()
    }
}

/// What to order a membership set by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortTarget {
    /// Raw membership order.
    NoSort,
    /// Weight key pattern containing one `*`.
    Pattern(String),
}

/// A store-native sort request over a membership set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortQuery {
    /// Membership set key (the record type).
    pub set: String,
    /// Ordering source.
    pub target: SortTarget,
    /// Largest first.
    pub desc: bool,
    /// Compare weights as strings instead of numbers.
    pub alpha: bool,
    /// Optional page.
    pub limit: Option<RangeLimit>,
}

impl SortQuery {
    /// An unordered query over every member of `set`.
    pub fn unsorted(set: impl Into<String>) -> Self {
        Self {
            set: set.into(),
            target: SortTarget::NoSort,
            desc: false,
            alpha: false,
            limit: None,
        }
    }

    /// Order the type's members by a sort-indexed property.
    pub fn by_property(record_type: &str, property: &str) -> Self {
        Self {
            target: SortTarget::Pattern(format!("{}*", sort_key(record_type, property))),
            ..Self::unsorted(record_type)
        }
    }

    /// The pattern as a store would receive it (`nosort` when unordered).
    pub fn pattern(&self) -> &str {
        match &self.target {
            SortTarget::NoSort => NOSORT,
            SortTarget::Pattern(p) => p,
        }
    }

    /// The key holding `member`'s weight, if this query sorts.
    pub fn weight_key(&self, member: &str) -> Option<String> {
        match &self.target {
            SortTarget::NoSort => None,
            SortTarget::Pattern(pattern) => {
                let id = id_from_record_key(&self.set, member).unwrap_or(member);
                Some(pattern.replacen('*', id, 1))
            }
        }
    }

    /// Order and page `(member, weight)` pairs.
    ///
    /// Input order is kept for unordered queries. Missing weights sort as
    /// `0` (numeric) or the empty string (alpha); ties fall back to the
    /// member name so results are deterministic.
    pub fn apply(&self, members: Vec<(String, Option<String>)>) -> Result<Vec<String>, SortError> {
        let ordered: Vec<String> = match self.target {
            SortTarget::NoSort => members.into_iter().map(|(m, _)| m).collect(),
            SortTarget::Pattern(_) if self.alpha => {
                let mut rows: Vec<(String, String)> = members
                    .into_iter()
                    .map(|(m, w)| (m, w.unwrap_or_default()))
                    .collect();
                rows.sort_by(|a, b| self.direct(a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0))));
                rows.into_iter().map(|(m, _)| m).collect()
            }
            SortTarget::Pattern(_) => {
                let mut rows = Vec::with_capacity(members.len());
                for (member, weight) in members {
                    let score = match weight {
                        None => 0.0,
                        Some(w) => w.trim().parse::<f64>().map_err(|_| SortError::NotNumeric {
                            member: member.clone(),
                            value: w.clone(),
                        })?,
                    };
                    rows.push((member, score));
                }
                rows.sort_by(|a, b| {
                    self.direct(
                        a.1.partial_cmp(&b.1)
                            .unwrap_or(Ordering::Equal)
                            .then_with(|| a.0.cmp(&b.0)),
                    )
                });
                rows.into_iter().map(|(m, _)| m).collect()
            }
        };

        Ok(match self.limit {
            Some(limit) => limit.apply(ordered),
            None => ordered,
        })
    }

    fn direct(&self, ord: Ordering) -> Ordering {
        if self.desc {
            ord.reverse()
        } else {
            ord
        }
    }
}
