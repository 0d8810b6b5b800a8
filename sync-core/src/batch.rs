//! Atomic batch model.
//!
//! A [`Batch`] is an ordered list of store writes that a backend must
//! commit as one unit: either every op is applied or none is.

/// A single store write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Set a string key.
    Set {
        /// Key.
        key: String,
        /// Value.
        value: String,
    },
    /// Delete a string key (no-op when absent).
    Del {
        /// Key.
        key: String,
    },
    /// Add a member to a set.
    SAdd {
        /// Set key.
        set: String,
        /// Member.
        member: String,
    },
    /// Remove a member from a set.
    SRem {
        /// Set key.
        set: String,
        /// Member.
        member: String,
    },
}

/// Ordered collection of writes committed atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a `SET`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.ops.push(BatchOp::Set {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Queue a `DEL`.
    pub fn del(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(BatchOp::Del { key: key.into() });
        self
    }

    /// Queue a `SADD`.
    pub fn sadd(&mut self, set: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.ops.push(BatchOp::SAdd {
            set: set.into(),
            member: member.into(),
        });
        self
    }

    /// Queue a `SREM`.
    pub fn srem(&mut self, set: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.ops.push(BatchOp::SRem {
            set: set.into(),
            member: member.into(),
        });
        self
    }

    /// The queued ops, in order.
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Consume the batch.
    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }

    /// Number of queued ops.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Keys written by `Set` ops, in order.
    pub fn set_keys(&self) -> impl Iterator<Item = &str> {
        self.ops.iter().filter_map(|op| match op {
            BatchOp::Set { key, .. } => Some(key.as_str()),
            _ => None,
        })
    }

    /// Keys removed by `Del` ops, in order.
    pub fn deleted_keys(&self) -> impl Iterator<Item = &str> {
        self.ops.iter().filter_map(|op| match op {
            BatchOp::Del { key } => Some(key.as_str()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ops_keep_insertion_order() {
        let mut batch = Batch::new();
        batch.set("todo:1", "{}").sadd("todo", "todo:1").del("x");

        assert_eq!(batch.len(), 3);
        assert_eq!(
            batch.ops()[1],
            BatchOp::SAdd {
                set: "todo".into(),
                member: "todo:1".into()
            }
        );
        assert_eq!(batch.set_keys().collect::<Vec<_>>(), vec!["todo:1"]);
        assert_eq!(batch.deleted_keys().collect::<Vec<_>>(), vec!["x"]);
    }

    #[test]
    fn empty_batch() {
        let batch = Batch::new();
        assert!(batch.is_empty());
        assert!(batch.into_ops().is_empty());
    }
}
