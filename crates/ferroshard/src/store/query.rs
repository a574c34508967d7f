use core::cmp::Ordering;

use crate::store::{Snapshot, Value};

/// Comparison operator of a [`Filter`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    Eq,
    Ge,
    Lt,
}

/// A single `field <op> value` predicate. Documents missing the field, or
/// holding a value of a different kind, never match.
#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: Op,
    pub value: Value,
}

impl Filter {
    pub fn matches(&self, snapshot: &Snapshot) -> bool {
        let Some(actual) = snapshot.fields.get(&self.field) else {
            return false;
        };
        match (self.op, actual.partial_cmp(&self.value)) {
            (Op::Eq, Some(Ordering::Equal)) => true,
            (Op::Ge, Some(Ordering::Equal | Ordering::Greater)) => true,
            (Op::Lt, Some(Ordering::Less)) => true,
            _ => false,
        }
    }
}

/// A query over one collection: equality and range filters, an optional
/// ascending order and an optional limit.
///
/// # Example
///
/// ```
/// use ferroshard::Query;
///
/// let query = Query::new("counters/views/shards")
///     .eq("level", "day")
///     .ge("time", 0_i64)
///     .limit(100);
/// assert_eq!(query.filters.len(), 2);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<String>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    fn filter(mut self, field: &str, op: Op, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.to_owned(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(field, Op::Eq, value)
    }

    pub fn ge(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(field, Op::Ge, value)
    }

    pub fn lt(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(field, Op::Lt, value)
    }

    pub fn order_by(mut self, field: &str) -> Self {
        self.order_by = Some(field.to_owned());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, snapshot: &Snapshot) -> bool {
        snapshot.path.collection == self.collection
            && self.filters.iter().all(|f| f.matches(snapshot))
    }

    /// Orders and truncates an already-filtered result set. Documents missing
    /// the order field sort after those that have it; ties keep document id
    /// order.
    pub(crate) fn finish(&self, mut docs: Vec<Snapshot>) -> Vec<Snapshot> {
        if let Some(field) = &self.order_by {
            docs.sort_by(|a, b| match (a.fields.get(field), b.fields.get(field)) {
                (Some(x), Some(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            });
        }
        if let Some(limit) = self.limit {
            docs.truncate(limit);
        }
        docs
    }
}
