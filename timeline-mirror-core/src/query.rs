//! Store-agnostic find queries: equality filters on dotted paths, projection, sort and limit.
//!
//! [`FindQuery::evaluate`] gives every [`DocumentStore`](crate::contract::DocumentStore) that
//! keeps documents locally the same query semantics.

use std::cmp::Ordering;

use serde_json::Value;

use crate::contract::{Document, ItemId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindQuery {
    /// Every `(path, value)` pair must match exactly.
    pub filter: Vec<(String, Value)>,
    /// Paths to keep. `None` keeps whole documents.
    pub projection: Option<Vec<String>>,
    pub sort: Vec<(String, SortOrder)>,
    pub limit: Option<usize>,
}

impl FindQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter_eq(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter.push((path.into(), value.into()));
        self
    }

    pub fn project<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.projection = Some(paths.into_iter().map(Into::into).collect());
        self
    }

    pub fn sort_by(mut self, path: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push((path.into(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.filter
            .iter()
            .all(|(path, expected)| lookup(document, path) == Some(expected))
    }

    /// Runs the query over a set of documents.
    pub fn evaluate<'a, I>(&self, documents: I) -> Vec<Document>
    where
        I: IntoIterator<Item = &'a Document>,
    {
        let mut selected: Vec<&Document> =
            documents.into_iter().filter(|d| self.matches(d)).collect();

        if !self.sort.is_empty() {
            selected.sort_by(|a, b| {
                for (path, order) in &self.sort {
                    let ord = compare_values(lookup(a, path), lookup(b, path));
                    let ord = match order {
                        SortOrder::Ascending => ord,
                        SortOrder::Descending => ord.reverse(),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }

        selected
            .into_iter()
            .map(|doc| match &self.projection {
                Some(paths) => project(doc, paths),
                None => doc.clone(),
            })
            .collect()
    }
}

/// Resolves a dotted path such as `user.screen_name`.
pub fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn project(document: &Document, paths: &[String]) -> Document {
    let mut out = Document::new();
    for path in paths {
        if let Some(value) = lookup(document, path) {
            insert_path(&mut out, path, value.clone());
        }
    }
    out
}

fn insert_path(target: &mut Document, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            target.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = target
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Document::new()));
            if let Value::Object(map) = child {
                insert_path(map, rest, value);
            }
        }
    }
}

// Missing < null < bool < number < string; anything else compares equal.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    // numeric strings rank with numbers so item ids sort by value
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None => 0,
            Some(Value::Null) => 1,
            Some(Value::Bool(_)) => 2,
            Some(Value::Number(_)) => 3,
            Some(v @ Value::String(_)) if ItemId::from_value(v).is_some() => 3,
            Some(Value::String(_)) => 4,
            Some(_) => 5,
        }
    }
    fn numeric(v: &Value) -> Option<f64> {
        ItemId::from_value(v)
            .map(|id| id.0 as f64)
            .or_else(|| v.as_f64())
    }

    let (rank_a, rank_b) = (rank(a), rank(b));
    if rank_a != rank_b {
        return rank_a.cmp(&rank_b);
    }
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) if rank_a == 3 => {
            match (ItemId::from_value(x), ItemId::from_value(y)) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => numeric(x)
                    .partial_cmp(&numeric(y))
                    .unwrap_or(Ordering::Equal),
            }
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => Ordering::Equal,
    }
}
