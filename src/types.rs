//! Typed documents stored by the engine.
//!
//! Every value in the store is one of seven document kinds: [`Set`],
//! [`ZSet`], [`List`], [`Table`], [`Text`], [`Number`], or [`Binary`]. The
//! storage layer treats them as opaque byte blobs; this module owns the
//! mapping between the in-memory types and those blobs (a `bincode` payload
//! per kind, with the kind itself recorded in the segment header rather than
//! in the payload).
//!
//! Collections hold [`Value`] scalars so that lists and tables can mix
//! booleans, integers, floats, and strings the way a JSON document would.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::storage::segment::Kind;

/// A scalar element inside a [`List`] or [`Table`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// An unordered collection of unique string members.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Set {
    members: HashSet<String>,
}

impl Set {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, member: impl Into<String>) {
        self.members.insert(member.into());
    }

    pub fn contains(&self, member: &str) -> bool {
        self.members.contains(member)
    }

    pub fn remove(&mut self, member: &str) -> bool {
        self.members.remove(member)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn clear(&mut self) {
        self.members.clear();
    }

    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(String::as_str)
    }
}

impl FromIterator<String> for Set {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            members: iter.into_iter().collect(),
        }
    }
}

/// A sorted set: string members ranked by a float score, highest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZSet {
    scores: HashMap<String, f64>,
}

impl ZSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a member with the given score, replacing any previous score.
    pub fn add(&mut self, member: impl Into<String>, score: f64) {
        self.scores.insert(member.into(), score);
    }

    pub fn score(&self, member: &str) -> Option<f64> {
        self.scores.get(member).copied()
    }

    pub fn remove(&mut self, member: &str) -> bool {
        self.scores.remove(member).is_some()
    }

    /// Zero-based rank of a member when ordered by descending score.
    pub fn rank(&self, member: &str) -> Option<usize> {
        if !self.scores.contains_key(member) {
            return None;
        }
        self.sorted_members().iter().position(|m| m == member)
    }

    /// Members whose score lies in `[min, max]`, ordered by descending score.
    pub fn range(&self, min: f64, max: f64) -> Vec<String> {
        self.sorted_members()
            .into_iter()
            .filter(|m| {
                let score = self.scores[m.as_str()];
                score >= min && score <= max
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn clear(&mut self) {
        self.scores.clear();
    }

    fn sorted_members(&self) -> Vec<String> {
        let mut members: Vec<String> = self.scores.keys().cloned().collect();
        // Descending by score; member name breaks ties deterministically.
        members.sort_by(|a, b| {
            self.scores[b.as_str()]
                .partial_cmp(&self.scores[a.as_str()])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.cmp(b))
        });
        members
    }
}

/// An ordered sequence of scalar values with deque-style insertion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct List {
    items: Vec<Value>,
}

impl List {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_front(&mut self, item: Value) {
        self.items.insert(0, item);
    }

    pub fn push_back(&mut self, item: Value) {
        self.items.push(item);
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.items.get(index)
    }

    /// Items in `[start, end]`, clamped to the list bounds.
    pub fn range(&self, start: usize, end: usize) -> &[Value] {
        if start >= self.items.len() || start > end {
            return &[];
        }
        let end = (end + 1).min(self.items.len());
        &self.items[start..end]
    }

    /// Removes the first item equal to `item`; returns whether one was found.
    pub fn remove(&mut self, item: &Value) -> bool {
        match self.items.iter().position(|v| v == item) {
            Some(index) => {
                self.items.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }
}

impl FromIterator<Value> for List {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

/// A string-keyed map of scalar values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    entries: HashMap<String, Value>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.entries.insert(field.into(), value);
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.entries.get(field)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.entries.remove(field)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// A plain UTF-8 string document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Text {
    pub content: String,
}

impl Text {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.content
    }
}

/// A numeric document with in-place arithmetic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Number {
    pub value: f64,
}

impl Number {
    pub fn new(value: f64) -> Self {
        Self { value }
    }

    pub fn incr(&mut self, delta: f64) -> f64 {
        self.value += delta;
        self.value
    }

    pub fn decr(&mut self, delta: f64) -> f64 {
        self.value -= delta;
        self.value
    }
}

/// Raw bytes stored without interpretation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Binary {
    pub bytes: Vec<u8>,
}

impl Binary {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Any storable document, tagged with its [`Kind`].
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    Set(Set),
    ZSet(ZSet),
    List(List),
    Text(Text),
    Table(Table),
    Binary(Binary),
    Number(Number),
}

impl Document {
    /// The on-disk kind tag for this document.
    pub fn kind(&self) -> Kind {
        match self {
            Document::Set(_) => Kind::Set,
            Document::ZSet(_) => Kind::ZSet,
            Document::List(_) => Kind::List,
            Document::Text(_) => Kind::Text,
            Document::Table(_) => Kind::Table,
            Document::Binary(_) => Kind::Binary,
            Document::Number(_) => Kind::Number,
        }
    }

    /// Serializes the document payload. The kind tag is not part of the
    /// payload; it lives in the segment header.
    pub(crate) fn encode(&self) -> Result<Vec<u8>> {
        let encoded = match self {
            Document::Set(doc) => bincode::serialize(doc),
            Document::ZSet(doc) => bincode::serialize(doc),
            Document::List(doc) => bincode::serialize(doc),
            Document::Text(doc) => bincode::serialize(doc),
            Document::Table(doc) => bincode::serialize(doc),
            Document::Binary(doc) => bincode::serialize(doc),
            Document::Number(doc) => bincode::serialize(doc),
        };
        encoded.map_err(|err| StoreError::Codec(err.to_string()))
    }

    /// Deserializes a payload previously produced by [`Document::encode`]
    /// for the given kind.
    pub(crate) fn decode(kind: Kind, payload: &[u8]) -> Result<Document> {
        fn de<'a, T: Deserialize<'a>>(payload: &'a [u8]) -> Result<T> {
            bincode::deserialize(payload).map_err(|err| StoreError::Codec(err.to_string()))
        }

        match kind {
            Kind::Set => Ok(Document::Set(de(payload)?)),
            Kind::ZSet => Ok(Document::ZSet(de(payload)?)),
            Kind::List => Ok(Document::List(de(payload)?)),
            Kind::Text => Ok(Document::Text(de(payload)?)),
            Kind::Table => Ok(Document::Table(de(payload)?)),
            Kind::Binary => Ok(Document::Binary(de(payload)?)),
            Kind::Number => Ok(Document::Number(de(payload)?)),
            Kind::Unknown => Err(StoreError::Corrupt(
                "segment carries the unknown kind but is not a tombstone".into(),
            )),
        }
    }

    pub fn into_set(self) -> Result<Set> {
        match self {
            Document::Set(doc) => Ok(doc),
            other => Err(mismatch(Kind::Set, &other)),
        }
    }

    pub fn into_zset(self) -> Result<ZSet> {
        match self {
            Document::ZSet(doc) => Ok(doc),
            other => Err(mismatch(Kind::ZSet, &other)),
        }
    }

    pub fn into_list(self) -> Result<List> {
        match self {
            Document::List(doc) => Ok(doc),
            other => Err(mismatch(Kind::List, &other)),
        }
    }

    pub fn into_text(self) -> Result<Text> {
        match self {
            Document::Text(doc) => Ok(doc),
            other => Err(mismatch(Kind::Text, &other)),
        }
    }

    pub fn into_table(self) -> Result<Table> {
        match self {
            Document::Table(doc) => Ok(doc),
            other => Err(mismatch(Kind::Table, &other)),
        }
    }

    pub fn into_binary(self) -> Result<Binary> {
        match self {
            Document::Binary(doc) => Ok(doc),
            other => Err(mismatch(Kind::Binary, &other)),
        }
    }

    pub fn into_number(self) -> Result<Number> {
        match self {
            Document::Number(doc) => Ok(doc),
            other => Err(mismatch(Kind::Number, &other)),
        }
    }
}

fn mismatch(expected: Kind, actual: &Document) -> StoreError {
    StoreError::KindMismatch {
        expected,
        actual: actual.kind(),
    }
}

impl From<Set> for Document {
    fn from(doc: Set) -> Self {
        Document::Set(doc)
    }
}

impl From<ZSet> for Document {
    fn from(doc: ZSet) -> Self {
        Document::ZSet(doc)
    }
}

impl From<List> for Document {
    fn from(doc: List) -> Self {
        Document::List(doc)
    }
}

impl From<Text> for Document {
    fn from(doc: Text) -> Self {
        Document::Text(doc)
    }
}

impl From<Table> for Document {
    fn from(doc: Table) -> Self {
        Document::Table(doc)
    }
}

impl From<Binary> for Document {
    fn from(doc: Binary) -> Self {
        Document::Binary(doc)
    }
}

impl From<Number> for Document {
    fn from(doc: Number) -> Self {
        Document::Number(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_add_contains_remove() {
        let mut set = Set::new();
        set.add("a");
        set.add("b");
        set.add("a");

        assert_eq!(set.len(), 2);
        assert!(set.contains("a"));
        assert!(set.remove("a"));
        assert!(!set.contains("a"));
        assert!(!set.remove("a"));
    }

    #[test]
    fn zset_rank_orders_by_descending_score() {
        let mut zset = ZSet::new();
        zset.add("bronze", 1.0);
        zset.add("gold", 3.0);
        zset.add("silver", 2.0);

        assert_eq!(zset.rank("gold"), Some(0));
        assert_eq!(zset.rank("silver"), Some(1));
        assert_eq!(zset.rank("bronze"), Some(2));
        assert_eq!(zset.rank("missing"), None);
    }

    #[test]
    fn zset_range_filters_by_score() {
        let mut zset = ZSet::new();
        zset.add("a", 1.0);
        zset.add("b", 5.0);
        zset.add("c", 10.0);

        assert_eq!(zset.range(2.0, 10.0), vec!["c".to_string(), "b".to_string()]);
    }

    #[test]
    fn list_push_and_range() {
        let mut list = List::new();
        list.push_back(Value::Int(2));
        list.push_back(Value::Int(3));
        list.push_front(Value::Int(1));

        assert_eq!(list.get(0), Some(&Value::Int(1)));
        assert_eq!(list.range(0, 1), &[Value::Int(1), Value::Int(2)]);
        assert_eq!(list.range(5, 9), &[] as &[Value]);
        assert!(list.remove(&Value::Int(2)));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn document_payload_round_trips_every_kind() {
        let mut table = Table::new();
        table.insert("enabled", Value::Bool(true));
        table.insert("count", Value::Int(42));

        let mut zset = ZSet::new();
        zset.add("m", 1.5);

        let docs: Vec<Document> = vec![
            ["x".to_string(), "y".to_string()]
                .into_iter()
                .collect::<Set>()
                .into(),
            zset.into(),
            [Value::Text("hello".into()), Value::Null]
                .into_iter()
                .collect::<List>()
                .into(),
            Text::new("document").into(),
            table.into(),
            Binary::new(vec![0u8, 1, 2, 255]).into(),
            Number::new(7.25).into(),
        ];

        for doc in docs {
            let payload = doc.encode().unwrap();
            let decoded = Document::decode(doc.kind(), &payload).unwrap();
            assert_eq!(decoded, doc);
        }
    }

    #[test]
    fn typed_access_rejects_wrong_kind() {
        let doc = Document::Text(Text::new("hello"));
        let err = doc.into_number().unwrap_err();
        assert!(matches!(
            err,
            StoreError::KindMismatch {
                expected: Kind::Number,
                actual: Kind::Text,
            }
        ));
    }
}
