//! The mutable data store backing a run.
//!
//! A [`DataStore`] is a tree of [`serde_json::Value`]s rooted at `data`,
//! addressed by **locations**: dotted paths with optional `[index]`
//! segments, e.g. `user.accounts[2].balance`. Assignment auto-creates
//! missing intermediate containers (objects for key segments, arrays for
//! index segments). The reserved root `_event` exposes the event currently
//! being processed and is only bound while a microstep is handling one.
//!
//! # Examples
//!
//! ```rust
//! use statechart_core::datamodel::DataStore;
//! use serde_json::json;
//!
//! let mut store = DataStore::new();
//! store.assign("user.status", json!("active")).unwrap();
//! store.assign("user.scores[1]", json!(10)).unwrap();
//!
//! assert_eq!(store.read("user.status"), Some(json!("active")));
//! assert_eq!(store.read("user.scores"), Some(json!([null, 10])));
//! ```

use crate::event::Event;
use serde_json::{Map, Value};
use thiserror::Error;

/// Reserved root exposing the event being processed.
pub const EVENT_VARIABLE: &str = "_event";

/// Error raised by location parsing and store mutation.
///
/// Never surfaces to the host directly: the executable-content layer traps
/// it into an `error.assign.invalid-location` platform event.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The location string is empty or syntactically malformed.
    #[error("malformed location '{0}'")]
    MalformedLocation(String),
    /// An intermediate segment exists but is not a container of the
    /// required kind.
    #[error("location '{0}' traverses a non-container value")]
    NotAContainer(String),
    /// Assignment through the reserved `_event` root.
    #[error("location '{0}' is read-only")]
    ReadOnly(String),
}

/// One parsed location segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Object key access.
    Key(String),
    /// Array index access.
    Index(usize),
}

/// Parse a location string into segments.
///
/// Accepts `a.b.c`, `a[0]`, `a.b[2].c`, and bracketed string keys
/// (`a['k']`). Rejects empty locations, empty segments, and unbalanced
/// brackets.
pub fn parse_location(location: &str) -> Result<Vec<Segment>, StoreError> {
    let malformed = || StoreError::MalformedLocation(location.to_string());
    if location.trim().is_empty() {
        return Err(malformed());
    }
    let mut segments = Vec::new();
    let mut rest = location.trim();
    while !rest.is_empty() {
        if let Some(stripped) = rest.strip_prefix('.') {
            rest = stripped;
            if rest.is_empty() {
                return Err(malformed());
            }
            continue;
        }
        if let Some(stripped) = rest.strip_prefix('[') {
            let end = stripped.find(']').ok_or_else(malformed)?;
            let inner = stripped[..end].trim();
            if let Some(quoted) = strip_quotes(inner) {
                segments.push(Segment::Key(quoted.to_string()));
            } else {
                let idx: usize = inner.parse().map_err(|_| malformed())?;
                segments.push(Segment::Index(idx));
            }
            rest = &stripped[end + 1..];
            continue;
        }
        let end = rest.find(['.', '[']).unwrap_or(rest.len());
        let key = &rest[..end];
        if key.is_empty() {
            return Err(malformed());
        }
        segments.push(Segment::Key(key.to_string()));
        rest = &rest[end..];
    }
    if segments.is_empty() {
        return Err(malformed());
    }
    Ok(segments)
}

fn strip_quotes(s: &str) -> Option<&str> {
    let s = s.strip_prefix('\'').and_then(|s| s.strip_suffix('\''))
        .or_else(|| s.strip_prefix('"').and_then(|s| s.strip_suffix('"')))?;
    Some(s)
}

/// The mutable key→value store for one run.
#[derive(Debug, Clone, Default)]
pub struct DataStore {
    data: Value,
    event: Option<Value>,
}

impl DataStore {
    /// An empty store (`data` is an empty object, `_event` unbound).
    pub fn new() -> Self {
        DataStore {
            data: Value::Object(Map::new()),
            event: None,
        }
    }

    /// The full data tree.
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Consume the store, yielding the data tree.
    pub fn into_data(self) -> Value {
        self.data
    }

    /// Bind or unbind the `_event` root.
    pub fn set_event(&mut self, event: Option<&Event>) {
        self.event = event.map(Event::as_value);
    }

    /// Resolve a bare root name, including the reserved `_event`.
    pub fn root(&self, name: &str) -> Option<&Value> {
        if name == EVENT_VARIABLE {
            return self.event.as_ref();
        }
        self.data.get(name)
    }

    /// Read the value at a location, cloning it out of the tree.
    ///
    /// Returns `None` when any segment of the path is absent.
    pub fn read(&self, location: &str) -> Option<Value> {
        let segments = parse_location(location).ok()?;
        let mut cur = if first_is_event(&segments) {
            self.event.as_ref()?
        } else {
            &self.data
        };
        let skip = usize::from(first_is_event(&segments));
        for seg in &segments[skip..] {
            cur = match seg {
                Segment::Key(k) => cur.get(k)?,
                Segment::Index(i) => cur.get(i)?,
            };
        }
        Some(cur.clone())
    }

    /// Write `value` at `location`, creating missing intermediate
    /// containers: objects for key segments, arrays (extended with nulls)
    /// for index segments.
    pub fn assign(&mut self, location: &str, value: Value) -> Result<(), StoreError> {
        let segments = parse_location(location)?;
        if first_is_event(&segments) {
            return Err(StoreError::ReadOnly(location.to_string()));
        }
        let slot = descend(&mut self.data, &segments, location)?;
        *slot = value;
        Ok(())
    }

    /// Delete the leaf key/index at `location`.
    ///
    /// Removing an object key drops it; clearing an array slot nulls it so
    /// sibling indices keep their positions. Clearing an absent location is
    /// a no-op.
    pub fn delete(&mut self, location: &str) -> Result<(), StoreError> {
        let segments = parse_location(location)?;
        if first_is_event(&segments) {
            return Err(StoreError::ReadOnly(location.to_string()));
        }
        let Some((leaf, parents)) = segments.split_last() else {
            return Ok(());
        };
        let mut cur = &mut self.data;
        for seg in parents {
            let next = match seg {
                Segment::Key(k) => cur.get_mut(k.as_str()),
                Segment::Index(i) => cur.get_mut(*i),
            };
            match next {
                Some(v) => cur = v,
                None => return Ok(()),
            }
        }
        match (leaf, &mut *cur) {
            (Segment::Key(k), Value::Object(map)) => {
                map.remove(k);
                Ok(())
            }
            (Segment::Index(i), Value::Array(items)) => {
                if let Some(slot) = items.get_mut(*i) {
                    *slot = Value::Null;
                }
                Ok(())
            }
            (_, Value::Null) => Ok(()),
            _ => Err(StoreError::NotAContainer(location.to_string())),
        }
    }

    /// Seed a root-level name, used for `<data>` declarations and caller
    /// input.
    pub fn seed(&mut self, id: &str, value: Value) {
        if let Value::Object(map) = &mut self.data {
            map.insert(id.to_string(), value);
        }
    }
}

fn first_is_event(segments: &[Segment]) -> bool {
    matches!(segments.first(), Some(Segment::Key(k)) if k == EVENT_VARIABLE)
}

/// Walk to the slot for the final segment, creating intermediates.
fn descend<'a>(
    root: &'a mut Value,
    segments: &[Segment],
    location: &str,
) -> Result<&'a mut Value, StoreError> {
    let mut cur = root;
    for (pos, seg) in segments.iter().enumerate() {
        let last = pos + 1 == segments.len();
        match seg {
            Segment::Key(k) => {
                if cur.is_null() {
                    *cur = Value::Object(Map::new());
                }
                let Value::Object(map) = cur else {
                    return Err(StoreError::NotAContainer(location.to_string()));
                };
                let entry = map.entry(k.clone()).or_insert(Value::Null);
                if !last && entry.is_null() {
                    *entry = Value::Object(Map::new());
                }
                cur = entry;
            }
            Segment::Index(i) => {
                if cur.is_null() {
                    *cur = Value::Array(Vec::new());
                }
                let Value::Array(items) = cur else {
                    return Err(StoreError::NotAContainer(location.to_string()));
                };
                if items.len() <= *i {
                    items.resize(*i + 1, Value::Null);
                }
                let entry = &mut items[*i];
                if !last && entry.is_null() {
                    *entry = Value::Object(Map::new());
                }
                cur = entry;
            }
        }
    }
    Ok(cur)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn assign_creates_intermediate_objects() {
        let mut store = DataStore::new();
        store.assign("user.profile.name", json!("Ada")).unwrap();
        assert_eq!(store.data(), &json!({"user": {"profile": {"name": "Ada"}}}));
    }

    #[test]
    fn assign_index_creates_and_extends_arrays() {
        let mut store = DataStore::new();
        store.assign("xs[2]", json!(7)).unwrap();
        assert_eq!(store.data(), &json!({"xs": [null, null, 7]}));
        store.assign("xs[0].k", json!(true)).unwrap();
        assert_eq!(store.read("xs[0]"), Some(json!({"k": true})));
    }

    #[test]
    fn assign_through_scalar_is_an_error() {
        let mut store = DataStore::new();
        store.assign("n", json!(1)).unwrap();
        let err = store.assign("n.k", json!(2)).unwrap_err();
        assert_eq!(err, StoreError::NotAContainer("n.k".to_string()));
    }

    #[test]
    fn delete_removes_keys_and_keeps_siblings() {
        let mut store = DataStore::new();
        store.seed("user", json!({"name": "John", "id": 1}));
        store.delete("user.name").unwrap();
        assert_eq!(store.data(), &json!({"user": {"id": 1}}));
    }

    #[test]
    fn delete_of_absent_location_is_a_noop() {
        let mut store = DataStore::new();
        store.seed("user", json!({"id": 1}));
        store.delete("user.profile.name").unwrap();
        assert_eq!(store.data(), &json!({"user": {"id": 1}}));
    }

    #[test]
    fn event_root_is_read_only_and_scoped() {
        let mut store = DataStore::new();
        assert_eq!(store.read("_event.name"), None);

        let ev = Event::external("go").with_data(json!({"n": 3}));
        store.set_event(Some(&ev));
        assert_eq!(store.read("_event.name"), Some(json!("go")));
        assert_eq!(store.read("_event.data.n"), Some(json!(3)));
        assert_eq!(
            store.assign("_event.name", json!("x")).unwrap_err(),
            StoreError::ReadOnly("_event.name".to_string())
        );

        store.set_event(None);
        assert_eq!(store.read("_event.name"), None);
    }

    #[test]
    fn bracketed_string_keys_parse() {
        assert_eq!(
            parse_location("a['with space'].b").unwrap(),
            vec![
                Segment::Key("a".to_string()),
                Segment::Key("with space".to_string()),
                Segment::Key("b".to_string()),
            ]
        );
    }

    #[test]
    fn malformed_locations_are_rejected() {
        for loc in ["", ".", "a.", "a..b", "a[", "a[x]", "a[-1]"] {
            assert!(parse_location(loc).is_err(), "expected '{loc}' to be rejected");
        }
    }

    fn location_strategy() -> impl Strategy<Value = String> {
        proptest::collection::vec(
            prop_oneof![
                "[a-z][a-z0-9]{0,4}".prop_map(|k| Segment::Key(k)),
                (0usize..4).prop_map(Segment::Index),
            ],
            1..4,
        )
        .prop_map(|segs| {
            let mut out = String::new();
            for (i, seg) in segs.iter().enumerate() {
                match seg {
                    Segment::Key(k) => {
                        if i > 0 {
                            out.push('.');
                        }
                        out.push_str(k);
                    }
                    Segment::Index(n) => {
                        if i == 0 {
                            // A location cannot start with an index.
                            out.push_str("r");
                        }
                        out.push_str(&format!("[{n}]"));
                    }
                }
            }
            out
        })
    }

    proptest! {
        #[test]
        fn assign_then_read_roundtrips(loc in location_strategy(), n in any::<i64>()) {
            let mut store = DataStore::new();
            prop_assume!(store.assign(&loc, json!(n)).is_ok());
            prop_assert_eq!(store.read(&loc), Some(json!(n)));
        }
    }
}
