//! Structural diff between two JSON snapshots (spec.md §4.2, §8 P1-P3).
//!
//! Lists are treated as opaque values: two different lists are a single
//! `change`, never an element-wise diff. Maps recurse key by key.

use serde_json::{Map, Value};
use std::ops::Deref;

/// An ordered sequence of string keys locating a field within a document.
#[derive(Debug, Clone, Default, Eq, PartialEq, Hash)]
pub struct FieldPath(pub Vec<String>);

impl FieldPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn push(&self, key: impl Into<String>) -> Self {
        let mut v = self.0.clone();
        v.push(key.into());
        Self(v)
    }

    pub fn starts_with(&self, prefix: &FieldPath) -> bool {
        self.0.starts_with(prefix.0.as_slice())
    }
}

impl Deref for FieldPath {
    type Target = [String];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<&str>> for FieldPath {
    fn from(v: Vec<&str>) -> Self {
        Self(v.into_iter().map(str::to_owned).collect())
    }
}

/// The kind of change recorded at a [`FieldPath`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum DiffOp {
    Add,
    Change,
    Remove,
}

/// One `(op, field_path, old, new)` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffEntry {
    pub op: DiffOp,
    pub path: FieldPath,
    pub old: Option<Value>,
    pub new: Option<Value>,
}

impl DiffEntry {
    fn add(path: FieldPath, new: Value) -> Self {
        Self {
            op: DiffOp::Add,
            path,
            old: None,
            new: Some(new),
        }
    }

    fn remove(path: FieldPath, old: Value) -> Self {
        Self {
            op: DiffOp::Remove,
            path,
            old: Some(old),
            new: None,
        }
    }

    fn change(path: FieldPath, old: Value, new: Value) -> Self {
        Self {
            op: DiffOp::Change,
            path,
            old: Some(old),
            new: Some(new),
        }
    }
}

/// An ordered sequence of [`DiffEntry`] values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diff(pub Vec<DiffEntry>);

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DiffEntry> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl IntoIterator for Diff {
    type Item = DiffEntry;
    type IntoIter = std::vec::IntoIter<DiffEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Compute the structural diff between `a` (old) and `b` (new).
pub fn diff(a: &Value, b: &Value) -> Diff {
    let mut out = Vec::new();
    diff_at(&FieldPath::root(), a, b, &mut out);
    Diff(out)
}

fn diff_at(path: &FieldPath, a: &Value, b: &Value, out: &mut Vec<DiffEntry>) {
    if a == b {
        return;
    }
    match (a, b) {
        (Value::Null, _) => out.push(DiffEntry::add(path.clone(), b.clone())),
        (_, Value::Null) => out.push(DiffEntry::remove(path.clone(), a.clone())),
        (Value::Object(ma), Value::Object(mb)) => diff_maps(path, ma, mb, out),
        _ => out.push(DiffEntry::change(path.clone(), a.clone(), b.clone())),
    }
}

fn diff_maps(path: &FieldPath, a: &Map<String, Value>, b: &Map<String, Value>, out: &mut Vec<DiffEntry>) {
    for (k, v) in b {
        if !a.contains_key(k) {
            out.push(DiffEntry::add(path.push(k), v.clone()));
        }
    }
    for (k, v) in a {
        if !b.contains_key(k) {
            out.push(DiffEntry::remove(path.push(k), v.clone()));
        }
    }
    for (k, va) in a {
        if let Some(vb) = b.get(k) {
            diff_at(&path.push(k), va, vb, out);
        }
    }
}

/// Resolve the value at `path` within `doc`, or `None` if the path does not
/// exist (missing key, or descending through a non-object).
pub fn resolve(doc: &Value, path: &FieldPath) -> Option<Value> {
    let mut cur = doc.clone();
    for key in path.iter() {
        cur = cur.as_object()?.get(key)?.clone();
    }
    Some(cur)
}

fn resolve_opt(v: Option<&Value>, suffix: &[String]) -> Option<Value> {
    let mut cur = v?.clone();
    for key in suffix {
        cur = cur.as_object()?.get(key)?.clone();
    }
    Some(cur)
}

/// Rewrite `diff` to describe the change relative to `path`.
///
/// Entries recorded at or below `path` are re-based with `path` stripped off
/// their prefix. Entries recorded above `path` (a shallower `add`/`remove`/
/// `change`) are expanded: the old/new values captured there are resolved
/// down to `path` to synthesize the equivalent leaf-level entry. Entries
/// disjoint from `path` are dropped.
///
/// Invariant: `reduce(diff(a, b), p) == diff(resolve(a, p), resolve(b, p))`
/// (as `Value::Null`-defaulted documents), modulo ordering.
pub fn reduce(diff: &Diff, path: &FieldPath) -> Diff {
    let mut out = Vec::new();
    for e in diff.iter() {
        if e.path.starts_with(path) {
            let rel = FieldPath(e.path.0[path.len()..].to_vec());
            out.push(DiffEntry {
                op: e.op,
                path: rel,
                old: e.old.clone(),
                new: e.new.clone(),
            });
        } else if path.starts_with(&e.path) {
            let suffix = &path.0[e.path.len()..];
            let old_sub = resolve_opt(e.old.as_ref(), suffix);
            let new_sub = resolve_opt(e.new.as_ref(), suffix);
            if let Some(entry) = synth_entry(old_sub, new_sub) {
                out.push(entry);
            }
        }
        // else: path and e.path diverge, entry does not affect `path`.
    }
    Diff(out)
}

fn synth_entry(old_sub: Option<Value>, new_sub: Option<Value>) -> Option<DiffEntry> {
    match (old_sub, new_sub) {
        (None, None) => None,
        (None, Some(n)) => Some(DiffEntry::add(FieldPath::root(), n)),
        (Some(o), None) => Some(DiffEntry::remove(FieldPath::root(), o)),
        (Some(o), Some(n)) if o == n => None,
        (Some(o), Some(n)) => Some(DiffEntry::change(FieldPath::root(), o, n)),
    }
}

/// Apply `diff` (as produced by [`diff`]) to `doc`, reproducing the `b` it
/// was computed against. Used by the P1 round-trip property.
pub fn apply(doc: &Value, diff: &Diff) -> Value {
    let mut out = doc.clone();
    for entry in diff.iter() {
        match entry.op {
            DiffOp::Add | DiffOp::Change => {
                set_at(&mut out, &entry.path, entry.new.clone().unwrap_or(Value::Null));
            }
            DiffOp::Remove => remove_at(&mut out, &entry.path),
        }
    }
    out
}

/// Write `value` at `path` within `doc`, creating intermediate objects as
/// needed. Exposed for callers outside this crate (finalizer management,
/// peer records) that stage fields into an accumulating patch the same way
/// [`crate::progress`] does internally.
pub fn patch_set(doc: &mut Value, path: &FieldPath, value: Value) {
    set_at(doc, path, value)
}

pub(crate) fn set_at(doc: &mut Value, path: &FieldPath, value: Value) {
    if path.is_empty() {
        *doc = value;
        return;
    }
    if !doc.is_object() {
        *doc = Value::Object(Map::new());
    }
    let obj = doc.as_object_mut().expect("coerced to object above");
    let (head, rest) = (&path[0], &path[1..]);
    if rest.is_empty() {
        obj.insert(head.clone(), value);
    } else {
        let child = obj.entry(head.clone()).or_insert(Value::Object(Map::new()));
        set_at(child, &FieldPath(rest.to_vec()), value);
    }
}

fn remove_at(doc: &mut Value, path: &FieldPath) {
    if path.is_empty() {
        *doc = Value::Null;
        return;
    }
    let Some(obj) = doc.as_object_mut() else { return };
    let (head, rest) = (&path[0], &path[1..]);
    if rest.is_empty() {
        obj.remove(head);
    } else if let Some(child) = obj.get_mut(head) {
        remove_at(child, &FieldPath(rest.to_vec()));
    }
}
