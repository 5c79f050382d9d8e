//! The semantic interpretation of a raw event (spec.md §3, §4.8).

use crate::diff::Diff;
use crate::object::{ObjectId, RawObject};
use serde_json::Value;

/// Why a handler is being invoked.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Reason {
    Create,
    Update,
    Delete,
    Resume,
    Timer,
    Event,
    DaemonStart,
    DaemonStop,
}

impl Reason {
    /// Whether this reason belongs to the resource-changing sub-registry
    /// (spec.md §4.9) as opposed to `Event`/timers/daemons.
    pub fn is_resource_changing(self) -> bool {
        matches!(self, Reason::Create | Reason::Update | Reason::Delete | Reason::Resume)
    }
}

/// A fully-derived cause, ready to be matched against the [`Registry`](crate)
/// and passed to a handler.
#[derive(Debug, Clone)]
pub struct Cause {
    pub reason: Reason,
    pub id: ObjectId,
    pub body: RawObject,
    /// The accumulating patch this cause's handlers will write into.
    pub patch: Value,
    /// Present for `Update` causes: the structural diff between the
    /// previously-seen spec and the current one.
    pub diff: Option<Diff>,
    pub old: Option<RawObject>,
    pub new: Option<RawObject>,
}

impl Cause {
    pub fn new(reason: Reason, body: RawObject) -> Option<Self> {
        let id = body.id()?;
        Some(Self {
            reason,
            id,
            body,
            patch: Value::Object(Default::default()),
            diff: None,
            old: None,
            new: None,
        })
    }

    pub fn with_diff(mut self, diff: Diff, old: RawObject, new: RawObject) -> Self {
        self.diff = Some(diff);
        self.old = Some(old);
        self.new = Some(new);
        self
    }
}
