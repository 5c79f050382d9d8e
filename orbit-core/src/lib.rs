//! Client-less value types shared by the rest of the orbit workspace.
//!
//! Everything here is pure: no network I/O, no async runtime. `orbit-client`
//! and `orbit-runtime` build their behavior on top of these types.

pub mod cause;
pub mod digest;
pub mod diff;
pub mod error;
pub mod event;
pub mod object;
pub mod peer;
pub mod progress;
pub mod resource;

pub use cause::{Cause, Reason};
pub use diff::{patch_set, Diff, DiffEntry, DiffOp, FieldPath};
pub use error::Error;
pub use event::{RawEvent, WatchEventKind};
pub use object::{ObjectId, ObjectMeta, RawObject};
pub use peer::PeerRecord;
pub use progress::{ProgressRecord, ProgressStore};
pub use resource::{Resource, ResourceGlob};

pub type Result<T, E = Error> = std::result::Result<T, E>;
