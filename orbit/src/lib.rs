//! Ergonomic facade over the orbit operator framework.
//!
//! Re-exports the pieces most operators need from [`orbit_core`],
//! [`orbit_client`], and [`orbit_runtime`], and layers [`builder::Operator`]
//! on top of [`orbit_runtime::Registry`] for terse handler registration —
//! the same role the original `kube` facade crate plays re-exporting
//! `kube_client`/`kube_runtime` as one `use kube::...` surface.

pub mod builder;

pub use orbit_client::{ApiClient, ConnectionInfo, Discovery, Transport, Vault};
pub use orbit_core::cause::{Cause, Reason};
pub use orbit_core::object::{ObjectId, ObjectMeta, RawObject};
pub use orbit_core::resource::{Resource, ResourceGlob};
pub use orbit_runtime::{
    Activity, Error, HandlerContext, HandlerError, HandlerKind, OperatorConfig, OperatorContext, Result,
};

pub use builder::{HandlerBuilderResult, Operator};

/// Common imports for a handler module: `use orbit::prelude::*;`.
pub mod prelude {
    pub use crate::builder::{HandlerBuilderResult, Operator};
    pub use orbit_core::cause::Reason;
    pub use orbit_runtime::{Filter, HandlerContext, HandlerError, HandlerOptions};
}
