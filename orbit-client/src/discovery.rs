//! Runtime API discovery: which `(namespace, resource)` dimensions exist
//! and are worth watching (spec.md §4.5).
//!
//! Grounded on `kube_client::discovery::{Discovery, ApiGroup}`'s caching
//! scan, trimmed of the OpenAPI-schema-validation concerns that are out of
//! scope here (spec.md §1 "CRD YAML generation").

use crate::client::{ApiClient, Transport};
use crate::error::Result;
use orbit_core::resource::{Resource, ResourceGlob};
use std::collections::BTreeSet;

/// A `(namespace, resource)` pair the operator is actively watching.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct Dimension {
    pub namespace: Option<String>,
    pub resource: Resource,
}

/// Tracks the set of active dimensions and which served resources match the
/// registered globs.
pub struct Discovery {
    namespace_globs: Vec<String>,
    resource_globs: Vec<ResourceGlob>,
    namespaces: BTreeSet<String>,
    matched_resources: BTreeSet<Resource>,
}

impl Discovery {
    pub fn new(namespace_globs: Vec<String>, resource_globs: Vec<ResourceGlob>) -> Self {
        Self {
            namespace_globs,
            resource_globs,
            namespaces: BTreeSet::new(),
            matched_resources: BTreeSet::new(),
        }
    }

    /// Whether any configured namespace glob is non-literal (contains `*`),
    /// in which case a namespace meta-watcher is required (spec.md §4.5).
    pub fn needs_namespace_watch(&self) -> bool {
        self.namespace_globs.iter().any(|g| g.contains('*'))
    }

    fn namespace_matches(glob: &str, namespace: &str) -> bool {
        glob == "*" || glob == namespace
    }

    /// Fold a namespace ADD/REMOVE event into the tracked set. Returns
    /// whether the set actually changed.
    pub fn observe_namespace(&mut self, namespace: &str, present: bool) -> bool {
        let matches = self.namespace_globs.iter().any(|g| Self::namespace_matches(g, namespace));
        if !matches {
            return false;
        }
        if present {
            self.namespaces.insert(namespace.to_owned())
        } else {
            self.namespaces.remove(namespace)
        }
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.namespaces.iter().map(String::as_str)
    }

    /// Re-scan the cluster's served resources and update which ones match a
    /// registered glob. Returns the dimensions that should now be watched.
    pub async fn refresh<T: Transport>(&mut self, client: &ApiClient<T>) -> Result<()> {
        let served = client.scan_resources().await?;
        self.matched_resources = served
            .into_iter()
            .filter(|r| self.resource_globs.iter().any(|g| g.check(r)))
            .collect();
        Ok(())
    }

    pub fn matched_resources(&self) -> impl Iterator<Item = &Resource> {
        self.matched_resources.iter()
    }

    /// The Cartesian product of namespaces × resources, i.e. every dimension
    /// `adjust_watchers` should ensure a Watcher exists for.
    pub fn dimensions(&self, cluster_scoped: bool) -> Vec<Dimension> {
        if cluster_scoped || self.namespaces.is_empty() {
            self.matched_resources
                .iter()
                .map(|r| Dimension {
                    namespace: None,
                    resource: r.clone(),
                })
                .collect()
        } else {
            let mut out = Vec::new();
            for ns in &self.namespaces {
                for r in &self.matched_resources {
                    out.push(Dimension {
                        namespace: Some(ns.clone()),
                        resource: r.clone(),
                    });
                }
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_namespace_glob_does_not_need_watch() {
        let d = Discovery::new(vec!["default".into()], vec![]);
        assert!(!d.needs_namespace_watch());
    }

    #[test]
    fn wildcard_namespace_glob_needs_watch() {
        let d = Discovery::new(vec!["team-*".into(), "*".into()], vec![]);
        assert!(d.needs_namespace_watch());
    }

    #[test]
    fn observe_namespace_only_tracks_matching_globs() {
        let mut d = Discovery::new(vec!["default".into()], vec![]);
        assert!(!d.observe_namespace("other", true));
        assert!(d.observe_namespace("default", true));
        assert_eq!(d.namespaces().collect::<Vec<_>>(), vec!["default"]);
    }

    #[test]
    fn dimensions_is_cartesian_product() {
        let mut d = Discovery::new(vec!["a".into(), "b".into()], vec![]);
        d.observe_namespace("a", true);
        d.observe_namespace("b", true);
        d.matched_resources.insert(Resource::new("", "v1", "pods"));
        d.matched_resources.insert(Resource::new("apps", "v1", "deployments"));
        assert_eq!(d.dimensions(false).len(), 4);
    }
}
