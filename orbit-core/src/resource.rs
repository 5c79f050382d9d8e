//! Resource identity and URL construction.
//!
//! Mirrors `kube-core`'s `ApiResource` + `Request` split: [`Resource`] is the
//! plain value type identifying a kind, and its `get_url` builds the path
//! the way `kube_core::Request`'s per-verb methods do, minus query-string
//! encoding concerns that belong to the transport layer.

use std::fmt;

/// A `(group, version, plural)` triple identifying a Kubernetes kind.
///
/// `group` is empty for the core API (`v1` pods, configmaps, ...).
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Resource {
    pub group: String,
    pub version: String,
    pub plural: String,
}

impl Resource {
    pub fn new(group: impl Into<String>, version: impl Into<String>, plural: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            plural: plural.into(),
        }
    }

    /// `plural[.group]`, the conventional short name used in logs and ids.
    pub fn name(&self) -> String {
        if self.group.is_empty() {
            self.plural.clone()
        } else {
            format!("{}.{}", self.plural, self.group)
        }
    }

    /// `group/version`, or bare `version` for the core group.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    fn prefix(&self) -> String {
        if self.group.is_empty() && self.version == "v1" {
            "/api/v1".to_owned()
        } else {
            format!("/apis/{}/{}", self.group, self.version)
        }
    }

    /// Build the request path for this resource.
    ///
    /// `subresource` (e.g. `"status"`, `"scale"`) requires `name` to be set.
    pub fn get_url(
        &self,
        namespace: Option<&str>,
        name: Option<&str>,
        subresource: Option<&str>,
        params: &[(&str, &str)],
    ) -> Result<String, crate::Error> {
        if subresource.is_some() && name.is_none() {
            return Err(crate::Error::SubresourceRequiresName {
                subresource: subresource.unwrap_or_default().to_owned(),
            });
        }

        let mut url = self.prefix();
        if let Some(ns) = namespace {
            url.push_str("/namespaces/");
            url.push_str(ns);
        }
        url.push('/');
        url.push_str(&self.plural);
        if let Some(n) = name {
            url.push('/');
            url.push_str(n);
        }
        if let Some(sub) = subresource {
            url.push('/');
            url.push_str(sub);
        }
        if !params.is_empty() {
            url.push('?');
            let encoded = params
                .iter()
                .map(|(k, v)| format!("{}={}", urlencode(k), urlencode(v)))
                .collect::<Vec<_>>()
                .join("&");
            url.push_str(&encoded);
        }
        Ok(url)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.plural)
    }
}

/// Minimal percent-encoding sufficient for query parameter values we control
/// (resource versions, json-path label selectors). Not a general-purpose
/// URL encoder.
fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// A [`Resource`] shape where any field may be a `*` wildcard.
///
/// Used only for matching a concrete [`Resource`] against a handler's
/// registration glob; never used to build a URL.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct ResourceGlob {
    pub group: String,
    pub version: String,
    pub plural: String,
}

const WILDCARD: &str = "*";

impl ResourceGlob {
    pub fn new(group: impl Into<String>, version: impl Into<String>, plural: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            plural: plural.into(),
        }
    }

    pub fn any() -> Self {
        Self::new(WILDCARD, WILDCARD, WILDCARD)
    }

    fn field_matches(glob: &str, concrete: &str) -> bool {
        glob == WILDCARD || glob == concrete
    }

    /// True if `resource` matches this glob field-by-field.
    pub fn check(&self, resource: &Resource) -> bool {
        Self::field_matches(&self.group, &resource.group)
            && Self::field_matches(&self.version, &resource.version)
            && Self::field_matches(&self.plural, &resource.plural)
    }
}

impl From<Resource> for ResourceGlob {
    fn from(r: Resource) -> Self {
        Self::new(r.group, r.version, r.plural)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_api_uses_api_v1_prefix() {
        let pods = Resource::new("", "v1", "pods");
        assert_eq!(pods.get_url(None, None, None, &[]).unwrap(), "/api/v1/pods");
        assert_eq!(
            pods.get_url(Some("default"), Some("web-0"), None, &[]).unwrap(),
            "/api/v1/namespaces/default/pods/web-0"
        );
    }

    #[test]
    fn named_group_uses_apis_prefix() {
        let deploy = Resource::new("apps", "v1", "deployments");
        assert_eq!(
            deploy.get_url(Some("kube-system"), None, None, &[]).unwrap(),
            "/apis/apps/v1/namespaces/kube-system/deployments"
        );
    }

    #[test]
    fn subresource_requires_name() {
        let widgets = Resource::new("example.com", "v1", "widgets");
        assert!(widgets.get_url(None, None, Some("status"), &[]).is_err());
        assert_eq!(
            widgets.get_url(None, Some("w1"), Some("status"), &[]).unwrap(),
            "/apis/example.com/v1/widgets/w1/status"
        );
    }

    #[test]
    fn query_params_appended() {
        let pods = Resource::new("", "v1", "pods");
        let url = pods
            .get_url(None, None, None, &[("watch", "true"), ("resourceVersion", "42")])
            .unwrap();
        assert_eq!(url, "/api/v1/pods?watch=true&resourceVersion=42");
    }

    #[test]
    fn glob_matches_wildcards_and_exact_fields() {
        let any_group = ResourceGlob::new(WILDCARD, "v1", "widgets");
        assert!(any_group.check(&Resource::new("example.com", "v1", "widgets")));
        assert!(any_group.check(&Resource::new("", "v1", "widgets")));
        assert!(!any_group.check(&Resource::new("", "v1", "gadgets")));

        assert!(ResourceGlob::any().check(&Resource::new("x", "y", "z")));
    }
}
