//! Namespace → project resolution.
//!
//! Every instance lives in a project namespace. Instances whose namespace
//! does not map to a project are data-integrity failures: the controller
//! refuses to act on them and the metering engine cannot label them.

/// The project an instance belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub slug: String,
    /// Tenancy label reported with every metric.
    pub tenancy: String,
}

pub trait TenancyResolver: Send + Sync {
    fn resolve(&self, namespace: &str) -> Option<Project>;
}

/// Maps `prj-<slug>` namespaces to project `<slug>`.
#[derive(Debug, Clone)]
pub struct PrefixTenancy {
    prefix: String,
}

impl PrefixTenancy {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for PrefixTenancy {
    fn default() -> Self {
        Self::new("prj-")
    }
}

impl TenancyResolver for PrefixTenancy {
    fn resolve(&self, namespace: &str) -> Option<Project> {
        let slug = namespace.strip_prefix(&self.prefix)?;
        if slug.is_empty() {
            return None;
        }
        Some(Project {
            slug: slug.to_string(),
            tenancy: "project".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_prefixed_namespace() {
        let t = PrefixTenancy::default();
        let p = t.resolve("prj-acme").unwrap();
        assert_eq!(p.slug, "acme");
        assert_eq!(p.tenancy, "project");
    }

    #[test]
    fn rejects_foreign_and_empty_slugs() {
        let t = PrefixTenancy::default();
        assert!(t.resolve("kube-system").is_none());
        assert!(t.resolve("prj-").is_none());
    }

    #[test]
    fn custom_prefix() {
        let t = PrefixTenancy::new("team-");
        assert_eq!(t.resolve("team-ops").unwrap().slug, "ops");
        assert!(t.resolve("prj-ops").is_none());
    }
}
