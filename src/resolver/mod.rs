// src/resolver/mod.rs

//! Dependency resolution over a package catalog
//!
//! [`DependencyResolver`] walks dependency tokens depth-first with an
//! explicit worklist and emits an [`InstallPlan`] in post-order, so every
//! dependency comes before the packages that need it. Each token is reduced
//! to a bare capability and looked up first as a package name, then through
//! the catalog's providers. Alternatives (`a | b`) are tried left to right.
//!
//! Only the requested package is mandatory. A transitive dependency that
//! cannot be satisfied is recorded in [`InstallPlan::warnings`] and the walk
//! continues. No version-range intersection is attempted.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cancel::CancelSignal;
use crate::error::{Error, Result};
use crate::index::IndexSnapshot;
use crate::record::{PackageRecord, alternatives, bare_capability};

/// Read access to package records for the resolver
///
/// Snapshot-backed ecosystems answer from memory; lazy catalogs (Nix) may
/// fetch on demand, which is why lookups are fallible.
pub trait PackageCatalog {
    /// Preferred record with exactly this name
    fn lookup(&self, name: &str) -> Result<Option<Arc<PackageRecord>>>;

    /// Record with this name and pinned version
    fn lookup_version(&self, name: &str, version: &str) -> Result<Option<Arc<PackageRecord>>> {
        Ok(self.lookup(name)?.filter(|record| record.matches_version(version)))
    }

    /// Preferred record declaring a virtual capability
    fn provider(&self, capability: &str) -> Result<Option<Arc<PackageRecord>>>;
}

impl PackageCatalog for IndexSnapshot {
    fn lookup(&self, name: &str) -> Result<Option<Arc<PackageRecord>>> {
        Ok(IndexSnapshot::lookup(self, name))
    }

    fn lookup_version(&self, name: &str, version: &str) -> Result<Option<Arc<PackageRecord>>> {
        Ok(IndexSnapshot::lookup_version(self, name, version))
    }

    fn provider(&self, capability: &str) -> Result<Option<Arc<PackageRecord>>> {
        Ok(self.best_provider(capability))
    }
}

/// A dependency nothing in the catalog satisfies
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedDependency {
    /// Token as declared by the dependent package
    pub token: String,
    /// Name of the package that declared it
    pub required_by: String,
}

/// Ordered, deduplicated packages to install, dependencies first
#[derive(Debug, Clone, Default)]
pub struct InstallPlan {
    pub nodes: Vec<Arc<PackageRecord>>,
    pub warnings: Vec<UnresolvedDependency>,
}

impl InstallPlan {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Package names in install order
    pub fn names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.iter().any(|n| n.name == name)
    }

    /// The requested package (always last)
    pub fn root(&self) -> Option<&Arc<PackageRecord>> {
        self.nodes.last()
    }
}

/// Per-request resolution knobs
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Pin for the requested package only
    pub version: Option<String>,
    /// Produce a single-node plan
    pub skip_dependencies: bool,
}

/// Outcome of resolving one dependency token
enum Resolution {
    Found(Arc<PackageRecord>),
    HostProvided,
    Missing,
}

/// Requirements the host satisfies without a package
fn is_host_provided(token: &str) -> bool {
    token.starts_with("rpmlib(") || token.starts_with('(')
}

enum Work {
    Visit(Arc<PackageRecord>),
    Emit(Arc<PackageRecord>),
}

/// Worklist resolver generic over its catalog
pub struct DependencyResolver<'a, C: PackageCatalog + ?Sized> {
    catalog: &'a C,
    cancel: Option<&'a CancelSignal>,
}

impl<'a, C: PackageCatalog + ?Sized> DependencyResolver<'a, C> {
    pub fn new(catalog: &'a C) -> Self {
        Self {
            catalog,
            cancel: None,
        }
    }

    /// Check a cancellation signal between nodes
    pub fn with_cancel(mut self, cancel: &'a CancelSignal) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Resolve `name` and its dependencies with a fresh visited set
    pub fn resolve(&self, name: &str, options: &ResolveOptions) -> Result<InstallPlan> {
        let mut visited = HashSet::new();
        self.resolve_with(name, options, &mut visited)
    }

    /// Resolve with a caller-owned visited set
    ///
    /// Names already in `visited` are treated as satisfied and left out of the
    /// plan, which lets a caller resolve several requests without repeating
    /// shared dependencies.
    pub fn resolve_with(
        &self,
        name: &str,
        options: &ResolveOptions,
        visited: &mut HashSet<String>,
    ) -> Result<InstallPlan> {
        let root = self.find_requested(name, options.version.as_deref())?;
        let mut plan = InstallPlan::default();

        if options.skip_dependencies {
            if visited.insert(root.name.clone()) {
                plan.nodes.push(root);
            }
            return Ok(plan);
        }

        let mut stack = vec![Work::Visit(root)];
        while let Some(work) = stack.pop() {
            match work {
                Work::Emit(record) => plan.nodes.push(record),
                Work::Visit(record) => {
                    if !visited.insert(record.name.clone()) {
                        continue;
                    }
                    if let Some(cancel) = self.cancel {
                        cancel.check("dependency resolution")?;
                    }
                    debug!(
                        "Resolving dependencies of {} {}",
                        record.name, record.full_version()
                    );

                    let mut children = Vec::new();
                    for token in record.cleaned_dependencies() {
                        match self.resolve_token(token)? {
                            Resolution::Found(dep) => {
                                if !visited.contains(&dep.name) {
                                    children.push(dep);
                                }
                            }
                            Resolution::HostProvided => {
                                debug!("{} is provided by the host", token);
                            }
                            Resolution::Missing => {
                                warn!("Unresolved dependency '{}' of {}", token, record.name);
                                plan.warnings.push(UnresolvedDependency {
                                    token: token.to_string(),
                                    required_by: record.name.clone(),
                                });
                            }
                        }
                    }

                    stack.push(Work::Emit(record));
                    // Reversed so the first declared dependency is walked first
                    stack.extend(children.into_iter().rev().map(Work::Visit));
                }
            }
        }

        info!(
            "Resolved {} to {} package(s) with {} unresolved dependencies",
            name,
            plan.len(),
            plan.warnings.len()
        );
        Ok(plan)
    }

    /// Record for the requested name, by name first, then by provider
    fn find_requested(&self, name: &str, version: Option<&str>) -> Result<Arc<PackageRecord>> {
        if let Some(version) = version {
            if let Some(record) = self.catalog.lookup_version(name, version)? {
                return Ok(record);
            }
            return Err(match self.catalog.lookup(name)? {
                Some(other) => Error::NotFound(format!(
                    "version {version} of {name} (index has {})",
                    other.full_version()
                )),
                None => Error::NotFound(format!("package {name} version {version}")),
            });
        }

        if let Some(record) = self.catalog.lookup(name)? {
            return Ok(record);
        }
        let capability = bare_capability(name);
        match self.catalog.provider(capability)? {
            Some(record) => {
                debug!("{} is provided by {}", name, record.name);
                Ok(record)
            }
            None => Err(Error::NotFound(format!("package {name}"))),
        }
    }

    fn resolve_token(&self, token: &str) -> Result<Resolution> {
        for alt in alternatives(token) {
            if is_host_provided(alt) {
                return Ok(Resolution::HostProvided);
            }
            let capability = bare_capability(alt);
            if capability.is_empty() {
                continue;
            }
            if let Some(record) = self.lookup_quiet(|c| c.lookup(capability))? {
                return Ok(Resolution::Found(record));
            }
            if let Some(record) = self.lookup_quiet(|c| c.provider(capability))? {
                return Ok(Resolution::Found(record));
            }
        }
        Ok(Resolution::Missing)
    }

    /// Catalog lookup where `NotFound` just means "no record"
    fn lookup_quiet<F>(&self, lookup: F) -> Result<Option<Arc<PackageRecord>>>
    where
        F: FnOnce(&C) -> Result<Option<Arc<PackageRecord>>>,
    {
        match lookup(self.catalog) {
            Err(Error::NotFound(what)) => {
                debug!("Catalog has no {}", what);
                Ok(None)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecosystem::Ecosystem;

    fn rec(name: &str, depends: &[&str], provides: &[&str]) -> PackageRecord {
        let mut record = PackageRecord::new(
            Ecosystem::Alpine,
            name,
            "1.0-r0",
            format!("https://dl-cdn.alpinelinux.org/alpine/v3.20/main/x86_64/{name}-1.0-r0.apk"),
        );
        record.architecture = "x86_64".to_string();
        record.depends = depends.iter().map(|s| s.to_string()).collect();
        record.provides = provides.iter().map(|s| s.to_string()).collect();
        record
    }

    fn snapshot(records: Vec<PackageRecord>) -> IndexSnapshot {
        IndexSnapshot::build(records, "x86_64")
    }

    #[test]
    fn test_provider_dependency_comes_first() {
        let index = snapshot(vec![
            rec(
                "openssl",
                &["so:libcrypto.so.3", "so:libc.musl-x86_64.so.1"],
                &[],
            ),
            rec(
                "libcrypto3",
                &["so:libc.musl-x86_64.so.1"],
                &["so:libcrypto.so.3=3.3.1-r0"],
            ),
            rec("musl", &[], &["so:libc.musl-x86_64.so.1=1"]),
        ]);
        let plan = DependencyResolver::new(&index)
            .resolve("openssl", &ResolveOptions::default())
            .unwrap();
        assert_eq!(plan.names(), vec!["musl", "libcrypto3", "openssl"]);
        assert!(plan.warnings.is_empty());
        assert_eq!(plan.root().unwrap().name, "openssl");
    }

    #[test]
    fn test_cycle_visits_each_once() {
        let index = snapshot(vec![rec("a", &["b"], &[]), rec("b", &["a"], &[])]);
        let plan = DependencyResolver::new(&index)
            .resolve("a", &ResolveOptions::default())
            .unwrap();
        assert_eq!(plan.names(), vec!["b", "a"]);
    }

    #[test]
    fn test_diamond_orders_shared_dependency_first() {
        let index = snapshot(vec![
            rec("app", &["left", "right"], &[]),
            rec("left", &["base"], &[]),
            rec("right", &["base"], &[]),
            rec("base", &[], &[]),
        ]);
        let plan = DependencyResolver::new(&index)
            .resolve("app", &ResolveOptions::default())
            .unwrap();
        assert_eq!(plan.names(), vec!["base", "left", "right", "app"]);
    }

    #[test]
    fn test_higher_priority_provider_wins() {
        let mut low = rec("exim", &[], &["mail-transport-agent"]);
        low.priority = 0;
        let mut high = rec("postfix", &[], &["mail-transport-agent"]);
        high.priority = 10;
        let index = snapshot(vec![low, high, rec("mailx", &["mail-transport-agent"], &[])]);
        for _ in 0..3 {
            let plan = DependencyResolver::new(&index)
                .resolve("mailx", &ResolveOptions::default())
                .unwrap();
            assert_eq!(plan.names(), vec!["postfix", "mailx"]);
        }
    }

    #[test]
    fn test_alternatives_left_to_right() {
        let index = snapshot(vec![
            rec("mutt", &["default-mta | mail-transport-agent"], &[]),
            rec("postfix", &[], &["mail-transport-agent"]),
        ]);
        let plan = DependencyResolver::new(&index)
            .resolve("mutt", &ResolveOptions::default())
            .unwrap();
        assert_eq!(plan.names(), vec!["postfix", "mutt"]);
        assert!(plan.warnings.is_empty());
    }

    #[test]
    fn test_transitive_failure_is_warning() {
        let index = snapshot(vec![rec("curl", &["libcurl (>= 8.0)", "ca-certificates"], &[])]);
        let plan = DependencyResolver::new(&index)
            .resolve("curl", &ResolveOptions::default())
            .unwrap();
        assert_eq!(plan.names(), vec!["curl"]);
        assert_eq!(plan.warnings.len(), 2);
        assert_eq!(
            plan.warnings[0],
            UnresolvedDependency {
                token: "libcurl (>= 8.0)".to_string(),
                required_by: "curl".to_string(),
            }
        );
    }

    #[test]
    fn test_primary_failure_is_not_found() {
        let index = snapshot(vec![rec("curl", &[], &[])]);
        let result = DependencyResolver::new(&index).resolve("wget", &ResolveOptions::default());
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_requested_virtual_name_uses_provider() {
        let index = snapshot(vec![rec("postfix", &[], &["mail-transport-agent"])]);
        let plan = DependencyResolver::new(&index)
            .resolve("mail-transport-agent", &ResolveOptions::default())
            .unwrap();
        assert_eq!(plan.names(), vec!["postfix"]);
    }

    #[test]
    fn test_host_provided_tokens_skipped() {
        let index = snapshot(vec![rec(
            "bash",
            &["rpmlib(CompressedFileNames) <= 3.0.4-1", "(glibc if filesystem)"],
            &[],
        )]);
        let plan = DependencyResolver::new(&index)
            .resolve("bash", &ResolveOptions::default())
            .unwrap();
        assert_eq!(plan.names(), vec!["bash"]);
        assert!(plan.warnings.is_empty());
    }

    #[test]
    fn test_skip_dependencies_single_node() {
        let index = snapshot(vec![rec("a", &["b"], &[]), rec("b", &[], &[])]);
        let options = ResolveOptions {
            skip_dependencies: true,
            ..Default::default()
        };
        let plan = DependencyResolver::new(&index)
            .resolve("a", &options)
            .unwrap();
        assert_eq!(plan.names(), vec!["a"]);
    }

    #[test]
    fn test_pinned_version() {
        let mut old = rec("zlib", &[], &[]);
        old.version = "1.2.13-r0".to_string();
        let index = snapshot(vec![rec("zlib", &[], &[]), old]);
        let options = ResolveOptions {
            version: Some("1.2.13-r0".to_string()),
            ..Default::default()
        };
        let plan = DependencyResolver::new(&index)
            .resolve("zlib", &options)
            .unwrap();
        assert_eq!(plan.root().unwrap().version, "1.2.13-r0");

        let options = ResolveOptions {
            version: Some("9.9".to_string()),
            ..Default::default()
        };
        let result = DependencyResolver::new(&index).resolve("zlib", &options);
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_caller_visited_set_skips_known() {
        let index = snapshot(vec![rec("a", &["b"], &[]), rec("b", &[], &[])]);
        let mut visited = HashSet::from(["b".to_string()]);
        let plan = DependencyResolver::new(&index)
            .resolve_with("a", &ResolveOptions::default(), &mut visited)
            .unwrap();
        assert_eq!(plan.names(), vec!["a"]);
        assert!(visited.contains("a"));
    }

    #[test]
    fn test_cancelled_resolution() {
        let index = snapshot(vec![rec("a", &[], &[])]);
        let cancel = CancelSignal::new();
        cancel.cancel();
        let result = DependencyResolver::new(&index)
            .with_cancel(&cancel)
            .resolve("a", &ResolveOptions::default());
        assert!(matches!(result, Err(Error::Cancelled(_))));
    }
}
