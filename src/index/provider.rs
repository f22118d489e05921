// src/index/provider.rs

//! Index snapshots and capability providers
//!
//! An [`IndexSnapshot`] is the immutable product of one parser run. Besides
//! the records in feed order it keeps a name map and a [`ProviderIndex`]
//! mapping every bare capability to the records declaring it.
//!
//! When several records share a name or a capability the choice is fixed:
//! exact architecture, then architecture-independent, then higher origin
//! priority, then first seen in the feed.

use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

use crate::ecosystem::Ecosystem;
use crate::record::{PackageRecord, bare_capability};

/// How well a record's architecture fits the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ArchFit {
    Foreign,
    Independent,
    Exact,
}

fn arch_fit(record: &PackageRecord, target_arch: &str) -> ArchFit {
    if record.architecture == target_arch {
        ArchFit::Exact
    } else if Ecosystem::is_noarch(&record.architecture) {
        ArchFit::Independent
    } else {
        ArchFit::Foreign
    }
}

/// Reverse mapping capability → positions of declaring records
#[derive(Debug, Default)]
pub struct ProviderIndex {
    by_capability: HashMap<String, Vec<usize>>,
}

impl ProviderIndex {
    fn build(records: &[Arc<PackageRecord>]) -> Self {
        let mut by_capability: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, record) in records.iter().enumerate() {
            for capability in record.provides.iter().map(|p| bare_capability(p)) {
                if capability.is_empty() || capability == record.name {
                    continue;
                }
                let entry = by_capability.entry(capability.to_string()).or_default();
                if entry.last() != Some(&idx) {
                    entry.push(idx);
                }
            }
        }
        Self { by_capability }
    }

    fn get(&self, capability: &str) -> &[usize] {
        self.by_capability
            .get(capability)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Number of distinct virtual capabilities
    pub fn len(&self) -> usize {
        self.by_capability.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_capability.is_empty()
    }
}

/// Immutable result of one index parse
#[derive(Debug)]
pub struct IndexSnapshot {
    records: Vec<Arc<PackageRecord>>,
    by_name: HashMap<String, Vec<usize>>,
    providers: ProviderIndex,
    target_arch: String,
    built_at: DateTime<Utc>,
}

impl IndexSnapshot {
    /// Build a snapshot from records in feed order
    pub fn build(records: Vec<PackageRecord>, target_arch: impl Into<String>) -> Self {
        let records: Vec<Arc<PackageRecord>> = records.into_iter().map(Arc::new).collect();
        let mut by_name: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, record) in records.iter().enumerate() {
            by_name.entry(record.name.clone()).or_default().push(idx);
        }
        let providers = ProviderIndex::build(&records);
        Self {
            records,
            by_name,
            providers,
            target_arch: target_arch.into(),
            built_at: Utc::now(),
        }
    }

    /// Merge several snapshots' records (for multi-component repositories)
    pub fn merged(parts: Vec<Vec<PackageRecord>>, target_arch: impl Into<String>) -> Self {
        Self::build(parts.into_iter().flatten().collect(), target_arch)
    }

    /// Pick the preferred record among candidate positions
    fn best(&self, candidates: &[usize]) -> Option<Arc<PackageRecord>> {
        self.ranked(candidates).into_iter().next()
    }

    /// Candidates sorted by preference
    fn ranked(&self, candidates: &[usize]) -> Vec<Arc<PackageRecord>> {
        let mut sorted: Vec<usize> = candidates.to_vec();
        sorted.sort_by_key(|&idx| {
            let record = &self.records[idx];
            (
                Reverse(arch_fit(record, &self.target_arch)),
                Reverse(record.priority),
                idx,
            )
        });
        sorted
            .into_iter()
            .map(|idx| Arc::clone(&self.records[idx]))
            .collect()
    }

    /// Preferred record with exactly this name
    pub fn lookup(&self, name: &str) -> Option<Arc<PackageRecord>> {
        self.best(self.by_name.get(name).map(Vec::as_slice).unwrap_or_default())
    }

    /// Record with this name and pinned version
    pub fn lookup_version(&self, name: &str, version: &str) -> Option<Arc<PackageRecord>> {
        let candidates: Vec<usize> = self
            .by_name
            .get(name)
            .into_iter()
            .flatten()
            .copied()
            .filter(|&idx| self.records[idx].matches_version(version))
            .collect();
        self.best(&candidates)
    }

    /// Every record providing a capability, best first
    pub fn providers(&self, capability: &str) -> Vec<Arc<PackageRecord>> {
        self.ranked(self.providers.get(capability))
    }

    /// Preferred provider of a capability
    pub fn best_provider(&self, capability: &str) -> Option<Arc<PackageRecord>> {
        self.best(self.providers.get(capability))
    }

    /// Every version published under a name, feed order
    pub fn versions(&self, name: &str) -> Vec<Arc<PackageRecord>> {
        self.by_name
            .get(name)
            .into_iter()
            .flatten()
            .map(|&idx| Arc::clone(&self.records[idx]))
            .collect()
    }

    /// Case-insensitive substring search over names and descriptions
    pub fn search(&self, query: &str) -> Vec<Arc<PackageRecord>> {
        let needle = query.to_lowercase();
        self.records
            .iter()
            .filter(|record| {
                record.name.to_lowercase().contains(&needle)
                    || record
                        .description
                        .as_deref()
                        .is_some_and(|d| d.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect()
    }

    pub fn records(&self) -> &[Arc<PackageRecord>] {
        &self.records
    }

    pub fn provider_index(&self) -> &ProviderIndex {
        &self.providers
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn target_arch(&self) -> &str {
        &self.target_arch
    }
}
