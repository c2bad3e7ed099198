// ABOUTME: Validated graph of sync processors and manifests with dependency-aware scheduling
// ABOUTME: Picks the next runnable manifest per activity, applying taint propagation and error backoff
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Sync Manifest Graph
//!
//! Manifests are grouped by processor. Within a processor they form a DAG
//! through `depends_on`; across processors a processor may `require`
//! another to be fully synced first.
//!
//! For one activity, [`SyncManifestGraph::next_available_manifest`] splits
//! the processor's manifests into completed and pending ones, then taints
//! every manifest that (transitively) depends on a pending one. The first
//! untainted pending manifest in declaration order is the candidate; it is
//! runnable unless its last error is still inside the backoff window.

use std::collections::{HashMap, HashSet};

use peaksync_core::constants::sync::{
    LOCAL_ERROR_BACKOFF_MS, MANIFEST_ACTIVITY_STATS, MANIFEST_ATHLETE_SETTINGS,
    MANIFEST_EXTRA_STREAMS, MANIFEST_FETCH, MANIFEST_PEAKS, PROCESSOR_LOCAL, PROCESSOR_STREAMS,
    STREAMS_ERROR_BACKOFF_MS,
};
use peaksync_core::errors::{AppError, AppResult};
use peaksync_core::models::{ActivitySyncState, SyncManifest};

/// Scheduling verdict for one processor of one activity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextManifest<'a> {
    /// This manifest should run now
    Runnable(&'a SyncManifest),
    /// The candidate failed recently; retry no earlier than `retry_at`
    NotYetAvailable {
        /// The manifest waiting on backoff
        manifest: &'a SyncManifest,
        /// Epoch milliseconds
        retry_at: i64,
    },
    /// Every manifest has succeeded at its current version
    Synced,
}

#[derive(Debug, Clone)]
struct ProcessorGraph {
    name: String,
    requires: Vec<String>,
    manifests: Vec<SyncManifest>,
    index: HashMap<String, usize>,
    /// `dependencies[i]`: indices manifest `i` depends on
    dependencies: Vec<Vec<usize>>,
    /// `dependents[i]`: indices that depend directly on manifest `i`
    dependents: Vec<Vec<usize>>,
}

impl ProcessorGraph {
    fn build(name: String, manifests: Vec<SyncManifest>) -> AppResult<Self> {
        let mut index = HashMap::with_capacity(manifests.len());
        for (i, manifest) in manifests.iter().enumerate() {
            if manifest.name.is_empty() {
                return Err(AppError::config(format!(
                    "processor {name} has a manifest with an empty name"
                )));
            }
            if manifest.version == 0 {
                return Err(AppError::config(format!(
                    "manifest {name}/{} must have a version of at least 1",
                    manifest.name
                )));
            }
            if manifest.error_backoff_base_ms < 0 {
                return Err(AppError::config(format!(
                    "manifest {name}/{} has a negative backoff",
                    manifest.name
                )));
            }
            if index.insert(manifest.name.clone(), i).is_some() {
                return Err(AppError::config(format!(
                    "duplicate manifest {name}/{}",
                    manifest.name
                )));
            }
        }

        let mut dependencies = Vec::with_capacity(manifests.len());
        let mut dependents = vec![Vec::new(); manifests.len()];
        for (i, manifest) in manifests.iter().enumerate() {
            let mut deps = Vec::with_capacity(manifest.depends_on.len());
            for dep in &manifest.depends_on {
                let Some(&j) = index.get(dep) else {
                    return Err(AppError::config(format!(
                        "manifest {name}/{} depends on unknown manifest {dep}",
                        manifest.name
                    )));
                };
                deps.push(j);
                dependents[j].push(i);
            }
            dependencies.push(deps);
        }

        let graph = Self {
            name,
            requires: Vec::new(),
            manifests,
            index,
            dependencies,
            dependents,
        };
        graph.check_acyclic()?;
        Ok(graph)
    }

    /// Kahn's algorithm: every manifest must be reachable in topological order
    fn check_acyclic(&self) -> AppResult<()> {
        let mut in_degree: Vec<usize> = self.dependencies.iter().map(Vec::len).collect();
        let mut ready: Vec<usize> = (0..in_degree.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut visited = 0;
        while let Some(i) = ready.pop() {
            visited += 1;
            for &dependent in &self.dependents[i] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push(dependent);
                }
            }
        }
        if visited == self.manifests.len() {
            Ok(())
        } else {
            let cyclic: Vec<&str> = in_degree
                .iter()
                .enumerate()
                .filter(|(_, degree)| **degree > 0)
                .map(|(i, _)| self.manifests[i].name.as_str())
                .collect();
            Err(AppError::config(format!(
                "dependency cycle in processor {} among {}",
                self.name,
                cyclic.join(", ")
            )))
        }
    }

    fn position(&self, manifest: &str) -> AppResult<usize> {
        self.index.get(manifest).copied().ok_or_else(|| {
            AppError::invalid_input(format!(
                "unknown manifest {manifest} in processor {}",
                self.name
            ))
        })
    }

    /// Every manifest transitively depending on `root`, excluding `root`
    fn transitive_dependents(&self, root: usize) -> Vec<usize> {
        let mut seen = HashSet::new();
        let mut stack = self.dependents[root].clone();
        let mut order = Vec::new();
        while let Some(i) = stack.pop() {
            if seen.insert(i) {
                order.push(i);
                stack.extend(&self.dependents[i]);
            }
        }
        order.sort_unstable();
        order
    }
}

/// Immutable, validated description of all processors and their manifests
#[derive(Debug, Clone)]
pub struct SyncManifestGraph {
    processors: Vec<ProcessorGraph>,
}

impl SyncManifestGraph {
    /// Build a graph from manifests; processors appear in first-seen order.
    ///
    /// # Errors
    ///
    /// Returns a config error for empty names, zero versions, duplicates,
    /// unknown dependencies and dependency cycles
    pub fn new(manifests: Vec<SyncManifest>) -> AppResult<Self> {
        let mut grouped: Vec<(String, Vec<SyncManifest>)> = Vec::new();
        for manifest in manifests {
            if manifest.processor.is_empty() {
                return Err(AppError::config(format!(
                    "manifest {} has an empty processor name",
                    manifest.name
                )));
            }
            match grouped.iter_mut().find(|(name, _)| *name == manifest.processor) {
                Some((_, list)) => list.push(manifest),
                None => grouped.push((manifest.processor.clone(), vec![manifest])),
            }
        }
        let processors = grouped
            .into_iter()
            .map(|(name, manifests)| ProcessorGraph::build(name, manifests))
            .collect::<AppResult<Vec<_>>>()?;
        Ok(Self { processors })
    }

    /// Declare that `processor` only runs once `prerequisite` is synced
    ///
    /// # Errors
    ///
    /// Returns a config error for unknown processors or a self requirement
    pub fn require(mut self, processor: &str, prerequisite: &str) -> AppResult<Self> {
        if processor == prerequisite {
            return Err(AppError::config(format!(
                "processor {processor} cannot require itself"
            )));
        }
        if !self.processors.iter().any(|p| p.name == prerequisite) {
            return Err(AppError::config(format!(
                "processor {processor} requires unknown processor {prerequisite}"
            )));
        }
        let graph = self
            .processors
            .iter_mut()
            .find(|p| p.name == processor)
            .ok_or_else(|| AppError::config(format!("unknown processor {processor}")))?;
        graph.requires.push(prerequisite.to_owned());
        Ok(self)
    }

    /// The built-in pipeline: remote stream fetch, then local derivations
    ///
    /// # Errors
    ///
    /// Never fails for the built-in manifests
    pub fn default_graph() -> AppResult<Self> {
        Self::new(vec![
            SyncManifest::new(PROCESSOR_STREAMS, MANIFEST_FETCH, 1, STREAMS_ERROR_BACKOFF_MS),
            SyncManifest::new(
                PROCESSOR_LOCAL,
                MANIFEST_ATHLETE_SETTINGS,
                1,
                LOCAL_ERROR_BACKOFF_MS,
            ),
            SyncManifest::new(PROCESSOR_LOCAL, MANIFEST_EXTRA_STREAMS, 1, LOCAL_ERROR_BACKOFF_MS),
            SyncManifest::new(PROCESSOR_LOCAL, MANIFEST_PEAKS, 1, LOCAL_ERROR_BACKOFF_MS)
                .depends_on([MANIFEST_EXTRA_STREAMS]),
            SyncManifest::new(PROCESSOR_LOCAL, MANIFEST_ACTIVITY_STATS, 1, LOCAL_ERROR_BACKOFF_MS)
                .depends_on([MANIFEST_EXTRA_STREAMS, MANIFEST_ATHLETE_SETTINGS]),
        ])?
        .require(PROCESSOR_LOCAL, PROCESSOR_STREAMS)
    }

    fn processor(&self, processor: &str) -> AppResult<&ProcessorGraph> {
        self.processors
            .iter()
            .find(|p| p.name == processor)
            .ok_or_else(|| AppError::invalid_input(format!("unknown processor {processor}")))
    }

    /// Processor names in declaration order
    pub fn processors(&self) -> impl Iterator<Item = &str> {
        self.processors.iter().map(|p| p.name.as_str())
    }

    /// Manifests of `processor` in declaration order
    ///
    /// # Errors
    ///
    /// Returns an invalid-input error for an unknown processor
    pub fn manifests(&self, processor: &str) -> AppResult<&[SyncManifest]> {
        Ok(&self.processor(processor)?.manifests)
    }

    /// Look up one manifest
    ///
    /// # Errors
    ///
    /// Returns an invalid-input error for an unknown processor or manifest
    pub fn manifest(&self, processor: &str, name: &str) -> AppResult<&SyncManifest> {
        let graph = self.processor(processor)?;
        Ok(&graph.manifests[graph.position(name)?])
    }

    /// Processors that must be synced before `processor` may run
    ///
    /// # Errors
    ///
    /// Returns an invalid-input error for an unknown processor
    pub fn requirements(&self, processor: &str) -> AppResult<&[String]> {
        Ok(&self.processor(processor)?.requires)
    }

    /// Stable description of every processor, manifest and version
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut parts = Vec::new();
        for processor in &self.processors {
            for manifest in &processor.manifests {
                parts.push(format!(
                    "{}/{}@{}",
                    processor.name, manifest.name, manifest.version
                ));
            }
        }
        parts.join(";")
    }

    /// Whether every manifest of `processor` succeeded at its current version
    ///
    /// # Errors
    ///
    /// Returns an invalid-input error for an unknown processor
    pub fn is_synced(&self, processor: &str, state: &ActivitySyncState) -> AppResult<bool> {
        let graph = self.processor(processor)?;
        Ok(graph.manifests.iter().all(|manifest| {
            state
                .get(processor, &manifest.name)
                .is_some_and(|s| s.has_success(manifest.version))
        }))
    }

    /// Whether every processor required by `processor` is synced
    ///
    /// # Errors
    ///
    /// Returns an invalid-input error for an unknown processor
    pub fn requirements_met(&self, processor: &str, state: &ActivitySyncState) -> AppResult<bool> {
        for required in self.requirements(processor)? {
            if !self.is_synced(required, state)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Pick the next manifest of `processor` to run for one activity
    ///
    /// # Errors
    ///
    /// Returns an invalid-input error for an unknown processor
    pub fn next_available_manifest(
        &self,
        processor: &str,
        state: &ActivitySyncState,
        now_ms: i64,
    ) -> AppResult<NextManifest<'_>> {
        let graph = self.processor(processor)?;
        let pending: Vec<bool> = graph
            .manifests
            .iter()
            .map(|manifest| {
                !state
                    .get(processor, &manifest.name)
                    .is_some_and(|s| s.has_success(manifest.version))
            })
            .collect();

        let mut tainted = vec![false; graph.manifests.len()];
        loop {
            let mut changed = false;
            for (i, deps) in graph.dependencies.iter().enumerate() {
                if !tainted[i] && deps.iter().any(|&d| pending[d] || tainted[d]) {
                    tainted[i] = true;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        let Some(candidate) = (0..graph.manifests.len()).find(|&i| pending[i] && !tainted[i])
        else {
            return Ok(NextManifest::Synced);
        };
        let manifest = &graph.manifests[candidate];
        let retry_at = state
            .get(processor, &manifest.name)
            .and_then(|s| s.retry_at(manifest.error_backoff_base_ms));
        match retry_at {
            Some(retry_at) if now_ms < retry_at => Ok(NextManifest::NotYetAvailable {
                manifest,
                retry_at,
            }),
            _ => Ok(NextManifest::Runnable(manifest)),
        }
    }

    /// Record a successful run. Unless `no_recurse`, every transitive
    /// dependent without an active error is cleared so it re-runs.
    ///
    /// # Errors
    ///
    /// Returns an invalid-input error for an unknown processor or manifest
    pub fn set_sync_success(
        &self,
        state: &mut ActivitySyncState,
        processor: &str,
        manifest: &str,
        no_recurse: bool,
    ) -> AppResult<()> {
        let graph = self.processor(processor)?;
        let i = graph.position(manifest)?;
        state
            .get_mut(processor, manifest)
            .mark_success(graph.manifests[i].version);
        if !no_recurse {
            for dependent in graph.transitive_dependents(i) {
                let name = &graph.manifests[dependent].name;
                if let Some(dependent_state) = state.existing_mut(processor, name) {
                    if !dependent_state.has_error() {
                        dependent_state.clear();
                    }
                }
            }
        }
        Ok(())
    }

    /// Record a failed run at the manifest's current version
    ///
    /// # Errors
    ///
    /// Returns an invalid-input error for an unknown processor or manifest
    pub fn set_sync_error(
        &self,
        state: &mut ActivitySyncState,
        processor: &str,
        manifest: &str,
        now_ms: i64,
        message: impl Into<String>,
    ) -> AppResult<()> {
        let graph = self.processor(processor)?;
        let i = graph.position(manifest)?;
        state
            .get_mut(processor, manifest)
            .mark_error(graph.manifests[i].version, now_ms, message);
        Ok(())
    }

    /// Clear one manifest and, unless `no_recurse`, its transitive
    /// dependents. Error counts are kept.
    ///
    /// # Errors
    ///
    /// Returns an invalid-input error for an unknown processor or manifest
    pub fn clear_sync_state(
        &self,
        state: &mut ActivitySyncState,
        processor: &str,
        manifest: &str,
        no_recurse: bool,
    ) -> AppResult<()> {
        let graph = self.processor(processor)?;
        let i = graph.position(manifest)?;
        let mut targets = vec![i];
        if !no_recurse {
            targets.extend(graph.transitive_dependents(i));
        }
        for target in targets {
            if let Some(target_state) = state.existing_mut(processor, &graph.manifests[target].name)
            {
                target_state.clear();
            }
        }
        Ok(())
    }

    /// Clear every manifest of `processor`
    ///
    /// # Errors
    ///
    /// Returns an invalid-input error for an unknown processor
    pub fn clear_processor(&self, state: &mut ActivitySyncState, processor: &str) -> AppResult<()> {
        let graph = self.processor(processor)?;
        for manifest in &graph.manifests {
            if let Some(manifest_state) = state.existing_mut(processor, &manifest.name) {
                manifest_state.clear();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitive_dependents_are_sorted_and_unique() {
        let graph = ProcessorGraph::build(
            "p".to_owned(),
            vec![
                SyncManifest::new("p", "a", 1, 10),
                SyncManifest::new("p", "b", 1, 10).depends_on(["a"]),
                SyncManifest::new("p", "c", 1, 10).depends_on(["a", "b"]),
            ],
        )
        .unwrap();
        assert_eq!(graph.transitive_dependents(0), vec![1, 2]);
        assert!(graph.transitive_dependents(2).is_empty());
    }

    #[test]
    fn test_default_graph_fingerprint() {
        let graph = SyncManifestGraph::default_graph().unwrap();
        assert_eq!(
            graph.fingerprint(),
            "streams/fetch@1;local/athlete-settings@1;local/extra-streams@1;local/peaks@1;local/activity-stats@1"
        );
        assert_eq!(graph.requirements("local").unwrap(), ["streams".to_owned()]);
    }
}
