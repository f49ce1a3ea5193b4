// Copyright (c) The opcat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Upgrade-graph traversal for channels: head discovery, cycle detection on
//! the replaces chain, and stranded-bundle reporting.

use crate::errors::{Error, ValidationError};
use crate::model::{join_names, Bundle, Channel};
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use std::collections::{BTreeMap, BTreeSet};

impl Channel {
    /// Returns the channel's head: the unique bundle that no other bundle
    /// in the channel replaces or skips.
    ///
    /// Edges pointing at bundles outside the channel are traversal stubs and
    /// do not participate in head discovery.
    pub fn head(&self) -> Result<&Bundle, Error> {
        let heads = self.graph_heads();
        match heads.len() {
            1 => Ok(&self.bundles[heads[0]]),
            0 => Err(Error::NotFound(format!(
                "no channel head found in channel {:?}",
                self.name
            ))),
            _ => Err(Error::Conflict(format!(
                "multiple channel heads found in channel {:?}: {}",
                self.name,
                join_names(heads.iter().copied())
            ))),
        }
    }

    fn graph_heads(&self) -> Vec<&str> {
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for bundle in self.bundles.values() {
            graph.add_node(bundle.name.as_str());
        }
        for bundle in self.bundles.values() {
            for target in bundle.upgrade_edges() {
                if self.bundles.contains_key(target) {
                    graph.add_edge(bundle.name.as_str(), target, ());
                }
            }
        }
        let mut heads: Vec<&str> = graph
            .nodes()
            .filter(|&n| {
                graph
                    .neighbors_directed(n, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .collect();
        heads.sort_unstable();
        heads
    }

    /// Validates the upgrade graph: exactly one head, no cycles on the
    /// replaces chain, no stranded bundles.
    pub(super) fn validate_upgrade_graph(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        let head = match self.head() {
            Ok(head) => Some(head),
            Err(err) => {
                errors.push(ValidationError::new(err.to_string()));
                None
            }
        };

        let cycles = self.replaces_cycles();
        for cycle in &cycles {
            let mut chain = cycle.clone();
            chain.push(cycle[0].clone());
            errors.push(ValidationError::new(format!(
                "detected cycle in replaces chain of upgrade graph: {}",
                chain.join(" -> ")
            )));
        }

        // Stranded detection only makes sense on an acyclic graph with a
        // well-defined head.
        if let (Some(head), true) = (head, cycles.is_empty()) {
            let mut on_chain: BTreeSet<&str> = BTreeSet::new();
            let mut skipped: BTreeSet<&str> = BTreeSet::new();
            let mut current = Some(head.name.as_str());
            while let Some(name) = current {
                on_chain.insert(name);
                current = match self.bundles.get(name) {
                    Some(bundle) => {
                        skipped.extend(bundle.skips.iter().map(|s| s.as_str()));
                        (!bundle.replaces.is_empty()).then_some(bundle.replaces.as_str())
                    }
                    // The chain left the channel through an external stub.
                    None => None,
                };
            }
            let stranded: Vec<&str> = self
                .bundles
                .keys()
                .map(|name| name.as_str())
                .filter(|name| !on_chain.contains(name) && !skipped.contains(name))
                .collect();
            if !stranded.is_empty() {
                errors.push(ValidationError::new(format!(
                    "channel contains one or more stranded bundles: {}",
                    join_names(stranded)
                )));
            }
        }

        errors
    }

    /// Finds all cycles on the replaces-only path, canonicalized and
    /// deduplicated by rotation.
    ///
    /// The canonical rotation of a cycle starts at its highest-version
    /// bundle (ties broken by name), so the same cycle discovered from
    /// different starting points reports identically.
    fn replaces_cycles(&self) -> Vec<Vec<String>> {
        let mut seen_rotations: BTreeSet<Vec<String>> = BTreeSet::new();
        let mut cycles = Vec::new();

        for start in self.bundles.keys() {
            let mut visited: BTreeMap<&str, usize> = BTreeMap::new();
            let mut order: Vec<&str> = Vec::new();
            let mut current = start.as_str();
            loop {
                if let Some(&pos) = visited.get(current) {
                    let cycle = self.canonicalize_cycle(&order[pos..]);
                    if seen_rotations.insert(cycle.clone()) {
                        cycles.push(cycle);
                    }
                    break;
                }
                visited.insert(current, order.len());
                order.push(current);
                match self.bundles.get(current) {
                    Some(bundle) if !bundle.replaces.is_empty() => {
                        current = bundle.replaces.as_str();
                    }
                    _ => break,
                }
            }
        }
        cycles
    }

    fn canonicalize_cycle(&self, cycle: &[&str]) -> Vec<String> {
        let pivot = cycle
            .iter()
            .enumerate()
            .max_by_key(|&(_, name)| {
                (self.bundles.get(*name).map(|b| b.version.clone()), *name)
            })
            .map(|(idx, _)| idx)
            .unwrap_or(0);
        cycle[pivot..]
            .iter()
            .chain(cycle[..pivot].iter())
            .map(|name| name.to_string())
            .collect()
    }
}

impl Bundle {
    /// The names this bundle's outgoing upgrade edges point at: its
    /// `replaces` target plus all `skips` targets.
    pub(crate) fn upgrade_edges(&self) -> impl Iterator<Item = &str> {
        let replaces = (!self.replaces.is_empty()).then_some(self.replaces.as_str());
        replaces
            .into_iter()
            .chain(self.skips.iter().map(|s| s.as_str()))
    }
}
