// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Static weighted-service structure for one routing group.

use rand::Rng;
use std::collections::BTreeMap;

/// One routing group: parallel vectors of service names, declared weights
/// and currently-usable weights, plus the cached sum of the usable ones.
///
/// `used[i]` is either `weights[i]` (the service is resolvable somewhere
/// in the catalog) or 0 (it is not). Draws only ever land on services
/// with a non-zero used weight.
#[derive(Debug, Clone)]
pub struct GroupIndex {
    services: Vec<String>,
    weights: Vec<u64>,
    used: Vec<u64>,
    sum: u64,
}

impl GroupIndex {
    /// Build a group from a `{service -> weight}` map.
    ///
    /// Entries with a zero weight are dropped: they could never be drawn.
    /// All services start absent; the caller marks present the ones it can
    /// resolve.
    pub fn new(group: &BTreeMap<String, u64>) -> Self {
        let mut services = Vec::with_capacity(group.len());
        let mut weights = Vec::with_capacity(group.len());

        for (name, &weight) in group {
            if weight == 0 {
                log::warn!("[routing] dropping zero-weighted service '{}'", name);
                continue;
            }
            services.push(name.clone());
            weights.push(weight);
        }

        let used = vec![0; services.len()];

        Self {
            services,
            weights,
            used,
            sum: 0,
        }
    }

    /// Index of `name` inside the group, if it is a member.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.services.iter().position(|service| service == name)
    }

    /// Mark the service at `index` as resolvable.
    pub fn mark_present(&mut self, index: usize) {
        self.sum -= self.used[index];
        self.used[index] = self.weights[index];
        self.sum += self.used[index];
    }

    /// Mark the service at `index` as unresolvable.
    pub fn mark_absent(&mut self, index: usize) {
        self.sum -= self.used[index];
        self.used[index] = 0;
    }

    /// Draw one service, weighted by the usable weights.
    ///
    /// Returns `None` when no member is currently resolvable. The scan is
    /// linear: groups hold tens of services and presence flips more often
    /// than draws happen.
    pub fn pick<R: Rng>(&self, rng: &mut R) -> Option<&str> {
        if self.sum == 0 {
            return None;
        }

        let mut point = rng.gen_range(0..self.sum);

        for (index, &used) in self.used.iter().enumerate() {
            if point < used {
                return Some(&self.services[index]);
            }
            point -= used;
        }

        // Unreachable while sum == Σ used holds.
        None
    }

    pub fn services(&self) -> &[String] {
        &self.services
    }

    pub fn used_weights(&self) -> &[u64] {
        &self.used
    }

    pub fn sum(&self) -> u64 {
        self.sum
    }
}
