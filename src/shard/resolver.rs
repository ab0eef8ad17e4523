//! Dependency resolution
//!
//! Kahn's algorithm over the registry. Shards that become eligible at the
//! same time are emitted in registration order so the result is
//! deterministic. Resolution is all-or-nothing.

use crate::error::HostError;
use crate::shard::registry::ShardRegistry;
use std::collections::BTreeSet;

/// Compute an initialization order in which every shard follows all of its
/// dependencies.
pub fn resolve(registry: &ShardRegistry) -> Result<Vec<String>, HostError> {
    let count = registry.len();

    // If A depends on B, then B -> A (B must come before A)
    let mut in_degree: Vec<usize> = vec![0; count];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];

    for (idx, definition) in registry.iter().enumerate() {
        for dependency_id in definition.dependency_ids() {
            let dep_idx = registry.position(dependency_id).ok_or_else(|| {
                HostError::MissingDependency {
                    shard_id: definition.id().to_string(),
                    missing_id: dependency_id.clone(),
                }
            })?;
            dependents[dep_idx].push(idx);
            in_degree[idx] += 1;
        }
    }

    // Ready set keyed by registration position gives the tie-break for free
    let mut ready: BTreeSet<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &deg)| deg == 0)
        .map(|(i, _)| i)
        .collect();

    let ids: Vec<&str> = registry.iter().map(|d| d.id()).collect();
    let mut order: Vec<String> = Vec::with_capacity(count);

    while let Some(idx) = ready.pop_first() {
        order.push(ids[idx].to_string());

        for &dependent_idx in &dependents[idx] {
            in_degree[dependent_idx] -= 1;
            if in_degree[dependent_idx] == 0 {
                ready.insert(dependent_idx);
            }
        }
    }

    if order.len() != count {
        let cycle: Vec<String> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &deg)| deg > 0)
            .map(|(i, _)| ids[i].to_string())
            .collect();
        return Err(HostError::DependencyCycle { cycle });
    }

    Ok(order)
}
