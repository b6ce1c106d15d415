/*
 * Copyright 2024 Fluence Labs Limited
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use topo_shared::CpuModel;
use topo_shared::ScopeNum;
use topo_shared::NA;

use super::format_die_title;
use super::AgentTypes;
use super::ComputeDies;
use super::DieDescriptor;
use super::DieNumbering;
use super::NonComputeDies;
use super::WalkEntry;
use crate::errors::TopologyError;
use crate::TopologyResult;

/// Numbers UFS clusters without the core agent. Within a package they get consecutive numbers
/// right after the compute dies in walk order. The compute span is at least the number of compute
/// clusters, so compute dies without online CPUs keep their numbers reserved.
pub(crate) fn assign_noncompute_ids(
    walk: &[WalkEntry],
    compute: &ComputeDies,
    model: &CpuModel,
) -> TopologyResult<NonComputeDies> {
    let compute_dies = compute.dies();
    let all_compute = compute_dies
        .values()
        .flatten()
        .copied()
        .collect::<BTreeSet<_>>();

    // A stable grouping, walk order is kept within a package.
    let mut by_package = BTreeMap::<ScopeNum, Vec<&WalkEntry>>::new();
    for entry in walk {
        by_package
            .entry(entry.location.package)
            .or_default()
            .push(entry);
    }

    let total_compute_entries = count_compute(walk.iter());
    let mut global_next = None;

    let mut result = NonComputeDies::default();
    for (&package, entries) in &by_package {
        let noncompute_entries = entries
            .iter()
            .copied()
            .filter(|entry| !entry.is_compute())
            .collect::<Vec<_>>();
        if noncompute_entries.is_empty() {
            continue;
        }

        let compute_entries = count_compute(entries.iter().copied());
        let package_compute = compute_dies
            .get(&package)
            .map(Vec::as_slice)
            .unwrap_or_default();

        if package_compute.is_empty() {
            if compute_entries == 0 {
                return Err(TopologyError::bug(format!(
                    "package {package} has non-compute dies, but no compute dies"
                )));
            }
            tracing::debug!("all CPUs of package {package} are offline, skipping its dies");
            continue;
        }

        let mut next = match (compute.numbering, global_next) {
            (DieNumbering::PerPackage, _) => next_free(package_compute.last(), compute_entries)?,
            (DieNumbering::Global, Some(next)) => next,
            (DieNumbering::Global, None) => next_free(all_compute.last(), total_compute_entries)?,
        };

        let mut descriptors = Vec::with_capacity(noncompute_entries.len());
        for entry in noncompute_entries {
            let die = next;
            if die == NA {
                return Err(TopologyError::bug(format!(
                    "no die numbers left for the non-compute dies of package {package}"
                )));
            }
            next = die + 1;

            let collides = match compute.numbering {
                DieNumbering::PerPackage => package_compute.contains(&die),
                DieNumbering::Global => all_compute.contains(&die),
            };
            if collides {
                return Err(TopologyError::bug(format!(
                    "non-compute die {die} of package {package} collides with a compute die"
                )));
            }

            descriptors.push(DieDescriptor::from_walk(package, die, entry));
        }

        if model.has_imh() {
            retitle_imh(package, &mut descriptors)?;
        }

        if compute.numbering == DieNumbering::Global {
            global_next = Some(next);
        }

        for descriptor in descriptors {
            tracing::debug!(
                "package {package} die {} is a non-compute die: {}",
                descriptor.die,
                descriptor.title
            );
            result.dies.entry(package).or_default().push(descriptor.die);
            result
                .info
                .entry(package)
                .or_default()
                .insert(descriptor.die, descriptor);
        }
    }

    Ok(result)
}

fn count_compute<'a>(entries: impl Iterator<Item = &'a WalkEntry>) -> ScopeNum {
    entries.filter(|entry| entry.is_compute()).count() as ScopeNum
}

fn next_free(
    last_compute: Option<&ScopeNum>,
    compute_span: ScopeNum,
) -> TopologyResult<ScopeNum> {
    let after_last = match last_compute {
        Some(&last) => last.checked_add(1).ok_or_else(|| {
            TopologyError::bug(format!("compute die {last} leaves no room for non-compute dies"))
        })?,
        None => 0,
    };
    Ok(after_last.max(compute_span))
}

/// Every package of an IMH platform has two IMH devices, each with one I/O and one memory
/// cluster. They are titled after the device index in walk order.
fn retitle_imh(package: ScopeNum, descriptors: &mut [DieDescriptor]) -> TopologyResult<()> {
    let mut addrs = Vec::<String>::new();
    for location in descriptors.iter().filter_map(|desc| desc.location.as_ref()) {
        if !addrs.contains(&location.addr) {
            addrs.push(location.addr.clone());
        }
    }

    if addrs.len() != 2 {
        return Err(TopologyError::bug(format!(
            "package {package} has {} IMH devices, expected 2",
            addrs.len()
        )));
    }

    let mut seen = vec![AgentTypes::empty(); addrs.len()];
    for descriptor in descriptors.iter_mut() {
        let index = descriptor
            .location
            .as_ref()
            .and_then(|location| addrs.iter().position(|addr| *addr == location.addr))
            .ok_or_else(|| {
                TopologyError::bug(format!(
                    "die {} of package {package} has no IMH device address",
                    descriptor.die
                ))
            })?;

        let suffix = match descriptor.agents {
            agents if agents == AgentTypes::IO => "I/O",
            agents if agents == AgentTypes::MEMORY => "Mem",
            agents => {
                return Err(TopologyError::bug(format!(
                    "IMH{index} die {} of package {package} has unexpected agents: {}",
                    descriptor.die,
                    format_die_title(agents)
                )))
            }
        };

        if seen[index].intersects(descriptor.agents) {
            return Err(TopologyError::bug(format!(
                "IMH{index} of package {package} has more than one {suffix} die"
            )));
        }
        seen[index] |= descriptor.agents;
        descriptor.title = format!("IMH{index} {suffix}");
    }

    if let Some(index) = seen
        .iter()
        .position(|agents| *agents != (AgentTypes::IO | AgentTypes::MEMORY))
    {
        return Err(TopologyError::bug(format!(
            "IMH{index} of package {package} must have one I/O and one memory die"
        )));
    }

    Ok(())
}
