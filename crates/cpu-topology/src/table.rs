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

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::collections::BTreeSet;

use itertools::Itertools;
use serde::Serialize;

use topo_shared::CpuModel;
use topo_shared::Scope;
use topo_shared::ScopeNum;
use topo_shared::ScopeSet;
use topo_shared::NA;

use crate::die_info::DieContext;
use crate::die_info::DieIdentityResolver;
use crate::errors::TopologyError;
use crate::source::TopologySource;
use crate::TopologyResult;

/// Levels which are always fetched together, sysfs exposes them jointly.
const BASE_LEVELS: ScopeSet = ScopeSet::CPU.union(ScopeSet::CORE).union(ScopeSet::PACKAGE);

/// Numbers of one CPU at every level. Rows of non-compute dies have only the package and die
/// numbers, other levels are `NA`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct TopologyRow {
    #[serde(rename = "CPU")]
    pub cpu: ScopeNum,
    pub core: ScopeNum,
    pub module: ScopeNum,
    pub die: ScopeNum,
    pub node: ScopeNum,
    pub package: ScopeNum,
}

impl TopologyRow {
    pub fn new(cpu: ScopeNum) -> Self {
        Self {
            cpu,
            core: NA,
            module: NA,
            die: NA,
            node: NA,
            package: NA,
        }
    }

    pub fn noncompute_die(package: ScopeNum, die: ScopeNum) -> Self {
        Self {
            package,
            die,
            ..Self::new(NA)
        }
    }

    pub fn get(&self, scope: Scope) -> ScopeNum {
        match scope {
            Scope::Cpu => self.cpu,
            Scope::Core => self.core,
            Scope::Module => self.module,
            Scope::Die => self.die,
            Scope::Node => self.node,
            Scope::Package => self.package,
        }
    }

    pub fn is_noncompute(&self) -> bool {
        self.cpu == NA
    }

    /// Compares rows by the sort keys of `order`.
    pub fn cmp_by(&self, other: &Self, order: Scope) -> Ordering {
        let keys = order.sort_keys();
        keys.iter()
            .map(|scope| self.get(*scope))
            .cmp(keys.iter().map(|scope| other.get(*scope)))
    }
}

/// Everything the table needs to fetch missing levels.
pub struct Discovery<'a> {
    pub source: &'a dyn TopologySource,
    pub model: CpuModel,
    pub online: &'a BTreeSet<ScopeNum>,
    pub dies: &'a mut DieIdentityResolver,
}

type Rows = BTreeMap<ScopeNum, TopologyRow>;

/// Lazily populated topology of online CPUs. Levels are fetched the first time they are needed,
/// and the table keeps one sorted view per fetched level.
#[derive(Debug, Default)]
pub struct TopologyTable {
    /// Compute rows keyed by CPU number.
    rows: Rows,
    noncompute: Vec<TopologyRow>,
    orderings: BTreeMap<Scope, Vec<TopologyRow>>,
    initialized: ScopeSet,
}

impl TopologyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialized(&self) -> ScopeSet {
        self.initialized
    }

    /// Returns rows sorted by `order` with at least `levels` filled in. Raw sources are touched
    /// only for levels which are not fetched yet.
    pub fn ensure(
        &mut self,
        levels: ScopeSet,
        order: Scope,
        discovery: &mut Discovery<'_>,
    ) -> TopologyResult<&[TopologyRow]> {
        let missing = (levels | order.sort_key_set()).difference(self.initialized);
        if !missing.is_empty() {
            self.fetch(missing, discovery)?;
        }

        self.orderings
            .get(&order)
            .map(Vec::as_slice)
            .ok_or_else(|| TopologyError::bug(format!("topology is not sorted by {order}")))
    }

    pub fn invalidate(&mut self) {
        *self = Self::default();
    }

    fn fetch(
        &mut self,
        mut missing: ScopeSet,
        discovery: &mut Discovery<'_>,
    ) -> TopologyResult<()> {
        if !self.initialized.contains(BASE_LEVELS) {
            missing |= BASE_LEVELS;
        }
        tracing::debug!(
            "fetching topology levels: {}",
            missing.scopes().map(Scope::name).join(", ")
        );

        // Nothing is committed unless every missing level is fetched.
        let mut rows = if missing.intersects(BASE_LEVELS) {
            fetch_base(discovery)?
        } else {
            self.rows.clone()
        };

        if missing.contains(ScopeSet::MODULE) {
            add_modules(&mut rows, discovery.source)?;
        }
        let noncompute = if missing.contains(ScopeSet::DIE) {
            Some(add_dies(&mut rows, discovery)?)
        } else {
            None
        };
        if missing.contains(ScopeSet::NODE) {
            add_nodes(&mut rows, discovery.source)?;
        }

        self.rows = rows;
        if let Some(noncompute) = noncompute {
            self.noncompute = noncompute;
        }
        self.initialized |= missing;
        self.sort();

        Ok(())
    }

    /// Re-sorts every fetched level, so all views stay valid.
    fn sort(&mut self) {
        let rows = self
            .rows
            .values()
            .chain(&self.noncompute)
            .copied()
            .collect::<Vec<_>>();

        self.orderings = self
            .initialized
            .scopes()
            .map(|order| {
                let mut view = rows.clone();
                view.sort_by(|lhs, rhs| lhs.cmp_by(rhs, order));
                (order, view)
            })
            .collect();
    }
}

fn fetch_base(discovery: &Discovery<'_>) -> TopologyResult<Rows> {
    let cpus = discovery.online.iter().copied().collect::<Vec<_>>();
    let cores_and_packages = discovery.source.cores_and_packages(&cpus)?;

    cpus.into_iter()
        .map(|cpu| -> TopologyResult<(ScopeNum, TopologyRow)> {
            let core_package = cores_and_packages.get(&cpu).ok_or_else(|| {
                TopologyError::bug(format!("no core and package numbers for CPU {cpu}"))
            })?;
            let row = TopologyRow {
                core: core_package.core,
                package: core_package.package,
                ..TopologyRow::new(cpu)
            };
            Ok((cpu, row))
        })
        .collect()
}

fn add_modules(rows: &mut Rows, source: &dyn TopologySource) -> TopologyResult<()> {
    let cpus = rows.keys().copied().collect::<Vec<_>>();

    for cpu in cpus {
        if !matches!(rows.get(&cpu), Some(row) if row.module == NA) {
            continue;
        }

        let Some(group) = source.module_siblings(cpu)? else {
            tracing::debug!("no CPU cache topology info, using core numbers as module numbers");
            for row in rows.values_mut().filter(|row| row.module == NA) {
                row.module = row.core;
            }
            break;
        };

        // Offline siblings have no rows.
        for sibling in group.cpus.iter().chain(std::iter::once(&cpu)) {
            if let Some(row) = rows.get_mut(sibling) {
                row.module = group.id;
            }
        }
    }

    Ok(())
}

/// Fills in compute die numbers and returns rows of non-compute dies.
fn add_dies(rows: &mut Rows, discovery: &mut Discovery<'_>) -> TopologyResult<Vec<TopologyRow>> {
    let cpu_packages = rows
        .values()
        .map(|row| (row.cpu, row.package))
        .collect::<BTreeMap<_, _>>();
    let ctx = DieContext {
        source: discovery.source,
        model: discovery.model,
        cpu_packages: &cpu_packages,
    };

    let compute = discovery.dies.compute_dies(&ctx)?;
    for (&die, cpus) in compute.cpus.values().flatten() {
        for cpu in cpus {
            if let Some(row) = rows.get_mut(cpu) {
                row.die = die;
            }
        }
    }

    if let Some(row) = rows.values().find(|row| row.die == NA) {
        return Err(TopologyError::bug(format!("CPU {} has no die number", row.cpu)));
    }

    match discovery.dies.noncompute_dies(&ctx) {
        Ok(noncompute) => Ok(noncompute
            .dies
            .iter()
            .flat_map(|(&package, dies)| {
                dies.iter()
                    .map(move |&die| TopologyRow::noncompute_die(package, die))
            })
            .collect()),
        Err(TopologyError::Unsupported(error)) => {
            tracing::debug!("{error}, the topology has no non-compute dies");
            Ok(Vec::new())
        }
        Err(error) => Err(error),
    }
}

fn add_nodes(rows: &mut Rows, source: &dyn TopologySource) -> TopologyResult<()> {
    let Some(nodes) = source.numa_nodes()? else {
        tracing::debug!("no NUMA info, all CPUs are in node 0");
        for row in rows.values_mut() {
            row.node = 0;
        }
        return Ok(());
    };

    for (node, cpus) in nodes {
        for cpu in cpus {
            if let Some(row) = rows.get_mut(&cpu) {
                row.node = node;
            }
        }
    }

    match rows.values().find(|row| row.node == NA) {
        Some(row) => Err(TopologyError::bug(format!(
            "CPU {} is not in any NUMA node",
            row.cpu
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cpu: ScopeNum, core: ScopeNum, package: ScopeNum) -> TopologyRow {
        TopologyRow {
            core,
            package,
            ..TopologyRow::new(cpu)
        }
    }

    #[test]
    fn core_order_groups_cores_by_package() {
        let mut rows = vec![row(0, 0, 0), row(1, 0, 1), row(2, 1, 0), row(3, 1, 1), row(4, 0, 0)];
        rows.sort_by(|lhs, rhs| lhs.cmp_by(rhs, Scope::Core));

        let cpus = rows.iter().map(|row| row.cpu).collect::<Vec<_>>();
        assert_eq!(cpus, vec![0, 4, 2, 1, 3]);
    }

    #[test]
    fn noncompute_rows_sort_last_by_cpu() {
        let mut rows = vec![TopologyRow::noncompute_die(0, 3), row(5, 0, 1), row(1, 0, 0)];
        rows.sort_by(|lhs, rhs| lhs.cmp_by(rhs, Scope::Cpu));

        assert_eq!(rows[0].cpu, 1);
        assert_eq!(rows[1].cpu, 5);
        assert!(rows[2].is_noncompute());
        assert_eq!(rows[2].get(Scope::Die), 3);
        assert_eq!(rows[2].get(Scope::Node), NA);
    }

    #[test]
    fn serializes_cpu_with_upper_case_name() {
        let value = serde_json::to_value(row(3, 1, 0)).unwrap();
        assert_eq!(value["CPU"], 3);
        assert_eq!(value["module"], NA);
    }
}
