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

use topo_shared::Scope;
use topo_shared::ScopeNum;
use topo_shared::ScopeSet;

use super::CpuInfo;
use super::IntoSelection;
use super::Selection;
use crate::TopologyResult;

/// One whole element of a level, e.g. a core with all its online CPUs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScopeGroup {
    /// Set only for levels numbered per package (cores and dies).
    pub package: Option<ScopeNum>,
    pub num: ScopeNum,
    pub cpus: Vec<ScopeNum>,
}

/// Result of dividing CPUs by a level.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Division {
    /// Groups fully covered by the input CPUs.
    pub groups: Vec<ScopeGroup>,
    /// Input CPUs which do not make a whole group, in the input order.
    pub leftover: Vec<ScopeNum>,
}

impl Division {
    pub fn nums(&self) -> Vec<ScopeNum> {
        self.groups.iter().map(|group| group.num).collect()
    }

    /// Group numbers keyed by package, for per-package levels.
    pub fn by_package(&self) -> BTreeMap<ScopeNum, Vec<ScopeNum>> {
        let mut result = BTreeMap::<ScopeNum, Vec<ScopeNum>>::new();
        for group in &self.groups {
            if let Some(package) = group.package {
                result.entry(package).or_default().push(group.num);
            }
        }
        result
    }
}

type GroupKey = (Option<ScopeNum>, ScopeNum);

impl CpuInfo {
    /// Splits `cpus` into whole `scope` groups and leftover CPUs. Groups are tried in package
    /// order, then in ascending number order. Offline CPUs are accepted and end up in leftovers.
    pub fn divide_by(
        &mut self,
        scope: Scope,
        cpus: impl IntoSelection,
    ) -> TopologyResult<Division> {
        self.divide(scope, cpus, &Selection::All)
    }

    /// Whole cores in `cpus`, keyed by package, and the leftover CPUs.
    pub fn cpus_div_cores(
        &mut self,
        cpus: impl IntoSelection,
    ) -> TopologyResult<(BTreeMap<ScopeNum, Vec<ScopeNum>>, Vec<ScopeNum>)> {
        let division = self.divide_by(Scope::Core, cpus)?;
        Ok((division.by_package(), division.leftover))
    }

    pub fn cpus_div_modules(
        &mut self,
        cpus: impl IntoSelection,
    ) -> TopologyResult<(Vec<ScopeNum>, Vec<ScopeNum>)> {
        let division = self.divide_by(Scope::Module, cpus)?;
        Ok((division.nums(), division.leftover))
    }

    /// Whole compute dies in `cpus`, keyed by package, and the leftover CPUs.
    pub fn cpus_div_dies(
        &mut self,
        cpus: impl IntoSelection,
    ) -> TopologyResult<(BTreeMap<ScopeNum, Vec<ScopeNum>>, Vec<ScopeNum>)> {
        let division = self.divide_by(Scope::Die, cpus)?;
        Ok((division.by_package(), division.leftover))
    }

    pub fn cpus_div_nodes(
        &mut self,
        cpus: impl IntoSelection,
    ) -> TopologyResult<(Vec<ScopeNum>, Vec<ScopeNum>)> {
        let division = self.divide_by(Scope::Node, cpus)?;
        Ok((division.nums(), division.leftover))
    }

    /// Whole packages in `cpus`, only `packages` are considered.
    pub fn cpus_div_packages(
        &mut self,
        cpus: impl IntoSelection,
        packages: impl IntoSelection,
    ) -> TopologyResult<(Vec<ScopeNum>, Vec<ScopeNum>)> {
        let packages = self.normalize_packages(packages)?;
        let division = self.divide(Scope::Package, cpus, &Selection::Nums(packages))?;
        Ok((division.nums(), division.leftover))
    }

    fn divide(
        &mut self,
        scope: Scope,
        cpus: impl IntoSelection,
        packages: &Selection,
    ) -> TopologyResult<Division> {
        let cpus = self.validate_cpus(cpus, true)?;
        let mut remaining = cpus.iter().copied().collect::<BTreeSet<_>>();

        let mut groups = Vec::new();
        for ((package, num), members) in self.scope_groups(scope, packages)? {
            if !members.is_subset(&remaining) {
                continue;
            }
            remaining.retain(|cpu| !members.contains(cpu));
            groups.push(ScopeGroup {
                package,
                num,
                cpus: members.into_iter().collect(),
            });
        }

        let leftover = cpus
            .into_iter()
            .filter(|cpu| remaining.contains(cpu))
            .collect();

        Ok(Division { groups, leftover })
    }

    /// Online CPUs of every `scope` group of the selected packages. Non-compute dies have no
    /// CPUs and form no groups.
    fn scope_groups(
        &mut self,
        scope: Scope,
        packages: &Selection,
    ) -> TopologyResult<BTreeMap<GroupKey, BTreeSet<ScopeNum>>> {
        let rows = self.topology(scope.flag() | ScopeSet::PACKAGE, scope)?;

        let mut groups = BTreeMap::<GroupKey, BTreeSet<ScopeNum>>::new();
        for row in rows.iter().filter(|row| !row.is_noncompute()) {
            if !packages.contains(row.package) {
                continue;
            }
            let package = scope.is_package_relative().then_some(row.package);
            groups
                .entry((package, row.get(scope)))
                .or_default()
                .insert(row.cpu);
        }

        Ok(groups)
    }
}
