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
use std::str::FromStr;

use topo_shared::Scope;
use topo_shared::ScopeNum;
use topo_shared::ScopeSet;
use topo_shared::UnknownScopeError;

use super::CpuInfo;
use super::IntoSelection;
use crate::TopologyResult;

/// Scope of [`CpuInfo::get_cpu_siblings`]: a topology level or the whole system.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SiblingScope {
    Scope(Scope),
    Global,
}

impl From<Scope> for SiblingScope {
    fn from(scope: Scope) -> Self {
        SiblingScope::Scope(scope)
    }
}

impl FromStr for SiblingScope {
    type Err = UnknownScopeError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        if name == "global" {
            return Ok(SiblingScope::Global);
        }
        name.parse::<Scope>()
            .map(SiblingScope::Scope)
            .map_err(|error| {
                UnknownScopeError::new(error.name, format!("{}, global", Scope::valid_names()))
            })
    }
}

impl std::fmt::Display for SiblingScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SiblingScope::Scope(scope) => std::fmt::Display::fmt(scope, f),
            SiblingScope::Global => f.write_str("global"),
        }
    }
}

impl CpuInfo {
    /// Selects CPUs from `cpus` by their index within their `scope` group. CPUs of a group are
    /// indexed from 0 in the level's sort order. The result keeps the order of `cpus`.
    ///
    /// For example, with cores {0: [0, 4], 1: [1, 5], 2: [2, 6]}, index 0 of `[1, 2, 4, 5]` is
    /// `[1, 2]` and index 1 is `[4, 5]`.
    pub fn select_siblings(
        &mut self,
        scope: Scope,
        cpus: impl IntoSelection,
        indexes: &[usize],
    ) -> TopologyResult<Vec<ScopeNum>> {
        let cpus = self.validate_cpus(cpus, true)?;
        let rows = self.topology(scope.flag() | ScopeSet::PACKAGE, scope)?;

        let mut cpu_index = BTreeMap::new();
        let mut group = None;
        let mut index = 0;
        for row in rows.iter().filter(|row| !row.is_noncompute()) {
            let key = (row.get(scope), row.package);
            if group != Some(key) {
                group = Some(key);
                index = 0;
            }
            cpu_index.insert(row.cpu, index);
            index += 1;
        }

        // Offline CPUs have no index.
        Ok(cpus
            .into_iter()
            .filter(|cpu| {
                cpu_index
                    .get(cpu)
                    .is_some_and(|index| indexes.contains(index))
            })
            .collect())
    }

    pub fn select_core_siblings(
        &mut self,
        cpus: impl IntoSelection,
        indexes: &[usize],
    ) -> TopologyResult<Vec<ScopeNum>> {
        self.select_siblings(Scope::Core, cpus, indexes)
    }

    pub fn select_module_siblings(
        &mut self,
        cpus: impl IntoSelection,
        indexes: &[usize],
    ) -> TopologyResult<Vec<ScopeNum>> {
        self.select_siblings(Scope::Module, cpus, indexes)
    }

    /// CPUs sharing `scope` with the online CPU `cpu`, including `cpu` itself.
    pub fn get_cpu_siblings(
        &mut self,
        cpu: ScopeNum,
        scope: impl Into<SiblingScope>,
    ) -> TopologyResult<Vec<ScopeNum>> {
        let scope = match scope.into() {
            SiblingScope::Global => return self.get_cpus(Scope::Cpu),
            SiblingScope::Scope(scope) => scope,
        };

        let row = self.cpu_row(cpu, scope.flag() | ScopeSet::PACKAGE)?;
        let num = row.get(scope);

        match scope {
            Scope::Cpu => Ok(vec![row.cpu]),
            Scope::Core => self.cores_to_cpus(num, row.package, Scope::Cpu),
            Scope::Module => self.modules_to_cpus(num, Scope::Cpu),
            Scope::Die => self.dies_to_cpus(num, row.package, Scope::Cpu),
            Scope::Node => self.nodes_to_cpus(num, Scope::Cpu),
            Scope::Package => self.packages_to_cpus(num, Scope::Cpu),
        }
    }
}
