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

mod division;
mod selection;
mod siblings;

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use topo_shared::ranges::rangify;
use topo_shared::CpuModel;
use topo_shared::Scope;
use topo_shared::ScopeNum;
use topo_shared::ScopeSet;
use topo_shared::Vendor;
use topo_shared::NA;

use crate::cache_info::collect_cache_info;
use crate::cache_info::CacheInfo;
use crate::cpu_sets::CpuSets;
use crate::die_info::DieContext;
use crate::die_info::DieIdentityResolver;
use crate::die_info::DiesCpus;
use crate::die_info::DiesInfo;
use crate::die_info::DiesMap;
use crate::errors::TopologyError;
use crate::errors::ValidationError;
use crate::source::HybridCpus;
use crate::source::TopologySource;
use crate::table::Discovery;
use crate::table::TopologyRow;
use crate::table::TopologyTable;
use crate::TopologyResult;

pub use division::Division;
pub use division::ScopeGroup;
pub use selection::IntoSelection;
pub use selection::Selection;
pub use siblings::SiblingScope;

/// Which dies of a package to list.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum DieFilter {
    #[default]
    All,
    /// Dies with CPUs.
    Compute,
    /// Dies without CPUs, such as I/O and memory dies.
    NonCompute,
}

/// Topology of the host: lists, converts and validates CPU, core, module, die, node and package
/// numbers. Levels are read from the source the first time a query needs them and are cached
/// until [`CpuInfo::cpus_hotplugged`] is called.
pub struct CpuInfo {
    source: Box<dyn TopologySource>,
    model: Option<CpuModel>,
    description: Option<String>,
    caches: Option<BTreeMap<String, CacheInfo>>,
    cpu_sets: CpuSets,
    dies: DieIdentityResolver,
    table: TopologyTable,
}

impl CpuInfo {
    pub fn new(source: impl TopologySource + 'static) -> Self {
        Self::from_boxed(Box::new(source))
    }

    pub fn from_boxed(source: Box<dyn TopologySource>) -> Self {
        Self {
            source,
            model: None,
            description: None,
            caches: None,
            cpu_sets: CpuSets::default(),
            dies: DieIdentityResolver::new(),
            table: TopologyTable::new(),
        }
    }

    pub fn cpu_model(&mut self) -> TopologyResult<CpuModel> {
        if let Some(model) = self.model {
            return Ok(model);
        }

        let model = self.source.cpu_model()?;
        tracing::debug!("CPU model: {model}");
        self.model = Some(model);
        Ok(model)
    }

    /// A human-readable processor name. Pre-release Intel parts call themselves "Genuine Intel",
    /// those are described by model number and codename instead.
    pub fn cpu_description(&mut self) -> TopologyResult<String> {
        if let Some(description) = &self.description {
            return Ok(description.clone());
        }

        let model = self.cpu_model()?;
        let model_name = self.source.model_name()?;
        let description = describe_cpu(&model, model_name.as_deref());
        tracing::debug!("CPU description: {description}");
        self.description = Some(description.clone());
        Ok(description)
    }

    /// Caches of online CPUs keyed by name (`L1d`, `L1i`, `L2`, ...), empty if the system does
    /// not report caches.
    pub fn get_cache_info(&mut self) -> TopologyResult<BTreeMap<String, CacheInfo>> {
        if let Some(caches) = &self.caches {
            return Ok(caches.clone());
        }

        let online = self.online()?.iter().copied().collect::<Vec<_>>();
        let caches = collect_cache_info(&*self.source, &online)?;
        self.caches = Some(caches.clone());
        Ok(caches)
    }

    /// Returns a copy of the topology table sorted by `order`. An empty `levels` set means all
    /// levels. Rows of non-compute dies are included only when the die level is requested.
    pub fn get_topology(
        &mut self,
        levels: ScopeSet,
        order: Scope,
    ) -> TopologyResult<Vec<TopologyRow>> {
        let levels = all_if_empty(levels);
        let rows = self.topology(levels, order)?;

        Ok(rows
            .iter()
            .filter(|row| levels.contains(ScopeSet::DIE) || !row.is_noncompute())
            .copied()
            .collect())
    }

    /// Numbers of every level in `levels` the online CPU `cpu` belongs to.
    pub fn get_cpu_levels(
        &mut self,
        cpu: ScopeNum,
        levels: ScopeSet,
    ) -> TopologyResult<BTreeMap<Scope, ScopeNum>> {
        let levels = all_if_empty(levels);
        let row = self.cpu_row(cpu, levels)?;
        Ok(levels.scopes().map(|scope| (scope, row.get(scope))).collect())
    }

    /// Online CPU numbers.
    pub fn get_cpus(&mut self, order: Scope) -> TopologyResult<Vec<ScopeNum>> {
        if order == Scope::Cpu {
            return Ok(self.online()?.iter().copied().collect());
        }
        self.get_scope_nums(Scope::Cpu, Scope::Cpu, Selection::All, order)
    }

    /// Present CPUs which are not online, in ascending order.
    pub fn get_offline_cpus(&mut self) -> TopologyResult<Vec<ScopeNum>> {
        let Self {
            source, cpu_sets, ..
        } = self;
        let online = cpu_sets.online(&**source)?.clone();
        let present = cpu_sets.present(&**source)?;
        Ok(present.difference(&online).copied().collect())
    }

    /// Cores of `package` with at least one online CPU.
    pub fn get_cores(&mut self, package: ScopeNum, order: Scope) -> TopologyResult<Vec<ScopeNum>> {
        self.get_scope_nums(Scope::Core, Scope::Package, package, order)
    }

    pub fn get_modules(&mut self, order: Scope) -> TopologyResult<Vec<ScopeNum>> {
        self.get_scope_nums(Scope::Module, Scope::Module, Selection::All, order)
    }

    /// Dies of `package`. Compute dies are listed only if they have an online CPU.
    pub fn get_dies(
        &mut self,
        package: ScopeNum,
        order: Scope,
        filter: DieFilter,
    ) -> TopologyResult<Vec<ScopeNum>> {
        let dies = self.get_scope_nums(Scope::Die, Scope::Package, package, order)?;
        if filter == DieFilter::All {
            return Ok(dies);
        }

        let compute = self
            .topology(ScopeSet::DIE | ScopeSet::PACKAGE, Scope::Die)?
            .iter()
            .filter(|row| row.package == package && !row.is_noncompute())
            .map(|row| row.die)
            .collect::<BTreeSet<_>>();

        let want_compute = filter == DieFilter::Compute;
        Ok(dies
            .into_iter()
            .filter(|die| compute.contains(die) == want_compute)
            .collect())
    }

    pub fn get_nodes(&mut self, order: Scope) -> TopologyResult<Vec<ScopeNum>> {
        self.get_scope_nums(Scope::Node, Scope::Node, Selection::All, order)
    }

    pub fn get_packages(&mut self, order: Scope) -> TopologyResult<Vec<ScopeNum>> {
        self.get_scope_nums(Scope::Package, Scope::Package, Selection::All, order)
    }

    pub fn get_cpus_count(&mut self) -> TopologyResult<usize> {
        Ok(self.online()?.len())
    }

    pub fn get_offline_cpus_count(&mut self) -> TopologyResult<usize> {
        Ok(self.get_offline_cpus()?.len())
    }

    pub fn get_cores_count(&mut self, package: ScopeNum) -> TopologyResult<usize> {
        Ok(self.get_cores(package, Scope::Core)?.len())
    }

    pub fn get_modules_count(&mut self) -> TopologyResult<usize> {
        Ok(self.get_modules(Scope::Module)?.len())
    }

    pub fn get_dies_count(
        &mut self,
        package: ScopeNum,
        filter: DieFilter,
    ) -> TopologyResult<usize> {
        Ok(self.get_dies(package, Scope::Die, filter)?.len())
    }

    pub fn get_nodes_count(&mut self) -> TopologyResult<usize> {
        Ok(self.get_nodes(Scope::Node)?.len())
    }

    pub fn get_packages_count(&mut self) -> TopologyResult<usize> {
        Ok(self.get_packages(Scope::Package)?.len())
    }

    /// Returns `child` numbers of the `parent` elements in `selection`, deduplicated and sorted
    /// by `order`. For example, the CPUs of cores 1 and 3 in core order, or the nodes of package
    /// 1. Fails if `parent` cannot contain `child`, or if a selected parent number does not exist.
    pub fn get_scope_nums(
        &mut self,
        child: Scope,
        parent: Scope,
        selection: impl IntoSelection,
        order: Scope,
    ) -> TopologyResult<Vec<ScopeNum>> {
        if !parent.can_contain(child) {
            return Err(ValidationError::BadContainment { child, parent }.into());
        }

        let selection = selection.into_selection(parent)?;
        let rows = self.topology(child.flag() | parent.flag(), order)?;

        let mut result = Vec::new();
        let mut seen = BTreeSet::new();
        let mut valid = BTreeSet::new();

        for row in rows {
            let parent_num = row.get(parent);
            if parent_num == NA {
                continue;
            }
            valid.insert(parent_num);

            let child_num = row.get(child);
            if child_num == NA {
                continue;
            }
            if selection.contains(parent_num) && seen.insert(child_num) {
                result.push(child_num);
            }
        }

        if let Selection::Nums(nums) = &selection {
            let invalid = nums
                .iter()
                .copied()
                .filter(|num| !valid.contains(num))
                .collect::<Vec<_>>();
            if !invalid.is_empty() {
                return Err(
                    ValidationError::do_not_exist(parent, rangify(invalid), rangify(valid)).into(),
                );
            }
        }

        Ok(result)
    }

    pub fn package_to_cpus(
        &mut self,
        package: ScopeNum,
        order: Scope,
    ) -> TopologyResult<Vec<ScopeNum>> {
        self.get_scope_nums(Scope::Cpu, Scope::Package, package, order)
    }

    pub fn package_to_cores(
        &mut self,
        package: ScopeNum,
        order: Scope,
    ) -> TopologyResult<Vec<ScopeNum>> {
        self.get_scope_nums(Scope::Core, Scope::Package, package, order)
    }

    pub fn package_to_modules(
        &mut self,
        package: ScopeNum,
        order: Scope,
    ) -> TopologyResult<Vec<ScopeNum>> {
        self.get_scope_nums(Scope::Module, Scope::Package, package, order)
    }

    pub fn package_to_dies(
        &mut self,
        package: ScopeNum,
        order: Scope,
    ) -> TopologyResult<Vec<ScopeNum>> {
        self.get_scope_nums(Scope::Die, Scope::Package, package, order)
    }

    pub fn package_to_nodes(
        &mut self,
        package: ScopeNum,
        order: Scope,
    ) -> TopologyResult<Vec<ScopeNum>> {
        self.get_scope_nums(Scope::Node, Scope::Package, package, order)
    }

    /// Online CPUs of `cores` in `packages`. Core numbers are per-package.
    pub fn cores_to_cpus(
        &mut self,
        cores: impl IntoSelection,
        packages: impl IntoSelection,
        order: Scope,
    ) -> TopologyResult<Vec<ScopeNum>> {
        let by_core = self.get_scope_nums(Scope::Cpu, Scope::Core, cores, order)?;
        self.keep_in_packages(by_core, packages)
    }

    pub fn modules_to_cpus(
        &mut self,
        modules: impl IntoSelection,
        order: Scope,
    ) -> TopologyResult<Vec<ScopeNum>> {
        self.get_scope_nums(Scope::Cpu, Scope::Module, modules, order)
    }

    /// Online CPUs of `dies` in `packages`. Die numbers may be per-package.
    pub fn dies_to_cpus(
        &mut self,
        dies: impl IntoSelection,
        packages: impl IntoSelection,
        order: Scope,
    ) -> TopologyResult<Vec<ScopeNum>> {
        let by_die = self.get_scope_nums(Scope::Cpu, Scope::Die, dies, order)?;
        self.keep_in_packages(by_die, packages)
    }

    pub fn nodes_to_cpus(
        &mut self,
        nodes: impl IntoSelection,
        order: Scope,
    ) -> TopologyResult<Vec<ScopeNum>> {
        self.get_scope_nums(Scope::Cpu, Scope::Node, nodes, order)
    }

    pub fn packages_to_cpus(
        &mut self,
        packages: impl IntoSelection,
        order: Scope,
    ) -> TopologyResult<Vec<ScopeNum>> {
        self.get_scope_nums(Scope::Cpu, Scope::Package, packages, order)
    }

    /// Validates CPU numbers and returns them deduplicated in ascending order. Offline CPUs are
    /// accepted only if `offline_ok` is set.
    pub fn normalize_cpus(
        &mut self,
        cpus: impl IntoSelection,
        offline_ok: bool,
    ) -> TopologyResult<Vec<ScopeNum>> {
        let mut cpus = self.validate_cpus(cpus, offline_ok)?;
        cpus.sort_unstable();
        Ok(cpus)
    }

    /// Validates core numbers of package `package`.
    pub fn normalize_cores(
        &mut self,
        cores: impl IntoSelection,
        package: ScopeNum,
    ) -> TopologyResult<Vec<ScopeNum>> {
        let selection = cores.into_selection(Scope::Core)?;
        let valid = self.package_to_cores(package, Scope::Core)?;
        normalize(Scope::Core, selection, valid, &format!(" in package {package}"))
    }

    pub fn normalize_modules(
        &mut self,
        modules: impl IntoSelection,
    ) -> TopologyResult<Vec<ScopeNum>> {
        let selection = modules.into_selection(Scope::Module)?;
        let valid = self.get_modules(Scope::Module)?;
        normalize(Scope::Module, selection, valid, "")
    }

    /// Validates die numbers of package `package`, both compute and non-compute dies.
    pub fn normalize_dies(
        &mut self,
        dies: impl IntoSelection,
        package: ScopeNum,
    ) -> TopologyResult<Vec<ScopeNum>> {
        let selection = dies.into_selection(Scope::Die)?;
        let valid = self.package_to_dies(package, Scope::Die)?;
        normalize(Scope::Die, selection, valid, &format!(" in package {package}"))
    }

    pub fn normalize_nodes(&mut self, nodes: impl IntoSelection) -> TopologyResult<Vec<ScopeNum>> {
        let selection = nodes.into_selection(Scope::Node)?;
        let valid = self.get_nodes(Scope::Node)?;
        normalize(Scope::Node, selection, valid, "")
    }

    pub fn normalize_packages(
        &mut self,
        packages: impl IntoSelection,
    ) -> TopologyResult<Vec<ScopeNum>> {
        let selection = packages.into_selection(Scope::Package)?;
        let valid = self.get_packages(Scope::Package)?;
        normalize(Scope::Package, selection, valid, "")
    }

    pub fn normalize_cpu(&mut self, cpu: ScopeNum) -> TopologyResult<ScopeNum> {
        let cpus = self.normalize_cpus(cpu, false)?;
        single(Scope::Cpu, cpus)
    }

    pub fn normalize_core(
        &mut self,
        core: ScopeNum,
        package: ScopeNum,
    ) -> TopologyResult<ScopeNum> {
        let cores = self.normalize_cores(core, package)?;
        single(Scope::Core, cores)
    }

    pub fn normalize_module(&mut self, module: ScopeNum) -> TopologyResult<ScopeNum> {
        let modules = self.normalize_modules(module)?;
        single(Scope::Module, modules)
    }

    pub fn normalize_die(&mut self, die: ScopeNum, package: ScopeNum) -> TopologyResult<ScopeNum> {
        let dies = self.normalize_dies(die, package)?;
        single(Scope::Die, dies)
    }

    pub fn normalize_node(&mut self, node: ScopeNum) -> TopologyResult<ScopeNum> {
        let nodes = self.normalize_nodes(node)?;
        single(Scope::Node, nodes)
    }

    pub fn normalize_package(&mut self, package: ScopeNum) -> TopologyResult<ScopeNum> {
        let packages = self.normalize_packages(package)?;
        single(Scope::Package, packages)
    }

    /// Tells that CPUs went online or offline. Everything discovered so far is dropped and
    /// re-read on the next query.
    pub fn cpus_hotplugged(&mut self) {
        tracing::debug!("CPUs hotplugged, dropping the cached topology");
        self.cpu_sets.invalidate();
        self.table.invalidate();
        self.dies.clear();
        self.caches = None;
    }

    /// P-core and E-core CPU lists limited to online CPUs, `None` on non-hybrid systems.
    pub fn get_hybrid_cpus(&mut self) -> TopologyResult<Option<HybridCpus>> {
        let Self {
            source, cpu_sets, ..
        } = self;
        let online = cpu_sets.online(&**source)?.clone();
        let hybrid = cpu_sets.hybrid(&**source)?;

        Ok(hybrid.map(|hybrid| {
            let only_online = |cpus: &[ScopeNum]| {
                cpus.iter()
                    .copied()
                    .filter(|cpu| online.contains(cpu))
                    .collect::<Vec<_>>()
            };
            HybridCpus {
                pcores: only_online(&hybrid.pcores),
                ecores: only_online(&hybrid.ecores),
            }
        }))
    }

    /// Compute dies of every package.
    pub fn get_compute_dies(&mut self) -> TopologyResult<DiesMap> {
        self.with_dies(|dies, ctx| Ok(dies.compute_dies(ctx)?.dies()))
    }

    /// Online CPUs of every compute die, keyed by package and die.
    pub fn get_compute_dies_cpus(&mut self) -> TopologyResult<DiesCpus> {
        self.with_dies(|dies, ctx| Ok(dies.compute_dies(ctx)?.cpus.clone()))
    }

    /// Non-compute dies of every package. Fails with an unsupported error if the topology
    /// discovery protocol is not available.
    pub fn get_noncompute_dies(&mut self) -> TopologyResult<DiesMap> {
        self.with_dies(|dies, ctx| Ok(dies.noncompute_dies(ctx)?.dies.clone()))
    }

    pub fn get_all_dies(&mut self) -> TopologyResult<DiesMap> {
        self.with_dies(|dies, ctx| dies.all_dies(ctx))
    }

    pub fn get_dies_info(&mut self) -> TopologyResult<DiesInfo> {
        self.with_dies(|dies, ctx| dies.dies_info(ctx))
    }

    fn online(&mut self) -> TopologyResult<&BTreeSet<ScopeNum>> {
        Ok(self.cpu_sets.online(&*self.source)?)
    }

    fn topology(&mut self, levels: ScopeSet, order: Scope) -> TopologyResult<&[TopologyRow]> {
        let model = self.cpu_model()?;
        let Self {
            source,
            cpu_sets,
            dies,
            table,
            ..
        } = self;

        let mut discovery = Discovery {
            source: &**source,
            model,
            online: cpu_sets.online(&**source)?,
            dies,
        };
        table.ensure(levels, order, &mut discovery)
    }

    fn cpu_row(&mut self, cpu: ScopeNum, levels: ScopeSet) -> TopologyResult<TopologyRow> {
        let found = self
            .topology(levels, Scope::Cpu)?
            .iter()
            .find(|row| row.cpu == cpu)
            .copied();

        match found {
            Some(row) => Ok(row),
            None => {
                let valid = rangify(self.online()?.iter().copied());
                Err(ValidationError::not_available(Scope::Cpu, cpu, "", valid).into())
            }
        }
    }

    /// Validates CPU numbers keeping the caller's order.
    fn validate_cpus(
        &mut self,
        cpus: impl IntoSelection,
        offline_ok: bool,
    ) -> TopologyResult<Vec<ScopeNum>> {
        let selection = cpus.into_selection(Scope::Cpu)?;
        let Self {
            source, cpu_sets, ..
        } = self;

        let valid = if offline_ok {
            cpu_sets.present(&**source)?
        } else {
            cpu_sets.online(&**source)?
        };

        match selection {
            Selection::All => Ok(valid.iter().copied().collect()),
            Selection::Nums(nums) => Ok(check_nums(Scope::Cpu, nums, valid, "")?),
        }
    }

    fn keep_in_packages(
        &mut self,
        cpus: Vec<ScopeNum>,
        packages: impl IntoSelection,
    ) -> TopologyResult<Vec<ScopeNum>> {
        let in_packages = self
            .get_scope_nums(Scope::Cpu, Scope::Package, packages, Scope::Cpu)?
            .into_iter()
            .collect::<BTreeSet<_>>();

        Ok(cpus
            .into_iter()
            .filter(|cpu| in_packages.contains(cpu))
            .collect())
    }

    fn with_dies<T>(
        &mut self,
        query: impl FnOnce(&mut DieIdentityResolver, &DieContext<'_>) -> TopologyResult<T>,
    ) -> TopologyResult<T> {
        let model = self.cpu_model()?;
        let cpu_packages = self
            .topology(ScopeSet::PACKAGE, Scope::Cpu)?
            .iter()
            .filter(|row| !row.is_noncompute())
            .map(|row| (row.cpu, row.package))
            .collect::<BTreeMap<_, _>>();

        let ctx = DieContext {
            source: &*self.source,
            model,
            cpu_packages: &cpu_packages,
        };
        query(&mut self.dies, &ctx)
    }
}

/// Turns a die map into a human-readable string, e.g. "package 0 dies 0-2, and package 1 die 0".
pub fn dies_to_str(dies: &DiesMap) -> String {
    let mut parts = dies
        .iter()
        .map(|(package, package_dies)| match package_dies.as_slice() {
            [die] => format!("package {package} die {die}"),
            _ => format!(
                "package {package} dies {}",
                rangify(package_dies.iter().copied())
            ),
        })
        .collect::<Vec<_>>();

    match parts.pop() {
        None => String::new(),
        Some(last) if parts.is_empty() => last,
        Some(last) => format!("{}, and {last}", parts.join(", ")),
    }
}

fn describe_cpu(model: &CpuModel, model_name: Option<&str>) -> String {
    let is_generic = |name: &str| name.to_lowercase().contains("genuine intel");
    match model_name {
        Some(name) if !is_generic(name) => name.to_string(),
        _ if model.vendor == Vendor::Intel => {
            let mut description = format!("Intel processor model {:#x}", model.model);
            if let Some(codename) = model.codename() {
                description.push_str(&format!(" (codename: {codename})"));
            }
            description
        }
        _ => model.to_string(),
    }
}

fn all_if_empty(levels: ScopeSet) -> ScopeSet {
    if levels.is_empty() {
        ScopeSet::all()
    } else {
        levels
    }
}

/// Deduplicates `nums` keeping their order, and checks every number is in `valid`.
fn check_nums(
    scope: Scope,
    nums: Vec<ScopeNum>,
    valid: &BTreeSet<ScopeNum>,
    context: &str,
) -> Result<Vec<ScopeNum>, ValidationError> {
    let mut seen = BTreeSet::new();
    let mut result = Vec::with_capacity(nums.len());

    for num in nums {
        if !valid.contains(&num) {
            let valid = rangify(valid.iter().copied());
            return Err(ValidationError::not_available(scope, num, context, valid));
        }
        if seen.insert(num) {
            result.push(num);
        }
    }

    Ok(result)
}

fn normalize(
    scope: Scope,
    selection: Selection,
    valid: Vec<ScopeNum>,
    context: &str,
) -> TopologyResult<Vec<ScopeNum>> {
    let valid = valid.into_iter().collect::<BTreeSet<_>>();
    let mut nums = match selection {
        Selection::All => valid.into_iter().collect(),
        Selection::Nums(nums) => check_nums(scope, nums, &valid, context)?,
    };
    nums.sort_unstable();
    Ok(nums)
}

fn single(scope: Scope, mut nums: Vec<ScopeNum>) -> TopologyResult<ScopeNum> {
    nums.pop()
        .ok_or_else(|| TopologyError::bug(format!("normalizing one {scope} number gave nothing")))
}
