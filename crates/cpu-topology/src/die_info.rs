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

//! Compute and non-compute dies.
//!
//! Compute dies have CPUs. They are enumerated by `topology/die_id` in sysfs, where die numbers
//! are globally unique. Some Xeons hide their compute dies from CPUID, there the die number is the
//! domain ID of `MSR_PM_LOGICAL_ID` and it is unique only within a package.
//!
//! Non-compute dies are logical entities without CPUs, e.g. uncore frequency scaling domains of
//! I/O or memory controllers. They are enumerated only by the topology discovery protocol, every
//! UFS cluster without the core agent is a non-compute die. Their numbers follow the compute die
//! numbers of the same numbering space, so the two never collide.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use bitflags::bitflags;

use topo_msr::domain_id;
use topo_msr::MSR_PM_LOGICAL_ID;
use topo_shared::CpuModel;
use topo_shared::ScopeNum;

use crate::capability::LazyCapability;
use crate::errors::TopologyError;
use crate::errors::UnsupportedError;
use crate::source::*;
use crate::SourceResult;
use crate::TopologyResult;

mod noncompute;
mod title;

#[cfg(test)]
mod tests;

use noncompute::assign_noncompute_ids;
pub use title::format_die_title;

bitflags! {
    /// Agents of a UFS cluster.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct AgentTypes: u8 {
        const CORE = 1 << 0;
        const CACHE = 1 << 1;
        const IO = 1 << 2;
        const MEMORY = 1 << 3;
    }
}

impl AgentTypes {
    fn read(protocol: &dyn DiscoveryProtocol, entry: &FeatureEntry) -> SourceResult<Self> {
        let bitfields = [
            (AgentTypes::CORE, AGENT_TYPE_CORE),
            (AgentTypes::CACHE, AGENT_TYPE_CACHE),
            (AgentTypes::IO, AGENT_TYPE_IO),
            (AgentTypes::MEMORY, AGENT_TYPE_MEMORY),
        ];

        let mut agents = AgentTypes::empty();
        for (agent, bitfield) in bitfields {
            if protocol.read_bitfield(entry, UFS_STATUS, bitfield)? != 0 {
                agents |= agent;
            }
        }
        Ok(agents)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DieNumbering {
    /// Die numbers are unique in the system.
    Global,
    /// Die numbers are unique only within a package.
    PerPackage,
}

impl DieNumbering {
    pub fn for_model(model: &CpuModel) -> Self {
        if model.has_hidden_dies() {
            Self::PerPackage
        } else {
            Self::Global
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DieDescriptor {
    pub package: ScopeNum,
    pub die: ScopeNum,
    pub agents: AgentTypes,
    pub title: String,
    /// Where the discovery protocol found the die, `None` if it was not used.
    pub location: Option<FeatureEntry>,
}

impl DieDescriptor {
    fn basic_compute(package: ScopeNum, die: ScopeNum) -> Self {
        Self {
            package,
            die,
            agents: AgentTypes::CORE,
            title: format_die_title(AgentTypes::CORE),
            location: None,
        }
    }

    pub(crate) fn from_walk(package: ScopeNum, die: ScopeNum, entry: &WalkEntry) -> Self {
        Self {
            package,
            die,
            agents: entry.agents,
            title: format_die_title(entry.agents),
            location: Some(entry.location.clone()),
        }
    }

    pub fn is_compute(&self) -> bool {
        self.agents.contains(AgentTypes::CORE)
    }
}

/// Package number to sorted die numbers.
pub type DiesMap = BTreeMap<ScopeNum, Vec<ScopeNum>>;
/// Package number to die number to die descriptor.
pub type DiesInfo = BTreeMap<ScopeNum, BTreeMap<ScopeNum, DieDescriptor>>;
/// Package number to die number to sorted online CPUs of the die.
pub type DiesCpus = BTreeMap<ScopeNum, BTreeMap<ScopeNum, Vec<ScopeNum>>>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComputeDies {
    pub numbering: DieNumbering,
    pub cpus: DiesCpus,
    pub info: DiesInfo,
}

impl ComputeDies {
    pub fn dies(&self) -> DiesMap {
        self.cpus
            .iter()
            .map(|(package, dies)| (*package, dies.keys().copied().collect()))
            .collect()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NonComputeDies {
    pub dies: DiesMap,
    pub info: DiesInfo,
}

/// One UFS cluster found by the discovery protocol walk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct WalkEntry {
    pub(crate) location: FeatureEntry,
    pub(crate) agents: AgentTypes,
}

impl WalkEntry {
    pub(crate) fn new(location: FeatureEntry, agents: AgentTypes) -> Self {
        Self { location, agents }
    }

    pub(crate) fn is_compute(&self) -> bool {
        self.agents.contains(AgentTypes::CORE)
    }
}

/// What the resolver needs to know about the host.
pub struct DieContext<'a> {
    pub source: &'a dyn TopologySource,
    pub model: CpuModel,
    /// Online CPU number to package number.
    pub cpu_packages: &'a BTreeMap<ScopeNum, ScopeNum>,
}

/// Resolves die numbers in two phases: compute dies are always discovered first, and their
/// numbers are then the input for numbering the non-compute dies.
pub struct DieIdentityResolver {
    protocol: LazyCapability<Box<dyn DiscoveryProtocol>>,
    msr: LazyCapability<Box<dyn MsrAccess>>,
    walk: Option<Result<Vec<WalkEntry>, UnsupportedError>>,
    compute: Option<ComputeDies>,
    noncompute: Option<Result<NonComputeDies, UnsupportedError>>,
}

impl Default for DieIdentityResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl DieIdentityResolver {
    pub fn new() -> Self {
        Self {
            protocol: LazyCapability::new(),
            msr: LazyCapability::new(),
            walk: None,
            compute: None,
            noncompute: None,
        }
    }

    pub fn compute_dies(&mut self, ctx: &DieContext<'_>) -> TopologyResult<&ComputeDies> {
        let compute = match self.compute.take() {
            Some(compute) => compute,
            None => self.discover_compute_dies(ctx)?,
        };
        Ok(self.compute.insert(compute))
    }

    /// Fails with [`TopologyError::Unsupported`] if there is no discovery protocol.
    pub fn noncompute_dies(&mut self, ctx: &DieContext<'_>) -> TopologyResult<&NonComputeDies> {
        let noncompute = match self.noncompute.take() {
            Some(noncompute) => noncompute,
            None => {
                let walk = self.walk(ctx.source)?;
                let compute = self.compute_dies(ctx)?;
                match walk {
                    Ok(walk) => Ok(assign_noncompute_ids(&walk, compute, &ctx.model)?),
                    Err(error) => {
                        tracing::debug!("{error}, cannot discover non-compute dies");
                        Err(error)
                    }
                }
            }
        };

        self.noncompute
            .insert(noncompute)
            .as_ref()
            .map_err(|error| error.clone().into())
    }

    /// Compute and non-compute dies, only compute dies if there is no discovery protocol.
    pub fn all_dies(&mut self, ctx: &DieContext<'_>) -> TopologyResult<DiesMap> {
        let mut all = self.compute_dies(ctx)?.dies();

        match self.noncompute_dies(ctx) {
            Ok(noncompute) => {
                for (package, dies) in &noncompute.dies {
                    let package_dies = all.entry(*package).or_default();
                    package_dies.extend(dies);
                    package_dies.sort_unstable();
                }
            }
            Err(TopologyError::Unsupported(_)) => {}
            Err(error) => return Err(error),
        }

        Ok(all)
    }

    pub fn dies_info(&mut self, ctx: &DieContext<'_>) -> TopologyResult<DiesInfo> {
        let mut info = self.compute_dies(ctx)?.info.clone();

        match self.noncompute_dies(ctx) {
            Ok(noncompute) => {
                for (package, dies) in &noncompute.info {
                    let package_info = info.entry(*package).or_default();
                    package_info.extend(dies.iter().map(|(die, desc)| (*die, desc.clone())));
                }
            }
            Err(TopologyError::Unsupported(_)) => {}
            Err(error) => return Err(error),
        }

        Ok(info)
    }

    /// Drops discovered dies, e.g. after CPU hotplug. Capabilities stay as they are.
    pub fn clear(&mut self) {
        self.walk = None;
        self.compute = None;
        self.noncompute = None;
    }

    fn protocol(
        &self,
        source: &dyn TopologySource,
    ) -> Result<&dyn DiscoveryProtocol, UnsupportedError> {
        self.protocol
            .get_or_init(|| source.open_discovery_protocol())
            .map(|protocol| &**protocol)
    }

    fn msr(&self, source: &dyn TopologySource) -> Result<&dyn MsrAccess, UnsupportedError> {
        self.msr
            .get_or_init(|| source.open_msr())
            .map(|msr| &**msr)
    }

    fn walk(
        &mut self,
        source: &dyn TopologySource,
    ) -> TopologyResult<Result<Vec<WalkEntry>, UnsupportedError>> {
        let walk = match self.walk.take() {
            Some(walk) => walk,
            None => self.walk_protocol(source)?,
        };
        Ok(self.walk.insert(walk).clone())
    }

    fn walk_protocol(
        &self,
        source: &dyn TopologySource,
    ) -> TopologyResult<Result<Vec<WalkEntry>, UnsupportedError>> {
        let protocol = match self.protocol(source) {
            Ok(protocol) => protocol,
            Err(error) => return Ok(Err(error)),
        };

        tracing::debug!("walking the '{UFS_FEATURE}' feature of the discovery protocol");
        let walk = protocol
            .iter_feature(UFS_FEATURE)?
            .into_iter()
            .map(|location| -> TopologyResult<WalkEntry> {
                let agents = AgentTypes::read(protocol, &location)?;
                Ok(WalkEntry::new(location, agents))
            })
            .collect::<TopologyResult<Vec<_>>>()?;

        Ok(Ok(walk))
    }

    fn discover_compute_dies(&mut self, ctx: &DieContext<'_>) -> TopologyResult<ComputeDies> {
        let numbering = DieNumbering::for_model(&ctx.model);

        let cpus = match numbering {
            DieNumbering::PerPackage => match self.msr(ctx.source) {
                Ok(msr) => discover_via_msr(msr, ctx.cpu_packages)?,
                Err(error) => {
                    tracing::warn!(
                        "{error}, compute dies of {} are discovered via sysfs instead",
                        ctx.model
                    );
                    discover_via_sysfs(ctx.source, ctx.cpu_packages)?
                }
            },
            DieNumbering::Global => discover_via_sysfs(ctx.source, ctx.cpu_packages)?,
        };

        let info = match self.walk(ctx.source)? {
            Ok(walk) => describe_compute_dies(&cpus, &walk)?,
            Err(error) => {
                tracing::debug!("{error}, using basic compute die information");
                basic_compute_info(&cpus)
            }
        };

        Ok(ComputeDies {
            numbering,
            cpus,
            info,
        })
    }
}

fn discover_via_msr(
    msr: &dyn MsrAccess,
    cpu_packages: &BTreeMap<ScopeNum, ScopeNum>,
) -> TopologyResult<DiesCpus> {
    tracing::debug!("discovering compute dies via MSR_PM_LOGICAL_ID");

    let mut cpus = DiesCpus::new();
    for (&cpu, &package) in cpu_packages {
        let regval = msr.read(MSR_PM_LOGICAL_ID, cpu)?;
        cpus.entry(package)
            .or_default()
            .entry(domain_id(regval))
            .or_default()
            .push(cpu);
    }

    Ok(cpus)
}

fn discover_via_sysfs(
    source: &dyn TopologySource,
    cpu_packages: &BTreeMap<ScopeNum, ScopeNum>,
) -> TopologyResult<DiesCpus> {
    tracing::debug!("discovering compute dies via sysfs");

    let mut seen = BTreeSet::new();
    let mut cpus = DiesCpus::new();
    for &cpu in cpu_packages.keys() {
        if seen.contains(&cpu) {
            continue;
        }

        let group = source.die_siblings(cpu)?;
        for sibling in group.cpus.into_iter().chain(std::iter::once(cpu)) {
            // Die sibling lists may include offline CPUs.
            let Some(&package) = cpu_packages.get(&sibling) else {
                continue;
            };
            if seen.insert(sibling) {
                cpus.entry(package)
                    .or_default()
                    .entry(group.id)
                    .or_default()
                    .push(sibling);
            }
        }
    }

    for die_cpus in cpus.values_mut().flat_map(BTreeMap::values_mut) {
        die_cpus.sort_unstable();
    }
    Ok(cpus)
}

fn basic_compute_info(cpus: &DiesCpus) -> DiesInfo {
    cpus.iter()
        .map(|(&package, dies)| {
            let descriptors = dies
                .keys()
                .map(|&die| (die, DieDescriptor::basic_compute(package, die)))
                .collect();
            (package, descriptors)
        })
        .collect()
}

/// Matches discovered compute dies with compute UFS clusters of the same package in walk order.
/// If some compute dies have no online CPUs, the matching is ambiguous and basic descriptors are
/// used for the package.
pub(crate) fn describe_compute_dies(
    cpus: &DiesCpus,
    walk: &[WalkEntry],
) -> TopologyResult<DiesInfo> {
    let mut info = DiesInfo::new();

    for (&package, dies) in cpus {
        let entries = walk
            .iter()
            .filter(|entry| entry.location.package == package && entry.is_compute())
            .collect::<Vec<_>>();

        if dies.len() > entries.len() {
            return Err(TopologyError::bug(format!(
                "package {package} has {} compute dies, but the discovery protocol reports only {}",
                dies.len(),
                entries.len()
            )));
        }

        let package_info = info.entry(package).or_default();
        if dies.len() == entries.len() {
            for (&die, entry) in dies.keys().zip(entries) {
                package_info.insert(die, DieDescriptor::from_walk(package, die, entry));
            }
        } else {
            tracing::debug!("package {package} has compute dies without online CPUs");
            for &die in dies.keys() {
                package_info.insert(die, DieDescriptor::basic_compute(package, die));
            }
        }
    }

    Ok(info)
}
