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

//! Narrow interfaces to the raw topology data of a host. The engine only talks to the host via
//! these traits, see [`crate::SysfsSource`] for the Linux implementation.

use std::collections::BTreeMap;

use serde::Serialize;

use topo_shared::CpuModel;
use topo_shared::ScopeNum;

use crate::errors::UnsupportedError;
use crate::SourceResult;

/// The name of the uncore frequency scaling feature of the discovery protocol.
pub const UFS_FEATURE: &str = "ufs";
/// The status register of a UFS cluster, it contains the agent type bits.
pub const UFS_STATUS: &str = "UFS_STATUS";
pub const AGENT_TYPE_CORE: &str = "AGENT_TYPE_CORE";
pub const AGENT_TYPE_CACHE: &str = "AGENT_TYPE_CACHE";
pub const AGENT_TYPE_IO: &str = "AGENT_TYPE_IO";
pub const AGENT_TYPE_MEMORY: &str = "AGENT_TYPE_MEMORY";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CorePackage {
    pub core: ScopeNum,
    pub package: ScopeNum,
}

impl CorePackage {
    pub fn new(core: ScopeNum, package: ScopeNum) -> Self {
        Self { core, package }
    }
}

/// CPUs sharing something identified by `id`, e.g. an L2 cache or a die.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CpuGroup {
    pub id: ScopeNum,
    pub cpus: Vec<ScopeNum>,
}

impl CpuGroup {
    pub fn new(id: ScopeNum, cpus: Vec<ScopeNum>) -> Self {
        Self { id, cpus }
    }
}

/// P-core and E-core CPUs of a hybrid system.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HybridCpus {
    pub pcores: Vec<ScopeNum>,
    pub ecores: Vec<ScopeNum>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum CacheType {
    Data,
    Instruction,
    Unified,
}

/// One cache of a CPU.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CpuCache {
    pub level: u32,
    pub kind: CacheType,
    /// Size of one instance in bytes.
    pub size: u64,
    pub ways: u32,
    pub sets: u32,
    pub line_size: u32,
    /// CPUs sharing this cache instance, offline CPUs included.
    pub shared_cpus: Vec<ScopeNum>,
}

/// Coordinates of one entry of a discovery protocol feature.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FeatureEntry {
    pub package: ScopeNum,
    /// Address of the device implementing the feature, e.g. a PCI address.
    pub addr: String,
    pub instance: u32,
    pub cluster: u32,
}

impl FeatureEntry {
    pub fn new(package: ScopeNum, addr: impl Into<String>, instance: u32, cluster: u32) -> Self {
        Self {
            package,
            addr: addr.into(),
            instance,
            cluster,
        }
    }
}

pub trait MsrAccess: Send {
    fn read(&self, register_id: u32, cpu: ScopeNum) -> SourceResult<u64>;
}

/// A secondary topology discovery protocol, which also enumerates dies without CPUs.
pub trait DiscoveryProtocol: Send {
    /// Entries of feature `name`, grouped by increasing package number.
    fn iter_feature(&self, name: &str) -> SourceResult<Vec<FeatureEntry>>;

    fn read_bitfield(&self, entry: &FeatureEntry, register: &str, bitfield: &str)
        -> SourceResult<u64>;
}

/// Raw topology data of a host. All CPU lists are lists of CPU numbers, they may include offline
/// CPUs, which are ignored by the engine.
pub trait TopologySource: Send {
    fn cpu_model(&self) -> SourceResult<CpuModel>;

    /// The processor name reported by the firmware, `None` if there is none.
    fn model_name(&self) -> SourceResult<Option<String>>;

    fn present_cpus(&self) -> SourceResult<Vec<ScopeNum>>;

    fn online_cpus(&self) -> SourceResult<Vec<ScopeNum>>;

    /// Core and package numbers of every CPU in `cpus`, fetched in one batch.
    fn cores_and_packages(&self, cpus: &[ScopeNum])
        -> SourceResult<BTreeMap<ScopeNum, CorePackage>>;

    /// The L2 cache of `cpu` and CPUs sharing it, `None` if there is no cache topology info.
    fn module_siblings(&self, cpu: ScopeNum) -> SourceResult<Option<CpuGroup>>;

    /// NUMA node to CPUs mapping, `None` if the system has no NUMA info.
    fn numa_nodes(&self) -> SourceResult<Option<BTreeMap<ScopeNum, Vec<ScopeNum>>>>;

    /// Caches of `cpu`, empty if there is no cache info.
    fn caches(&self, cpu: ScopeNum) -> SourceResult<Vec<CpuCache>>;

    /// The die of `cpu` and CPUs sharing it.
    fn die_siblings(&self, cpu: ScopeNum) -> SourceResult<CpuGroup>;

    /// `None` on non-hybrid systems.
    fn hybrid_cpus(&self) -> SourceResult<Option<HybridCpus>>;

    fn open_msr(&self) -> Result<Box<dyn MsrAccess>, UnsupportedError>;

    fn open_discovery_protocol(&self) -> Result<Box<dyn DiscoveryProtocol>, UnsupportedError>;
}

impl MsrAccess for topo_msr::MsrDevice {
    fn read(&self, register_id: u32, cpu: ScopeNum) -> SourceResult<u64> {
        let value = topo_msr::MsrDevice::read(self, register_id, cpu)?;
        Ok(value)
    }
}
