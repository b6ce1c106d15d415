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
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;

use cpu_topology::die_info::AgentTypes;
use cpu_topology::source::*;
use cpu_topology::SourceError;
use cpu_topology::SourceResult;
use cpu_topology::UnsupportedError;
use topo_msr::MSR_PM_LOGICAL_ID;
use topo_shared::CpuModel;
use topo_shared::ScopeNum;

/// Numbers of one present CPU.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MockCpu {
    pub core: ScopeNum,
    pub module: ScopeNum,
    pub die: ScopeNum,
    pub node: ScopeNum,
    pub package: ScopeNum,
}

/// One UFS cluster reported by the mock discovery protocol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MockUfsCluster {
    pub entry: FeatureEntry,
    pub agents: AgentTypes,
}

impl MockUfsCluster {
    pub fn new(entry: FeatureEntry, agents: AgentTypes) -> Self {
        Self { entry, agents }
    }
}

#[derive(Clone, Debug)]
pub struct MockSystem {
    pub model: CpuModel,
    pub model_name: Option<String>,
    /// Present CPUs.
    pub cpus: BTreeMap<ScopeNum, MockCpu>,
    pub online: BTreeSet<ScopeNum>,
    /// Whether the system reports CPU caches: L1d and L1i per core, L2 per module and L3 per
    /// package.
    pub cache_info: bool,
    pub numa: bool,
    pub hybrid: Option<HybridCpus>,
    /// Whether `MSR_PM_LOGICAL_ID` reads are possible, they return the CPU's die number.
    pub msr: bool,
    /// UFS clusters in walk order, `None` if there is no discovery protocol.
    pub protocol: Option<Vec<MockUfsCluster>>,
}

impl MockSystem {
    /// A system without CPUs, cache topology and NUMA info are there.
    pub fn new(model: CpuModel) -> Self {
        Self {
            model,
            model_name: None,
            cpus: BTreeMap::new(),
            online: BTreeSet::new(),
            cache_info: true,
            numa: true,
            hybrid: None,
            msr: false,
            protocol: None,
        }
    }

    /// Adds an online CPU.
    pub fn add_cpu(&mut self, cpu: ScopeNum, numbers: MockCpu) -> &mut Self {
        self.cpus.insert(cpu, numbers);
        self.online.insert(cpu);
        self
    }

    fn cpu(&self, cpu: ScopeNum) -> SourceResult<&MockCpu> {
        self.cpus.get(&cpu).ok_or_else(|| {
            SourceError::parse(
                format!("/sys/devices/system/cpu/cpu{cpu}"),
                "no such CPU in the mock system",
            )
        })
    }

    fn siblings(&self, same: impl Fn(&MockCpu) -> bool) -> Vec<ScopeNum> {
        self.cpus
            .iter()
            .filter(|(_, numbers)| same(numbers))
            .map(|(cpu, _)| *cpu)
            .collect()
    }
}

/// How many times every raw source operation was called.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FetchCounts {
    pub present_cpus: usize,
    pub online_cpus: usize,
    pub cores_and_packages: usize,
    pub module_siblings: usize,
    pub caches: usize,
    pub numa_nodes: usize,
    pub die_siblings: usize,
    pub hybrid_cpus: usize,
    pub msr_reads: usize,
    pub protocol_walks: usize,
}

impl FetchCounts {
    pub fn total(&self) -> usize {
        self.present_cpus
            + self.online_cpus
            + self.cores_and_packages
            + self.module_siblings
            + self.caches
            + self.numa_nodes
            + self.die_siblings
            + self.hybrid_cpus
            + self.msr_reads
            + self.protocol_walks
    }
}

#[derive(Default)]
struct Counters {
    present_cpus: AtomicUsize,
    online_cpus: AtomicUsize,
    cores_and_packages: AtomicUsize,
    module_siblings: AtomicUsize,
    caches: AtomicUsize,
    numa_nodes: AtomicUsize,
    die_siblings: AtomicUsize,
    hybrid_cpus: AtomicUsize,
    msr_reads: AtomicUsize,
    protocol_walks: AtomicUsize,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}

struct MockState {
    system: Mutex<MockSystem>,
    counters: Counters,
}

/// An in-memory [`TopologySource`]. Clones share the system and the counters, so a test can keep
/// one clone to hotplug CPUs and check fetch counts after moving another into the engine.
#[derive(Clone)]
pub struct MockSource {
    state: Arc<MockState>,
}

impl MockSource {
    pub fn new(system: MockSystem) -> Self {
        Self {
            state: Arc::new(MockState {
                system: Mutex::new(system),
                counters: Counters::default(),
            }),
        }
    }

    pub fn counts(&self) -> FetchCounts {
        let counters = &self.state.counters;
        let load = |counter: &AtomicUsize| counter.load(Ordering::Relaxed);

        FetchCounts {
            present_cpus: load(&counters.present_cpus),
            online_cpus: load(&counters.online_cpus),
            cores_and_packages: load(&counters.cores_and_packages),
            module_siblings: load(&counters.module_siblings),
            caches: load(&counters.caches),
            numa_nodes: load(&counters.numa_nodes),
            die_siblings: load(&counters.die_siblings),
            hybrid_cpus: load(&counters.hybrid_cpus),
            msr_reads: load(&counters.msr_reads),
            protocol_walks: load(&counters.protocol_walks),
        }
    }

    pub fn set_offline(&self, cpus: impl IntoIterator<Item = ScopeNum>) {
        let mut system = self.state.system.lock();
        for cpu in cpus {
            system.online.remove(&cpu);
        }
    }

    pub fn set_online(&self, cpus: impl IntoIterator<Item = ScopeNum>) {
        let mut system = self.state.system.lock();
        for cpu in cpus {
            if system.cpus.contains_key(&cpu) {
                system.online.insert(cpu);
            }
        }
    }

    pub fn update(&self, change: impl FnOnce(&mut MockSystem)) {
        change(&mut self.state.system.lock());
    }
}

impl TopologySource for MockSource {
    fn cpu_model(&self) -> SourceResult<CpuModel> {
        Ok(self.state.system.lock().model)
    }

    fn model_name(&self) -> SourceResult<Option<String>> {
        Ok(self.state.system.lock().model_name.clone())
    }

    fn present_cpus(&self) -> SourceResult<Vec<ScopeNum>> {
        bump(&self.state.counters.present_cpus);
        Ok(self.state.system.lock().cpus.keys().copied().collect())
    }

    fn online_cpus(&self) -> SourceResult<Vec<ScopeNum>> {
        bump(&self.state.counters.online_cpus);
        Ok(self.state.system.lock().online.iter().copied().collect())
    }

    fn cores_and_packages(
        &self,
        cpus: &[ScopeNum],
    ) -> SourceResult<BTreeMap<ScopeNum, CorePackage>> {
        bump(&self.state.counters.cores_and_packages);
        let system = self.state.system.lock();

        cpus.iter()
            .map(|&cpu| -> SourceResult<(ScopeNum, CorePackage)> {
                let numbers = system.cpu(cpu)?;
                Ok((cpu, CorePackage::new(numbers.core, numbers.package)))
            })
            .collect()
    }

    fn module_siblings(&self, cpu: ScopeNum) -> SourceResult<Option<CpuGroup>> {
        bump(&self.state.counters.module_siblings);
        let system = self.state.system.lock();
        if !system.cache_info {
            return Ok(None);
        }

        let module = system.cpu(cpu)?.module;
        let cpus = system.siblings(|numbers| numbers.module == module);
        Ok(Some(CpuGroup::new(module, cpus)))
    }

    fn caches(&self, cpu: ScopeNum) -> SourceResult<Vec<CpuCache>> {
        bump(&self.state.counters.caches);
        let system = self.state.system.lock();
        if !system.cache_info {
            return Ok(Vec::new());
        }

        let numbers = *system.cpu(cpu)?;
        let core_cpus = system.siblings(|other| {
            other.package == numbers.package && other.core == numbers.core
        });
        let module_cpus = system.siblings(|other| other.module == numbers.module);
        let package_cpus = system.siblings(|other| other.package == numbers.package);

        Ok(vec![
            mock_cache(1, CacheType::Data, 48 << 10, core_cpus.clone()),
            mock_cache(1, CacheType::Instruction, 32 << 10, core_cpus),
            mock_cache(2, CacheType::Unified, 2 << 20, module_cpus),
            mock_cache(3, CacheType::Unified, 64 << 20, package_cpus),
        ])
    }

    fn numa_nodes(&self) -> SourceResult<Option<BTreeMap<ScopeNum, Vec<ScopeNum>>>> {
        bump(&self.state.counters.numa_nodes);
        let system = self.state.system.lock();
        if !system.numa {
            return Ok(None);
        }

        let mut nodes = BTreeMap::<ScopeNum, Vec<ScopeNum>>::new();
        for (&cpu, numbers) in &system.cpus {
            nodes.entry(numbers.node).or_default().push(cpu);
        }
        Ok(Some(nodes))
    }

    fn die_siblings(&self, cpu: ScopeNum) -> SourceResult<CpuGroup> {
        bump(&self.state.counters.die_siblings);
        let system = self.state.system.lock();

        let numbers = *system.cpu(cpu)?;
        let cpus = system.siblings(|other| {
            other.package == numbers.package && other.die == numbers.die
        });
        Ok(CpuGroup::new(numbers.die, cpus))
    }

    fn hybrid_cpus(&self) -> SourceResult<Option<HybridCpus>> {
        bump(&self.state.counters.hybrid_cpus);
        Ok(self.state.system.lock().hybrid.clone())
    }

    fn open_msr(&self) -> Result<Box<dyn MsrAccess>, UnsupportedError> {
        if !self.state.system.lock().msr {
            return Err(UnsupportedError::new(
                "MSR access",
                "the mock system has no MSRs",
            ));
        }
        Ok(Box::new(MockMsr {
            state: self.state.clone(),
        }))
    }

    fn open_discovery_protocol(&self) -> Result<Box<dyn DiscoveryProtocol>, UnsupportedError> {
        if self.state.system.lock().protocol.is_none() {
            return Err(UnsupportedError::new(
                "topology discovery protocol",
                "the mock system has no discovery protocol",
            ));
        }
        Ok(Box::new(MockProtocol {
            state: self.state.clone(),
        }))
    }
}

fn mock_cache(level: u32, kind: CacheType, size: u64, shared_cpus: Vec<ScopeNum>) -> CpuCache {
    let ways = if level == 1 { 12 } else { 16 };
    CpuCache {
        level,
        kind,
        size,
        ways,
        sets: (size / (64 * u64::from(ways))) as u32,
        line_size: 64,
        shared_cpus,
    }
}

struct MockMsr {
    state: Arc<MockState>,
}

impl MsrAccess for MockMsr {
    fn read(&self, register_id: u32, cpu: ScopeNum) -> SourceResult<u64> {
        bump(&self.state.counters.msr_reads);
        if register_id != MSR_PM_LOGICAL_ID {
            return Err(SourceError::parse(
                format!("/dev/cpu/{cpu}/msr"),
                format!("MSR {register_id:#x} is not emulated"),
            ));
        }

        let die = self.state.system.lock().cpu(cpu)?.die;
        Ok(u64::from(die) << 11)
    }
}

struct MockProtocol {
    state: Arc<MockState>,
}

impl DiscoveryProtocol for MockProtocol {
    fn iter_feature(&self, name: &str) -> SourceResult<Vec<FeatureEntry>> {
        bump(&self.state.counters.protocol_walks);
        if name != UFS_FEATURE {
            return Err(SourceError::protocol(format!(
                "feature '{name}' is not emulated"
            )));
        }

        let system = self.state.system.lock();
        let clusters = system.protocol.iter().flatten();
        Ok(clusters.map(|cluster| cluster.entry.clone()).collect())
    }

    fn read_bitfield(
        &self,
        entry: &FeatureEntry,
        register: &str,
        bitfield: &str,
    ) -> SourceResult<u64> {
        let system = self.state.system.lock();
        let cluster = system
            .protocol
            .iter()
            .flatten()
            .find(|cluster| &cluster.entry == entry)
            .ok_or_else(|| SourceError::protocol(format!("no UFS cluster at {entry:?}")))?;

        let agent = match (register, bitfield) {
            (UFS_STATUS, AGENT_TYPE_CORE) => AgentTypes::CORE,
            (UFS_STATUS, AGENT_TYPE_CACHE) => AgentTypes::CACHE,
            (UFS_STATUS, AGENT_TYPE_IO) => AgentTypes::IO,
            (UFS_STATUS, AGENT_TYPE_MEMORY) => AgentTypes::MEMORY,
            _ => {
                return Err(SourceError::protocol(format!(
                    "bitfield {register}.{bitfield} is not emulated"
                )))
            }
        };

        Ok(u64::from(cluster.agents.contains(agent)))
    }
}
