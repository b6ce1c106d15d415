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
use std::io::ErrorKind as IoErrorKind;
use std::path::Path;
use std::path::PathBuf;

use topo_msr::MsrDevice;
use topo_shared::ranges::parse_int_list;
use topo_shared::CpuModel;
use topo_shared::ScopeNum;
use topo_shared::Vendor;

use crate::errors::SourceError;
use crate::errors::UnsupportedError;
use crate::source::CacheType;
use crate::source::CorePackage;
use crate::source::CpuCache;
use crate::source::CpuGroup;
use crate::source::DiscoveryProtocol;
use crate::source::HybridCpus;
use crate::source::MsrAccess;
use crate::source::TopologySource;
use crate::SourceResult;


type ProtocolFactory =
    Box<dyn Fn() -> Result<Box<dyn DiscoveryProtocol>, UnsupportedError> + Send + 'static>;

/// Reads the topology of a Linux host from sysfs and procfs under `root`.
pub struct SysfsSource {
    root: PathBuf,
    msr_enabled: bool,
    protocol: Option<ProtocolFactory>,
}

impl SysfsSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            msr_enabled: true,
            protocol: None,
        }
    }

    /// The host this process runs on.
    pub fn local() -> Self {
        Self::new("/")
    }

    pub fn with_msr(mut self, enabled: bool) -> Self {
        self.msr_enabled = enabled;
        self
    }

    /// Sets the driver of the topology discovery protocol, without it the protocol is
    /// unsupported.
    pub fn with_protocol(
        mut self,
        factory: impl Fn() -> Result<Box<dyn DiscoveryProtocol>, UnsupportedError> + Send + 'static,
    ) -> Self {
        self.protocol = Some(Box::new(factory));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn cpu_dir(&self) -> PathBuf {
        self.root.join("sys/devices/system/cpu")
    }

    fn node_dir(&self) -> PathBuf {
        self.root.join("sys/devices/system/node")
    }

    fn read_string(&self, path: &Path) -> SourceResult<String> {
        std::fs::read_to_string(path).map_err(|error| SourceError::read(path, error))
    }

    /// Returns `None` if `path` does not exist.
    fn read_optional(&self, path: &Path) -> SourceResult<Option<String>> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(Some(contents)),
            Err(error) if error.kind() == IoErrorKind::NotFound => Ok(None),
            Err(error) => Err(SourceError::read(path, error)),
        }
    }

    fn read_num(&self, path: &Path) -> SourceResult<ScopeNum> {
        let contents = self.read_string(path)?;
        parse_num(path, &contents)
    }

    fn read_range(&self, path: &Path) -> SourceResult<Vec<ScopeNum>> {
        let contents = self.read_string(path)?;
        let result =
            parse_int_list(&contents).map_err(|error| SourceError::parse(path, error.to_string()));
        tracing::debug!("read CPU numbers from {path:?}: {}", contents.trim());
        result
    }

    fn read_optional_range(&self, path: &Path) -> SourceResult<Option<Vec<ScopeNum>>> {
        match self.read_optional(path)? {
            Some(contents) => parse_int_list(&contents)
                .map(Some)
                .map_err(|error| SourceError::parse(path, error.to_string())),
            None => Ok(None),
        }
    }

    /// Returns 0 if `path` does not exist.
    fn read_optional_num(&self, path: &Path) -> SourceResult<u32> {
        match self.read_optional(path)? {
            Some(contents) => parse_num(path, &contents),
            None => Ok(0),
        }
    }

    /// Reads one `cpuN/cache/indexM` directory.
    fn read_cache(&self, dir: &Path) -> SourceResult<CpuCache> {
        let level = self.read_num(&dir.join("level"))?;

        let type_path = dir.join("type");
        let kind = match self.read_string(&type_path)?.trim() {
            "Data" => CacheType::Data,
            "Instruction" => CacheType::Instruction,
            "Unified" => CacheType::Unified,
            other => {
                return Err(SourceError::parse(
                    type_path,
                    format!("unknown cache type '{other}'"),
                ))
            }
        };

        let size_path = dir.join("size");
        let size = parse_size(&size_path, &self.read_string(&size_path)?)?;

        Ok(CpuCache {
            level,
            kind,
            size,
            ways: self.read_optional_num(&dir.join("ways_of_associativity"))?,
            sets: self.read_optional_num(&dir.join("number_of_sets"))?,
            line_size: self.read_optional_num(&dir.join("coherency_line_size"))?,
            shared_cpus: self.read_range(&dir.join("shared_cpu_list"))?,
        })
    }

    fn read_cpuinfo(&self) -> SourceResult<(PathBuf, Vec<CpuinfoBlock>)> {
        let path = self.root.join("proc/cpuinfo");
        let contents = self.read_string(&path)?;
        let blocks = contents
            .split("\n\n")
            .filter(|block| !block.trim().is_empty())
            .map(CpuinfoBlock::parse)
            .collect();
        Ok((path, blocks))
    }
}

/// One `key: value` block of `/proc/cpuinfo`.
struct CpuinfoBlock {
    fields: BTreeMap<String, String>,
}

impl CpuinfoBlock {
    fn parse(block: &str) -> Self {
        let fields = block
            .lines()
            .filter_map(|line| line.split_once(':'))
            .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
            .collect();
        Self { fields }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    fn num(&self, path: &Path, key: &str) -> SourceResult<ScopeNum> {
        let value = self
            .get(key)
            .ok_or_else(|| SourceError::parse(path, format!("a CPU block has no '{key}' line")))?;
        parse_num(path, value)
    }
}

fn parse_num(path: &Path, contents: &str) -> SourceResult<ScopeNum> {
    contents.trim().parse::<ScopeNum>().map_err(|_| {
        SourceError::parse(
            path,
            format!("'{}' is not a non-negative integer", contents.trim()),
        )
    })
}

/// Parses a sysfs cache size, such as `48K`, into bytes.
fn parse_size(path: &Path, contents: &str) -> SourceResult<u64> {
    let contents = contents.trim();
    let (digits, multiplier) = match contents.chars().last() {
        Some('K') => (&contents[..contents.len() - 1], 1 << 10),
        Some('M') => (&contents[..contents.len() - 1], 1 << 20),
        Some('G') => (&contents[..contents.len() - 1], 1 << 30),
        _ => (contents, 1),
    };

    digits
        .parse::<u64>()
        .ok()
        .and_then(|size| size.checked_mul(multiplier))
        .ok_or_else(|| SourceError::parse(path, format!("bad cache size '{contents}'")))
}

impl TopologySource for SysfsSource {
    fn cpu_model(&self) -> SourceResult<CpuModel> {
        let (path, blocks) = self.read_cpuinfo()?;

        let first = blocks.first();
        let vendor = first.and_then(|block| block.get("vendor_id"));
        match (first, vendor) {
            (Some(block), Some(vendor)) => {
                let vendor = Vendor::from_vendor_id(vendor);
                let family = block.num(&path, "cpu family")?;
                let model = block.num(&path, "model")?;
                Ok(CpuModel::new(vendor, family, model))
            }
            _ => topo_msr::detect_cpu_model().ok_or_else(|| {
                SourceError::parse(path, "no 'vendor_id' line and CPUID is not available")
            }),
        }
    }

    fn model_name(&self) -> SourceResult<Option<String>> {
        let (_, blocks) = self.read_cpuinfo()?;
        Ok(blocks
            .first()
            .and_then(|block| block.get("model name"))
            .map(str::to_string))
    }

    fn present_cpus(&self) -> SourceResult<Vec<ScopeNum>> {
        self.read_range(&self.cpu_dir().join("present"))
    }

    fn online_cpus(&self) -> SourceResult<Vec<ScopeNum>> {
        self.read_range(&self.cpu_dir().join("online"))
    }

    fn cores_and_packages(
        &self,
        cpus: &[ScopeNum],
    ) -> SourceResult<BTreeMap<ScopeNum, CorePackage>> {
        let (path, blocks) = self.read_cpuinfo()?;

        let mut all = BTreeMap::new();
        for block in &blocks {
            let cpu = block.num(&path, "processor")?;
            let core = block.num(&path, "core id")?;
            let package = block.num(&path, "physical id")?;
            all.insert(cpu, CorePackage::new(core, package));
        }

        cpus.iter()
            .map(|&cpu| {
                all.get(&cpu)
                    .map(|core_package| (cpu, *core_package))
                    .ok_or_else(|| SourceError::parse(&path, format!("CPU {cpu} is missing")))
            })
            .collect()
    }

    fn module_siblings(&self, cpu: ScopeNum) -> SourceResult<Option<CpuGroup>> {
        let cache_dir = self.cpu_dir().join(format!("cpu{cpu}/cache/index2"));
        let id_path = cache_dir.join("id");
        let Some(id) = self.read_optional(&id_path)? else {
            tracing::debug!("no CPU cache topology info found at {id_path:?}");
            return Ok(None);
        };

        let id = parse_num(&id_path, &id)?;
        let cpus = self.read_range(&cache_dir.join("shared_cpu_list"))?;
        Ok(Some(CpuGroup::new(id, cpus)))
    }

    fn caches(&self, cpu: ScopeNum) -> SourceResult<Vec<CpuCache>> {
        let cache_dir = self.cpu_dir().join(format!("cpu{cpu}/cache"));
        let entries = match std::fs::read_dir(&cache_dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == IoErrorKind::NotFound => {
                tracing::debug!("no CPU cache info found at {cache_dir:?}");
                return Ok(Vec::new());
            }
            Err(error) => return Err(SourceError::read(&cache_dir, error)),
        };

        let mut index_dirs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|error| SourceError::read(&cache_dir, error))?;
            if entry.file_name().to_string_lossy().starts_with("index") {
                index_dirs.push(entry.path());
            }
        }
        index_dirs.sort();

        index_dirs.iter().map(|dir| self.read_cache(dir)).collect()
    }

    fn numa_nodes(&self) -> SourceResult<Option<BTreeMap<ScopeNum, Vec<ScopeNum>>>> {
        let node_dir = self.node_dir();
        let Some(nodes) = self.read_optional_range(&node_dir.join("online"))? else {
            tracing::debug!("no NUMA info found at {node_dir:?}");
            return Ok(None);
        };

        nodes
            .into_iter()
            .map(|node| -> SourceResult<(ScopeNum, Vec<ScopeNum>)> {
                let cpus = self.read_range(&node_dir.join(format!("node{node}/cpulist")))?;
                Ok((node, cpus))
            })
            .collect::<SourceResult<BTreeMap<_, _>>>()
            .map(Some)
    }

    fn die_siblings(&self, cpu: ScopeNum) -> SourceResult<CpuGroup> {
        let topology_dir = self.cpu_dir().join(format!("cpu{cpu}/topology"));
        let die_id_path = topology_dir.join("die_id");

        // Kernels older than 5.2 have no die files, every package is a single die there.
        let (id, cpus_path) = match self.read_optional(&die_id_path)? {
            Some(id) => (
                parse_num(&die_id_path, &id)?,
                topology_dir.join("die_cpus_list"),
            ),
            None => (
                self.read_num(&topology_dir.join("physical_package_id"))?,
                topology_dir.join("package_cpus_list"),
            ),
        };

        let cpus = self.read_range(&cpus_path)?;
        Ok(CpuGroup::new(id, cpus))
    }

    fn hybrid_cpus(&self) -> SourceResult<Option<HybridCpus>> {
        let devices_dir = self.root.join("sys/devices");
        let ecores = self.read_optional_range(&devices_dir.join("cpu_atom/cpus"))?;
        let pcores = self.read_optional_range(&devices_dir.join("cpu_core/cpus"))?;

        match (pcores, ecores) {
            (Some(pcores), Some(ecores)) => Ok(Some(HybridCpus { pcores, ecores })),
            _ => Ok(None),
        }
    }

    fn open_msr(&self) -> Result<Box<dyn MsrAccess>, UnsupportedError> {
        if !self.msr_enabled {
            return Err(UnsupportedError::new(
                "MSR access",
                "it is disabled in the configuration",
            ));
        }

        MsrDevice::open(&self.root)
            .map(|device| Box::new(device) as Box<dyn MsrAccess>)
            .map_err(|error| UnsupportedError::new("MSR access", error.to_string()))
    }

    fn open_discovery_protocol(&self) -> Result<Box<dyn DiscoveryProtocol>, UnsupportedError> {
        match &self.protocol {
            Some(factory) => factory(),
            None => Err(UnsupportedError::new(
                "topology discovery protocol",
                "no protocol driver is configured",
            )),
        }
    }
}
