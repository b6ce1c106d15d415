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

//! System-wide CPU cache summary, built from the caches of every online CPU.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Serialize;

use topo_shared::ScopeNum;

use crate::source::CacheType;
use crate::source::CpuCache;
use crate::source::TopologySource;
use crate::SourceResult;

/// One kind of cache, e.g. all the L2 caches of the system.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct CacheInfo {
    /// `L1d`, `L1i`, `L2` and so on.
    pub name: String,
    pub level: u32,
    #[serde(rename = "type")]
    pub kind: CacheType,
    /// Size of one instance in bytes.
    pub one_size: u64,
    /// Total size of all instances in bytes.
    pub all_size: u64,
    pub ways: u32,
    pub sets: u32,
    pub coherency_size: u32,
    pub instances: usize,
}

fn cache_name(level: u32, kind: CacheType) -> String {
    match kind {
        CacheType::Data => format!("L{level}d"),
        CacheType::Instruction => format!("L{level}i"),
        CacheType::Unified => format!("L{level}"),
    }
}

#[derive(Default)]
struct Instances {
    first: Option<CpuCache>,
    sizes: BTreeMap<Vec<ScopeNum>, u64>,
}

/// Reads the caches of `cpus` and merges instances shared by several CPUs. The result is keyed
/// by cache name, it is empty if the source has no cache info.
pub(crate) fn collect_cache_info(
    source: &dyn TopologySource,
    cpus: &[ScopeNum],
) -> SourceResult<BTreeMap<String, CacheInfo>> {
    let mut by_kind = BTreeMap::<(u32, CacheType), Instances>::new();
    let mut covered = BTreeSet::<(u32, CacheType, ScopeNum)>::new();

    for &cpu in cpus {
        for cache in source.caches(cpu)? {
            if !covered.insert((cache.level, cache.kind, cpu)) {
                continue;
            }

            let instances = by_kind.entry((cache.level, cache.kind)).or_default();
            for &sibling in &cache.shared_cpus {
                covered.insert((cache.level, cache.kind, sibling));
            }

            let mut shared_cpus = cache.shared_cpus.clone();
            shared_cpus.sort_unstable();
            instances.sizes.insert(shared_cpus, cache.size);
            instances.first.get_or_insert(cache);
        }
    }

    let mut result = BTreeMap::new();
    for ((level, kind), instances) in by_kind {
        let Some(first) = instances.first else {
            continue;
        };

        let name = cache_name(level, kind);
        let info = CacheInfo {
            name: name.clone(),
            level,
            kind,
            one_size: instances.sizes.values().copied().max().unwrap_or_default(),
            all_size: instances.sizes.values().sum(),
            ways: first.ways,
            sets: first.sets,
            coherency_size: first.line_size,
            instances: instances.sizes.len(),
        };
        tracing::debug!(
            "{name} cache: {} instances of {} bytes",
            info.instances,
            info.one_size
        );
        result.insert(name, info);
    }

    Ok(result)
}
