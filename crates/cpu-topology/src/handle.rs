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

use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::source::TopologySource;
use crate::CpuInfo;

/// A cloneable handle sharing one [`CpuInfo`] between threads. Every query and the hotplug
/// notification run under the same lock.
#[derive(Clone)]
pub struct CpuInfoHandle(Arc<CpuInfoHandleInner>);

impl CpuInfoHandle {
    pub fn new(source: impl TopologySource + 'static) -> Self {
        Self::from_info(CpuInfo::new(source))
    }

    pub fn from_info(info: CpuInfo) -> Self {
        Self(Arc::new(CpuInfoHandleInner {
            info: Mutex::new(info),
            generation: AtomicU32::new(0),
        }))
    }

    /// Runs `query` with exclusive access to the topology.
    pub fn with<T>(&self, query: impl FnOnce(&mut CpuInfo) -> T) -> T {
        let mut guard = self.0.info.lock();
        query(&mut guard)
    }

    pub fn cpus_hotplugged(&self) {
        let mut guard = self.0.info.lock();
        self.0.generation.fetch_add(1, Ordering::Relaxed);
        guard.cpus_hotplugged();
    }

    /// Number of hotplug notifications so far, lets holders notice the topology changed.
    pub fn get_generation_relaxed(&self) -> u32 {
        self.0.generation.load(Ordering::Relaxed)
    }
}

struct CpuInfoHandleInner {
    info: Mutex<CpuInfo>,
    generation: AtomicU32,
}
