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

use std::collections::BTreeSet;

use topo_shared::ScopeNum;

use crate::source::HybridCpus;
use crate::source::TopologySource;
use crate::SourceResult;

/// Cached online and present CPU sets, they are dropped together on hotplug.
#[derive(Default)]
pub(crate) struct CpuSets {
    online: Option<BTreeSet<ScopeNum>>,
    present: Option<BTreeSet<ScopeNum>>,
    hybrid: Option<Option<HybridCpus>>,
}

impl CpuSets {
    pub(crate) fn online(
        &mut self,
        source: &dyn TopologySource,
    ) -> SourceResult<&BTreeSet<ScopeNum>> {
        let online = match self.online.take() {
            Some(online) => online,
            None => source.online_cpus()?.into_iter().collect(),
        };
        Ok(self.online.insert(online))
    }

    pub(crate) fn present(
        &mut self,
        source: &dyn TopologySource,
    ) -> SourceResult<&BTreeSet<ScopeNum>> {
        let present = match self.present.take() {
            Some(present) => present,
            None => source.present_cpus()?.into_iter().collect(),
        };
        Ok(self.present.insert(present))
    }

    pub(crate) fn hybrid(
        &mut self,
        source: &dyn TopologySource,
    ) -> SourceResult<Option<&HybridCpus>> {
        let hybrid = match self.hybrid.take() {
            Some(hybrid) => hybrid,
            None => source.hybrid_cpus()?,
        };
        Ok(self.hybrid.insert(hybrid).as_ref())
    }

    pub(crate) fn invalidate(&mut self) {
        *self = Self::default();
    }
}
