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

//! Canned systems used across the engine tests.

use cpu_topology::die_info::AgentTypes;
use cpu_topology::source::FeatureEntry;
use topo_shared::CpuModel;
use topo_shared::ScopeNum;

use crate::MockCpu;
use crate::MockSystem;
use crate::MockUfsCluster;

pub const SAPPHIRE_RAPIDS: CpuModel = CpuModel::intel(6, 0x8F);
pub const GRANITE_RAPIDS: CpuModel = CpuModel::intel(6, 0xAD);

/// One package with 4 cores of 2 CPUs: core `n` has CPUs `n` and `n + 4`.
pub fn sibling_example() -> MockSystem {
    let mut system = MockSystem::new(SAPPHIRE_RAPIDS);
    for cpu in 0..8 {
        let core = cpu % 4;
        system.add_cpu(
            cpu,
            MockCpu {
                core,
                module: core,
                die: 0,
                node: 0,
                package: 0,
            },
        );
    }
    system
}

/// Two packages, CPUs 0-3 and 4-7, one die and one NUMA node per package. Every package has
/// cores 0 and 1 with 2 CPUs each, e.g. core 0 of package 1 has CPUs 4 and 6.
pub fn two_packages() -> MockSystem {
    let mut system = MockSystem::new(SAPPHIRE_RAPIDS);
    for cpu in 0..8 {
        let package = cpu / 4;
        let core = cpu % 2;
        system.add_cpu(
            cpu,
            MockCpu {
                core,
                module: package * 2 + core,
                die: 0,
                node: package,
                package,
            },
        );
    }
    system
}

/// Number of compute dies per package in [`hidden_dies`].
pub const HIDDEN_DIES_PER_PACKAGE: ScopeNum = 3;

/// A Granite Rapids-like system with 2 packages of 3 compute dies with 2 CPUs each, 12 CPUs in
/// total. Die numbers are per-package and come from MSR_PM_LOGICAL_ID. The discovery protocol
/// reports the compute dies and, per package, an I/O die followed by a memory die.
pub fn hidden_dies() -> MockSystem {
    let cpus_per_package = HIDDEN_DIES_PER_PACKAGE * 2;

    let mut system = MockSystem::new(GRANITE_RAPIDS);
    for cpu in 0..2 * cpus_per_package {
        let package = cpu / cpus_per_package;
        system.add_cpu(
            cpu,
            MockCpu {
                core: cpu % cpus_per_package,
                module: cpu,
                die: (cpu % cpus_per_package) / 2,
                node: package,
                package,
            },
        );
    }

    let mut clusters = Vec::new();
    for package in 0..2 {
        let addr = format!("0000:{:02x}:03.1", 0x80 * package);
        let entry = |instance| FeatureEntry::new(package, addr.clone(), instance, 0);

        for die in 0..HIDDEN_DIES_PER_PACKAGE {
            clusters.push(MockUfsCluster::new(
                entry(die),
                AgentTypes::CORE | AgentTypes::CACHE,
            ));
        }
        clusters.push(MockUfsCluster::new(
            entry(HIDDEN_DIES_PER_PACKAGE),
            AgentTypes::IO,
        ));
        clusters.push(MockUfsCluster::new(
            entry(HIDDEN_DIES_PER_PACKAGE + 1),
            AgentTypes::MEMORY,
        ));
    }

    system.msr = true;
    system.protocol = Some(clusters);
    system
}
