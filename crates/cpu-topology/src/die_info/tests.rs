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

use maplit::btreemap;
use topo_shared::NA;

use super::*;
use crate::ErrorKind;

const GRANITE_RAPIDS: CpuModel = CpuModel::intel(6, 0xAD);
const DIAMOND_RAPIDS: CpuModel = CpuModel::intel(19, 0x01);
const SAPPHIRE_RAPIDS: CpuModel = CpuModel::intel(6, 0x8F);

fn compute_entry(package: ScopeNum, addr: &str, instance: u32) -> WalkEntry {
    let location = FeatureEntry::new(package, addr, instance, 0);
    WalkEntry::new(location, AgentTypes::CORE | AgentTypes::CACHE)
}

fn uncore_entry(package: ScopeNum, addr: &str, cluster: u32, agents: AgentTypes) -> WalkEntry {
    WalkEntry::new(FeatureEntry::new(package, addr, 0, cluster), agents)
}

fn compute_dies(numbering: DieNumbering, dies: DiesMap) -> ComputeDies {
    let cpus = dies
        .into_iter()
        .map(|(package, dies)| {
            let dies = dies
                .into_iter()
                .map(|die| (die, vec![package * 100 + die]))
                .collect();
            (package, dies)
        })
        .collect::<DiesCpus>();
    let info = basic_compute_info(&cpus);

    ComputeDies {
        numbering,
        cpus,
        info,
    }
}

fn assert_disjoint(compute: &ComputeDies, noncompute: &NonComputeDies) {
    let compute_dies = compute.dies();
    for (package, dies) in &noncompute.dies {
        let package_compute = compute_dies.get(package).cloned().unwrap_or_default();
        for die in dies {
            assert!(!package_compute.contains(die), "package {package} die {die}");
        }
    }
}

#[test]
fn titles_follow_agent_order() {
    assert_eq!(format_die_title(AgentTypes::CORE | AgentTypes::IO), "Compute");
    assert_eq!(format_die_title(AgentTypes::IO), "I/O");
    assert_eq!(format_die_title(AgentTypes::MEMORY), "Memory");
    assert_eq!(
        format_die_title(AgentTypes::MEMORY | AgentTypes::IO),
        "I/O and memory"
    );
    assert_eq!(
        format_die_title(AgentTypes::MEMORY | AgentTypes::IO | AgentTypes::CACHE),
        "Cache, I/O, and memory"
    );
    assert_eq!(format_die_title(AgentTypes::empty()), "Unknown");
}

#[test]
fn per_package_numbers_follow_compute_dies() {
    let compute = compute_dies(
        DieNumbering::PerPackage,
        btreemap! { 0 => vec![0, 1, 2], 1 => vec![0, 1, 2] },
    );
    let mut walk = Vec::new();
    for package in 0..2 {
        for instance in 0..3 {
            walk.push(compute_entry(package, "0000:00:03.1", instance));
        }
        walk.push(uncore_entry(package, "0000:00:03.1", 3, AgentTypes::IO));
        walk.push(uncore_entry(package, "0000:00:03.1", 4, AgentTypes::MEMORY));
    }

    let noncompute = assign_noncompute_ids(&walk, &compute, &GRANITE_RAPIDS).unwrap();

    let expected_dies = btreemap! { 0 => vec![3, 4], 1 => vec![3, 4] };
    assert_eq!(noncompute.dies, expected_dies);
    assert_eq!(noncompute.info[&1][&3].title, "I/O");
    assert_eq!(noncompute.info[&1][&4].title, "Memory");
    assert_eq!(noncompute.info[&0][&4].location.as_ref().unwrap().cluster, 4);
    assert_disjoint(&compute, &noncompute);
}

#[test]
fn offline_compute_dies_keep_their_numbers() {
    // Only die 0 has online CPUs, but the protocol reports three compute clusters.
    let compute = compute_dies(DieNumbering::PerPackage, btreemap! { 0 => vec![0] });
    let walk = vec![
        compute_entry(0, "a", 0),
        compute_entry(0, "a", 1),
        compute_entry(0, "a", 2),
        uncore_entry(0, "a", 3, AgentTypes::IO),
    ];

    let noncompute = assign_noncompute_ids(&walk, &compute, &GRANITE_RAPIDS).unwrap();
    assert_eq!(noncompute.dies, btreemap! { 0 => vec![3] });
}

#[test]
fn global_numbers_follow_all_compute_dies() {
    let compute = compute_dies(
        DieNumbering::Global,
        btreemap! { 0 => vec![0, 1], 1 => vec![2, 3] },
    );
    let walk = vec![
        compute_entry(0, "a", 0),
        compute_entry(0, "a", 1),
        uncore_entry(0, "a", 2, AgentTypes::IO),
        compute_entry(1, "b", 0),
        uncore_entry(1, "b", 2, AgentTypes::IO | AgentTypes::MEMORY),
        compute_entry(1, "b", 1),
    ];

    let noncompute = assign_noncompute_ids(&walk, &compute, &SAPPHIRE_RAPIDS).unwrap();

    assert_eq!(noncompute.dies, btreemap! { 0 => vec![4], 1 => vec![5] });
    assert_eq!(noncompute.info[&1][&5].title, "I/O and memory");
    assert_disjoint(&compute, &noncompute);
}

#[test]
fn walk_is_grouped_by_package() {
    let compute = compute_dies(DieNumbering::PerPackage, btreemap! { 0 => vec![0], 1 => vec![0] });
    let walk = vec![
        uncore_entry(1, "b", 1, AgentTypes::IO),
        compute_entry(0, "a", 0),
        compute_entry(1, "b", 0),
        uncore_entry(0, "a", 1, AgentTypes::MEMORY),
        uncore_entry(1, "b", 2, AgentTypes::MEMORY),
    ];

    let noncompute = assign_noncompute_ids(&walk, &compute, &GRANITE_RAPIDS).unwrap();

    assert_eq!(noncompute.dies, btreemap! { 0 => vec![1], 1 => vec![1, 2] });
    assert_eq!(noncompute.info[&1][&1].title, "I/O");
    assert_eq!(noncompute.info[&1][&2].title, "Memory");
}

#[test]
fn package_without_compute_dies_is_a_bug() {
    let compute = compute_dies(DieNumbering::PerPackage, btreemap! { 0 => vec![0] });
    let walk = vec![
        compute_entry(0, "a", 0),
        uncore_entry(1, "b", 0, AgentTypes::IO),
    ];

    let error = assign_noncompute_ids(&walk, &compute, &GRANITE_RAPIDS).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Bug);
}

#[test]
fn offline_package_is_skipped() {
    let compute = compute_dies(DieNumbering::PerPackage, btreemap! { 0 => vec![0] });
    let walk = vec![
        compute_entry(0, "a", 0),
        uncore_entry(0, "a", 1, AgentTypes::IO),
        compute_entry(1, "b", 0),
        uncore_entry(1, "b", 1, AgentTypes::IO),
    ];

    let noncompute = assign_noncompute_ids(&walk, &compute, &GRANITE_RAPIDS).unwrap();
    assert_eq!(noncompute.dies, btreemap! { 0 => vec![1] });
}

#[test]
fn imh_dies_are_retitled() {
    let compute = compute_dies(DieNumbering::Global, btreemap! { 0 => vec![0] });
    let walk = vec![
        compute_entry(0, "cpu", 0),
        uncore_entry(0, "imh-a", 0, AgentTypes::IO),
        uncore_entry(0, "imh-a", 1, AgentTypes::MEMORY),
        uncore_entry(0, "imh-b", 0, AgentTypes::MEMORY),
        uncore_entry(0, "imh-b", 1, AgentTypes::IO),
    ];

    let noncompute = assign_noncompute_ids(&walk, &compute, &DIAMOND_RAPIDS).unwrap();

    let titles = noncompute.info[&0]
        .values()
        .map(|desc| desc.title.as_str())
        .collect::<Vec<_>>();
    assert_eq!(titles, vec!["IMH0 I/O", "IMH0 Mem", "IMH1 Mem", "IMH1 I/O"]);
}

#[test]
fn imh_with_one_device_is_a_bug() {
    let compute = compute_dies(DieNumbering::Global, btreemap! { 0 => vec![0] });
    let walk = vec![
        compute_entry(0, "cpu", 0),
        uncore_entry(0, "imh-a", 0, AgentTypes::IO),
        uncore_entry(0, "imh-a", 1, AgentTypes::MEMORY),
    ];

    let error = assign_noncompute_ids(&walk, &compute, &DIAMOND_RAPIDS).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Bug);
}

#[test]
fn imh_device_without_memory_is_a_bug() {
    let compute = compute_dies(DieNumbering::Global, btreemap! { 0 => vec![0] });
    let walk = vec![
        compute_entry(0, "cpu", 0),
        uncore_entry(0, "imh-a", 0, AgentTypes::IO),
        uncore_entry(0, "imh-a", 1, AgentTypes::MEMORY),
        uncore_entry(0, "imh-b", 0, AgentTypes::IO),
    ];

    let error = assign_noncompute_ids(&walk, &compute, &DIAMOND_RAPIDS).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Bug);
}

#[test]
fn compute_dies_are_matched_with_protocol_entries() {
    let compute = compute_dies(DieNumbering::Global, btreemap! { 0 => vec![0, 1] });
    let walk = vec![
        compute_entry(0, "a", 0),
        uncore_entry(0, "a", 5, AgentTypes::IO),
        compute_entry(0, "a", 1),
    ];

    let info = describe_compute_dies(&compute.cpus, &walk).unwrap();

    let location = info[&0][&1].location.as_ref().unwrap();
    assert_eq!(location.instance, 1);
    assert_eq!(info[&0][&1].title, "Compute");
}

#[test]
fn partially_offline_package_gets_basic_descriptors() {
    let compute = compute_dies(DieNumbering::Global, btreemap! { 0 => vec![1] });
    let walk = vec![compute_entry(0, "a", 0), compute_entry(0, "a", 1)];

    let info = describe_compute_dies(&compute.cpus, &walk).unwrap();
    assert_eq!(info[&0][&1], DieDescriptor::basic_compute(0, 1));
}

#[test]
fn more_compute_dies_than_protocol_entries_is_a_bug() {
    let compute = compute_dies(DieNumbering::Global, btreemap! { 0 => vec![0, 1] });
    let walk = vec![compute_entry(0, "a", 0)];

    let error = describe_compute_dies(&compute.cpus, &walk).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Bug);
}

#[test]
fn numbering_depends_on_cpu_model() {
    assert_eq!(DieNumbering::for_model(&GRANITE_RAPIDS), DieNumbering::PerPackage);
    assert_eq!(DieNumbering::for_model(&SAPPHIRE_RAPIDS), DieNumbering::Global);
}

fn compute_dies_with_ids(
    numbering: DieNumbering,
    package: ScopeNum,
    dies: &[ScopeNum],
) -> ComputeDies {
    let cpus = btreemap! {
        package => dies.iter().map(|&die| (die, vec![0])).collect(),
    };
    let info = basic_compute_info(&cpus);

    ComputeDies {
        numbering,
        cpus,
        info,
    }
}

#[test]
fn largest_die_number_leaves_no_room() {
    let walk = vec![
        compute_entry(0, "a", 0),
        uncore_entry(0, "a", 1, AgentTypes::IO),
    ];

    for numbering in [DieNumbering::PerPackage, DieNumbering::Global] {
        let compute = compute_dies_with_ids(numbering, 0, &[ScopeNum::MAX]);
        let error = assign_noncompute_ids(&walk, &compute, &GRANITE_RAPIDS).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Bug);
    }
}

#[test]
fn noncompute_die_never_gets_na() {
    let compute = compute_dies_with_ids(DieNumbering::PerPackage, 0, &[NA - 1]);
    let walk = vec![
        compute_entry(0, "a", 0),
        uncore_entry(0, "a", 1, AgentTypes::IO),
    ];

    let error = assign_noncompute_ids(&walk, &compute, &GRANITE_RAPIDS).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Bug);
}

#[test]
fn sparse_compute_numbers_are_followed() {
    let compute = compute_dies_with_ids(DieNumbering::PerPackage, 0, &[1000]);
    let walk = vec![
        compute_entry(0, "a", 0),
        uncore_entry(0, "a", 1, AgentTypes::IO),
        uncore_entry(0, "a", 2, AgentTypes::MEMORY),
    ];

    let noncompute = assign_noncompute_ids(&walk, &compute, &GRANITE_RAPIDS).unwrap();
    assert_eq!(noncompute.dies, btreemap! { 0 => vec![1001, 1002] });
}
