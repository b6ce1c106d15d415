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

use cpu_topology::dies_to_str;
use cpu_topology::source::FeatureEntry;
use cpu_topology::source::HybridCpus;
use cpu_topology::CpuInfo;
use cpu_topology::DieFilter;
use cpu_topology::ErrorKind;
use cpu_topology::Scope;
use cpu_topology::ScopeSet;
use cpu_topology::NA;
use topo_test_utils::hidden_dies;
use topo_test_utils::two_packages;
use topo_test_utils::MockSource;

#[test]
fn hidden_dies_come_from_msr() {
    let source = MockSource::new(hidden_dies());
    let mut info = CpuInfo::new(source.clone());

    let compute = info.get_compute_dies().unwrap();
    assert_eq!(compute, btreemap! { 0 => vec![0, 1, 2], 1 => vec![0, 1, 2] });

    let cpus = info.get_compute_dies_cpus().unwrap();
    assert_eq!(cpus[&1][&2], vec![10, 11]);

    let counts = source.counts();
    assert_eq!(counts.msr_reads, 12);
    assert_eq!(counts.die_siblings, 0);
}

#[test]
fn hidden_dies_fall_back_to_sysfs_without_msr() {
    let source = MockSource::new(hidden_dies());
    source.update(|system| system.msr = false);
    let mut info = CpuInfo::new(source.clone());

    let compute = info.get_compute_dies().unwrap();
    assert_eq!(compute, btreemap! { 0 => vec![0, 1, 2], 1 => vec![0, 1, 2] });
    assert_eq!(source.counts().msr_reads, 0);
    assert!(source.counts().die_siblings > 0);
}

#[test]
fn noncompute_dies_follow_compute_dies() {
    let mut info = CpuInfo::new(MockSource::new(hidden_dies()));

    let noncompute = info.get_noncompute_dies().unwrap();
    assert_eq!(noncompute, btreemap! { 0 => vec![3, 4], 1 => vec![3, 4] });

    let all = info.get_all_dies().unwrap();
    assert_eq!(dies_to_str(&all), "package 0 dies 0-4, and package 1 dies 0-4");

    let dies_info = info.get_dies_info().unwrap();
    let package = &dies_info[&1];
    assert_eq!(package[&0].title, "Compute");
    assert_eq!(
        package[&0].location,
        Some(FeatureEntry::new(1, "0000:80:03.1", 0, 0))
    );
    assert_eq!(package[&3].title, "I/O");
    assert_eq!(package[&4].title, "Memory");
    assert!(!package[&4].is_compute());
}

#[test]
fn noncompute_dies_are_listed_without_cpus() {
    let mut info = CpuInfo::new(MockSource::new(hidden_dies()));

    assert_eq!(
        info.get_dies(0, Scope::Die, DieFilter::NonCompute).unwrap(),
        vec![3, 4]
    );
    assert_eq!(info.package_to_dies(0, Scope::Die).unwrap(), vec![0, 1, 2, 3, 4]);
    assert_eq!(info.normalize_die(4, 1).unwrap(), 4);
    assert!(info.dies_to_cpus(3, 0, Scope::Cpu).unwrap().is_empty());

    let rows = info.get_topology(ScopeSet::DIE | ScopeSet::PACKAGE, Scope::Die).unwrap();
    assert_eq!(rows.len(), 16);
    let noncompute = rows.iter().filter(|row| row.is_noncompute()).collect::<Vec<_>>();
    assert_eq!(noncompute.len(), 4);
    assert!(noncompute.iter().all(|row| row.core == NA && row.node == NA));

    // Rows of non-compute dies are not listed when dies are not requested.
    let rows = info.get_topology(ScopeSet::CORE, Scope::Cpu).unwrap();
    assert_eq!(rows.len(), 12);
}

#[test]
fn noncompute_dies_never_form_groups() {
    let mut info = CpuInfo::new(MockSource::new(hidden_dies()));

    let (dies, leftover) = info.cpus_div_dies("0-5,6,7").unwrap();
    assert_eq!(dies, btreemap! { 0 => vec![0, 1, 2], 1 => vec![0] });
    assert!(leftover.is_empty());
}

#[test]
fn no_discovery_protocol_means_no_noncompute_dies() {
    let mut info = CpuInfo::new(MockSource::new(two_packages()));

    let error = info.get_noncompute_dies().unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Unsupported);

    assert_eq!(info.get_all_dies().unwrap(), btreemap! { 0 => vec![0], 1 => vec![0] });
    assert!(info
        .get_dies(0, Scope::Die, DieFilter::NonCompute)
        .unwrap()
        .is_empty());

    let dies_info = info.get_dies_info().unwrap();
    assert_eq!(dies_info[&0][&0].title, "Compute");
    assert_eq!(dies_info[&0][&0].location, None);
}

#[test]
fn hybrid_cpus_are_limited_to_online_cpus() {
    let source = MockSource::new(two_packages());
    let mut info = CpuInfo::new(source.clone());
    assert_eq!(info.get_hybrid_cpus().unwrap(), None);

    source.update(|system| {
        system.hybrid = Some(HybridCpus {
            pcores: vec![0, 1, 2, 3],
            ecores: vec![4, 5, 6, 7],
        })
    });
    source.set_offline([2, 7]);
    info.cpus_hotplugged();

    let hybrid = info.get_hybrid_cpus().unwrap().unwrap();
    assert_eq!(hybrid.pcores, vec![0, 1, 3]);
    assert_eq!(hybrid.ecores, vec![4, 5, 6]);
}

#[test]
fn model_is_read_once() {
    let mut info = CpuInfo::new(MockSource::new(hidden_dies()));
    let model = info.cpu_model().unwrap();

    assert!(model.has_hidden_dies());
    assert_eq!(info.cpu_model().unwrap(), model);
}
