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
use serde_json::json;

use cpu_topology::CpuInfo;
use cpu_topology::ErrorKind;
use cpu_topology::Scope;
use cpu_topology::ScopeSet;
use cpu_topology::Selection;
use cpu_topology::SiblingScope;
use cpu_topology::TopologyRow;
use cpu_topology::ValidationError;
use topo_test_utils::sibling_example;
use topo_test_utils::two_packages;
use topo_test_utils::MockSource;

fn two_packages_info() -> CpuInfo {
    CpuInfo::new(MockSource::new(two_packages()))
}

#[test]
fn lists_levels() {
    let mut info = two_packages_info();

    assert_eq!(info.get_packages(Scope::Package).unwrap(), vec![0, 1]);
    assert_eq!(info.get_cores(0, Scope::Core).unwrap(), vec![0, 1]);
    assert_eq!(info.get_cores(1, Scope::Core).unwrap(), vec![0, 1]);
    assert_eq!(info.get_modules(Scope::Module).unwrap(), vec![0, 1, 2, 3]);
    assert_eq!(info.get_nodes(Scope::Node).unwrap(), vec![0, 1]);
    assert_eq!(info.get_cpus(Scope::Cpu).unwrap(), (0..8).collect::<Vec<_>>());
    assert_eq!(
        info.get_cpus(Scope::Core).unwrap(),
        vec![0, 2, 1, 3, 4, 6, 5, 7]
    );
    assert!(info.get_offline_cpus().unwrap().is_empty());
}

#[test]
fn counts_levels() {
    let mut info = two_packages_info();

    assert_eq!(info.get_cpus_count().unwrap(), 8);
    assert_eq!(info.get_offline_cpus_count().unwrap(), 0);
    assert_eq!(info.get_cores_count(1).unwrap(), 2);
    assert_eq!(info.get_modules_count().unwrap(), 4);
    assert_eq!(info.get_dies_count(1, Default::default()).unwrap(), 1);
    assert_eq!(info.get_nodes_count().unwrap(), 2);
    assert_eq!(info.get_packages_count().unwrap(), 2);
}

#[test]
fn topology_rows() {
    let mut info = two_packages_info();

    let rows = info.get_topology(ScopeSet::empty(), Scope::Cpu).unwrap();
    assert_eq!(rows.len(), 8);
    assert_eq!(
        rows[5],
        TopologyRow {
            cpu: 5,
            core: 1,
            module: 3,
            die: 0,
            node: 1,
            package: 1,
        }
    );

    let levels = info.get_cpu_levels(5, ScopeSet::CORE | ScopeSet::PACKAGE).unwrap();
    assert_eq!(levels, btreemap! { Scope::Core => 1, Scope::Package => 1 });

    let error = info.get_cpu_levels(9, ScopeSet::empty()).unwrap_err();
    assert_eq!(
        error.to_string(),
        "CPU 9 is not available, available CPUs are: 0-7"
    );
}

#[test]
fn converts_parents_to_children() {
    let mut info = two_packages_info();

    assert_eq!(info.package_to_cpus(1, Scope::Cpu).unwrap(), vec![4, 5, 6, 7]);
    assert_eq!(info.package_to_cores(1, Scope::Core).unwrap(), vec![0, 1]);
    assert_eq!(info.package_to_modules(1, Scope::Module).unwrap(), vec![2, 3]);
    assert_eq!(info.package_to_dies(0, Scope::Die).unwrap(), vec![0]);
    assert_eq!(info.package_to_nodes(1, Scope::Node).unwrap(), vec![1]);

    assert_eq!(info.cores_to_cpus(0, 1, Scope::Cpu).unwrap(), vec![4, 6]);
    assert_eq!(
        info.cores_to_cpus(1, Selection::All, Scope::Cpu).unwrap(),
        vec![1, 3, 5, 7]
    );
    assert_eq!(
        info.modules_to_cpus(vec![2, 1], Scope::Cpu).unwrap(),
        vec![1, 3, 4, 6]
    );
    assert_eq!(info.dies_to_cpus(0, 0, Scope::Cpu).unwrap(), vec![0, 1, 2, 3]);
    assert_eq!(info.nodes_to_cpus("1", Scope::Cpu).unwrap(), vec![4, 5, 6, 7]);
    assert_eq!(
        info.packages_to_cpus("all", Scope::Core).unwrap(),
        vec![0, 2, 1, 3, 4, 6, 5, 7]
    );
}

#[test]
fn rejects_bad_containment_and_missing_parents() {
    let mut info = two_packages_info();

    let error = info
        .get_scope_nums(Scope::Package, Scope::Core, Selection::All, Scope::Package)
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Validation);
    assert_eq!(
        error.to_string(),
        "bad level order, cannot get packages from level 'core'"
    );

    let error = info.get_cores(2, Scope::Core).unwrap_err();
    assert_eq!(
        error.to_string(),
        "package 2 do not exist, valid package numbers are: 0,1"
    );

    let error = info.modules_to_cpus(vec![0, 7, 9], Scope::Cpu).unwrap_err();
    assert_eq!(
        error.to_string(),
        "module 7,9 do not exist, valid module numbers are: 0-3"
    );
}

#[test]
fn normalizes_numbers() {
    let mut info = two_packages_info();

    assert_eq!(info.normalize_cpus(vec![3, 1, 3], false).unwrap(), vec![1, 3]);
    assert_eq!(
        info.normalize_cpus("all", false).unwrap(),
        (0..8).collect::<Vec<_>>()
    );
    assert_eq!(info.normalize_cores(vec![1, 0, 1], 1).unwrap(), vec![0, 1]);
    assert_eq!(info.normalize_modules(vec![3, 0]).unwrap(), vec![0, 3]);
    assert_eq!(info.normalize_dies("all", 1).unwrap(), vec![0]);
    assert_eq!(info.normalize_nodes([1, 0]).unwrap(), vec![0, 1]);
    assert_eq!(info.normalize_packages("all").unwrap(), vec![0, 1]);

    assert_eq!(info.normalize_cpu(6).unwrap(), 6);
    assert_eq!(info.normalize_core(1, 0).unwrap(), 1);
    assert_eq!(info.normalize_module(2).unwrap(), 2);
    assert_eq!(info.normalize_die(0, 1).unwrap(), 0);
    assert_eq!(info.normalize_node(1).unwrap(), 1);
    assert_eq!(info.normalize_package(1).unwrap(), 1);
}

#[test]
fn normalize_reports_available_numbers() {
    let mut info = two_packages_info();

    let error = info.normalize_cpus(vec![9], false).unwrap_err();
    assert_eq!(
        error.to_string(),
        "CPU 9 is not available, available CPUs are: 0-7"
    );

    let error = info.normalize_cores(vec![2], 0).unwrap_err();
    assert_eq!(
        error.to_string(),
        "core 2 is not available in package 0, available cores are: 0,1"
    );

    let error = info.normalize_package(3).unwrap_err();
    assert_eq!(
        error.to_string(),
        "package 3 is not available, available packages are: 0,1"
    );
}

#[test]
fn normalize_rejects_booleans() {
    let mut info = two_packages_info();

    let error = info.normalize_cpus(json!([true]), false).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Validation);
    assert_eq!(
        error.to_string(),
        "'true' is not an integer, CPU numbers must be integers"
    );

    assert!(info.normalize_packages(json!([0, false])).is_err());
    assert_eq!(info.normalize_cpus(json!([1, 0]), false).unwrap(), vec![0, 1]);
}

#[test]
fn offline_cpus_are_valid_only_when_allowed() {
    let source = MockSource::new(two_packages());
    source.set_offline([7]);
    let mut info = CpuInfo::new(source);

    assert_eq!(info.get_offline_cpus().unwrap(), vec![7]);
    assert!(info.normalize_cpus(vec![7], false).is_err());
    assert_eq!(info.normalize_cpus(vec![7, 0], true).unwrap(), vec![0, 7]);
    assert_eq!(info.package_to_cpus(1, Scope::Cpu).unwrap(), vec![4, 5, 6]);
}

#[test]
fn unknown_scope_names() {
    let error = "socket".parse::<Scope>().unwrap_err();
    let error = ValidationError::from(error);
    assert_eq!(
        error.to_string(),
        "bad scope name 'socket', use: CPU, core, module, die, node, package"
    );

    assert!("Core".parse::<Scope>().is_err());
    assert!("socket".parse::<SiblingScope>().is_err());
}

#[test]
fn cpu_siblings() {
    let mut info = two_packages_info();

    assert_eq!(info.get_cpu_siblings(5, Scope::Cpu).unwrap(), vec![5]);
    assert_eq!(info.get_cpu_siblings(5, Scope::Core).unwrap(), vec![5, 7]);
    assert_eq!(info.get_cpu_siblings(5, Scope::Module).unwrap(), vec![5, 7]);
    assert_eq!(info.get_cpu_siblings(5, Scope::Die).unwrap(), vec![4, 5, 6, 7]);
    assert_eq!(info.get_cpu_siblings(5, Scope::Node).unwrap(), vec![4, 5, 6, 7]);
    assert_eq!(
        info.get_cpu_siblings(5, Scope::Package).unwrap(),
        vec![4, 5, 6, 7]
    );

    let global = "global".parse::<SiblingScope>().unwrap();
    assert_eq!(
        info.get_cpu_siblings(5, global).unwrap(),
        (0..8).collect::<Vec<_>>()
    );

    assert!(info.get_cpu_siblings(8, Scope::Core).is_err());
}

#[test]
fn selects_core_siblings_by_index() {
    let mut info = CpuInfo::new(MockSource::new(sibling_example()));

    let cpus = vec![1, 2, 4, 5];
    assert_eq!(info.select_core_siblings(&cpus, &[0]).unwrap(), vec![1, 2]);
    assert_eq!(info.select_core_siblings(&cpus, &[1]).unwrap(), vec![4, 5]);
    assert_eq!(
        info.select_core_siblings(&cpus, &[0, 1]).unwrap(),
        vec![1, 2, 4, 5]
    );
    assert!(info.select_core_siblings(&cpus, &[2]).unwrap().is_empty());

    // Input order is kept.
    assert_eq!(
        info.select_core_siblings(vec![5, 4, 2, 1], &[0, 1]).unwrap(),
        vec![5, 4, 2, 1]
    );
}

#[test]
fn selects_module_siblings_by_index() {
    let mut info = CpuInfo::new(MockSource::new(two_packages()));

    // Modules are {0: [0, 2], 1: [1, 3], 2: [4, 6], 3: [5, 7]}.
    assert_eq!(
        info.select_module_siblings("all", &[1]).unwrap(),
        vec![2, 3, 6, 7]
    );
    assert_eq!(
        info.select_module_siblings(vec![6, 0, 1], &[0]).unwrap(),
        vec![0, 1]
    );
}

#[test]
fn sibling_selection_skips_offline_cpus() {
    let source = MockSource::new(sibling_example());
    source.set_offline([4]);
    let mut info = CpuInfo::new(source);

    // CPU 4 is offline and has no index, CPU 0 is alone in core 0.
    assert_eq!(
        info.select_core_siblings(vec![0, 4, 1, 5], &[0]).unwrap(),
        vec![0, 1]
    );
    assert_eq!(
        info.select_core_siblings(vec![0, 4, 1, 5], &[1]).unwrap(),
        vec![5]
    );
}

#[test]
fn describes_the_processor() {
    let mut system = two_packages();
    system.model_name = Some("Genuine Intel(R) CPU 0000%@".to_string());
    let mut info = CpuInfo::new(MockSource::new(system));
    assert_eq!(
        info.cpu_description().unwrap(),
        "Intel processor model 0x8f (codename: Sapphire Rapids Xeon)"
    );

    let mut system = two_packages();
    system.model_name = Some("Intel(R) Xeon(R) Platinum 8480+".to_string());
    let mut info = CpuInfo::new(MockSource::new(system));
    assert_eq!(info.cpu_description().unwrap(), "Intel(R) Xeon(R) Platinum 8480+");
}

#[test]
fn cache_info_without_cache_topology_is_empty() {
    let mut system = two_packages();
    system.cache_info = false;
    let mut info = CpuInfo::new(MockSource::new(system));

    assert!(info.get_cache_info().unwrap().is_empty());
}
