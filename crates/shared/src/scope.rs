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

use std::str::FromStr;

use bitflags::bitflags;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error as ThisError;

/// A level of the CPU topology hierarchy, ordered from the smallest to the largest.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Scope {
    #[serde(rename = "CPU")]
    Cpu,
    #[serde(rename = "core")]
    Core,
    #[serde(rename = "module")]
    Module,
    #[serde(rename = "die")]
    Die,
    #[serde(rename = "node")]
    Node,
    #[serde(rename = "package")]
    Package,
}

impl Scope {
    pub const ALL: [Scope; 6] = [
        Scope::Cpu,
        Scope::Core,
        Scope::Module,
        Scope::Die,
        Scope::Node,
        Scope::Package,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            Scope::Cpu => "CPU",
            Scope::Core => "core",
            Scope::Module => "module",
            Scope::Die => "die",
            Scope::Node => "node",
            Scope::Package => "package",
        }
    }

    /// Levels a topology table has to be sorted by to get a stable view of this level. Core and
    /// die numbers are per-package, so they are sorted by package first.
    pub const fn sort_keys(self) -> &'static [Scope] {
        match self {
            Scope::Cpu => &[Scope::Cpu],
            Scope::Core => &[Scope::Package, Scope::Core, Scope::Cpu],
            Scope::Module => &[Scope::Module, Scope::Cpu],
            Scope::Die => &[Scope::Package, Scope::Die, Scope::Cpu],
            Scope::Node => &[Scope::Node, Scope::Cpu],
            Scope::Package => &[Scope::Package, Scope::Cpu],
        }
    }

    pub fn sort_key_set(self) -> ScopeSet {
        self.sort_keys().iter().copied().collect()
    }

    /// Returns true if elements of `child` level can be looked up by elements of this level.
    pub const fn can_contain(self, child: Scope) -> bool {
        self.index() >= child.index()
    }

    /// Core and die numbers may repeat in different packages.
    pub const fn is_package_relative(self) -> bool {
        matches!(self, Scope::Core | Scope::Die)
    }

    pub const fn flag(self) -> ScopeSet {
        match self {
            Scope::Cpu => ScopeSet::CPU,
            Scope::Core => ScopeSet::CORE,
            Scope::Module => ScopeSet::MODULE,
            Scope::Die => ScopeSet::DIE,
            Scope::Node => ScopeSet::NODE,
            Scope::Package => ScopeSet::PACKAGE,
        }
    }

    pub fn valid_names() -> String {
        Scope::ALL.map(Scope::name).join(", ")
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scope {
    type Err = UnknownScopeError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Scope::ALL
            .into_iter()
            .find(|scope| scope.name() == name)
            .ok_or_else(|| UnknownScopeError::new(name, Scope::valid_names()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("bad scope name '{name}', use: {valid}")]
pub struct UnknownScopeError {
    pub name: String,
    pub valid: String,
}

impl UnknownScopeError {
    pub fn new(name: impl Into<String>, valid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            valid: valid.into(),
        }
    }
}

bitflags! {
    /// A set of topology levels.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ScopeSet: u8 {
        const CPU = 1 << 0;
        const CORE = 1 << 1;
        const MODULE = 1 << 2;
        const DIE = 1 << 3;
        const NODE = 1 << 4;
        const PACKAGE = 1 << 5;
    }
}

impl ScopeSet {
    /// Levels of the set in hierarchy order.
    pub fn scopes(self) -> impl Iterator<Item = Scope> {
        Scope::ALL
            .into_iter()
            .filter(move |scope| self.contains(scope.flag()))
    }
}

impl From<Scope> for ScopeSet {
    fn from(scope: Scope) -> Self {
        scope.flag()
    }
}

impl FromIterator<Scope> for ScopeSet {
    fn from_iter<T: IntoIterator<Item = Scope>>(iter: T) -> Self {
        iter.into_iter()
            .fold(ScopeSet::empty(), |set, scope| set | scope.flag())
    }
}
