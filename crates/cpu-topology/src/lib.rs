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

#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![deny(
    dead_code,
    nonstandard_style,
    unused_imports,
    unused_mut,
    unused_variables,
    unused_unsafe,
    unreachable_patterns
)]

mod cache_info;
mod capability;
mod cpu_info;
mod cpu_sets;
pub mod die_info;
mod errors;
mod handle;
pub mod source;
pub mod sysfs;
pub mod table;

pub use cache_info::CacheInfo;
pub use cpu_info::dies_to_str;
pub use cpu_info::CpuInfo;
pub use cpu_info::DieFilter;
pub use cpu_info::Division;
pub use cpu_info::IntoSelection;
pub use cpu_info::ScopeGroup;
pub use cpu_info::Selection;
pub use cpu_info::SiblingScope;
pub use errors::ErrorKind;
pub use errors::SourceError;
pub use errors::TopologyError;
pub use errors::UnsupportedError;
pub use errors::ValidationError;
pub use handle::CpuInfoHandle;
pub use sysfs::SysfsSource;
pub use table::TopologyRow;

pub use topo_shared::CpuModel;
pub use topo_shared::Scope;
pub use topo_shared::ScopeNum;
pub use topo_shared::ScopeSet;
pub use topo_shared::NA;

pub type TopologyResult<T> = Result<T, TopologyError>;
pub type SourceResult<T> = Result<T, SourceError>;
