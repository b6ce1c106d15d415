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

mod cpu_model;

pub use cpu_model::CpuModel;
pub use cpu_model::Vendor;
pub use cpu_model::Vfm;

/// A number of a CPU, core, module, die, node or package.
pub type ScopeNum = u32;

/// Marks a scope number that does not apply to a topology row (e.g. the CPU number of a die
/// without CPUs) or is not known yet. It is the largest possible number, so such rows sort last.
pub const NA: ScopeNum = 0xFFFF_FFFF;
