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

/// MSR_PM_LOGICAL_ID, available on Intel CPUs starting from Granite Rapids. It is per-CPU and
/// describes how the CPU maps to power management domains.
pub const MSR_PM_LOGICAL_ID: u32 = 0x54;

const DOMAIN_ID_SHIFT: u64 = 11;
const DOMAIN_ID_MASK: u64 = 0x3F;

/// Extracts the power management domain ID (bits 16:11), which equals the die number of the CPU
/// within its package.
pub fn domain_id(regval: u64) -> u32 {
    ((regval >> DOMAIN_ID_SHIFT) & DOMAIN_ID_MASK) as u32
}
