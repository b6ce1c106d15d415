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

/// This crate provides read-only access to model specific registers for the archs that expose
/// them through the `msr` driver, e.g. Linux on x86_64, and detects the model of the local CPU.
/// For everything else reading always fails with `MSRError::NotSupported`.

#[cfg(all(target_arch = "x86_64", target_os = "linux"))]
#[path = "linux_x86_64/mod.rs"]
mod msr_impl;
#[cfg(not(all(target_arch = "x86_64", target_os = "linux")))]
#[path = "other/mod.rs"]
mod msr_impl;

mod pm_logical_id;

pub use msr_impl::*;
pub use pm_logical_id::domain_id;
pub use pm_logical_id::MSR_PM_LOGICAL_ID;

pub type MSRResult<T> = Result<T, MSRError>;
