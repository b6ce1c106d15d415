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

use std::path::Path;

use thiserror::Error as ThisError;

use topo_shared::CpuModel;
use topo_shared::ScopeNum;

use crate::MSRResult;

#[derive(ThisError, Debug)]
pub enum MSRError {
    #[error("MSR access is supported only on x86_64 Linux")]
    NotSupported,
}

#[derive(Clone, Debug)]
pub struct MsrDevice;

impl MsrDevice {
    pub fn open(_root: impl AsRef<Path>) -> MSRResult<Self> {
        Err(MSRError::NotSupported)
    }

    pub fn read(&self, _register_id: u32, _cpu: ScopeNum) -> MSRResult<u64> {
        Err(MSRError::NotSupported)
    }
}

pub fn detect_cpu_model() -> Option<CpuModel> {
    None
}
