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

use std::fs::File;
use std::path::Path;

use topo_shared::ScopeNum;

use super::errors::MSRError;
use crate::MSRResult;

pub(crate) fn msr_path(dev_dir: &Path, cpu: ScopeNum) -> std::path::PathBuf {
    dev_dir.join(cpu.to_string()).join("msr")
}

pub(crate) fn read_msr(dev_dir: &Path, register_id: u32, cpu: ScopeNum) -> MSRResult<u64> {
    use nix::sys::uio::pread;

    let path = msr_path(dev_dir, cpu);
    let file = File::open(&path).map_err(|error| MSRError::open_for_read(path, error))?;

    let mut value = [0u8; 8];
    pread(&file, &mut value, register_id as i64)
        .map_err(|errno| MSRError::read_w_no_err(register_id, cpu, errno))?;
    let result = u64::from_le_bytes(value);

    tracing::debug!("Read MSR register_id {register_id:#x} value {result:#x} at CPU {cpu}");

    Ok(result)
}
