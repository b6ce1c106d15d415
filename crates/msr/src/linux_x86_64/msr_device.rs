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
use std::path::PathBuf;

use topo_shared::ScopeNum;

use super::errors::MSRError;
use super::utils::read_msr;
use crate::MSRResult;

/// Per-CPU MSR device files under `<root>/dev/cpu/<cpu>/msr`.
#[derive(Clone, Debug)]
pub struct MsrDevice {
    dev_dir: PathBuf,
}

impl MsrDevice {
    /// Fails with `MSRError::NotAvailable` if there is no MSR device file for any CPU.
    pub fn open(root: impl AsRef<Path>) -> MSRResult<Self> {
        let dev_dir = root.as_ref().join("dev").join("cpu");

        let has_msr_files = std::fs::read_dir(&dev_dir)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .any(|entry| entry.path().join("msr").exists())
            })
            .unwrap_or(false);
        if !has_msr_files {
            return Err(MSRError::not_available(dev_dir));
        }

        tracing::debug!("MSR device files found in {dev_dir:?}");
        Ok(Self { dev_dir })
    }

    pub fn read(&self, register_id: u32, cpu: ScopeNum) -> MSRResult<u64> {
        read_msr(&self.dev_dir, register_id, cpu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MSR_PM_LOGICAL_ID;

    use std::io::Seek;
    use std::io::SeekFrom;
    use std::io::Write;

    fn write_msr_file(root: &Path, cpu: ScopeNum, register_id: u32, value: u64) {
        let dir = root.join("dev").join("cpu").join(cpu.to_string());
        std::fs::create_dir_all(&dir).unwrap();
        let mut file = std::fs::File::create(dir.join("msr")).unwrap();
        file.seek(SeekFrom::Start(register_id as u64)).unwrap();
        file.write_all(&value.to_le_bytes()).unwrap();
    }

    #[test]
    fn reads_register_at_its_offset() {
        let root = tempfile::tempdir().unwrap();
        write_msr_file(root.path(), 3, MSR_PM_LOGICAL_ID, 0x1234_5678);

        let device = MsrDevice::open(root.path()).unwrap();
        let value = device.read(MSR_PM_LOGICAL_ID, 3).unwrap();
        assert_eq!(value, 0x1234_5678);
    }

    #[test]
    fn missing_device_files_are_not_available() {
        let root = tempfile::tempdir().unwrap();
        let result = MsrDevice::open(root.path());
        assert!(matches!(result, Err(MSRError::NotAvailable { .. })));
    }

    #[test]
    fn missing_cpu_fails_to_open() {
        let root = tempfile::tempdir().unwrap();
        write_msr_file(root.path(), 0, MSR_PM_LOGICAL_ID, 1);

        let device = MsrDevice::open(root.path()).unwrap();
        let result = device.read(MSR_PM_LOGICAL_ID, 1);
        assert!(matches!(result, Err(MSRError::OpenForRead { .. })));
    }
}
