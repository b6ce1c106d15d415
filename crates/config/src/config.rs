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
use std::path::PathBuf;

use crate::defaults::default_log_level;
use crate::defaults::default_msr_enabled;
use crate::defaults::default_sysfs_root;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopoConfig {
    /// Directory sysfs and devfs paths are resolved against, `/` on a live host.
    pub root: PathBuf,
    pub discovery: Discovery,
    pub logs: Logs,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Discovery {
    /// Read compute die numbers from MSR_PM_LOGICAL_ID on CPUs that hide them from sysfs.
    pub msr_enabled: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Logs {
    pub log_level: tracing_subscriber::filter::LevelFilter,
}

impl Default for TopoConfig {
    fn default() -> Self {
        Self {
            root: default_sysfs_root(),
            discovery: Discovery::default(),
            logs: Logs::default(),
        }
    }
}

impl Default for Discovery {
    fn default() -> Self {
        Self {
            msr_enabled: default_msr_enabled(),
        }
    }
}

impl Default for Logs {
    fn default() -> Self {
        Self {
            log_level: default_log_level().to_tracing_filter(),
        }
    }
}
