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

use eyre::eyre;
use serde::Deserialize;
use serde::Serialize;

use super::defaults::default_log_level;
use super::defaults::default_msr_enabled;
use super::defaults::default_sysfs_root;
use crate::*;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UnresolvedTopoConfig {
    #[serde(default)]
    pub sysfs: UnresolvedSysfs,
    #[serde(default)]
    pub discovery: UnresolvedDiscovery,
    #[serde(default)]
    pub logs: UnresolvedLogs,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UnresolvedSysfs {
    #[serde(default = "default_sysfs_root")]
    pub root: PathBuf,
}

impl Default for UnresolvedSysfs {
    fn default() -> Self {
        Self {
            root: default_sysfs_root(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UnresolvedDiscovery {
    #[serde(default = "default_msr_enabled")]
    pub msr_enabled: bool,
}

impl Default for UnresolvedDiscovery {
    fn default() -> Self {
        Self {
            msr_enabled: default_msr_enabled(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UnresolvedLogs {
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,
}

impl Default for UnresolvedLogs {
    fn default() -> Self {
        UnresolvedLogs {
            log_level: default_log_level(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl UnresolvedTopoConfig {
    /// A relative sysfs root is taken relative to the directory of the config file.
    pub fn resolve(self, config_path: impl AsRef<Path>) -> eyre::Result<TopoConfig> {
        let config_dir = config_path.as_ref().parent().ok_or_else(|| {
            eyre!(
                "config resolver was provided with invalid config path: {}",
                config_path.as_ref().display()
            )
        })?;

        let config = TopoConfig {
            root: config_dir.join(self.sysfs.root),
            discovery: self.discovery.resolve(),
            logs: self.logs.resolve(),
        };
        Ok(config)
    }
}

impl UnresolvedDiscovery {
    pub fn resolve(self) -> Discovery {
        Discovery {
            msr_enabled: self.msr_enabled,
        }
    }
}

impl LogLevel {
    pub fn to_tracing_filter(&self) -> tracing_subscriber::filter::LevelFilter {
        use tracing_subscriber::filter::LevelFilter;

        match self {
            LogLevel::Off => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

impl UnresolvedLogs {
    pub fn resolve(self) -> Logs {
        Logs {
            log_level: self.log_level.to_tracing_filter(),
        }
    }
}
