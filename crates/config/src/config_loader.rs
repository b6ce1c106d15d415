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
use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use config::FileFormat;
use config::Map;
use config::Source;
use config::Value;
use eyre::Context;

use crate::unresolved_config::UnresolvedTopoConfig;
use crate::TopoConfig;

/// Loads a TOML config, values from `CPUTOPO_*` environment variables take precedence.
pub fn load_config(path: &str) -> eyre::Result<TopoConfig> {
    load_layered(path, EnvironmentOverrides::new())
}

pub(crate) fn load_layered(
    path: &str,
    overrides: EnvironmentOverrides,
) -> eyre::Result<TopoConfig> {
    let config_source = File::with_name(path)
        .required(true)
        .format(FileFormat::Toml);
    let config = Config::builder()
        .add_source(config_source)
        .add_source(overrides)
        .build()
        .with_context(|| format!("Failed to load config from {path}"))?;

    let config: UnresolvedTopoConfig = config
        .try_deserialize()
        .with_context(|| format!("Failed to parse config at {path}"))?;
    config.resolve(path)
}

/// `CPUTOPO_*` variables with keys spelled the way the TOML file spells them: sections are
/// separated by `__` and the remaining underscores become dashes, so
/// `CPUTOPO_DISCOVERY__MSR_ENABLED` sets `discovery.msr-enabled`.
#[derive(Clone, Debug)]
pub(crate) struct EnvironmentOverrides(Environment);

impl EnvironmentOverrides {
    pub(crate) fn new() -> Self {
        let environment = Environment::with_prefix("CPUTOPO")
            .prefix_separator("_")
            .separator("__");
        Self(environment)
    }

    /// Takes variables from `vars` instead of the process environment.
    #[cfg(test)]
    pub(crate) fn from_vars(vars: Map<String, String>) -> Self {
        let Self(environment) = Self::new();
        Self(environment.source(Some(vars)))
    }
}

impl Source for EnvironmentOverrides {
    fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
        Box::new(self.clone())
    }

    fn collect(&self) -> Result<Map<String, Value>, ConfigError> {
        let values = self.0.collect()?;
        Ok(values
            .into_iter()
            .map(|(key, value)| (key.replace('_', "-"), value))
            .collect())
    }
}
