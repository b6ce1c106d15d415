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

mod render;

use clap::Parser;
use eyre::WrapErr as _;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

use cpu_topology::dies_to_str;
use cpu_topology::CpuInfo;
use cpu_topology::ErrorKind;
use cpu_topology::Scope;
use cpu_topology::ScopeSet;
use cpu_topology::SysfsSource;
use topo_config::load_config;
use topo_config::TopoConfig;

#[derive(Parser, Debug)]
#[command(about = "Prints the CPU topology of the host")]
struct Args {
    /// Path to a TOML config, built-in defaults are used without it.
    #[arg(short, long = "config")]
    config_path: Option<String>,

    /// Comma-separated levels to print, all levels by default.
    #[arg(short, long, value_delimiter = ',')]
    levels: Vec<Scope>,

    /// Level to sort the rows by.
    #[arg(short, long, default_value = "CPU")]
    order: Scope,

    /// Print JSON instead of a table.
    #[arg(long)]
    json: bool,

    /// Also print compute and non-compute dies of every package.
    #[arg(long)]
    dies: bool,

    /// Also print the processor description and its caches.
    #[arg(long)]
    caches: bool,
}

fn main() -> eyre::Result<()> {
    let args = Args::parse();
    let config = match &args.config_path {
        Some(path) => load_config(path)?,
        None => TopoConfig::default(),
    };

    let filter = EnvFilter::builder()
        .with_env_var("RUST_LOG")
        .with_default_directive(Directive::from(config.logs.log_level))
        .from_env_lossy();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .wrap_err("setting global tracing subscriber failed")?;
    tracing_log::LogTracer::init()?;

    tracing::debug!("running with config {config:?}");
    let source = SysfsSource::new(&config.root).with_msr(config.discovery.msr_enabled);
    let mut info = CpuInfo::new(source);

    let levels = match args.levels.iter().copied().collect::<ScopeSet>() {
        levels if levels.is_empty() => ScopeSet::all(),
        levels => levels,
    };
    let rows = info
        .get_topology(levels, args.order)
        .wrap_err("reading CPU topology failed")?;

    let output = if args.json {
        render::render_json(&rows, levels)?
    } else {
        render::render_table(&rows, levels)
    };
    println!("{output}");

    if args.dies {
        print_dies(&mut info)?;
    }

    if args.caches {
        print_caches(&mut info)?;
    }

    Ok(())
}

fn print_dies(info: &mut CpuInfo) -> eyre::Result<()> {
    let compute = info
        .get_compute_dies()
        .wrap_err("reading compute dies failed")?;
    println!("compute dies: {}", dies_to_str(&compute));

    match info.get_noncompute_dies() {
        Ok(noncompute) if noncompute.values().all(Vec::is_empty) => {
            println!("non-compute dies: none")
        }
        Ok(noncompute) => println!("non-compute dies: {}", dies_to_str(&noncompute)),
        Err(e) if e.kind() == ErrorKind::Unsupported => {
            tracing::info!("non-compute dies are not available: {e}")
        }
        Err(e) => return Err(e).wrap_err("reading non-compute dies failed"),
    }

    Ok(())
}

fn print_caches(info: &mut CpuInfo) -> eyre::Result<()> {
    println!("processor: {}", info.cpu_description()?);

    let caches = info.get_cache_info().wrap_err("reading CPU caches failed")?;
    if caches.is_empty() {
        println!("caches: unknown");
    }
    for cache in caches.values() {
        println!(
            "{}: {} KiB x {} instances, {} KiB total",
            cache.name,
            cache.one_size >> 10,
            cache.instances,
            cache.all_size >> 10
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_config_and_levels() {
        let args = Args::try_parse_from([
            "cputopo",
            "--config",
            "/etc/cputopo.toml",
            "--levels",
            "CPU,die",
            "--order",
            "package",
        ])
        .unwrap();

        assert_eq!(args.config_path.as_deref(), Some("/etc/cputopo.toml"));
        assert_eq!(args.levels, vec![Scope::Cpu, Scope::Die]);
        assert_eq!(args.order, Scope::Package);
        assert!(!args.json);
        assert!(!args.caches);
    }

    #[test]
    fn short_config_flag_and_defaults() {
        let args = Args::try_parse_from(["cputopo", "-c", "local.toml"]).unwrap();

        assert_eq!(args.config_path.as_deref(), Some("local.toml"));
        assert!(args.levels.is_empty());
        assert_eq!(args.order, Scope::Cpu);
    }

    #[test]
    fn extra_reports_are_flags() {
        let args = Args::try_parse_from(["cputopo", "--dies", "--caches"]).unwrap();
        assert!(args.dies);
        assert!(args.caches);
    }

    #[test]
    fn unknown_level_is_rejected() {
        assert!(Args::try_parse_from(["cputopo", "--levels", "socket"]).is_err());
    }
}
