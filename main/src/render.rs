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
use itertools::Itertools;
use serde_json::Map;
use serde_json::Value;

use cpu_topology::ScopeNum;
use cpu_topology::ScopeSet;
use cpu_topology::TopologyRow;
use cpu_topology::NA;

const COLUMN_WIDTH: usize = 8;

/// Renders `rows` as a fixed-width table with one column per level of `levels`.
pub(crate) fn render_table(rows: &[TopologyRow], levels: ScopeSet) -> String {
    let header = levels
        .scopes()
        .map(|scope| format!("{:>COLUMN_WIDTH$}", scope.name()))
        .join(" ");

    let lines = rows.iter().map(|row| {
        levels
            .scopes()
            .map(|scope| format!("{:>COLUMN_WIDTH$}", cell(row.get(scope))))
            .join(" ")
    });

    std::iter::once(header).chain(lines).join("\n")
}

/// Renders `rows` as a JSON array of objects keyed by level names, NA numbers become `null`.
pub(crate) fn render_json(rows: &[TopologyRow], levels: ScopeSet) -> serde_json::Result<String> {
    let rows = rows
        .iter()
        .map(|row| {
            levels
                .scopes()
                .map(|scope| (scope.name().to_string(), json_cell(row.get(scope))))
                .collect::<Map<_, _>>()
        })
        .collect::<Vec<_>>();

    serde_json::to_string_pretty(&rows)
}

fn cell(num: ScopeNum) -> String {
    match num {
        NA => "-".to_string(),
        num => num.to_string(),
    }
}

fn json_cell(num: ScopeNum) -> Value {
    match num {
        NA => Value::Null,
        num => Value::from(num),
    }
}
