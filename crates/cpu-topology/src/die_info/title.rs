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

use super::AgentTypes;

/// Human-readable title of a die with `agents`: "Compute" for dies with CPUs, otherwise the
/// agent names, e.g. "I/O and memory" or "Cache, I/O, and memory".
pub fn format_die_title(agents: AgentTypes) -> String {
    if agents.contains(AgentTypes::CORE) {
        return "Compute".to_string();
    }

    let names = [
        (AgentTypes::CACHE, "cache"),
        (AgentTypes::IO, "I/O"),
        (AgentTypes::MEMORY, "memory"),
    ]
    .into_iter()
    .filter(|(agent, _)| agents.contains(*agent))
    .map(|(_, name)| name)
    .collect::<Vec<_>>();

    let title = match names.as_slice() {
        [] => "unknown".to_string(),
        [name] => name.to_string(),
        [first, second] => format!("{first} and {second}"),
        [init @ .., last] => format!("{}, and {last}", init.join(", ")),
    };

    capitalize(&title)
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
