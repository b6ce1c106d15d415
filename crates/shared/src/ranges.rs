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

//! Helpers for the comma-separated integer lists used by sysfs, e.g. `0-3,6,9-11`.

use itertools::Itertools;
use thiserror::Error as ThisError;

use crate::ScopeNum;

#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("bad integer list '{text}': {reason}")]
pub struct IntListError {
    pub text: String,
    pub reason: String,
}

impl IntListError {
    fn new(text: &str, reason: impl Into<String>) -> Self {
        Self {
            text: text.to_string(),
            reason: reason.into(),
        }
    }
}

/// Parses a list of integers and closed integer ranges, keeping the order they appear in.
/// An empty (or whitespace-only) string is an empty list.
pub fn parse_int_list(text: &str) -> Result<Vec<ScopeNum>, IntListError> {
    let mut result = Vec::new();

    for item in text.trim().split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }

        let Some((start, end)) = item.split_once('-') else {
            result.push(parse_int(text, item)?);
            continue;
        };

        let start = parse_int(text, start.trim())?;
        let end = parse_int(text, end.trim())?;
        if start > end {
            return Err(IntListError::new(
                text,
                format!("error in range '{item}': the first number should be smaller than the second"),
            ));
        }
        result.extend(start..=end);
    }

    Ok(result)
}

fn parse_int(text: &str, item: &str) -> Result<ScopeNum, IntListError> {
    item.parse::<ScopeNum>()
        .map_err(|_| IntListError::new(text, format!("'{item}' is not a non-negative integer")))
}

/// Turns numbers into a sorted string of comma-separated ranges, e.g. `[4, 0, 1, 2]` becomes
/// `0-2,4`. Runs of two numbers stay as two separate numbers.
pub fn rangify(numbers: impl IntoIterator<Item = ScopeNum>) -> String {
    let numbers = numbers.into_iter().sorted().dedup().collect::<Vec<_>>();

    let runs = numbers
        .iter()
        .enumerate()
        .group_by(|(idx, number)| i64::from(**number) - *idx as i64);

    let mut parts = Vec::new();
    for (_, run) in &runs {
        let run = run.map(|(_, number)| *number).collect::<Vec<_>>();
        match run.as_slice() {
            [first, .., last] if run.len() > 2 => parts.push(format!("{first}-{last}")),
            _ => parts.extend(run.iter().map(ToString::to_string)),
        }
    }

    parts.join(",")
}
