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

use serde_json::Value;

use topo_shared::ranges::parse_int_list;
use topo_shared::Scope;
use topo_shared::ScopeNum;

use crate::errors::ValidationError;

/// Numbers a query applies to: every number of a level, or an explicit list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selection {
    All,
    Nums(Vec<ScopeNum>),
}

impl Selection {
    pub fn contains(&self, num: ScopeNum) -> bool {
        match self {
            Selection::All => true,
            Selection::Nums(nums) => nums.contains(&num),
        }
    }
}

/// Anything a caller may pass where a selection of level numbers is expected. `scope` is only
/// used for error messages.
pub trait IntoSelection {
    fn into_selection(self, scope: Scope) -> Result<Selection, ValidationError>;
}

impl IntoSelection for Selection {
    fn into_selection(self, _scope: Scope) -> Result<Selection, ValidationError> {
        Ok(self)
    }
}

impl IntoSelection for ScopeNum {
    fn into_selection(self, _scope: Scope) -> Result<Selection, ValidationError> {
        Ok(Selection::Nums(vec![self]))
    }
}

impl IntoSelection for Vec<ScopeNum> {
    fn into_selection(self, _scope: Scope) -> Result<Selection, ValidationError> {
        Ok(Selection::Nums(self))
    }
}

impl IntoSelection for &Vec<ScopeNum> {
    fn into_selection(self, _scope: Scope) -> Result<Selection, ValidationError> {
        Ok(Selection::Nums(self.clone()))
    }
}

impl IntoSelection for &[ScopeNum] {
    fn into_selection(self, _scope: Scope) -> Result<Selection, ValidationError> {
        Ok(Selection::Nums(self.to_vec()))
    }
}

impl<const N: usize> IntoSelection for [ScopeNum; N] {
    fn into_selection(self, _scope: Scope) -> Result<Selection, ValidationError> {
        Ok(Selection::Nums(self.to_vec()))
    }
}

/// `all` or a cpulist-style string such as `0-3,8`.
impl IntoSelection for &str {
    fn into_selection(self, _scope: Scope) -> Result<Selection, ValidationError> {
        if self.trim() == "all" {
            return Ok(Selection::All);
        }
        Ok(Selection::Nums(parse_int_list(self)?))
    }
}

/// Untyped input, e.g. from a JSON request. Only non-negative integers, arrays of them and the
/// strings accepted by `&str` are valid. Booleans are not integers here.
impl IntoSelection for &Value {
    fn into_selection(self, scope: Scope) -> Result<Selection, ValidationError> {
        match self {
            Value::String(text) => text.as_str().into_selection(scope),
            Value::Array(items) => items
                .iter()
                .map(|item| json_to_num(item, scope))
                .collect::<Result<Vec<_>, _>>()
                .map(Selection::Nums),
            other => json_to_num(other, scope).map(|num| Selection::Nums(vec![num])),
        }
    }
}

impl IntoSelection for Value {
    fn into_selection(self, scope: Scope) -> Result<Selection, ValidationError> {
        (&self).into_selection(scope)
    }
}

fn json_to_num(value: &Value, scope: Scope) -> Result<ScopeNum, ValidationError> {
    value
        .as_u64()
        .and_then(|num| ScopeNum::try_from(num).ok())
        .ok_or_else(|| ValidationError::not_an_integer(scope, value))
}
