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

use once_cell::unsync::OnceCell;

use crate::errors::UnsupportedError;

/// An optional capability which is created on first use. Both the capability and the reason it
/// is unsupported are memoized, so a failed initialization is never attempted again.
pub(crate) struct LazyCapability<T> {
    cell: OnceCell<Result<T, UnsupportedError>>,
}

impl<T> LazyCapability<T> {
    pub(crate) fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    pub(crate) fn get_or_init(
        &self,
        init: impl FnOnce() -> Result<T, UnsupportedError>,
    ) -> Result<&T, UnsupportedError> {
        self.cell.get_or_init(init).as_ref().map_err(Clone::clone)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn failed_initialization_is_not_repeated() {
        let attempts = Cell::new(0);
        let capability = LazyCapability::<u32>::new();

        for _ in 0..3 {
            let result = capability.get_or_init(|| {
                attempts.set(attempts.get() + 1);
                Err(UnsupportedError::new("TPMI", "no debugfs"))
            });
            assert_eq!(result, Err(UnsupportedError::new("TPMI", "no debugfs")));
        }
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn capability_is_created_once() {
        let attempts = Cell::new(0);
        let capability = LazyCapability::new();

        for _ in 0..2 {
            let value = capability.get_or_init(|| {
                attempts.set(attempts.get() + 1);
                Ok(42)
            });
            assert_eq!(value, Ok(&42));
        }
        assert_eq!(attempts.get(), 1);
    }
}
