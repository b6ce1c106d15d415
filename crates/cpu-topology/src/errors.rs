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

use thiserror::Error as ThisError;

use topo_msr::MSRError;
use topo_shared::ranges::IntListError;
use topo_shared::Scope;
use topo_shared::ScopeNum;
use topo_shared::UnknownScopeError;

#[derive(Debug, ThisError)]
pub enum TopologyError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Unsupported(#[from] UnsupportedError),

    #[error("BUG: {message}")]
    Bug { message: String },

    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Category of a [`TopologyError`], for callers that only need to branch on it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Unsupported,
    Bug,
    Source,
}

impl TopologyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::Bug { .. } => ErrorKind::Bug,
            Self::Source(_) => ErrorKind::Source,
        }
    }

    pub(crate) fn bug(message: impl Into<String>) -> Self {
        Self::Bug {
            message: message.into(),
        }
    }
}

impl From<UnknownScopeError> for TopologyError {
    fn from(value: UnknownScopeError) -> Self {
        Self::Validation(value.into())
    }
}

impl From<MSRError> for TopologyError {
    fn from(value: MSRError) -> Self {
        Self::Source(value.into())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum ValidationError {
    #[error(transparent)]
    UnknownScope(#[from] UnknownScopeError),

    #[error("'{value}' is not an integer, {scope} numbers must be integers")]
    NotAnInteger { scope: Scope, value: String },

    #[error(transparent)]
    BadNumberList(#[from] IntListError),

    #[error("{scope} {invalid} do not exist, valid {scope} numbers are: {valid}")]
    DoNotExist {
        scope: Scope,
        invalid: String,
        valid: String,
    },

    #[error("{scope} {num} is not available{context}, available {scope}s are: {valid}")]
    NotAvailable {
        scope: Scope,
        num: ScopeNum,
        context: String,
        valid: String,
    },

    #[error("bad level order, cannot get {child}s from level '{parent}'")]
    BadContainment { child: Scope, parent: Scope },
}

impl ValidationError {
    pub(crate) fn not_an_integer(scope: Scope, value: impl ToString) -> Self {
        Self::NotAnInteger {
            scope,
            value: value.to_string(),
        }
    }

    pub(crate) fn do_not_exist(scope: Scope, invalid: String, valid: String) -> Self {
        Self::DoNotExist {
            scope,
            invalid,
            valid,
        }
    }

    pub(crate) fn not_available(
        scope: Scope,
        num: ScopeNum,
        context: impl Into<String>,
        valid: String,
    ) -> Self {
        Self::NotAvailable {
            scope,
            num,
            context: context.into(),
            valid,
        }
    }
}

/// A capability, such as MSR access or the topology discovery protocol, is not available.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("{what} is not supported: {reason}")]
pub struct UnsupportedError {
    pub what: String,
    pub reason: String,
}

impl UnsupportedError {
    pub fn new(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            what: what.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, ThisError)]
pub enum SourceError {
    #[error("reading '{path:?}' there is an error: {io_error}")]
    Read {
        path: PathBuf,
        io_error: std::io::Error,
    },

    #[error("bad contents of '{path:?}': {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error(transparent)]
    Msr(#[from] MSRError),

    #[error("topology discovery protocol error: {message}")]
    Protocol { message: String },
}

impl SourceError {
    pub fn read(path: impl Into<PathBuf>, io_error: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            io_error,
        }
    }

    pub fn parse(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}
