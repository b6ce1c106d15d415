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

use nix::errno::Errno;
use thiserror::Error as ThisError;

use topo_shared::ScopeNum;

#[derive(ThisError, Debug)]
pub enum MSRError {
    #[error("opening MSR file '{path:?}' for read there is an error: {io_error:?}")]
    OpenForRead {
        path: PathBuf,
        io_error: std::io::Error,
    },

    #[error(
        "reading from register_id {register_id:#x} and MSR file of CPU {cpu} there is an error: {errno:?}"
    )]
    ReadWNoErr {
        register_id: u32,
        cpu: ScopeNum,
        errno: Errno,
    },

    #[error("MSR device files are not available in '{dev_dir:?}', is the 'msr' driver loaded?")]
    NotAvailable { dev_dir: PathBuf },
}

impl MSRError {
    pub(crate) fn open_for_read(path: PathBuf, io_error: std::io::Error) -> Self {
        Self::OpenForRead { path, io_error }
    }

    pub(crate) fn read_w_no_err(register_id: u32, cpu: ScopeNum, errno: Errno) -> Self {
        Self::ReadWNoErr {
            register_id,
            cpu,
            errno,
        }
    }

    pub(crate) fn not_available(dev_dir: PathBuf) -> Self {
        Self::NotAvailable { dev_dir }
    }
}
