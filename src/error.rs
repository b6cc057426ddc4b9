// Copyright 2021 Locha Mesh Developers <contact@locha.io>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error kinds surfaced by the transport, engine and session layers.

use std::io;

use thiserror::Error;

/// The six error kinds the bootloader engine can raise.
#[derive(Error, Debug)]
pub enum Error {
    /// A read, write, flush or open on the transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// An ACK/NACK was expected but something else arrived, or a
    /// length-prefixed reply's length byte didn't match what was read.
    #[error("framing error: {0}")]
    Framing(String),

    /// The device sent NACK in response to an otherwise valid command.
    #[error("command denied by device (NACK)")]
    ProtocolDenied,

    /// The requested operation has no opcode in this bootloader's command
    /// table (`CMD_ERR`).
    #[error("bootloader does not support `{0}`")]
    CapabilityMissing(&'static str),

    /// The operation was refused because of a known silicon limitation.
    #[error("blocked by device quirk: {0}")]
    QuirkBlocked(String),

    /// Misaligned address, out-of-range length, or invalid argument
    /// combination.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// The PID read back from `GID` has no entry in the device catalog.
    #[error("unsupported device (PID 0x{0:03X})")]
    UnknownDevice(u16),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn framing<S: Into<String>>(msg: S) -> Error {
        Error::Framing(msg.into())
    }

    pub(crate) fn precondition<S: Into<String>>(msg: S) -> Error {
        Error::Precondition(msg.into())
    }

    pub(crate) fn quirk<S: Into<String>>(msg: S) -> Error {
        Error::QuirkBlocked(msg.into())
    }
}

impl From<io::ErrorKind> for Error {
    fn from(kind: io::ErrorKind) -> Self {
        Error::Transport(io::Error::from(kind))
    }
}
