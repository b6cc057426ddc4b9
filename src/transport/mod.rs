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

//! Transport abstraction: one byte-pipe to the target, over UART, I2C or
//! SPI, with an identical request/response contract for the engine.

use std::time::Duration;

use crate::error::{Error, Result};

pub mod i2c;
pub mod spi;
pub mod uart;

bitflags::bitflags! {
    /// Capability/quirk flags a transport advertises to the engine.
    pub struct Capabilities: u32 {
        /// Reads may return short (UART); length-prefixed replies are safe
        /// to read byte-by-byte.
        const BYTE_ORIENTED = 1 << 0;
        /// Transport requires the single-byte INIT (0x7F) auto-baud
        /// sequence.
        const CMD_INIT = 1 << 1;
        /// Every command frame is preceded by a start-of-frame byte (SPI).
        const CMD_SOF = 1 << 2;
        /// GVR reply is 3 bytes (UART) vs. 1 byte (I2C/SPI).
        const GVR_ETX = 1 << 3;
        /// ACK reads must tolerate BUSY polling until completion
        /// (no-stretch I2C).
        const RETRY = 1 << 4;
        /// SPI needs a clock-priming workaround until the first valid
        /// ACK/NACK appears.
        const SPI_INIT = 1 << 5;
    }
}

/// A modem-control line or pseudo-signal a transport may be able to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioLine {
    Rts,
    Dtr,
    Break,
}

/// One byte-pipe to the target device.
///
/// Implementors must honour the timing contract of spec.md §4.1: a `read`
/// must not return 0 bytes without waiting at least one transport-defined
/// inter-byte timeout.
pub trait Transport {
    /// Read exactly `buf.len()` bytes, blocking up to the transport's
    /// configured timeout.
    fn read(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Write exactly `buf.len()` bytes.
    fn write(&mut self, buf: &[u8]) -> Result<()>;

    /// Discard any buffered input.
    fn flush(&mut self) -> Result<()>;

    /// Drive a modem-control line or issue a BREAK. Transports that can't
    /// drive a given line (e.g. SPI) return `Ok(())`, making the GPIO
    /// sequencer a no-op there.
    fn gpio(&mut self, line: GpioLine, level: bool) -> Result<()>;

    /// Human-readable description, for logging.
    fn get_cfg_str(&self) -> String;

    /// The capability/quirk flags this transport advertises.
    fn capabilities(&self) -> Capabilities;

    /// Read a single byte within `timeout`, used for ACK/BUSY polling.
    /// The default implementation delegates to `read`; transports whose
    /// underlying I/O can return `WouldBlock`/partial reads override this
    /// to poll instead of blocking the full timeout on every byte.
    fn read_byte_timeout(&mut self, timeout: Duration) -> Result<u8> {
        let _ = timeout;
        let mut byte = [0u8; 1];
        self.read(&mut byte)?;
        Ok(byte[0])
    }
}

/// Read a single byte, treating it as an ACK/NACK/BUSY marker, polling
/// through BUSY bytes (on transports with [`Capabilities::RETRY`]) until
/// `deadline` elapses.
pub(crate) fn read_ack(
    port: &mut dyn Transport,
    deadline: Duration,
) -> Result<crate::codec::Ack> {
    use crate::codec::Ack;
    use std::time::Instant;

    let start = Instant::now();
    let retry = port.capabilities().contains(Capabilities::RETRY);

    loop {
        let byte = port.read_byte_timeout(deadline)?;
        let ack = Ack::of(byte);

        if !retry {
            return Ok(ack);
        }

        match ack {
            Ack::Busy => {
                if start.elapsed() >= deadline {
                    return Err(Error::framing("timed out waiting past BUSY"));
                }
                continue;
            }
            other => return Ok(other),
        }
    }
}
