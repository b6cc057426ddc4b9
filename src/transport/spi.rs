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

//! AN4286 transport: SPI, using the `spidev` crate.
//!
//! Every transfer is full-duplex: a single `SPI_IOC_MESSAGE` ioctl with a
//! tx buffer that mirrors the rx buffer on reads. Until the engine has
//! observed its first valid ACK/NACK, every transfer that yields `0x00` (or
//! anything else that isn't ACK/NACK) is retried up to 500 times before
//! giving up — this is the SPI clock-priming workaround of spec.md §4.1,
//! needed because the target's SPI peripheral only starts clocking out
//! real data once its own state machine has synchronized.

use std::path::Path;

use spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};

use crate::codec::{ACK, NACK, SPI_SOF};
use crate::error::{Error, Result};
use crate::transport::{Capabilities, GpioLine, Transport};

const PRIMING_ATTEMPTS: usize = 500;

/// `/dev/spidev*`-backed transport implementing AN4286.
pub struct SpiTransport {
    dev: Spidev,
    cfg_str: String,
    primed: bool,
}

impl SpiTransport {
    /// Open `device` (e.g. `/dev/spidev0.0`). Returns
    /// [`Error::Transport`]`(NotFound)` if `device` doesn't match the SPI
    /// device-file namespace.
    pub fn open<P: AsRef<Path>>(device: P, max_speed_hz: u32) -> Result<SpiTransport> {
        let device = device.as_ref();
        if !device.to_string_lossy().contains("spidev") {
            return Err(Error::from(std::io::ErrorKind::NotFound));
        }

        let mut dev = Spidev::open(device)
            .map_err(|e| Error::Transport(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;

        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(max_speed_hz)
            .mode(SpiModeFlags::SPI_MODE_0)
            .build();
        dev.configure(&options)
            .map_err(|e| Error::Transport(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;

        Ok(SpiTransport {
            cfg_str: format!("{} @ {} Hz", device.display(), max_speed_hz),
            dev,
            primed: false,
        })
    }

    /// A single full-duplex transfer: `tx` and the returned `Vec` are the
    /// same length, the tx buffer mirroring the rx buffer on pure reads
    /// (callers pass all-zero `tx` for a read).
    fn transfer_raw(&mut self, tx: &[u8]) -> Result<Vec<u8>> {
        let mut rx = vec![0u8; tx.len()];
        {
            let mut transfer = SpidevTransfer::read_write(tx, &mut rx);
            self.dev
                .transfer(&mut transfer)
                .map_err(|e| Error::Transport(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        }
        Ok(rx)
    }
}

impl Transport for SpiTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        if !self.primed {
            for _ in 0..PRIMING_ATTEMPTS {
                let tx = vec![0u8; buf.len()];
                let rx = self.transfer_raw(&tx)?;
                if rx.iter().any(|&b| b == ACK || b == NACK) {
                    buf.copy_from_slice(&rx);
                    self.primed = true;
                    return Ok(());
                }
            }
            return Err(Error::framing("SPI priming exhausted without ACK/NACK"));
        }

        let tx = vec![0u8; buf.len()];
        let rx = self.transfer_raw(&tx)?;
        buf.copy_from_slice(&rx);
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.transfer_raw(buf).map(|_| ())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn gpio(&mut self, _line: GpioLine, _level: bool) -> Result<()> {
        // SPI has no modem-control lines; unsupported lines are a no-op
        // per spec.md §4.1.
        Ok(())
    }

    fn get_cfg_str(&self) -> String {
        self.cfg_str.clone()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::CMD_SOF | Capabilities::SPI_INIT
    }
}

/// Prepend the 0x5A SOF byte a [`Capabilities::CMD_SOF`] transport requires
/// on every command frame.
pub fn with_sof(frame: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(frame.len() + 1);
    framed.push(SPI_SOF);
    framed.extend_from_slice(frame);
    framed
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_with_sof() {
        assert_eq!(with_sof(&[0x00, 0xFF]), vec![0x5A, 0x00, 0xFF]);
    }
}
