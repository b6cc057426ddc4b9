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

//! AN3155 transport: one UART, using the `serial` crate.

use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use serial::{SerialPort, SystemPort};

use crate::error::{Error, Result};
use crate::transport::{Capabilities, GpioLine, Transport};

/// Default UART framing for every ST bootloader: 8 data bits, even parity,
/// 1 stop bit.
pub fn port_settings(baud_rate: serial::BaudRate) -> serial::PortSettings {
    serial::PortSettings {
        baud_rate,
        char_size: serial::CharSize::Bits8,
        parity: serial::Parity::ParityEven,
        stop_bits: serial::StopBits::Stop1,
        flow_control: serial::FlowControl::FlowNone,
    }
}

/// `/dev/tty*`-backed transport implementing AN3155.
pub struct UartTransport {
    port: SystemPort,
    cfg_str: String,
}

impl UartTransport {
    /// Open `device` at `baud_rate`. Returns
    /// [`Error::Transport`]`(NotFound)` if `device` doesn't look like a
    /// serial device at all (so the session can try another transport).
    pub fn open<P: AsRef<Path>>(
        device: P,
        baud_rate: serial::BaudRate,
    ) -> Result<UartTransport> {
        let device = device.as_ref();

        let mut port = serial::open(device).map_err(|e| match e.kind() {
            serial::ErrorKind::NoDevice => Error::from(std::io::ErrorKind::NotFound),
            _ => Error::Transport(std::io::Error::new(
                std::io::ErrorKind::Other,
                e.to_string(),
            )),
        })?;

        port.configure(&port_settings(baud_rate))
            .map_err(|e| io_err(&e))?;
        // Mass erase and sector erase latencies are absorbed at the
        // engine level with per-operation timeouts; the inter-character
        // timeout here only needs to cover normal byte spacing.
        port.set_timeout(Duration::from_secs(2))
            .map_err(|e| io_err(&e))?;

        Ok(UartTransport {
            cfg_str: format!("{} @ {:?}", device.display(), baud_rate),
            port,
        })
    }
}

fn io_err(e: &serial::Error) -> Error {
    Error::Transport(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
}

impl Transport for UartTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        self.port.read_exact(buf).map_err(Error::from)
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.port.write_all(buf).map_err(Error::from)?;
        self.port.flush().map_err(Error::from)
    }

    fn flush(&mut self) -> Result<()> {
        // `serial`'s flush is output-only; discard any pending input by
        // reading until it would time out.
        let mut scratch = [0u8; 64];
        loop {
            match self.port.read(&mut scratch) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(e) => return Err(Error::from(e)),
            }
        }
        Ok(())
    }

    fn gpio(&mut self, line: GpioLine, level: bool) -> Result<()> {
        match line {
            GpioLine::Rts => self.port.set_rts(level).map_err(|e| io_err(&e)),
            GpioLine::Dtr => self.port.set_dtr(level).map_err(|e| io_err(&e)),
            GpioLine::Break => {
                // The `serial` crate has no portable BREAK primitive;
                // toggling DTR is the closest portable approximation some
                // USB-serial adapters accept as a soft reset kick.
                self.port.set_dtr(level).map_err(|e| io_err(&e))
            }
        }
    }

    fn get_cfg_str(&self) -> String {
        self.cfg_str.clone()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::BYTE_ORIENTED | Capabilities::CMD_INIT | Capabilities::GVR_ETX
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_port_settings_8e1() {
        let settings = port_settings(serial::BaudRate::Baud115200);
        assert_eq!(settings.char_size, serial::CharSize::Bits8);
        assert_eq!(settings.parity, serial::Parity::ParityEven);
        assert_eq!(settings.stop_bits, serial::StopBits::Stop1);
    }
}
