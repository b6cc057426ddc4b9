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

//! AN4221 transport: I2C, using the `i2cdev` crate. The bootloader on this
//! peripheral is a no-stretch implementation: it answers BUSY (0x76) while
//! a block write or erase is in flight rather than stretching the clock,
//! so the host must poll.

use std::path::Path;

use i2cdev::core::I2CDevice;
use i2cdev::linux::LinuxI2CDevice;

use crate::error::{Error, Result};
use crate::transport::{Capabilities, GpioLine, Transport};

/// `/dev/i2c-*`-backed transport implementing AN4221.
pub struct I2cTransport {
    dev: LinuxI2CDevice,
    cfg_str: String,
}

impl I2cTransport {
    /// Open `device` (e.g. `/dev/i2c-1`) talking to 7-bit address `addr`.
    /// Returns [`Error::Transport`]`(NotFound)` if `device` isn't an I2C
    /// character device, so the session can try another transport.
    pub fn open<P: AsRef<Path>>(device: P, addr: u16) -> Result<I2cTransport> {
        let device = device.as_ref();
        if !device
            .to_string_lossy()
            .contains("i2c")
        {
            return Err(Error::from(std::io::ErrorKind::NotFound));
        }

        let dev = LinuxI2CDevice::new(device, addr)
            .map_err(|e| Error::Transport(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;

        Ok(I2cTransport {
            cfg_str: format!("{} @ 0x{:02X}", device.display(), addr),
            dev,
        })
    }
}

impl Transport for I2cTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        self.dev
            .read(buf)
            .map_err(|e| Error::Transport(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.dev
            .write(buf)
            .map_err(|e| Error::Transport(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))
    }

    fn flush(&mut self) -> Result<()> {
        // I2C is frame-oriented; there's no host-side input buffer to
        // discard.
        Ok(())
    }

    fn gpio(&mut self, _line: GpioLine, _level: bool) -> Result<()> {
        // I2C has no modem-control lines; the GPIO sequencer falls back to
        // sysfs-driven pins for entry/exit sequencing on this transport.
        Ok(())
    }

    fn get_cfg_str(&self) -> String {
        self.cfg_str.clone()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::RETRY
    }
}
