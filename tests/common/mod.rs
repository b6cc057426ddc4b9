//! A scripted `Transport` double: replies are a flat byte stream consumed
//! in order, writes are recorded verbatim for assertions. Stands in for a
//! real bootloader the way the library's own unit tests stand in a mock
//! port for a single method rather than a live device.

use std::collections::VecDeque;

use stm32_sbl::{Capabilities, GpioLine, Result, Transport};

pub struct ScriptedTransport {
    to_host: VecDeque<u8>,
    pub written: Vec<u8>,
    pub gpio_log: Vec<(GpioLine, bool)>,
    caps: Capabilities,
}

impl ScriptedTransport {
    pub fn new(caps: Capabilities, script: &[u8]) -> ScriptedTransport {
        ScriptedTransport {
            to_host: script.iter().copied().collect(),
            written: Vec::new(),
            gpio_log: Vec::new(),
            caps,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.to_host.extend(bytes.iter().copied());
    }
}

impl Transport for ScriptedTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        if self.to_host.len() < buf.len() {
            return Err(stm32_sbl::Error::Transport(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "scripted transport ran out of bytes",
            )));
        }
        for slot in buf.iter_mut() {
            *slot = self.to_host.pop_front().unwrap();
        }
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.written.extend_from_slice(buf);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn gpio(&mut self, line: GpioLine, level: bool) -> Result<()> {
        self.gpio_log.push((line, level));
        Ok(())
    }

    fn get_cfg_str(&self) -> String {
        "scripted".to_string()
    }

    fn capabilities(&self) -> Capabilities {
        self.caps
    }
}

pub const ACK: u8 = 0x79;
pub const NACK: u8 = 0x1F;

/// A full init-handshake reply stream for a UART-like (`BYTE_ORIENTED |
/// CMD_INIT | GVR_ETX`) transport, as seen by [`stm32_sbl::Engine::init`].
pub fn uart_init_script(bl_version: u8, opcodes: &[u8], gvr: (u8, u8, u8), pid: u16) -> Vec<u8> {
    let mut s = Vec::new();
    s.push(ACK); // INIT ack

    s.push(ACK); // GET cmd ack
    s.push(opcodes.len() as u8); // GET len byte: N, meaning N+1 bytes follow
    s.push(bl_version);
    s.extend_from_slice(opcodes);
    s.push(ACK); // GET trailing ack

    s.push(ACK); // GVR cmd ack
    s.push(gvr.0);
    s.push(gvr.1);
    s.push(gvr.2);
    s.push(ACK); // GVR trailing ack

    s.push(ACK); // GID cmd ack
    s.push(0x01); // GID len byte: N=1, meaning 2 bytes follow
    s.push((pid >> 8) as u8);
    s.push((pid & 0xFF) as u8);
    s.push(ACK); // GID trailing ack

    s
}
