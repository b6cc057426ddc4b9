// Copyright 2021 Locha Mesh Developers <contact@locha.io>
//
// Command dispatch follows the sequencing documented in AN3155/AN4221/
// AN4286 and implemented by stm32flash's `stm32.c`.
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

//! The bootloader protocol state machine: INIT handshake, capability
//! discovery, identification, and the read/write/erase/protect/go
//! sub-protocols.

use std::time::Duration;

use crate::codec::{self, Ack, CMD_ERR, CMD_INIT};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::transport::{read_ack, Capabilities, Transport};

const RESYNC_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);
const BLOCK_WRITE_TIMEOUT: Duration = Duration::from_secs(1);
const SECTOR_ERASE_TIMEOUT: Duration = Duration::from_secs(5);
const MASS_ERASE_TIMEOUT: Duration = Duration::from_secs(10);

/// PID of the L1 high-density part that does not support extended mass
/// erase (spec.md §4.4.7).
const PID_L1_NO_MASS_ERASE: u16 = 0x416;
/// Page count the 0x416 quirk downgrades a mass erase to.
const L1_MASS_ERASE_DOWNGRADE_PAGES: u16 = 0xF8;

/// ARMv6/v7-M thumb payload that writes `SYSRESETREQ` into `AIRCR`, used
/// when a target's bootloader has no reset opcode. See spec.md §4.4.11.
const RESET_STUB: [u8; 16] = [
    0x01, 0x49, // ldr r1, [pc, #4] ; &AIRCR
    0x02, 0x4A, // ldr r2, [pc, #8] ; SYSRESETREQ magic
    0x0A, 0x60, // str r2, [r1, #0]
    0xFE, 0xE7, // endless: b endless
    0x0C, 0xED, 0x00, 0xE0, // .word 0xE000ED0C (AIRCR)
    0x04, 0x00, 0xFA, 0x05, // .word 0x05FA0004 (VECTKEY | SYSRESETREQ)
];

/// The opcode-to-semantic mapping populated by [`Engine::get`].
///
/// Mirrors `stm32_cmd_t` in the original C: a fixed field list rather than
/// a map, since the command set is known in advance.
#[derive(Debug, Clone, Copy)]
pub struct CommandTable {
    pub get: u8,
    pub gvr: u8,
    pub gid: u8,
    pub rm: u8,
    pub go: u8,
    pub wm: u8,
    pub er: u8,
    pub wp: u8,
    pub uw: u8,
    pub rp: u8,
    pub ur: u8,
    /// `true` if `er` is the extended (two-byte addressing) variant.
    pub extended_erase: bool,
}

impl Default for CommandTable {
    fn default() -> Self {
        CommandTable {
            get: CMD_ERR,
            gvr: CMD_ERR,
            gid: CMD_ERR,
            rm: CMD_ERR,
            go: CMD_ERR,
            wm: CMD_ERR,
            er: CMD_ERR,
            wp: CMD_ERR,
            uw: CMD_ERR,
            rp: CMD_ERR,
            ur: CMD_ERR,
            extended_erase: false,
        }
    }
}

impl CommandTable {
    /// Record an opcode for the semantic command it was tagged with by
    /// `GET`, keeping the numerically greater opcode when the same slot is
    /// offered twice (e.g. 0x31/0x32 WM, 0x43/0x44/0x45 erase).
    fn record(&mut self, opcode: u8) {
        match opcode {
            0x00 => newer(&mut self.get, opcode),
            0x01 => newer(&mut self.gvr, opcode),
            0x02 => newer(&mut self.gid, opcode),
            0x11 => newer(&mut self.rm, opcode),
            0x21 => newer(&mut self.go, opcode),
            0x31 | 0x32 => newer(&mut self.wm, opcode),
            0x43 | 0x44 | 0x45 => {
                newer(&mut self.er, opcode);
                if self.er >= 0x44 {
                    self.extended_erase = true;
                }
            }
            0x63 => newer(&mut self.wp, opcode),
            0x73 => newer(&mut self.uw, opcode),
            0x82 => newer(&mut self.rp, opcode),
            0x92 => newer(&mut self.ur, opcode),
            other => {
                log::debug!("GET reported an opcode this engine doesn't recognize: {:#04X}", other);
            }
        }
    }
}

#[inline]
fn newer(slot: &mut u8, candidate: u8) {
    if *slot == CMD_ERR || candidate > *slot {
        *slot = candidate;
    }
}

/// Coarse lifecycle tracking for debug assertions only; never exposed to
/// callers, who only ever see an `Engine` once it has reached `Ready`.
/// `New`/`Init`/`Running` name the handshake's transient states for
/// documentation; this synchronous engine only ever observes `Ready` or the
/// terminal `Fail` (after `go()` or a self-resetting command).
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    New,
    Init,
    Ready,
    Running,
    Fail,
}

/// The bootloader protocol engine: one instance per session, over one
/// transport.
pub struct Engine<T: Transport> {
    port: T,
    state: State,
    pub bl_version: u8,
    pub version: u8,
    pub option1: u8,
    pub option2: u8,
    pub pid: u16,
    pub cmd: CommandTable,
    pub device: &'static Device,
}

impl<T: Transport> Engine<T> {
    /// Run the handshake of spec.md §4.4.1-§4.4.4: optional INIT, GET, GVR,
    /// GID, and device-catalog lookup.
    pub fn init(mut port: T, skip_init: bool) -> Result<Engine<T>> {
        let caps = port.capabilities();

        if caps.contains(Capabilities::CMD_INIT) && !skip_init {
            port.write(&[CMD_INIT])?;
            match read_ack(&mut port, DEFAULT_TIMEOUT) {
                Ok(Ack::Ack) => {}
                Ok(Ack::Nack) => {
                    log::warn!("INIT NACKed; assuming bootloader was already initialized");
                }
                _ => {
                    // The first INIT may have been consumed as the opcode
                    // byte of a prior, unfinished command. Send it again
                    // and expect the now-desynced device to NACK it.
                    port.write(&[CMD_INIT])?;
                    match read_ack(&mut port, DEFAULT_TIMEOUT) {
                        Ok(Ack::Nack) => {}
                        _ => return Err(Error::framing("no ACK/NACK after two INIT attempts")),
                    }
                }
            }
        }

        let mut cmd = CommandTable::default();
        let (bl_version, opcodes) = read_get(&mut port, caps)?;
        for opcode in opcodes {
            cmd.record(opcode);
        }

        if cmd.get == CMD_ERR || cmd.gvr == CMD_ERR || cmd.gid == CMD_ERR {
            return Err(Error::framing(
                "bootloader did not return get/gvr/gid opcodes from GET",
            ));
        }

        send_command(&mut port, cmd.gvr)?;
        let gvr_len = if caps.contains(Capabilities::GVR_ETX) { 3 } else { 1 };
        let mut gvr_buf = [0u8; 3];
        port.read(&mut gvr_buf[..gvr_len])?;
        expect_ack(&mut port)?;

        let version = gvr_buf[0];
        let (option1, option2) = if caps.contains(Capabilities::GVR_ETX) {
            (gvr_buf[1], gvr_buf[2])
        } else {
            (0, 0)
        };

        send_command(&mut port, cmd.gid)?;
        let pid_bytes = read_length_prefixed(&mut port, caps, cmd.gid, 1)?;
        if pid_bytes.len() < 2 {
            return Err(Error::framing("GID returned fewer than 2 bytes"));
        }
        if pid_bytes.len() > 2 {
            log::debug!("GID returned {} extra bytes, discarding", pid_bytes.len() - 2);
        }
        let pid = u16::from_be_bytes([pid_bytes[0], pid_bytes[1]]);
        expect_ack(&mut port)?;

        let device = Device::by_pid(pid).ok_or(Error::UnknownDevice(pid))?;

        Ok(Engine {
            port,
            state: State::Ready,
            bl_version,
            version,
            option1,
            option2,
            pid,
            cmd,
            device,
        })
    }

    pub fn close(self) -> T {
        self.port
    }

    /// Panics (debug only) if called after a command that leaves the target
    /// no longer running the bootloader (`go`, or a protection toggle that
    /// self-resets).
    fn assert_ready(&self) {
        debug_assert_eq!(
            self.state,
            State::Ready,
            "engine method called after go() or a self-resetting command"
        );
    }

    /// Read `len` (1..=256) bytes from `addr` (must be 32-bit aligned).
    pub fn read_memory(&mut self, addr: u32, len: usize) -> Result<Vec<u8>> {
        self.assert_ready();
        check_len(len)?;
        check_aligned(addr)?;
        require(self.cmd.rm, "read memory")?;

        send_command(&mut self.port, self.cmd.rm)?;
        send_address(&mut self.port, addr)?;
        send_command(&mut self.port, (len - 1) as u8)?;

        let mut data = vec![0u8; len];
        self.port.read(&mut data)?;
        Ok(data)
    }

    /// Write `data` (1..=256 bytes) to `addr` (must be 32-bit aligned).
    pub fn write_memory(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        self.assert_ready();
        check_len(data.len())?;
        check_aligned(addr)?;
        require(self.cmd.wm, "write memory")?;

        send_command(&mut self.port, self.cmd.wm)?;
        send_address(&mut self.port, addr)?;

        let aligned_len = (data.len() + 3) & !3;
        let mut payload = Vec::with_capacity(aligned_len + 2);
        payload.push((aligned_len - 1) as u8);
        payload.extend_from_slice(data);
        payload.resize(aligned_len + 1, 0xFF);
        let cs = codec::xor_reduce(&payload);
        payload.push(cs);

        self.port.write(&payload)?;
        match read_ack(&mut self.port, BLOCK_WRITE_TIMEOUT)? {
            Ack::Ack => Ok(()),
            Ack::Nack => Err(Error::ProtocolDenied),
            other => Err(unexpected(other)),
        }
    }

    /// Erase `npages` pages starting at `spage`. `npages == 0xFF` (classic)
    /// or `0xFFFF` (extended) requests a mass erase.
    pub fn erase(&mut self, spage: u16, npages: u32) -> Result<()> {
        self.assert_ready();
        require(self.cmd.er, "erase")?;

        if self.cmd.extended_erase {
            self.erase_extended(spage, npages)
        } else {
            if npages > 0x100 && npages != 0xFFFF_FFFF {
                return Err(Error::precondition("classic erase supports at most 255 pages"));
            }
            self.erase_classic(spage as u8, npages)
        }
    }

    fn erase_classic(&mut self, spage: u8, npages: u32) -> Result<()> {
        send_command(&mut self.port, self.cmd.er)?;

        if npages == 0xFF {
            self.port.write(&[0xFF, 0x00])?;
            return expect_ack_timeout(&mut self.port, MASS_ERASE_TIMEOUT);
        }

        let mut buf = Vec::with_capacity(2 + npages as usize);
        buf.push((npages - 1) as u8);
        for page in spage..spage.wrapping_add(npages as u8) {
            buf.push(page);
        }
        let cs = codec::xor_reduce(&buf);
        buf.push(cs);
        self.port.write(&buf)?;
        expect_ack_timeout(&mut self.port, SECTOR_ERASE_TIMEOUT)
    }

    fn erase_extended(&mut self, spage: u16, npages: u32) -> Result<()> {
        if npages == 0xFFFF {
            if self.pid == PID_L1_NO_MASS_ERASE {
                log::warn!(
                    "PID 0x{:03X} does not support extended mass erase; downgrading to page-by-page erase",
                    self.pid
                );
                return self.erase_extended(spage, u32::from(L1_MASS_ERASE_DOWNGRADE_PAGES));
            }

            send_command(&mut self.port, self.cmd.er)?;
            self.port.write(&[0xFF, 0xFF, 0x00])?;
            return expect_ack_timeout(&mut self.port, MASS_ERASE_TIMEOUT);
        }

        if npages == 0 || npages > 0xFFF4 {
            return Err(Error::precondition("extended erase page count out of range"));
        }

        send_command(&mut self.port, self.cmd.er)?;

        let mut buf = Vec::with_capacity(2 + 2 * npages as usize + 1);
        buf.extend_from_slice(&((npages - 1) as u16).to_be_bytes());
        for page in spage..spage.wrapping_add(npages as u16) {
            buf.extend_from_slice(&page.to_be_bytes());
        }
        let cs = codec::xor_reduce(&buf);
        buf.push(cs);
        self.port.write(&buf)?;
        expect_ack_timeout(&mut self.port, SECTOR_ERASE_TIMEOUT)
    }

    pub fn write_protect(&mut self, pages: &[u8]) -> Result<()> {
        self.assert_ready();
        require(self.cmd.wp, "write protect")?;
        send_command(&mut self.port, self.cmd.wp)?;
        let n = (pages.len().max(1) - 1) as u8;
        let mut buf = Vec::with_capacity(pages.len() + 2);
        buf.push(n);
        buf.extend_from_slice(pages);
        let cs = codec::xor_reduce(&buf);
        buf.push(cs);
        self.port.write(&buf)?;
        expect_ack(&mut self.port)
    }

    /// Disables write protection. The target self-resets afterwards.
    pub fn write_unprotect(&mut self) -> Result<()> {
        self.assert_ready();
        require(self.cmd.uw, "write unprotect")?;
        send_command(&mut self.port, self.cmd.uw)?;
        send_command(&mut self.port, 0x8C)?;
        self.state = State::Fail;
        Ok(())
    }

    /// Enables read protection. The target self-resets afterwards.
    pub fn readout_protect(&mut self) -> Result<()> {
        self.assert_ready();
        require(self.cmd.rp, "readout protect")?;
        send_command(&mut self.port, self.cmd.rp)?;
        send_command(&mut self.port, 0x7D)?;
        self.state = State::Fail;
        Ok(())
    }

    /// Disables read protection. The target self-resets afterwards.
    pub fn readout_unprotect(&mut self) -> Result<()> {
        self.assert_ready();
        require(self.cmd.ur, "readout unprotect")?;
        send_command(&mut self.port, self.cmd.ur)?;
        send_command(&mut self.port, 0x6D)?;
        self.state = State::Fail;
        Ok(())
    }

    /// Jump to user code at `addr`. All further engine calls are
    /// undefined after this returns successfully.
    pub fn go(&mut self, addr: u32) -> Result<()> {
        self.assert_ready();
        require(self.cmd.go, "go")?;
        send_command(&mut self.port, self.cmd.go)?;
        send_address(&mut self.port, addr)?;
        self.state = State::Fail;
        Ok(())
    }

    /// Software CRC-32 fallback (spec.md §4.4.10), used when the
    /// bootloader has no dedicated CRC opcode: reads back `len` bytes from
    /// `addr` in <=256-byte chunks and folds them into a big-endian,
    /// word-wise CRC-32 (poly 0x04C11DB7, init 0xFFFFFFFF), padding the
    /// trailing partial word with 0xFF.
    pub fn crc32_readback(&mut self, addr: u32, len: usize) -> Result<u32> {
        let mut crc = 0xFFFF_FFFFu32;
        let mut offset = 0usize;
        while offset < len {
            let chunk_len = (len - offset).min(256);
            let chunk_addr = addr + offset as u32;
            let aligned_read_len = (chunk_len + 3) & !3;
            let mut data = self.read_memory(chunk_addr, aligned_read_len.max(4).min(256))?;
            data.truncate(aligned_read_len);
            if data.len() < aligned_read_len {
                data.resize(aligned_read_len, 0xFF);
            }
            for word in data.chunks(4) {
                let mut w = [0xFFu8; 4];
                w[..word.len()].copy_from_slice(word);
                crc = crc32_word(crc, u32::from_be_bytes(w));
            }
            offset += chunk_len;
        }
        Ok(crc)
    }

    /// Upload the reset-via-RAM-stub payload and jump to it (spec.md
    /// §4.4.11), for bootloaders with no reset opcode.
    pub fn reset_via_ram_stub(&mut self) -> Result<()> {
        let ram_start = self.device.ram_start;
        let entry = ram_start + 8;

        let mut image = Vec::with_capacity(8 + RESET_STUB.len());
        image.extend_from_slice(&ram_start.to_le_bytes());
        image.extend_from_slice(&(entry | 1).to_le_bytes());
        image.extend_from_slice(&RESET_STUB);

        let mut offset = 0;
        while offset < image.len() {
            let chunk_len = (image.len() - offset).min(256);
            self.write_memory(ram_start + offset as u32, &image[offset..offset + chunk_len])?;
            offset += chunk_len;
        }

        self.go(ram_start)
    }
}

fn crc32_word(mut crc: u32, word: u32) -> u32 {
    const POLY: u32 = 0x04C1_1DB7;
    crc ^= word;
    for _ in 0..32 {
        if crc & 0x8000_0000 != 0 {
            crc = (crc << 1) ^ POLY;
        } else {
            crc <<= 1;
        }
    }
    crc
}

fn check_len(len: usize) -> Result<()> {
    if len == 0 || len > 256 {
        return Err(Error::precondition(format!(
            "length {} out of range [1,256]",
            len
        )));
    }
    Ok(())
}

fn check_aligned(addr: u32) -> Result<()> {
    if addr % 4 != 0 {
        return Err(Error::precondition(format!(
            "address {:#010X} is not 32-bit aligned",
            addr
        )));
    }
    Ok(())
}

fn require(opcode: u8, name: &'static str) -> Result<()> {
    if opcode == CMD_ERR {
        return Err(Error::CapabilityMissing(name));
    }
    Ok(())
}

fn unexpected(ack: Ack) -> Error {
    match ack {
        Ack::Nack => Error::ProtocolDenied,
        other => Error::framing(format!("unexpected reply byte: {:?}", other)),
    }
}

fn expect_ack<T: Transport>(port: &mut T) -> Result<()> {
    expect_ack_timeout(port, DEFAULT_TIMEOUT)
}

fn expect_ack_timeout<T: Transport>(port: &mut T, timeout: Duration) -> Result<()> {
    match read_ack(port, timeout)? {
        Ack::Ack => Ok(()),
        other => Err(unexpected(other)),
    }
}

fn send_command<T: Transport>(port: &mut T, cmd: u8) -> Result<()> {
    let frame = codec::frame_cmd(cmd);
    let frame = if port.capabilities().contains(Capabilities::CMD_SOF) {
        crate::transport::spi::with_sof(&frame)
    } else {
        frame.to_vec()
    };
    port.write(&frame)?;
    expect_ack(port)
}

fn send_address<T: Transport>(port: &mut T, addr: u32) -> Result<()> {
    let addr_be = codec::encode_addr(addr);
    let cs = codec::addr_checksum(addr_be);
    let mut buf = Vec::with_capacity(5);
    buf.extend_from_slice(&addr_be);
    buf.push(cs);
    port.write(&buf)?;
    expect_ack(port)
}

/// GET's length-prefixed reply: `N, bl_version, op0..op_{N-1}`, followed by
/// a trailing ACK. Returns `(bl_version, opcodes)`.
fn read_get<T: Transport>(port: &mut T, caps: Capabilities) -> Result<(u8, Vec<u8>)> {
    send_command(port, 0x00)?;
    let body = read_length_prefixed(port, caps, 0x00, 12)?;
    if body.is_empty() {
        return Err(Error::framing("GET returned an empty reply"));
    }
    expect_ack(port)?;
    Ok((body[0], body[1..].to_vec()))
}

/// Read a length-prefixed reply whose length byte `N` means "N+1 bytes
/// follow" (bl_version/opcodes or pid), per spec.md §4.4.2/§9:
///
/// - On byte-oriented transports, read the length byte, then read exactly
///   that many bytes plus one (matching the "N+1 bytes follow" framing).
/// - On frame-oriented transports, pre-read `guess+2` bytes and verify the
///   first byte against `guess`; on mismatch, resync and retry.
fn read_length_prefixed<T: Transport>(
    port: &mut T,
    caps: Capabilities,
    cmd_already_sent: u8,
    guess: usize,
) -> Result<Vec<u8>> {
    if caps.contains(Capabilities::BYTE_ORIENTED) {
        let mut len_byte = [0u8; 1];
        port.read(&mut len_byte)?;
        let n = len_byte[0] as usize;
        let mut rest = vec![0u8; n + 1];
        port.read(&mut rest)?;
        return Ok(rest[..=n.min(rest.len() - 1)].to_vec());
    }

    let mut buf = vec![0u8; guess + 2];
    port.read(&mut buf)?;
    if buf[0] as usize == guess {
        return Ok(buf[1..].to_vec());
    }

    let observed = buf[0] as usize;
    log::debug!("resync: expected length {} got {}", guess, observed);
    resync(port)?;
    send_command(port, cmd_already_sent)?;
    let mut retry = vec![0u8; observed + 2];
    port.read(&mut retry)?;
    Ok(retry[1..].to_vec())
}

/// Send the invalid command `0xFF, 0x00` repeatedly until a NACK proves the
/// device is back in sync, per spec.md §4.4.2/§9. Budget: 10 seconds.
fn resync<T: Transport>(port: &mut T) -> Result<()> {
    let deadline = std::time::Instant::now() + RESYNC_TIMEOUT;
    while std::time::Instant::now() < deadline {
        port.write(&[CMD_ERR, 0x00])?;
        if let Ok(Ack::Nack) = read_ack(port, Duration::from_secs(1)) {
            return Ok(());
        }
    }
    Err(Error::framing("resync timed out"))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_command_table_newer_wins_wm() {
        let mut cmd = CommandTable::default();
        cmd.record(0x31);
        cmd.record(0x32);
        assert_eq!(cmd.wm, 0x32);
    }

    #[test]
    fn test_command_table_newer_wins_erase() {
        let mut cmd = CommandTable::default();
        cmd.record(0x43);
        cmd.record(0x44);
        assert_eq!(cmd.er, 0x44);
        assert!(cmd.extended_erase);
    }

    #[test]
    fn test_command_table_classic_only() {
        let mut cmd = CommandTable::default();
        cmd.record(0x43);
        assert_eq!(cmd.er, 0x43);
        assert!(!cmd.extended_erase);
    }

    #[test]
    fn test_check_len_bounds() {
        assert!(check_len(0).is_err());
        assert!(check_len(1).is_ok());
        assert!(check_len(256).is_ok());
        assert!(check_len(257).is_err());
    }

    #[test]
    fn test_check_aligned() {
        assert!(check_aligned(0x0800_0000).is_ok());
        assert!(check_aligned(0x0800_0001).is_err());
    }

    #[test]
    fn test_crc32_word_deterministic() {
        let a = crc32_word(0xFFFF_FFFF, 0x0000_0000);
        let b = crc32_word(0xFFFF_FFFF, 0x0000_0000);
        assert_eq!(a, b);
        assert_ne!(a, 0xFFFF_FFFF);
    }

    proptest::proptest! {
        /// GET's "newer wins" rule for the two WM variants (0x31/0x32) does
        /// not depend on the order they're reported in.
        #[test]
        fn prop_newer_wins_wm_order_independent(first_is_no_stretch in proptest::prelude::any::<bool>()) {
            let mut cmd = CommandTable::default();
            let order: [u8; 2] = if first_is_no_stretch { [0x32, 0x31] } else { [0x31, 0x32] };
            for op in order {
                cmd.record(op);
            }
            proptest::prop_assert_eq!(cmd.wm, 0x32);
        }

        /// Same, for the three erase variants (0x43/0x44/0x45): whichever
        /// order GET reports them in, the numerically greatest wins and
        /// flips on `extended_erase`.
        #[test]
        fn prop_newer_wins_erase_order_independent(perm_idx in 0usize..6) {
            const PERMS: [[u8; 3]; 6] = [
                [0x43, 0x44, 0x45],
                [0x43, 0x45, 0x44],
                [0x44, 0x43, 0x45],
                [0x44, 0x45, 0x43],
                [0x45, 0x43, 0x44],
                [0x45, 0x44, 0x43],
            ];
            let mut cmd = CommandTable::default();
            for op in PERMS[perm_idx] {
                cmd.record(op);
            }
            proptest::prop_assert_eq!(cmd.er, 0x45);
            proptest::prop_assert!(cmd.extended_erase);
        }
    }
}
