// Copyright 2021 Locha Mesh Developers <contact@locha.io>
//
// Framing constants and checksum rules per AN3155/AN4221/AN4286.
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

//! Byte-level framing helpers shared by every transport.

/// Acknowledge byte.
pub const ACK: u8 = 0x79;
/// Negative acknowledge byte.
pub const NACK: u8 = 0x1F;
/// Busy byte, only sent by no-stretch I2C bootloaders while a block write
/// or erase is still in progress.
pub const BUSY: u8 = 0x76;
/// Single-byte auto-baud probe.
pub const CMD_INIT: u8 = 0x7F;
/// Sentinel opcode meaning "this bootloader does not implement this
/// command".
pub const CMD_ERR: u8 = 0xFF;
/// SPI start-of-frame byte, prepended to every SPI command frame.
pub const SPI_SOF: u8 = 0x5A;

/// Big-endian encoding of a 32-bit address.
#[inline]
pub fn encode_addr(addr: u32) -> [u8; 4] {
    addr.to_be_bytes()
}

/// XOR checksum over the four address bytes.
#[inline]
pub fn addr_checksum(addr_be: [u8; 4]) -> u8 {
    addr_be[0] ^ addr_be[1] ^ addr_be[2] ^ addr_be[3]
}

/// `[cmd, ~cmd]`, the two-byte shape every command frame starts with.
#[inline]
pub fn frame_cmd(cmd: u8) -> [u8; 2] {
    [cmd, cmd ^ 0xFF]
}

/// XOR-reduce an arbitrary byte slice (used for the write-memory and erase
/// trailing checksums).
#[inline]
pub fn xor_reduce(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

/// The meaning of a single byte read in place of an ACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Ack,
    Nack,
    Busy,
    Unexpected(u8),
}

impl Ack {
    #[inline]
    pub fn of(byte: u8) -> Ack {
        match byte {
            ACK => Ack::Ack,
            NACK => Ack::Nack,
            BUSY => Ack::Busy,
            other => Ack::Unexpected(other),
        }
    }

    #[inline]
    pub fn is_ack(self) -> bool {
        matches!(self, Ack::Ack)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_encode_addr() {
        assert_eq!(encode_addr(0x0800_0000), [0x08, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_addr_checksum() {
        let addr = encode_addr(0x0800_1234);
        assert_eq!(addr_checksum(addr), 0x08 ^ 0x00 ^ 0x12 ^ 0x34);
    }

    #[test]
    fn test_frame_cmd() {
        assert_eq!(frame_cmd(0x11), [0x11, 0xEE]);
        assert_eq!(frame_cmd(0x00), [0x00, 0xFF]);
    }

    #[test]
    fn test_ack_of() {
        assert_eq!(Ack::of(0x79), Ack::Ack);
        assert_eq!(Ack::of(0x1F), Ack::Nack);
        assert_eq!(Ack::of(0x76), Ack::Busy);
        assert_eq!(Ack::of(0x00), Ack::Unexpected(0x00));
    }
}
