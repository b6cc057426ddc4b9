// Copyright 2021 Locha Mesh Developers <contact@locha.io>
//
// Device table transcribed from ST document AN2606, corresponding to the
// "Bootloader device-dependent parameters" table.
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

//! Static device catalog: maps a 12-bit product ID to its memory map.

use std::ops::Range;

/// Immutable per-device memory map, one entry per silicon family/density.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Device {
    /// 12-bit product ID, as returned by `GID`.
    pub pid: u16,
    /// Human-readable family name.
    pub name: &'static str,
    /// RAM window, `[start, end)`.
    pub ram_start: u32,
    pub ram_end: u32,
    /// Flash window, `[start, end)`.
    pub flash_start: u32,
    pub flash_end: u32,
    /// Pages per sector, and the size in bytes of a page.
    pub pages_per_sector: u16,
    pub page_size: u16,
    /// Option-byte window, inclusive on both ends.
    pub option_start: u32,
    pub option_end: u32,
    /// System-memory (bootloader ROM) window, `[start, end)`.
    pub system_mem_start: u32,
    pub system_mem_end: u32,
}

impl Device {
    #[inline]
    pub fn ram(&self) -> Range<u32> {
        self.ram_start..self.ram_end
    }

    #[inline]
    pub fn flash(&self) -> Range<u32> {
        self.flash_start..self.flash_end
    }

    #[inline]
    pub fn system_mem(&self) -> Range<u32> {
        self.system_mem_start..self.system_mem_end
    }

    /// Whether `addr` falls within the inclusive option-byte window.
    #[inline]
    pub fn contains_option_byte(&self, addr: u32) -> bool {
        if self.option_start == 0 && self.option_end == 0 {
            return false;
        }
        addr >= self.option_start && addr <= self.option_end
    }

    /// Look up a device by its 12-bit product ID.
    pub fn by_pid(pid: u16) -> Option<&'static Device> {
        DEVICES.iter().find(|d| d.pid == pid)
    }
}

macro_rules! dev {
    ($pid:expr, $name:expr, $ram_s:expr, $ram_e:expr, $fl_s:expr, $fl_e:expr,
     $pps:expr, $ps:expr, $opt_s:expr, $opt_e:expr, $mem_s:expr, $mem_e:expr) => {
        Device {
            pid: $pid,
            name: $name,
            ram_start: $ram_s,
            ram_end: $ram_e,
            flash_start: $fl_s,
            flash_end: $fl_e,
            pages_per_sector: $pps,
            page_size: $ps,
            option_start: $opt_s,
            option_end: $opt_e,
            system_mem_start: $mem_s,
            system_mem_end: $mem_e,
        }
    };
}

/// The device catalog, one row per supported silicon family.
///
/// Note that F2 and F4 devices have sectors of mixed page sizes; only the
/// first, uniformly-sized, block of sectors is represented here.
pub static DEVICES: &[Device] = &[
    // F0
    dev!(0x440, "STM32F051xx",        0x2000_1000, 0x2000_2000, 0x0800_0000, 0x0801_0000, 4, 1024, 0x1FFF_F800, 0x1FFF_F80B, 0x1FFF_EC00, 0x1FFF_F800),
    dev!(0x444, "STM32F030/F031",     0x2000_1000, 0x2000_2000, 0x0800_0000, 0x0801_0000, 4, 1024, 0x1FFF_F800, 0x1FFF_F80B, 0x1FFF_EC00, 0x1FFF_F800),
    dev!(0x448, "STM32F072xx",        0x2000_1800, 0x2000_4000, 0x0800_0000, 0x0801_0000, 4, 1024, 0x1FFF_F800, 0x1FFF_F80B, 0x1FFF_EC00, 0x1FFF_F800),
    // F1
    dev!(0x412, "Low-density",        0x2000_0200, 0x2000_2800, 0x0800_0000, 0x0800_8000, 4, 1024, 0x1FFF_F800, 0x1FFF_F80F, 0x1FFF_F000, 0x1FFF_F800),
    dev!(0x410, "Medium-density",     0x2000_0200, 0x2000_5000, 0x0800_0000, 0x0802_0000, 4, 1024, 0x1FFF_F800, 0x1FFF_F80F, 0x1FFF_F000, 0x1FFF_F800),
    dev!(0x414, "High-density",       0x2000_0200, 0x2001_0000, 0x0800_0000, 0x0808_0000, 2, 2048, 0x1FFF_F800, 0x1FFF_F80F, 0x1FFF_F000, 0x1FFF_F800),
    dev!(0x420, "Medium-density VL",  0x2000_0200, 0x2000_2000, 0x0800_0000, 0x0802_0000, 4, 1024, 0x1FFF_F800, 0x1FFF_F80F, 0x1FFF_F000, 0x1FFF_F800),
    dev!(0x428, "High-density VL",    0x2000_0200, 0x2000_8000, 0x0800_0000, 0x0808_0000, 2, 2048, 0x1FFF_F800, 0x1FFF_F80F, 0x1FFF_F000, 0x1FFF_F800),
    dev!(0x418, "Connectivity line",  0x2000_1000, 0x2001_0000, 0x0800_0000, 0x0804_0000, 2, 2048, 0x1FFF_F800, 0x1FFF_F80F, 0x1FFF_B000, 0x1FFF_F800),
    dev!(0x430, "XL-density",         0x2000_0800, 0x2001_8000, 0x0800_0000, 0x0810_0000, 2, 2048, 0x1FFF_F800, 0x1FFF_F80F, 0x1FFF_E000, 0x1FFF_F800),
    // F2
    dev!(0x411, "STM32F2xx",          0x2000_2000, 0x2002_0000, 0x0800_0000, 0x0810_0000, 4, 16384, 0x1FFF_C000, 0x1FFF_C00F, 0x1FFF_0000, 0x1FFF_77DF),
    // F3
    dev!(0x432, "STM32F373/8",        0x2000_1400, 0x2000_8000, 0x0800_0000, 0x0804_0000, 2, 2048, 0x1FFF_F800, 0x1FFF_F80F, 0x1FFF_D800, 0x1FFF_F800),
    dev!(0x422, "F302xB/303xB/358",   0x2000_1400, 0x2001_0000, 0x0800_0000, 0x0804_0000, 2, 2048, 0x1FFF_F800, 0x1FFF_F80F, 0x1FFF_D800, 0x1FFF_F800),
    dev!(0x439, "STM32F302",          0x2000_1800, 0x2000_4000, 0x0800_0000, 0x0804_0000, 2, 2048, 0x1FFF_F800, 0x1FFF_F80F, 0x1FFF_D800, 0x1FFF_F800),
    dev!(0x438, "F303x4/334/328",     0x2000_1800, 0x2000_3000, 0x0800_0000, 0x0804_0000, 2, 2048, 0x1FFF_F800, 0x1FFF_F80F, 0x1FFF_D800, 0x1FFF_F800),
    // F4
    dev!(0x413, "STM32F40/1",         0x2000_2000, 0x2002_0000, 0x0800_0000, 0x0810_0000, 4, 16384, 0x1FFF_C000, 0x1FFF_C00F, 0x1FFF_0000, 0x1FFF_77DF),
    dev!(0x419, "STM32F427/37",       0x2000_2000, 0x2003_0000, 0x0800_0000, 0x0810_0000, 4, 16384, 0x1FFF_C000, 0x1FFF_C00F, 0x1FFF_0000, 0x1FFF_77FF),
    dev!(0x423, "STM32F401xB(C)",     0x2000_3000, 0x2001_0000, 0x0800_0000, 0x0810_0000, 4, 16384, 0x1FFF_C000, 0x1FFF_C00F, 0x1FFF_0000, 0x1FFF_77FF),
    dev!(0x433, "STM32F401xD(E)",     0x2000_3000, 0x2001_8000, 0x0800_0000, 0x0810_0000, 4, 16384, 0x1FFF_C000, 0x1FFF_C00F, 0x1FFF_0000, 0x1FFF_77FF),
    // L0
    dev!(0x417, "L05xxx/06xxx",       0x2000_1000, 0x2000_2000, 0x0800_0000, 0x0802_0000, 16, 256, 0x1FF8_0000, 0x1FF8_000F, 0x1FF0_0000, 0x1FF0_1000),
    // L1
    dev!(0x416, "L1xxx6(8/B)",        0x2000_0800, 0x2000_4000, 0x0800_0000, 0x0802_0000, 16, 256, 0x1FF8_0000, 0x1FF8_000F, 0x1FF0_0000, 0x1FF0_1000),
    dev!(0x429, "L1xxx6(8/B)A",       0x2000_1000, 0x2000_8000, 0x0800_0000, 0x0802_0000, 16, 256, 0x1FF8_0000, 0x1FF8_000F, 0x1FF0_0000, 0x1FF0_1000),
    dev!(0x427, "L1xxxC",             0x2000_1000, 0x2000_8000, 0x0800_0000, 0x0802_0000, 16, 256, 0x1FF8_0000, 0x1FF8_000F, 0x1FF0_0000, 0x1FF0_2000),
    dev!(0x436, "L1xxxD",             0x2000_1000, 0x2000_C000, 0x0800_0000, 0x0806_0000, 16, 256, 0x1FF8_0000, 0x1FF8_000F, 0x1FF0_0000, 0x1FF0_2000),
    dev!(0x437, "L1xxxE",             0x2000_1000, 0x2001_4000, 0x0800_0000, 0x0806_0000, 16, 256, 0x1FF8_0000, 0x1FF8_000F, 0x1FF0_0000, 0x1FF0_2000),
    // Not (yet) in AN2606, kept for compatibility with older targets.
    dev!(0x641, "Medium-density PL",  0x2000_0200, 0x0000_5000, 0x0800_0000, 0x0802_0000, 4, 1024, 0x1FFF_F800, 0x1FFF_F80F, 0x1FFF_F000, 0x1FFF_F800),
    dev!(0x9A8, "STM32W-128K",        0x2000_0200, 0x2000_2000, 0x0800_0000, 0x0802_0000, 1, 1024, 0, 0, 0, 0),
    dev!(0x9B0, "STM32W-256K",        0x2000_0200, 0x2000_4000, 0x0800_0000, 0x0804_0000, 1, 2048, 0, 0, 0, 0),
];

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_lookup_known() {
        let dev = Device::by_pid(0x410).unwrap();
        assert_eq!(dev.name, "Medium-density");
        assert_eq!(dev.flash(), 0x0800_0000..0x0802_0000);
    }

    #[test]
    fn test_lookup_unknown() {
        assert!(Device::by_pid(0xFFF).is_none());
    }

    #[test]
    fn test_no_duplicate_pids() {
        let mut pids: Vec<u16> = DEVICES.iter().map(|d| d.pid).collect();
        pids.sort_unstable();
        let mut deduped = pids.clone();
        deduped.dedup();
        assert_eq!(pids, deduped);
    }
}
