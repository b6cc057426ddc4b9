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

//! Firmware image readers/writers: raw binary and Intel HEX.
//!
//! The HEX reader only honors type-00 (data) records, the same limitation
//! the original parser this crate is modeled on has: type-02/04 segment
//! and extended-linear-address records are consumed and discarded with a
//! warning rather than applied to the load address. A HEX file that relies
//! on those records to place data above the first 64 KiB segment is
//! mis-placed. This is a known limitation, not a bug to silently fix.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use crate::error::{Error, Result};

/// An in-memory firmware image: a byte buffer plus its load address.
#[derive(Debug, Clone, Default)]
pub struct Image {
    pub base_addr: u32,
    pub data: Vec<u8>,
}

impl Image {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Read a firmware image from `path`.
///
/// When `force_binary` is `false`, the file is sniffed: if its first byte
/// is `:`, it is parsed as Intel HEX; otherwise it is read as raw binary.
/// `-` reads from stdin as raw binary (stdin auto-detection is not
/// attempted, matching the CLI's documented behavior).
pub fn read_image<P: AsRef<Path>>(
    path: P,
    base_addr: u32,
    force_binary: bool,
) -> Result<Image> {
    let path = path.as_ref();
    if path.to_string_lossy() == "-" {
        let mut data = Vec::new();
        io::stdin()
            .read_to_end(&mut data)
            .map_err(Error::from)?;
        return Ok(Image { base_addr, data });
    }

    let mut raw = Vec::new();
    File::open(path)
        .map_err(Error::from)?
        .read_to_end(&mut raw)
        .map_err(Error::from)?;

    if !force_binary && raw.first() == Some(&b':') {
        parse_intel_hex(&raw, base_addr)
    } else {
        Ok(Image {
            base_addr,
            data: raw,
        })
    }
}

/// Write `data` to `path` as raw binary. `-` writes to stdout.
pub fn write_image<P: AsRef<Path>>(path: P, data: &[u8]) -> Result<()> {
    let path = path.as_ref();
    if path.to_string_lossy() == "-" {
        io::stdout().write_all(data).map_err(Error::from)
    } else {
        File::create(path)
            .map_err(Error::from)?
            .write_all(data)
            .map_err(Error::from)
    }
}

fn parse_intel_hex(raw: &[u8], base_addr: u32) -> Result<Image> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| Error::precondition("HEX file is not valid UTF-8/ASCII"))?;

    let mut data: Vec<u8> = Vec::new();
    let mut saw_eof = false;

    for record in ihex::Reader::new(text) {
        let record = record.map_err(|e| Error::precondition(format!("malformed HEX record: {:?}", e)))?;

        match record {
            ihex::Record::Data { offset, value } => {
                let start = offset as usize;
                if data.len() < start {
                    data.resize(start, 0xFF);
                }
                if data.len() < start + value.len() {
                    data.resize(start + value.len(), 0xFF);
                }
                data[start..start + value.len()].copy_from_slice(&value);
            }
            ihex::Record::EndOfFile => {
                saw_eof = true;
                break;
            }
            ihex::Record::ExtendedSegmentAddress(_) | ihex::Record::ExtendedLinearAddress(_) => {
                log::warn!(
                    "HEX record type carries a segment/linear address extension; \
                     this parser only honors the offset field of data records, \
                     so this file may be mis-placed if it relies on it"
                );
            }
            ihex::Record::StartSegmentAddress { .. } | ihex::Record::StartLinearAddress(_) => {
                log::warn!("ignoring HEX start-address record");
            }
        }
    }

    if !saw_eof {
        log::warn!("HEX file has no End-Of-File record");
    }

    Ok(Image { base_addr, data })
}
