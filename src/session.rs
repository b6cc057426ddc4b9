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

//! The programming session: composes the engine, firmware I/O and the GPIO
//! sequencer to carry out one end-to-end run.

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::firmware::{self, Image};
use crate::gpio_seq::Sequence;
use crate::transport::Transport;

const CHUNK: usize = 256;

/// An explicit byte range, `-S ADDR[:LEN]`.
#[derive(Debug, Clone, Copy)]
pub struct Range {
    pub addr: u32,
    pub len: u32,
}

/// The operation a session should carry out, mirroring the CLI's mutually
/// exclusive action flags.
#[derive(Debug, Clone)]
pub enum Action {
    Read { file: String },
    Write { file: String, verify: bool },
    EraseOnly,
    WriteUnprotect,
    ReadoutProtect,
    ReadoutUnprotect,
    Go { addr: u32 },
}

/// All user-facing knobs for one run, the library-level equivalent of the
/// parsed CLI flags of spec.md §6.
#[derive(Debug, Clone)]
pub struct Request {
    pub action: Action,
    pub range: Option<Range>,
    pub start_page: Option<u16>,
    pub erase_pages: Option<u32>,
    pub force_binary: bool,
    pub retries: u32,
    pub skip_init: bool,
    pub gpio_entry: Sequence,
    pub gpio_exit: Sequence,
}

/// Drives one programming run over an already-open transport.
pub struct Session<T: Transport> {
    engine: Engine<T>,
}

impl<T: Transport> Session<T> {
    /// Run the GPIO entry sequence, perform `INIT`/`GET`/`GVR`/`GID`, and
    /// return a session ready to dispatch the requested action.
    pub fn open(mut port: T, req: &Request) -> Result<Session<T>> {
        req.gpio_entry.run(&mut port)?;
        let engine = Engine::init(port, req.skip_init)?;
        Ok(Session { engine })
    }

    pub fn identify(&self) -> (u8, u16, &'static str) {
        (self.engine.bl_version, self.engine.pid, self.engine.device.name)
    }

    /// Carry out `req.action` and, unless the action already caused a
    /// self-reset, run the exit GPIO sequence or the RAM-stub reset.
    pub fn run(mut self, req: &Request) -> Result<()> {
        let self_resets = matches!(
            req.action,
            Action::WriteUnprotect | Action::ReadoutProtect | Action::ReadoutUnprotect
        );

        match &req.action {
            Action::Read { file } => self.do_read(req, file)?,
            Action::Write { file, verify } => self.do_write(req, file, *verify)?,
            Action::EraseOnly => self.do_erase_only(req)?,
            Action::WriteUnprotect => self.engine.write_unprotect()?,
            Action::ReadoutProtect => self.engine.readout_protect()?,
            Action::ReadoutUnprotect => self.engine.readout_unprotect()?,
            Action::Go { addr } => {
                self.engine.go(*addr)?;
                return Ok(());
            }
        }

        if !self_resets {
            if req.gpio_exit.is_empty() {
                self.engine.reset_via_ram_stub()?;
            } else {
                let mut port = self.engine.close();
                req.gpio_exit.run(&mut port)?;
            }
        }

        Ok(())
    }

    fn range_or_default(&self, req: &Request) -> Range {
        match req.range {
            Some(r) => r,
            None => {
                let flash = self.engine.device.flash();
                Range {
                    addr: flash.start,
                    len: flash.end - flash.start,
                }
            }
        }
    }

    fn do_read(&mut self, req: &Request, file: &str) -> Result<()> {
        let range = self.range_or_default(req);
        let mut data = Vec::with_capacity(range.len as usize);

        let mut offset = 0u32;
        while offset < range.len {
            let n = (range.len - offset).min(CHUNK as u32) as usize;
            let chunk = self.engine.read_memory(range.addr + offset, n)?;
            data.extend_from_slice(&chunk);
            offset += n as u32;
        }

        firmware::write_image(file, &data)
    }

    /// `-S` takes priority (explicit byte range); otherwise `-s`/`-e`
    /// (defaulting the missing one to page 0 / the image's page count);
    /// otherwise, with nothing specified, the whole chip.
    fn erase_span(&self, req: &Request, image_len: usize) -> (u16, u32) {
        if let Some(range) = req.range {
            let page_size = self.engine.device.page_size as u32;
            let spage = ((range.addr - self.engine.device.flash_start) / page_size) as u16;
            let npages = (range.len + page_size - 1) / page_size;
            return (spage, npages);
        }

        if req.start_page.is_some() || req.erase_pages.is_some() {
            let spage = req.start_page.unwrap_or(0);
            let npages = req.erase_pages.unwrap_or_else(|| self.pages_for(image_len));
            return (spage, npages);
        }

        (0, if self.engine.cmd.extended_erase { 0xFFFF } else { 0xFF })
    }

    fn pages_for(&self, image_len: usize) -> u32 {
        let page_size = self.engine.device.page_size as u32;
        (image_len as u32 + page_size - 1) / page_size
    }

    fn do_erase_only(&mut self, req: &Request) -> Result<()> {
        let (spage, npages) = self.erase_span(req, 0);
        self.engine.erase(spage, npages)
    }

    fn do_write(&mut self, req: &Request, file: &str, verify: bool) -> Result<()> {
        let base_addr = req.range.map(|r| r.addr).unwrap_or(self.engine.device.flash_start);
        let image: Image = firmware::read_image(file, base_addr, req.force_binary)?;

        if image.is_empty() {
            return Err(Error::precondition("firmware image is empty"));
        }

        let (spage, npages) = self.erase_span(req, image.len());
        self.engine.erase(spage, npages)?;

        let mut offset = 0usize;
        while offset < image.data.len() {
            let n = (image.data.len() - offset).min(CHUNK);
            let addr = image.base_addr + offset as u32;
            let chunk = &image.data[offset..offset + n];

            let mut attempt = 0;
            loop {
                self.engine.write_memory(addr, chunk)?;

                if !verify {
                    break;
                }

                let mut readback_len = n;
                if readback_len % 4 != 0 {
                    readback_len = (readback_len + 3) & !3;
                    readback_len = readback_len.min(CHUNK);
                }
                let readback = self.engine.read_memory(addr, readback_len)?;
                if readback[..n] == *chunk {
                    break;
                }

                attempt += 1;
                if attempt > req.retries {
                    return Err(Error::precondition(format!(
                        "verify mismatch at {:#010X} after {} retries",
                        addr, req.retries
                    )));
                }
                log::warn!("verify mismatch at {:#010X}, retrying ({}/{})", addr, attempt, req.retries);
            }

            offset += n;
        }

        Ok(())
    }
}
