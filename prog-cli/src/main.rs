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

use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use clap::{crate_authors, crate_version, App, AppSettings, Arg};

use stm32_sbl::gpio_seq::Sequence;
use stm32_sbl::session::{Action, Range, Request, Session};
use stm32_sbl::transport::i2c::I2cTransport;
use stm32_sbl::transport::spi::SpiTransport;
use stm32_sbl::transport::uart::UartTransport;
use stm32_sbl::Transport;

fn main() {
    if let Err(e) = run() {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let matches = app().get_matches();

    init_logger(match matches.occurrences_of("v") {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    })?;

    let device_path = matches.value_of("DEVICE").unwrap();
    let baud = parse_baud(matches.value_of("baud").unwrap_or("115200"))?;
    let force_binary = matches.is_present("force-binary");
    let skip_init = matches.is_present("skip-init");
    let verify = matches.is_present("verify");
    let retries: u32 = matches
        .value_of("retry")
        .unwrap_or("10")
        .parse()
        .context("invalid -n retry count")?;

    let range = match matches.value_of("range") {
        Some(s) => Some(parse_range(s)?),
        None => None,
    };
    let start_page = match matches.value_of("start-page") {
        Some(s) => Some(parse_num(s)? as u16),
        None => None,
    };
    let erase_pages = match matches.value_of("erase-pages") {
        Some(s) => Some(parse_num(s)?),
        None => None,
    };

    if range.is_some() && (start_page.is_some() || erase_pages.is_some()) {
        bail!("-S is mutually exclusive with -s/-e");
    }

    let (gpio_entry, gpio_exit) = match matches.value_of("gpio-seq") {
        Some(s) => Sequence::parse_pair(s)?,
        None => (Sequence::default(), Sequence::default()),
    };

    let action = if matches.is_present("write-unprotect") {
        Action::WriteUnprotect
    } else if matches.is_present("readout-protect") {
        Action::ReadoutProtect
    } else if matches.is_present("readout-unprotect") {
        Action::ReadoutUnprotect
    } else if matches.is_present("erase-only") {
        Action::EraseOnly
    } else if let Some(addr) = matches.value_of("go") {
        Action::Go { addr: parse_num(addr)? }
    } else if let Some(file) = matches.value_of("read") {
        Action::Read { file: file.to_string() }
    } else if let Some(file) = matches.value_of("write") {
        Action::Write { file: file.to_string(), verify }
    } else {
        bail!("no action given: one of -r/-w/-u/-j/-k/-o/-g is required. See --help.");
    };

    let req = Request {
        action,
        range,
        start_page,
        erase_pages,
        force_binary,
        retries,
        skip_init,
        gpio_entry,
        gpio_exit,
    };

    let port = open_transport(device_path, baud)?;
    run_session(port, &req)
}

fn run_session(port: Box<dyn Transport>, req: &Request) -> Result<()> {
    // `Session<T>` is generic over the concrete transport so the engine
    // never pays for dynamic dispatch on the hot read/write path; at the
    // CLI boundary the session is driven through the one transport chosen
    // by `open_transport`, behind this trait object only for the duration
    // of this call.
    let session = Session::open(DynTransport(port), req).context("failed to initialize bootloader session")?;
    let (bl_version, pid, name) = session.identify();
    log::info!("bl_version=0x{:02X}, pid=0x{:03X} ({})", bl_version, pid, name);
    session.run(req).context("programming operation failed")
}

/// Adapts a boxed trait object back into a concrete [`Transport`] impl so
/// `Session<T>` can stay generic.
struct DynTransport(Box<dyn Transport>);

impl Transport for DynTransport {
    fn read(&mut self, buf: &mut [u8]) -> stm32_sbl::Result<()> {
        self.0.read(buf)
    }
    fn write(&mut self, buf: &[u8]) -> stm32_sbl::Result<()> {
        self.0.write(buf)
    }
    fn flush(&mut self) -> stm32_sbl::Result<()> {
        self.0.flush()
    }
    fn gpio(&mut self, line: stm32_sbl::GpioLine, level: bool) -> stm32_sbl::Result<()> {
        self.0.gpio(line, level)
    }
    fn get_cfg_str(&self) -> String {
        self.0.get_cfg_str()
    }
    fn capabilities(&self) -> stm32_sbl::Capabilities {
        self.0.capabilities()
    }
}

/// Try each transport in turn; the first whose `open` doesn't report
/// NotFound (not this namespace) wins.
fn open_transport(path: &str, baud: serial::BaudRate) -> Result<Box<dyn Transport>> {
    match UartTransport::open(path, baud) {
        Ok(t) => return Ok(Box::new(t)),
        Err(stm32_sbl::Error::Transport(e)) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    match I2cTransport::open(path, 0x00) {
        Ok(t) => return Ok(Box::new(t)),
        Err(stm32_sbl::Error::Transport(e)) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    match SpiTransport::open(path, 8_000_000) {
        Ok(t) => Ok(Box::new(t)),
        Err(e) => Err(e.into()),
    }
}

fn app() -> App<'static, 'static> {
    App::new("STM32 Bootloader Programmer")
        .setting(AppSettings::ColoredHelp)
        .version(crate_version!())
        .author(crate_authors!())
        .about("Flash programmer for STM32 parts running the ST factory bootloader (AN3155/AN4221/AN4286)")
        .arg(Arg::with_name("DEVICE").required(true).help("Device path: a tty, an i2c-dev or a spidev node"))
        .arg(Arg::with_name("baud").short("b").takes_value(true).help("Baud rate (UART only)"))
        .arg(Arg::with_name("mode").short("m").takes_value(true).help("UART mode, e.g. 8e1 (informational; framing is fixed at 8E1)"))
        .arg(Arg::with_name("read").short("r").takes_value(true).help("Read flash to FILE ('-' = stdout)"))
        .arg(Arg::with_name("write").short("w").takes_value(true).help("Write FILE to flash ('-' = stdin)").conflicts_with("read"))
        .arg(Arg::with_name("write-unprotect").short("u").help("Disable write protection"))
        .arg(Arg::with_name("readout-protect").short("j").help("Enable readout protection"))
        .arg(Arg::with_name("readout-unprotect").short("k").help("Disable readout protection"))
        .arg(Arg::with_name("erase-only").short("o").help("Erase only, do not write"))
        .arg(Arg::with_name("erase-pages").short("e").takes_value(true).help("Erase N pages before write"))
        .arg(Arg::with_name("verify").short("v").help("Verify writes by reading back"))
        .arg(Arg::with_name("retry").short("n").takes_value(true).help("Verify retry count (default 10)"))
        .arg(Arg::with_name("go").short("g").takes_value(true).help("Jump to ADDR after programming (0 = flash start)"))
        .arg(Arg::with_name("range").short("S").takes_value(true).help("Explicit byte range ADDR[:LEN] (conflicts with -s/-e)"))
        .arg(Arg::with_name("start-page").short("s").takes_value(true).help("Start page for erase"))
        .arg(Arg::with_name("force-binary").short("f").help("Force binary firmware parser (skip HEX auto-detect)"))
        .arg(Arg::with_name("skip-init").short("c").help("Skip INIT handshake, reuse a prior session"))
        .arg(Arg::with_name("gpio-seq").short("i").takes_value(true).help("GPIO entry/exit sequence, ENTRY[:EXIT]"))
        .arg(Arg::with_name("v").short("V").multiple(true).help("Increase log verbosity"))
}

fn parse_baud(s: &str) -> Result<serial::BaudRate> {
    Ok(match s.parse::<usize>().context("invalid -b baud rate")? {
        1200 => serial::BaudRate::Baud1200,
        1800 => serial::BaudRate::BaudOther(1800),
        2400 => serial::BaudRate::Baud2400,
        4800 => serial::BaudRate::Baud4800,
        9600 => serial::BaudRate::Baud9600,
        19200 => serial::BaudRate::Baud19200,
        38400 => serial::BaudRate::Baud38400,
        57600 => serial::BaudRate::Baud57600,
        115200 => serial::BaudRate::Baud115200,
        other => serial::BaudRate::BaudOther(other),
    })
}

fn parse_num(s: &str) -> Result<u32> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).context("invalid hex number")
    } else {
        s.parse().context("invalid number")
    }
}

fn parse_range(s: &str) -> Result<Range> {
    let mut parts = s.splitn(2, ':');
    let addr = parse_num(parts.next().unwrap())?;
    let len = match parts.next() {
        Some(len) => parse_num(len)?,
        None => bail!("-S requires ADDR:LEN"),
    };
    Ok(Range { addr, len })
}

fn init_logger(level: log::LevelFilter) -> Result<()> {
    let mut logger = env_logger::Builder::from_env("STM32_SBL_LOG");
    logger.filter_level(level);

    #[cfg(unix)]
    logger.format(log_format_color);
    #[cfg(not(unix))]
    logger.format(log_format_no_color);

    logger.try_init().context("failed to initialize logger")
}

#[cfg(unix)]
fn log_format_color(
    fmt: &mut env_logger::fmt::Formatter,
    record: &log::Record<'_>,
) -> io::Result<()> {
    let level = match record.level() {
        log::Level::Error => ansi_term::Color::Red.bold().paint("ERROR"),
        log::Level::Warn => ansi_term::Color::Yellow.bold().paint("WARN"),
        log::Level::Info => ansi_term::Color::Green.bold().paint("INFO"),
        log::Level::Debug => ansi_term::Color::Cyan.bold().paint("DBG"),
        log::Level::Trace => ansi_term::Color::Cyan.bold().paint("TRACE"),
    };

    writeln!(fmt, "[{}] - {}", level, record.args())
}

#[cfg(not(unix))]
fn log_format_no_color(
    fmt: &mut env_logger::fmt::Formatter,
    record: &log::Record<'_>,
) -> io::Result<()> {
    let level = match record.level() {
        log::Level::Error => "ERROR",
        log::Level::Warn => "WARN",
        log::Level::Info => "INFO",
        log::Level::Debug => "DBG",
        log::Level::Trace => "TRACE",
    };

    writeln!(fmt, "[{}] - {}", level, record.args())
}
