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

//! Parses and drives the `-i SEQ[:SEQ]` GPIO entry/exit sequences, a
//! generalization of the two-pin DTR/RTS dance into an arbitrary sequence
//! of transport lines and/or Linux sysfs GPIOs.

use std::thread;
use std::time::Duration;

use sysfs_gpio::{Direction, Pin};

use crate::error::{Error, Result};
use crate::transport::{GpioLine, Transport};

const STEP_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Transport(GpioLine, bool),
    Sysfs(u32, bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Scheduled {
    step: Step,
    delay_before: bool,
}

/// A parsed GPIO sequence (one half of the `entry:exit` pair).
#[derive(Debug, Clone, Default)]
pub struct Sequence {
    steps: Vec<Scheduled>,
}

impl Sequence {
    /// Parse one half of the grammar: `step (sep step)*`, empty string is
    /// an empty sequence.
    pub fn parse(s: &str) -> Result<Sequence> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Sequence { steps: Vec::new() });
        }

        let mut steps = Vec::new();
        let mut rest = s;
        let mut delay_before = false;

        loop {
            let (token, sep, tail) = split_next(rest);
            let step = parse_step(token)?;
            steps.push(Scheduled { step, delay_before });
            match sep {
                Some(',') => delay_before = true,
                Some('&') => delay_before = false,
                Some(other) => {
                    return Err(Error::precondition(format!(
                        "invalid GPIO sequence separator '{}'",
                        other
                    )))
                }
                None => break,
            }
            rest = tail;
        }

        Ok(Sequence { steps })
    }

    /// Parse the full `entry:exit` pair; either half may be empty.
    pub fn parse_pair(s: &str) -> Result<(Sequence, Sequence)> {
        let mut parts = s.splitn(2, ':');
        let entry = Sequence::parse(parts.next().unwrap_or(""))?;
        let exit = Sequence::parse(parts.next().unwrap_or(""))?;
        Ok((entry, exit))
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Drive every step of this sequence in order, exporting and
    /// unexporting sysfs pins this call itself exports, and restoring
    /// direction on pins that already existed.
    pub fn run(&self, port: &mut dyn Transport) -> Result<()> {
        let mut owned_pins: Vec<Pin> = Vec::new();
        let mut restored_pins: Vec<(Pin, Direction)> = Vec::new();

        let result = (|| -> Result<()> {
            for scheduled in &self.steps {
                if scheduled.delay_before {
                    thread::sleep(STEP_DELAY);
                }
                match scheduled.step {
                    Step::Transport(line, level) => port.gpio(line, level)?,
                    Step::Sysfs(num, level) => {
                        let pin = Pin::new(num as u64);
                        let pre_existing = pin.get_direction().is_ok();
                        if !pre_existing {
                            pin.export().map_err(sysfs_err)?;
                            owned_pins.push(pin);
                        } else if !restored_pins.iter().any(|(p, _)| p.get_pin() == pin.get_pin()) {
                            let prev = pin.get_direction().map_err(sysfs_err)?;
                            restored_pins.push((pin, prev));
                        }
                        pin.set_direction(Direction::Out).map_err(sysfs_err)?;
                        pin.set_value(level as u8).map_err(sysfs_err)?;
                    }
                }
            }
            Ok(())
        })();

        for (pin, dir) in restored_pins {
            let _ = pin.set_direction(dir);
        }
        for pin in owned_pins {
            let _ = pin.unexport();
        }

        result
    }
}

fn sysfs_err(e: sysfs_gpio::Error) -> Error {
    Error::Transport(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
}

fn parse_step(token: &str) -> Result<Step> {
    let (level, name) = match token.strip_prefix('-') {
        Some(rest) => (false, rest),
        None => (true, token),
    };

    if name.is_empty() {
        return Err(Error::precondition("empty GPIO sequence step"));
    }

    match name {
        "rts" => Ok(Step::Transport(GpioLine::Rts, level)),
        "dtr" => Ok(Step::Transport(GpioLine::Dtr, level)),
        "brk" => Ok(Step::Transport(GpioLine::Break, level)),
        digits => {
            let num: u32 = digits
                .parse()
                .map_err(|_| Error::precondition(format!("invalid GPIO sequence step '{}'", token)))?;
            Ok(Step::Sysfs(num, level))
        }
    }
}

/// Split `rest` at the first `,` or `&` separator, returning
/// `(token, separator, remainder)`.
fn split_next(rest: &str) -> (&str, Option<char>, &str) {
    match rest.find([',', '&']) {
        Some(idx) => {
            let sep = rest[idx..].chars().next();
            (&rest[..idx], sep, &rest[idx + 1..])
        }
        None => (rest, None, ""),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_single_named_step() {
        let seq = Sequence::parse("dtr").unwrap();
        assert_eq!(seq.steps.len(), 1);
        assert_eq!(seq.steps[0].step, Step::Transport(GpioLine::Dtr, true));
    }

    #[test]
    fn test_parse_inverted_step() {
        let seq = Sequence::parse("-rts").unwrap();
        assert_eq!(seq.steps[0].step, Step::Transport(GpioLine::Rts, false));
    }

    #[test]
    fn test_parse_numeric_step() {
        let seq = Sequence::parse("17").unwrap();
        assert_eq!(seq.steps[0].step, Step::Sysfs(17, true));
    }

    #[test]
    fn test_parse_sequence_with_delays() {
        let seq = Sequence::parse("dtr,-rts&22").unwrap();
        assert_eq!(seq.steps.len(), 3);
        assert!(!seq.steps[0].delay_before);
        assert!(seq.steps[1].delay_before);
        assert!(!seq.steps[2].delay_before);
    }

    #[test]
    fn test_parse_pair_splits_on_colon() {
        let (entry, exit) = Sequence::parse_pair("dtr:rts").unwrap();
        assert_eq!(entry.steps.len(), 1);
        assert_eq!(exit.steps.len(), 1);
    }

    #[test]
    fn test_parse_pair_empty_half() {
        let (entry, exit) = Sequence::parse_pair(":rts").unwrap();
        assert!(entry.is_empty());
        assert_eq!(exit.steps.len(), 1);
    }

    #[test]
    fn test_parse_rejects_empty_step() {
        assert!(Sequence::parse("dtr,,rts").is_err());
    }
}
