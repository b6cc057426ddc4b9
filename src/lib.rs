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

//! # STM32 factory bootloader interface library
//!
//! Host-side driver for STMicroelectronics' factory bootloader, reachable
//! over UART (AN3155), I2C (AN4221) or SPI (AN4286). Brings a target into
//! system-memory bootloader mode, negotiates its command set, identifies
//! the silicon, and reads, writes, erases, protects and resets flash.
//!
//! # See also
//!
//! - [AN3155: USART protocol used in the STM32 bootloader](https://www.st.com/resource/en/application_note/an3155.pdf)
//! - [AN4221: I2C protocol used in the STM32 bootloader](https://www.st.com/resource/en/application_note/an4221.pdf)
//! - [AN4286: SPI protocol used in the STM32 bootloader](https://www.st.com/resource/en/application_note/an4286.pdf)
//! - [AN2606: STM32 microcontroller system memory boot mode](https://www.st.com/resource/en/application_note/an2606.pdf)

pub mod codec;
pub mod device;
pub mod engine;
pub mod error;
pub mod firmware;
pub mod gpio_seq;
pub mod session;
pub mod transport;

pub use device::Device;
pub use engine::{CommandTable, Engine};
pub use error::{Error, Result};
pub use session::{Action, Range, Request, Session};
pub use transport::{Capabilities, GpioLine, Transport};
