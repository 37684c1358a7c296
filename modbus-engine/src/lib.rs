//! An async implementation of a [Modbus](http://modbus.org/) master and a
//! process-image slave using [Tokio](https://docs.rs/tokio) and Rust's `async/await` syntax.
//!
//! # Features
//!
//! * Automatic connection management with configurable retry strategy
//! * Transaction correlation by MBAP transaction id, with per-request timeouts and bounded retries
//! * Panic-free parsing
//! * Traffic decoding at the PDU, ADU and physical layers via `tracing`
//!
//! # Supported modes
//!
//! * TCP master and slave
//! * RTU master over serial (feature `serial`, enabled by default)
//!
//! # Supported functions
//!
//! * Read Coils
//! * Read Discrete Inputs
//! * Read Holding Registers
//! * Read Input Registers
//! * Write Single Coil
//! * Write Single Register
//! * Write Multiple Coils
//! * Write Multiple Registers
//! * Mask Write Register
//!
//! # Example
//!
//! A master that toggles a coil on a remote device
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use modbus_engine::client::*;
//! use modbus_engine::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut channel = spawn_tcp_client_task(
//!         "127.0.0.1:502".parse()?,
//!         10,
//!         default_retry_strategy(),
//!         DecodeLevel::default(),
//!     );
//!
//!     let param = RequestParam::new(UnitId::new(1), Duration::from_secs(1)).with_retries(2);
//!     channel.write_single_coil(param, Indexed::new(0, true)).await?;
//!
//!     let coils = channel
//!         .read_coils(param, AddressRange::try_from(0, 1)?)
//!         .await?;
//!     println!("{}", coils[0]);
//!     Ok(())
//! }
//! ```

pub mod client;
/// Public constant values related to the Modbus specification
pub mod constants;
pub mod server;

// modules that are re-exported
mod decode;
mod error;
mod exception;
mod retry;
mod serial;
mod types;

// internal modules
mod channel;
mod common;
mod tcp;

pub use crate::decode::*;
pub use crate::error::*;
pub use crate::exception::*;
pub use crate::retry::*;
#[cfg(feature = "serial")]
pub use crate::serial::{DataBits, FlowControl, Parity, SerialSettings, StopBits};
pub use crate::types::*;
