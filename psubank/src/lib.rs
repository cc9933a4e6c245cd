//! Monitoring and control of a bank of high-current power supplies using
//! [Tokio](https://docs.rs/tokio) and Rust's `async/await` syntax.
//!
//! # Features
//!
//! * Modbus RTU master, one serial port per power supply, with pipelined polling
//! * Per-channel transmission statistics and communication state
//! * Graceful shutdown sequence: ramp the current to zero, then switch off
//! * Modbus TCP server mirroring every channel to a remote computer
//! * Modbus TCP client replicating the control surface of a local computer
//! * Panic-free parsing
//!
//! # Modes
//!
//! * Local: drives the power supplies and serves the sector table
//! * Remote: connects to a local computer and mirrors its channels
//!
//! # Example
//!
//! ```no_run
//! use psubank::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let roster = Roster::new(vec![ChannelConfig {
//!         id: 1,
//!         port: "/dev/ttyUSB0".to_string(),
//!         description: "Magnet 1".to_string(),
//!     }])?;
//!
//!     let system = spawn_local(LocalConfig {
//!         roster,
//!         listen: "0.0.0.0:502".parse()?,
//!         tick_rate: TickRate::default(),
//!         decode: DecodeLevel::nothing(),
//!     })
//!     .await?;
//!
//!     let mut render = system.render();
//!     while render.changed().await {
//!         for channel in render.snapshot().channels {
//!             println!("{}: {}", channel.description, channel.state);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

/// Fixed register layout of the power supplies and of the sector table
pub mod constants;

mod common;
mod decode;
mod error;
mod orchestrator;
mod order;
mod powering_down;
mod record;
mod serial;
mod server;
mod state;
mod stats;
mod tcp;
mod types;

pub use crate::decode::*;
pub use crate::error::{
    ExceptionCode, OrderError, PolicyError, RosterError, TcpClientError,
};
pub use crate::orchestrator::{
    spawn_local, spawn_remote, ChannelConfig, LocalConfig, Mode, RemoteConfig, Roster, System,
};
pub use crate::order::{Order, OrderMailbox, NO_ORDER};
pub use crate::powering_down::{PoweringDownAction, PoweringDownInput, PoweringDownMachine};
pub use crate::record::{RtuReport, SharedChannelRecord};
pub use crate::server::handler::{RequestHandler, ServerHandlerType};
pub use crate::server::table::ServerTable;
pub use crate::state::{RenderHandle, Snapshot};
pub use crate::stats::{ErrorStatisticsWindow, WINDOW_SIZE};
pub use crate::tcp::client::TcpClientState;
pub use crate::types::*;

/// Serve a [`RequestHandler`] over Modbus TCP until the listener fails
///
/// Each accepted connection is handled by its own task.
pub async fn serve<T: RequestHandler>(
    listener: tokio::net::TcpListener,
    handler: ServerHandlerType<T>,
    decode: DecodeLevel,
) {
    tcp::server::ServerTask::new(listener, handler, decode)
        .run()
        .await
}
