//! Crate for driving ROLI BLOCKS devices. Not affiliated with ROLI Ltd.
//!
//! A [`Session`] owns one device: it runs the API-mode handshake, keeps the
//! device alive with heartbeats, and turns a [`DeviceProgram`]'s canvas into
//! change-list bursts on every repaint tick.

pub use blocks_protocol as protocol;

use std::future::Future;

pub mod config;
pub mod display;
pub mod handshake;
pub mod program;
pub mod session;
pub mod simulated;

#[cfg(feature = "midi")]
pub mod midi;

mod ack;

pub use config::SessionConfig;
pub use display::{Canvas, Color, FrameOutcome, LedDisplay};
pub use program::{DeviceProgram, ProgramError};
pub use session::{Session, SessionCloser, SessionError, SessionState};

/// A bidirectional SysEx link to one or more BLOCKS devices.
#[allow(async_fn_in_trait)]
pub trait Transport {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Sends one complete SysEx frame, including `0xF0` and `0xF7`.
    fn send(&mut self, frame: &[u8]) -> impl Future<Output = Result<(), Self::Error>>;

    /// Receives the next complete SysEx frame.
    ///
    /// Implementations must be cancel safe: dropping the future before it
    /// completes must not lose a frame.
    fn recv(&mut self) -> impl Future<Output = Result<Vec<u8>, Self::Error>>;
}
