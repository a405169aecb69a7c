//! The user program running against a device.

use crate::{
    display::{Canvas, FrameOutcome},
    protocol::{
        message::{Topology, Touch},
        PacketCounter,
    },
};

/// An error raised by user program code.
///
/// Program errors never end a session. The first one after each open is
/// reported through [`DeviceProgram::on_program_error`].
pub type ProgramError = Box<dyn std::error::Error + Send + Sync>;

/// Logic driving one device, plus hooks for observing the session.
///
/// Only [`DeviceProgram::repaint`] is required. The drawing callbacks receive
/// the canvas the session sends to the device; anything drawn there shows up
/// on the next repaint tick.
pub trait DeviceProgram {
    /// Called once the device is ready, before the first repaint.
    fn initialise(&mut self, canvas: &mut Canvas) -> Result<(), ProgramError> {
        let _ = canvas;
        Ok(())
    }

    /// Draws the next frame. The canvas keeps its contents between calls.
    fn repaint(&mut self, canvas: &mut Canvas) -> Result<(), ProgramError>;

    fn touch_start(&mut self, canvas: &mut Canvas, touch: &Touch) -> Result<(), ProgramError> {
        let _ = (canvas, touch);
        Ok(())
    }

    fn touch_move(&mut self, canvas: &mut Canvas, touch: &Touch) -> Result<(), ProgramError> {
        let _ = (canvas, touch);
        Ok(())
    }

    fn touch_end(&mut self, canvas: &mut Canvas, touch: &Touch) -> Result<(), ProgramError> {
        let _ = (canvas, touch);
        Ok(())
    }

    /// The handshake finished.
    fn on_ready(&mut self) {}

    /// The session is about to close.
    fn on_close(&mut self) {}

    /// The device acknowledged the same packet twice, so the session resynced
    /// its packet counter to the one after `counter`.
    fn on_packet_counter_stuck(&mut self, counter: PacketCounter) {
        let _ = counter;
    }

    fn on_program_error(&mut self, error: &ProgramError) {
        let _ = error;
    }

    fn on_topology(&mut self, topology: &Topology) {
        let _ = topology;
    }

    /// Called after every repaint tick with what happened to the frame.
    fn on_frame(&mut self, outcome: FrameOutcome) {
        let _ = outcome;
    }
}
