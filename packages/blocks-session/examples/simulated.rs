use std::time::Duration;

use log::info;
use tokio::time::sleep;
use blocks_session::{
    protocol::message::{Message, Touch, TouchPosition},
    simulated::SimulatedDevice,
    Canvas, Color, DeviceProgram, FrameOutcome, ProgramError, Session, SessionConfig,
    SessionError,
};

/// Sweeps a gradient across the display and lights the touched column.
#[derive(Default)]
struct Sweep {
    frame: i32,
    column: Option<i32>,
}

impl DeviceProgram for Sweep {
    fn repaint(&mut self, canvas: &mut Canvas) -> Result<(), ProgramError> {
        let width = canvas.width() as i32;
        let height = canvas.height() as i32;

        canvas.clear(Color::BLACK);
        canvas.blend_gradient_rect(
            Color::rgb(0xFF, 0, 0),
            Color::rgb(0, 0, 0xFF),
            Color::rgb(0, 0xFF, 0),
            Color::WHITE,
            self.frame % width,
            0,
            width,
            height,
        );
        if let Some(column) = self.column {
            canvas.fill_rect(Color::WHITE, column, 0, 1, height);
        }

        self.frame += 1;
        Ok(())
    }

    fn touch_start(&mut self, canvas: &mut Canvas, touch: &Touch) -> Result<(), ProgramError> {
        let column = i32::from(touch.position.x) * canvas.width() as i32 / 4096;
        info!("Touch {} at column {column}", touch.touch_index);
        self.column = Some(column);
        Ok(())
    }

    fn touch_end(&mut self, _: &mut Canvas, _: &Touch) -> Result<(), ProgramError> {
        self.column = None;
        Ok(())
    }

    fn on_frame(&mut self, outcome: FrameOutcome) {
        if let FrameOutcome::Committed { packets } = outcome {
            log::debug!("Frame {} sent in {packets} packets", self.frame);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), SessionError> {
    simplelog::TermLogger::init(
        log::LevelFilter::Debug,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Always,
    )
    .unwrap();

    let config = SessionConfig::default();
    let device = SimulatedDevice::new(config.device_index);
    let mut session = Session::new(device.clone(), Sweep::default(), config);

    session.open().await?;
    info!("Handshake finished, packet counter at {}", session.packet_counter());

    let closer = session.closer();
    let script = async {
        sleep(Duration::from_millis(500)).await;

        let touch = Touch {
            touch_index: 1,
            position: TouchPosition {
                x: 2048,
                y: 1024,
                z: 200,
            },
            ..Default::default()
        };
        device.push_message(Message::TouchStart(touch));
        sleep(Duration::from_millis(500)).await;
        device.push_message(Message::TouchEnd(touch));

        sleep(Duration::from_millis(500)).await;
        closer.close();
    };

    let (result, ()) = tokio::join!(session.run(), script);
    result?;

    let display = session.display();
    let on_device = device.read_heap(display.data_offset(), display.sent_bytes().len());
    info!(
        "Closed, device bitmap {} the last sent frame",
        if on_device.as_deref() == Some(display.sent_bytes()) {
            "matches"
        } else {
            "differs from"
        }
    );

    Ok(())
}
