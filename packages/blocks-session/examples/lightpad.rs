use log::info;
use blocks_session::{
    midi::{self, MidiTransport},
    protocol::message::Touch,
    Canvas, Color, DeviceProgram, ProgramError, Session, SessionConfig,
};

/// Paints a fading splash wherever the surface is pressed.
struct FingerPaint {
    color: Color,
}

impl FingerPaint {
    fn splash(&self, canvas: &mut Canvas, touch: &Touch) {
        canvas.add_pressure_point(
            self.color,
            f32::from(touch.position.x),
            f32::from(touch.position.y),
            f32::from(touch.position.z),
        );
    }
}

impl DeviceProgram for FingerPaint {
    fn repaint(&mut self, canvas: &mut Canvas) -> Result<(), ProgramError> {
        canvas.clear(Color::BLACK);
        canvas.draw_pressure_map();
        canvas.fade_pressure_map();
        Ok(())
    }

    fn touch_start(&mut self, canvas: &mut Canvas, touch: &Touch) -> Result<(), ProgramError> {
        self.splash(canvas, touch);
        Ok(())
    }

    fn touch_move(&mut self, canvas: &mut Canvas, touch: &Touch) -> Result<(), ProgramError> {
        self.splash(canvas, touch);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    simplelog::TermLogger::init(
        log::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Always,
    )
    .unwrap();

    for port in midi::find_ports()? {
        info!("Found MIDI port {port:?}");
    }

    let transport = MidiTransport::open("Lightpad BLOCK")?;
    info!("Connecting to {}", transport.name());

    let mut session = Session::new(
        transport,
        FingerPaint {
            color: Color::rgb(0x20, 0xC0, 0xFF),
        },
        SessionConfig::default(),
    );
    session.open().await?;
    session.request_topology().await?;

    let closer = session.closer();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            closer.close();
        }
    });

    info!("Ready, press Ctrl-C to exit");
    session.run().await?;

    Ok(())
}
