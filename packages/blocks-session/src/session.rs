//! The per-device session state machine.

use std::{collections::VecDeque, future::pending, sync::Arc, time::Duration};

use log::{debug, error, trace, warn};
use thiserror::Error;
use tokio::{
    select,
    sync::watch,
    time::{interval_at, sleep, Instant, Interval, MissedTickBehavior},
};

use crate::{
    ack::AckSlot,
    config::{ConfigError, SessionConfig},
    display::{Canvas, FrameOutcome, LedDisplay},
    handshake::HandshakeStep,
    program::{DeviceProgram, ProgramError},
    protocol::{
        cmds::{
            DeviceCommand, END_API_MODE, LED_PROGRAM, LED_PROGRAM_NEXT_COUNTER, PING,
            REQUEST_TOPOLOGY, TOPOLOGY_DEVICE_INDEX,
        },
        delta::{ChangePacket, DeltaError, DeltaOptions, RunEncoding},
        message::{Message, Topology, Touch},
        sysex::{build_frame, parse_frame},
        PacketCounter, SerialNumber,
    },
    Transport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Opening(HandshakeStep),
    Ready,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("The session was closed while waiting for the device")]
    Closed,
    #[error("Timed out waiting for the device to acknowledge {step}")]
    AckTimeout { step: HandshakeStep },
    #[error("Device index 0 is reserved for topology requests")]
    ReservedDeviceIndex,
    #[error("The session has not finished its handshake")]
    NotReady,
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Delta(#[from] DeltaError),
}

fn transport_error<E: std::error::Error + Send + Sync + 'static>(err: E) -> SessionError {
    SessionError::Transport(Box::new(err))
}

/// Requests that a running [`Session`] close.
///
/// Closing through a handle has the same effect as [`Session::close`] but
/// works while the session is borrowed by [`Session::open`] or
/// [`Session::run`]. Either of those returns once the session has closed.
#[derive(Debug, Clone)]
pub struct SessionCloser {
    tx: Arc<watch::Sender<bool>>,
}

impl SessionCloser {
    pub fn close(&self) {
        self.tx.send_replace(true);
    }
}

fn ticker(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Waits for the next tick, or forever if the timer is stopped.
async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}

async fn close_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            pending::<()>().await;
        }
    }
}

type TouchCallback<P> = fn(&mut P, &mut Canvas, &Touch) -> Result<(), ProgramError>;

/// A connection to one BLOCKS device running a [`DeviceProgram`].
///
/// The session is single-task: [`Session::open`] drives the handshake and
/// [`Session::run`] drives the heartbeat, repaint cycle and inbound messages
/// until the session is closed. Lower-level control is available through
/// [`Session::handle_frame`] and [`Session::repaint`].
pub struct Session<T: Transport, P: DeviceProgram> {
    transport: T,
    program: P,
    config: SessionConfig,
    state: SessionState,

    packet_counter: PacketCounter,
    acked_packet_counter: PacketCounter,
    /// Unsent packets of the current change-list burst.
    pending_packets: VecDeque<ChangePacket>,
    ack: AckSlot,

    display: LedDisplay,
    delta_options: DeltaOptions,
    heartbeat: Option<Interval>,
    repaint: Option<Interval>,

    topology: Option<Topology>,
    error_reported: bool,

    close_tx: Arc<watch::Sender<bool>>,
    close_rx: watch::Receiver<bool>,
}

impl<T: Transport, P: DeviceProgram> Session<T, P> {
    pub fn new(transport: T, program: P, config: SessionConfig) -> Self {
        let (close_tx, close_rx) = watch::channel(false);

        Self {
            transport,
            program,
            display: LedDisplay::new(
                config.display_width,
                config.display_height,
                config.display_data_offset,
            ),
            delta_options: DeltaOptions {
                max_packet_bytes: config.max_packet_bytes(),
                ..Default::default()
            },
            config,
            state: SessionState::Closed,
            packet_counter: PacketCounter::default(),
            acked_packet_counter: PacketCounter::default(),
            pending_packets: VecDeque::new(),
            ack: AckSlot::default(),
            heartbeat: None,
            repaint: None,
            topology: None,
            error_reported: false,
            close_tx: Arc::new(close_tx),
            close_rx,
        }
    }

    /// Selects how runs of equal bytes are encoded in display updates.
    #[must_use]
    pub fn with_run_encoding(mut self, run_encoding: RunEncoding) -> Self {
        self.delta_options.run_encoding = run_encoding;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn packet_counter(&self) -> PacketCounter {
        self.packet_counter
    }

    pub fn acked_packet_counter(&self) -> PacketCounter {
        self.acked_packet_counter
    }

    /// Returns `true` once the device has acknowledged every packet sent so far.
    pub fn is_last_delta_acked(&self) -> bool {
        self.packet_counter.follows(self.acked_packet_counter)
    }

    /// Number of packets of the current burst still waiting to be sent.
    pub fn pending_packets(&self) -> usize {
        self.pending_packets.len()
    }

    /// The last topology reported on this link.
    pub fn topology(&self) -> Option<&Topology> {
        self.topology.as_ref()
    }

    /// The block attached to `port` of this device, as `(topology index, port)`.
    pub fn block_on_port(&self, port: u8) -> Option<(u8, u8)> {
        self.topology
            .as_ref()?
            .neighbour(self.config.device_index, port)
    }

    /// The serial number of the block at `topology_index`.
    pub fn block_id_for_index(&self, topology_index: u8) -> Option<SerialNumber> {
        Some(self.topology.as_ref()?.device(topology_index)?.serial)
    }

    pub fn display(&self) -> &LedDisplay {
        &self.display
    }

    pub fn program(&self) -> &P {
        &self.program
    }

    pub fn program_mut(&mut self) -> &mut P {
        &mut self.program
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn closer(&self) -> SessionCloser {
        SessionCloser {
            tx: self.close_tx.clone(),
        }
    }

    pub fn into_inner(self) -> (T, P) {
        (self.transport, self.program)
    }

    /// Runs the handshake and starts the repaint cycle.
    ///
    /// Does nothing if the session is already open.
    ///
    /// # Errors
    ///
    /// Fails if the device index is reserved or the configuration is invalid,
    /// if the transport fails, if a step is not acknowledged in time, or with
    /// [`SessionError::Closed`] if the session is closed mid-handshake. The
    /// session is closed again before any handshake error is returned.
    pub async fn open(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Closed {
            return Ok(());
        }

        if self.config.device_index == TOPOLOGY_DEVICE_INDEX {
            return Err(SessionError::ReservedDeviceIndex);
        }
        self.config.validate()?;

        debug!("Opening device {}", self.config.device_index);
        self.close_tx.send_replace(false);
        self.packet_counter = PacketCounter::default();
        self.acked_packet_counter = PacketCounter::default();
        self.pending_packets.clear();
        self.error_reported = false;
        self.display.reset();

        for step in HandshakeStep::ALL {
            if let Err(err) = self.run_handshake_step(step).await {
                debug!(
                    "Handshake with device {} failed at {step}: {err}",
                    self.config.device_index
                );
                if let Err(close_err) = self.close().await {
                    warn!(
                        "Failed to close device {} after handshake error: {close_err}",
                        self.config.device_index
                    );
                }
                return Err(err);
            }
        }

        self.state = SessionState::Ready;
        debug!("Device {} is ready", self.config.device_index);
        self.program.on_ready();

        match self.program.initialise(self.display.canvas_mut()) {
            Ok(()) => self.repaint = Some(ticker(self.config.repaint_interval())),
            Err(err) => self.report_program_error(err),
        }

        Ok(())
    }

    async fn run_handshake_step(&mut self, step: HandshakeStep) -> Result<(), SessionError> {
        self.state = SessionState::Opening(step);
        debug!("Device {}: {step}", self.config.device_index);

        if step == HandshakeStep::StartHeartbeat && self.heartbeat.is_none() {
            self.heartbeat = Some(ticker(self.config.heartbeat_interval()));
        }

        for command in step.commands() {
            self.send_command(command).await?;
        }

        if step == HandshakeStep::UploadLedProgram {
            for packet in LED_PROGRAM {
                self.send_frame(&build_frame(self.config.device_index, packet))
                    .await?;
            }
            self.packet_counter = PacketCounter::new(LED_PROGRAM_NEXT_COUNTER);
        }

        self.wait_for_ack(step).await
    }

    /// Keeps the session serviced until the next ack arrives, then for the
    /// settle delay after it.
    async fn wait_for_ack(&mut self, step: HandshakeStep) -> Result<(), SessionError> {
        let mut waiter = self.ack.arm();
        let timeout = sleep(self.config.ack_timeout());
        tokio::pin!(timeout);

        loop {
            select! {
                result = &mut waiter => {
                    // A dropped sender means the wait was abandoned.
                    result.unwrap_or(Err(SessionError::Closed))?;
                    break;
                }
                frame = self.transport.recv() => {
                    let frame = frame.map_err(transport_error)?;
                    self.handle_frame(&frame).await?;
                }
                _ = tick(&mut self.heartbeat) => self.send_command(&PING).await?,
                _ = close_requested(&mut self.close_rx) => {
                    self.ack.cancel();
                    return Err(SessionError::Closed);
                }
                _ = &mut timeout => {
                    self.ack.cancel();
                    return Err(SessionError::AckTimeout { step });
                }
            }
        }

        let settle = sleep(self.config.ack_settle());
        tokio::pin!(settle);

        loop {
            select! {
                _ = &mut settle => return Ok(()),
                frame = self.transport.recv() => {
                    let frame = frame.map_err(transport_error)?;
                    self.handle_frame(&frame).await?;
                }
                _ = tick(&mut self.heartbeat) => self.send_command(&PING).await?,
                _ = close_requested(&mut self.close_rx) => return Err(SessionError::Closed),
            }
        }
    }

    /// Services the device until the session is closed.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotReady`] if the handshake has not completed,
    /// and fails on transport errors. The session is left open on error.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        if !self.is_ready() {
            return Err(SessionError::NotReady);
        }

        loop {
            select! {
                frame = self.transport.recv() => {
                    let frame = frame.map_err(transport_error)?;
                    self.handle_frame(&frame).await?;
                }
                _ = tick(&mut self.heartbeat) => self.send_command(&PING).await?,
                _ = tick(&mut self.repaint) => {
                    self.repaint().await?;
                }
                _ = close_requested(&mut self.close_rx) => return self.close().await,
            }
        }
    }

    /// Stops the session and takes the device out of API mode.
    ///
    /// Timers are stopped, any pending ack wait is cancelled and unsent
    /// packets are discarded before the end-API-mode command is sent.
    ///
    /// # Errors
    ///
    /// Fails if the end-API-mode command cannot be sent. The session is closed
    /// either way.
    pub async fn close(&mut self) -> Result<(), SessionError> {
        if self.state == SessionState::Closed {
            return Ok(());
        }

        debug!("Closing device {}", self.config.device_index);
        self.program.on_close();
        self.state = SessionState::Closed;
        self.heartbeat = None;
        self.repaint = None;
        self.ack.cancel();
        self.pending_packets.clear();
        self.error_reported = false;

        self.send_command(&END_API_MODE).await
    }

    /// Asks the master block for the topology of everything attached to it.
    /// The reply arrives as a topology message.
    pub async fn request_topology(&mut self) -> Result<(), SessionError> {
        debug!("Requesting topology");
        self.send_frame(&REQUEST_TOPOLOGY.frame(TOPOLOGY_DEVICE_INDEX))
            .await
    }

    /// Runs one repaint tick.
    ///
    /// The program always draws. The frame is only diffed and sent if the
    /// device has acknowledged the previous one; otherwise it is dropped and
    /// the committed frame stays where it was.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotReady`] before the handshake completes, and
    /// fails if the change list cannot be built or sent.
    pub async fn repaint(&mut self) -> Result<FrameOutcome, SessionError> {
        if !self.is_ready() {
            return Err(SessionError::NotReady);
        }

        let acked = self.is_last_delta_acked();

        if let Err(err) = self.program.repaint(self.display.canvas_mut()) {
            self.report_program_error(err);
            self.repaint = None;
        }

        let outcome = if !acked {
            trace!(
                "Dropping frame, waiting for ack of packet {}",
                self.packet_counter
            );
            FrameOutcome::Dropped
        } else {
            match self.display.commit(self.packet_counter, &self.delta_options)? {
                Some(packets) => {
                    let count = packets.len();
                    self.send_burst(packets).await?;
                    FrameOutcome::Committed { packets: count }
                }
                None => FrameOutcome::Unchanged,
            }
        };

        self.program.on_frame(outcome);
        Ok(outcome)
    }

    /// Processes one complete frame received from the transport.
    ///
    /// Invalid frames are logged and dropped. Topology reports are accepted
    /// from any block; everything else is only handled when it comes from
    /// this session's device.
    pub async fn handle_frame(&mut self, frame: &[u8]) -> Result<(), SessionError> {
        trace!("received frame: {:x?}", frame);

        let inbound = match parse_frame(frame) {
            Ok(inbound) => inbound,
            Err(err) => {
                warn!("Dropping invalid frame: {err}");
                return Ok(());
            }
        };

        let source = inbound.device_index();
        let from_device = source == self.config.device_index;

        for (message, _) in inbound.messages() {
            match message {
                Message::Topology(topology) => self.handle_topology(topology),
                Message::PacketAck(counter) if from_device => self.handle_ack(counter).await?,
                Message::TouchStart(touch) if from_device => {
                    self.handle_touch(&touch, P::touch_start)
                }
                Message::TouchMove(touch) if from_device => {
                    self.handle_touch(&touch, P::touch_move)
                }
                Message::TouchEnd(touch) if from_device => self.handle_touch(&touch, P::touch_end),
                message => trace!("Ignoring {:?} from device {source}", message.kind()),
            }
        }

        Ok(())
    }

    async fn handle_ack(&mut self, reported: PacketCounter) -> Result<(), SessionError> {
        if reported == self.acked_packet_counter {
            if self.is_last_delta_acked() {
                trace!("Device {} repeated ack {reported}", self.config.device_index);
            } else {
                warn!(
                    "Packet counter stuck at {reported} on device {} (sent up to {}), resyncing",
                    self.config.device_index, self.packet_counter
                );
            }
            self.packet_counter = self.acked_packet_counter.next();
            self.program.on_packet_counter_stuck(reported);
        } else {
            trace!("Device {} acked packet {reported}", self.config.device_index);
            self.acked_packet_counter = reported;
        }

        if let Some(packet) = self.pending_packets.pop_front() {
            self.send_change_packet(&packet).await?;
        } else if self.ack.resolve() {
            debug!("Device {} acknowledged", self.config.device_index);
        }

        Ok(())
    }

    fn handle_touch(&mut self, touch: &Touch, callback: TouchCallback<P>) {
        if !self.is_ready() {
            trace!("Ignoring touch before device is ready");
            return;
        }

        if let Err(err) = callback(&mut self.program, self.display.canvas_mut(), touch) {
            self.report_program_error(err);
        }
    }

    fn handle_topology(&mut self, topology: Topology) {
        debug!(
            "Topology: {} blocks, {} connections",
            topology.devices.len(),
            topology.connections.len()
        );
        self.program.on_topology(&topology);
        self.topology = Some(topology);
    }

    /// Reports the first program error after each open. Later ones are only
    /// logged.
    fn report_program_error(&mut self, err: ProgramError) {
        if self.error_reported {
            trace!("Suppressing program error: {err}");
            return;
        }

        warn!("Program error on device {}: {err}", self.config.device_index);
        self.program.on_program_error(&err);
        self.error_reported = true;
    }

    /// Sends the first packet of a burst now and queues the rest, one per ack.
    async fn send_burst(&mut self, packets: Vec<ChangePacket>) -> Result<(), SessionError> {
        let mut packets = VecDeque::from(packets);
        let Some(first) = packets.pop_front() else {
            return Ok(());
        };

        if !packets.is_empty() {
            debug!("Queueing {} change-list packets", packets.len());
        }
        self.pending_packets = packets;
        self.send_change_packet(&first).await
    }

    async fn send_change_packet(&mut self, packet: &ChangePacket) -> Result<(), SessionError> {
        self.send_frame(&build_frame(self.config.device_index, packet.as_bytes()))
            .await?;
        self.packet_counter = self.packet_counter.next();
        Ok(())
    }

    async fn send_command(&mut self, command: &DeviceCommand) -> Result<(), SessionError> {
        trace!("Sending {} to device {}", command.name, self.config.device_index);
        self.send_frame(&command.frame(self.config.device_index))
            .await
    }

    async fn send_frame(&mut self, frame: &[u8]) -> Result<(), SessionError> {
        trace!("sent frame: {:x?}", frame);
        self.transport.send(frame).await.map_err(|err| {
            error!("Failed to send frame to device {}: {err}", self.config.device_index);
            transport_error(err)
        })
    }
}
