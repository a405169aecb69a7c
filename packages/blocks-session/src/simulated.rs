//! An in-memory BLOCKS device.
//!
//! [`SimulatedDevice`] speaks the device side of the protocol well enough to
//! drive a [`Session`](crate::Session) without hardware: it tracks API mode,
//! applies change lists to a heap, acks what a real block acks, and answers
//! topology requests. Clones share the same device, so a test can keep a
//! handle to inspect the heap or inject touches while a session owns the
//! transport.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use log::{trace, warn};
use thiserror::Error;
use tokio::sync::Notify;

use crate::{
    protocol::{
        cmds::{DeviceCommand, TOPOLOGY_DEVICE_INDEX},
        delta::{apply_change_list, CHANGE_LIST_MESSAGE},
        message::{Message, Topology},
        sysex::{build_frame, checksum, FRAME_OVERHEAD, SYSEX_END},
        BitEncode, BitReader, BitWriter, PacketCounter, SYSEX_HEADER,
    },
    Transport,
};

/// Size of the program heap on a Lightpad.
pub const DEVICE_HEAP_SIZE: usize = 7200;

/// Set on the device-index byte of every device-originated frame.
const DEVICE_TO_HOST_FLAG: u8 = 0x40;

const DEVICE_COMMAND_MESSAGE: u8 = 0x01;
const CONFIG_MESSAGE: u8 = 0x10;

const BEGIN_API_MODE: u8 = 0x00;
const REQUEST_TOPOLOGY: u8 = 0x01;
const END_API_MODE: u8 = 0x02;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedError {
    #[error("Simulated device was disconnected")]
    Disconnected,
}

#[derive(Debug)]
struct DeviceState {
    heap: Vec<u8>,
    api_mode: bool,
    last_change_list: u16,
    timestamp: u32,
    topology: Option<Topology>,
    received: Vec<Vec<u8>>,
    outbound: VecDeque<Vec<u8>>,
    acks_enabled: bool,
    stalled: bool,
    connected: bool,
}

/// A shared handle to a simulated block.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    device_index: u8,
    state: Arc<Mutex<DeviceState>>,
    notify: Arc<Notify>,
}

impl SimulatedDevice {
    pub fn new(device_index: u8) -> Self {
        Self {
            device_index: device_index & 0x3F,
            state: Arc::new(Mutex::new(DeviceState {
                heap: vec![0; DEVICE_HEAP_SIZE],
                api_mode: false,
                last_change_list: 0,
                timestamp: 0,
                topology: None,
                received: Vec::new(),
                outbound: VecDeque::new(),
                acks_enabled: true,
                stalled: false,
                connected: true,
            })),
            notify: Arc::new(Notify::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn device_index(&self) -> u8 {
        self.device_index
    }

    pub fn is_in_api_mode(&self) -> bool {
        self.lock().api_mode
    }

    /// Index of the last change list the device applied.
    pub fn last_change_list(&self) -> u16 {
        self.lock().last_change_list
    }

    /// A copy of `len` heap bytes starting at `offset`, or `None` if the
    /// range runs past the end of the heap.
    pub fn read_heap(&self, offset: usize, len: usize) -> Option<Vec<u8>> {
        let end = offset.checked_add(len)?;
        self.lock().heap.get(offset..end).map(<[u8]>::to_vec)
    }

    /// Every frame the host has sent, oldest first.
    pub fn received_frames(&self) -> Vec<Vec<u8>> {
        self.lock().received.clone()
    }

    /// Payloads of the frames the host has sent, oldest first.
    pub fn received_payloads(&self) -> Vec<Vec<u8>> {
        self.lock()
            .received
            .iter()
            .filter(|frame| frame.len() >= FRAME_OVERHEAD)
            .map(|frame| frame[SYSEX_HEADER.len() + 1..frame.len() - 2].to_vec())
            .collect()
    }

    /// How many times the host has sent `command`.
    pub fn count_received(&self, command: &DeviceCommand) -> usize {
        self.received_payloads()
            .iter()
            .filter(|payload| payload.as_slice() == command.payload)
            .count()
    }

    /// Sets the topology reported in response to topology requests.
    pub fn set_topology(&self, topology: Topology) {
        self.lock().topology = Some(topology);
    }

    /// When disabled the device silently swallows everything, as a block that
    /// has fallen off the bus would.
    pub fn set_acks_enabled(&self, enabled: bool) {
        self.lock().acks_enabled = enabled;
    }

    /// A stalled device keeps acking but stops applying change lists, so its
    /// acks repeat the last packet it did apply.
    pub fn set_stalled(&self, stalled: bool) {
        self.lock().stalled = stalled;
    }

    /// Makes every further send and receive fail.
    pub fn disconnect(&self) {
        self.lock().connected = false;
        self.notify.notify_one();
    }

    /// Queues a frame carrying `message` from this device.
    pub fn push_message(&self, message: Message) {
        self.push_message_from(self.device_index, message);
    }

    /// Queues a frame carrying `message` from another block on the same link.
    pub fn push_message_from(&self, device_index: u8, message: Message) {
        let mut state = self.lock();
        let frame = device_frame(&mut state, device_index, &message);
        state.outbound.push_back(frame);
        drop(state);
        self.notify.notify_one();
    }

    /// Queues raw bytes as if the device had sent them.
    pub fn push_raw_frame(&self, frame: Vec<u8>) {
        self.lock().outbound.push_back(frame);
        self.notify.notify_one();
    }

    fn handle_host_frame(&self, frame: &[u8]) {
        let mut state = self.lock();
        state.received.push(frame.to_vec());

        if !state.acks_enabled {
            return;
        }

        if frame.len() < FRAME_OVERHEAD
            || frame[..SYSEX_HEADER.len()] != SYSEX_HEADER
            || frame[frame.len() - 1] != SYSEX_END
        {
            warn!("Simulated device dropped a malformed frame: {:x?}", frame);
            return;
        }

        let device_index = frame[SYSEX_HEADER.len()];
        let payload = &frame[SYSEX_HEADER.len() + 1..frame.len() - 2];
        if checksum(payload) != frame[frame.len() - 2] {
            warn!("Simulated device dropped a frame with a bad checksum");
            return;
        }

        let mut reader = BitReader::new(payload);
        let Ok(message_type) = reader.read(7) else {
            return;
        };
        let message_type = message_type as u8;

        if device_index == TOPOLOGY_DEVICE_INDEX {
            if message_type == DEVICE_COMMAND_MESSAGE
                && reader.read(7) == Ok(u32::from(REQUEST_TOPOLOGY))
            {
                self.reply_topology(&mut state);
            }
            return;
        }

        if device_index != self.device_index {
            return;
        }

        match message_type {
            DEVICE_COMMAND_MESSAGE => match reader.read(7).map(|command| command as u8) {
                Ok(BEGIN_API_MODE) => {
                    state.api_mode = true;
                    self.ack(&mut state);
                }
                Ok(END_API_MODE) => state.api_mode = false,
                Ok(REQUEST_TOPOLOGY) => self.reply_topology(&mut state),
                Ok(_) => self.ack(&mut state),
                Err(err) => warn!("Simulated device got a truncated command: {err}"),
            },
            CONFIG_MESSAGE => self.ack(&mut state),
            CHANGE_LIST_MESSAGE if state.api_mode => {
                if !state.stalled {
                    let state = &mut *state;
                    match apply_change_list(payload, &mut state.heap) {
                        Ok(applied) => state.last_change_list = applied.index,
                        Err(err) => warn!("Simulated device rejected a change list: {err}"),
                    }
                }
                self.ack(&mut state);
            }
            other => trace!("Simulated device ignored message type {other:#04x}"),
        }
    }

    fn ack(&self, state: &mut DeviceState) {
        if !state.api_mode {
            return;
        }

        let counter = PacketCounter::new(state.last_change_list);
        let frame = device_frame(state, self.device_index, &Message::PacketAck(counter));
        state.outbound.push_back(frame);
        self.notify.notify_one();
    }

    fn reply_topology(&self, state: &mut DeviceState) {
        if let Some(topology) = state.topology.clone() {
            let frame = device_frame(state, self.device_index, &Message::Topology(topology));
            state.outbound.push_back(frame);
            self.notify.notify_one();
        }
    }
}

/// Builds a device-originated frame: the flagged device index, a 32-bit
/// timestamp and one message.
fn device_frame(state: &mut DeviceState, device_index: u8, message: &Message) -> Vec<u8> {
    state.timestamp = state.timestamp.wrapping_add(1);

    let mut writer = BitWriter::new();
    writer.write_bits(state.timestamp, 32);
    message.encode(&mut writer);

    build_frame(DEVICE_TO_HOST_FLAG | device_index, writer.as_bytes())
}

impl Transport for SimulatedDevice {
    type Error = SimulatedError;

    async fn send(&mut self, frame: &[u8]) -> Result<(), SimulatedError> {
        if !self.lock().connected {
            return Err(SimulatedError::Disconnected);
        }

        self.handle_host_frame(frame);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Vec<u8>, SimulatedError> {
        loop {
            {
                let mut state = self.lock();
                if !state.connected {
                    return Err(SimulatedError::Disconnected);
                }
                if let Some(frame) = state.outbound.pop_front() {
                    return Ok(frame);
                }
            }

            self.notify.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{SimulatedDevice, SimulatedError, DEVICE_HEAP_SIZE};
    use crate::{
        protocol::{
            cmds::{self, LED_PROGRAM},
            message::{Message, Touch},
            sysex::{build_frame, parse_frame},
            PacketCounter,
        },
        Transport,
    };

    fn acked(frame: &[u8]) -> Option<PacketCounter> {
        let inbound = parse_frame(frame).ok()?;
        match inbound.messages().next()? {
            (Message::PacketAck(counter), _) => Some(counter),
            _ => None,
        }
    }

    #[tokio::test]
    async fn acks_only_in_api_mode() {
        let mut device = SimulatedDevice::new(0x3E);

        device.send(&cmds::PING.frame(0x3E)).await.unwrap();
        device.send(&cmds::BEGIN_API_MODE.frame(0x3E)).await.unwrap();
        assert!(device.is_in_api_mode());

        let frame = device.recv().await.unwrap();
        assert_eq!(parse_frame(&frame).unwrap().device_index(), 0x3E);
        assert_eq!(acked(&frame), Some(PacketCounter::new(0)));

        device.send(&cmds::END_API_MODE.frame(0x3E)).await.unwrap();
        assert!(!device.is_in_api_mode());
        assert_eq!(device.count_received(&cmds::PING), 1);
    }

    #[tokio::test]
    async fn applies_the_led_program() {
        let mut device = SimulatedDevice::new(5);
        device.send(&cmds::BEGIN_API_MODE.frame(5)).await.unwrap();
        device.recv().await.unwrap();

        for packet in LED_PROGRAM {
            device.send(&build_frame(5, packet)).await.unwrap();
        }

        assert_eq!(device.last_change_list(), 2);
        assert_eq!(acked(&device.recv().await.unwrap()), Some(PacketCounter::new(1)));
        assert_eq!(acked(&device.recv().await.unwrap()), Some(PacketCounter::new(2)));
        assert_eq!(device.read_heap(0, 4).unwrap(), [105, 190, 113, 0]);
        assert_eq!(device.read_heap(0, DEVICE_HEAP_SIZE).unwrap().len(), DEVICE_HEAP_SIZE);
        assert_eq!(device.read_heap(DEVICE_HEAP_SIZE - 2, 4), None);
        assert_eq!(device.read_heap(usize::MAX, 2), None);
    }

    #[tokio::test]
    async fn injected_messages_and_disconnect() {
        let mut device = SimulatedDevice::new(5);
        let touch = Touch {
            device_index: 5,
            touch_index: 1,
            ..Default::default()
        };
        device.push_message(Message::TouchMove(touch));

        let frame = device.recv().await.unwrap();
        let (message, _) = parse_frame(&frame).unwrap().messages().next().unwrap();
        assert_eq!(message, Message::TouchMove(touch));

        device.disconnect();
        assert_eq!(device.recv().await, Err(SimulatedError::Disconnected));
        assert_eq!(
            device.send(&cmds::PING.frame(5)).await,
            Err(SimulatedError::Disconnected)
        );
    }
}
