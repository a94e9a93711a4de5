//! Capability traits injected into the node.
//!
//! The protocol never touches hardware directly; everything platform
//! specific arrives through these seams:
//! - [`Transport`]: the packet radio (nRF24-class, simulation, loopback)
//! - [`Storage`]: byte-addressed persistent memory (EEPROM, flash page)
//! - [`Clock`]: time source, real or simulated
//! - [`Random`]: jitter source for retry backoff
//! - [`AppHandler`]: the application's receive surface

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::time::{Duration, Timestamp};
use crate::types::{Message, FRAME_SIZE};

/// Frames buffered between the radio interrupt and the poll loop.
pub(crate) const RX_QUEUE_SIZE: usize = 8;

/// Mutex type used for channels.
pub(crate) type ChannelMutex = CriticalSectionRawMutex;

/// A raw frame as it came off the air.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxFrame {
    pub data: [u8; FRAME_SIZE],
}

impl RxFrame {
    pub const fn new(data: [u8; FRAME_SIZE]) -> Self {
        Self { data }
    }
}

/// Received-frame channel for radio drivers.
///
/// The radio ISR calls `try_send` when a frame arrives; the driver's
/// [`Transport::receive`] drains it from the polled tick. The critical-
/// section mutex makes `try_send` safe from interrupt context.
pub type RxQueue = Channel<ChannelMutex, RxFrame, RX_QUEUE_SIZE>;

/// Packet radio backend.
///
/// Addresses are opaque `u64`s; the node derives them from
/// [`Config::radio_address`](crate::Config::radio_address).
pub trait Transport {
    /// (Re)configure the receive side: the node's own unicast address
    /// and the shared broadcast address. Called at startup and again
    /// after id assignment changes the unicast address.
    fn listen(&mut self, own_addr: u64, broadcast_addr: u64);

    /// Transmit one frame. When `want_ack` is set, returns whether the
    /// radio saw a link-level acknowledgement; broadcast sends pass
    /// `false` and the return value carries no meaning.
    fn send(&mut self, addr: u64, frame: &[u8; FRAME_SIZE], want_ack: bool) -> bool;

    /// Take the next buffered received frame, if any. Never blocks.
    fn receive(&mut self) -> Option<RxFrame>;
}

/// Byte-addressed persistent memory.
///
/// The node writes single bytes per state mutation so a power cut
/// corrupts at most one entry. Erased EEPROM reads `0xFF`, which every
/// persisted field treats as "unset".
pub trait Storage {
    fn read_byte(&self, addr: u16) -> u8;

    fn write_byte(&mut self, addr: u16, value: u8);

    fn read_block(&self, addr: u16, buf: &mut [u8]) {
        for (i, slot) in buf.iter_mut().enumerate() {
            *slot = self.read_byte(addr + i as u16);
        }
    }

    fn write_block(&mut self, addr: u16, data: &[u8]) {
        for (i, &byte) in data.iter().enumerate() {
            self.write_byte(addr + i as u16, byte);
        }
    }
}

/// Time source.
pub trait Clock {
    fn now(&self) -> Timestamp;

    /// Sleep for the given span. Bounded receive loops call this
    /// between polls; a simulated clock advances itself here so those
    /// loops terminate deterministically.
    fn delay(&self, duration: Duration);
}

/// Randomness for retry jitter.
pub trait Random {
    /// Uniform value in `[min, max)`. `min` when the range is empty.
    fn gen_range(&mut self, min: u64, max: u64) -> u64;
}

/// Application callbacks, invoked synchronously from the process tick.
///
/// The node is exclusively borrowed for the whole tick, so handlers can
/// never re-enter it; anything a handler wants to send goes out on the
/// next call into the node.
pub trait AppHandler {
    /// A message addressed to this node (or broadcast) arrived.
    fn on_message(&mut self, msg: &Message);

    /// An echo reply for an earlier send with `echo = true` arrived.
    fn on_ack(&mut self, msg: &Message) {
        let _ = msg;
    }

    /// The gateway answered a time request with epoch seconds.
    fn on_time(&mut self, seconds: u32) {
        let _ = seconds;
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_impls {
    //! Mock implementations for unit tests and host-side harnesses.

    use alloc::collections::VecDeque;
    use alloc::vec;
    use alloc::vec::Vec;
    use core::cell::Cell;

    use super::*;
    use crate::wire;

    /// A frame captured by [`MockTransport`].
    #[derive(Debug, Clone, Copy)]
    pub struct SentFrame {
        pub addr: u64,
        pub data: [u8; FRAME_SIZE],
        pub want_ack: bool,
    }

    impl SentFrame {
        /// Decode the captured frame back into a message.
        pub fn message(&self) -> Option<Message> {
            wire::decode(&self.data).ok()
        }
    }

    /// Mock radio: frames are injected from the test and captured on
    /// send; link-ack results can be scripted per attempt.
    pub struct MockTransport {
        incoming: RxQueue,
        sent: Vec<SentFrame>,
        ack_script: VecDeque<bool>,
        default_ack: bool,
        listening: Option<(u64, u64)>,
    }

    impl Default for MockTransport {
        fn default() -> Self {
            Self {
                incoming: Channel::new(),
                sent: Vec::new(),
                ack_script: VecDeque::new(),
                default_ack: true,
                listening: None,
            }
        }
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Inject a raw frame as if it arrived from the air.
        pub fn inject(&self, data: [u8; FRAME_SIZE]) {
            let _ = self.incoming.try_send(RxFrame::new(data));
        }

        /// Encode and inject a message.
        pub fn inject_message(&self, msg: &Message) {
            let frame = wire::encode(msg).expect("test message must encode");
            self.inject(frame);
        }

        /// Drain and return all captured sent frames.
        pub fn take_sent(&mut self) -> Vec<SentFrame> {
            core::mem::take(&mut self.sent)
        }

        pub fn sent_count(&self) -> usize {
            self.sent.len()
        }

        /// Queue the result of the next acknowledged send. Scripted
        /// results are consumed in order, then `default_ack` applies.
        pub fn script_ack(&mut self, acked: bool) {
            self.ack_script.push_back(acked);
        }

        /// Result for acknowledged sends with an empty script.
        pub fn set_default_ack(&mut self, acked: bool) {
            self.default_ack = acked;
        }

        /// Last `(own, broadcast)` address pair passed to `listen`.
        pub fn listening(&self) -> Option<(u64, u64)> {
            self.listening
        }
    }

    impl Transport for MockTransport {
        fn listen(&mut self, own_addr: u64, broadcast_addr: u64) {
            self.listening = Some((own_addr, broadcast_addr));
        }

        fn send(&mut self, addr: u64, frame: &[u8; FRAME_SIZE], want_ack: bool) -> bool {
            self.sent.push(SentFrame {
                addr,
                data: *frame,
                want_ack,
            });
            if !want_ack {
                return true;
            }
            self.ack_script.pop_front().unwrap_or(self.default_ack)
        }

        fn receive(&mut self) -> Option<RxFrame> {
            self.incoming.try_receive().ok()
        }
    }

    /// In-memory storage initialized to `0xFF` like erased EEPROM.
    pub struct MockStorage {
        bytes: Vec<u8>,
    }

    impl Default for MockStorage {
        fn default() -> Self {
            Self {
                bytes: vec![0xFF; 1024],
            }
        }
    }

    impl MockStorage {
        pub fn new() -> Self {
            Self::default()
        }

        /// Pre-seed bytes before handing the storage to a node.
        pub fn preload(&mut self, addr: u16, data: &[u8]) {
            self.bytes[addr as usize..addr as usize + data.len()].copy_from_slice(data);
        }

        pub fn bytes(&self) -> &[u8] {
            &self.bytes
        }
    }

    impl Storage for MockStorage {
        fn read_byte(&self, addr: u16) -> u8 {
            self.bytes[addr as usize]
        }

        fn write_byte(&mut self, addr: u16, value: u8) {
            self.bytes[addr as usize] = value;
        }
    }

    /// Clock that advances only through `delay` (or explicitly), which
    /// makes bounded poll loops terminate under test.
    pub struct MockClock {
        current: Cell<Timestamp>,
    }

    impl Default for MockClock {
        fn default() -> Self {
            Self {
                current: Cell::new(Timestamp::ZERO),
            }
        }
    }

    impl MockClock {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set(&self, time: Timestamp) {
            self.current.set(time);
        }

        pub fn advance(&self, duration: Duration) {
            self.current.set(self.current.get() + duration);
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> Timestamp {
            self.current.get()
        }

        fn delay(&self, duration: Duration) {
            self.advance(duration);
        }
    }

    /// Deterministic LCG randomness.
    pub struct MockRandom {
        pub state: u64,
    }

    impl Default for MockRandom {
        fn default() -> Self {
            Self { state: 12345 }
        }
    }

    impl MockRandom {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_seed(seed: u64) -> Self {
            Self { state: seed }
        }
    }

    impl Random for MockRandom {
        fn gen_range(&mut self, min: u64, max: u64) -> u64 {
            self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
            if max <= min {
                return min;
            }
            min + (self.state % (max - min))
        }
    }

    /// [`AppHandler`] that records everything it is given.
    #[derive(Default)]
    pub struct RecordingHandler {
        pub messages: Vec<Message>,
        pub acks: Vec<Message>,
        pub times: Vec<u32>,
    }

    impl RecordingHandler {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl AppHandler for RecordingHandler {
        fn on_message(&mut self, msg: &Message) {
            self.messages.push(msg.clone());
        }

        fn on_ack(&mut self, msg: &Message) {
            self.acks.push(msg.clone());
        }

        fn on_time(&mut self, seconds: u32) {
            self.times.push(seconds);
        }
    }
}
