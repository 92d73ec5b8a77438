//! In-memory device used by the high-level tests
//!
//! [`FakeTransport`] stores every byte written to it and records each call,
//! so tests can check both the resulting device memory and the order of
//! accesses. It answers mailbox commands and replays boot status sequences.

use std::collections::{BTreeMap, VecDeque};

use embedded_hal_mock::eh1::delay::NoopDelay;

use crate::{
    configs::{MAILBOX_LINK_SIZE, NUM_LINKS},
    image::{ARCHIVE_FORMAT_REV, ARCHIVE_MAGIC, IMAGE_HEADER_LEN},
    ll::{self, Transport},
};

use super::{Adrv904x, RADIO_CPU_READY};

/// SDK data address published by the fake firmware
pub const SDK_DATA: u32 = 0x8000_1000;

/// Checksum stored in the archive header of test images
pub const IMAGE_XSUM: u32 = 0x0000_5A5A;

/// A fresh handle on `fake`
pub fn device(fake: FakeTransport) -> Adrv904x<FakeTransport, NoopDelay> {
    // Ignored if another test got there first
    let _ = env_logger::builder().is_test(true).try_init();

    Adrv904x::new(fake, NoopDelay::new())
}

/// A handle on `fake` that already loaded an image
pub fn loaded_device(fake: FakeTransport) -> Adrv904x<FakeTransport, NoopDelay> {
    let mut adrv = device(fake);
    adrv.state.mark_dfe_cpu_loaded();
    adrv
}

/// A valid image of `total_len` bytes
pub fn build_image(total_len: usize) -> Vec<u8> {
    build_image_with(total_len, ARCHIVE_MAGIC, ARCHIVE_FORMAT_REV)
}

/// An image with a correct checksum and the given archive header fields
pub fn build_image_with(total_len: usize, magic: u32, format_rev: u32) -> Vec<u8> {
    assert!(total_len >= IMAGE_HEADER_LEN);

    let mut contents = Vec::with_capacity(total_len - 4);
    contents.extend_from_slice(&magic.to_le_bytes());
    contents.extend_from_slice(&format_rev.to_le_bytes());
    contents.extend_from_slice(&IMAGE_XSUM.to_le_bytes());
    contents.extend((0..total_len - IMAGE_HEADER_LEN).map(|i| (i * 7 + 3) as u8));

    let mut image = crc32fast::hash(&contents).to_le_bytes().to_vec();
    image.extend_from_slice(&contents);
    image
}

/// A call made on the fake
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Event {
    RegisterWrite { addr: u32, value: u32, mask: u32 },
    RegisterRead { addr: u32 },
    BytesWrite { addr: u32, len: usize },
    BytesRead { addr: u32, len: usize },
    StreamingEnter,
    StreamingExit,
}

#[derive(Debug)]
pub struct FakeError;

#[derive(Clone, Debug)]
struct Response {
    status: u16,
    code: u32,
    payload: Vec<u8>,
}

#[derive(Debug)]
pub struct FakeTransport {
    memory: BTreeMap<u32, u8>,
    events: Vec<Event>,
    calls: usize,
    streaming: bool,
    enters: usize,
    exits: usize,
    boot_sequence: VecDeque<u8>,
    response: Response,
    last_request: Vec<u8>,
    streaming_writes: Vec<(u32, usize)>,

    /// Added to the transaction id of every response
    pub tid_offset: u16,
    /// Fail every read
    pub fail_all_reads: bool,
    /// Fail the streaming write after this many succeeded
    pub fail_streaming_write: Option<usize>,
    /// Fail every exit from streaming mode
    pub fail_streaming_exit: bool,
}

impl FakeTransport {
    /// A device whose firmware published [`SDK_DATA`], with the radio CPU
    /// up and every command answered successfully
    pub fn new() -> Self {
        let mut fake = FakeTransport {
            memory: BTreeMap::new(),
            events: Vec::new(),
            calls: 0,
            streaming: false,
            enters: 0,
            exits: 0,
            boot_sequence: VecDeque::new(),
            response: Response {
                status: 0,
                code: 0,
                payload: Vec::new(),
            },
            last_request: Vec::new(),
            streaming_writes: Vec::new(),
            tid_offset: 0,
            fail_all_reads: false,
            fail_streaming_write: None,
            fail_streaming_exit: false,
        };

        for (id, byte) in ll::SCRATCH_SDK_DATA_ADDR.iter().zip(SDK_DATA.to_le_bytes()) {
            fake.set_bytes(scratch(*id), &[byte]);
        }
        fake.set_bytes(scratch(ll::SCRATCH_CPU0_BOOT_STATUS), &[RADIO_CPU_READY]);

        fake
    }

    /// Values returned by successive reads of the DFE boot status
    ///
    /// The last one sticks.
    pub fn boot_sequence(&mut self, statuses: &[u8]) {
        self.boot_sequence = statuses.iter().copied().collect();
    }

    /// How every following command is answered
    pub fn respond_with(&mut self, status: u16, code: u32, payload: &[u8]) {
        self.response = Response {
            status,
            code,
            payload: payload.to_vec(),
        };
    }

    pub fn set_bytes(&mut self, addr: u32, data: &[u8]) {
        for (addr, byte) in (addr..).zip(data) {
            self.memory.insert(addr, *byte);
        }
    }

    pub fn set_word(&mut self, addr: u32, value: u32) {
        self.set_bytes(addr, &value.to_le_bytes());
    }

    pub fn byte(&self, addr: u32) -> u8 {
        self.memory.get(&addr).copied().unwrap_or(0)
    }

    pub fn bytes(&self, addr: u32, len: usize) -> Vec<u8> {
        (addr..).take(len).map(|addr| self.byte(addr)).collect()
    }

    pub fn word(&self, addr: u32) -> u32 {
        let mut word = [0; 4];
        word.copy_from_slice(&self.bytes(addr, 4));
        u32::from_le_bytes(word)
    }

    /// Last request written to any mailbox, or nothing
    pub fn mailbox_request(&self) -> &[u8] {
        &self.last_request
    }

    /// Body chunks written in streaming mode, as address and length
    pub fn streaming_writes(&self) -> &[(u32, usize)] {
        &self.streaming_writes
    }

    /// Number of reads starting exactly at `addr`
    pub fn reads_of(&self, addr: u32) -> usize {
        self.events
            .iter()
            .filter(|event| match event {
                Event::RegisterRead { addr: a } | Event::BytesRead { addr: a, .. } => *a == addr,
                _ => false,
            })
            .count()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Number of transport calls, reads and writes alike
    pub fn calls(&self) -> usize {
        self.calls
    }

    pub fn enters(&self) -> usize {
        self.enters
    }

    pub fn exits(&self) -> usize {
        self.exits
    }

    fn record(&mut self, event: Event) {
        self.calls += 1;
        self.events.push(event);
    }

    fn sdk_data(&self) -> u32 {
        let mut addr = [0; 4];
        for (byte, id) in addr.iter_mut().zip(ll::SCRATCH_SDK_DATA_ADDR) {
            *byte = self.byte(scratch(id));
        }
        u32::from_le_bytes(addr)
    }

    fn mailbox(&self, link: usize) -> u32 {
        self.sdk_data() + ll::sdk_data::MAILBOX + (link * MAILBOX_LINK_SIZE) as u32
    }

    fn is_mailbox(&self, addr: u32) -> bool {
        let first = self.mailbox(0);
        (first..first + (NUM_LINKS * MAILBOX_LINK_SIZE) as u32).contains(&addr)
    }

    /// Answer the command waiting in the mailbox of `link`
    fn ring_doorbell(&mut self, link: usize) {
        let mailbox = self.mailbox(link);
        let request = self.bytes(mailbox, 4);
        let cmd_id = u16::from_le_bytes([request[0], request[1]]);
        let tid = u16::from_le_bytes([request[2], request[3]]).wrapping_add(self.tid_offset);

        let mut response = Vec::new();
        response.extend_from_slice(&cmd_id.to_le_bytes());
        response.extend_from_slice(&tid.to_le_bytes());
        response.extend_from_slice(&self.response.status.to_le_bytes());
        response.extend_from_slice(&self.response.code.to_le_bytes());
        response.extend_from_slice(&self.response.payload);

        self.set_bytes(mailbox, &response);
    }
}

impl Default for FakeTransport {
    fn default() -> Self {
        FakeTransport::new()
    }
}

fn scratch(id: u16) -> u32 {
    ll::SCRATCH_PAD_BASE + u32::from(id)
}

impl Transport for FakeTransport {
    type Error = FakeError;

    fn register_write(&mut self, addr: u32, value: u32, mask: u32) -> Result<(), FakeError> {
        self.record(Event::RegisterWrite { addr, value, mask });

        let word = (self.word(addr) & !mask) | (value & mask);
        self.set_word(addr, word);

        if addr == ll::A55_SPI0_COMMAND {
            self.ring_doorbell((value & mask) as usize % NUM_LINKS);
        }

        Ok(())
    }

    fn register_read(&mut self, addr: u32, mask: u32) -> Result<u32, FakeError> {
        self.record(Event::RegisterRead { addr });
        if self.fail_all_reads {
            return Err(FakeError);
        }

        Ok(self.word(addr) & mask)
    }

    fn bytes_write(&mut self, addr: u32, data: &[u8]) -> Result<(), FakeError> {
        self.record(Event::BytesWrite {
            addr,
            len: data.len(),
        });

        if self.streaming {
            if self.fail_streaming_write == Some(self.streaming_writes.len()) {
                return Err(FakeError);
            }
            if addr >= ll::DFE_CODE_START {
                self.streaming_writes.push((addr, data.len()));
            }
        }
        if self.is_mailbox(addr) {
            self.last_request = data.to_vec();
        }

        self.set_bytes(addr, data);

        Ok(())
    }

    fn bytes_read(&mut self, addr: u32, data: &mut [u8]) -> Result<(), FakeError> {
        self.record(Event::BytesRead {
            addr,
            len: data.len(),
        });
        if self.fail_all_reads {
            return Err(FakeError);
        }

        if addr == scratch(ll::SCRATCH_DFE_BOOT_STATUS) {
            let status = if self.boot_sequence.len() > 1 {
                self.boot_sequence.pop_front()
            } else {
                self.boot_sequence.front().copied()
            };
            if let Some(status) = status {
                self.memory.insert(addr, status);
            }
        }

        for (byte, addr) in data.iter_mut().zip(addr..) {
            *byte = self.byte(addr);
        }

        Ok(())
    }

    fn streaming_enter(&mut self) -> Result<(), FakeError> {
        self.record(Event::StreamingEnter);
        self.enters += 1;
        self.streaming = true;

        Ok(())
    }

    fn streaming_exit(&mut self) -> Result<(), FakeError> {
        self.record(Event::StreamingExit);
        if self.fail_streaming_exit {
            return Err(FakeError);
        }
        self.exits += 1;
        self.streaming = false;

        Ok(())
    }

    fn is_streaming(&self) -> bool {
        self.streaming
    }
}
