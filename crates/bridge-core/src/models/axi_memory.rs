//! Behavioral framed-bus memory.
//!
//! Stands in for a generated hardware model behind an AXI slave port. All
//! outputs are registered: handshakes are sampled and new outputs computed
//! only on the rising edge, so the values a master sees after `eval` on the
//! falling edge are exactly what the memory will sample next.

use std::collections::{BTreeMap, VecDeque};
use std::ops::Range;

use log::trace;

use crate::axi::packet::{AddrPacket, ReadPacket, Resp, WritePacket, WriteResponse};
use crate::axi::port::{AxiPort, AxiSlaveDevice};
use crate::clock::Device;
use crate::config::LINE_BYTES;

const LINE_MASK: u64 = LINE_BYTES as u64 - 1;
const LFSR_TAPS: u16 = 0xB400;

/// Back-pressure applied to the address and write-data `ready` signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ReadyPattern {
    /// Always ready.
    #[default]
    Always,
    /// Ready on one cycle out of every `n`.
    EveryNth(u32),
    /// Pseudo-random readiness from a 16-bit LFSR with the given seed.
    Lfsr(u16),
}

#[derive(Debug)]
struct OpenWrite {
    address: AddrPacket,
    beat: usize,
    resp: Resp,
}

#[derive(Debug)]
struct ReadJob {
    address: AddrPacket,
    beat: usize,
    ready_at: u64,
}

/// Sparse line-organized memory with an AXI slave port.
#[derive(Debug, Default)]
pub struct AxiMemory {
    port: AxiPort,
    clock: bool,
    sampled_clock: bool,
    cycle: u64,
    pattern: ReadyPattern,
    lfsr: u16,
    latency: u64,
    error_window: Option<Range<u64>>,
    lines: BTreeMap<u64, [u8; LINE_BYTES]>,
    writes: VecDeque<OpenWrite>,
    data: VecDeque<WritePacket>,
    responses: VecDeque<(WriteResponse, u64)>,
    reads: BTreeMap<u8, VecDeque<ReadJob>>,
    presenting: Option<u8>,
    last_served: Option<u8>,
}

impl AxiMemory {
    /// Creates an always-ready memory with zero response latency.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a back-pressure pattern to `awready`, `wready` and `arready`.
    #[must_use]
    pub fn with_ready_pattern(mut self, pattern: ReadyPattern) -> Self {
        self.pattern = pattern;
        if let ReadyPattern::Lfsr(seed) = pattern {
            self.lfsr = seed.max(1);
        }
        self
    }

    /// Delays every write response and first read beat by `cycles`.
    #[must_use]
    pub const fn with_latency(mut self, cycles: u64) -> Self {
        self.latency = cycles;
        self
    }

    /// Answers `SLVERR` for every beat whose address falls in `window`.
    ///
    /// Writes into the window are dropped; reads return zeroes.
    #[must_use]
    pub fn with_error_window(mut self, window: Range<u64>) -> Self {
        self.error_window = Some(window);
        self
    }

    /// Reads `len` bytes directly from backing storage.
    #[must_use]
    pub fn peek(&self, addr: u64, len: usize) -> Vec<u8> {
        (addr..)
            .take(len)
            .map(|byte| {
                self.lines
                    .get(&(byte & !LINE_MASK))
                    .map_or(0, |line| line[lane(byte)])
            })
            .collect()
    }

    /// Writes `bytes` directly into backing storage.
    pub fn poke(&mut self, addr: u64, bytes: &[u8]) {
        for (byte, value) in (addr..).zip(bytes) {
            self.lines.entry(byte & !LINE_MASK).or_default()[lane(byte)] = *value;
        }
    }

    /// Rising edges seen so far.
    #[must_use]
    pub const fn cycle(&self) -> u64 {
        self.cycle
    }

    fn faulted(&self, addr: u64) -> bool {
        self.error_window
            .as_ref()
            .is_some_and(|window| window.contains(&addr))
    }

    fn rising_edge(&mut self) {
        let port = &self.port;
        let address = port.aw_fire().then(|| port.sample_aw());
        let data = port.w_fire().then(|| port.sample_w());
        let read = port.ar_fire().then(|| port.sample_ar());
        let response_taken = port.b_fire();
        let beat_taken = port.r_fire();

        if response_taken {
            self.responses.pop_front();
        }
        if beat_taken {
            self.finish_presented_beat();
        }
        if let Some(address) = address {
            self.writes.push_back(OpenWrite {
                address,
                beat: 0,
                resp: Resp::Okay,
            });
        }
        if let Some(data) = data {
            self.data.push_back(data);
        }
        self.apply_writes();
        if let Some(address) = read {
            trace!("memory ar id={} addr={:#x}", address.id, address.addr);
            self.reads.entry(address.id).or_default().push_back(ReadJob {
                address,
                beat: 0,
                ready_at: self.cycle + self.latency,
            });
        }

        self.cycle += 1;
        self.drive_outputs();
    }

    fn apply_writes(&mut self) {
        while let (Some(open), Some(packet)) = (self.writes.front(), self.data.front()) {
            let addr = open.address.beat_address(open.beat);
            let packet = *packet;
            let resp = if self.faulted(addr) {
                Resp::SlvErr
            } else {
                let line = self.lines.entry(addr & !LINE_MASK).or_default();
                let lanes = packet.data.to_le_bytes();
                for (index, byte) in line.iter_mut().enumerate() {
                    if packet.strb & (1 << index) != 0 {
                        *byte = lanes[index];
                    }
                }
                Resp::Okay
            };
            self.data.pop_front();

            let Some(open) = self.writes.front_mut() else {
                break;
            };
            open.resp = open.resp.max(resp);
            open.beat += 1;
            if packet.last {
                let response = WriteResponse {
                    id: open.address.id,
                    resp: open.resp,
                };
                trace!("memory b id={} resp={:?}", response.id, response.resp);
                self.writes.pop_front();
                self.responses
                    .push_back((response, self.cycle + self.latency));
            }
        }
    }

    fn finish_presented_beat(&mut self) {
        let Some(id) = self.presenting.take() else {
            return;
        };
        let Some(queue) = self.reads.get_mut(&id) else {
            return;
        };
        if let Some(job) = queue.front_mut() {
            job.beat += 1;
            if job.beat == job.address.beats() {
                queue.pop_front();
            }
        }
        if queue.is_empty() {
            self.reads.remove(&id);
        }
    }

    fn next_ready(&mut self) -> [bool; 3] {
        match self.pattern {
            ReadyPattern::Always => [true; 3],
            ReadyPattern::EveryNth(n) => [self.cycle % u64::from(n.max(1)) == 0; 3],
            ReadyPattern::Lfsr(_) => {
                let carry = self.lfsr & 1;
                self.lfsr >>= 1;
                if carry != 0 {
                    self.lfsr ^= LFSR_TAPS;
                }
                [self.lfsr & 1 != 0, self.lfsr & 2 != 0, self.lfsr & 4 != 0]
            }
        }
    }

    // Next ID after the one served last whose head job has waited out the latency.
    fn pick_read_id(&self) -> Option<u8> {
        let ready = |(id, queue): (&u8, &VecDeque<ReadJob>)| {
            queue
                .front()
                .filter(|job| job.ready_at <= self.cycle)
                .map(|_| *id)
        };
        let after = self.last_served.map_or(0, |id| u16::from(id) + 1);
        self.reads
            .iter()
            .filter(|(id, _)| u16::from(**id) >= after)
            .find_map(ready)
            .or_else(|| self.reads.iter().find_map(ready))
    }

    fn drive_outputs(&mut self) {
        let [aw, w, ar] = self.next_ready();
        self.port.awready.set(aw);
        self.port.wready.set(w);
        self.port.arready.set(ar);

        let response = self
            .responses
            .front()
            .filter(|(_, ready_at)| *ready_at <= self.cycle)
            .map(|(response, _)| *response);
        self.port.drive_b(response.as_ref());

        if self.presenting.is_none() {
            self.presenting = self.pick_read_id();
            if self.presenting.is_some() {
                self.last_served = self.presenting;
            }
        }
        let beat = self.presenting.and_then(|id| {
            let job = self.reads.get(&id)?.front()?;
            let addr = job.address.beat_address(job.beat);
            let (data, resp) = if self.faulted(addr) {
                (0, Resp::SlvErr)
            } else {
                let line = self.lines.get(&(addr & !LINE_MASK)).copied();
                (line.map_or(0, u128::from_le_bytes), Resp::Okay)
            };
            Some(ReadPacket {
                id,
                data,
                resp,
                last: job.beat + 1 == job.address.beats(),
            })
        });
        self.port.drive_r(beat.as_ref());
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn lane(addr: u64) -> usize {
    (addr & LINE_MASK) as usize
}

impl Device for AxiMemory {
    fn eval(&mut self) {
        if self.clock && !self.sampled_clock {
            self.rising_edge();
        }
        self.sampled_clock = self.clock;
    }

    fn set_clock(&mut self, high: bool) {
        self.clock = high;
    }

    fn busy(&self) -> bool {
        !self.writes.is_empty()
            || !self.data.is_empty()
            || !self.responses.is_empty()
            || !self.reads.is_empty()
    }
}

impl AxiSlaveDevice for AxiMemory {
    fn axi_slave_port(&mut self) -> &mut AxiPort {
        &mut self.port
    }
}

#[cfg(test)]
mod tests {
    use super::{AxiMemory, ReadyPattern};
    use crate::axi::packet::{AddrPacket, WritePacket, BURST_INCR};
    use crate::clock::Device;

    fn rising(memory: &mut AxiMemory) {
        memory.set_clock(true);
        memory.eval();
        memory.eval();
        memory.set_clock(false);
        memory.eval();
    }

    #[test]
    fn poke_and_peek_cross_line_boundaries() {
        let mut memory = AxiMemory::new();
        memory.poke(0x0E, &[1, 2, 3, 4]);
        assert_eq!(memory.peek(0x0C, 8), [0, 0, 1, 2, 3, 4, 0, 0]);
    }

    #[test]
    fn only_one_edge_is_processed_per_rising_transition() {
        let mut memory = AxiMemory::new();
        rising(&mut memory);
        rising(&mut memory);
        assert_eq!(memory.cycle(), 2);
    }

    #[test]
    fn strobed_write_updates_only_enabled_lanes() {
        let mut memory = AxiMemory::new();
        memory.poke(0x20, &[0xEE; 16]);
        rising(&mut memory);

        let port = &mut memory.port;
        port.drive_aw(Some(&AddrPacket {
            id: 2,
            addr: 0x21,
            len: 0,
            size: 1,
            burst: BURST_INCR,
        }));
        port.drive_w(Some(&WritePacket {
            data: u128::from_le_bytes([0, 0xAA, 0xBB, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]),
            strb: 0b0110,
            last: true,
        }));
        rising(&mut memory);

        assert_eq!(memory.peek(0x20, 4), [0xEE, 0xAA, 0xBB, 0xEE]);
        assert!(memory.port.bvalid.is_high());
        assert_eq!(memory.port.bid.get(), 2);
    }

    #[test]
    fn every_nth_pattern_gates_ready() {
        let mut memory = AxiMemory::new().with_ready_pattern(ReadyPattern::EveryNth(3));
        let mut readiness = Vec::new();
        for _ in 0..6 {
            rising(&mut memory);
            readiness.push(memory.port.awready.is_high());
        }
        assert_eq!(readiness, [false, false, true, false, false, true]);
    }

    #[test]
    fn lfsr_pattern_is_neither_stuck_high_nor_low() {
        let mut memory = AxiMemory::new().with_ready_pattern(ReadyPattern::Lfsr(0xACE1));
        let mut high = 0;
        for _ in 0..64 {
            rising(&mut memory);
            if memory.port.wready.is_high() {
                high += 1;
            }
        }
        assert!((8..56).contains(&high), "wready high {high} of 64 cycles");
    }
}
