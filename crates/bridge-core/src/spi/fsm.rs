//! Serial-protocol state machine.
//!
//! The machine is stepped once per simulated half-cycle (it observes both
//! clock edges). Every command shares the idle state; from there a command
//! runs as a sequence of chip-select windows ("frames"), each of which goes
//! through the same phases:
//!
//! ```text
//! Idle -> Select -> Setup* -> (Load -> Shift x16)+ -> Tail* -> Deselect -+-> Idle
//!            ^                                                           |
//!            +------------------------ next frame -----------------------+
//! ```
//!
//! What a frame shifts out, what it keeps from the bytes shifted in and
//! whether another frame follows is decided by the command's job record.

use std::sync::Arc;

use log::{debug, trace, warn};

use crate::clock::EdgeObserver;
use crate::spi::command::{
    read_opcode, write_opcode, SpiCommand, SpiResult, BEAT_BYTES, OP_BULK_READ, OP_PACKED_ADDR,
    OP_PACKED_BEATS, OP_PACKED_DATA, OP_PACKED_ISSUE, OP_PACKED_LEN,
};
use crate::spi::port::SpiDevice;
use crate::spi::queue::SpiBridge;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PackedStage {
    Address,
    Beats,
    Length,
    Data,
    Issue,
}

impl PackedStage {
    const fn next(self) -> Option<Self> {
        match self {
            Self::Address => Some(Self::Beats),
            Self::Beats => Some(Self::Length),
            Self::Length => Some(Self::Data),
            Self::Data => Some(Self::Issue),
            Self::Issue => None,
        }
    }
}

/// Per-command progress across frames.
#[derive(Debug)]
enum Job {
    WriteReg { addr: u8, data: u8 },
    ReadReg { addr: u8 },
    Poll {
        addr: u8,
        expected: u8,
        attempts: u32,
        tried: u32,
    },
    BulkRead { addr: u32, count: u16 },
    Packed {
        addr: u32,
        payload: Vec<u8>,
        stage: PackedStage,
    },
    WriteReg16 { addr: u8, data: u16 },
    ReadReg16 { addr: u8 },
}

/// What happens after a frame's chip-select window closes.
enum FrameEnd {
    Again,
    Done(SpiResult, Option<Vec<u8>>),
}

impl Job {
    fn from_command(command: SpiCommand) -> Self {
        match command {
            SpiCommand::WriteReg { addr, data } => Self::WriteReg { addr, data },
            SpiCommand::ReadReg { addr } => Self::ReadReg { addr },
            SpiCommand::PollReg {
                addr,
                expected,
                attempts,
            } => Self::Poll {
                addr,
                expected,
                attempts,
                tried: 0,
            },
            SpiCommand::BulkRead { addr, count } => Self::BulkRead { addr, count },
            SpiCommand::PackedWrite { addr, payload } => Self::Packed {
                addr,
                payload,
                stage: PackedStage::Address,
            },
            SpiCommand::WriteReg16 { addr, data } => Self::WriteReg16 { addr, data },
            SpiCommand::ReadReg16 { addr } => Self::ReadReg16 { addr },
        }
    }

    /// Bytes shifted out during the current frame.
    fn frame(&self) -> Vec<u8> {
        match self {
            Self::WriteReg { addr, data } => vec![write_opcode(*addr), *data],
            Self::ReadReg { addr } | Self::Poll { addr, .. } => vec![read_opcode(*addr), 0],
            Self::BulkRead { addr, count } => {
                let mut frame = Vec::with_capacity(7 + usize::from(*count));
                frame.push(OP_BULK_READ);
                frame.extend_from_slice(&addr.to_le_bytes());
                frame.extend_from_slice(&count.to_le_bytes());
                frame.resize(frame.capacity(), 0);
                frame
            }
            Self::Packed {
                addr,
                payload,
                stage,
            } => packed_frame(*addr, payload, *stage),
            Self::WriteReg16 { addr, data } => {
                let [lo, hi] = data.to_le_bytes();
                vec![
                    write_opcode(*addr),
                    lo,
                    write_opcode(addr.wrapping_add(1)),
                    hi,
                ]
            }
            Self::ReadReg16 { addr } => {
                vec![read_opcode(*addr), 0, read_opcode(addr.wrapping_add(1)), 0]
            }
        }
    }

    /// Closes a frame given every byte shifted in during it.
    fn end_frame(&mut self, received: &[u8]) -> FrameEnd {
        match self {
            Self::WriteReg { .. } | Self::WriteReg16 { .. } => {
                FrameEnd::Done(SpiResult::success(0), None)
            }
            Self::ReadReg { .. } => FrameEnd::Done(SpiResult::success(u32::from(received[1])), None),
            Self::ReadReg16 { .. } => {
                let value = u16::from_le_bytes([received[1], received[3]]);
                FrameEnd::Done(SpiResult::success(u32::from(value)), None)
            }
            Self::Poll {
                addr,
                expected,
                attempts,
                tried,
            } => {
                let value = received[1];
                *tried += 1;
                if value == *expected {
                    debug!("poll reg {addr:#04x} matched after {tried} attempts");
                    FrameEnd::Done(SpiResult::success(u32::from(value)), None)
                } else if *tried >= *attempts {
                    warn!(
                        "poll reg {addr:#04x} gave up after {tried} attempts, last {value:#04x} expected {expected:#04x}"
                    );
                    FrameEnd::Done(SpiResult::failure(u32::from(value)), None)
                } else {
                    FrameEnd::Again
                }
            }
            Self::BulkRead { count, .. } => {
                let payload = received[7..].to_vec();
                FrameEnd::Done(SpiResult::success(u32::from(*count)), Some(payload))
            }
            Self::Packed { stage, .. } => match stage.next() {
                Some(next) => {
                    *stage = next;
                    FrameEnd::Again
                }
                None => FrameEnd::Done(SpiResult::success(0), None),
            },
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn packed_frame(addr: u32, payload: &[u8], stage: PackedStage) -> Vec<u8> {
    let mut frame = Vec::new();
    match stage {
        PackedStage::Address => {
            frame.push(OP_PACKED_ADDR);
            frame.extend_from_slice(&addr.to_le_bytes());
        }
        PackedStage::Beats => {
            frame.push(OP_PACKED_BEATS);
            frame.extend_from_slice(&((payload.len() / BEAT_BYTES) as u16).to_le_bytes());
        }
        PackedStage::Length => {
            frame.push(OP_PACKED_LEN);
            frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        }
        PackedStage::Data => {
            frame.reserve(1 + payload.len());
            frame.push(OP_PACKED_DATA);
            frame.extend_from_slice(payload);
        }
        PackedStage::Issue => frame.push(OP_PACKED_ISSUE),
    }
    frame
}

/// Pin-level phase within one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Select,
    Setup { remaining: u32 },
    Load,
    Shift { out: u8, input: u8, bit: u8, high: bool },
    Tail { remaining: u32 },
    Deselect,
}

#[derive(Debug)]
struct Active {
    epoch: u64,
    job: Job,
    frame: Vec<u8>,
    received: Vec<u8>,
    phase: Phase,
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Idle,
    Active(Box<Active>),
}

/// Bridge-side serial master, stepped from both clock edges.
#[derive(Debug)]
pub struct SpiMaster {
    bridge: Arc<SpiBridge>,
    state: State,
    completed: u64,
}

impl SpiMaster {
    /// Creates an idle master serving `bridge`'s submission queue.
    #[must_use]
    pub const fn new(bridge: Arc<SpiBridge>) -> Self {
        Self {
            bridge,
            state: State::Idle,
            completed: 0,
        }
    }

    /// True when no command is in flight.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        matches!(self.state, State::Idle)
    }

    /// Commands completed and delivered since construction.
    #[must_use]
    pub const fn completed(&self) -> u64 {
        self.completed
    }

    /// Drops any in-flight command and releases the pins.
    pub fn reset<D: SpiDevice>(&mut self, device: &mut D) {
        if let State::Active(active) = &self.state {
            debug!("spi abandoning {:?} at {:?}", active.job, active.phase);
        }
        self.state = State::Idle;
        device.spi_port().release();
        device.eval();
    }

    /// Performs one half-cycle invocation.
    pub fn advance<D: SpiDevice>(&mut self, device: &mut D) {
        let stale = matches!(&self.state, State::Active(active) if active.epoch != self.bridge.epoch());
        if stale {
            self.reset(device);
        }

        self.state = match std::mem::take(&mut self.state) {
            State::Idle => self.idle(device),
            State::Active(mut active) => {
                if self.step_active(&mut active, device) {
                    State::Active(active)
                } else {
                    State::Idle
                }
            }
        };
        device.eval();
    }

    fn idle<D: SpiDevice>(&mut self, device: &mut D) -> State {
        device.spi_port().release();
        let Some((epoch, command)) = self.bridge.next_command() else {
            return State::Idle;
        };
        debug!("spi start {command:?}");

        if let SpiCommand::PollReg { attempts: 0, .. } = command {
            warn!("poll with zero attempts fails without a frame");
            self.deliver(epoch, SpiResult::failure(0), None);
            return State::Idle;
        }

        let job = Job::from_command(command);
        State::Active(Box::new(Active {
            epoch,
            frame: job.frame(),
            job,
            received: Vec::new(),
            phase: Phase::Select,
        }))
    }

    // Returns false once the command has completed.
    fn step_active<D: SpiDevice>(&mut self, active: &mut Active, device: &mut D) -> bool {
        let setup = self.bridge.config().setup_half_cycles;
        let tail = self.bridge.config().trailing_toggles * 2;
        let port = device.spi_port();

        active.phase = match active.phase {
            Phase::Select => {
                port.cs_n.set(false);
                port.sclk.set(false);
                port.mosi.set(false);
                active.received.clear();
                if setup == 0 {
                    Phase::Load
                } else {
                    Phase::Setup { remaining: setup }
                }
            }
            Phase::Setup { remaining } if remaining > 1 => Phase::Setup {
                remaining: remaining - 1,
            },
            Phase::Setup { .. } => Phase::Load,
            // One call per byte and no other gap between bytes.
            Phase::Load => {
                let out = active.frame[active.received.len()];
                trace!("spi load {out:#04x}");
                Phase::Shift {
                    out,
                    input: 0,
                    bit: 0,
                    high: false,
                }
            }
            Phase::Shift {
                out,
                input,
                bit,
                high: false,
            } => {
                port.mosi.set(out & (0x80 >> bit) != 0);
                port.sclk.set(true);
                Phase::Shift {
                    out,
                    input,
                    bit,
                    high: true,
                }
            }
            Phase::Shift {
                out,
                input,
                bit,
                high: true,
            } => {
                let input = (input << 1) | u8::from(port.miso.is_high());
                port.sclk.set(false);
                if bit < 7 {
                    Phase::Shift {
                        out,
                        input,
                        bit: bit + 1,
                        high: false,
                    }
                } else {
                    trace!("spi shifted out {out:#04x} in {input:#04x}");
                    active.received.push(input);
                    if active.received.len() < active.frame.len() {
                        Phase::Load
                    } else if tail == 0 {
                        Phase::Deselect
                    } else {
                        Phase::Tail { remaining: tail }
                    }
                }
            }
            Phase::Tail { remaining } => {
                port.mosi.set(false);
                port.sclk.set(!port.sclk.is_high());
                if remaining > 1 {
                    Phase::Tail {
                        remaining: remaining - 1,
                    }
                } else {
                    Phase::Deselect
                }
            }
            Phase::Deselect => {
                port.release();
                let received = std::mem::take(&mut active.received);
                match active.job.end_frame(&received) {
                    FrameEnd::Again => {
                        active.frame = active.job.frame();
                        Phase::Select
                    }
                    FrameEnd::Done(result, payload) => {
                        debug!("spi done {:?} -> {result:?}", active.job);
                        self.deliver(active.epoch, result, payload);
                        return false;
                    }
                }
            }
        };
        true
    }

    fn deliver(&mut self, epoch: u64, result: SpiResult, payload: Option<Vec<u8>>) {
        if self.bridge.complete(epoch, result, payload) {
            self.completed += 1;
        }
    }
}

impl<D: SpiDevice> EdgeObserver<D> for SpiMaster {
    fn on_rising(&mut self, device: &mut D) {
        self.advance(device);
    }

    fn on_falling(&mut self, device: &mut D) {
        self.advance(device);
    }
}
