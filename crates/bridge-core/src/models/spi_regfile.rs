//! Behavioral serial register file.
//!
//! Mode-0 slave: samples `mosi` on the rising edge of `sclk` and shifts the
//! next `miso` bit out on the falling edge. Bytes are interpreted as they
//! complete; a response byte chosen when byte `n` completes is shifted out
//! during byte `n + 1`. Partial bytes are dropped when chip-select is
//! released.

use std::collections::{BTreeMap, VecDeque};

use log::{debug, trace};

use crate::clock::Device;
use crate::spi::command::{
    OP_BULK_READ, OP_PACKED_ADDR, OP_PACKED_BEATS, OP_PACKED_DATA, OP_PACKED_ISSUE, OP_PACKED_LEN,
    REG_MASK,
};
use crate::spi::port::{SpiDevice, SpiPort};

/// Number of byte registers.
pub const REGISTER_COUNT: usize = 64;

/// A packed write as staged by the five packed-write frames.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct PackedWriteRecord {
    /// Target memory address.
    pub addr: u32,
    /// Announced beat count.
    pub beats: u16,
    /// Announced payload length in bytes.
    pub bytes: u32,
    /// Payload bytes received in the data frame.
    pub payload: Vec<u8>,
}

#[derive(Debug, Default)]
enum Parse {
    #[default]
    Command,
    WriteData {
        reg: u8,
    },
    ReadPad,
    Collect {
        opcode: u8,
        bytes: Vec<u8>,
        need: usize,
    },
    Stream {
        addr: u32,
        remaining: u16,
    },
    PackedData,
    Ignore,
}

/// 64 byte registers plus a sparse byte memory behind a serial port.
#[derive(Debug)]
pub struct SpiRegisterFile {
    port: SpiPort,
    sampled_sclk: bool,
    sampled_cs_n: bool,
    shift_in: u8,
    bits: u8,
    shift_out: u8,
    next_out: u8,
    parse: Parse,
    registers: [u8; REGISTER_COUNT],
    reads: [usize; REGISTER_COUNT],
    scripted: BTreeMap<u8, VecDeque<u8>>,
    memory: BTreeMap<u32, u8>,
    staged: PackedWriteRecord,
    issued: Vec<PackedWriteRecord>,
    frames: usize,
}

impl Default for SpiRegisterFile {
    fn default() -> Self {
        Self {
            port: SpiPort::default(),
            sampled_sclk: false,
            sampled_cs_n: true,
            shift_in: 0,
            bits: 0,
            shift_out: 0,
            next_out: 0,
            parse: Parse::Command,
            registers: [0; REGISTER_COUNT],
            reads: [0; REGISTER_COUNT],
            scripted: BTreeMap::new(),
            memory: BTreeMap::new(),
            staged: PackedWriteRecord::default(),
            issued: Vec::new(),
            frames: 0,
        }
    }
}

impl SpiRegisterFile {
    /// Creates a register file with every register and memory byte zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of register `reg`.
    #[must_use]
    pub const fn register(&self, reg: u8) -> u8 {
        self.registers[(reg & REG_MASK) as usize]
    }

    /// Overwrites register `reg`.
    pub fn set_register(&mut self, reg: u8, value: u8) {
        self.registers[usize::from(reg & REG_MASK)] = value;
    }

    /// Makes the next reads of `reg` return `values` in order before falling
    /// back to the register's stored value.
    pub fn script_reads(&mut self, reg: u8, values: impl IntoIterator<Item = u8>) {
        self.scripted
            .entry(reg & REG_MASK)
            .or_default()
            .extend(values);
    }

    /// Number of times register `reg` has been read over the wire.
    #[must_use]
    pub const fn read_count(&self, reg: u8) -> usize {
        self.reads[(reg & REG_MASK) as usize]
    }

    /// Reads `len` bytes of backing memory.
    #[must_use]
    pub fn peek(&self, addr: u32, len: usize) -> Vec<u8> {
        (addr..)
            .take(len)
            .map(|byte| self.memory.get(&byte).copied().unwrap_or(0))
            .collect()
    }

    /// Writes `bytes` into backing memory.
    pub fn poke(&mut self, addr: u32, bytes: &[u8]) {
        for (byte, value) in (addr..).zip(bytes) {
            self.memory.insert(byte, *value);
        }
    }

    /// Packed writes issued so far, oldest first.
    #[must_use]
    pub fn issued(&self) -> &[PackedWriteRecord] {
        &self.issued
    }

    /// Chip-select windows opened so far.
    #[must_use]
    pub const fn frames(&self) -> usize {
        self.frames
    }

    fn read_register(&mut self, reg: u8) -> u8 {
        let reg = reg & REG_MASK;
        self.reads[usize::from(reg)] += 1;
        self.scripted
            .get_mut(&reg)
            .and_then(VecDeque::pop_front)
            .unwrap_or(self.registers[usize::from(reg)])
    }

    fn memory_byte(&self, addr: u32) -> u8 {
        self.memory.get(&addr).copied().unwrap_or(0)
    }

    // Returns the byte to shift out next.
    fn on_byte(&mut self, byte: u8) -> u8 {
        trace!("regfile byte {byte:#04x}");
        match std::mem::take(&mut self.parse) {
            Parse::Command => self.on_command(byte),
            Parse::WriteData { reg } => {
                debug!("regfile write reg {reg:#04x} = {byte:#04x}");
                self.registers[usize::from(reg)] = byte;
                0
            }
            Parse::ReadPad => 0,
            Parse::Collect {
                opcode,
                mut bytes,
                need,
            } => {
                bytes.push(byte);
                if bytes.len() < need {
                    self.parse = Parse::Collect {
                        opcode,
                        bytes,
                        need,
                    };
                    0
                } else {
                    self.on_collected(opcode, &bytes)
                }
            }
            Parse::Stream { addr, remaining } => {
                if remaining == 0 {
                    self.parse = Parse::Ignore;
                    return 0;
                }
                self.parse = Parse::Stream {
                    addr: addr.wrapping_add(1),
                    remaining: remaining - 1,
                };
                self.memory_byte(addr)
            }
            Parse::PackedData => {
                self.staged.payload.push(byte);
                self.parse = Parse::PackedData;
                0
            }
            Parse::Ignore => {
                self.parse = Parse::Ignore;
                0
            }
        }
    }

    fn on_command(&mut self, byte: u8) -> u8 {
        let collect = |need| Parse::Collect {
            opcode: byte,
            bytes: Vec::with_capacity(need),
            need,
        };
        match byte {
            0x00..=0x3F => {
                self.parse = Parse::ReadPad;
                self.read_register(byte)
            }
            0x80..=0xBF => {
                self.parse = Parse::WriteData {
                    reg: byte & REG_MASK,
                };
                0
            }
            OP_BULK_READ => {
                self.parse = collect(6);
                0
            }
            OP_PACKED_ADDR | OP_PACKED_LEN => {
                self.parse = collect(4);
                0
            }
            OP_PACKED_BEATS => {
                self.parse = collect(2);
                0
            }
            OP_PACKED_DATA => {
                self.staged.payload.clear();
                self.parse = Parse::PackedData;
                0
            }
            OP_PACKED_ISSUE => {
                self.issue();
                self.parse = Parse::Ignore;
                0
            }
            _ => {
                debug!("regfile ignoring unknown command {byte:#04x}");
                self.parse = Parse::Ignore;
                0
            }
        }
    }

    fn on_collected(&mut self, opcode: u8, bytes: &[u8]) -> u8 {
        self.parse = Parse::Ignore;
        match (opcode, bytes) {
            (OP_BULK_READ, [a0, a1, a2, a3, c0, c1]) => {
                let addr = u32::from_le_bytes([*a0, *a1, *a2, *a3]);
                let count = u16::from_le_bytes([*c0, *c1]);
                debug!("regfile bulk read addr={addr:#x} count={count}");
                if count == 0 {
                    return 0;
                }
                self.parse = Parse::Stream {
                    addr: addr.wrapping_add(1),
                    remaining: count - 1,
                };
                self.memory_byte(addr)
            }
            (OP_PACKED_ADDR, [a0, a1, a2, a3]) => {
                self.staged.addr = u32::from_le_bytes([*a0, *a1, *a2, *a3]);
                0
            }
            (OP_PACKED_BEATS, [b0, b1]) => {
                self.staged.beats = u16::from_le_bytes([*b0, *b1]);
                0
            }
            (OP_PACKED_LEN, [l0, l1, l2, l3]) => {
                self.staged.bytes = u32::from_le_bytes([*l0, *l1, *l2, *l3]);
                0
            }
            _ => 0,
        }
    }

    fn issue(&mut self) {
        let record = self.staged.clone();
        debug!(
            "regfile packed write addr={:#x} beats={} bytes={}",
            record.addr,
            record.beats,
            record.payload.len()
        );
        self.poke(record.addr, &record.payload);
        self.issued.push(record);
    }
}

impl Device for SpiRegisterFile {
    fn eval(&mut self) {
        let cs_n = self.port.cs_n.is_high();
        let sclk = self.port.sclk.is_high();

        if cs_n != self.sampled_cs_n {
            self.shift_in = 0;
            self.bits = 0;
            self.shift_out = 0;
            self.next_out = 0;
            self.parse = Parse::Command;
            self.port.miso.set(false);
            if !cs_n {
                self.frames += 1;
            }
            trace!("regfile {} -> {cs_n}", self.port.cs_n.name());
        }

        if !cs_n && sclk != self.sampled_sclk {
            if sclk {
                self.shift_in = (self.shift_in << 1) | u8::from(self.port.mosi.is_high());
                self.bits += 1;
                if self.bits == 8 {
                    let byte = self.shift_in;
                    self.next_out = self.on_byte(byte);
                    self.shift_in = 0;
                    self.bits = 0;
                }
            } else {
                if self.bits == 0 {
                    self.shift_out = self.next_out;
                    self.next_out = 0;
                } else {
                    self.shift_out <<= 1;
                }
                self.port.miso.set(self.shift_out & 0x80 != 0);
            }
        }

        self.sampled_cs_n = cs_n;
        self.sampled_sclk = sclk;
    }

    fn set_clock(&mut self, _high: bool) {}
}

impl SpiDevice for SpiRegisterFile {
    fn spi_port(&mut self) -> &mut SpiPort {
        &mut self.port
    }
}
