//! Serial adapter suite: pin-exact frames, polling reads, bulk and packed
//! transfers, reset behavior and the threaded client/stepper split.

#![allow(clippy::pedantic, clippy::nursery, clippy::too_many_lines)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use bridge_core::models::PackedWriteRecord;
use bridge_core::{
    Attached, Clock, Device, EdgeObserver, SpiBridge, SpiCommand, SpiConfig, SpiDevice,
    SpiMaster, SpiPort, SpiRegisterFile, SpiReply, SpiResult,
};
use log as _;
use proptest as _;
use rstest::rstest;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;

const STEP_BUDGET: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pins {
    cs_n: bool,
    sclk: bool,
    mosi: bool,
}

const RELEASED: Pins = Pins {
    cs_n: true,
    sclk: false,
    mosi: false,
};

/// Register file that records every change of the bridge-driven pins.
struct Traced {
    inner: SpiRegisterFile,
    trace: Vec<Pins>,
}

impl Traced {
    fn new(inner: SpiRegisterFile) -> Self {
        Self {
            inner,
            trace: Vec::new(),
        }
    }

    /// Bits sampled on each rising `sclk` edge, grouped per chip-select window.
    fn frames(&self) -> Vec<Vec<bool>> {
        let mut frames = Vec::new();
        let mut current: Option<Vec<bool>> = None;
        let mut previous = RELEASED;

        for pins in &self.trace {
            if previous.cs_n && !pins.cs_n {
                current = Some(Vec::new());
            }
            if let Some(bits) = current.as_mut() {
                if !previous.sclk && pins.sclk {
                    bits.push(pins.mosi);
                }
            }
            if !previous.cs_n && pins.cs_n {
                assert!(!pins.sclk, "chip select released with sclk high");
                frames.extend(current.take());
            }
            previous = *pins;
        }
        frames
    }
}

impl Device for Traced {
    fn eval(&mut self) {
        self.inner.eval();
        let port = self.inner.spi_port();
        let pins = Pins {
            cs_n: port.cs_n.is_high(),
            sclk: port.sclk.is_high(),
            mosi: port.mosi.is_high(),
        };
        if self.trace.last().copied().unwrap_or(RELEASED) != pins {
            self.trace.push(pins);
        }
    }

    fn set_clock(&mut self, high: bool) {
        self.inner.set_clock(high);
    }
}

impl SpiDevice for Traced {
    fn spi_port(&mut self) -> &mut SpiPort {
        self.inner.spi_port()
    }
}

fn bits_of(bytes: &[u8]) -> Vec<bool> {
    bytes
        .iter()
        .flat_map(|byte| (0..8).rev().map(move |bit| (byte >> bit) & 1 != 0))
        .collect()
}

struct Rig {
    clock: Clock<Traced>,
    bridge: Arc<SpiBridge>,
    master: Attached<SpiMaster>,
}

impl Rig {
    fn new(device: SpiRegisterFile) -> Self {
        Self::with_config(device, SpiConfig::default())
    }

    fn with_config(device: SpiRegisterFile, config: SpiConfig) -> Self {
        let bridge = Arc::new(SpiBridge::new(config));
        let mut clock = Clock::new(Traced::new(device));
        let master = clock.attach(SpiMaster::new(Arc::clone(&bridge)));
        Self {
            clock,
            bridge,
            master,
        }
    }

    fn device(&self) -> &SpiRegisterFile {
        &self.clock.device().inner
    }

    fn run(&mut self, command: SpiCommand) -> SpiReply {
        let returns_payload = command.returns_payload();
        self.bridge.submit(command).expect("valid command");
        for _ in 0..STEP_BUDGET {
            if let Some(result) = self.bridge.try_result() {
                let payload = if returns_payload {
                    self.bridge.try_bulk().expect("payload precedes result")
                } else {
                    Vec::new()
                };
                return SpiReply { result, payload };
            }
            self.clock.step();
        }
        panic!("command did not complete within {STEP_BUDGET} cycles");
    }
}

#[test]
fn register_write_produces_the_exact_pin_sequence() {
    let mut rig = Rig::new(SpiRegisterFile::new());
    let reply = rig.run(SpiCommand::WriteReg {
        addr: 0x05,
        data: 0x42,
    });

    assert_eq!(reply.result, SpiResult::success(0));
    assert_eq!(rig.device().register(0x05), 0x42);

    let frames = rig.clock.device().frames();
    assert_eq!(frames.len(), 1);
    let mut expected = bits_of(&[0x85, 0x42]);
    expected.extend([false, false]);
    assert_eq!(frames[0], expected);

    assert_eq!(rig.clock.device().trace.first().map(|pins| pins.cs_n), Some(false));
    assert_eq!(rig.clock.device().trace.last().copied(), Some(RELEASED));
    assert!(rig.clock.device_mut().spi_port().is_released());
    assert!(rig.master.borrow().is_idle());
}

#[rstest]
#[case::no_tail(0)]
#[case::default_tail(2)]
#[case::long_tail(5)]
fn trailing_toggles_follow_configuration(#[case] trailing_toggles: u32) {
    let config = SpiConfig {
        trailing_toggles,
        ..SpiConfig::default()
    };
    let mut rig = Rig::with_config(SpiRegisterFile::new(), config);
    rig.run(SpiCommand::WriteReg {
        addr: 0x01,
        data: 0xFF,
    });

    let frames = rig.clock.device().frames();
    assert_eq!(frames[0].len(), 16 + trailing_toggles as usize);
    assert!(frames[0][16..].iter().all(|bit| !bit));
    assert_eq!(rig.device().register(0x01), 0xFF);
}

#[test]
fn register_read_returns_the_second_byte() {
    let mut device = SpiRegisterFile::new();
    device.set_register(0x21, 0x9C);
    let mut rig = Rig::new(device);

    let reply = rig.run(SpiCommand::ReadReg { addr: 0x21 });
    assert_eq!(reply.result, SpiResult::success(0x9C));

    let frames = rig.clock.device().frames();
    assert_eq!(frames[0][..16], bits_of(&[0x21, 0x00]));
}

#[test]
fn polling_read_succeeds_on_the_third_attempt() {
    let mut device = SpiRegisterFile::new();
    device.script_reads(0x03, [0x1, 0x1, 0x7]);
    let mut rig = Rig::new(device);

    let reply = rig.run(SpiCommand::PollReg {
        addr: 0x03,
        expected: 0x7,
        attempts: 3,
    });

    assert_eq!(reply.result, SpiResult::success(0x7));
    assert_eq!(rig.device().read_count(0x03), 3);
    assert_eq!(rig.clock.device().frames().len(), 3);
}

#[test]
fn polling_read_fails_when_attempts_run_out() {
    let mut device = SpiRegisterFile::new();
    device.script_reads(0x03, [0x1, 0x1, 0x1, 0x7]);
    let mut rig = Rig::new(device);

    let reply = rig.run(SpiCommand::PollReg {
        addr: 0x03,
        expected: 0x7,
        attempts: 3,
    });

    assert!(!reply.result.ok);
    assert_eq!(reply.result.value, 0x1);
    assert_eq!(rig.device().read_count(0x03), 3);
}

#[test]
fn polling_read_with_no_attempts_fails_without_a_frame() {
    let mut rig = Rig::new(SpiRegisterFile::new());
    let reply = rig.run(SpiCommand::PollReg {
        addr: 0x03,
        expected: 0,
        attempts: 0,
    });
    assert_eq!(reply.result, SpiResult::failure(0));
    assert!(rig.clock.device().frames().is_empty());
}

#[test]
fn sixteen_bit_registers_use_one_frame() {
    let mut rig = Rig::new(SpiRegisterFile::new());
    let write = rig.run(SpiCommand::WriteReg16 {
        addr: 0x10,
        data: 0xBEEF,
    });
    assert_eq!(write.result, SpiResult::success(0));
    assert_eq!(rig.device().register(0x10), 0xEF);
    assert_eq!(rig.device().register(0x11), 0xBE);

    let read = rig.run(SpiCommand::ReadReg16 { addr: 0x10 });
    assert_eq!(read.result, SpiResult::success(0xBEEF));
    assert_eq!(rig.clock.device().frames().len(), 2);
}

#[rstest]
#[case::empty(0)]
#[case::one(1)]
#[case::several(37)]
fn bulk_read_returns_count_and_payload(#[case] count: u16) {
    let data: Vec<u8> = (0..count).map(|index| index as u8 ^ 0x5A).collect();
    let mut device = SpiRegisterFile::new();
    device.poke(0x0001_0000, &data);
    let mut rig = Rig::new(device);

    let reply = rig.run(SpiCommand::BulkRead {
        addr: 0x0001_0000,
        count,
    });

    assert_eq!(reply.result, SpiResult::success(u32::from(count)));
    assert_eq!(reply.payload, data);
}

#[test]
fn packed_write_runs_five_stages_then_issues() {
    let payload: Vec<u8> = (0..48).collect();
    let mut rig = Rig::new(SpiRegisterFile::new());

    let reply = rig.run(SpiCommand::PackedWrite {
        addr: 0x8000,
        payload: payload.clone(),
    });

    assert_eq!(reply.result, SpiResult::success(0));
    assert_eq!(rig.clock.device().frames().len(), 5);
    assert_eq!(
        rig.device().issued(),
        [PackedWriteRecord {
            addr: 0x8000,
            beats: 3,
            bytes: 48,
            payload: payload.clone(),
        }]
    );
    assert_eq!(rig.device().peek(0x8000, 48), payload);
}

#[test]
fn commands_complete_one_at_a_time_in_submission_order() {
    let mut device = SpiRegisterFile::new();
    device.set_register(0x02, 0x77);
    let mut rig = Rig::new(device);

    rig.bridge
        .submit(SpiCommand::WriteReg {
            addr: 0x01,
            data: 0x11,
        })
        .expect("valid command");
    rig.bridge
        .submit(SpiCommand::ReadReg { addr: 0x02 })
        .expect("valid command");
    rig.bridge
        .submit(SpiCommand::ReadReg { addr: 0x01 })
        .expect("valid command");

    let mut results = Vec::new();
    for _ in 0..STEP_BUDGET {
        if let Some(result) = rig.bridge.try_result() {
            results.push(result);
            if results.len() == 3 {
                break;
            }
        }
        rig.clock.step();
    }

    assert_eq!(
        results,
        [
            SpiResult::success(0),
            SpiResult::success(0x77),
            SpiResult::success(0x11)
        ]
    );
    assert_eq!(rig.clock.device().frames().len(), 3);
    assert_eq!(rig.master.borrow().completed(), 3);
}

#[test]
fn reset_is_idempotent_and_restores_fresh_behavior() {
    let write = SpiCommand::WriteReg {
        addr: 0x05,
        data: 0x42,
    };

    let mut fresh = Rig::new(SpiRegisterFile::new());
    fresh.run(write.clone());
    let fresh_trace = fresh.clock.device().trace.clone();

    let mut rig = Rig::new(SpiRegisterFile::new());
    rig.bridge.reset();
    rig.bridge.reset();
    rig.clock.step();
    assert!(rig.master.borrow().is_idle());
    assert_eq!(rig.bridge.pending(), 0);

    rig.bridge
        .submit(SpiCommand::ReadReg { addr: 0x09 })
        .expect("valid command");
    rig.bridge
        .submit(SpiCommand::ReadReg { addr: 0x0A })
        .expect("valid command");
    rig.clock.run(8);
    assert!(!rig.master.borrow().is_idle());

    rig.bridge.reset();
    rig.bridge.reset();
    rig.clock.step();
    assert!(rig.master.borrow().is_idle());
    assert_eq!(rig.bridge.pending(), 0);
    assert!(rig.clock.device_mut().spi_port().is_released());

    rig.clock.run(100);
    assert_eq!(rig.bridge.try_result(), None);
    assert_eq!(rig.master.borrow().completed(), 0);

    rig.clock.device_mut().trace.clear();
    let reply = rig.run(write);
    assert_eq!(reply.result, SpiResult::success(0));
    assert_eq!(rig.clock.device().trace, fresh_trace);
    assert_eq!(rig.device().register(0x05), 0x42);
}

#[test]
fn client_threads_block_while_a_separate_thread_steps() {
    let bridge = Arc::new(SpiBridge::new(SpiConfig::default()));
    let stop = Arc::new(AtomicBool::new(false));

    let stepper = {
        let bridge = Arc::clone(&bridge);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut clock = Clock::new(SpiRegisterFile::new());
            let _master = clock.attach(SpiMaster::new(bridge));
            while !stop.load(Ordering::Acquire) {
                clock.step();
            }
            clock.into_device()
        })
    };

    let write = bridge
        .transact(SpiCommand::WriteReg {
            addr: 0x3F,
            data: 0xA5,
        })
        .expect("valid command");
    assert_eq!(write.result, SpiResult::success(0));

    let read = bridge
        .transact(SpiCommand::ReadReg { addr: 0x3F })
        .expect("valid command");
    assert_eq!(read.result, SpiResult::success(0xA5));
    assert!(read.payload.is_empty());

    bridge
        .submit(SpiCommand::ReadReg { addr: 0x3F })
        .expect("valid command");
    assert_eq!(bridge.wait_result_polling(), SpiResult::success(0xA5));

    stop.store(true, Ordering::Release);
    let device = stepper.join().expect("stepper thread");
    assert_eq!(device.register(0x3F), 0xA5);
    assert_eq!(device.read_count(0x3F), 2);
}

/// Wraps the state machine and records after how many invocations each
/// command was delivered.
struct Counted {
    master: SpiMaster,
    calls: u64,
    delivered_at: Vec<u64>,
}

impl Counted {
    fn call<D: SpiDevice>(&mut self, device: &mut D) {
        let before = self.master.completed();
        self.master.advance(device);
        self.calls += 1;
        if self.master.completed() > before {
            self.delivered_at.push(self.calls);
        }
    }
}

impl<D: SpiDevice> EdgeObserver<D> for Counted {
    fn on_rising(&mut self, device: &mut D) {
        self.call(device);
    }

    fn on_falling(&mut self, device: &mut D) {
        self.call(device);
    }
}

/// Invocations from dequeue to delivery: one idle call, then per frame a
/// select call, the setup calls, one load call plus 16 shift calls per byte
/// (the load call is the whole inter-byte gap), two calls per trailing
/// toggle and a deselect call.
fn invocations(config: &SpiConfig, frame_bytes: &[u64]) -> u64 {
    1 + frame_bytes
        .iter()
        .map(|bytes| {
            1 + u64::from(config.setup_half_cycles)
                + 17 * bytes
                + 2 * u64::from(config.trailing_toggles)
                + 1
        })
        .sum::<u64>()
}

#[rstest]
#[case::defaults(1, 2)]
#[case::no_setup_no_tail(0, 0)]
#[case::long_setup(3, 5)]
fn every_half_cycle_advances_exactly_one_state(
    #[case] setup_half_cycles: u32,
    #[case] trailing_toggles: u32,
) {
    let config = SpiConfig {
        setup_half_cycles,
        trailing_toggles,
        ..SpiConfig::default()
    };
    let bridge = Arc::new(SpiBridge::new(config));
    let mut device = SpiRegisterFile::new();
    device.script_reads(0x03, [0x01, 0x07]);
    let mut clock = Clock::new(device);
    let counted = clock.attach(Counted {
        master: SpiMaster::new(Arc::clone(&bridge)),
        calls: 0,
        delivered_at: Vec::new(),
    });

    let commands = [
        (SpiCommand::WriteReg { addr: 0x01, data: 0x11 }, vec![2]),
        (SpiCommand::ReadReg { addr: 0x01 }, vec![2]),
        (SpiCommand::WriteReg16 { addr: 0x10, data: 0xBEEF }, vec![4]),
        (SpiCommand::ReadReg16 { addr: 0x10 }, vec![4]),
        (SpiCommand::BulkRead { addr: 0x100, count: 3 }, vec![7 + 3]),
        (
            SpiCommand::PollReg {
                addr: 0x03,
                expected: 0x07,
                attempts: 3,
            },
            vec![2, 2],
        ),
        (
            SpiCommand::PackedWrite {
                addr: 0x200,
                payload: vec![0x5A; 16],
            },
            vec![5, 3, 5, 17, 1],
        ),
    ];
    for (command, _) in &commands {
        bridge.submit(command.clone()).expect("valid command");
    }

    for _ in 0..STEP_BUDGET {
        if counted.borrow().delivered_at.len() == commands.len() {
            break;
        }
        clock.step();
    }

    let delivered_at = counted.borrow().delivered_at.clone();
    assert_eq!(delivered_at.len(), commands.len());
    let mut previous = 0;
    for ((command, frames), at) in commands.iter().zip(delivered_at) {
        assert_eq!(
            at - previous,
            invocations(&config, frames),
            "invocations for {command:?}"
        );
        previous = at;
    }
}

#[test]
fn register_write_takes_twenty_one_cycles_with_defaults() {
    let mut rig = Rig::new(SpiRegisterFile::new());
    rig.bridge
        .submit(SpiCommand::WriteReg {
            addr: 0x05,
            data: 0x42,
        })
        .expect("valid command");

    // idle + select + setup + 2 x (load + 16 shifts) + 4 tail + deselect = 42 half-cycles
    rig.clock.run(20);
    assert_eq!(rig.bridge.try_result(), None);
    rig.clock.step();
    assert_eq!(rig.bridge.try_result(), Some(SpiResult::success(0)));
}
