//! Cycles spent per framed-bus round trip under different back-pressure
//! patterns, printed as a table.

use bridge_core::{AxiConfig, AxiMaster, AxiMemory, Clock, ReadyPattern, Resp};
use log as _;
use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;

const TRANSFER_BYTES: usize = 4096;
const BASE_ADDR: u64 = 0x0001_0008;

#[allow(clippy::cast_possible_truncation)]
fn measure(pattern: ReadyPattern, latency: u64) -> (u64, u64) {
    let memory = AxiMemory::new()
        .with_ready_pattern(pattern)
        .with_latency(latency);
    let mut clock = Clock::new(memory);
    let master = clock.attach(AxiMaster::new(AxiConfig::default()));
    let payload: Vec<u8> = (0..TRANSFER_BYTES).map(|index| (index % 251) as u8).collect();

    let start = clock.cycles();
    let written = master
        .write(&mut clock, 0, BASE_ADDR, &payload)
        .expect("tag 0 is free");
    let write_cycles = clock.cycles() - start;

    let start = clock.cycles();
    let read = master
        .read(&mut clock, 0, BASE_ADDR, TRANSFER_BYTES)
        .expect("tag 0 is free");
    let read_cycles = clock.cycles() - start;

    assert_eq!(written.resp, Resp::Okay);
    assert_eq!(read.data, payload, "round trip mismatch for {pattern:?}");
    (write_cycles, read_cycles)
}

fn main() {
    let cases = [
        ("always", ReadyPattern::Always, 0),
        ("always+lat8", ReadyPattern::Always, 8),
        ("every-2nd", ReadyPattern::EveryNth(2), 0),
        ("every-4th", ReadyPattern::EveryNth(4), 0),
        ("lfsr", ReadyPattern::Lfsr(0xACE1), 0),
    ];

    println!("{TRANSFER_BYTES} bytes at {BASE_ADDR:#x} (crosses a page boundary)");
    println!("{:<12} {:>12} {:>12}", "pattern", "write cyc", "read cyc");
    for (name, pattern, latency) in cases {
        let (write, read) = measure(pattern, latency);
        println!("{name:<12} {write:>12} {read:>12}");
    }
}
