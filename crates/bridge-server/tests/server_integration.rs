//! Loopback socket sessions against the reference register file.

#![allow(clippy::pedantic, clippy::nursery)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};

use bridge_core::{Device, SpiConfig, SpiDevice, SpiPort, SpiRegisterFile};
use bridge_server::wire::{RESPONSE_BYTES, REJECTED_VALUE};
use bridge_server::{serve_one, CommandHeader, CommandKind, Response, ServerError};
use env_logger as _;
use log as _;
use proptest::prelude::*;
use rstest::rstest;
use thiserror as _;

struct Session {
    stream: TcpStream,
    server: JoinHandle<Result<u64, ServerError>>,
}

impl Session {
    fn start() -> Self {
        Self::start_with(SpiRegisterFile::new)
    }

    fn start_with<D, F>(make_device: F) -> Self
    where
        D: SpiDevice + 'static,
        F: FnOnce() -> D + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let addr = listener.local_addr().expect("local addr");
        let server =
            thread::spawn(move || serve_one(&listener, SpiConfig::default(), make_device));
        let stream = TcpStream::connect(addr).expect("connect");
        Self { stream, server }
    }

    fn send(&mut self, kind: CommandKind, addr: u32, data: u32, count: u32, payload: &[u8]) {
        self.send_raw(kind as u8, addr, data, count, payload);
    }

    fn send_raw(&mut self, kind: u8, addr: u32, data: u32, count: u32, payload: &[u8]) {
        let header = CommandHeader {
            kind,
            addr,
            data,
            count,
        };
        self.stream.write_all(&header.encode()).expect("send header");
        self.stream.write_all(payload).expect("send payload");
    }

    fn response(&mut self) -> Response {
        let mut bytes = [0; RESPONSE_BYTES];
        self.stream.read_exact(&mut bytes).expect("read response");
        Response::decode(&bytes)
    }

    fn bulk(&mut self, len: usize) -> Vec<u8> {
        let mut bytes = vec![0; len];
        self.stream.read_exact(&mut bytes).expect("read bulk payload");
        bytes
    }

    fn finish(self) -> Result<u64, ServerError> {
        drop(self.stream);
        self.server.join().expect("server thread")
    }

    fn close(self) -> u64 {
        self.finish().expect("server run")
    }
}

/// Register file that panics once chip select is asserted.
struct Desynced(SpiRegisterFile);

impl Device for Desynced {
    fn eval(&mut self) {
        if !self.0.spi_port().cs_n.is_high() {
            panic!("device desync");
        }
        self.0.eval();
    }

    fn set_clock(&mut self, high: bool) {
        self.0.set_clock(high);
    }
}

impl SpiDevice for Desynced {
    fn spi_port(&mut self) -> &mut SpiPort {
        self.0.spi_port()
    }
}

const fn ok(value: u32) -> Response {
    Response { ok: true, value }
}

#[test]
fn every_command_kind_round_trips_over_the_socket() {
    let mut session = Session::start();

    session.send(CommandKind::WriteReg, 0x05, 0x42, 0, &[]);
    assert_eq!(session.response(), ok(0));

    session.send(CommandKind::ReadReg, 0x05, 0, 0, &[]);
    assert_eq!(session.response(), ok(0x42));

    session.send(CommandKind::PollReg, 0x05, 0x42, 3, &[]);
    assert_eq!(session.response(), ok(0x42));

    session.send(CommandKind::WriteReg16, 0x10, 0xBEEF, 0, &[]);
    assert_eq!(session.response(), ok(0));

    session.send(CommandKind::ReadReg16, 0x10, 0, 0, &[]);
    assert_eq!(session.response(), ok(0xBEEF));

    let payload: Vec<u8> = (0..32u8).map(|byte| byte.wrapping_mul(7)).collect();
    session.send(CommandKind::PackedWrite, 0x2000, 0, 2, &payload);
    assert_eq!(session.response(), ok(0));

    session.send(CommandKind::BulkRead, 0x2000, 0, 32, &[]);
    assert_eq!(session.response(), ok(32));
    assert_eq!(session.bulk(32), payload);

    session.send(CommandKind::Reset, 0, 0, 0, &[]);
    assert_eq!(session.response(), ok(0));

    assert_eq!(session.close(), 8);
}

#[test]
fn exhausted_poll_reports_failure() {
    let mut session = Session::start();

    session.send(CommandKind::WriteReg, 0x03, 0x01, 0, &[]);
    assert_eq!(session.response(), ok(0));

    session.send(CommandKind::PollReg, 0x03, 0x07, 3, &[]);
    assert_eq!(
        session.response(),
        Response {
            ok: false,
            value: 0x01
        }
    );

    assert_eq!(session.close(), 2);
}

#[rstest]
#[case::unknown_kind(8, 0)]
#[case::empty_packed_write(CommandKind::PackedWrite as u8, 0)]
#[case::oversized_bulk_read(CommandKind::BulkRead as u8, 0x1_0000)]
fn rejected_requests_leave_the_session_usable(#[case] kind: u8, #[case] count: u32) {
    let mut session = Session::start();

    session.send_raw(kind, 0, 0, count, &[]);
    assert_eq!(
        session.response(),
        Response {
            ok: false,
            value: REJECTED_VALUE
        }
    );

    session.send(CommandKind::ReadReg, 0x00, 0, 0, &[]);
    assert_eq!(session.response(), ok(0));

    assert_eq!(session.close(), 2);
}

#[test]
fn closing_without_requests_ends_the_loop_cleanly() {
    let session = Session::start();
    assert_eq!(session.close(), 0);
}

#[test]
fn device_panic_answers_rejected_and_fails_the_run() {
    let mut session = Session::start_with(|| Desynced(SpiRegisterFile::new()));

    session.send(CommandKind::ReadReg, 0x05, 0, 0, &[]);
    assert_eq!(
        session.response(),
        Response {
            ok: false,
            value: REJECTED_VALUE
        }
    );

    assert!(matches!(session.finish(), Err(ServerError::StepperPanicked)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn register_writes_read_back(reg in 0u32..64, value: u8) {
        let mut session = Session::start();

        session.send(CommandKind::WriteReg, reg, u32::from(value), 0, &[]);
        prop_assert_eq!(session.response(), ok(0));
        session.send(CommandKind::ReadReg, reg, 0, 0, &[]);
        prop_assert_eq!(session.response(), ok(u32::from(value)));

        prop_assert_eq!(session.close(), 2);
    }
}
