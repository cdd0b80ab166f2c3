//! Socket front end: one client connection feeding one serial session while
//! a dedicated thread steps the clock.

use std::io::{self, ErrorKind, Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bridge_core::spi::{BEAT_BYTES, MAX_PACKED_BEATS};
use bridge_core::{Clock, SpiBridge, SpiConfig, SpiDevice, SpiMaster, SpiRegisterFile};
use log::{debug, error, info, warn};
use thiserror::Error;

use crate::config::{ConfigError, ServerConfig};
use crate::wire::{decode_request, CommandHeader, Request, Response, HEADER_BYTES};

/// Largest payload a valid packed write can carry.
const MAX_PAYLOAD_BYTES: u64 = (MAX_PACKED_BEATS * BEAT_BYTES) as u64;

/// How often a waiting request checks that the stepping thread is alive.
const LIVENESS_INTERVAL: Duration = Duration::from_millis(10);

/// Failures that end a server run.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding, accepting or answering on the socket failed.
    #[error("socket i/o failed: {0}")]
    Io(#[from] io::Error),
    /// The environment held malformed settings.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The stepping thread panicked, usually on a device desynchronization.
    #[error("stepping thread panicked")]
    StepperPanicked,
}

/// Clock-stepping thread driving one [`SpiMaster`].
///
/// The device and its clock live entirely on the spawned thread. Stopping
/// (or dropping) the stepper ends the loop after the current cycle.
#[derive(Debug)]
pub struct Stepper {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<u64>>,
}

impl Stepper {
    /// Spawns the stepping thread. `make_device` runs on that thread.
    ///
    /// While the state machine is idle and nothing is queued the thread
    /// sleeps for the session's poll interval between cycles.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] when the thread cannot be spawned.
    pub fn spawn<D, F>(bridge: Arc<SpiBridge>, make_device: F) -> Result<Self, ServerError>
    where
        D: SpiDevice + 'static,
        F: FnOnce() -> D + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("spi-stepper".to_string())
            .spawn(move || {
                let poll_interval = bridge.config().poll_interval;
                let mut clock = Clock::new(make_device());
                let master = clock.attach(SpiMaster::new(Arc::clone(&bridge)));
                while !flag.load(Ordering::Acquire) {
                    clock.step();
                    if master.borrow().is_idle() && bridge.pending() == 0 {
                        thread::sleep(poll_interval);
                    }
                }
                let completed = master.borrow().completed();
                debug!(
                    "stepper stopped after {} cycles, {completed} commands",
                    clock.cycles()
                );
                clock.cycles()
            })?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// True while the stepping thread is running.
    ///
    /// Turns false once the thread has exited, including by panicking.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stops the thread and returns the number of cycles it stepped.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::StepperPanicked`] if the thread panicked.
    pub fn stop(mut self) -> Result<u64, ServerError> {
        self.stop.store(true, Ordering::Release);
        self.handle
            .take()
            .map_or(Ok(0), |handle| handle.join().map_err(|_| ServerError::StepperPanicked))
    }
}

impl Drop for Stepper {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("stepping thread panicked");
            }
        }
    }
}

/// Reads one header. `Ok(None)` means the peer closed between records.
fn read_header(stream: &mut impl Read) -> io::Result<Option<[u8; HEADER_BYTES]>> {
    let mut bytes = [0; HEADER_BYTES];
    let mut filled = 0;
    while filled < HEADER_BYTES {
        match stream.read(&mut bytes[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(ErrorKind::UnexpectedEof.into()),
            Ok(read) => filled += read,
            Err(error) if error.kind() == ErrorKind::Interrupted => {}
            Err(error) => return Err(error),
        }
    }
    Ok(Some(bytes))
}

/// Reads the payload announced by `header`, or discards it when no valid
/// request could carry that much.
fn read_payload(stream: &mut impl Read, header: &CommandHeader) -> io::Result<Option<Vec<u8>>> {
    let len = header.payload_len();
    if len > MAX_PAYLOAD_BYTES {
        io::copy(&mut stream.by_ref().take(len), &mut io::sink())?;
        return Ok(None);
    }
    let mut payload = vec![0; usize::try_from(len).map_err(|_| ErrorKind::InvalidData)?];
    stream.read_exact(&mut payload)?;
    Ok(Some(payload))
}

/// Executes one decoded request against the session.
///
/// Waits for the result in [`LIVENESS_INTERVAL`] slices so a dead stepping
/// thread is noticed instead of waited on forever.
fn execute(
    bridge: &SpiBridge,
    stepper: &Stepper,
    request: Request,
) -> Result<(Response, Vec<u8>), ServerError> {
    let command = match request {
        Request::Reset => {
            bridge.reset();
            return Ok((Response { ok: true, value: 0 }, Vec::new()));
        }
        Request::Command(command) => command,
    };

    let returns_payload = command.returns_payload();
    if let Err(error) = bridge.submit(command) {
        warn!("rejected command: {error}");
        return Ok((Response::REJECTED, Vec::new()));
    }

    let result = loop {
        if let Some(result) = bridge.wait_result_timeout(LIVENESS_INTERVAL) {
            break result;
        }
        if !stepper.is_alive() {
            return Err(ServerError::StepperPanicked);
        }
    };
    // The bulk payload is queued before its result.
    let payload = if returns_payload {
        bridge.try_bulk().unwrap_or_default()
    } else {
        Vec::new()
    };
    Ok((result.into(), payload))
}

/// Serves requests from `stream` until the peer closes it.
///
/// Every request is answered in order. Malformed requests are answered
/// with [`Response::REJECTED`] and do not end the session. A read failure
/// counts as the peer closing; a write failure is returned. If `stepper`
/// dies while a command is in flight, that command is answered with
/// [`Response::REJECTED`] and the session ends.
///
/// Returns the number of requests answered.
///
/// # Errors
///
/// Returns [`ServerError::Io`] when a response cannot be written and
/// [`ServerError::StepperPanicked`] when the stepping thread died.
pub fn serve_connection<S: Read + Write>(
    mut stream: S,
    bridge: &SpiBridge,
    stepper: &Stepper,
) -> Result<u64, ServerError> {
    let mut served = 0;
    loop {
        let header = match read_header(&mut stream) {
            Ok(Some(bytes)) => CommandHeader::decode(&bytes),
            Ok(None) => break,
            Err(error) => {
                debug!("connection read failed: {error}");
                break;
            }
        };

        let payload = match read_payload(&mut stream, &header) {
            Ok(payload) => payload,
            Err(error) => {
                debug!("connection closed inside a record: {error}");
                break;
            }
        };

        let (response, data) = match payload.map(|payload| decode_request(&header, payload)) {
            Some(Ok(request)) => match execute(bridge, stepper, request) {
                Ok(answer) => answer,
                Err(failure) => {
                    error!("stepping thread died with a request in flight");
                    let rejected = stream
                        .write_all(&Response::REJECTED.encode())
                        .and_then(|()| stream.flush());
                    if let Err(write_error) = rejected {
                        debug!("could not answer the lost request: {write_error}");
                    }
                    return Err(failure);
                }
            },
            Some(Err(error)) => {
                warn!("rejected request: {error}");
                (Response::REJECTED, Vec::new())
            }
            None => {
                warn!("rejected packed write of {} beats", header.count);
                (Response::REJECTED, Vec::new())
            }
        };

        stream.write_all(&response.encode())?;
        stream.write_all(&data)?;
        stream.flush()?;
        served += 1;
    }
    debug!("connection closed after {served} requests");
    Ok(served)
}

/// Accepts one connection on `listener` and serves it with a fresh session
/// and device, stepping the device on its own thread.
///
/// Returns the number of requests answered.
///
/// # Errors
///
/// Returns [`ServerError`] when accepting or answering fails, or when the
/// stepping thread panicked.
pub fn serve_one<D, F>(
    listener: &TcpListener,
    spi: SpiConfig,
    make_device: F,
) -> Result<u64, ServerError>
where
    D: SpiDevice + 'static,
    F: FnOnce() -> D + Send + 'static,
{
    let (stream, peer) = listener.accept()?;
    info!("client connected from {peer}");
    stream.set_nodelay(true)?;

    let bridge = Arc::new(SpiBridge::new(spi));
    let stepper = Stepper::spawn(Arc::clone(&bridge), make_device)?;
    let served = serve_connection(stream, &bridge, &stepper);
    let cycles = stepper.stop();
    let served = served?;
    let cycles = cycles?;
    info!("client {peer} done: {served} requests, {cycles} cycles");
    Ok(served)
}

/// Binds the configured address and serves one client against the
/// [`SpiRegisterFile`] reference device.
///
/// # Errors
///
/// Returns [`ServerError`] when binding or serving fails.
pub fn run_server(config: &ServerConfig) -> Result<u64, ServerError> {
    let listener = TcpListener::bind(config.address())?;
    info!("listening on {}", listener.local_addr()?);
    serve_one(&listener, config.spi, SpiRegisterFile::new)
}
