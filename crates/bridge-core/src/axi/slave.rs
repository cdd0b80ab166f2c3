//! Device-facing mirror of the framed-bus driver.
//!
//! When the modeled core initiates transactions outward, the bridge plays
//! the slave: it accepts address and data packets as they arrive, pairs
//! them beat by beat, and hands each beat to a registered handler that
//! decides the response.

use std::collections::VecDeque;
use std::fmt;

use log::{debug, trace};

use crate::axi::packet::{AddrPacket, ReadPacket, Resp, WritePacket, WriteResponse};
use crate::axi::port::AxiMasterDevice;
use crate::clock::EdgeObserver;

/// Handles one write beat: `(beat address, line data, strobe) -> response`.
pub type WriteHandler = Box<dyn FnMut(u64, u128, u16) -> Resp>;

/// Handles one read beat: `beat address -> (line data, response)`.
pub type ReadHandler = Box<dyn FnMut(u64) -> (u128, Resp)>;

struct OpenWrite {
    address: AddrPacket,
    beat: usize,
    resp: Resp,
}

/// Bridge-side framed-bus slave serving an initiating device.
#[derive(Default)]
pub struct AxiSlave {
    on_write: Option<WriteHandler>,
    on_read: Option<ReadHandler>,
    writes: VecDeque<OpenWrite>,
    data: VecDeque<WritePacket>,
    responses: VecDeque<WriteResponse>,
    beats: VecDeque<ReadPacket>,
}

impl fmt::Debug for AxiSlave {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AxiSlave")
            .field("open_writes", &self.writes.len())
            .field("buffered_data", &self.data.len())
            .field("responses", &self.responses.len())
            .field("read_beats", &self.beats.len())
            .finish_non_exhaustive()
    }
}

impl AxiSlave {
    /// Creates a slave with no handlers registered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the write-beat handler, replacing any previous one.
    pub fn set_write_handler(&mut self, handler: impl FnMut(u64, u128, u16) -> Resp + 'static) {
        self.on_write = Some(Box::new(handler));
    }

    /// Registers the read-beat handler, replacing any previous one.
    pub fn set_read_handler(&mut self, handler: impl FnMut(u64) -> (u128, Resp) + 'static) {
        self.on_read = Some(Box::new(handler));
    }

    /// True while responses or read data are still queued for the device.
    #[must_use]
    pub fn has_pending_output(&self) -> bool {
        !self.responses.is_empty() || !self.beats.is_empty()
    }

    fn accept_address(&mut self, address: AddrPacket) {
        trace!("slave aw {address:?}");
        self.writes.push_back(OpenWrite {
            address,
            beat: 0,
            resp: Resp::Okay,
        });
        self.drain_writes();
    }

    fn accept_data(&mut self, packet: WritePacket) {
        self.data.push_back(packet);
        self.drain_writes();
    }

    // Beats may arrive before their address packet; they wait in `data`.
    fn drain_writes(&mut self) {
        while let (Some(open), Some(packet)) = (self.writes.front_mut(), self.data.front()) {
            let Some(handler) = self.on_write.as_mut() else {
                panic!("write beat received with no write handler registered");
            };
            let addr = open.address.beat_address(open.beat);
            let resp = handler(addr, packet.data, packet.strb);
            open.resp = open.resp.max(resp);
            open.beat += 1;

            let last = packet.last;
            self.data.pop_front();
            if last {
                let response = WriteResponse {
                    id: open.address.id,
                    resp: open.resp,
                };
                debug!(
                    "slave write id={} addr={:#x} beats={} resp={:?}",
                    response.id, open.address.addr, open.beat, response.resp
                );
                self.writes.pop_front();
                self.responses.push_back(response);
            }
        }
    }

    fn accept_read(&mut self, address: AddrPacket) {
        let Some(handler) = self.on_read.as_mut() else {
            panic!("read request received with no read handler registered");
        };
        let beats = address.beats();
        debug!(
            "slave read id={} addr={:#x} beats={beats}",
            address.id, address.addr
        );
        for beat in 0..beats {
            let (data, resp) = handler(address.beat_address(beat));
            self.beats.push_back(ReadPacket {
                id: address.id,
                data,
                resp,
                last: beat + 1 == beats,
            });
        }
    }
}

impl<D: AxiMasterDevice> EdgeObserver<D> for AxiSlave {
    fn on_falling(&mut self, device: &mut D) {
        let port = device.axi_master_port();
        port.awready.set(true);
        port.wready.set(true);
        port.arready.set(true);
        port.drive_b(self.responses.front());
        port.drive_r(self.beats.front());
        device.eval();

        let port = device.axi_master_port();
        let address = port.aw_fire().then(|| port.sample_aw());
        let data = port.w_fire().then(|| port.sample_w());
        let read = port.ar_fire().then(|| port.sample_ar());
        if port.b_fire() {
            self.responses.pop_front();
        }
        if port.r_fire() {
            self.beats.pop_front();
        }

        if let Some(address) = address {
            self.accept_address(address);
        }
        if let Some(data) = data {
            self.accept_data(data);
        }
        if let Some(read) = read {
            self.accept_read(read);
        }
    }
}
