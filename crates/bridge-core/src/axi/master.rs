//! Framed-bus master: per-channel queues serviced from clock edges.
//!
//! No explicit state machine is needed here. Each channel is independent:
//! on every falling edge the driver presents the head of each send queue,
//! asserts `ready` on the receive channels, settles the device, and then
//! treats `valid && ready` as a handshake that commits on the next rising
//! edge. Completed transactions are looked up by tag in the outstanding
//! table.

use std::collections::{BTreeMap, VecDeque};

use log::{debug, trace};

use crate::axi::packet::{
    plan_read, plan_write, AddrPacket, ReadPacket, Resp, WritePacket, WriteResponse,
};
use crate::axi::port::AxiSlaveDevice;
use crate::clock::{Attached, Clock, EdgeObserver};
use crate::config::{AxiConfig, LINE_BYTES};
use crate::BridgeError;

/// Result of a finished framed-bus transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Worst response code reported across all bursts.
    pub resp: Resp,
    /// Bytes read, in address order; empty for writes.
    pub data: Vec<u8>,
}

#[derive(Debug)]
enum Progress {
    Write {
        responses_left: usize,
    },
    Read {
        cursor: u64,
        last: u64,
        bursts_left: usize,
        data: Vec<u8>,
    },
}

#[derive(Debug)]
struct Pending {
    finished: bool,
    resp: Resp,
    progress: Progress,
}

/// Bridge-side framed-bus master.
///
/// Attach it to a [`Clock`] whose device implements [`AxiSlaveDevice`].
#[derive(Debug, Default)]
pub struct AxiMaster {
    config: AxiConfig,
    aw: VecDeque<AddrPacket>,
    w: VecDeque<WritePacket>,
    ar: VecDeque<AddrPacket>,
    pending: BTreeMap<u8, Pending>,
}

impl AxiMaster {
    /// Creates a master with empty channel queues.
    #[must_use]
    pub const fn new(config: AxiConfig) -> Self {
        Self {
            config,
            aw: VecDeque::new(),
            w: VecDeque::new(),
            ar: VecDeque::new(),
            pending: BTreeMap::new(),
        }
    }

    /// Queues a write of `payload` to `addr` under `tag`.
    ///
    /// The payload is copied; the caller may reuse its buffer immediately.
    ///
    /// Reusing a tag that is still outstanding is reported as an error rather
    /// than asserted: the existing transaction is left untouched and the bus
    /// stays usable. Only device-side desynchronization (a response or beat
    /// for an unknown tag) panics.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::TagBusy`] while a transaction with `tag` is
    /// outstanding, or a range error for empty or overflowing transfers.
    pub fn submit_write(&mut self, tag: u8, addr: u64, payload: &[u8]) -> Result<(), BridgeError> {
        self.ensure_free(tag)?;
        let bursts = plan_write(tag, addr, payload, self.config.max_size_log2)?;
        debug!(
            "axi write tag={tag} addr={addr:#x} len={} bursts={}",
            payload.len(),
            bursts.len()
        );

        let responses_left = bursts.len();
        for burst in bursts {
            self.aw.push_back(burst.address);
            self.w.extend(burst.data);
        }
        self.pending.insert(
            tag,
            Pending {
                finished: false,
                resp: Resp::Okay,
                progress: Progress::Write { responses_left },
            },
        );
        Ok(())
    }

    /// Queues a read of `len` bytes from `addr` under `tag`.
    ///
    /// Reusing a tag that is still outstanding is reported as an error rather
    /// than asserted: the existing transaction is left untouched and the bus
    /// stays usable. Only device-side desynchronization (a response or beat
    /// for an unknown tag) panics.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::TagBusy`] while a transaction with `tag` is
    /// outstanding, or a range error for empty or overflowing transfers.
    pub fn submit_read(&mut self, tag: u8, addr: u64, len: usize) -> Result<(), BridgeError> {
        self.ensure_free(tag)?;
        let bursts = plan_read(tag, addr, len, self.config.max_size_log2)?;
        debug!(
            "axi read tag={tag} addr={addr:#x} len={len} bursts={}",
            bursts.len()
        );

        let bursts_left = bursts.len();
        self.ar.extend(bursts);
        self.pending.insert(
            tag,
            Pending {
                finished: false,
                resp: Resp::Okay,
                progress: Progress::Read {
                    cursor: addr,
                    last: addr + (len as u64 - 1),
                    bursts_left,
                    data: Vec::with_capacity(len),
                },
            },
        );
        Ok(())
    }

    /// Returns true if `tag` has a pending entry.
    #[must_use]
    pub fn is_pending(&self, tag: u8) -> bool {
        self.pending.contains_key(&tag)
    }

    /// Returns true once the transaction under `tag` has completed.
    #[must_use]
    pub fn is_finished(&self, tag: u8) -> bool {
        self.pending.get(&tag).is_some_and(|entry| entry.finished)
    }

    /// Number of entries in the outstanding table, finished or not.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    /// Removes and returns a finished transaction, freeing its tag.
    pub fn take_completion(&mut self, tag: u8) -> Option<Completion> {
        if !self.is_finished(tag) {
            return None;
        }
        let entry = self.pending.remove(&tag)?;
        let data = match entry.progress {
            Progress::Write { .. } => Vec::new(),
            Progress::Read { data, .. } => data,
        };
        Some(Completion {
            resp: entry.resp,
            data,
        })
    }

    fn ensure_free(&self, tag: u8) -> Result<(), BridgeError> {
        if self.pending.contains_key(&tag) {
            Err(BridgeError::TagBusy { tag })
        } else {
            Ok(())
        }
    }

    fn accept_response(&mut self, response: WriteResponse) {
        let tag = response.id;
        let Some(entry) = self.pending.get_mut(&tag) else {
            panic!("write response for tag {tag} with no outstanding transaction");
        };
        let Progress::Write { responses_left } = &mut entry.progress else {
            panic!("write response for tag {tag}, which is a read");
        };
        assert!(
            !entry.finished,
            "extra write response for finished tag {tag}"
        );

        entry.resp = entry.resp.max(response.resp);
        *responses_left -= 1;
        if *responses_left == 0 {
            entry.finished = true;
            debug!("axi write tag={tag} complete resp={:?}", entry.resp);
        }
    }

    fn accept_read_beat(&mut self, beat: ReadPacket) {
        let tag = beat.id;
        let Some(entry) = self.pending.get_mut(&tag) else {
            panic!("read data for tag {tag} with no outstanding transaction");
        };
        let Progress::Read {
            cursor,
            last,
            bursts_left,
            data,
        } = &mut entry.progress
        else {
            panic!("read data for tag {tag}, which is a write");
        };
        assert!(!entry.finished, "extra read data for finished tag {tag}");

        let line = LINE_BYTES as u64;
        let base = *cursor - *cursor % line;
        let stop = (base + (line - 1)).min(*last);
        let lanes = beat.data.to_le_bytes();
        data.extend_from_slice(&lanes[(*cursor - base) as usize..=(stop - base) as usize]);
        if stop < *last {
            *cursor = stop + 1;
        }

        entry.resp = entry.resp.max(beat.resp);
        if beat.last {
            *bursts_left -= 1;
            if *bursts_left == 0 {
                entry.finished = true;
                debug!(
                    "axi read tag={tag} complete bytes={} resp={:?}",
                    data.len(),
                    entry.resp
                );
            }
        }
    }
}

impl<D: AxiSlaveDevice> EdgeObserver<D> for AxiMaster {
    fn on_falling(&mut self, device: &mut D) {
        let port = device.axi_slave_port();
        port.drive_aw(self.aw.front());
        port.drive_w(self.w.front());
        port.drive_ar(self.ar.front());
        port.bready.set(true);
        port.rready.set(true);
        device.eval();

        let port = device.axi_slave_port();
        if port.aw_fire() {
            trace!("aw handshake {:?}", port.sample_aw());
            self.aw.pop_front();
        }
        if port.w_fire() {
            trace!("w handshake strb={:#06x}", port.wstrb.get());
            self.w.pop_front();
        }
        if port.ar_fire() {
            trace!("ar handshake {:?}", port.sample_ar());
            self.ar.pop_front();
        }
        let response = port.b_fire().then(|| port.sample_b());
        let beat = port.r_fire().then(|| port.sample_r());

        if let Some(response) = response {
            self.accept_response(response);
        }
        if let Some(beat) = beat {
            self.accept_read_beat(beat);
        }
    }
}

impl Attached<AxiMaster> {
    /// Steps `clock` until the transaction under `tag` finishes, then
    /// removes it from the outstanding table.
    ///
    /// # Panics
    ///
    /// Panics if nothing is pending under `tag`.
    pub fn wait<D: AxiSlaveDevice>(&self, clock: &mut Clock<D>, tag: u8) -> Completion {
        assert!(
            self.borrow().is_pending(tag),
            "no transaction pending for tag {tag}"
        );
        loop {
            if let Some(completion) = self.borrow_mut().take_completion(tag) {
                return completion;
            }
            clock.step();
        }
    }

    /// Writes `payload` to `addr` and steps until the write is acknowledged.
    ///
    /// # Errors
    ///
    /// Propagates submission errors from [`AxiMaster::submit_write`].
    pub fn write<D: AxiSlaveDevice>(
        &self,
        clock: &mut Clock<D>,
        tag: u8,
        addr: u64,
        payload: &[u8],
    ) -> Result<Completion, BridgeError> {
        self.borrow_mut().submit_write(tag, addr, payload)?;
        Ok(self.wait(clock, tag))
    }

    /// Reads `len` bytes from `addr`, stepping until the last beat arrives.
    ///
    /// # Errors
    ///
    /// Propagates submission errors from [`AxiMaster::submit_read`].
    pub fn read<D: AxiSlaveDevice>(
        &self,
        clock: &mut Clock<D>,
        tag: u8,
        addr: u64,
        len: usize,
    ) -> Result<Completion, BridgeError> {
        self.borrow_mut().submit_read(tag, addr, len)?;
        Ok(self.wait(clock, tag))
    }
}
