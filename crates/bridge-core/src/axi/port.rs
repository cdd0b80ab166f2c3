//! Framed-bus pin bundle and device capability traits.

use crate::axi::packet::{AddrPacket, ReadPacket, Resp, WritePacket, WriteResponse};
use crate::clock::Device;
use crate::signal::Wire;

/// The five framed-bus channels of one port as named wires.
///
/// The same bundle serves both roles: a device's slave port is driven by
/// [`crate::AxiMaster`], and a device's outward master port is served by
/// [`crate::AxiSlave`].
#[derive(Debug, Clone)]
pub struct AxiPort {
    /// Write address valid.
    pub awvalid: Wire<bool>,
    /// Write address ready, driven by the slave.
    pub awready: Wire<bool>,
    /// Write transaction tag.
    pub awid: Wire<u8>,
    /// First byte address of the write burst.
    pub awaddr: Wire<u64>,
    /// Write burst length minus one.
    pub awlen: Wire<u8>,
    /// Log2 of bytes per write beat.
    pub awsize: Wire<u8>,
    /// Write burst type.
    pub awburst: Wire<u8>,

    /// Write data valid.
    pub wvalid: Wire<bool>,
    /// Write data ready, driven by the slave.
    pub wready: Wire<bool>,
    /// One 128-bit write data beat.
    pub wdata: Wire<u128>,
    /// Byte enables for `wdata`.
    pub wstrb: Wire<u16>,
    /// Marks the final beat of a write burst.
    pub wlast: Wire<bool>,

    /// Write response valid, driven by the slave.
    pub bvalid: Wire<bool>,
    /// Write response ready.
    pub bready: Wire<bool>,
    /// Tag of the answered write.
    pub bid: Wire<u8>,
    /// Write response code.
    pub bresp: Wire<u8>,

    /// Read address valid.
    pub arvalid: Wire<bool>,
    /// Read address ready, driven by the slave.
    pub arready: Wire<bool>,
    /// Read transaction tag.
    pub arid: Wire<u8>,
    /// First byte address of the read burst.
    pub araddr: Wire<u64>,
    /// Read burst length minus one.
    pub arlen: Wire<u8>,
    /// Log2 of bytes per read beat.
    pub arsize: Wire<u8>,
    /// Read burst type.
    pub arburst: Wire<u8>,

    /// Read data valid, driven by the slave.
    pub rvalid: Wire<bool>,
    /// Read data ready.
    pub rready: Wire<bool>,
    /// Tag of the returned read beat.
    pub rid: Wire<u8>,
    /// One 128-bit read data beat.
    pub rdata: Wire<u128>,
    /// Read response code.
    pub rresp: Wire<u8>,
    /// Marks the final beat of a read burst.
    pub rlast: Wire<bool>,
}

impl Default for AxiPort {
    fn default() -> Self {
        Self {
            awvalid: Wire::low("awvalid"),
            awready: Wire::low("awready"),
            awid: Wire::zeroed("awid"),
            awaddr: Wire::zeroed("awaddr"),
            awlen: Wire::zeroed("awlen"),
            awsize: Wire::zeroed("awsize"),
            awburst: Wire::zeroed("awburst"),
            wvalid: Wire::low("wvalid"),
            wready: Wire::low("wready"),
            wdata: Wire::zeroed("wdata"),
            wstrb: Wire::zeroed("wstrb"),
            wlast: Wire::low("wlast"),
            bvalid: Wire::low("bvalid"),
            bready: Wire::low("bready"),
            bid: Wire::zeroed("bid"),
            bresp: Wire::zeroed("bresp"),
            arvalid: Wire::low("arvalid"),
            arready: Wire::low("arready"),
            arid: Wire::zeroed("arid"),
            araddr: Wire::zeroed("araddr"),
            arlen: Wire::zeroed("arlen"),
            arsize: Wire::zeroed("arsize"),
            arburst: Wire::zeroed("arburst"),
            rvalid: Wire::low("rvalid"),
            rready: Wire::low("rready"),
            rid: Wire::zeroed("rid"),
            rdata: Wire::zeroed("rdata"),
            rresp: Wire::zeroed("rresp"),
            rlast: Wire::low("rlast"),
        }
    }
}

impl AxiPort {
    /// Drives the write-address channel; `None` deasserts `awvalid`.
    pub fn drive_aw(&mut self, packet: Option<&AddrPacket>) {
        self.awvalid.set(packet.is_some());
        if let Some(packet) = packet {
            self.awid.set(packet.id);
            self.awaddr.set(packet.addr);
            self.awlen.set(packet.len);
            self.awsize.set(packet.size);
            self.awburst.set(packet.burst);
        }
    }

    /// Drives the write-data channel; `None` deasserts `wvalid`.
    pub fn drive_w(&mut self, packet: Option<&WritePacket>) {
        self.wvalid.set(packet.is_some());
        if let Some(packet) = packet {
            self.wdata.set(packet.data);
            self.wstrb.set(packet.strb);
            self.wlast.set(packet.last);
        }
    }

    /// Drives the write-response channel; `None` deasserts `bvalid`.
    pub fn drive_b(&mut self, packet: Option<&WriteResponse>) {
        self.bvalid.set(packet.is_some());
        if let Some(packet) = packet {
            self.bid.set(packet.id);
            self.bresp.set(packet.resp.bits());
        }
    }

    /// Drives the read-address channel; `None` deasserts `arvalid`.
    pub fn drive_ar(&mut self, packet: Option<&AddrPacket>) {
        self.arvalid.set(packet.is_some());
        if let Some(packet) = packet {
            self.arid.set(packet.id);
            self.araddr.set(packet.addr);
            self.arlen.set(packet.len);
            self.arsize.set(packet.size);
            self.arburst.set(packet.burst);
        }
    }

    /// Drives the read-data channel; `None` deasserts `rvalid`.
    pub fn drive_r(&mut self, packet: Option<&ReadPacket>) {
        self.rvalid.set(packet.is_some());
        if let Some(packet) = packet {
            self.rid.set(packet.id);
            self.rdata.set(packet.data);
            self.rresp.set(packet.resp.bits());
            self.rlast.set(packet.last);
        }
    }

    /// Write-address packet currently on the wires.
    #[must_use]
    pub const fn sample_aw(&self) -> AddrPacket {
        AddrPacket {
            id: self.awid.get(),
            addr: self.awaddr.get(),
            len: self.awlen.get(),
            size: self.awsize.get(),
            burst: self.awburst.get(),
        }
    }

    /// Write-data packet currently on the wires.
    #[must_use]
    pub const fn sample_w(&self) -> WritePacket {
        WritePacket {
            data: self.wdata.get(),
            strb: self.wstrb.get(),
            last: self.wlast.get(),
        }
    }

    /// Write-response packet currently on the wires.
    #[must_use]
    pub const fn sample_b(&self) -> WriteResponse {
        WriteResponse {
            id: self.bid.get(),
            resp: Resp::from_bits(self.bresp.get()),
        }
    }

    /// Read-address packet currently on the wires.
    #[must_use]
    pub const fn sample_ar(&self) -> AddrPacket {
        AddrPacket {
            id: self.arid.get(),
            addr: self.araddr.get(),
            len: self.arlen.get(),
            size: self.arsize.get(),
            burst: self.arburst.get(),
        }
    }

    /// Read-data packet currently on the wires.
    #[must_use]
    pub const fn sample_r(&self) -> ReadPacket {
        ReadPacket {
            id: self.rid.get(),
            data: self.rdata.get(),
            resp: Resp::from_bits(self.rresp.get()),
            last: self.rlast.get(),
        }
    }

    /// True when the write-address handshake completes at the next rising edge.
    #[must_use]
    pub const fn aw_fire(&self) -> bool {
        self.awvalid.is_high() && self.awready.is_high()
    }

    /// True when the write-data handshake completes at the next rising edge.
    #[must_use]
    pub const fn w_fire(&self) -> bool {
        self.wvalid.is_high() && self.wready.is_high()
    }

    /// True when the write-response handshake completes at the next rising edge.
    #[must_use]
    pub const fn b_fire(&self) -> bool {
        self.bvalid.is_high() && self.bready.is_high()
    }

    /// True when the read-address handshake completes at the next rising edge.
    #[must_use]
    pub const fn ar_fire(&self) -> bool {
        self.arvalid.is_high() && self.arready.is_high()
    }

    /// True when the read-data handshake completes at the next rising edge.
    #[must_use]
    pub const fn r_fire(&self) -> bool {
        self.rvalid.is_high() && self.rready.is_high()
    }
}

/// Device exposing a framed-bus slave port for the bridge to drive.
pub trait AxiSlaveDevice: Device {
    /// The port whose address/write-data channels the bridge drives.
    fn axi_slave_port(&mut self) -> &mut AxiPort;
}

/// Device that initiates framed-bus transactions outward.
pub trait AxiMasterDevice: Device {
    /// The port whose response/read-data channels the bridge drives.
    fn axi_master_port(&mut self) -> &mut AxiPort;
}
