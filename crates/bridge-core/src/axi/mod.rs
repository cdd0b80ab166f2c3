//! Framed, parallel, burst-capable bus adapter.

pub mod master;
pub mod packet;
pub mod port;
pub mod slave;

pub use master::{AxiMaster, Completion};
pub use packet::{AddrPacket, ReadPacket, Resp, WriteBurst, WritePacket, WriteResponse};
pub use port::{AxiMasterDevice, AxiPort, AxiSlaveDevice};
pub use slave::{AxiSlave, ReadHandler, WriteHandler};
