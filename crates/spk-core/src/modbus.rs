//! Modbus/TCP coil frames for ADAM-6000 I/O modules
//!
//! Only "write single coil" (function code 0x05) is needed: each speaker zone
//! is wired to one digital output.
//!
//! ```text
//! MBAP: transaction id (u16 BE) | protocol id = 0 (u16 BE) | length (u16 BE) | unit id (u8)
//! PDU:  function 0x05 | coil address (u16 BE) | value 0xFF00 on / 0x0000 off (u16 BE)
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{Error, Result};

/// MBAP header length
pub const MBAP_HEADER_LEN: usize = 7;

/// Write single coil request/response length
pub const WRITE_COIL_FRAME_LEN: usize = 12;

/// Function code: write single coil
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;

/// Exception responses set the high bit of the function code
pub const EXCEPTION_FLAG: u8 = 0x80;

pub const COIL_ON: u16 = 0xFF00;
pub const COIL_OFF: u16 = 0x0000;

/// Write single coil request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteCoil {
    pub transaction_id: u16,
    pub unit_id: u8,
    pub address: u16,
    pub on: bool,
}

impl WriteCoil {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(WRITE_COIL_FRAME_LEN);
        buf.put_u16(self.transaction_id);
        buf.put_u16(0);
        // unit id + PDU
        buf.put_u16(6);
        buf.put_u8(self.unit_id);
        buf.put_u8(FC_WRITE_SINGLE_COIL);
        buf.put_u16(self.address);
        buf.put_u16(if self.on { COIL_ON } else { COIL_OFF });
        buf.freeze()
    }
}

/// Outcome of a write-coil response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoilResponse {
    /// Device echoed the request
    Written { transaction_id: u16, address: u16, on: bool },
    /// Device answered with a Modbus exception code
    Exception { transaction_id: u16, code: u8 },
}

impl CoilResponse {
    pub fn decode(mut buf: impl Buf) -> Result<Self> {
        if buf.remaining() < MBAP_HEADER_LEN + 2 {
            return Err(Error::BufferTooSmall {
                needed: MBAP_HEADER_LEN + 2,
                have: buf.remaining(),
            });
        }

        let transaction_id = buf.get_u16();
        let _protocol = buf.get_u16();
        let _length = buf.get_u16();
        let _unit = buf.get_u8();
        let function = buf.get_u8();

        if function == FC_WRITE_SINGLE_COIL | EXCEPTION_FLAG {
            return Ok(CoilResponse::Exception {
                transaction_id,
                code: buf.get_u8(),
            });
        }
        if function != FC_WRITE_SINGLE_COIL {
            return Err(Error::UnknownOpcode(function));
        }
        if buf.remaining() < 4 {
            return Err(Error::BufferTooSmall {
                needed: WRITE_COIL_FRAME_LEN,
                have: MBAP_HEADER_LEN + 1 + buf.remaining(),
            });
        }

        let address = buf.get_u16();
        let value = buf.get_u16();
        Ok(CoilResponse::Written {
            transaction_id,
            address,
            on: value == COIL_ON,
        })
    }
}
