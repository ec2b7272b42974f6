use tokio_util::bytes::Buf;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 2;
pub const EXCEPTION_ILLEGAL_DATA_VALUE: u8 = 3;
pub const EXCEPTION_SERVER_BUSY: u8 = 6;

#[derive(Debug, Clone, Copy)]
pub struct Request {
    pub device_id: u8,
    pub transaction_id: u16,
    pub operation: Operation,
}

/// Register addresses are zero-based protocol addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ReadCoils { address: u16, count: u16 },
    ReadHoldings { address: u16, count: u16 },
    ReadInputs { address: u16, count: u16 },
    WriteCoil { address: u16, value: bool },
    WriteHolding { address: u16, value: u16 },
}

impl Operation {
    pub fn function_code(&self) -> u8 {
        match self {
            Operation::ReadCoils { .. } => 1,
            Operation::ReadHoldings { .. } => 3,
            Operation::ReadInputs { .. } => 4,
            Operation::WriteCoil { .. } => 5,
            Operation::WriteHolding { .. } => 6,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Response {
    pub device_id: u8,
    pub transaction_id: u16,
    pub kind: ResponseKind,
}

impl Response {
    pub fn exception_code(&self) -> Option<u8> {
        match &self.kind {
            ResponseKind::ErrorCode(c) => Some(*c),
            ResponseKind::Bits { .. } | ResponseKind::Words { .. } | ResponseKind::Written { .. } => {
                None
            }
        }
    }

    pub fn is_server_busy(&self) -> bool {
        self.exception_code() == Some(EXCEPTION_SERVER_BUSY)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ResponseKind {
    ErrorCode(u8),
    /// Coil states, packed eight to a byte starting with the least significant bit.
    Bits { bytes: Vec<u8> },
    /// Register values, two big-endian bytes each.
    Words { values: Vec<u8> },
    /// Echo of a single register or coil write.
    Written { address: u16, value: u16 },
}

impl ResponseKind {
    /// One word per register or coil, at most `count` of them.
    pub fn into_words(self, count: u16) -> Vec<u16> {
        let count = usize::from(count);
        match self {
            ResponseKind::Bits { bytes } => (0..count.min(bytes.len() * 8))
                .map(|bit| u16::from((bytes[bit / 8] >> (bit % 8)) & 1))
                .collect(),
            ResponseKind::Words { values } => values
                .chunks_exact(2)
                .take(count)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect(),
            ResponseKind::ErrorCode(_) | ResponseKind::Written { .. } => Vec::new(),
        }
    }
}

pub struct ModbusTCPCodec {}

impl Encoder<&Request> for ModbusTCPCodec {
    type Error = std::io::Error;
    fn encode(
        &mut self,
        req: &Request,
        dst: &mut tokio_util::bytes::BytesMut,
    ) -> Result<(), Self::Error> {
        dst.extend(req.transaction_id.to_be_bytes());
        // Protocol identifier 0, then 6 bytes follow: unit, function and two 16-bit fields.
        dst.extend(&[0, 0, 0, 6, req.device_id, req.operation.function_code()]);
        let (address, field) = match req.operation {
            Operation::ReadCoils { address, count }
            | Operation::ReadHoldings { address, count }
            | Operation::ReadInputs { address, count } => (address, count),
            Operation::WriteCoil { address, value } => (address, if value { 0xFF00 } else { 0 }),
            Operation::WriteHolding { address, value } => (address, value),
        };
        dst.extend(address.to_be_bytes());
        dst.extend(field.to_be_bytes());
        trace!(message="sending encoded", buffer=?dst);
        Ok(())
    }
}

impl Decoder for ModbusTCPCodec {
    type Item = Response;
    type Error = std::io::Error;
    fn decode(
        &mut self,
        src: &mut tokio_util::bytes::BytesMut,
    ) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            trace!(message="attempt at decoding", buffer=?src);
            if src.len() < 9 {
                return Ok(None);
            }
            let Some((tr_id_buffer, remainder)) = src.split_first_chunk::<2>() else {
                return Ok(None);
            };
            let transaction_id = u16::from_be_bytes(*tr_id_buffer);
            let Some((proto_buffer, remainder)) = remainder.split_first_chunk::<2>() else {
                return Ok(None);
            };
            if u16::from_be_bytes(*proto_buffer) != 0 {
                src.advance(1);
                continue;
            }
            let Some((length_buffer, remainder)) = remainder.split_first_chunk::<2>() else {
                return Ok(None);
            };
            let required_length = u16::from_be_bytes(*length_buffer);
            let Some((data, _)) = remainder.split_at_checked(required_length.into()) else {
                return Ok(None);
            };
            let frame_length = usize::from(required_length) + 6;
            let [device_id, function_code, payload @ ..] = data else {
                src.advance(1);
                continue;
            };
            let (device_id, function_code) = (*device_id, *function_code);
            let kind = if function_code & 0x80 != 0 {
                payload.first().map(|code| ResponseKind::ErrorCode(*code))
            } else {
                match (function_code, payload) {
                    (1, [_, bytes @ ..]) => Some(ResponseKind::Bits { bytes: bytes.to_vec() }),
                    (3 | 4, [_, values @ ..]) => {
                        Some(ResponseKind::Words { values: values.to_vec() })
                    }
                    (5 | 6, [a, b, c, d, ..]) => Some(ResponseKind::Written {
                        address: u16::from_be_bytes([*a, *b]),
                        value: u16::from_be_bytes([*c, *d]),
                    }),
                    _ => None,
                }
            };
            let Some(kind) = kind else {
                trace!(message = "skipping unexpected frame", function_code);
                src.advance(frame_length);
                continue;
            };
            src.advance(frame_length);
            return Ok(Some(Response { transaction_id, device_id, kind }));
        }
    }
}
