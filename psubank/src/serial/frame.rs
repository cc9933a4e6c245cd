use crate::common::phys::format_bytes;
use crate::constants::REGISTER_COUNT;
use crate::decode::FrameDecodeLevel;
use crate::order::Order;
use crate::types::LastFrameError;

pub(crate) mod constants {
    pub(crate) const UNIT_ID: u8 = 0x01;
    pub(crate) const REQUEST_LENGTH: usize = 8;
    pub(crate) const CRC_LENGTH: usize = 2;
    /// unit id, function code and byte count precede the register data of a read response
    pub(crate) const DATA_OFFSET: usize = 3;
    pub(crate) const MAX_FRAME_LENGTH: usize = 40;
}

/// precomputes the CRC table as a constant!
const CRC: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_MODBUS);

//                                            | unit | func |  address  |   value   |    crc    |
const READ_ALL_REQUEST: [u8; 8] = [0x01, 0x03, 0x03, 0xE8, 0x00, 0x0E, 0x44, 0x7E];
const READ_FIRST_REQUEST: [u8; 8] = [0x01, 0x03, 0x03, 0xE8, 0x00, 0x08, 0xC4, 0x7C];
const READ_LAST_REQUEST: [u8; 8] = [0x01, 0x03, 0x03, 0xEF, 0x00, 0x07, 0x35, 0xB9];
const POWER_ON_REQUEST: [u8; 8] = [0x01, 0x06, 0x03, 0xE8, 0x00, 0x01, 0xC8, 0x7A];
const POWER_OFF_REQUEST: [u8; 8] = [0x01, 0x06, 0x03, 0xE8, 0x00, 0x00, 0x09, 0xBA];
// value and crc are filled in per request
const SET_VALUE_TEMPLATE: [u8; 8] = [0x01, 0x06, 0x03, 0xE9, 0x00, 0x00, 0x58, 0x7A];

//                                  | unit | func | count |
const READ_ALL_PREFIX: [u8; 3] = [0x01, 0x03, 0x1C];
const READ_FIRST_PREFIX: [u8; 3] = [0x01, 0x03, 0x10];
const READ_LAST_PREFIX: [u8; 3] = [0x01, 0x03, 0x0E];

/// One RTU request, each with a response that cannot be mistaken for another's
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Primitive {
    ReadAll,
    ReadFirst,
    ReadLast,
    PowerOn,
    PowerOff,
    SetValue(u16),
}

impl Primitive {
    pub(crate) fn from_order(order: Order) -> Option<Self> {
        match order {
            Order::ReadAll => Some(Primitive::ReadAll),
            Order::ReadFirst => Some(Primitive::ReadFirst),
            Order::ReadLast => Some(Primitive::ReadLast),
            Order::PowerOn => Some(Primitive::PowerOn),
            Order::PowerOff => Some(Primitive::PowerOff),
            Order::SetValue(x) => Some(Primitive::SetValue(x.raw())),
            Order::DelayedPowerOff | Order::CancelDelayedPowerOff => None,
        }
    }

    pub(crate) fn request(self) -> [u8; constants::REQUEST_LENGTH] {
        match self {
            Primitive::ReadAll => READ_ALL_REQUEST,
            Primitive::ReadFirst => READ_FIRST_REQUEST,
            Primitive::ReadLast => READ_LAST_REQUEST,
            Primitive::PowerOn => POWER_ON_REQUEST,
            Primitive::PowerOff => POWER_OFF_REQUEST,
            Primitive::SetValue(value) => set_value_request(value),
        }
    }

    /// mirror offset and count of the registers carried by the response
    fn registers(self) -> Option<(usize, usize)> {
        match self {
            Primitive::ReadAll => Some((0, REGISTER_COUNT)),
            Primitive::ReadFirst => Some((0, 8)),
            Primitive::ReadLast => Some((7, 7)),
            _ => None,
        }
    }

    pub(crate) fn response_length(self) -> usize {
        match self.registers() {
            Some((_, count)) => constants::DATA_OFFSET + 2 * count + constants::CRC_LENGTH,
            // a write is echoed
            None => constants::REQUEST_LENGTH,
        }
    }

    /// check a complete response, in the order length, CRC, known prefix
    pub(crate) fn validate(self, response: &[u8]) -> Result<(), LastFrameError> {
        if response.len() != self.response_length() {
            return Err(if response.is_empty() {
                LastFrameError::NoResponse
            } else {
                LastFrameError::NotCompleteFrame
            });
        }

        if !crc_matches(response) {
            return Err(LastFrameError::BadCrc);
        }

        let matches = match self {
            Primitive::ReadAll => response.starts_with(&READ_ALL_PREFIX),
            Primitive::ReadFirst => response.starts_with(&READ_FIRST_PREFIX),
            Primitive::ReadLast => response.starts_with(&READ_LAST_PREFIX),
            // the whole echo is known
            _ => response == self.request(),
        };

        if !matches {
            return Err(LastFrameError::OtherFrameError);
        }

        Ok(())
    }

    /// copy the register data of a validated response into the mirror
    pub(crate) fn apply(self, response: &[u8], mirror: &mut [u16; REGISTER_COUNT]) {
        if let Some((start, count)) = self.registers() {
            let data = response
                .get(constants::DATA_OFFSET..constants::DATA_OFFSET + 2 * count)
                .unwrap_or(&[]);
            for (reg, pair) in mirror[start..].iter_mut().zip(data.chunks_exact(2)) {
                *reg = u16::from_be_bytes([pair[0], pair[1]]);
            }
        }
    }
}

#[cfg(test)]
impl Primitive {
    /// answer of a well-behaved device whose registers are `device`
    pub(crate) fn answer(self, device: &[u16; REGISTER_COUNT]) -> Vec<u8> {
        match self.registers() {
            Some((start, count)) => {
                let mut frame = vec![constants::UNIT_ID, 0x03, (2 * count) as u8];
                for reg in &device[start..start + count] {
                    frame.extend_from_slice(&reg.to_be_bytes());
                }
                let crc = CRC.checksum(&frame);
                frame.extend_from_slice(&crc.to_le_bytes());
                frame
            }
            None => self.request().to_vec(),
        }
    }
}

impl std::fmt::Display for Primitive {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Primitive::ReadAll => f.write_str("READ ALL"),
            Primitive::ReadFirst => f.write_str("READ FIRST"),
            Primitive::ReadLast => f.write_str("READ LAST"),
            Primitive::PowerOn => f.write_str("POWER ON"),
            Primitive::PowerOff => f.write_str("POWER OFF"),
            Primitive::SetValue(x) => write!(f, "SET VALUE {x}"),
        }
    }
}

fn set_value_request(value: u16) -> [u8; constants::REQUEST_LENGTH] {
    let mut frame = SET_VALUE_TEMPLATE;
    frame[4..6].copy_from_slice(&value.to_be_bytes());
    let crc = CRC.checksum(&frame[..6]);
    frame[6..8].copy_from_slice(&crc.to_le_bytes());
    frame
}

fn crc_matches(frame: &[u8]) -> bool {
    match frame.len().checked_sub(constants::CRC_LENGTH) {
        Some(split) if split > 0 => {
            let (body, trailer) = frame.split_at(split);
            CRC.checksum(body).to_le_bytes() == trailer
        }
        _ => false,
    }
}

pub(crate) struct RtuDisplay<'a> {
    level: FrameDecodeLevel,
    primitive: Primitive,
    data: &'a [u8],
}

impl<'a> RtuDisplay<'a> {
    pub(crate) fn new(level: FrameDecodeLevel, primitive: Primitive, data: &'a [u8]) -> Self {
        RtuDisplay {
            level,
            primitive,
            data,
        }
    }
}

impl std::fmt::Display for RtuDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{} (unit: {}, len = {})",
            self.primitive,
            constants::UNIT_ID,
            self.data.len()
        )?;
        if self.level.payload_enabled() {
            format_bytes(f, self.data)?;
        }
        Ok(())
    }
}
