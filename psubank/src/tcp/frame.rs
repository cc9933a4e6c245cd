use scursor::{ReadCursor, WriteCursor};

use crate::common::phys::{format_bytes, PhysLayer};
use crate::decode::{DecodeLevel, FrameDecodeLevel};
use crate::error::{FrameParseError, SessionError};

pub(crate) mod constants {
    pub(crate) const HEADER_LENGTH: usize = 7;
    pub(crate) const MAX_ADU_LENGTH: usize = 253;
    pub(crate) const MAX_FRAME_LENGTH: usize = HEADER_LENGTH + MAX_ADU_LENGTH;
    // includes the 1 byte unit id
    pub(crate) const MAX_LENGTH_FIELD: usize = MAX_ADU_LENGTH + 1;
    pub(crate) const PROTOCOL_ID: u16 = 0;

    pub(crate) const READ_HOLDING_REGISTERS: u8 = 0x03;
    pub(crate) const WRITE_SINGLE_REGISTER: u8 = 0x06;
    pub(crate) const EXCEPTION_MASK: u8 = 0x80;
    pub(crate) const MAX_READ_REGISTERS: u16 = 125;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct MbapHeader {
    pub(crate) tx_id: u16,
    pub(crate) unit_id: u8,
    pub(crate) adu_length: usize,
}

impl MbapHeader {
    pub(crate) fn parse(bytes: &[u8]) -> Result<Self, FrameParseError> {
        let mut cursor = ReadCursor::new(bytes);
        let tx_id = cursor.read_u16_be()?;
        let protocol_id = cursor.read_u16_be()?;
        let length = cursor.read_u16_be()? as usize;
        let unit_id = cursor.read_u8()?;

        if protocol_id != constants::PROTOCOL_ID {
            return Err(FrameParseError::UnknownProtocolId(protocol_id));
        }

        if length > constants::MAX_LENGTH_FIELD {
            return Err(FrameParseError::LengthTooBig(
                length,
                constants::MAX_LENGTH_FIELD,
            ));
        }

        // must be > 0 b/c the 1-byte unit identifier counts towards length
        if length == 0 {
            return Err(FrameParseError::LengthZero);
        }

        Ok(Self {
            tx_id,
            unit_id,
            adu_length: length - 1,
        })
    }
}

pub(crate) struct Frame {
    pub(crate) header: MbapHeader,
    adu: [u8; constants::MAX_ADU_LENGTH],
}

impl Frame {
    pub(crate) fn adu(&self) -> &[u8] {
        &self.adu[..self.header.adu_length]
    }
}

/// read one complete frame, the header first and then exactly the announced ADU
pub(crate) async fn read_frame(
    phys: &mut PhysLayer,
    decode: DecodeLevel,
) -> Result<Frame, SessionError> {
    let mut header = [0u8; constants::HEADER_LENGTH];
    phys.read_exact(&mut header, decode.physical).await?;
    let header = MbapHeader::parse(&header)?;

    let mut adu = [0u8; constants::MAX_ADU_LENGTH];
    phys.read_exact(&mut adu[..header.adu_length], decode.physical)
        .await?;

    let frame = Frame { header, adu };
    if decode.frame.enabled() {
        tracing::info!(
            "MBAP RX - {}",
            MbapDisplay::new(decode.frame, header, frame.adu())
        );
    }
    Ok(frame)
}

/// write the MBAP header followed by an ADU of known length
pub(crate) fn format_frame<'a, F>(
    buffer: &'a mut [u8; constants::MAX_FRAME_LENGTH],
    tx_id: u16,
    unit_id: u8,
    adu_length: usize,
    write_adu: F,
) -> Result<&'a [u8], scursor::WriteError>
where
    F: FnOnce(&mut WriteCursor) -> Result<(), scursor::WriteError>,
{
    {
        let mut cursor = WriteCursor::new(buffer.as_mut());
        cursor.write_u16_be(tx_id)?;
        cursor.write_u16_be(constants::PROTOCOL_ID)?;
        cursor.write_u16_be((adu_length + 1) as u16)?;
        cursor.write_u8(unit_id)?;
        write_adu(&mut cursor)?;
    }
    let total = (constants::HEADER_LENGTH + adu_length).min(constants::MAX_FRAME_LENGTH);
    Ok(&buffer[..total])
}

pub(crate) struct MbapDisplay<'a> {
    level: FrameDecodeLevel,
    header: MbapHeader,
    adu: &'a [u8],
}

impl<'a> MbapDisplay<'a> {
    pub(crate) fn new(level: FrameDecodeLevel, header: MbapHeader, adu: &'a [u8]) -> Self {
        MbapDisplay { level, header, adu }
    }
}

impl std::fmt::Display for MbapDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "tx_id: {} unit: {} len: {}",
            self.header.tx_id,
            self.header.unit_id,
            self.adu.len()
        )?;
        if self.level.payload_enabled() {
            format_bytes(f, self.adu)?;
        }
        Ok(())
    }
}
