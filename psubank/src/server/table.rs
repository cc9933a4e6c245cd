use crate::constants::{description, sector, MAX_CHANNELS, MAX_DESCRIPTION_LENGTH};
use crate::error::PolicyError;
use crate::order::{Order, NO_ORDER};
use crate::record::SharedChannelRecord;
use crate::types::IdentificationLabel;

/// Location of a validated register request
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Region {
    Sector { index: usize, offset: usize },
    Lengths { offset: usize },
    Text { slot: usize, offset: usize },
}

/// Holding-register image served to remote computers in local mode
///
/// Sector 0 carries the remote-control flag, the channel count and the identification
/// label. Sectors 1..=N mirror the channels. Every address is 0-based, as carried in the
/// Modbus PDU.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerTable {
    sectors: Vec<[u16; sector::WIDTH]>,
    lengths: [u16; MAX_CHANNELS],
    texts: Vec<Vec<u8>>,
}

impl ServerTable {
    /// Build the table for a roster with the given channel descriptions
    ///
    /// Descriptions beyond [`MAX_CHANNELS`] are ignored and each text is truncated to
    /// [`MAX_DESCRIPTION_LENGTH`] bytes.
    pub fn new<S: AsRef<str>>(label: IdentificationLabel, descriptions: &[S]) -> Self {
        let count = descriptions.len().min(MAX_CHANNELS);

        let mut global = [0u16; sector::WIDTH];
        global[sector::CHANNEL_COUNT] = count as u16;
        global[sector::LABEL..].copy_from_slice(&label.to_registers());

        let mut channel = [0u16; sector::WIDTH];
        channel[sector::ORDER_CODE] = NO_ORDER;

        let mut sectors = vec![global];
        sectors.resize(count + 1, channel);

        let mut lengths = [0u16; MAX_CHANNELS];
        let mut texts = vec![Vec::new(); MAX_CHANNELS];
        for (slot, text) in descriptions.iter().take(count).enumerate() {
            let bytes = description_bytes(text.as_ref());
            lengths[slot] = bytes.len() as u16;
            texts[slot] = bytes;
        }

        Self {
            sectors,
            lengths,
            texts,
        }
    }

    /// Number of channel sectors
    pub fn channel_count(&self) -> usize {
        self.sectors.len() - 1
    }

    /// true when the remote computer has control
    pub fn remote_control(&self) -> bool {
        self.sectors[0][sector::REMOTE_CONTROL] != 0
    }

    /// Hand control to the remote computer or take it back
    pub fn set_remote_control(&mut self, remote: bool) {
        self.sectors[0][sector::REMOTE_CONTROL] = remote as u16;
    }

    /// Publish a channel record into its sector, leaving the order fields alone
    pub fn export_channel(&mut self, channel: usize, record: &SharedChannelRecord) {
        if let Some(words) = self.sectors.get_mut(channel + 1) {
            record.export_sector(words);
        }
    }

    /// Consume the order written by the remote computer into a channel sector
    ///
    /// Both order fields are reset whether or not an order was pending.
    pub fn take_order(&mut self, channel: usize) -> Option<Order> {
        let words = self.sectors.get_mut(channel + 1)?;
        let code = std::mem::replace(&mut words[sector::ORDER_CODE], NO_ORDER);
        let value = std::mem::replace(&mut words[sector::ORDER_VALUE], 0);
        if code == NO_ORDER {
            return None;
        }
        let order = Order::from_parts(code, value);
        if order.is_none() {
            tracing::warn!(
                "channel {}: ignoring unknown remote order code {}",
                channel,
                code
            );
        }
        order
    }

    /// Read `count` registers starting at `address`
    pub fn read(&self, address: u16, count: u16) -> Result<Vec<u16>, PolicyError> {
        let count_usize = count as usize;
        match self.locate(address, count)? {
            Region::Sector { index, offset } => {
                Ok(self.sectors[index][offset..offset + count_usize].to_vec())
            }
            Region::Lengths { offset } => Ok(self.lengths[offset..offset + count_usize].to_vec()),
            Region::Text { slot, offset } => Ok(self.texts[slot]
                [2 * offset..2 * (offset + count_usize)]
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect()),
        }
    }

    /// Write registers starting at `address`
    ///
    /// Only single-register writes to the order fields of a channel sector are accepted.
    /// Writing the order value also sets the order code to set-value.
    pub fn write(&mut self, address: u16, values: &[u16]) -> Result<(), PolicyError> {
        let value = match values {
            [value] => *value,
            _ => {
                return Err(PolicyError::WriteCount(
                    values.len().min(u16::MAX as usize) as u16,
                ))
            }
        };

        match self.locate(address, 1)? {
            Region::Sector { index, offset } if index != 0 => match offset {
                sector::ORDER_CODE => {
                    self.sectors[index][sector::ORDER_CODE] = value;
                    Ok(())
                }
                sector::ORDER_VALUE => {
                    self.sectors[index][sector::ORDER_VALUE] = value;
                    self.sectors[index][sector::ORDER_CODE] =
                        Order::SetValue(Default::default()).code();
                    Ok(())
                }
                _ => Err(PolicyError::ReadOnly(address)),
            },
            _ => Err(PolicyError::ReadOnly(address)),
        }
    }

    fn locate(&self, address: u16, count: u16) -> Result<Region, PolicyError> {
        if address < sector::BASE {
            return Err(PolicyError::Unmapped(address));
        }

        let start = address as usize;
        let end = start + count as usize;
        let stride = sector::STRIDE as usize;

        let sectors_end =
            sector::BASE as usize + self.channel_count() * stride + sector::WIDTH;
        if start < sectors_end {
            let relative = start - sector::BASE as usize;
            let (index, offset) = (relative / stride, relative % stride);
            if offset >= sector::WIDTH {
                return Err(PolicyError::OutsideSector(address));
            }
            if offset + count as usize > sector::WIDTH {
                return Err(PolicyError::SpansSectors(address, count));
            }
            return Ok(Region::Sector { index, offset });
        }

        if address < description::BASE {
            return Err(PolicyError::Unmapped(address));
        }

        if end <= description::BASE as usize + MAX_CHANNELS {
            return Ok(Region::Lengths {
                offset: start - description::BASE as usize,
            });
        }

        if address < description::TEXT_BASE {
            return Err(PolicyError::Unmapped(address));
        }

        let relative = start - description::TEXT_BASE as usize;
        let stride = description::STRIDE as usize;
        let (slot, offset) = (relative / stride, relative % stride);
        if slot >= MAX_CHANNELS {
            return Err(PolicyError::Unmapped(address));
        }
        if 2 * (offset + count as usize) > self.lengths[slot] as usize {
            return Err(PolicyError::DescriptionOutOfRange(address, count));
        }
        Ok(Region::Text { slot, offset })
    }
}

/// text bytes followed by a NUL, padded to an even length
fn description_bytes(text: &str) -> Vec<u8> {
    let mut bytes: Vec<u8> = text.bytes().take(MAX_DESCRIPTION_LENGTH).collect();
    if !bytes.is_empty() {
        bytes.push(0);
        if bytes.len() % 2 == 1 {
            bytes.push(0);
        }
    }
    bytes
}
