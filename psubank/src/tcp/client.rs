use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::common::phys::PhysLayer;
use crate::constants::{description, sector, MAX_CHANNELS, MAX_DESCRIPTION_LENGTH};
use crate::decode::DecodeLevel;
use crate::error::{ExceptionCode, SessionError, TcpClientError};
use crate::order::Order;
use crate::record::SharedChannelRecord;
use crate::tcp::frame::{constants, read_frame, MbapDisplay, MbapHeader};
use crate::types::IdentificationLabel;

const TX_ID: u16 = 1;
const UNIT_ID: u8 = 1;
const REQUEST_LENGTH: usize = 12;
// function code, address, value
const REQUEST_ADU_LENGTH: usize = 5;
const TIMEOUT: Duration = Duration::from_secs(1);

/// Condition of the connection to the local computer, as published for display
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TcpClientState {
    /// No refresh attempted yet
    NotConnectedYet,
    /// The last refresh succeeded
    NoError,
    /// The server did not answer in time
    Timeout,
    /// The connection could not be established
    OpeningSocket,
    /// The server closed the connection
    NoConnection,
    /// A request could not be sent
    Sending,
    /// A response could not be received
    Receiving,
    /// A response was too short
    IncompleteFrame,
    /// The server answered with an exception
    ExceptionFromServer,
    /// A response size did not match the request
    NumberOfReceivedData,
    /// A response carried an unexpected function code
    UnexpectedFunctionCode,
    /// The server runs a different build
    IdentificationLabelMismatch,
    /// The number of channels changed after identification
    ChannelCountChange,
    /// The server reported an impossible number of channels
    IncorrectChannelCount,
    /// A write response did not echo the request
    IncorrectWriteResponse,
}

impl From<TcpClientError> for TcpClientState {
    fn from(err: TcpClientError) -> Self {
        match err {
            TcpClientError::Timeout => TcpClientState::Timeout,
            TcpClientError::OpeningSocket(_) => TcpClientState::OpeningSocket,
            TcpClientError::NoConnection => TcpClientState::NoConnection,
            TcpClientError::Sending(_) => TcpClientState::Sending,
            TcpClientError::Receiving(_) => TcpClientState::Receiving,
            TcpClientError::IncompleteFrame(_) => TcpClientState::IncompleteFrame,
            TcpClientError::ExceptionFromServer(_) => TcpClientState::ExceptionFromServer,
            TcpClientError::NumberOfReceivedData { .. } => TcpClientState::NumberOfReceivedData,
            TcpClientError::UnexpectedFunctionCode(_) => TcpClientState::UnexpectedFunctionCode,
            TcpClientError::IdentificationLabelMismatch => {
                TcpClientState::IdentificationLabelMismatch
            }
            TcpClientError::ChannelCountChange { .. } => TcpClientState::ChannelCountChange,
            TcpClientError::IncorrectChannelCount(_) => TcpClientState::IncorrectChannelCount,
            TcpClientError::IncorrectWriteResponse => TcpClientState::IncorrectWriteResponse,
        }
    }
}

impl std::fmt::Display for TcpClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let text = match self {
            TcpClientState::NotConnectedYet => "not connected yet",
            TcpClientState::NoError => "connected",
            TcpClientState::Timeout => "timeout",
            TcpClientState::OpeningSocket => "unable to connect",
            TcpClientState::NoConnection => "no connection",
            TcpClientState::Sending => "sending failed",
            TcpClientState::Receiving => "receiving failed",
            TcpClientState::IncompleteFrame => "incomplete frame",
            TcpClientState::ExceptionFromServer => "exception from server",
            TcpClientState::NumberOfReceivedData => "wrong amount of data received",
            TcpClientState::UnexpectedFunctionCode => "unexpected function code",
            TcpClientState::IdentificationLabelMismatch => "identification label mismatch",
            TcpClientState::ChannelCountChange => "channel count changed",
            TcpClientState::IncorrectChannelCount => "incorrect channel count",
            TcpClientState::IncorrectWriteResponse => "incorrect write response",
        };
        f.write_str(text)
    }
}

/// Remote-mode replica of the control surface, polling a local computer over Modbus TCP
pub(crate) struct TcpClient {
    address: SocketAddr,
    decode: DecodeLevel,
    label: IdentificationLabel,
    link: Option<PhysLayer>,
    channel_count: Option<usize>,
    descriptions_loaded: bool,
    state: TcpClientState,
}

impl TcpClient {
    pub(crate) fn new(address: SocketAddr, decode: DecodeLevel) -> Self {
        Self {
            address,
            decode,
            label: IdentificationLabel::build_stamp(),
            link: None,
            channel_count: None,
            descriptions_loaded: false,
            state: TcpClientState::NotConnectedYet,
        }
    }

    #[cfg(test)]
    fn with_link(mut self, link: PhysLayer) -> Self {
        self.link = Some(link);
        self
    }

    pub(crate) fn state(&self) -> TcpClientState {
        self.state
    }

    /// One refresh cycle: identify the server, then either load the descriptions (once)
    /// or read every channel sector and forward pending orders
    ///
    /// Returns the remote-control flag of the server. Any failure closes the connection,
    /// the next refresh reconnects and identifies the server again.
    pub(crate) async fn refresh(
        &mut self,
        records: &mut Vec<SharedChannelRecord>,
    ) -> Result<bool, TcpClientError> {
        let result = self.exchange_all(records).await;
        match &result {
            Ok(_) => self.set_state(TcpClientState::NoError),
            Err(err) => {
                if self.link.take().is_some() {
                    tracing::info!("closed connection to {}", self.address);
                }
                tracing::debug!("refresh failed: {}", err);
                self.set_state((*err).into());
            }
        }
        result
    }

    fn set_state(&mut self, state: TcpClientState) {
        if state != self.state {
            match state {
                TcpClientState::NoError => tracing::info!("TCP client state: {}", state),
                _ => tracing::warn!("TCP client state: {}", state),
            }
            self.state = state;
        }
    }

    async fn exchange_all(
        &mut self,
        records: &mut Vec<SharedChannelRecord>,
    ) -> Result<bool, TcpClientError> {
        if self.link.is_none() {
            self.connect().await?;
        }

        let remote_control = self.identify(records).await?;

        if !self.descriptions_loaded {
            self.load_descriptions(records).await?;
            self.descriptions_loaded = true;
            return Ok(remote_control);
        }

        for (index, record) in records.iter_mut().enumerate() {
            let base = sector_address(index + 1);
            let words = self.read_registers(base, sector::WIDTH as u16).await?;
            let mut sector_words = [0u16; sector::WIDTH];
            sector_words.copy_from_slice(&words);
            record.load_sector(&sector_words);

            if let Some(order) = record.mailbox.take() {
                self.forward(base, order).await?;
            }
        }

        Ok(remote_control)
    }

    async fn connect(&mut self) -> Result<(), TcpClientError> {
        let socket = match tokio::time::timeout(TIMEOUT, TcpStream::connect(self.address)).await
        {
            Err(_) => return Err(TcpClientError::Timeout),
            Ok(Err(err)) => return Err(TcpClientError::OpeningSocket(err.kind())),
            Ok(Ok(socket)) => socket,
        };
        tracing::info!("connected to {}", self.address);
        self.link = Some(PhysLayer::new_tcp(socket));
        Ok(())
    }

    /// read sector 0, check the label and channel count, return the remote-control flag
    async fn identify(
        &mut self,
        records: &mut Vec<SharedChannelRecord>,
    ) -> Result<bool, TcpClientError> {
        let global = self
            .read_registers(sector::BASE, sector::WIDTH as u16)
            .await?;

        if IdentificationLabel::from_registers(&global[sector::LABEL..]) != self.label {
            return Err(TcpClientError::IdentificationLabelMismatch);
        }

        let count = global[sector::CHANNEL_COUNT];
        match self.channel_count {
            None => {
                if count == 0 || count as usize > MAX_CHANNELS {
                    return Err(TcpClientError::IncorrectChannelCount(count));
                }
                tracing::info!("server {} identified with {} channels", self.address, count);
                self.channel_count = Some(count as usize);
                records.resize_with(count as usize, || SharedChannelRecord::new(0, String::new()));
            }
            Some(latched) => {
                if count as usize != latched {
                    return Err(TcpClientError::ChannelCountChange {
                        latched,
                        received: count,
                    });
                }
            }
        }

        Ok(global[sector::REMOTE_CONTROL] != 0)
    }

    async fn load_descriptions(
        &mut self,
        records: &mut [SharedChannelRecord],
    ) -> Result<(), TcpClientError> {
        let lengths = self
            .read_registers(description::BASE, MAX_CHANNELS as u16)
            .await?;

        for (slot, length) in lengths.into_iter().enumerate() {
            let length = length as usize;
            // room for the NUL and one pad byte
            if length == 0 || length > MAX_DESCRIPTION_LENGTH + 2 {
                continue;
            }

            let address = description::TEXT_BASE + slot as u16 * description::STRIDE;
            let words = self.read_registers(address, (length / 2) as u16).await?;
            let bytes: Vec<u8> = words.iter().flat_map(|x| x.to_be_bytes()).collect();

            if bytes.get(length - 1) != Some(&0) {
                tracing::warn!("description of channel {} is not terminated", slot);
                continue;
            }

            let end = bytes.iter().position(|x| *x == 0).unwrap_or(bytes.len());
            if let Some(record) = records.get_mut(slot) {
                record.description = String::from_utf8_lossy(&bytes[..end]).into_owned();
            }
        }

        Ok(())
    }

    async fn forward(&mut self, base: u16, order: Order) -> Result<(), TcpClientError> {
        match order {
            Order::PowerOn
            | Order::PowerOff
            | Order::DelayedPowerOff
            | Order::CancelDelayedPowerOff => {
                self.write_register(base + sector::ORDER_CODE as u16, order.code())
                    .await
            }
            Order::SetValue(_) => {
                self.write_register(base + sector::ORDER_VALUE as u16, order.value())
                    .await
            }
            Order::ReadAll | Order::ReadFirst | Order::ReadLast => Ok(()),
        }
    }

    async fn read_registers(&mut self, start: u16, count: u16) -> Result<Vec<u16>, TcpClientError> {
        let request = request(constants::READ_HOLDING_REGISTERS, start, count);
        self.send(&request).await?;
        let (total, adu) = self.receive().await?;

        if total < constants::HEADER_LENGTH + 2 {
            return Err(TcpClientError::IncompleteFrame(total));
        }

        if adu[0] == constants::READ_HOLDING_REGISTERS | constants::EXCEPTION_MASK {
            return Err(ExceptionCode::from(adu[1]).into());
        }

        let byte_count = 2 * count as usize;
        if adu.len() != 2 + byte_count || adu[1] as usize != byte_count {
            return Err(TcpClientError::NumberOfReceivedData {
                expected: count,
                received: total,
            });
        }

        if adu[0] != constants::READ_HOLDING_REGISTERS {
            return Err(TcpClientError::UnexpectedFunctionCode(adu[0]));
        }

        Ok(adu[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }

    async fn write_register(&mut self, address: u16, value: u16) -> Result<(), TcpClientError> {
        let request = request(constants::WRITE_SINGLE_REGISTER, address, value);
        self.send(&request).await?;
        let (total, adu) = self.receive().await?;

        if adu.len() == 2 && adu[0] == constants::WRITE_SINGLE_REGISTER | constants::EXCEPTION_MASK {
            return Err(ExceptionCode::from(adu[1]).into());
        }

        if total != REQUEST_LENGTH || adu != request[constants::HEADER_LENGTH..] {
            return Err(TcpClientError::IncorrectWriteResponse);
        }

        Ok(())
    }

    async fn send(&mut self, request: &[u8]) -> Result<(), TcpClientError> {
        let link = self.link.as_mut().ok_or(TcpClientError::NoConnection)?;

        if self.decode.frame.enabled() {
            let header = MbapHeader {
                tx_id: TX_ID,
                unit_id: UNIT_ID,
                adu_length: REQUEST_ADU_LENGTH,
            };
            tracing::info!(
                "MBAP TX - {}",
                MbapDisplay::new(
                    self.decode.frame,
                    header,
                    &request[constants::HEADER_LENGTH..]
                )
            );
        }

        match tokio::time::timeout(TIMEOUT, link.write(request, self.decode.physical)).await {
            Err(_) => Err(TcpClientError::Timeout),
            Ok(Err(err)) => Err(TcpClientError::Sending(err.kind())),
            Ok(Ok(())) => Ok(()),
        }
    }

    /// receive one frame, returning its total length and its ADU
    async fn receive(&mut self) -> Result<(usize, Vec<u8>), TcpClientError> {
        let link = self.link.as_mut().ok_or(TcpClientError::NoConnection)?;

        let frame = match tokio::time::timeout(TIMEOUT, read_frame(link, self.decode)).await {
            Err(_) => return Err(TcpClientError::Timeout),
            Ok(Err(SessionError::Io(err))) => {
                return Err(match err.kind() {
                    std::io::ErrorKind::UnexpectedEof => TcpClientError::NoConnection,
                    kind => TcpClientError::Receiving(kind),
                })
            }
            Ok(Err(err)) => {
                tracing::warn!("{}", err);
                return Err(TcpClientError::Receiving(std::io::ErrorKind::InvalidData));
            }
            Ok(Ok(frame)) => frame,
        };

        let adu = frame.adu().to_vec();
        Ok((constants::HEADER_LENGTH + adu.len(), adu))
    }
}

fn sector_address(index: usize) -> u16 {
    sector::BASE + index as u16 * sector::STRIDE
}

fn request(function: u8, address: u16, value: u16) -> [u8; REQUEST_LENGTH] {
    let [tx_hi, tx_lo] = TX_ID.to_be_bytes();
    let [protocol_hi, protocol_lo] = constants::PROTOCOL_ID.to_be_bytes();
    let [address_hi, address_lo] = address.to_be_bytes();
    let [value_hi, value_lo] = value.to_be_bytes();
    [
        tx_hi,
        tx_lo,
        protocol_hi,
        protocol_lo,
        0x00,
        (REQUEST_ADU_LENGTH + 1) as u8,
        UNIT_ID,
        function,
        address_hi,
        address_lo,
        value_hi,
        value_lo,
    ]
}
