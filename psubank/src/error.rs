pub(crate) mod constants {
    pub(crate) const ILLEGAL_FUNCTION: u8 = 0x01;
    pub(crate) const ILLEGAL_DATA_ADDRESS: u8 = 0x02;
    pub(crate) const ILLEGAL_DATA_VALUE: u8 = 0x03;
    pub(crate) const SERVER_DEVICE_FAILURE: u8 = 0x04;
}

/// Exception codes defined in the Modbus specification
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExceptionCode {
    /// The function code received in the query is not an allowable action for the server
    IllegalFunction,
    /// The data address received in the query is not an allowable address for the server
    IllegalDataAddress,
    /// A value contained in the request is not an allowable value for server
    IllegalDataValue,
    /// An unrecoverable error occurred while the server was attempting to perform the requested
    /// action
    ServerDeviceFailure,
    /// The exception code received is not one used by this system
    Unknown(u8),
}

impl From<u8> for ExceptionCode {
    fn from(value: u8) -> Self {
        match value {
            constants::ILLEGAL_FUNCTION => ExceptionCode::IllegalFunction,
            constants::ILLEGAL_DATA_ADDRESS => ExceptionCode::IllegalDataAddress,
            constants::ILLEGAL_DATA_VALUE => ExceptionCode::IllegalDataValue,
            constants::SERVER_DEVICE_FAILURE => ExceptionCode::ServerDeviceFailure,
            _ => ExceptionCode::Unknown(value),
        }
    }
}

impl From<ExceptionCode> for u8 {
    fn from(ex: ExceptionCode) -> Self {
        match ex {
            ExceptionCode::IllegalFunction => constants::ILLEGAL_FUNCTION,
            ExceptionCode::IllegalDataAddress => constants::ILLEGAL_DATA_ADDRESS,
            ExceptionCode::IllegalDataValue => constants::ILLEGAL_DATA_VALUE,
            ExceptionCode::ServerDeviceFailure => constants::SERVER_DEVICE_FAILURE,
            ExceptionCode::Unknown(value) => value,
        }
    }
}

impl std::error::Error for ExceptionCode {}

impl std::fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ExceptionCode::IllegalFunction => f.write_str(
                "function code received in the query is not an allowable action for the server",
            ),
            ExceptionCode::IllegalDataAddress => f.write_str(
                "data address received in the query is not an allowable address for the server",
            ),
            ExceptionCode::IllegalDataValue => f.write_str(
                "value contained in the request is not an allowable value for server",
            ),
            ExceptionCode::ServerDeviceFailure => f.write_str(
                "unrecoverable error occurred while the server was attempting to perform the requested action",
            ),
            ExceptionCode::Unknown(code) => write!(f, "received unknown exception code: {code}"),
        }
    }
}

/// Rejection of a register request by the server table
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyError {
    /// The address is below the sector table or in a gap between regions
    Unmapped(u16),
    /// The offset is beyond the defined width of a sector
    OutsideSector(u16),
    /// A multi-register request does not fit in one sector
    SpansSectors(u16, u16),
    /// The registers are read-only
    ReadOnly(u16),
    /// Only single-register writes are accepted
    WriteCount(u16),
    /// The request does not fit in a description slot
    DescriptionOutOfRange(u16, u16),
}

impl std::error::Error for PolicyError {}

impl std::fmt::Display for PolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            PolicyError::Unmapped(address) => write!(f, "address {address} is not mapped"),
            PolicyError::OutsideSector(address) => {
                write!(f, "address {address} is beyond the width of its sector")
            }
            PolicyError::SpansSectors(address, count) => write!(
                f,
                "request at {address} of {count} registers does not fit in one sector"
            ),
            PolicyError::ReadOnly(address) => write!(f, "address {address} is read-only"),
            PolicyError::WriteCount(count) => {
                write!(f, "write of {count} registers, only single writes are accepted")
            }
            PolicyError::DescriptionOutOfRange(address, count) => write!(
                f,
                "request at {address} of {count} registers exceeds the description length"
            ),
        }
    }
}

impl From<PolicyError> for ExceptionCode {
    fn from(_: PolicyError) -> Self {
        ExceptionCode::IllegalDataAddress
    }
}

/// Failure of a Modbus TCP client refresh, each one closes the connection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TcpClientError {
    /// The server did not answer in time
    Timeout,
    /// The connection could not be established
    OpeningSocket(std::io::ErrorKind),
    /// The server closed the connection
    NoConnection,
    /// A request could not be sent
    Sending(std::io::ErrorKind),
    /// A response could not be received
    Receiving(std::io::ErrorKind),
    /// The response is too short to be valid
    IncompleteFrame(usize),
    /// The server answered with an exception
    ExceptionFromServer(ExceptionCode),
    /// The response size does not match the request
    NumberOfReceivedData {
        /// number of registers requested
        expected: u16,
        /// number of bytes received
        received: usize,
    },
    /// The response carries a function code other than the requested one
    UnexpectedFunctionCode(u8),
    /// The server runs a different build
    IdentificationLabelMismatch,
    /// The number of channels changed after identification
    ChannelCountChange {
        /// count latched at identification
        latched: usize,
        /// count currently reported
        received: u16,
    },
    /// The server reports an impossible number of channels
    IncorrectChannelCount(u16),
    /// A write response does not echo the request
    IncorrectWriteResponse,
}

impl std::error::Error for TcpClientError {}

impl std::fmt::Display for TcpClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            TcpClientError::Timeout => f.write_str("timeout while waiting for the server"),
            TcpClientError::OpeningSocket(kind) => write!(f, "unable to connect: {kind}"),
            TcpClientError::NoConnection => f.write_str("connection closed by the server"),
            TcpClientError::Sending(kind) => write!(f, "unable to send request: {kind}"),
            TcpClientError::Receiving(kind) => write!(f, "unable to receive response: {kind}"),
            TcpClientError::IncompleteFrame(len) => {
                write!(f, "response of {len} bytes is too short")
            }
            TcpClientError::ExceptionFromServer(ex) => write!(f, "server exception: {ex}"),
            TcpClientError::NumberOfReceivedData { expected, received } => write!(
                f,
                "received {received} bytes in response to a read of {expected} registers"
            ),
            TcpClientError::UnexpectedFunctionCode(code) => {
                write!(f, "unexpected function code: 0x{code:02X}")
            }
            TcpClientError::IdentificationLabelMismatch => {
                f.write_str("server identification label does not match this build")
            }
            TcpClientError::ChannelCountChange { latched, received } => write!(
                f,
                "server channel count changed from {latched} to {received}"
            ),
            TcpClientError::IncorrectChannelCount(count) => {
                write!(f, "server reports an invalid channel count: {count}")
            }
            TcpClientError::IncorrectWriteResponse => {
                f.write_str("write response does not echo the request")
            }
        }
    }
}

impl From<ExceptionCode> for TcpClientError {
    fn from(ex: ExceptionCode) -> Self {
        TcpClientError::ExceptionFromServer(ex)
    }
}

/// Invalid channel roster
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RosterError {
    /// Local mode needs at least one channel
    NoChannels,
    /// More channels than a bank supports
    TooManyChannels(usize),
    /// Physical id 0 is reserved
    InvalidId(usize),
    /// Description exceeds the maximum length
    DescriptionTooLong(usize),
    /// Two channels share a serial port
    DuplicatePort(String),
}

impl std::error::Error for RosterError {}

impl std::fmt::Display for RosterError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RosterError::NoChannels => f.write_str("at least one channel is required"),
            RosterError::TooManyChannels(count) => write!(
                f,
                "{count} channels configured, the maximum is {}",
                crate::constants::MAX_CHANNELS
            ),
            RosterError::InvalidId(index) => {
                write!(f, "channel {index} has physical id 0, ids are 1..=255")
            }
            RosterError::DescriptionTooLong(index) => write!(
                f,
                "description of channel {index} exceeds {} characters",
                crate::constants::MAX_DESCRIPTION_LENGTH
            ),
            RosterError::DuplicatePort(port) => {
                write!(f, "serial port {port} is used by more than one channel")
            }
        }
    }
}

/// Errors that end a server session
#[derive(Debug)]
pub(crate) enum SessionError {
    /// I/O error on the socket
    Io(std::io::Error),
    /// Malformed MBAP header
    BadFrame(FrameParseError),
    /// A response did not fit in the frame buffer
    Internal,
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            SessionError::Io(err) => write!(f, "i/o error: {err}"),
            SessionError::BadFrame(err) => write!(f, "bad frame: {err}"),
            SessionError::Internal => f.write_str("response exceeds the frame buffer"),
        }
    }
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::Io(err)
    }
}

impl From<scursor::WriteError> for SessionError {
    fn from(_: scursor::WriteError) -> Self {
        SessionError::Internal
    }
}

impl From<FrameParseError> for SessionError {
    fn from(err: FrameParseError) -> Self {
        SessionError::BadFrame(err)
    }
}

/// errors that occur while parsing an MBAP header
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum FrameParseError {
    /// Received TCP frame with the length field set to zero
    LengthZero,
    /// Received TCP frame with length that exceeds max allowed size
    LengthTooBig(usize, usize),
    /// Received TCP frame within non-Modbus protocol id
    UnknownProtocolId(u16),
    /// Header is shorter than its fixed size
    InsufficientBytes,
}

impl std::fmt::Display for FrameParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FrameParseError::LengthZero => {
                f.write_str("received TCP frame with the length field set to zero")
            }
            FrameParseError::LengthTooBig(size, max) => write!(
                f,
                "received TCP frame with length ({size}) that exceeds max allowed size ({max})"
            ),
            FrameParseError::UnknownProtocolId(id) => {
                write!(f, "received TCP frame with non-Modbus protocol id: {id}")
            }
            FrameParseError::InsufficientBytes => f.write_str("MBAP header is incomplete"),
        }
    }
}

impl From<scursor::ReadError> for FrameParseError {
    fn from(_: scursor::ReadError) -> Self {
        FrameParseError::InsufficientBytes
    }
}

/// Reason an operator request was refused
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderError {
    /// The other computer has control
    ControlElsewhere,
    /// No channel with this index
    NoSuchChannel(usize),
    /// Control is handed over from the local computer only
    RemoteMode,
}

impl std::error::Error for OrderError {}

impl std::fmt::Display for OrderError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            OrderError::ControlElsewhere => f.write_str("control is held by the other computer"),
            OrderError::NoSuchChannel(index) => write!(f, "no channel {index}"),
            OrderError::RemoteMode => {
                f.write_str("control can only be handed over from the local computer")
            }
        }
    }
}
