use crate::constants::LABEL_LENGTH;

/// Health of the link to a single power supply, as published to observers
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CommunicationState {
    /// The serial port could not be opened or was closed after an I/O error
    PortNotOpen,
    /// The link works but the device reports an unexpected physical id
    WrongPhysicalId,
    /// Consecutive errors exceeded four times the tick rate
    PermanentErrors,
    /// Consecutive errors exceeded the tick rate
    TemporaryErrors,
    /// The last exchanges succeeded
    Healthy,
}

impl CommunicationState {
    /// Value used in the sector table
    pub fn to_u8(self) -> u8 {
        match self {
            CommunicationState::PortNotOpen => 0,
            CommunicationState::WrongPhysicalId => 1,
            CommunicationState::PermanentErrors => 2,
            CommunicationState::TemporaryErrors => 3,
            CommunicationState::Healthy => 4,
        }
    }

    /// Decode the value used in the sector table
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CommunicationState::PortNotOpen),
            1 => Some(CommunicationState::WrongPhysicalId),
            2 => Some(CommunicationState::PermanentErrors),
            3 => Some(CommunicationState::TemporaryErrors),
            4 => Some(CommunicationState::Healthy),
            _ => None,
        }
    }

    /// true if orders reach the device in this state
    pub fn is_live(self) -> bool {
        matches!(
            self,
            CommunicationState::Healthy | CommunicationState::TemporaryErrors
        )
    }
}

impl std::fmt::Display for CommunicationState {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            CommunicationState::PortNotOpen => f.write_str("port not open"),
            CommunicationState::WrongPhysicalId => f.write_str("wrong physical id"),
            CommunicationState::PermanentErrors => f.write_str("permanent errors"),
            CommunicationState::TemporaryErrors => f.write_str("temporary errors"),
            CommunicationState::Healthy => f.write_str("healthy"),
        }
    }
}

/// Classification of the most recent RTU exchange
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LastFrameError {
    /// Nothing to report, leaves the previous classification in place
    Unspecified,
    /// No byte was received
    NoResponse,
    /// Fewer or more bytes than expected were received
    NotCompleteFrame,
    /// The CRC did not match
    BadCrc,
    /// The frame did not start with the expected bytes
    OtherFrameError,
    /// The frame was valid
    Perfection,
}

impl LastFrameError {
    /// Value used in the sector table
    pub fn to_u8(self) -> u8 {
        match self {
            LastFrameError::Unspecified => 0,
            LastFrameError::NoResponse => 1,
            LastFrameError::NotCompleteFrame => 2,
            LastFrameError::BadCrc => 3,
            LastFrameError::OtherFrameError => 4,
            LastFrameError::Perfection => 5,
        }
    }

    /// Decode the value used in the sector table
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(LastFrameError::Unspecified),
            1 => Some(LastFrameError::NoResponse),
            2 => Some(LastFrameError::NotCompleteFrame),
            3 => Some(LastFrameError::BadCrc),
            4 => Some(LastFrameError::OtherFrameError),
            5 => Some(LastFrameError::Perfection),
            _ => None,
        }
    }
}

impl std::fmt::Display for LastFrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            LastFrameError::Unspecified => f.write_str("unspecified"),
            LastFrameError::NoResponse => f.write_str("no response"),
            LastFrameError::NotCompleteFrame => f.write_str("incomplete frame"),
            LastFrameError::BadCrc => f.write_str("bad crc"),
            LastFrameError::OtherFrameError => f.write_str("unexpected frame"),
            LastFrameError::Perfection => f.write_str("perfect"),
        }
    }
}

/// State of the graceful shutdown sequence of a channel
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PoweringDownState {
    /// No shutdown in progress
    Inactive,
    /// Current is being ramped to zero before switching off
    CurrentDecelerating,
    /// Current did not fall below the cutoff in time
    TimeoutExceeded,
}

impl PoweringDownState {
    /// Value used in the sector table
    pub fn to_u8(self) -> u8 {
        match self {
            PoweringDownState::Inactive => 0,
            PoweringDownState::CurrentDecelerating => 1,
            PoweringDownState::TimeoutExceeded => 2,
        }
    }

    /// Decode the value used in the sector table
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PoweringDownState::Inactive),
            1 => Some(PoweringDownState::CurrentDecelerating),
            2 => Some(PoweringDownState::TimeoutExceeded),
            _ => None,
        }
    }
}

impl std::fmt::Display for PoweringDownState {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            PoweringDownState::Inactive => f.write_str("inactive"),
            PoweringDownState::CurrentDecelerating => f.write_str("current decelerating"),
            PoweringDownState::TimeoutExceeded => f.write_str("timeout exceeded"),
        }
    }
}

/// Required output current, linear 0..200.00 A over the full `u16` range
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct SetPoint {
    raw: u16,
}

impl SetPoint {
    const RAW_PER_AMPERE: f64 = 0.005 * 65536.0;

    /// Create from the raw register value
    pub fn new(raw: u16) -> Self {
        Self { raw }
    }

    /// Encode a current in amperes, rounding to nearest and saturating at both ends
    pub fn from_amperes(amperes: f64) -> Self {
        // float to int casts saturate, NaN becomes 0
        Self {
            raw: (amperes * Self::RAW_PER_AMPERE + 0.5) as u16,
        }
    }

    /// Raw register value
    pub fn raw(self) -> u16 {
        self.raw
    }

    /// Current in amperes
    pub fn amperes(self) -> f64 {
        self.raw as f64 / Self::RAW_PER_AMPERE
    }
}

impl std::fmt::Display for SetPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:.2} A", self.amperes())
    }
}

/// Number of ticks per second, which scales every time constant
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TickRate {
    value: u8,
}

impl TickRate {
    /// Largest supported rate, keeps the permanent-error threshold below the counter's saturation
    pub const MAX: u8 = 60;

    /// Create a tick rate in the range 1..=60
    pub fn new(value: u8) -> Option<Self> {
        if value == 0 || value > Self::MAX {
            return None;
        }
        Some(Self { value })
    }

    /// ticks per second
    pub fn get(self) -> u8 {
        self.value
    }

    /// duration of a single tick
    pub fn period(self) -> std::time::Duration {
        std::time::Duration::from_secs(1) / self.value as u32
    }

    /// consecutive errors above which a channel has temporary errors
    pub fn temporary_error_threshold(self) -> u8 {
        self.value
    }

    /// consecutive errors above which a channel has permanent errors
    pub fn permanent_error_threshold(self) -> u8 {
        self.value.saturating_mul(4)
    }

    /// ticks allowed for the current to fall below the cutoff during shutdown
    pub fn powering_down_timeout(self) -> u16 {
        self.value as u16 * 8
    }
}

impl Default for TickRate {
    fn default() -> Self {
        Self {
            value: crate::constants::DEFAULT_TICK_RATE,
        }
    }
}

/// Build stamp compared byte-for-byte by the TCP client and server
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IdentificationLabel {
    bytes: [u8; LABEL_LENGTH],
}

impl IdentificationLabel {
    /// Label of this build
    pub fn build_stamp() -> Self {
        Self::from_text(concat!("psubank ", env!("CARGO_PKG_VERSION")))
    }

    /// Create a NUL-padded label, truncated so that at least one NUL remains
    pub fn from_text(text: &str) -> Self {
        let mut bytes = [0; LABEL_LENGTH];
        for (dest, src) in bytes.iter_mut().zip(text.bytes().take(LABEL_LENGTH - 1)) {
            *dest = src;
        }
        Self { bytes }
    }

    /// Unpack from big-endian register pairs
    pub fn from_registers(registers: &[u16]) -> Self {
        let mut bytes = [0; LABEL_LENGTH];
        for (pair, register) in bytes.chunks_exact_mut(2).zip(registers) {
            pair[0] = (register >> 8) as u8;
            pair[1] = *register as u8;
        }
        Self { bytes }
    }

    /// Pack into big-endian register pairs
    pub fn to_registers(&self) -> [u16; LABEL_LENGTH / 2] {
        let mut registers = [0; LABEL_LENGTH / 2];
        for (register, pair) in registers.iter_mut().zip(self.bytes.chunks_exact(2)) {
            *register = u16::from_be_bytes([pair[0], pair[1]]);
        }
        registers
    }

    /// raw bytes of the label
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Display for IdentificationLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let end = self
            .bytes
            .iter()
            .position(|x| *x == 0)
            .unwrap_or(LABEL_LENGTH);
        f.write_str(&String::from_utf8_lossy(&self.bytes[..end]))
    }
}
