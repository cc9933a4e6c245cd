/// Protocol logging settings carried by every engine
///
/// Frames are logged as `RTU TX`/`RTU RX` on the serial links and `MBAP TX`/`MBAP RX` on
/// TCP. Raw reads and writes are logged as `PHYS TX`/`PHYS RX`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct DecodeLevel {
    /// Logging of RTU and MBAP frames
    pub frame: FrameDecodeLevel,
    /// Logging of physical layer reads and writes
    pub physical: PhysDecodeLevel,
}

/// How much of each frame is logged at the INFO level
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum FrameDecodeLevel {
    /// Frames are not logged
    #[default]
    Nothing,
    /// Function, addresses and lengths
    Header,
    /// Header plus the payload in hexadecimal
    Payload,
}

/// How much of the raw traffic on a serial port or socket is logged at the INFO level
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum PhysDecodeLevel {
    /// Traffic is not logged
    #[default]
    Nothing,
    /// Byte counts only
    Length,
    /// Byte counts and a hex dump
    Data,
}

impl DecodeLevel {
    /// Log nothing
    pub fn nothing() -> Self {
        Self::default()
    }

    /// Combine a frame level and a physical level
    pub fn new(frame: FrameDecodeLevel, physical: PhysDecodeLevel) -> Self {
        Self { frame, physical }
    }
}

impl FrameDecodeLevel {
    pub(crate) fn enabled(self) -> bool {
        self != FrameDecodeLevel::Nothing
    }

    pub(crate) fn payload_enabled(self) -> bool {
        self == FrameDecodeLevel::Payload
    }
}

impl PhysDecodeLevel {
    pub(crate) fn enabled(self) -> bool {
        self != PhysDecodeLevel::Nothing
    }

    pub(crate) fn data_enabled(self) -> bool {
        self == PhysDecodeLevel::Data
    }
}
