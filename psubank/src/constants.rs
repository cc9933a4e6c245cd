/// Number of holding registers exposed by every power supply
pub const REGISTER_COUNT: usize = 14;

/// Maximum number of channels (power supplies) in one bank
pub const MAX_CHANNELS: usize = 16;

/// Maximum length of a channel description in characters
pub const MAX_DESCRIPTION_LENGTH: usize = 100;

/// Length of the identification label carried in the global sector
pub const LABEL_LENGTH: usize = 40;

/// Default number of ticks per second
pub const DEFAULT_TICK_RATE: u8 = 4;

/// Filtered current (in 0.01 A) at or below which a decelerating supply may be switched off
pub const CURRENT_CUTOFF: u16 = 200;

/// Saturation limit of the powering-down counter
pub const MAX_POWERING_DOWN_COUNT: u16 = 30000;

/// Indices into the register mirror of a single power supply
pub mod register {
    /// Required status (bit 0 = power on)
    pub const REQUIRED_STATUS: usize = 0;
    /// Required current value (set point)
    pub const REQUIRED_VALUE: usize = 1;
    /// Physical id of the power supply
    pub const PSU_ID: usize = 2;
    /// Status reported by the supply (bit 0 = power on)
    pub const SLAVE_STATUS: usize = 3;
    /// Mean of the output current in 0.01 A
    pub const CURRENT_MEAN: usize = 4;
    /// Median of the output current in 0.01 A
    pub const CURRENT_MEDIAN: usize = 5;
    /// Filtered output current in 0.01 A
    pub const CURRENT_FILTERED: usize = 6;
    /// Peak-to-peak output current in 0.01 A
    pub const CURRENT_PEAK_TO_PEAK: usize = 7;
    /// Standard deviation of the output current in 0.01 A
    pub const CURRENT_STD: usize = 8;
    /// Mean of the output voltage in 0.01 V
    pub const VOLTAGE_MEAN: usize = 9;
    /// Median of the output voltage in 0.01 V
    pub const VOLTAGE_MEDIAN: usize = 10;
    /// Filtered output voltage in 0.01 V
    pub const VOLTAGE_FILTERED: usize = 11;
    /// Peak-to-peak output voltage in 0.01 V
    pub const VOLTAGE_PEAK_TO_PEAK: usize = 12;
    /// Standard deviation of the output voltage in 0.01 V
    pub const VOLTAGE_STD: usize = 13;

    /// Power-on bit of the status registers
    pub const POWER_ON_BIT: u16 = 0x0001;
}

/// Layout of the Modbus TCP register space shared by the server and the client
pub mod sector {
    /// First register of the sector table
    pub const BASE: u16 = 1000;
    /// Distance between the first registers of two sectors
    pub const STRIDE: u16 = 100;
    /// Number of defined registers per sector
    pub const WIDTH: usize = 22;

    /// Global sector: remote control flag (1 = the remote side has control)
    pub const REMOTE_CONTROL: usize = 0;
    /// Global sector: number of channels
    pub const CHANNEL_COUNT: usize = 1;
    /// Global sector: first register of the identification label
    pub const LABEL: usize = 2;

    /// Channel sector: transmission error rate in per-mille
    pub const ERROR_PER_MILLE: usize = 14;
    /// Channel sector: longest run of transmission errors
    pub const MAX_ERROR_RUN: usize = 15;
    /// Channel sector: communication state (high byte) and acknowledgement (low byte)
    pub const STATE_AND_ACK: usize = 16;
    /// Channel sector: power on (high byte) and id compatibility (low byte)
    pub const POWER_AND_ID: usize = 17;
    /// Channel sector: powering-down state (high byte) and last frame error (low byte)
    pub const POWERING_DOWN_AND_FRAME_ERROR: usize = 18;
    /// Channel sector: expected physical id
    pub const EXPECTED_ID: usize = 19;
    /// Channel sector: order code written by the remote side
    pub const ORDER_CODE: usize = 20;
    /// Channel sector: order value written by the remote side
    pub const ORDER_VALUE: usize = 21;
}

/// Layout of the read-only description region
pub mod description {
    /// Address of the description length table
    pub const BASE: u16 = 4000;
    /// Distance between two description text slots
    pub const STRIDE: u16 = 100;
    /// Address of the first description text slot
    pub const TEXT_BASE: u16 = BASE + STRIDE;
}
