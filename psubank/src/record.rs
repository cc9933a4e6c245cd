use crate::constants::{register, sector, REGISTER_COUNT};
use crate::order::OrderMailbox;
use crate::types::{CommunicationState, LastFrameError, PoweringDownState, SetPoint};

/// Result of one RTU poll, produced by the serial engine
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RtuReport {
    /// complete register mirror after a successful exchange, `None` when unchanged
    pub registers: Option<[u16; REGISTER_COUNT]>,
    /// transmission errors in per-mille
    pub error_per_mille: u16,
    /// longest run of transmission errors
    pub max_error_run: u16,
    /// communication state derived from the consecutive-error counter
    pub state: CommunicationState,
    /// classification of the last exchange
    pub last_frame_error: LastFrameError,
    /// true once the device answered a request on this link
    pub acknowledged: bool,
}

/// Externally visible state of one channel
///
/// Three copies exist per channel: the polling side written by the serial engine or the
/// TCP client, the render side read by the operator, and the sector table read by the
/// TCP server. The orchestrator keeps them consistent once per tick.
#[derive(Clone, Debug, PartialEq)]
pub struct SharedChannelRecord {
    /// copy of the device's holding registers
    pub registers: [u16; REGISTER_COUNT],
    /// transmission errors in per-mille
    pub error_per_mille: u16,
    /// longest run of transmission errors
    pub max_error_run: u16,
    /// health of the link
    pub state: CommunicationState,
    /// classification of the last exchange that was not unspecified
    pub last_frame_error: LastFrameError,
    /// true once the device answered a request
    pub acknowledged: bool,
    /// power switch as reported by the device
    pub power_on: bool,
    /// true if the device reports the expected physical id
    pub id_compatible: bool,
    /// state of the graceful shutdown sequence
    pub powering_down: PoweringDownState,
    /// physical id configured for this channel
    pub expected_id: u8,
    /// operator-facing description of the channel
    pub description: String,
    /// pending order
    pub mailbox: OrderMailbox,
}

impl SharedChannelRecord {
    /// Create the record of a channel that has not been polled yet
    pub fn new(expected_id: u8, description: String) -> Self {
        Self {
            registers: [0; REGISTER_COUNT],
            error_per_mille: 0,
            max_error_run: 0,
            state: CommunicationState::PortNotOpen,
            last_frame_error: LastFrameError::Unspecified,
            acknowledged: false,
            power_on: false,
            id_compatible: false,
            powering_down: PoweringDownState::Inactive,
            expected_id,
            description,
            mailbox: OrderMailbox::default(),
        }
    }

    /// Apply the outcome of an RTU poll
    pub fn load_rtu_report(&mut self, report: &RtuReport) {
        if let Some(registers) = report.registers {
            self.registers = registers;
            self.power_on = registers[register::SLAVE_STATUS] & register::POWER_ON_BIT != 0;
            self.id_compatible = registers[register::PSU_ID] == self.expected_id as u16;
        }

        self.error_per_mille = report.error_per_mille;
        self.max_error_run = report.max_error_run;
        self.acknowledged = report.acknowledged;

        self.state = match report.state {
            CommunicationState::Healthy if !self.id_compatible => {
                CommunicationState::WrongPhysicalId
            }
            state => state,
        };

        if report.last_frame_error != LastFrameError::Unspecified {
            self.last_frame_error = report.last_frame_error;
        }
    }

    /// Copy of this record as seen by another context, with an empty mailbox
    pub fn published(&self) -> Self {
        Self {
            mailbox: OrderMailbox::default(),
            ..self.clone()
        }
    }

    /// Write the published words (0..20) of a channel sector
    pub fn export_sector(&self, words: &mut [u16; sector::WIDTH]) {
        words[..REGISTER_COUNT].copy_from_slice(&self.registers);
        words[sector::ERROR_PER_MILLE] = self.error_per_mille;
        words[sector::MAX_ERROR_RUN] = self.max_error_run;
        words[sector::STATE_AND_ACK] = pack(self.state.to_u8(), self.acknowledged as u8);
        words[sector::POWER_AND_ID] = pack(self.power_on as u8, self.id_compatible as u8);
        words[sector::POWERING_DOWN_AND_FRAME_ERROR] = pack(
            self.powering_down.to_u8(),
            self.last_frame_error.to_u8(),
        );
        words[sector::EXPECTED_ID] = self.expected_id as u16;
    }

    /// Load the published words of a channel sector read from a remote server
    pub fn load_sector(&mut self, words: &[u16; sector::WIDTH]) {
        self.registers.copy_from_slice(&words[..REGISTER_COUNT]);
        self.error_per_mille = words[sector::ERROR_PER_MILLE];
        self.max_error_run = words[sector::MAX_ERROR_RUN];

        let (state, ack) = unpack(words[sector::STATE_AND_ACK]);
        self.state = CommunicationState::from_u8(state).unwrap_or(CommunicationState::PortNotOpen);
        self.acknowledged = ack != 0;

        let (power, id) = unpack(words[sector::POWER_AND_ID]);
        self.power_on = power != 0;
        self.id_compatible = id != 0;

        let (powering_down, frame_error) = unpack(words[sector::POWERING_DOWN_AND_FRAME_ERROR]);
        self.powering_down =
            PoweringDownState::from_u8(powering_down).unwrap_or(PoweringDownState::Inactive);
        self.last_frame_error =
            LastFrameError::from_u8(frame_error).unwrap_or(LastFrameError::Unspecified);

        self.expected_id = words[sector::EXPECTED_ID] as u8;
    }

    /// Filtered output current in 0.01 A
    pub fn filtered_current(&self) -> u16 {
        self.registers[register::CURRENT_FILTERED]
    }

    /// Filtered output voltage in 0.01 V
    pub fn filtered_voltage(&self) -> u16 {
        self.registers[register::VOLTAGE_FILTERED]
    }

    /// Required current as last read from the device
    pub fn set_point(&self) -> SetPoint {
        SetPoint::new(self.registers[register::REQUIRED_VALUE])
    }
}

fn pack(high: u8, low: u8) -> u16 {
    u16::from_be_bytes([high, low])
}

fn unpack(word: u16) -> (u8, u8) {
    let [high, low] = word.to_be_bytes();
    (high, low)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::Order;

    fn registers(id: u16, power_on: bool) -> [u16; REGISTER_COUNT] {
        let mut registers = [0; REGISTER_COUNT];
        for (i, reg) in registers.iter_mut().enumerate() {
            *reg = 0x100 + i as u16;
        }
        registers[register::PSU_ID] = id;
        registers[register::SLAVE_STATUS] = if power_on { 0x0009 } else { 0x0008 };
        registers
    }

    fn report(registers: Option<[u16; REGISTER_COUNT]>, state: CommunicationState) -> RtuReport {
        RtuReport {
            registers,
            error_per_mille: 12,
            max_error_run: 3,
            state,
            last_frame_error: LastFrameError::Perfection,
            acknowledged: true,
        }
    }

    #[test]
    fn derives_flags_from_registers() {
        let mut record = SharedChannelRecord::new(7, "magnet".to_string());
        record.load_rtu_report(&report(
            Some(registers(7, true)),
            CommunicationState::Healthy,
        ));

        assert!(record.power_on);
        assert!(record.id_compatible);
        assert!(record.acknowledged);
        assert_eq!(record.state, CommunicationState::Healthy);
        assert_eq!(record.error_per_mille, 12);
        assert_eq!(record.max_error_run, 3);
        assert_eq!(record.registers, registers(7, true));
    }

    #[test]
    fn wrong_id_only_replaces_healthy() {
        let mut record = SharedChannelRecord::new(7, String::new());
        record.load_rtu_report(&report(
            Some(registers(8, false)),
            CommunicationState::Healthy,
        ));
        assert_eq!(record.state, CommunicationState::WrongPhysicalId);

        record.load_rtu_report(&report(None, CommunicationState::TemporaryErrors));
        assert_eq!(record.state, CommunicationState::TemporaryErrors);
    }

    #[test]
    fn unspecified_frame_error_keeps_the_previous_one() {
        let mut record = SharedChannelRecord::new(1, String::new());
        let mut update = report(None, CommunicationState::PermanentErrors);
        update.last_frame_error = LastFrameError::BadCrc;
        record.load_rtu_report(&update);
        update.last_frame_error = LastFrameError::Unspecified;
        record.load_rtu_report(&update);
        assert_eq!(record.last_frame_error, LastFrameError::BadCrc);
    }

    #[test]
    fn published_copy_has_no_pending_order() {
        let mut record = SharedChannelRecord::new(1, "x".to_string());
        record.mailbox.place(Order::PowerOn);
        let copy = record.published();
        assert!(copy.mailbox.is_empty());
        assert_eq!(copy.description, "x");
        assert_eq!(record.mailbox.preview(), Some(Order::PowerOn));
    }

    #[test]
    fn flags_survive_the_sector_table() {
        let mut source = SharedChannelRecord::new(42, String::new());
        source.load_rtu_report(&report(
            Some(registers(42, true)),
            CommunicationState::Healthy,
        ));
        source.powering_down = PoweringDownState::TimeoutExceeded;

        let mut words = [0u16; sector::WIDTH];
        source.export_sector(&mut words);

        assert_eq!(words[sector::STATE_AND_ACK], 0x0401);
        assert_eq!(words[sector::POWER_AND_ID], 0x0101);
        assert_eq!(words[sector::POWERING_DOWN_AND_FRAME_ERROR], 0x0205);
        assert_eq!(words[sector::EXPECTED_ID], 42);

        let mut replica = SharedChannelRecord::new(0, String::new());
        replica.load_sector(&words);

        assert_eq!(replica.registers, source.registers);
        assert_eq!(replica.error_per_mille, source.error_per_mille);
        assert_eq!(replica.max_error_run, source.max_error_run);
        assert_eq!(replica.state, source.state);
        assert_eq!(replica.acknowledged, source.acknowledged);
        assert_eq!(replica.power_on, source.power_on);
        assert_eq!(replica.id_compatible, source.id_compatible);
        assert_eq!(replica.powering_down, source.powering_down);
        assert_eq!(replica.last_frame_error, source.last_frame_error);
        assert_eq!(replica.expected_id, 42);
    }

    #[test]
    fn export_leaves_order_words_alone() {
        let record = SharedChannelRecord::new(1, String::new());
        let mut words = [0u16; sector::WIDTH];
        words[sector::ORDER_CODE] = 5;
        words[sector::ORDER_VALUE] = 99;
        record.export_sector(&mut words);
        assert_eq!(words[sector::ORDER_CODE], 5);
        assert_eq!(words[sector::ORDER_VALUE], 99);
    }
}
