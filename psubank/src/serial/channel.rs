use crate::common::phys::PhysLayer;
use crate::constants::REGISTER_COUNT;
use crate::decode::DecodeLevel;
use crate::order::OrderMailbox;
use crate::orchestrator::Phase;
use crate::record::{RtuReport, SharedChannelRecord};
use crate::serial::frame::{constants, Primitive, RtuDisplay};
use crate::stats::ErrorStatisticsWindow;
use crate::types::{CommunicationState, LastFrameError, TickRate};

/// Modbus RTU master for the power supply on one serial port
///
/// Requests and responses are pipelined across ticks: each poll first receives the
/// answer to the request sent by the previous poll, then sends the next request. The answer
/// has had a whole tick to arrive, so receiving never waits on the line.
pub(crate) struct RtuChannel {
    port: String,
    tick_rate: TickRate,
    decode: DecodeLevel,
    link: Option<PhysLayer>,
    in_flight: Option<Primitive>,
    consecutive_errors: u8,
    acknowledged: bool,
    state: CommunicationState,
    mirror: [u16; REGISTER_COUNT],
    window: ErrorStatisticsWindow,
    open_failure_logged: bool,
    // ticks since the start of the current second
    fraction: u8,
}

impl RtuChannel {
    pub(crate) fn new(port: String, tick_rate: TickRate, decode: DecodeLevel) -> Self {
        Self {
            port,
            tick_rate,
            decode,
            link: None,
            in_flight: None,
            consecutive_errors: u8::MAX,
            acknowledged: false,
            state: CommunicationState::PortNotOpen,
            mirror: [0; REGISTER_COUNT],
            window: ErrorStatisticsWindow::new(),
            open_failure_logged: false,
            fraction: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_link(mut self, link: PhysLayer) -> Self {
        self.attach(link);
        self
    }

    pub(crate) fn port(&self) -> &str {
        &self.port
    }

    /// One exchange per tick, opening the port once per second if it is closed
    pub(crate) async fn poll(&mut self, phase: Phase, record: &mut SharedChannelRecord) {
        let first_fraction = self.fraction == 0;
        self.fraction = (self.fraction + 1) % self.tick_rate.get();

        if self.link.is_none() {
            if !first_fraction {
                return;
            }
            match crate::serial::open(&self.port) {
                Ok(link) => {
                    tracing::info!("{}: serial port opened", self.port);
                    self.attach(link);
                }
                Err(err) => {
                    if !self.open_failure_logged {
                        tracing::warn!("{}: unable to open serial port: {}", self.port, err);
                        self.open_failure_logged = true;
                    }
                    self.set_state(CommunicationState::PortNotOpen);
                    record.load_rtu_report(&self.port_not_open());
                    return;
                }
            }
        }

        if let Some(primitive) = self.in_flight.take() {
            match self.receive(primitive).await {
                Ok(report) => record.load_rtu_report(&report),
                Err(err) => {
                    self.close(err, record);
                    return;
                }
            }
        }

        let primitive = next_primitive(phase, &mut record.mailbox);
        if let Err(err) = self.send(primitive).await {
            self.close(err, record);
        }
    }

    fn attach(&mut self, link: PhysLayer) {
        // a new link must prove itself
        self.link = Some(link);
        self.in_flight = None;
        self.consecutive_errors = u8::MAX;
        self.acknowledged = false;
        self.open_failure_logged = false;
    }

    fn close(&mut self, err: std::io::Error, record: &mut SharedChannelRecord) {
        tracing::warn!("{}: closing serial port: {}", self.port, err);
        self.link = None;
        self.in_flight = None;
        self.window.add_sample(true);
        self.set_state(CommunicationState::PortNotOpen);
        record.load_rtu_report(&RtuReport {
            error_per_mille: self.window.per_mille(),
            max_error_run: self.window.max_run(),
            ..self.port_not_open()
        });
    }

    /// report of a port that could not be opened, with both statistics at `0xFFFF`
    fn port_not_open(&self) -> RtuReport {
        RtuReport {
            registers: None,
            error_per_mille: u16::MAX,
            max_error_run: u16::MAX,
            state: CommunicationState::PortNotOpen,
            last_frame_error: LastFrameError::Unspecified,
            acknowledged: self.acknowledged,
        }
    }

    fn set_state(&mut self, state: CommunicationState) {
        if state != self.state {
            tracing::info!("{}: {} -> {}", self.port, self.state, state);
            self.state = state;
        }
    }

    async fn send(&mut self, primitive: Primitive) -> Result<(), std::io::Error> {
        let request = primitive.request();
        if self.decode.frame.enabled() {
            tracing::info!(
                "RTU TX - {}",
                RtuDisplay::new(self.decode.frame, primitive, &request)
            );
        }
        if let Some(link) = self.link.as_mut() {
            link.write(&request, self.decode.physical).await?;
            self.in_flight = Some(primitive);
        }
        Ok(())
    }

    async fn receive(&mut self, primitive: Primitive) -> Result<RtuReport, std::io::Error> {
        let mut buffer = [0u8; constants::MAX_FRAME_LENGTH];
        let count = match self.link.as_mut() {
            Some(link) => {
                read_response(
                    link,
                    &mut buffer,
                    primitive.response_length(),
                    self.decode.physical,
                )
                .await?
            }
            None => 0,
        };
        let response = &buffer[..count];

        if self.decode.frame.enabled() && !response.is_empty() {
            tracing::info!(
                "RTU RX - {}",
                RtuDisplay::new(self.decode.frame, primitive, response)
            );
        }

        let outcome = primitive.validate(response);
        let last_frame_error = match outcome {
            Ok(()) => {
                primitive.apply(response, &mut self.mirror);
                self.consecutive_errors = 0;
                self.acknowledged = true;
                LastFrameError::Perfection
            }
            Err(kind) => {
                tracing::debug!("{}: {} failed: {}", self.port, primitive, kind);
                if count > 0 {
                    self.drain().await?;
                }
                self.consecutive_errors = self.consecutive_errors.saturating_add(1);
                kind
            }
        };

        self.window.add_sample(outcome.is_err());
        self.set_state(classify(
            self.consecutive_errors,
            self.state,
            self.tick_rate,
        ));

        Ok(RtuReport {
            registers: outcome.ok().map(|_| self.mirror),
            error_per_mille: self.window.per_mille(),
            max_error_run: self.window.max_run(),
            state: self.state,
            last_frame_error,
            acknowledged: self.acknowledged,
        })
    }

    /// discard whatever is left on the line so the next response starts clean
    async fn drain(&mut self) -> Result<(), std::io::Error> {
        let mut buffer = [0u8; constants::MAX_FRAME_LENGTH];
        if let Some(link) = self.link.as_mut() {
            let count = link
                .read_available(&mut buffer, self.decode.physical)
                .await?;
            if count > 0 {
                tracing::debug!("{}: drained {} bytes", self.port, count);
            }
        }
        Ok(())
    }
}

async fn read_response(
    link: &mut PhysLayer,
    buffer: &mut [u8],
    expected: usize,
    level: crate::decode::PhysDecodeLevel,
) -> Result<usize, std::io::Error> {
    let mut count = 0;
    while count < expected {
        match link.read_available(&mut buffer[count..], level).await? {
            // nothing more has arrived
            0 => break,
            n => count += n,
        }
    }
    Ok(count)
}

/// even ticks serve pending orders or read the last half, odd ticks read the first half
pub(crate) fn next_primitive(phase: Phase, mailbox: &mut OrderMailbox) -> Primitive {
    match phase {
        Phase::Even => mailbox
            .take_primitive()
            .and_then(Primitive::from_order)
            .unwrap_or(Primitive::ReadLast),
        Phase::Odd => Primitive::ReadFirst,
    }
}

pub(crate) fn classify(
    consecutive_errors: u8,
    previous: CommunicationState,
    tick_rate: TickRate,
) -> CommunicationState {
    if consecutive_errors > tick_rate.permanent_error_threshold() {
        CommunicationState::PermanentErrors
    } else if consecutive_errors > tick_rate.temporary_error_threshold() {
        CommunicationState::TemporaryErrors
    } else if consecutive_errors == 0 {
        CommunicationState::Healthy
    } else {
        previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::register;
    use crate::order::Order;
    use crate::types::SetPoint;
    use tokio_test::io::Builder;

    const CRC: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_MODBUS);

    fn response(primitive: Primitive, registers: &[u16]) -> Vec<u8> {
        let mut frame = vec![0x01, 0x03, (registers.len() * 2) as u8];
        for reg in registers {
            frame.extend_from_slice(&reg.to_be_bytes());
        }
        let crc = CRC.checksum(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        assert_eq!(frame.len(), primitive.response_length());
        frame
    }

    fn channel(mock: tokio_test::io::Mock) -> RtuChannel {
        RtuChannel::new(
            "/dev/ttyTEST".to_string(),
            TickRate::default(),
            DecodeLevel::nothing(),
        )
        .with_link(PhysLayer::new_mock(mock))
    }

    #[test]
    fn classification_boundaries_at_default_rate() {
        let rate = TickRate::default();
        let healthy = CommunicationState::Healthy;
        assert_eq!(classify(0, CommunicationState::PermanentErrors, rate), healthy);
        for count in 1..=4 {
            assert_eq!(classify(count, healthy, rate), healthy);
        }
        for count in 5..=16 {
            assert_eq!(
                classify(count, healthy, rate),
                CommunicationState::TemporaryErrors
            );
        }
        for count in [17, 100, 255] {
            assert_eq!(
                classify(count, healthy, rate),
                CommunicationState::PermanentErrors
            );
        }
    }

    #[test]
    fn alternates_between_halves() {
        let mut mailbox = OrderMailbox::default();
        assert_eq!(next_primitive(Phase::Even, &mut mailbox), Primitive::ReadLast);
        assert_eq!(next_primitive(Phase::Odd, &mut mailbox), Primitive::ReadFirst);
    }

    #[test]
    fn orders_are_only_served_on_even_ticks() {
        let mut mailbox = OrderMailbox::default();
        mailbox.place(Order::SetValue(SetPoint::new(10)));
        assert_eq!(next_primitive(Phase::Odd, &mut mailbox), Primitive::ReadFirst);
        assert_eq!(
            next_primitive(Phase::Even, &mut mailbox),
            Primitive::SetValue(10)
        );
        assert!(mailbox.is_empty());
    }

    #[test]
    fn virtual_orders_stay_in_the_mailbox() {
        let mut mailbox = OrderMailbox::default();
        mailbox.place(Order::DelayedPowerOff);
        assert_eq!(next_primitive(Phase::Even, &mut mailbox), Primitive::ReadLast);
        assert_eq!(mailbox.preview(), Some(Order::DelayedPowerOff));
    }

    #[tokio::test]
    async fn polls_both_halves_of_the_registers() {
        let first: Vec<u16> = vec![1, 500, 7, 0x0001, 10, 11, 12, 13];
        let last: Vec<u16> = vec![13, 14, 15, 16, 17, 18, 19];

        let mock = Builder::new()
            .write(&Primitive::ReadLast.request())
            .read(&response(Primitive::ReadLast, &last))
            .write(&Primitive::ReadFirst.request())
            .read(&response(Primitive::ReadFirst, &first))
            .write(&Primitive::ReadLast.request())
            .build();

        let mut channel = channel(mock);
        let mut record = SharedChannelRecord::new(7, String::new());

        channel.poll(Phase::Even, &mut record).await;
        assert_eq!(record.state, CommunicationState::PortNotOpen);

        channel.poll(Phase::Odd, &mut record).await;
        // the id register has not been read yet
        assert_eq!(record.state, CommunicationState::WrongPhysicalId);
        assert_eq!(&record.registers[7..], last.as_slice());

        channel.poll(Phase::Even, &mut record).await;
        assert_eq!(record.state, CommunicationState::Healthy);
        assert!(record.acknowledged);
        assert!(record.power_on);
        assert!(record.id_compatible);
        assert_eq!(record.last_frame_error, LastFrameError::Perfection);
        assert_eq!(record.registers[register::REQUIRED_VALUE], 500);
        assert_eq!(&record.registers[..7], &first[..7]);
        assert_eq!(&record.registers[7..], last.as_slice());
        assert_eq!(record.error_per_mille, 0);
    }

    #[tokio::test]
    async fn silence_is_recorded_as_an_error() {
        let mock = Builder::new()
            .write(&Primitive::ReadLast.request())
            .write(&Primitive::ReadFirst.request())
            .build();

        let mut channel = channel(mock);
        let mut record = SharedChannelRecord::new(1, String::new());

        channel.poll(Phase::Even, &mut record).await;
        channel.poll(Phase::Odd, &mut record).await;

        // a fresh link starts saturated
        assert_eq!(record.state, CommunicationState::PermanentErrors);
        assert_eq!(record.last_frame_error, LastFrameError::NoResponse);
        assert!(!record.acknowledged);
        assert_eq!(record.error_per_mille, 1);
        assert_eq!(record.max_error_run, 1);
    }

    #[tokio::test]
    async fn partial_frame_is_classified_and_drained() {
        let mock = Builder::new()
            .write(&Primitive::ReadLast.request())
            .read(&[0x01, 0x03, 0x0E, 0x00, 0x01])
            .write(&Primitive::ReadFirst.request())
            .build();

        let mut channel = channel(mock);
        let mut record = SharedChannelRecord::new(1, String::new());

        channel.poll(Phase::Even, &mut record).await;
        channel.poll(Phase::Odd, &mut record).await;

        assert_eq!(record.last_frame_error, LastFrameError::NotCompleteFrame);
        assert_eq!(record.state, CommunicationState::PermanentErrors);
    }

    #[tokio::test]
    async fn pending_order_is_sent_and_acknowledged() {
        let mock = Builder::new()
            .write(&Primitive::PowerOn.request())
            .read(&Primitive::PowerOn.request())
            .write(&Primitive::ReadFirst.request())
            .build();

        let mut channel = channel(mock);
        let mut record = SharedChannelRecord::new(1, String::new());
        record.mailbox.place(Order::PowerOn);

        channel.poll(Phase::Even, &mut record).await;
        assert!(record.mailbox.is_empty());

        channel.poll(Phase::Odd, &mut record).await;
        assert!(record.acknowledged);
        assert_eq!(record.last_frame_error, LastFrameError::Perfection);
    }

    #[tokio::test]
    async fn io_error_closes_the_port() {
        let mock = Builder::new()
            .write_error(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "unplugged",
            ))
            .build();

        let mut channel = channel(mock);
        let mut record = SharedChannelRecord::new(1, String::new());
        record.state = CommunicationState::Healthy;

        channel.poll(Phase::Even, &mut record).await;
        assert_eq!(record.state, CommunicationState::PortNotOpen);
        // the lost exchange counts against the window
        assert_eq!(record.error_per_mille, 1);
        assert_eq!(record.max_error_run, 1);
        assert!(channel.link.is_none());

        // no reopening before the next second
        record.state = CommunicationState::Healthy;
        for phase in [Phase::Odd, Phase::Even, Phase::Odd] {
            channel.poll(phase, &mut record).await;
            assert_eq!(record.state, CommunicationState::Healthy);
        }

        channel.poll(Phase::Even, &mut record).await;
        assert_eq!(record.state, CommunicationState::PortNotOpen);
        assert_eq!(record.error_per_mille, u16::MAX);
        assert_eq!(record.max_error_run, u16::MAX);
    }

    #[tokio::test]
    async fn missing_port_is_retried_once_per_second() {
        let mut channel = RtuChannel::new(
            "/dev/psubank-no-such-port".to_string(),
            TickRate::default(),
            DecodeLevel::nothing(),
        );
        let mut record = SharedChannelRecord::new(1, String::new());
        record.state = CommunicationState::Healthy;

        channel.poll(Phase::Even, &mut record).await;
        assert_eq!(record.state, CommunicationState::PortNotOpen);
        assert_eq!(record.error_per_mille, u16::MAX);
        assert_eq!(channel.port(), "/dev/psubank-no-such-port");

        // the other fractions of the second, even ones included, leave the port alone
        record.state = CommunicationState::Healthy;
        for phase in [Phase::Odd, Phase::Even, Phase::Odd] {
            channel.poll(phase, &mut record).await;
            assert_eq!(record.state, CommunicationState::Healthy);
        }

        channel.poll(Phase::Even, &mut record).await;
        assert_eq!(record.state, CommunicationState::PortNotOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_bank_fits_inside_one_tick() {
        let mut bank: Vec<(RtuChannel, SharedChannelRecord)> = (1..=16)
            .map(|id| {
                let mock = Builder::new()
                    .write(&Primitive::ReadLast.request())
                    .write(&Primitive::ReadFirst.request())
                    .build();
                (channel(mock), SharedChannelRecord::new(id, String::new()))
            })
            .collect();

        for (channel, record) in bank.iter_mut() {
            channel.poll(Phase::Even, record).await;
        }

        // every device ignores its request
        let start = tokio::time::Instant::now();
        for (channel, record) in bank.iter_mut() {
            channel.poll(Phase::Odd, record).await;
        }
        assert!(start.elapsed() < TickRate::default().period());

        for (_, record) in bank.iter() {
            assert_eq!(record.last_frame_error, LastFrameError::NoResponse);
        }
    }
}
