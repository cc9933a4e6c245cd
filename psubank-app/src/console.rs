use std::time::Duration;

use psubank::{
    CommunicationState, Order, OrderError, PoweringDownState, RenderHandle, SetPoint,
    SharedChannelRecord, Snapshot,
};
use tokio::io::AsyncBufReadExt;
use tokio::time::Instant;

const MAX_AMPERES: f64 = 200.0;
const STATUS_PERIOD: Duration = Duration::from_secs(1);

const HELP: &str = "\
commands (channels are numbered from 1):
  on <n>          switch channel n on
  off <n>         ramp channel n down to zero, then switch it off
  set <n> <amps>  required current of channel n, 0 to 200 A
  cancel <n>      cancel the ramp down of channel n
  control         hand control over, or take it back
  control remote  hand control to the remote computer
  control local   take control back
  status          print every channel
  help            print this text";

/// One operator command, as typed
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) enum Command {
    On(usize),
    Off(usize),
    Set(usize, f64),
    Cancel(usize),
    Control { remote: bool },
    ToggleControl,
    Status,
    Help,
}

/// What a command turns into once checked against the displayed state
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) enum Action {
    Place(usize, Order),
    RemoteControl(bool),
    Status,
    Help,
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub(crate) enum ParseError {
    #[error("unknown command: {0}, type help for the list")]
    UnknownCommand(String),
    #[error("missing argument: {0}")]
    MissingArgument(&'static str),
    #[error("unexpected argument: {0}")]
    ExtraArgument(String),
    #[error("bad channel number: {0}")]
    BadChannel(String),
    #[error("bad current: {0}")]
    BadCurrent(String),
    #[error("expected remote or local, got: {0}")]
    BadControl(String),
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub(crate) enum Refusal {
    #[error("channel {0} does not exist")]
    NoSuchChannel(usize),
    #[error("channel {0} cannot be switched on while its link is {1}")]
    LinkDown(usize, CommunicationState),
    #[error("{0:.2} A is outside 0 to 200 A")]
    CurrentOutOfRange(f64),
}

fn channel_number(arg: Option<&str>) -> Result<usize, ParseError> {
    let arg = arg.ok_or(ParseError::MissingArgument("channel"))?;
    match arg.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n - 1),
        _ => Err(ParseError::BadChannel(arg.to_string())),
    }
}

/// Parse one line, `None` for a blank line
pub(crate) fn parse(line: &str) -> Result<Option<Command>, ParseError> {
    let mut words = line.split_whitespace();
    let Some(name) = words.next() else {
        return Ok(None);
    };

    let command = match name.to_ascii_lowercase().as_str() {
        "on" => Command::On(channel_number(words.next())?),
        "off" => Command::Off(channel_number(words.next())?),
        "cancel" => Command::Cancel(channel_number(words.next())?),
        "set" => {
            let channel = channel_number(words.next())?;
            let arg = words.next().ok_or(ParseError::MissingArgument("current"))?;
            let amperes = arg
                .parse::<f64>()
                .map_err(|_| ParseError::BadCurrent(arg.to_string()))?;
            Command::Set(channel, amperes)
        }
        "control" => match words.next() {
            None => Command::ToggleControl,
            Some("remote") => Command::Control { remote: true },
            Some("local") => Command::Control { remote: false },
            Some(arg) => return Err(ParseError::BadControl(arg.to_string())),
        },
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        _ => return Err(ParseError::UnknownCommand(name.to_string())),
    };

    match words.next() {
        Some(extra) => Err(ParseError::ExtraArgument(extra.to_string())),
        None => Ok(Some(command)),
    }
}

/// Apply the operator rules of the display to a command
pub(crate) fn plan(command: Command, snapshot: &Snapshot) -> Result<Action, Refusal> {
    let channel = |index: usize| {
        snapshot
            .channels
            .get(index)
            .ok_or(Refusal::NoSuchChannel(index + 1))
    };

    match command {
        Command::On(index) => {
            let record = channel(index)?;
            if !record.state.is_live() {
                return Err(Refusal::LinkDown(index + 1, record.state));
            }
            Ok(Action::Place(index, Order::PowerOn))
        }
        Command::Off(index) => {
            // a stuck ramp down falls back to the immediate switch off
            let order = match channel(index)?.powering_down {
                PoweringDownState::TimeoutExceeded => Order::PowerOff,
                _ => Order::DelayedPowerOff,
            };
            Ok(Action::Place(index, order))
        }
        Command::Set(index, amperes) => {
            channel(index)?;
            if !(0.0..=MAX_AMPERES).contains(&amperes) {
                return Err(Refusal::CurrentOutOfRange(amperes));
            }
            Ok(Action::Place(
                index,
                Order::SetValue(SetPoint::from_amperes(amperes)),
            ))
        }
        Command::Cancel(index) => {
            channel(index)?;
            Ok(Action::Place(index, Order::CancelDelayedPowerOff))
        }
        Command::Control { remote } => Ok(Action::RemoteControl(remote)),
        Command::ToggleControl => Ok(Action::RemoteControl(snapshot.control_here)),
        Command::Status => Ok(Action::Status),
        Command::Help => Ok(Action::Help),
    }
}

fn describe(number: usize, record: &SharedChannelRecord) -> String {
    format!(
        "#{number} {:<24} {:<15} {:<3} {:>7.2} A {:>7.2} V  set {}  errors {} per mille  ramp {}",
        record.description,
        record.state.to_string(),
        if record.power_on { "on" } else { "off" },
        f64::from(record.filtered_current()) / 100.0,
        f64::from(record.filtered_voltage()) / 100.0,
        record.set_point(),
        record.error_per_mille,
        record.powering_down,
    )
}

pub(crate) fn render(snapshot: &Snapshot) -> Vec<String> {
    let mut lines = Vec::with_capacity(snapshot.channels.len() + 1);
    let control = if snapshot.control_here {
        "here"
    } else {
        "elsewhere"
    };
    match &snapshot.client_state {
        Some(state) => lines.push(format!(
            "{} mode, control {control}, server link: {state}",
            snapshot.mode
        )),
        None => lines.push(format!("{} mode, control {control}", snapshot.mode)),
    }
    lines.extend(
        snapshot
            .channels
            .iter()
            .enumerate()
            .map(|(index, record)| describe(index + 1, record)),
    );
    lines
}

/// Line-oriented operator console on stdin/stdout
pub(crate) struct Console {
    render: RenderHandle,
    last_status: Option<Instant>,
}

impl Console {
    pub(crate) fn new(render: RenderHandle) -> Self {
        Self {
            render,
            last_status: None,
        }
    }

    /// Run until the polling task goes away
    pub(crate) async fn run(&mut self) {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;

        println!("{HELP}");

        loop {
            tokio::select! {
                line = lines.next_line(), if stdin_open => {
                    match line {
                        Ok(Some(line)) => self.handle(&line),
                        Ok(None) => {
                            tracing::info!("console input closed, display only");
                            stdin_open = false;
                        }
                        Err(err) => {
                            tracing::warn!("unable to read the console: {}", err);
                            stdin_open = false;
                        }
                    }
                }
                changed = self.render.changed() => {
                    if !changed {
                        return;
                    }
                    self.periodic_status();
                }
            }
        }
    }

    fn periodic_status(&mut self) {
        let now = Instant::now();
        if let Some(last) = self.last_status {
            if now.duration_since(last) < STATUS_PERIOD {
                return;
            }
        }
        self.last_status = Some(now);
        self.print_status();
    }

    fn print_status(&self) {
        for line in render(&self.render.snapshot()) {
            println!("{line}");
        }
    }

    fn handle(&mut self, line: &str) {
        let command = match parse(line) {
            Ok(Some(command)) => command,
            Ok(None) => return,
            Err(err) => {
                println!("{err}");
                return;
            }
        };

        let action = match plan(command, &self.render.snapshot()) {
            Ok(action) => action,
            Err(err) => {
                println!("refused: {err}");
                return;
            }
        };

        let result: Result<(), OrderError> = match action {
            Action::Place(channel, order) => self.render.place_order(channel, order),
            Action::RemoteControl(remote) => self.render.set_remote_control(remote),
            Action::Status => {
                self.print_status();
                Ok(())
            }
            Action::Help => {
                println!("{HELP}");
                Ok(())
            }
        };

        if let Err(err) = result {
            println!("refused: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use psubank::Mode;

    fn snapshot(state: CommunicationState, powering_down: PoweringDownState) -> Snapshot {
        let mut record = SharedChannelRecord::new(1, "Magnet 1".to_string());
        record.state = state;
        record.powering_down = powering_down;
        Snapshot {
            mode: Mode::Local,
            channels: vec![record],
            control_here: true,
            client_state: None,
        }
    }

    #[test]
    fn parses_commands() {
        assert_eq!(parse("  "), Ok(None));
        assert_eq!(parse("on 1"), Ok(Some(Command::On(0))));
        assert_eq!(parse("OFF 3"), Ok(Some(Command::Off(2))));
        assert_eq!(parse("set 2 12.5"), Ok(Some(Command::Set(1, 12.5))));
        assert_eq!(parse("cancel 1"), Ok(Some(Command::Cancel(0))));
        assert_eq!(
            parse("control remote"),
            Ok(Some(Command::Control { remote: true }))
        );
        assert_eq!(parse("control"), Ok(Some(Command::ToggleControl)));
        assert_eq!(parse("status"), Ok(Some(Command::Status)));
        assert_eq!(parse("?"), Ok(Some(Command::Help)));
    }

    #[test]
    fn rejects_malformed_commands() {
        assert_eq!(
            parse("on 0"),
            Err(ParseError::BadChannel("0".to_string()))
        );
        assert_eq!(parse("on"), Err(ParseError::MissingArgument("channel")));
        assert_eq!(
            parse("set 1 lots"),
            Err(ParseError::BadCurrent("lots".to_string()))
        );
        assert_eq!(
            parse("status now"),
            Err(ParseError::ExtraArgument("now".to_string()))
        );
        assert_eq!(
            parse("control nobody"),
            Err(ParseError::BadControl("nobody".to_string()))
        );
        assert_eq!(
            parse("reboot"),
            Err(ParseError::UnknownCommand("reboot".to_string()))
        );
    }

    #[test]
    fn power_on_requires_a_live_link() {
        let healthy = snapshot(CommunicationState::Healthy, PoweringDownState::Inactive);
        assert_eq!(
            plan(Command::On(0), &healthy),
            Ok(Action::Place(0, Order::PowerOn))
        );

        let degraded = snapshot(
            CommunicationState::TemporaryErrors,
            PoweringDownState::Inactive,
        );
        assert!(plan(Command::On(0), &degraded).is_ok());

        let down = snapshot(
            CommunicationState::PermanentErrors,
            PoweringDownState::Inactive,
        );
        assert_eq!(
            plan(Command::On(0), &down),
            Err(Refusal::LinkDown(1, CommunicationState::PermanentErrors))
        );
    }

    #[test]
    fn off_ramps_down_unless_the_ramp_timed_out() {
        let normal = snapshot(CommunicationState::Healthy, PoweringDownState::Inactive);
        assert_eq!(
            plan(Command::Off(0), &normal),
            Ok(Action::Place(0, Order::DelayedPowerOff))
        );

        let stuck = snapshot(
            CommunicationState::Healthy,
            PoweringDownState::TimeoutExceeded,
        );
        assert_eq!(
            plan(Command::Off(0), &stuck),
            Ok(Action::Place(0, Order::PowerOff))
        );
    }

    #[test]
    fn set_value_is_bounded() {
        let snapshot = snapshot(CommunicationState::Healthy, PoweringDownState::Inactive);
        assert_eq!(
            plan(Command::Set(0, 200.0), &snapshot),
            Ok(Action::Place(0, Order::SetValue(SetPoint::from_amperes(200.0))))
        );
        assert_eq!(
            plan(Command::Set(0, 200.5), &snapshot),
            Err(Refusal::CurrentOutOfRange(200.5))
        );
        assert_eq!(
            plan(Command::Set(0, -1.0), &snapshot),
            Err(Refusal::CurrentOutOfRange(-1.0))
        );
        assert_eq!(
            plan(Command::Set(1, 1.0), &snapshot),
            Err(Refusal::NoSuchChannel(2))
        );
    }

    #[test]
    fn control_toggles_from_the_displayed_owner() {
        let mut snapshot = snapshot(CommunicationState::Healthy, PoweringDownState::Inactive);
        assert_eq!(
            plan(Command::ToggleControl, &snapshot),
            Ok(Action::RemoteControl(true))
        );
        snapshot.control_here = false;
        assert_eq!(
            plan(Command::ToggleControl, &snapshot),
            Ok(Action::RemoteControl(false))
        );
    }

    #[test]
    fn renders_a_line_per_channel() {
        let snapshot = snapshot(CommunicationState::Healthy, PoweringDownState::Inactive);
        let lines = render(&snapshot);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("control here"));
        assert!(lines[1].starts_with("#1 Magnet 1"));
    }
}
