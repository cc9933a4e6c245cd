use std::collections::HashSet;
use std::net::SocketAddr;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::constants::{MAX_CHANNELS, MAX_DESCRIPTION_LENGTH};
use crate::decode::DecodeLevel;
use crate::error::RosterError;
use crate::powering_down::{PoweringDownAction, PoweringDownInput, PoweringDownMachine};
use crate::record::SharedChannelRecord;
use crate::serial::channel::RtuChannel;
use crate::server::handler::lock;
use crate::server::table::ServerTable;
use crate::state::{Published, RenderHandle, SharedState};
use crate::tcp::client::TcpClient;
use crate::tcp::server::ServerTask;
use crate::types::{IdentificationLabel, TickRate};

/// Role of this computer
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Drives the power supplies over serial ports and serves them over Modbus TCP
    Local,
    /// Mirrors a local computer over Modbus TCP
    Remote,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Mode::Local => f.write_str("local"),
            Mode::Remote => f.write_str("remote"),
        }
    }
}

/// Half of the polling cycle
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    Even,
    Odd,
}

impl Phase {
    fn next(self) -> Self {
        match self {
            Phase::Even => Phase::Odd,
            Phase::Odd => Phase::Even,
        }
    }
}

/// One power supply of the roster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Physical id the device must report, 1..=255
    pub id: u8,
    /// Serial device, e.g. `/dev/ttyUSB0`
    pub port: String,
    /// Operator-facing description
    pub description: String,
}

/// Validated list of channels driven in local mode
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Roster {
    channels: Vec<ChannelConfig>,
}

impl Roster {
    /// Validate a list of channels
    pub fn new(channels: Vec<ChannelConfig>) -> Result<Self, RosterError> {
        if channels.is_empty() {
            return Err(RosterError::NoChannels);
        }
        if channels.len() > MAX_CHANNELS {
            return Err(RosterError::TooManyChannels(channels.len()));
        }

        let mut ports = HashSet::new();
        for (index, channel) in channels.iter().enumerate() {
            if channel.id == 0 {
                return Err(RosterError::InvalidId(index));
            }
            if channel.description.chars().count() > MAX_DESCRIPTION_LENGTH {
                return Err(RosterError::DescriptionTooLong(index));
            }
            if !ports.insert(channel.port.as_str()) {
                return Err(RosterError::DuplicatePort(channel.port.clone()));
            }
        }

        Ok(Self { channels })
    }

    /// Channels in roster order
    pub fn channels(&self) -> &[ChannelConfig] {
        &self.channels
    }
}

/// Settings of a local computer
#[derive(Clone, Debug)]
pub struct LocalConfig {
    /// Power supplies to drive
    pub roster: Roster,
    /// Address the Modbus TCP server listens on
    pub listen: SocketAddr,
    /// Ticks per second
    pub tick_rate: TickRate,
    /// Protocol logging
    pub decode: DecodeLevel,
}

/// Settings of a remote computer
#[derive(Copy, Clone, Debug)]
pub struct RemoteConfig {
    /// Address of the local computer's Modbus TCP server
    pub server: SocketAddr,
    /// Ticks per second
    pub tick_rate: TickRate,
    /// Protocol logging
    pub decode: DecodeLevel,
}

/// Running polling task and, in local mode, the Modbus TCP server
#[derive(Debug)]
pub struct System {
    render: RenderHandle,
    server_address: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
}

impl System {
    /// Handle for the operator front end
    pub fn render(&self) -> RenderHandle {
        self.render.clone()
    }

    /// Address the Modbus TCP server is bound to, `None` in remote mode
    pub fn server_address(&self) -> Option<SocketAddr> {
        self.server_address
    }

    /// Stop every task of the system
    pub fn shutdown(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

/// Start a local computer: bind the Modbus TCP server and start polling the serial ports
pub async fn spawn_local(config: LocalConfig) -> Result<System, std::io::Error> {
    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    let server_address = listener.local_addr()?;
    tracing::info!("Modbus TCP server listening on {}", server_address);

    let descriptions: Vec<&str> = config
        .roster
        .channels()
        .iter()
        .map(|x| x.description.as_str())
        .collect();
    let table = ServerTable::new(IdentificationLabel::build_stamp(), &descriptions);

    let channels: Vec<LocalChannel> = config
        .roster
        .channels()
        .iter()
        .map(|x| LocalChannel {
            rtu: RtuChannel::new(x.port.clone(), config.tick_rate, config.decode),
            machine: PoweringDownMachine::new(config.tick_rate),
            record: SharedChannelRecord::new(x.id, x.description.clone()),
        })
        .collect();

    let render = channels.iter().map(|x| x.record.published()).collect();
    let shared = Published::local(render, table);
    let (redraw, rx) = watch::channel(());

    let server = tokio::spawn(ServerTask::new(listener, shared.clone(), config.decode).run());
    let poller = LocalPoller {
        channels,
        shared: shared.clone(),
        tick_rate: config.tick_rate,
        redraw,
    };
    let polling = tokio::spawn(poller.run());

    Ok(System {
        render: RenderHandle::new(shared, rx),
        server_address: Some(server_address),
        tasks: vec![polling, server],
    })
}

/// Start a remote computer mirroring the local computer at `config.server`
pub fn spawn_remote(config: RemoteConfig) -> System {
    let shared = Published::remote();
    let (redraw, rx) = watch::channel(());

    let poller = RemotePoller {
        client: TcpClient::new(config.server, config.decode),
        records: Vec::new(),
        shared: shared.clone(),
        tick_rate: config.tick_rate,
        redraw,
    };
    let polling = tokio::spawn(poller.run());

    System {
        render: RenderHandle::new(shared, rx),
        server_address: None,
        tasks: vec![polling],
    }
}

fn interval(tick_rate: TickRate) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(tick_rate.period());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

struct LocalChannel {
    rtu: RtuChannel,
    machine: PoweringDownMachine,
    // polling-side record
    record: SharedChannelRecord,
}

struct LocalPoller {
    channels: Vec<LocalChannel>,
    shared: SharedState,
    tick_rate: TickRate,
    redraw: watch::Sender<()>,
}

impl LocalPoller {
    async fn run(mut self) {
        let mut interval = interval(self.tick_rate);
        let mut phase = Phase::Even;
        loop {
            interval.tick().await;
            self.tick(phase).await;
            phase = phase.next();
        }
    }

    /// orders in, one exchange per channel, state out
    async fn tick(&mut self, phase: Phase) {
        self.synchronize();
        self.powering_down();
        for channel in self.channels.iter_mut() {
            channel.rtu.poll(phase, &mut channel.record).await;
        }
        self.synchronize();
        if phase == Phase::Even {
            self.redraw.send_replace(());
        }
    }

    /// exchange orders and published state between the polling side, the render side and
    /// the server table
    fn synchronize(&mut self) {
        let mut guard = lock(&self.shared);
        let published = &mut *guard;
        let control_here = published.control_here;

        for (index, channel) in self.channels.iter_mut().enumerate() {
            if let Some(render) = published.channels.get_mut(index) {
                if control_here {
                    if let Some(order) = render.mailbox.take() {
                        channel.record.mailbox.place(order);
                    }
                }
                *render = channel.record.published();
            }

            if let Some(table) = published.table.as_mut() {
                // remote orders are consumed even while control is here
                if let Some(order) = table.take_order(index) {
                    if control_here {
                        tracing::debug!(
                            "{}: ignoring remote order '{}'",
                            channel.rtu.port(),
                            order
                        );
                    } else {
                        channel.record.mailbox.place(order);
                    }
                }
                table.export_channel(index, &channel.record);
            }
        }
    }

    fn powering_down(&mut self) {
        for channel in self.channels.iter_mut() {
            let record = &mut channel.record;
            let input = PoweringDownInput {
                possible: record.state.is_live() && record.power_on,
                order: record.mailbox.preview(),
                filtered_current: record.filtered_current(),
            };

            let previous = channel.machine.state();
            let action = channel.machine.step(input);
            if action.takes_order() {
                record.mailbox.take();
            }
            if let Some(order) = action.order() {
                record.mailbox.place(order);
            }
            if action != PoweringDownAction::None {
                record.powering_down = channel.machine.state();
            }

            if channel.machine.state() != previous {
                tracing::info!(
                    "{}: powering down {} -> {}",
                    channel.rtu.port(),
                    previous,
                    channel.machine.state()
                );
            }
        }
    }
}

struct RemotePoller {
    client: TcpClient,
    // polling-side records, sized by the server at identification
    records: Vec<SharedChannelRecord>,
    shared: SharedState,
    tick_rate: TickRate,
    redraw: watch::Sender<()>,
}

impl RemotePoller {
    async fn run(mut self) {
        let mut interval = interval(self.tick_rate);
        let mut phase = Phase::Even;
        loop {
            interval.tick().await;
            self.synchronize(None);
            if phase == Phase::Even {
                let remote_control = self.client.refresh(&mut self.records).await.ok();
                self.synchronize(remote_control);
                self.redraw.send_replace(());
            }
            phase = phase.next();
        }
    }

    fn synchronize(&mut self, remote_control: Option<bool>) {
        let mut guard = lock(&self.shared);
        let published = &mut *guard;

        if let Some(remote_control) = remote_control {
            // a remote computer holds control when the local computer hands it over
            if remote_control != published.control_here {
                tracing::info!(
                    "control {} this computer",
                    if remote_control { "given to" } else { "taken from" }
                );
                published.control_here = remote_control;
            }
        }

        published
            .channels
            .resize_with(self.records.len(), || SharedChannelRecord::new(0, String::new()));

        let control_here = published.control_here;
        for (record, render) in self.records.iter_mut().zip(published.channels.iter_mut()) {
            if control_here {
                if let Some(order) = render.mailbox.take() {
                    record.mailbox.place(order);
                }
            }
            *render = record.published();
        }

        published.client_state = Some(self.client.state());
    }
}
