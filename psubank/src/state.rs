use std::sync::Arc;

use tokio::sync::watch;

use crate::error::{ExceptionCode, OrderError};
use crate::order::Order;
use crate::orchestrator::Mode;
use crate::record::SharedChannelRecord;
use crate::server::handler::{lock, RequestHandler, ServerHandlerType};
use crate::server::table::ServerTable;
use crate::tcp::client::TcpClientState;

/// State shared between the polling task, the operator and the TCP server sessions
///
/// Everything here is written in short copy steps only, never across I/O.
#[derive(Debug)]
pub(crate) struct Published {
    pub(crate) mode: Mode,
    /// render-side copy of every channel
    pub(crate) channels: Vec<SharedChannelRecord>,
    /// true when operator orders from this computer are accepted
    pub(crate) control_here: bool,
    /// sector table served in local mode
    pub(crate) table: Option<ServerTable>,
    pub(crate) client_state: Option<TcpClientState>,
}

pub(crate) type SharedState = ServerHandlerType<Published>;

impl Published {
    pub(crate) fn local(channels: Vec<SharedChannelRecord>, table: ServerTable) -> SharedState {
        Arc::new(std::sync::Mutex::new(Self {
            mode: Mode::Local,
            channels,
            control_here: true,
            table: Some(table),
            client_state: None,
        }))
    }

    pub(crate) fn remote() -> SharedState {
        Arc::new(std::sync::Mutex::new(Self {
            mode: Mode::Remote,
            channels: Vec::new(),
            control_here: false,
            table: None,
            client_state: Some(TcpClientState::NotConnectedYet),
        }))
    }
}

impl RequestHandler for Published {
    fn read_holding_registers(&self, start: u16, count: u16) -> Result<Vec<u16>, ExceptionCode> {
        match &self.table {
            Some(table) => table.read_holding_registers(start, count),
            None => Err(ExceptionCode::ServerDeviceFailure),
        }
    }

    fn write_single_register(&mut self, address: u16, value: u16) -> Result<(), ExceptionCode> {
        match &mut self.table {
            Some(table) => table.write_single_register(address, value),
            None => Err(ExceptionCode::ServerDeviceFailure),
        }
    }
}

/// Point-in-time copy of the render-side state
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    /// Operating mode
    pub mode: Mode,
    /// Every channel, mailboxes empty
    pub channels: Vec<SharedChannelRecord>,
    /// true when orders from this computer are accepted
    pub control_here: bool,
    /// Connection to the local computer, `None` in local mode
    pub client_state: Option<TcpClientState>,
}

/// Handle given to the operator front end
///
/// Reads copies of the published records and places orders that the polling task
/// picks up at its next synchronization.
#[derive(Clone, Debug)]
pub struct RenderHandle {
    shared: SharedState,
    redraw: watch::Receiver<()>,
}

impl RenderHandle {
    pub(crate) fn new(shared: SharedState, redraw: watch::Receiver<()>) -> Self {
        Self { shared, redraw }
    }

    /// Copy of the current render-side state
    pub fn snapshot(&self) -> Snapshot {
        let published = lock(&self.shared);
        Snapshot {
            mode: published.mode,
            channels: published.channels.clone(),
            control_here: published.control_here,
            client_state: published.client_state,
        }
    }

    /// Place an order for a channel, overwriting any order not yet picked up
    pub fn place_order(&self, channel: usize, order: Order) -> Result<(), OrderError> {
        let mut published = lock(&self.shared);
        if !published.control_here {
            return Err(OrderError::ControlElsewhere);
        }
        let record = published
            .channels
            .get_mut(channel)
            .ok_or(OrderError::NoSuchChannel(channel))?;
        record.mailbox.place(order);
        Ok(())
    }

    /// Hand control to the remote computer, or take it back
    pub fn set_remote_control(&self, remote: bool) -> Result<(), OrderError> {
        let mut published = lock(&self.shared);
        let published = &mut *published;
        let table = published.table.as_mut().ok_or(OrderError::RemoteMode)?;
        if table.remote_control() != remote {
            tracing::info!(
                "control handed to the {} computer",
                if remote { "remote" } else { "local" }
            );
        }
        table.set_remote_control(remote);
        published.control_here = !remote;
        Ok(())
    }

    /// Wait for the next redraw signal, false once the polling task is gone
    pub async fn changed(&mut self) -> bool {
        self.redraw.changed().await.is_ok()
    }
}
