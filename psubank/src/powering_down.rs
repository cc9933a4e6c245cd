use crate::constants::{CURRENT_CUTOFF, MAX_POWERING_DOWN_COUNT};
use crate::order::Order;
use crate::types::{PoweringDownState, TickRate};

/// Side effect requested by one step of the [`PoweringDownMachine`]
///
/// The caller owns the mailbox and the published state and applies the action:
/// every action but `None` publishes the machine's state, `TakeOrder`, `ZeroCurrent` and
/// `PowerOff` consume the pending order, and the last two place a new one.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PoweringDownAction {
    /// Nothing to do
    None,
    /// Publish the new state
    UpdateState,
    /// Consume the pending order
    TakeOrder,
    /// Place a set-value 0 order
    ZeroCurrent,
    /// Place a power-off order
    PowerOff,
}

impl PoweringDownAction {
    /// true if the pending order must be consumed
    pub fn takes_order(self) -> bool {
        matches!(
            self,
            PoweringDownAction::TakeOrder
                | PoweringDownAction::ZeroCurrent
                | PoweringDownAction::PowerOff
        )
    }

    /// order to place after consuming the pending one
    pub fn order(self) -> Option<Order> {
        match self {
            PoweringDownAction::ZeroCurrent => Some(Order::SetValue(Default::default())),
            PoweringDownAction::PowerOff => Some(Order::PowerOff),
            _ => None,
        }
    }
}

/// Inputs of one step
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PoweringDownInput {
    /// the link is live and the supply reports power on
    pub possible: bool,
    /// pending order, not consumed
    pub order: Option<Order>,
    /// last known filtered current in 0.01 A
    pub filtered_current: u16,
}

/// Graceful shutdown of one channel: ramp the current to zero, then switch off
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PoweringDownMachine {
    // ticks since the sequence started, None when inactive
    counter: Option<u16>,
    state: PoweringDownState,
    timeout: u16,
}

impl PoweringDownMachine {
    /// Create an inactive machine whose timeout is eight seconds of ticks
    pub fn new(tick_rate: TickRate) -> Self {
        Self {
            counter: None,
            state: PoweringDownState::Inactive,
            timeout: tick_rate.powering_down_timeout(),
        }
    }

    /// Current state
    pub fn state(&self) -> PoweringDownState {
        self.state
    }

    /// Ticks since the sequence started, `None` when inactive
    pub fn counter(&self) -> Option<u16> {
        self.counter
    }

    /// Advance by one tick
    pub fn step(&mut self, input: PoweringDownInput) -> PoweringDownAction {
        let below_cutoff = input.filtered_current <= CURRENT_CUTOFF;

        let counter = match self.counter {
            None => {
                if input.possible && input.order == Some(Order::DelayedPowerOff) {
                    self.counter = Some(0);
                    self.state = PoweringDownState::CurrentDecelerating;
                    return PoweringDownAction::ZeroCurrent;
                }
                return PoweringDownAction::None;
            }
            Some(counter) => counter,
        };

        if !input.possible {
            self.reset();
            return match input.order {
                Some(Order::DelayedPowerOff | Order::CancelDelayedPowerOff) => {
                    PoweringDownAction::TakeOrder
                }
                _ => PoweringDownAction::UpdateState,
            };
        }

        if counter < self.timeout {
            self.counter = Some(counter + 1);
            self.state = PoweringDownState::CurrentDecelerating;
            return if below_cutoff {
                PoweringDownAction::PowerOff
            } else {
                PoweringDownAction::None
            };
        }

        let counter = counter.saturating_add(1).min(MAX_POWERING_DOWN_COUNT);
        self.counter = Some(counter);

        if input.order == Some(Order::CancelDelayedPowerOff) {
            self.reset();
            return PoweringDownAction::TakeOrder;
        }

        self.state = PoweringDownState::TimeoutExceeded;
        if input.order == Some(Order::DelayedPowerOff) || below_cutoff {
            PoweringDownAction::PowerOff
        } else if counter == self.timeout + 1 {
            PoweringDownAction::UpdateState
        } else {
            PoweringDownAction::None
        }
    }

    fn reset(&mut self) {
        self.counter = None;
        self.state = PoweringDownState::Inactive;
    }
}
