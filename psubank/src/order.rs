use crate::types::SetPoint;

/// Code of an empty order slot in the sector table
pub const NO_ORDER: u16 = 255;

/// Command destined to a single channel
///
/// The first six variants are primitives, each mapping onto exactly one RTU request. The
/// last two are virtual orders that only steer the powering-down sequence and never reach
/// the wire.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Order {
    /// Read all fourteen registers
    ReadAll,
    /// Read registers 0..8
    ReadFirst,
    /// Read registers 7..14
    ReadLast,
    /// Switch the supply on
    PowerOn,
    /// Switch the supply off immediately
    PowerOff,
    /// Write a new required current
    SetValue(SetPoint),
    /// Ramp the current to zero, then switch off
    DelayedPowerOff,
    /// Abort a delayed power off that timed out
    CancelDelayedPowerOff,
}

impl Order {
    /// Order code used in the sector table
    pub fn code(self) -> u16 {
        match self {
            Order::ReadAll => 0,
            Order::ReadFirst => 1,
            Order::ReadLast => 2,
            Order::PowerOn => 3,
            Order::PowerOff => 4,
            Order::SetValue(_) => 5,
            Order::DelayedPowerOff => 6,
            Order::CancelDelayedPowerOff => 7,
        }
    }

    /// Order value used in the sector table
    pub fn value(self) -> u16 {
        match self {
            Order::SetValue(x) => x.raw(),
            _ => 0,
        }
    }

    /// Decode an (order code, order value) pair, `None` for an empty or unknown code
    pub fn from_parts(code: u16, value: u16) -> Option<Self> {
        match code {
            0 => Some(Order::ReadAll),
            1 => Some(Order::ReadFirst),
            2 => Some(Order::ReadLast),
            3 => Some(Order::PowerOn),
            4 => Some(Order::PowerOff),
            5 => Some(Order::SetValue(SetPoint::new(value))),
            6 => Some(Order::DelayedPowerOff),
            7 => Some(Order::CancelDelayedPowerOff),
            _ => None,
        }
    }

    /// true if the order maps onto an RTU request
    pub fn is_primitive(self) -> bool {
        !matches!(self, Order::DelayedPowerOff | Order::CancelDelayedPowerOff)
    }
}

impl std::fmt::Display for Order {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Order::ReadAll => f.write_str("read all"),
            Order::ReadFirst => f.write_str("read first"),
            Order::ReadLast => f.write_str("read last"),
            Order::PowerOn => f.write_str("power on"),
            Order::PowerOff => f.write_str("power off"),
            Order::SetValue(x) => write!(f, "set value {x}"),
            Order::DelayedPowerOff => f.write_str("delayed power off"),
            Order::CancelDelayedPowerOff => f.write_str("cancel delayed power off"),
        }
    }
}

/// Single-slot mailbox holding at most one pending order
///
/// Placing an order while another is pending overwrites it (last write wins).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct OrderMailbox {
    slot: Option<Order>,
}

impl OrderMailbox {
    /// Place an order, returning the unconsumed order it replaced
    pub fn place(&mut self, order: Order) -> Option<Order> {
        let previous = self.slot.replace(order);
        if let Some(previous) = previous {
            if previous != order {
                tracing::debug!("order '{}' replaced by '{}'", previous, order);
            }
        }
        previous
    }

    /// Look at the pending order without consuming it
    pub fn preview(&self) -> Option<Order> {
        self.slot
    }

    /// Consume the pending order
    pub fn take(&mut self) -> Option<Order> {
        self.slot.take()
    }

    /// Consume the pending order only if it is a primitive
    pub fn take_primitive(&mut self) -> Option<Order> {
        match self.slot {
            Some(order) if order.is_primitive() => self.slot.take(),
            _ => None,
        }
    }

    /// true if no order is pending
    pub fn is_empty(&self) -> bool {
        self.slot.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_survive_the_sector_encoding() {
        let orders = [
            Order::ReadAll,
            Order::ReadFirst,
            Order::ReadLast,
            Order::PowerOn,
            Order::PowerOff,
            Order::SetValue(SetPoint::new(0x1234)),
            Order::DelayedPowerOff,
            Order::CancelDelayedPowerOff,
        ];
        for order in orders {
            assert_eq!(Order::from_parts(order.code(), order.value()), Some(order));
        }
    }

    #[test]
    fn empty_and_unknown_codes_are_not_orders() {
        assert_eq!(Order::from_parts(NO_ORDER, 0), None);
        assert_eq!(Order::from_parts(8, 0), None);
    }

    #[test]
    fn value_is_ignored_except_for_set_value() {
        assert_eq!(Order::from_parts(3, 0xFFFF), Some(Order::PowerOn));
        assert_eq!(Order::PowerOn.value(), 0);
    }

    #[test]
    fn last_write_wins() {
        let mut mailbox = OrderMailbox::default();
        assert_eq!(mailbox.place(Order::PowerOn), None);
        assert_eq!(mailbox.place(Order::PowerOff), Some(Order::PowerOn));
        assert_eq!(mailbox.take(), Some(Order::PowerOff));
        assert!(mailbox.is_empty());
    }

    #[test]
    fn preview_does_not_consume() {
        let mut mailbox = OrderMailbox::default();
        mailbox.place(Order::DelayedPowerOff);
        assert_eq!(mailbox.preview(), Some(Order::DelayedPowerOff));
        assert_eq!(mailbox.preview(), Some(Order::DelayedPowerOff));
        assert!(!mailbox.is_empty());
    }

    #[test]
    fn virtual_orders_are_left_for_the_powering_down_machine() {
        let mut mailbox = OrderMailbox::default();
        mailbox.place(Order::CancelDelayedPowerOff);
        assert_eq!(mailbox.take_primitive(), None);
        assert_eq!(mailbox.preview(), Some(Order::CancelDelayedPowerOff));

        mailbox.place(Order::SetValue(SetPoint::new(7)));
        assert_eq!(
            mailbox.take_primitive(),
            Some(Order::SetValue(SetPoint::new(7)))
        );
        assert!(mailbox.is_empty());
    }
}
