use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{ExceptionCode, PolicyError};
use crate::server::table::ServerTable;

/// Trait implemented by the register image served over Modbus TCP
///
/// Addresses are 0-based, as carried in the PDU. The default implementations reject
/// every request with `IllegalFunction`.
pub trait RequestHandler: Send + 'static {
    /// Read `count` holding registers starting at `start`
    fn read_holding_registers(&self, start: u16, count: u16) -> Result<Vec<u16>, ExceptionCode> {
        let _ = (start, count);
        Err(ExceptionCode::IllegalFunction)
    }

    /// Write a single holding register
    fn write_single_register(&mut self, address: u16, value: u16) -> Result<(), ExceptionCode> {
        let _ = (address, value);
        Err(ExceptionCode::IllegalFunction)
    }
}

/// Handler shared between the server sessions and its owner
pub type ServerHandlerType<T> = Arc<Mutex<T>>;

/// Lock a handler, recovering the data of a poisoned lock
pub(crate) fn lock<T>(handler: &Mutex<T>) -> MutexGuard<'_, T> {
    handler.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RequestHandler for ServerTable {
    fn read_holding_registers(&self, start: u16, count: u16) -> Result<Vec<u16>, ExceptionCode> {
        self.read(start, count).map_err(reject)
    }

    fn write_single_register(&mut self, address: u16, value: u16) -> Result<(), ExceptionCode> {
        self.write(address, &[value]).map_err(reject)
    }
}

fn reject(err: PolicyError) -> ExceptionCode {
    tracing::warn!("rejected register request: {}", err);
    err.into()
}
