use std::net::SocketAddr;

use scursor::{ReadCursor, WriteCursor};
use tokio::net::{TcpListener, TcpStream};

use crate::common::phys::PhysLayer;
use crate::decode::DecodeLevel;
use crate::error::{ExceptionCode, SessionError};
use crate::server::handler::{lock, RequestHandler, ServerHandlerType};
use crate::tcp::frame::{constants, format_frame, read_frame, MbapDisplay, MbapHeader};

pub(crate) struct ServerTask<T: RequestHandler> {
    listener: TcpListener,
    handler: ServerHandlerType<T>,
    decode: DecodeLevel,
}

impl<T> ServerTask<T>
where
    T: RequestHandler,
{
    pub(crate) fn new(
        listener: TcpListener,
        handler: ServerHandlerType<T>,
        decode: DecodeLevel,
    ) -> Self {
        Self {
            listener,
            handler,
            decode,
        }
    }

    pub(crate) async fn run(self) {
        loop {
            match self.listener.accept().await {
                Err(err) => {
                    tracing::error!("error accepting connection: {}", err);
                    return;
                }
                Ok((socket, addr)) => self.handle(socket, addr),
            }
        }
    }

    fn handle(&self, socket: TcpStream, addr: SocketAddr) {
        tracing::info!("accepted connection from: {}", addr);

        let session = SessionTask::new(PhysLayer::new_tcp(socket), self.handler.clone(), self.decode);
        tokio::spawn(async move {
            let err = session.run().await;
            tracing::warn!("session with {} ended: {}", addr, err);
        });
    }
}

struct SessionTask<T: RequestHandler> {
    phys: PhysLayer,
    handler: ServerHandlerType<T>,
    decode: DecodeLevel,
}

impl<T> SessionTask<T>
where
    T: RequestHandler,
{
    fn new(phys: PhysLayer, handler: ServerHandlerType<T>, decode: DecodeLevel) -> Self {
        Self {
            phys,
            handler,
            decode,
        }
    }

    /// serve requests until an I/O error or a malformed header ends the session
    async fn run(mut self) -> SessionError {
        loop {
            if let Err(err) = self.run_one().await {
                return err;
            }
        }
    }

    async fn run_one(&mut self) -> Result<(), SessionError> {
        let frame = read_frame(&mut self.phys, self.decode).await?;

        // the handler is only locked while the reply is computed, never across I/O
        let reply = {
            let mut handler = lock(&self.handler);
            process(frame.adu(), &mut *handler)
        };

        let reply = match reply {
            Some(reply) => reply,
            None => return Ok(()),
        };

        let header = MbapHeader {
            tx_id: frame.header.tx_id,
            unit_id: frame.header.unit_id,
            adu_length: reply.len(),
        };
        let mut buffer = [0u8; constants::MAX_FRAME_LENGTH];
        let bytes = format_frame(
            &mut buffer,
            header.tx_id,
            header.unit_id,
            header.adu_length,
            |cursor| reply.write(cursor),
        )?;

        if self.decode.frame.enabled() {
            tracing::info!(
                "MBAP TX - {}",
                MbapDisplay::new(
                    self.decode.frame,
                    header,
                    &bytes[constants::HEADER_LENGTH..]
                )
            );
        }

        self.phys.write(bytes, self.decode.physical).await?;
        Ok(())
    }
}

enum Reply {
    Registers(Vec<u16>),
    Echo { address: u16, value: u16 },
    Exception { function: u8, ex: ExceptionCode },
}

impl Reply {
    fn exception(function: u8, ex: ExceptionCode) -> Self {
        Reply::Exception { function, ex }
    }

    fn len(&self) -> usize {
        match self {
            Reply::Registers(values) => 2 + 2 * values.len(),
            Reply::Echo { .. } => 5,
            Reply::Exception { .. } => 2,
        }
    }

    fn write(&self, cursor: &mut WriteCursor) -> Result<(), scursor::WriteError> {
        match self {
            Reply::Registers(values) => {
                cursor.write_u8(constants::READ_HOLDING_REGISTERS)?;
                cursor.write_u8((2 * values.len()) as u8)?;
                for value in values {
                    cursor.write_u16_be(*value)?;
                }
            }
            Reply::Echo { address, value } => {
                cursor.write_u8(constants::WRITE_SINGLE_REGISTER)?;
                cursor.write_u16_be(*address)?;
                cursor.write_u16_be(*value)?;
            }
            Reply::Exception { function, ex } => {
                cursor.write_u8(function | constants::EXCEPTION_MASK)?;
                cursor.write_u8((*ex).into())?;
            }
        }
        Ok(())
    }
}

/// parse one request ADU and run it against the handler, `None` if nothing is to be sent
fn process<T: RequestHandler>(adu: &[u8], handler: &mut T) -> Option<Reply> {
    let mut cursor = ReadCursor::new(adu);
    let function = match cursor.read_u8() {
        Ok(function) => function,
        Err(_) => {
            tracing::warn!("received request without a function code");
            return None;
        }
    };

    let (address, argument) = match (cursor.read_u16_be(), cursor.read_u16_be()) {
        (Ok(address), Ok(argument)) => (address, argument),
        _ if is_supported(function) => {
            tracing::warn!("received incomplete request for function 0x{:02X}", function);
            return Some(Reply::exception(function, ExceptionCode::IllegalDataValue));
        }
        _ => (0, 0),
    };

    let reply = match function {
        constants::READ_HOLDING_REGISTERS => {
            if argument == 0 || argument > constants::MAX_READ_REGISTERS {
                tracing::warn!("received read of {} registers", argument);
                return Some(Reply::exception(function, ExceptionCode::IllegalDataValue));
            }
            match handler.read_holding_registers(address, argument) {
                Ok(values) if values.len() == argument as usize => Reply::Registers(values),
                Ok(_) => Reply::exception(function, ExceptionCode::ServerDeviceFailure),
                Err(ex) => Reply::exception(function, ex),
            }
        }
        constants::WRITE_SINGLE_REGISTER => match handler.write_single_register(address, argument) {
            Ok(()) => Reply::Echo {
                address,
                value: argument,
            },
            Err(ex) => Reply::exception(function, ex),
        },
        _ => {
            tracing::warn!("received unsupported function code: 0x{:02X}", function);
            Reply::exception(function, ExceptionCode::IllegalFunction)
        }
    };

    Some(reply)
}

fn is_supported(function: u8) -> bool {
    matches!(
        function,
        constants::READ_HOLDING_REGISTERS | constants::WRITE_SINGLE_REGISTER
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::table::ServerTable;
    use crate::types::IdentificationLabel;
    use std::sync::{Arc, Mutex};
    use tokio_test::io::Builder;

    fn handler() -> ServerHandlerType<ServerTable> {
        Arc::new(Mutex::new(ServerTable::new(
            IdentificationLabel::build_stamp(),
            &["one", "two"],
        )))
    }

    async fn exchange(handler: ServerHandlerType<ServerTable>, request: &[u8], response: &[u8]) {
        let mock = Builder::new().read(request).write(response).build();
        let session = SessionTask::new(PhysLayer::new_mock(mock), handler, DecodeLevel::nothing());
        // the mock reports end of stream once the script is exhausted
        match session.run().await {
            SessionError::Io(err) => assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof),
            err => panic!("unexpected error: {err}"),
        }
    }

    #[tokio::test]
    async fn reads_the_global_sector() {
        exchange(
            handler(),
            &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x03, 0xE8, 0x00, 0x02],
            &[0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x01, 0x03, 0x04, 0x00, 0x00, 0x00, 0x02],
        )
        .await;
    }

    #[tokio::test]
    async fn write_to_the_order_value_is_echoed() {
        let handler = handler();
        // 1000 + 100 + 21 = 0x0461
        exchange(
            handler.clone(),
            &[0x00, 0x09, 0x00, 0x00, 0x00, 0x06, 0x01, 0x06, 0x04, 0x61, 0x12, 0x34],
            &[0x00, 0x09, 0x00, 0x00, 0x00, 0x06, 0x01, 0x06, 0x04, 0x61, 0x12, 0x34],
        )
        .await;

        let words = handler.lock().unwrap().read(0x0460, 2).unwrap();
        assert_eq!(words, vec![5, 0x1234]);
    }

    #[tokio::test]
    async fn rejected_write_returns_illegal_data_address() {
        exchange(
            handler(),
            &[0x00, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x06, 0x03, 0xE8, 0x00, 0x01],
            &[0x00, 0x02, 0x00, 0x00, 0x00, 0x03, 0x01, 0x86, 0x02],
        )
        .await;
    }

    #[tokio::test]
    async fn bad_count_returns_illegal_data_value() {
        exchange(
            handler(),
            &[0x00, 0x03, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x03, 0xE8, 0x00, 0x00],
            &[0x00, 0x03, 0x00, 0x00, 0x00, 0x03, 0x01, 0x83, 0x03],
        )
        .await;
    }

    #[tokio::test]
    async fn unsupported_function_returns_illegal_function() {
        exchange(
            handler(),
            &[0x00, 0x04, 0x00, 0x00, 0x00, 0x06, 0x01, 0x10, 0x03, 0xE8, 0x00, 0x01],
            &[0x00, 0x04, 0x00, 0x00, 0x00, 0x03, 0x01, 0x90, 0x01],
        )
        .await;
    }

    #[tokio::test]
    async fn malformed_header_ends_the_session() {
        let mock = Builder::new()
            .read(&[0x00, 0x01, 0xCA, 0xFE, 0x00, 0x06, 0x01])
            .build();
        let session = SessionTask::new(PhysLayer::new_mock(mock), handler(), DecodeLevel::nothing());
        assert!(matches!(session.run().await, SessionError::BadFrame(_)));
    }
}
