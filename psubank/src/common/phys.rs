use crate::decode::PhysDecodeLevel;
use std::fmt::Write;
use std::future::Future;
use std::task::Poll;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub(crate) struct PhysLayer {
    layer: PhysLayerImpl,
}

// encapsulates all possible physical layers as an enum
pub(crate) enum PhysLayerImpl {
    Tcp(tokio::net::TcpStream),
    Serial(tokio_serial::SerialStream),
    #[cfg(test)]
    Mock(tokio_test::io::Mock),
}

impl std::fmt::Debug for PhysLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self.layer {
            PhysLayerImpl::Tcp(_) => f.write_str("Tcp"),
            PhysLayerImpl::Serial(_) => f.write_str("Serial"),
            #[cfg(test)]
            PhysLayerImpl::Mock(_) => f.write_str("Mock"),
        }
    }
}

impl PhysLayer {
    pub(crate) fn new_tcp(socket: tokio::net::TcpStream) -> Self {
        Self {
            layer: PhysLayerImpl::Tcp(socket),
        }
    }

    pub(crate) fn new_serial(stream: tokio_serial::SerialStream) -> Self {
        Self {
            layer: PhysLayerImpl::Serial(stream),
        }
    }

    #[cfg(test)]
    pub(crate) fn new_mock(mock: tokio_test::io::Mock) -> Self {
        Self {
            layer: PhysLayerImpl::Mock(mock),
        }
    }

    pub(crate) async fn read(
        &mut self,
        buffer: &mut [u8],
        decode_level: PhysDecodeLevel,
    ) -> Result<usize, std::io::Error> {
        let length = match &mut self.layer {
            PhysLayerImpl::Tcp(x) => x.read(buffer).await?,
            PhysLayerImpl::Serial(x) => x.read(buffer).await?,
            #[cfg(test)]
            PhysLayerImpl::Mock(x) => x.read(buffer).await?,
        };

        if decode_level.enabled() {
            if let Some(x) = buffer.get(0..length) {
                tracing::info!("PHYS RX - {}", PhysDisplay::new(decode_level, x))
            }
        }

        Ok(length)
    }

    /// take only the bytes that have already arrived, `Ok(0)` when there are none
    pub(crate) async fn read_available(
        &mut self,
        buffer: &mut [u8],
        decode_level: PhysDecodeLevel,
    ) -> Result<usize, std::io::Error> {
        let mut read = std::pin::pin!(self.read(buffer, decode_level));
        std::future::poll_fn(|cx| match read.as_mut().poll(cx) {
            Poll::Ready(result) => Poll::Ready(result),
            Poll::Pending => Poll::Ready(Ok(0)),
        })
        .await
    }

    /// fill the whole buffer, a closed stream is reported as `UnexpectedEof`
    pub(crate) async fn read_exact(
        &mut self,
        buffer: &mut [u8],
        decode_level: PhysDecodeLevel,
    ) -> Result<(), std::io::Error> {
        let mut count = 0;
        while count < buffer.len() {
            match self.read(&mut buffer[count..], decode_level).await? {
                0 => return Err(std::io::ErrorKind::UnexpectedEof.into()),
                n => count += n,
            }
        }
        Ok(())
    }

    pub(crate) async fn write(
        &mut self,
        data: &[u8],
        decode_level: PhysDecodeLevel,
    ) -> Result<(), std::io::Error> {
        if decode_level.enabled() {
            tracing::info!("PHYS TX - {}", PhysDisplay::new(decode_level, data));
        }

        match &mut self.layer {
            PhysLayerImpl::Tcp(x) => x.write_all(data).await,
            PhysLayerImpl::Serial(x) => x.write_all(data).await,
            #[cfg(test)]
            PhysLayerImpl::Mock(x) => x.write_all(data).await,
        }
    }
}

pub(crate) struct PhysDisplay<'a> {
    level: PhysDecodeLevel,
    data: &'a [u8],
}

impl<'a> PhysDisplay<'a> {
    pub(crate) fn new(level: PhysDecodeLevel, data: &'a [u8]) -> Self {
        PhysDisplay { level, data }
    }
}

impl std::fmt::Display for PhysDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} bytes", self.data.len())?;
        if self.level.data_enabled() {
            format_bytes(f, self.data)?;
        }
        Ok(())
    }
}

const BYTES_PER_DECODE_LINE: usize = 18;

pub(crate) fn format_bytes(f: &mut std::fmt::Formatter, bytes: &[u8]) -> std::fmt::Result {
    for chunk in bytes.chunks(BYTES_PER_DECODE_LINE) {
        writeln!(f)?;
        let mut first = true;
        for byte in chunk {
            if !first {
                f.write_char(' ')?;
            }
            first = false;
            write!(f, "{byte:02X?}")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bytes<'a>(&'a [u8]);

    impl std::fmt::Display for Bytes<'_> {
        fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            format_bytes(f, self.0)
        }
    }

    #[test]
    fn formats_bytes_in_lines_of_eighteen() {
        let data: Vec<u8> = (0..20).collect();
        let text = Bytes(&data).to_string();
        let lines: Vec<&str> = text.lines().skip(1).collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("00 01 02"));
        assert_eq!(lines[1], "12 13");
    }

    #[test]
    fn length_only_display() {
        let display = PhysDisplay::new(PhysDecodeLevel::Length, &[1, 2, 3]);
        assert_eq!(display.to_string(), "3 bytes");
    }

    #[tokio::test]
    async fn read_exact_reassembles_segments() {
        let mock = tokio_test::io::Builder::new()
            .read(&[0x01, 0x02])
            .read(&[0x03])
            .build();
        let mut phys = PhysLayer::new_mock(mock);
        let mut buffer = [0u8; 3];
        phys.read_exact(&mut buffer, PhysDecodeLevel::Nothing)
            .await
            .unwrap();
        assert_eq!(buffer, [0x01, 0x02, 0x03]);
    }

    #[tokio::test(start_paused = true)]
    async fn read_available_does_not_wait_for_a_silent_line() {
        let mock = tokio_test::io::Builder::new()
            .read(&[0x01, 0x02])
            .write(&[0x03])
            .build();
        let mut phys = PhysLayer::new_mock(mock);
        let mut buffer = [0u8; 8];
        let start = tokio::time::Instant::now();

        let count = phys
            .read_available(&mut buffer, PhysDecodeLevel::Nothing)
            .await
            .unwrap();
        assert_eq!(&buffer[..count], &[0x01, 0x02]);

        // the next action is a write, nothing more will arrive
        let count = phys
            .read_available(&mut buffer, PhysDecodeLevel::Nothing)
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert_eq!(start.elapsed(), std::time::Duration::ZERO);

        phys.write(&[0x03], PhysDecodeLevel::Nothing).await.unwrap();
    }

    #[tokio::test]
    async fn read_exact_reports_end_of_stream() {
        let mock = tokio_test::io::Builder::new().read(&[0x01]).build();
        let mut phys = PhysLayer::new_mock(mock);
        let mut buffer = [0u8; 3];
        let err = phys
            .read_exact(&mut buffer, PhysDecodeLevel::Nothing)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }
}
