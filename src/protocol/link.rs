//! Serial link to the rig microcontroller.
//!
//! One command is in flight at a time: a frame is written and flushed, then the link
//! blocks on a single acknowledgment byte before anything else may be sent. The wait
//! is bounded by the configured acknowledgment timeout.
//!
//! When no port could be opened the link is *disconnected*: sends are no-ops and no
//! acknowledgment is awaited, so actions still produce log records.

use super::command::Command;
use crate::config::SerialConfig;
use crate::error::{RigError, RigResult};
use futures::FutureExt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, instrument, warn};

/// Byte stream the link can drive: a real serial port or an in-memory pipe in tests.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Boxed serial stream
pub type DynSerial = Box<dyn SerialPortIO>;

/// Request/acknowledge channel to the microcontroller
pub struct DeviceLink {
    port: Option<DynSerial>,
    ack_timeout: Duration,
    name: String,
}

impl std::fmt::Debug for DeviceLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceLink")
            .field("name", &self.name)
            .field("connected", &self.is_connected())
            .field("ack_timeout", &self.ack_timeout)
            .finish()
    }
}

impl DeviceLink {
    /// A link with no device behind it
    pub fn disconnected() -> Self {
        Self {
            port: None,
            ack_timeout: Duration::from_secs(5),
            name: "disconnected".to_string(),
        }
    }

    /// Wrap an already-open stream
    pub fn from_io<T: SerialPortIO + 'static>(io: T, ack_timeout: Duration) -> Self {
        Self {
            port: Some(Box::new(io)),
            ack_timeout,
            name: "stream".to_string(),
        }
    }

    /// Open the configured serial port
    #[cfg(feature = "instrument_serial")]
    pub async fn open(config: &SerialConfig) -> RigResult<Self> {
        let path = config
            .port
            .clone()
            .ok_or_else(|| RigError::Configuration("no serial port configured".into()))?;
        let baud_rate = config.baud_rate;
        let port_path = path.clone();

        // Opening can block on some platforms
        let port = tokio::task::spawn_blocking(move || {
            tokio_serial::new(&port_path, baud_rate)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::None)
                .stop_bits(tokio_serial::StopBits::One)
                .flow_control(tokio_serial::FlowControl::None)
                .open_native_async()
        })
        .await
        .map_err(|e| RigError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
        .map_err(|e| RigError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        Ok(Self {
            port: Some(Box::new(port)),
            ack_timeout: config.ack_timeout(),
            name: path,
        })
    }

    /// Open the configured serial port
    #[cfg(not(feature = "instrument_serial"))]
    pub async fn open(_config: &SerialConfig) -> RigResult<Self> {
        Err(RigError::Configuration(
            "serial support not compiled in (enable feature 'instrument_serial')".into(),
        ))
    }

    /// Open the configured port, falling back to a disconnected link.
    ///
    /// A missing or unopenable port is reported and the rig keeps running without
    /// hardware.
    pub async fn connect(config: &SerialConfig) -> Self {
        if config.port.is_none() {
            warn!("No serial port configured. Running disconnected");
            return Self::disconnected();
        }
        match Self::open(config).await {
            Ok(link) => {
                tracing::info!(port = %link.name, baud = config.baud_rate, "Serial link open");
                link
            }
            Err(e) => {
                warn!(error = %e, "Could not open serial port. Running disconnected");
                Self::disconnected()
            }
        }
    }

    /// Whether a device is attached
    pub fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    /// Port name, or `disconnected`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acknowledgment timeout
    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }

    /// Send one command and wait for its acknowledgment if it has one.
    ///
    /// Disconnected links accept the command and do nothing.
    #[instrument(skip(self), fields(port = %self.name), err)]
    pub async fn send(&mut self, command: &Command) -> RigResult<()> {
        if !self.is_connected() {
            debug!(?command, "Skipped (disconnected)");
            return Ok(());
        }
        self.write_frame(&command.encode()).await?;
        if command.expects_ack() {
            self.await_ack().await?;
        }
        Ok(())
    }

    /// Send a command answered by a 16-bit reading, then the acknowledgment
    #[instrument(skip(self), fields(port = %self.name), err)]
    pub async fn query_u16(&mut self, command: &Command) -> RigResult<u16> {
        if !self.is_connected() {
            return Err(RigError::NotConnected);
        }
        self.flush_input();
        self.write_frame(&command.encode()).await?;
        let mut reading = [0u8; 2];
        self.read_exact_bounded(&mut reading).await?;
        self.await_ack().await?;
        Ok(u16::from_le_bytes(reading))
    }

    /// Block until one byte arrives and consume it
    pub async fn await_ack(&mut self) -> RigResult<u8> {
        let mut ack = [0u8; 1];
        self.read_exact_bounded(&mut ack).await?;
        Ok(ack[0])
    }

    /// Drop whatever is already buffered on the input side without waiting for more.
    ///
    /// Returns the number of bytes discarded.
    pub fn flush_input(&mut self) -> usize {
        let Some(port) = self.port.as_mut() else {
            return 0;
        };
        let mut discarded = 0;
        let mut buf = [0u8; 64];
        while let Some(Ok(n)) = port.read(&mut buf).now_or_never() {
            if n == 0 {
                break;
            }
            discarded += n;
        }
        if discarded > 0 {
            debug!(bytes = discarded, "Flushed stale input");
        }
        discarded
    }

    async fn write_frame(&mut self, frame: &[u8]) -> RigResult<()> {
        let port = self.port.as_mut().ok_or(RigError::NotConnected)?;
        port.write_all(frame).await?;
        port.flush().await?;
        Ok(())
    }

    async fn read_exact_bounded(&mut self, buf: &mut [u8]) -> RigResult<()> {
        let ack_timeout = self.ack_timeout;
        let port = self.port.as_mut().ok_or(RigError::NotConnected)?;
        match tokio::time::timeout(ack_timeout, port.read_exact(buf)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(RigError::Io(e)),
            Err(_) => {
                warn!(timeout = ?ack_timeout, "Device did not answer");
                Err(RigError::AckTimeout(ack_timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ValveMask;

    #[tokio::test]
    async fn send_writes_frame_and_consumes_ack() {
        let (mut host, device) = tokio::io::duplex(64);
        let mut link = DeviceLink::from_io(device, Duration::from_secs(1));

        host.write_all(&[0x06]).await.unwrap();
        link.send(&Command::OpenValve { valve: 3 }).await.unwrap();

        let mut buf = [0u8; 2];
        host.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [b'v', 3]);
    }

    #[tokio::test]
    async fn camera_frames_do_not_block_on_ack() {
        let (mut host, device) = tokio::io::duplex(64);
        let mut link = DeviceLink::from_io(device, Duration::from_secs(1));

        link.send(&Command::CameraStart { fps: 120 }).await.unwrap();

        let mut buf = [0u8; 4];
        host.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [b'a', b'v', b'b', 120]);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_ack_times_out() {
        let (_host, device) = tokio::io::duplex(64);
        let mut link = DeviceLink::from_io(device, Duration::from_millis(200));

        let err = link
            .send(&Command::OlfactometerSetAll {
                mask: ValveMask::CLOSED,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RigError::AckTimeout(_)));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn disconnected_link_is_a_no_op() {
        let mut link = DeviceLink::disconnected();
        assert!(!link.is_connected());
        link.send(&Command::RecordStart).await.unwrap();
        assert_eq!(link.flush_input(), 0);
        assert!(matches!(
            link.query_u16(&Command::PollPower { amplitude: 10 }).await,
            Err(RigError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn query_reads_value_then_ack() {
        let (mut host, device) = tokio::io::duplex(64);
        let mut link = DeviceLink::from_io(device, Duration::from_secs(1));

        let responder = tokio::spawn(async move {
            let mut frame = [0u8; 3];
            host.read_exact(&mut frame).await.unwrap();
            assert_eq!(frame, [b'o', b'p', 25]);
            host.write_all(&4095u16.to_le_bytes()).await.unwrap();
            host.write_all(&[0x06]).await.unwrap();
            host
        });

        let reading = link
            .query_u16(&Command::PollPower { amplitude: 25 })
            .await
            .unwrap();
        assert_eq!(reading, 4095);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn flush_input_drops_stale_bytes() {
        let (mut host, device) = tokio::io::duplex(64);
        let mut link = DeviceLink::from_io(device, Duration::from_secs(1));

        host.write_all(&[1, 2, 3]).await.unwrap();
        assert_eq!(link.flush_input(), 3);
        assert_eq!(link.flush_input(), 0);
    }
}
