use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use benchrig_model::Error;

use crate::{Parity, WireSettings, WireTransport};

/// Longest single blocking read before the async loop gets control back.
const READ_SLICE: Duration = Duration::from_millis(100);

type SharedPort = Arc<Mutex<Box<dyn serialport::SerialPort>>>;

/// Production [`WireTransport`] over the `serialport` crate.
///
/// `serialport` is a blocking API, so every operation runs on
/// `spawn_blocking` with the handle behind a mutex; reads are sliced so a
/// cancelled caller never waits more than one slice.
#[derive(Default)]
pub struct SerialWireTransport {
    port: Option<SharedPort>,
    port_name: String,
}

impl SerialWireTransport {
    pub fn new() -> Self {
        SerialWireTransport::default()
    }

    fn transport_error(&self, reason: impl Into<String>) -> Error {
        Error::Transport {
            port_name: self.port_name.clone(),
            reason: reason.into(),
        }
    }

    fn shared(&self) -> Result<SharedPort, Error> {
        self.port.clone().ok_or(Error::NoActiveSession)
    }
}

fn map_parity(parity: Parity) -> serialport::Parity {
    match parity {
        Parity::None => serialport::Parity::None,
        Parity::Even => serialport::Parity::Even,
        Parity::Odd => serialport::Parity::Odd,
    }
}

fn map_data_bits(bits: u8) -> serialport::DataBits {
    match bits {
        5 => serialport::DataBits::Five,
        6 => serialport::DataBits::Six,
        7 => serialport::DataBits::Seven,
        _ => serialport::DataBits::Eight,
    }
}

fn map_stop_bits(bits: u8) -> serialport::StopBits {
    match bits {
        2 => serialport::StopBits::Two,
        _ => serialport::StopBits::One,
    }
}

#[async_trait]
impl WireTransport for SerialWireTransport {
    async fn open(&mut self, settings: &WireSettings) -> Result<(), Error> {
        let builder = serialport::new(&settings.port_name, settings.baud)
            .data_bits(map_data_bits(settings.data_bits))
            .parity(map_parity(settings.parity))
            .stop_bits(map_stop_bits(settings.stop_bits))
            .timeout(settings.read_timeout.min(READ_SLICE));
        let port_name = settings.port_name.clone();
        let opened = tokio::task::spawn_blocking(move || builder.open())
            .await
            .map_err(|err| Error::SessionOpenFailed {
                port_name: port_name.clone(),
                reason: format!("open task failed: {err}"),
            })?
            .map_err(|err| Error::SessionOpenFailed {
                port_name: port_name.clone(),
                reason: err.to_string(),
            })?;
        debug!(port = %settings.port_name, baud = settings.baud, "serial port opened");
        self.port_name = settings.port_name.clone();
        self.port = Some(Arc::new(Mutex::new(opened)));
        Ok(())
    }

    async fn write_all(&mut self, bytes: &[u8], token: &CancellationToken) -> Result<(), Error> {
        if token.is_cancelled() {
            return Ok(());
        }
        let port = self.shared()?;
        let bytes = bytes.to_vec();
        let result = tokio::task::spawn_blocking(move || {
            let mut guard = port.lock().expect("serial port mutex");
            std::io::Write::write_all(&mut *guard, &bytes)
                .and_then(|_| std::io::Write::flush(&mut *guard))
                .map_err(|err| err.to_string())
        })
        .await
        .map_err(|err| format!("write task failed: {err}"))
        .and_then(|inner| inner);
        result.map_err(|reason| self.transport_error(reason))
    }

    async fn read_chunk(
        &mut self,
        max_wait: Duration,
        token: &CancellationToken,
    ) -> Result<Vec<u8>, Error> {
        if token.is_cancelled() {
            return Ok(Vec::new());
        }
        let port = self.shared()?;
        let wait = max_wait.min(READ_SLICE).max(Duration::from_millis(1));
        let read = tokio::task::spawn_blocking(move || {
            let mut guard = port.lock().expect("serial port mutex");
            let _ = guard.set_timeout(wait);
            let mut buf = [0u8; 256];
            match std::io::Read::read(&mut *guard, &mut buf) {
                Ok(n) => Ok(buf[..n].to_vec()),
                Err(err) if err.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
                Err(err) => Err(err.to_string()),
            }
        });
        tokio::select! {
            _ = token.cancelled() => Ok(Vec::new()),
            joined = read => joined
                .map_err(|err| self.transport_error(format!("read task failed: {err}")))?
                .map_err(|reason| self.transport_error(reason)),
        }
    }

    async fn close(&mut self) -> Result<(), Error> {
        if let Some(port) = self.port.take() {
            // Dropping the handle closes the OS descriptor; do it off the
            // async thread in case the driver flushes.
            let _ = tokio::task::spawn_blocking(move || drop(port)).await;
            debug!(port = %self.port_name, "serial port closed");
        }
        Ok(())
    }
}
