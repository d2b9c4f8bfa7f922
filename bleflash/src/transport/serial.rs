//! Serial transport for BLE UART bridges, using the `serialport` crate.
//!
//! The bridge forwards raw bytes to the device's update characteristic and
//! relays notifications back. A background reader reassembles the byte stream
//! into response frames and reports them through the [`LinkNotifier`].

use {
    crate::{
        CancelToken,
        error::{Error, Result},
        protocol::response::RESPONSE_LEN,
        transport::{LinkNotifier, Transport, settle},
    },
    log::{debug, trace, warn},
    serialport::{ClearBuffer, SerialPort},
    std::{
        io::{self, Read, Write},
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        thread::{self, JoinHandle},
        time::Duration,
    },
};

/// Read timeout of the background reader. Bounds how long a close waits and
/// how long a partial response frame is held before it is flushed.
const READ_POLL: Duration = Duration::from_millis(50);

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Write timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115200,
            timeout: Duration::from_millis(1000),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Serial port information.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
}

/// List all available serial ports.
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports().map_err(Error::Serial)?;

    Ok(ports
        .into_iter()
        .map(|p| {
            let (vid, pid, manufacturer, product) = match &p.port_type {
                serialport::SerialPortType::UsbPort(info) => (
                    Some(info.vid),
                    Some(info.pid),
                    info.manufacturer
                        .clone(),
                    info.product
                        .clone(),
                ),
                _ => (None, None, None, None),
            };

            PortInfo {
                name: p.port_name,
                vid,
                pid,
                manufacturer,
                product,
            }
        })
        .collect())
}

struct Reader {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// [`Transport`] over a serial BLE bridge.
pub struct SerialTransport {
    config: SerialConfig,
    notifier: LinkNotifier,
    cancel: CancelToken,
    port: Option<Box<dyn SerialPort>>,
    reader: Option<Reader>,
}

impl SerialTransport {
    /// Create a transport; the port is opened on first use.
    pub fn new(config: SerialConfig, notifier: LinkNotifier) -> Self {
        Self {
            config,
            notifier,
            cancel: CancelToken::new(),
            port: None,
            reader: None,
        }
    }

    /// Stop reconnect settle waits when `cancel` fires.
    ///
    /// Pass the updater's token so cancelling a run does not wait out the
    /// settle time. Global interrupts are honoured either way.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Whether the port is open.
    pub fn is_open(&self) -> bool {
        self.port
            .is_some()
    }

    fn open(&mut self) -> Result<()> {
        debug!(
            "Opening {} at {} baud",
            self.config
                .port_name,
            self.config
                .baud_rate
        );
        let mut port = serialport::new(
            &self.config
                .port_name,
            self.config
                .baud_rate,
        )
        .timeout(
            self.config
                .timeout,
        )
        .open()?;
        port.clear(ClearBuffer::All)?;

        let mut reader = port.try_clone()?;
        reader.set_timeout(READ_POLL)?;
        let stop = Arc::new(AtomicBool::new(false));
        let handle = spawn_reader(
            reader,
            self.notifier
                .clone(),
            Arc::clone(&stop),
        )?;

        self.port = Some(port);
        self.reader = Some(Reader { stop, handle });
        Ok(())
    }

    fn close(&mut self) {
        if let Some(reader) = self
            .reader
            .take()
        {
            reader
                .stop
                .store(true, Ordering::Relaxed);
            if reader
                .handle
                .join()
                .is_err()
            {
                warn!("Serial reader thread panicked");
            }
        }
        if self
            .port
            .take()
            .is_some()
        {
            debug!(
                "Closed {}",
                self.config
                    .port_name
            );
        }
    }
}

impl Transport for SerialTransport {
    fn connect_if_needed(&mut self) -> Result<()> {
        let reader_alive = self
            .reader
            .as_ref()
            .is_some_and(|reader| {
                !reader
                    .handle
                    .is_finished()
            });
        if self.is_open() && reader_alive {
            return Ok(());
        }
        // A reader that hit a read error has already reported the link as lost.
        self.close();
        self.open()
    }

    fn reconnect(&mut self, duration: Duration) -> Result<()> {
        self.close();
        debug!("Waiting {} ms for the link to settle", duration.as_millis());
        let cancel = &self.cancel;
        settle(duration, || cancel.is_cancelled())?;
        self.open()
    }

    fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| Error::Transport("port not open".into()))?;
        trace!("TX {} bytes: {data:02X?}", data.len());
        port.write_all(data)?;
        port.flush()?;
        self.notifier
            .write_delivered();
        Ok(())
    }

    fn name(&self) -> &str {
        &self
            .config
            .port_name
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}

fn spawn_reader(
    mut port: Box<dyn SerialPort>,
    notifier: LinkNotifier,
    stop: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("bleflash-reader".into())
        .spawn(move || {
            let mut buf = [0u8; 64];
            let mut frames = FrameAssembler::default();
            while !stop.load(Ordering::Relaxed) {
                match port.read(&mut buf) {
                    Ok(0) => {},
                    Ok(n) => {
                        trace!("RX {n} bytes: {:02X?}", &buf[..n]);
                        for frame in frames.push(&buf[..n]) {
                            notifier.response(frame);
                        }
                    },
                    Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                        if let Some(frame) = frames.flush() {
                            notifier.response(frame);
                        }
                    },
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                    Err(e) => {
                        if !stop.load(Ordering::Relaxed) {
                            warn!("Serial read failed: {e}");
                            notifier.disconnected(false);
                        }
                        return;
                    },
                }
            }
        })?;
    Ok(handle)
}

/// Cuts the bridge's byte stream into response frames.
///
/// Complete frames are emitted as soon as their bytes arrive. A partial frame
/// left when the line goes idle is emitted on its own by [`FrameAssembler::flush`],
/// so a short reply reaches the awaiter (and is rejected there) instead of
/// shifting every later frame.
#[derive(Debug, Default)]
struct FrameAssembler {
    pending: Vec<u8>,
}

impl FrameAssembler {
    /// Add received bytes and take every complete frame.
    fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.pending
            .extend_from_slice(bytes);
        let complete = self
            .pending
            .len()
            - self
                .pending
                .len()
                % RESPONSE_LEN;
        self.pending
            .drain(..complete)
            .collect::<Vec<_>>()
            .chunks(RESPONSE_LEN)
            .map(<[u8]>::to_vec)
            .collect()
    }

    /// Take the partial frame, if any. Called when a read times out.
    fn flush(&mut self) -> Option<Vec<u8>> {
        if self
            .pending
            .is_empty()
        {
            return None;
        }
        debug!("Flushing partial response {:02X?}", self.pending);
        Some(std::mem::take(&mut self.pending))
    }
}
