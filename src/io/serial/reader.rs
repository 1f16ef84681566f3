// src/io/serial/reader.rs
//
// Serial link owner and acquisition loop.
// Polls the port, decodes TF-Luna frames and publishes the freshest one into
// the shared store. Link failures are reported through `LinkStatus` only.

use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Duration;

use super::framer::{decode_frame, ChecksumPolicy, FrameDecoder, FRAME_LEN};
use super::utils::{to_io_error, Parity};
use crate::io::error::IoError;
use crate::io::now_ms;
use crate::io::types::{LinkStatus, Measurement};
use crate::store::MeasurementStore;

// ============================================================================
// Types and Configuration
// ============================================================================

/// Serial link configuration, fixed for the lifetime of a reader
#[derive(Clone, Debug)]
pub struct ReaderConfig {
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
    /// Wait between polls while fewer than a frame's worth of bytes is buffered
    pub poll_interval: Duration,
    /// Timeout for a single blocking read on the port
    pub read_timeout: Duration,
    /// Keep partial frames across reads instead of dropping torn reads
    pub carry_frames: bool,
    pub checksum: ChecksumPolicy,
    /// Log every decoded frame and every dropped read
    pub log_frames: bool,
}

impl ReaderConfig {
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        ReaderConfig {
            port: port.into(),
            baud_rate,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
            poll_interval: Duration::from_millis(10),
            read_timeout: Duration::from_secs(1),
            carry_frames: false,
            checksum: ChecksumPolicy::Ignore,
            log_frames: false,
        }
    }
}

/// Counters reported when the acquisition loop exits
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub frames_decoded: u64,
    /// Reads that did not yield a frame (bad header, checksum, transient error)
    pub reads_dropped: u64,
    /// Buffered bytes thrown away to stay on the freshest frame
    pub bytes_discarded: u64,
}

/// Information about an available serial port
#[derive(Clone, Debug)]
pub struct SerialPortInfo {
    pub port_name: String,
    pub port_type: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

// ============================================================================
// Link Port Abstraction
// ============================================================================

/// The three operations the acquisition loop needs from a serial port.
pub trait LinkPort: Send {
    /// Bytes currently buffered and readable without waiting
    fn bytes_available(&mut self) -> std::io::Result<usize>;
    /// Fill `buf` completely or fail
    fn read_exact_bytes(&mut self, buf: &mut [u8]) -> std::io::Result<()>;
    /// Drop everything buffered on the input side
    fn discard_input(&mut self) -> std::io::Result<()>;
}

impl LinkPort for Box<dyn serialport::SerialPort> {
    fn bytes_available(&mut self) -> std::io::Result<usize> {
        self.bytes_to_read().map(|n| n as usize).map_err(to_io_error)
    }

    fn read_exact_bytes(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        std::io::Read::read_exact(self, buf)
    }

    fn discard_input(&mut self) -> std::io::Result<()> {
        self.clear(serialport::ClearBuffer::Input).map_err(to_io_error)
    }
}

// ============================================================================
// Serial Link Reader
// ============================================================================

/// Owns one attempt at the serial link.
///
/// `open` consumes the reader: a failed open leaves the store in
/// `LinkStatus::Error` and there is no retry from the same instance.
pub struct SerialLinkReader {
    config: ReaderConfig,
    store: Arc<MeasurementStore>,
}

impl SerialLinkReader {
    pub fn new(config: ReaderConfig, store: Arc<MeasurementStore>) -> Self {
        Self { config, store }
    }

    /// Open the configured port and start the acquisition loop.
    pub fn open(self) -> ReaderHandle {
        let config = &self.config;
        let port = serialport::new(&config.port, config.baud_rate)
            .data_bits(super::utils::to_serialport_data_bits(config.data_bits))
            .stop_bits(super::utils::to_serialport_stop_bits(config.stop_bits))
            .parity(super::utils::to_serialport_parity(config.parity))
            .timeout(config.read_timeout)
            .open()
            .map_err(|e| IoError::connection(&config.port, e.to_string()));

        self.start(port)
    }

    /// Start from an already-attempted open. Must be called inside a tokio runtime.
    pub fn start<P: LinkPort + 'static>(self, port: Result<P, IoError>) -> ReaderHandle {
        let port = match port {
            Ok(p) => p,
            Err(e) => {
                tlog!("[serial:{}] {}", self.config.port, e);
                self.store.set_status(LinkStatus::Error);
                return ReaderHandle::failed(e);
            }
        };

        let config = self.config;
        tlog!(
            "[serial:{}] Opened at {} baud ({}{}{}) [carry: {}, checksum: {:?}]",
            config.port,
            config.baud_rate,
            config.data_bits,
            config.parity.letter(),
            config.stop_bits,
            config.carry_frames,
            config.checksum
        );
        self.store.set_status(LinkStatus::Connected);

        let (cancel_tx, cancel_rx) = std_mpsc::channel::<()>();
        let store = self.store;
        let task = tokio::task::spawn_blocking(move || {
            run_acquisition_loop(port, config, store, cancel_rx)
        });

        ReaderHandle {
            cancel_tx: Some(cancel_tx),
            task: Some(task),
            open_error: None,
        }
    }
}

/// Handle to a running (or failed) acquisition loop.
/// Dropping the handle cancels the loop.
pub struct ReaderHandle {
    cancel_tx: Option<std_mpsc::Sender<()>>,
    task: Option<tokio::task::JoinHandle<LinkStats>>,
    open_error: Option<String>,
}

impl ReaderHandle {
    fn failed(e: IoError) -> Self {
        ReaderHandle {
            cancel_tx: None,
            task: None,
            open_error: Some(e.into()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Why the link could not be opened, if it could not
    pub fn open_error(&self) -> Option<&str> {
        self.open_error.as_deref()
    }

    /// Cancel the loop and wait for it to release the port.
    pub async fn stop(mut self) -> Option<LinkStats> {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
        match self.task.take() {
            Some(task) => match task.await {
                Ok(stats) => Some(stats),
                Err(e) => {
                    tlog!("[serial] Acquisition task panicked: {:?}", e);
                    None
                }
            },
            None => None,
        }
    }
}

// ============================================================================
// Acquisition Loop
// ============================================================================

enum LoopExit {
    Cancelled,
    Failed(IoError),
}

/// Blocking read-decode-publish loop. Owns the port; it is dropped (and the
/// device closed) on every exit path when this function returns.
fn run_acquisition_loop<P: LinkPort>(
    mut port: P,
    config: ReaderConfig,
    store: Arc<MeasurementStore>,
    cancel_rx: std_mpsc::Receiver<()>,
) -> LinkStats {
    let device = config.port.clone();
    let mut stats = LinkStats::default();
    let mut carry = config
        .carry_frames
        .then(|| FrameDecoder::new(config.checksum));
    let mut in_suspect_range = false;

    let exit = loop {
        let available = match port.bytes_available() {
            Ok(n) => n,
            Err(e) if IoError::is_link_gone(e.kind()) => {
                break LoopExit::Failed(IoError::from_link(&device, &e))
            }
            Err(e) => {
                if config.log_frames {
                    tlog!("[serial:{}] Poll failed, retrying: {}", device, e);
                }
                0
            }
        };

        if available < FRAME_LEN {
            // Cancellable wait, a send or a dropped handle ends the loop at once
            match cancel_rx.recv_timeout(config.poll_interval) {
                Err(std_mpsc::RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                    break LoopExit::Cancelled
                }
            }
        }
        if is_cancelled(&cancel_rx) {
            break LoopExit::Cancelled;
        }

        let result = match carry.as_mut() {
            None => read_freshest_frame(&mut port, available, &config, &mut stats),
            Some(decoder) => read_carried_frames(&mut port, available, decoder, &mut stats),
        };

        match result {
            Ok(Some(m)) => {
                if m.is_suspect() != in_suspect_range {
                    in_suspect_range = m.is_suspect();
                    if in_suspect_range {
                        tlog!("[serial:{}] Distance {} cm is outside the sensor range", device, m.distance_cm);
                    }
                }
                if config.log_frames {
                    tlog!(
                        "[serial:{}] Distance: {} cm | Strength: {} | Temp: {:.1} C",
                        device,
                        m.distance_cm,
                        m.signal_strength,
                        m.temperature_c
                    );
                }
                store.write(m);
                stats.frames_decoded += 1;
            }
            Ok(None) => {
                stats.reads_dropped += 1;
            }
            Err(e) if IoError::is_link_gone(e.kind()) => {
                break LoopExit::Failed(IoError::from_link(&device, &e))
            }
            Err(e) => {
                if config.log_frames {
                    tlog!("[serial:{}] Read dropped: {}", device, e);
                }
                stats.reads_dropped += 1;
                if let Some(decoder) = carry.as_mut() {
                    decoder.reset();
                }
            }
        }
    };

    drop(port);

    match exit {
        LoopExit::Cancelled => {
            store.set_status(LinkStatus::Disconnected);
            tlog!("[serial:{}] Stopped, port released", device);
        }
        LoopExit::Failed(e) => {
            store.set_status(LinkStatus::Error);
            tlog!("[serial:{}] {}; port released", device, e);
        }
    }
    tlog!(
        "[serial:{}] {} frames decoded, {} reads dropped, {} bytes discarded",
        device,
        stats.frames_decoded,
        stats.reads_dropped,
        stats.bytes_discarded
    );

    stats
}

fn is_cancelled(cancel_rx: &std_mpsc::Receiver<()>) -> bool {
    matches!(
        cancel_rx.try_recv(),
        Ok(()) | Err(std_mpsc::TryRecvError::Disconnected)
    )
}

/// Read exactly one frame's worth of bytes, then flush whatever else is
/// buffered. A read that does not start on a header is dropped whole.
fn read_freshest_frame<P: LinkPort>(
    port: &mut P,
    available: usize,
    config: &ReaderConfig,
    stats: &mut LinkStats,
) -> std::io::Result<Option<Measurement>> {
    let mut frame = [0u8; FRAME_LEN];
    port.read_exact_bytes(&mut frame)?;
    port.discard_input()?;
    stats.bytes_discarded += available.saturating_sub(FRAME_LEN) as u64;

    let decoded = decode_frame(&frame, config.checksum, now_ms());
    if decoded.is_none() && config.log_frames {
        tlog!("[serial:{}] Dropped unsynchronised read {}", config.port, hex::encode(frame));
    }
    Ok(decoded)
}

/// Drain everything buffered into the carry decoder and keep the newest frame.
fn read_carried_frames<P: LinkPort>(
    port: &mut P,
    available: usize,
    decoder: &mut FrameDecoder,
    stats: &mut LinkStats,
) -> std::io::Result<Option<Measurement>> {
    let mut chunk = vec![0u8; available];
    port.read_exact_bytes(&mut chunk)?;

    let before = decoder.discarded();
    let latest = decoder.feed(&chunk).pop();
    stats.bytes_discarded += decoder.discarded() - before;
    Ok(latest)
}

// ============================================================================
// Port Enumeration
// ============================================================================

/// List available serial ports
///
/// On macOS, filters out /dev/tty.* devices and only shows /dev/cu.* devices.
/// The tty devices block on open waiting for carrier detect.
pub fn list_serial_ports() -> Result<Vec<SerialPortInfo>, String> {
    let ports = serialport::available_ports().map_err(|e| format!("Failed to enumerate ports: {}", e))?;

    Ok(ports
        .into_iter()
        .filter(|_p| {
            #[cfg(target_os = "macos")]
            {
                !_p.port_name.starts_with("/dev/tty.")
            }
            #[cfg(not(target_os = "macos"))]
            {
                true
            }
        })
        .map(|p| {
            let (port_type, manufacturer, product, serial_number, vid, pid) = match p.port_type {
                serialport::SerialPortType::UsbPort(info) => (
                    "USB".to_string(),
                    info.manufacturer,
                    info.product,
                    info.serial_number,
                    Some(info.vid),
                    Some(info.pid),
                ),
                serialport::SerialPortType::BluetoothPort => {
                    ("Bluetooth".to_string(), None, None, None, None, None)
                }
                serialport::SerialPortType::PciPort => ("PCI".to_string(), None, None, None, None, None),
                serialport::SerialPortType::Unknown => {
                    ("Unknown".to_string(), None, None, None, None, None)
                }
            };
            SerialPortInfo {
                port_name: p.port_name,
                port_type,
                manufacturer,
                product,
                serial_number,
                vid,
                pid,
            }
        })
        .collect())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// In-memory port that makes one scripted chunk "arrive" per poll.
    struct ScriptedPort {
        chunks: VecDeque<Vec<u8>>,
        buffered: Vec<u8>,
        fail_when_drained: Option<std::io::ErrorKind>,
        fail_once: Option<std::io::ErrorKind>,
        released: Arc<AtomicBool>,
    }

    impl ScriptedPort {
        fn new(chunks: Vec<Vec<u8>>) -> (Self, Arc<AtomicBool>) {
            let released = Arc::new(AtomicBool::new(false));
            let port = ScriptedPort {
                chunks: chunks.into(),
                buffered: Vec::new(),
                fail_when_drained: None,
                fail_once: None,
                released: released.clone(),
            };
            (port, released)
        }
    }

    impl LinkPort for ScriptedPort {
        fn bytes_available(&mut self) -> std::io::Result<usize> {
            if let Some(kind) = self.fail_once.take() {
                return Err(std::io::Error::new(kind, "parity error"));
            }
            match self.chunks.pop_front() {
                Some(chunk) => self.buffered.extend(chunk),
                None => {
                    if let Some(kind) = self.fail_when_drained {
                        return Err(std::io::Error::new(kind, "device unplugged"));
                    }
                }
            }
            Ok(self.buffered.len())
        }

        fn read_exact_bytes(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
            if self.buffered.len() < buf.len() {
                return Err(std::io::ErrorKind::TimedOut.into());
            }
            buf.copy_from_slice(&self.buffered[..buf.len()]);
            self.buffered.drain(..buf.len());
            Ok(())
        }

        fn discard_input(&mut self) -> std::io::Result<()> {
            self.buffered.clear();
            Ok(())
        }
    }

    impl Drop for ScriptedPort {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    fn frame(distance: u16) -> Vec<u8> {
        let mut f = vec![0x59, 0x59];
        f.extend_from_slice(&distance.to_le_bytes());
        f.extend_from_slice(&[0xC8, 0x00, 0x40, 0x1F]);
        let sum = crate::checksums::sum8_checksum(&f);
        f.push(sum);
        f
    }

    fn test_config(carry: bool) -> ReaderConfig {
        let mut config = ReaderConfig::new("scripted", 115200);
        config.poll_interval = Duration::from_millis(1);
        config.carry_frames = carry;
        config
    }

    async fn wait_until(store: &MeasurementStore, pred: impl Fn(&MeasurementStore) -> bool) {
        for _ in 0..1000 {
            if pred(store) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("condition not reached, state: {:?}", store.read());
    }

    #[tokio::test]
    async fn test_publishes_first_frame_and_discards_backlog() {
        let store = Arc::new(MeasurementStore::new());
        let mut backlog = frame(100);
        backlog.extend(frame(200));
        backlog.extend(frame(300));
        let (port, released) = ScriptedPort::new(vec![backlog]);

        let handle = SerialLinkReader::new(test_config(false), store.clone()).start(Ok(port));
        assert!(handle.open_error().is_none());

        wait_until(&store, |s| s.write_count() == 1).await;
        let state = store.read();
        assert_eq!(state.status, LinkStatus::Connected);
        assert_eq!(state.measurement.map(|m| m.distance_cm), Some(100));

        let stats = handle.stop().await.expect("stats");
        assert_eq!(stats.frames_decoded, 1);
        assert_eq!(stats.bytes_discarded, 18);
        assert!(released.load(Ordering::SeqCst));
        assert_eq!(store.status(), LinkStatus::Disconnected);
        // Last value survives the shutdown
        assert_eq!(store.read().measurement.map(|m| m.distance_cm), Some(100));
    }

    #[tokio::test]
    async fn test_torn_frame_is_lost_without_carry() {
        let store = Arc::new(MeasurementStore::new());
        let torn = frame(1000);
        let mut first = vec![0x00, 0x00, 0x00, 0x00];
        first.extend_from_slice(&torn[..5]);
        let mut second = torn[5..].to_vec();
        second.extend_from_slice(&[0x01; 5]);
        let (port, _released) = ScriptedPort::new(vec![first, second, frame(300)]);

        let handle = SerialLinkReader::new(test_config(false), store.clone()).start(Ok(port));
        wait_until(&store, |s| s.read().measurement.is_some()).await;

        assert_eq!(store.read().measurement.map(|m| m.distance_cm), Some(300));
        assert_eq!(store.write_count(), 1);
        let stats = handle.stop().await.expect("stats");
        assert_eq!(stats.reads_dropped, 2);
    }

    #[tokio::test]
    async fn test_torn_frame_is_reassembled_with_carry() {
        let store = Arc::new(MeasurementStore::new());
        let torn = frame(1000);
        let mut first = vec![0x00, 0x00, 0x00, 0x00];
        first.extend_from_slice(&torn[..5]);
        let mut second = torn[5..].to_vec();
        second.extend_from_slice(&[0x01; 5]);
        let (port, _released) = ScriptedPort::new(vec![first, second, frame(300)]);

        let handle = SerialLinkReader::new(test_config(true), store.clone()).start(Ok(port));
        wait_until(&store, |s| s.write_count() == 2).await;

        assert_eq!(store.read().measurement.map(|m| m.distance_cm), Some(300));
        let stats = handle.stop().await.expect("stats");
        assert_eq!(stats.frames_decoded, 2);
        assert_eq!(stats.bytes_discarded, 9);
    }

    #[tokio::test]
    async fn test_fatal_read_error_sets_error_and_releases_port() {
        let store = Arc::new(MeasurementStore::new());
        let (mut port, released) = ScriptedPort::new(vec![frame(42)]);
        port.fail_when_drained = Some(std::io::ErrorKind::BrokenPipe);

        let handle = SerialLinkReader::new(test_config(false), store.clone()).start(Ok(port));
        wait_until(&store, |s| s.status() == LinkStatus::Error).await;

        let stats = handle.stop().await.expect("stats");
        assert_eq!(stats.frames_decoded, 1);
        assert!(released.load(Ordering::SeqCst));
        let state = store.read();
        assert_eq!(state.status, LinkStatus::Error);
        assert_eq!(state.measurement.map(|m| m.distance_cm), Some(42));
    }

    #[tokio::test]
    async fn test_transient_errors_keep_the_loop_alive() {
        let store = Arc::new(MeasurementStore::new());
        let (mut port, _released) = ScriptedPort::new(vec![frame(1), frame(2)]);
        port.fail_when_drained = Some(std::io::ErrorKind::TimedOut);

        let handle = SerialLinkReader::new(test_config(false), store.clone()).start(Ok(port));
        wait_until(&store, |s| s.write_count() == 2).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(handle.is_running());
        assert_eq!(store.status(), LinkStatus::Connected);
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_parity_error_is_a_dropped_read() {
        let store = Arc::new(MeasurementStore::new());
        let (mut port, released) = ScriptedPort::new(vec![frame(77)]);
        port.fail_once = Some(std::io::ErrorKind::InvalidData);

        let handle = SerialLinkReader::new(test_config(false), store.clone()).start(Ok(port));
        wait_until(&store, |s| s.write_count() == 1).await;

        assert!(handle.is_running());
        let state = store.read();
        assert_eq!(state.status, LinkStatus::Connected);
        assert_eq!(state.measurement.map(|m| m.distance_cm), Some(77));
        assert!(!released.load(Ordering::SeqCst));
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_eio_after_unplug_is_fatal() {
        let store = Arc::new(MeasurementStore::new());
        let (mut port, released) = ScriptedPort::new(vec![]);
        port.fail_once = Some(std::io::ErrorKind::Other);

        let handle = SerialLinkReader::new(test_config(false), store.clone()).start(Ok(port));
        wait_until(&store, |s| s.status() == LinkStatus::Error).await;

        handle.stop().await;
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_open_failure_is_sticky_error() {
        let store = Arc::new(MeasurementStore::new());
        let handle = SerialLinkReader::new(test_config(false), store.clone())
            .start::<ScriptedPort>(Err(IoError::connection("scripted", "port busy")));

        assert_eq!(store.status(), LinkStatus::Error);
        assert!(!handle.is_running());
        assert_eq!(handle.open_error(), Some("scripted: failed to open: port busy"));
        assert!(handle.stop().await.is_none());
        assert_eq!(store.status(), LinkStatus::Error);
    }

    #[tokio::test]
    async fn test_missing_device_fails_to_open() {
        let store = Arc::new(MeasurementStore::new());
        let config = ReaderConfig::new("/dev/tfluna-bridge-no-such-port", 115200);
        let handle = SerialLinkReader::new(config, store.clone()).open();

        assert!(handle.open_error().is_some());
        assert!(!handle.is_running());
        assert_eq!(store.status(), LinkStatus::Error);
        assert_eq!(store.read().measurement, None);
    }

    #[tokio::test]
    async fn test_dropping_handle_cancels_loop() {
        let store = Arc::new(MeasurementStore::new());
        let (port, released) = ScriptedPort::new(vec![]);

        let handle = SerialLinkReader::new(test_config(false), store.clone()).start(Ok(port));
        drop(handle);

        wait_until(&store, |s| s.status() == LinkStatus::Disconnected).await;
        for _ in 0..500 {
            if released.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("port was not released");
    }
}
