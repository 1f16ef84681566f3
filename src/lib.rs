// src/lib.rs
//
// TF-Luna serial bridge. One blocking task owns the serial link and keeps
// the latest measurement in a shared store; HTTP handlers only read it.

#[macro_use]
mod logging;

mod checksums;
pub mod io;
pub mod server;
pub mod settings;
pub mod store;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

use io::serial::{list_serial_ports, SerialLinkReader, SerialPortInfo};
use server::{DeliverySurface, LinkInfo};
use settings::BridgeSettings;
use store::MeasurementStore;

// ============================================================================
// Command Line
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "tfluna-bridge", version)]
#[command(about = "Serve TF-Luna LiDAR measurements from a serial port over HTTP")]
pub struct Args {
    /// Settings file (default: <config dir>/tfluna-bridge/settings.toml if present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Serial port the sensor is attached to
    #[arg(short, long)]
    pub port: Option<String>,

    /// Serial baud rate
    #[arg(short, long)]
    pub baud: Option<u32>,

    /// HTTP listen address
    #[arg(long)]
    pub bind: Option<String>,

    /// Reassemble frames split across reads instead of dropping them
    #[arg(long)]
    pub carry_frames: bool,

    /// Reject frames whose checksum byte does not match
    #[arg(long)]
    pub verify_checksum: bool,

    /// Mirror log output to a timestamped file in this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Log every decoded frame and every dropped read
    #[arg(long)]
    pub log_frames: bool,

    /// Print available serial ports and exit
    #[arg(long)]
    pub list_ports: bool,
}

impl Args {
    /// Overlay command-line values onto loaded settings. Switches only ever
    /// turn features on; the file decides when they are absent.
    pub fn apply(&self, settings: &mut BridgeSettings) {
        if let Some(port) = &self.port {
            settings.serial.port = port.clone();
        }
        if let Some(baud) = self.baud {
            settings.serial.baud_rate = baud;
        }
        if let Some(bind) = &self.bind {
            settings.http.bind = bind.clone();
        }
        if let Some(dir) = &self.log_dir {
            settings.logging.dir = Some(dir.clone());
        }
        settings.decoder.carry_frames |= self.carry_frames;
        settings.decoder.verify_checksum |= self.verify_checksum;
        settings.logging.log_frames |= self.log_frames;
    }
}

// ============================================================================
// Entry Point
// ============================================================================

pub fn run() -> Result<(), String> {
    let args = Args::parse();

    if args.list_ports {
        return print_serial_ports();
    }

    let (mut settings, source) =
        BridgeSettings::load(args.config.as_deref()).map_err(|e| e.to_string())?;
    args.apply(&mut settings);

    if let Some(dir) = &settings.logging.dir {
        logging::init_file_logging(dir)?;
    }
    match &source {
        Some(path) => tlog!("[bridge] Settings loaded from {}", path.display()),
        None => tlog!("[bridge] No settings file, using defaults"),
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to start async runtime: {}", e))?;
    let result = runtime.block_on(run_bridge(settings));

    logging::stop_file_logging();
    result
}

async fn run_bridge(settings: BridgeSettings) -> Result<(), String> {
    let store = Arc::new(MeasurementStore::new());
    let config = settings.reader_config();

    tlog!(
        "[bridge] Serial {} at {} baud {}{}{}, carry_frames={}, checksum={:?}",
        config.port,
        config.baud_rate,
        config.data_bits,
        config.parity.letter(),
        config.stop_bits,
        config.carry_frames,
        config.checksum
    );

    // A bad listen address fails startup before the device is touched
    let listener = TcpListener::bind(&settings.http.bind)
        .await
        .map_err(|e| format!("Failed to bind {}: {}", settings.http.bind, e))?;

    let link = LinkInfo {
        port: config.port.clone(),
        baud_rate: config.baud_rate,
    };
    let reader = SerialLinkReader::new(config, store.clone()).open();
    if let Some(e) = reader.open_error() {
        tlog!("[bridge] Serial link unavailable ({}), serving status 'error'", e);
    }

    let surface = DeliverySurface::new(store.clone(), link, settings.stream_interval());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(server::serve(listener, surface, shutdown_rx));

    match tokio::signal::ctrl_c().await {
        Ok(()) => tlog!("[bridge] Shutdown requested"),
        Err(e) => tlog!("[bridge] Cannot listen for Ctrl-C ({}), shutting down", e),
    }

    let _ = shutdown_tx.send(true);
    reader.stop().await;
    if let Err(e) = server.await {
        tlog!("[bridge] HTTP task ended abnormally: {:?}", e);
    }

    tlog!(
        "[bridge] Stopped after publishing {} measurements",
        store.write_count()
    );
    Ok(())
}

fn print_serial_ports() -> Result<(), String> {
    let ports = list_serial_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
        return Ok(());
    }
    for p in &ports {
        println!("{}", port_line(p));
    }
    Ok(())
}

/// `name<TAB>type [vid:pid]<TAB>product [serial]`
fn port_line(p: &SerialPortInfo) -> String {
    let ids = match (p.vid, p.pid) {
        (Some(vid), Some(pid)) => format!(" {:04x}:{:04x}", vid, pid),
        _ => String::new(),
    };
    let product = p
        .product
        .as_deref()
        .or(p.manufacturer.as_deref())
        .unwrap_or_default();
    let serial = match &p.serial_number {
        Some(sn) => format!(" [{}]", sn),
        None => String::new(),
    };
    format!("{}\t{}{}\t{}{}", p.port_name, p.port_type, ids, product, serial)
}
