//! Driver selection by name.
//!
//! The set of drivers is closed: [`DriverKind`] lists them and [`create`] builds one from
//! a target string and the driver's own command line options.
use std::{
    fs,
    num::NonZeroU32,
    path::{Path, PathBuf},
    time::Duration,
};

use clap::{Parser, ValueEnum};
use clap_num::{maybe_hex, number_range};
use xvc_server::{
    Driver, Error, Result,
    loopback::{LoopbackDriver, Trace},
};

use crate::backends::{
    axis_fifo::{AxisFifo, AxisFifoConfig, UioInterrupt},
    axis_to_jtag::AxisToJtag,
    mmap::{ByteSwapped, MAP_SIZE, MemMap, RegisterAccess},
    udp::{UdpConfig, UdpTransport},
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum DriverKind {
    /// In-process TDI to TDO loopback, optionally replaying a trace file.
    Loopback,
    /// AXIS-to-JTAG target reached over UDP.
    Udp,
    /// AXIS-to-JTAG target behind an AXI-Stream FIFO exposed through UIO.
    AxisFifo,
}

impl DriverKind {
    pub fn from_name(name: &str) -> Result<DriverKind> {
        <DriverKind as ValueEnum>::from_str(name, false).map_err(|_| {
            Error::Config(format!(
                "unknown driver '{}', expected one of: {}",
                name,
                DriverKind::names().join(", ")
            ))
        })
    }

    pub fn names() -> Vec<String> {
        DriverKind::value_variants()
            .iter()
            .filter_map(|kind| kind.to_possible_value())
            .map(|value| value.get_name().to_string())
            .collect()
    }
}

#[derive(Parser, Debug)]
#[command(name = "loopback", no_binary_name = true)]
struct LoopbackOptions {
    /// Clock granularity in nanoseconds; periods are rounded up to a multiple of it
    #[arg(short = 'g', long, default_value_t = 1)]
    granularity_ns: u32,
    /// Largest vector the driver accepts in one call, 0 for unbounded
    #[arg(short = 'd', long, value_parser = maybe_hex::<u32>, default_value_t = 0)]
    driver_max: u32,
    /// Vector limit reported for the target, 0 for unbounded
    #[arg(short = 'T', long, value_parser = maybe_hex::<u32>, default_value_t = 0)]
    target_max: u32,
}

fn parse_mtu(s: &str) -> std::result::Result<u32, String> {
    number_range(s, 64, 65535)
}

#[derive(Parser, Debug)]
#[command(name = "udp", no_binary_name = true)]
struct UdpOptions {
    /// Largest datagram payload to send; defaults to the discovered path MTU
    #[arg(short = 'm', long, value_parser = parse_mtu)]
    mtu: Option<u32>,
    /// Allow IP fragmentation of datagrams larger than the path MTU
    #[arg(short = 'f', long)]
    allow_fragmentation: bool,
    /// Response timeout in milliseconds
    #[arg(short = 'w', long, default_value_t = 500)]
    timeout_ms: u64,
}

#[derive(Parser, Debug)]
#[command(name = "axis-fifo", no_binary_name = true)]
struct AxisFifoOptions {
    /// Wait for the UIO interrupt instead of polling the status register
    #[arg(short = 'i', long)]
    interrupt: bool,
    /// Swap the byte order of every register access
    #[arg(short = 's', long)]
    byteswap: bool,
    /// Deadline for every status wait in microseconds
    #[arg(short = 'w', long, default_value_t = 100_000)]
    poll_timeout_us: u64,
    /// Fail every Nth transfer with a timeout
    #[cfg(feature = "fault-injection")]
    #[arg(short = 'x', long)]
    drop_every: Option<NonZeroU32>,
}

impl AxisFifoOptions {
    #[cfg(feature = "fault-injection")]
    fn drop_every(&self) -> Option<NonZeroU32> {
        self.drop_every
    }

    #[cfg(not(feature = "fault-injection"))]
    fn drop_every(&self) -> Option<NonZeroU32> {
        None
    }
}

fn parse_options<P: Parser>(kind: DriverKind, options: &[String]) -> Result<P> {
    P::try_parse_from(options)
        .map_err(|e| Error::Config(format!("invalid options for {:?} driver: {}", kind, e)))
}

/// Builds the driver `name` for `target`, configured by `options`.
pub fn create(name: &str, target: Option<&str>, options: &[String]) -> Result<Box<dyn Driver>> {
    let kind = DriverKind::from_name(name)?;
    log::debug!(
        "Creating {:?} driver: target={:?}, options={:?}",
        kind,
        target,
        options
    );
    match kind {
        DriverKind::Loopback => {
            let options: LoopbackOptions = parse_options(kind, options)?;
            let mut driver = LoopbackDriver::new()
                .with_period_step_ns(options.granularity_ns)
                .with_max_vector_size(options.driver_max)
                .with_target_vector_size(options.target_max);
            if let Some(path) = target {
                let trace = Trace::open(path)?;
                log::info!(
                    "Replaying {} trace records from {}",
                    trace.records().len(),
                    path
                );
                driver = driver.with_trace(trace);
            }
            Ok(Box::new(driver))
        }
        DriverKind::Udp => {
            let options: UdpOptions = parse_options(kind, options)?;
            let target = target.ok_or_else(|| {
                Error::Config("the udp driver needs a target, e.g. -t 192.168.1.10:2542".to_string())
            })?;
            let config = UdpConfig {
                mtu: options.mtu,
                allow_fragmentation: options.allow_fragmentation,
                timeout: Duration::from_millis(options.timeout_ms),
            };
            let transport = UdpTransport::connect(target, &config)?;
            Ok(Box::new(AxisToJtag::new(transport)?))
        }
        DriverKind::AxisFifo => {
            let options: AxisFifoOptions = parse_options(kind, options)?;
            let path = match target {
                Some(path) => PathBuf::from(path),
                None => {
                    let path = uio_device_path("fifo").ok_or_else(|| {
                        Error::Config(
                            "no AXI-Stream FIFO could be detected, specify one with -t /dev/uioN"
                                .to_string(),
                        )
                    })?;
                    log::info!("Auto-detected AXI-Stream FIFO at {}", path.display());
                    path
                }
            };
            let config = AxisFifoConfig {
                poll_timeout: Duration::from_micros(options.poll_timeout_us),
                drop_every: options.drop_every(),
            };
            let map = MemMap::open(&path, MAP_SIZE)?;
            let interrupt = if options.interrupt {
                Some(UioInterrupt::new(map.file())?)
            } else {
                None
            };
            if options.byteswap {
                let fifo = with_interrupt(AxisFifo::new(ByteSwapped(map), config)?, interrupt);
                Ok(Box::new(AxisToJtag::new(fifo)?))
            } else {
                let fifo = with_interrupt(AxisFifo::new(map, config)?, interrupt);
                Ok(Box::new(AxisToJtag::new(fifo)?))
            }
        }
    }
}

fn with_interrupt<R: RegisterAccess>(
    fifo: AxisFifo<R>,
    interrupt: Option<UioInterrupt>,
) -> AxisFifo<R> {
    match interrupt {
        Some(interrupt) => fifo.with_interrupt(interrupt),
        None => fifo,
    }
}

/// Finds the first UIO device whose name contains `pattern`.
pub fn uio_device_path(pattern: &str) -> Option<PathBuf> {
    let uio_class_path = Path::new("/sys/class/uio");
    for entry in uio_class_path.read_dir().ok()? {
        let path = entry.ok()?.path();
        log::debug!("Looking at UIO path {}", path.display());
        let name = match fs::read_to_string(path.join("name")) {
            Ok(name) => name,
            Err(_) => continue,
        };
        let uio_name = name.trim();
        log::debug!("UIO has name {}", uio_name);
        if uio_name.contains(pattern) {
            // e.g. /dev/uio2
            return Some(Path::new("/dev").join(path.file_name()?));
        }
    }
    None
}
