//! # UDP target emulator
//!
//! Answers AXIS-to-JTAG requests on a UDP socket with a loopback JTAG chain (TDO = TDI).
//! Useful to try the `udp` driver of `xvc-bridge` without hardware.
use std::error::Error;
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;

use clap::{ArgAction, Parser};
use clap_num::number_range;
use env_logger::Env;
use xvc_bridge::backends::emulator::{JtagTarget, UdpTargetEmulator};

fn parse_word_size(s: &str) -> Result<usize, String> {
    number_range(s, 4, 16)
}

#[derive(Parser)]
#[command(about = "Emulated AXIS-to-JTAG target reachable over UDP", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "2542")]
    port: u16,

    #[arg(short, long, default_value = "127.0.0.1")]
    ip: IpAddr,

    /// Target word size in bytes
    #[arg(short, long, default_value = "4", value_parser = parse_word_size)]
    word_size: usize,

    /// Target memory depth in words, 0 for streaming
    #[arg(short = 'd', long, default_value = "0")]
    mem_depth: u16,

    /// TCK period reported to the driver
    #[arg(long)]
    period_ns: Option<u32>,

    /// Silently drop every Nth shift request
    #[arg(short = 'x', long)]
    drop_every: Option<NonZeroU32>,

    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    let target = JtagTarget::new(args.word_size)
        .with_mem_depth(args.mem_depth)
        .with_period_ns(args.period_ns)
        .with_drop_every(args.drop_every);
    let emulator = UdpTargetEmulator::bind(SocketAddr::new(args.ip, args.port), target)?;
    emulator.run()?;
    Ok(())
}
