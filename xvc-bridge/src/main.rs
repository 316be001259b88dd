//! # XVC Server
//!
//! Serves XVC clients such as Vivado hardware manager on TCP and forwards their JTAG
//! shifts to the driver selected with `-D`. Driver specific options follow `--`.
use std::error::Error;
use std::net::{IpAddr, SocketAddr};

use clap::{ArgAction, Parser};
use clap_num::maybe_hex_range;
use env_logger::Env;
use xvc_bridge::registry;
use xvc_server::server::Builder;

const MAX_VECTOR_LEN_LIMIT: u32 = 16 * 1024 * 1024;

fn parse_max_vector_len(s: &str) -> Result<u32, String> {
    maybe_hex_range(s, 1, MAX_VECTOR_LEN_LIMIT)
}

#[derive(Parser)]
#[command(
    about = "Xilinx Virtual Cable (XVC) server for AXI-Stream FIFO and UDP JTAG targets",
    long_about = None,
    after_help = "Driver options follow `--`, e.g. `xvc-bridge -D udp -t 10.0.0.2 -- -m 1400`."
)]
struct Args {
    #[arg(short, long, default_value = "2542")]
    port: u16,

    #[arg(short, long, default_value = "127.0.0.1")]
    ip: IpAddr,

    /// Largest vector in bytes a client may shift (decimal or 0x hex)
    #[arg(short = 'M', long, default_value = "32768", value_parser = parse_max_vector_len)]
    max_vector_len: u32,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Driver to use: loopback, udp or axis-fifo
    #[arg(short = 'D', long, default_value = "loopback")]
    driver: String,

    /// Driver target: trace file, host[:port] or device file
    #[arg(short, long)]
    target: Option<String>,

    /// Options passed to the driver
    #[arg(last = true)]
    driver_args: Vec<String>,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();
    log::info!("Starting XVC server");
    log::debug!(
        "Parsed arguments: ip={}, port={}, max_vector_len={}, driver={}",
        args.ip,
        args.port,
        args.max_vector_len,
        args.driver
    );

    log::info!("Initializing {} driver", args.driver);
    let driver = registry::create(&args.driver, args.target.as_deref(), &args.driver_args)?;

    let addr = SocketAddr::new(args.ip, args.port);
    log::info!("Binding to address: {}", addr);
    let mut server = Builder::new()
        .max_vector_size(args.max_vector_len)
        .build(driver);
    server.listen(addr)?;
    Ok(())
}
