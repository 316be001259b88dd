//! # XVC Server Library
//!
//! This crate provides a foundation for implementing Xilinx Virtual Cable (XVC) servers
//! that bridge JTAG shifts from network clients to a locally attached JTAG transport.
//!
//! ## Architecture
//!
//! - **[`Driver`] Trait**: the interface every backend implements (limit negotiation,
//!   TCK configuration and one bounded TMS/TDI to TDO exchange)
//! - **[`session::Session`]**: the per-connection protocol state machine. It decodes
//!   requests from its receive buffer, validates their length, splits large shifts into
//!   chunks the driver can carry and writes the responses
//! - **[`server::Server`]**: accepts TCP connections and runs one session at a time
//!   against the single driver it owns
//! - **[`loopback`]**: an in-process driver that echoes TDI as TDO or replays a golden trace
//!
//! ## How It Works
//!
//! 1. A backend driver (AXI-Stream FIFO, UDP, loopback) implements [`Driver`]
//! 2. The driver is wrapped in a [`server::Server`] instance
//! 3. For every accepted connection the server creates a [`session::Session`], which
//!    queries the driver and reconciles the [`VectorLimits`]
//! 4. Each shift is forwarded to the driver in chunks no larger than the effective limit
//! 5. TDO is reassembled and sent back to the client
//!
//! ## Starting the Server
//!
//! ```no_run
//! use xvc_server::loopback::LoopbackDriver;
//! use xvc_server::server::Builder;
//!
//! let mut server = Builder::new()
//!     .max_vector_size(32768)
//!     .build(LoopbackDriver::new());
//! server.listen("127.0.0.1:2542")?;
//! # Ok::<(), xvc_server::Error>(())
//! ```
//!
//! ## Error Handling
//!
//! XVC 1.0 has no way to report errors to the client. Any [`Error`] raised while serving a
//! connection closes that connection; the listener logs it and accepts the next client.
//!
//! ## Logging
//!
//! This crate uses the `log` crate for diagnostics. Connections are logged at `info`,
//! commands at `debug` and vector contents at `trace`.
//!
//! ## Thread Model
//!
//! The server processes client connections sequentially in a single thread. A JTAG TAP
//! cannot be time-shared between concurrent shifts, so there is no parallelism to exploit.
mod error;
pub mod limits;
pub mod loopback;
pub mod server;
pub mod session;

pub use error::{Error, IoContext, Result};
pub use limits::VectorLimits;

/// Trait that backend drivers must implement to provide JTAG functionality.
///
/// One driver instance is shared by all connections of a server, one connection at a time.
/// Drivers hold no per-connection state beyond what [`Driver::query`] resets.
pub trait Driver {
    /// Announces a new connection and returns the vector limit, in bytes, reported by the
    /// attached target. `0` means the target accepts vectors of any size.
    ///
    /// Drivers reset any target-side state here, e.g. resynchronize transaction ids.
    fn query(&mut self) -> Result<u32>;

    /// The largest vector, in bytes, this driver can carry in one [`Driver::shift`].
    /// `0` means unbounded.
    fn max_vector_size(&self) -> u32;

    /// Sets the TCK period as close as possible to `period_ns` and returns the period
    /// actually in effect. Backends clamp to what they support instead of failing.
    fn set_period_ns(&mut self, period_ns: u32) -> u32;

    /// Shifts `num_bits` bits of `tms` and `tdi` and stores the captured TDO in `tdo`.
    ///
    /// `tms`, `tdi` and `tdo` are ⌈num_bits / 8⌉ bytes long and never exceed the limits
    /// negotiated through [`Driver::query`] and [`Driver::max_vector_size`]. Either the
    /// whole vector is exchanged or an error is returned.
    fn shift(&mut self, num_bits: u32, tms: &[u8], tdi: &[u8], tdo: &mut [u8]) -> Result<()>;
}

impl<D: Driver + ?Sized> Driver for Box<D> {
    fn query(&mut self) -> Result<u32> {
        (**self).query()
    }

    fn max_vector_size(&self) -> u32 {
        (**self).max_vector_size()
    }

    fn set_period_ns(&mut self, period_ns: u32) -> u32 {
        (**self).set_period_ns(period_ns)
    }

    fn shift(&mut self, num_bits: u32, tms: &[u8], tdi: &[u8], tdo: &mut [u8]) -> Result<()> {
        (**self).shift(num_bits, tms, tdi, tdo)
    }
}
