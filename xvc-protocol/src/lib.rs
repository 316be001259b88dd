//! # XVC Protocol Library
//!
//! This crate provides a Rust implementation of the [Xilinx Virtual Cable (XVC)](https://github.com/Xilinx/XilinxVirtualCable) protocol,
//! enabling client-server communication for JTAG vector shifting and cable configuration.
//!
//! ## Overview
//!
//! XVC is a protocol used by Xilinx design tools to interact with FPGA devices over a network connection.
//! The protocol is a strict request/response exchange over a byte stream:
//!
//! - **GetInfo** (`getinfo:`): query the protocol version and the largest vector the server accepts
//! - **SetTck** (`settck:<period: u32>`): configure the TCK period in nanoseconds
//! - **Shift** (`shift:<num_bits: u32><TMS vector><TDI vector>`): shift TMS/TDI vectors and receive TDO
//!
//! All integers are little-endian. Vectors carry `num_bits` bits rounded up to whole bytes.
//! The server answers `xvcServer_v1.0:<max_vector_len>\n` to GetInfo, the achieved period as
//! a `u32` to SetTck and the TDO vector to Shift.
//!
//! ## Clients
//!
//! Clients encode complete [`Message`]s and parse the [`XvcInfo`] reply:
//!
//! ```
//! use xvc_protocol::{Message, XvcInfo, Version};
//! use std::io::Cursor;
//!
//! let mut buffer = Vec::new();
//! Message::GetInfo.write_to(&mut buffer).expect("Writing to vector shouldn't fail");
//! assert_eq!(buffer, b"getinfo:");
//!
//! let mut reader = Cursor::new(b"xvcServer_v1.0:32\n");
//! let info = XvcInfo::from_reader(&mut reader).expect("Info should parse");
//! assert_eq!(info.version(), Version::V1_0);
//! assert_eq!(info.max_vector_len(), 32);
//! ```
//!
//! ## Servers
//!
//! Servers decode the [`Request`] header incrementally from whatever bytes have arrived so far
//! and read the shift vectors directly from their receive buffer:
//!
//! ```
//! use xvc_protocol::Request;
//!
//! let received = b"shift:\x04\x00\x00\x00\x0a\x05";
//! let request = Request::decode(received, 1024)
//!     .expect("Header is well-formed")
//!     .expect("Header is complete");
//! assert_eq!(request, Request::Shift { num_bits: 4 });
//! assert_eq!(request.wire_len(), 12);
//! ```
//!
//! ## Error Handling
//!
//! Parsing errors are reported as [`error::ReadError`].

pub mod protocol;
pub use protocol::*;
pub mod codec;
pub mod error;
