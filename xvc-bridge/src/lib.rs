//! # XVC bridge to AXIS-to-JTAG targets
//!
//! Backend implementations for the XVC (Xilinx Virtual Cable) server, connecting it to
//! JTAG targets that speak the AXIS-to-JTAG message protocol.
//!
//! ## Overview
//!
//! This crate extends [`xvc_server`] with concrete drivers. Targets are reached either
//! through an AXI-Stream FIFO mapped via Linux UIO ([`backends::axis_fifo`]) or as UDP
//! datagrams ([`backends::udp`]). Both share the protocol layer in
//! [`backends::axis_to_jtag`]. The [`registry`] builds any driver, including the
//! in-process loopback of `xvc-server`, from a name and command line options.
//!
//! [`backends::emulator`] contains a software target used by the tests and by the
//! `xvc-udp-target` binary.
pub mod backends;
pub mod registry;
