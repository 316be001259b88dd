pub mod axis_fifo;
pub mod axis_to_jtag;
pub mod datagram;
pub mod emulator;
pub mod mmap;
pub mod udp;
