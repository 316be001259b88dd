//! Helpers for the end-to-end tests: a server running on a background thread and a
//! minimal blocking XVC client.
use std::{
    io::{self, Read},
    net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    thread,
    time::Duration,
};

use xvc_protocol::{Message, XvcInfo, error::ReadError};
use xvc_server::{
    Driver,
    server::{Builder, Server},
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Serves `driver` on an ephemeral localhost port from a background thread.
pub fn spawn_server<D: Driver + Send + 'static>(driver: D, max_vector_size: u32) -> SocketAddr {
    init_logging();
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let addr = listener.local_addr().unwrap();
    let mut server: Server<D> = Builder::new()
        .max_vector_size(max_vector_size)
        .rw_timeout(Duration::from_secs(5))
        .build(driver);
    thread::spawn(move || server.serve(listener));
    addr
}

/// Blocking XVC client.
pub struct XvcClient {
    tcp: TcpStream,
}

impl XvcClient {
    pub fn connect(addr: impl ToSocketAddrs) -> io::Result<XvcClient> {
        let tcp = TcpStream::connect(addr)?;
        tcp.set_read_timeout(Some(Duration::from_secs(5)))?;
        Ok(XvcClient { tcp })
    }

    pub fn get_info(&mut self) -> Result<XvcInfo, ReadError> {
        Message::GetInfo.write_to(&mut self.tcp)?;
        XvcInfo::from_reader(&mut self.tcp)
    }

    /// Returns the period the server achieved.
    pub fn set_tck(&mut self, period_ns: u32) -> io::Result<u32> {
        Message::SetTck { period_ns }.write_to(&mut self.tcp)?;
        let mut buf = [0u8; 4];
        self.tcp.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Shifts `tms` and `tdi` and returns TDO of the same length.
    pub fn shift(&mut self, num_bits: u32, tms: &[u8], tdi: &[u8]) -> io::Result<Vec<u8>> {
        self.send_shift(num_bits, tms, tdi)?;
        let mut buf = vec![0; num_bits.div_ceil(8) as usize];
        self.tcp.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Sends a shift without waiting for the reply.
    pub fn send_shift(&mut self, num_bits: u32, tms: &[u8], tdi: &[u8]) -> io::Result<()> {
        Message::Shift {
            num_bits,
            tms: tms.into(),
            tdi: tdi.into(),
        }
        .write_to(&mut self.tcp)
    }

    /// True once the server has closed the connection.
    pub fn is_closed(&mut self) -> bool {
        let mut buf = [0u8; 1];
        match self.tcp.read(&mut buf) {
            Ok(0) => true,
            Ok(_) => false,
            Err(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
            ),
        }
    }
}

/// Deterministic test pattern of `len` bytes.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}
