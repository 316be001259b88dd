use std::{
    net::{TcpListener, TcpStream, ToSocketAddrs},
    time::Duration,
};

use crate::session::Session;
use crate::{Driver, Error, IoContext, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Largest vector, in bytes, a client may shift. Advertised through GetInfo.
    pub max_vector_size: u32,
    pub read_write_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_vector_size: 32 * 1024,
            read_write_timeout: Duration::from_secs(30),
        }
    }
}

/// Accepts XVC clients and serves them one at a time against a single driver.
#[derive(Debug)]
pub struct Server<T: Driver> {
    driver: T,
    config: Config,
}

/// Builder to create a [Server] instance and modify configuration options
///
/// # Example
///
/// ```
/// use xvc_server::loopback::LoopbackDriver;
/// use xvc_server::server::Builder;
/// use std::time::Duration;
///
/// let server = Builder::new()
///     .max_vector_size(1024)
///     .rw_timeout(Duration::from_secs(20))
///     .build(LoopbackDriver::new());
/// assert_eq!(server.config().max_vector_size, 1024);
/// ```
#[derive(Default)]
pub struct Builder {
    config: Config,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Set the highest vector size that this server is expected to receive.
    pub fn max_vector_size(mut self, size: u32) -> Self {
        self.config.max_vector_size = size;
        self
    }

    /// Set the TCP read and write timeout
    pub fn rw_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_write_timeout = timeout;
        self
    }

    /// Build and return the server
    pub fn build<T: Driver>(self, driver: T) -> Server<T> {
        Server::new(driver, self.config)
    }
}

impl<T: Driver> Server<T> {
    pub fn new(driver: T, config: Config) -> Server<T> {
        Server { driver, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn driver(&self) -> &T {
        &self.driver
    }

    pub fn listen(&mut self, addr: impl ToSocketAddrs) -> Result<()> {
        let listener = TcpListener::bind(addr).context("Binding listener")?;
        self.serve(listener)
    }

    /// Accepts connections from `listener` forever, serving one at a time.
    pub fn serve(&mut self, listener: TcpListener) -> Result<()> {
        if self.config.max_vector_size == 0 {
            return Err(Error::Config(
                "the maximum vector size must not be zero".to_string(),
            ));
        }
        if let Ok(addr) = listener.local_addr() {
            log::info!("Server listening for connections on {}", addr);
        }

        for stream in listener.incoming() {
            match stream {
                Ok(tcp) => self.serve_client(tcp),
                Err(e) => log::error!("Connection error: {}", e),
            }
        }
        Ok(())
    }

    /// Runs a session on `tcp` to completion and logs how it ended.
    pub fn serve_client(&mut self, tcp: TcpStream) {
        let peer = tcp
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown peer".to_string());
        log::info!("New client connection from {}", peer);
        match self.handle_client(tcp) {
            Ok(()) => log::info!("Client {} disconnected", peer),
            Err(e) if e.is_disconnect() => log::info!("Client {} went away: {}", peer, e),
            Err(e) => log::error!("Client {} error: {}", peer, e),
        }
    }

    fn handle_client(&mut self, tcp: TcpStream) -> Result<()> {
        tcp.set_read_timeout(Some(self.config.read_write_timeout))
            .context("Setting read timeout")?;
        tcp.set_write_timeout(Some(self.config.read_write_timeout))
            .context("Setting write timeout")?;
        tcp.set_nodelay(true).context("Disabling Nagle")?;

        Session::new(&mut self.driver, tcp, self.config.max_vector_size)?.run()
    }
}

#[cfg(test)]
mod test {
    use std::io::{Read, Write};
    use std::net::{Ipv4Addr, TcpListener, TcpStream};
    use std::thread;

    use xvc_protocol::Message;

    use super::Builder;
    use crate::loopback::LoopbackDriver;

    #[test]
    fn driver_state_outlives_the_client() {
        let _ = env_logger::builder().is_test(true).try_init();
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = listener.local_addr().unwrap();
        let client = thread::spawn(move || {
            let mut tcp = TcpStream::connect(addr).unwrap();
            let mut request = Vec::new();
            Message::SetTck { period_ns: 100 }.write_to(&mut request).unwrap();
            tcp.write_all(&request).unwrap();
            let mut period = [0u8; 4];
            tcp.read_exact(&mut period).unwrap();
            u32::from_le_bytes(period)
        });

        let mut server = Builder::new()
            .max_vector_size(64)
            .build(LoopbackDriver::new().with_period_step_ns(40));
        let (tcp, _) = listener.accept().unwrap();
        server.serve_client(tcp);

        assert_eq!(client.join().unwrap(), 120);
        assert_eq!(server.driver().period_ns(), 120);
    }
}
