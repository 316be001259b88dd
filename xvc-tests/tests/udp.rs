use std::{
    net::{Ipv4Addr, SocketAddr},
    num::NonZeroU32,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use xvc_bridge::backends::{
    axis_to_jtag::AxisToJtag,
    emulator::{JtagTarget, UdpTargetEmulator},
    udp::{UdpConfig, UdpTransport},
};
use xvc_server::{Driver, Error};
use xvc_tests::{XvcClient, init_logging, pattern, spawn_server};

/// Starts an emulated target and returns its address and request counter.
fn spawn_target(target: JtagTarget) -> (SocketAddr, Arc<AtomicUsize>) {
    init_logging();
    let emulator = UdpTargetEmulator::bind((Ipv4Addr::LOCALHOST, 0), target).unwrap();
    let addr = emulator.local_addr().unwrap();
    let received = emulator.received();
    emulator.spawn();
    (addr, received)
}

fn udp_driver(addr: SocketAddr, mtu: u32, timeout: Duration) -> AxisToJtag<UdpTransport> {
    let config = UdpConfig {
        mtu: Some(mtu),
        allow_fragmentation: false,
        timeout,
    };
    AxisToJtag::new(UdpTransport::connect(&addr.to_string(), &config).unwrap()).unwrap()
}

#[test]
fn shifts_are_split_to_fit_datagrams() {
    let (addr, _) = spawn_target(JtagTarget::new(4).with_mem_depth(64));
    let driver = udp_driver(addr, 200, Duration::from_millis(500));
    assert_eq!(driver.max_vector_size(), 96);

    let server = spawn_server(driver, 1024);
    let mut client = XvcClient::connect(server).unwrap();
    assert_eq!(client.get_info().unwrap().max_vector_len(), 1024);
    let tdi = pattern(1000, 3);
    let tdo = client.shift(7995, &pattern(1000, 9), &tdi).unwrap();
    assert_eq!(tdo, tdi);
}

#[test]
fn wide_target_words() {
    let (addr, _) = spawn_target(JtagTarget::new(8));
    let driver = udp_driver(addr, 1000, Duration::from_millis(500));
    assert_eq!(driver.word_size(), 8);

    let server = spawn_server(driver, 4096);
    let mut client = XvcClient::connect(server).unwrap();
    for num_bits in [1u32, 63, 64, 65, 8 * 496 - 1, 8 * 3000] {
        let len = num_bits.div_ceil(8) as usize;
        let tdi = pattern(len, 1);
        assert_eq!(client.shift(num_bits, &vec![0; len], &tdi).unwrap(), tdi);
    }
}

#[test]
fn oversized_vector_never_reaches_the_target() {
    let (addr, received) = spawn_target(JtagTarget::new(4));
    let mut driver = udp_driver(addr, 200, Duration::from_millis(500));
    let before = received.load(Ordering::Relaxed);

    let mut tdo = [0u8; 97];
    let result = driver.shift(8 * 97, &[0; 97], &[0; 97], &mut tdo);
    assert!(matches!(result, Err(Error::Protocol(_))));
    assert_eq!(received.load(Ordering::Relaxed), before);
}

#[test]
fn dropped_reply_times_out_and_closes_the_session() {
    let target = JtagTarget::new(4).with_drop_every(NonZeroU32::new(2));
    let (addr, _) = spawn_target(target);
    let driver = udp_driver(addr, 1400, Duration::from_millis(100));
    let server = spawn_server(driver, 1024);

    let mut client = XvcClient::connect(server).unwrap();
    assert_eq!(client.shift(8, &[0], &[0x81]).unwrap(), [0x81]);
    client.send_shift(8, &[0], &[0x81]).unwrap();
    assert!(client.is_closed());

    // A new connection queries the target, which restarts its drop counter.
    let mut client = XvcClient::connect(server).unwrap();
    assert_eq!(client.shift(8, &[0], &[0x18]).unwrap(), [0x18]);
}

#[test]
fn silent_target_fails_driver_creation() {
    init_logging();
    let socket = std::net::UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let config = UdpConfig {
        timeout: Duration::from_millis(50),
        ..Default::default()
    };
    let transport =
        UdpTransport::connect(&socket.local_addr().unwrap().to_string(), &config).unwrap();
    assert!(AxisToJtag::new(transport).unwrap_err().is_timeout());
}
