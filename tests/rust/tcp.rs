// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod common;

//======================================================================================================================
// Imports
//======================================================================================================================

use ::anyhow::Result;
use ::netstack::{
    ensure_eq,
    inetstack::protocols::{
        layer3::{
            IpProtocol,
            PseudoHeader,
        },
        layer4::tcp::{
            SeqNumber,
            TcpHeader,
        },
    },
    Config,
    NetworkStack,
    SharedNetworkStack,
    SocketHandle,
    State,
    TcpConfig,
};
use ::socket2::{
    Domain,
    Protocol,
    Type,
};
use ::std::{
    io::Write,
    net::{
        Ipv4Addr,
        SocketAddrV4,
    },
    thread::{
        self,
        JoinHandle,
    },
    time::{
        Duration,
        Instant,
    },
};
use common::{
    safe_socket,
    Frame,
    RecordingLink,
    ALICE_IPV4,
    BOB_IPV4,
    PORT_BASE,
};

//======================================================================================================================
// Helpers
//======================================================================================================================

fn parse_frame(frame: &Frame) -> Result<(TcpHeader, Vec<u8>)> {
    let pseudo_header: PseudoHeader =
        PseudoHeader::new(ALICE_IPV4, frame.destination, IpProtocol::TCP, frame.bytes.len() as u16);
    let (header, payload): (TcpHeader, &[u8]) = TcpHeader::parse(&frame.bytes, &pseudo_header, false)?;
    Ok((header, payload.to_vec()))
}

fn segment_from_bob(header: &TcpHeader, payload: &[u8]) -> Vec<u8> {
    let length: u16 = (header.compute_size() + payload.len()) as u16;
    let pseudo_header: PseudoHeader = PseudoHeader::new(BOB_IPV4, ALICE_IPV4, IpProtocol::TCP, length);
    header.serialize(&pseudo_header, payload, false)
}

/// Binds a listener to the loopback address.
fn loopback_listener(stack: &mut NetworkStack<RecordingLink>) -> Result<(SocketHandle, SocketAddrV4)> {
    let local: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::LOCALHOST, PORT_BASE);
    let listener: SocketHandle = safe_socket(stack)?;
    stack.bind(listener, local)?;
    stack.listen(listener, 8)?;
    Ok((listener, local))
}

//======================================================================================================================
// Tests
//======================================================================================================================

/// Sends a message between two sockets of the same stack over the loopback interface.
#[test]
fn tcp_loopback_ping() -> Result<()> {
    let (mut stack, link): (NetworkStack<RecordingLink>, RecordingLink) = common::new_stack(TcpConfig::default())?;
    let (listener, local): (SocketHandle, SocketAddrV4) = loopback_listener(&mut stack)?;

    let client: SocketHandle = safe_socket(&mut stack)?;
    stack.connect(client, local)?;
    ensure_eq!(stack.state(client)?, State::Established);
    let server: SocketHandle = stack.accept(listener)?;
    ensure_eq!(stack.state(server)?, State::Established);

    ensure_eq!(stack.send(client, b"ping")?, 4);
    ensure_eq!(stack.receive(server, 64)?, b"ping".to_vec());
    ensure_eq!(stack.send(server, b"pong")?, 4);
    ensure_eq!(stack.receive(client, 64)?, b"pong".to_vec());

    ensure_eq!(link.take_frames().is_empty(), true);
    Ok(())
}

/// Accepting without a pending connection opens an established connection on the listener's endpoint.
#[test]
fn tcp_accept_without_peer() -> Result<()> {
    let (mut stack, _): (NetworkStack<RecordingLink>, RecordingLink) = common::new_stack(TcpConfig::default())?;
    let (listener, local): (SocketHandle, SocketAddrV4) = loopback_listener(&mut stack)?;

    let socket: SocketHandle = stack.accept(listener)?;
    ensure_eq!(stack.state(socket)?, State::Established);
    ensure_eq!(stack.local_address(socket)?, local);
    ensure_eq!(stack.remote_address(socket).err().map(|e| e.errno), Some(libc::ENOTCONN));
    ensure_eq!(stack.send(socket, b"ping")?, 4);
    ensure_eq!(stack.receive(socket, 64)?.is_empty(), true);
    Ok(())
}

/// Creating more sockets than the table holds fails until a socket is closed.
#[test]
fn tcp_socket_table_exhaustion() -> Result<()> {
    let config: TcpConfig = TcpConfig::default().set_max_sockets(4)?;
    let (mut stack, _): (NetworkStack<RecordingLink>, RecordingLink) = common::new_stack(config)?;

    let mut sockets: Vec<SocketHandle> = Vec::new();
    for _ in 0..4 {
        sockets.push(safe_socket(&mut stack)?);
    }
    let errno = stack.create(Domain::IPV4, Type::STREAM, None).err().map(|e| e.errno);
    ensure_eq!(errno, Some(libc::EMFILE));

    stack.close(sockets[2])?;
    stack.create(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    ensure_eq!(stack.socket_count(), 4);
    Ok(())
}

/// Rejects unsupported domains, types and protocols.
#[test]
fn tcp_create_errors() -> Result<()> {
    let (mut stack, _): (NetworkStack<RecordingLink>, RecordingLink) = common::new_stack(TcpConfig::default())?;
    let errno = |result: Result<SocketHandle, netstack::Fail>| result.err().map(|e| e.errno);
    ensure_eq!(errno(stack.create(Domain::UNIX, Type::STREAM, None)), Some(libc::EAFNOSUPPORT));
    ensure_eq!(
        errno(stack.create(Domain::IPV4, Type::from(libc::SOCK_SEQPACKET), None)),
        Some(libc::ESOCKTNOSUPPORT)
    );
    ensure_eq!(
        errno(stack.create(Domain::IPV4, Type::STREAM, Some(Protocol::ICMPV4))),
        Some(libc::EPROTONOSUPPORT)
    );
    Ok(())
}

/// Tears down a loopback connection from both sides.
#[test]
fn tcp_close_teardown() -> Result<()> {
    let (mut stack, _): (NetworkStack<RecordingLink>, RecordingLink) = common::new_stack(TcpConfig::default())?;
    let (listener, local): (SocketHandle, SocketAddrV4) = loopback_listener(&mut stack)?;
    let client: SocketHandle = safe_socket(&mut stack)?;
    stack.connect(client, local)?;
    let server: SocketHandle = stack.accept(listener)?;
    let client_addr: SocketAddrV4 = stack.local_address(client)?;

    // The FIN is acknowledged right away over loopback.
    stack.close(client)?;
    ensure_eq!(stack.connection_state(client_addr, local), Some(State::FinWait2));
    ensure_eq!(stack.state(server)?, State::CloseWait);
    ensure_eq!(stack.send(client, b"x").err().map(|e| e.errno), Some(libc::EBADF));
    ensure_eq!(stack.receive(server, 64)?.is_empty(), true);

    // The server may still send before it closes.
    ensure_eq!(stack.send(server, b"bye")?, 3);
    stack.close(server)?;
    ensure_eq!(stack.connection_state(client_addr, local), Some(State::TimeWait));
    ensure_eq!(stack.connection_state(local, client_addr), None);

    let now: Instant = stack.now();
    stack.advance_clock(now + 2 * Duration::from_secs(31));
    ensure_eq!(stack.connection_state(client_addr, local), None);
    ensure_eq!(stack.connection_count(), 1);
    Ok(())
}

/// A connection to a port without a listener is refused.
#[test]
fn tcp_connection_refused() -> Result<()> {
    let (mut stack, _): (NetworkStack<RecordingLink>, RecordingLink) = common::new_stack(TcpConfig::default())?;
    let client: SocketHandle = safe_socket(&mut stack)?;
    let errno = stack
        .connect(client, SocketAddrV4::new(Ipv4Addr::LOCALHOST, PORT_BASE))
        .err()
        .map(|e| e.errno);
    ensure_eq!(errno, Some(libc::ECONNREFUSED));
    ensure_eq!(stack.state(client)?, State::Closed);
    let errno = stack
        .connect(client, SocketAddrV4::new(Ipv4Addr::LOCALHOST, PORT_BASE))
        .err()
        .map(|e| e.errno);
    ensure_eq!(errno, Some(libc::ECONNREFUSED));
    Ok(())
}

/// Unacknowledged data is retransmitted until the retry limit is hit, then the connection is reset.
#[test]
fn tcp_retransmission_then_reset() -> Result<()> {
    let config: TcpConfig = TcpConfig::default().set_retries(2)?;
    let (mut stack, link): (NetworkStack<RecordingLink>, RecordingLink) = common::new_stack(config)?;
    let socket: SocketHandle = safe_socket(&mut stack)?;
    stack.connect(socket, SocketAddrV4::new(BOB_IPV4, PORT_BASE))?;

    let frames: Vec<Frame> = link.take_frames();
    ensure_eq!(frames.len(), 1);
    ensure_eq!(frames[0].interface.as_str(), "eth0");
    let (syn, _): (TcpHeader, Vec<u8>) = parse_frame(&frames[0])?;
    ensure_eq!(syn.syn, true);

    let mut syn_ack: TcpHeader = TcpHeader::new(PORT_BASE, syn.src_port);
    syn_ack.seq_num = SeqNumber::from(300);
    syn_ack.ack_num = syn.seq_num + SeqNumber::from(1);
    syn_ack.syn = true;
    syn_ack.ack = true;
    syn_ack.window_size = 4096;
    stack.receive_segment(BOB_IPV4, ALICE_IPV4, &segment_from_bob(&syn_ack, &[]))?;
    ensure_eq!(stack.state(socket)?, State::Established);

    ensure_eq!(stack.send(socket, b"data")?, 4);
    let mut now: Instant = stack.now();
    for _ in 0..10 {
        now += Duration::from_secs(30);
        stack.advance_clock(now);
    }

    let segments: Vec<(TcpHeader, Vec<u8>)> = link
        .take_frames()
        .iter()
        .map(parse_frame)
        .collect::<Result<Vec<(TcpHeader, Vec<u8>)>>>()?;
    // ACK of the SYN+ACK, the data, two retransmissions and the RST.
    ensure_eq!(segments.len(), 5);
    for (header, payload) in &segments[1..4] {
        ensure_eq!(header.seq_num, syn.seq_num + SeqNumber::from(1));
        ensure_eq!(payload.as_slice(), b"data");
    }
    ensure_eq!(segments[4].0.rst, true);
    ensure_eq!(stack.state(socket)?, State::Closed);
    ensure_eq!(stack.send(socket, b"x").err().map(|e| e.errno), Some(libc::ECONNRESET));
    Ok(())
}

/// Blocking calls of a shared stack wake up when another thread makes progress.
#[test]
fn tcp_shared_stack_blocking_calls() -> Result<()> {
    let (mut stack, _): (NetworkStack<RecordingLink>, RecordingLink) = common::new_stack(TcpConfig::default())?;
    let (listener, local): (SocketHandle, SocketAddrV4) = loopback_listener(&mut stack)?;
    let shared: SharedNetworkStack<RecordingLink> = SharedNetworkStack::new(stack);

    let server: JoinHandle<Result<Vec<u8>>> = {
        let shared: SharedNetworkStack<RecordingLink> = shared.clone();
        thread::spawn(move || {
            let socket: SocketHandle = shared.accept_blocking(listener, Duration::from_secs(10))?;
            Ok(shared.receive_blocking(socket, 64, Duration::from_secs(10))?)
        })
    };

    let client: SocketHandle = shared.create(Domain::IPV4, Type::STREAM, None)?;
    shared.connect_blocking(client, local, Duration::from_secs(10))?;
    ensure_eq!(shared.send(client, b"ping")?, 4);

    let received: Vec<u8> = match server.join() {
        Ok(result) => result?,
        Err(_) => anyhow::bail!("server thread panicked"),
    };
    ensure_eq!(received, b"ping".to_vec());

    // Nobody answers BOB's side, so the handshake cannot complete.
    let other: SocketHandle = shared.create(Domain::IPV4, Type::STREAM, None)?;
    let errno = shared
        .connect_blocking(other, SocketAddrV4::new(BOB_IPV4, PORT_BASE), Duration::from_millis(20))
        .err()
        .map(|e| e.errno);
    ensure_eq!(errno, Some(libc::ETIMEDOUT));
    Ok(())
}

/// Builds a stack from a configuration file.
#[test]
fn tcp_stack_from_yaml_config() -> Result<()> {
    let path: ::std::path::PathBuf = ::std::env::temp_dir().join(format!("netstack-{}.yaml", ::std::process::id()));
    {
        let mut file: ::std::fs::File = ::std::fs::File::create(&path)?;
        file.write_all(
            b"interfaces:\n  - name: eth0\n    address: 10.0.0.2\n    netmask: 255.255.255.0\n    mtu: 9000\n\
              tcp_config:\n  max_sockets: 1\n  window_size: 2048\n",
        )?;
    }
    let config: Config = Config::new(&path.to_string_lossy())?;
    ::std::fs::remove_file(&path)?;

    let mut stack: NetworkStack<RecordingLink> = NetworkStack::from_config(RecordingLink::new(), &config)?;
    ensure_eq!(stack.interfaces().get("eth0").map(|i| i.mtu()), Some(9000));
    ensure_eq!(stack.config().get_window_size(), 2048);
    safe_socket(&mut stack)?;
    ensure_eq!(
        stack.create(Domain::IPV4, Type::STREAM, None).err().map(|e| e.errno),
        Some(libc::EMFILE)
    );
    ensure_eq!(Config::new("/nonexistent/netstack.yaml").is_err(), true);
    Ok(())
}
