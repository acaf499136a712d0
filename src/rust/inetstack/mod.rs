// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    inetstack::{
        config::Config,
        protocols::{
            layer1::PhysicalLayer,
            layer3::{
                InterfaceRegistry,
                NetworkInterface,
                PseudoHeader,
            },
            layer4::{
                ephemeral::EphemeralPorts,
                tcp::{
                    isn_generator::IsnGenerator,
                    Connection,
                    ConnectionId,
                    SeqNumber,
                    State,
                    TcpHeader,
                    TimerEvent,
                },
            },
        },
    },
    runtime::{
        fail::Fail,
        network::{
            config::TcpConfig,
            consts::IPV4_TCP_HEADER_OVERHEAD,
        },
        timer::Timer,
    },
};
use ::rand::{
    rngs::SmallRng,
    Rng,
    SeedableRng,
};
use ::slab::Slab;
use ::socket2::{
    Domain,
    Protocol,
    Type,
};
use ::std::{
    collections::{
        HashMap,
        HashSet,
        VecDeque,
    },
    fmt,
    net::{
        Ipv4Addr,
        SocketAddrV4,
    },
    time::Instant,
};

//======================================================================================================================
// Exports
//======================================================================================================================

#[cfg(test)]
pub mod test_helpers;


pub mod config;
pub mod protocols;
pub mod shared;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Identifies a socket. Handles of closed sockets stay invalid even after their slot is reused.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SocketHandle {
    index: usize,
    generation: u64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum SocketKind {
    Stream(ConnectionId),
    Datagram,
}

struct Socket {
    generation: u64,
    kind: SocketKind,
    // Bound endpoint of datagram sockets. Stream sockets keep theirs in the connection.
    local: SocketAddrV4,
    // Port that this socket holds in the port allocator.
    port_lease: Option<u16>,
}

/// A serialized segment waiting for delivery.
struct OutboundSegment {
    src: Ipv4Addr,
    dst: Ipv4Addr,
    bytes: Vec<u8>,
}

/// TCP/IPv4 socket stack. The stack owns every table and runs each operation to completion: segments produced by an
/// operation are delivered (or handed to the link layer) before the operation returns.
pub struct NetworkStack<P: PhysicalLayer> {
    link: P,
    config: TcpConfig,
    interfaces: InterfaceRegistry,
    ports: EphemeralPorts,
    isn_generator: IsnGenerator,
    sockets: Slab<Socket>,
    next_generation: u64,
    connections: HashMap<ConnectionId, Connection>,
    next_connection_id: u64,
    // Ports of closed sockets whose connection is still tearing down.
    lingering_leases: HashMap<ConnectionId, u16>,
    timers: Timer<TimerEvent>,
    outgoing: VecDeque<OutboundSegment>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl SocketHandle {
    /// Slot of the socket in the socket table.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<P: PhysicalLayer> NetworkStack<P> {
    /// Creates a stack that only has the loopback interface.
    pub fn new(link: P, config: TcpConfig) -> Self {
        let mut rng: SmallRng = SmallRng::from_entropy();
        let nonce: u32 = rng.gen();
        Self {
            link,
            interfaces: InterfaceRegistry::new(config.get_max_interfaces()),
            ports: EphemeralPorts::default(),
            isn_generator: IsnGenerator::new(nonce),
            sockets: Slab::with_capacity(config.get_max_sockets()),
            next_generation: 0,
            connections: HashMap::new(),
            next_connection_id: 0,
            lingering_leases: HashMap::new(),
            timers: Timer::new(Instant::now()),
            outgoing: VecDeque::new(),
            config,
        }
    }

    /// Creates a stack with the TCP options and interfaces of `config`.
    pub fn from_config(link: P, config: &Config) -> Result<Self, Fail> {
        let mut stack: Self = Self::new(link, config.tcp_config()?);
        for interface in config.interfaces()? {
            stack.add_interface(interface)?;
        }
        Ok(stack)
    }

    //==================================================================================================================
    // Socket Operations
    //==================================================================================================================

    ///
    /// **Brief**
    ///
    /// Creates an endpoint for communication. Only IPv4 stream (TCP) and datagram sockets are supported. Stream
    /// sockets start with a connection in the `CLOSED` state.
    ///
    /// **Return Value**
    ///
    /// Upon successful completion, a handle to the new socket is returned. Upon failure, `Fail` is returned instead.
    ///
    pub fn create(&mut self, domain: Domain, ty: Type, protocol: Option<Protocol>) -> Result<SocketHandle, Fail> {
        trace!("create(): domain={:?} type={:?} protocol={:?}", domain, ty, protocol);
        if domain != Domain::IPV4 {
            let cause: String = format!("address family not supported (domain={:?})", domain);
            error!("create(): {}", cause);
            return Err(Fail::new(libc::EAFNOSUPPORT, &cause));
        }
        let expected_protocol: Protocol = if ty == Type::STREAM {
            Protocol::TCP
        } else if ty == Type::DGRAM {
            Protocol::UDP
        } else {
            let cause: String = format!("socket type not supported (type={:?})", ty);
            error!("create(): {}", cause);
            return Err(Fail::new(libc::ESOCKTNOSUPPORT, &cause));
        };
        if let Some(protocol) = protocol {
            if protocol != expected_protocol {
                let cause: String = format!("protocol not supported for socket type (protocol={:?})", protocol);
                error!("create(): {}", cause);
                return Err(Fail::new(libc::EPROTONOSUPPORT, &cause));
            }
        }
        self.ensure_socket_slot("create")?;

        let kind: SocketKind = if ty == Type::STREAM {
            let id: ConnectionId = self.new_connection()?;
            SocketKind::Stream(id)
        } else {
            SocketKind::Datagram
        };
        let handle: SocketHandle = self.insert_socket(kind);
        debug!("create(): socket {} ({:?})", handle, kind);
        Ok(handle)
    }

    ///
    /// **Brief**
    ///
    /// Binds the socket referred to by `handle` to `local`. An unspecified port picks an ephemeral port. Nothing is
    /// transmitted.
    ///
    /// **Return Value**
    ///
    /// Upon successful completion, `Ok(())` is returned. Upon failure, `Fail` is returned instead.
    ///
    pub fn bind(&mut self, handle: SocketHandle, local: SocketAddrV4) -> Result<(), Fail> {
        trace!("bind(): handle={} local={}", handle, local);
        let (kind, bound): (SocketKind, SocketAddrV4) = {
            let socket: &Socket = self.get_socket(handle)?;
            (socket.kind, self.socket_local(socket))
        };

        if !local.ip().is_unspecified() && !self.interfaces.is_local(*local.ip()) {
            let cause: String = format!("address is not local (address={})", local.ip());
            error!("bind(): {}", cause);
            return Err(Fail::new(libc::EADDRNOTAVAIL, &cause));
        }
        if bound.port() != 0 {
            let cause: String = format!("socket is already bound (local={})", bound);
            error!("bind(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        if local.port() != 0 && self.is_endpoint_in_use(kind, local) {
            let cause: String = format!("address already in use (local={})", local);
            error!("bind(): {}", cause);
            return Err(Fail::new(libc::EADDRINUSE, &cause));
        }
        if EphemeralPorts::is_private(local.port()) && self.ports.is_in_use(local.port()) {
            let cause: String = format!("ephemeral port is leased (port={})", local.port());
            error!("bind(): {}", cause);
            return Err(Fail::new(libc::EADDRINUSE, &cause));
        }

        let lease: Option<u16> = if local.port() == 0 {
            Some(self.ports.alloc()?)
        } else if EphemeralPorts::is_private(local.port()) {
            self.ports.reserve(local.port())?;
            Some(local.port())
        } else {
            None
        };
        let local: SocketAddrV4 = SocketAddrV4::new(*local.ip(), lease.unwrap_or(local.port()));

        if let SocketKind::Stream(id) = kind {
            if let Some(connection) = self.connections.get_mut(&id) {
                connection.set_local(local);
            }
        }
        if let Some(socket) = self.sockets.get_mut(handle.index) {
            if kind == SocketKind::Datagram {
                socket.local = local;
            }
            socket.port_lease = lease;
        }
        debug!("bind(): socket {} bound to {}", handle, local);
        Ok(())
    }

    ///
    /// **Brief**
    ///
    /// Marks the stream socket referred to by `handle` as passive. The backlog is accepted but not enforced: a
    /// listener holds at most one connection waiting to be accepted.
    ///
    /// **Return Value**
    ///
    /// Upon successful completion, `Ok(())` is returned. Upon failure, `Fail` is returned instead.
    ///
    pub fn listen(&mut self, handle: SocketHandle, backlog: usize) -> Result<(), Fail> {
        trace!("listen(): handle={} backlog={}", handle, backlog);
        let id: ConnectionId = self.stream_connection(handle, "listen")?;
        let connection: &mut Connection = match self.connections.get_mut(&id) {
            Some(connection) => connection,
            None => return Err(missing_connection("listen", id)),
        };
        if connection.local().port() == 0 {
            let cause: &str = "socket is not bound";
            error!("listen(): {}", cause);
            return Err(Fail::new(libc::EINVAL, cause));
        }
        connection.listen()
    }

    ///
    /// **Brief**
    ///
    /// Accepts a connection on the listening socket referred to by `handle`. Never blocks: if no connection is
    /// waiting, a connection is opened in the `ESTABLISHED` state on the listener's local endpoint without a remote
    /// endpoint.
    ///
    /// **Return Value**
    ///
    /// Upon successful completion, a handle to the new socket is returned. Upon failure, `Fail` is returned instead.
    ///
    pub fn accept(&mut self, handle: SocketHandle) -> Result<SocketHandle, Fail> {
        trace!("accept(): handle={}", handle);
        let listener_id: ConnectionId = self.stream_connection(handle, "accept")?;
        let (local, pending): (SocketAddrV4, Option<ConnectionId>) = match self.connections.get(&listener_id) {
            Some(listener) if listener.state() == State::Listen => (listener.local(), listener.pending()),
            Some(listener) => {
                let cause: String = format!("socket is not listening (state={:?})", listener.state());
                error!("accept(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            },
            None => return Err(missing_connection("accept", listener_id)),
        };
        self.ensure_socket_slot("accept")?;

        let adopted: Option<ConnectionId> = pending.filter(|child| {
            self.connections
                .get(child)
                .is_some_and(|connection| connection.state() != State::Closed)
        });
        let id: ConnectionId = match adopted {
            Some(child) => {
                if let Some(listener) = self.connections.get_mut(&listener_id) {
                    listener.set_pending(None);
                }
                child
            },
            None => {
                let id: ConnectionId = self.new_connection()?;
                if let Some(connection) = self.connections.get_mut(&id) {
                    connection.set_local(local);
                    connection.open_established();
                }
                id
            },
        };

        let new_handle: SocketHandle = self.insert_socket(SocketKind::Stream(id));
        debug!("accept(): socket {} accepted connection {} on {}", new_handle, id, local);
        Ok(new_handle)
    }

    ///
    /// **Brief**
    ///
    /// Opens a connection from the stream socket referred to by `handle` to `remote`. An unbound socket gets an
    /// ephemeral port and the address of the outbound interface. Connections to local addresses complete the
    /// handshake before this returns. Other connections return in `SYN_SENT`.
    ///
    /// **Return Value**
    ///
    /// Upon successful completion, `Ok(())` is returned. Upon failure, `Fail` is returned instead.
    ///
    pub fn connect(&mut self, handle: SocketHandle, remote: SocketAddrV4) -> Result<(), Fail> {
        trace!("connect(): handle={} remote={}", handle, remote);
        let id: ConnectionId = self.stream_connection(handle, "connect")?;
        let mut local: SocketAddrV4 = match self.connections.get(&id) {
            Some(connection) if connection.state() == State::Closed => match connection.error() {
                Some(e) => {
                    error!("connect(): {}", e.cause);
                    return Err(e.clone());
                },
                None => connection.local(),
            },
            Some(connection) if connection.remote().is_some() => {
                let cause: String = format!("socket is already connected (state={:?})", connection.state());
                error!("connect(): {}", cause);
                return Err(Fail::new(libc::EISCONN, &cause));
            },
            Some(connection) => {
                let cause: String = format!("cannot connect socket (state={:?})", connection.state());
                error!("connect(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            },
            None => return Err(missing_connection("connect", id)),
        };
        if remote.ip().is_unspecified() || remote.port() == 0 {
            let cause: String = format!("invalid remote endpoint (remote={})", remote);
            error!("connect(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        let (interface_address, mtu): (Ipv4Addr, u16) = match self.interfaces.route(*remote.ip()) {
            Some(interface) => (interface.address(), interface.mtu()),
            None => {
                let cause: String = format!("no route to host (remote={})", remote.ip());
                error!("connect(): {}", cause);
                return Err(Fail::new(libc::ENETUNREACH, &cause));
            },
        };

        if local.ip().is_unspecified() {
            local.set_ip(interface_address);
        }
        if local.port() != 0 && self.is_connection_in_use(local, remote) {
            let cause: String = format!("connection already exists (local={}, remote={})", local, remote);
            error!("connect(): {}", cause);
            return Err(Fail::new(libc::EADDRINUSE, &cause));
        }
        if local.port() == 0 {
            let port: u16 = self.ports.alloc()?;
            local.set_port(port);
            if let Some(socket) = self.sockets.get_mut(handle.index) {
                socket.port_lease = Some(port);
            }
        }
        let mss: usize = (mtu as usize).saturating_sub(IPV4_TCP_HEADER_OVERHEAD);
        let isn: SeqNumber = self.isn_generator.generate(&local, &remote);

        if let Some(connection) = self.connections.get_mut(&id) {
            connection.set_local(local);
            connection.connect(remote, isn, mss, &mut self.timers)?;
        }
        info!("connect(): connection {} {} -> {}", id, local, remote);

        self.flush();
        self.reap();
        match self.connections.get(&id).and_then(|connection| connection.error()) {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    ///
    /// **Brief**
    ///
    /// Queues `bytes` for transmission on the stream socket referred to by `handle`. Either all bytes are queued or
    /// none is.
    ///
    /// **Return Value**
    ///
    /// Upon successful completion, the number of queued bytes is returned. Upon failure, `Fail` is returned instead.
    ///
    pub fn send(&mut self, handle: SocketHandle, bytes: &[u8]) -> Result<usize, Fail> {
        trace!("send(): handle={} len={}", handle, bytes.len());
        let id: ConnectionId = self.stream_connection(handle, "send")?;
        let result: Result<usize, Fail> = match self.connections.get_mut(&id) {
            Some(connection) => connection.send(bytes, &mut self.timers),
            None => Err(missing_connection("send", id)),
        };
        self.flush();
        self.reap();
        result
    }

    ///
    /// **Brief**
    ///
    /// Removes up to `max_len` bytes from the receive buffer of the stream socket referred to by `handle`.
    ///
    /// **Return Value**
    ///
    /// Upon successful completion, the received bytes are returned. The vector is empty if nothing was buffered.
    /// Upon failure, `Fail` is returned instead.
    ///
    pub fn receive(&mut self, handle: SocketHandle, max_len: usize) -> Result<Vec<u8>, Fail> {
        trace!("receive(): handle={} max_len={}", handle, max_len);
        let id: ConnectionId = self.stream_connection(handle, "receive")?;
        let result: Result<Vec<u8>, Fail> = match self.connections.get_mut(&id) {
            Some(connection) => connection.read(max_len),
            None => Err(missing_connection("receive", id)),
        };
        self.flush();
        self.reap();
        result
    }

    ///
    /// **Brief**
    ///
    /// Closes the socket referred to by `handle`. The handle becomes invalid right away and the socket's buffers are
    /// released. A connection that is still tearing down stays in the connection table until it reaches `CLOSED`.
    ///
    /// **Return Value**
    ///
    /// Upon successful completion, `Ok(())` is returned. Upon failure, `Fail` is returned instead.
    ///
    pub fn close(&mut self, handle: SocketHandle) -> Result<(), Fail> {
        trace!("close(): handle={}", handle);
        self.get_socket(handle)?;
        let socket: Socket = self.sockets.remove(handle.index);

        match socket.kind {
            SocketKind::Datagram => {
                if let Some(port) = socket.port_lease {
                    self.ports.free(port)?;
                }
            },
            SocketKind::Stream(id) => {
                let pending: Option<ConnectionId> = match self.connections.get_mut(&id) {
                    Some(connection) => {
                        let pending: Option<ConnectionId> = connection.take_pending();
                        connection.close(&mut self.timers);
                        pending
                    },
                    None => None,
                };
                if let Some(child) = pending.and_then(|child| self.connections.get_mut(&child)) {
                    debug!("close(): resetting connection {} that was never accepted", child.id());
                    child.reset(&mut self.timers);
                }
                if let Some(port) = socket.port_lease {
                    self.lingering_leases.insert(id, port);
                }
            },
        }
        debug!("close(): socket {} closed", handle);

        self.flush();
        self.reap();
        Ok(())
    }

    //==================================================================================================================
    // Inspection
    //==================================================================================================================

    /// Returns the state of the connection bound to the stream socket referred to by `handle`.
    pub fn state(&self, handle: SocketHandle) -> Result<State, Fail> {
        let id: ConnectionId = self.stream_connection(handle, "state")?;
        match self.connections.get(&id) {
            Some(connection) => Ok(connection.state()),
            None => Err(missing_connection("state", id)),
        }
    }

    pub fn local_address(&self, handle: SocketHandle) -> Result<SocketAddrV4, Fail> {
        let socket: &Socket = self.get_socket(handle)?;
        Ok(self.socket_local(socket))
    }

    pub fn remote_address(&self, handle: SocketHandle) -> Result<SocketAddrV4, Fail> {
        let remote: Option<SocketAddrV4> = match self.get_socket(handle)?.kind {
            SocketKind::Stream(id) => self.connections.get(&id).and_then(|connection| connection.remote()),
            SocketKind::Datagram => None,
        };
        match remote {
            Some(remote) => Ok(remote),
            None => {
                let cause: String = format!("socket is not connected (handle={})", handle);
                error!("remote_address(): {}", cause);
                Err(Fail::new(libc::ENOTCONN, &cause))
            },
        }
    }

    /// Returns the error that reset the connection of the stream socket referred to by `handle`, if any.
    pub fn socket_error(&self, handle: SocketHandle) -> Result<Option<Fail>, Fail> {
        let id: ConnectionId = self.stream_connection(handle, "socket_error")?;
        Ok(self.connections.get(&id).and_then(|connection| connection.error().cloned()))
    }

    /// Checks if the listening socket referred to by `handle` has a synchronized connection waiting to be accepted.
    pub fn has_pending_connection(&self, handle: SocketHandle) -> Result<bool, Fail> {
        let id: ConnectionId = self.stream_connection(handle, "has_pending_connection")?;
        let listener: &Connection = match self.connections.get(&id) {
            Some(listener) if listener.state() == State::Listen => listener,
            Some(listener) => {
                let cause: String = format!("socket is not listening (state={:?})", listener.state());
                error!("has_pending_connection(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            },
            None => return Err(missing_connection("has_pending_connection", id)),
        };
        Ok(listener
            .pending()
            .and_then(|child| self.connections.get(&child))
            .is_some_and(|child| child.state().is_synchronized()))
    }

    /// Number of open sockets.
    pub fn socket_count(&self) -> usize {
        self.sockets.len()
    }

    /// Number of connections, including those that outlived their socket.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Returns the state of the connection between `local` and `remote`, if there is one.
    pub fn connection_state(&self, local: SocketAddrV4, remote: SocketAddrV4) -> Option<State> {
        self.connections
            .values()
            .find(|connection| connection.local() == local && connection.remote() == Some(remote))
            .map(|connection| connection.state())
    }

    pub fn now(&self) -> Instant {
        self.timers.now()
    }

    pub fn config(&self) -> &TcpConfig {
        &self.config
    }

    pub fn interfaces(&self) -> &InterfaceRegistry {
        &self.interfaces
    }

    pub fn interfaces_mut(&mut self) -> &mut InterfaceRegistry {
        &mut self.interfaces
    }

    pub fn add_interface(&mut self, interface: NetworkInterface) -> Result<(), Fail> {
        self.interfaces.add_interface(interface)
    }

    pub fn link(&self) -> &P {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut P {
        &mut self.link
    }

    //==================================================================================================================
    // Inbound Segments and Time
    //==================================================================================================================

    /// Handles a TCP segment that the link layer received from `src` and addressed to `dst`.
    pub fn receive_segment(&mut self, src: Ipv4Addr, dst: Ipv4Addr, bytes: &[u8]) -> Result<(), Fail> {
        let result: Result<(), Fail> = self.deliver(src, dst, bytes);
        self.flush();
        self.reap();
        result
    }

    /// Moves the clock to `now` and fires the retransmission and TIME_WAIT timeouts that expired.
    pub fn advance_clock(&mut self, now: Instant) {
        let now: Instant = now.max(self.timers.now());
        for event in self.timers.advance_clock(now) {
            match self.connections.get_mut(&event.connection) {
                Some(connection) => connection.on_timer(event.kind, &mut self.timers),
                None => debug!("advance_clock(): connection {} is gone ({:?})", event.connection, event.kind),
            }
        }
        self.flush();
        self.reap();
    }

    /// Demultiplexes an inbound segment to its connection, spawns a connection for a SYN on a listener, or answers
    /// with a RST.
    fn deliver(&mut self, src: Ipv4Addr, dst: Ipv4Addr, bytes: &[u8]) -> Result<(), Fail> {
        if !self.interfaces.is_local(dst) {
            debug!("deliver(): dropping segment for {}, not a local address", dst);
            return Ok(());
        }
        let pseudo_header: PseudoHeader = self.interfaces.pseudo_header(src, dst, bytes.len())?;
        let (header, payload): (TcpHeader, &[u8]) =
            match TcpHeader::parse(bytes, &pseudo_header, self.config.get_rx_checksum_offload()) {
                Ok(result) => result,
                Err(e) => {
                    warn!("deliver(): dropping malformed segment from {} ({:?})", src, e);
                    return Err(e);
                },
            };
        let local: SocketAddrV4 = SocketAddrV4::new(dst, header.dst_port);
        let remote: SocketAddrV4 = SocketAddrV4::new(src, header.src_port);
        trace!("deliver(): {} -> {} {} bytes", remote, local, payload.len());

        let established: Option<ConnectionId> = self
            .connections
            .values()
            .find(|connection| {
                connection.state() != State::Closed
                    && connection.local() == local
                    && connection.remote() == Some(remote)
            })
            .map(|connection| connection.id());
        if let Some(id) = established {
            if let Some(connection) = self.connections.get_mut(&id) {
                connection.receive(&header, payload, &mut self.timers);
            }
            return Ok(());
        }

        if header.syn && !header.ack && !header.rst {
            if let Some(listener_id) = self.find_listener(local) {
                return self.spawn_connection(listener_id, local, remote, &header);
            }
        }

        if !header.rst {
            debug!("deliver(): no connection for {} -> {}, sending RST", remote, local);
            self.send_reset(local, remote, &header, payload.len());
        }
        Ok(())
    }

    /// Finds the listener for `local`. Listeners bound to the exact address win over wildcard listeners.
    fn find_listener(&self, local: SocketAddrV4) -> Option<ConnectionId> {
        let mut wildcard: Option<ConnectionId> = None;
        for connection in self.connections.values() {
            if connection.state() != State::Listen || connection.local().port() != local.port() {
                continue;
            }
            if connection.local().ip() == local.ip() {
                return Some(connection.id());
            }
            if connection.local().ip().is_unspecified() {
                wildcard = Some(connection.id());
            }
        }
        wildcard
    }

    /// Creates the connection that answers a SYN on a listener.
    fn spawn_connection(
        &mut self,
        listener_id: ConnectionId,
        local: SocketAddrV4,
        remote: SocketAddrV4,
        header: &TcpHeader,
    ) -> Result<(), Fail> {
        if let Some(pending) = self.connections.get(&listener_id).and_then(|listener| listener.pending()) {
            debug!(
                "spawn_connection(): dropping SYN from {}, connection {} is waiting to be accepted",
                remote, pending
            );
            return Ok(());
        }
        let mss: usize = match self.interfaces.route(*remote.ip()) {
            Some(interface) => (interface.mtu() as usize).saturating_sub(IPV4_TCP_HEADER_OVERHEAD),
            None => {
                warn!("spawn_connection(): dropping SYN, no route to {}", remote.ip());
                return Ok(());
            },
        };
        let isn: SeqNumber = self.isn_generator.generate(&local, &remote);

        let id: ConnectionId = self.new_connection()?;
        if let Some(child) = self.connections.get_mut(&id) {
            child.set_local(local);
            child.listen()?;
            child.accept_syn(remote, header, isn, mss, &mut self.timers);
        }
        if let Some(listener) = self.connections.get_mut(&listener_id) {
            listener.set_pending(Some(id));
        }
        info!("spawn_connection(): connection {} {} <- {}", id, local, remote);
        Ok(())
    }

    /// Answers a segment that does not belong to any connection (RFC 793, Section 3.4).
    fn send_reset(&mut self, local: SocketAddrV4, remote: SocketAddrV4, header: &TcpHeader, payload_len: usize) {
        let mut reply: TcpHeader = TcpHeader::new(local.port(), remote.port());
        reply.rst = true;
        if header.ack {
            reply.seq_num = header.ack_num;
        } else {
            reply.ack = true;
            reply.ack_num = header
                .seq_num
                .advance(payload_len + header.syn as usize + header.fin as usize);
        }
        match serialize(&self.interfaces, *local.ip(), *remote.ip(), &reply, &[], &self.config) {
            Ok(bytes) => self.outgoing.push_back(OutboundSegment {
                src: *local.ip(),
                dst: *remote.ip(),
                bytes,
            }),
            Err(e) => warn!("send_reset(): failed to build RST ({:?})", e),
        }
    }

    //==================================================================================================================
    // Outbound Segments
    //==================================================================================================================

    /// Delivers every queued segment. Segments for local addresses go back into the stack, so this runs until the
    /// connections stop producing segments.
    fn flush(&mut self) {
        loop {
            self.collect_outgoing();
            let segment: OutboundSegment = match self.outgoing.pop_front() {
                Some(segment) => segment,
                None => break,
            };

            if self.interfaces.is_local(segment.dst) {
                if let Err(e) = self.deliver(segment.src, segment.dst, &segment.bytes) {
                    warn!("flush(): failed to deliver local segment ({:?})", e);
                }
                continue;
            }
            match self.interfaces.route(segment.dst) {
                Some(interface) => {
                    if let Err(e) = self.link.transmit(interface, segment.dst, &segment.bytes) {
                        warn!("flush(): failed to transmit segment on {} ({:?})", interface.name(), e);
                    }
                },
                None => warn!("flush(): dropping segment, no route to {}", segment.dst),
            }
        }
    }

    /// Serializes the segments that connections produced.
    fn collect_outgoing(&mut self) {
        for connection in self.connections.values_mut() {
            while let Some((header, payload)) = connection.pop_outgoing() {
                let remote: SocketAddrV4 = match connection.remote() {
                    Some(remote) => remote,
                    None => continue,
                };
                let src: Ipv4Addr = *connection.local().ip();
                match serialize(&self.interfaces, src, *remote.ip(), &header, &payload, &self.config) {
                    Ok(bytes) => self.outgoing.push_back(OutboundSegment {
                        src,
                        dst: *remote.ip(),
                        bytes,
                    }),
                    Err(e) => warn!("collect_outgoing(): dropping segment of connection {} ({:?})", connection.id(), e),
                }
            }
        }
    }

    /// Removes closed connections that no socket or listener refers to and returns their ports.
    fn reap(&mut self) {
        let closed: HashSet<ConnectionId> = self
            .connections
            .values()
            .filter(|connection| connection.state() == State::Closed)
            .map(|connection| connection.id())
            .collect();
        if closed.is_empty() {
            return;
        }
        for connection in self.connections.values_mut() {
            if connection.pending().is_some_and(|child| closed.contains(&child)) {
                connection.set_pending(None);
            }
        }

        let mut referenced: HashSet<ConnectionId> = self
            .sockets
            .iter()
            .filter_map(|(_, socket)| match socket.kind {
                SocketKind::Stream(id) => Some(id),
                SocketKind::Datagram => None,
            })
            .collect();
        referenced.extend(self.connections.values().filter_map(|connection| connection.pending()));

        for id in closed.difference(&referenced) {
            self.connections.remove(id);
            if let Some(port) = self.lingering_leases.remove(id) {
                if let Err(e) = self.ports.free(port) {
                    warn!("reap(): failed to release port {} ({:?})", port, e);
                }
            }
            debug!("reap(): removed connection {}", id);
        }
    }

    //==================================================================================================================
    // Helpers
    //==================================================================================================================

    fn new_connection(&mut self) -> Result<ConnectionId, Fail> {
        let id: ConnectionId = ConnectionId(self.next_connection_id);
        let connection: Connection = Connection::new(id, &self.config)?;
        self.next_connection_id += 1;
        self.connections.insert(id, connection);
        Ok(id)
    }

    fn ensure_socket_slot(&self, caller: &str) -> Result<(), Fail> {
        if self.sockets.len() >= self.config.get_max_sockets() {
            let cause: String = format!("socket table is full (max_sockets={})", self.config.get_max_sockets());
            error!("{}(): {}", caller, cause);
            return Err(Fail::new(libc::EMFILE, &cause));
        }
        Ok(())
    }

    fn insert_socket(&mut self, kind: SocketKind) -> SocketHandle {
        let generation: u64 = self.next_generation;
        self.next_generation += 1;
        let index: usize = self.sockets.insert(Socket {
            generation,
            kind,
            local: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0),
            port_lease: None,
        });
        SocketHandle { index, generation }
    }

    fn get_socket(&self, handle: SocketHandle) -> Result<&Socket, Fail> {
        match self.sockets.get(handle.index) {
            Some(socket) if socket.generation == handle.generation => Ok(socket),
            _ => {
                let cause: String = format!("invalid socket handle (handle={})", handle);
                error!("get_socket(): {}", cause);
                Err(Fail::new(libc::EBADF, &cause))
            },
        }
    }

    /// Returns the connection of a stream socket.
    fn stream_connection(&self, handle: SocketHandle, caller: &str) -> Result<ConnectionId, Fail> {
        match self.get_socket(handle)?.kind {
            SocketKind::Stream(id) => Ok(id),
            SocketKind::Datagram => {
                let cause: String = format!("operation not supported on datagram socket (handle={})", handle);
                error!("{}(): {}", caller, cause);
                Err(Fail::new(libc::EOPNOTSUPP, &cause))
            },
        }
    }

    fn socket_local(&self, socket: &Socket) -> SocketAddrV4 {
        match socket.kind {
            SocketKind::Stream(id) => self
                .connections
                .get(&id)
                .map_or(socket.local, |connection| connection.local()),
            SocketKind::Datagram => socket.local,
        }
    }

    /// Checks if an unconnected socket of the same kind holds `local`.
    /// Checks whether a live connection already owns the pair (`local`, `remote`).
    fn is_connection_in_use(&self, local: SocketAddrV4, remote: SocketAddrV4) -> bool {
        self.connections.values().any(|connection| {
            connection.state() != State::Closed && connection.local() == local && connection.remote() == Some(remote)
        })
    }

    fn is_endpoint_in_use(&self, kind: SocketKind, local: SocketAddrV4) -> bool {
        let is_stream: bool = matches!(kind, SocketKind::Stream(_));
        self.sockets.iter().any(|(_, socket)| {
            let bound: SocketAddrV4 = match socket.kind {
                SocketKind::Stream(id) if is_stream => match self.connections.get(&id) {
                    Some(connection) if connection.remote().is_none() => connection.local(),
                    _ => return false,
                },
                SocketKind::Datagram if !is_stream => socket.local,
                _ => return false,
            };
            bound.port() == local.port()
                && (bound.ip() == local.ip() || bound.ip().is_unspecified() || local.ip().is_unspecified())
        })
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

fn serialize(
    interfaces: &InterfaceRegistry,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    header: &TcpHeader,
    payload: &[u8],
    config: &TcpConfig,
) -> Result<Vec<u8>, Fail> {
    let length: usize = header.compute_size() + payload.len();
    let pseudo_header: PseudoHeader = interfaces.pseudo_header(src, dst, length)?;
    Ok(header.serialize(&pseudo_header, payload, config.get_tx_checksum_offload()))
}

fn missing_connection(caller: &str, id: ConnectionId) -> Fail {
    let cause: String = format!("connection {} is missing", id);
    error!("{}(): {}", caller, cause);
    Fail::new(libc::EBADF, &cause)
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl fmt::Display for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.index, self.generation)
    }
}
