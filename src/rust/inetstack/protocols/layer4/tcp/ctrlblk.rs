// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    collections::ring::RingBuffer,
    inetstack::protocols::layer4::tcp::{
        header::{
            TcpHeader,
            TcpOptions,
        },
        rto::RtoCalculator,
        SeqNumber,
        State,
    },
    runtime::{
        fail::Fail,
        network::{
            config::TcpConfig,
            consts::{
                FALLBACK_MSS,
                MAX_WINDOW_SIZE,
            },
        },
        timer::{
            Timer,
            TimerId,
        },
    },
};
use ::std::{
    collections::VecDeque,
    fmt,
    net::{
        Ipv4Addr,
        SocketAddrV4,
    },
    time::{
        Duration,
        Instant,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Key of a connection in the connection table. Identifiers are never reused.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ConnectionId(pub u64);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TimerKind {
    Retransmit,
    TimeWait,
}

/// Timeout owned by a connection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TimerEvent {
    pub connection: ConnectionId,
    pub kind: TimerKind,
}

/// Control block of a TCP connection. The connection never touches the wire: segments it produces are queued and
/// collected by the owner through [Connection::pop_outgoing].
pub struct Connection {
    id: ConnectionId,
    local: SocketAddrV4,
    remote: Option<SocketAddrV4>,
    state: State,

    // Send sequence space (RFC 793, Section 3.2).
    isn: SeqNumber,
    send_unacked: SeqNumber,
    send_next: SeqNumber,
    // Sequence number of the first byte in the send buffer.
    send_buffer_seq: SeqNumber,
    peer_window: u32,
    fin_sent: bool,

    // Receive sequence space.
    receive_next: SeqNumber,

    // MSS that we advertise and MSS of the segments that we send.
    local_mss: usize,
    mss: usize,

    // Both buffers are released when the application closes the connection.
    send_buffer: Option<RingBuffer>,
    receive_buffer: Option<RingBuffer>,

    rto_calculator: RtoCalculator,
    // End sequence number and send time of the segment being timed.
    rtt_sample: Option<(SeqNumber, Instant)>,
    retransmit_timer: Option<TimerId>,
    time_wait_timer: Option<TimerId>,
    retries: usize,
    max_retries: usize,
    time_wait_timeout: Duration,

    // Reported by every subsequent call once the connection was reset.
    error: Option<Fail>,
    ever_established: bool,
    // Connection spawned by a SYN on this listener that was not accepted yet.
    pending: Option<ConnectionId>,

    outgoing: VecDeque<(TcpHeader, Vec<u8>)>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl Connection {
    /// Creates a connection in the `CLOSED` state, with send and receive buffers sized to the configured window.
    pub fn new(id: ConnectionId, config: &TcpConfig) -> Result<Self, Fail> {
        let send_buffer: RingBuffer = RingBuffer::new(config.get_window_size())?;
        let receive_buffer: RingBuffer = RingBuffer::new(config.get_window_size())?;
        Ok(Self {
            id,
            local: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0),
            remote: None,
            state: State::Closed,
            isn: SeqNumber::from(0),
            send_unacked: SeqNumber::from(0),
            send_next: SeqNumber::from(0),
            send_buffer_seq: SeqNumber::from(0),
            peer_window: 0,
            fin_sent: false,
            receive_next: SeqNumber::from(0),
            local_mss: config.get_advertised_mss(),
            mss: FALLBACK_MSS,
            send_buffer: Some(send_buffer),
            receive_buffer: Some(receive_buffer),
            rto_calculator: RtoCalculator::new(config.get_handshake_timeout()),
            rtt_sample: None,
            retransmit_timer: None,
            time_wait_timer: None,
            retries: 0,
            max_retries: config.get_retries(),
            time_wait_timeout: config.get_time_wait_timeout(),
            error: None,
            ever_established: false,
            pending: None,
            outgoing: VecDeque::new(),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn local(&self) -> SocketAddrV4 {
        self.local
    }

    pub fn set_local(&mut self, local: SocketAddrV4) {
        self.local = local;
    }

    pub fn remote(&self) -> Option<SocketAddrV4> {
        self.remote
    }

    pub fn error(&self) -> Option<&Fail> {
        self.error.as_ref()
    }

    pub fn send_next(&self) -> SeqNumber {
        self.send_next
    }

    pub fn send_unacked(&self) -> SeqNumber {
        self.send_unacked
    }

    pub fn receive_next(&self) -> SeqNumber {
        self.receive_next
    }

    pub fn mss(&self) -> usize {
        self.mss
    }

    pub fn has_buffers(&self) -> bool {
        self.send_buffer.is_some() || self.receive_buffer.is_some()
    }

    pub fn pending(&self) -> Option<ConnectionId> {
        self.pending
    }

    pub fn set_pending(&mut self, pending: Option<ConnectionId>) {
        self.pending = pending;
    }

    pub fn take_pending(&mut self) -> Option<ConnectionId> {
        self.pending.take()
    }

    /// Removes the oldest segment that this connection wants to transmit.
    pub fn pop_outgoing(&mut self) -> Option<(TcpHeader, Vec<u8>)> {
        self.outgoing.pop_front()
    }

    /// Free space of the receive buffer, as advertised to the peer.
    pub fn receive_window(&self) -> u32 {
        match self.receive_buffer.as_ref() {
            Some(buffer) => (buffer.available() as u32).min(MAX_WINDOW_SIZE),
            // Data arriving after the application closed the connection is discarded.
            None => MAX_WINDOW_SIZE,
        }
    }

    //==================================================================================================================
    // Application Calls
    //==================================================================================================================

    /// Passive open: `CLOSED -> LISTEN`.
    pub fn listen(&mut self) -> Result<(), Fail> {
        if self.state != State::Closed {
            let cause: String = format!("cannot listen on connection in {:?} state", self.state);
            error!("listen(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        self.set_state(State::Listen);
        Ok(())
    }

    /// Marks a connection that never went through a handshake as established. Such a connection has no remote endpoint
    /// and never transmits.
    pub fn open_established(&mut self) {
        self.ever_established = true;
        self.set_state(State::Established);
    }

    /// Active open: emits a SYN and moves `CLOSED -> SYN_SENT`. `mss` is the largest segment the outbound interface
    /// can carry.
    pub fn connect(
        &mut self,
        remote: SocketAddrV4,
        isn: SeqNumber,
        mss: usize,
        timers: &mut Timer<TimerEvent>,
    ) -> Result<(), Fail> {
        if self.state != State::Closed || self.error.is_some() {
            let cause: String = format!("cannot connect connection in {:?} state", self.state);
            error!("connect(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        self.remote = Some(remote);
        self.initialize_send_sequence(isn);
        self.local_mss = self.local_mss.min(mss);
        self.set_state(State::SynSent);
        self.send_syn();
        self.rtt_sample = Some((self.send_next, timers.now()));
        self.arm_retransmit_timer(timers);
        Ok(())
    }

    /// Queues `bytes` for transmission. Either all bytes fit in the send buffer or nothing is queued.
    pub fn send(&mut self, bytes: &[u8], timers: &mut Timer<TimerEvent>) -> Result<usize, Fail> {
        if let Some(e) = self.error.as_ref() {
            return Err(e.clone());
        }
        if !self.state.can_send_data() {
            let cause: String = format!("connection is not established (state={:?})", self.state);
            error!("send(): {}", cause);
            return Err(Fail::new(libc::ENOTCONN, &cause));
        }
        match self.send_buffer.as_mut() {
            Some(buffer) => buffer.write(bytes)?,
            None => {
                let cause: &str = "send buffer was released";
                error!("send(): {}", cause);
                return Err(Fail::new(libc::ENOTCONN, cause));
            },
        };
        self.transmit_pending(timers);
        Ok(bytes.len())
    }

    /// Removes up to `max_len` bytes from the receive buffer. Returns an empty vector if nothing is buffered.
    pub fn read(&mut self, max_len: usize) -> Result<Vec<u8>, Fail> {
        if let Some(e) = self.error.as_ref() {
            return Err(e.clone());
        }
        if !self.ever_established {
            let cause: String = format!("connection is not established (state={:?})", self.state);
            error!("read(): {}", cause);
            return Err(Fail::new(libc::ENOTCONN, &cause));
        }
        let window_was_closed: bool = self.receive_window() == 0;
        let bytes: Vec<u8> = match self.receive_buffer.as_mut() {
            Some(buffer) => buffer.read(max_len),
            None => {
                let cause: &str = "receive buffer was released";
                error!("read(): {}", cause);
                return Err(Fail::new(libc::ENOTCONN, cause));
            },
        };
        // Let the peer know that it may send again.
        if window_was_closed && !bytes.is_empty() && self.remote.is_some() && self.state.is_synchronized() {
            trace!("read(): sending window update");
            self.send_ack();
        }
        Ok(bytes)
    }

    /// Closes the application side of the connection and releases both buffers. The connection keeps running the
    /// teardown until it reaches `CLOSED`.
    pub fn close(&mut self, timers: &mut Timer<TimerEvent>) {
        match self.state {
            State::Established | State::SynReceived if self.remote.is_some() => {
                self.send_fin(timers);
                self.set_state(State::FinWait1);
            },
            State::CloseWait => {
                self.send_fin(timers);
                self.set_state(State::LastAck);
            },
            State::Closed | State::Listen | State::SynSent | State::Established | State::SynReceived => {
                self.cancel_timers(timers);
                self.set_state(State::Closed);
            },
            state => debug!("close(): connection {} is already closing (state={:?})", self.id, state),
        }

        if let Some(buffer) = self.send_buffer.take() {
            let unsent: usize = buffer.len().saturating_sub(self.data_in_flight());
            if unsent > 0 {
                warn!("close(): discarding {} bytes that were never sent", unsent);
            }
        }
        self.receive_buffer = None;
    }

    /// Aborts the connection, telling the peer with a RST.
    pub fn reset(&mut self, timers: &mut Timer<TimerEvent>) {
        if self.remote.is_some() && !matches!(self.state, State::Closed | State::Listen) {
            let mut header: TcpHeader = self.tcp_header();
            header.seq_num = self.send_next;
            header.rst = true;
            self.emit(header, Vec::new());
        }
        self.abort(libc::ECONNRESET, "connection reset locally", timers);
    }

    //==================================================================================================================
    // Inbound Segments
    //==================================================================================================================

    /// Handles a SYN that arrived on a listening connection: records the remote endpoint, emits a SYN+ACK and moves
    /// `LISTEN -> SYN_RECEIVED`.
    pub fn accept_syn(
        &mut self,
        remote: SocketAddrV4,
        header: &TcpHeader,
        isn: SeqNumber,
        mss: usize,
        timers: &mut Timer<TimerEvent>,
    ) {
        if self.state != State::Listen || !header.syn || header.ack || header.rst {
            debug!(
                "accept_syn(): ignoring segment (state={:?}, syn={}, ack={}, rst={})",
                self.state, header.syn, header.ack, header.rst
            );
            return;
        }
        self.remote = Some(remote);
        self.receive_next = header.seq_num + SeqNumber::from(1);
        self.peer_window = header.window_size as u32;
        self.initialize_send_sequence(isn);
        self.local_mss = self.local_mss.min(mss);
        self.set_peer_mss(header.mss());
        self.set_state(State::SynReceived);
        self.send_syn();
        self.rtt_sample = Some((self.send_next, timers.now()));
        self.arm_retransmit_timer(timers);
    }

    /// Runs an inbound segment through the state machine.
    pub fn receive(&mut self, header: &TcpHeader, payload: &[u8], timers: &mut Timer<TimerEvent>) {
        debug!(
            "receive(): connection {} ({:?}) receiving {} bytes + {:?}",
            self.id,
            self.state,
            payload.len(),
            header
        );
        match self.state {
            State::Closed | State::Listen => {
                debug!("receive(): ignoring segment on connection in {:?} state", self.state)
            },
            State::SynSent => self.receive_in_syn_sent(header, timers),
            State::SynReceived => self.receive_in_syn_received(header, payload, timers),
            _ => self.receive_in_synchronized(header, payload, timers),
        }
    }

    fn receive_in_syn_sent(&mut self, header: &TcpHeader, timers: &mut Timer<TimerEvent>) {
        let ack_acceptable: bool = header.ack && self.isn < header.ack_num && header.ack_num <= self.send_next;
        if header.ack && !ack_acceptable {
            debug!("receive_in_syn_sent(): ignoring unacceptable ACK ({})", header.ack_num);
            return;
        }
        if header.rst {
            if ack_acceptable {
                self.abort(libc::ECONNREFUSED, "connection refused by remote", timers);
            }
            return;
        }
        if !header.syn {
            debug!("receive_in_syn_sent(): ignoring segment without SYN");
            return;
        }
        if !ack_acceptable {
            debug!("receive_in_syn_sent(): ignoring SYN without ACK, simultaneous open is not supported");
            return;
        }

        self.receive_next = header.seq_num + SeqNumber::from(1);
        self.peer_window = header.window_size as u32;
        self.set_peer_mss(header.mss());
        self.process_new_ack(header.ack_num, timers);
        self.ever_established = true;
        self.set_state(State::Established);
        self.send_ack();
    }

    fn receive_in_syn_received(&mut self, header: &TcpHeader, payload: &[u8], timers: &mut Timer<TimerEvent>) {
        if header.rst {
            self.abort(libc::ECONNRESET, "connection reset by remote during handshake", timers);
            return;
        }
        if header.syn && !header.ack {
            // The peer did not get our SYN+ACK.
            if header.seq_num + SeqNumber::from(1) == self.receive_next {
                self.send_syn();
            }
            return;
        }
        if !header.ack || header.ack_num != self.send_next {
            debug!("receive_in_syn_received(): ignoring segment that does not ACK our SYN");
            return;
        }

        self.peer_window = header.window_size as u32;
        self.process_new_ack(header.ack_num, timers);
        self.ever_established = true;
        self.set_state(State::Established);

        if !payload.is_empty() || header.fin {
            self.receive_in_synchronized(header, payload, timers);
        }
    }

    fn receive_in_synchronized(&mut self, header: &TcpHeader, payload: &[u8], timers: &mut Timer<TimerEvent>) {
        if header.rst {
            if self.state == State::TimeWait {
                self.cancel_timers(timers);
                self.set_state(State::Closed);
            } else {
                self.abort(libc::ECONNRESET, "connection reset by remote", timers);
            }
            return;
        }
        if header.syn {
            debug!("receive_in_synchronized(): ignoring SYN on synchronized connection");
            self.send_ack();
            return;
        }
        if !header.ack {
            debug!("receive_in_synchronized(): dropping segment without ACK");
            return;
        }

        if header.ack_num > self.send_next {
            warn!("receive_in_synchronized(): segment acknowledges data we have yet to send");
            self.send_ack();
            return;
        }
        if header.ack_num > self.send_unacked {
            self.process_new_ack(header.ack_num, timers);
            if self.state == State::Closed {
                return;
            }
        }
        self.peer_window = header.window_size as u32;

        let segment_len: usize = payload.len() + header.fin as usize;
        if segment_len > 0 {
            let segment_end: SeqNumber = header.seq_num.advance(segment_len);
            if segment_end <= self.receive_next {
                debug!("receive_in_synchronized(): duplicate segment");
                if self.state == State::TimeWait {
                    // The peer did not get the ACK of its FIN.
                    self.enter_time_wait(timers);
                }
            } else if header.seq_num > self.receive_next {
                debug!(
                    "receive_in_synchronized(): dropping out-of-order segment (seq={}, expected={})",
                    header.seq_num, self.receive_next
                );
            } else {
                let duplicate: usize = self.receive_next.distance_from(header.seq_num) as usize;
                let fin: bool = self.accept_data(&payload[duplicate.min(payload.len())..], header.fin);
                if fin {
                    self.receive_next = self.receive_next + SeqNumber::from(1);
                    self.on_fin_received(timers);
                }
            }
            self.send_ack();
        }

        self.transmit_pending(timers);
    }

    /// Appends in-order data to the receive buffer. Returns whether the FIN that follows the data is acceptable.
    fn accept_data(&mut self, data: &[u8], fin: bool) -> bool {
        if data.is_empty() {
            return fin;
        }
        if !self.state.can_receive_data() {
            debug!("accept_data(): ignoring data received after FIN (state={:?})", self.state);
            return false;
        }
        let buffer: &mut RingBuffer = match self.receive_buffer.as_mut() {
            Some(buffer) => buffer,
            None => {
                debug!("accept_data(): discarding {} bytes received after close", data.len());
                self.receive_next = self.receive_next.advance(data.len());
                return fin;
            },
        };

        let accepted: usize = data.len().min(buffer.available());
        if let Err(e) = buffer.write(&data[..accepted]) {
            warn!("accept_data(): failed to buffer data ({:?})", e);
            return false;
        }
        self.receive_next = self.receive_next.advance(accepted);
        if accepted < data.len() {
            debug!("accept_data(): trimmed {} bytes beyond the receive window", data.len() - accepted);
            return false;
        }
        fin
    }

    fn on_fin_received(&mut self, timers: &mut Timer<TimerEvent>) {
        match self.state {
            State::Established => self.set_state(State::CloseWait),
            // Our FIN is not acknowledged yet, otherwise we would be in FIN_WAIT_2.
            State::FinWait1 => self.set_state(State::Closing),
            State::FinWait2 => self.enter_time_wait(timers),
            state => debug!("on_fin_received(): ignoring FIN (state={:?})", state),
        }
    }

    /// Processes an ACK in (SND.UNA, SND.NXT].
    fn process_new_ack(&mut self, ack_num: SeqNumber, timers: &mut Timer<TimerEvent>) {
        if let Some((sample_end, sent_at)) = self.rtt_sample {
            if ack_num >= sample_end {
                self.rto_calculator.add_sample(timers.now() - sent_at);
                self.rtt_sample = None;
            }
        }

        if let Some(buffer) = self.send_buffer.as_mut() {
            if ack_num > self.send_buffer_seq {
                let discarded: usize = buffer.discard(ack_num.distance_from(self.send_buffer_seq) as usize);
                self.send_buffer_seq = self.send_buffer_seq.advance(discarded);
            }
        }
        self.send_unacked = ack_num;
        self.retries = 0;

        if self.send_unacked == self.send_next {
            self.cancel_retransmit_timer(timers);
        } else {
            self.arm_retransmit_timer(timers);
        }

        if self.fin_sent && self.send_unacked == self.send_next {
            match self.state {
                State::FinWait1 => self.set_state(State::FinWait2),
                State::Closing => self.enter_time_wait(timers),
                State::LastAck => {
                    self.cancel_timers(timers);
                    self.set_state(State::Closed);
                },
                _ => (),
            }
        }
    }

    //==================================================================================================================
    // Timeouts
    //==================================================================================================================

    pub fn on_timer(&mut self, kind: TimerKind, timers: &mut Timer<TimerEvent>) {
        match kind {
            TimerKind::Retransmit => {
                self.retransmit_timer = None;
                self.on_retransmit_timeout(timers);
            },
            TimerKind::TimeWait => {
                self.time_wait_timer = None;
                if self.state == State::TimeWait {
                    self.set_state(State::Closed);
                }
            },
        }
    }

    fn on_retransmit_timeout(&mut self, timers: &mut Timer<TimerEvent>) {
        if self.state == State::Closed {
            return;
        }
        if self.send_unacked == self.send_next {
            // Nothing is in flight. Probe a closed peer window with one byte of unsent data.
            if self.state.can_send_data() && self.unsent_len() > 0 {
                self.send_window_probe(timers);
            }
            return;
        }

        // Probes of a closed window do not count against the retry limit.
        let probing: bool = self.state.is_synchronized() && self.peer_window == 0;
        if !probing {
            if self.retries >= self.max_retries {
                let (errno, cause): (libc::c_int, &str) = match self.state {
                    State::SynSent | State::SynReceived => (libc::ETIMEDOUT, "connection handshake timed out"),
                    _ => (libc::ECONNRESET, "retransmission limit reached"),
                };
                warn!("on_retransmit_timeout(): connection {} {}", self.id, cause);
                if self.state != State::SynSent {
                    let mut header: TcpHeader = self.tcp_header();
                    header.seq_num = self.send_next;
                    header.rst = true;
                    self.emit(header, Vec::new());
                }
                self.abort(errno, cause, timers);
                return;
            }
            self.retries += 1;
        }
        self.rto_calculator.back_off();
        // Karn's algorithm: retransmitted segments are never timed.
        self.rtt_sample = None;

        match self.state {
            State::SynSent | State::SynReceived => self.send_syn(),
            _ => self.retransmit_oldest(),
        }
        self.arm_retransmit_timer(timers);
    }

    /// Retransmits the oldest unacknowledged segment of a synchronized connection.
    fn retransmit_oldest(&mut self) {
        let data_in_flight: usize = self.data_in_flight();
        let payload: Vec<u8> = match self.send_buffer.as_ref() {
            Some(buffer) if data_in_flight > 0 => buffer.peek(0, data_in_flight.min(self.mss)),
            _ => Vec::new(),
        };

        let mut header: TcpHeader = self.tcp_header();
        if !payload.is_empty() {
            debug!("retransmit_oldest(): retransmitting {} bytes at {}", payload.len(), self.send_buffer_seq);
            header.seq_num = self.send_buffer_seq;
            header.psh = true;
            self.emit(header, payload);
        } else if self.fin_sent {
            debug!("retransmit_oldest(): retransmitting FIN");
            header.seq_num = self.send_next - SeqNumber::from(1);
            header.fin = true;
            self.emit(header, Vec::new());
        } else {
            debug!("retransmit_oldest(): nothing to retransmit");
        }
    }

    //==================================================================================================================
    // Outbound Segments
    //==================================================================================================================

    /// Sends as much unsent data as the peer window allows.
    fn transmit_pending(&mut self, timers: &mut Timer<TimerEvent>) {
        if self.remote.is_none() || !self.state.can_send_data() || self.fin_sent {
            return;
        }
        loop {
            let unsent: usize = self.unsent_len();
            if unsent == 0 {
                break;
            }
            let in_flight: usize = self.send_next.distance_from(self.send_unacked) as usize;
            let window: usize = (self.peer_window as usize).saturating_sub(in_flight);
            let len: usize = unsent.min(self.mss).min(window);
            if len == 0 {
                // Wait for the peer to open its window. The retransmission timer doubles as a persist timer.
                if self.retransmit_timer.is_none() {
                    self.arm_retransmit_timer(timers);
                }
                break;
            }
            self.send_segment(len, timers);
        }
    }

    fn send_window_probe(&mut self, timers: &mut Timer<TimerEvent>) {
        debug!("send_window_probe(): probing zero window of connection {}", self.id);
        self.rto_calculator.back_off();
        self.send_segment(1, timers);
    }

    /// Sends the next `len` unsent bytes of the send buffer.
    fn send_segment(&mut self, len: usize, timers: &mut Timer<TimerEvent>) {
        let offset: usize = self.data_in_flight();
        let payload: Vec<u8> = match self.send_buffer.as_ref() {
            Some(buffer) => buffer.peek(offset, len),
            None => return,
        };
        let mut header: TcpHeader = self.tcp_header();
        header.seq_num = self.send_next;
        header.psh = true;
        self.send_next = self.send_next.advance(payload.len());
        self.emit(header, payload);

        if self.rtt_sample.is_none() {
            self.rtt_sample = Some((self.send_next, timers.now()));
        }
        if self.retransmit_timer.is_none() {
            self.arm_retransmit_timer(timers);
        }
    }

    fn send_syn(&mut self) {
        let mut header: TcpHeader = self.tcp_header();
        header.seq_num = self.isn;
        header.syn = true;
        if self.state == State::SynSent {
            header.ack = false;
            header.ack_num = SeqNumber::from(0);
        }
        header.push_option(TcpOptions::MaximumSegmentSize(self.local_mss.min(u16::MAX as usize) as u16));
        self.emit(header, Vec::new());
    }

    fn send_fin(&mut self, timers: &mut Timer<TimerEvent>) {
        let mut header: TcpHeader = self.tcp_header();
        header.seq_num = self.send_next;
        header.fin = true;
        self.emit(header, Vec::new());
        self.send_next = self.send_next + SeqNumber::from(1);
        self.fin_sent = true;
        if self.retransmit_timer.is_none() {
            self.arm_retransmit_timer(timers);
        }
    }

    fn send_ack(&mut self) {
        let mut header: TcpHeader = self.tcp_header();
        header.seq_num = self.send_next;
        self.emit(header, Vec::new());
    }

    /// Builds a header that reflects the current receive state.
    fn tcp_header(&self) -> TcpHeader {
        let remote_port: u16 = self.remote.map_or(0, |remote| remote.port());
        let mut header: TcpHeader = TcpHeader::new(self.local.port(), remote_port);
        header.window_size = self.receive_window() as u16;
        header.ack = true;
        header.ack_num = self.receive_next;
        header
    }

    fn emit(&mut self, header: TcpHeader, payload: Vec<u8>) {
        if self.remote.is_none() {
            debug!("emit(): connection {} has no remote endpoint, dropping {:?}", self.id, header);
            return;
        }
        trace!("emit(): sending {} bytes + {:?}", payload.len(), header);
        self.outgoing.push_back((header, payload));
    }

    //==================================================================================================================
    // Helpers
    //==================================================================================================================

    fn initialize_send_sequence(&mut self, isn: SeqNumber) {
        self.isn = isn;
        self.send_unacked = isn;
        self.send_next = isn + SeqNumber::from(1);
        self.send_buffer_seq = self.send_next;
    }

    fn set_peer_mss(&mut self, peer_mss: Option<u16>) {
        let peer_mss: usize = peer_mss.map_or(FALLBACK_MSS, |mss| mss as usize);
        self.mss = self.local_mss.min(peer_mss).max(1);
    }

    /// Number of buffered bytes that were sent but not acknowledged yet.
    fn data_in_flight(&self) -> usize {
        let data_end: SeqNumber = if self.fin_sent {
            self.send_next - SeqNumber::from(1)
        } else {
            self.send_next
        };
        if data_end > self.send_buffer_seq {
            data_end.distance_from(self.send_buffer_seq) as usize
        } else {
            0
        }
    }

    fn unsent_len(&self) -> usize {
        match self.send_buffer.as_ref() {
            Some(buffer) => buffer.len().saturating_sub(self.data_in_flight()),
            None => 0,
        }
    }

    fn enter_time_wait(&mut self, timers: &mut Timer<TimerEvent>) {
        self.cancel_timers(timers);
        self.set_state(State::TimeWait);
        let event: TimerEvent = TimerEvent {
            connection: self.id,
            kind: TimerKind::TimeWait,
        };
        self.time_wait_timer = Some(timers.schedule(self.time_wait_timeout, event));
    }

    fn abort(&mut self, errno: libc::c_int, cause: &str, timers: &mut Timer<TimerEvent>) {
        info!("abort(): connection {} {}", self.id, cause);
        self.error = Some(Fail::new(errno, cause));
        self.cancel_timers(timers);
        self.rtt_sample = None;
        self.set_state(State::Closed);
    }

    fn arm_retransmit_timer(&mut self, timers: &mut Timer<TimerEvent>) {
        self.cancel_retransmit_timer(timers);
        let event: TimerEvent = TimerEvent {
            connection: self.id,
            kind: TimerKind::Retransmit,
        };
        self.retransmit_timer = Some(timers.schedule(self.rto_calculator.rto(), event));
    }

    fn cancel_retransmit_timer(&mut self, timers: &mut Timer<TimerEvent>) {
        if let Some(id) = self.retransmit_timer.take() {
            timers.cancel(id);
        }
    }

    fn cancel_timers(&mut self, timers: &mut Timer<TimerEvent>) {
        self.cancel_retransmit_timer(timers);
        if let Some(id) = self.time_wait_timer.take() {
            timers.cancel(id);
        }
    }

    fn set_state(&mut self, state: State) {
        if self.state != state {
            debug!("set_state(): connection {} {:?} -> {:?}", self.id, self.state, state);
            self.state = state;
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
