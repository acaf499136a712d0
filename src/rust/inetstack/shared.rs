// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    inetstack::{
        protocols::{
            layer1::PhysicalLayer,
            layer4::tcp::State,
        },
        NetworkStack,
        SocketHandle,
    },
    runtime::fail::Fail,
};
use ::socket2::{
    Domain,
    Protocol,
    Type,
};
use ::std::{
    net::{
        Ipv4Addr,
        SocketAddrV4,
    },
    sync::{
        Arc,
        Condvar,
        Mutex,
        MutexGuard,
        PoisonError,
    },
    time::{
        Duration,
        Instant,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// A [NetworkStack] shared between threads. Every call runs under one lock and wakes up the callers that block on
/// the stack. Blocking calls only make progress when another thread feeds segments or advances the clock.
pub struct SharedNetworkStack<P: PhysicalLayer>(Arc<(Mutex<NetworkStack<P>>, Condvar)>);

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl<P: PhysicalLayer> SharedNetworkStack<P> {
    pub fn new(stack: NetworkStack<P>) -> Self {
        Self(Arc::new((Mutex::new(stack), Condvar::new())))
    }

    /// Runs `f` on the stack and notifies blocked callers.
    pub fn with<R, F: FnOnce(&mut NetworkStack<P>) -> R>(&self, f: F) -> Result<R, Fail> {
        let (lock, cvar): &(Mutex<NetworkStack<P>>, Condvar) = &*self.0;
        let mut stack: MutexGuard<NetworkStack<P>> = lock.lock().map_err(poisoned)?;
        let result: R = f(&mut stack);
        cvar.notify_all();
        Ok(result)
    }

    pub fn create(&self, domain: Domain, ty: Type, protocol: Option<Protocol>) -> Result<SocketHandle, Fail> {
        self.with(|stack| stack.create(domain, ty, protocol))?
    }

    pub fn bind(&self, handle: SocketHandle, local: SocketAddrV4) -> Result<(), Fail> {
        self.with(|stack| stack.bind(handle, local))?
    }

    pub fn listen(&self, handle: SocketHandle, backlog: usize) -> Result<(), Fail> {
        self.with(|stack| stack.listen(handle, backlog))?
    }

    pub fn accept(&self, handle: SocketHandle) -> Result<SocketHandle, Fail> {
        self.with(|stack| stack.accept(handle))?
    }

    pub fn connect(&self, handle: SocketHandle, remote: SocketAddrV4) -> Result<(), Fail> {
        self.with(|stack| stack.connect(handle, remote))?
    }

    pub fn send(&self, handle: SocketHandle, bytes: &[u8]) -> Result<usize, Fail> {
        self.with(|stack| stack.send(handle, bytes))?
    }

    pub fn receive(&self, handle: SocketHandle, max_len: usize) -> Result<Vec<u8>, Fail> {
        self.with(|stack| stack.receive(handle, max_len))?
    }

    pub fn close(&self, handle: SocketHandle) -> Result<(), Fail> {
        self.with(|stack| stack.close(handle))?
    }

    pub fn receive_segment(&self, src: Ipv4Addr, dst: Ipv4Addr, bytes: &[u8]) -> Result<(), Fail> {
        self.with(|stack| stack.receive_segment(src, dst, bytes))?
    }

    pub fn advance_clock(&self, now: Instant) -> Result<(), Fail> {
        self.with(|stack| stack.advance_clock(now))
    }

    /// Opens a connection and waits until the handshake completes or fails.
    pub fn connect_blocking(&self, handle: SocketHandle, remote: SocketAddrV4, timeout: Duration) -> Result<(), Fail> {
        self.connect(handle, remote)?;
        self.wait_until("connect_blocking", timeout, |stack| match stack.state(handle)? {
            State::SynSent => Ok(None),
            State::Closed => match stack.socket_error(handle)? {
                Some(e) => Err(e),
                None => Err(Fail::new(libc::ECONNABORTED, "connection closed during handshake")),
            },
            _ => Ok(Some(())),
        })
    }

    /// Waits until a connection completes its handshake on the listener and accepts it.
    pub fn accept_blocking(&self, handle: SocketHandle, timeout: Duration) -> Result<SocketHandle, Fail> {
        self.wait_until("accept_blocking", timeout, |stack| {
            if stack.has_pending_connection(handle)? {
                Ok(Some(stack.accept(handle)?))
            } else {
                Ok(None)
            }
        })
    }

    /// Waits until data arrives. Returns an empty vector once the peer closed its side of the connection.
    pub fn receive_blocking(&self, handle: SocketHandle, max_len: usize, timeout: Duration) -> Result<Vec<u8>, Fail> {
        self.wait_until("receive_blocking", timeout, |stack| {
            let bytes: Vec<u8> = stack.receive(handle, max_len)?;
            if !bytes.is_empty() || !stack.state(handle)?.can_receive_data() {
                Ok(Some(bytes))
            } else {
                Ok(None)
            }
        })
    }

    /// Polls the stack until `poll` yields a value, sleeping on the condition variable in between.
    fn wait_until<R, F>(&self, caller: &str, timeout: Duration, mut poll: F) -> Result<R, Fail>
    where
        F: FnMut(&mut NetworkStack<P>) -> Result<Option<R>, Fail>,
    {
        let (lock, cvar): &(Mutex<NetworkStack<P>>, Condvar) = &*self.0;
        let deadline: Instant = Instant::now() + timeout;
        let mut stack: MutexGuard<NetworkStack<P>> = lock.lock().map_err(poisoned)?;
        loop {
            let result: Option<R> = poll(&mut stack)?;
            if let Some(result) = result {
                cvar.notify_all();
                return Ok(result);
            }
            let now: Instant = Instant::now();
            if now >= deadline {
                let cause: String = format!("operation timed out after {:?}", timeout);
                error!("{}(): {}", caller, cause);
                return Err(Fail::new(libc::ETIMEDOUT, &cause));
            }
            stack = cvar.wait_timeout(stack, deadline - now).map_err(poisoned)?.0;
        }
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

fn poisoned<T>(_: PoisonError<T>) -> Fail {
    let cause: &str = "network stack lock is poisoned";
    error!("poisoned(): {}", cause);
    Fail::new(libc::EIO, cause)
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl<P: PhysicalLayer> Clone for SharedNetworkStack<P> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}
