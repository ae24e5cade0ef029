// Copyright 2014 Max Mertens
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! The shared node runtime: socket lifecycle, ID generation, the
//! reception thread, heartbeat scheduling and callback dispatch. Both
//! [`crate::client::Client`] and [`crate::server::Server`] embed one of
//! these and supply it a [`SessionCallbacks`] implementation.
//!
//! Ports `vsp_cmcp_node`.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use byteorder::{LittleEndian, WriteBytesExt};
use log::{debug, error};

use crate::clock;
use crate::config::NodeConfig;
use crate::control::{ControlCommand, CLIENT_BROADCAST_TOPIC_ID, SERVER_BROADCAST_TOPIC_ID};
use crate::error::{CmcpError, Result};
use crate::frame::{DataList, MessageKind, OutgoingMessage, ParsedMessage};
use crate::random;
use crate::sync_state::StateCell;
use crate::transport::{PubSocket, SubSocket, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Server,
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Uninitialized,
    Initialized,
    Starting,
    Running,
    Stopping,
}

/// Dispatch target for messages and periodic ticks observed by the
/// reception thread. Implemented by the client/server session, never by
/// the node itself; the receiver captures whatever shared state it needs
/// (never a raw back-pointer to the owning session).
pub trait SessionCallbacks: Send + Sync {
    fn on_message(&self, message: ParsedMessage);
    fn on_tick(&self);
}

fn topic_bytes(topic: u16) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2);
    buf.write_u16::<LittleEndian>(topic).unwrap();
    buf
}

fn generate_id(role: NodeRole) -> u16 {
    loop {
        let raw = random::next_u16();
        let candidate = match role {
            NodeRole::Server => raw & !1,
            NodeRole::Client => raw | 1,
        };
        if candidate != SERVER_BROADCAST_TOPIC_ID && candidate != CLIENT_BROADCAST_TOPIC_ID {
            return candidate;
        }
    }
}

struct Sockets {
    pub_socket: Box<dyn PubSocket>,
    sub_socket: Box<dyn SubSocket>,
}

/// Shared runtime state for one server or client node.
pub struct Node {
    role: NodeRole,
    config: NodeConfig,
    id: Mutex<u16>,
    state: StateCell<NodeState>,
    sockets: Mutex<Option<Sockets>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Node {
    pub fn new(role: NodeRole, config: NodeConfig) -> Node {
        Node {
            role,
            config,
            id: Mutex::new(generate_id(role)),
            state: StateCell::new(NodeState::Uninitialized),
            sockets: Mutex::new(None),
            thread: Mutex::new(None),
        }
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn config(&self) -> NodeConfig {
        self.config
    }

    pub fn id(&self) -> u16 {
        *self.id.lock().unwrap()
    }

    /// Draw a fresh ID for this node's role, discarding the previous one,
    /// and move the socket subscription from the old ID to the new one.
    /// Exclusively driven by the client session's NACK handling.
    pub fn regenerate_id(&self) -> u16 {
        let mut id_guard = self.id.lock().unwrap();
        let old_id = *id_guard;
        let new_id = generate_id(self.role);
        *id_guard = new_id;
        drop(id_guard);

        let mut sockets = self.sockets.lock().unwrap();
        if let Some(sockets) = sockets.as_mut() {
            if let Err(err) = sockets.sub_socket.unsubscribe(&topic_bytes(old_id)) {
                debug!(
                    "[{:?} {}] failed to unsubscribe old id {}: '{:?}'",
                    self.role, new_id, old_id, err
                );
            }
            if let Err(err) = sockets.sub_socket.subscribe(&topic_bytes(new_id)) {
                debug!(
                    "[{:?} {}] failed to subscribe new id: '{:?}'",
                    self.role, new_id, err
                );
            }
        }

        new_id
    }

    pub fn state(&self) -> NodeState {
        self.state.get()
    }

    /// Create sockets, bind (server) or connect (client) them to the
    /// given addresses, configure the receive timeout, and subscribe to
    /// the role's broadcast topic and this node's own ID.
    pub fn wire(&self, transport: &dyn Transport, pub_addr: &str, sub_addr: &str) -> Result<()> {
        if self.state.get() != NodeState::Uninitialized {
            return Err(CmcpError::AlreadyConnected);
        }

        let mut pub_socket = transport.new_pub_socket()?;
        let mut sub_socket = transport.new_sub_socket()?;

        match self.role {
            NodeRole::Server => {
                pub_socket.bind(pub_addr)?;
                sub_socket.bind(sub_addr)?;
            }
            NodeRole::Client => {
                pub_socket.connect(pub_addr)?;
                sub_socket.connect(sub_addr)?;
            }
        }

        sub_socket.set_recv_timeout(self.config.heartbeat_period)?;

        let own_broadcast_topic = match self.role {
            NodeRole::Server => SERVER_BROADCAST_TOPIC_ID,
            NodeRole::Client => CLIENT_BROADCAST_TOPIC_ID,
        };
        sub_socket.subscribe(&topic_bytes(own_broadcast_topic))?;
        sub_socket.subscribe(&topic_bytes(self.id()))?;

        *self.sockets.lock().unwrap() = Some(Sockets {
            pub_socket,
            sub_socket,
        });
        self.state.set(NodeState::Initialized);
        Ok(())
    }

    pub fn subscribe(&self, topic: u16) -> Result<()> {
        let mut guard = self.sockets.lock().unwrap();
        match guard.as_mut() {
            Some(sockets) => sockets.sub_socket.subscribe(&topic_bytes(topic)).map_err(CmcpError::from),
            None => Err(CmcpError::NotConnected),
        }
    }

    pub fn unsubscribe(&self, topic: u16) -> Result<()> {
        let mut guard = self.sockets.lock().unwrap();
        match guard.as_mut() {
            Some(sockets) => sockets
                .sub_socket
                .unsubscribe(&topic_bytes(topic))
                .map_err(CmcpError::from),
            None => Err(CmcpError::NotConnected),
        }
    }

    /// Serialize and hand a message to the outbound socket. Safe to call
    /// from any thread once `wire` has succeeded.
    pub fn build_and_send(
        &self,
        kind: MessageKind,
        topic: u16,
        sender: u16,
        command: u16,
        datalist: Option<&DataList>,
    ) -> Result<()> {
        let message = OutgoingMessage::new(kind, topic, sender, command, datalist)?;
        let buf = message.to_bytes();

        let mut guard = self.sockets.lock().unwrap();
        match guard.as_mut() {
            Some(sockets) => sockets.pub_socket.send(buf).map_err(CmcpError::from),
            None => Err(CmcpError::NotConnected),
        }
    }

    /// Spawn the reception thread and block until it reports `Running`.
    pub fn start(self: &Arc<Self>, callbacks: Arc<dyn SessionCallbacks>) -> Result<()> {
        {
            let guard = self.state.lock();
            if *guard != NodeState::Initialized {
                return Err(CmcpError::InvalidArgument(
                    "node must be initialized before start",
                ));
            }
        }
        self.state.set(NodeState::Starting);

        let node = Arc::clone(self);
        let handle = thread::spawn(move || node.reception_loop(callbacks));

        let guard = self.state.lock();
        let (_guard, reached) = self.state.await_state(guard, NodeState::Running, None);
        debug_assert!(reached, "await_state with no deadline must not time out");

        *self.thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Signal the reception thread to stop and join it.
    pub fn stop(&self) -> Result<()> {
        {
            let guard = self.state.lock();
            if *guard != NodeState::Running {
                return Err(CmcpError::InvalidArgument("node is not running"));
            }
        }
        self.state.set(NodeState::Stopping);

        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        debug_assert_eq!(NodeState::Initialized, self.state.get());
        Ok(())
    }

    fn send_heartbeat(&self) {
        let (topic, command) = match self.role {
            NodeRole::Server => (CLIENT_BROADCAST_TOPIC_ID, ControlCommand::ServerHeartbeat),
            NodeRole::Client => (SERVER_BROADCAST_TOPIC_ID, ControlCommand::ClientHeartbeat),
        };
        let id = self.id();
        match self.build_and_send(MessageKind::Control, topic, id, command.wire_value(), None) {
            Ok(()) => debug!("[{:?} {}] heartbeat sent", self.role, id),
            Err(err) => debug!("[{:?} {}] heartbeat send failed: '{:?}'", self.role, id, err),
        }
    }

    /// Receive and parse one frame, if one arrives before the socket
    /// timeout. Returns `Ok(None)` for a timeout or a dropped/invalid
    /// frame; only genuine transport errors are propagated.
    fn recv_one(&self) -> Result<Option<ParsedMessage>> {
        let frame = {
            let mut guard = self.sockets.lock().unwrap();
            match guard.as_mut() {
                Some(sockets) => sockets.sub_socket.recv(),
                None => return Err(CmcpError::NotConnected),
            }
        };

        let bytes = match frame {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::TimedOut => return Ok(None),
            Err(err) => return Err(CmcpError::from(err)),
        };

        let message = match ParsedMessage::parse(&bytes) {
            Ok(message) => message,
            Err(err) => {
                debug!(
                    "[{:?} {}] dropping unparsable frame: '{:?}'",
                    self.role,
                    self.id(),
                    err
                );
                return Ok(None);
            }
        };

        if message.sender_id() == SERVER_BROADCAST_TOPIC_ID
            || message.sender_id() == CLIENT_BROADCAST_TOPIC_ID
        {
            debug!(
                "[{:?} {}] dropping frame with broadcast sender id",
                self.role,
                self.id()
            );
            return Ok(None);
        }

        Ok(Some(message))
    }

    fn reception_loop(self: Arc<Self>, callbacks: Arc<dyn SessionCallbacks>) {
        self.state.set(NodeState::Running);
        debug!("[{:?} {}] reception loop started", self.role, self.id());

        let mut next_heartbeat = clock::now();

        while self.state.get() == NodeState::Running {
            if clock::has_passed(next_heartbeat) {
                self.send_heartbeat();
                next_heartbeat = clock::deadline_after(self.config.heartbeat_period);
            }

            if panic::catch_unwind(AssertUnwindSafe(|| callbacks.on_tick())).is_err() {
                error!(
                    "[{:?} {}] periodic callback panicked, continuing",
                    self.role,
                    self.id()
                );
            }

            match self.recv_one() {
                Ok(Some(message)) => {
                    let callbacks = Arc::clone(&callbacks);
                    if panic::catch_unwind(AssertUnwindSafe(|| callbacks.on_message(message))).is_err() {
                        error!(
                            "[{:?} {}] message callback panicked, dropping this message",
                            self.role,
                            self.id()
                        );
                    }
                }
                Ok(None) => {}
                Err(err) => debug!(
                    "[{:?} {}] recv failed: '{:?}'",
                    self.role,
                    self.id(),
                    err
                ),
            }
        }

        self.state.set(NodeState::Initialized);
        debug!("[{:?} {}] reception loop stopped", self.role, self.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_server_ids_are_even_and_not_a_broadcast_topic() {
        for _ in 0..64 {
            let id = generate_id(NodeRole::Server);
            assert_eq!(0, id % 2);
            assert_ne!(SERVER_BROADCAST_TOPIC_ID, id);
            assert_ne!(CLIENT_BROADCAST_TOPIC_ID, id);
        }
    }

    #[test]
    fn generated_client_ids_are_odd_and_not_a_broadcast_topic() {
        for _ in 0..64 {
            let id = generate_id(NodeRole::Client);
            assert_eq!(1, id % 2);
            assert_ne!(SERVER_BROADCAST_TOPIC_ID, id);
            assert_ne!(CLIENT_BROADCAST_TOPIC_ID, id);
        }
    }

    #[test]
    fn a_fresh_node_starts_uninitialized() {
        let node = Node::new(NodeRole::Client, NodeConfig::default());
        assert_eq!(NodeState::Uninitialized, node.state());
    }
}
