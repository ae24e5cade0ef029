// Copyright 2014 Max Mertens
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! The client session: connect/announce handshake, liveness tracking
//! against one server, and user message exchange. Ports `vsp_cmcp_client`.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;

use crate::clock;
use crate::config::NodeConfig;
use crate::control::{ControlCommand, NONCE_ITEM_ID};
use crate::error::{CmcpError, Result};
use crate::frame::{DataList, MessageKind, ParsedMessage};
use crate::node::{Node, NodeRole, NodeState, SessionCallbacks};
use crate::random;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    TryingToConnect,
    HeartbeatReceived,
    Connected,
}

type MessageCallback = Box<dyn FnMut(u16, &DataList) + Send>;
type DisconnectedCallback = Box<dyn FnMut() + Send>;

struct ClientInner {
    node: Arc<Node>,
    config: NodeConfig,
    state: crate::sync_state::StateCell<ClientState>,
    server_id: Mutex<Option<u16>>,
    nonce: Mutex<Option<u64>>,
    deadline: Mutex<Option<Instant>>,
    message_cb: Mutex<Option<MessageCallback>>,
    disconnected_cb: Mutex<Option<DisconnectedCallback>>,
}

/// A CMCP client, connected to exactly one server at a time.
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn create(config: NodeConfig) -> Client {
        let node = Arc::new(Node::new(NodeRole::Client, config));
        let inner = Arc::new(ClientInner {
            node,
            config,
            state: crate::sync_state::StateCell::new(ClientState::Disconnected),
            server_id: Mutex::new(None),
            nonce: Mutex::new(None),
            deadline: Mutex::new(None),
            message_cb: Mutex::new(None),
            disconnected_cb: Mutex::new(None),
        });
        Client { inner }
    }

    /// The client's current 16-bit node ID (regenerated on NACK).
    pub fn id(&self) -> u16 {
        self.inner.node.id()
    }

    pub fn state(&self) -> ClientState {
        self.inner.state.get()
    }

    /// Wire the sockets, start the reception thread, and block until the
    /// handshake completes or the connection timeout elapses.
    pub fn connect(&self, transport: &dyn Transport, pub_addr: &str, sub_addr: &str) -> Result<()> {
        self.inner.node.wire(transport, pub_addr, sub_addr)?;

        let callbacks: Arc<dyn SessionCallbacks> = self.inner.clone();
        self.inner.node.start(callbacks)?;

        self.establish_connection()
    }

    fn establish_connection(&self) -> Result<()> {
        let deadline = clock::deadline_after(self.inner.config.connection_timeout);

        let mut guard = self.inner.state.lock();
        if *guard == ClientState::Disconnected {
            drop(guard);
            self.inner.state.set(ClientState::TryingToConnect);
            guard = self.inner.state.lock();
        }

        let (_guard, reached) =
            self.inner
                .state
                .await_state(guard, ClientState::Connected, Some(deadline));

        if reached {
            Ok(())
        } else {
            Err(CmcpError::NotConnected)
        }
    }

    /// Send a user data message addressed to the connected server.
    /// Rejected unless the session is `Connected`.
    pub fn send(&self, command: u16, datalist: Option<&DataList>) -> Result<()> {
        if self.inner.state.get() != ClientState::Connected {
            return Err(CmcpError::NotConnected);
        }
        let own_id = self.inner.node.id();
        self.inner
            .node
            .build_and_send(MessageKind::Data, own_id, own_id, command, datalist)
    }

    pub fn set_message_cb<F>(&self, callback: F)
    where
        F: FnMut(u16, &DataList) + Send + 'static,
    {
        *self.inner.message_cb.lock().unwrap() = Some(Box::new(callback));
    }

    /// Invoked once, from the reception thread, the moment a `Connected`
    /// session falls back to `Disconnected` due to a timed-out peer.
    pub fn set_disconnected_cb<F>(&self, callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        *self.inner.disconnected_cb.lock().unwrap() = Some(Box::new(callback));
    }

    fn free(&self) {
        if self.inner.state.get() == ClientState::Connected {
            if let Some(server_id) = *self.inner.server_id.lock().unwrap() {
                let own_id = self.inner.node.id();
                let _ = self.inner.node.build_and_send(
                    MessageKind::Control,
                    server_id,
                    own_id,
                    ControlCommand::ClientDisconnect.wire_value(),
                    None,
                );
            }
        }
        if self.inner.node.state() == NodeState::Running {
            let _ = self.inner.node.stop();
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.free();
    }
}

fn encode_nonce(nonce: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8);
    buf.write_u64::<LittleEndian>(nonce).unwrap();
    buf
}

fn decode_nonce(bytes: &[u8]) -> Option<u64> {
    let mut cursor = bytes;
    cursor.read_u64::<LittleEndian>().ok()
}

impl ClientInner {
    fn handle_control(&self, message: &ParsedMessage) {
        let command = ControlCommand::from_wire_value(message.command_id());

        match self.state.get() {
            // A rejected handshake falls back to `Disconnected` but never
            // stops trying: the very next server heartbeat restarts it,
            // the same way the initial `connect()` call does.
            ClientState::TryingToConnect | ClientState::Disconnected => {
                if command != Some(ControlCommand::ServerHeartbeat) {
                    return;
                }
                *self.server_id.lock().unwrap() = Some(message.sender_id());
                self.state.set(ClientState::HeartbeatReceived);

                let nonce = random::next_u64();
                *self.nonce.lock().unwrap() = Some(nonce);

                let mut list = DataList::new();
                let _ = list.add_item(NONCE_ITEM_ID, &encode_nonce(nonce));

                let own_id = self.node.id();
                if let Err(err) = self.node.build_and_send(
                    MessageKind::Control,
                    message.sender_id(),
                    own_id,
                    ControlCommand::ClientAnnounce.wire_value(),
                    Some(&list),
                ) {
                    debug!("[client {}] failed to send announce: '{:?}'", own_id, err);
                }
            }
            ClientState::HeartbeatReceived => {
                let expected_server = *self.server_id.lock().unwrap();
                if expected_server != Some(message.sender_id()) {
                    return;
                }
                let is_ack = command == Some(ControlCommand::ServerAckClient);
                let is_nack = command == Some(ControlCommand::ServerNackClient);
                if !is_ack && !is_nack {
                    return;
                }

                let received_nonce = message
                    .datalist()
                    .get_item(NONCE_ITEM_ID, 8)
                    .and_then(decode_nonce);
                if received_nonce.is_none() || received_nonce != *self.nonce.lock().unwrap() {
                    return;
                }

                if is_ack {
                    *self.deadline.lock().unwrap() =
                        Some(clock::deadline_after(self.config.connection_timeout));
                    self.state.set(ClientState::Connected);
                    debug!("[client {}] connected to server {}", self.node.id(), message.sender_id());
                } else {
                    let new_id = self.node.regenerate_id();
                    *self.server_id.lock().unwrap() = None;
                    self.state.set(ClientState::Disconnected);
                    debug!("[client {}] rejected, regenerated id", new_id);
                }
            }
            ClientState::Connected => {}
        }
    }
}

impl SessionCallbacks for ClientInner {
    fn on_message(&self, message: ParsedMessage) {
        // Servers have even IDs; discard anything claiming an odd sender.
        if message.sender_id() % 2 != 0 {
            return;
        }

        if let Some(server_id) = *self.server_id.lock().unwrap() {
            if message.sender_id() == server_id && self.state.get() == ClientState::Connected {
                *self.deadline.lock().unwrap() =
                    Some(clock::deadline_after(self.config.connection_timeout));
            }
        }

        match message.kind() {
            MessageKind::Control => self.handle_control(&message),
            MessageKind::Data => {
                if message.topic_id() == self.node.id() {
                    if let Some(callback) = self.message_cb.lock().unwrap().as_mut() {
                        callback(message.sender_id(), message.datalist());
                    }
                }
            }
        }
    }

    fn on_tick(&self) {
        if self.state.get() != ClientState::Connected {
            return;
        }
        let timed_out = self
            .deadline
            .lock()
            .unwrap()
            .map_or(false, clock::has_passed);
        if !timed_out {
            return;
        }

        *self.server_id.lock().unwrap() = None;
        self.state.set(ClientState::Disconnected);
        debug!("[client {}] connection timed out", self.node.id());

        if let Some(callback) = self.disconnected_cb.lock().unwrap().as_mut() {
            callback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_fresh_client_starts_disconnected() {
        let client = Client::create(NodeConfig::default());
        assert_eq!(ClientState::Disconnected, client.state());
    }

    #[test]
    fn send_before_connected_is_rejected() {
        let client = Client::create(NodeConfig::default());
        assert!(client.send(1, None).is_err());
    }
}
