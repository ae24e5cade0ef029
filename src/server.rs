// Copyright 2014 Max Mertens
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! The server session: a bounded peer registry, client admission,
//! per-peer timeout tracking and user message dispatch. Ports
//! `vsp_cmcp_server`.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;

use crate::clock;
use crate::config::{NodeConfig, SERVER_MAX_PEERS};
use crate::control::{ControlCommand, NONCE_ITEM_ID, SERVER_BROADCAST_TOPIC_ID};
use crate::error::Result;
use crate::frame::{DataList, MessageKind, ParsedMessage};
use crate::node::{Node, NodeRole, NodeState, SessionCallbacks};
use crate::transport::Transport;

struct PeerEntry {
    client_id: u16,
    deadline: Instant,
}

type AnnouncementCallback = Box<dyn FnMut(u16) -> bool + Send>;
type DisconnectCallback = Box<dyn FnMut(u16) + Send>;
type MessageCallback = Box<dyn FnMut(u16, u16, &DataList) + Send>;

struct ServerInner {
    node: Arc<Node>,
    config: NodeConfig,
    peers: Mutex<Vec<PeerEntry>>,
    announcement_cb: Mutex<Option<AnnouncementCallback>>,
    disconnect_cb: Mutex<Option<DisconnectCallback>>,
    message_cb: Mutex<Option<MessageCallback>>,
}

/// A CMCP server, admitting and tracking up to [`SERVER_MAX_PEERS`] clients.
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    pub fn create(config: NodeConfig) -> Server {
        let node = Arc::new(Node::new(NodeRole::Server, config));
        let inner = Arc::new(ServerInner {
            node,
            config,
            peers: Mutex::new(Vec::new()),
            announcement_cb: Mutex::new(None),
            disconnect_cb: Mutex::new(None),
            message_cb: Mutex::new(None),
        });
        Server { inner }
    }

    pub fn id(&self) -> u16 {
        self.inner.node.id()
    }

    /// Number of currently registered peers.
    pub fn peer_count(&self) -> usize {
        self.inner.peers.lock().unwrap().len()
    }

    /// Wire the sockets and start the reception thread.
    pub fn bind(&self, transport: &dyn Transport, pub_addr: &str, sub_addr: &str) -> Result<()> {
        self.inner.node.wire(transport, pub_addr, sub_addr)?;
        let callbacks: Arc<dyn SessionCallbacks> = self.inner.clone();
        self.inner.node.start(callbacks)
    }

    /// Send a user data message addressed to one client.
    pub fn send(&self, client_id: u16, command: u16, datalist: Option<&DataList>) -> Result<()> {
        let own_id = self.inner.node.id();
        self.inner
            .node
            .build_and_send(MessageKind::Data, client_id, own_id, command, datalist)
    }

    /// Gate run on every `ClientAnnounce`. Returning `true` admits the
    /// client; `false` rejects it. Until this is set, every client is
    /// rejected.
    pub fn set_announcement_cb<F>(&self, callback: F)
    where
        F: FnMut(u16) -> bool + Send + 'static,
    {
        *self.inner.announcement_cb.lock().unwrap() = Some(Box::new(callback));
    }

    pub fn set_disconnect_cb<F>(&self, callback: F)
    where
        F: FnMut(u16) + Send + 'static,
    {
        *self.inner.disconnect_cb.lock().unwrap() = Some(Box::new(callback));
    }

    pub fn set_message_cb<F>(&self, callback: F)
    where
        F: FnMut(u16, u16, &DataList) + Send + 'static,
    {
        *self.inner.message_cb.lock().unwrap() = Some(Box::new(callback));
    }

    fn free(&self) {
        if self.inner.node.state() == NodeState::Running {
            let _ = self.inner.node.stop();
        }
        self.inner.peers.lock().unwrap().clear();
    }
}

impl Drop for Server {
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

impl ServerInner {
    fn send_admission_reply(&self, client_id: u16, nonce: u64, admitted: bool) {
        let mut list = DataList::new();
        let _ = list.add_item(NONCE_ITEM_ID, &encode_nonce(nonce));

        let command = if admitted {
            ControlCommand::ServerAckClient
        } else {
            ControlCommand::ServerNackClient
        };
        let own_id = self.node.id();
        if let Err(err) = self.node.build_and_send(
            MessageKind::Control,
            client_id,
            own_id,
            command.wire_value(),
            Some(&list),
        ) {
            debug!(
                "[server {}] failed to reply to client {}: '{:?}'",
                own_id, client_id, err
            );
        }
    }

    /// Admit or reject an announcing client. Rejects without revoking any
    /// existing registration for the same ID.
    fn register(&self, client_id: u16, nonce: u64) {
        let admit = {
            let mut peers = self.peers.lock().unwrap();
            let already_registered = peers.iter().any(|peer| peer.client_id == client_id);
            let at_capacity = peers.len() >= SERVER_MAX_PEERS;

            let admitted = !already_registered
                && !at_capacity
                && self
                    .announcement_cb
                    .lock()
                    .unwrap()
                    .as_mut()
                    .map_or(false, |cb| cb(client_id));

            if admitted {
                peers.push(PeerEntry {
                    client_id,
                    deadline: clock::deadline_after(self.config.connection_timeout),
                });
            }
            admitted
        };

        if admit {
            if let Err(err) = self.node.subscribe(client_id) {
                debug!(
                    "[server {}] failed to subscribe to client {}: '{:?}'",
                    self.node.id(),
                    client_id,
                    err
                );
            }
            debug!("[server {}] admitted client {}", self.node.id(), client_id);
        } else {
            debug!("[server {}] rejected client {}", self.node.id(), client_id);
        }

        self.send_admission_reply(client_id, nonce, admit);
    }

    fn deregister(&self, client_id: u16) {
        let removed = {
            let mut peers = self.peers.lock().unwrap();
            match peers.iter().position(|peer| peer.client_id == client_id) {
                Some(index) => {
                    peers.swap_remove(index);
                    true
                }
                None => false,
            }
        };

        if !removed {
            return;
        }

        if let Err(err) = self.node.unsubscribe(client_id) {
            debug!(
                "[server {}] failed to unsubscribe client {}: '{:?}'",
                self.node.id(),
                client_id,
                err
            );
        }
        debug!("[server {}] deregistered client {}", self.node.id(), client_id);

        if let Some(callback) = self.disconnect_cb.lock().unwrap().as_mut() {
            callback(client_id);
        }
    }

    fn handle_control(&self, message: &ParsedMessage) {
        match ControlCommand::from_wire_value(message.command_id()) {
            Some(ControlCommand::ClientAnnounce) => {
                if let Some(nonce) = message
                    .datalist()
                    .get_item(NONCE_ITEM_ID, 8)
                    .and_then(decode_nonce)
                {
                    self.register(message.sender_id(), nonce);
                }
            }
            Some(ControlCommand::ClientDisconnect) => {
                self.deregister(message.sender_id());
            }
            _ => {}
        }
    }
}

impl SessionCallbacks for ServerInner {
    fn on_message(&self, message: ParsedMessage) {
        // Clients have odd IDs; server-to-server traffic is unsupported.
        if message.sender_id() % 2 == 0 {
            return;
        }

        {
            let mut peers = self.peers.lock().unwrap();
            if let Some(peer) = peers.iter_mut().find(|peer| peer.client_id == message.sender_id()) {
                peer.deadline = clock::deadline_after(self.config.connection_timeout);
            }
        }

        let own_id = self.node.id();
        match message.kind() {
            MessageKind::Control => {
                if message.topic_id() == SERVER_BROADCAST_TOPIC_ID || message.topic_id() == own_id {
                    self.handle_control(&message);
                }
            }
            MessageKind::Data => {
                let topic_is_valid =
                    message.topic_id() == SERVER_BROADCAST_TOPIC_ID || message.topic_id() % 2 == 1;
                if !topic_is_valid {
                    return;
                }
                let registered = self
                    .peers
                    .lock()
                    .unwrap()
                    .iter()
                    .any(|peer| peer.client_id == message.sender_id());
                if !registered {
                    return;
                }
                if let Some(callback) = self.message_cb.lock().unwrap().as_mut() {
                    callback(message.sender_id(), message.command_id(), message.datalist());
                }
            }
        }
    }

    fn on_tick(&self) {
        let expired: Vec<u16> = {
            let peers = self.peers.lock().unwrap();
            peers
                .iter()
                .filter(|peer| clock::has_passed(peer.deadline))
                .map(|peer| peer.client_id)
                .collect()
        };
        for client_id in expired {
            self.deregister(client_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_fresh_server_has_no_peers() {
        let server = Server::create(NodeConfig::default());
        assert_eq!(0, server.peer_count());
    }

    #[test]
    fn registration_is_rejected_without_an_announcement_callback() {
        let server = Server::create(NodeConfig::default());
        server.inner.register(3, 42);
        assert_eq!(0, server.peer_count());
    }

    #[test]
    fn registration_is_accepted_when_the_callback_admits() {
        let server = Server::create(NodeConfig::default());
        server.set_announcement_cb(|_client_id| true);
        server.inner.register(3, 42);
        assert_eq!(1, server.peer_count());
    }

    #[test]
    fn registry_is_capped_at_server_max_peers() {
        let server = Server::create(NodeConfig::default());
        server.set_announcement_cb(|_client_id| true);
        for client_id in 0..SERVER_MAX_PEERS as u16 {
            server.inner.register(client_id * 2 + 1, client_id as u64);
        }
        assert_eq!(SERVER_MAX_PEERS, server.peer_count());

        server.inner.register(9999, 1);
        assert_eq!(SERVER_MAX_PEERS, server.peer_count());
    }

    #[test]
    fn deregistering_an_unknown_client_does_not_fire_the_disconnect_callback() {
        let server = Server::create(NodeConfig::default());
        let fired = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let fired_clone = fired.clone();
        server.set_disconnect_cb(move |_| {
            fired_clone.store(true, std::sync::atomic::Ordering::SeqCst);
        });

        server.inner.deregister(123);
        assert!(!fired.load(std::sync::atomic::Ordering::SeqCst));
    }
}
