// Copyright 2014 Max Mertens
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! CMCP: a connection-oriented, heartbeat-driven session protocol layered
//! over publish/subscribe sockets.
//!
//! A [`Server`] admits [`Client`]s that announce themselves; once a
//! client's handshake completes, either side can exchange user-defined
//! [`DataList`] payloads over [`Client::send`]/[`Server::send`], and
//! periodic heartbeats keep the session alive until an explicit
//! disconnect or a silence timeout tears it down.
//!
//! ```no_run
//! use cmcp::{Client, DataList, NodeConfig, Server};
//! use cmcp::transport::nng::NngTransport;
//!
//! let transport = NngTransport::new();
//!
//! let server = Server::create(NodeConfig::default());
//! server.set_announcement_cb(|_client_id| true);
//! server.bind(&transport, "tcp://127.0.0.1:9000", "tcp://127.0.0.1:9001").unwrap();
//!
//! let client = Client::create(NodeConfig::default());
//! client.connect(&transport, "tcp://127.0.0.1:9001", "tcp://127.0.0.1:9000").unwrap();
//!
//! client.send(1, Some(&DataList::new())).unwrap();
//! ```

pub mod clock;
pub mod client;
pub mod config;
pub mod control;
pub mod error;
pub mod frame;
pub mod node;
pub mod random;
pub mod server;
pub mod sync_state;
pub mod transport;

pub use client::{Client, ClientState};
pub use config::NodeConfig;
pub use error::{CmcpError, Result};
pub use frame::{DataList, MessageKind, OutgoingMessage, ParsedMessage};
pub use server::Server;
