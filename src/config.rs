// Copyright 2014 Max Mertens
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Tunable parameters the original C library hard-coded as preprocessor
//! macros (`VSP_CMCP_NODE_HEARTBEAT_TIME` and friends).

use std::time::Duration;

/// Maximum number of items in one [`crate::frame::DataList`].
pub const DATALIST_MAX_ITEMS: usize = 16;

/// Maximum number of peers tracked by a [`crate::server::Server`].
pub const SERVER_MAX_PEERS: usize = 16;

/// Node-level tunables, overridable per-node before `bind`/`connect`.
#[derive(Debug, Clone, Copy)]
pub struct NodeConfig {
    /// Interval between heartbeats, and the inbound socket's receive
    /// timeout.
    pub heartbeat_period: Duration,
    /// How long a peer may stay silent before being considered gone.
    pub connection_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> NodeConfig {
        NodeConfig {
            heartbeat_period: Duration::from_millis(500),
            connection_timeout: Duration::from_secs(10),
        }
    }
}
