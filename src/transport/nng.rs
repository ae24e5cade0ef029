// Copyright 2014 Max Mertens
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Production transport backed by the `nng` crate (nanomsg-next-generation),
//! the closest real-world analogue of the protocol family the original
//! C library addressed directly through raw nanomsg.

use std::io;
use std::time::Duration;

use nng::options::protocol::pubsub::{Subscribe, Unsubscribe};
use nng::options::{Options, RecvTimeout};
use nng::{Protocol, Socket};

use super::{PubSocket, SubSocket, Transport};

fn nng_to_io(err: nng::Error) -> io::Error {
    let kind = match err {
        nng::Error::TimedOut => io::ErrorKind::TimedOut,
        nng::Error::ConnectionRefused | nng::Error::ConnectionReset => {
            io::ErrorKind::ConnectionRefused
        }
        _ => io::ErrorKind::Other,
    };
    io::Error::new(kind, err)
}

pub struct NngTransport;

impl NngTransport {
    pub fn new() -> NngTransport {
        NngTransport
    }
}

impl Default for NngTransport {
    fn default() -> NngTransport {
        NngTransport::new()
    }
}

impl Transport for NngTransport {
    fn new_pub_socket(&self) -> io::Result<Box<dyn PubSocket>> {
        let socket = Socket::new(Protocol::Pub0).map_err(nng_to_io)?;
        Ok(Box::new(NngPubSocket { socket }))
    }

    fn new_sub_socket(&self) -> io::Result<Box<dyn SubSocket>> {
        let socket = Socket::new(Protocol::Sub0).map_err(nng_to_io)?;
        Ok(Box::new(NngSubSocket { socket }))
    }
}

struct NngPubSocket {
    socket: Socket,
}

impl PubSocket for NngPubSocket {
    fn bind(&mut self, addr: &str) -> io::Result<()> {
        self.socket.listen(addr).map_err(nng_to_io)
    }

    fn connect(&mut self, addr: &str) -> io::Result<()> {
        self.socket.dial(addr).map_err(nng_to_io)
    }

    fn send(&mut self, buf: Vec<u8>) -> io::Result<()> {
        let msg = nng::Message::from(&buf[..]);
        self.socket.send(msg).map_err(|(_, err)| nng_to_io(err))
    }
}

struct NngSubSocket {
    socket: Socket,
}

impl SubSocket for NngSubSocket {
    fn bind(&mut self, addr: &str) -> io::Result<()> {
        self.socket.listen(addr).map_err(nng_to_io)
    }

    fn connect(&mut self, addr: &str) -> io::Result<()> {
        self.socket.dial(addr).map_err(nng_to_io)
    }

    fn set_recv_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.socket
            .set_opt::<RecvTimeout>(Some(timeout))
            .map_err(nng_to_io)
    }

    fn subscribe(&mut self, topic: &[u8]) -> io::Result<()> {
        self.socket
            .set_opt::<Subscribe>(topic.to_vec())
            .map_err(nng_to_io)
    }

    fn unsubscribe(&mut self, topic: &[u8]) -> io::Result<()> {
        self.socket
            .set_opt::<Unsubscribe>(topic.to_vec())
            .map_err(nng_to_io)
    }

    fn recv(&mut self) -> io::Result<Vec<u8>> {
        self.socket
            .recv()
            .map(|msg| msg.as_slice().to_vec())
            .map_err(nng_to_io)
    }
}
