// Copyright 2014 Max Mertens
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! In-memory transport for tests. A registry of named broadcast channels
//! stands in for real sockets: every `send` on an address fans out to
//! every `SubSocket` connected or bound to that same address. Exercises
//! the real frame codec and session FSMs without opening a single real
//! socket, so tests stay fast and immune to port collisions.

use std::collections::HashMap;
use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use super::{PubSocket, SubSocket, Transport};

fn registry() -> &'static Mutex<HashMap<String, Vec<Sender<Vec<u8>>>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Vec<Sender<Vec<u8>>>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Remove every channel from the registry. Intended for tests that want a
/// clean slate between scenarios sharing the same addresses.
pub fn reset() {
    registry().lock().unwrap().clear();
}

#[derive(Clone, Default)]
pub struct LoopbackTransport;

impl LoopbackTransport {
    pub fn new() -> LoopbackTransport {
        LoopbackTransport
    }
}

impl Transport for LoopbackTransport {
    fn new_pub_socket(&self) -> io::Result<Box<dyn PubSocket>> {
        Ok(Box::new(LoopbackPub { addr: None }))
    }

    fn new_sub_socket(&self) -> io::Result<Box<dyn SubSocket>> {
        Ok(Box::new(LoopbackSub {
            receiver: None,
            subscriptions: Vec::new(),
            timeout: Duration::from_secs(10),
        }))
    }
}

struct LoopbackPub {
    addr: Option<String>,
}

impl LoopbackPub {
    fn attach(&mut self, addr: &str) -> io::Result<()> {
        self.addr = Some(addr.to_string());
        Ok(())
    }
}

impl PubSocket for LoopbackPub {
    fn bind(&mut self, addr: &str) -> io::Result<()> {
        self.attach(addr)
    }

    fn connect(&mut self, addr: &str) -> io::Result<()> {
        self.attach(addr)
    }

    fn send(&mut self, buf: Vec<u8>) -> io::Result<()> {
        let addr = self
            .addr
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "pub socket not bound"))?;
        let channels = registry().lock().unwrap();
        if let Some(senders) = channels.get(addr) {
            for sender in senders {
                // A receiver dropped mid-test is not this socket's problem.
                let _ = sender.send(buf.clone());
            }
        }
        Ok(())
    }
}

struct LoopbackSub {
    receiver: Option<Receiver<Vec<u8>>>,
    subscriptions: Vec<Vec<u8>>,
    timeout: Duration,
}

impl LoopbackSub {
    fn attach(&mut self, addr: &str) -> io::Result<()> {
        let (sender, receiver) = mpsc::channel();
        registry()
            .lock()
            .unwrap()
            .entry(addr.to_string())
            .or_default()
            .push(sender);
        self.receiver = Some(receiver);
        Ok(())
    }

    fn matches(&self, frame: &[u8]) -> bool {
        self.subscriptions
            .iter()
            .any(|topic| frame.starts_with(topic))
    }
}

impl SubSocket for LoopbackSub {
    fn bind(&mut self, addr: &str) -> io::Result<()> {
        self.attach(addr)
    }

    fn connect(&mut self, addr: &str) -> io::Result<()> {
        self.attach(addr)
    }

    fn set_recv_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn subscribe(&mut self, topic: &[u8]) -> io::Result<()> {
        self.subscriptions.push(topic.to_vec());
        Ok(())
    }

    fn unsubscribe(&mut self, topic: &[u8]) -> io::Result<()> {
        self.subscriptions.retain(|existing| existing != topic);
        Ok(())
    }

    fn recv(&mut self) -> io::Result<Vec<u8>> {
        let receiver = self
            .receiver
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "sub socket not bound"))?;
        let deadline = Instant::now() + self.timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "recv timed out"));
            }
            match receiver.recv_timeout(remaining) {
                Ok(frame) if self.matches(&frame) => return Ok(frame),
                Ok(_unsubscribed_frame) => continue,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "recv timed out"))
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "no publisher is connected to this address",
                    ))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{LittleEndian, WriteBytesExt};

    fn topic_bytes(id: u16) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_u16::<LittleEndian>(id).unwrap();
        buf
    }

    #[test]
    fn a_subscribed_frame_is_delivered() {
        reset();
        let transport = LoopbackTransport::new();
        let mut publisher = transport.new_pub_socket().unwrap();
        let mut subscriber = transport.new_sub_socket().unwrap();

        publisher.bind("inproc://a-subscribed-frame-is-delivered").unwrap();
        subscriber
            .connect("inproc://a-subscribed-frame-is-delivered")
            .unwrap();
        subscriber.subscribe(&topic_bytes(7)).unwrap();
        subscriber.set_recv_timeout(Duration::from_millis(200)).unwrap();

        let mut frame = topic_bytes(7);
        frame.extend_from_slice(b"payload");
        publisher.send(frame.clone()).unwrap();

        assert_eq!(frame, subscriber.recv().unwrap());
    }

    #[test]
    fn an_unsubscribed_frame_is_not_delivered() {
        reset();
        let transport = LoopbackTransport::new();
        let mut publisher = transport.new_pub_socket().unwrap();
        let mut subscriber = transport.new_sub_socket().unwrap();

        publisher
            .bind("inproc://an-unsubscribed-frame-is-not-delivered")
            .unwrap();
        subscriber
            .connect("inproc://an-unsubscribed-frame-is-not-delivered")
            .unwrap();
        subscriber.subscribe(&topic_bytes(1)).unwrap();
        subscriber.set_recv_timeout(Duration::from_millis(50)).unwrap();

        publisher.send(topic_bytes(2)).unwrap();

        assert_eq!(
            io::ErrorKind::TimedOut,
            subscriber.recv().unwrap_err().kind()
        );
    }
}
