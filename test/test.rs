// Copyright 2014 Max Mertens
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! End-to-end scenarios driving a real [`Server`]/[`Client`] pair over the
//! in-memory loopback transport: handshake, rejection-then-retry, data
//! exchange, disconnect notification and silent-timeout eviction.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cmcp::config::NodeConfig;
use cmcp::control::{CLIENT_BROADCAST_TOPIC_ID, SERVER_BROADCAST_TOPIC_ID};
use cmcp::frame::DataList;
use cmcp::transport::loopback::{self, LoopbackTransport};
use cmcp::{Client, Server};

fn fast_config() -> NodeConfig {
    NodeConfig {
        heartbeat_period: Duration::from_millis(20),
        connection_timeout: Duration::from_millis(200),
    }
}

fn unique_addrs(test_name: &str) -> (String, String) {
    (
        format!("inproc://{test_name}/server-to-client"),
        format!("inproc://{test_name}/client-to-server"),
    )
}

#[test]
fn happy_path_handshake() {
    let _ = env_logger::try_init();
    loopback::reset();
    let transport = LoopbackTransport::new();
    let (server_pub, client_pub) = unique_addrs("happy_path_handshake");

    let server = Server::create(fast_config());
    let admitted = Arc::new(AtomicUsize::new(0));
    let admitted_clone = admitted.clone();
    server.set_announcement_cb(move |_client_id| {
        admitted_clone.fetch_add(1, Ordering::SeqCst);
        true
    });
    server.bind(&transport, &server_pub, &client_pub).unwrap();

    let client = Client::create(fast_config());
    client.connect(&transport, &client_pub, &server_pub).unwrap();

    assert_eq!(cmcp::ClientState::Connected, client.state());
    assert_eq!(1, admitted.load(Ordering::SeqCst));
}

#[test]
fn rejection_then_retry_regenerates_the_client_id() {
    let _ = env_logger::try_init();
    loopback::reset();
    let transport = LoopbackTransport::new();
    let (server_pub, client_pub) = unique_addrs("rejection_then_retry_regenerates_the_client_id");

    let server = Server::create(fast_config());
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_clone = attempts.clone();
    server.set_announcement_cb(move |_client_id| attempts_clone.fetch_add(1, Ordering::SeqCst) > 0);
    server.bind(&transport, &server_pub, &client_pub).unwrap();

    let client = Client::create(fast_config());
    let first_id = client.id();
    client.connect(&transport, &client_pub, &server_pub).unwrap();

    assert_eq!(cmcp::ClientState::Connected, client.state());
    assert!(attempts.load(Ordering::SeqCst) >= 2);
    assert_ne!(first_id, client.id());
}

#[test]
fn data_exchange_round_trips_in_both_directions() {
    let _ = env_logger::try_init();
    loopback::reset();
    let transport = LoopbackTransport::new();
    let (server_pub, client_pub) = unique_addrs("data_exchange_round_trips_in_both_directions");

    let server = Server::create(fast_config());
    server.set_announcement_cb(|_client_id| true);

    let received_by_client: Arc<Mutex<Option<(u16, u16)>>> = Arc::new(Mutex::new(None));
    let received_by_server: Arc<Mutex<Option<(u16, u16)>>> = Arc::new(Mutex::new(None));

    let received_by_server_clone = received_by_server.clone();
    server.set_message_cb(move |client_id, command, data| {
        let echoed = data.get_item(0, 4).map(|bytes| bytes.len()).unwrap_or(0);
        *received_by_server_clone.lock().unwrap() = Some((client_id, command));
        let _ = echoed;
    });

    server.bind(&transport, &server_pub, &client_pub).unwrap();

    let client = Client::create(fast_config());

    let received_by_client_clone = received_by_client.clone();
    client.set_message_cb(move |sender_id, _data| {
        *received_by_client_clone.lock().unwrap() = Some((sender_id, 0));
    });

    client.connect(&transport, &client_pub, &server_pub).unwrap();

    let mut payload = DataList::new();
    payload.add_item(0, b"ping").unwrap();
    server.send(client.id(), 77, Some(&payload)).unwrap();

    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(
        Some((server.id(), 0)),
        *received_by_client.lock().unwrap()
    );

    client.send(99, Some(&payload)).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(
        Some((client.id(), 99)),
        *received_by_server.lock().unwrap()
    );
}

#[test]
fn dropping_the_client_fires_the_server_disconnect_callback() {
    let _ = env_logger::try_init();
    loopback::reset();
    let transport = LoopbackTransport::new();
    let (server_pub, client_pub) =
        unique_addrs("dropping_the_client_fires_the_server_disconnect_callback");

    let server = Server::create(fast_config());
    server.set_announcement_cb(|_client_id| true);

    let disconnected = Arc::new(Mutex::new(None));
    let disconnected_clone = disconnected.clone();
    server.set_disconnect_cb(move |client_id| {
        *disconnected_clone.lock().unwrap() = Some(client_id);
    });
    server.bind(&transport, &server_pub, &client_pub).unwrap();

    let client = Client::create(fast_config());
    client.connect(&transport, &client_pub, &server_pub).unwrap();
    let client_id = client.id();

    drop(client);
    std::thread::sleep(Duration::from_millis(100));

    assert_eq!(Some(client_id), *disconnected.lock().unwrap());
    assert_eq!(0, server.peer_count());
}

#[test]
fn a_silent_client_is_timed_out_and_evicted() {
    let _ = env_logger::try_init();
    loopback::reset();
    let transport = LoopbackTransport::new();
    let (server_pub, client_pub) = unique_addrs("a_silent_client_is_timed_out_and_evicted");

    let server = Server::create(fast_config());
    server.set_announcement_cb(|_client_id| true);
    let disconnected = Arc::new(Mutex::new(None));
    let disconnected_clone = disconnected.clone();
    server.set_disconnect_cb(move |client_id| {
        *disconnected_clone.lock().unwrap() = Some(client_id);
    });
    server.bind(&transport, &server_pub, &client_pub).unwrap();

    let client = Client::create(fast_config());
    client.connect(&transport, &client_pub, &server_pub).unwrap();
    let client_id = client.id();
    assert_eq!(1, server.peer_count());

    // Sever every loopback channel so neither side's heartbeats are
    // delivered anymore, simulating a client that has gone silent without
    // performing an orderly disconnect.
    loopback::reset();

    std::thread::sleep(fast_config().connection_timeout * 3);

    assert_eq!(Some(client_id), *disconnected.lock().unwrap());
    assert_eq!(0, server.peer_count());
}

#[test]
fn parsing_a_short_frame_fails_without_side_effects() {
    let buf = [0u8; 5];
    assert!(cmcp::ParsedMessage::parse(&buf).is_err());
}

#[test]
fn broadcast_topics_do_not_collide_with_generated_ids() {
    assert_ne!(SERVER_BROADCAST_TOPIC_ID, CLIENT_BROADCAST_TOPIC_ID);
}
