//! String command behavior driven end-to-end through `Server::dispatch`
//! (`spec.md` §4.E string family).

use redcore::bytes::RedisBytes;
use redcore::client::Client;
use redcore::config::Config;
use redcore::resp::Frame;
use redcore::server::Server;

fn test_server() -> std::sync::Arc<Server> {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.appendonly = false;
    config.snapshot_path = dir.into_path().join("dump.rdb");
    Server::new(config).unwrap()
}

fn cmd(parts: &[&str]) -> Vec<RedisBytes> {
    parts.iter().map(|p| RedisBytes::from(*p)).collect()
}

#[test]
fn set_then_get_round_trips_a_value() {
    let server = test_server();
    let mut client = Client::new("127.0.0.1:0".parse().unwrap());

    let reply = server.dispatch(&mut client, &cmd(&["SET", "greeting", "hello"]), 0);
    assert_eq!(reply, Frame::ok());

    let reply = server.dispatch(&mut client, &cmd(&["GET", "greeting"]), 0);
    assert_eq!(reply, Frame::bulk("hello"));
}

#[test]
fn get_on_missing_key_returns_null_bulk() {
    let server = test_server();
    let mut client = Client::new("127.0.0.1:0".parse().unwrap());
    let reply = server.dispatch(&mut client, &cmd(&["GET", "nope"]), 0);
    assert_eq!(reply, Frame::NullBulk);
}

#[test]
fn incr_on_a_fresh_key_starts_at_one() {
    let server = test_server();
    let mut client = Client::new("127.0.0.1:0".parse().unwrap());
    let reply = server.dispatch(&mut client, &cmd(&["INCR", "counter"]), 0);
    assert_eq!(reply, Frame::Integer(1));
    let reply = server.dispatch(&mut client, &cmd(&["INCR", "counter"]), 0);
    assert_eq!(reply, Frame::Integer(2));
}

#[test]
fn incr_on_a_non_numeric_string_is_an_error() {
    let server = test_server();
    let mut client = Client::new("127.0.0.1:0".parse().unwrap());
    server.dispatch(&mut client, &cmd(&["SET", "word", "abc"]), 0);
    let reply = server.dispatch(&mut client, &cmd(&["INCR", "word"]), 0);
    assert!(matches!(reply, Frame::Error(_)));
}

#[test]
fn setnx_does_not_clobber_an_existing_key() {
    let server = test_server();
    let mut client = Client::new("127.0.0.1:0".parse().unwrap());
    server.dispatch(&mut client, &cmd(&["SET", "k", "first"]), 0);
    let reply = server.dispatch(&mut client, &cmd(&["SETNX", "k", "second"]), 0);
    assert_eq!(reply, Frame::Integer(0));
    let reply = server.dispatch(&mut client, &cmd(&["GET", "k"]), 0);
    assert_eq!(reply, Frame::bulk("first"));
}

#[test]
fn unknown_command_is_rejected() {
    let server = test_server();
    let mut client = Client::new("127.0.0.1:0".parse().unwrap());
    let reply = server.dispatch(&mut client, &cmd(&["FROBNICATE", "x"]), 0);
    assert!(matches!(reply, Frame::Error(_)));
}
