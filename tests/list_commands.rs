//! List command behavior driven end-to-end through `Server::dispatch`
//! (`spec.md` §4.E list family).

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
fn rpush_then_lrange_preserves_insertion_order() {
    let server = test_server();
    let mut client = Client::new("127.0.0.1:0".parse().unwrap());

    let reply = server.dispatch(&mut client, &cmd(&["RPUSH", "queue", "a", "b", "c"]), 0);
    assert_eq!(reply, Frame::Integer(3));

    let reply = server.dispatch(&mut client, &cmd(&["LRANGE", "queue", "0", "-1"]), 0);
    assert_eq!(
        reply,
        Frame::Array(vec![Frame::bulk("a"), Frame::bulk("b"), Frame::bulk("c")])
    );
}

#[test]
fn lpush_prepends_each_element() {
    let server = test_server();
    let mut client = Client::new("127.0.0.1:0".parse().unwrap());

    server.dispatch(&mut client, &cmd(&["LPUSH", "stack", "a"]), 0);
    server.dispatch(&mut client, &cmd(&["LPUSH", "stack", "b"]), 0);

    let reply = server.dispatch(&mut client, &cmd(&["LRANGE", "stack", "0", "-1"]), 0);
    assert_eq!(reply, Frame::Array(vec![Frame::bulk("b"), Frame::bulk("a")]));
}

#[test]
fn popping_the_last_element_deletes_the_key() {
    let server = test_server();
    let mut client = Client::new("127.0.0.1:0".parse().unwrap());

    server.dispatch(&mut client, &cmd(&["RPUSH", "one", "only"]), 0);
    let reply = server.dispatch(&mut client, &cmd(&["LPOP", "one"]), 0);
    assert_eq!(reply, Frame::bulk("only"));

    let reply = server.dispatch(&mut client, &cmd(&["LLEN", "one"]), 0);
    assert_eq!(reply, Frame::Integer(0));
    let reply = server.dispatch(&mut client, &cmd(&["LPOP", "one"]), 0);
    assert_eq!(reply, Frame::NullBulk);
}

#[test]
fn lset_replaces_an_element_at_an_existing_index() {
    let server = test_server();
    let mut client = Client::new("127.0.0.1:0".parse().unwrap());

    server.dispatch(&mut client, &cmd(&["RPUSH", "xs", "a", "b", "c"]), 0);
    let reply = server.dispatch(&mut client, &cmd(&["LSET", "xs", "1", "B"]), 0);
    assert_eq!(reply, Frame::ok());

    let reply = server.dispatch(&mut client, &cmd(&["LINDEX", "xs", "1"]), 0);
    assert_eq!(reply, Frame::bulk("B"));
}

#[test]
fn lset_on_a_missing_key_is_an_error() {
    let server = test_server();
    let mut client = Client::new("127.0.0.1:0".parse().unwrap());
    let reply = server.dispatch(&mut client, &cmd(&["LSET", "missing", "0", "x"]), 0);
    assert!(matches!(reply, Frame::Error(_)));
}

#[test]
fn lrem_drops_matching_elements_and_reports_the_count() {
    let server = test_server();
    let mut client = Client::new("127.0.0.1:0".parse().unwrap());

    server.dispatch(&mut client, &cmd(&["RPUSH", "dup", "a", "b", "a", "c", "a"]), 0);
    let reply = server.dispatch(&mut client, &cmd(&["LREM", "dup", "0", "a"]), 0);
    assert_eq!(reply, Frame::Integer(3));

    let reply = server.dispatch(&mut client, &cmd(&["LRANGE", "dup", "0", "-1"]), 0);
    assert_eq!(reply, Frame::Array(vec![Frame::bulk("b"), Frame::bulk("c")]));
}

#[test]
fn rpoplpush_moves_the_tail_element_onto_the_destination_head() {
    let server = test_server();
    let mut client = Client::new("127.0.0.1:0".parse().unwrap());

    server.dispatch(&mut client, &cmd(&["RPUSH", "src", "1", "2", "3"]), 0);
    let reply = server.dispatch(&mut client, &cmd(&["RPOPLPUSH", "src", "dst"]), 0);
    assert_eq!(reply, Frame::bulk("3"));

    let reply = server.dispatch(&mut client, &cmd(&["LRANGE", "src", "0", "-1"]), 0);
    assert_eq!(reply, Frame::Array(vec![Frame::bulk("1"), Frame::bulk("2")]));
    let reply = server.dispatch(&mut client, &cmd(&["LRANGE", "dst", "0", "-1"]), 0);
    assert_eq!(reply, Frame::Array(vec![Frame::bulk("3")]));
}
