//! PSYNC handshake decisions and backlog-driven partial resync
//! (`spec.md` §4.H).

use redcore::bytes::RedisBytes;
use redcore::replication::{parse_psync_offset, PsyncDecision, ReplicationState};

fn cmd(parts: &[&str]) -> Vec<RedisBytes> {
    parts.iter().map(|p| RedisBytes::from(*p)).collect()
}

#[test]
fn an_unknown_replid_triggers_a_full_resync() {
    let state = ReplicationState::new();
    match state.decide_psync("?", -1) {
        PsyncDecision::Full { offset, .. } => assert_eq!(offset, 0),
        PsyncDecision::Partial { .. } => panic!("expected full resync"),
    }
}

#[test]
fn a_matching_replid_within_the_backlog_gets_a_partial_resync() {
    let state = ReplicationState::new();
    let my_replid = state.replid();

    state.propagate(&cmd(&["SET", "a", "1"]));
    state.propagate(&cmd(&["SET", "b", "2"]));

    match state.decide_psync(&my_replid, 0) {
        PsyncDecision::Partial { backlog_tail } => assert!(!backlog_tail.is_empty()),
        PsyncDecision::Full { .. } => panic!("expected partial resync"),
    }
}

#[test]
fn a_requested_offset_past_the_backlog_falls_back_to_full_resync() {
    let state = ReplicationState::new();
    let my_replid = state.replid();
    state.propagate(&cmd(&["SET", "a", "1"]));

    match state.decide_psync(&my_replid, 999_999) {
        PsyncDecision::Full { .. } => {}
        PsyncDecision::Partial { .. } => panic!("offset is beyond anything buffered"),
    }
}

#[test]
fn propagate_fans_out_to_every_registered_follower() {
    let state = ReplicationState::new();
    let (_id_a, rx_a) = state.register_follower();
    let (_id_b, rx_b) = state.register_follower();
    assert_eq!(state.follower_count(), 2);

    state.propagate(&cmd(&["SET", "k", "v"]));

    assert!(!rx_a.recv().unwrap().is_empty());
    assert!(!rx_b.recv().unwrap().is_empty());
}

#[test]
fn unregistering_a_follower_stops_future_propagation_to_it() {
    let state = ReplicationState::new();
    let (id, rx) = state.register_follower();
    state.unregister_follower(id);
    assert_eq!(state.follower_count(), 0);

    state.propagate(&cmd(&["SET", "k", "v"]));
    assert!(rx.try_recv().is_err());
}

#[test]
fn parse_psync_offset_accepts_question_mark_as_minus_one() {
    assert_eq!(parse_psync_offset("?").unwrap(), -1);
    assert_eq!(parse_psync_offset("42").unwrap(), 42);
    assert!(parse_psync_offset("not-a-number").is_err());
}
