//! Leader election and log replication invariants (`spec.md` §4.I), driven
//! directly against `RaftNode` without any peer transport.

use redcore::config::RaftPeerConfig;
use redcore::raft::{RaftNode, Role};

fn node(id: u64, peers: Vec<RaftPeerConfig>, dir: &std::path::Path) -> RaftNode {
    let (tx, _rx) = crossbeam_channel::unbounded();
    RaftNode::new(id, peers, &dir.join(format!("node{id}.log")), tx).unwrap()
}

#[test]
fn a_lone_candidate_wins_a_single_node_election() {
    let dir = tempfile::tempdir().unwrap();
    let n = node(1, vec![], dir.path());

    let args = n.begin_election();
    assert_eq!(n.role(), Role::Candidate);

    n.complete_election(args.term, 1, 1);
    assert_eq!(n.role(), Role::Leader);
}

#[test]
fn a_candidate_without_a_majority_stays_a_candidate() {
    let dir = tempfile::tempdir().unwrap();
    let peers = vec![
        RaftPeerConfig { id: 2, host: "127.0.0.1".into(), port: 0 },
        RaftPeerConfig { id: 3, host: "127.0.0.1".into(), port: 0 },
    ];
    let n = node(1, peers, dir.path());

    let args = n.begin_election();
    // Only the candidate's own vote; 1 of 3 is not a majority.
    n.complete_election(args.term, 1, 3);
    assert_eq!(n.role(), Role::Candidate);
}

#[test]
fn handle_request_vote_grants_at_most_one_vote_per_term() {
    let dir = tempfile::tempdir().unwrap();
    let n = node(1, vec![], dir.path());

    let first = n.handle_request_vote(redcore::raft::RequestVoteArgs {
        term: 1,
        candidate_id: 2,
        last_log_index: 0,
        last_log_term: 0,
    });
    assert!(first.vote_granted);

    let second = n.handle_request_vote(redcore::raft::RequestVoteArgs {
        term: 1,
        candidate_id: 3,
        last_log_index: 0,
        last_log_term: 0,
    });
    assert!(!second.vote_granted);
}

#[test]
fn append_entries_with_a_stale_term_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let n = node(1, vec![], dir.path());
    n.handle_request_vote(redcore::raft::RequestVoteArgs {
        term: 5,
        candidate_id: 2,
        last_log_index: 0,
        last_log_term: 0,
    });

    let reply = n.handle_append_entries(redcore::raft::AppendEntriesArgs {
        term: 1,
        leader_id: 2,
        prev_log_index: 0,
        prev_log_term: 0,
        entries: vec![],
        leader_commit: 0,
    });
    assert!(!reply.success);
    assert_eq!(reply.term, 5);
}

#[test]
fn a_leader_commits_an_entry_once_started() {
    let dir = tempfile::tempdir().unwrap();
    let n = node(1, vec![], dir.path());
    let args = n.begin_election();
    n.complete_election(args.term, 1, 1);

    let (index, term) = n.start(b"SET k v".to_vec()).unwrap();
    assert_eq!(index, 1);
    assert_eq!(term, n.current_term());
}

#[test]
fn start_is_rejected_on_a_non_leader() {
    let dir = tempfile::tempdir().unwrap();
    let n = node(1, vec![], dir.path());
    assert!(n.start(b"SET k v".to_vec()).is_err());
}
