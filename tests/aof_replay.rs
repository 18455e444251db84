//! Append-only file write/replay behavior (`spec.md` §4.F).

use redcore::aof::{load, AofState};
use redcore::bytes::RedisBytes;
use redcore::config::AppendFsync;

fn args(parts: &[&str]) -> Vec<RedisBytes> {
    parts.iter().map(|p| RedisBytes::from(*p)).collect()
}

#[test]
fn feed_then_load_replays_every_command_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("appendonly.aof");

    let state = AofState::open(&path, AppendFsync::Always, 100, 1024).unwrap();
    state.feed(0, &args(&["SET", "a", "1"]));
    state.feed(0, &args(&["SET", "b", "2"]));
    state.feed(0, &args(&["DEL", "a"]));

    let mut replayed = Vec::new();
    load(&path, |cmd| {
        replayed.push(cmd.iter().map(|b| String::from_utf8_lossy(b.as_bytes()).into_owned()).collect::<Vec<_>>());
    })
    .unwrap();

    assert_eq!(
        replayed,
        vec![
            vec!["SELECT".to_string(), "0".to_string()],
            vec!["SET".to_string(), "a".to_string(), "1".to_string()],
            vec!["SET".to_string(), "b".to_string(), "2".to_string()],
            vec!["DEL".to_string(), "a".to_string()],
        ]
    );
}

#[test]
fn switching_database_emits_a_select_before_the_command() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("appendonly.aof");

    let state = AofState::open(&path, AppendFsync::Always, 100, 1024).unwrap();
    state.feed(0, &args(&["SET", "a", "1"]));
    state.feed(1, &args(&["SET", "b", "2"]));

    let mut selects = Vec::new();
    load(&path, |cmd| {
        if cmd[0].as_bytes() == b"SELECT" {
            selects.push(String::from_utf8_lossy(cmd[1].as_bytes()).into_owned());
        }
    })
    .unwrap();

    assert_eq!(selects, vec!["0".to_string(), "1".to_string()]);
}

#[test]
fn loading_a_missing_file_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("never-written.aof");
    let mut calls = 0;
    load(&path, |_| calls += 1).unwrap();
    assert_eq!(calls, 0);
}

#[test]
fn bgrewriteaof_replaces_the_log_with_a_minimal_command_set() {
    use redcore::db::HashDb;
    use redcore::value::{Entry, RString, Value};

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("appendonly.aof");
    let state = AofState::open(&path, AppendFsync::Always, 100, 1024).unwrap();

    for i in 0..50 {
        state.feed(0, &args(&["SET", "k", &i.to_string()]));
    }

    let db = HashDb::new();
    db.insert(RedisBytes::from("k"), Entry::new(Value::Str(RString::new(b"49".to_vec()))));

    assert!(state.try_begin_rewrite());
    state.finish_rewrite(&[&db]).unwrap();

    let mut replayed = Vec::new();
    load(&path, |cmd| replayed.push(cmd)).unwrap();
    // The rewritten log reconstructs `k` with a single SET rather than 50.
    let set_count = replayed.iter().filter(|cmd| cmd[0].as_bytes() == b"SET").count();
    assert_eq!(set_count, 1);
}
