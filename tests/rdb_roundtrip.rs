//! Binary snapshot save/load round trips (`spec.md` §4.G).

use redcore::bytes::RedisBytes;
use redcore::db::HashDb;
use redcore::rdb::{load, save, snapshot_bytes_for_replication};
use redcore::value::{Entry, RList, RString, Value};

#[test]
fn save_then_load_restores_every_value_type() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dump.rdb");

    let db = HashDb::new();
    db.insert(RedisBytes::from("str"), Entry::new(Value::Str(RString::new(b"hello".to_vec()))));
    let mut list = RList::new();
    list.push_back(RedisBytes::from("a"));
    list.push_back(RedisBytes::from("b"));
    db.insert(RedisBytes::from("list"), Entry::new(Value::List(list)));

    save(&path, &[&db]).unwrap();

    let restored = HashDb::new();
    load(&path, &[&restored]).unwrap();

    let str_entry = restored.get(b"str").unwrap();
    assert_eq!(str_entry.value.as_string().unwrap().as_bytes(), b"hello");

    let list_entry = restored.get(b"list").unwrap();
    assert_eq!(list_entry.value.as_list().unwrap().len(), 2);
}

#[test]
fn loading_a_file_with_a_bad_magic_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bogus.rdb");
    std::fs::write(&path, b"NOTREDIS1234567890123456").unwrap();

    let db = HashDb::new();
    let err = load(&path, &[&db]);
    assert!(err.is_err());
}

#[test]
fn a_corrupted_trailer_fails_the_checksum_check() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dump.rdb");

    let db = HashDb::new();
    db.insert(RedisBytes::from("k"), Entry::new(Value::Str(RString::new(b"v".to_vec()))));
    save(&path, &[&db]).unwrap();

    let mut bytes = std::fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    let restored = HashDb::new();
    assert!(load(&path, &[&restored]).is_err());
}

#[test]
fn empty_databases_are_skipped_but_round_trip_cleanly() {
    let db = HashDb::new();
    let bytes = snapshot_bytes_for_replication(&[&db]).unwrap();
    assert!(bytes.starts_with(b"REDIS0009"));
}
