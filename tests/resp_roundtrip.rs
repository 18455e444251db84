//! RESP decode/encode round-trips (`spec.md` §4.C).

use quickcheck::quickcheck;
use redcore::bytes::RedisBytes;
use redcore::resp::{encode_command, Decoder, Frame};

#[test]
fn decodes_a_multibulk_set_command() {
    let mut decoder = Decoder::new();
    decoder.feed(b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n");
    let cmd = decoder.next_command().unwrap().unwrap();
    assert_eq!(cmd, vec![RedisBytes::from("SET"), RedisBytes::from("foo"), RedisBytes::from("bar")]);
}

#[test]
fn decodes_an_inline_command() {
    let mut decoder = Decoder::new();
    decoder.feed(b"PING\r\n");
    let cmd = decoder.next_command().unwrap().unwrap();
    assert_eq!(cmd, vec![RedisBytes::from("PING")]);
}

#[test]
fn partial_multibulk_waits_for_more_bytes() {
    let mut decoder = Decoder::new();
    decoder.feed(b"*2\r\n$3\r\nGET\r\n$3\r\nfo");
    assert!(decoder.next_command().unwrap().is_none());
    decoder.feed(b"o\r\n");
    let cmd = decoder.next_command().unwrap().unwrap();
    assert_eq!(cmd, vec![RedisBytes::from("GET"), RedisBytes::from("foo")]);
}

#[test]
fn encodes_every_frame_variant() {
    assert_eq!(Frame::ok().to_bytes(), b"+OK\r\n");
    assert_eq!(Frame::Integer(42).to_bytes(), b":42\r\n");
    assert_eq!(Frame::bulk("hi").to_bytes(), b"$2\r\nhi\r\n");
    assert_eq!(Frame::NullBulk.to_bytes(), b"$-1\r\n");
    assert_eq!(Frame::NullArray.to_bytes(), b"*-1\r\n");
    assert_eq!(
        Frame::Array(vec![Frame::Integer(1), Frame::Integer(2)]).to_bytes(),
        b"*2\r\n:1\r\n:2\r\n"
    );
}

quickcheck! {
    /// A TCP read can land on any byte boundary; the decoder has to come out
    /// the same regardless of where a single command's bytes get split
    /// across two `feed` calls.
    fn decoder_is_invariant_to_chunk_boundary(parts: Vec<Vec<u8>>, split_point: u8) -> bool {
        if parts.is_empty() || parts.len() > 16 {
            return true;
        }
        let cmd: Vec<RedisBytes> = parts.into_iter().map(RedisBytes::from).collect();
        let encoded = encode_command(&cmd);
        let split = (split_point as usize) % (encoded.len() + 1);
        let (first, second) = encoded.split_at(split);

        let mut decoder = Decoder::new();
        decoder.feed(first);
        decoder.feed(second);
        decoder.next_command().unwrap() == Some(cmd)
    }
}
