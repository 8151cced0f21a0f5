use bytes::BytesMut;

use pnum_wire::{decode, encode, Body, Message, Origin};

fn decode_one(line: &str) -> Message {
    let mut buf = BytesMut::from(line.as_bytes());
    let mut results = decode(&mut buf);
    assert_eq!(results.len(), 1, "expected one message from {line:?}");
    results.remove(0).unwrap()
}

#[test]
fn compute_worker_lines_decode() {
    let ack = decode_one("{\"orig\": \"cmp\", \"type\": \"ack\", \"flops\": 1234567.000000}\n");
    assert_eq!(
        ack,
        Message::compute(Body::Ack {
            flops: Some(1_234_567.0)
        })
    );

    let add = decode_one("{\"orig\":\"cmp\", \"type\":\"add\", \"val\": 8128}\n");
    assert_eq!(add, Message::compute(Body::Add { val: 8128 }));

    let mon = decode_one("{\"orig\": \"cmp_mon\", \"type\": \"ack\"}\n");
    assert_eq!(mon, Message::monitor(Body::Ack { flops: None }));
}

#[test]
fn long_spellings_are_accepted() {
    let msg = decode_one("{\"origin\":\"compute\",\"type\":\"req\",\"flops\":1000}\n");
    assert_eq!(msg.origin, Origin::Compute);
    assert_eq!(msg.body, Body::Req { flops: Some(1000.0) });

    let msg = decode_one("{\"origin\":\"manager\",\"type\":\"kill\"}\n");
    assert_eq!(msg, Message::manager(Body::Kill));
}

#[test]
fn status_snapshot_survives_the_wire() {
    let msg = Message::manager(Body::Dat {
        clients: [("10.0.0.1".to_string(), 2.5e8)].into_iter().collect(),
        perfs: vec![6, 28, 496, 8128],
    });
    let bytes = encode(&msg).unwrap();
    assert_eq!(bytes.last(), Some(&b'\n'));
    assert_eq!(bytes.iter().filter(|b| **b == b'\n').count(), 1);

    let text = std::str::from_utf8(&bytes).unwrap();
    assert_eq!(decode_one(text), msg);
}

#[test]
fn unknown_type_is_a_decode_error() {
    let mut buf = BytesMut::from(&b"{\"orig\":\"cmp\",\"type\":\"dance\"}\n"[..]);
    let results = decode(&mut buf);
    assert_eq!(results.len(), 1);
    assert!(results[0].is_err());
}
