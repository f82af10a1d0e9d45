//! Property-based tests for frame parsing, the chat wire format and fan-out.

use std::sync::Arc;

use bytes::BytesMut;
use proptest::prelude::*;
use wsrelay::message::{Message, MessageKind};
use wsrelay::relay::{BroadcastRelay, ConnectionRegistry, Outbound, Peer};
use wsrelay::transport::{Frame, OpCode, RequestHead};

fn data_opcode_strategy() -> impl Strategy<Value = OpCode> {
    prop_oneof![Just(OpCode::Text), Just(OpCode::Binary), Just(OpCode::Continuation)]
}

fn kind_strategy() -> impl Strategy<Value = MessageKind> {
    prop_oneof![
        Just(MessageKind::Join),
        Just(MessageKind::Left),
        Just(MessageKind::Message),
    ]
}

fn message_strategy() -> impl Strategy<Value = Message> {
    (
        "\\PC{0,24}",
        "\\PC{0,200}",
        "[0-9a-f-]{36}",
        any::<i64>(),
        kind_strategy(),
    )
        .prop_map(|(sender, content, id, iat, kind)| Message {
            sender,
            content,
            id,
            iat,
            kind,
        })
}

proptest! {
    #[test]
    fn test_frame_parse_never_panics(data in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = Frame::parse(&data);
    }

    #[test]
    fn test_masked_frame_unmasks(
        fin in any::<bool>(),
        opcode in data_opcode_strategy(),
        payload in prop::collection::vec(any::<u8>(), 0..70_000),
        mask in any::<[u8; 4]>()
    ) {
        let frame = Frame::new(fin, opcode, payload);
        let mut buf = BytesMut::new();
        frame.encode(&mut buf, Some(mask));
        prop_assert_eq!(buf.len(), frame.wire_size(true));

        let (parsed, consumed) = Frame::parse(&buf).unwrap();
        prop_assert_eq!(consumed, buf.len());
        prop_assert_eq!(parsed.fin, fin);
        prop_assert_eq!(parsed.opcode, opcode);
        prop_assert_eq!(parsed.payload(), frame.payload());
    }

    #[test]
    fn test_truncated_frame_is_incomplete(
        payload in prop::collection::vec(any::<u8>(), 1..300),
        cut in any::<prop::sample::Index>()
    ) {
        let frame = Frame::binary(payload);
        let mut buf = BytesMut::new();
        frame.encode(&mut buf, None);
        let end = cut.index(buf.len());
        let err = Frame::parse(&buf[..end]).unwrap_err();
        prop_assert!(
            matches!(err, wsrelay::Error::IncompleteFrame { .. }),
            "unexpected error: {:?}", err
        );
    }

    #[test]
    fn test_request_head_parse_never_panics(data in prop::collection::vec(any::<u8>(), 0..1024)) {
        let _ = RequestHead::parse(&data);
    }

    #[test]
    fn test_message_fields_survive_wire(message in message_strategy()) {
        let decoded = Message::decode(message.encode().as_bytes()).unwrap();
        prop_assert_eq!(decoded.iat, message.iat);
        prop_assert_eq!(&decoded, &message);
    }

    #[test]
    fn test_iat_stays_an_integer(iat in any::<i64>()) {
        let mut message = Message::user("A", "hi");
        message.iat = iat;
        let json: serde_json::Value = serde_json::from_str(&message.encode()).unwrap();
        prop_assert_eq!(json["iat"].as_i64(), Some(iat));
    }

    #[test]
    fn test_fan_out_reaches_everyone_but_sender(
        size in 2usize..40,
        sender in any::<prop::sample::Index>()
    ) {
        let registry = Arc::new(ConnectionRegistry::new());
        let relay = BroadcastRelay::new(Arc::clone(&registry));

        let mut peers = Vec::new();
        for _ in 0..size {
            let (peer, queue) = Peer::new(registry.next_id());
            relay.on_connect(Arc::clone(&peer));
            peers.push((peer, queue));
        }
        // Join notices.
        for (_, queue) in &mut peers {
            while queue.try_recv().is_ok() {}
        }

        let from = sender.index(size);
        let text = Message::user("someone", "hello").encode();
        let delivered = relay.on_receive(peers[from].0.id(), text.as_bytes()).unwrap();
        prop_assert_eq!(delivered, size - 1);

        for (i, (_, queue)) in peers.iter_mut().enumerate() {
            let got = queue.try_recv();
            if i == from {
                prop_assert!(got.is_err());
            } else {
                match got {
                    Ok(Outbound::Text(body)) => prop_assert_eq!(&*body, text.as_str()),
                    other => prop_assert!(false, "peer {} got {:?}", i, other),
                }
            }
        }
    }
}
