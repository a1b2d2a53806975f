#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use manet_core::wire::{decode_frame, decode_frame_with, encode_frame, MARKER_REBROADCAST};
    use manet_core::*;
    use tokio_util::codec::Decoder;

    fn table() -> RoutingTable {
        [
            ("R1D2".to_string(), RoutingEntry::new("R1D2", 1)),
            ("R2D7".to_string(), RoutingEntry::new("R1D2", 3)),
        ]
        .into_iter()
        .collect()
    }

    fn directed() -> Packet {
        Packet::directed(
            "R1D1",
            Coordinate::new(12, -4),
            10,
            "R1D2",
            "R2D7",
            table(),
            2,
        )
    }

    fn frame(marker: u8, body: &[u8]) -> Vec<u8> {
        let mut out = ((body.len() + 1) as u32).to_be_bytes().to_vec();
        out.push(marker);
        out.extend_from_slice(body);
        out
    }

    // ── Coordinate tests ───────────────────────────────────────

    #[test]
    fn test_within_is_strict() {
        let origin = Coordinate::new(0, 0);
        assert!(origin.within(&Coordinate::new(9, 0), 10));
        assert!(!origin.within(&Coordinate::new(10, 0), 10));
        assert!(!origin.within(&Coordinate::new(6, 8), 10));
        assert!(origin.within(&Coordinate::new(6, 7), 10));
    }

    #[test]
    fn test_distance() {
        let d = Coordinate::new(0, 0).distance_to(&Coordinate::new(3, 4));
        assert!((d - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_within_large_coordinates_does_not_overflow() {
        let a = Coordinate::new(i64::MIN, i64::MIN);
        let b = Coordinate::new(i64::MAX, i64::MAX);
        assert!(!a.within(&b, u32::MAX));
    }

    // ── Routing table tests ────────────────────────────────────

    #[test]
    fn test_offer_adds_unknown() {
        let mut t = RoutingTable::new();
        assert_eq!(t.offer("B", RoutingEntry::new("B", 1)), TableUpdate::Added);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_offer_only_accepts_strictly_shorter() {
        let mut t = RoutingTable::new();
        t.offer("C", RoutingEntry::new("B", 3));
        assert_eq!(t.offer("C", RoutingEntry::new("D", 3)), TableUpdate::Rejected);
        assert_eq!(t.offer("C", RoutingEntry::new("D", 5)), TableUpdate::Rejected);
        assert_eq!(t.get("C"), Some(&RoutingEntry::new("B", 3)));

        let update = t.offer("C", RoutingEntry::new("E", 2));
        assert_eq!(
            update,
            TableUpdate::Improved {
                previous: RoutingEntry::new("B", 3)
            }
        );
        assert_eq!(t.get("C"), Some(&RoutingEntry::new("E", 2)));
    }

    #[test]
    fn test_table_display() {
        assert_eq!(RoutingTable::new().to_string(), "  (empty)");
        let rendered = table().to_string();
        assert_eq!(rendered.lines().count(), 2);
        assert!(rendered.contains("R2D7"));
    }

    #[test]
    fn test_table_serializes_as_map() {
        let json = serde_json::to_value(table()).unwrap();
        assert_eq!(json["R2D7"]["next_hop"], "R1D2");
        assert_eq!(json["R2D7"]["hop_count"], 3);
    }

    // ── Packet validation ──────────────────────────────────────

    #[test]
    fn test_discovery_shape() {
        let p = Packet::discovery("A", Coordinate::new(1, 1), 5, RoutingTable::new());
        assert!(p.is_broadcast());
        assert_eq!(p.hop_count, 1);
        assert!(p.target_id.is_empty());
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_fields() {
        let mut p = directed();
        p.sender_id.clear();
        assert!(matches!(
            p.validate(),
            Err(CodecError::Invalid { field: "sender_id", .. })
        ));

        let mut p = directed();
        p.hop_count = 0;
        assert!(matches!(
            p.validate(),
            Err(CodecError::Invalid { field: "hop_count", .. })
        ));

        let mut p = directed();
        p.next_hop_id.clear();
        assert!(matches!(
            p.validate(),
            Err(CodecError::Invalid { field: "target_id", .. })
        ));

        let mut p = directed();
        p.sender_table = [("X".to_string(), RoutingEntry::new("", 1))]
            .into_iter()
            .collect();
        assert!(matches!(
            p.validate(),
            Err(CodecError::Invalid { field: "sender_table", .. })
        ));
    }

    // ── Codec tests ────────────────────────────────────────────

    #[test]
    fn test_codec_round_trip() {
        let fresh = Envelope::new(directed());
        assert_eq!(decode_frame(&encode_frame(&fresh).unwrap()).unwrap(), fresh);

        let marked = fresh.marked();
        let bytes = encode_frame(&marked).unwrap();
        assert_eq!(bytes[4], MARKER_REBROADCAST);
        let decoded = decode_frame(&bytes).unwrap();
        assert!(decoded.rebroadcast);
        assert_eq!(decoded.packet, directed());
    }

    #[test]
    fn test_reencoding_decoded_frame_is_identical() {
        let bytes = encode_frame(&Envelope::new(directed())).unwrap();
        let again = encode_frame(&decode_frame(&bytes).unwrap()).unwrap();
        assert_eq!(bytes, again);
    }

    #[test]
    fn test_encode_rejects_invalid_packet() {
        let mut p = directed();
        p.hop_count = 0;
        assert!(encode_frame(&Envelope::new(p)).is_err());
    }

    #[test]
    fn test_decode_truncated() {
        let bytes = encode_frame(&Envelope::new(directed())).unwrap();
        let cut = &bytes[..bytes.len() - 3];
        assert!(matches!(
            decode_frame(cut),
            Err(CodecError::Truncated { .. })
        ));
        assert!(matches!(
            decode_frame(&bytes[..2]),
            Err(CodecError::Truncated { expected: 4, actual: 2 })
        ));
        assert!(matches!(decode_frame(&[]), Err(CodecError::Truncated { .. })));
    }

    #[test]
    fn test_decode_trailing_bytes() {
        let mut bytes = encode_frame(&Envelope::new(directed())).unwrap().to_vec();
        bytes.extend_from_slice(b"xyz");
        assert!(matches!(
            decode_frame(&bytes),
            Err(CodecError::TrailingBytes(3))
        ));
    }

    #[test]
    fn test_decode_unknown_marker() {
        let body = serde_json::to_vec(&directed()).unwrap();
        assert!(matches!(
            decode_frame(&frame(b'!', &body)),
            Err(CodecError::UnknownMarker(b'!'))
        ));
    }

    #[test]
    fn test_decode_empty_frame() {
        assert!(matches!(
            decode_frame(&[0, 0, 0, 0]),
            Err(CodecError::EmptyFrame)
        ));
    }

    #[test]
    fn test_decode_rejects_expression_text() {
        // A body that is not a JSON object is never interpreted.
        let body = b"('A', (0, 0), 10, '', '', {}, 1)";
        assert!(matches!(
            decode_frame(&frame(0, body)),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_and_missing_fields() {
        let mut value = serde_json::to_value(directed()).unwrap();
        value["extra"] = serde_json::json!(1);
        let body = serde_json::to_vec(&value).unwrap();
        assert!(matches!(
            decode_frame(&frame(0, &body)),
            Err(CodecError::Malformed(_))
        ));

        let mut value = serde_json::to_value(directed()).unwrap();
        value.as_object_mut().unwrap().remove("sender_coord");
        let body = serde_json::to_vec(&value).unwrap();
        assert!(matches!(
            decode_frame(&frame(0, &body)),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_rejects_wrong_types() {
        let mut value = serde_json::to_value(directed()).unwrap();
        value["sender_radius"] = serde_json::json!("ten");
        let body = serde_json::to_vec(&value).unwrap();
        assert!(decode_frame(&frame(0, &body)).is_err());

        let mut value = serde_json::to_value(directed()).unwrap();
        value["hop_count"] = serde_json::json!(-1);
        let body = serde_json::to_vec(&value).unwrap();
        assert!(decode_frame(&frame(0, &body)).is_err());
    }

    #[test]
    fn test_decode_validates_after_parsing() {
        let mut value = serde_json::to_value(directed()).unwrap();
        value["hop_count"] = serde_json::json!(0);
        let body = serde_json::to_vec(&value).unwrap();
        assert!(matches!(
            decode_frame(&frame(0, &body)),
            Err(CodecError::Invalid { field: "hop_count", .. })
        ));
    }

    #[test]
    fn test_frame_size_limit() {
        let mut codec = PacketCodec::new(64);
        let bytes = encode_frame(&Envelope::new(directed())).unwrap();
        assert!(matches!(
            decode_frame_with(&mut codec, &bytes),
            Err(CodecError::FrameTooLarge { max: 64, .. })
        ));
    }

    #[test]
    fn test_decoder_waits_for_full_frame() {
        let bytes = encode_frame(&Envelope::new(directed())).unwrap();
        let mut codec = PacketCodec::default();
        let mut buf = BytesMut::new();

        buf.extend_from_slice(&bytes[..3]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&bytes[3..10]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&bytes[10..]);
        let envelope = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(envelope.packet, directed());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decoder_splits_back_to_back_frames() {
        let first = encode_frame(&Envelope::new(directed())).unwrap();
        let second = encode_frame(&Envelope::new(directed()).marked()).unwrap();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&first);
        buf.extend_from_slice(&second);

        let mut codec = PacketCodec::default();
        assert!(!codec.decode(&mut buf).unwrap().unwrap().rebroadcast);
        assert!(codec.decode(&mut buf).unwrap().unwrap().rebroadcast);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    // ── Error conversion ───────────────────────────────────────

    #[test]
    fn test_codec_error_converts_into_manet_error() {
        let err: ManetError = CodecError::EmptyFrame.into();
        assert!(matches!(err, ManetError::Codec(CodecError::EmptyFrame)));
        assert!(err.to_string().contains("zero length"));
    }
}
