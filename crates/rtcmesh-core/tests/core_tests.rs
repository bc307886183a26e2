#[cfg(test)]
mod tests {
    use rtcmesh_core::*;
    use serde_json::json;

    // ── Error tests ────────────────────────────────────────────

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(ErrorKind::AddCandidateFailed.code(), "ERR_ADD_ICE_CANDIDATE");
        assert_eq!(ErrorKind::OperationAfterDestroy.code(), "ERR_PEER_IS_DESTROYED");
        assert_eq!(ErrorKind::NoEligiblePeers.code(), "ERR_NO_PEERS");
        assert_eq!(ErrorKind::UnsupportedTransport.code(), "ERR_WEBRTC_SUPPORT");
    }

    #[test]
    fn test_all_failed_keeps_per_peer_errors() {
        let err = MeshError::all_failed(vec![
            ("a".into(), MeshError::timeout("Request timed out")),
            ("b".into(), MeshError::destroyed("gone")),
        ]);
        assert_eq!(err.kind(), ErrorKind::AllPeersFailed);
        assert_eq!(err.failures().len(), 2);
        assert_eq!(err.failures()[0].0, "a");
        assert_eq!(err.failures()[1].1.kind(), ErrorKind::OperationAfterDestroy);
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: MeshError = io.into();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    // ── Envelope tests ─────────────────────────────────────────

    #[test]
    fn test_envelope_wire_shape() {
        let env = Envelope::request("ping", json!({"n": 1}));
        let value: serde_json::Value = serde_json::from_str(&env.to_text().unwrap()).unwrap();
        assert_eq!(value["type"], "ping");
        assert_eq!(value["payload"]["n"], 1);
        assert_eq!(value["id"], env.id.as_str());
    }

    #[test]
    fn test_response_envelope_reuses_id() {
        let req = Envelope::request("ping", json!(null));
        let res = Envelope::response(req.id.clone(), json!("pong"));
        assert!(res.is_response());
        assert!(!req.is_response());
        assert_eq!(res.id, req.id);
    }

    #[test]
    fn test_envelope_missing_payload_is_null() {
        let env = Envelope::from_text(r#"{"id":"x","type":"hello"}"#).unwrap();
        assert_eq!(env.payload, serde_json::Value::Null);
    }

    #[test]
    fn test_correlation_ids_are_unique() {
        let a = CorrelationId::new();
        let b = CorrelationId::new();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    // ── Signal parsing ─────────────────────────────────────────

    #[test]
    fn test_parse_candidate_object() {
        let signal = json!({
            "candidate": {
                "candidate": "candidate:1 1 udp 2122260223 10.0.0.2 54400 typ host",
                "sdpMid": "0",
                "sdpMLineIndex": 0
            }
        });
        match SignalMessage::parse(&signal) {
            Some(SignalMessage::Candidate(c)) => {
                assert!(c.candidate.starts_with("candidate:1"));
                assert_eq!(c.sdp_mid.as_deref(), Some("0"));
                assert_eq!(c.sdp_mline_index, Some(0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_description_from_string() {
        let raw = json!(r#"{"type":"offer","sdp":"v=0"}"#);
        assert_eq!(
            SignalMessage::parse(&raw),
            Some(SignalMessage::Description(SessionDescription::offer("v=0")))
        );
    }

    #[test]
    fn test_parse_renegotiate() {
        assert_eq!(
            SignalMessage::parse(&json!({"renegotiate": true})),
            Some(SignalMessage::Renegotiate)
        );
        assert_eq!(SignalMessage::parse(&json!({"renegotiate": false})), None);
    }

    #[test]
    fn test_parse_rejects_other_shapes() {
        assert_eq!(SignalMessage::parse(&json!({})), None);
        assert_eq!(SignalMessage::parse(&json!({"hello": 1})), None);
        assert_eq!(SignalMessage::parse(&json!("not json")), None);
        assert_eq!(SignalMessage::parse(&json!({"sdp": "v=0", "type": "bogus"})), None);
    }

    #[test]
    fn test_signal_to_value() {
        let v = SignalMessage::Description(SessionDescription::answer("v=0")).to_value();
        assert_eq!(v, json!({"type": "answer", "sdp": "v=0"}));
        assert_eq!(SignalMessage::Renegotiate.to_value(), json!({"renegotiate": true}));
    }

    // ── Signaling protocol ─────────────────────────────────────

    #[test]
    fn test_signaling_message_tags() {
        let msg = SignalingMessage::Discover(PeerRef { peer_name: "alice".into() });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"type": "discover", "payload": {"peerName": "alice"}}));
    }

    #[test]
    fn test_relayed_data_is_flat() {
        let raw = json!({
            "type": "data",
            "payload": {"peerName": "bob", "id": "42", "type": "ping", "payload": {"x": 1}}
        });
        match serde_json::from_value::<SignalingMessage>(raw).unwrap() {
            SignalingMessage::Data(relayed) => {
                assert_eq!(relayed.peer_name, "bob");
                assert_eq!(relayed.envelope.kind, "ping");
                assert_eq!(relayed.envelope.id.as_str(), "42");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_signaling_frames_always_carry_payload() {
        let ping: serde_json::Value =
            serde_json::from_str(&SignalingMessage::Ping.to_text().unwrap()).unwrap();
        assert_eq!(ping, json!({"type": "ping", "payload": null}));

        let discover = SignalingMessage::Discover(PeerRef {
            peer_name: "alice".into(),
        });
        let value: serde_json::Value = serde_json::from_str(&discover.to_text().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "discover", "payload": {"peerName": "alice"}}));
    }

    #[test]
    fn test_default_ice_servers() {
        let config = PeerConnectionConfig::default();
        assert_eq!(config.ice_servers.len(), 2);
        assert_eq!(config.ice_servers[0].urls[0], "stun:stun.l.google.com:19302");
        assert_eq!(DataChannelConfig::default().label, "data");
    }

    // ── Emitter tests ──────────────────────────────────────────

    #[tokio::test]
    async fn test_emitter_fans_out() {
        let emitter: Emitter<u32> = Emitter::new();
        let mut a = emitter.subscribe();
        let mut b = emitter.subscribe();
        assert_eq!(emitter.emit(7), 2);
        assert_eq!(a.recv().await, Some(7));
        assert_eq!(b.recv().await, Some(7));
    }

    #[tokio::test]
    async fn test_emitter_prunes_dropped_listeners() {
        let emitter: Emitter<&'static str> = Emitter::new();
        let kept = emitter.subscribe();
        drop(emitter.subscribe());
        assert_eq!(emitter.emit("x"), 1);
        assert_eq!(emitter.listener_count(), 1);
        drop(kept);
        assert_eq!(emitter.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_emitter_close_ends_streams() {
        let emitter: Emitter<u8> = Emitter::new();
        let mut rx = emitter.subscribe();
        emitter.close();
        assert_eq!(rx.recv().await, None);
    }
}
