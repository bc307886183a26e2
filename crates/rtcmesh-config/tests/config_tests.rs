#[cfg(test)]
mod tests {
    use rtcmesh_config::ConfigLoader;
    use rtcmesh_config::schema::*;
    use rtcmesh_core::{ErrorKind, IceServer};
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    // ── Default tests ──────────────────────────────────────────

    #[test]
    fn test_mesh_config_defaults() {
        let config = MeshConfig::default();
        assert!(config.peer_name.is_none());
        assert_eq!(config.signal_server, "ws://localhost:8080");
        assert_eq!(config.fallback_delay_ms, 5000);
        assert_eq!(config.request_timeout_ms, 10_000);
        assert!(config.trickle_ice);
        assert_eq!(config.keepalive_interval_ms, 10_000);
        assert_eq!(config.peer_connection.ice_servers.len(), 2);
        assert!(config.data_channel.ordered);
    }

    #[test]
    fn test_logging_config_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, "pretty");
    }

    #[test]
    fn test_defaults_validate_cleanly() {
        let warnings = RtcMeshConfig::default().validate().unwrap();
        assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
    }

    // ── TOML tests ─────────────────────────────────────────────

    #[test]
    fn test_config_toml_roundtrip() {
        let config = RtcMeshConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let restored: RtcMeshConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(restored.mesh.signal_server, config.mesh.signal_server);
        assert_eq!(restored.mesh.peer_connection, config.mesh.peer_connection);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let raw = r#"
            [mesh]
            peer_name = "alice"
            fallback_delay_ms = 2500

            [[mesh.peer_connection.ice_servers]]
            urls = ["turn:turn.example.com:3478"]
            username = "u"
            credential = "p"
        "#;
        let config: RtcMeshConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.mesh.peer_name.as_deref(), Some("alice"));
        assert_eq!(config.mesh.fallback_delay_ms, 2500);
        assert_eq!(config.mesh.request_timeout_ms, 10_000);
        assert_eq!(config.mesh.peer_connection.ice_servers.len(), 1);
        assert_eq!(config.logging.level, "info");
    }

    // ── Validation tests ───────────────────────────────────────

    #[test]
    fn test_rejects_http_signal_server() {
        let mut config = RtcMeshConfig::default();
        config.mesh.signal_server = "http://localhost:8080".into();
        let err = config.validate().unwrap_err();
        assert!(err.contains("mesh.signal_server"));
    }

    #[test]
    fn test_rejects_zero_timers() {
        let mut config = RtcMeshConfig::default();
        config.mesh.fallback_delay_ms = 0;
        config.mesh.request_timeout_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.contains("fallback_delay_ms"));
        assert!(err.contains("request_timeout_ms"));
    }

    #[test]
    fn test_rejects_bad_ice_scheme() {
        let mut config = RtcMeshConfig::default();
        config.mesh.peer_connection.ice_servers = vec![IceServer::stun("http://stun.example.com")];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_ice_list_only_warns() {
        let mut config = RtcMeshConfig::default();
        config.mesh.peer_connection.ice_servers.clear();
        let warnings = config.validate().unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].severity, WarningSeverity::Warning);
    }

    #[test]
    fn test_remote_plain_ws_is_info() {
        let mut config = RtcMeshConfig::default();
        config.mesh.signal_server = "ws://signal.example.com".into();
        let warnings = config.validate().unwrap();
        assert!(warnings.iter().any(|w| w.severity == WarningSeverity::Info));
    }

    #[test]
    fn test_unknown_log_format_warns() {
        let mut config = RtcMeshConfig::default();
        config.logging.format = "xml".into();
        let warnings = config.validate().unwrap();
        assert_eq!(warnings[0].field, "logging.format");
    }

    #[test]
    fn test_warning_display() {
        let w = ConfigWarning {
            field: "mesh.fallback_delay_ms".into(),
            message: "fallback delay is 0".into(),
            severity: WarningSeverity::Error,
            hint: Some("Set to e.g. 5000".into()),
        };
        let shown = w.to_string();
        assert!(shown.contains("mesh.fallback_delay_ms: fallback delay is 0"));
        assert!(shown.contains("↳ Set to e.g. 5000"));
    }

    // ── Env override tests ─────────────────────────────────────

    #[test]
    fn test_env_overrides_apply() {
        let config = ConfigLoader::apply_overrides(
            RtcMeshConfig::default(),
            lookup(&[
                ("RTCMESH_PEER_NAME", "bob"),
                ("RTCMESH_SIGNAL_SERVER", "wss://signal.example.com"),
                ("RTCMESH_FALLBACK_DELAY_MS", "1500"),
                ("RTCMESH_TRICKLE_ICE", "off"),
                ("RTCMESH_LOG_LEVEL", "debug"),
            ]),
        );
        assert_eq!(config.mesh.peer_name.as_deref(), Some("bob"));
        assert_eq!(config.mesh.signal_server, "wss://signal.example.com");
        assert_eq!(config.mesh.fallback_delay_ms, 1500);
        assert!(!config.mesh.trickle_ice);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_invalid_env_values_are_ignored() {
        let config = ConfigLoader::apply_overrides(
            RtcMeshConfig::default(),
            lookup(&[
                ("RTCMESH_FALLBACK_DELAY_MS", "soon"),
                ("RTCMESH_TRICKLE_ICE", "maybe"),
            ]),
        );
        assert_eq!(config.mesh.fallback_delay_ms, 5000);
        assert!(config.mesh.trickle_ice);
    }

    // ── Loader tests ───────────────────────────────────────────

    #[test]
    fn test_resolve_explicit_path() {
        let p = std::path::Path::new("/tmp/custom.toml");
        assert_eq!(ConfigLoader::resolve_path(Some(p)), p);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[mesh]\npeer_name = \"carol\"\nsignal_server = \"ws://127.0.0.1:9000\"\n"
        )
        .unwrap();
        let loader = ConfigLoader::load(Some(file.path())).unwrap();
        let config = loader.get();
        assert_eq!(config.mesh.signal_server, "ws://127.0.0.1:9000");
        assert_eq!(loader.path(), file.path());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(loader.get().mesh.fallback_delay_ms, 5000);
    }

    #[test]
    fn test_load_invalid_toml_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[mesh\nbroken").unwrap();
        let err = ConfigLoader::load(Some(file.path())).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[mesh]\nrequest_timeout_ms = 0").unwrap();
        let err = ConfigLoader::load(Some(file.path())).err().unwrap();
        assert!(err.message().contains("request_timeout_ms"));
    }

    #[test]
    fn test_reload_picks_up_changes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[mesh]\nfallback_delay_ms = 1000").unwrap();
        let loader = ConfigLoader::load(Some(file.path())).unwrap();
        assert_eq!(loader.get().mesh.fallback_delay_ms, 1000);

        std::fs::write(file.path(), "[mesh]\nfallback_delay_ms = 3000\n").unwrap();
        loader.reload().unwrap();
        assert_eq!(loader.shared().read().mesh.fallback_delay_ms, 3000);
    }
}
