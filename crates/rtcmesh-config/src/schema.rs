use rtcmesh_core::{DataChannelConfig, PeerConnectionConfig};
use serde::{Deserialize, Serialize};

/// Root configuration, maps to `rtcmesh.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RtcMeshConfig {
    pub mesh: MeshConfig,
    pub logging: LoggingConfig,
}

// ── Mesh ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Name this node announces to the signaling server. Required by `rtcmesh join`
    /// unless passed with `--name`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_name: Option<String>,
    /// Websocket URL of the signaling server.
    pub signal_server: String,
    /// How long a negotiation round may stall before the peer falls back to relay.
    pub fallback_delay_ms: u64,
    /// Default RPC timeout.
    pub request_timeout_ms: u64,
    /// Emit candidates as they are gathered instead of waiting for gathering to finish.
    pub trickle_ice: bool,
    /// Interval between `ping` messages on the signaling socket.
    pub keepalive_interval_ms: u64,
    pub peer_connection: PeerConnectionConfig,
    pub data_channel: DataChannelConfig,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            peer_name: None,
            signal_server: "ws://localhost:8080".into(),
            fallback_delay_ms: 5000,
            request_timeout_ms: 10_000,
            trickle_ice: true,
            keepalive_interval_ms: 10_000,
            peer_connection: PeerConnectionConfig::default(),
            data_channel: DataChannelConfig::default(),
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "pretty", "compact" or "json".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let icon = match self.severity {
            WarningSeverity::Error => "❌",
            WarningSeverity::Warning => "⚠️ ",
            WarningSeverity::Info => "💡",
        };
        write!(f, "{} {}: {}", icon, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, "\n   ↳ {}", h)?;
        }
        Ok(())
    }
}

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_LOG_FORMATS: [&str; 3] = ["pretty", "compact", "json"];
const VALID_ICE_SCHEMES: [&str; 4] = ["stun:", "stuns:", "turn:", "turns:"];

impl RtcMeshConfig {
    /// Collect every validation issue without failing.
    pub fn check(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mesh = &self.mesh;

        // ── Signal server ───
        match url::Url::parse(&mesh.signal_server) {
            Ok(url) if matches!(url.scheme(), "ws" | "wss") => {
                if url.scheme() == "ws" && !is_local_host(url.host_str()) {
                    warnings.push(ConfigWarning {
                        field: "mesh.signal_server".into(),
                        message: "signaling traffic to a remote host is unencrypted".into(),
                        severity: WarningSeverity::Info,
                        hint: Some("Use a wss:// URL for servers outside this machine".into()),
                    });
                }
            }
            Ok(url) => warnings.push(ConfigWarning {
                field: "mesh.signal_server".into(),
                message: format!("unsupported scheme '{}'", url.scheme()),
                severity: WarningSeverity::Error,
                hint: Some("The signaling server must be a ws:// or wss:// URL".into()),
            }),
            Err(e) => warnings.push(ConfigWarning {
                field: "mesh.signal_server".into(),
                message: format!("'{}' is not a valid URL: {}", mesh.signal_server, e),
                severity: WarningSeverity::Error,
                hint: Some("e.g. ws://localhost:8080".into()),
            }),
        }

        // ── Timers ───
        if mesh.fallback_delay_ms == 0 {
            warnings.push(ConfigWarning {
                field: "mesh.fallback_delay_ms".into(),
                message: "fallback delay is 0".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 5000 so direct negotiation gets a chance".into()),
            });
        }
        if mesh.request_timeout_ms == 0 {
            warnings.push(ConfigWarning {
                field: "mesh.request_timeout_ms".into(),
                message: "request timeout is 0, every request would time out".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 10000".into()),
            });
        }
        if mesh.keepalive_interval_ms == 0 {
            warnings.push(ConfigWarning {
                field: "mesh.keepalive_interval_ms".into(),
                message: "keepalive interval is 0".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 10000".into()),
            });
        }

        // ── ICE servers ───
        if mesh.peer_connection.ice_servers.is_empty() {
            warnings.push(ConfigWarning {
                field: "mesh.peer_connection.ice_servers".into(),
                message: "no ICE servers configured".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Peers behind NAT will only connect through the relay fallback".into()),
            });
        }
        for (i, server) in mesh.peer_connection.ice_servers.iter().enumerate() {
            if server.urls.is_empty() {
                warnings.push(ConfigWarning {
                    field: format!("mesh.peer_connection.ice_servers[{}].urls", i),
                    message: "server has no urls".into(),
                    severity: WarningSeverity::Error,
                    hint: None,
                });
            }
            for url in &server.urls {
                if !VALID_ICE_SCHEMES.iter().any(|s| url.starts_with(s)) {
                    warnings.push(ConfigWarning {
                        field: format!("mesh.peer_connection.ice_servers[{}].urls", i),
                        message: format!("'{}' is not a STUN or TURN url", url),
                        severity: WarningSeverity::Error,
                        hint: Some(format!("Valid schemes: {}", VALID_ICE_SCHEMES.join(" "))),
                    });
                } else if url.starts_with("turn") && server.credential.is_none() {
                    warnings.push(ConfigWarning {
                        field: format!("mesh.peer_connection.ice_servers[{}].credential", i),
                        message: format!("TURN server '{}' has no credential", url),
                        severity: WarningSeverity::Warning,
                        hint: Some("Most TURN servers require username and credential".into()),
                    });
                }
            }
        }

        // ── Data channel ───
        if mesh.data_channel.label.is_empty() {
            warnings.push(ConfigWarning {
                field: "mesh.data_channel.label".into(),
                message: "data channel label is empty".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Defaults to 'data'".into()),
            });
        }

        // ── Logging ───
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", VALID_LOG_LEVELS.join(", "))),
            });
        }
        if !VALID_LOG_FORMATS.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", VALID_LOG_FORMATS.join(", "))),
            });
        }

        warnings
    }

    /// Validate the config and return a list of warnings/errors.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let warnings = self.check();

        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }
}

fn is_local_host(host: Option<&str>) -> bool {
    matches!(host, Some("localhost" | "127.0.0.1" | "[::1]" | "::1"))
}
