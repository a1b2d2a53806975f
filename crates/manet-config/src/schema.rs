use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration, maps to `manet.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManetConfig {
    pub network: NetworkConfig,
    pub registry: RegistryConfig,
    pub devices: DevicesConfig,
    pub logging: LoggingConfig,
}

// ── Network ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address routers and devices bind to. "auto" picks the host's
    /// outbound IPv4 address.
    pub address: String,
    /// First router port; later routers take `base_port + k * port_stride`.
    pub base_port: u16,
    /// Size of each router's port block. A router's devices use the ports
    /// directly after the router's own.
    pub port_stride: u16,
    /// Largest accepted frame payload in bytes.
    pub max_frame_bytes: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".into(),
            base_port: 5000,
            port_stride: 1000,
            max_frame_bytes: 64 * 1024,
        }
    }
}

impl NetworkConfig {
    /// Resolve `address`, turning "auto" into the host's outbound IPv4 address.
    ///
    /// The lookup connects a UDP socket (no packet is sent) and reads back the
    /// local address the OS picked for it.
    pub fn resolved_address(&self) -> std::io::Result<String> {
        if self.address != "auto" {
            return Ok(self.address.clone());
        }
        let socket = std::net::UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("192.255.255.255:1")?;
        Ok(socket.local_addr()?.ip().to_string())
    }
}

// ── Registry ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Shared file listing active routers, one `id,address,port` row each.
    pub path: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("routers.txt"),
        }
    }
}

// ── Devices ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DevicesConfig {
    /// Devices each router creates.
    pub count: u32,
    /// Broadcast radius shared by every device.
    pub radius: u32,
    /// Rectangle device coordinates are drawn from.
    pub grid: GridBounds,
    /// Delay between a device binding its socket and sending discovery.
    pub startup_delay_ms: u64,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            count: 50,
            radius: 10,
            grid: GridBounds::default(),
            startup_delay_ms: 1000,
        }
    }
}

/// Inclusive coordinate bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridBounds {
    pub min_x: i64,
    pub max_x: i64,
    pub min_y: i64,
    pub max_y: i64,
}

impl Default for GridBounds {
    fn default() -> Self {
        Self {
            min_x: 0,
            max_x: 100,
            min_y: 0,
            max_y: 100,
        }
    }
}

impl std::str::FromStr for GridBounds {
    type Err = String;

    /// Parse `min_x,max_x,min_y,max_y`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<i64> = s
            .split(',')
            .map(|p| p.trim().parse::<i64>())
            .collect::<Result<_, _>>()
            .map_err(|e| format!("invalid grid '{s}': {e}"))?;
        match parts.as_slice() {
            [min_x, max_x, min_y, max_y] => Ok(Self {
                min_x: *min_x,
                max_x: *max_x,
                min_y: *min_y,
                max_y: *max_y,
            }),
            _ => Err(format!(
                "invalid grid '{s}': expected min_x,max_x,min_y,max_y"
            )),
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
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
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
        };
        write!(f, "{} {}: {}", label, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, "\n   ↳ {}", h)?;
        }
        Ok(())
    }
}

impl ManetConfig {
    /// Validate the config and return a list of warnings/errors.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        // ── Device count ───
        if self.devices.count < 1 {
            warnings.push(ConfigWarning {
                field: "devices.count".into(),
                message: "a router needs at least one device".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 50".into()),
            });
        } else if self.devices.count >= u32::from(self.network.port_stride) {
            warnings.push(ConfigWarning {
                field: "devices.count".into(),
                message: format!(
                    "{} devices do not fit in a port block of {}",
                    self.devices.count, self.network.port_stride
                ),
                severity: WarningSeverity::Error,
                hint: Some("Lower devices.count or raise network.port_stride".into()),
            });
        }

        // ── Radius ───
        if self.devices.radius < 1 {
            warnings.push(ConfigWarning {
                field: "devices.radius".into(),
                message: "radius must be positive".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 10".into()),
            });
        }

        // ── Grid ───
        let grid = &self.devices.grid;
        if [grid.min_x, grid.max_x, grid.min_y, grid.max_y]
            .iter()
            .any(|v| *v < 0)
        {
            warnings.push(ConfigWarning {
                field: "devices.grid".into(),
                message: "no grid bound may be negative".into(),
                severity: WarningSeverity::Error,
                hint: None,
            });
        }
        if grid.min_x > grid.max_x || grid.min_y > grid.max_y {
            warnings.push(ConfigWarning {
                field: "devices.grid".into(),
                message: format!(
                    "empty grid x {}..{}, y {}..{}",
                    grid.min_x, grid.max_x, grid.min_y, grid.max_y
                ),
                severity: WarningSeverity::Error,
                hint: Some("Each minimum must not exceed its maximum".into()),
            });
        }

        // ── Ports ───
        if self.network.base_port == 0 {
            warnings.push(ConfigWarning {
                field: "network.base_port".into(),
                message: "base port is 0".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 5000".into()),
            });
        }
        if self.network.port_stride == 0 {
            warnings.push(ConfigWarning {
                field: "network.port_stride".into(),
                message: "port stride is 0, so every router would claim the same port".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 1000".into()),
            });
        }
        if self.network.max_frame_bytes < 256 {
            warnings.push(ConfigWarning {
                field: "network.max_frame_bytes".into(),
                message: format!("{} bytes cannot hold a packet", self.network.max_frame_bytes),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 65536".into()),
            });
        }

        // ── Address ───
        if self.network.address.is_empty() {
            warnings.push(ConfigWarning {
                field: "network.address".into(),
                message: "address is empty".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Use '127.0.0.1' or 'auto'".into()),
            });
        }

        // ── Logging format ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }

        // ── Logging level ───
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_levels.join(", "))),
            });
        }

        // Check for hard errors
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
