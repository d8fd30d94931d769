use std::path::PathBuf;

use vesper_shared::{VesperError, VesperResult};

/// Port as configured: a number, the string `"auto"`, or a numeric string.
/// Resolution to a concrete bind strategy happens eagerly in
/// [`ServerConfig::validate`], before any socket is touched.
#[derive(Debug, Clone, PartialEq)]
pub enum PortValue {
    Auto,
    Number(i64),
    Text(String),
}

impl PortValue {
    /// The concrete bind strategy. Out-of-range values fail fast with a
    /// descriptive message.
    pub fn resolve(&self) -> VesperResult<PortMode> {
        match self {
            PortValue::Auto => Ok(PortMode::Auto),
            PortValue::Number(n) => Self::check_range(*n),
            PortValue::Text(s) if s == "auto" => Ok(PortMode::Auto),
            PortValue::Text(s) => match s.parse::<i64>() {
                Ok(n) => Self::check_range(n),
                Err(_) => Err(VesperError::Configuration(format!(
                    "port is not a number or \"auto\": {:?}",
                    s
                ))),
            },
        }
    }

    fn check_range(n: i64) -> VesperResult<PortMode> {
        if (0..65536).contains(&n) {
            Ok(PortMode::Fixed(n as u16))
        } else {
            Err(VesperError::Configuration(
                "port should be >= 0 and < 65536".to_string(),
            ))
        }
    }
}

impl From<u16> for PortValue {
    fn from(port: u16) -> Self {
        PortValue::Number(i64::from(port))
    }
}

impl From<i64> for PortValue {
    fn from(port: i64) -> Self {
        PortValue::Number(port)
    }
}

impl From<&str> for PortValue {
    fn from(port: &str) -> Self {
        PortValue::Text(port.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortMode {
    /// Bind this port or fail.
    Fixed(u16),
    /// Search upward from the default base port for a free one.
    Auto,
}

/// Client-display hints, forwarded verbatim in handshake protocol messages.
#[derive(Debug, Clone)]
pub struct ClientHints {
    /// Show the in-page error overlay.
    pub overlay: bool,
    /// Report build progress in the client console.
    pub progress: bool,
    /// Client console verbosity.
    pub logging: String,
}

impl Default for ClientHints {
    fn default() -> Self {
        Self {
            overlay: true,
            progress: false,
            logging: "info".to_string(),
        }
    }
}

/// Configuration for the dev server. Every recognized option with its
/// default; validated eagerly at startup rather than on first use.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The IP address or hostname the server binds.
    pub host: String,
    /// The TCP port, `"auto"`, or a numeric string.
    pub port: PortValue,
    /// Push hot-update notifications to clients.
    pub hot: bool,
    /// Tell clients to reload the page on content changes.
    pub live_reload: bool,
    /// Install SIGINT/SIGTERM handlers that stop the server.
    pub setup_exit_signals: bool,
    /// Render build errors as an HTML page instead of a plain failure.
    pub errors_as_page: bool,
    /// Disk directory serving paths the build output does not cover.
    pub static_root: Option<PathBuf>,
    /// Extra paths watched outside the pipeline; changes broadcast
    /// `content-changed`.
    pub watch_paths: Vec<PathBuf>,
    pub client: ClientHints,
}

impl ServerConfig {
    pub fn new() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: PortValue::Number(8080),
            hot: true,
            live_reload: true,
            setup_exit_signals: false,
            errors_as_page: true,
            static_root: None,
            watch_paths: Vec::new(),
            client: ClientHints::default(),
        }
    }

    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: impl Into<PortValue>) -> Self {
        self.port = port.into();
        self
    }

    #[must_use]
    pub fn with_hot(mut self, hot: bool) -> Self {
        self.hot = hot;
        self
    }

    #[must_use]
    pub fn with_live_reload(mut self, live_reload: bool) -> Self {
        self.live_reload = live_reload;
        self
    }

    #[must_use]
    pub fn with_exit_signals(mut self, enabled: bool) -> Self {
        self.setup_exit_signals = enabled;
        self
    }

    #[must_use]
    pub fn with_errors_as_page(mut self, enabled: bool) -> Self {
        self.errors_as_page = enabled;
        self
    }

    #[must_use]
    pub fn with_static_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.static_root = Some(root.into());
        self
    }

    #[must_use]
    pub fn with_watch_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.watch_paths.push(path.into());
        self
    }

    #[must_use]
    pub fn with_client(mut self, client: ClientHints) -> Self {
        self.client = client;
        self
    }

    /// Fail-fast validation of the whole option set. Called by `start`
    /// before any resource is acquired.
    pub fn validate(&self) -> VesperResult<PortMode> {
        if self.host.is_empty() {
            return Err(VesperError::Configuration("host must not be empty".into()));
        }
        self.port.resolve()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_and_text_ports_resolve() {
        assert_eq!(
            PortValue::Number(8080).resolve().unwrap(),
            PortMode::Fixed(8080)
        );
        assert_eq!(
            PortValue::from("8080").resolve().unwrap(),
            PortMode::Fixed(8080)
        );
        assert_eq!(PortValue::Number(0).resolve().unwrap(), PortMode::Fixed(0));
        assert_eq!(PortValue::Auto.resolve().unwrap(), PortMode::Auto);
        assert_eq!(PortValue::from("auto").resolve().unwrap(), PortMode::Auto);
    }

    #[test]
    fn out_of_range_ports_fail_with_descriptive_message() {
        for raw in [PortValue::from("-1"), PortValue::from("99999"), PortValue::Number(65536)] {
            let err = raw.resolve().unwrap_err();
            assert!(
                err.to_string().contains("port should be >= 0 and < 65536"),
                "unexpected message: {err}"
            );
        }
    }

    #[test]
    fn garbage_port_text_is_rejected() {
        assert!(PortValue::from("disco").resolve().is_err());
    }

    #[test]
    fn defaults_validate() {
        assert_eq!(
            ServerConfig::new().validate().unwrap(),
            PortMode::Fixed(8080)
        );
    }

    #[test]
    fn empty_host_is_rejected() {
        let config = ServerConfig::new().with_host("");
        assert!(config.validate().is_err());
    }
}
