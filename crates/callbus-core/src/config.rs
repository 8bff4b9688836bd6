//! Bus and engine configuration
//!
//! Two configuration surfaces live here. [`EngineOptions`] renders the
//! opaque initialization string the engine consumes: space-separated
//! protocol prefixes followed by `key=value` tuning options. The bus never
//! interprets that string beyond checking it is non-empty. [`BusConfig`]
//! holds the bus's own timing knobs.
//!
//! # Examples
//!
//! ```rust
//! use callbus_core::config::EngineOptions;
//!
//! let options = EngineOptions::default()
//!     .with_trace_level(4)
//!     .with_trace_file("debugstream");
//! assert_eq!(options.render(), "sip h323 pc TraceLevel=4 TraceFile=debugstream");
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Engine initialization options
///
/// Collects the protocol prefixes to activate and the `key=value` tuning
/// options the engine understands, and renders them into the options
/// string passed through to the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineOptions {
    protocols: Vec<String>,
    options: Vec<(String, String)>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            protocols: vec!["sip".to_string(), "h323".to_string(), "pc".to_string()],
            options: Vec::new(),
        }
    }
}

impl EngineOptions {
    /// Start from an empty option set, with no protocols activated
    pub fn empty() -> Self {
        Self {
            protocols: Vec::new(),
            options: Vec::new(),
        }
    }

    /// Activate a protocol prefix (e.g. "sip", "h323", "pc", "ivr")
    pub fn with_protocol(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        if !self.protocols.contains(&prefix) {
            self.protocols.push(prefix);
        }
        self
    }

    /// Add a `key=value` tuning option
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.push((key.into(), value.into()));
        self
    }

    /// Set the engine trace verbosity
    pub fn with_trace_level(self, level: u8) -> Self {
        self.with_option("TraceLevel", level.to_string())
    }

    /// Set the engine trace output file
    pub fn with_trace_file(self, file: impl Into<String>) -> Self {
        self.with_option("TraceFile", file)
    }

    /// The activated protocol prefixes
    pub fn protocols(&self) -> &[String] {
        &self.protocols
    }

    /// Render the opaque options string the engine consumes
    pub fn render(&self) -> String {
        let mut parts: Vec<String> = self.protocols.clone();
        parts.extend(
            self.options
                .iter()
                .map(|(key, value)| format!("{}={}", key, value)),
        );
        parts.join(" ")
    }
}

impl std::fmt::Display for EngineOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// Timing configuration for the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    /// How long `dispatch` waits for the engine's acknowledgment
    pub dispatch_timeout: Duration,
    /// How long `shutdown` waits for the indication consumer to exit
    pub shutdown_timeout: Duration,
    /// Age after which unresolved correlation entries are swept
    pub correlation_timeout: Duration,
    /// How long each consumer `get_message` call blocks before re-checking
    /// the stop signal
    pub message_poll_interval: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            dispatch_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(5),
            correlation_timeout: Duration::from_secs(30),
            message_poll_interval: Duration::from_millis(500),
        }
    }
}

impl BusConfig {
    /// Set the dispatch acknowledgment timeout
    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    /// Set the consumer shutdown timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the correlation entry timeout
    pub fn with_correlation_timeout(mut self, timeout: Duration) -> Self {
        self.correlation_timeout = timeout;
        self
    }

    /// Set the consumer poll interval
    pub fn with_message_poll_interval(mut self, interval: Duration) -> Self {
        self.message_poll_interval = interval;
        self
    }
}
