/// Launch/attach configuration (§6 External Interfaces).
///
/// Deserialized straight out of the `launch`/`attach` request's `arguments`
/// body. Every field documents its default so `LaunchConfig::default()`
/// matches what §6's table says happens when an option is omitted.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_gdb() -> String {
    "gdb".to_string()
}

fn default_target_type() -> String {
    "remote".to_string()
}

fn default_server_port_regexp() -> String {
    "Listening on port ([0-9]+)".to_string()
}

fn default_stepping_timeout() -> i64 {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageAndSymbols {
    #[serde(rename = "symbolFileName")]
    pub symbol_file_name: Option<String>,
    #[serde(rename = "symbolOffset")]
    pub symbol_offset: Option<String>,
    #[serde(rename = "imageFileName")]
    pub image_file_name: Option<String>,
    #[serde(rename = "imageOffset")]
    pub image_offset: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(rename = "type", default = "default_target_type")]
    pub target_type: String,
    pub parameters: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub server: Option<String>,
    #[serde(rename = "serverParameters")]
    pub server_parameters: Option<Vec<String>>,
    pub cwd: Option<String>,
    #[serde(rename = "serverPortRegExp", default = "default_server_port_regexp")]
    pub server_port_regexp: String,
    #[serde(rename = "serverStartupDelay")]
    pub server_startup_delay: Option<u64>,
    #[serde(rename = "connectCommands")]
    pub connect_commands: Option<Vec<String>>,
    pub environment: Option<HashMap<String, Option<String>>>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        TargetConfig {
            target_type: default_target_type(),
            parameters: None,
            host: None,
            port: None,
            server: None,
            server_parameters: None,
            cwd: None,
            server_port_regexp: default_server_port_regexp(),
            server_startup_delay: None,
            connect_commands: None,
            environment: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchConfig {
    pub program: Option<String>,
    /// Target process id for `attach` (§4.5 step 3: `-target-attach PID`).
    #[serde(rename = "processId")]
    pub process_id: Option<u32>,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub environment: HashMap<String, Option<String>>,
    #[serde(default = "default_gdb")]
    pub gdb: String,
    #[serde(rename = "gdbAsync", default = "default_true")]
    pub gdb_async: bool,
    #[serde(rename = "gdbNonStop", default)]
    pub gdb_non_stop: bool,
    #[serde(rename = "hardwareBreakpoint", default)]
    pub hardware_breakpoint: bool,
    #[serde(rename = "initCommands", default)]
    pub init_commands: Vec<String>,
    #[serde(rename = "preConnectCommands", default)]
    pub pre_connect_commands: Vec<String>,
    #[serde(rename = "preRunCommands", default)]
    pub pre_run_commands: Vec<String>,
    #[serde(rename = "customResetCommands", default)]
    pub custom_reset_commands: Vec<String>,
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(rename = "imageAndSymbols")]
    pub image_and_symbols: Option<ImageAndSymbols>,
    #[serde(rename = "auxiliaryGdb", default)]
    pub auxiliary_gdb: bool,
    #[serde(rename = "steppingResponseTimeout", default = "default_stepping_timeout")]
    pub stepping_response_timeout: i64,
    #[serde(rename = "openGdbConsole", default)]
    pub open_gdb_console: bool,
    #[serde(default)]
    pub verbose: bool,
    #[serde(rename = "logFile")]
    pub log_file: Option<String>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        LaunchConfig {
            program: None,
            process_id: None,
            arguments: Vec::new(),
            environment: HashMap::new(),
            gdb: default_gdb(),
            gdb_async: true,
            gdb_non_stop: false,
            hardware_breakpoint: false,
            init_commands: Vec::new(),
            pre_connect_commands: Vec::new(),
            pre_run_commands: Vec::new(),
            custom_reset_commands: Vec::new(),
            target: TargetConfig::default(),
            image_and_symbols: None,
            auxiliary_gdb: false,
            stepping_response_timeout: default_stepping_timeout(),
            open_gdb_console: false,
            verbose: false,
            log_file: None,
        }
    }
}

impl LaunchConfig {
    /// Validates the cross-field constraints called out in §7's
    /// ConfigError taxonomy. Returns the fixed-sentinel message the caller
    /// should reject the `launch`/`attach` request with, if any.
    pub fn validate(&self) -> Result<(), String> {
        if self.auxiliary_gdb && self.gdb_non_stop {
            return Err(crate::error::sentinel::AUXILIARY_FORBIDS_NON_STOP.to_string());
        }
        if self.auxiliary_gdb && !self.gdb_async {
            return Err(crate::error::sentinel::AUXILIARY_REQUIRES_ASYNC.to_string());
        }
        if !self.custom_reset_commands.is_empty() && !self.gdb_async {
            return Err(crate::error::sentinel::CUSTOM_RESET_REQUIRES_ASYNC.to_string());
        }
        Ok(())
    }

    /// Whether the stepping-response timeout is active; a negative value
    /// disables it (§6).
    pub fn stepping_timeout(&self) -> Option<std::time::Duration> {
        if self.stepping_response_timeout < 0 {
            None
        } else {
            Some(std::time::Duration::from_millis(
                self.stepping_response_timeout as u64,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let cfg = LaunchConfig::default();
        assert!(cfg.gdb_async);
        assert!(!cfg.gdb_non_stop);
        assert_eq!(cfg.gdb, "gdb");
        assert_eq!(cfg.stepping_response_timeout, 100);
        assert_eq!(cfg.target.target_type, "remote");
        assert_eq!(
            cfg.target.server_port_regexp,
            "Listening on port ([0-9]+)"
        );
    }

    #[test]
    fn auxiliary_gdb_with_non_stop_is_rejected() {
        let cfg = LaunchConfig {
            auxiliary_gdb: true,
            gdb_non_stop: true,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn custom_reset_without_async_is_rejected() {
        let cfg = LaunchConfig {
            gdb_async: false,
            custom_reset_commands: vec!["monitor reset".to_string()],
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn negative_stepping_timeout_disables_it() {
        let cfg = LaunchConfig {
            stepping_response_timeout: -1,
            ..Default::default()
        };
        assert!(cfg.stepping_timeout().is_none());
    }

    #[test]
    fn deserializes_from_request_shaped_json() {
        let json = r#"{
            "program": "/bin/foo",
            "arguments": ["--flag"],
            "gdbNonStop": true,
            "target": {"type": "remote", "host": "localhost", "port": 1234}
        }"#;
        let cfg: LaunchConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.program.as_deref(), Some("/bin/foo"));
        assert!(cfg.gdb_non_stop);
        assert!(cfg.gdb_async);
        assert_eq!(cfg.target.port, Some(1234));
    }
}
