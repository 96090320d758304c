//! Module configuration and JSON loading.
//!
//! On-disk durations are plain nanosecond integers; unknown fields are
//! rejected so a typo fails loudly instead of silently taking a default.

use crate::address::{MAX_INPUT_INDEX, MAX_INSTANCE_ID, MAX_SYSTEM_ID};
use crate::error::{ConfigError, Error};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// One upstream producer a module subscribes to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputSource {
    /// Producer's system id.
    pub system_id: u8,
    /// Producer's instance id.
    pub instance_id: u8,
    /// Which of this module's input slots the producer feeds.
    #[serde(default)]
    pub input_index: u8,
}

/// Per-output address override for multi-output modules whose outputs need
/// distinct `(system_id, instance_id)` pairs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputAddress {
    /// System id for this output's mailbox set.
    pub system_id: u8,
    /// Instance id for this output's mailbox set.
    pub instance_id: u8,
}

/// Static configuration of one module instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleConfig {
    /// Module name, used in logs and mailbox names.
    pub name: String,

    /// System id of the module's identity base address.
    pub system_id: u8,

    /// Instance id of the module's identity base address.
    pub instance_id: u8,

    /// Publication period in nanoseconds. Present: the source loop is
    /// periodic. Absent: the source loop free-runs.
    #[serde(default)]
    pub period_ns: Option<u64>,

    /// Queue depth of every mailbox the module owns.
    #[serde(default = "default_message_slots")]
    pub message_slots: usize,

    /// Thread/send priority hint.
    #[serde(default)]
    pub priority: u8,

    /// Request realtime scheduling for the module's threads.
    #[serde(default)]
    pub realtime: bool,

    /// Upstream producers, one per subscribed input slot.
    #[serde(default)]
    pub inputs: Vec<InputSource>,

    /// Window within which a secondary input sample is considered
    /// synchronous with the primary, in nanoseconds.
    #[serde(default = "default_sync_tolerance_ns")]
    pub sync_tolerance_ns: u64,

    /// Entries retained per secondary-input history buffer.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Optional per-output address overrides; when non-empty, must name
    /// every output.
    #[serde(default)]
    pub outputs: Vec<OutputAddress>,
}

fn default_message_slots() -> usize {
    10
}

fn default_sync_tolerance_ns() -> u64 {
    Duration::from_millis(50).as_nanos() as u64
}

fn default_history_capacity() -> usize {
    100
}

impl ModuleConfig {
    /// Minimal configuration: free-running, no inputs, defaults elsewhere.
    pub fn new(name: impl Into<String>, system_id: u8, instance_id: u8) -> Self {
        Self {
            name: name.into(),
            system_id,
            instance_id,
            period_ns: None,
            message_slots: default_message_slots(),
            priority: 0,
            realtime: false,
            inputs: Vec::new(),
            sync_tolerance_ns: default_sync_tolerance_ns(),
            history_capacity: default_history_capacity(),
            outputs: Vec::new(),
        }
    }

    /// Set a publication period, making source loops periodic.
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period_ns = Some(period.as_nanos() as u64);
        self
    }

    /// Add an upstream producer for input slot `input_index`.
    pub fn with_input(mut self, system_id: u8, instance_id: u8, input_index: u8) -> Self {
        self.inputs.push(InputSource {
            system_id,
            instance_id,
            input_index,
        });
        self
    }

    /// Set the multi-input synchronization window.
    pub fn with_sync_tolerance(mut self, tolerance: Duration) -> Self {
        self.sync_tolerance_ns = tolerance.as_nanos() as u64;
        self
    }

    /// The publication period, if periodic.
    pub fn period(&self) -> Option<Duration> {
        self.period_ns.map(Duration::from_nanos)
    }

    /// The period in milliseconds as reported in subscription replies;
    /// zero when free-running.
    pub fn period_ms(&self) -> i64 {
        self.period()
            .map(|p| p.as_millis().min(i64::MAX as u128) as i64)
            .unwrap_or(0)
    }

    /// The synchronization window.
    pub fn sync_tolerance(&self) -> Duration {
        Duration::from_nanos(self.sync_tolerance_ns)
    }

    /// `(system_id, instance_id)` for the mailbox set of output `index`,
    /// honouring per-output overrides.
    pub fn output_identity(&self, index: usize) -> (u8, u8) {
        self.outputs
            .get(index)
            .map(|o| (o.system_id, o.instance_id))
            .unwrap_or((self.system_id, self.instance_id))
    }

    /// Validate against the module's declared I/O arity.
    pub fn validate(&self, num_inputs: usize, num_outputs: usize) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::MissingField("name"));
        }

        check_nibble("system_id", self.system_id, MAX_SYSTEM_ID)?;
        check_nibble("instance_id", self.instance_id, MAX_INSTANCE_ID)?;

        if self.message_slots == 0 {
            return Err(ConfigError::FieldOutOfRange {
                field: "message_slots",
                value: 0,
                max: u32::MAX,
            });
        }

        if self.history_capacity == 0 {
            return Err(ConfigError::FieldOutOfRange {
                field: "history_capacity",
                value: 0,
                max: u32::MAX,
            });
        }

        for source in &self.inputs {
            check_nibble("inputs.system_id", source.system_id, MAX_SYSTEM_ID)?;
            check_nibble("inputs.instance_id", source.instance_id, MAX_INSTANCE_ID)?;

            if source.input_index > MAX_INPUT_INDEX
                || usize::from(source.input_index) >= num_inputs
            {
                return Err(ConfigError::UnknownInputIndex {
                    index: source.input_index,
                    num_inputs,
                });
            }
        }

        if !self.outputs.is_empty() && self.outputs.len() != num_outputs {
            return Err(ConfigError::FieldOutOfRange {
                field: "outputs",
                value: self.outputs.len() as u32,
                max: num_outputs as u32,
            });
        }

        for output in &self.outputs {
            check_nibble("outputs.system_id", output.system_id, MAX_SYSTEM_ID)?;
            check_nibble("outputs.instance_id", output.instance_id, MAX_INSTANCE_ID)?;
        }

        Ok(())
    }

    /// Load a configuration from a JSON file. Unknown fields are errors.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();

        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::File(format!("{}: {e}", path.display())))?;

        Self::from_json(&raw)
    }

    /// Parse a configuration from a JSON string.
    pub fn from_json(raw: &str) -> Result<Self, Error> {
        serde_json::from_str(raw)
            .map_err(|e| ConfigError::File(e.to_string()).into())
    }

    /// Field listing printed by `--help`.
    pub fn help_text() -> &'static str {
        "Configuration file fields (JSON):\n\
         \x20 name                required  module name\n\
         \x20 system_id           required  0..=15\n\
         \x20 instance_id         required  0..=15\n\
         \x20 period_ns           optional  publication period in ns; absent = free-running\n\
         \x20 message_slots       optional  mailbox queue depth (default 10)\n\
         \x20 priority            optional  thread/send priority hint (default 0)\n\
         \x20 realtime            optional  request realtime scheduling (default false)\n\
         \x20 inputs              optional  [{system_id, instance_id, input_index}]\n\
         \x20 sync_tolerance_ns   optional  multi-input sync window in ns (default 50ms)\n\
         \x20 history_capacity    optional  secondary input history depth (default 100)\n\
         \x20 outputs             optional  per-output [{system_id, instance_id}] overrides"
    }
}

fn check_nibble(field: &'static str, value: u8, max: u8) -> Result<(), ConfigError> {
    if value > max {
        return Err(ConfigError::FieldOutOfRange {
            field,
            value: u32::from(value),
            max: u32::from(max),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_applied() {
        let config = ModuleConfig::from_json(
            r#"{"name": "imu", "system_id": 2, "instance_id": 0}"#,
        )
        .unwrap();

        assert_eq!(config.message_slots, 10);
        assert_eq!(config.history_capacity, 100);
        assert_eq!(config.sync_tolerance(), Duration::from_millis(50));
        assert_eq!(config.period(), None);
        assert_eq!(config.period_ms(), 0);
    }

    #[test]
    fn unknown_field_rejected() {
        let err = ModuleConfig::from_json(
            r#"{"name": "imu", "system_id": 2, "instance_id": 0, "perod_ns": 5}"#,
        )
        .unwrap_err();

        assert!(matches!(err, Error::Config(ConfigError::File(_))));
    }

    #[test]
    fn period_in_nanoseconds() {
        let config = ModuleConfig::from_json(
            r#"{"name": "imu", "system_id": 2, "instance_id": 0, "period_ns": 100000000}"#,
        )
        .unwrap();

        assert_eq!(config.period(), Some(Duration::from_millis(100)));
        assert_eq!(config.period_ms(), 100);
    }

    #[test]
    fn narrow_fields_validated() {
        let config = ModuleConfig::new("m", 16, 0);

        assert!(matches!(
            config.validate(0, 1),
            Err(ConfigError::FieldOutOfRange {
                field: "system_id",
                ..
            })
        ));

        let config = ModuleConfig::new("m", 0, 0).with_input(1, 1, 3);

        assert!(matches!(
            config.validate(2, 1),
            Err(ConfigError::UnknownInputIndex { index: 3, .. })
        ));
    }

    #[test]
    fn output_override_arity_checked() {
        let mut config = ModuleConfig::new("m", 1, 1);
        config.outputs.push(OutputAddress {
            system_id: 1,
            instance_id: 2,
        });

        assert!(config.validate(0, 2).is_err());

        config.outputs.push(OutputAddress {
            system_id: 1,
            instance_id: 3,
        });

        assert!(config.validate(0, 2).is_ok());
        assert_eq!(config.output_identity(1), (1, 3));
    }
}
