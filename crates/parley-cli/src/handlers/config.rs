//! Configuration loading and the `config` command.

use std::path::Path;

use parley_voice::VoicePipelineConfig;

use crate::commands::TalkArgs;
use crate::error::CliError;

/// Load a pipeline configuration from an optional JSON file.
///
/// Missing sections and fields fall back to their defaults.
pub fn load_config(path: Option<&Path>) -> Result<VoicePipelineConfig, CliError> {
    let Some(path) = path else {
        return Ok(VoicePipelineConfig::default());
    };

    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw)
        .map_err(|e| CliError::Config(format!("{}: {e}", path.display())))
}

/// Apply `talk` flag overrides on top of a loaded configuration.
pub fn apply_overrides(config: &mut VoicePipelineConfig, args: &TalkArgs) {
    if let Some(device) = &args.device {
        config.capture.device_name = Some(device.clone());
    }
    if let Some(instructions) = &args.instructions {
        config.agent.instructions.clone_from(instructions);
    }
    if let Some(greeting) = &args.greeting {
        config.agent.greeting.clone_from(greeting);
    }
    if let Some(max) = args.max_reconnects {
        config.transport.max_reconnect_attempts = max;
    }
}

/// Print the effective configuration as pretty JSON.
pub fn execute(path: Option<&Path>) -> Result<(), CliError> {
    let config = load_config(path)?;
    config
        .validate()
        .map_err(|e| CliError::Config(e.to_string()))?;
    let json =
        serde_json::to_string_pretty(&config).map_err(|e| CliError::Config(e.to_string()))?;
    println!("{json}");
    Ok(())
}
