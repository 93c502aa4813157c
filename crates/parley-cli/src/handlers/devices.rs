//! `devices` command handler.

use parley_voice::VoicePipeline;

use crate::error::CliError;

/// List available microphones, marking the system default.
pub fn execute() -> Result<(), CliError> {
    let devices = VoicePipeline::list_input_devices()?;

    if devices.is_empty() {
        println!("No input devices found.");
        return Ok(());
    }

    for device in devices {
        let marker = if device.is_default { "*" } else { " " };
        println!("{marker} {}", device.name);
    }
    Ok(())
}
