//! Command handlers. Each takes its parsed args plus a connected client.

mod probe;
mod request;

use devlink_api::DeviceClient;

use crate::cli::Command;
use crate::error::CliError;

/// Route a device command to its handler.
pub fn dispatch(cmd: Command, client: &DeviceClient) -> Result<(), CliError> {
    match cmd {
        Command::Request(args) => request::handle(args, client),
        Command::Probe(args) => probe::handle(&args, client),
        Command::Completions(_) => Err(CliError::Validation {
            field: "command".into(),
            reason: "completions do not need a device".into(),
        }),
    }
}
