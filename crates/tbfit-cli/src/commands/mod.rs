pub mod evaluate;
pub mod fit;
pub mod params;

use crate::error::CliError;
use tbfit::engine::cancel::CancellationToken;
use tbfit::engine::error::EngineError;

/// A cancelled run only counts as an interrupt when the user pulled the
/// trigger; a wall-clock limit reports the engine error unchanged.
pub(crate) fn map_interrupt(err: EngineError, interrupt: &CancellationToken) -> CliError {
    match err {
        EngineError::Cancelled if interrupt.is_cancelled() => CliError::Interrupted,
        other => CliError::Engine(other),
    }
}
