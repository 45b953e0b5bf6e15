use super::map_interrupt;
use crate::cli::EvaluateArgs;
use crate::config;
use crate::error::Result;
use crate::ui::{CliProgressHandler, UiEvent};
use tbfit::engine::cancel::CancellationToken;
use tbfit::engine::progress::ProgressReporter;
use tbfit::workflows;
use tokio::sync::mpsc;
use tracing::{debug, info};

pub async fn run(
    args: EvaluateArgs,
    ui_sender: mpsc::Sender<UiEvent>,
    interrupt: CancellationToken,
) -> Result<()> {
    let config = config::build_evaluate_config(&args)?;
    debug!("Resolved evaluation configuration: {:?}", config);

    let progress_handler = CliProgressHandler::new(ui_sender);
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());

    info!(material = %config.problem.material, "Invoking the core evaluate workflow...");
    let report =
        tokio::task::block_in_place(|| workflows::evaluate::run(&config, &reporter, &interrupt))
            .map_err(|e| map_interrupt(e, &interrupt))?;

    println!(
        "RMS {:.6} eV for '{}' ({} parameter(s))",
        report.loss,
        config.problem.material,
        report.vector.len()
    );
    if let Some(dir) = &report.sandbox_dir {
        println!("  Solver run kept in: {}", dir.display());
    }
    if let Some(output) = &report.output_path {
        println!("  Solver output:      {}", output.display());
    }
    if let Some(overlay) = &report.overlay_path {
        println!("  Overlay:            {}", overlay.display());
    }

    Ok(())
}
