use super::map_interrupt;
use crate::cli::FitArgs;
use crate::config;
use crate::error::Result;
use crate::ui::{CliProgressHandler, UiEvent};
use tbfit::engine::cancel::CancellationToken;
use tbfit::engine::progress::ProgressReporter;
use tbfit::workflows;
use tokio::sync::mpsc;
use tracing::{debug, info};

pub async fn run(
    args: FitArgs,
    ui_sender: mpsc::Sender<UiEvent>,
    interrupt: CancellationToken,
) -> Result<()> {
    info!("Merging configuration from file and CLI arguments...");
    let config = config::build_fit_config(&args)?;
    debug!("Resolved fit configuration: {:?}", config);

    let progress_handler = CliProgressHandler::new(ui_sender);
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());

    println!(
        "Fitting {} free parameter(s) of '{}' against {}",
        config.problem.parameter_names.len(),
        config.problem.material,
        config.problem.reference_path.display()
    );
    info!("Invoking the core fit workflow...");

    let result =
        tokio::task::block_in_place(|| workflows::fit::run(&config, &reporter, &interrupt))
            .map_err(|e| map_interrupt(e, &interrupt))?;

    println!(
        "✓ Best RMS {:.6} eV (generation {}, candidate {}), confirmed at {:.6} eV after {} generation(s).",
        result.best.loss,
        result.best.generation,
        result.best.candidate,
        result.confirmatory_loss,
        result.history.len()
    );
    if let Some(reason) = &result.termination {
        println!("  Stopped: {}", reason);
    }
    for (name, value) in &result.parameters {
        println!("  {:<20} {:>12.6}", name, value);
    }
    let artifacts = &result.artifacts;
    println!("  Best vector:     {}", artifacts.best_params.display());
    println!("  Best database:   {}", artifacts.best_materials.display());
    println!("  Overlay:         {}", artifacts.overlay.display());
    println!("  Summary:         {}", artifacts.summary.display());
    println!("  Final solver run: {}", artifacts.final_run_dir.display());

    Ok(())
}
