//! Statewise CLI entry point.
//!
//! Binary name: `statewise`
//!
//! Parses CLI arguments, initializes tracing and the app state (data dir,
//! config, runners, checkpoint store), then dispatches to the command handler.

mod cli;
mod state;

use anyhow::Context as _;
use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need tracing or app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "statewise", &mut std::io::stdout());
        return Ok(());
    }

    // Config decides whether spans go to OpenTelemetry, so peek at it first.
    let data_dir = statewise_infra::config::default_data_dir();
    let log_otel = statewise_infra::config::load_engine_config(&data_dir).await.log_otel;
    let filter = statewise_observe::tracing_setup::filter_for_verbosity(cli.verbose, cli.quiet);
    statewise_observe::tracing_setup::init_tracing(log_otel, filter)
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

    let result = dispatch(cli).await;
    statewise_observe::tracing_setup::shutdown_tracing();
    result
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let state = AppState::init().await.context("Failed to initialize statewise")?;

    match cli.command {
        Commands::Run {
            workflow,
            input,
            context,
            credentials,
            timeout,
        } => {
            cli::workflow::run(
                &state,
                &workflow,
                input.as_deref(),
                context.as_deref(),
                credentials.as_deref(),
                timeout,
                cli.json,
            )
            .await?;
        }

        Commands::Step {
            workflow,
            context,
            input,
            credentials,
        } => {
            cli::workflow::step(
                &state,
                &workflow,
                &context,
                input.as_deref(),
                credentials.as_deref(),
                cli.json,
            )
            .await?;
        }

        Commands::Status { context } => {
            cli::workflow::status(&context, cli.json).await?;
        }

        Commands::Validate { workflow } => {
            cli::workflow::validate(&state, &workflow, cli.json)?;
        }

        Commands::Graph { workflow } => {
            cli::workflow::graph(&state, &workflow)?;
        }

        Commands::Executions { action } => {
            cli::execution::handle(&state, action, cli.json).await?;
        }

        // Handled before tracing init.
        Commands::Completions { .. } => {}
    }

    Ok(())
}
