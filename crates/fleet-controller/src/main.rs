use anyhow::Result;
use clap::Parser;
use fleet_controller::app::ApplicationBuilder;
use fleet_controller::config::Cli;
use fleet_controller::config::Commands;
use fleet_controller::config::CrdArgs;
use fleet_controller::config::RunArgs;
use fleet_controller::infrastructure::k8s::crd;
use fleet_controller::infrastructure::logging;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(run_args) => run_controller(*run_args).await,
        Commands::Crd(crd_args) => print_crd(crd_args),
    }
}

async fn run_controller(run_args: RunArgs) -> Result<()> {
    let _guards = logging::init(run_args.metrics_file.as_deref());

    tracing::info!("Starting fleet controller {}", &**version::VERSION);

    let app = ApplicationBuilder::new(run_args).build().await?;
    app.run().await?;

    Ok(())
}

fn print_crd(_args: CrdArgs) -> Result<()> {
    let yaml = crd::crd_yaml().map_err(|e| anyhow::anyhow!("{e:?}"))?;
    print!("{yaml}");
    Ok(())
}
