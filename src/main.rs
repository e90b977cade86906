use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use allergen_bridge::config::{BenchArgs, Cli, Command, Config, InferArgs, ReportArgs, ServeArgs};
use allergen_bridge::eval::bench::{
    load_records, summarize_by_model, write_summary_csv, BenchmarkRunner,
};
use allergen_bridge::eval::dataset::load_dataset;
use allergen_bridge::inference::runner::{InferenceRequest, InferenceRunner};
use allergen_bridge::inference::DefaultBackend;
use allergen_bridge::labels::LabelFilter;
use allergen_bridge::prompt::build_prompt;
use allergen_bridge::server::api::{build_router, AppState};
use allergen_bridge::server::metrics::BridgeMetrics;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging. Logs go to stderr so stdout stays parseable.
    let filter = if cli.verbose {
        "allergen_bridge=debug,tower_http=debug"
    } else {
        "allergen_bridge=info,tower_http=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!("allergen-bridge v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let config = Config::load(&cli.config)?;

    info!(
        n_ctx = config.inference.n_ctx,
        n_threads = config.inference.n_threads,
        max_tokens = config.inference.max_tokens,
        labels = config.labels.allowed.len(),
        "Configuration loaded"
    );

    match cli.command {
        Command::Infer(args) => infer(config, args),
        Command::Bench(args) => bench(config, args),
        Command::Serve(args) => serve(config, args).await,
        Command::Report(args) => report(&config, args),
    }
}

fn runner(config: Config) -> InferenceRunner<DefaultBackend> {
    #[cfg(not(feature = "llamacpp"))]
    tracing::warn!("Built without the `llamacpp` feature; every inference will fail");
    InferenceRunner::new(DefaultBackend::default(), Arc::new(config))
}

fn infer(config: Config, args: InferArgs) -> anyhow::Result<()> {
    let runner = runner(config);
    let prompt = match (args.prompt, args.ingredients) {
        (Some(prompt), _) => prompt,
        (None, Some(ingredients)) => build_prompt(&ingredients, runner.filter()),
        (None, None) => anyhow::bail!("either --prompt or --ingredients is required"),
    };

    let response = runner.respond(&InferenceRequest::new(prompt, args.model));
    println!("{response}");
    Ok(())
}

fn bench(config: Config, args: BenchArgs) -> anyhow::Result<()> {
    let items = load_dataset(&args.dataset)
        .with_context(|| format!("loading dataset {}", args.dataset.display()))?;
    let runner = runner(config);

    let mut bench = BenchmarkRunner::new(&runner, &args.model);
    if let Some(name) = args.model_name {
        bench = bench.with_model_name(name);
    }
    if let Some(path) = &args.records {
        bench = bench.with_records(path)?;
    }

    let (_, summary) = bench.run(&items)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn report(config: &Config, args: ReportArgs) -> anyhow::Result<()> {
    let records = load_records(&args.records)
        .with_context(|| format!("reading records {}", args.records.display()))?;
    let summaries = summarize_by_model(&records, &LabelFilter::from_config(&config.labels));
    if let Some(path) = &args.csv {
        let file = std::fs::File::create(path)
            .with_context(|| format!("creating {}", path.display()))?;
        write_summary_csv(&summaries, file)?;
        info!(path = %path.display(), models = summaries.len(), "Summary CSV written");
    }
    println!("{}", serde_json::to_string_pretty(&summaries)?);
    Ok(())
}

async fn serve(mut config: Config, args: ServeArgs) -> anyhow::Result<()> {
    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }
    if let Some(model) = args.model {
        config.server.model_path = Some(model);
    }
    let listen_addr = config.server.listen.clone();

    let state = Arc::new(AppState::new(runner(config), BridgeMetrics::new()?));

    // Build the HTTP router.
    let app = build_router(state);

    // Start the server.
    info!(addr = %listen_addr, "Starting server");

    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
