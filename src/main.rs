// ABOUTME: Entry point for the sshdial CLI application.
// ABOUTME: Parses arguments and dispatches to the connect and plan handlers.

mod cli;
mod output;

use clap::Parser;
use cli::{Cli, Commands};
use output::Output;
use sshdial::{ConnectionDescriptor, Resolver, ResolverConfig, Result};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing subscriber based on verbose flag
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let mut output = Output::new(cli.output_mode());
    let result = run(cli, &mut output).await;

    if let Err(e) = result {
        output.error(&e.to_string());
        std::process::exit(1);
    }
}

async fn run(cli: Cli, output: &mut Output) -> Result<()> {
    let config = match &cli.config {
        Some(path) => ResolverConfig::load(path)?,
        None => ResolverConfig::default(),
    };
    let resolver = Resolver::new(config);

    match cli.command {
        Commands::Plan { uri } => {
            let descriptor = ConnectionDescriptor::parse(&uri)?;
            let plan = resolver.plan(&descriptor).await?;
            output.plan(&plan.summary());
            Ok(())
        }
        Commands::Connect { uri } => {
            let descriptor = ConnectionDescriptor::parse(&uri)?;
            connect(&resolver, &descriptor, output).await
        }
    }
}

/// Resolve and shuttle bytes between stdio and the remote socket until either side closes.
async fn connect(
    resolver: &Resolver,
    descriptor: &ConnectionDescriptor,
    output: &mut Output,
) -> Result<()> {
    output.start_timer();
    output.progress(&format!("Resolving {}...", descriptor.host()));

    let mut stream = resolver.resolve(descriptor).await?;
    output.success(&format!(
        "Connected to {} on {} via {}",
        stream.remote_socket(),
        descriptor.host(),
        stream.path()
    ));

    let mut stdio = tokio::io::join(tokio::io::stdin(), tokio::io::stdout());
    let (sent, received) = tokio::io::copy_bidirectional(&mut stdio, &mut stream).await?;
    tracing::debug!("stream closed: {} bytes sent, {} bytes received", sent, received);

    stream.session().disconnect().await.ok();
    Ok(())
}
