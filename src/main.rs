use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;

#[tokio::main]
async fn main() {
    let args = cli::Cli::parse();

    // Setup logging (set RUST_LOG=info or debug)
    let default_level = if args.debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(
                default_level
                    .parse()
                    .expect("static log directive is valid"),
            ),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = cli::run(args).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
