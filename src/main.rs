use aerona3_tools::commands;
use clap::Parser as _;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

#[derive(clap::Parser)]
#[clap(version, about, author)]
enum Commands {
    Registers(commands::registers::Args),
    Read(commands::read::Args),
    Write(commands::write::Args),
    Poll(commands::poll::Args),
    Curve(commands::curve::Args),
}

fn end<E: std::error::Error>(r: Result<(), E>) {
    std::process::exit(match r {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            let mut cause = e.source();
            while let Some(e) = cause {
                eprintln!("  because: {e}");
                cause = e.source();
            }
            1
        }
    });
}

#[tokio::main]
async fn main() {
    let filter_description =
        std::env::var("AERONA3_TOOLS_LOG").unwrap_or_else(|_| String::from("info"));
    let filter = match filter_description.parse::<tracing_subscriber::filter::targets::Targets>() {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("warning: ignoring the invalid AERONA3_TOOLS_LOG filter: {e}");
            tracing_subscriber::filter::targets::Targets::new()
                .with_default(tracing::Level::INFO)
        }
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
    match Commands::parse() {
        Commands::Registers(args) => end(commands::registers::run(args)),
        Commands::Read(args) => end(commands::read::run(args).await),
        Commands::Write(args) => end(commands::write::run(args).await),
        Commands::Poll(args) => end(commands::poll::run(args).await),
        Commands::Curve(args) => end(commands::curve::run(args)),
    }
}
