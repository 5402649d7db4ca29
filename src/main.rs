use anyhow::Result;
use clap::{Parser, Subcommand};
use shared_types::QueuedRequestView;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the management API and the connectivity monitor
    Serve,
    /// Print the requests waiting to be replayed
    Pending,
    /// Run one replay pass and print the report
    Flush,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "galley=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = match args.config_path {
        Some(path) => read_config(&path)?,
        None => galley::Config::default(),
    };

    let app = galley::app(&config).await?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let monitor = app.monitor;
            tokio::spawn(async move {
                tracing::info!("starting connectivity monitor");
                monitor.start().await;
            });

            let listener = TcpListener::bind(&config.management.listen).await?;
            tracing::info!("management API listening on {}", &config.management.listen);
            axum::serve(listener, app.mgmt).await?;
        }
        Command::Pending => {
            let pending = app.relay.pending().await?;
            let views: Vec<QueuedRequestView> =
                pending.iter().map(QueuedRequestView::from).collect();
            println!("{}", serde_json::to_string_pretty(&views)?);
        }
        Command::Flush => {
            let report = app.relay.flush_queue().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    app.store.close().await;

    Ok(())
}

fn read_config(config_path: &str) -> Result<galley::Config> {
    let content = std::fs::read_to_string(config_path)?;
    Ok(toml::from_str(&content)?)
}
