use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::BufReader;
use tracing::{error, info};

use journal_coach::config::ModelArgs;
use journal_coach::{chat, web_server, Config, ConfigError, GeminiGateway, ModelGateway};

// Define the command-line interface structure using clap
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

// Define the available subcommands
#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the web UI.
    Serve {
        #[command(flatten)]
        model: ModelArgs,
        #[arg(long, default_value_t = 8501, help = "Port for the web server.")]
        port: u16,
        #[arg(long, default_value = "templates", help = "Directory holding index.html.")]
        templates: PathBuf,
        #[arg(long, default_value = "static", help = "Directory served under /static.")]
        static_dir: PathBuf,
    },
    /// Reflect on a journal entry in the terminal.
    Chat {
        #[command(flatten)]
        model: ModelArgs,
        #[arg(long, help = "Journal entry to discuss (.txt or .docx).")]
        file: PathBuf,
        #[arg(long, help = "Write the finished conversation to this .docx file.")]
        export: Option<PathBuf>,
    },
}

fn load_config(model: ModelArgs) -> Result<Config, ConfigError> {
    model.into_config().inspect_err(|e| {
        // Printed in full: this is the operator's setup instruction.
        eprintln!("{e}");
    })
}

// The main entry point of the application, using tokio's async runtime
#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (for the API key)
    dotenvy::dotenv().ok();

    // Reads log level from RUST_LOG environment variable (e.g., RUST_LOG=info,journal_coach=debug)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve {
            model,
            port,
            templates,
            static_dir,
        } => {
            let config = Arc::new(
                load_config(model)?
                    .with_assets(templates, static_dir)
                    .context("Web assets are missing")?,
            );
            info!(?config, "Starting journal coach on port {}...", port);
            let gateway: Arc<dyn ModelGateway> = Arc::new(GeminiGateway::from_config(&config));

            let mut web_server_handle = tokio::spawn(async move {
                if let Err(e) = web_server::start_web_server(port, config, gateway).await {
                    error!("Web server failed: {:?}", e);
                }
            });

            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);

            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("Ctrl-C received, initiating shutdown...");
                }
                res = &mut web_server_handle => {
                    match res {
                        Ok(_) => info!("Web server task completed unexpectedly."),
                        Err(e) if e.is_panic() => error!("Web server task panicked: {:?}", e),
                        Err(e) => error!("Web server task failed: {:?}", e),
                    }
                }
            }

            if !web_server_handle.is_finished() {
                info!("Aborting web server task...");
                web_server_handle.abort();
            }
            info!("Shutdown complete.");
        }
        Commands::Chat {
            model,
            file,
            export,
        } => {
            let config = load_config(model)?;
            let gateway = GeminiGateway::from_config(&config);
            let stdin = BufReader::new(tokio::io::stdin());
            let mut stdout = std::io::stdout();
            chat::run_chat(&gateway, &file, export, stdin, &mut stdout)
                .await
                .context("Chat session failed")?;
            info!("Chat session finished.");
        }
    }

    Ok(())
}
