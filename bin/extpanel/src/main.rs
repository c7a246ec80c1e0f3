mod commands;
mod log_view;

use clap::{Parser, Subcommand};
use commands::Popup;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "extpanel")]
#[command(about = "Extension control panel: features, permissions, logs and CRM page tools", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Talk to a running background process at this URL instead of an in-process one
    #[arg(long, global = true)]
    remote: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show configuration and storage status
    Status,

    /// Run the background process (bridge over HTTP)
    Serve {
        /// Port to listen on (overrides config bridge.port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (overrides config bridge.host)
        #[arg(long)]
        host: Option<String>,
    },

    /// Features tab
    Features {
        #[command(subcommand)]
        command: Option<FeaturesCommands>,
    },

    /// Performance tab
    Performance,

    /// Permissions tab
    Permissions {
        #[command(subcommand)]
        command: Option<PermissionsCommands>,
    },

    /// Logs tab
    Logs {
        #[command(subcommand)]
        command: Option<LogsCommands>,
    },

    /// Dynamics CRM page tools
    Crm {
        #[command(subcommand)]
        command: CrmCommands,
    },

    /// Wipe all stored state and reinstall defaults
    Reset {
        /// Skip confirmation
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum FeaturesCommands {
    /// Show all features
    List,
    /// Flip a feature on or off (contentScript, backgroundServices, browserApi)
    Toggle { feature: String },
    /// Replace the content script's domain list
    SetDomains {
        #[arg(required = true)]
        domains: Vec<String>,
    },
    /// Replace the browser API list
    SetApis {
        #[arg(required = true)]
        apis: Vec<String>,
    },
}

#[derive(Subcommand)]
enum PermissionsCommands {
    /// Show all permissions
    List,
    /// Grant or revoke a permission
    Toggle { permission: String },
    /// Request a permission (granted after a short delay)
    Request { permission: String },
}

#[derive(Subcommand)]
enum LogsCommands {
    /// Show log entries, newest first
    List {
        /// Only this level (info, warning, error)
        #[arg(long)]
        level: Option<String>,
        /// Case-insensitive match on message or timestamp
        #[arg(long)]
        search: Option<String>,
        /// Number of 5-entry pages to show
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    /// Append an entry
    Add { level: String, message: String },
    /// Clear all entries
    Clear,
    /// Write all entries to extension-logs-<date>.json
    Export {
        /// Target directory (default: ~/.extpanel/exports)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum CrmCommands {
    /// Detect Dynamics CRM on the attached page
    Check,
    /// List the form fields
    Fields,
    /// Set one field (value parsed as JSON when possible)
    Set { field: String, value: String },
    /// Fill several fields from a JSON object
    Fill { values: String },
    /// Inject a script into the page
    Inject { script: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // The popup tabs stay quiet unless asked; the background process reports.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else if matches!(cli.command, Commands::Serve { .. }) {
        EnvFilter::new("info")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Status => commands::status::run().await?,
        Commands::Serve { port, host } => commands::serve::run(host, port).await?,
        Commands::Reset { force } => commands::status::reset(force).await?,
        Commands::Features { command } => {
            let popup = Popup::connect(cli.remote).await?;
            match command.unwrap_or(FeaturesCommands::List) {
                FeaturesCommands::List => commands::features::list(&popup).await?,
                FeaturesCommands::Toggle { feature } => {
                    commands::features::toggle(&popup, &feature).await?
                }
                FeaturesCommands::SetDomains { domains } => {
                    commands::features::set_domains(&popup, domains).await?
                }
                FeaturesCommands::SetApis { apis } => {
                    commands::features::set_apis(&popup, apis).await?
                }
            }
        }
        Commands::Performance => {
            let popup = Popup::connect(cli.remote).await?;
            commands::performance::run(&popup).await?;
        }
        Commands::Permissions { command } => {
            let popup = Popup::connect(cli.remote).await?;
            match command.unwrap_or(PermissionsCommands::List) {
                PermissionsCommands::List => commands::permissions::list(&popup).await?,
                PermissionsCommands::Toggle { permission } => {
                    commands::permissions::toggle(&popup, &permission).await?
                }
                PermissionsCommands::Request { permission } => {
                    commands::permissions::request(&popup, &permission).await?
                }
            }
        }
        Commands::Logs { command } => {
            let popup = Popup::connect(cli.remote).await?;
            let command = command.unwrap_or(LogsCommands::List {
                level: None,
                search: None,
                pages: 1,
            });
            match command {
                LogsCommands::List { level, search, pages } => {
                    commands::logs_cmd::list(&popup, level, search, pages).await?
                }
                LogsCommands::Add { level, message } => {
                    commands::logs_cmd::add(&popup, &level, &message).await?
                }
                LogsCommands::Clear => commands::logs_cmd::clear(&popup).await?,
                LogsCommands::Export { out } => commands::logs_cmd::export(&popup, out).await?,
            }
        }
        Commands::Crm { command } => {
            let popup = Popup::connect(cli.remote).await?;
            match command {
                CrmCommands::Check => commands::crm::check(&popup).await?,
                CrmCommands::Fields => commands::crm::fields(&popup).await?,
                CrmCommands::Set { field, value } => {
                    commands::crm::set(&popup, &field, &value).await?
                }
                CrmCommands::Fill { values } => commands::crm::fill(&popup, &values).await?,
                CrmCommands::Inject { script } => commands::crm::inject(&popup, &script).await?,
            }
        }
    }

    Ok(())
}
