use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use spacechat::chat;
use spacechat::config::{Config, Protocol};

#[derive(Parser)]
#[command(name = "spacechat")]
#[command(version)]
#[command(about = "Chat with a hosted inference Space from the terminal", long_about = None)]
struct Cli {
    /// Root URL of the Space (overrides config and SPACECHAT_BASE_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Endpoint name exposed by the Space
    #[arg(long, global = true)]
    api_name: Option<String>,

    /// Wire protocol spoken by the endpoint
    #[arg(long, global = true, value_enum)]
    protocol: Option<Protocol>,

    /// Give up on a reply after this many seconds
    #[arg(long, global = true, value_name = "SECS")]
    timeout: Option<u64>,

    /// Log exchange activity to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive conversation (default)
    Chat,
    /// Send one message and print the reply
    Ask {
        #[arg(required = true, trailing_var_arg = true)]
        text: Vec<String>,
    },
    /// Inspect or create the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "spacechat=debug" } else { "spacechat=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(base_url) = &cli.base_url {
        config.base_url = base_url.trim_end_matches('/').to_string();
    }
    if let Some(api_name) = &cli.api_name {
        config.api_name = api_name.clone();
    }
    if let Some(protocol) = cli.protocol {
        config.protocol = protocol;
    }
    if let Some(timeout) = cli.timeout {
        config.exchange_timeout_secs = Some(timeout);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = Config::load()?;
    apply_overrides(&mut config, &cli);

    match cli.command {
        None | Some(Commands::Chat) => chat::run_chat(config).await,
        Some(Commands::Ask { ref text }) => chat::ask(config, &text.join(" ")).await,
        Some(Commands::Config { ref action }) => match action {
            ConfigAction::Show => {
                println!("# {}", config.config_path().display());
                print!("{}", toml::to_string_pretty(&config)?);
                Ok(())
            }
            ConfigAction::Init { force } => {
                let path = config.config_path();
                if path.exists() && !force {
                    println!("⚠️  {} already exists (use --force to overwrite)", path.display());
                    return Ok(());
                }
                let path = Config {
                    home: config.home.clone(),
                    ..Config::default()
                }
                .save()?;
                println!("✅ Wrote {}", path.display());
                Ok(())
            }
        },
    }
}
