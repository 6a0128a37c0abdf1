use clap::Parser;
use std::net::SocketAddr;
use std::process::ExitCode;
use tracing::{error, info};

use payflux_api::{serve, spawn_sweeps, AppState};
use payflux_core::config::Config;

// Process exit codes
const EXIT_CONFIG: u8 = 1;
const EXIT_PERSISTENCE: u8 = 2;

#[derive(Parser)]
#[command(
    name = "payflux",
    about = "Payflux - recurring billing payment gateway",
    version
)]
struct Cli {
    #[arg(short, long, value_name = "FILE", help = "Configuration file path")]
    config: Option<String>,

    #[arg(short, long, help = "Enable verbose logging")]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Start the gateway (API server + billing sweeps)
    Server,

    /// Run database migrations and exit
    Migrate,

    /// Validate and print the effective configuration
    Config {
        #[arg(short, long, help = "Show full configuration")]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Load configuration before tracing so the log level can come from it
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    init_tracing(&config, cli.verbose);
    info!("starting payflux v{}", env!("CARGO_PKG_VERSION"));

    match cli.command.unwrap_or(Commands::Server) {
        Commands::Server => run_server(config).await,
        Commands::Migrate => run_migrations(config).await,
        Commands::Config { show } => {
            if show {
                match toml::to_string_pretty(&config) {
                    Ok(rendered) => println!("{}", rendered),
                    Err(e) => {
                        eprintln!("failed to render config: {}", e);
                        return ExitCode::from(EXIT_CONFIG);
                    }
                }
            } else {
                println!("configuration is valid");
            }
            ExitCode::SUCCESS
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config, payflux_core::Error> {
    match &cli.config {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    }
}

fn init_tracing(config: &Config, verbose: bool) {
    let directive = if verbose {
        "payflux=debug,payflux_core=debug,payflux_api=debug,tower_http=debug,sqlx=warn".to_string()
    } else {
        format!(
            "payflux={level},payflux_core={level},payflux_api={level},tower_http=warn,sqlx=error",
            level = config.logging.level
        )
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(directive)
        .with_target(false);

    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

async fn run_server(config: Config) -> ExitCode {
    let pool = match payflux_core::create_pool(&config.database).await {
        Ok(pool) => pool,
        Err(e) => {
            error!(error = %e, "persistence initialization failed");
            return ExitCode::from(EXIT_PERSISTENCE);
        }
    };

    if let Err(e) = payflux_core::migrate(&pool).await {
        error!(error = %e, "migration failed");
        return ExitCode::from(EXIT_PERSISTENCE);
    }

    let addr: SocketAddr = match format!("{}:{}", config.server.host, config.server.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(error = %e, "invalid server address");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let state = match AppState::new(pool, config) {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, "service wiring failed");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let sweeps = match spawn_sweeps(&state) {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "sweep registration failed");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let result = serve(state, addr).await;
    sweeps.abort();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server terminated with error");
            ExitCode::FAILURE
        }
    }
}

async fn run_migrations(config: Config) -> ExitCode {
    let pool = match payflux_core::create_pool(&config.database).await {
        Ok(pool) => pool,
        Err(e) => {
            error!(error = %e, "persistence initialization failed");
            return ExitCode::from(EXIT_PERSISTENCE);
        }
    };

    match payflux_core::migrate(&pool).await {
        Ok(()) => {
            info!("migrations completed");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "migration failed");
            ExitCode::from(EXIT_PERSISTENCE)
        }
    }
}
