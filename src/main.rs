use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use switchyard::config::{Config, ConfigError, LoggingConfig};
use switchyard::sql;
use switchyard::utils::format_duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "switchyard")]
#[command(about = "Read/write-splitting connection routing for replicated database clusters")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "Switchyard Team")]
struct Cli {
    /// Log level override (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format override (text, json)
    #[arg(long, global = true)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate an example configuration file
    Config {
        /// Configuration profile (default or load-balanced)
        #[arg(short, long, default_value = "default")]
        profile: String,
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Validate configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show how the router classifies a SQL statement
    Classify {
        /// SQL text, possibly several statements separated by ';'
        sql: String,
        /// Classify as if autocommit were on
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        autocommit: bool,
    },
    /// Show version information
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Config { profile, output } => {
            init_logging(&cli, &LoggingConfig::default())?;
            generate_config(profile, output.clone())?;
        }
        Commands::Validate { config } => {
            let loaded = Config::load_from_file(config);
            let logging = match &loaded {
                Ok(parsed) => parsed.logging.clone(),
                Err(_) => LoggingConfig::default(),
            };
            init_logging(&cli, &logging)?;
            validate_config(config.clone(), loaded)?;
        }
        Commands::Classify { sql: text, autocommit } => {
            let quiet = LoggingConfig {
                level: "warn".to_string(),
                ..LoggingConfig::default()
            };
            init_logging(&cli, &quiet)?;
            classify(text, *autocommit);
        }
        Commands::Version => {
            show_version();
        }
    }

    Ok(())
}

fn generate_config(profile: &str, output: PathBuf) -> Result<()> {
    println!("Generating {} configuration file: {:?}", profile, output);

    Config::create_example_config(&output, profile)
        .with_context(|| format!("Failed to generate {} config", profile))?;

    println!("Configuration file generated successfully!");
    println!("Edit the file to match your environment and validate it with:");
    println!("  switchyard validate --config {:?}", output);

    Ok(())
}

fn validate_config(
    config_path: PathBuf,
    loaded: std::result::Result<Config, ConfigError>,
) -> Result<()> {
    println!("Validating configuration file: {:?}", config_path);

    match loaded {
        Ok(config) => {
            tracing::debug!("Loaded configuration: {:?}", config);
            println!("✓ Configuration file is valid");
            println!(
                "  Pool: {} connections per host, validation timeout {}, {} retries, acquire timeout {}",
                config.pool.max_connections_per_host,
                format_duration(config.pool.validation_timeout()),
                config.pool.max_validation_retries,
                format_duration(config.pool.acquire_timeout())
            );
            println!(
                "  Pool cache: expiration {}, cleanup every {} ({})",
                format_duration(config.cache.expiration()),
                format_duration(config.cache.cleanup_interval()),
                if config.cache.background_cleanup {
                    "background"
                } else {
                    "on access"
                }
            );
            println!(
                "  Reader selection: {:?}, load balancing: {}",
                config.splitting.reader_selection, config.splitting.load_balance_readers
            );
            println!(
                "  Telemetry: {} ({})",
                if config.telemetry.enabled { "enabled" } else { "disabled" },
                config.telemetry.backend
            );
            println!(
                "  Logging: {} ({})",
                config.logging.level, config.logging.format
            );
        }
        Err(e) => {
            eprintln!("✗ Configuration file validation failed:");
            match &e {
                ConfigError::IoError(msg) => eprintln!("  File error: {}", msg),
                ConfigError::ParseError(msg) => eprintln!("  Parse error: {}", msg),
                ConfigError::ValidationError(msg) => eprintln!("  Validation error: {}", msg),
                ConfigError::SerializeError(msg) => eprintln!("  Serialization error: {}", msg),
            }
            return Err(e).with_context(|| format!("Invalid configuration {:?}", config_path));
        }
    }

    Ok(())
}

fn classify(text: &str, autocommit: bool) {
    let statements = sql::statements(text);
    let classification = sql::classify(text, autocommit);

    println!("Statements: {}", statements.len());
    for (i, statement) in statements.iter().enumerate() {
        println!("  {}: {}", i + 1, statement);
    }
    println!(
        "First statement:    {}",
        classification.first_statement.as_deref().unwrap_or("-")
    );
    println!("Opens transaction:  {}", classification.opens_transaction);
    println!("Closes transaction: {}", classification.closes_transaction);
    println!("Data modification:  {}", classification.is_dml);
    match (classification.sets_autocommit, classification.autocommit_value) {
        (true, Some(value)) => println!("Sets autocommit:    {}", value),
        (true, None) => println!("Sets autocommit:    unrecognized value"),
        (false, _) => println!("Sets autocommit:    no"),
    }
}

fn show_version() {
    println!("switchyard v{}", env!("CARGO_PKG_VERSION"));
    println!("Read/write-splitting connection routing for replicated database clusters");
    println!();
    println!("Target: {}", std::env::consts::ARCH);
    println!();
    println!("Features:");
    println!("  • Lazy writer/reader switching with transaction pinning");
    println!("  • Random or round-robin reader selection");
    println!("  • Per-host connection pools with sliding expiration");
    println!("  • Lightweight SQL classification for transaction boundaries");
}

/// Pick the log level and format: command-line flags win over the
/// configuration file
fn resolve_logging(
    cli_level: Option<&str>,
    cli_format: Option<&str>,
    config: &LoggingConfig,
) -> (String, String) {
    let level = cli_level.unwrap_or(&config.level).to_string();
    let format = cli_format.unwrap_or(&config.format).to_string();
    (level, format)
}

fn init_logging(cli: &Cli, config: &LoggingConfig) -> Result<()> {
    let (level, format) =
        resolve_logging(cli.log_level.as_deref(), cli.log_format.as_deref(), config);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&level))
        .with_context(|| format!("Invalid log level: {}", level))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format.as_str() {
        "json" => builder.json().init(),
        _ => builder.init(),
    }

    tracing::debug!("Logging initialized at level: {} ({})", level, format);
    Ok(())
}
