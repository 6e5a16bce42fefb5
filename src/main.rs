use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// A3S Serving — AI-native model serving replica
#[derive(Parser)]
#[command(name = "a3s-serving", version, about)]
struct Cli {
    /// Path to configuration file (.hcl)
    #[arg(short, long, default_value = "serving.hcl")]
    config: String,

    /// Override listen address (e.g., 0.0.0.0:8000)
    #[arg(short, long)]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file without starting the replica
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long, default_value = "serving.hcl")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> a3s_serving::Result<()> {
    let cli = Cli::parse();

    // Handle validate subcommand
    if let Some(Commands::Validate { config: config_path }) = &cli.command {
        return validate_config(config_path).await;
    }

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    tracing::info!("A3S Serving v{}", env!("CARGO_PKG_VERSION"));

    // A replica cannot serve without a model id, so a missing config file
    // is an error rather than a fall-back to defaults.
    if !std::path::Path::new(&cli.config).exists() {
        return Err(a3s_serving::ServingError::Config(format!(
            "Config file not found: {}",
            cli.config
        )));
    }

    tracing::info!(config = cli.config, "Loading configuration");
    let mut config = a3s_serving::config::ServingConfig::from_file(&cli.config).await?;

    // Override listen address if provided
    if let Some(listen) = &cli.listen {
        config.server.listen_addr = listen.clone();
    }

    // Create and start the replica
    let replica = a3s_serving::Replica::new(config)?;
    replica.start().await?;

    tracing::info!("Replica ready — press Ctrl+C to stop");

    // Wait for shutdown signal
    replica.wait_for_shutdown().await;

    Ok(())
}

/// Validate a configuration file and print diagnostics
async fn validate_config(path: &str) -> a3s_serving::Result<()> {
    use std::path::Path;

    let config_path = Path::new(path);
    if !config_path.exists() {
        eprintln!("✗ Config file not found: {}", path);
        std::process::exit(1);
    }

    // Parse
    let config = match a3s_serving::config::ServingConfig::from_file(path).await {
        Ok(c) => {
            println!("✓ Config parsed successfully ({})", path);
            c
        }
        Err(e) => {
            eprintln!("✗ Parse error: {}", e);
            std::process::exit(1);
        }
    };

    // Validate
    if let Err(e) = config.validate() {
        eprintln!("✗ Validation error: {}", e);
        std::process::exit(1);
    }

    // Print summary
    println!("✓ Configuration is valid");
    println!();
    println!(
        "  Server:      {} (replica {})",
        config.server.listen_addr, config.server.replica_id
    );
    println!(
        "  Engine:      {} @ {}",
        config.engine.model_id, config.engine.endpoint
    );
    println!(
        "    tensor_parallel_size: {}, gpu_memory_utilization: {}, max_ongoing_requests: {}",
        config.engine.tensor_parallel_size,
        config.engine.gpu_memory_utilization,
        config.engine.max_ongoing_requests
    );
    println!("  Admission:");
    println!(
        "    allowed_context_lengths: {:?}",
        config.admission.allowed_context_lengths
    );
    println!(
        "    default_context_length:  {}",
        config.admission.default_context_length
    );
    println!(
        "    default_max_tokens:      {}",
        config.admission.default_max_tokens
    );
    if config.autoscaling.enabled {
        println!(
            "  Autoscaling: group '{}' [{}..{}] target {} (executor: {})",
            config.autoscaling.group,
            config.autoscaling.min_replicas,
            config.autoscaling.max_replicas,
            config.autoscaling.target_ongoing_per_replica,
            config.autoscaling.executor
        );
        println!(
            "    control_plane_url: {}",
            config.autoscaling.control_plane_url
        );
        println!(
            "    delays: upscale {}s, downscale {}s (interval {}s, look-back {}s)",
            config.autoscaling.upscale_delay_secs,
            config.autoscaling.downscale_delay_secs,
            config.autoscaling.metrics_interval_secs,
            config.autoscaling.look_back_period_secs
        );
    } else {
        println!("  Autoscaling: disabled");
    }

    Ok(())
}
