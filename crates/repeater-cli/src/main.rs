//! LoRa Concentrator Repeater Command-Line Interface
//!
//! This CLI provides tools for:
//! - Running the repeater against a configured concentrator
//! - Validating a `global_conf.json`-style configuration
//! - Printing the built-in default configuration
//!
//! No vendor HAL is linked: `run` drives the simulated concentrator, which
//! can be preloaded with uplink batches from a JSON file.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use repeater_core::{
    ConfigFile, Frame, Radio, RadioSession, Repeater, RepeaterConfig, Shutdown, SimRadio,
};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::info;

#[derive(Parser)]
#[command(name = "lora-repeater")]
#[command(author, version, about = "LoRa concentrator repeater", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the concentrator and repeat uplinks until interrupted
    Run {
        /// Configuration file (built-in defaults when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// JSON array of uplink batches fed to the simulated concentrator
        #[arg(short, long)]
        uplinks: Option<PathBuf>,
    },

    /// Validate a configuration file and show what would be applied
    CheckConfig {
        /// Configuration file
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Print the default configuration as JSON
    DefaultConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run { config, uplinks } => cmd_run(config, uplinks),
        Commands::CheckConfig { config } => cmd_check_config(&config),
        Commands::DefaultConfig => {
            println!("{}", ConfigFile::default().to_json());
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<ConfigFile> {
    match path {
        Some(path) => ConfigFile::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => {
            info!("No configuration file given, using built-in defaults");
            Ok(ConfigFile::default())
        }
    }
}

fn load_uplinks(path: &Path) -> Result<Vec<Vec<Frame>>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read uplinks from {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse uplinks from {}", path.display()))
}

fn cmd_run(config_path: Option<PathBuf>, uplinks: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path.as_deref())?;
    let settings = config
        .hal_settings()
        .context("Invalid SX1301 configuration")?;

    let radio = SimRadio::new();
    if let Some(path) = uplinks {
        let batches = load_uplinks(&path)?;
        info!(batches = batches.len(), "Preloaded simulated uplinks");
        for batch in batches {
            radio.push_batch(batch);
        }
    }

    // Setup Ctrl+C handler (before the radio is configured)
    let (interrupt_tx, interrupt_rx) = mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.send(());
    })
    .context("Failed to set Ctrl+C handler")?;

    let session =
        RadioSession::start(radio, &settings).context("Failed to start the LoRa concentrator")?;
    let outcome = run_session(&session, config.repeater, interrupt_rx)?;

    if outcome.is_failure() {
        anyhow::bail!("Repeater stopped: {}", outcome);
    }
    println!("Repeater stopped: {}", outcome);
    Ok(())
}

/// Repeat on a started session until interrupted or a worker stops, then
/// stop the session
fn run_session<R: Radio + 'static>(
    session: &RadioSession<R>,
    config: RepeaterConfig,
    interrupts: mpsc::UnboundedReceiver<()>,
) -> Result<Shutdown> {
    let result = repeat(session, config, interrupts);
    if let Err(e) = session.shutdown() {
        eprintln!("Warning: {}", e);
    }
    result
}

fn repeat<R: Radio + 'static>(
    session: &RadioSession<R>,
    config: RepeaterConfig,
    mut interrupts: mpsc::UnboundedReceiver<()>,
) -> Result<Shutdown> {
    let repeater =
        Repeater::new(session.radio(), config).context("Invalid repeater configuration")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build the async runtime")?;

    Ok(runtime.block_on(repeater.run(async move {
        let _ = interrupts.recv().await;
    })))
}

fn cmd_check_config(path: &Path) -> Result<()> {
    let config = load_config(Some(path))?;
    let settings = config
        .hal_settings()
        .context("Invalid SX1301 configuration")?;

    println!("Configuration OK: {}", path.display());
    println!("==================");
    println!(
        "Board:          clock source RF chain {}, {} LoRaWAN sync word",
        settings.board.clksrc,
        if settings.board.lorawan_public { "public" } else { "private" }
    );
    println!("TX gain LUT:    {} entries", settings.tx_gains.len());
    for (index, chain) in &settings.rf_chains {
        println!(
            "RF chain {}:     {} @ {:.3} MHz (TX {})",
            index,
            chain.radio_type,
            chain.freq_hz as f64 / 1e6,
            if chain.tx_enable { "enabled" } else { "disabled" }
        );
    }
    for (index, channel) in &settings.multi_sf_channels {
        println!(
            "Multi-SF {}:     RF chain {}, IF {:+} Hz",
            index, channel.rf_chain, channel.freq_offset_hz
        );
    }
    match &settings.lora_std_channel {
        Some(channel) => println!(
            "LoRa std:       RF chain {}, IF {:+} Hz, {:?}",
            channel.rf_chain, channel.freq_offset_hz, channel.bandwidth
        ),
        None => println!("LoRa std:       disabled"),
    }
    match &settings.fsk_channel {
        Some(channel) => println!(
            "FSK:            RF chain {}, IF {:+} Hz, {:?}, {} bps",
            channel.rf_chain, channel.freq_offset_hz, channel.bandwidth, channel.datarate
        ),
        None => println!("FSK:            disabled"),
    }

    let repeater = &config.repeater;
    println!(
        "Repeater:       eviction {} ms, queue {}, batch {}, TX power {} dBm",
        repeater.eviction_period_ms,
        repeater.queue_capacity,
        repeater.rx_batch_size,
        repeater.tx_rf_power
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_with_verbosity() {
        let cli = Cli::parse_from(["lora-repeater", "-vv", "run", "--config", "conf.json"]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Run { config, uplinks } => {
                assert_eq!(config, Some(PathBuf::from("conf.json")));
                assert!(uplinks.is_none());
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_pending_interrupt_stops_session() {
        let settings = ConfigFile::default().hal_settings().unwrap();
        let session = RadioSession::start(SimRadio::new(), &settings).unwrap();
        let radio = session.radio();

        // Ctrl+C delivered while the radio was still being configured
        let (interrupt_tx, interrupt_rx) = mpsc::unbounded_channel();
        interrupt_tx.send(()).unwrap();

        let outcome = run_session(&session, RepeaterConfig::default(), interrupt_rx).unwrap();
        assert!(matches!(outcome, Shutdown::Interrupted));
        assert!(!radio.is_running());
        assert_eq!(radio.stop_count(), 1);

        drop(session);
        assert_eq!(radio.stop_count(), 1);
    }

    #[test]
    fn test_invalid_repeater_settings_still_stop_session() {
        let settings = ConfigFile::default().hal_settings().unwrap();
        let session = RadioSession::start(SimRadio::new(), &settings).unwrap();
        let radio = session.radio();
        let (_interrupt_tx, interrupt_rx) = mpsc::unbounded_channel();
        let config = RepeaterConfig {
            eviction_period_ms: 0,
            ..Default::default()
        };

        assert!(run_session(&session, config, interrupt_rx).is_err());
        assert_eq!(radio.stop_count(), 1);
    }

    #[test]
    fn test_uplinks_file_shape() {
        let dir = std::env::temp_dir().join(format!("lora-repeater-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("uplinks.json");
        std::fs::write(
            &path,
            r#"[[{"crc": 10, "payload": [1, 2]}, {"crc": 11, "payload": [3]}], []]"#,
        )
        .unwrap();

        let batches = load_uplinks(&path).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0][1].crc, 11);
        assert!(batches[1].is_empty());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
