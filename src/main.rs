use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use sinkhole::{
    Command, Coordinator, EventFilter, EventReceiver, JournalObserver, LogObserver, ManagedService, Producer, Reason,
    ScriptedOutcome, ServiceError, ShutdownReason, ShutdownTrigger, SimulatedService,
    SinkholeConfig, StateHandle, TriggerSource, UnknownReason,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "sinkhole")]
#[command(about = "Debounced restart coordinator for a long-running filtering service")]
#[command(version)]
#[command(long_about = "Collects change notifications (network, rules, UI actions) from \
many producers, coalesces bursts into single restart or stop requests and drives a managed \
service through a strictly serialized lifecycle. The bundled binary drives a simulated \
service and reads triggers from stdin, one '<reason> [start|reload|stop]' per line.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "sinkhole.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the coordinator")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Dry run mode - build the coordinator but don't start it
    #[arg(long, help = "Perform dry run - build the coordinator but don't start it")]
    dry_run: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Lifecycle journal path, overrides observer.journal_path
    #[arg(long, value_name = "PATH", help = "Append lifecycle events as JSON lines to PATH")]
    journal: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle special modes that don't require full initialization
    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    init_logging(&args)?;

    info!("Starting sinkhole v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let mut config = match SinkholeConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    if let Some(journal) = args.journal {
        config.observer.journal_path = Some(journal);
    }

    let service = Arc::new(build_service(&config));
    let journal_path = config.observer.journal_path.clone();

    let mut coordinator = Coordinator::new(config, service as Arc<dyn ManagedService>)
        .map_err(|e| {
            error!("Failed to create coordinator: {}", e);
            e
        })?;

    coordinator.add_observer(Arc::new(LogObserver))?;
    if let Some(path) = journal_path {
        let journal = JournalObserver::open(&path).await.map_err(|e| {
            error!("Failed to open lifecycle journal {}: {}", path, e);
            e
        })?;
        coordinator.add_observer(Arc::new(journal))?;
    }

    if args.dry_run {
        info!("Dry run mode - coordinator built but not started");
        println!("✓ Dry run completed successfully - coordinator built");
        return Ok(());
    }

    coordinator.start().map_err(|e| {
        error!("Failed to start coordinator: {}", e);
        e
    })?;

    let filter = if args.debug {
        EventFilter::All
    } else {
        EventFilter::EventTypes(DIAGNOSTIC_EVENTS.to_vec())
    };
    let receiver = EventReceiver::new(coordinator.event_bus(), filter, "diagnostics");
    tokio::spawn(log_diagnostics(receiver));

    coordinator.spawn_source(Box::new(StdinSource {
        shutdown: coordinator.shutdown_trigger(),
        state: coordinator.state_handle(),
    }));

    let reason = coordinator.run().await.map_err(|e| {
        error!("Coordinator error during execution: {}", e);
        e
    })?;

    info!("Final statistics: {:?}", coordinator.stats());
    let exit_code = match reason {
        ShutdownReason::Error(_) => 1,
        ShutdownReason::Signal(_) | ShutdownReason::UserRequest => 0,
    };
    info!("sinkhole exited with code: {}", exit_code);

    // stdin reads block a runtime thread; exit without waiting for it
    std::process::exit(exit_code);
}

/// Pipeline events worth surfacing without `--debug`
const DIAGNOSTIC_EVENTS: &[&str] = &["trigger_dropped", "stop_preempted", "request_merged"];

async fn log_diagnostics(mut receiver: EventReceiver) {
    while let Ok(event) = receiver.recv().await {
        match event.event_type() {
            "trigger_dropped" => warn!("{}", event.description()),
            _ => info!("{}", event.description()),
        }
    }
}

fn build_service(config: &SinkholeConfig) -> SimulatedService {
    let simulation = &config.simulation;
    let service = SimulatedService::new(simulation.start_delay(), simulation.stop_delay());
    if simulation.fail_starts > 0 {
        warn!(
            "Simulated service will fail its first {} start(s)",
            simulation.fail_starts
        );
        service.script_starts((0..simulation.fail_starts).map(|_| {
            ScriptedOutcome::Fail(ServiceError::Unavailable("simulated failure".to_string()))
        }));
    }
    service
}

/// Reads `<reason> [start|reload|stop]` lines from stdin. `status` prints
/// the current state and `quit` shuts the coordinator down.
struct StdinSource {
    shutdown: ShutdownTrigger,
    state: StateHandle,
}

enum InputLine {
    Trigger(Reason, Command),
    Status,
    Quit,
    Blank,
}

fn parse_line(line: &str) -> std::result::Result<InputLine, UnknownReason> {
    let mut parts = line.split_whitespace();
    let Some(first) = parts.next() else {
        return Ok(InputLine::Blank);
    };

    match first {
        "status" => return Ok(InputLine::Status),
        "quit" | "exit" => return Ok(InputLine::Quit),
        _ => {}
    }

    let reason: Reason = first.parse()?;
    let command = match parts.next() {
        Some(command) => command.parse()?,
        None => reason.default_command(),
    };
    Ok(InputLine::Trigger(reason, command))
}

#[async_trait]
impl TriggerSource for StdinSource {
    fn name(&self) -> &str {
        "stdin"
    }

    async fn run(self: Box<Self>, producer: Producer, cancel: CancellationToken) -> sinkhole::Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => break,
                line = lines.next_line() => line?,
            };

            let Some(line) = line else {
                info!("stdin closed, no more manual triggers");
                break;
            };

            match parse_line(&line) {
                Ok(InputLine::Trigger(reason, command)) => {
                    producer.submit_command(reason, command)?;
                }
                Ok(InputLine::Status) => {
                    let snapshot = self.state.snapshot();
                    println!("{}", serde_json::to_string(&snapshot)?);
                }
                Ok(InputLine::Quit) => {
                    self.shutdown.trigger(ShutdownReason::UserRequest);
                    break;
                }
                Ok(InputLine::Blank) => {}
                Err(e) => warn!("Ignoring input '{}': {}", line.trim(), e),
            }
        }

        Ok(())
    }
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Determine log level based on flags
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("sinkhole={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# sinkhole configuration file");
    println!("# Every option with its default value. Environment variables override");
    println!("# the file, e.g. SINKHOLE_DISPATCH__MAX_RETRY_ATTEMPTS=5");
    println!();
    println!("{}", toml::to_string_pretty(&SinkholeConfig::default())?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trigger_lines() {
        assert!(matches!(
            parse_line("rule_changed").unwrap(),
            InputLine::Trigger(Reason::RuleChanged, Command::Reload)
        ));
        assert!(matches!(
            parse_line("  ui stop ").unwrap(),
            InputLine::Trigger(Reason::UI, Command::Stop)
        ));
        match parse_line("changed:dns").unwrap() {
            InputLine::Trigger(Reason::Changed(subject), Command::Reload) => assert_eq!(subject, "dns"),
            _ => panic!("expected a changed trigger"),
        }
    }

    #[test]
    fn test_parse_control_lines() {
        assert!(matches!(parse_line("").unwrap(), InputLine::Blank));
        assert!(matches!(parse_line("status").unwrap(), InputLine::Status));
        assert!(matches!(parse_line("quit").unwrap(), InputLine::Quit));
        assert!(parse_line("reboot").is_err());
        assert!(parse_line("ui restart").is_err());
    }

    #[tokio::test]
    async fn test_diagnostics_stop_when_bus_closes() {
        let bus = sinkhole::EventBus::new(8);
        let receiver = EventReceiver::new(
            &bus,
            EventFilter::EventTypes(DIAGNOSTIC_EVENTS.to_vec()),
            "diagnostics",
        );
        let task = tokio::spawn(log_diagnostics(receiver));

        bus.publish(sinkhole::CoordinatorEvent::TriggerDropped {
            producer: "net".to_string(),
            reason: Reason::NetworkLost,
        });
        drop(bus);

        tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_simulated_failures_are_scripted() {
        let mut config = SinkholeConfig::default();
        config.simulation.fail_starts = 2;
        let service = build_service(&config);
        assert!(!service.is_running());
        assert_eq!(service.start_calls(), 0);
    }
}
