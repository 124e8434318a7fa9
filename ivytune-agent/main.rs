use axum::{response::IntoResponse, routing::get, Router};
use clap::{Parser, Subcommand, ValueEnum};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use ivytune::config::{self, HwPaths};
use ivytune::control::{PowerLimiter, PowerLimits, TurboController};
use ivytune::fan::{FanController, FanLevel, FanStatus};
use ivytune::prom::TelemetryExporter;
use ivytune::telemetry::{CoreTemps, FreqMonitor};
use ivytune::{Msr, TelemetryCollector, Topology};
use ivytune_raw::ivybridge::turbo::{EDITABLE_RATIOS, TURBO_TABLE_ENTRIES};
use ivytune_raw::ivybridge::BCLK_MHZ;

#[derive(Parser, Debug)]
#[command(name = "ivytune")]
#[command(about = "Turbo, power limit, and fan control for Intel Ivy Bridge")]
struct Args {
    #[arg(
        short,
        long,
        global = true,
        help = "Enable verbose logging (shows all MSR read/write operations)"
    )]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show turbo, power limit, frequency, temperature, and fan state
    Status {
        #[arg(long, help = "Print machine-readable JSON")]
        json: bool,
    },
    /// Enable or disable turbo boost on every CPU
    Turbo {
        #[arg(value_enum)]
        state: Toggle,
    },
    /// Set the turbo ratio limits for 1-4 active cores
    Ratios {
        #[arg(value_name = "1-CORE")]
        r1: u8,
        #[arg(value_name = "2-CORE")]
        r2: u8,
        #[arg(value_name = "3-CORE")]
        r3: u8,
        #[arg(value_name = "4-CORE")]
        r4: u8,
    },
    /// Show or set the package power limits
    Power {
        #[arg(long, value_name = "WATTS", help = "Long-term power limit (PL1)")]
        pl1: Option<f64>,
        #[arg(long, value_name = "WATTS", help = "Short-term power limit (PL2)")]
        pl2: Option<f64>,
    },
    /// Set the fan level (auto, 0-7, full-speed, disengaged)
    Fan {
        level: String,
        #[arg(long, help = "Skip the confirmation prompt for disengaged mode")]
        yes: bool,
    },
    /// Poll frequency, temperature, and fan state in the terminal
    Watch {
        #[arg(
            long,
            default_value_t = config::DEFAULT_POLL_INTERVAL_SECS,
            value_name = "SECONDS"
        )]
        interval: u64,
    },
    /// Serve Prometheus metrics over HTTP
    Serve {
        #[arg(long, default_value = "0.0.0.0:8080", value_name = "ADDR")]
        listen: SocketAddr,
        #[arg(
            long,
            default_value_t = config::DEFAULT_POLL_INTERVAL_SECS,
            value_name = "SECONDS"
        )]
        interval: u64,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Toggle {
    On,
    Off,
}

#[derive(Serialize)]
struct CpuReport {
    cpu: u32,
    ratio: u8,
    mhz: f64,
}

#[derive(Serialize)]
struct StatusReport {
    turbo_enabled: bool,
    turbo_ratios: [u8; TURBO_TABLE_ENTRIES],
    base_ratio: u8,
    base_mhz: f64,
    power: PowerLimits,
    cpus: Vec<CpuReport>,
    core_temps_celsius: BTreeMap<u32, f64>,
    fan: Option<FanStatus>,
}

async fn metrics_handler(
    axum::extract::State(exporter): axum::extract::State<Arc<TelemetryExporter>>,
) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&exporter.registry().gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }

    let content_type = encoder.format_type().to_string();
    (
        [("Content-Type", content_type)],
        String::from_utf8(buffer).unwrap_or_default(),
    )
}

fn check_permissions(msr: &Msr) {
    let probe = msr.device_path(msr.first_cpu());

    if std::fs::metadata(&probe).is_err() {
        eprintln!(
            "\n⚠️  ERROR: Cannot access {}\n\nThe MSR kernel module may not be loaded.\nRun: sudo modprobe msr\n",
            probe.display()
        );
        std::process::exit(1);
    }

    if let Err(e) = std::fs::File::open(&probe) {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            eprintln!(
                "\n⚠️  ERROR: Permission denied accessing {}\n\nModel-specific register access requires root.\nRun: sudo ivytune ...\n",
                probe.display()
            );
            std::process::exit(1);
        }
    }
}

/// Fan control when the interface exists; its absence only disables the
/// fan features.
fn available_fan(paths: &HwPaths) -> Option<FanController> {
    let fan = FanController::with_path(&paths.fan);
    if fan.is_available() {
        Some(fan)
    } else {
        tracing::warn!(
            "Fan control interface {} not found; fan telemetry and watchdog refresh disabled",
            paths.fan.display()
        );
        None
    }
}

fn format_ratios(ratios: &[u8]) -> String {
    ratios
        .iter()
        .enumerate()
        .map(|(i, r)| format!("{}C={}x", i + 1, r))
        .collect::<Vec<_>>()
        .join(" ")
}

fn gather_status(msr: &Msr, paths: &HwPaths) -> anyhow::Result<StatusReport> {
    let turbo = TurboController::new(msr.clone());
    let freq = FreqMonitor::new(msr.clone());
    let limiter = PowerLimiter::new(msr.clone())?;

    let turbo_enabled = turbo.is_enabled()?;
    let turbo_table = turbo.read_ratios()?;
    let base_ratio = freq.base_ratio()?;
    let power = limiter.read_limits()?;

    let mut cpus = Vec::new();
    for cpu in msr.online_cpus() {
        match freq.current_ratio(cpu) {
            Ok(ratio) => cpus.push(CpuReport {
                cpu,
                ratio,
                mhz: ratio as f64 * BCLK_MHZ,
            }),
            Err(e) => tracing::debug!("Skipping CPU {cpu} in status report: {e}"),
        }
    }

    let core_temps_celsius: BTreeMap<u32, f64> = CoreTemps::with_root(&paths.hwmon)
        .read()
        .into_iter()
        .collect();

    let fan_controller = FanController::with_path(&paths.fan);
    let fan = if fan_controller.is_available() {
        fan_controller.status().ok()
    } else {
        None
    };

    Ok(StatusReport {
        turbo_enabled,
        turbo_ratios: turbo_table.ratios,
        base_ratio,
        base_mhz: base_ratio as f64 * BCLK_MHZ,
        power,
        cpus,
        core_temps_celsius,
        fan,
    })
}

fn print_status(report: &StatusReport) {
    println!(
        "Turbo boost:    {}",
        if report.turbo_enabled {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!(
        "Turbo ratios:   {}",
        format_ratios(&report.turbo_ratios[..EDITABLE_RATIOS])
    );
    println!(
        "Base frequency: {}x ({:.0} MHz)",
        report.base_ratio, report.base_mhz
    );
    print_limits(&report.power);
    for cpu in &report.cpus {
        println!("CPU {:2}:  {:2}x  ({:4.0} MHz)", cpu.cpu, cpu.ratio, cpu.mhz);
    }
    if !report.core_temps_celsius.is_empty() {
        let temps = report
            .core_temps_celsius
            .iter()
            .map(|(core, temp)| format!("core {core}: {temp:.0}°C"))
            .collect::<Vec<_>>()
            .join("  ");
        println!("Temperatures:   {temps}");
    }
    if let Some(fan) = &report.fan {
        match fan.rpm {
            Some(rpm) => println!("Fan:            level {}, {} RPM", fan.level, rpm),
            None => println!("Fan:            level {}", fan.level),
        }
    }
}

fn print_limits(limits: &PowerLimits) {
    println!(
        "PL1:            {:.3} W, {}, window {:.3} s",
        limits.pl1_watts,
        if limits.pl1_enabled {
            "enabled"
        } else {
            "disabled"
        },
        limits.pl1_window_secs
    );
    println!(
        "PL2:            {:.3} W, {}, window {:.6} s",
        limits.pl2_watts,
        if limits.pl2_enabled {
            "enabled"
        } else {
            "disabled"
        },
        limits.pl2_window_secs
    );
    if limits.locked {
        println!("                (power limits locked by firmware until the next reset)");
    }
}

fn cmd_status(msr: &Msr, paths: &HwPaths, json: bool) -> anyhow::Result<()> {
    let report = gather_status(msr, paths)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_status(&report);
    }
    Ok(())
}

fn cmd_turbo(msr: &Msr, state: Toggle) -> anyhow::Result<()> {
    let controller = TurboController::new(msr.clone());
    let enable = matches!(state, Toggle::On);

    if let Err(e) = controller.set_enabled(enable) {
        // A partial broadcast leaves CPUs disagreeing; show where the
        // first CPU ended up so the operator can retry from known state.
        if let Ok(now) = controller.is_enabled() {
            eprintln!(
                "Turbo is now {} on CPU {}; other CPUs may differ.",
                if now { "enabled" } else { "disabled" },
                msr.first_cpu()
            );
        }
        return Err(e.into());
    }

    println!(
        "Turbo boost {}",
        if enable { "enabled" } else { "disabled" }
    );
    Ok(())
}

fn cmd_ratios(msr: &Msr, limits: [u8; EDITABLE_RATIOS]) -> anyhow::Result<()> {
    let controller = TurboController::new(msr.clone());
    let table = controller.apply_ratios(limits)?;
    println!(
        "Turbo ratio limits set: {}",
        format_ratios(&table.ratios[..EDITABLE_RATIOS])
    );
    Ok(())
}

fn cmd_power(msr: &Msr, pl1: Option<f64>, pl2: Option<f64>) -> anyhow::Result<()> {
    let limiter = PowerLimiter::new(msr.clone())?;

    if pl1.is_some() || pl2.is_some() {
        limiter.apply(pl1, pl2)?;
    }

    print_limits(&limiter.read_limits()?);
    Ok(())
}

fn cmd_fan(paths: &HwPaths, level: &str, yes: bool) -> anyhow::Result<()> {
    let fan = FanController::with_path(&paths.fan);
    if !fan.is_available() {
        anyhow::bail!(
            "Fan control interface {} not found.\nRun: sudo modprobe thinkpad_acpi fan_control=1",
            paths.fan.display()
        );
    }

    let level: FanLevel = level.parse()?;

    if matches!(level, FanLevel::Disengaged) && !yes {
        println!("Disengaged mode runs the fan at maximum speed, unregulated by firmware.");
        print!("Type 'yes' to continue: ");
        io::stdout().flush()?;
        let mut answer = String::new();
        io::stdin().read_line(&mut answer)?;
        if answer.trim() != "yes" {
            println!("Aborted.");
            return Ok(());
        }
    }

    fan.set_level(level)?;

    let status = fan.status()?;
    match status.rpm {
        Some(rpm) => println!("Fan level: {}, {} RPM", status.level, rpm),
        None => println!("Fan level: {}", status.level),
    }

    if !level.is_auto() {
        println!(
            "The firmware watchdog reverts to automatic control after {} s.\n\
             Keep `ivytune watch` or `ivytune serve` running to hold this level.",
            config::FAN_WATCHDOG_SECS
        );
    }
    Ok(())
}

async fn cmd_watch(msr: Msr, paths: &HwPaths, interval_secs: u64) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let topology = Topology::with_root(&paths.sysfs_cpu);
    let freq = FreqMonitor::new(msr.clone());
    let temps = CoreTemps::with_root(&paths.hwmon);
    let fan = available_fan(paths);

    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let core_temps = temps.read();
        for cpu in msr.online_cpus() {
            let Ok(ratio) = freq.current_ratio(cpu) else {
                continue;
            };
            let mhz = ratio as f64 * BCLK_MHZ;
            match core_temps.get(&topology.core_id(cpu)) {
                Some(temp) => println!("CPU {cpu:2}:  {ratio:2}x  ({mhz:4.0} MHz)    {temp:.0}°C"),
                None => println!("CPU {cpu:2}:  {ratio:2}x  ({mhz:4.0} MHz)"),
            }
        }

        if let Some(fan) = &fan {
            if let Ok(status) = fan.status() {
                match status.rpm {
                    Some(rpm) => println!("Fan:     level {}, {} RPM", status.level, rpm),
                    None => println!("Fan:     level {}", status.level),
                }
                if !status.is_auto() {
                    if let Err(e) = fan.refresh_watchdog() {
                        tracing::warn!("Failed to re-arm fan watchdog: {e}");
                    }
                }
            }
        }
        println!();
    }

    if let Some(fan) = &fan {
        fan.restore_auto();
    }

    Ok(())
}

async fn cmd_serve(
    msr: Msr,
    paths: &HwPaths,
    listen: SocketAddr,
    interval_secs: u64,
) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();

    let topology = Topology::with_root(&paths.sysfs_cpu);
    let temps = CoreTemps::with_root(&paths.hwmon);
    let fan = available_fan(paths);

    let exporter = Arc::new(TelemetryExporter::new(msr, topology, temps, fan.clone())?);

    let collector = TelemetryCollector::new(
        Arc::clone(&exporter),
        fan,
        Duration::from_secs(interval_secs.max(1)),
    );
    let collection_handle = collector.start(cancel.clone());

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(exporter);

    tracing::info!("Starting HTTP server on {}", listen);
    let listener = tokio::net::TcpListener::bind(listen).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await?;

    tracing::info!("Server shutdown complete, waiting for collection loop to finish...");
    let _ = collection_handle.await;

    Ok(())
}

async fn shutdown_signal(cancel_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        tracing::info!("Ctrl+C received!");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
        tracing::info!("SIGTERM received!");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, initiating graceful shutdown...");
    cancel_token.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(log_level).init();

    let paths = HwPaths::default();
    let msr = Msr::with_root(&paths.dev_cpu);

    if !matches!(args.command, Command::Fan { .. }) {
        check_permissions(&msr);
    }

    match args.command {
        Command::Status { json } => cmd_status(&msr, &paths, json),
        Command::Turbo { state } => cmd_turbo(&msr, state),
        Command::Ratios { r1, r2, r3, r4 } => cmd_ratios(&msr, [r1, r2, r3, r4]),
        Command::Power { pl1, pl2 } => cmd_power(&msr, pl1, pl2),
        Command::Fan { level, yes } => cmd_fan(&paths, &level, yes),
        Command::Watch { interval } => cmd_watch(msr, &paths, interval).await,
        Command::Serve { listen, interval } => cmd_serve(msr, &paths, listen, interval).await,
    }
}
