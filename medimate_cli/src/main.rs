use chrono::{DateTime, TimeZone, Utc};
use clap::{Parser, Subcommand};
use medimate_core::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "medimate")]
#[command(about = "Pill dispenser schedules and dose compliance", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Use this config file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new device (fails if the id is taken)
    Register {
        #[arg(long)]
        device: String,
        #[arg(long)]
        patient: String,
        /// JSON file with an array of cartridges
        #[arg(long)]
        cartridges: Option<PathBuf>,
    },

    /// Create or update a device on boot
    Upsert {
        #[arg(long)]
        device: String,
        #[arg(long)]
        patient: Option<String>,
        #[arg(long)]
        cartridges: Option<PathBuf>,
    },

    /// Show one device
    Show {
        #[arg(long)]
        device: String,
    },

    /// List all devices
    Devices,

    /// Replace a device's cartridges
    Assign {
        #[arg(long)]
        device: String,
        #[arg(long)]
        cartridges: PathBuf,
    },

    /// Remove the assignment in one slot
    ClearSlot {
        #[arg(long)]
        device: String,
        #[arg(long)]
        slot: u32,
    },

    /// Fetch the device schedule payload (minutes since midnight)
    Sync {
        #[arg(long)]
        device: String,
    },

    /// Record a device heartbeat
    Heartbeat {
        #[arg(long)]
        device: String,
    },

    /// Record a dose event with an explicit status
    Log {
        #[arg(long)]
        device: String,
        #[arg(long)]
        slot: u32,
        #[arg(long)]
        medication: String,
        /// dispensed, confirmed, missed or skipped
        #[arg(long, default_value = "dispensed")]
        status: String,
        /// Scheduled time of day (HH:MM)
        #[arg(long)]
        scheduled: Option<String>,
        /// When it happened (RFC 3339 or unix seconds)
        #[arg(long, value_parser = parse_timestamp)]
        at: Option<DateTime<Utc>>,
    },

    /// Patient pressed the confirm button
    Confirm {
        #[arg(long)]
        device: String,
        #[arg(long)]
        slot: u32,
    },

    /// Dose was not confirmed in time
    Miss {
        #[arg(long)]
        device: String,
        #[arg(long)]
        slot: u32,
    },

    /// List dose events, newest first
    Events {
        #[arg(long)]
        device: String,
        #[arg(long, value_parser = parse_timestamp)]
        from: Option<DateTime<Utc>>,
        #[arg(long, value_parser = parse_timestamp)]
        to: Option<DateTime<Utc>>,
    },

    /// Compliance report over a trailing window
    Report {
        #[arg(long)]
        device: String,
        #[arg(long)]
        days: Option<u32>,
    },

    /// Record misses for doses past their grace period
    Sweep {
        /// Only this device (default: all devices)
        #[arg(long)]
        device: Option<String>,
    },

    /// Append a device's history to a CSV file
    Export {
        #[arg(long)]
        device: String,
        #[arg(long)]
        out: PathBuf,
    },
}

fn main() -> ExitCode {
    medimate_core::logging::init_with_level("warn");

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!("Command failed: {:?}", e);
            eprintln!("error: {}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

/// Exit status per failure kind
fn exit_code(error: &Error) -> u8 {
    match error.kind() {
        ErrorKind::InvalidInput => 2,
        ErrorKind::NotFound => 3,
        ErrorKind::Conflict => 4,
        ErrorKind::Unassigned => 5,
        ErrorKind::InvalidStatus => 6,
        ErrorKind::Storage => 1,
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(data_dir) = cli.data_dir {
        config.data.data_dir = data_dir;
    }

    let engine = DoseEngine::open(config)?;

    match cli.command {
        Commands::Register {
            device,
            patient,
            cartridges,
        } => {
            let cartridges = cartridges
                .as_deref()
                .map(read_cartridges)
                .transpose()?
                .unwrap_or_default();
            print_json(&engine.register_device(&device, &patient, cartridges)?)
        }
        Commands::Upsert {
            device,
            patient,
            cartridges,
        } => {
            let cartridges = cartridges.as_deref().map(read_cartridges).transpose()?;
            print_json(&engine.upsert_device_schedule(&device, patient.as_deref(), cartridges)?)
        }
        Commands::Show { device } => print_json(&engine.get_device(&device)?),
        Commands::Devices => print_json(&engine.list_devices()?),
        Commands::Assign { device, cartridges } => {
            let cartridges = read_cartridges(&cartridges)?;
            print_json(&engine.update_slot_assignments(&device, cartridges)?)
        }
        Commands::ClearSlot { device, slot } => print_json(&engine.clear_slot(&device, slot)?),
        Commands::Sync { device } => print_json(&engine.fetch_schedule(&device)?),
        Commands::Heartbeat { device } => {
            let last_sync = engine.heartbeat(&device)?;
            print_json(&serde_json::json!({ "lastSync": last_sync }))
        }
        Commands::Log {
            device,
            slot,
            medication,
            status,
            scheduled,
            at,
        } => {
            let status: DoseStatus = status.parse()?;
            let mut new = NewDoseEvent::new(device, slot, medication, status);
            new.scheduled_time = scheduled;
            new.occurred_at = at;
            print_json(&engine.record_event(new)?)
        }
        Commands::Confirm { device, slot } => print_json(&engine.confirm_dose(&device, slot)?),
        Commands::Miss { device, slot } => print_json(&engine.miss_dose(&device, slot)?),
        Commands::Events { device, from, to } => {
            print_json(&engine.list_events(&device, from, to)?)
        }
        Commands::Report { device, days } => print_json(&engine.generate_report(&device, days)?),
        Commands::Sweep { device } => {
            let recorded = match device {
                Some(device) => engine.sweep_missed_doses(&device)?,
                None => engine.sweep_all()?,
            };
            print_json(&recorded)
        }
        Commands::Export { device, out } => {
            let count = engine.export_events_csv(&device, &out)?;
            println!("Exported {} events to {}", count, out.display());
            Ok(())
        }
    }
}

fn read_cartridges(path: &Path) -> Result<Vec<SlotAssignment>> {
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|e| Error::InvalidInput {
        field: "cartridges".into(),
        reason: format!("{}: {}", path.display(), e),
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// RFC 3339, or unix seconds as sent by dispenser firmware
fn parse_timestamp(s: &str) -> std::result::Result<DateTime<Utc>, String> {
    if let Ok(secs) = s.parse::<i64>() {
        return Utc
            .timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| format!("timestamp {} is out of range", secs));
    }
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("expected RFC 3339 or unix seconds: {}", e))
}
