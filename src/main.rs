// ⚡ killua - command line front end for the electricity tracker
//
// Every command opens the configured database, runs one operation and exits.
// `--json` prints the result as JSON instead of the human summary.

use std::fs::File;
use std::io;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::debug;

use killua_tracker::config::Config;
use killua_tracker::db::{open_database, setup_database, Backend, Database, TIMESTAMP_FORMAT};
use killua_tracker::validation::{parse_entry_spec, validate_duration, validate_month};
use killua_tracker::{
    compute, export_records_csv, logging, reporting, round_to_cents, DeviceRegistry, KilluaError,
    Owner, RateProvider, RecordStore, UsageSession,
};

// ============================================================================
// ARGUMENTS
// ============================================================================

/// Killua-T - track household electricity usage and cost
#[derive(Parser, Debug)]
#[command(name = "killua")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (overrides KILLUA_CONFIG)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// SQLite database file (overrides config and KILLUA_DB_PATH)
    #[arg(long, value_name = "PATH", global = true)]
    db: Option<PathBuf>,

    /// Act as this user; omit for shared devices and records
    #[arg(long, value_name = "ID", global = true)]
    user: Option<i64>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage devices
    #[command(subcommand)]
    Device(DeviceCommand),

    /// Show or change the electricity rate
    #[command(subcommand)]
    Rate(RateCommand),

    /// Estimate or record device usage
    #[command(subcommand)]
    Usage(UsageCommand),

    /// Browse and maintain saved records
    #[command(subcommand)]
    Records(RecordsCommand),

    /// Totals, monthly cost and most used devices
    Stats(StatsArgs),
}

#[derive(Subcommand, Debug)]
enum DeviceCommand {
    /// Register a device
    Add {
        name: String,
        /// Power draw in watts
        watts: f64,
    },
    /// List your devices and shared ones
    List,
    /// Change a device's name and/or wattage
    Update {
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        watts: Option<f64>,
    },
    /// Remove a device (saved records are kept)
    Delete {
        id: i64,
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
enum RateCommand {
    /// Current rate in PHP per kWh
    Show,
    /// Record a new rate
    Set { rate: f64 },
    /// Recent rate changes, oldest first
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Subcommand, Debug)]
enum UsageCommand {
    /// Price a run without saving anything
    Estimate(EstimateArgs),
    /// Save one or more entries as a record
    Record {
        /// DEVICE:HOURS:MINUTES or DEVICE:MINUTES, repeatable
        #[arg(long = "entry", short = 'e', value_name = "ENTRY", required = true)]
        entries: Vec<String>,
    },
}

#[derive(Args, Debug)]
struct EstimateArgs {
    /// Registered device name
    #[arg(long, conflicts_with = "watts", required_unless_present = "watts")]
    device: Option<String>,

    /// Wattage, for an unregistered device
    #[arg(long)]
    watts: Option<f64>,

    #[arg(long, default_value_t = 0.0)]
    hours: f64,

    #[arg(long, default_value_t = 0.0)]
    minutes: f64,
}

#[derive(Subcommand, Debug)]
enum RecordsCommand {
    /// Saved records, newest first
    List,
    /// One record with its items
    Show { id: i64 },
    /// Delete a record and its items
    Delete {
        id: i64,
        #[arg(long)]
        yes: bool,
    },
    /// Delete all of your records
    Clear {
        /// Every owner's records, not just yours (only without --user)
        #[arg(long)]
        all: bool,
        #[arg(long)]
        yes: bool,
    },
    /// Write records as CSV, one row per item
    Export {
        /// Output file; stdout when omitted
        #[arg(long, short = 'o', value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct StatsArgs {
    /// Month for the monthly cost, YYYY-MM (default: this month)
    #[arg(long)]
    month: Option<String>,

    /// How many devices to rank
    #[arg(long, default_value_t = 3)]
    top: usize,
}

// ============================================================================
// MAIN
// ============================================================================

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            let mut config = Config::load_from(path)?;
            config.apply_env(|key| std::env::var(key).ok())?;
            config.validate()?;
            config
        }
        None => Config::load()?,
    };
    if let Some(path) = &cli.db {
        config.database.backend = Backend::Sqlite;
        config.database.path = Some(path.clone());
    }

    logging::init(&config.logging.level, config.logging.format, cli.verbose);

    let location = config.database.location();
    let mut db = open_database(&config.database)
        .with_context(|| format!("opening database {}", location))?;
    setup_database(db.as_mut(), config.rates.default_rate, config.rates.seed_default)
        .context("initializing schema")?;
    debug!(backend = config.database.backend.as_str(), %location, "database ready");

    let owner = Owner::from_user_id(cli.user);
    let ctx = Ctx {
        owner,
        json: cli.json,
        default_rate: config.rates.default_rate,
    };

    match cli.command {
        Commands::Device(cmd) => run_device(&ctx, db.as_mut(), cmd),
        Commands::Rate(cmd) => run_rate(&ctx, db.as_mut(), cmd),
        Commands::Usage(cmd) => run_usage(&ctx, db.as_mut(), cmd),
        Commands::Records(cmd) => run_records(&ctx, db.as_mut(), cmd),
        Commands::Stats(args) => run_stats(&ctx, db.as_mut(), args),
    }
}

struct Ctx {
    owner: Owner,
    json: bool,
    default_rate: f64,
}

impl Ctx {
    /// Print `value` as JSON when `--json` was given, else run `human`.
    fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce(&T)) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            human(value);
        }
        Ok(())
    }
}

fn require_yes(yes: bool, what: &str) -> Result<()> {
    if !yes {
        bail!("{} cannot be undone; pass --yes to confirm", what);
    }
    Ok(())
}

/// Which records `records clear` may remove. `--all` reaches other users'
/// records, so it is only allowed without `--user`.
fn clear_scope(all: bool, owner: Owner) -> Result<Option<Owner>> {
    match (all, owner) {
        (false, owner) => Ok(Some(owner)),
        (true, Owner::Shared) => Ok(None),
        (true, Owner::User(_)) => bail!("--all clears every user's records; run it without --user"),
    }
}

fn peso(value: f64) -> String {
    format!("₱{:.2}", round_to_cents(value))
}

// ============================================================================
// DEVICES
// ============================================================================

fn run_device(ctx: &Ctx, db: &mut dyn Database, cmd: DeviceCommand) -> Result<()> {
    let mut registry = DeviceRegistry::new(db);

    match cmd {
        DeviceCommand::Add { name, watts } => {
            let device = registry.add_device(&name, watts, ctx.owner)?;
            ctx.emit(&device, |d| {
                println!("✓ Added device #{} {} ({} W)", d.id, d.name, d.watt_per_hour)
            })
        }
        DeviceCommand::List => {
            let devices = registry.list_devices(ctx.owner)?;
            ctx.emit(&devices, |devices| {
                if devices.is_empty() {
                    println!("No devices yet. Add one with: killua device add NAME WATTS");
                    return;
                }
                println!("{:>5}  {:<24} {:>10}  {}", "ID", "NAME", "WATTS", "OWNER");
                for d in devices {
                    println!("{:>5}  {:<24} {:>10}  {}", d.id, d.name, d.watt_per_hour, d.owner);
                }
            })
        }
        DeviceCommand::Update { id, name, watts } => {
            if name.is_none() && watts.is_none() {
                bail!("nothing to update; pass --name and/or --watts");
            }
            let device = registry.patch_device(id, name.as_deref(), watts, ctx.owner)?;
            ctx.emit(&device, |d| {
                println!("✓ Updated device #{} {} ({} W)", d.id, d.name, d.watt_per_hour)
            })
        }
        DeviceCommand::Delete { id, yes } => {
            require_yes(yes, "deleting a device")?;
            let device = registry.delete_device(id, ctx.owner)?;
            ctx.emit(&device, |d| println!("🗑️  Deleted device #{} {}", d.id, d.name))
        }
    }
}

// ============================================================================
// RATES
// ============================================================================

fn run_rate(ctx: &Ctx, db: &mut dyn Database, cmd: RateCommand) -> Result<()> {
    let mut rates = RateProvider::new(db, ctx.default_rate);

    match cmd {
        RateCommand::Show => {
            let rate = rates.current_rate()?;
            ctx.emit(&rate, |r| println!("Current rate: {} per kWh", peso(*r)))
        }
        RateCommand::Set { rate } => {
            let entry = rates.add_rate(rate)?;
            ctx.emit(&entry, |e| {
                println!(
                    "✓ Rate set to {} per kWh at {}",
                    peso(e.rate),
                    e.created_at.format(TIMESTAMP_FORMAT)
                )
            })
        }
        RateCommand::History { limit } => {
            let history = rates.try_rate_history(limit)?;
            ctx.emit(&history, |history| {
                if history.is_empty() {
                    println!("No rates recorded; using default {}", peso(ctx.default_rate));
                }
                for e in history {
                    println!("{}  {}", e.created_at.format(TIMESTAMP_FORMAT), peso(e.rate));
                }
            })
        }
    }
}

// ============================================================================
// USAGE
// ============================================================================

#[derive(Serialize)]
struct EstimateOutput {
    device: Option<String>,
    watt_per_hour: f64,
    duration_minutes: f64,
    rate: f64,
    kwh: f64,
    cost: f64,
}

fn run_usage(ctx: &Ctx, db: &mut dyn Database, cmd: UsageCommand) -> Result<()> {
    match cmd {
        UsageCommand::Estimate(args) => {
            let minutes = validate_duration(args.hours, args.minutes)?;
            let (device, watts) = match (args.device, args.watts) {
                (Some(name), _) => {
                    let device = DeviceRegistry::new(&mut *db)
                        .find_device_by_name(&name, ctx.owner)?
                        .ok_or_else(|| KilluaError::validation(format!("no device named '{}'", name)))?;
                    (Some(device.name), device.watt_per_hour)
                }
                (None, Some(watts)) if watts.is_finite() && watts > 0.0 => (None, watts),
                (None, _) => bail!("--watts must be greater than 0"),
            };
            let rate = RateProvider::new(db, ctx.default_rate).current_rate()?;
            let estimate = compute(watts, minutes, rate);

            let out = EstimateOutput {
                device,
                watt_per_hour: watts,
                duration_minutes: minutes,
                rate,
                kwh: estimate.kwh,
                cost: estimate.cost,
            };
            ctx.emit(&out, |o| {
                println!(
                    "{} W for {} min at {}/kWh: {:.3} kWh, {}",
                    o.watt_per_hour,
                    o.duration_minutes,
                    peso(o.rate),
                    o.kwh,
                    peso(o.cost)
                )
            })
        }
        UsageCommand::Record { entries } => {
            let parsed = entries
                .iter()
                .map(|raw| parse_entry_spec(raw))
                .collect::<killua_tracker::Result<Vec<_>>>()?;

            let rate = RateProvider::new(&mut *db, ctx.default_rate).current_rate()?;
            let mut session = UsageSession::new(ctx.owner, ctx.default_rate);
            for entry in &parsed {
                let device = DeviceRegistry::new(&mut *db)
                    .find_device_by_name(&entry.device, ctx.owner)?
                    .ok_or_else(|| {
                        KilluaError::validation(format!("no device named '{}'", entry.device))
                    })?;
                session.add_device_entry(&device, rate, entry.hours, entry.minutes)?;
            }

            let saved = session.confirm(db).context("saving record")?;
            ctx.emit(&saved, |s| {
                println!(
                    "✓ Saved record #{} ({} items): {:.3} kWh, {}",
                    s.record.id,
                    s.items.len(),
                    s.record.total_kwh,
                    peso(s.record.total_cost)
                );
                for item in &s.items {
                    println!(
                        "   {:<24} {:>6} min  {:.3} kWh  {}",
                        item.device_name,
                        item.duration_minutes,
                        item.kwh_used,
                        peso(item.cost)
                    );
                }
            })
        }
    }
}

// ============================================================================
// RECORDS
// ============================================================================

fn run_records(ctx: &Ctx, db: &mut dyn Database, cmd: RecordsCommand) -> Result<()> {
    match cmd {
        RecordsCommand::List => {
            let records = RecordStore::new(db).list_records(ctx.owner)?;
            ctx.emit(&records, |records| {
                if records.is_empty() {
                    println!("No records yet.");
                }
                for r in records {
                    println!(
                        "#{:<5} {}  {:>8.3} kWh  {:>10}",
                        r.id,
                        r.date.format(TIMESTAMP_FORMAT),
                        r.total_kwh,
                        peso(r.total_cost)
                    );
                }
            })
        }
        RecordsCommand::Show { id } => {
            let mut store = RecordStore::new(db);
            let record = store.find_owned_record(id, ctx.owner)?;
            let saved = killua_tracker::SavedRecord {
                items: store.record_items(id)?,
                record,
            };
            ctx.emit(&saved, |s| {
                println!(
                    "Record #{} on {}: {:.3} kWh, {}",
                    s.record.id,
                    s.record.date.format(TIMESTAMP_FORMAT),
                    s.record.total_kwh,
                    peso(s.record.total_cost)
                );
                for item in &s.items {
                    println!(
                        "   {:<24} {:>7} W {:>6} min  {:.3} kWh  {}",
                        item.device_name,
                        item.watt_per_hour,
                        item.duration_minutes,
                        item.kwh_used,
                        peso(item.cost)
                    );
                }
            })
        }
        RecordsCommand::Delete { id, yes } => {
            require_yes(yes, "deleting a record")?;
            let items = RecordStore::new(db).delete_owned_record(id, ctx.owner)?;
            ctx.emit(&items, |n| println!("🗑️  Deleted record #{} and {} items", id, n))
        }
        RecordsCommand::Clear { all, yes } => {
            require_yes(yes, "clearing records")?;
            let scope = clear_scope(all, ctx.owner)?;
            let removed = RecordStore::new(db).clear_records(scope)?;
            ctx.emit(&removed, |n| println!("🗑️  Removed {} records", n))
        }
        RecordsCommand::Export { output } => {
            let rows = match &output {
                Some(path) => {
                    let file = File::create(path)
                        .with_context(|| format!("creating {}", path.display()))?;
                    export_records_csv(db, ctx.owner, file)?
                }
                None => export_records_csv(db, ctx.owner, io::stdout().lock())?,
            };
            if let Some(path) = output {
                eprintln!("✓ Exported {} rows to {}", rows, path.display());
            }
            Ok(())
        }
    }
}

// ============================================================================
// STATS
// ============================================================================

fn run_stats(ctx: &Ctx, db: &mut dyn Database, args: StatsArgs) -> Result<()> {
    let month = match args.month {
        Some(raw) => validate_month(&raw)?,
        None => Local::now().format("%Y-%m").to_string(),
    };
    let summary = reporting::summary(db, ctx.owner, &month, args.top);

    ctx.emit(&summary, |s| {
        println!("📊 Usage for {}", s.owner);
        println!("   Records:     {}", s.record_count);
        println!("   Total kWh:   {:.3}", s.total_kwh);
        println!("   Total cost:  {}", peso(s.total_cost));
        println!("   {} cost: {}", s.month, peso(s.month_cost));
        if !s.top_devices.is_empty() {
            println!("\n   Most used devices:");
            for (rank, d) in s.top_devices.iter().enumerate() {
                println!(
                    "   {}. {:<24} {:>7} min  {}",
                    rank + 1,
                    d.device_name,
                    d.total_minutes,
                    peso(d.total_cost)
                );
            }
        }
    })
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
    fn test_parse_usage_record() {
        let cli = Cli::try_parse_from([
            "killua", "--user", "3", "usage", "record", "-e", "Fan:1:30", "-e", "TV:45",
        ])
        .unwrap();

        assert_eq!(cli.user, Some(3));
        match cli.command {
            Commands::Usage(UsageCommand::Record { entries }) => {
                assert_eq!(entries, vec!["Fan:1:30", "TV:45"]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_estimate_needs_device_or_watts() {
        assert!(Cli::try_parse_from(["killua", "usage", "estimate", "--minutes", "30"]).is_err());
        assert!(Cli::try_parse_from([
            "killua", "usage", "estimate", "--device", "Fan", "--watts", "60"
        ])
        .is_err());
    }

    #[test]
    fn test_clear_all_needs_shared_caller() {
        assert_eq!(clear_scope(false, Owner::User(2)).unwrap(), Some(Owner::User(2)));
        assert_eq!(clear_scope(false, Owner::Shared).unwrap(), Some(Owner::Shared));
        assert_eq!(clear_scope(true, Owner::Shared).unwrap(), None);
        assert!(clear_scope(true, Owner::User(2)).is_err());
    }

    #[test]
    fn test_require_yes() {
        assert!(require_yes(false, "deleting a record").is_err());
        assert!(require_yes(true, "deleting a record").is_ok());
    }
}
