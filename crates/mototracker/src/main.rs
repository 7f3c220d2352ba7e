//! `mototrk` - CLI for mototracker
//!
//! This binary records rides from the sensor device, manages the rider's
//! account data and drives the sync with the remote store.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use tracing::warn;

use mototracker::cli::{
    AccountCommand, Cli, Command, ConfigCommand, ContactCommand, MotorcycleCommand, RouteCommand,
    SyncCommand,
};
use mototracker::{
    init_logging, remote, Accounts, BatchSync, Config, DeviceLink, DocumentStore, Error,
    RouteService, Scheduler, Storage, SyncOutcome,
};

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> CliResult {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Config commands must work even when the config file is broken
    if let Command::Config(config_cmd) = cli.command {
        return handle_config(cli.config, config_cmd);
    }

    let result = run(cli).await;

    // Bad input gets a one-line message instead of an error dump
    if let Err(e) = &result {
        if let Some(err) = e.downcast_ref::<Error>() {
            if err.is_user_error() {
                eprintln!("error: {err}");
                std::process::exit(2);
            }
        }
    }
    result
}

async fn run(cli: Cli) -> CliResult {
    let config = Config::load_from(cli.config.clone())?;
    let storage = Arc::new(Storage::open(config.database_path())?);

    match cli.command {
        Command::Route(RouteCommand::Start { bind, no_upload }) => {
            handle_route(config, storage, bind, no_upload).await
        }
        Command::Sync(sync_cmd) => handle_sync(&config, storage, sync_cmd).await,
        Command::Account(account_cmd) => handle_account(&Accounts::new(storage), account_cmd),
        Command::Motorcycle(motorcycle_cmd) => {
            handle_motorcycle(&Accounts::new(storage), motorcycle_cmd)
        }
        Command::Contact(contact_cmd) => handle_contact(&Accounts::new(storage), contact_cmd),
        Command::Status(status_cmd) => handle_status(&config, &storage, status_cmd.json),
        Command::Config(_) => Ok(()),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot listen for Ctrl-C, running until the device disconnects");
        std::future::pending::<()>().await;
    }
}

fn remote_store(config: &Config) -> Result<Arc<dyn DocumentStore>, Error> {
    remote::from_config(&config.remote)?.ok_or_else(|| Error::ConfigValidation {
        message: "remote.base_url is not configured".to_string(),
    })
}

async fn handle_route(
    mut config: Config,
    storage: Arc<Storage>,
    bind: Option<String>,
    no_upload: bool,
) -> CliResult {
    if let Some(addr) = bind {
        config.link.bind_addr = addr;
        config.validate()?;
    }

    let store = if no_upload {
        None
    } else {
        remote::from_config(&config.remote)?
    };

    let link = DeviceLink::bind(&config.link).await?;
    println!("Waiting for the sensor device on {}", link.local_addr()?);
    println!("Press Ctrl-C to end the route.");

    let service = RouteService::new(storage, store, &config);
    let summary = service.run(link, shutdown_signal()).await?;

    let report = &summary.ingest;
    println!();
    println!("Route finished: {}", summary.exit);
    println!("  Duration:           {}s", summary.duration_secs);
    println!("  Frames received:    {}", report.frames_received);
    println!("  Frames stored:      {}", report.frames_stored);
    println!("  Duplicates:         {}", report.duplicates);
    println!("  Malformed:          {}", report.decode_failures);
    println!("  Accidents:          {}", report.accidents);
    println!(
        "  Uploads:            {} ok, {} failed",
        report.uploads_ok, report.uploads_failed
    );
    println!(
        "  Emergency alerts:   {} sent, {} skipped, {} failed",
        report.emergencies_sent, report.emergencies_skipped, report.emergency_failures
    );
    if report.uploads_failed > 0 {
        println!("Failed uploads stay queued; run `mototrk sync now` to retry.");
    }
    Ok(())
}

async fn handle_sync(config: &Config, storage: Arc<Storage>, cmd: SyncCommand) -> CliResult {
    let store = remote_store(config)?;
    let batch = BatchSync::new(storage, store, config.sync.include_sensor_backlog);

    match cmd {
        SyncCommand::Now { json } => {
            let outcome = batch.run().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                let counts = outcome.counts();
                println!(
                    "Uploaded {} users, {} motorcycles, {} contacts, {} sensor samples",
                    counts.users, counts.motorcycles, counts.contacts, counts.sensor_samples
                );
            }
            if let SyncOutcome::Retry { entity, error, .. } = outcome {
                return Err(format!("sync stopped while uploading {entity}: {error}").into());
            }
        }
        SyncCommand::Schedule => {
            let scheduler = Scheduler::new(batch, config.sync_time()?, config.sync.max_retries);
            println!(
                "Syncing daily at {}. Press Ctrl-C to stop.",
                config.sync.daily_at
            );
            scheduler.run_until(shutdown_signal()).await;
        }
    }
    Ok(())
}

fn handle_account(accounts: &Accounts, cmd: AccountCommand) -> CliResult {
    match cmd {
        AccountCommand::Register(args) => {
            let user = accounts.register(&args.into())?;
            println!("Registered {} <{}>.", user.name, user.email);
            println!("Log in with `mototrk account login`.");
        }
        AccountCommand::Login { email, password } => {
            let user = accounts.login(&email, &password)?;
            println!("Welcome, {}.", user.name);
        }
        AccountCommand::Logout => {
            if accounts.logout()? {
                println!("Logged out.");
            } else {
                println!("Nobody was logged in.");
            }
        }
        AccountCommand::Show { json } => {
            let profile = accounts.profile()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&profile)?);
            } else {
                let user = &profile.user;
                println!("{} <{}>", user.name, user.email);
                println!("  Phone:       {}", user.phone);
                if !user.company.is_empty() {
                    println!("  Company:     {}", user.company);
                }
                println!("  Synced:      {}", user.synced);
                println!("  Motorcycles: {}", profile.motorcycles.len());
                println!("  Contacts:    {}", profile.contacts.len());
            }
        }
        AccountCommand::Update(args) => {
            let user = accounts.update_profile(&args.into())?;
            println!("Profile updated for {}.", user.name);
        }
    }
    Ok(())
}

fn handle_motorcycle(accounts: &Accounts, cmd: MotorcycleCommand) -> CliResult {
    match cmd {
        MotorcycleCommand::Set(args) => {
            let motorcycle = accounts.save_motorcycle(&args.into())?;
            println!(
                "Saved {} {} ({}).",
                motorcycle.brand, motorcycle.model, motorcycle.plate
            );
        }
        MotorcycleCommand::List { json } => {
            let motorcycles = accounts.motorcycles()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&motorcycles)?);
            } else if motorcycles.is_empty() {
                println!("No motorcycles registered.");
            } else {
                for m in motorcycles {
                    println!(
                        "{:>4}  {} {}  {}{}",
                        m.id.unwrap_or_default(),
                        m.brand,
                        m.model,
                        m.plate,
                        if m.synced { "" } else { "  (not synced)" }
                    );
                }
            }
        }
    }
    Ok(())
}

fn handle_contact(accounts: &Accounts, cmd: ContactCommand) -> CliResult {
    match cmd {
        ContactCommand::Add(args) => {
            let contact = accounts.add_contact(&args.into())?;
            println!(
                "Added contact {} ({}).",
                contact.id.unwrap_or_default(),
                contact.full_name
            );
        }
        ContactCommand::List { json } => {
            let contacts = accounts.contacts()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&contacts)?);
            } else if contacts.is_empty() {
                println!("No emergency contacts.");
            } else {
                for c in contacts {
                    println!(
                        "{:>4}  {}  {}  {}",
                        c.id.unwrap_or_default(),
                        c.full_name,
                        c.phone_number,
                        c.relationship.as_deref().unwrap_or("-")
                    );
                }
            }
        }
        ContactCommand::Update { id, contact } => {
            let contact = accounts.update_contact(id, &contact.into())?;
            println!("Updated contact {id} ({}).", contact.full_name);
        }
        ContactCommand::Delete { id } => {
            accounts.delete_contact(id)?;
            println!("Deleted contact {id}.");
        }
    }
    Ok(())
}

fn handle_status(config: &Config, storage: &Storage, json: bool) -> CliResult {
    let stats = storage.stats()?;
    let session = storage.session_user_id()?;
    let route = storage.route_started_at()?;

    if json {
        let status = serde_json::json!({
            "database_path": config.database_path(),
            "remote_configured": config.remote.base_url.is_some(),
            "session_user_id": session,
            "route_started_at": route,
            "stats": stats,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("mototrk status");
    println!("--------------");
    println!("Database:      {}", config.database_path().display());
    println!(
        "Remote:        {}",
        config.remote.base_url.as_deref().unwrap_or("not configured")
    );
    println!(
        "Session:       {}",
        session.map_or_else(|| "logged out".to_string(), |id| format!("user {id}"))
    );
    if let Some(started) = route {
        let minutes = (Utc::now() - started).num_minutes();
        println!("Route:         running for {minutes} min");
    }
    println!();
    println!("Stored            total  unsynced");
    println!("  Users          {:>6}  {:>8}", stats.users, stats.unsynced_users);
    println!(
        "  Motorcycles    {:>6}  {:>8}",
        stats.motorcycles, stats.unsynced_motorcycles
    );
    println!(
        "  Contacts       {:>6}  {:>8}",
        stats.emergency_contacts, stats.unsynced_contacts
    );
    println!(
        "  Sensor samples {:>6}  {:>8}",
        stats.sensor_samples, stats.unsynced_samples
    );
    println!("  Accidents      {:>6}", stats.accidents);
    if let Some(newest) = &stats.newest_sample {
        println!("Newest sample: {newest}");
    }
    Ok(())
}

fn handle_config(path: Option<std::path::PathBuf>, cmd: ConfigCommand) -> CliResult {
    match cmd {
        ConfigCommand::Show { json } => {
            let mut config = Config::load_from(path)?;
            if config.remote.api_key.is_some() {
                config.remote.api_key = Some("********".to_string());
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!();
                println!("[Link]");
                println!("  Bind address:       {}", config.link.bind_addr);
                println!("  Framing:            {:?}", config.link.framing);
                println!("  Read buffer:        {} bytes", config.link.read_buffer_bytes);
                println!("  Max frame:          {} bytes", config.link.max_frame_bytes);
                println!();
                println!("[Detection]");
                println!("  Accel threshold:    {}", config.detection.accel_threshold);
                println!("  Gyro threshold:     {}", config.detection.gyro_threshold);
                println!();
                println!("[Remote]");
                println!(
                    "  Base URL:           {}",
                    config.remote.base_url.as_deref().unwrap_or("(none)")
                );
                println!(
                    "  API key:            {}",
                    if config.remote.api_key.is_some() { "set" } else { "(none)" }
                );
                println!("  Timeout:            {}s", config.remote.timeout_secs);
                println!();
                println!("[Sync]");
                println!("  Daily at:           {}", config.sync.daily_at);
                println!("  Max retries:        {}", config.sync.max_retries);
                println!(
                    "  Sensor backlog:     {}",
                    config.sync.include_sensor_backlog
                );
            }
        }
        ConfigCommand::Path => {
            println!(
                "{}",
                path.unwrap_or_else(Config::default_config_path).display()
            );
        }
        ConfigCommand::Validate { file } => {
            let path = file.or(path).unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => {
                    println!("Configuration error: {e}");
                    return Err(e.into());
                }
            }
        }
    }
    Ok(())
}
