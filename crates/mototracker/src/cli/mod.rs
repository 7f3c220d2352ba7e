//! Command-line interface for mototracker.
//!
//! This module provides the CLI structure for the `mototrk` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    AccountCommand, ConfigCommand, ContactArgs, ContactCommand, MotorcycleArgs, MotorcycleCommand,
    RegisterArgs, RouteCommand, StatusCommand, SyncCommand, UpdateArgs,
};

use crate::logging::Verbosity;

/// mototrk - Motorcycle telemetry with crash detection
///
/// Records frames from a paired sensor device, flags possible accidents,
/// notifies emergency contacts through the remote store and keeps rider,
/// motorcycle and contact data in sync.
#[derive(Debug, Parser)]
#[command(name = "mototrk")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Record a ride from the sensor device
    #[command(subcommand)]
    Route(RouteCommand),

    /// Upload unsynced data to the remote store
    #[command(subcommand)]
    Sync(SyncCommand),

    /// Register, log in and manage the rider profile
    #[command(subcommand)]
    Account(AccountCommand),

    /// Manage the rider's motorcycle
    #[command(subcommand)]
    Motorcycle(MotorcycleCommand),

    /// Manage emergency contacts
    #[command(subcommand)]
    Contact(ContactCommand),

    /// Show local store and sync status
    Status(StatusCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else {
            match self.verbose {
                0 => Verbosity::Normal,
                1 => Verbosity::Verbose,
                _ => Verbosity::Trace,
            }
        }
    }
}
