//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::accounts::{ContactForm, MotorcycleForm, ProfileUpdate, Registration};

/// Route commands.
#[derive(Debug, Subcommand)]
pub enum RouteCommand {
    /// Start a route: listen for the sensor device and record its frames
    Start {
        /// Address to listen on (overrides link.bind_addr)
        #[arg(short, long, value_name = "ADDR")]
        bind: Option<String>,

        /// Keep frames local; leave them for the batch sync
        #[arg(long)]
        no_upload: bool,
    },
}

/// Sync commands.
#[derive(Debug, Subcommand)]
pub enum SyncCommand {
    /// Upload every unsynced row now
    Now {
        /// Output the outcome as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Run the batch sync daily until interrupted
    Schedule,
}

/// Account commands.
#[derive(Debug, Subcommand)]
pub enum AccountCommand {
    /// Register a new rider
    Register(RegisterArgs),

    /// Log in
    Login {
        /// Login email
        #[arg(short, long)]
        email: String,

        /// Password
        #[arg(short, long)]
        password: String,
    },

    /// Log out
    Logout,

    /// Show the logged-in rider's profile
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Edit the logged-in rider's profile
    Update(UpdateArgs),
}

/// Registration arguments.
#[derive(Debug, Args)]
pub struct RegisterArgs {
    /// Full name
    #[arg(short, long)]
    pub name: String,

    /// Login email
    #[arg(short, long)]
    pub email: String,

    /// Phone number
    #[arg(short = 't', long)]
    pub phone: String,

    /// Password
    #[arg(short, long)]
    pub password: String,

    /// Company or fleet
    #[arg(long)]
    pub company: Option<String>,
}

impl From<RegisterArgs> for Registration {
    fn from(args: RegisterArgs) -> Self {
        Self {
            name: args.name,
            email: args.email,
            phone: args.phone,
            password: args.password,
            company: args.company,
        }
    }
}

/// Profile edit arguments. Omitted fields are left unchanged.
#[derive(Debug, Args)]
pub struct UpdateArgs {
    /// New full name
    #[arg(short, long)]
    pub name: Option<String>,

    /// New phone number
    #[arg(short = 't', long)]
    pub phone: Option<String>,

    /// New company
    #[arg(long)]
    pub company: Option<String>,

    /// New profile picture location
    #[arg(long)]
    pub image: Option<String>,

    /// New password
    #[arg(short, long)]
    pub password: Option<String>,
}

impl From<UpdateArgs> for ProfileUpdate {
    fn from(args: UpdateArgs) -> Self {
        Self {
            name: args.name,
            phone: args.phone,
            company: args.company,
            image_uri: args.image,
            password: args.password,
        }
    }
}

/// Motorcycle commands.
#[derive(Debug, Subcommand)]
pub enum MotorcycleCommand {
    /// Register or edit the rider's motorcycle
    Set(MotorcycleArgs),

    /// List the rider's motorcycles
    List {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },
}

/// Motorcycle editor arguments.
#[derive(Debug, Args)]
pub struct MotorcycleArgs {
    /// Brand
    #[arg(short, long)]
    pub brand: String,

    /// Model
    #[arg(short, long)]
    pub model: String,

    /// License plate
    #[arg(short, long)]
    pub plate: String,

    /// Model year
    #[arg(short, long)]
    pub year: Option<i32>,

    /// Engine displacement in cc
    #[arg(short, long)]
    pub displacement: Option<i32>,

    /// Insurance policy
    #[arg(short, long)]
    pub insurance: Option<String>,

    /// Color
    #[arg(long)]
    pub color: Option<String>,
}

impl From<MotorcycleArgs> for MotorcycleForm {
    fn from(args: MotorcycleArgs) -> Self {
        Self {
            brand: args.brand,
            model: args.model,
            plate: args.plate,
            year: args.year,
            displacement: args.displacement,
            insurance: args.insurance,
            color: args.color,
        }
    }
}

/// Emergency contact commands.
#[derive(Debug, Subcommand)]
pub enum ContactCommand {
    /// Add an emergency contact
    Add(ContactArgs),

    /// List emergency contacts
    List {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Replace an emergency contact
    Update {
        /// Contact id
        id: i64,

        #[command(flatten)]
        contact: ContactArgs,
    },

    /// Delete an emergency contact
    Delete {
        /// Contact id
        id: i64,
    },
}

/// Emergency contact arguments.
#[derive(Debug, Args)]
pub struct ContactArgs {
    /// Full name
    #[arg(short, long)]
    pub name: String,

    /// Ten-digit phone number
    #[arg(short = 't', long)]
    pub phone: String,

    /// Relationship to the rider
    #[arg(short, long)]
    pub relationship: Option<String>,

    /// Email
    #[arg(short, long)]
    pub email: Option<String>,
}

impl From<ContactArgs> for ContactForm {
    fn from(args: ContactArgs) -> Self {
        Self {
            full_name: args.name,
            phone_number: args.phone,
            relationship: args.relationship,
            email: args.email,
        }
    }
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}
