//! uefivar - UEFI variable storage command line
//!
//! # Usage
//!
//! ```bash
//! uefivar list                                   # List stored variables
//! uefivar get Lang 8be4df61-93ca-11d2-aa0d-00e098032b8c
//! uefivar set Lang 8be4df61-93ca-11d2-aa0d-00e098032b8c 656E67 --attr 7
//! uefivar update new_nvram.bin                   # Adapt store to new firmware
//! uefivar import old_nvram.bin                   # Replace store with a dump
//! uefivar dump nvram.bin                         # Decode a dump, store untouched
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;
use uuid::Uuid;

use uefivar::varstore::snapshot::{bin_to_hex, hex_to_bin};
use uefivar::varstore::{self, FileBackend, VariableStore, DEFAULT_STORAGE_FILE};
use uefivar::{logger, VariableService};

#[derive(Parser)]
#[command(name = "uefivar", bin_name = "uefivar")]
#[command(about = "UEFI variable storage")]
struct Cli {
    /// Path to the variable snapshot
    #[arg(long, global = true, default_value = DEFAULT_STORAGE_FILE)]
    storage: PathBuf,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, global = true, default_value_t = LevelFilter::Info)]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a variable's attributes and data
    Get {
        /// Variable name
        name: String,
        /// Vendor GUID
        guid: Uuid,
    },

    /// Create or change a variable
    Set {
        /// Variable name
        name: String,
        /// Vendor GUID
        guid: Uuid,
        /// Data as hex string
        data: String,
        /// UEFI attributes
        #[arg(long, default_value_t = 7)]
        attr: u32,
    },

    /// Remove a variable
    Remove {
        /// Variable name
        name: String,
        /// Vendor GUID
        guid: Uuid,
    },

    /// Print the variable following the given one (first if no name)
    Next {
        /// Variable name
        name: Option<String>,
        /// Vendor GUID
        guid: Option<Uuid>,
    },

    /// List all stored variables
    List,

    /// Remove all stored variables
    Reset,

    /// Adapt stored variables to a new firmware NVRAM volume
    Update {
        /// NVRAM volume dump of the new firmware
        image: PathBuf,
    },

    /// Replace stored variables with an NVRAM volume dump
    Import {
        /// NVRAM volume dump of the old firmware
        image: PathBuf,
    },

    /// Decode an NVRAM volume dump without touching the store
    Dump {
        /// NVRAM volume dump
        image: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logger::init(cli.log_level).context("Failed to set logger")?;

    match cli.command {
        Commands::Dump { image } => dump(&image),
        command => run(&cli.storage, command),
    }
}

fn run(storage: &Path, command: Commands) -> Result<()> {
    let store = VariableStore::open(FileBackend::new(storage))
        .with_context(|| format!("Failed to open variable store {}", storage.display()))?;
    let service = VariableService::new(store);

    match command {
        Commands::Get { name, guid } => {
            let (attr, data) = service
                .get_variable(&name, guid.as_bytes())
                .with_context(|| format!("Failed to get {}", name))?;
            println!("attr: {:#010x}", attr);
            println!("data: {}", bin_to_hex(&data));
        }
        Commands::Set {
            name,
            guid,
            data,
            attr,
        } => {
            let data = hex_to_bin(&data).context("Invalid data")?;
            service
                .set_variable(&name, guid.as_bytes(), attr, data)
                .with_context(|| format!("Failed to set {}", name))?;
        }
        Commands::Remove { name, guid } => {
            service
                .remove_variable(&name, guid.as_bytes())
                .with_context(|| format!("Failed to remove {}", name))?;
        }
        Commands::Next { name, guid } => {
            let name = name.unwrap_or_default();
            let guid = guid.unwrap_or_else(Uuid::nil);
            let (next, next_guid) = service
                .next_variable(&name, guid.as_bytes())
                .context("No next variable")?;
            println!("{} {:X}", next, Uuid::from_bytes(next_guid).hyphenated());
        }
        Commands::List => {
            for (key, value) in service.list() {
                println!(
                    "{:X} {} attr={:#x} data={}",
                    key.guid.hyphenated(),
                    key.name,
                    value.attributes,
                    bin_to_hex(&value.data)
                );
            }
        }
        Commands::Reset => service.reset().context("Failed to reset")?,
        Commands::Update { image } => service
            .update_vars(&image)
            .with_context(|| format!("Failed to update from {}", image.display()))?,
        Commands::Import { image } => service
            .import_vars(&image)
            .with_context(|| format!("Failed to import {}", image.display()))?,
        Commands::Dump { image } => dump(&image)?,
    }

    Ok(())
}

fn dump(image: &Path) -> Result<()> {
    let variables = varstore::parse_volume_file(image)
        .with_context(|| format!("Failed to parse {}", image.display()))?;

    for (key, value) in &variables {
        println!(
            "{:X} {} attr={:#x} size={}",
            key.guid.hyphenated(),
            key.name,
            value.attributes,
            value.data.len()
        );
        println!("    {}", bin_to_hex(&value.data));
    }
    println!("{} variables", variables.len());
    Ok(())
}
