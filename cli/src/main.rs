//! matrix-cli - operate a placement matrix stored in a sled database

mod config;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use matrix_placement_core::{
    amount_from_f64, validate_snapshot, AccountStore, MatrixCode, PlacementEngine,
    PlacementRequest, Position, SledStore, SlotId, StoreSnapshot, TreeStore, TreeView,
};
use std::fs;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "matrix-cli", version, about = "Binary matrix placement tool")]
struct Cli {
    /// Path to the sled database
    #[arg(long, env = "MATRIX_DB", default_value = "matrix.db")]
    db: PathBuf,

    /// TOML file with engine settings
    #[arg(long, env = "MATRIX_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register a purchase and place its slots
    Place {
        /// Purchasing wallet address or user id
        #[arg(long)]
        owner: String,

        /// Paid amount in naira; fractions are kept to the kobo
        #[arg(long)]
        amount: f64,

        /// Manual placement, one side per slot (e.g. left,right)
        #[arg(long, value_delimiter = ',')]
        positions: Option<Vec<Position>>,

        /// Override the configured slot price, in naira
        #[arg(long)]
        slot_price: Option<f64>,

        /// Tokens per leftover naira
        #[arg(long)]
        token_rate: Option<f64>,
    },

    /// Show one slot
    Slot { id: SlotId },

    /// List an owner's slots in purchase order
    Slots { owner: String },

    /// Show an owner's account
    Account { owner: String },

    /// Print the matrix level by level with position codes
    Tree {
        /// Only print the first N levels
        #[arg(long)]
        depth: Option<u32>,
    },

    /// Write a snapshot of the whole store as JSON
    Export {
        /// Output file (stdout when omitted)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Check store invariants, or a previously exported snapshot file
    Verify { snapshot: Option<PathBuf> },
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let settings = config::resolve(cli.config.as_deref())?;
    let store = SledStore::open(&cli.db)
        .with_context(|| format!("opening database {}", cli.db.display()))?;
    let engine = PlacementEngine::new(store, settings)?;

    match cli.cmd {
        Commands::Place {
            owner,
            amount,
            positions,
            slot_price,
            token_rate,
        } => {
            let mut request = PlacementRequest::new(owner, amount_from_f64(amount)?);
            request.slot_price = slot_price.map(amount_from_f64).transpose()?;
            request.token_rate = token_rate;
            request.positions = positions;

            let result = engine.place(&request)?;
            print_json(&result)?;
        }

        Commands::Slot { id } => {
            let slot = engine.store().get(id)?;
            let code = engine.code_of(id)?;
            print_json(&serde_json::json!({
                "slot": slot,
                "code": code,
            }))?;
        }

        Commands::Slots { owner } => {
            let slots = engine.store().slots_of(&owner)?;
            print_json(&slots)?;
        }

        Commands::Account { owner } => {
            let account = engine
                .store()
                .account(&owner)?
                .ok_or_else(|| anyhow!("no account for {}", owner))?;
            print_json(&account)?;
        }

        Commands::Tree { depth } => {
            let view = TreeView::from_slots(engine.store().all_slots()?);
            let max_level = depth.unwrap_or(u32::MAX).min(view.depth());
            for level in 1..=max_level {
                let row: Vec<String> = view
                    .level(level)
                    .into_iter()
                    .map(|slot| {
                        let code = MatrixCode::encode(slot, |id| view.get(&id).cloned())
                            .map(|c| c.to_string())
                            .unwrap_or_else(|_| "?".to_string());
                        format!("{}:{}", code, slot.owner())
                    })
                    .collect();
                println!("{}  {}", MatrixCode::level_letters(level), row.join("  "));
            }
        }

        Commands::Export { out } => {
            let snapshot = StoreSnapshot::capture(engine.store(), engine.config())?;
            let json = serde_json::to_string_pretty(&snapshot)?;
            match out {
                Some(path) => {
                    fs::write(&path, json)
                        .with_context(|| format!("writing snapshot {}", path.display()))?;
                    info!(path = %path.display(), slots = snapshot.slots.len(), "snapshot exported");
                }
                None => println!("{}", json),
            }
        }

        Commands::Verify { snapshot } => {
            let (slots, accounts) = match snapshot {
                Some(path) => {
                    let raw = fs::read_to_string(&path)
                        .with_context(|| format!("reading snapshot {}", path.display()))?;
                    let snapshot: StoreSnapshot = serde_json::from_str(&raw)?;
                    snapshot.verify_hash()?;
                    (snapshot.slots, snapshot.accounts)
                }
                None => (engine.store().all_slots()?, engine.store().accounts()?),
            };
            validate_snapshot(&slots, &accounts)?;
            println!("ok: {} slots, {} accounts", slots.len(), accounts.len());
        }
    }

    Ok(())
}
