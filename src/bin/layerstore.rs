//! layerstore admin tool
//!
//! Inspects and edits a repository directory from the command line.

use std::time::Duration;

use clap::{Parser, Subcommand};
use layerstore::{
    Config, FixedLayerProvider, Key, LayerDescriptor, StorageManager, StorageRef, UnitDescriptor,
};
use tracing_subscriber::{fmt, EnvFilter};

/// layerstore admin tool
#[derive(Parser, Debug)]
#[command(name = "layerstore")]
#[command(about = "Inspect and edit a layered unit repository")]
#[command(version)]
struct Args {
    /// Data directory (root for relative layers)
    #[arg(short, long, default_value = "./layerstore_data")]
    data_dir: String,

    /// Layer URIs, first one writable, the rest read-only fallbacks
    #[arg(short, long = "layer", default_value = "local")]
    layers: Vec<String>,

    /// Persist mechanism version of the layers
    #[arg(long, default_value = "1")]
    persist_version: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store a record
    Put {
        unit: String,
        record: String,
        value: String,
    },

    /// Print a record
    Get { unit: String, record: String },

    /// Remove a record
    Rm { unit: String, record: String },

    /// Intern file paths and print their indices
    Files { unit: String, paths: Vec<String> },

    /// Show where a unit lives
    Stats { unit: String },

    /// Defragment the given units
    Maintain {
        units: Vec<String>,

        /// Time budget per pass in milliseconds
        #[arg(short, long, default_value = "200")]
        budget_ms: u64,
    },
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,layerstore=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    tracing::debug!("layerstore v{}", layerstore::VERSION);
    tracing::debug!("Data directory: {}", args.data_dir);

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .persist_mechanism_version(args.persist_version)
        .build();

    let layers = args
        .layers
        .iter()
        .enumerate()
        .map(|(i, uri)| {
            if i == 0 {
                LayerDescriptor::new(uri.as_str())
            } else {
                LayerDescriptor::read_only(uri.as_str())
            }
        })
        .collect();

    let manager = match StorageManager::builder(config)
        .provider(FixedLayerProvider::new(layers))
        .build()
    {
        Ok(m) => m,
        Err(e) => {
            tracing::error!("Failed to open repository: {}", e);
            std::process::exit(1);
        }
    };

    let outcome = execute(&manager, args.command);
    manager.shutdown();

    if let Err(e) = outcome {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn execute(manager: &StorageManager, command: Commands) -> layerstore::Result<()> {
    match command {
        Commands::Put {
            unit,
            record,
            value,
        } => {
            let unit_id = manager.get_unit_id(&UnitDescriptor::new(unit))?;
            let mut out = manager.get_output_stream(&Key::new(unit_id, record));
            out.write_utf(&value)?;
            out.commit()?;
            println!("OK");
        }
        Commands::Get { unit, record } => {
            let unit_id = manager.get_unit_id(&UnitDescriptor::new(unit))?;
            match manager.get_input_stream(&Key::new(unit_id, record))? {
                Some(mut input) => println!("{}", input.read_utf()?),
                None => println!("(nil)"),
            }
        }
        Commands::Rm { unit, record } => {
            let unit_id = manager.get_unit_id(&UnitDescriptor::new(unit))?;
            manager.remove(&Key::new(unit_id, record))?;
            println!("OK");
        }
        Commands::Files { unit, paths } => {
            let unit_id = manager.get_unit_id(&UnitDescriptor::new(unit))?;
            for path in paths {
                match manager.get_file_id_by_name(unit_id, &path)? {
                    Some(idx) => println!("{}\t{}", idx, path),
                    None => println!("-\t{}", path),
                }
            }
        }
        Commands::Stats { unit } => {
            let unit_id = manager.get_unit_id(&UnitDescriptor::new(unit))?;
            println!("unit id:    {}", unit_id);
            println!("storage id: {}", manager.get_storage_id(unit_id));
            if let Some(support) = manager.get_layering_support(unit_id) {
                for layer in support.layer_descriptors() {
                    let mode = if layer.is_writable() { "rw" } else { "ro" };
                    println!("layer:      {} ({})", layer.uri(), mode);
                }
            }
            if let StorageRef::Active(storage) = manager.lookup_storage(unit_id) {
                manager.open(unit_id)?;
                println!("weight:     {}", storage.maintenance_weight());
            }
        }
        Commands::Maintain { units, budget_ms } => {
            for unit in units {
                let unit_id = manager.get_unit_id(&UnitDescriptor::new(unit))?;
                manager.open(unit_id)?;
            }
            let budget = Duration::from_millis(budget_ms);
            let mut passes = 1;
            while manager.maintenance(budget) {
                passes += 1;
            }
            println!("maintenance done after {} pass(es)", passes);
        }
    }
    Ok(())
}
