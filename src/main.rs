use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;

use otudb::import::{run_import, FileKind};
use otudb::logging;
use otudb::store::MemoryStore;

/// Import OTU study files into the OTU database.
#[derive(Parser)]
#[clap(name = "otudb", version)]
struct Cli {
    /// Path to the file to import
    #[clap(short = 'p', long)]
    filepath: PathBuf,

    /// Kind of file being imported
    #[clap(short = 't', long, arg_enum)]
    filetype: FileKind,

    /// Dump the store contents as JSON after the import
    #[clap(short, long)]
    output: Option<PathBuf>,

    /// Verbose logging
    #[clap(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    logging::init(args.verbose);

    let mut store = MemoryStore::new();
    let created = run_import(args.filetype, &args.filepath, &mut store)?;
    println!("imported {created} rows from {}", args.filepath.display());

    if let Some(output) = &args.output {
        store.dump_json(output)?;
        info!("store dumped to {}", output.display());
    }

    Ok(())
}
