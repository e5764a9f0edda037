use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "sentinela", about = "Records backend with face-similarity search")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP daemon and the embedding ingestion queue
    Daemon {},

    /// Probe the embedding-extraction service and report availability
    Health {},

    /// Re-enqueue embedding extraction for FACE media without embeddings
    Backfill {},
}
