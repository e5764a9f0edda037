use std::sync::{Arc, RwLock};

use clap::Parser;
use homedir::my_home;

mod app;
mod audit;
mod auth;
mod cli;
mod config;
mod eid;
mod records;
mod recognition;
mod roles;
mod storage;
#[cfg(test)]
mod tests;
mod web;

use app::AppLocal;
use config::Config;

fn base_path() -> String {
    std::env::var("SENTINELA_BASE_PATH").unwrap_or(format!(
        "{}/.local/share/sentinela",
        my_home()
            .expect("couldnt find home dir")
            .expect("couldnt find home dir")
            .to_string_lossy()
    ))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = cli::Args::parse();

    let base_path = base_path();
    let config = Arc::new(RwLock::new(Config::load_with(&base_path)));
    let mut app = AppLocal::open(config.clone(), &base_path)?;

    match args.command {
        cli::Command::Daemon {} => {
            let bind_addr = config.read().unwrap().bind_addr.clone();
            app.run_queue();
            web::start_daemon(app, bind_addr);
            Ok(())
        }

        cli::Command::Health {} => {
            if app.embedding_service_available() {
                println!("embedding service: available");
                Ok(())
            } else {
                println!("embedding service: unavailable");
                std::process::exit(1);
            }
        }

        cli::Command::Backfill {} => {
            // the queue must be running to pick the tasks up
            app.run_queue();
            let queued = app.backfill_embeddings()?;
            println!("{queued} media rows queued for embedding extraction");

            app.shutdown();
            app.wait_task_queue_finish();
            Ok(())
        }
    }
}
