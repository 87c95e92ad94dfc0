//! spool_ctl - inspect, export or clear the persistent upload queue

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use frame_relay::queue::{PersistentQueue, DEFAULT_CAPACITY};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Queue directory.
    #[arg(long, env = "RELAY_QUEUE_DIR", default_value = "spool")]
    dir: PathBuf,
    /// Number of slots the daemon was started with.
    #[arg(long, env = "RELAY_QUEUE_CAPACITY", default_value_t = DEFAULT_CAPACITY)]
    capacity: usize,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print occupied slots as JSON lines.
    List,
    /// Copy queued frames out as slot_<i>.jpg files.
    Export {
        #[arg(long)]
        out: PathBuf,
    },
    /// Delete every valid queued frame.
    Clear,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    // Read-only view: never repairs, prunes or reformats a spool a running
    // relayd may be writing to.
    let mut queue = PersistentQueue::inspect(&args.dir, args.capacity)
        .with_context(|| format!("open queue {}", args.dir.display()))?;

    match args.command {
        Command::List => {
            for entry in queue.entries() {
                println!("{}", serde_json::to_string(&entry)?);
            }
            eprintln!("{}/{} slots occupied", queue.len(), queue.capacity());
        }
        Command::Export { out } => {
            std::fs::create_dir_all(&out)
                .with_context(|| format!("create {}", out.display()))?;
            let mut exported = 0;
            for index in queue.occupied() {
                let Some(payload) = queue.read_slot(index)? else {
                    continue;
                };
                let path = out.join(format!("slot_{}.jpg", index));
                std::fs::write(&path, payload)
                    .with_context(|| format!("write {}", path.display()))?;
                exported += 1;
            }
            eprintln!("exported {} frames to {}", exported, out.display());
        }
        Command::Clear => {
            let removed = queue.clear();
            eprintln!("removed {} queued frames", removed);
        }
    }
    Ok(())
}
