use clap::{Parser, Subcommand};
use taskdeck::config::Scoping;

#[derive(Parser)]
#[command(name = "taskdeck", about = "Personal task and subtask tracker", version)]
pub struct Cli {
    /// Path to the SQLite database [default: ~/.taskdeck/taskdeck.db]
    #[arg(long, env = "TASKDECK_DB", global = true)]
    pub db: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create database and tables (idempotent)
    Init,

    /// Run the HTTP service
    Serve {
        /// Address to listen on
        #[arg(long, env = "TASKDECK_BIND", default_value = "127.0.0.1:8080")]
        bind: String,
        /// Ownership scoping for deletes, updates and subtask reads
        #[arg(long, env = "TASKDECK_SCOPING", value_enum, default_value_t = Scoping::Legacy)]
        scoping: Scoping,
    },

    /// Register a user
    Register {
        /// Username
        username: String,
        /// Password (omit to read from stdin)
        #[arg(long)]
        password: Option<String>,
    },

    /// List the tasks and subtasks of a user
    Tasks {
        /// Username (first case-insensitive substring match)
        username: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
        /// Top-level tasks only, without subtasks
        #[arg(long, conflicts_with = "json")]
        flat: bool,
    },
}
