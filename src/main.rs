mod cli;

use std::io::Read as _;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use rusqlite::Connection;

use cli::{Cli, Command};
use taskdeck::config::ServerConfig;
use taskdeck::model::NewUser;
use taskdeck::{db, http, ops, output, paths, service};

fn open_db(db_path: &str) -> Result<Connection> {
    let conn = db::open(db_path)?;
    db::init(&conn)?;
    Ok(conn)
}

fn setup_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let db_path = paths::resolve_db_path(cli.db)?;
    paths::ensure_db_dir(&db_path)?;

    match cli.command {
        Command::Init => {
            open_db(&db_path)?;
            eprintln!("Initialized {db_path}");
        }

        Command::Serve { bind, scoping } => {
            setup_logging();
            let config = ServerConfig {
                bind,
                scoping,
            };
            let conn = open_db(&db_path)?;
            info!("using database {db_path}");
            let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
            runtime.block_on(http::serve(db::Db::new(conn), config))?;
        }

        Command::Register { username, password } => {
            let conn = open_db(&db_path)?;
            let password = match password {
                Some(p) => p,
                None => {
                    let mut buf = String::new();
                    std::io::stdin().read_to_string(&mut buf)?;
                    let trimmed = buf.trim_end_matches(['\r', '\n']);
                    if trimmed.is_empty() {
                        bail!("no password provided");
                    }
                    trimmed.to_string()
                }
            };
            let mut new_user = NewUser {
                username: Some(username),
                password: Some(password),
            };
            let user = service::register(&conn, &mut new_user)?;
            eprintln!("Registered '{}' (id {})", user.username, user.id);
        }

        Command::Tasks {
            username,
            json,
            flat,
        } => {
            let conn = open_db(&db_path)?;
            let Some(user) = ops::find_user_by_username(&conn, &username)? else {
                bail!("user '{username}' not found");
            };
            let tasks = ops::list_tasks_by_owner(&conn, user.id)?;
            if flat {
                print!("{}", output::format_task_list(&tasks));
                return Ok(());
            }
            let subtasks = ops::list_subtasks_by_owner(&conn, user.id)?;
            if json {
                let details = output::task_details(&tasks, &subtasks);
                println!("{}", serde_json::to_string_pretty(&details)?);
            } else {
                print!("{}", output::format_task_tree(&tasks, &subtasks));
            }
        }
    }

    Ok(())
}
