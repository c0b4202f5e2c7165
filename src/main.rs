use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Map, Value};

use couplefy_lib::api;
use couplefy_lib::config::Config;
use couplefy_lib::identity::{ExternalPrincipal, IdentityHandle, StaticIdentity};
use couplefy_lib::{logging, open_database, AppState, Outcome};

#[derive(Debug, Parser)]
#[command(name = "couplefy", about = "Personal and shared household finances", version)]
struct Cli {
    /// Database file; overrides COUPLEFY_DB.
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    /// External identity of the acting user.
    #[arg(long = "as", global = true, value_name = "EXTERNAL_ID")]
    as_user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Apply pending schema migrations and exit.
    Migrate,
    #[command(subcommand)]
    User(UserCommand),
    #[command(subcommand)]
    Group(GroupCommand),
    #[command(subcommand)]
    Invite(InviteCommand),
    #[command(subcommand)]
    Category(CategoryCommand),
    #[command(subcommand)]
    Goal(GoalCommand),
    #[command(subcommand)]
    Expense(EntryCommand),
    #[command(subcommand)]
    Saving(EntryCommand),
    /// Monthly dashboard totals.
    Summary {
        #[arg(long)]
        year: i32,
        #[arg(long)]
        month: u32,
    },
}

#[derive(Debug, Subcommand)]
enum UserCommand {
    /// Create or refresh the local user for `--as`.
    Sync {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        avatar_url: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum GroupCommand {
    Create {
        name: String,
    },
    Rename {
        group_id: String,
        name: String,
    },
    RemoveMember {
        group_id: String,
        user_id: String,
    },
    Leave {
        group_id: String,
    },
    List,
    Show {
        group_id: String,
    },
}

#[derive(Debug, Subcommand)]
enum InviteCommand {
    Generate { group_id: String },
    Accept { code: String },
    List { group_id: String },
    Reject { invite_id: String },
}

#[derive(Debug, Subcommand)]
enum CategoryCommand {
    Add {
        name: String,
        #[arg(long)]
        color: Option<String>,
        #[arg(long)]
        icon: Option<String>,
        #[arg(long)]
        group: Option<String>,
    },
    List {
        #[arg(long)]
        group: Option<String>,
    },
    Edit {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        color: Option<String>,
        #[arg(long)]
        icon: Option<String>,
    },
    Delete {
        id: String,
    },
}

#[derive(Debug, Subcommand)]
enum GoalCommand {
    Add {
        name: String,
        #[arg(long)]
        target: Option<String>,
        #[arg(long)]
        color: Option<String>,
        #[arg(long)]
        icon: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        group: Option<String>,
    },
    List {
        #[arg(long)]
        group: Option<String>,
    },
    Edit {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        target: Option<String>,
        #[arg(long)]
        color: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    Delete {
        id: String,
    },
}

/// Shared by `expense` and `saving`; `--ref` is the category or goal id.
#[derive(Debug, Subcommand)]
enum EntryCommand {
    Add {
        amount: String,
        #[arg(long = "ref", value_name = "CATEGORY_OR_GOAL_ID")]
        reference: String,
        #[arg(long)]
        date: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        group: Option<String>,
        #[arg(long)]
        paid_by: Option<String>,
    },
    List {
        #[arg(long)]
        group: Option<String>,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
    },
    Edit {
        id: String,
        amount: String,
        #[arg(long = "ref", value_name = "CATEGORY_OR_GOAL_ID")]
        reference: String,
        #[arg(long)]
        date: String,
        #[arg(long)]
        description: Option<String>,
    },
    Delete {
        id: String,
    },
}

fn main() {
    let cli = Cli::parse();
    process::exit(real_main(cli));
}

/// Owns the log guard so the file sink is flushed before the process exits.
fn real_main(cli: Cli) -> i32 {
    let db_override = cli.db.clone();
    let config = match Config::from_lookup(|key| match (key, &db_override) {
        ("COUPLEFY_DB", Some(path)) => Some(path.display().to_string()),
        _ => std::env::var(key).ok(),
    }) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {err:#}");
            return 1;
        }
    };

    let _guard = match logging::init(&config.log_filter, config.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Error: {err:#}");
            return 1;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("Error: {err:#}");
            return 1;
        }
    };

    match runtime.block_on(run(cli, config)) {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(target: "couplefy", event = "cli_failed", error = %format!("{err:#}"));
            eprintln!("Error: {err:#}");
            1
        }
    }
}

fn emit<T: Serialize>(outcome: Outcome<T>) -> Result<i32> {
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(if outcome.is_success() { 0 } else { 1 })
}

/// Builds a JSON object from the flags that were actually given.
fn object(fields: &[(&str, Option<&str>)]) -> Value {
    let map: Map<String, Value> = fields
        .iter()
        .filter_map(|(k, v)| v.map(|v| (k.to_string(), Value::String(v.to_string()))))
        .collect();
    Value::Object(map)
}

async fn run(cli: Cli, config: Config) -> Result<i32> {
    let pool = open_database(&config.db_path)
        .await
        .with_context(|| format!("open database {}", config.db_path.display()))?;

    if let Commands::Migrate = cli.command {
        tracing::info!(target: "couplefy", event = "migrate_done", path = %config.db_path.display());
        return emit(Outcome::Success(json!({ "database": config.db_path.display().to_string() })));
    }

    if let Commands::User(UserCommand::Sync {
        email,
        name,
        avatar_url,
    }) = &cli.command
    {
        let external_id = cli
            .as_user
            .clone()
            .context("`user sync` needs --as <EXTERNAL_ID>")?;
        let identity = IdentityHandle::new(StaticIdentity::signed_in(ExternalPrincipal {
            external_id,
            email: email.clone(),
            name: name.clone(),
            avatar_url: avatar_url.clone(),
        }));
        let state = AppState::new(pool, identity).with_invite_policy(config.invite_policy());
        return emit(api::users_sync(&state).await);
    }

    let identity = match &cli.as_user {
        Some(external_id) => IdentityHandle::new(StaticIdentity::external_id(external_id.clone())),
        None => IdentityHandle::new(StaticIdentity::anonymous()),
    };
    let state = AppState::new(pool, identity).with_invite_policy(config.invite_policy());

    match cli.command {
        Commands::Migrate | Commands::User(_) => Ok(0),
        Commands::Group(cmd) => match cmd {
            GroupCommand::Create { name } => {
                emit(api::groups_create(&state, json!({ "name": name })).await)
            }
            GroupCommand::Rename { group_id, name } => {
                emit(api::groups_rename(&state, &group_id, json!({ "name": name })).await)
            }
            GroupCommand::RemoveMember { group_id, user_id } => {
                emit(api::groups_remove_member(&state, &group_id, &user_id).await)
            }
            GroupCommand::Leave { group_id } => emit(api::groups_leave(&state, &group_id).await),
            GroupCommand::List => emit(api::groups_list(&state).await),
            GroupCommand::Show { group_id } => emit(api::groups_get(&state, &group_id).await),
        },
        Commands::Invite(cmd) => match cmd {
            InviteCommand::Generate { group_id } => {
                emit(api::invites_generate(&state, &group_id).await)
            }
            InviteCommand::Accept { code } => {
                emit(api::invites_accept(&state, json!({ "code": code })).await)
            }
            InviteCommand::List { group_id } => emit(api::invites_list(&state, &group_id).await),
            InviteCommand::Reject { invite_id } => {
                emit(api::invites_reject(&state, &invite_id).await)
            }
        },
        Commands::Category(cmd) => match cmd {
            CategoryCommand::Add {
                name,
                color,
                icon,
                group,
            } => {
                let payload = object(&[
                    ("name", Some(name.as_str())),
                    ("color", color.as_deref()),
                    ("icon", icon.as_deref()),
                    ("groupId", group.as_deref()),
                ]);
                emit(api::categories_create(&state, payload).await)
            }
            CategoryCommand::List { group } => {
                let filter = object(&[("groupId", group.as_deref())]);
                emit(api::categories_list(&state, filter).await)
            }
            CategoryCommand::Edit {
                id,
                name,
                color,
                icon,
            } => {
                let payload = object(&[
                    ("name", name.as_deref()),
                    ("color", color.as_deref()),
                    ("icon", icon.as_deref()),
                ]);
                emit(api::categories_update(&state, &id, payload).await)
            }
            CategoryCommand::Delete { id } => emit(api::categories_delete(&state, &id).await),
        },
        Commands::Goal(cmd) => match cmd {
            GoalCommand::Add {
                name,
                target,
                color,
                icon,
                description,
                group,
            } => {
                let payload = object(&[
                    ("name", Some(name.as_str())),
                    ("targetAmount", target.as_deref()),
                    ("color", color.as_deref()),
                    ("icon", icon.as_deref()),
                    ("description", description.as_deref()),
                    ("groupId", group.as_deref()),
                ]);
                emit(api::goals_create(&state, payload).await)
            }
            GoalCommand::List { group } => {
                let filter = object(&[("groupId", group.as_deref())]);
                emit(api::goals_list(&state, filter).await)
            }
            GoalCommand::Edit {
                id,
                name,
                target,
                color,
                description,
            } => {
                let payload = object(&[
                    ("name", name.as_deref()),
                    ("targetAmount", target.as_deref()),
                    ("color", color.as_deref()),
                    ("description", description.as_deref()),
                ]);
                emit(api::goals_update(&state, &id, payload).await)
            }
            GoalCommand::Delete { id } => emit(api::goals_delete(&state, &id).await),
        },
        Commands::Expense(cmd) => run_entry(&state, cmd, EntryTable::Expenses).await,
        Commands::Saving(cmd) => run_entry(&state, cmd, EntryTable::Savings).await,
        Commands::Summary { year, month } => {
            emit(api::dashboard_summary(&state, year, month).await)
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum EntryTable {
    Expenses,
    Savings,
}

async fn run_entry(state: &AppState, cmd: EntryCommand, table: EntryTable) -> Result<i32> {
    let ref_key = match table {
        EntryTable::Expenses => "categoryId",
        EntryTable::Savings => "goalId",
    };
    match cmd {
        EntryCommand::Add {
            amount,
            reference,
            date,
            description,
            group,
            paid_by,
        } => {
            let payload = object(&[
                ("amount", Some(amount.as_str())),
                (ref_key, Some(reference.as_str())),
                ("date", Some(date.as_str())),
                ("description", description.as_deref()),
                ("groupId", group.as_deref()),
                ("paidBy", paid_by.as_deref()),
            ]);
            match table {
                EntryTable::Expenses => emit(api::expenses_create(state, payload).await),
                EntryTable::Savings => emit(api::savings_create(state, payload).await),
            }
        }
        EntryCommand::List { group, from, to } => {
            let filter = object(&[
                ("groupId", group.as_deref()),
                ("from", from.as_deref()),
                ("to", to.as_deref()),
            ]);
            match table {
                EntryTable::Expenses => emit(api::expenses_list(state, filter).await),
                EntryTable::Savings => emit(api::savings_list(state, filter).await),
            }
        }
        EntryCommand::Edit {
            id,
            amount,
            reference,
            date,
            description,
        } => {
            let payload = object(&[
                ("amount", Some(amount.as_str())),
                (ref_key, Some(reference.as_str())),
                ("date", Some(date.as_str())),
                ("description", description.as_deref()),
            ]);
            match table {
                EntryTable::Expenses => emit(api::expenses_update(state, &id, payload).await),
                EntryTable::Savings => emit(api::savings_update(state, &id, payload).await),
            }
        }
        EntryCommand::Delete { id } => match table {
            EntryTable::Expenses => emit(api::expenses_delete(state, &id).await),
            EntryTable::Savings => emit(api::savings_delete(state, &id).await),
        },
    }
}
