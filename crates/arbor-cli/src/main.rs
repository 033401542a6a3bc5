//! Content repository command-line tool.
//!
//! Provides the `arbor` binary, a thin front end over a SQLite-backed
//! repository. The database path comes from `--db`, then `ARBOR_DB_PATH`,
//! then `arbor.db`; every other repository setting comes from the `ARBOR_*`
//! variables read by [`RepositoryConfig::from_env`].
//!
//! Each invocation logs in, performs one command, saves, and prints the
//! result as JSON on stdout.

use std::process;
use std::str::FromStr;

use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value as Json};

use arbor_core::PropertyType;
use arbor_jcr::{Node, Repository, RepositoryConfig, RepositoryError, Session, VersionRecord};
use arbor_storage::SqliteStore;

/// Content repository tools.
#[derive(Parser)]
#[command(name = "arbor", about = "Content repository tools")]
struct Cli {
    /// Path to the repository database file.
    #[arg(long, global = true)]
    db: Option<String>,

    /// Workspace to log into (default: the configured default workspace).
    #[arg(short, long, global = true)]
    workspace: Option<String>,

    /// User recorded as the session owner.
    #[arg(short, long, global = true, default_value = "admin")]
    user: String,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// List the content workspaces.
    Workspaces,

    /// Create an empty workspace.
    CreateWorkspace { name: String },

    /// Add a node (intermediate nodes must exist).
    Add {
        path: String,

        /// Primary node type (default: from the parent's definition).
        #[arg(short = 't', long = "type")]
        node_type: Option<String>,
    },

    /// Print a node with its properties and children.
    Show {
        path: String,

        /// Levels of children to expand.
        #[arg(short, long, default_value_t = 1)]
        depth: usize,
    },

    /// Set a single-valued property.
    Set {
        path: String,
        name: String,
        value: String,

        /// Property type the value is converted to (default: String).
        #[arg(short = 't', long = "type")]
        ty: Option<String>,
    },

    /// Remove a node or a property.
    Remove { path: String },

    /// Add a mixin type to a node, or remove it with `--remove`.
    Mixin {
        path: String,
        mixin: String,

        #[arg(long)]
        remove: bool,
    },

    /// Create a new version of a versionable node.
    Checkin { path: String },

    /// Make a checked-in node writable again.
    Checkout { path: String },

    /// Print the version history of a node.
    History { path: String },

    /// Restore a node to a version, given by name or with `--label` by label.
    Restore {
        path: String,
        version: String,

        #[arg(long)]
        label: bool,

        /// Move or remove nodes elsewhere in the workspace that clash with
        /// the restored identifiers.
        #[arg(long)]
        remove_existing: bool,
    },

    /// Attach a label to a version.
    Label {
        path: String,
        version: String,
        label: String,

        /// Take the label over from another version.
        #[arg(long = "move")]
        move_label: bool,
    },

    /// Remove a version label.
    Unlabel { path: String, label: String },

    /// Merge a subtree from another workspace.
    Merge {
        path: String,

        /// Source workspace.
        #[arg(long)]
        from: String,

        /// Record conflicts in `jcr:mergeFailed` instead of failing.
        #[arg(long)]
        best_effort: bool,

        /// Merge only the node itself, not its subtree.
        #[arg(long)]
        shallow: bool,
    },
}

fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    process::exit(run(&cli));
}

/// Opens the repository and executes the command.
///
/// Returns exit code: 0 = success, 1 = repository error,
/// 3 = configuration or database error.
fn run(cli: &Cli) -> i32 {
    let db_path = cli
        .db
        .clone()
        .or_else(|| std::env::var("ARBOR_DB_PATH").ok())
        .unwrap_or_else(|| "arbor.db".to_string());
    tracing::debug!(db = %db_path, "opening repository");

    let config = match RepositoryConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 3;
        }
    };
    let store = match SqliteStore::new(&db_path) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: failed to open database '{}': {}", db_path, e);
            return 3;
        }
    };
    let repository = match Repository::open(config, store) {
        Ok(repository) => repository,
        Err(e) => {
            eprintln!("Error: failed to open repository '{}': {}", db_path, e);
            return 3;
        }
    };

    let outcome = execute(&repository, cli);
    repository.close();
    match outcome {
        Ok(output) => {
            let json = serde_json::to_string_pretty(&output).unwrap_or_else(|e| {
                format!("{{\"error\": \"failed to serialize result: {}\"}}", e)
            });
            println!("{}", json);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn execute(repository: &std::sync::Arc<Repository>, cli: &Cli) -> Result<Json, RepositoryError> {
    match &cli.command {
        Commands::Workspaces => return Ok(json!(repository.workspace_names()?)),
        Commands::CreateWorkspace { name } => {
            repository.create_workspace(name)?;
            return Ok(json!({ "created": name }));
        }
        _ => {}
    }

    let session = repository.login(&cli.user, cli.workspace.as_deref())?;
    let output = run_in_session(&session, &cli.command)?;
    session.logout();
    Ok(output)
}

fn run_in_session(session: &Session, command: &Commands) -> Result<Json, RepositoryError> {
    let versions = session.version_manager();
    match command {
        Commands::Workspaces | Commands::CreateWorkspace { .. } => Ok(Json::Null),
        Commands::Add { path, node_type } => {
            let relative = path.trim_start_matches('/');
            let root = session.root_node()?;
            let node = match node_type {
                Some(ty) => root.add_node_typed(relative, ty)?,
                None => root.add_node(relative)?,
            };
            session.save()?;
            render_node(&node, 0)
        }
        Commands::Show { path, depth } => render_node(&session.node(path)?, *depth),
        Commands::Set {
            path,
            name,
            value,
            ty,
        } => {
            let node = session.node(path)?;
            match ty {
                Some(ty) => node.set_property_as(name, value.as_str(), PropertyType::from_str(ty)?)?,
                None => node.set_property(name, value.as_str())?,
            };
            session.save()?;
            render_node(&node, 0)
        }
        Commands::Remove { path } => {
            session.remove_item(path)?;
            session.save()?;
            Ok(json!({ "removed": path }))
        }
        Commands::Mixin {
            path,
            mixin,
            remove,
        } => {
            let node = session.node(path)?;
            if *remove {
                node.remove_mixin(mixin)?;
            } else {
                node.add_mixin(mixin)?;
            }
            session.save()?;
            render_node(&node, 0)
        }
        Commands::Checkin { path } => Ok(render_version(&versions.checkin(path)?, &[])),
        Commands::Checkout { path } => {
            versions.checkout(path)?;
            Ok(json!({ "path": path, "checkedOut": true }))
        }
        Commands::History { path } => {
            let history = versions.version_history(path)?;
            let base = versions.base_version(path)?;
            let mut records: Vec<&VersionRecord> = history.all_versions().collect();
            records.sort_by_key(|r| r.created);
            let rendered: Vec<Json> = records
                .into_iter()
                .map(|r| render_version(r, &history.labels_of(&r.key)))
                .collect();
            Ok(json!({
                "history": history.key.to_string(),
                "path": history.path.to_string(),
                "baseVersion": base.name.to_string(),
                "versions": rendered,
            }))
        }
        Commands::Restore {
            path,
            version,
            label,
            remove_existing,
        } => {
            if *label {
                versions.restore_by_label(path, version, *remove_existing)?;
            } else {
                versions.restore(path, version, *remove_existing)?;
            }
            render_node(&session.node(path)?, 0)
        }
        Commands::Label {
            path,
            version,
            label,
            move_label,
        } => {
            versions.add_version_label(path, version, label, *move_label)?;
            Ok(json!({ "label": label, "version": version }))
        }
        Commands::Unlabel { path, label } => {
            versions.remove_version_label(path, label)?;
            Ok(json!({ "removed": label }))
        }
        Commands::Merge {
            path,
            from,
            best_effort,
            shallow,
        } => {
            let failed = versions.merge(path, from, *best_effort, *shallow)?;
            let failed: Vec<String> = failed.iter().map(ToString::to_string).collect();
            Ok(json!({ "path": path, "source": from, "failed": failed }))
        }
    }
}

/// JSON rendering of a node: properties by name, children expanded down to
/// `depth` further levels and listed by path below that.
fn render_node(node: &Node<'_>, depth: usize) -> Result<Json, RepositoryError> {
    let mut properties = Map::new();
    for property in node.properties()? {
        let data = property.data()?;
        let values: Vec<String> = data.values.iter().map(ToString::to_string).collect();
        let rendered = if data.multiple {
            json!(values)
        } else {
            json!(values.into_iter().next())
        };
        properties.insert(property.name().to_string(), rendered);
    }

    let mut children = Vec::new();
    for child in node.nodes()? {
        if depth > 0 {
            children.push(render_node(&child, depth - 1)?);
        } else {
            children.push(json!(child.path()?.to_string()));
        }
    }

    Ok(json!({
        "path": node.path()?.to_string(),
        "identifier": node.identifier(),
        "primaryType": node.primary_type()?.to_string(),
        "properties": properties,
        "children": children,
    }))
}

fn render_version(version: &VersionRecord, labels: &[&str]) -> Json {
    json!({
        "name": version.name.to_string(),
        "identifier": version.key.to_string(),
        "created": version.created,
        "predecessors": version.predecessors.iter().map(ToString::to_string).collect::<Vec<_>>(),
        "successors": version.successors.iter().map(ToString::to_string).collect::<Vec<_>>(),
        "labels": labels,
    })
}
