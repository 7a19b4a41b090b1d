//! `kbase` — manual command-line driver over the Tool surface.
//!
//! Not the production agent transport; this binary exists so an operator
//! can `remember`/`recall`/`sync` by hand against a local index the same
//! way the production agent tool calls would — a thin `clap` shell over the
//! core library, with no logic of its own beyond argument parsing and
//! dispatch.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use kbase::config::{KbaseConfig, RoutingConfig};
use kbase::mirror::{Mirror, MirrorRepo};
use kbase::search::{SearchParams, Sort, StatusFilter};
use kbase::store::{Entry, EntryId, LinkId, Scope, Store};
use kbase::tools::{RememberInput, Tools, UpdateInput};
use kbase_git::GixRepo;

#[derive(Parser)]
#[command(name = "kbase")]
#[command(version, about = "Shared, git-synchronized knowledge base for agents")]
struct Cli {
    /// Path to `kbase.toml`. Missing file falls back to defaults.
    #[arg(long, global = true, default_value = "kbase.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Insert a new entry.
    Remember {
        #[arg(long = "type")]
        entry_type: String,
        title: String,
        content: String,
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
        #[arg(long, default_value = "repo")]
        scope: String,
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        declaration: Option<String>,
        #[arg(long, default_value = "agent")]
        source: String,
    },

    /// Search or list entries.
    Recall {
        query: Option<String>,
        #[arg(long = "type")]
        entry_type: Option<String>,
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        scope: Option<String>,
        #[arg(long)]
        above_threshold: bool,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Resolve a short ID prefix to a full entry.
    Resolve { prefix: String },

    /// Apply a sparse update to an entry.
    Update {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        content: Option<String>,
        #[arg(long, value_delimiter = ',')]
        tags: Option<Vec<String>>,
    },

    /// Create a directed edge between two entries.
    Link {
        source_id: String,
        target_id: String,
        link_type: String,
        #[arg(long)]
        description: Option<String>,
    },

    /// Delete a link by id.
    Unlink { link_id: String },

    /// Mark an entry deprecated.
    Deprecate { id: String, reason: String },

    /// Reset an entry's inaccuracy to 0.
    Reinforce { id: String },

    /// Manually pull and push against one configured repo.
    Sync {
        #[command(subcommand)]
        action: SyncAction,
    },
}

#[derive(Subcommand)]
enum SyncAction {
    /// Pull then push the named repo immediately, bypassing the debounce.
    Now { repo: String },
    /// Show coordinator-lock and pending-commit state.
    Status,
}

fn build_tools(cfg: &KbaseConfig) -> Result<Tools> {
    let store = Store::open(&cfg.store.index_path)
        .with_context(|| format!("opening index at {}", cfg.store.index_path.display()))?;

    let routing = match &cfg.sync.routing_path {
        Some(path) => RoutingConfig::load(path).map_err(anyhow::Error::msg)?,
        None => match &cfg.sync.repo {
            Some(path) => RoutingConfig {
                repos: vec![kbase::config::RepoRoute {
                    name: "default".into(),
                    path: path.clone(),
                    remote: None,
                    scope: None,
                    project: None,
                }],
            },
            None => RoutingConfig::default(),
        },
    };

    let mut repos = Vec::new();
    for route in routing.repos {
        let git = GixRepo::init(&route.path)
            .with_context(|| format!("opening git repo '{}' at {}", route.name, route.path.display()))?;
        repos.push(MirrorRepo { route, git: Box::new(git) });
    }
    let mirror = Arc::new(Mirror::new(repos));

    Ok(Tools::new(store, mirror))
}

fn print_entry(entry: &Entry) {
    println!(
        "{}  [{}] {}  (scope={}, version={}, inaccuracy={:.3}){}",
        entry.id.short8(),
        entry.entry_type,
        entry.title,
        entry.scope,
        entry.version,
        entry.inaccuracy,
        if entry.needs_revalidation() { "  [needs revalidation]" } else { "" },
    );
}

fn print_warnings(warnings: &[String]) {
    for w in warnings {
        eprintln!("warning: {w}");
    }
}

fn parse_entry_id(s: &str) -> Result<EntryId> {
    s.parse().map_err(|_| anyhow::anyhow!("'{s}' is not a valid entry id"))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let cfg = KbaseConfig::load(&cli.config).map_err(anyhow::Error::msg)?;
    let tools = build_tools(&cfg)?;

    match cli.command {
        Commands::Remember { entry_type, title, content, tags, scope, project, declaration, source } => {
            let envelope = tools.remember(RememberInput {
                entry_type,
                title,
                content,
                tags,
                declaration,
                scope,
                project,
                parent_page_id: None,
                source,
            })?;
            print_warnings(&envelope.warnings);
            for entry in &envelope.results {
                print_entry(entry);
            }
        }

        Commands::Recall { query, entry_type, tags, project, scope, above_threshold, limit } => {
            let params = SearchParams {
                query,
                query_embedding: None,
                entry_type: entry_type.as_deref().map(parse_entry_type_arg).transpose()?,
                tags,
                project,
                scope: scope.as_deref().map(parse_scope_arg).transpose()?,
                status: Some(StatusFilter::All),
                above_threshold,
                sort: Some(Sort::Recent),
                limit,
                offset: 0,
            };
            let envelope = tools.recall(&params)?;
            print_warnings(&envelope.warnings);
            for entry in &envelope.results {
                print_entry(entry);
            }
            if envelope.results.is_empty() {
                println!("no matches");
            }
        }

        Commands::Resolve { prefix } => {
            let envelope = tools.resolve(&prefix)?;
            for entry in &envelope.results {
                print_entry(entry);
            }
        }

        Commands::Update { id, title, content, tags } => {
            let id = parse_entry_id(&id)?;
            let envelope = tools.update(id, UpdateInput { title, content, tags, ..UpdateInput::default() })?;
            print_warnings(&envelope.warnings);
            for entry in &envelope.results {
                print_entry(entry);
            }
        }

        Commands::Link { source_id, target_id, link_type, description } => {
            let source_id = parse_entry_id(&source_id)?;
            let target_id = parse_entry_id(&target_id)?;
            let envelope = tools.link(source_id, target_id, &link_type, description)?;
            print_warnings(&envelope.warnings);
            for link in &envelope.results {
                println!("{} --{}--> {}", link.source_id.short8(), link.link_type, link.target_id.short8());
            }
        }

        Commands::Unlink { link_id } => {
            let link_id: LinkId = link_id.parse().map_err(|_| anyhow::anyhow!("'{link_id}' is not a valid link id"))?;
            tools.unlink(link_id)?;
            println!("unlinked {}", link_id.short8());
        }

        Commands::Deprecate { id, reason } => {
            let id = parse_entry_id(&id)?;
            let envelope = tools.deprecate(id, reason)?;
            for entry in &envelope.results {
                print_entry(entry);
            }
        }

        Commands::Reinforce { id } => {
            let id = parse_entry_id(&id)?;
            let envelope = tools.reinforce(id)?;
            for entry in &envelope.results {
                print_entry(entry);
            }
        }

        Commands::Sync { action } => match action {
            SyncAction::Now { repo } => {
                let envelope = tools.sync_now(&repo, i64::try_from(cfg.sync.lock_ttl_secs).unwrap_or(90))?;
                print_warnings(&envelope.warnings);
                if let Some((pull, push)) = envelope.results.first() {
                    println!(
                        "pull: imported={} updated={} conflicts={} tombstoned={}",
                        pull.imported, pull.updated, pull.conflicts, pull.tombstoned
                    );
                    println!("push: written={} removed={} pushed={}", push.written, push.removed, push.pushed);
                }
            }
            SyncAction::Status => {
                let envelope = tools.sync_status()?;
                let Some(status) = envelope.results.first() else { bail!("no status returned") };
                println!("lock_held={} commit_pending={}", status.lock_held, status.commit_pending);
            }
        },
    }

    Ok(())
}

fn parse_entry_type_arg(s: &str) -> Result<kbase::store::EntryType> {
    use kbase::store::EntryType;
    Ok(match s {
        "convention" => EntryType::Convention,
        "decision" => EntryType::Decision,
        "pattern" => EntryType::Pattern,
        "pitfall" => EntryType::Pitfall,
        "fact" => EntryType::Fact,
        "debug_note" => EntryType::DebugNote,
        "process" => EntryType::Process,
        "wiki" => EntryType::Wiki,
        other => bail!("unknown entry type '{other}'"),
    })
}

fn parse_scope_arg(s: &str) -> Result<Scope> {
    Ok(match s {
        "company" => Scope::Company,
        "project" => Scope::Project,
        "repo" => Scope::Repo,
        other => bail!("unknown scope '{other}'"),
    })
}
