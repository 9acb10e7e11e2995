//! CLI entry point for the ribbon graph API client.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::{fmt, EnvFilter};

use ribbon_graph::{GraphApi, GraphClient};

use ribbon_cli::commands::{self, QueryArgs};
use ribbon_cli::config::{load_schema, CliConfig};

#[derive(Parser)]
#[command(name = "ribbon")]
#[command(about = "Declarative subgraph reads and writes over Neo4j")]
struct Cli {
    /// Config file prefix (default: ribbon).
    #[arg(short, long, default_value = "ribbon", global = true)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse query DSL arguments and print the query tree.
    Parse(DslArgs),

    /// Print the normalised form of a schema definition file.
    Schema {
        #[arg(long)]
        schema: PathBuf,
    },

    /// Read the subgraph rooted at a node.
    Fetch {
        #[command(flatten)]
        target: Target,

        /// Node id.
        #[arg(long)]
        id: i64,

        /// Node type; resolved from the node's labels when omitted.
        #[arg(long)]
        node_type: Option<String>,

        /// Include list in the query DSL.
        #[arg(long)]
        include: Option<String>,
    },

    /// List nodes of a type.
    Query {
        #[command(flatten)]
        target: Target,

        #[arg(long)]
        node_type: String,

        #[command(flatten)]
        dsl: DslArgs,
    },

    /// Apply an update tree (create, update or delete).
    Apply {
        #[command(flatten)]
        target: Target,

        /// One of create, update, delete.
        #[arg(long)]
        kind: String,

        /// Update tree as JSON.
        #[arg(long, default_value = "{}")]
        payload: String,

        #[arg(long)]
        id: Option<i64>,

        #[arg(long)]
        node_type: Option<String>,
    },

    /// Create the id uniqueness constraints for every schema type.
    SetupConstraints {
        #[arg(long)]
        schema: PathBuf,
    },
}

/// Schema file and acting identity for commands that reach the store.
#[derive(Args)]
struct Target {
    #[arg(long)]
    schema: PathBuf,

    /// Act as this user id.
    #[arg(long)]
    actor: Option<i64>,

    /// Act as the trusted actor, bypassing permission checks.
    #[arg(long)]
    trusted: bool,
}

#[derive(Args)]
struct DslArgs {
    #[arg(long)]
    include: Option<String>,

    #[arg(long = "where")]
    filter: Option<String>,

    #[arg(long)]
    order_by: Option<String>,

    #[arg(long)]
    skip: Option<String>,

    #[arg(long)]
    limit: Option<String>,
}

impl From<DslArgs> for QueryArgs {
    fn from(args: DslArgs) -> Self {
        QueryArgs {
            include: args.include,
            filter: args.filter,
            order_by: args.order_by,
            skip: args.skip,
            limit: args.limit,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    let config = CliConfig::load(&cli.config)?;

    let output = match cli.command {
        Command::Parse(dsl) => {
            let tree = QueryArgs::from(dsl).to_tree()?;
            serde_json::to_value(tree)?
        }
        Command::Schema { schema } => commands::describe_schema(&schema)?,
        Command::Fetch {
            target,
            id,
            node_type,
            include,
        } => {
            let (api, actor) = connect(&config, &target).await?;
            commands::fetch(&api, actor, id, node_type.as_deref(), include.as_deref()).await?
        }
        Command::Query {
            target,
            node_type,
            dsl,
        } => {
            let (api, actor) = connect(&config, &target).await?;
            commands::query(&api, actor, &node_type, &dsl.into()).await?
        }
        Command::Apply {
            target,
            kind,
            payload,
            id,
            node_type,
        } => {
            let (api, actor) = connect(&config, &target).await?;
            commands::apply(&api, actor, &kind, &payload, id, node_type).await?
        }
        Command::SetupConstraints { schema } => {
            let schema = load_schema(&schema)?;
            let client = GraphClient::connect(&config.neo4j).await?;
            client.setup_constraints(&schema).await?;
            Value::from(schema.type_names())
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn connect(config: &CliConfig, target: &Target) -> anyhow::Result<(GraphApi, ribbon_core::Actor)> {
    let actor = commands::resolve_actor(target.actor, target.trusted)?;
    let schema = load_schema(&target.schema)?;
    let client = GraphClient::connect(&config.neo4j).await?;
    let api = GraphApi::with_config(Arc::new(client), Arc::new(schema), config.api.clone());
    Ok((api, actor))
}
