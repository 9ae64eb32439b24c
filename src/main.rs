use std::path::PathBuf;

use anyhow::{anyhow, Context};
use clap::{Parser, ValueEnum};
use navexpand::config::{CliOverrides, ExpansionConfig};
use navexpand::expression::ast_conversion::convert_query;
use navexpand::expression::display::ExprTree;
use navexpand::model::Model;
use navexpand::navigation_expansion::expand_navigations;
use navexpand::query_parser::parse_query;

/// navexpand - Expand entity navigations in LINQ-style queries into joins
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// YAML entity model
    #[arg(long)]
    model: PathBuf,

    /// Query text, e.g. `Order.Where(o => o.Customer.Name == "Alice")`
    #[arg(long, conflicts_with = "query_file")]
    query: Option<String>,

    /// File holding the query text
    #[arg(long)]
    query_file: Option<PathBuf>,

    /// YAML expansion settings; environment variables are used when absent
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output format for the expanded query
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Longest navigation chain a member access may traverse
    #[arg(long)]
    max_navigation_depth: Option<usize>,

    /// Deepest nesting of subqueries inside lambdas
    #[arg(long)]
    max_subquery_depth: Option<usize>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    /// Single-line rendering
    Text,
    /// Indented operator tree
    Tree,
    /// JSON dump of the expression tree
    Json,
}

impl From<&Cli> for CliOverrides {
    fn from(cli: &Cli) -> Self {
        CliOverrides {
            max_navigation_depth: cli.max_navigation_depth,
            max_subquery_depth: cli.max_subquery_depth,
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<ExpansionConfig> {
    let mut config = match &cli.config {
        Some(path) => ExpansionConfig::from_yaml_file(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => ExpansionConfig::from_env().context("reading settings from the environment")?,
    };
    config.merge(cli.into());
    Ok(config)
}

fn read_query(cli: &Cli) -> anyhow::Result<String> {
    match (&cli.query, &cli.query_file) {
        (Some(query), _) => Ok(query.clone()),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("reading query from {}", path.display())),
        (None, None) => Err(anyhow!("either --query or --query-file is required")),
    }
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Defaults to INFO level, can be overridden with RUST_LOG env var
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    log::debug!("Expansion settings: {:?}", config);

    let model = Model::from_yaml_file(&cli.model)
        .with_context(|| format!("loading model from {}", cli.model.display()))?;
    let text = read_query(&cli)?;

    let parsed = parse_query(&text).map_err(|e| anyhow!("query syntax error:\n{}", e))?;
    let query = convert_query(&model, &parsed)?;
    log::info!("Converted query: {}", query);

    let expanded = expand_navigations(&query, &model, &config)?;

    match cli.format {
        OutputFormat::Text => println!("{}", expanded),
        OutputFormat::Tree => println!("{}", ExprTree(&expanded)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&expanded)?),
    }
    Ok(())
}
