//! Sporeprint query engine command line.
//!
//! Creates, resumes and coerces persisted queries against the database
//! named by `DATABASE_URL`.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use sporeprint_query::{
    Coercion, Config, ContentFilterPrefs, EntityKind, LetterFilter, PageRequest, PgExecutor,
    PgQueryStore, QueryEngine, QueryInstance, RawParams,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

/// Paging flags shared by `search` and `show`.
#[derive(clap::Args, Debug)]
struct PageArgs {
    /// Page number, starting at 1.
    #[arg(long, default_value = "1")]
    page: u32,

    /// Results per page.
    #[arg(long)]
    per_page: Option<usize>,

    /// Only results whose title starts with this letter (`#` for other).
    #[arg(long)]
    letter: Option<String>,
}

impl PageArgs {
    fn request(&self) -> Result<PageRequest> {
        let mut request = PageRequest::page(self.page);
        if let Some(per_page) = self.per_page {
            request = request.per_page(per_page);
        }
        if let Some(letter) = &self.letter {
            let Some(filter) = LetterFilter::parse(letter) else {
                bail!("--letter expects a single letter or '#', got '{letter}'");
            };
            request = request.letter(filter);
        }
        Ok(request)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a query, reusing the persisted record for an identical one.
    Search {
        /// Entity kind, e.g. `observation` or `names`.
        kind: EntityKind,

        /// Query parameter as `key=value`; repeat for lists.
        #[arg(short = 'p', long = "param", value_parser = parse_pair)]
        params: Vec<(String, String)>,

        /// Only observations with images.
        #[arg(long)]
        has_images: bool,

        /// Hide lichens (`no`) or show only lichens (`yes`).
        #[arg(long)]
        lichen: Option<String>,

        /// Restrict to a region, e.g. `California, USA`.
        #[arg(long)]
        region: Option<String>,

        #[command(flatten)]
        paging: PageArgs,
    },
    /// Resume a persisted query.
    Show {
        id: Uuid,

        #[command(flatten)]
        paging: PageArgs,
    },
    /// Turn a persisted query into a query for a related kind.
    Coerce { id: Uuid, kind: EntityKind },
    /// Delete persisted queries that have not been used for a while.
    Cleanup {
        /// Age in days; defaults to `QUERY_RECORD_MAX_AGE_DAYS`.
        #[arg(long)]
        days: Option<i64>,
    },
}

fn parse_pair(input: &str) -> Result<(String, String), String> {
    input
        .split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{input}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let config = Config::from_env().context("failed to load configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to PostgreSQL")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    let engine = QueryEngine::standard(
        Arc::new(PgExecutor::new(pool.clone(), config.statement_timeout_ms)),
        Arc::new(PgQueryStore::new(pool)),
        config.limits,
    )
    .context("invalid query catalog")?;

    match args.command {
        Command::Search {
            kind,
            params,
            has_images,
            lichen,
            region,
            paging,
        } => {
            let prefs = ContentFilterPrefs {
                has_images: has_images.then_some(true),
                lichen,
                region,
                ..ContentFilterPrefs::default()
            };
            let raw = RawParams::from_pairs(params);
            let mut query = engine
                .create_or_lookup(kind, &raw, &prefs)
                .await
                .context("failed to create query")?;
            print_page(&mut query, paging.request()?).await?;
        }
        Command::Show { id, paging } => {
            let mut query = engine
                .find_persisted(id)
                .await
                .with_context(|| format!("failed to resume query {id}"))?;
            print_page(&mut query, paging.request()?).await?;
        }
        Command::Coerce { id, kind } => {
            let query = engine.find_persisted(id).await?;
            match engine.coerce(&query, kind)? {
                Coercion::Coerced(mut coerced) => {
                    let new_id = engine.save(&mut coerced).await?;
                    println!("{new_id}");
                }
                Coercion::NotCoercible { from, to } => {
                    println!("not coercible: {from} -> {to}");
                }
            }
        }
        Command::Cleanup { days } => {
            let days = days.unwrap_or(config.record_max_age_days);
            let removed = engine.cleanup(days).await?;
            info!(removed, days, "cleanup finished");
            println!("{removed}");
        }
    }

    Ok(())
}

async fn print_page(query: &mut QueryInstance, request: PageRequest) -> Result<()> {
    let page = query.paginate(request).await?;
    let id = query
        .record_id()
        .map(|id| id.to_string())
        .unwrap_or_default();
    println!("query {id} ({})", query.kind());
    println!(
        "page {}/{} of {} results",
        page.page, page.total_pages, page.total
    );
    if !page.used_letters.is_empty() {
        let letters: Vec<String> = page.used_letters.iter().map(ToString::to_string).collect();
        println!("letters: {}", letters.join(" "));
    }
    for result in &page.ids {
        println!("{result}");
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
