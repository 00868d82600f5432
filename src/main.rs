mod batch_state;
mod character_store;
mod cli;
mod config;
mod config_persistence;
mod image_pipeline;
mod image_scorer;
mod image_similarity;
mod image_store;
mod port_manager;
mod protocol;
mod query_builder;
mod query_overrides;
mod review_pages;
mod review_session_manager;
mod review_surface;
mod search_client;
mod staging;
mod terminal_prompt;
#[cfg(test)]
mod test_support;
mod text_parser;
mod web_review;
mod wikimedia_backend;

use std::collections::BTreeMap;

use clap::Parser;
use log::{info, warn};

use batch_state::{batch_id_for_category, batch_id_for_ids};
use character_store::{CharacterStore, SqliteCharacterStore};
use cli::{Cli, Commands, PortsCommands, ReviewArgs, StagingCommands};
use config::Config;
use config_persistence::{default_config_path, load_or_create_config_file};
use image_scorer::ImageScorer;
use image_similarity::SimilarityValidator;
use image_store::committed_entity_ids;
use port_manager::PortManager;
use protocol::Category;
use query_builder::QueryBuilder;
use query_overrides::QueryOverrides;
use review_session_manager::ReviewSessionManager;
use search_client::{SearchClient, SleepPacer};
use staging::clean_staging_root;
use wikimedia_backend::WikimediaBackend;

fn port_manager(config: &Config) -> PortManager {
    PortManager::new(
        &config.review.registry_path,
        config.review.port_range_start,
        config.review.port_range_end,
    )
}

fn query_builder(config: &Config) -> QueryBuilder {
    let overrides = QueryOverrides::load(config.queries.overrides_file.as_deref());
    QueryBuilder::new(overrides, config.queries.max_queries)
}

fn run_review(config: &Config, args: ReviewArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = SqliteCharacterStore::open(&config.store.database_path)?;

    let (entities, batch_id) = if args.ids.is_empty() {
        let all = store.fetch_by_category(args.category)?;
        let batch: Vec<_> = all
            .into_iter()
            .skip(args.start)
            .take(args.batch_size.max(1))
            .collect();
        (
            batch,
            batch_id_for_category(args.category, args.start, args.batch_size),
        )
    } else {
        let (found, missing) = store.fetch_by_ids(&args.ids)?;
        if !missing.is_empty() {
            warn!("No character records for ids {:?}", missing);
        }
        (found, batch_id_for_ids(&args.ids))
    };

    if entities.is_empty() {
        info!("Batch {} has no entities to review", batch_id);
        return Ok(());
    }
    info!("Batch {}: {} entities", batch_id, entities.len());

    let search = SearchClient::new(
        Box::new(WikimediaBackend::new(&config.search)),
        Box::new(SleepPacer),
        ImageScorer::new(config.scoring.clone()),
        config.search.clone(),
    );
    let manager = ReviewSessionManager::new(
        query_builder(config),
        search,
        SimilarityValidator::new(&config.similarity),
        config.review.clone(),
        &config.search,
    );

    let ports = port_manager(config);
    let open_browser = config.review.open_browser && !args.no_browser;
    let report = manager.review_batch(
        &batch_id,
        &entities,
        (!args.headless).then_some(&ports),
        open_browser,
    )?;

    println!(
        "{}: {} selected, {} skipped, {} pending{}",
        report.batch_id,
        report.selected,
        report.skipped,
        report.pending,
        if report.aborted { " (aborted)" } else { "" }
    );
    for (entity_id, reason) in &report.failures {
        println!("  {entity_id} left pending: {reason}");
    }
    for line in &report.choice_lines {
        println!("{line}");
    }
    Ok(())
}

fn run_queries(config: &Config, id: i64) -> Result<(), Box<dyn std::error::Error>> {
    let store = SqliteCharacterStore::open(&config.store.database_path)?;
    let (entities, _) = store.fetch_by_ids(&[id])?;
    let Some(entity) = entities.first() else {
        return Err(format!("no character with id {id}").into());
    };
    let builder = query_builder(config);
    let queries = builder.build_queries(entity)?;
    println!(
        "{} ({}), {} of at most {} queries",
        entity.label(),
        entity.category.display_name(),
        queries.len(),
        builder.max_queries()
    );
    for (index, query) in queries.iter().enumerate() {
        println!("{:>3}. {}", index + 1, query);
    }
    Ok(())
}

fn run_ports(config: &Config, action: PortsCommands) -> Result<(), Box<dyn std::error::Error>> {
    let ports = port_manager(config);
    match action {
        PortsCommands::List => {
            let (first, last) = ports.range();
            let active = ports.list_active()?;
            println!("{} active leases in {}-{}", active.len(), first, last);
            for lease in active {
                let created = chrono::DateTime::from_timestamp_millis(lease.created_at_unix_ms)
                    .map(|timestamp| timestamp.to_rfc3339())
                    .unwrap_or_default();
                println!(
                    "{:>5}  {:<20} pid {:<8} {}",
                    lease.port, lease.label, lease.pid, created
                );
            }
        }
        PortsCommands::Release { port } => {
            if ports.release_port(port)? {
                println!("Released port {port}");
            } else {
                println!("No lease recorded for port {port}");
            }
        }
        PortsCommands::Clear => {
            let removed = ports.clear()?;
            println!("Removed {removed} leases");
        }
    }
    Ok(())
}

fn run_status(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let store = SqliteCharacterStore::open(&config.store.database_path)?;
    let committed = committed_entity_ids(&config.review.output_dir)?;

    let mut per_category: BTreeMap<char, (Category, usize, usize)> = BTreeMap::new();
    for entity in store.fetch_by_category(None)? {
        let entry = per_category
            .entry(entity.category.code())
            .or_insert((entity.category, 0, 0));
        entry.1 += 1;
        if committed.contains(&entity.id) {
            entry.2 += 1;
        }
    }

    let (mut total, mut done) = (0usize, 0usize);
    for (code, (category, count, with_image)) in &per_category {
        println!(
            "{}  {:<24} {:>5}/{:<5}",
            code,
            category.display_name(),
            with_image,
            count
        );
        total += *count;
        done += *with_image;
    }
    println!("   {:<24} {:>5}/{:<5}", "TOTAL", done, total);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut clog = colog::default_builder();
    clog.filter(
        None,
        if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        },
    );
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = load_or_create_config_file(&config_path);

    match cli.command {
        Commands::Review(args) => run_review(&config, args),
        Commands::Queries { id } => run_queries(&config, id),
        Commands::Ports { action } => run_ports(&config, action),
        Commands::Staging {
            action: StagingCommands::Clean { dry_run },
        } => {
            let report = clean_staging_root(&config.review.staging_dir, dry_run)?;
            for dir in &report.removed_dirs {
                println!("{}", dir.display());
            }
            println!(
                "{} {} directories ({} bytes)",
                if dry_run { "Would remove" } else { "Removed" },
                report.removed_dirs.len(),
                report.bytes
            );
            Ok(())
        }
        Commands::Status => run_status(&config),
    }
}
