use std::{process, sync::Arc, time::Instant};

use pressroom::{
    application::{
        articles::ArticleService,
        error::AppError,
        repos::{ArticleFilter, ArticleQuery, EntityStore},
        seed::{self, SeedPlan},
    },
    cache::{CacheBackend, CacheConfig, CacheStore, MemoryBackend},
    config::{self, CacheBackendKind},
    infra::{cache::RedisBackend, db::PostgresRepositories, error::InfraError, telemetry},
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Check(config::CheckArgs::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Migrate(_) => run_migrate(&settings).await,
        config::Command::Seed(args) => run_seed(&settings, args).await,
        config::Command::Check(_) => run_check(&settings).await,
    }
}

async fn run_migrate(settings: &config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(settings).await?;
    info!(target: "pressroom::migrate", "migrations applied");
    repositories.close().await;
    Ok(())
}

async fn run_seed(settings: &config::Settings, args: config::SeedArgs) -> Result<(), AppError> {
    let repositories = init_repositories(settings).await?;
    let cache = init_cache(settings)?;
    let service = build_service(repositories.clone(), cache.clone(), settings);

    let plan = if args.small {
        SeedPlan::small()
    } else {
        SeedPlan::full()
    };
    let result = seed::seed(&service, plan).await;

    cache.close().await;
    repositories.close().await;

    let report = result?;
    info!(
        target: "pressroom::seed",
        authors = report.authors,
        articles = report.articles,
        comments = report.comments,
        "seed finished"
    );
    Ok(())
}

async fn run_check(settings: &config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(settings).await?;
    let cache = init_cache(settings)?;
    let service = build_service(repositories.clone(), cache.clone(), settings);

    let result = check(&repositories, &cache, &service, settings).await;

    cache.close().await;
    repositories.close().await;
    result
}

async fn check(
    repositories: &PostgresRepositories,
    cache: &CacheStore,
    service: &ArticleService,
    settings: &config::Settings,
) -> Result<(), AppError> {
    repositories.health_check().await.map_err(AppError::from)?;

    if settings.cache.enabled && !cache.ping().await {
        warn!(
            target: "pressroom::check",
            backend = cache.backend_name(),
            "cache backend is unreachable; reads will bypass it"
        );
    }

    let query = ArticleQuery {
        filter: ArticleFilter::published(),
        window: settings.pagination.policy().window(None, None),
        ..ArticleQuery::default()
    };

    // The second read of the same page shows whether the cache answers it.
    for attempt in 1..=2 {
        let started = Instant::now();
        let loaded = service.read_list(&query).await?;
        info!(
            target: "pressroom::check",
            attempt,
            outcome = loaded.stats.cache.as_str(),
            store_queries = loaded.stats.store_queries,
            items = loaded.value.items.len(),
            total = loaded.value.total,
            elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0,
            "first page read"
        );
    }

    if let Some(newest) = service.list_authors().await?.first() {
        let loaded = service.read_author(newest.id).await?;
        info!(
            target: "pressroom::check",
            author_id = newest.id,
            store_queries = loaded.stats.store_queries,
            articles = loaded.value.articles.len(),
            "newest author read"
        );
    }

    let overview = service.overview().await?;
    let rendered = serde_json::to_string_pretty(&overview)
        .map_err(|err| AppError::unexpected(format!("failed to render overview: {err}")))?;
    println!("{rendered}");
    Ok(())
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool = PostgresRepositories::connect(
        database_url,
        settings.database.max_connections.get(),
        settings.database.acquire_timeout,
    )
    .await
    .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok(Arc::new(PostgresRepositories::new(
        pool,
        settings.database.query_timeout,
    )))
}

fn init_cache(settings: &config::Settings) -> Result<Arc<CacheStore>, AppError> {
    let cache_config = CacheConfig::from(&settings.cache);
    let backend: Arc<dyn CacheBackend> = match settings.cache.backend {
        CacheBackendKind::Redis => Arc::new(
            RedisBackend::connect(
                &settings.cache.redis_url,
                settings.cache.redis_pool_size.get() as usize,
                settings.cache.op_timeout,
            )
            .map_err(AppError::from)?,
        ),
        CacheBackendKind::Memory => Arc::new(MemoryBackend::new(&cache_config)),
    };

    info!(
        target: "pressroom::cache",
        backend = backend.name(),
        enabled = cache_config.enabled,
        namespace = %cache_config.namespace,
        "cache configured"
    );
    Ok(Arc::new(CacheStore::new(backend, &cache_config)))
}

fn build_service(
    repositories: Arc<PostgresRepositories>,
    cache: Arc<CacheStore>,
    settings: &config::Settings,
) -> ArticleService {
    let store: Arc<dyn EntityStore> = repositories;
    ArticleService::new(store, cache, CacheConfig::from(&settings.cache))
}
