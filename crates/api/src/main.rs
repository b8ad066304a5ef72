use anyhow::Context;
use chrono::Utc;
use secrecy::ExposeSecret;

use bazaar_api::app::{AppServices, build_app};
use bazaar_api::config::AppConfig;
use bazaar_infra::{CheckoutService, Stores, load_seed_file, seed_catalog};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;
    bazaar_observability::init(config.log_format);
    if config.uses_dev_jwt_secret() {
        tracing::warn!("JWT_SECRET not set; using insecure dev default");
    }

    let stores = connect_stores(&config).await?;

    if let Some(path) = &config.catalog_seed {
        let products = load_seed_file(path)?;
        seed_catalog(stores.catalog.as_ref(), products).await?;
    }

    let services = AppServices::new(&stores, config.checkout.clone());
    spawn_reconciler(services.checkout.clone(), config.reconcile_interval).await;

    let app = build_app(services, config.jwt_secret.expose_secret());

    let listener = tokio::net::TcpListener::bind(config.socket_addr())
        .await
        .with_context(|| format!("failed to bind {}", config.socket_addr()))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(feature = "postgres")]
async fn connect_stores(config: &AppConfig) -> anyhow::Result<Stores> {
    use bazaar_infra::store::postgres;

    let url = config.require_database_url()?;
    let pool = postgres::connect(url.expose_secret()).await?;
    postgres::migrate(&pool).await?;
    tracing::info!("using postgres stores");
    Ok(Stores::postgres(pool))
}

#[cfg(not(feature = "postgres"))]
async fn connect_stores(config: &AppConfig) -> anyhow::Result<Stores> {
    if config.database_url.is_some() {
        tracing::warn!("DATABASE_URL is set but the postgres feature is disabled; using in-memory stores");
    }
    Ok(Stores::in_memory())
}

/// Repair interrupted checkouts once now, then on every tick.
///
/// Periodic passes only look at entries idle for a full interval. A checkout
/// still in flight that a pass picks up anyway keeps its order, since the
/// journal records an order and claims an entry for rollback exclusively.
async fn spawn_reconciler(checkout: CheckoutService, interval: std::time::Duration) {
    if let Err(e) = checkout.reconcile(Utc::now()).await {
        tracing::error!(error = %e, "startup reconcile failed");
    }

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        let grace = chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::seconds(30));
        loop {
            ticker.tick().await;
            if let Err(e) = checkout.reconcile(Utc::now() - grace).await {
                tracing::error!(error = %e, "reconcile pass failed");
            }
        }
    });
}
