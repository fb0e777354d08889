//! Two-tier cache (memory in front of a directory) with tracing output
//!
//! Run with `RUST_LOG=tiered_cache=debug cargo run --example tiered_usage`.

use tiered_cache::{
    CacheBackend, DirectoryCache, DirectoryCacheConfig, InMemoryCache, TierSource, TieredCache, Ttl,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let directory = std::env::temp_dir().join("tiered_cache_demo");
    let disk_config = DirectoryCacheConfig::new(&directory, "demo");

    let cache = TieredCache::builder()
        .with_tier(TierSource::instance(InMemoryCache::new()))
        .with_prefixed_tier(
            TierSource::factory(move || {
                let config = disk_config.clone();
                async move { DirectoryCache::open(config).await.map_err(anyhow::Error::from) }
            }),
            "v1:",
        )
        .strict(false)
        .default_ttl(Ttl::from_secs(300))
        .build()
        .await?;

    cache.set_default(b"greeting", b"hello from the disk tier").await?;

    // Fetched from the first tier
    if let Some(value) = cache.get(b"greeting").await? {
        tracing::info!(value = %String::from_utf8_lossy(&value), "Cache hit");
    }

    let report = cache
        .get_or_compute(b"report", Ttl::from_secs(60), || async {
            tracing::info!("Computing report");
            Ok::<_, anyhow::Error>(b"expensive report".to_vec())
        })
        .await?;
    tracing::info!(len = report.len(), "Report ready");

    let stats = cache.stats();
    tracing::info!(
        requests = stats.total_requests,
        hit_rate = %format!("{:.1}%", stats.hit_rate),
        "Cascade statistics"
    );
    for tier in stats.tiers {
        tracing::info!(
            tier = tier.index,
            backend = tier.backend.unwrap_or("unresolved"),
            hits = tier.hits,
            misses = tier.misses,
            backfills = tier.backfills,
            "Tier statistics"
        );
    }

    cache.flush().await?;
    Ok(())
}
