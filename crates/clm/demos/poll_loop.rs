//! Minimal wiring of a `ChannelSource` and a `ClusterList` into a poll loop.
//!
//! Fetching the cluster inventory over HTTP is out of scope for this crate,
//! so `fetch_inventory` below stands in for it with a fixed snapshot. A real
//! caller would replace it with whatever inventory client it already has.

use std::sync::Arc;

use clm::{
    ChannelSource, Cluster, ClusterList, ClusterStatus, GitChannelConfig, GitChannelSource,
    InventoryFilter,
};
use tracing_subscriber::EnvFilter;

fn fetch_inventory() -> Vec<Cluster> {
    vec![Cluster {
        id: "aws:123456789011:eu-central-1:demo".to_string(),
        infrastructure_account: "aws:123456789011".to_string(),
        lifecycle_status: clm::lifecycle_status::READY.to_string(),
        channel: "dev".to_string(),
        environment: "dev".to_string(),
        status: ClusterStatus { current_version: String::new(), next_version: String::new() },
        config_items: Default::default(),
    }]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).with_target(false).init();

    let source = Arc::new(GitChannelSource::new(GitChannelConfig {
        repository_url: "https://example.com/org/config-repo.git".to_string(),
        workdir: std::env::temp_dir().join("clm-demo"),
        ssh_private_key_file: None,
    })?);
    let queue = Arc::new(ClusterList::new(InventoryFilter::match_all(), vec!["dev".to_string(), "prod".to_string()]));

    let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
    loop {
        interval.tick().await;

        let versions = match source.update().await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "failed to refresh channel mirror, skipping this tick");
                continue;
            }
        };
        queue.update_available(&versions, &fetch_inventory());

        while let Some(token) = queue.select_next(Box::new(|| {})) {
            let source = source.clone();
            let queue = queue.clone();
            tokio::spawn(async move {
                let mut token = token;
                let result = source.get(&token.target_version).await;
                token.next_error = match result {
                    Ok(config) => {
                        tracing::info!(cluster = %token.cluster.id, path = %config.path.display(), "materialized working copy");
                        let _ = source.delete(config).await;
                        None
                    }
                    Err(e) => Some(e.to_string()),
                };
                if let Err(e) = queue.cluster_processed(token) {
                    tracing::warn!(error = %e, "token already processed");
                }
            });
        }
    }
}
