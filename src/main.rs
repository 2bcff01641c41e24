//! Admin Task Queue binary entry point

use admin_task_queue::handlers::register_builtin;
use admin_task_queue::storage::FileBackend;
use admin_task_queue::{Config, QueueManager, TaskQueue};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    let level: Level = config.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Admin Task Queue");
    info!(
        "Initialized with max_concurrent {}, max queue size: {}",
        config.max_concurrent, config.max_queue_size
    );

    let queue = if config.enable_persistence {
        let backend = FileBackend::open(&config.persistence_path).await?;
        let queue = TaskQueue::with_storage(&config, Arc::new(backend));
        register_builtin(queue.registry()).await;
        queue.restore().await?;
        queue
    } else {
        let queue = TaskQueue::new(&config);
        register_builtin(queue.registry()).await;
        queue
    };
    let manager = QueueManager::new(queue.clone());

    let retention = config.retention_policy();
    let mut janitor = tokio::time::interval(Duration::from_secs(config.cleanup_interval_secs));

    loop {
        tokio::select! {
            _ = janitor.tick() => {
                let evicted = queue.cleanup(&retention).await;
                let stats = manager.get_queue_stats().await;
                info!(
                    evicted,
                    total = stats.summary.total_tasks,
                    running = stats.summary.current_running,
                    pending = stats.summary.queue_size,
                    "Queue status"
                );
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("Failed to listen for shutdown signal: {}", e);
                }
                break;
            }
        }
    }

    if let Err(e) = queue.shutdown(config.shutdown_timeout()).await {
        warn!("{}", e);
    }
    info!("Admin Task Queue stopped");
    Ok(())
}
