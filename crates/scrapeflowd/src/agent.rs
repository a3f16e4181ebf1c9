//! Agent assembly: config → sink → discovery → forwarder → workers.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use scrapeflow_core::{AgentConfig, DiscoveryConfig, DiscoverySource, ScrapeTarget};
use scrapeflow_discovery::{Directory, FileDirectory, HttpDirectory, discover};
use scrapeflow_forward::{ElasticsearchSink, Forwarder, ForwarderSettings, Sink, SinkSettings};
use scrapeflow_poller::{
    HttpFetcher, Schedule, ShutdownCoordinator, Supervisor, WorkerHandle, listen_for_signals,
};
use tracing::{debug, error, info, warn};

use crate::echo::EchoSink;

/// Command-line overrides.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub config: PathBuf,
    pub username: Option<String>,
    pub password: Option<String>,
    pub worker: Option<usize>,
    pub debug: bool,
}

/// The workers of one category.
struct Category {
    name: String,
    port: u16,
    schedule: Schedule,
    handles: Vec<WorkerHandle>,
}

/// Run until shutdown is requested.
///
/// Every error returned is a startup error; once workers run, failures are
/// logged and the agent keeps going.
pub async fn run(options: Options) -> anyhow::Result<()> {
    let config = load_config(&options)?;

    let sink = ElasticsearchSink::new(SinkSettings::from(&config.sink))
        .context("building elasticsearch client")?;
    let sink: Arc<dyn Sink> = if options.debug {
        Arc::new(EchoSink::new(sink))
    } else {
        Arc::new(sink)
    };

    let directory = build_directory(&config.discovery)?;
    let discovered = discover_all(directory.as_ref(), &config).await?;

    let forwarder = Forwarder::new(
        sink,
        ForwarderSettings {
            index: config.sink.index.clone(),
            concurrency: config.forwarder.concurrency,
            queue_capacity: config.forwarder.queue_capacity,
            submit_timeout: config.forwarder.submit_timeout,
            write_timeout: config.sink.write_timeout,
        },
    );
    let supervisor = Supervisor::new(HttpFetcher::new(config.fetch.timeout), forwarder.submitter());

    let mut categories = Vec::with_capacity(discovered.len());
    for (mut category, targets) in discovered {
        category.handles = supervisor
            .start(targets, category.schedule)
            .with_context(|| format!("starting workers for {}", category.name))?;
        categories.push(category);
    }
    let workers: usize = categories.iter().map(|c| c.handles.len()).sum();
    if workers == 0 {
        warn!("no targets discovered, waiting for shutdown");
    }

    let (mut coordinator, trigger) = ShutdownCoordinator::new();
    tokio::spawn(listen_for_signals(trigger.clone()));

    let refresh = config.discovery.refresh_interval;
    if !refresh.is_zero() {
        info!(interval = ?refresh, "periodic re-discovery enabled");
        let mut ticker = tokio::time::interval(refresh);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                biased;
                _ = coordinator.requested() => break,
                _ = ticker.tick() => {
                    rediscover(&supervisor, directory.as_ref(), &mut categories).await;
                }
            }
        }
    }

    let handles = categories.into_iter().flat_map(|c| c.handles).collect();
    coordinator.run(supervisor, handles).await;
    drop(trigger);

    let stats = forwarder.close().await;
    info!(
        submitted = stats.submitted,
        written = stats.written,
        failed = stats.failed,
        dropped = stats.dropped,
        "forwarder drained"
    );
    Ok(())
}

fn load_config(options: &Options) -> anyhow::Result<AgentConfig> {
    let mut config = AgentConfig::from_file(&options.config)
        .with_context(|| format!("loading configuration {}", options.config.display()))?;
    apply_overrides(&mut config, options);

    // `password` is never serialized.
    match serde_json::to_string(&config) {
        Ok(rendered) => debug!(config = %rendered, "configuration loaded"),
        Err(e) => debug!(error = %e, "configuration loaded"),
    }
    Ok(config)
}

fn apply_overrides(config: &mut AgentConfig, options: &Options) {
    if let Some(username) = &options.username {
        config.sink.username = Some(username.clone());
    }
    if let Some(password) = &options.password {
        config.sink.password = Some(password.clone());
    }
    if let Some(worker) = options.worker {
        config.forwarder.concurrency = worker.max(1);
    }
}

fn build_directory(config: &DiscoveryConfig) -> anyhow::Result<Arc<dyn Directory>> {
    let directory: Arc<dyn Directory> = match config.source {
        DiscoverySource::File => {
            let path = config
                .path
                .as_ref()
                .context("discovery.path is required for source = \"file\"")?;
            info!(path = %path.display(), "file directory");
            Arc::new(FileDirectory::new(path))
        }
        DiscoverySource::Http => {
            let url = config
                .url
                .as_deref()
                .context("discovery.url is required for source = \"http\"")?;
            info!(%url, "http directory");
            Arc::new(HttpDirectory::new(url, config.timeout))
        }
    };
    Ok(directory)
}

/// Discover the targets of every included category. Any unreachable
/// category aborts startup.
async fn discover_all(
    directory: &dyn Directory,
    config: &AgentConfig,
) -> anyhow::Result<Vec<(Category, Vec<ScrapeTarget>)>> {
    let mut discovered = Vec::new();
    for endpoint in config.included_endpoints() {
        let targets = discover(directory, &endpoint.category, endpoint.port)
            .await
            .with_context(|| format!("discovering targets for {}", endpoint.category))?;
        discovered.push((
            Category {
                name: endpoint.category.clone(),
                port: endpoint.port,
                schedule: Schedule::new(endpoint.interval, config.fetch.max_backoff),
                handles: Vec::new(),
            },
            targets,
        ));
    }

    for skipped in config.scrape_endpoints.iter().filter(|e| !e.include) {
        info!(category = %skipped.category, "category excluded");
    }
    Ok(discovered)
}

/// Reconcile every category against a fresh directory snapshot.
///
/// A category whose query fails keeps its current workers.
async fn rediscover(supervisor: &Supervisor, directory: &dyn Directory, categories: &mut [Category]) {
    let mut summary = BTreeMap::new();
    for category in categories.iter_mut() {
        let targets = match discover(directory, &category.name, category.port).await {
            Ok(targets) => targets,
            Err(e) => {
                warn!(category = %category.name, error = %e, "re-discovery failed, keeping current targets");
                continue;
            }
        };

        if let Err(e) = supervisor
            .reconcile(&mut category.handles, targets, category.schedule)
            .await
        {
            error!(category = %category.name, error = %e, "reconcile failed");
        }
        summary.insert(category.name.clone(), category.handles.len());
    }
    debug!(workers = ?summary, "re-discovery complete");
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrapeflow_discovery::{MemoryDirectory, ServerAddress, ServiceInstance};
    use std::time::Duration;

    const CONFIG: &str = r#"
[[scrape_endpoints]]
category = "postgres"
port = 9187
interval = "15s"

[[scrape_endpoints]]
category = "redis"
port = 9121
interval = "30s"
include = false

[discovery]
source = "file"
path = "/nonexistent/instances.json"

[sink]
hosts = ["127.0.0.1"]
port = 9200
username = "elastic"
password = "from-file"
"#;

    fn instance(ip: &str, kind: &str) -> ServiceInstance {
        ServiceInstance {
            id: format!("si-{ip}"),
            hosts: vec![ServerAddress {
                ip: ip.to_string(),
                kind: kind.to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn cli_overrides_win() {
        let mut config = AgentConfig::from_toml(CONFIG).unwrap();
        let options = Options {
            password: Some("from-cli".to_string()),
            worker: Some(7),
            ..Default::default()
        };
        apply_overrides(&mut config, &options);

        assert_eq!(config.sink.username.as_deref(), Some("elastic"));
        assert_eq!(config.sink.password.as_deref(), Some("from-cli"));
        assert_eq!(config.forwarder.concurrency, 7);
    }

    #[tokio::test]
    async fn excluded_categories_are_not_discovered() {
        let config = AgentConfig::from_toml(CONFIG).unwrap();
        let directory = MemoryDirectory::new(vec![
            instance("10.0.0.1", "postgres"),
            instance("10.0.0.2", "redis"),
        ]);

        let discovered = discover_all(&directory, &config).await.unwrap();
        assert_eq!(discovered.len(), 1);
        let (category, targets) = &discovered[0];
        assert_eq!(category.name, "postgres");
        assert_eq!(category.schedule.interval, Duration::from_secs(15));
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].id, "postgres-10.0.0.1");
        assert_eq!(targets[0].port, 9187);
    }

    #[tokio::test]
    async fn missing_config_is_fatal() {
        let err = run(Options {
            config: PathBuf::from("/nonexistent/scrapeflow.toml"),
            ..Default::default()
        })
        .await
        .unwrap_err();
        assert!(format!("{err:#}").contains("loading configuration"));
    }

    #[tokio::test]
    async fn unreachable_directory_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scrapeflow.toml");
        std::fs::write(&path, CONFIG).unwrap();

        let err = run(Options {
            config: path,
            ..Default::default()
        })
        .await
        .unwrap_err();
        assert!(format!("{err:#}").contains("discovering targets for postgres"));
    }

    struct Discard;

    impl Sink for Discard {
        fn write<'a>(
            &'a self,
            _index: &'a str,
            _doc_id: &'a str,
            _result: &'a scrapeflow_core::ScrapeResult,
        ) -> scrapeflow_forward::WriteFuture<'a> {
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn failed_rediscovery_keeps_category_workers() {
        let forwarder = Forwarder::new(Arc::new(Discard), ForwarderSettings::default());
        let supervisor = Supervisor::new(HttpFetcher::new(Duration::from_secs(1)), forwarder.submitter());

        let schedule = Schedule::new(Duration::from_secs(60), Duration::from_secs(60));
        let running = supervisor
            .start(vec![ScrapeTarget::new("postgres", "10.0.0.1", 9187)], schedule)
            .unwrap();
        let state = running[0].state_watch();
        let mut categories = vec![Category {
            name: "postgres".to_string(),
            port: 9187,
            schedule: Schedule {
                interval: Duration::ZERO,
                max_backoff: Duration::from_secs(1),
            },
            handles: running,
        }];

        let directory = MemoryDirectory::new(vec![
            instance("10.0.0.1", "postgres"),
            instance("10.0.0.2", "postgres"),
        ]);
        rediscover(&supervisor, &directory, &mut categories).await;

        assert_eq!(categories[0].handles.len(), 1);
        assert_eq!(categories[0].handles[0].target_id(), "postgres-10.0.0.1");

        let handles = categories.into_iter().flat_map(|c| c.handles).collect();
        supervisor.shutdown(handles).await;
        assert_eq!(*state.borrow(), scrapeflow_poller::WorkerState::Cancelled);
    }

    #[tokio::test]
    async fn http_directory_requires_url() {
        let config = DiscoveryConfig {
            source: DiscoverySource::Http,
            path: None,
            url: None,
            refresh_interval: Duration::ZERO,
            timeout: Duration::from_secs(1),
        };
        assert!(build_directory(&config).is_err());
    }
}
