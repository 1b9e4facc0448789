//! Harbor projects cache for proxy-cache discovery
//!
//! Serves the last successful project listing. Once the listing is older than
//! the resync interval, callers keep getting the stale listing while a single
//! background task refreshes it.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};
use harbor_proxy::{HarborApiClient, Project, ProjectSummary, ProxyError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::CoreError;

/// Project summaries requested at once during a refresh
pub const SUMMARY_CONCURRENCY: usize = 4;

/// Shortest period of the resync task
const MIN_RESYNC_INTERVAL: Duration = Duration::from_secs(1);

/// Harbor API operations the cache depends on
#[async_trait]
pub trait ProjectsApi: Send + Sync {
    async fn list_projects(&self) -> Result<Vec<Project>, ProxyError>;
    async fn project_summary(&self, project_id: i64) -> Result<ProjectSummary, ProxyError>;
}

#[async_trait]
impl ProjectsApi for HarborApiClient {
    async fn list_projects(&self) -> Result<Vec<Project>, ProxyError> {
        HarborApiClient::list_projects(self).await
    }

    async fn project_summary(&self, project_id: i64) -> Result<ProjectSummary, ProxyError> {
        HarborApiClient::project_summary(self, project_id).await
    }
}

/// A Harbor project and the upstream registry it caches, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarborProject {
    pub name: String,
    pub proxy_cache_registry_url: Option<String>,
}

/// Immutable view of the cache contents
#[derive(Debug, Clone)]
pub struct ProjectsSnapshot {
    pub projects: Arc<Vec<HarborProject>>,
    pub expires_at: Instant,
}

struct Inner {
    api: Arc<dyn ProjectsApi>,
    resync_interval: Duration,
    snapshot: RwLock<Option<ProjectsSnapshot>>,
    /// Held for the duration of a refresh
    refreshing: Arc<Mutex<()>>,
}

/// Stale-while-revalidate cache of Harbor projects
#[derive(Clone)]
pub struct ProjectsCache {
    inner: Arc<Inner>,
}

impl ProjectsCache {
    pub fn new(api: Arc<dyn ProjectsApi>, resync_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                resync_interval,
                snapshot: RwLock::new(None),
                refreshing: Arc::new(Mutex::new(())),
            }),
        }
    }

    /// Whether a first listing has been fetched
    pub fn ready(&self) -> bool {
        self.inner.snapshot.read().is_some()
    }

    /// Current snapshot, if any
    pub fn snapshot(&self) -> Option<ProjectsSnapshot> {
        self.inner.snapshot.read().clone()
    }

    /// Projects known to Harbor
    ///
    /// Fresh data is returned as is. Stale data is returned immediately and a
    /// background refresh is started unless one is already running. With no
    /// data yet, the caller fetches inline and sees the error if that fails.
    pub async fn list(&self) -> Result<Arc<Vec<HarborProject>>, CoreError> {
        if let Some(snapshot) = self.snapshot() {
            if Instant::now() >= snapshot.expires_at {
                debug!("Projects cache out of date, serving stale projects");
                self.spawn_refresh();
            }
            return Ok(snapshot.projects);
        }

        let _guard = self.inner.refreshing.lock().await;

        // another caller may have filled the cache while we waited
        if let Some(snapshot) = self.snapshot() {
            return Ok(snapshot.projects);
        }

        self.fetch().await
    }

    /// Refresh unless a refresh is already running; returns whether one ran
    pub async fn refresh(&self) -> Result<bool, CoreError> {
        let Ok(_guard) = self.inner.refreshing.try_lock() else {
            debug!("Projects refresh already in flight");
            return Ok(false);
        };

        self.fetch().await?;
        Ok(true)
    }

    fn spawn_refresh(&self) {
        let Ok(guard) = self.inner.refreshing.clone().try_lock_owned() else {
            return;
        };

        let cache = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = cache.fetch().await {
                warn!("Failed to update projects cache: {}", e);
            }
        });
    }

    /// Fetch every page and every summary; any failure leaves the cache untouched
    async fn fetch(&self) -> Result<Arc<Vec<HarborProject>>, CoreError> {
        match self.fetch_projects().await {
            Ok(projects) => {
                let projects = Arc::new(projects);
                *self.inner.snapshot.write() = Some(ProjectsSnapshot {
                    projects: projects.clone(),
                    expires_at: Instant::now() + self.inner.resync_interval,
                });

                metrics::counter!("hcw_projects_cache_refresh_total", "result" => "success")
                    .increment(1);
                info!("Projects cache updated with {} projects", projects.len());
                Ok(projects)
            }
            Err(e) => {
                metrics::counter!("hcw_projects_cache_refresh_total", "result" => "error")
                    .increment(1);
                Err(CoreError::Refresh(e.to_string()))
            }
        }
    }

    async fn fetch_projects(&self) -> Result<Vec<HarborProject>, ProxyError> {
        let api = &self.inner.api;
        let projects = api.list_projects().await?;

        let requests: Vec<_> = projects
            .iter()
            .map(|p| api.project_summary(p.project_id))
            .collect();
        let summaries: Vec<ProjectSummary> = stream::iter(requests)
            .buffered(SUMMARY_CONCURRENCY)
            .try_collect()
            .await?;

        Ok(projects
            .into_iter()
            .zip(summaries)
            .map(|(project, summary)| HarborProject {
                name: project.name,
                proxy_cache_registry_url: summary
                    .registry
                    .map(|r| r.url)
                    .filter(|url| !url.is_empty()),
            })
            .collect())
    }
}

/// Map each upstream registry host to `<harbor_host>/<project>` for projects
/// configured as proxy caches; the first project claiming a host wins
pub fn registry_proxies(harbor_host: &str, projects: &[HarborProject]) -> HashMap<String, String> {
    let mut proxies = HashMap::new();

    for project in projects {
        let Some(registry_url) = project.proxy_cache_registry_url.as_deref() else {
            continue;
        };

        let host = match Url::parse(registry_url) {
            Ok(url) => match (url.host_str(), url.port()) {
                (Some(host), Some(port)) => format!("{}:{}", host, port),
                (Some(host), None) => host.to_string(),
                (None, _) => continue,
            },
            Err(e) => {
                warn!("Failed to parse registry url {}: {}", registry_url, e);
                continue;
            }
        };

        proxies
            .entry(host)
            .or_insert_with(|| format!("{}/{}", harbor_host, project.name));
    }

    proxies
}

/// Start the periodic resync task
pub fn spawn_resync_task(cache: ProjectsCache, interval: Duration) -> tokio::task::JoinHandle<()> {
    let interval = interval.max(MIN_RESYNC_INTERVAL);
    info!("Starting projects resync task (interval: {:?})", interval);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);

        loop {
            ticker.tick().await;
            match cache.refresh().await {
                Ok(true) => debug!("Scheduled projects resync complete"),
                Ok(false) => {}
                Err(e) => warn!("Scheduled projects resync failed: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_proxy::RegistrySummary;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeApi {
        projects: Vec<(i64, &'static str, Option<&'static str>)>,
        list_calls: AtomicUsize,
        fail_summary: AtomicBool,
        delay: Duration,
        summary_delay: Duration,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
    }

    impl FakeApi {
        fn new(projects: Vec<(i64, &'static str, Option<&'static str>)>) -> Self {
            Self {
                projects,
                list_calls: AtomicUsize::new(0),
                fail_summary: AtomicBool::new(false),
                delay: Duration::ZERO,
                summary_delay: Duration::ZERO,
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ProjectsApi for FakeApi {
        async fn list_projects(&self) -> Result<Vec<Project>, ProxyError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(self
                .projects
                .iter()
                .map(|(id, name, _)| Project {
                    project_id: *id,
                    name: name.to_string(),
                })
                .collect())
        }

        async fn project_summary(&self, project_id: i64) -> Result<ProjectSummary, ProxyError> {
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
            tokio::time::sleep(self.summary_delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if project_id == 3 && self.fail_summary.load(Ordering::SeqCst) {
                return Err(ProxyError::UpstreamError {
                    status: 500,
                    message: "summary unavailable".to_string(),
                });
            }
            let url = self
                .projects
                .iter()
                .find(|(id, _, _)| *id == project_id)
                .and_then(|(_, _, url)| *url);
            Ok(ProjectSummary {
                registry: url.map(|url| RegistrySummary {
                    name: String::new(),
                    url: url.to_string(),
                }),
            })
        }
    }

    fn five_projects() -> Vec<(i64, &'static str, Option<&'static str>)> {
        vec![
            (1, "library", None),
            (
                2,
                "dockerhub-proxy",
                Some("https://registry.hub.docker.com"),
            ),
            (3, "quay-proxy", Some("https://quay.io")),
            (4, "team", None),
            (5, "gcr-proxy", Some("https://gcr.io")),
        ]
    }

    #[tokio::test]
    async fn test_first_list_fetches_inline() {
        let api = Arc::new(FakeApi::new(five_projects()));
        let cache = ProjectsCache::new(api.clone(), Duration::from_secs(300));
        assert!(!cache.ready());

        let projects = cache.list().await.unwrap();
        assert_eq!(projects.len(), 5);
        assert_eq!(
            projects[1].proxy_cache_registry_url.as_deref(),
            Some("https://registry.hub.docker.com")
        );
        assert!(cache.ready());

        // fresh: served without another fetch
        cache.list().await.unwrap();
        assert_eq!(api.list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_first_list_failure_is_reported() {
        let api = Arc::new(FakeApi::new(five_projects()));
        api.fail_summary.store(true, Ordering::SeqCst);
        let cache = ProjectsCache::new(api, Duration::from_secs(300));

        let err = cache.list().await.unwrap_err();
        assert!(matches!(err, CoreError::Refresh(_)));
        assert!(!cache.ready());
    }

    #[tokio::test]
    async fn test_concurrent_stale_lists_trigger_one_refresh() {
        let mut api = FakeApi::new(five_projects());
        api.delay = Duration::from_millis(50);
        let api = Arc::new(api);
        let cache = ProjectsCache::new(api.clone(), Duration::ZERO);

        cache.list().await.unwrap();
        assert_eq!(api.list_calls.load(Ordering::SeqCst), 1);

        let results = futures::future::join_all((0..16).map(|_| cache.list())).await;
        for result in results {
            assert_eq!(result.unwrap().len(), 5);
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(api.list_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_partial_refresh_failure_keeps_snapshot() {
        let api = Arc::new(FakeApi::new(five_projects()));
        let cache = ProjectsCache::new(api.clone(), Duration::ZERO);

        cache.list().await.unwrap();
        let before = cache.snapshot().unwrap();

        api.fail_summary.store(true, Ordering::SeqCst);
        assert!(cache.refresh().await.is_err());

        let after = cache.snapshot().unwrap();
        assert!(Arc::ptr_eq(&before.projects, &after.projects));
        assert_eq!(before.expires_at, after.expires_at);

        api.fail_summary.store(false, Ordering::SeqCst);
        assert!(cache.refresh().await.unwrap());
        assert!(!Arc::ptr_eq(
            &before.projects,
            &cache.snapshot().unwrap().projects
        ));
    }

    #[tokio::test]
    async fn test_summaries_fetched_with_bounded_concurrency() {
        let projects: Vec<(i64, &'static str, Option<&'static str>)> = (1..=12)
            .map(|id| (id, "project", Some("https://registry.example.com")))
            .collect();
        let mut api = FakeApi::new(projects);
        api.summary_delay = Duration::from_millis(20);
        let api = Arc::new(api);
        let cache = ProjectsCache::new(api.clone(), Duration::from_secs(300));

        let listed = cache.list().await.unwrap();
        assert_eq!(listed.len(), 12);

        let peak = api.peak_in_flight.load(Ordering::SeqCst);
        assert!(peak >= 2, "summaries ran one at a time");
        assert!(peak <= SUMMARY_CONCURRENCY, "{} summaries in flight", peak);
    }

    #[tokio::test]
    async fn test_summaries_keep_project_order() {
        let mut api = FakeApi::new(five_projects());
        api.summary_delay = Duration::from_millis(5);
        let cache = ProjectsCache::new(Arc::new(api), Duration::from_secs(300));

        let projects = cache.list().await.unwrap();
        let urls: Vec<_> = projects
            .iter()
            .map(|p| p.proxy_cache_registry_url.as_deref())
            .collect();
        assert_eq!(
            urls,
            vec![
                None,
                Some("https://registry.hub.docker.com"),
                Some("https://quay.io"),
                None,
                Some("https://gcr.io"),
            ]
        );
    }

    #[tokio::test]
    async fn test_resync_task_with_zero_interval() {
        let api = Arc::new(FakeApi::new(five_projects()));
        let cache = ProjectsCache::new(api.clone(), Duration::ZERO);

        let handle = spawn_resync_task(cache.clone(), Duration::ZERO);
        for _ in 0..50 {
            if cache.ready() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(cache.ready());
        assert!(!handle.is_finished());
        assert_eq!(api.list_calls.load(Ordering::SeqCst), 1);
        handle.abort();
    }

    #[test]
    fn test_registry_proxies() {
        let projects = vec![
            HarborProject {
                name: "foo".to_string(),
                proxy_cache_registry_url: None,
            },
            HarborProject {
                name: "dockerhub-proxy".to_string(),
                proxy_cache_registry_url: Some("https://registry.hub.docker.com".to_string()),
            },
            HarborProject {
                name: "dockerhub-proxy-2".to_string(),
                proxy_cache_registry_url: Some("https://registry.hub.docker.com/".to_string()),
            },
            HarborProject {
                name: "local".to_string(),
                proxy_cache_registry_url: Some("http://registry.local:5000".to_string()),
            },
            HarborProject {
                name: "broken".to_string(),
                proxy_cache_registry_url: Some("::not a url".to_string()),
            },
        ];

        let proxies = registry_proxies("harbor.example.com", &projects);
        assert_eq!(proxies.len(), 2);
        assert_eq!(
            proxies.get("registry.hub.docker.com").map(String::as_str),
            Some("harbor.example.com/dockerhub-proxy")
        );
        assert_eq!(
            proxies.get("registry.local:5000").map(String::as_str),
            Some("harbor.example.com/local")
        );

        assert!(registry_proxies("harbor.example.com", &[]).is_empty());
    }
}
