/// F&O ban list: per-day set of banned underlyings
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::Result;

/// Source of the day's MWPL ban list. Injected so tests run on a static
/// set and deployments can point at their provider's feed.
#[async_trait]
pub trait BanListSource: Send + Sync {
    async fn fetch(&self) -> Result<HashSet<String>>;
}

/// File-backed source: one underlying per line, `#` comments allowed. A
/// missing file means an empty ban list.
pub struct FileBanList {
    path: PathBuf,
}

impl FileBanList {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileBanList { path: path.into() }
    }
}

#[async_trait]
impl BanListSource for FileBanList {
    async fn fetch(&self) -> Result<HashSet<String>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(_) => return Ok(HashSet::new()),
        };

        Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(|l| l.to_uppercase())
            .collect())
    }
}

/// Fixed source for tests and for deployments without a feed
pub struct StaticBanList {
    banned: HashSet<String>,
}

impl StaticBanList {
    pub fn new(banned: impl IntoIterator<Item = String>) -> Self {
        StaticBanList { banned: banned.into_iter().map(|s| s.to_uppercase()).collect() }
    }

    pub fn empty() -> Self {
        StaticBanList { banned: HashSet::new() }
    }
}

#[async_trait]
impl BanListSource for StaticBanList {
    async fn fetch(&self) -> Result<HashSet<String>> {
        Ok(self.banned.clone())
    }
}

/// Current ban state, refreshed at startup and hourly by a background task
pub struct BanList {
    source: Arc<dyn BanListSource>,
    current: RwLock<HashSet<String>>,
}

impl BanList {
    pub fn new(source: Arc<dyn BanListSource>) -> Self {
        BanList { source, current: RwLock::new(HashSet::new()) }
    }

    pub async fn refresh(&self) {
        match self.source.fetch().await {
            Ok(banned) => {
                if !banned.is_empty() {
                    info!("F&O ban list refreshed: {} underlyings", banned.len());
                }
                let mut current = self.current.write().await;
                *current = banned;
            }
            Err(e) => {
                // Keep the previous list on a failed refresh
                warn!("Ban list refresh failed: {}", e);
            }
        }
    }

    pub async fn is_banned(&self, underlying: &str) -> bool {
        let current = self.current.read().await;
        current.contains(&underlying.to_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_ban_list() {
        let ban_list = BanList::new(Arc::new(StaticBanList::new(["NIFTY".to_string()])));
        assert!(!ban_list.is_banned("NIFTY").await);

        ban_list.refresh().await;
        assert!(ban_list.is_banned("NIFTY").await);
        assert!(ban_list.is_banned("nifty").await);
        assert!(!ban_list.is_banned("BANKNIFTY").await);
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let ban_list = BanList::new(Arc::new(FileBanList::new("/nonexistent/ban.txt")));
        ban_list.refresh().await;
        assert!(!ban_list.is_banned("NIFTY").await);
    }
}
