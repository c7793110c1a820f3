// file: src/download/datastore.rs
// description: city data store with an optional per-user download cache
// reference: internal data structures

use crate::download::client::HttpClient;
use crate::error::{BnaError, Result};
use crate::utils::files::user_cache_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStrategy {
    #[default]
    None,
    UserCache,
}

/// Files land in `store_dir`. With a cache, they are downloaded there once and copied over.
#[derive(Debug, Clone)]
pub struct DataStore {
    store_dir: PathBuf,
    cache_dir: Option<PathBuf>,
}

impl DataStore {
    pub fn new(store_dir: impl Into<PathBuf>, cache_dir: Option<PathBuf>) -> Self {
        Self {
            store_dir: store_dir.into(),
            cache_dir,
        }
    }

    /// `no_cache` wins over everything, then an explicit directory, then the configured strategy.
    pub fn from_strategy(
        store_dir: impl Into<PathBuf>,
        strategy: CacheStrategy,
        explicit_cache_dir: Option<PathBuf>,
        no_cache: bool,
    ) -> Result<Self> {
        let cache_dir = match (no_cache, explicit_cache_dir, strategy) {
            (true, _, _) => None,
            (false, Some(dir), _) => Some(dir),
            (false, None, CacheStrategy::UserCache) => Some(user_cache_dir()?),
            (false, None, CacheStrategy::None) => None,
        };
        debug!("cache directory: {cache_dir:?}");
        Ok(Self::new(store_dir, cache_dir))
    }

    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }

    pub fn stored_path(&self, name: &str) -> PathBuf {
        self.store_dir.join(name)
    }

    pub fn is_stored(&self, name: &str) -> bool {
        self.stored_path(name).exists()
    }

    pub fn is_cached(&self, name: &str) -> bool {
        self.cache_dir
            .as_ref()
            .is_some_and(|dir| dir.join(name).exists())
    }

    pub async fn copy_to_store(&self, name: &str) -> Result<()> {
        let cached = self
            .cache_dir
            .as_ref()
            .map(|dir| dir.join(name))
            .filter(|path| path.exists())
            .ok_or_else(|| BnaError::NotFound(format!("{name} was not found in the cache")))?;

        if self.is_stored(name) {
            return Ok(());
        }
        fs::create_dir_all(&self.store_dir)
            .await
            .map_err(|e| BnaError::file(&self.store_dir, e))?;
        let target = self.stored_path(name);
        fs::copy(&cached, &target)
            .await
            .map_err(|e| BnaError::file(&target, e))?;
        Ok(())
    }

    /// Makes `name` available in the store, downloading it from `url` if needed.
    pub async fn fetch(&self, client: &HttpClient, url: &str, name: &str) -> Result<PathBuf> {
        let stored = self.stored_path(name);
        if stored.exists() {
            debug!("{name} is already stored");
            return Ok(stored);
        }

        match &self.cache_dir {
            Some(cache_dir) => {
                let cached = cache_dir.join(name);
                if cached.exists() {
                    debug!("{name} was cached");
                } else {
                    client.download_with_retries(url, &cached, true).await?;
                }
                self.copy_to_store(name).await?;
            }
            None => client.download_with_retries(url, &stored, true).await?,
        }
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::fs as stdfs;
    use tempfile::TempDir;

    #[test]
    fn test_strategy_resolution() {
        let temp = TempDir::new().unwrap();
        let explicit = temp.path().join("cache");

        let store =
            DataStore::from_strategy(temp.path(), CacheStrategy::UserCache, None, true).unwrap();
        assert!(store.cache_dir().is_none());

        let store = DataStore::from_strategy(
            temp.path(),
            CacheStrategy::None,
            Some(explicit.clone()),
            false,
        )
        .unwrap();
        assert_eq!(store.cache_dir(), Some(explicit.as_path()));

        let store =
            DataStore::from_strategy(temp.path(), CacheStrategy::None, None, false).unwrap();
        assert!(store.cache_dir().is_none());
    }

    #[tokio::test]
    async fn test_copy_to_store() {
        let store_dir = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();
        stdfs::write(cache_dir.path().join("state_fips_speed.csv"), "fips,speed").unwrap();

        let store = DataStore::new(store_dir.path(), Some(cache_dir.path().to_path_buf()));
        assert!(store.is_cached("state_fips_speed.csv"));
        assert!(!store.is_stored("state_fips_speed.csv"));

        store.copy_to_store("state_fips_speed.csv").await.unwrap();
        assert!(store.is_stored("state_fips_speed.csv"));
        assert!(store.copy_to_store("missing.csv").await.is_err());
    }

    #[tokio::test]
    async fn test_fetch_uses_cache_without_network() {
        let store_dir = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();
        stdfs::write(cache_dir.path().join("city_fips_speed.csv"), "cached").unwrap();

        let store = DataStore::new(store_dir.path(), Some(cache_dir.path().to_path_buf()));
        let client = HttpClient::new(&Config::default_config().download).unwrap();
        let path = store
            .fetch(&client, "http://127.0.0.1:9/city_fips_speed.csv", "city_fips_speed.csv")
            .await
            .unwrap();
        assert_eq!(stdfs::read_to_string(path).unwrap(), "cached");
    }

    #[test]
    fn test_strategy_deserializes_from_snake_case() {
        let strategy: CacheStrategy = serde_json::from_str("\"user_cache\"").unwrap();
        assert_eq!(strategy, CacheStrategy::UserCache);
    }
}
