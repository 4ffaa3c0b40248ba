use arc_swap::ArcSwap;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

use crate::{model::Configuration, ConfigContainer};

/// Holds the live configuration. Readers take a snapshot that stays valid
/// for as long as they hold it; a reload swaps in a fully built replacement.
#[derive(Debug)]
pub struct ConfigStore {
    current: ArcSwap<Configuration>,
}

impl ConfigStore {
    pub fn new(configuration: Configuration) -> Self {
        Self {
            current: ArcSwap::from_pointee(configuration),
        }
    }

    pub fn current(&self) -> Arc<Configuration> {
        self.current.load_full()
    }

    pub fn replace(&self, configuration: Configuration) {
        self.current.store(Arc::new(configuration));
    }

    /// Re-read the source. On failure the previous configuration stays in
    /// place and `false` is returned.
    #[instrument(skip_all, fields(config.path = %container.path().display()))]
    pub async fn reload(&self, container: &ConfigContainer) -> bool {
        let compiled = match container.load().await {
            Ok(compiled) => compiled,
            Err(e) => {
                error!("{}", e);
                return false;
            }
        };

        let previous = self.current();
        if previous.port != compiled.configuration.port {
            warn!(
                "Port changed from {} to {}, restart to listen on the new port",
                previous.port, compiled.configuration.port
            );
        }

        debug!(
            "Swapping in {} rules",
            compiled.configuration.rules.len()
        );
        self.replace(compiled.configuration);
        true
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(Configuration::default())
    }
}

#[tokio::test]
async fn test_failed_reload_keeps_previous() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"response":[{"path":"/hello","string":"world"}]}"#).unwrap();

    let container = ConfigContainer::open(&path, None).unwrap();
    let store = ConfigStore::default();
    assert!(store.reload(&container).await);
    assert_eq!(1, store.current().rules.len());

    std::fs::write(&path, r#"{"response":[{"path":"#).unwrap();
    assert!(!store.reload(&container).await);
    let current = store.current();
    assert_eq!(1, current.rules.len());
    assert_eq!("/hello", current.rules[0].target.pathname);

    std::fs::write(&path, "42").unwrap();
    assert!(!store.reload(&container).await);
    assert_eq!(1, store.current().rules.len());
}

#[tokio::test]
async fn test_reload_swaps_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"[{"path":"/a"}]"#).unwrap();

    let container = ConfigContainer::open(&path, None).unwrap();
    let store = ConfigStore::default();
    assert!(store.reload(&container).await);
    let before = store.current();

    std::fs::write(&path, r#"[{"path":"/a"},{"path":"/b"}]"#).unwrap();
    assert!(store.reload(&container).await);

    assert_eq!(1, before.rules.len());
    assert_eq!(2, store.current().rules.len());
}

#[tokio::test]
async fn test_bogus_log_level_still_reloads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"log_level":"bogus","response":[{"path":"/a"}]}"#).unwrap();

    let container = ConfigContainer::open(&path, None).unwrap();
    let store = ConfigStore::default();
    assert!(store.reload(&container).await);
    assert_eq!(
        crate::model::LogLevels::default(),
        store.current().log.levels
    );
}
