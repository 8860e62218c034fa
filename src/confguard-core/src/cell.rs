//! Latest-value cell holding the published configuration.
//!
//! One writer (the loader), many readers. Reads are lock-free; subscribers
//! are woken on every publish.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tokio::sync::watch;

use crate::document::ConfigurationDocument;
use crate::error::ConfigError;

/// Published configuration slot.
pub(crate) struct ConfigurationCell {
    current: ArcSwapOption<ConfigurationDocument>,
    notify: watch::Sender<Option<Arc<ConfigurationDocument>>>,
}

impl ConfigurationCell {
    pub(crate) fn new() -> Self {
        let (notify, _) = watch::channel(None);
        Self {
            current: ArcSwapOption::empty(),
            notify,
        }
    }

    /// Replace the published document. There is no way to publish "absent".
    pub(crate) fn publish(&self, document: ConfigurationDocument) -> Arc<ConfigurationDocument> {
        let document = Arc::new(document);
        self.current.store(Some(Arc::clone(&document)));
        self.notify.send_replace(Some(Arc::clone(&document)));
        document
    }

    pub(crate) fn load(&self) -> Option<Arc<ConfigurationDocument>> {
        self.current.load_full()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Option<Arc<ConfigurationDocument>>> {
        self.notify.subscribe()
    }
}

/// Cloneable read handle for downstream consumers.
#[derive(Clone)]
pub struct ConfigurationHandle {
    cell: Arc<ConfigurationCell>,
}

impl ConfigurationHandle {
    pub(crate) fn new(cell: Arc<ConfigurationCell>) -> Self {
        Self { cell }
    }

    /// The last published document. Never blocks.
    ///
    /// # Errors
    ///
    /// `NotInitialized` before the first successful bootstrap.
    pub fn current(&self) -> Result<Arc<ConfigurationDocument>, ConfigError> {
        self.cell.load().ok_or(ConfigError::NotInitialized)
    }

    /// Like [`current`](Self::current) but without the error.
    pub fn try_current(&self) -> Option<Arc<ConfigurationDocument>> {
        self.cell.load()
    }

    /// Receiver that observes every subsequent publish.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<ConfigurationDocument>>> {
        self.cell.subscribe()
    }
}

impl std::fmt::Debug for ConfigurationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigurationHandle")
            .field("serial", &self.cell.load().map(|d| d.serial()))
            .finish()
    }
}
