//! Application state shared by the HTTP surface, operations and recovery.
//!
//! Everything is constructed once at startup and passed in explicitly;
//! there are no global executor or store lookups.

use crate::allocator::{Allocator, SimpleAllocator};
use crate::jobs::AsyncJobManager;
use std::sync::Arc;
use volplane_common::Config;
use volplane_executor::{CmdExecutor, RemoteCommandTransport};
use volplane_store::EntryStore;

#[derive(Clone)]
pub struct App {
    pub store: Arc<EntryStore>,
    pub executor: Arc<CmdExecutor>,
    pub allocator: Arc<dyn Allocator>,
    pub jobs: Arc<AsyncJobManager>,
    pub config: Arc<Config>,
}

impl App {
    /// Wire the service from an opened store and a command transport
    pub fn new(
        config: Config,
        store: EntryStore,
        transport: Arc<dyn RemoteCommandTransport>,
    ) -> Self {
        let fstab = config.executor.fstab.display().to_string();
        Self {
            store: Arc::new(store),
            executor: Arc::new(CmdExecutor::new(transport, fstab)),
            allocator: Arc::new(SimpleAllocator::new()),
            jobs: Arc::new(AsyncJobManager::new()),
            config: Arc::new(config),
        }
    }

    #[must_use]
    pub fn with_allocator(mut self, allocator: Arc<dyn Allocator>) -> Self {
        self.allocator = allocator;
        self
    }

    /// Base directory for brick mounts
    #[must_use]
    pub fn mount_base(&self) -> String {
        self.config.executor.mount_base.display().to_string()
    }
}
