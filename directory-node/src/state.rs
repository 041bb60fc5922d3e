//! Directory process state: the registry behind a single async mutex, the
//! way §5's "registry's single writer" realization note requires.

use std::path::PathBuf;
use std::sync::Arc;

use letter_registry::Registry;
use tokio::sync::Mutex;

pub struct DirectoryState {
    pub registry: Mutex<Registry>,
}

impl DirectoryState {
    pub fn new(registry: Registry) -> Arc<Self> {
        Arc::new(Self { registry: Mutex::new(registry) })
    }
}

pub fn state_path(root: &std::path::Path) -> PathBuf {
    root.join("directory-state.json")
}
