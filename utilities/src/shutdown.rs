//! Process-wide shutdown handling.
//!
//! The entry point owns a [`ShutdownCoordinator`] and hands it to every
//! component that holds hardware. Background loops watch a
//! [`ShutdownSignal`]; components that must put hardware in a safe state
//! register a [`ReleaseOnShutdown`] hook.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, watch};
use tracing::{error, info};

#[async_trait]
pub trait ReleaseOnShutdown: Send + Sync {
    fn name(&self) -> String;

    async fn release(&self) -> anyhow::Result<()>;
}

pub struct ShutdownCoordinator {
    components: Mutex<Vec<Arc<dyn ReleaseOnShutdown>>>,
    signal: watch::Sender<bool>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            components: Mutex::new(Vec::new()),
            signal,
        }
    }

    pub async fn register(&self, component: Arc<dyn ReleaseOnShutdown>) {
        info!("Registered {} for release on shutdown", component.name());
        self.components.lock().await.push(component);
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal(self.signal.subscribe())
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.signal.borrow()
    }

    /// Raises the shutdown signal and releases components in reverse
    /// registration order. A failing release is logged and does not prevent
    /// the others from running. Later calls are no-ops.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.signal.send_replace(true);

        let components = std::mem::take(&mut *self.components.lock().await);
        let mut failed = Vec::new();

        for component in components.iter().rev() {
            let name = component.name();
            match component.release().await {
                Ok(()) => info!("Released {}", name),
                Err(e) => {
                    error!("Failed to release {}: {:#}", name, e);
                    failed.push(name);
                }
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(anyhow::anyhow!("Failed to release: {}", failed.join(", ")))
        }
    }
}

#[derive(Clone)]
pub struct ShutdownSignal(watch::Receiver<bool>);

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once shutdown has been requested, or the coordinator is gone.
    pub async fn wait(&mut self) {
        let _ = self.0.wait_for(|triggered| *triggered).await;
    }
}
