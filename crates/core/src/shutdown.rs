//! Cooperative node shutdown.
//!
//! Shutdown walks a priority-ordered chain of handlers (stop accepting →
//! close wallet → stop consensus → flush mempool → stop P2P → stop RPC →
//! stop monitoring → close storage → join threads). Each handler gets its
//! own time budget; one that overruns is skipped rather than allowed to
//! stall the whole sequence.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{info, warn};

/// Default per-handler time budget.
pub const DEFAULT_STAGE_BUDGET: Duration = Duration::from_secs(5);

/// Shutdown errors.
#[derive(Error, Debug)]
pub enum ShutdownError {
    /// A second shutdown was requested while one was running.
    #[error("Shutdown already in progress")]
    AlreadyInProgress,

    /// A handler reported a failure.
    #[error("Shutdown handler '{stage}' failed: {reason}")]
    Handler { stage: String, reason: String },
}

/// The fixed shutdown stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownStage {
    StopAccepting,
    CloseWallet,
    StopConsensus,
    FlushMempool,
    StopNetwork,
    StopRpc,
    StopMonitoring,
    CloseStorage,
    JoinThreads,
}

impl ShutdownStage {
    /// All stages in execution order.
    pub const ALL: [ShutdownStage; 9] = [
        ShutdownStage::StopAccepting,
        ShutdownStage::CloseWallet,
        ShutdownStage::StopConsensus,
        ShutdownStage::FlushMempool,
        ShutdownStage::StopNetwork,
        ShutdownStage::StopRpc,
        ShutdownStage::StopMonitoring,
        ShutdownStage::CloseStorage,
        ShutdownStage::JoinThreads,
    ];

    /// Stable name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            ShutdownStage::StopAccepting => "stop_accepting",
            ShutdownStage::CloseWallet => "close_wallet",
            ShutdownStage::StopConsensus => "stop_consensus",
            ShutdownStage::FlushMempool => "flush_mempool",
            ShutdownStage::StopNetwork => "stop_network",
            ShutdownStage::StopRpc => "stop_rpc",
            ShutdownStage::StopMonitoring => "stop_monitoring",
            ShutdownStage::CloseStorage => "close_storage",
            ShutdownStage::JoinThreads => "join_threads",
        }
    }
}

type StageFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;
type StageHandler = Box<dyn Fn() -> StageFuture + Send + Sync>;

struct RegisteredHandler {
    stage: ShutdownStage,
    name: String,
    budget: Duration,
    handler: StageHandler,
}

/// Runs registered handlers in stage order with per-handler budgets.
pub struct ShutdownCoordinator {
    handlers: parking_lot::Mutex<Vec<RegisteredHandler>>,
    in_progress: AtomicBool,
    completed: AtomicBool,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    /// Creates an empty coordinator.
    pub fn new() -> Self {
        Self {
            handlers: parking_lot::Mutex::new(Vec::new()),
            in_progress: AtomicBool::new(false),
            completed: AtomicBool::new(false),
        }
    }

    /// Registers a handler for a stage with the default budget.
    pub fn register<F, Fut>(&self, stage: ShutdownStage, name: &str, handler: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        self.register_with_budget(stage, name, DEFAULT_STAGE_BUDGET, handler);
    }

    /// Registers a handler with an explicit budget.
    pub fn register_with_budget<F, Fut>(
        &self,
        stage: ShutdownStage,
        name: &str,
        budget: Duration,
        handler: F,
    ) where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        self.handlers.lock().push(RegisteredHandler {
            stage,
            name: name.to_string(),
            budget,
            handler: Box::new(move || Box::pin(handler())),
        });
    }

    /// Whether shutdown has finished.
    pub fn is_complete(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// Runs the shutdown chain. Handlers that fail or overrun their budget
    /// are logged and skipped; the chain always runs to the end.
    pub async fn shutdown(self: &Arc<Self>) -> Result<(), ShutdownError> {
        if self.in_progress.swap(true, Ordering::SeqCst) {
            return Err(ShutdownError::AlreadyInProgress);
        }
        info!("node shutdown started");

        let mut handlers = std::mem::take(&mut *self.handlers.lock());
        handlers.sort_by_key(|h| h.stage);

        for registered in handlers {
            let stage = registered.stage.name();
            match timeout(registered.budget, (registered.handler)()).await {
                Ok(Ok(())) => {
                    info!(stage, handler = %registered.name, "shutdown stage complete");
                }
                Ok(Err(reason)) => {
                    warn!(stage, handler = %registered.name, %reason, "shutdown stage failed, continuing");
                }
                Err(_) => {
                    warn!(stage, handler = %registered.name, budget = ?registered.budget,
                          "shutdown stage overran its budget, skipping");
                }
            }
        }

        self.completed.store(true, Ordering::SeqCst);
        info!("node shutdown complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_stages_run_in_priority_order() {
        let coordinator = Arc::new(ShutdownCoordinator::new());
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for stage in [
            ShutdownStage::CloseStorage,
            ShutdownStage::StopAccepting,
            ShutdownStage::StopNetwork,
        ] {
            let order = order.clone();
            coordinator.register(stage, stage.name(), move || {
                let order = order.clone();
                async move {
                    order.lock().push(stage);
                    Ok(())
                }
            });
        }

        coordinator.shutdown().await.unwrap();
        let recorded = order.lock().clone();
        assert_eq!(
            recorded,
            vec![
                ShutdownStage::StopAccepting,
                ShutdownStage::StopNetwork,
                ShutdownStage::CloseStorage,
            ]
        );
        assert!(coordinator.is_complete());
    }

    #[tokio::test]
    async fn test_overrunning_handler_is_skipped() {
        let coordinator = Arc::new(ShutdownCoordinator::new());
        let ran = Arc::new(AtomicUsize::new(0));

        coordinator.register_with_budget(
            ShutdownStage::StopNetwork,
            "slow",
            Duration::from_millis(20),
            || async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            },
        );
        let ran_clone = ran.clone();
        coordinator.register(ShutdownStage::CloseStorage, "fast", move || {
            let ran = ran_clone.clone();
            async move {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        coordinator.shutdown().await.unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_double_shutdown_rejected() {
        let coordinator = Arc::new(ShutdownCoordinator::new());
        coordinator.shutdown().await.unwrap();
        assert!(matches!(
            coordinator.shutdown().await,
            Err(ShutdownError::AlreadyInProgress)
        ));
    }
}
