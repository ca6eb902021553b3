//! Prometheus counters shared across the node core.
//!
//! Components receive a [`CoreMetrics`] handle as a parameter; the handle
//! owns its registry so tests stay parallelisable.

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use std::sync::Arc;

/// The counter set every subsystem reports into.
#[derive(Clone)]
pub struct CoreMetrics {
    registry: Registry,
    /// Transactions accepted into the mempool or a block.
    pub tx_accepted: IntCounter,
    /// Transactions rejected, labelled by rejection kind.
    pub tx_rejected: IntCounterVec,
    /// Peers currently connected.
    pub peers_connected: IntGauge,
    /// Peer disconnects, labelled by reason.
    pub peers_disconnected: IntCounterVec,
    /// RPC requests, labelled by method.
    pub rpc_requests: IntCounterVec,
    /// RPC errors, labelled by method.
    pub rpc_errors: IntCounterVec,
    /// Gas consumed per VM execution.
    pub vm_gas: Histogram,
}

impl CoreMetrics {
    /// Creates the counter set inside a fresh registry.
    pub fn new() -> Arc<Self> {
        let registry = Registry::new();

        let tx_accepted =
            IntCounter::with_opts(Opts::new("tx_accepted", "Transactions accepted"))
                .expect("valid counter opts");
        let tx_rejected = IntCounterVec::new(
            Opts::new("tx_rejected_by_kind", "Transactions rejected by kind"),
            &["kind"],
        )
        .expect("valid counter opts");
        let peers_connected =
            IntGauge::with_opts(Opts::new("peers_connected", "Connected peers"))
                .expect("valid gauge opts");
        let peers_disconnected = IntCounterVec::new(
            Opts::new("peers_disconnected_by_reason", "Peer disconnects by reason"),
            &["reason"],
        )
        .expect("valid counter opts");
        let rpc_requests = IntCounterVec::new(
            Opts::new("rpc_requests_by_method", "RPC requests by method"),
            &["method"],
        )
        .expect("valid counter opts");
        let rpc_errors = IntCounterVec::new(
            Opts::new("rpc_errors_by_method", "RPC errors by method"),
            &["method"],
        )
        .expect("valid counter opts");
        let vm_gas = Histogram::with_opts(
            HistogramOpts::new("vm_gas_histogram", "Gas consumed per VM execution")
                .buckets(prometheus::exponential_buckets(1_000.0, 10.0, 8).expect("valid buckets")),
        )
        .expect("valid histogram opts");

        for collector in [
            Box::new(tx_accepted.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(tx_rejected.clone()),
            Box::new(peers_connected.clone()),
            Box::new(peers_disconnected.clone()),
            Box::new(rpc_requests.clone()),
            Box::new(rpc_errors.clone()),
            Box::new(vm_gas.clone()),
        ] {
            registry
                .register(collector)
                .expect("collectors register once per registry");
        }

        Arc::new(Self {
            registry,
            tx_accepted,
            tx_rejected,
            peers_connected,
            peers_disconnected,
            rpc_requests,
            rpc_errors,
            vm_gas,
        })
    }

    /// The registry backing these counters, for exporters.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_register_and_count() {
        let metrics = CoreMetrics::new();
        metrics.tx_accepted.inc();
        metrics.tx_rejected.with_label_values(&["invalid"]).inc();
        metrics.tx_rejected.with_label_values(&["invalid"]).inc();
        metrics.rpc_requests.with_label_values(&["getblock"]).inc();
        metrics.vm_gas.observe(1_000_000.0);

        assert_eq!(metrics.tx_accepted.get(), 1);
        assert_eq!(metrics.tx_rejected.with_label_values(&["invalid"]).get(), 2);
        assert!(!metrics.registry().gather().is_empty());
    }

    #[test]
    fn test_registries_are_isolated() {
        let a = CoreMetrics::new();
        let b = CoreMetrics::new();
        a.tx_accepted.inc();
        assert_eq!(b.tx_accepted.get(), 0);
    }
}
