use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http::Method;
use tokio::time;

use crate::connectivity::{classify, AttemptOutcome, ConnectivityFlag};
use crate::relay::Relay;
use crate::replay::FlushReport;
use crate::retry::backoff;
use crate::transport::{OutgoingRequest, Transport};

/// Probes the backend, keeps the connectivity flag current, and triggers a
/// flush when connectivity comes back or work is waiting.
pub struct ConnectivityMonitor {
    relay: Relay,
    transport: Arc<dyn Transport>,
    flag: ConnectivityFlag,
    probe_url: String,
    interval: Duration,
    // stopped passes in a row
    failures: AtomicU32,
}

impl ConnectivityMonitor {
    pub fn new(
        relay: Relay,
        transport: Arc<dyn Transport>,
        flag: ConnectivityFlag,
        probe_url: String,
        interval: Duration,
    ) -> Self {
        Self {
            relay,
            transport,
            flag,
            probe_url,
            interval,
            failures: AtomicU32::new(0),
        }
    }

    pub async fn start(&self) {
        loop {
            time::sleep(self.next_delay()).await;
            tracing::trace!("probing {}", &self.probe_url);
            self.tick().await;
        }
    }

    pub fn next_delay(&self) -> Duration {
        match self.failures.load(Ordering::SeqCst) {
            0 => self.interval,
            failures => self.interval.max(backoff(failures - 1)),
        }
    }

    /// Returns the report of the flush this tick triggered, if any.
    pub async fn tick(&self) -> Option<FlushReport> {
        let online = self.probe().await;
        let was_online = self.flag.set_online(online);

        if !online {
            if was_online {
                tracing::info!("lost connectivity to {}", &self.probe_url);
            }
            return None;
        }

        let pending = match self.relay.store().count().await {
            Ok(counts) => counts.pending,
            Err(err) => {
                tracing::error!("Error counting queued requests: {}", err);
                return None;
            }
        };

        if was_online && pending == 0 {
            return None;
        }
        if !was_online {
            tracing::info!("connectivity restored, {} requests pending", pending);
        }

        let report = self.relay.flush_queue().await;
        if report.is_drained() {
            self.failures.store(0, Ordering::SeqCst);
        } else {
            let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::warn!("flush stopped ({} in a row): {:?}", failures, &report.outcome);
        }

        Some(report)
    }

    async fn probe(&self) -> bool {
        let request = OutgoingRequest {
            method: Method::HEAD,
            url: self.probe_url.clone(),
            headers: Vec::new(),
            body: None,
        };

        !matches!(
            classify(self.transport.send(request).await),
            AttemptOutcome::ConnectivityAbsent(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::Connectivity;
    use crate::events::BroadcastNotifier;
    use crate::relay::{ClientConfig, Parts};
    use crate::store::{new_request, MemoryQueueStore, QueueStore};
    use crate::testing::FakeTransport;
    use crate::transport::TransportErrorKind;
    use http::StatusCode;

    fn monitor() -> (ConnectivityMonitor, Arc<FakeTransport>, MemoryQueueStore) {
        let store = MemoryQueueStore::new();
        let transport = Arc::new(FakeTransport::new());
        let flag = ConnectivityFlag::new(true);
        let relay = Relay::new(
            ClientConfig::new("http://kitchen.test"),
            Parts {
                transport: transport.clone(),
                store: Arc::new(store.clone()),
                tokens: Arc::new(|| None),
                connectivity: Arc::new(flag.clone()),
                events: Arc::new(BroadcastNotifier::new(8)),
            },
        );
        let monitor = ConnectivityMonitor::new(
            relay,
            transport.clone(),
            flag,
            "http://kitchen.test/".to_string(),
            Duration::from_secs(15),
        );
        (monitor, transport, store)
    }

    #[tokio::test]
    async fn unreachable_probe_marks_offline_without_flushing() {
        let (monitor, transport, store) = monitor();
        store.enqueue(new_request("/api/a", 1)).await.unwrap();
        transport.fail_with(TransportErrorKind::Connect, "refused");

        assert!(monitor.tick().await.is_none());
        assert!(!monitor.flag.is_online());
        // only the probe went out
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(transport.requests()[0].method, Method::HEAD);
    }

    #[tokio::test]
    async fn error_status_still_counts_as_online() {
        let (monitor, transport, _) = monitor();
        monitor.flag.set_online(false);
        transport.respond_with(StatusCode::METHOD_NOT_ALLOWED, "");

        let report = monitor.tick().await.unwrap();

        assert!(monitor.flag.is_online());
        assert!(report.is_drained());
    }

    #[tokio::test]
    async fn reconnect_flushes_pending_requests() {
        let (monitor, transport, store) = monitor();
        store.enqueue(new_request("/api/a", 1)).await.unwrap();
        monitor.flag.set_online(false);

        let report = monitor.tick().await.unwrap();

        assert_eq!(report.delivered, 1);
        assert!(store.list().await.unwrap().is_empty());
        assert_eq!(transport.requests()[1].url, "http://kitchen.test/api/a");
    }

    #[tokio::test]
    async fn idle_queue_is_not_flushed() {
        let (monitor, transport, _) = monitor();

        assert!(monitor.tick().await.is_none());
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn stopped_passes_back_off() {
        let (monitor, transport, store) = monitor();
        store.enqueue(new_request("/api/a", 1)).await.unwrap();
        transport.respond_for("/api/a", StatusCode::SERVICE_UNAVAILABLE, "busy");

        assert_eq!(monitor.next_delay(), Duration::from_secs(15));
        for _ in 0..8 {
            monitor.tick().await;
        }
        // 1.52^7 seconds is past the probe interval
        assert!(monitor.next_delay() > Duration::from_secs(15));

        transport.respond_for("/api/a", StatusCode::OK, "{}");
        monitor.tick().await;
        assert_eq!(monitor.next_delay(), Duration::from_secs(15));
    }
}
