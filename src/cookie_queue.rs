//! Asynchronous cookie upload pipeline
//!
//! Bounded FIFO plus a single consumer task that batches cookie
//! snapshots and delivers them to the backend. The producer side never
//! blocks: on overflow the newest envelope is dropped with a warning,
//! because the next keepalive cycle will produce a fresh one anyway.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One cookie snapshot waiting for upload
#[derive(Debug, Clone)]
pub struct CookieEnvelope {
    pub account: String,
    pub cookies: HashMap<String, String>,
    pub enqueued_at: DateTime<Utc>,
}

enum QueueItem {
    Envelope(CookieEnvelope),
    Shutdown,
}

/// Producer handle for the cookie upload queue
pub struct CookieUploadQueue {
    tx: mpsc::Sender<QueueItem>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl CookieUploadQueue {
    /// Start the queue and its consumer task.
    ///
    /// `deliver` is called once per envelope; a delivery failure is
    /// logged and the envelope dropped (there is no retry queue).
    pub fn start<F, Fut>(
        capacity: usize,
        batch_size: usize,
        flush_interval: Duration,
        deliver: F,
    ) -> Self
    where
        F: Fn(CookieEnvelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = crate::error::CollectorResult<()>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let consumer = tokio::spawn(consumer_loop(rx, batch_size.max(1), flush_interval, deliver));
        Self {
            tx,
            consumer: Mutex::new(Some(consumer)),
        }
    }

    /// Non-blocking enqueue. Returns `false` when the queue was full
    /// and the snapshot was dropped.
    pub fn put(&self, account: &str, cookies: HashMap<String, String>) -> bool {
        let envelope = CookieEnvelope {
            account: account.to_string(),
            cookies,
            enqueued_at: Utc::now(),
        };
        match self.tx.try_send(QueueItem::Envelope(envelope)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    account = account,
                    "cookie upload queue full, dropping newest snapshot"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(account = account, "cookie upload queue closed, dropping snapshot");
                false
            }
        }
    }

    /// Send the shutdown sentinel and wait for the consumer to flush
    /// its remaining buffer.
    pub async fn shutdown(&self) {
        if self.tx.send(QueueItem::Shutdown).await.is_err() {
            debug!("cookie queue consumer already gone");
        }
        if let Some(handle) = self.consumer.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "cookie queue consumer ended abnormally");
            }
        }
    }
}

async fn consumer_loop<F, Fut>(
    mut rx: mpsc::Receiver<QueueItem>,
    batch_size: usize,
    flush_interval: Duration,
    deliver: F,
) where
    F: Fn(CookieEnvelope) -> Fut,
    Fut: Future<Output = crate::error::CollectorResult<()>>,
{
    let mut buffer: Vec<CookieEnvelope> = Vec::with_capacity(batch_size);

    loop {
        match tokio::time::timeout(flush_interval, rx.recv()).await {
            Ok(Some(QueueItem::Envelope(envelope))) => {
                buffer.push(envelope);
                if buffer.len() >= batch_size {
                    flush(&mut buffer, &deliver).await;
                }
            }
            Ok(Some(QueueItem::Shutdown)) | Ok(None) => {
                flush(&mut buffer, &deliver).await;
                info!("cookie queue consumer shutting down");
                return;
            }
            Err(_) => {
                // Flush interval elapsed with a partial batch
                flush(&mut buffer, &deliver).await;
            }
        }
    }
}

/// Deliver everything buffered, preserving enqueue order
async fn flush<F, Fut>(buffer: &mut Vec<CookieEnvelope>, deliver: &F)
where
    F: Fn(CookieEnvelope) -> Fut,
    Fut: Future<Output = crate::error::CollectorResult<()>>,
{
    if buffer.is_empty() {
        return;
    }
    debug!(batch = buffer.len(), "flushing cookie snapshots");
    for envelope in buffer.drain(..) {
        let account = envelope.account.clone();
        if let Err(e) = deliver(envelope).await {
            warn!(account = %account, error = %e, "cookie delivery failed, snapshot dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    fn cookies(n: u32) -> HashMap<String, String> {
        HashMap::from([("token".to_string(), format!("v{n}"))])
    }

    #[tokio::test]
    async fn delivers_in_enqueue_order() {
        let seen = Arc::new(AsyncMutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let queue = CookieUploadQueue::start(
            10,
            10,
            Duration::from_millis(10),
            move |env: CookieEnvelope| {
                let seen = seen_clone.clone();
                async move {
                    seen.lock().await.push(env.cookies["token"].clone());
                    Ok(())
                }
            },
        );

        for n in 0..3 {
            assert!(queue.put("A1", cookies(n)));
        }
        queue.shutdown().await;

        let order = seen.lock().await.clone();
        assert_eq!(order, vec!["v0", "v1", "v2"]);
    }

    #[tokio::test]
    async fn drops_newest_on_overflow() {
        // batch_size 1 makes the consumer flush immediately, and the
        // delivery blocks, so the channel backs up behind it
        let queue = CookieUploadQueue::start(
            2,
            1,
            Duration::from_secs(3600),
            |_env: CookieEnvelope| async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            },
        );

        // First snapshot is pulled into the blocked flush; the next two
        // fill the channel
        assert!(queue.put("A1", cookies(0)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(queue.put("A1", cookies(1)));
        assert!(queue.put("A1", cookies(2)));
        // Channel is now full (capacity 2); the newest is dropped
        assert!(!queue.put("A1", cookies(3)));
    }

    #[tokio::test]
    async fn failed_delivery_is_dropped_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let queue = CookieUploadQueue::start(
            10,
            1,
            Duration::from_millis(10),
            move |_env: CookieEnvelope| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(crate::error::CollectorError::Other("backend down".into()))
                }
            },
        );

        queue.put("A1", cookies(0));
        queue.shutdown().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
