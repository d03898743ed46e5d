//! Messages handed to the storage subsystem, and the bounded-timeout sender used to hand them off.
//!
//! Delivery is best effort: a request that cannot be queued within its timeout is dropped and
//! logged, never retried. The storage side owns every request once it has been queued.

use std::time::Duration;

use metrics::counter;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::metrics_consts::STORAGE_REQUESTS_DROPPED;

/// Latest known log-end offset of one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetFact {
    pub cluster: String,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// Epoch milliseconds at which the broker response was received
    pub timestamp: i64,
    pub topic_partition_count: i32,
}

#[derive(Debug)]
pub enum StorageRequest {
    SetBrokerOffset(OffsetFact),
    DeleteTopic {
        cluster: String,
        topic: String,
    },
    DeleteGroup {
        cluster: String,
        group: String,
    },
    /// Storage answers with the names of every group it tracks for the cluster
    FetchConsumers {
        cluster: String,
        reply: oneshot::Sender<Vec<String>>,
    },
}

impl StorageRequest {
    pub fn request_type(&self) -> &'static str {
        match self {
            StorageRequest::SetBrokerOffset(_) => "set_broker_offset",
            StorageRequest::DeleteTopic { .. } => "delete_topic",
            StorageRequest::DeleteGroup { .. } => "delete_group",
            StorageRequest::FetchConsumers { .. } => "fetch_consumers",
        }
    }

    pub fn cluster(&self) -> &str {
        match self {
            StorageRequest::SetBrokerOffset(fact) => &fact.cluster,
            StorageRequest::DeleteTopic { cluster, .. }
            | StorageRequest::DeleteGroup { cluster, .. }
            | StorageRequest::FetchConsumers { cluster, .. } => cluster,
        }
    }
}

#[derive(Clone, Debug)]
pub struct StorageSender {
    tx: mpsc::Sender<StorageRequest>,
}

impl StorageSender {
    pub fn new(tx: mpsc::Sender<StorageRequest>) -> Self {
        Self { tx }
    }

    /// Convenience for tests and the binary: a sender plus the receiving end storage reads from.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StorageRequest>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Queue a request, giving up after `timeout`. Returns true if the request was queued.
    pub async fn send(&self, request: StorageRequest, timeout: Duration) -> bool {
        let request_type = request.request_type();
        let cluster = request.cluster().to_string();

        match self.tx.send_timeout(request, timeout).await {
            Ok(()) => true,
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                warn!(
                    cluster = %cluster,
                    request_type,
                    timeout_ms = timeout.as_millis() as u64,
                    "timed out sending request to storage, dropping it"
                );
                counter!(STORAGE_REQUESTS_DROPPED, "request_type" => request_type, "reason" => "timeout")
                    .increment(1);
                false
            }
            Err(mpsc::error::SendTimeoutError::Closed(_)) => {
                warn!(cluster = %cluster, request_type, "storage channel closed, dropping request");
                counter!(STORAGE_REQUESTS_DROPPED, "request_type" => request_type, "reason" => "closed")
                    .increment(1);
                false
            }
        }
    }

    /// Ask storage which groups it tracks for `cluster`. Both the send and the wait for the reply
    /// are bounded by `timeout`; `None` means storage did not answer in time.
    pub async fn fetch_consumers(&self, cluster: &str, timeout: Duration) -> Option<Vec<String>> {
        let (reply, rx) = oneshot::channel();
        let request = StorageRequest::FetchConsumers {
            cluster: cluster.to_string(),
            reply,
        };

        if !self.send(request, timeout).await {
            return None;
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(groups)) => Some(groups),
            Ok(Err(_)) => {
                warn!(cluster, "storage dropped the consumer list reply");
                None
            }
            Err(_) => {
                warn!(
                    cluster,
                    timeout_ms = timeout.as_millis() as u64,
                    "timed out waiting for the consumer list from storage"
                );
                None
            }
        }
    }
}
