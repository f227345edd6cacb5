//! Publisher façade
//!
//! Routes each record and hands the resulting batch to the connection
//! supervisor. Never blocks on the network.

use crate::error::RelayResult;
use crate::observability::metrics;
use crate::record_span;
use crate::record::Record;
use crate::routing::EventRouter;
use crate::transport::mqtt::PublishQueue;
use tracing::trace;

#[derive(Debug, Clone)]
pub struct Publisher {
    router: EventRouter,
    queue: PublishQueue,
}

impl Publisher {
    pub fn new(router: EventRouter, queue: PublishQueue) -> Self {
        Self { router, queue }
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    /// Route one record and queue its publications as one batch; returns
    /// the number of publications produced
    pub fn publish(&self, record: &Record) -> RelayResult<usize> {
        let _span = record_span!(fields = record.len()).entered();
        metrics().record_received();
        let batch = self.router.route(record);
        let count = batch.len();
        trace!(count, "Routed record");
        self.queue.submit(batch)?;
        Ok(count)
    }

    /// Parse one line of JSON decoder output and publish it
    pub fn publish_json_line(&self, line: &str) -> RelayResult<usize> {
        let record = Record::from_json_str(line)?;
        self.publish(&record)
    }
}
