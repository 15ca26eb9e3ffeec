//! The webhook event path of the router.

use tracing::{info, warn};

use super::Router;
use crate::error::{ConfigError, Result};
use crate::events::{classify, split_batch};
use crate::ticketing::NewRequest;

impl Router {
    /// Turn every event of a batch into a request on the event sink.
    ///
    /// The first `start` events are taken as already done. After each
    /// creation `on_created` receives the number of events done so far; an
    /// error from it aborts like a failed creation. The first failure
    /// aborts the rest of the batch; requests created before it stay.
    pub async fn handle_event<F, Fut>(
        &self,
        raw: &[u8],
        start: usize,
        mut on_created: F,
    ) -> Result<Vec<String>>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let events = split_batch(raw)?;
        if start > 0 {
            info!(done = start, total = events.len(), "Resuming event batch");
        } else {
            info!(count = events.len(), "Handling event batch");
        }
        let mut keys = Vec::new();
        for (index, event) in events.iter().enumerate().skip(start) {
            keys.push(self.create_event_request(event).await?);
            on_created(index + 1).await?;
        }
        Ok(keys)
    }

    /// Classify one event and create its request. Never retried anonymously.
    pub async fn create_event_request(&self, event: &str) -> Result<String> {
        let sink_ref = self
            .topology
            .event_sink()
            .ok_or_else(|| ConfigError::MissingRequired {
                key: "create_event_requests".into(),
                hint: "events need exactly one desk marked as event sink".into(),
            })?;
        let sink = self.topology.desk(sink_ref);
        let client = self.topology.installation(sink.installation).client.as_ref();

        let classified = classify(event);
        info!(
            shape = classified.shape,
            summary = %classified.summary,
            description = %classified.description,
            project = %sink.project_key,
            "Creating request from event"
        );

        let reporter = Some(self.policy.event_username.as_str()).filter(|u| !u.is_empty());
        let key = client
            .create_request(&NewRequest {
                desk_id: &sink.id,
                request_type_id: &sink.request_type_id,
                summary: &classified.summary,
                description: &classified.description,
                reporter,
            })
            .await?;
        info!(key = %key, "Created request from event");

        if !classified.attachments.is_empty()
            && let Err(e) = client
                .create_comment(&sink.id, &key, "", &classified.attachments)
                .await
        {
            warn!(key = %key, error = %e, "Event attachment upload failed");
        }
        Ok(key)
    }
}
