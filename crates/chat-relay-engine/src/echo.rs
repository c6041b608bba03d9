//! Local echo engine for development without an agent backend.
//!
//! Streams the active query back word by word, then reports success.

use std::time::Duration;

use async_trait::async_trait;
use tokio_stream::StreamExt;

use crate::event::UpstreamEvent;
use crate::{AgentEngine, EventStream, QueryOptions};

const USER_PREFIX: &str = "User: ";
const TURN_SEPARATOR: &str = "\n\n";

#[derive(Debug, Default)]
pub struct EchoEngine {
    delay: Duration,
}

impl EchoEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pause before each event, to make streaming visible in a browser.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// The last user turn of the prompt, or the whole prompt when it has none.
///
/// A turn only starts after a blank line, so `User: ` inside the query text
/// does not split it.
fn active_query(prompt: &str) -> &str {
    let marker = format!("{TURN_SEPARATOR}{USER_PREFIX}");
    match prompt.rfind(&marker) {
        Some(i) => &prompt[i + marker.len()..],
        None => prompt.strip_prefix(USER_PREFIX).unwrap_or(prompt),
    }
}

#[async_trait]
impl AgentEngine for EchoEngine {
    fn id(&self) -> &str {
        "echo"
    }

    async fn query(&self, prompt: &str, _options: &QueryOptions) -> anyhow::Result<EventStream> {
        let mut events: Vec<UpstreamEvent> = active_query(prompt)
            .split_inclusive(' ')
            .map(|word| UpstreamEvent::StreamDelta {
                text: word.to_string(),
            })
            .collect();
        events.push(UpstreamEvent::CompletionSuccess);

        let delay = self.delay;
        let stream = futures::stream::iter(events).then(move |event| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(event)
        });
        Ok(Box::pin(stream))
    }
}
