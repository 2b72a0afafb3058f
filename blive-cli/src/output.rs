use std::io::Write;

use async_trait::async_trait;
use blive::{Event, EventHandler};
use tracing::warn;

/// Render one event as a single output line.
pub fn format_event(self_id: &str, event: &Event, pretty: bool) -> anyhow::Result<String> {
    if pretty {
        return Ok(format!(
            "[{}] {}: {}",
            self_id,
            event.event_name(),
            event.description()
        ));
    }
    let mut json = serde_json::to_value(event)?;
    if let Some(obj) = json.as_object_mut() {
        obj.insert("self_id".to_string(), self_id.into());
        obj.insert("event_type".to_string(), event.event_type().as_str().into());
    }
    Ok(serde_json::to_string(&json)?)
}

/// Prints every event to stdout.
pub struct StdoutHandler {
    pretty: bool,
}

impl StdoutHandler {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }
}

#[async_trait]
impl EventHandler for StdoutHandler {
    async fn handle_event(&self, self_id: &str, event: Event) {
        match format_event(self_id, &event, self.pretty) {
            Ok(line) => {
                let mut out = std::io::stdout().lock();
                if let Err(e) = writeln!(out, "{line}") {
                    warn!("Failed to write event: {}", e);
                }
            }
            Err(e) => warn!("Failed to serialize {} event: {}", event.event_name(), e),
        }
    }
}
