//! `trim`: cap a stream to (approximately) `count` entries, optionally
//! archiving the entries that fall off first, per spec.md §4.7 and
//! SPEC_FULL.md §4.7's supplemental defaults from
//! `original_source/event_stream/handlers/master.py`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use fluxbus_runtime::{Handler, MasterHandler, RuntimeFacade};
use fluxbus_types::builtin::TrimMessage;
use fluxbus_types::DynMessage;

/// `DEFAULT_MAX_STREAM_LENGTH` from `original_source`'s `constants.py` —
/// distinct from the per-response `approximate_max_stream_length` default
/// (100) spec.md §4.4 uses for ordinary handler responses.
pub const DEFAULT_MAX_STREAM_LENGTH: u64 = 500;
pub const DEFAULT_EVENT_BUS_RECORD_DIRECTORY: &str = "event_records";
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d_%H%M";

pub struct TrimHandler;

#[async_trait]
impl Handler for TrimHandler {
    async fn call(
        &self,
        runtime: &RuntimeFacade,
        message: &dyn DynMessage,
        _kwargs: &serde_json::Map<String, serde_json::Value>,
    ) -> anyhow::Result<Option<Box<dyn DynMessage>>> {
        let trim: TrimMessage = serde_json::from_value(message.to_value())?;
        let count = trim.count.unwrap_or(DEFAULT_MAX_STREAM_LENGTH);

        if trim.save_output {
            archive_oldest(runtime, &trim, count).await?;
        }

        let trimmed = runtime.store.trim(&runtime.stream, count).await?;
        tracing::info!(stream = %runtime.stream, count, trimmed, "trimmed stream");
        Ok(None)
    }
}

impl MasterHandler for TrimHandler {
    fn event_name(&self) -> &'static str {
        "trim"
    }
}

/// Dump the oldest `current_length - count` entries to
/// `<output_path>/<filename>` as `{message_id: decoded_payload}` JSON,
/// before the stream is actually trimmed.
async fn archive_oldest(runtime: &RuntimeFacade, trim: &TrimMessage, count: u64) -> anyhow::Result<()> {
    let current_length = runtime.store.len(&runtime.stream).await?;
    let overflow = current_length.saturating_sub(count);
    if overflow == 0 {
        return Ok(());
    }

    let entries = runtime
        .store
        .range(&runtime.stream, "-", "+", overflow as usize)
        .await?;
    if entries.is_empty() {
        return Ok(());
    }

    let mut archive: BTreeMap<String, serde_json::Value> = BTreeMap::new();
    for entry in entries {
        let decoded = fluxbus_types::decode_fields(entry.fields.iter().cloned());
        archive.insert(entry.id, serde_json::Value::Object(decoded));
    }

    let output_dir = trim
        .output_path
        .clone()
        .unwrap_or_else(|| std::env::var("DEFAULT_EVENT_BUS_RECORD_DIRECTORY").unwrap_or_else(|_| DEFAULT_EVENT_BUS_RECORD_DIRECTORY.to_string()));
    let date_format = trim.date_format.as_deref().unwrap_or(DEFAULT_DATE_FORMAT);
    let filename = trim.filename.clone().unwrap_or_else(|| {
        format!("{}.{}.txt", runtime.stream, chrono::Utc::now().format(date_format))
    });

    let path = PathBuf::from(&output_dir).join(filename);
    std::fs::create_dir_all(&output_dir)?;
    std::fs::write(&path, serde_json::to_vec_pretty(&archive)?)?;
    tracing::info!(path = %path.display(), entries = archive.len(), "archived trimmed stream entries");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use fluxbus_store::{MockStore, StreamStore};
    use fluxbus_types::Envelope;
    use tempfile::tempdir;

    use super::*;

    fn runtime(store: Arc<dyn StreamStore>, stream: &str) -> RuntimeFacade {
        RuntimeFacade {
            application_name: "svc".to_string(),
            application_instance: "inst-1".to_string(),
            stream: stream.to_string(),
            store,
            shutdown: None,
        }
    }

    #[tokio::test]
    async fn trims_to_requested_count() {
        let store: Arc<dyn StreamStore> = Arc::new(MockStore::new());
        for i in 0..10 {
            store.add("MASTER", None, &[("event", "x"), ("n", &i.to_string())]).await.unwrap();
        }
        let rt = runtime(store.clone(), "MASTER");
        let message = TrimMessage {
            envelope: Envelope::new("trim"),
            count: Some(3),
            save_output: false,
            output_path: None,
            filename: None,
            date_format: None,
        };

        TrimHandler.call(&rt, &message, &serde_json::Map::new()).await.unwrap();

        assert_eq!(store.len("MASTER").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn archives_overflow_before_trimming() {
        let store: Arc<dyn StreamStore> = Arc::new(MockStore::new());
        for i in 0..5 {
            store.add("MASTER", None, &[("event", "x"), ("n", &i.to_string())]).await.unwrap();
        }
        let dir = tempdir().unwrap();
        let rt = runtime(store.clone(), "MASTER");
        let message = TrimMessage {
            envelope: Envelope::new("trim"),
            count: Some(2),
            save_output: true,
            output_path: Some(dir.path().to_string_lossy().to_string()),
            filename: Some("archive.json".to_string()),
            date_format: None,
        };

        TrimHandler.call(&rt, &message, &serde_json::Map::new()).await.unwrap();

        assert_eq!(store.len("MASTER").await.unwrap(), 2);
        let archived: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("archive.json")).unwrap()).unwrap();
        assert_eq!(archived.as_object().unwrap().len(), 3);
    }
}
