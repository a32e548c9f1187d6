//! Fetching the candidate catalog and per-candidate event streams, from
//! http(s) URLs or the local filesystem.

use std::path::Path;

use chatsync_engine::EventStream;
use chatsync_proto::catalog::{
    load_catalog_from_path, load_stream_from_path, parse_catalog_from_str, parse_stream_from_str,
};
use chatsync_proto::protocol::CandidateMetadata;
use tracing::info;

fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

async fn fetch_text(url: &str) -> anyhow::Result<String> {
    let response = reqwest::get(url).await?;
    if !response.status().is_success() {
        anyhow::bail!("HTTP {} for {}", response.status(), url);
    }
    Ok(response.text().await?)
}

pub async fn load_catalog(source: &str) -> anyhow::Result<Vec<CandidateMetadata>> {
    let candidates = if is_url(source) {
        parse_catalog_from_str(&fetch_text(source).await?)?
    } else {
        load_catalog_from_path(Path::new(source))?
    };
    info!("Loaded {} candidates from {}", candidates.len(), source);
    Ok(candidates)
}

/// Where the stream of `candidate_id` lives.  A `{id}` placeholder is
/// substituted; otherwise `<id>.json` is appended to the directory or URL.
pub fn stream_location(streams: &str, candidate_id: &str) -> anyhow::Result<String> {
    if candidate_id.is_empty()
        || candidate_id.contains(['/', '\\'])
        || candidate_id == "."
        || candidate_id == ".."
    {
        anyhow::bail!("refusing to load stream for candidate id {:?}", candidate_id);
    }
    if streams.contains("{id}") {
        return Ok(streams.replace("{id}", candidate_id));
    }
    let file = format!("{}.json", candidate_id);
    if is_url(streams) {
        Ok(format!("{}/{}", streams.trim_end_matches('/'), file))
    } else {
        Ok(Path::new(streams).join(file).display().to_string())
    }
}

pub async fn load_stream(streams: &str, candidate_id: &str) -> anyhow::Result<EventStream> {
    let location = stream_location(streams, candidate_id)?;
    let events = if is_url(&location) {
        parse_stream_from_str(&fetch_text(&location).await?)?
    } else {
        load_stream_from_path(Path::new(&location))?
    };
    let stream = EventStream::normalized(events);
    info!(
        "Loaded stream {} ({} events) from {}",
        candidate_id,
        stream.len(),
        location
    );
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_location() {
        assert_eq!(
            stream_location("https://chat.example/v/{id}/log.json", "v42").unwrap(),
            "https://chat.example/v/v42/log.json"
        );
        assert_eq!(
            stream_location("https://chat.example/streams/", "v42").unwrap(),
            "https://chat.example/streams/v42.json"
        );
        assert!(stream_location("/data/streams", "v42")
            .unwrap()
            .ends_with("v42.json"));
        assert!(stream_location("/data/streams", "../etc/passwd").is_err());
        assert!(stream_location("/data/streams", "").is_err());
    }

    #[tokio::test]
    async fn test_load_catalog_and_stream_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let catalog_path = dir.path().join("catalog.json");
        std::fs::write(
            &catalog_path,
            r#"[
                {"id": "v1", "title": "Cuphead Part 1", "duration": "1h2m3s"},
                {"id": "v2", "title": "Hollow Knight", "duration": "bogus"}
            ]"#,
        )
        .unwrap();
        let streams_dir = dir.path().join("streams");
        std::fs::create_dir_all(&streams_dir).unwrap();
        std::fs::write(
            streams_dir.join("v1.json"),
            r#"{"events": [
                {"id": "b", "offset_secs": 5.0, "payload": {"text": "later"}},
                {"id": "a", "offset_secs": 1.0, "payload": {"text": "first"}}
            ]}"#,
        )
        .unwrap();

        let catalog = load_catalog(&catalog_path.display().to_string())
            .await
            .unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog[0].duration_secs, 3723.0);
        assert_eq!(catalog[1].duration_secs, 0.0);

        let stream = load_stream(&streams_dir.display().to_string(), "v1")
            .await
            .unwrap();
        let ids: Vec<&str> = stream.events().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        assert!(load_stream(&streams_dir.display().to_string(), "v2")
            .await
            .is_err());
    }
}
