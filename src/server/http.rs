use super::{MediaProgressPayload, MediaServer};
use crate::config::Config;
use crate::error::PlayerError;
use crate::models::{Chapter, PlaybackDescriptor, ProgressEntry, SyncRequest, Track};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

const CLIENT_NAME: &str = "shelfplay";

const SUPPORTED_MIME_TYPES: &[&str] = &[
    "audio/flac",
    "audio/mpeg",
    "audio/mp4",
    "audio/aac",
    "audio/ogg",
    "audio/wav",
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaySessionResponse {
    id: String,
    library_item_id: String,
    #[serde(default)]
    episode_id: Option<String>,
    #[serde(default)]
    display_title: Option<String>,
    #[serde(default)]
    current_time: f64,
    #[serde(default)]
    duration: f64,
    #[serde(default)]
    chapters: Vec<ChapterResponse>,
    #[serde(default)]
    audio_tracks: Vec<AudioTrackResponse>,
}

#[derive(Debug, Deserialize)]
struct ChapterResponse {
    id: i64,
    start: f64,
    end: f64,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AudioTrackResponse {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    start_offset: f64,
    #[serde(default)]
    duration: f64,
    #[serde(default)]
    title: String,
    content_url: String,
    #[serde(default)]
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MeResponse {
    #[serde(default)]
    media_progress: Vec<MediaProgressPayload>,
}

impl PlaySessionResponse {
    fn into_descriptor(self) -> PlaybackDescriptor {
        PlaybackDescriptor {
            session_id: self.id,
            item_id: self.library_item_id,
            episode_id: self.episode_id.filter(|e| !e.is_empty()),
            display_title: self.display_title,
            initial_time: self.current_time.max(0.0),
            duration: self.duration,
            chapters: self
                .chapters
                .into_iter()
                .filter(|c| c.start < c.end)
                .map(|c| Chapter {
                    id: c.id,
                    start: c.start,
                    end: c.end,
                    title: c.title,
                })
                .collect(),
            tracks: self
                .audio_tracks
                .into_iter()
                .map(|t| Track {
                    index: t.index,
                    title: t.title,
                    duration: t.duration,
                    start_offset: t.start_offset,
                    content_locator: t.content_url,
                    mime_type: t.mime_type,
                })
                .collect(),
        }
        .normalized(None)
    }
}

/// Media server client over its REST API
#[derive(Clone)]
pub struct HttpMediaServer {
    client: Client,
    base_url: String,
    api_token: Option<String>,
    device_id: String,
}

impl HttpMediaServer {
    pub fn new(config: &Config) -> Result<Self, PlayerError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(format!("{}/{}", CLIENT_NAME, env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: config.server_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            device_id: config.device_id.clone(),
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn expect_success(response: Response, context: &str) -> Result<Response, PlayerError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(PlayerError::from_status(status, context))
        }
    }

    async fn read_json<T: DeserializeOwned>(
        response: Response,
        context: &str,
    ) -> Result<T, PlayerError> {
        let response = Self::expect_success(response, context)?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait::async_trait]
impl MediaServer for HttpMediaServer {
    async fn start_session(
        &self,
        item_id: &str,
        episode_id: Option<&str>,
    ) -> Result<PlaybackDescriptor, PlayerError> {
        let mut url = format!(
            "{}/api/items/{}/play",
            self.base_url,
            urlencoding::encode(item_id)
        );
        if let Some(episode_id) = episode_id {
            url.push('/');
            url.push_str(&urlencoding::encode(episode_id));
        }

        let body = json!({
            "deviceInfo": {
                "clientName": CLIENT_NAME,
                "clientVersion": env!("CARGO_PKG_VERSION"),
                "deviceId": self.device_id,
            },
            "forceDirectPlay": false,
            "forceTranscode": false,
            "supportedMimeTypes": SUPPORTED_MIME_TYPES,
            "mediaPlayer": CLIENT_NAME,
        });

        info!("Starting play session for item {} ({:?})", item_id, episode_id);
        let response = self
            .authorized(self.client.post(&url))
            .json(&body)
            .send()
            .await?;

        let session: PlaySessionResponse = Self::read_json(response, "start session").await?;
        let descriptor = session.into_descriptor();
        if descriptor.tracks.is_empty() {
            return Err(PlayerError::new(
                crate::error::ErrorKind::ContentNotFound,
                format!("Item {} has no playable tracks", item_id),
            ));
        }

        debug!(
            "Session {} opened with {} tracks, {} chapters",
            descriptor.session_id,
            descriptor.tracks.len(),
            descriptor.chapters.len()
        );
        Ok(descriptor)
    }

    async fn sync_progress(
        &self,
        session_id: &str,
        request: &SyncRequest,
    ) -> Result<(), PlayerError> {
        let url = format!(
            "{}/api/session/{}/sync",
            self.base_url,
            urlencoding::encode(session_id)
        );
        let response = self
            .authorized(self.client.post(&url))
            .json(request)
            .send()
            .await?;
        Self::expect_success(response, "sync progress")?;
        Ok(())
    }

    async fn close_session(&self, session_id: &str) -> Result<(), PlayerError> {
        let url = format!(
            "{}/api/session/{}/close",
            self.base_url,
            urlencoding::encode(session_id)
        );
        let response = self.authorized(self.client.post(&url)).send().await?;
        Self::expect_success(response, "close session")?;
        Ok(())
    }

    async fn fetch_all_progress(&self) -> Result<Vec<ProgressEntry>, PlayerError> {
        let url = format!("{}/api/me", self.base_url);
        let response = self.authorized(self.client.get(&url)).send().await?;
        let me: MeResponse = Self::read_json(response, "fetch progress").await?;
        Ok(me
            .media_progress
            .into_iter()
            .map(MediaProgressPayload::into_entry)
            .collect())
    }

    fn resolve_locator(&self, locator: &str) -> String {
        let mut url = if locator.starts_with("http://") || locator.starts_with("https://") {
            locator.to_string()
        } else if locator.starts_with('/') {
            format!("{}{}", self.base_url, locator)
        } else {
            format!("{}/{}", self.base_url, locator)
        };

        if let Some(token) = &self.api_token {
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str("token=");
            url.push_str(&urlencoding::encode(token));
        }
        url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::retry::RetryPolicy;
    use std::path::PathBuf;
    use std::time::Duration;

    fn server(token: Option<&str>) -> HttpMediaServer {
        let config = Config {
            server_url: "https://abs.example.com".to_string(),
            api_token: token.map(str::to_string),
            device_id: "desk".to_string(),
            request_timeout: Duration::from_secs(5),
            sync: SyncConfig::default(),
            retry: RetryPolicy::default(),
            data_dir: PathBuf::from("/tmp"),
        };
        HttpMediaServer::new(&config).unwrap()
    }

    #[test]
    fn test_resolve_relative_locator_with_token() {
        let url = server(Some("a b")).resolve_locator("/api/items/li_1/file/42");
        assert_eq!(
            url,
            "https://abs.example.com/api/items/li_1/file/42?token=a%20b"
        );
    }

    #[test]
    fn test_resolve_absolute_locator_keeps_query() {
        let url = server(Some("t")).resolve_locator("https://cdn.example.com/a.mp3?x=1");
        assert_eq!(url, "https://cdn.example.com/a.mp3?x=1&token=t");
        assert_eq!(
            server(None).resolve_locator("hls/s1/output.m3u8"),
            "https://abs.example.com/hls/s1/output.m3u8"
        );
    }

    #[test]
    fn test_play_session_response_into_descriptor() {
        let body = r#"{
            "id": "play_1",
            "libraryItemId": "li_1",
            "episodeId": null,
            "displayTitle": "The Book",
            "currentTime": 310.5,
            "duration": 580,
            "chapters": [
                {"id": 0, "start": 0, "end": 300, "title": "One"},
                {"id": 1, "start": 300, "end": 580, "title": "Two"},
                {"id": 2, "start": 580, "end": 580, "title": "Empty"}
            ],
            "audioTracks": [
                {"index": 2, "startOffset": 300, "duration": 280, "title": "b.mp3",
                 "contentUrl": "/api/items/li_1/file/2", "mimeType": "audio/mpeg"},
                {"index": 1, "startOffset": 0, "duration": 300, "title": "a.mp3",
                 "contentUrl": "/api/items/li_1/file/1", "mimeType": "audio/mpeg"}
            ]
        }"#;
        let session: PlaySessionResponse = serde_json::from_str(body).unwrap();
        let descriptor = session.into_descriptor();

        assert_eq!(descriptor.session_id, "play_1");
        assert_eq!(descriptor.initial_time, 310.5);
        assert_eq!(descriptor.chapters.len(), 2);
        assert_eq!(descriptor.tracks[0].title, "a.mp3");
        assert_eq!(descriptor.tracks[0].index, 0);
        assert_eq!(descriptor.tracks[1].start_offset, 300.0);
    }

    #[test]
    fn test_me_response_into_entries() {
        let body = r#"{"mediaProgress": [
            {"id": "p1", "libraryItemId": "li_1", "episodeId": "ep_9", "progress": 0.25,
             "isFinished": false, "currentTime": 100, "duration": 400, "lastUpdate": 1700000000000}
        ]}"#;
        let me: MeResponse = serde_json::from_str(body).unwrap();
        let entry = me.media_progress.into_iter().next().unwrap().into_entry();
        assert_eq!(entry.key(), "ep_9");
        assert_eq!(entry.updated_at, 1_700_000_000_000);
        assert_eq!(entry.progress, 0.25);
    }
}
