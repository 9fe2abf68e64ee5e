//! Shared fixtures for integration tests: a scripted [`Extractor`] that never
//! touches the network or spawns yt-dlp.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use ytgrab_core::{
    DownloadResult, Extractor, ExtractorError, FetchRequest, ProgressEvent, ProgressSender,
    StreamDescriptor, VideoMetadata,
};

/// Scripted collaborator.
///
/// On a successful transfer it replays `events` and, when `writes_extension`
/// is set, writes a small file at the output template with `%(ext)s`
/// replaced by that extension.
pub struct FakeExtractor {
    pub metadata: VideoMetadata,
    pub resolve_error: Option<String>,
    pub transfer_error: Option<String>,
    pub events: Vec<ProgressEvent>,
    pub writes_extension: Option<String>,
    pub payload: Vec<u8>,
    /// Pause between the progress events and writing the file.
    pub delay: Option<Duration>,
    requests: Mutex<Vec<FetchRequest>>,
}

impl FakeExtractor {
    pub fn new(metadata: VideoMetadata) -> Self {
        Self {
            metadata,
            resolve_error: None,
            transfer_error: None,
            events: vec![
                ProgressEvent::downloading(0, Some(2048)),
                ProgressEvent::downloading(1024, Some(2048)),
                ProgressEvent::downloading(2048, Some(2048)),
                ProgressEvent::finished(),
            ],
            writes_extension: Some("mp4".to_string()),
            payload: b"fake video payload".to_vec(),
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_resolve(mut self, message: &str) -> Self {
        self.resolve_error = Some(message.to_string());
        self
    }

    pub fn failing_transfer(mut self, message: &str) -> Self {
        self.transfer_error = Some(message.to_string());
        self
    }

    pub fn writing(mut self, extension: &str) -> Self {
        self.writes_extension = Some(extension.to_string());
        self
    }

    pub fn writing_nothing(mut self) -> Self {
        self.writes_extension = None;
        self
    }

    pub fn with_events(mut self, events: Vec<ProgressEvent>) -> Self {
        self.events = events;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Extractor for FakeExtractor {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn resolve_formats(&self, url: &str) -> Result<VideoMetadata, ExtractorError> {
        match &self.resolve_error {
            Some(message) => Err(ExtractorError::resolution(url, message.clone())),
            None => Ok(self.metadata.clone()),
        }
    }

    async fn fetch_and_download(
        &self,
        url: &str,
        request: &FetchRequest,
        progress: ProgressSender,
    ) -> Result<DownloadResult, ExtractorError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(message) = &self.transfer_error {
            return Err(ExtractorError::transfer(url, message.clone()));
        }
        for event in &self.events {
            let _ = progress.send(event.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let Some(extension) = &self.writes_extension else {
            return Ok(DownloadResult::default());
        };
        let path = PathBuf::from(render_template(
            &request.output_template.to_string_lossy(),
            extension,
        ));
        tokio::fs::write(&path, &self.payload)
            .await
            .map_err(|err| ExtractorError::transfer(url, err.to_string()))?;
        Ok(DownloadResult {
            reported_path: Some(path),
        })
    }
}

/// Expands `%(ext)s` and unescapes `%%` the way yt-dlp renders `-o`.
fn render_template(template: &str, extension: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        if let Some(tail) = rest.strip_prefix("%%") {
            out.push('%');
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix("%(ext)s") {
            out.push_str(extension);
            rest = tail;
        } else {
            out.push('%');
            rest = &rest[1..];
        }
    }
    out.push_str(rest);
    out
}

pub fn stream(id: &str, container: &str, has_video: bool, has_audio: bool) -> StreamDescriptor {
    StreamDescriptor {
        id: id.to_string(),
        container: container.to_string(),
        resolution: if has_video { "1280x720" } else { "audio only" }.to_string(),
        frame_rate: has_video.then_some(30.0),
        approximate_size_bytes: Some(3 * 1024 * 1024),
        has_video,
        has_audio,
    }
}

/// Two video-capable streams, one audio-only stream, one storyboard.
pub fn sample_metadata(title: &str) -> VideoMetadata {
    VideoMetadata {
        title: title.to_string(),
        duration_secs: Some(212.0),
        view_count: Some(1_234_567),
        streams: vec![
            stream("sb0", "mhtml", false, false),
            stream("137", "mp4", true, false),
            stream("140", "m4a", false, true),
            stream("18", "mp4", true, true),
        ],
    }
}
