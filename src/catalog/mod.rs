//! Format catalog construction from collaborator stream descriptors.
//!
//! The collaborator reports every encoding it knows about for a URL. This
//! module drops the ones that carry neither audio nor video, groups the rest
//! into video-capable and audio-only entries (keeping the collaborator's
//! relative order inside each group), and appends the two virtual "best"
//! entries that are always offered last.
//!
//! Display indices are stable for the lifetime of a catalog:
//!
//! ```text
//! [0, video_count)                      video-capable streams
//! [video_count, video_count+audio_count) audio-only streams
//! video_count+audio_count               best combined (mp4 preferred)
//! video_count+audio_count+1             best audio (mp3 preferred)
//! ```

pub mod selection;

use serde::{Deserialize, Serialize};

/// Collaborator expression for "best combined video+audio, mp4 container preferred".
pub const BEST_COMBINED_EXPRESSION: &str = "best[ext=mp4]";

/// Collaborator expression for "best available audio, mp3 preferred".
pub const BEST_AUDIO_EXPRESSION: &str = "bestaudio[ext=mp3]/bestaudio";

/// Resolution label used for streams without a video track.
pub const AUDIO_ONLY_RESOLUTION: &str = "audio only";

/// A single encoding offered by the source platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Collaborator-specific stream identifier (e.g. `"137"`).
    pub id: String,
    /// Container extension (e.g. `"mp4"`, `"webm"`, `"m4a"`).
    pub container: String,
    /// Resolution label, or [`AUDIO_ONLY_RESOLUTION`].
    pub resolution: String,
    /// Frames per second when known.
    pub frame_rate: Option<f64>,
    /// Approximate size in bytes when known.
    pub approximate_size_bytes: Option<u64>,
    /// Whether a decodable video track is present.
    pub has_video: bool,
    /// Whether a decodable audio track is present.
    pub has_audio: bool,
}

/// Partition a descriptor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Video track present, audio optional.
    Video,
    /// Audio track present, no video.
    AudioOnly,
}

impl StreamDescriptor {
    /// Classifies the descriptor; `None` when it carries neither track.
    #[must_use]
    pub fn kind(&self) -> Option<StreamKind> {
        if self.has_video {
            Some(StreamKind::Video)
        } else if self.has_audio {
            Some(StreamKind::AudioOnly)
        } else {
            None
        }
    }

    fn content_label(&self) -> &'static str {
        match (self.has_video, self.has_audio) {
            (true, true) => "Video+Audio",
            (true, false) => "Video",
            _ => "Audio only",
        }
    }
}

/// Raw result of querying the collaborator for one URL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    /// Display title of the video.
    pub title: String,
    /// Duration in seconds when known.
    pub duration_secs: Option<f64>,
    /// View count when known.
    pub view_count: Option<u64>,
    /// Every stream descriptor reported, in collaborator order.
    pub streams: Vec<StreamDescriptor>,
}

/// The two synthesized entries appended to every catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VirtualEntry {
    /// Best combined video+audio, mp4 container preferred.
    BestCombined,
    /// Best available audio, converted to mp3.
    BestAudio,
}

/// One addressable catalog position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CatalogEntry<'a> {
    /// A concrete stream reported by the collaborator.
    Stream(&'a StreamDescriptor),
    /// One of the synthesized fallback entries.
    Virtual(VirtualEntry),
}

/// Ordered, indexable list of streams for a single URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatCatalog {
    title: String,
    duration_secs: Option<f64>,
    view_count: Option<u64>,
    /// Video-capable entries followed by audio-only entries.
    entries: Vec<StreamDescriptor>,
    video_count: usize,
}

/// Builds a catalog from collaborator metadata.
///
/// Descriptors with no audio and no video are discarded. Video-capable
/// entries precede audio-only entries; relative order is preserved within
/// each group.
#[must_use]
pub fn build_catalog(metadata: VideoMetadata) -> FormatCatalog {
    let VideoMetadata {
        title,
        duration_secs,
        view_count,
        streams,
    } = metadata;

    let (video, audio): (Vec<_>, Vec<_>) = streams
        .into_iter()
        .filter(|stream| stream.kind().is_some())
        .partition(|stream| stream.kind() == Some(StreamKind::Video));

    let video_count = video.len();
    let mut entries = video;
    entries.extend(audio);

    FormatCatalog {
        title,
        duration_secs,
        view_count,
        entries,
        video_count,
    }
}

impl FormatCatalog {
    /// Video title as reported by the collaborator.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Duration in seconds when known.
    #[must_use]
    pub fn duration_secs(&self) -> Option<f64> {
        self.duration_secs
    }

    /// View count when known.
    #[must_use]
    pub fn view_count(&self) -> Option<u64> {
        self.view_count
    }

    /// Concrete entries (virtual entries excluded), video-capable first.
    #[must_use]
    pub fn entries(&self) -> &[StreamDescriptor] {
        &self.entries
    }

    /// Video-capable entries.
    #[must_use]
    pub fn video_entries(&self) -> &[StreamDescriptor] {
        &self.entries[..self.video_count]
    }

    /// Audio-only entries.
    #[must_use]
    pub fn audio_entries(&self) -> &[StreamDescriptor] {
        &self.entries[self.video_count..]
    }

    #[must_use]
    pub fn video_count(&self) -> usize {
        self.video_count
    }

    #[must_use]
    pub fn audio_count(&self) -> usize {
        self.entries.len() - self.video_count
    }

    /// Total number of addressable positions, virtual entries included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len() + 2
    }

    /// A catalog always holds its two virtual entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Display index of the "best combined" entry (the default selection).
    #[must_use]
    pub fn best_combined_index(&self) -> usize {
        self.entries.len()
    }

    /// Display index of the "best audio" entry.
    #[must_use]
    pub fn best_audio_index(&self) -> usize {
        self.entries.len() + 1
    }

    /// Entry at a display index, `None` when out of range.
    #[must_use]
    pub fn entry(&self, index: usize) -> Option<CatalogEntry<'_>> {
        if let Some(stream) = self.entries.get(index) {
            return Some(CatalogEntry::Stream(stream));
        }
        match index.checked_sub(self.entries.len()) {
            Some(0) => Some(CatalogEntry::Virtual(VirtualEntry::BestCombined)),
            Some(1) => Some(CatalogEntry::Virtual(VirtualEntry::BestAudio)),
            _ => None,
        }
    }

    /// All entries in display order, virtual entries last.
    pub fn iter(&self) -> impl Iterator<Item = CatalogEntry<'_>> {
        self.entries
            .iter()
            .map(CatalogEntry::Stream)
            .chain([
                CatalogEntry::Virtual(VirtualEntry::BestCombined),
                CatalogEntry::Virtual(VirtualEntry::BestAudio),
            ])
    }

    /// Finds a concrete stream by collaborator id.
    #[must_use]
    pub fn find_stream(&self, id: &str) -> Option<&StreamDescriptor> {
        self.entries.iter().find(|stream| stream.id == id)
    }

    /// Table rows for display, one per display index.
    #[must_use]
    pub fn rows(&self) -> Vec<FormatRow> {
        self.iter()
            .enumerate()
            .map(|(index, entry)| FormatRow::new(index, entry))
            .collect()
    }
}

/// One line of the formats table shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatRow {
    pub index: usize,
    pub format_id: String,
    pub resolution: String,
    pub fps: String,
    pub size: String,
    pub container: String,
    pub content: String,
}

impl FormatRow {
    fn new(index: usize, entry: CatalogEntry<'_>) -> Self {
        match entry {
            CatalogEntry::Stream(stream) if stream.has_video => Self {
                index,
                format_id: stream.id.clone(),
                resolution: stream.resolution.clone(),
                fps: format_frame_rate(stream.frame_rate),
                size: format_size(stream.approximate_size_bytes),
                container: stream.container.clone(),
                content: stream.content_label().to_string(),
            },
            CatalogEntry::Stream(stream) => Self {
                index,
                format_id: stream.id.clone(),
                resolution: AUDIO_ONLY_RESOLUTION.to_string(),
                fps: "-".to_string(),
                size: format_size(stream.approximate_size_bytes),
                container: stream.container.clone(),
                content: stream.content_label().to_string(),
            },
            CatalogEntry::Virtual(VirtualEntry::BestCombined) => Self {
                index,
                format_id: "best".to_string(),
                resolution: "best".to_string(),
                fps: "auto".to_string(),
                size: "auto".to_string(),
                container: "mp4".to_string(),
                content: "Best quality".to_string(),
            },
            CatalogEntry::Virtual(VirtualEntry::BestAudio) => Self {
                index,
                format_id: "bestaudio".to_string(),
                resolution: "audio".to_string(),
                fps: "auto".to_string(),
                size: "auto".to_string(),
                container: "mp3".to_string(),
                content: "Best audio".to_string(),
            },
        }
    }

    /// Short label for selection controls: `ID 3: best - Best quality (mp4)`.
    #[must_use]
    pub fn label(&self) -> String {
        format!(
            "ID {}: {} - {} ({})",
            self.index, self.resolution, self.content, self.container
        )
    }
}

/// Formats an approximate size as `12.3MB`, or `Unknown`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_size(bytes: Option<u64>) -> String {
    match bytes {
        Some(bytes) if bytes > 0 => format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0)),
        _ => "Unknown".to_string(),
    }
}

/// Formats a duration as `MM:SS` (minutes are not wrapped at the hour).
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn format_duration(secs: Option<f64>) -> String {
    match secs {
        Some(secs) if secs.is_finite() && secs > 0.0 => {
            let total = secs.round() as u64;
            format!("{:02}:{:02}", total / 60, total % 60)
        }
        _ => "Unknown".to_string(),
    }
}

fn format_frame_rate(fps: Option<f64>) -> String {
    match fps {
        Some(fps) if fps.is_finite() && fps > 0.0 => {
            if fps.fract() == 0.0 {
                format!("{fps:.0}")
            } else {
                format!("{fps:.2}")
            }
        }
        _ => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(id: &str, has_video: bool, has_audio: bool) -> StreamDescriptor {
        StreamDescriptor {
            id: id.to_string(),
            container: if has_video { "mp4" } else { "m4a" }.to_string(),
            resolution: if has_video { "1920x1080" } else { AUDIO_ONLY_RESOLUTION }.to_string(),
            frame_rate: has_video.then_some(30.0),
            approximate_size_bytes: Some(5 * 1024 * 1024),
            has_video,
            has_audio,
        }
    }

    fn metadata(streams: Vec<StreamDescriptor>) -> VideoMetadata {
        VideoMetadata {
            title: "Sample".to_string(),
            duration_secs: Some(125.0),
            view_count: Some(42),
            streams,
        }
    }

    #[test]
    fn test_build_catalog_partitions_video_before_audio() {
        let catalog = build_catalog(metadata(vec![
            stream("140", false, true),
            stream("137", true, false),
            stream("251", false, true),
            stream("18", true, true),
        ]));

        let ids: Vec<&str> = catalog.entries().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["137", "18", "140", "251"]);
        assert_eq!(catalog.video_count(), 2);
        assert_eq!(catalog.audio_count(), 2);
    }

    #[test]
    fn test_build_catalog_drops_streams_without_tracks() {
        let catalog = build_catalog(metadata(vec![
            stream("sb0", false, false),
            stream("18", true, true),
        ]));

        assert_eq!(catalog.entries().len(), 1);
        assert!(catalog.find_stream("sb0").is_none());
    }

    #[test]
    fn test_virtual_entries_are_last_in_fixed_order() {
        let catalog = build_catalog(metadata(vec![stream("18", true, true)]));
        let all: Vec<CatalogEntry<'_>> = catalog.iter().collect();

        assert_eq!(all.len(), catalog.len());
        assert_eq!(
            all[all.len() - 2],
            CatalogEntry::Virtual(VirtualEntry::BestCombined)
        );
        assert_eq!(
            all[all.len() - 1],
            CatalogEntry::Virtual(VirtualEntry::BestAudio)
        );
    }

    #[test]
    fn test_empty_catalog_still_offers_virtual_entries() {
        let catalog = build_catalog(metadata(Vec::new()));
        assert_eq!(catalog.len(), 2);
        assert_eq!(
            catalog.entry(0),
            Some(CatalogEntry::Virtual(VirtualEntry::BestCombined))
        );
        assert_eq!(
            catalog.entry(1),
            Some(CatalogEntry::Virtual(VirtualEntry::BestAudio))
        );
        assert_eq!(catalog.entry(2), None);
    }

    #[test]
    fn test_rows_render_original_table_columns() {
        let catalog = build_catalog(metadata(vec![
            stream("18", true, true),
            stream("140", false, true),
        ]));
        let rows = catalog.rows();

        assert_eq!(rows[0].content, "Video+Audio");
        assert_eq!(rows[0].fps, "30");
        assert_eq!(rows[0].size, "5.0MB");
        assert_eq!(rows[1].resolution, "audio only");
        assert_eq!(rows[1].fps, "-");
        assert_eq!(rows[2].format_id, "best");
        assert_eq!(rows[3].format_id, "bestaudio");
        assert_eq!(rows[3].label(), "ID 3: audio - Best audio (mp3)");
    }

    #[test]
    fn test_format_duration_minutes_and_seconds() {
        assert_eq!(format_duration(Some(125.0)), "02:05");
        assert_eq!(format_duration(Some(3725.0)), "62:05");
        assert_eq!(format_duration(None), "Unknown");
    }

    #[test]
    fn test_format_size_unknown_when_missing() {
        assert_eq!(format_size(None), "Unknown");
        assert_eq!(format_size(Some(0)), "Unknown");
        assert_eq!(format_size(Some(1_572_864)), "1.5MB");
    }
}
