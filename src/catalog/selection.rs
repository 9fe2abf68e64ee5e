//! Mapping from a user-chosen display index to a collaborator format selector.
//!
//! The mapping is total: anything that does not land on a concrete entry or
//! on "best audio" falls back to "best combined". A blank or unparsable
//! answer is a request for the default, not an error.

use serde::{Deserialize, Serialize};

use super::{BEST_AUDIO_EXPRESSION, BEST_COMBINED_EXPRESSION, CatalogEntry, FormatCatalog, VirtualEntry};

/// What the collaborator should fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FormatSelector {
    /// A concrete stream from the catalog.
    Stream {
        /// Collaborator stream id.
        id: String,
        /// Container the stream is delivered in.
        container: String,
    },
    /// Best combined video+audio, mp4 container preferred.
    BestCombined,
    /// Best audio, converted to mp3.
    BestAudio,
    /// A user-supplied collaborator expression passed through verbatim.
    Expression {
        /// The raw expression.
        expression: String,
    },
}

impl FormatSelector {
    /// Interprets a raw expression (e.g. from `--format`).
    ///
    /// The two fallback expressions map back to their virtual entries so the
    /// output extension and audio extraction follow the same rules as a
    /// catalog selection.
    #[must_use]
    pub fn from_expression(expression: &str) -> Self {
        let expression = expression.trim();
        if expression.is_empty() || expression == BEST_COMBINED_EXPRESSION {
            Self::BestCombined
        } else if expression == BEST_AUDIO_EXPRESSION {
            Self::BestAudio
        } else {
            Self::Expression {
                expression: expression.to_string(),
            }
        }
    }

    /// Expression handed to the collaborator.
    #[must_use]
    pub fn expression(&self) -> &str {
        match self {
            Self::Stream { id, .. } => id,
            Self::BestCombined => BEST_COMBINED_EXPRESSION,
            Self::BestAudio => BEST_AUDIO_EXPRESSION,
            Self::Expression { expression } => expression,
        }
    }

    /// Whether the transfer should be post-processed into an mp3.
    #[must_use]
    pub fn extracts_audio(&self) -> bool {
        match self {
            Self::BestAudio => true,
            Self::Expression { expression } => {
                expression.contains("bestaudio") && expression.contains("mp3")
            }
            Self::Stream { .. } | Self::BestCombined => false,
        }
    }

    /// Extension of the file the collaborator is expected to produce.
    #[must_use]
    pub fn output_extension(&self) -> &str {
        if self.extracts_audio() {
            return "mp3";
        }
        match self {
            Self::Stream { container, .. } if !container.is_empty() => container,
            _ => "mp4",
        }
    }
}

/// Resolves a display index against the catalog it was computed for.
///
/// `None` (blank input) and any out-of-range index resolve to
/// [`FormatSelector::BestCombined`].
#[must_use]
pub fn resolve_selection(catalog: &FormatCatalog, index: Option<usize>) -> FormatSelector {
    match index.and_then(|index| catalog.entry(index)) {
        Some(CatalogEntry::Stream(stream)) => FormatSelector::Stream {
            id: stream.id.clone(),
            container: stream.container.clone(),
        },
        Some(CatalogEntry::Virtual(VirtualEntry::BestAudio)) => FormatSelector::BestAudio,
        Some(CatalogEntry::Virtual(VirtualEntry::BestCombined)) | None => {
            FormatSelector::BestCombined
        }
    }
}

/// Parses a line-mode answer into a display index.
///
/// Blank and non-numeric answers yield `None`, which [`resolve_selection`]
/// treats as the default.
#[must_use]
pub fn parse_selection_input(input: &str) -> Option<usize> {
    input.trim().parse().ok()
}
