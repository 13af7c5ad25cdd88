//! Capability tags that segments require and engines provide.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::ModelError;

/// Ordered set of capabilities.
///
/// A `BTreeSet` keeps iteration order stable, which makes matching and
/// logging deterministic.
pub type CapabilitySet = BTreeSet<Capability>;

/// A named functional requirement a timeline segment imposes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    /// Container/codec conversion of an existing asset
    Transcode,
    /// Generative video from a prompt
    AiGenerate,
    /// Text overlays (titles, lower thirds, CTAs)
    OverlayText,
    /// Mixing voice-over, music and effects
    AudioMix,
    /// Animate a still image into a clip
    ImageToVideo,
    /// Synthesised narration
    TextToSpeech,
    /// Hard-burned captions
    CaptionBurn,
    /// Resize / reframe to a target aspect ratio
    Resize,
    /// Poster frame extraction
    Thumbnail,
}

impl Capability {
    /// Every known capability.
    pub const ALL: &'static [Capability] = &[
        Capability::Transcode,
        Capability::AiGenerate,
        Capability::OverlayText,
        Capability::AudioMix,
        Capability::ImageToVideo,
        Capability::TextToSpeech,
        Capability::CaptionBurn,
        Capability::Resize,
        Capability::Thumbnail,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Transcode => "transcode",
            Capability::AiGenerate => "ai-generate",
            Capability::OverlayText => "overlay-text",
            Capability::AudioMix => "audio-mix",
            Capability::ImageToVideo => "image-to-video",
            Capability::TextToSpeech => "text-to-speech",
            Capability::CaptionBurn => "caption-burn",
            Capability::Resize => "resize",
            Capability::Thumbnail => "thumbnail",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Capability {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        Capability::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| ModelError::UnknownCapability(s.to_string()))
    }
}
