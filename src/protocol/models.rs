use serde::{Deserialize, Serialize};

use crate::common::types::ChannelId;

/// Request body for an "update player" call on the node.
///
/// Every field is optional; absent fields leave the node-side value alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<PlayerUpdateTrack>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<EndTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Filters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceState>,
    /// Sent as the `noReplace` query parameter, not in the body.
    #[serde(skip)]
    pub no_replace: bool,
}

/// Track field in a player update request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdateTrack {
    /// Base64-encoded track. `Clear` stops the player.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoded: Option<TrackEncoded>,
    /// Identifier for the node to resolve. Mutually exclusive with `encoded`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<serde_json::Value>,
}

impl PlayerUpdateTrack {
    /// The "stop" payload: an explicit null track.
    pub fn stop() -> Self {
        Self {
            encoded: Some(TrackEncoded::Clear),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TrackEncoded {
    Clear,       // JSON: null
    Set(String), // JSON: string
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum EndTime {
    #[default]
    Clear, // JSON: null
    Set(u64), // JSON: number
}

/// Voice connection state as the node expects it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceState {
    pub token: String,
    pub endpoint: String,
    pub session_id: String,
    #[serde(default)]
    pub channel_id: Option<String>,
}

/// Server half of the voice credentials, from the chat gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceServerUpdate {
    pub token: String,
    pub endpoint: Option<String>,
}

/// State half of the voice credentials, from the chat gateway.
/// `channel_id == None` means the bot left (or was removed from) the channel.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceStateUpdate {
    pub channel_id: Option<ChannelId>,
    pub session_id: String,
}

macro_rules! define_filters {
    ($($field:ident : $variant:ident($type:ty) => $name:expr),* $(,)?) => {
        /// All audio filters the node understands.
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        #[serde(rename_all = "camelCase")]
        pub struct Filters {
            $(
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub $field: Option<$type>,
            )*
        }

        /// Key of one filter block.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "camelCase")]
        pub enum FilterKind {
            $($variant),*
        }

        /// One filter block together with its parameters.
        #[derive(Debug, Clone, PartialEq)]
        pub enum FilterValue {
            $($variant($type)),*
        }

        impl FilterKind {
            pub const ALL: &'static [FilterKind] = &[$(FilterKind::$variant),*];

            /// Name of the filter in camelCase, as used on the wire.
            pub fn name(self) -> &'static str {
                match self {
                    $(FilterKind::$variant => $name),*
                }
            }
        }

        impl FilterValue {
            pub fn kind(&self) -> FilterKind {
                match self {
                    $(FilterValue::$variant(_) => FilterKind::$variant),*
                }
            }
        }

        impl Filters {
            pub fn get(&self, kind: FilterKind) -> Option<FilterValue> {
                match kind {
                    $(FilterKind::$variant => self.$field.clone().map(FilterValue::$variant)),*
                }
            }

            pub fn set(&mut self, value: FilterValue) {
                match value {
                    $(FilterValue::$variant(v) => self.$field = Some(v)),*
                }
            }

            /// Removes one block. Returns whether it was present.
            pub fn clear(&mut self, kind: FilterKind) -> bool {
                match kind {
                    $(FilterKind::$variant => self.$field.take().is_some()),*
                }
            }

            /// Merge incoming partial filter update with existing state.
            pub fn merge_from(&mut self, incoming: Filters) {
                $(
                    if incoming.$field.is_some() {
                        self.$field = incoming.$field;
                    }
                )*
            }

            /// Returns true if every filter field is `None`.
            pub fn is_all_none(&self) -> bool {
                $(
                    self.$field.is_none() &&
                )* true
            }

            /// Present blocks, in declaration order.
            pub fn values(&self) -> Vec<FilterValue> {
                let mut out = Vec::new();
                $(
                    if let Some(v) = &self.$field {
                        out.push(FilterValue::$variant(v.clone()));
                    }
                )*
                out
            }
        }
    };
}

define_filters! {
    volume: Volume(f32) => "volume",
    equalizer: Equalizer(Vec<EqBand>) => "equalizer",
    karaoke: Karaoke(KaraokeFilter) => "karaoke",
    timescale: Timescale(TimescaleFilter) => "timescale",
    tremolo: Tremolo(TremoloFilter) => "tremolo",
    vibrato: Vibrato(VibratoFilter) => "vibrato",
    distortion: Distortion(DistortionFilter) => "distortion",
    rotation: Rotation(RotationFilter) => "rotation",
    channel_mix: ChannelMix(ChannelMixFilter) => "channelMix",
    low_pass: LowPass(LowPassFilter) => "lowPass",
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EqBand {
    pub band: u8,
    pub gain: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KaraokeFilter {
    pub level: Option<f32>,
    pub mono_level: Option<f32>,
    pub filter_band: Option<f32>,
    pub filter_width: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimescaleFilter {
    pub speed: Option<f64>,
    pub pitch: Option<f64>,
    pub rate: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TremoloFilter {
    pub frequency: Option<f32>,
    pub depth: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VibratoFilter {
    pub frequency: Option<f32>,
    pub depth: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistortionFilter {
    pub sin_offset: Option<f32>,
    pub sin_scale: Option<f32>,
    pub cos_offset: Option<f32>,
    pub cos_scale: Option<f32>,
    pub tan_offset: Option<f32>,
    pub tan_scale: Option<f32>,
    pub offset: Option<f32>,
    pub scale: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationFilter {
    pub rotation_hz: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMixFilter {
    pub left_to_left: Option<f32>,
    pub left_to_right: Option<f32>,
    pub right_to_left: Option<f32>,
    pub right_to_right: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LowPassFilter {
    pub smoothing: Option<f32>,
}
