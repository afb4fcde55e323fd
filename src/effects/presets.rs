use crate::protocol::{
    ChannelMixFilter, DistortionFilter, EqBand, FilterValue, KaraokeFilter, LowPassFilter,
    RotationFilter, TimescaleFilter, TremoloFilter, VibratoFilter,
};

use super::Effect;

fn equalizer(gains: &[(u8, f32)]) -> FilterValue {
    FilterValue::Equalizer(
        gains
            .iter()
            .map(|&(band, gain)| EqBand { band, gain })
            .collect(),
    )
}

fn timescale(speed: f64, pitch: f64) -> FilterValue {
    FilterValue::Timescale(TimescaleFilter {
        speed: Some(speed),
        pitch: Some(pitch),
        rate: Some(1.0),
    })
}

pub fn bass_boost() -> Effect {
    Effect::new(
        "bassboost",
        vec![equalizer(&[
            (0, 0.6),
            (1, 0.67),
            (2, 0.67),
            (3, 0.4),
            (4, 0.1),
            (5, 0.0),
            (6, -0.1),
            (7, -0.1),
        ])],
    )
}

pub fn nightcore() -> Effect {
    Effect::new("nightcore", vec![timescale(1.3, 1.3)])
}

/// Slowed down with a low-end lift.
pub fn vaporwave() -> Effect {
    Effect::new(
        "vaporwave",
        vec![
            timescale(0.85, 0.8),
            equalizer(&[(0, 0.3), (1, 0.3)]),
            FilterValue::Tremolo(TremoloFilter {
                frequency: Some(14.0),
                depth: Some(0.3),
            }),
        ],
    )
}

pub fn karaoke() -> Effect {
    Effect::new(
        "karaoke",
        vec![FilterValue::Karaoke(KaraokeFilter {
            level: Some(1.0),
            mono_level: Some(1.0),
            filter_band: Some(220.0),
            filter_width: Some(100.0),
        })],
    )
}

pub fn eight_d() -> Effect {
    Effect::new(
        "8d",
        vec![FilterValue::Rotation(RotationFilter {
            rotation_hz: Some(0.2),
        })],
    )
}

pub fn tremolo() -> Effect {
    Effect::new(
        "tremolo",
        vec![FilterValue::Tremolo(TremoloFilter {
            frequency: Some(4.0),
            depth: Some(0.75),
        })],
    )
}

pub fn vibrato() -> Effect {
    Effect::new(
        "vibrato",
        vec![FilterValue::Vibrato(VibratoFilter {
            frequency: Some(4.0),
            depth: Some(0.75),
        })],
    )
}

pub fn soft() -> Effect {
    Effect::new(
        "soft",
        vec![FilterValue::LowPass(LowPassFilter {
            smoothing: Some(20.0),
        })],
    )
}

pub fn distortion() -> Effect {
    Effect::new(
        "distortion",
        vec![FilterValue::Distortion(DistortionFilter {
            sin_offset: Some(0.0),
            sin_scale: Some(1.0),
            cos_offset: Some(0.0),
            cos_scale: Some(1.0),
            tan_offset: Some(0.0),
            tan_scale: Some(1.0),
            offset: Some(0.0),
            scale: Some(1.0),
        })],
    )
}

/// Both channels folded into the middle.
pub fn mono() -> Effect {
    Effect::new(
        "mono",
        vec![FilterValue::ChannelMix(ChannelMixFilter {
            left_to_left: Some(0.5),
            left_to_right: Some(0.5),
            right_to_left: Some(0.5),
            right_to_right: Some(0.5),
        })],
    )
}

/// Every built-in effect.
pub fn catalogue() -> Vec<Effect> {
    vec![
        bass_boost(),
        nightcore(),
        vaporwave(),
        karaoke(),
        eight_d(),
        tremolo(),
        vibrato(),
        soft(),
        distortion(),
        mono(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalogue_names_are_unique() {
        let names: HashSet<String> = catalogue().iter().map(|e| e.name().to_string()).collect();
        assert_eq!(names.len(), catalogue().len());
    }

    #[test]
    fn test_bass_boost_bands_in_range() {
        let effect = bass_boost();
        let Some(FilterValue::Equalizer(bands)) = effect.contributions().first() else {
            panic!("bass boost must contribute an equalizer");
        };
        assert!(bands.iter().all(|b| b.band < 15 && (-0.25..=1.0).contains(&b.gain)));
    }
}
