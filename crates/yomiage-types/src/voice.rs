//! Voice profile and speaker catalog definitions.
//!
//! A `VoiceProfile` holds the prosody parameters applied to an engine audio
//! query before synthesis. Profiles are keyed by a target id, which is either
//! a user id or a group id; a user profile overrides the group's.

use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// Style id used when no speaker has been chosen.
pub const DEFAULT_SPEAKER_ID: u32 = 888_753_760;

pub const VOLUME_RANGE: RangeInclusive<f32> = 0.0..=2.0;
pub const PITCH_RANGE: RangeInclusive<f32> = -0.15..=0.15;
pub const SPEED_RANGE: RangeInclusive<f32> = 0.5..=2.0;
pub const INTONATION_RANGE: RangeInclusive<f32> = 0.0..=2.0;
pub const TEMPO_DYNAMICS_RANGE: RangeInclusive<f32> = 0.0..=2.0;

fn clamp_to(value: f32, range: &RangeInclusive<f32>) -> f32 {
    if value.is_nan() {
        return *range.start();
    }
    value.clamp(*range.start(), *range.end())
}

/// Prosody parameters for one user or group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VoiceProfile {
    /// Output volume multiplier (1.0 is normal).
    pub volume: f32,
    /// Pitch shift (0.0 is normal).
    pub pitch: f32,
    /// Speech speed multiplier (1.0 is normal).
    pub speed: f32,
    /// Intonation strength (1.0 is normal).
    pub intonation: f32,
    /// Tempo dynamics strength (1.0 is normal).
    pub tempo_dynamics: f32,
}

impl Default for VoiceProfile {
    fn default() -> Self {
        Self {
            volume: 1.0,
            pitch: 0.0,
            speed: 1.0,
            intonation: 1.0,
            tempo_dynamics: 1.0,
        }
    }
}

impl VoiceProfile {
    /// Returns a copy with every field clamped into its allowed range.
    pub fn clamped(self) -> Self {
        Self {
            volume: clamp_to(self.volume, &VOLUME_RANGE),
            pitch: clamp_to(self.pitch, &PITCH_RANGE),
            speed: clamp_to(self.speed, &SPEED_RANGE),
            intonation: clamp_to(self.intonation, &INTONATION_RANGE),
            tempo_dynamics: clamp_to(self.tempo_dynamics, &TEMPO_DYNAMICS_RANGE),
        }
    }

    /// Applies the fields present in `patch`, clamping the result.
    pub fn apply(self, patch: &VoiceProfilePatch) -> Self {
        Self {
            volume: patch.volume.unwrap_or(self.volume),
            pitch: patch.pitch.unwrap_or(self.pitch),
            speed: patch.speed.unwrap_or(self.speed),
            intonation: patch.intonation.unwrap_or(self.intonation),
            tempo_dynamics: patch.tempo_dynamics.unwrap_or(self.tempo_dynamics),
        }
        .clamped()
    }
}

/// Partial update to a [`VoiceProfile`]. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceProfilePatch {
    pub volume: Option<f32>,
    pub pitch: Option<f32>,
    pub speed: Option<f32>,
    pub intonation: Option<f32>,
    pub tempo_dynamics: Option<f32>,
    /// Default speaker style for this target.
    pub speaker_id: Option<u32>,
}

impl VoiceProfilePatch {
    /// Whether the patch touches any voice parameter, as opposed to only
    /// the default speaker.
    pub fn has_voice_fields(&self) -> bool {
        self.volume.is_some()
            || self.pitch.is_some()
            || self.speed.is_some()
            || self.intonation.is_some()
            || self.tempo_dynamics.is_some()
    }
}

/// One selectable voice: a speaker and one of its styles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakerStyle {
    pub speaker_name: String,
    pub style_name: String,
    pub style_id: u32,
}

impl SpeakerStyle {
    /// Display label, e.g. `Anneli - ノーマル`.
    pub fn label(&self) -> String {
        format!("{} - {}", self.speaker_name, self.style_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profile_is_neutral() {
        let p = VoiceProfile::default();
        assert_eq!(p.volume, 1.0);
        assert_eq!(p.pitch, 0.0);
        assert_eq!(p.speed, 1.0);
        assert_eq!(p.intonation, 1.0);
        assert_eq!(p.tempo_dynamics, 1.0);
    }

    #[test]
    fn clamped_limits_each_field() {
        let p = VoiceProfile {
            volume: 9.0,
            pitch: -1.0,
            speed: 0.1,
            intonation: f32::NAN,
            tempo_dynamics: 1.5,
        }
        .clamped();
        assert_eq!(p.volume, 2.0);
        assert_eq!(p.pitch, -0.15);
        assert_eq!(p.speed, 0.5);
        assert_eq!(p.intonation, 0.0);
        assert_eq!(p.tempo_dynamics, 1.5);
    }

    #[test]
    fn apply_patch_keeps_absent_fields() {
        let patch = VoiceProfilePatch {
            speed: Some(1.4),
            ..Default::default()
        };
        let p = VoiceProfile::default().apply(&patch);
        assert_eq!(p.speed, 1.4);
        assert_eq!(p.volume, 1.0);
    }

    #[test]
    fn speaker_only_patch_has_no_voice_fields() {
        let patch = VoiceProfilePatch {
            speaker_id: Some(5),
            ..Default::default()
        };
        assert!(!patch.has_voice_fields());
        assert!(VoiceProfilePatch {
            tempo_dynamics: Some(1.0),
            ..patch
        }
        .has_voice_fields());
    }

    #[test]
    fn profile_deserializes_partial_json() {
        let p: VoiceProfile = serde_json::from_str(r#"{"tempoDynamics":0.5}"#).unwrap();
        assert_eq!(p.tempo_dynamics, 0.5);
        assert_eq!(p.speed, 1.0);
    }

    #[test]
    fn speaker_label() {
        let s = SpeakerStyle {
            speaker_name: "Anneli".into(),
            style_name: "ノーマル".into(),
            style_id: DEFAULT_SPEAKER_ID,
        };
        assert_eq!(s.label(), "Anneli - ノーマル");
    }
}
