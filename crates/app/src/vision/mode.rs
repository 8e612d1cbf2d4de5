use std::fmt;

use serde::Serialize;

/// Which detection pipeline is active process-wide.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMode {
    #[default]
    Inactive,
    Weapons,
    Masks,
    WeaponsAndMasks,
    FullBody,
}

/// Logical camera feed. Each slot has its own configured source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraSlot {
    Weapon,
    Mask,
    Body,
}

impl DetectionMode {
    pub const STREAMING: [DetectionMode; 4] = [
        DetectionMode::Weapons,
        DetectionMode::Masks,
        DetectionMode::WeaponsAndMasks,
        DetectionMode::FullBody,
    ];

    /// Camera the mode reads from. Combined mode composes both overlays on
    /// one frame and therefore needs a single camera.
    pub fn camera_slot(self) -> Option<CameraSlot> {
        match self {
            DetectionMode::Inactive => None,
            DetectionMode::Weapons | DetectionMode::WeaponsAndMasks => Some(CameraSlot::Weapon),
            DetectionMode::Masks => Some(CameraSlot::Mask),
            DetectionMode::FullBody => Some(CameraSlot::Body),
        }
    }

    pub fn runs_object_detector(self) -> bool {
        matches!(
            self,
            DetectionMode::Weapons | DetectionMode::WeaponsAndMasks | DetectionMode::FullBody
        )
    }

    pub fn runs_mask_classifier(self) -> bool {
        matches!(self, DetectionMode::Masks | DetectionMode::WeaponsAndMasks)
    }

    pub fn label(self) -> &'static str {
        match self {
            DetectionMode::Inactive => "inactive",
            DetectionMode::Weapons => "weapons",
            DetectionMode::Masks => "masks",
            DetectionMode::WeaponsAndMasks => "weapons_and_masks",
            DetectionMode::FullBody => "full_body",
        }
    }

    /// HTTP path of the feed that activates this mode.
    pub fn feed_path(self) -> Option<&'static str> {
        match self {
            DetectionMode::Inactive => None,
            DetectionMode::Weapons => Some("/video_feed_weapons"),
            DetectionMode::Masks => Some("/video_feed_masks"),
            DetectionMode::WeaponsAndMasks => Some("/video_feed_weapons_and_masks"),
            DetectionMode::FullBody => Some("/video_feed_full_body"),
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        [DetectionMode::Inactive]
            .into_iter()
            .chain(Self::STREAMING)
            .find(|mode| mode.label() == label)
    }
}

impl fmt::Display for DetectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl CameraSlot {
    pub fn label(self) -> &'static str {
        match self {
            CameraSlot::Weapon => "weapon",
            CameraSlot::Mask => "mask",
            CameraSlot::Body => "body",
        }
    }
}

impl fmt::Display for CameraSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_streaming_mode_has_one_camera_and_a_feed() {
        for mode in DetectionMode::STREAMING {
            assert!(mode.camera_slot().is_some(), "{mode}");
            assert!(mode.feed_path().is_some(), "{mode}");
            assert_eq!(DetectionMode::from_label(mode.label()), Some(mode));
        }
        assert_eq!(DetectionMode::Inactive.camera_slot(), None);
    }

    #[test]
    fn detector_table() {
        use DetectionMode::*;
        let table = [
            (Weapons, true, false),
            (Masks, false, true),
            (WeaponsAndMasks, true, true),
            (FullBody, true, false),
            (Inactive, false, false),
        ];
        for (mode, object, mask) in table {
            assert_eq!(mode.runs_object_detector(), object, "{mode}");
            assert_eq!(mode.runs_mask_classifier(), mask, "{mode}");
        }
    }
}
