//! Transition kinds accepted at the request boundary.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::timing::EffectFamily;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(ascii_case_insensitive)]
pub enum TransitionKind {
    /// Hard cut
    #[serde(alias = "cut")]
    #[strum(to_string = "none", serialize = "cut")]
    None,

    #[serde(alias = "crossfade")]
    #[strum(to_string = "fade", serialize = "crossfade")]
    Fade,

    /// Fade through black; keeps the timeline length unchanged.
    #[serde(alias = "fadeblack")]
    #[strum(to_string = "fade-black", serialize = "fadeblack")]
    FadeBlack,

    #[strum(to_string = "wipe-left")]
    WipeLeft,

    #[strum(to_string = "wipe-right")]
    WipeRight,

    #[strum(to_string = "slide-up")]
    SlideUp,

    #[strum(to_string = "slide-down")]
    SlideDown,

    #[strum(to_string = "zoom-in")]
    ZoomIn,

    #[strum(to_string = "zoom-out")]
    ZoomOut,

    #[strum(to_string = "radial")]
    Radial,

    #[serde(alias = "circle")]
    #[strum(to_string = "circle-close", serialize = "circle")]
    CircleClose,

    #[serde(alias = "h-blur", alias = "hblur")]
    #[strum(to_string = "blur", serialize = "h-blur", serialize = "hblur")]
    Blur,

    #[strum(to_string = "light-leak")]
    LightLeak,
}

impl TransitionKind {
    /// Name of the built-in `xfade` transition, if the backend has one.
    pub fn xfade_name(&self) -> Option<&'static str> {
        match self {
            TransitionKind::Fade => Some("fade"),
            TransitionKind::WipeLeft => Some("wipeleft"),
            TransitionKind::WipeRight => Some("wiperight"),
            TransitionKind::SlideUp => Some("slideup"),
            TransitionKind::SlideDown => Some("slidedown"),
            TransitionKind::ZoomIn => Some("zoomin"),
            TransitionKind::Radial => Some("radial"),
            TransitionKind::CircleClose => Some("circleclose"),
            TransitionKind::Blur => Some("hblur"),
            TransitionKind::None
            | TransitionKind::FadeBlack
            | TransitionKind::ZoomOut
            | TransitionKind::LightLeak => None,
        }
    }

    /// Whether consecutive clips overlap in the output timeline.
    pub fn overlaps(&self) -> bool {
        !matches!(self, TransitionKind::None | TransitionKind::FadeBlack)
    }

    pub fn family(&self) -> EffectFamily {
        match self {
            TransitionKind::LightLeak => EffectFamily::LightLeak,
            _ => EffectFamily::Geometric,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn parses_aliases() {
        assert_eq!(TransitionKind::from_str("crossfade").unwrap(), TransitionKind::Fade);
        assert_eq!(TransitionKind::from_str("h-blur").unwrap(), TransitionKind::Blur);
        assert_eq!(TransitionKind::from_str("Wipe-Left").unwrap(), TransitionKind::WipeLeft);
        assert_eq!(TransitionKind::from_str("cut").unwrap(), TransitionKind::None);
        assert!(TransitionKind::from_str("spin").is_err());
    }

    #[test]
    fn displays_canonical_name() {
        assert_eq!(TransitionKind::CircleClose.to_string(), "circle-close");
        assert_eq!(TransitionKind::Fade.to_string(), "fade");
    }

    #[test]
    fn maps_to_xfade_primitives() {
        assert_eq!(TransitionKind::Blur.xfade_name(), Some("hblur"));
        assert_eq!(TransitionKind::SlideDown.xfade_name(), Some("slidedown"));
        assert_eq!(TransitionKind::ZoomOut.xfade_name(), None);
    }

    #[test]
    fn serde_accepts_aliases() {
        let kind: TransitionKind = serde_json::from_str("\"crossfade\"").unwrap();
        assert_eq!(kind, TransitionKind::Fade);
        assert_eq!(serde_json::to_string(&TransitionKind::LightLeak).unwrap(), "\"light-leak\"");
    }
}
