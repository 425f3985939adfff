//! crates/edulab_core/src/progression.rs
//!
//! The progression calculator: maps cumulative XP to the level, in-level
//! progress and badge shown on the dashboard.
//!
//! Levels are fixed-width bands of `XP_PER_LEVEL`. Level 1 spans `[0, 500)`,
//! level 2 spans `[500, 1000)`, and so on.

use serde::Serialize;

/// Width of one level band.
pub const XP_PER_LEVEL: u32 = 500;

/// Named tiers over the level.
///
/// Cut points: `1..=3` Newcomer, `4..=6` Scientist, `7..=10` Expert,
/// `11..` EduLab Laureate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Badge {
    Newcomer,
    Scientist,
    Expert,
    Laureate,
}

impl Badge {
    pub fn for_level(level: u32) -> Self {
        match level {
            0..=3 => Badge::Newcomer,
            4..=6 => Badge::Scientist,
            7..=10 => Badge::Expert,
            _ => Badge::Laureate,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Badge::Newcomer => "Newcomer",
            Badge::Scientist => "Scientist",
            Badge::Expert => "Expert",
            Badge::Laureate => "EduLab Laureate",
        }
    }

    /// The label rendered in the Vietnamese UI.
    pub fn label_vi(&self) -> &'static str {
        match self {
            Badge::Newcomer => "Tân binh",
            Badge::Scientist => "Nhà khoa học trẻ",
            Badge::Expert => "Chuyên gia",
            Badge::Laureate => "Viện sĩ EduLab",
        }
    }
}

/// Everything derived from a cumulative XP value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progression {
    pub xp: u32,
    pub level: u32,
    pub xp_in_level: u32,
    /// Progress through the current band, rounded half-up to a whole percent.
    pub xp_percent: u8,
    pub xp_to_next: u32,
    pub badge: Badge,
}

impl Progression {
    pub fn from_xp(xp: u32) -> Self {
        let level = level(xp);
        let xp_in_level = xp_in_level(xp);
        Self {
            xp,
            level,
            xp_in_level,
            xp_percent: xp_percent(xp),
            xp_to_next: XP_PER_LEVEL - xp_in_level,
            badge: Badge::for_level(level),
        }
    }
}

pub fn level(xp: u32) -> u32 {
    xp / XP_PER_LEVEL + 1
}

pub fn xp_in_level(xp: u32) -> u32 {
    xp % XP_PER_LEVEL
}

/// `round(xp_in_level / 500 * 100)` with half-up rounding, in integer math.
pub fn xp_percent(xp: u32) -> u8 {
    let scaled = xp_in_level(xp) * 100;
    ((scaled + XP_PER_LEVEL / 2) / XP_PER_LEVEL) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_follows_fixed_bands() {
        assert_eq!(level(0), 1);
        assert_eq!(level(499), 1);
        assert_eq!(level(500), 2);
        assert_eq!(level(999), 2);
        assert_eq!(level(1000), 3);
        assert_eq!(level(u32::MAX), u32::MAX / 500 + 1);
    }

    #[test]
    fn level_is_non_decreasing() {
        let mut previous = level(0);
        for xp in 0..5_000 {
            let current = level(xp);
            assert!(current >= previous, "level dropped at xp {}", xp);
            previous = current;
        }
    }

    #[test]
    fn xp_reconstructs_from_level_and_remainder() {
        for xp in (0..20_000).step_by(7) {
            let p = Progression::from_xp(xp);
            assert!(p.xp_in_level < XP_PER_LEVEL);
            assert_eq!((p.level - 1) * XP_PER_LEVEL + p.xp_in_level, xp);
            assert!(p.xp_percent <= 100);
            assert_eq!(p.xp_to_next, XP_PER_LEVEL - p.xp_in_level);
        }
    }

    #[test]
    fn band_boundaries() {
        let last = Progression::from_xp(499);
        assert_eq!((last.level, last.xp_in_level, last.xp_percent), (1, 499, 100));
        assert_eq!(last.xp_to_next, 1);

        let first = Progression::from_xp(500);
        assert_eq!((first.level, first.xp_in_level, first.xp_percent), (2, 0, 0));
        assert_eq!(first.xp_to_next, 500);
    }

    #[test]
    fn percent_rounds_half_up() {
        // 2/500 = 0.4% -> 0, 3/500 = 0.6% -> 1, 250/500 = 50%
        assert_eq!(xp_percent(2), 0);
        assert_eq!(xp_percent(3), 1);
        assert_eq!(xp_percent(250), 50);
        assert_eq!(xp_percent(497), 99);
        assert_eq!(xp_percent(498), 100);
    }

    #[test]
    fn profile_with_2450_xp() {
        let p = Progression::from_xp(2450);
        assert_eq!(p.level, 5);
        assert_eq!(p.xp_in_level, 450);
        assert_eq!(p.xp_to_next, 50);
        assert_eq!(p.xp_percent, 90);
        assert_eq!(p.badge, Badge::Scientist);
    }

    #[test]
    fn same_input_same_output() {
        assert_eq!(Progression::from_xp(1234), Progression::from_xp(1234));
    }

    #[test]
    fn badge_tiers() {
        assert_eq!(Badge::for_level(1), Badge::Newcomer);
        assert_eq!(Badge::for_level(3), Badge::Newcomer);
        assert_eq!(Badge::for_level(4), Badge::Scientist);
        assert_eq!(Badge::for_level(6), Badge::Scientist);
        assert_eq!(Badge::for_level(7), Badge::Expert);
        assert_eq!(Badge::for_level(10), Badge::Expert);
        assert_eq!(Badge::for_level(11), Badge::Laureate);
        assert_eq!(Badge::Laureate.label(), "EduLab Laureate");
    }
}
