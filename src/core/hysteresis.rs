//! Level derivation as an explicit `(enter, exit)` hysteresis table.

use crate::config::LevelThresholds;
use serde::{Deserialize, Serialize};

/// Intervention level (0 = none, 3 = strongest).
pub type Level = u8;

pub const MAX_LEVEL: Level = 3;

/// Thresholds for entering and leaving one level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelBand {
    pub level: Level,
    /// Score at or above which the level is entered
    pub enter: f64,
    /// Score below which a held level is left; `exit <= enter`
    pub exit: f64,
}

/// Ascending table of level bands (levels 1..=3).
#[derive(Debug, Clone, PartialEq)]
pub struct LevelTable {
    bands: [LevelBand; 3],
}

impl LevelTable {
    pub fn from_thresholds(thresholds: &LevelThresholds) -> Self {
        Self {
            bands: [
                LevelBand {
                    level: 1,
                    enter: thresholds.level1_enter,
                    exit: thresholds.level1_exit,
                },
                LevelBand {
                    level: 2,
                    enter: thresholds.level2,
                    exit: thresholds.level2,
                },
                LevelBand {
                    level: 3,
                    enter: thresholds.level3,
                    exit: thresholds.level3,
                },
            ],
        }
    }

    /// Derive the level for `score` given the level held on the previous tick.
    ///
    /// The highest band whose entry threshold the score reaches wins. Failing
    /// that, a band the session already holds (or holds a level above) is
    /// kept for as long as the score stays at or above its exit threshold.
    pub fn derive(&self, score: f64, previous: Level) -> Level {
        for band in self.bands.iter().rev() {
            if score >= band.enter {
                return band.level;
            }
            if previous >= band.level && score >= band.exit {
                return band.level;
            }
        }
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> LevelTable {
        LevelTable::from_thresholds(&LevelThresholds::default())
    }

    #[test]
    fn test_ascending_levels() {
        let t = table();
        assert_eq!(t.derive(10.0, 0), 0);
        assert_eq!(t.derive(50.0, 0), 1);
        assert_eq!(t.derive(70.0, 0), 2);
        assert_eq!(t.derive(85.0, 0), 3);
        assert_eq!(t.derive(100.0, 0), 3);
    }

    #[test]
    fn test_level_one_hysteresis() {
        let t = table();
        // Between exit and enter: depends on history
        assert_eq!(t.derive(45.0, 0), 0);
        assert_eq!(t.derive(45.0, 1), 1);
        assert_eq!(t.derive(40.0, 1), 1);
        assert_eq!(t.derive(39.9, 1), 0);
    }

    #[test]
    fn test_falling_from_higher_levels_lands_in_held_band() {
        let t = table();
        assert_eq!(t.derive(69.0, 2), 1);
        assert_eq!(t.derive(42.0, 3), 1);
        assert_eq!(t.derive(30.0, 3), 0);
    }
}
