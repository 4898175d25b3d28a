//! Air-quality index classification.
//!
//! The air-quality provider reports a category code on a 1 to 5 scale rather
//! than a raw concentration-derived index.

/// Label used for codes outside the provider's scale.
pub const UNKNOWN_LABEL: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AqiCategory {
    Good,
    Fair,
    Moderate,
    Poor,
    VeryPoor,
}

impl AqiCategory {
    pub fn from_index(aqi: i64) -> Option<Self> {
        match aqi {
            1 => Some(AqiCategory::Good),
            2 => Some(AqiCategory::Fair),
            3 => Some(AqiCategory::Moderate),
            4 => Some(AqiCategory::Poor),
            5 => Some(AqiCategory::VeryPoor),
            _ => None,
        }
    }

    pub fn index(&self) -> u8 {
        match self {
            AqiCategory::Good => 1,
            AqiCategory::Fair => 2,
            AqiCategory::Moderate => 3,
            AqiCategory::Poor => 4,
            AqiCategory::VeryPoor => 5,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AqiCategory::Good => "Good",
            AqiCategory::Fair => "Fair",
            AqiCategory::Moderate => "Moderate",
            AqiCategory::Poor => "Poor",
            AqiCategory::VeryPoor => "Very Poor",
        }
    }

    pub const fn all() -> &'static [AqiCategory] {
        &[
            AqiCategory::Good,
            AqiCategory::Fair,
            AqiCategory::Moderate,
            AqiCategory::Poor,
            AqiCategory::VeryPoor,
        ]
    }
}

impl std::fmt::Display for AqiCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Map an AQI category code to its display label.
///
/// Codes outside 1..=5 map to [`UNKNOWN_LABEL`].
pub fn classify(aqi: i64) -> &'static str {
    AqiCategory::from_index(aqi)
        .map_or(UNKNOWN_LABEL, |category| category.label())
}
