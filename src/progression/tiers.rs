use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::progression::error::{ProgressionError, validation_error};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WealthTier {
    pub min_money: u64,
    pub title: String,
    pub description: String,
    /// Presentation hint, e.g. a colour name.
    pub tag: String,
}

impl WealthTier {
    pub fn new(
        min_money: u64,
        title: impl Into<String>,
        description: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            min_money,
            title: title.into(),
            description: description.into(),
            tag: tag.into(),
        }
    }
}

/// Ordered classification table. Thresholds start at 0 and strictly increase,
/// so every balance falls into exactly one tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct WealthTierTable {
    tiers: Vec<WealthTier>,
}

static STANDARD_TIERS: LazyLock<WealthTierTable> = LazyLock::new(|| WealthTierTable {
    tiers: vec![
        WealthTier::new(0, "Penniless", "Nothing to your name yet; time to grind", "gray"),
        WealthTier::new(10, "Scraping By", "A little pocket money, still tight", "orange"),
        WealthTier::new(50, "Getting By", "The basics are covered", "yellow"),
        WealthTier::new(100, "Comfortable", "An occasional treat is affordable", "green"),
        WealthTier::new(500, "Middle Class", "A pretty good quality of life", "blue"),
        WealthTier::new(1_000, "Well-off", "Financially at ease", "purple"),
        WealthTier::new(5_000, "Small Fortune", "Could buy a nice car", "pink"),
        WealthTier::new(10_000, "Tycoon", "Investing in property", "red"),
        WealthTier::new(50_000, "Magnate", "Financially free", "gold"),
        WealthTier::new(100_000, "Mogul", "The big house is within reach", "violet"),
        WealthTier::new(1_000_000, "Life Champion", "The summit of wealth", "sunset"),
    ],
});

impl WealthTierTable {
    pub fn new(tiers: Vec<WealthTier>) -> Result<Self, ProgressionError> {
        let Some(first) = tiers.first() else {
            return Err(validation_error("wealth tier table must not be empty"));
        };
        if first.min_money != 0 {
            return Err(validation_error(format!(
                "first wealth tier must start at 0, got {}",
                first.min_money
            )));
        }

        for pair in tiers.windows(2) {
            if pair[1].min_money <= pair[0].min_money {
                return Err(validation_error(format!(
                    "wealth tier thresholds must strictly increase: '{}' ({}) follows '{}' ({})",
                    pair[1].title, pair[1].min_money, pair[0].title, pair[0].min_money
                )));
            }
        }

        if let Some(tier) = tiers.iter().find(|tier| tier.title.trim().is_empty()) {
            return Err(validation_error(format!(
                "wealth tier at {} has a blank title",
                tier.min_money
            )));
        }

        Ok(Self { tiers })
    }

    pub fn standard() -> &'static WealthTierTable {
        &STANDARD_TIERS
    }

    pub fn tiers(&self) -> &[WealthTier] {
        &self.tiers
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Index of the highest tier whose threshold is at most `money`.
    pub fn classify_index(&self, money: u64) -> usize {
        self.tiers
            .iter()
            .rposition(|tier| money >= tier.min_money)
            .unwrap_or(0)
    }

    pub fn classify(&self, money: u64) -> &WealthTier {
        &self.tiers[self.classify_index(money)]
    }

    pub fn is_current_tier(&self, money: u64, index: usize) -> bool {
        let Some(tier) = self.tiers.get(index) else {
            return false;
        };
        let below_next = self
            .tiers
            .get(index + 1)
            .is_none_or(|next| money < next.min_money);
        money >= tier.min_money && below_next
    }

    pub fn is_achieved(&self, money: u64, index: usize) -> bool {
        self.tiers
            .get(index)
            .is_some_and(|tier| money >= tier.min_money)
    }

    pub fn next_tier(&self, money: u64) -> Option<&WealthTier> {
        self.tiers.get(self.classify_index(money) + 1)
    }
}

impl<'de> Deserialize<'de> for WealthTierTable {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let tiers = Vec::<WealthTier>::deserialize(deserializer)?;
        WealthTierTable::new(tiers).map_err(serde::de::Error::custom)
    }
}

impl Default for WealthTierTable {
    fn default() -> Self {
        STANDARD_TIERS.clone()
    }
}

/// Classifies against the standard table.
pub fn classify(money: u64) -> &'static WealthTier {
    STANDARD_TIERS.classify(money)
}

pub fn is_current_tier(money: u64, index: usize) -> bool {
    STANDARD_TIERS.is_current_tier(money, index)
}
