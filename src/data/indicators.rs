//! Static indicator catalog and environment-scoped indicator sets
//!
//! The catalog holds the Sotkanet indicators the HUS dashboard knows about.
//! Each environment profile selects an ordered subset of them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A Sotkanet indicator known to the application
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Indicator {
    /// Sotkanet indicator id
    pub id: &'static str,
    /// Finnish title
    pub name_fi: &'static str,
    /// Swedish title
    pub name_sv: &'static str,
    /// English title
    pub name_en: &'static str,
    /// Unit of the primary value
    pub unit: &'static str,
    /// Number of decimals published by the source organisation
    pub decimals: u8,
}

/// Every indicator in the catalog
pub static INDICATORS: [Indicator; 6] = [
    Indicator {
        id: "186",
        name_fi: "Kuolleisuus / 100 000 asukasta",
        name_sv: "Dödlighet / 100 000 invånare",
        name_en: "Mortality per 100 000 inhabitants",
        unit: "/ 100 000",
        decimals: 1,
    },
    Indicator {
        id: "322",
        name_fi: "Kuolleisuus 65 vuotta täyttäneillä / 100 000 vastaavan ikäistä",
        name_sv: "Dödlighet i åldrarna 65 år och över / 100 000 i samma åldrar",
        name_en: "Mortality among population aged 65 and over per 100 000 persons of same age",
        unit: "/ 100 000",
        decimals: 0,
    },
    Indicator {
        id: "5527",
        name_fi: "Terveysliikuntasuosituksen mukaan liian vähän liikkuvien osuus (%)",
        name_sv: "Andelen personer (%) som motionerar för lite enligt rekommendationen om hälsomotion",
        name_en: "Share of those with insufficient physical activity (%)",
        unit: "%",
        decimals: 1,
    },
    Indicator {
        id: "5529",
        name_fi: "Terveysliikuntasuosituksen mukaan liian vähän liikkuvien osuus (%), 65 vuotta täyttäneet",
        name_sv: "Andelen personer (%) som motionerar för lite enligt rekommendationen om hälsomotion, 65 år och äldre",
        name_en: "Share of those with insufficient physical activity (%), age 65 and over",
        unit: "%",
        decimals: 1,
    },
    Indicator {
        id: "4559",
        name_fi: "Terveydelle suotuisat elintavat (%), 20 - 69-vuotiaat",
        name_sv: "Hälsosamma levnadsvanor (%), 20 - 69-åringar",
        name_en: "Health promoting behaviors (%), age 20-69",
        unit: "%",
        decimals: 1,
    },
    Indicator {
        id: "4461",
        name_fi: "Lihavien osuus (kehon painoindeksi BMI ≥ 30 kg/m2) (%), 65 vuotta täyttäneet",
        name_sv: "Andelen feta personer (kroppsmasseindex BMI ≥ 30 kg/m2) (%), 65 år och äldre",
        name_en: "Obesity (Body Mass Index BMI ≥ 30 kg/m2) (%), age 65 and over",
        unit: "%",
        decimals: 1,
    },
];

const DEVELOPMENT_SET: &[&str] = &["186", "322", "5527"];
const TESTING_SET: &[&str] = &["186"];
const PRODUCTION_SET: &[&str] = &["186", "322", "5527", "5529", "4559", "4461"];

/// Returns the full indicator catalog
pub fn all_indicators() -> &'static [Indicator] {
    &INDICATORS
}

/// Looks up a catalog indicator by its Sotkanet id
pub fn get_indicator_by_id(id: &str) -> Option<&'static Indicator> {
    INDICATORS.iter().find(|indicator| indicator.id == id)
}

/// Deployment profile selecting which indicators are shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Testing,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Testing => "testing",
            Environment::Production => "production",
        }
    }

    /// Parses a profile name such as `APP_ENV=production`.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Environment> {
        match s.to_lowercase().trim() {
            "development" | "dev" => Some(Environment::Development),
            "testing" | "test" => Some(Environment::Testing),
            "production" | "prod" => Some(Environment::Production),
            _ => None,
        }
    }

    /// Ordered indicator set for this profile
    pub fn indicator_set(&self) -> IndicatorSet {
        let ids = match self {
            Environment::Development => DEVELOPMENT_SET,
            Environment::Testing => TESTING_SET,
            Environment::Production => PRODUCTION_SET,
        };
        IndicatorSet::new(ids.iter().map(|id| id.to_string()))
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered list of indicator ids, with duplicates removed
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndicatorSet {
    ids: Vec<String>,
}

impl IndicatorSet {
    pub fn new(ids: impl IntoIterator<Item = String>) -> Self {
        let mut unique: Vec<String> = Vec::new();
        for id in ids {
            if !unique.contains(&id) {
                unique.push(id);
            }
        }
        Self { ids: unique }
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.ids.iter()
    }
}
