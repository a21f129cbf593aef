//! Behavior categories and their stable ordinal encoding.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::TimelineError;

/// Label substituted for empty cells before lookup.
pub const MISSING_LABEL: &str = "Unknown";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Behavior {
    /// Label as recorded in the sheet.
    pub label: String,
    /// English display name.
    pub english: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl Behavior {
    fn new(label: &str, english: &str) -> Self {
        Self {
            label: label.to_string(),
            english: english.to_string(),
            aliases: Vec::new(),
        }
    }

    fn matches(&self, label: &str) -> bool {
        self.label == label
            || self.english.to_lowercase() == label.to_lowercase()
            || self
                .aliases
                .iter()
                .any(|a| a.to_lowercase() == label.to_lowercase())
    }
}

/// Ordered behavior list. A behavior's ordinal is its position in the list and
/// does not depend on which behaviors a given dataset contains, so colors and
/// axis rows line up across cows and sheets.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct BehaviorSet {
    behaviors: Vec<Behavior>,
}

impl Default for BehaviorSet {
    fn default() -> Self {
        Self {
            behaviors: vec![
                Behavior::new("ยืน", "Standing"),
                Behavior::new("นอน", "Lying"),
                Behavior::new("กิน", "Eating"),
                Behavior::new("ดื่ม", "Drinking"),
                Behavior::new("เกย", "Mounting"),
                Behavior::new("คร่อม", "Straddling"),
                Behavior::new("ยืนติดรั้ว", "Standing at fence"),
            ],
        }
    }
}

impl BehaviorSet {
    pub fn new(behaviors: Vec<Behavior>) -> Result<Self, TimelineError> {
        let set = Self { behaviors };
        set.validate()?;
        Ok(set)
    }

    fn validate(&self) -> Result<(), TimelineError> {
        if self.behaviors.is_empty() {
            return Err(TimelineError::InvalidProfile(
                "behavior list is empty".into(),
            ));
        }
        for (idx, behavior) in self.behaviors.iter().enumerate() {
            if behavior.label.trim().is_empty() {
                return Err(TimelineError::InvalidProfile(format!(
                    "behavior #{idx} has an empty label"
                )));
            }
            if self.behaviors[..idx]
                .iter()
                .any(|prev| prev.label == behavior.label)
            {
                return Err(TimelineError::InvalidProfile(format!(
                    "duplicate behavior label '{}'",
                    behavior.label
                )));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.behaviors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }

    pub fn get(&self, ordinal: usize) -> Option<&Behavior> {
        self.behaviors.get(ordinal)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Behavior> {
        self.behaviors.iter()
    }

    /// Ordinal for a raw cell value. Empty cells are looked up as
    /// [`MISSING_LABEL`]; labels outside the set yield `None`.
    pub fn ordinal(&self, label: Option<&str>) -> Option<usize> {
        let label = label
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or(MISSING_LABEL);
        self.behaviors.iter().position(|b| b.matches(label))
    }

    pub fn display(&self, ordinal: usize, language: Language) -> &str {
        match self.behaviors.get(ordinal) {
            Some(b) => match language {
                Language::Thai => &b.label,
                Language::English => &b.english,
            },
            None => MISSING_LABEL,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Thai,
    English,
}

/// Friendly name for a subject column.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubjectAlias {
    pub name: String,
    /// Positional column index, counting the timestamp columns.
    pub column: usize,
}

/// Sheet-specific configuration: the behavior list and optional cow names.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub behaviors: BehaviorSet,
    #[serde(default)]
    pub subjects: Vec<SubjectAlias>,
}

impl Default for Profile {
    fn default() -> Self {
        let alias = |name: &str, column| SubjectAlias {
            name: name.to_string(),
            column,
        };
        Self {
            behaviors: BehaviorSet::default(),
            subjects: vec![
                alias("cow-a (black)", 2),
                alias("cow-b (white-pattern)", 3),
                alias("cow-c (black-pattern)", 4),
            ],
        }
    }
}

impl Profile {
    pub fn from_json(text: &str) -> Result<Self, TimelineError> {
        let profile: Profile =
            serde_json::from_str(text).map_err(|e| TimelineError::InvalidProfile(e.to_string()))?;
        profile.behaviors.validate()?;
        Ok(profile)
    }

    pub fn load(path: &Path) -> Result<Self, TimelineError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Case-insensitive alias lookup.
    pub fn alias(&self, name: &str) -> Option<&SubjectAlias> {
        let wanted = name.trim().to_lowercase();
        self.subjects
            .iter()
            .find(|s| s.name.to_lowercase() == wanted)
    }

    pub fn alias_for_column(&self, column: usize) -> Option<&str> {
        self.subjects
            .iter()
            .find(|s| s.column == column)
            .map(|s| s.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ordinals_are_stable() {
        let set = BehaviorSet::default();
        assert_eq!(set.len(), 7);
        assert_eq!(set.ordinal(Some("ยืน")), Some(0));
        assert_eq!(set.ordinal(Some(" ยืนติดรั้ว ")), Some(6));
        assert_eq!(set.ordinal(Some("eating")), Some(2));
        assert_eq!(set.ordinal(Some("เดิน")), None);
        assert_eq!(set.ordinal(None), None);
        assert_eq!(set.ordinal(Some("   ")), None);
    }

    #[test]
    fn test_missing_label_matches_unknown_behavior_when_configured() {
        let set = BehaviorSet::new(vec![
            Behavior::new("ยืน", "Standing"),
            Behavior::new(MISSING_LABEL, "Not recorded"),
        ])
        .unwrap();
        assert_eq!(set.ordinal(None), Some(1));
    }

    #[test]
    fn test_display_languages() {
        let set = BehaviorSet::default();
        assert_eq!(set.display(1, Language::Thai), "นอน");
        assert_eq!(set.display(1, Language::English), "Lying");
        assert_eq!(set.display(99, Language::English), MISSING_LABEL);
    }

    #[test]
    fn test_profile_json_round_trip_and_validation() {
        let text = r#"{
            "behaviors": [
                {"label": "graze", "english": "Grazing", "aliases": ["g"]},
                {"label": "rest", "english": "Resting"}
            ],
            "subjects": [{"name": "Daisy", "column": 2}]
        }"#;
        let profile = Profile::from_json(text).unwrap();
        assert_eq!(profile.behaviors.ordinal(Some("G")), Some(0));
        assert_eq!(profile.alias("daisy").map(|a| a.column), Some(2));
        assert_eq!(profile.alias_for_column(2), Some("Daisy"));

        let dup = r#"{"behaviors": [
            {"label": "a", "english": "A"}, {"label": "a", "english": "B"}
        ]}"#;
        assert!(matches!(
            Profile::from_json(dup),
            Err(TimelineError::InvalidProfile(_))
        ));
        assert!(Profile::from_json(r#"{"behaviors": []}"#).is_err());
    }
}
