use crate::error::{ExpenseError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

pub const UNKNOWN_CATEGORY: &str = "Unknown";
pub const DEFAULT_GROUP_COLOR: &str = "#9E9E9E";

const DEFAULT_MAPPINGS: &[(&str, &str)] = &[
    ("grocery", "Food"),
    ("snacks", "Food"),
    ("cafe", "Food"),
    ("coffee", "Food"),
    ("café", "Food"),
    ("bento", "Food"),
    ("beverage", "Food"),
    ("eating from combini", "Food"),
    ("eating out", "Food"),
    ("eating with friend", "Food"),
    ("housing", "Housing and Utilities"),
    ("utility", "Housing and Utilities"),
    ("internet bill", "Housing and Utilities"),
    ("electricity bill", "Housing and Utilities"),
    ("gas bill", "Housing and Utilities"),
    ("water & sewage bill", "Housing and Utilities"),
    ("phone bill", "Housing and Utilities"),
    ("water", "Housing and Utilities"),
    ("clothing", "Household and Clothing"),
    ("household", "Household and Clothing"),
    ("furniture", "Electronics and Furniture"),
    ("electronics", "Electronics and Furniture"),
    ("supplements", "Fitness"),
    ("shoes", "Fitness"),
    ("sports event", "Fitness"),
    ("sports watch", "Fitness"),
    ("sports clothing", "Fitness"),
    ("sports rental", "Fitness"),
    ("gym", "Fitness"),
    ("sports equipment", "Fitness"),
    ("basketball game", "Fitness"),
    ("footbal game", "Fitness"),
    ("futsal game", "Fitness"),
    ("commute", "Transportation"),
    ("ride share", "Transportation"),
    ("tokyo metro", "Transportation"),
    ("flight tickets", "Transportation"),
    ("cable car", "Transportation"),
    ("bus", "Transportation"),
    ("shinkansen", "Transportation"),
    ("car rental", "Transportation"),
    ("taxi", "Transportation"),
    ("stay", "Transportation"),
    ("souvenirs", "Souvenirs/Gifts/Treats"),
    ("treat", "Souvenirs/Gifts/Treats"),
    ("gift", "Souvenirs/Gifts/Treats"),
    ("medicines", "Miscellaneous"),
    ("personal care", "Miscellaneous"),
    ("misc", "Miscellaneous"),
    ("books", "Miscellaneous"),
    ("help", "Miscellaneous"),
    ("charity", "Miscellaneous"),
    ("donation", "Miscellaneous"),
    ("entrance fees", "Miscellaneous"),
    ("park entrance fees", "Miscellaneous"),
    ("healthcare", "Miscellaneous"),
    ("entertainment", "Entertainment"),
    ("nomikai", "Entertainment"),
    ("activities", "Entertainment"),
    ("arcades & karaoke", "Entertainment"),
    ("events & venues", "Entertainment"),
    ("education", "Education"),
];

const DEFAULT_COLORS: &[(&str, &str)] = &[
    ("Food", "#FF6384"),
    ("Housing and Utilities", "#36A2EB"),
    ("Household and Clothing", "#FFCE56"),
    ("Electronics and Furniture", "#4BC0C0"),
    ("Fitness", "#9966FF"),
    ("Transportation", "#FF9F40"),
    ("Souvenirs/Gifts/Treats", "#C9CBCF"),
    ("Miscellaneous", "#8D6E63"),
    ("Entertainment", "#E91E63"),
    ("Education", "#00A676"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// `Grocery`, `grocery` and `GROCERY` resolve to the same group.
    #[default]
    CaseInsensitive,
    /// Only the exact label resolves.
    CaseSensitive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MappingEntry {
    #[schemars(description = "Raw category label as it appears in the spreadsheet")]
    pub category: String,
    #[schemars(description = "Broad group the label belongs to")]
    pub group: String,
}

/// On-disk shape of a static category mapping file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CategoryMappingFile {
    #[serde(default)]
    pub match_mode: MatchMode,
    #[schemars(description = "Ordered entries; the first entry wins when labels collide")]
    pub mappings: Vec<MappingEntry>,
    #[serde(default)]
    #[schemars(description = "Display color per broad group (CSS hex)")]
    pub colors: BTreeMap<String, String>,
    #[serde(default)]
    pub fallback_color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryGroup {
    pub group: String,
    pub color: String,
}

#[derive(Debug, Clone)]
pub struct CategoryMapper {
    match_mode: MatchMode,
    entries: Vec<MappingEntry>,
    index: HashMap<String, usize>,
    colors: BTreeMap<String, String>,
    fallback_color: String,
}

impl Default for CategoryMapper {
    fn default() -> Self {
        let entries = DEFAULT_MAPPINGS
            .iter()
            .map(|(category, group)| MappingEntry {
                category: category.to_string(),
                group: group.to_string(),
            })
            .collect();
        let colors = DEFAULT_COLORS
            .iter()
            .map(|(group, color)| (group.to_string(), color.to_string()))
            .collect();

        Self::new(entries, colors, MatchMode::default())
    }
}

impl CategoryMapper {
    pub fn new(
        entries: Vec<MappingEntry>,
        colors: BTreeMap<String, String>,
        match_mode: MatchMode,
    ) -> Self {
        let mut mapper = Self {
            match_mode,
            entries,
            index: HashMap::new(),
            colors,
            fallback_color: DEFAULT_GROUP_COLOR.to_string(),
        };
        mapper.rebuild_index();
        mapper
    }

    pub fn from_file(file: CategoryMappingFile) -> Result<Self> {
        for (idx, entry) in file.mappings.iter().enumerate() {
            if entry.category.trim().is_empty() || entry.group.trim().is_empty() {
                return Err(ExpenseError::InvalidConfig(format!(
                    "Mapping entry #{} has an empty category or group",
                    idx
                )));
            }
        }

        let mut mapper = Self::new(file.mappings, file.colors, file.match_mode);
        if let Some(color) = file.fallback_color {
            mapper.fallback_color = color;
        }
        Ok(mapper)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let file: CategoryMappingFile = serde_json::from_str(json)?;
        Self::from_file(file)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn with_match_mode(mut self, match_mode: MatchMode) -> Self {
        self.match_mode = match_mode;
        self.rebuild_index();
        self
    }

    fn index_key(&self, label: &str) -> String {
        match self.match_mode {
            MatchMode::CaseInsensitive => label.trim().to_lowercase(),
            MatchMode::CaseSensitive => label.trim().to_string(),
        }
    }

    fn rebuild_index(&mut self) {
        let mut index = HashMap::with_capacity(self.entries.len());
        for (position, entry) in self.entries.iter().enumerate() {
            // First entry wins on colliding labels.
            index
                .entry(self.index_key(&entry.category))
                .or_insert(position);
        }
        self.index = index;
    }

    pub fn match_mode(&self) -> MatchMode {
        self.match_mode
    }

    pub fn entries(&self) -> &[MappingEntry] {
        &self.entries
    }

    pub fn lookup(&self, raw_category: &str) -> Option<CategoryGroup> {
        let position = self.index.get(&self.index_key(raw_category))?;
        let group = self.entries[*position].group.clone();
        let color = self.color_for(&group).to_string();
        Some(CategoryGroup { group, color })
    }

    /// Broad group for a raw label. Unmapped labels pass through unchanged and
    /// blank labels become [`UNKNOWN_CATEGORY`].
    pub fn map_category(&self, raw_category: &str) -> String {
        let trimmed = raw_category.trim();
        if trimmed.is_empty() {
            return UNKNOWN_CATEGORY.to_string();
        }
        match self.lookup(trimmed) {
            Some(found) => found.group,
            None => trimmed.to_string(),
        }
    }

    pub fn color_for(&self, group: &str) -> &str {
        self.colors
            .get(group)
            .map(String::as_str)
            .unwrap_or(&self.fallback_color)
    }

    pub fn fallback_color(&self) -> &str {
        &self.fallback_color
    }

    /// Distinct broad groups, sorted.
    pub fn groups(&self) -> Vec<String> {
        let mut groups: Vec<String> = self.entries.iter().map(|e| e.group.clone()).collect();
        groups.sort();
        groups.dedup();
        groups
    }

    pub fn to_file(&self) -> CategoryMappingFile {
        CategoryMappingFile {
            match_mode: self.match_mode,
            mappings: self.entries.clone(),
            colors: self.colors.clone(),
            fallback_color: Some(self.fallback_color.clone()),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_file())?)
    }
}
