use serde::{Deserialize, Serialize};

// IBGE 2022: CD_SETOR, e.g. "310010405000001"
pub type SectorCode = String;

/// Levels of the geographic hierarchy, outermost first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Level {
    /// Intermediate geographic region (NM_RGINT)
    Region,
    Municipality,
    District,
    Neighborhood,
}

impl Level {
    pub const ALL: [Level; 4] = [
        Level::Region,
        Level::Municipality,
        Level::District,
        Level::Neighborhood,
    ];

    /// Attribute name carried by the sector layer for this level.
    pub fn column(self) -> &'static str {
        match self {
            Level::Region => "NM_RGINT",
            Level::Municipality => "NM_MUN",
            Level::District => "NM_DIST",
            Level::Neighborhood => "NM_BAIRRO",
        }
    }

    pub fn parent(self) -> Option<Level> {
        match self {
            Level::Region => None,
            Level::Municipality => Some(Level::Region),
            Level::District => Some(Level::Municipality),
            Level::Neighborhood => Some(Level::District),
        }
    }

    pub fn child(self) -> Option<Level> {
        match self {
            Level::Region => Some(Level::Municipality),
            Level::Municipality => Some(Level::District),
            Level::District => Some(Level::Neighborhood),
            Level::Neighborhood => None,
        }
    }

    fn depth(self) -> usize {
        self as usize
    }

    /// Every level strictly below this one.
    pub fn descendants(self) -> impl Iterator<Item = Level> {
        Level::ALL.into_iter().skip(self.depth() + 1)
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Level::Region => "region",
            Level::Municipality => "municipality",
            Level::District => "district",
            Level::Neighborhood => "neighborhood",
        };
        f.write_str(name)
    }
}

/// The choice made at one hierarchy level.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Choice<T> {
    Unselected,
    Selected(T),
}

impl<T> Default for Choice<T> {
    fn default() -> Self {
        Choice::Unselected
    }
}

impl<T> Choice<T> {
    pub fn is_selected(&self) -> bool {
        matches!(self, Choice::Selected(_))
    }

    pub fn selected(&self) -> Option<&T> {
        match self {
            Choice::Selected(value) => Some(value),
            Choice::Unselected => None,
        }
    }
}

impl<T> From<Option<T>> for Choice<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Choice::Unselected, Choice::Selected)
    }
}

/// Hierarchy membership of a single sector. Any level may be missing in the source data.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hierarchy {
    pub region: Option<String>,
    pub municipality: Option<String>,
    pub district: Option<String>,
    pub neighborhood: Option<String>,
}

impl Hierarchy {
    pub fn name(&self, level: Level) -> Option<&str> {
        match level {
            Level::Region => self.region.as_deref(),
            Level::Municipality => self.municipality.as_deref(),
            Level::District => self.district.as_deref(),
            Level::Neighborhood => self.neighborhood.as_deref(),
        }
    }

    pub fn set(&mut self, level: Level, name: Option<String>) {
        let slot = match level {
            Level::Region => &mut self.region,
            Level::Municipality => &mut self.municipality,
            Level::District => &mut self.district,
            Level::Neighborhood => &mut self.neighborhood,
        };
        *slot = name;
    }
}
