//! Sections: virtual-path-rooted policy zones carrying ratio and
//! accounting overrides.

use serde::{Deserialize, Serialize};

fn default_ratio_unit() -> u32 {
    1
}

/// A section definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    /// Canonical name; stored upper-case, unique.
    pub name: String,
    /// Alternative names accepted by SITE commands.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Virtual root prefix; must start with `/`.
    pub virtual_root: String,
    /// Downloads in this section are not charged.
    #[serde(default)]
    pub free_leech: bool,
    /// Upload unit of the ratio (`upload:download`).
    #[serde(default = "default_ratio_unit")]
    pub ratio_ul_unit: u32,
    /// Download unit of the ratio.
    #[serde(default = "default_ratio_unit")]
    pub ratio_dl_unit: u32,
    /// Credit penalty multiplier applied by SITE NUKE.
    #[serde(default)]
    pub nuke_multiplier: Option<f64>,
}

impl Section {
    fn root_section() -> Section {
        Section {
            name: "DEFAULT".to_string(),
            aliases: Vec::new(),
            virtual_root: "/".to_string(),
            free_leech: false,
            ratio_ul_unit: 1,
            ratio_dl_unit: 1,
            nuke_multiplier: None,
        }
    }

    /// The ratio as `(upload_unit, download_unit)`.
    pub fn ratio(&self) -> (u32, u32) {
        (self.ratio_ul_unit, self.ratio_dl_unit)
    }
}

/// All configured sections, ready for path and name lookups.
#[derive(Debug, Clone)]
pub struct SectionMap {
    // Sorted by virtual-root length descending; lookup returns the first
    // case-insensitive prefix match.
    sections: Vec<Section>,
    default: Section,
}

impl Default for SectionMap {
    fn default() -> Self {
        SectionMap::new(Vec::new())
    }
}

impl SectionMap {
    /// Build a map from configured sections. Names are canonicalized to
    /// upper case; invalid roots (not starting with `/`) are dropped.
    pub fn new(sections: Vec<Section>) -> SectionMap {
        let mut sections: Vec<Section> = sections
            .into_iter()
            .filter(|s| s.virtual_root.starts_with('/') && s.ratio_ul_unit > 0 && s.ratio_dl_unit > 0)
            .map(|mut s| {
                s.name = s.name.to_uppercase();
                s
            })
            .collect();
        sections.sort_by(|a, b| b.virtual_root.len().cmp(&a.virtual_root.len()));
        SectionMap { sections, default: Section::root_section() }
    }

    /// Resolve the section owning `virt`; the default root section when
    /// nothing matches.
    pub fn resolve(&self, virt: &str) -> &Section {
        let lowered = virt.to_lowercase();
        self.sections
            .iter()
            .find(|s| lowered.starts_with(&s.virtual_root.to_lowercase()))
            .unwrap_or(&self.default)
    }

    /// Look a section up by canonical name or alias, case-insensitively.
    pub fn by_name(&self, name: &str) -> Option<&Section> {
        let upper = name.to_uppercase();
        self.sections
            .iter()
            .find(|s| s.name == upper || s.aliases.iter().any(|a| a.to_uppercase() == upper))
    }

    /// All configured sections in resolution order.
    pub fn all(&self) -> &[Section] {
        &self.sections
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sections() -> SectionMap {
        SectionMap::new(vec![
            Section {
                name: "archive".to_string(),
                aliases: vec!["arch".to_string()],
                virtual_root: "/archive".to_string(),
                free_leech: false,
                ratio_ul_unit: 1,
                ratio_dl_unit: 3,
                nuke_multiplier: Some(3.0),
            },
            Section {
                name: "ARCHIVE-0DAY".to_string(),
                aliases: vec![],
                virtual_root: "/archive/0day".to_string(),
                free_leech: true,
                ratio_ul_unit: 1,
                ratio_dl_unit: 1,
                nuke_multiplier: None,
            },
        ])
    }

    #[test]
    fn longest_root_wins() {
        let map = sections();
        assert_eq!(map.resolve("/archive/0day/rel").name, "ARCHIVE-0DAY");
        assert_eq!(map.resolve("/archive/other").name, "ARCHIVE");
    }

    #[test]
    fn resolution_is_case_insensitive() {
        let map = sections();
        assert_eq!(map.resolve("/ARCHIVE/REL").name, "ARCHIVE");
    }

    #[test]
    fn unmatched_paths_get_default_section() {
        let map = sections();
        let default = map.resolve("/elsewhere");
        assert_eq!(default.name, "DEFAULT");
        assert_eq!(default.ratio(), (1, 1));
    }

    #[test]
    fn name_and_alias_lookup() {
        let map = sections();
        assert!(map.by_name("archive").is_some());
        assert!(map.by_name("ARCH").is_some());
        assert!(map.by_name("nope").is_none());
    }
}
