//! Restaurant category taxonomy
//!
//! The remote catalog is queried once per (cell, minor category) pair. The
//! two-level taxonomy is fixed reference data: it is built once at start-up,
//! either from the built-in table or from the `[[taxonomy]]` config entries,
//! and then handed to the components that need it.

use crate::config::MajorCategoryEntry;
use std::collections::HashSet;

/// A minor category together with its parent major category
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub id: u32,
    pub name: String,
    pub major_id: u32,
    pub major_name: String,
}

/// A top-level category and the minor categories queried under it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MajorCategory {
    pub id: u32,
    pub name: String,
    pub minors: Vec<(u32, String)>,
}

/// Immutable two-level category taxonomy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Taxonomy {
    majors: Vec<MajorCategory>,
}

/// Built-in taxonomy: (major id, major name, [(minor id, minor name)])
const BUILT_IN: &[(u32, &str, &[(u32, &str)])] = &[
    (
        207,
        "全部快餐类",
        &[
            (208, "品牌快餐"),
            (209, "盖浇饭"),
            (210, "中式炒菜"),
            (211, "披萨意面"),
            (212, "汉堡"),
            (213, "米粉面馆"),
            (214, "麻辣烫"),
            (215, "包子粥店"),
            (216, "生煎锅贴"),
            (217, "饺子馄饨"),
            (218, "烧烤"),
            (219, "香锅"),
        ],
    ),
    (
        220,
        "全部正餐",
        &[
            (221, "川湘菜"),
            (222, "粤菜"),
            (223, "东北菜"),
            (224, "云南菜"),
            (225, "江浙菜"),
            (226, "西北菜"),
            (227, "鲁菜"),
            (228, "清真"),
            (229, "日韩料理"),
            (230, "西餐"),
            (231, "火锅"),
            (232, "海鲜"),
        ],
    ),
    (
        233,
        "全部零食",
        &[
            (234, "炸鸡炸串"),
            (235, "鸭脖卤味"),
            (236, "小龙虾"),
            (237, "地方小吃"),
            (238, "零食"),
        ],
    ),
    (
        239,
        "全部甜品饮品",
        &[(240, "饮品"), (241, "甜品"), (242, "咖啡"), (243, "点心")],
    ),
    (248, "全部蛋糕", &[(249, "蛋糕"), (250, "面包")]),
];

impl Taxonomy {
    pub fn new(majors: Vec<MajorCategory>) -> Self {
        Self { majors }
    }

    /// Builds a taxonomy from config entries, falling back to the built-in
    /// table when none are given
    pub fn from_config(entries: &[MajorCategoryEntry]) -> Self {
        if entries.is_empty() {
            return Self::default();
        }

        let majors = entries
            .iter()
            .map(|entry| MajorCategory {
                id: entry.id,
                name: entry.name.clone(),
                minors: entry
                    .minors
                    .iter()
                    .map(|minor| (minor.id, minor.name.clone()))
                    .collect(),
            })
            .collect();

        Self { majors }
    }

    pub fn majors(&self) -> &[MajorCategory] {
        &self.majors
    }

    /// Every (major, minor) pair in a stable order
    pub fn categories(&self) -> Vec<Category> {
        self.majors
            .iter()
            .flat_map(|major| {
                major.minors.iter().map(move |(id, name)| Category {
                    id: *id,
                    name: name.clone(),
                    major_id: major.id,
                    major_name: major.name.clone(),
                })
            })
            .collect()
    }

    /// Minor category ids, the values sent with each remote query
    pub fn minor_ids(&self) -> Vec<u32> {
        self.majors
            .iter()
            .flat_map(|major| major.minors.iter().map(|(id, _)| *id))
            .collect()
    }

    /// Returns the first category id used more than once, if any
    pub fn duplicate_id(&self) -> Option<u32> {
        let mut seen = HashSet::new();
        for major in &self.majors {
            if !seen.insert(major.id) {
                return Some(major.id);
            }
            for (id, _) in &major.minors {
                if !seen.insert(*id) {
                    return Some(*id);
                }
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.majors.iter().map(|m| m.minors.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Taxonomy {
    fn default() -> Self {
        let majors = BUILT_IN
            .iter()
            .map(|(id, name, minors)| MajorCategory {
                id: *id,
                name: name.to_string(),
                minors: minors
                    .iter()
                    .map(|(minor_id, minor_name)| (*minor_id, minor_name.to_string()))
                    .collect(),
            })
            .collect();

        Self { majors }
    }
}
