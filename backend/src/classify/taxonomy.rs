use lazy_static::lazy_static;
use shared::Priority;
use std::collections::HashMap;

pub const ROAD_DAMAGE: &str = "道路损坏";
pub const GARBAGE: &str = "垃圾堆积";
pub const ILLEGAL_CONSTRUCTION: &str = "违章建筑";
pub const POLLUTION: &str = "环境污染";
pub const FACILITY_DAMAGE: &str = "公共设施损坏";
pub const TRAFFIC: &str = "交通问题";
pub const OTHER: &str = "其他";

pub struct CategorySpec {
    pub name: &'static str,
    /// Lowercase literals, matched case-insensitively.
    pub keywords: &'static [&'static str],
}

/// Definition order doubles as the tie-break order when scores are equal.
pub const TAXONOMY: &[CategorySpec] = &[
    CategorySpec {
        name: ROAD_DAMAGE,
        keywords: &["道路", "路面", "裂缝", "坑洞", "坑洼", "塌陷", "井盖", "road", "pothole", "crack"],
    },
    CategorySpec {
        name: GARBAGE,
        keywords: &["垃圾", "废弃物", "堆积", "杂物", "脏乱", "trash", "garbage", "litter", "waste"],
    },
    CategorySpec {
        name: ILLEGAL_CONSTRUCTION,
        keywords: &["违章", "违建", "搭建", "施工", "建筑", "围挡", "construction", "illegal building"],
    },
    CategorySpec {
        name: POLLUTION,
        keywords: &["污染", "污水", "排放", "烟雾", "异味", "油污", "pollution", "smoke", "sewage"],
    },
    CategorySpec {
        name: FACILITY_DAMAGE,
        keywords: &["设施", "路灯", "护栏", "座椅", "损坏", "破损", "标识", "facility", "streetlight", "bench"],
    },
    CategorySpec {
        name: TRAFFIC,
        keywords: &["交通", "拥堵", "违停", "停车", "信号灯", "车辆", "traffic", "parking", "congestion"],
    },
];

lazy_static! {
    static ref PRIORITY_BY_CATEGORY: HashMap<&'static str, Priority> = {
        let mut m = HashMap::new();
        m.insert(ROAD_DAMAGE, Priority::High);
        m.insert(GARBAGE, Priority::Medium);
        m.insert(ILLEGAL_CONSTRUCTION, Priority::Medium);
        m.insert(POLLUTION, Priority::High);
        m.insert(FACILITY_DAMAGE, Priority::Medium);
        m.insert(TRAFFIC, Priority::High);
        m.insert(OTHER, Priority::Low);
        m
    };
}

pub fn priority_for(category: &str) -> Priority {
    PRIORITY_BY_CATEGORY
        .get(category)
        .copied()
        .unwrap_or(Priority::Low)
}

/// Total literal keyword occurrences per category, in taxonomy order.
pub fn score_categories(text: &str) -> Vec<(&'static CategorySpec, usize)> {
    let lowered = text.to_lowercase();
    TAXONOMY
        .iter()
        .map(|entry| {
            let score = entry
                .keywords
                .iter()
                .map(|kw| lowered.matches(kw).count())
                .sum();
            (entry, score)
        })
        .collect()
}

/// Highest-scoring category; earliest in taxonomy order on ties. `None` when
/// nothing matched.
pub fn best_category(scores: &[(&'static CategorySpec, usize)]) -> Option<(&'static CategorySpec, usize)> {
    let mut best: Option<(&'static CategorySpec, usize)> = None;
    for &(entry, score) in scores {
        if score == 0 {
            continue;
        }
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((entry, score)),
        }
    }
    best
}
