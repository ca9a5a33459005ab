use super::outline::Outline;

pub const NODE_FEATURE_DIM: usize = 8;
pub const GROUP_FEATURE_DIM: usize = 8;

pub const NODE_FEATURE_NAMES: [&str; NODE_FEATURE_DIM] = [
    "level",
    "child_count",
    "sibling_count",
    "name_length",
    "word_count",
    "is_others",
    "is_leaf",
    "is_deep",
];

pub const GROUP_FEATURE_NAMES: [&str; GROUP_FEATURE_DIM] = [
    "child_count",
    "has_others",
    "parent_level",
    "has_grandchildren",
    "name_length",
    "is_type_segment",
    "is_application",
    "is_end_user",
];

fn flag(value: bool) -> f64 {
    if value { 1.0 } else { 0.0 }
}

/// Removal-model features for the segment at `index`.
pub fn node_features(outline: &Outline, index: usize) -> [f64; NODE_FEATURE_DIM] {
    let segment = &outline.segments()[index];
    let child_count = segment.children.len();

    [
        segment.level as f64,
        child_count as f64,
        outline.sibling_count(index) as f64,
        segment.name.chars().count() as f64,
        segment.name.split_whitespace().count() as f64,
        flag(segment.is_catch_all()),
        flag(child_count == 0),
        flag(segment.level >= 3),
    ]
}

/// Catch-all-model features for the sibling group under the segment at `index`.
pub fn group_features(outline: &Outline, index: usize) -> [f64; GROUP_FEATURE_DIM] {
    let segment = &outline.segments()[index];
    let lower = segment.name.to_lowercase();

    [
        segment.children.len() as f64,
        flag(outline.has_catch_all_child(index)),
        segment.level as f64,
        flag(outline.has_grandchildren(index)),
        segment.name.chars().count() as f64,
        flag(lower.contains("type")),
        flag(lower.contains("application")),
        flag(lower.contains("end")),
    ]
}
