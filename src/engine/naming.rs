//! Labels for synthesized catch-all segments.

pub const DEFAULT_CATCH_ALL_LABEL: &str = "Others";

/// Parent-name keyword to catch-all label. Order breaks ties between equally long keywords.
const CATCH_ALL_LABELS: &[(&str, &str)] = &[
    ("application", "Other Applications"),
    ("applications", "Other Applications"),
    ("application type", "Other Applications"),
    ("application area", "Other Applications"),
    ("pathology type", "Other Types"),
    ("polymer type", "Other Types"),
    ("oven type", "Other Types"),
    ("technology", "Other Technologies"),
    ("end user", "Other End Users"),
    ("end-user", "Other End Users"),
    ("end users", "Other End Users"),
    ("end-users", "Other End Users"),
    ("end use", "Other Industries"),
    ("end-use", "Other Industries"),
    ("end use industry", "Other Industries"),
    ("end-use industry", "Other Industries"),
    ("end use industries", "Other Industries"),
    ("end-use industries", "Other Industries"),
    ("end user industry", "Other Industries"),
    ("end-user industry", "Other Industries"),
    ("industry", "Other Industries"),
    ("vertical", "Other Verticals"),
    ("material type", "Other Materials"),
    ("device type", "Other Device Types"),
    ("equipment type", "Other Equipment Types"),
    ("equipment types", "Other Equipment"),
    ("fuel type", "Other Fuels"),
    ("distribution channel", "Other Channels"),
    ("process", "Other Processes"),
    ("processes", "Other Processes"),
    ("method", "Other Methods"),
    ("production method", "Other Methods"),
    ("function", "Other Functions"),
    ("grade", "Other Grades"),
    ("vehicle type", DEFAULT_CATCH_ALL_LABEL),
    ("product type", DEFAULT_CATCH_ALL_LABEL),
    ("type", DEFAULT_CATCH_ALL_LABEL),
    ("form", DEFAULT_CATCH_ALL_LABEL),
    ("source", DEFAULT_CATCH_ALL_LABEL),
    ("component", DEFAULT_CATCH_ALL_LABEL),
    ("packaging type", DEFAULT_CATCH_ALL_LABEL),
    ("material", DEFAULT_CATCH_ALL_LABEL),
];

pub fn pick_catch_all_name(parent_name: &str) -> &'static str {
    let normalized = parent_name.trim().to_lowercase();

    if let Some((_, label)) = CATCH_ALL_LABELS
        .iter()
        .find(|(keyword, _)| *keyword == normalized)
    {
        return *label;
    }

    let mut best: Option<(&str, &'static str)> = None;
    for (keyword, label) in CATCH_ALL_LABELS {
        if !normalized.contains(keyword) {
            continue;
        }
        if best.is_none_or(|(current, _)| keyword.len() > current.len()) {
            best = Some((*keyword, *label));
        }
    }

    best.map(|(_, label)| label)
        .unwrap_or(DEFAULT_CATCH_ALL_LABEL)
}
