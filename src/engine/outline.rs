//! Flat numbered outlines and their hierarchical form.
//!
//! An outline line is either `"<numbering>. <name>"` (for example `"2.1.3. Cold Storage"`)
//! or a bare header without a numeric prefix. Bare lines have level 0: they are kept
//! verbatim by every stage and never take part in parent/child links.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static NUMBERED_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+(?:\.\d+)*)\.\s+(.*)$").expect("invalid outline numbering regex")
});

static PAGE_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*\((?:p|pp|pg|page|pages)\.?\s*\d+(?:\s*[-–]\s*\d+)?\)\s*$")
        .expect("invalid page reference regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Dot-separated path such as `1.2.3`; empty for level-0 lines.
    pub numbering: String,
    pub name: String,
    pub level: usize,
    pub parent_numbering: Option<String>,
    /// Position of the linked parent in the flat list. Resolved by numbering prefix, or, when
    /// that prefix never appeared earlier, by the nearest earlier segment of a lower level.
    pub parent: Option<usize>,
    /// Positions of linked children, in flat-list order.
    pub children: Vec<usize>,
    /// The input line as given.
    pub line: String,
}

impl Segment {
    pub fn is_catch_all(&self) -> bool {
        is_catch_all_name(&self.name)
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Outline {
    segments: Vec<Segment>,
}

impl Outline {
    pub fn parse<S: AsRef<str>>(lines: &[S]) -> Self {
        let mut segments = Vec::<Segment>::with_capacity(lines.len());
        let mut by_numbering = HashMap::<String, usize>::new();

        for raw in lines {
            let raw = raw.as_ref();
            let index = segments.len();

            let Some((numbering, name)) = split_numbered(raw) else {
                segments.push(Segment {
                    numbering: String::new(),
                    name: raw.trim().to_string(),
                    level: 0,
                    parent_numbering: None,
                    parent: None,
                    children: Vec::new(),
                    line: raw.to_string(),
                });
                continue;
            };

            let level = numbering.split('.').count();
            let parent_numbering = parent_numbering_of(numbering);
            let parent = parent_numbering
                .as_deref()
                .and_then(|key| by_numbering.get(key).copied())
                .or_else(|| nearest_shallower(&segments, level));

            if let Some(parent_index) = parent {
                segments[parent_index].children.push(index);
            }

            segments.push(Segment {
                numbering: numbering.to_string(),
                name,
                level,
                parent_numbering,
                parent,
                children: Vec::new(),
                line: raw.to_string(),
            });
            by_numbering.insert(numbering.to_string(), index);
        }

        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn children(&self, index: usize) -> impl Iterator<Item = &Segment> + '_ {
        self.segments[index]
            .children
            .iter()
            .map(move |child| &self.segments[*child])
    }

    /// Segments that have at least one linked child, in flat-list order.
    pub fn groups(&self) -> impl Iterator<Item = (usize, &Segment)> + '_ {
        self.segments
            .iter()
            .enumerate()
            .filter(|(_, segment)| !segment.children.is_empty())
    }

    pub fn has_catch_all_child(&self, index: usize) -> bool {
        self.children(index).any(Segment::is_catch_all)
    }

    pub fn has_grandchildren(&self, index: usize) -> bool {
        self.children(index).any(|child| !child.children.is_empty())
    }

    /// Number of children of this segment's parent, 0 when unlinked.
    pub fn sibling_count(&self, index: usize) -> usize {
        self.segments[index]
            .parent
            .map(|parent| self.segments[parent].children.len())
            .unwrap_or(0)
    }

    /// Position of the last flat-list entry inside this segment's subtree.
    pub fn subtree_end(&self, index: usize) -> usize {
        let mut end = index;
        let mut stack = vec![index];
        while let Some(current) = stack.pop() {
            end = end.max(current);
            stack.extend(self.segments[current].children.iter().copied());
        }
        end
    }

    #[cfg(test)]
    pub fn flatten(&self) -> Vec<String> {
        self.segments
            .iter()
            .map(|segment| {
                if segment.level == 0 {
                    segment.line.clone()
                } else {
                    format_line(&segment.numbering, &segment.name)
                }
            })
            .collect()
    }
}

fn nearest_shallower(earlier: &[Segment], level: usize) -> Option<usize> {
    earlier
        .iter()
        .rposition(|previous| previous.level > 0 && previous.level < level)
}

pub fn is_catch_all_name(name: &str) -> bool {
    name.to_lowercase().contains("other")
}

pub fn format_line(numbering: &str, name: &str) -> String {
    format!("{numbering}. {name}")
}

/// `"1.2. Foo (p. 4)"` -> `Some(("1.2", "Foo"))`; unnumbered lines yield `None`.
pub fn split_numbered(line: &str) -> Option<(&str, String)> {
    let captures = NUMBERED_LINE.captures(line)?;
    let numbering = captures.get(1)?.as_str();
    let rest = captures.get(2).map(|value| value.as_str()).unwrap_or("");
    let name = PAGE_REFERENCE.replace(rest, "").trim().to_string();
    Some((numbering, name))
}

pub fn strip_numbering(line: &str) -> String {
    split_numbered(line)
        .map(|(_, name)| name)
        .unwrap_or_else(|| line.trim().to_string())
}

pub fn parent_numbering_of(numbering: &str) -> Option<String> {
    numbering
        .rsplit_once('.')
        .map(|(parent, _)| parent.to_string())
}

/// `1.2.3` -> `1.2.4`
pub fn next_sibling_numbering(numbering: &str) -> String {
    let (prefix, last) = match numbering.rsplit_once('.') {
        Some((prefix, last)) => (Some(prefix), last),
        None => (None, numbering),
    };
    let next = last.parse::<u64>().map(|value| value + 1).unwrap_or(1);
    match prefix {
        Some(prefix) => format!("{prefix}.{next}"),
        None => next.to_string(),
    }
}

/// Rewrites numbering so every sibling run is contiguous and starts at 1.
///
/// The tree is rebuilt first: a segment hangs under the latest earlier segment carrying its
/// parent numbering, or, when that prefix was never seen, under the nearest earlier segment
/// of a lower level. Level-0 lines stay attached to the line they followed. The tree is then
/// walked depth-first, so a reordered but consistently numbered outline still comes out with
/// every child directly under its parent.
pub fn renumber<S: AsRef<str>>(lines: &[S]) -> Vec<String> {
    let outline = Outline::parse(lines);
    let segments = outline.segments();
    if segments.is_empty() {
        return Vec::new();
    }

    let mut roots = Vec::<usize>::new();
    let mut attached = vec![Vec::<usize>::new(); segments.len()];
    let mut passthrough_anchor: Option<usize> = None;

    for (index, segment) in segments.iter().enumerate() {
        let anchor = if segment.level == 0 {
            if index > 0 && segments[index - 1].level > 0 {
                passthrough_anchor = Some(index - 1);
            }
            passthrough_anchor
        } else {
            passthrough_anchor = None;
            segment.parent
        };

        match anchor {
            Some(parent) => attached[parent].push(index),
            None => roots.push(index),
        }
    }

    let mut out = Vec::<String>::with_capacity(segments.len());
    let mut stack = Vec::<(usize, String)>::new();
    push_children(&mut stack, segments, &roots, "");

    while let Some((index, numbering)) = stack.pop() {
        let segment = &segments[index];
        if segment.level == 0 {
            out.push(segment.line.clone());
        } else {
            out.push(format_line(&numbering, &segment.name));
        }
        push_children(&mut stack, segments, &attached[index], &numbering);
    }

    out
}

fn push_children(
    stack: &mut Vec<(usize, String)>,
    segments: &[Segment],
    children: &[usize],
    parent_numbering: &str,
) {
    let mut counter = 0usize;
    let mut numbered = Vec::<(usize, String)>::with_capacity(children.len());
    for child in children {
        if segments[*child].level == 0 {
            numbered.push((*child, parent_numbering.to_string()));
            continue;
        }
        counter += 1;
        let numbering = if parent_numbering.is_empty() {
            counter.to_string()
        } else {
            format!("{parent_numbering}.{counter}")
        };
        numbered.push((*child, numbering));
    }
    stack.extend(numbered.into_iter().rev());
}

/// Flattens the generator's nested JSON (`{"segments": [{"name", "subsegments"}]}` or a bare
/// array of such objects) into numbered lines.
pub fn flatten_nested(value: &Value) -> Vec<String> {
    let mut out = Vec::<String>::new();
    let roots = match value {
        Value::Object(map) => map.get("segments").and_then(Value::as_array),
        Value::Array(items) => Some(items),
        _ => None,
    };
    if let Some(items) = roots {
        flatten_nested_into(items, "", &mut out);
    }
    out
}

// Items without a name are dropped together with their subsegments and take no number.
fn flatten_nested_into(items: &[Value], prefix: &str, out: &mut Vec<String>) {
    let named = items.iter().filter_map(|item| {
        let name = item.get("name").and_then(Value::as_str).map(str::trim)?;
        (!name.is_empty()).then_some((name, item))
    });

    for (position, (name, item)) in named.enumerate() {
        let numbering = if prefix.is_empty() {
            (position + 1).to_string()
        } else {
            format!("{prefix}.{}", position + 1)
        };
        out.push(format_line(&numbering, name));

        if let Some(children) = item.get("subsegments").and_then(Value::as_array) {
            flatten_nested_into(children, &numbering, out);
        }
    }
}
