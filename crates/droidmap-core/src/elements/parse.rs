//! Tolerant UI-tree scanner.
//!
//! Device dumps are not guaranteed to be well-formed XML: they get truncated
//! mid-write, carry stray control characters, or interleave status lines from
//! the dump tool. Instead of a strict parser this module scans for `<node …>`
//! opening tags and pulls attributes out of each one independently, so one
//! bad fragment never costs the rest of the screen.
//!
//! Elements with none of text, resource-id or content-desc are noise (layout
//! containers) and are dropped.

use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::elements::analyze::importance;
use crate::elements::{Bounds, Element, ElementFlags};

/// Fallback title when no heading-like element is found.
pub const UNTITLED: &str = "untitled";

/// Maximum dump size processed. Larger input is truncated before scanning.
const MAX_DUMP_LEN: usize = 8 * 1024 * 1024;

fn node_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<node\b([^>]*)>").expect("node pattern is valid"))
}

fn attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"([A-Za-z_][\w\-:.]*)\s*=\s*"([^"]*)""#).expect("attribute pattern is valid")
    })
}

fn bounds_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[\s*(-?\d+)\s*,\s*(-?\d+)\s*\]\s*\[\s*(-?\d+)\s*,\s*(-?\d+)\s*\]")
            .expect("bounds pattern is valid")
    })
}

fn activity_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"package="([^"]+)"\s+activity="([^"]+)""#).expect("activity pattern is valid")
    })
}

/// Parse a raw UI-tree dump into elements, in document order.
///
/// Never fails: malformed fragments are skipped and logged.
pub fn parse_hierarchy(dump: &str) -> Vec<Element> {
    let dump = truncate_to_boundary(dump, MAX_DUMP_LEN);

    let mut elements = Vec::new();
    let mut fragments = 0usize;
    let mut skipped = 0usize;

    for caps in node_regex().captures_iter(dump) {
        fragments += 1;
        let body = caps.get(1).map_or("", |m| m.as_str());
        match parse_node(body) {
            Some(element) => elements.push(element),
            None => skipped += 1,
        }
    }

    let opened = dump.matches("<node").count();
    if opened > fragments {
        warn!(
            "{} node fragment(s) were not terminated and were ignored",
            opened - fragments
        );
    }
    debug!(
        "Parsed {} element(s) from {} fragment(s), {} skipped",
        elements.len(),
        fragments,
        skipped
    );

    elements
}

/// Parse the attribute body of one `<node …>` tag.
///
/// Returns `None` for fragments that carry no attributes or that have none of
/// the identifying attributes.
fn parse_node(body: &str) -> Option<Element> {
    let mut element = Element::default();
    let mut flags = ElementFlags::default();
    let mut editable_attr: Option<bool> = None;
    let mut saw_attribute = false;

    for caps in attr_regex().captures_iter(body) {
        saw_attribute = true;
        let name = &caps[1];
        let value = decode_entities(&caps[2]);

        match name {
            "text" => element.text = Some(value),
            "resource-id" => element.resource_id = Some(value),
            "content-desc" => element.content_desc = Some(value),
            "class" => element.class_name = Some(value),
            "package" => element.package = Some(value),
            "bounds" => {
                element.bounds = parse_bounds(&value);
                if element.bounds.is_none() {
                    debug!("Dropping malformed bounds '{}'", value);
                }
            }
            "clickable" => flags.clickable = is_true(&value),
            "long-clickable" => flags.long_clickable = is_true(&value),
            "scrollable" => flags.scrollable = is_true(&value),
            "enabled" => flags.enabled = is_true(&value),
            "focusable" => flags.focusable = is_true(&value),
            "focused" => flags.focused = is_true(&value),
            "selected" => flags.selected = is_true(&value),
            "checkable" => flags.checkable = is_true(&value),
            "checked" => flags.checked = is_true(&value),
            "password" => flags.password = is_true(&value),
            "editable" => editable_attr = Some(is_true(&value)),
            _ => {
                element.extra.insert(name.to_string(), value);
            }
        }
    }

    if !saw_attribute {
        debug!("Skipping node fragment without attributes");
        return None;
    }

    if element.text().is_none() && element.resource_id().is_none() && element.content_desc().is_none()
    {
        return None;
    }

    element.editable = editable_attr.or_else(|| infer_editable(&element, &flags));
    element.flags = flags;
    element.importance = importance(&element);
    Some(element)
}

/// Editability when the dump has no explicit attribute.
fn infer_editable(element: &Element, flags: &ElementFlags) -> Option<bool> {
    let is_edit_class = element
        .class_name()
        .is_some_and(|c| c.to_ascii_lowercase().contains("edittext"));
    if is_edit_class || flags.password {
        Some(true)
    } else {
        None
    }
}

/// Parse a bounds string of the form `[x1,y1][x2,y2]`.
pub fn parse_bounds(value: &str) -> Option<Bounds> {
    let caps = bounds_regex().captures(value)?;
    let num = |i: usize| caps.get(i)?.as_str().parse::<i32>().ok();
    Some(Bounds::new(num(1)?, num(2)?, num(3)?, num(4)?))
}

fn is_true(value: &str) -> bool {
    value.eq_ignore_ascii_case("true")
}

/// Decode the XML entities device dumps actually emit.
///
/// Unknown or malformed entities are left as-is.
fn decode_entities(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let Some(semi) = tail.find(';').filter(|&i| i <= 10) else {
            out.push('&');
            rest = &tail[1..];
            continue;
        };
        let entity = &tail[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => decode_numeric_entity(entity),
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_numeric_entity(entity: &str) -> Option<char> {
    let digits = entity.strip_prefix('#')?;
    let code = match digits.strip_prefix(['x', 'X']) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<u32>().ok()?,
    };
    char::from_u32(code)
}

fn truncate_to_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    warn!("UI dump of {} bytes truncated to {} bytes", text.len(), max);
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Activity name embedded in a dump, if the dump tool recorded one.
pub fn extract_activity_name(dump: &str) -> Option<String> {
    activity_regex()
        .captures(dump)
        .map(|caps| caps[2].to_string())
}

/// Pick a page title from parsed elements.
///
/// Looks for the first non-empty text on, in order: a class mentioning
/// "title", a resource id mentioning "title", a `TextView`, a class
/// mentioning "label". Falls back to [`UNTITLED`].
pub fn extract_title(elements: &[Element]) -> String {
    let passes: [fn(&Element) -> bool; 4] = [
        |e| contains_ci(e.class_name(), "title"),
        |e| contains_ci(e.resource_id(), "title"),
        |e| contains_ci(e.class_name(), "textview"),
        |e| contains_ci(e.class_name(), "label"),
    ];

    passes
        .iter()
        .find_map(|pass| {
            elements
                .iter()
                .filter(|e| pass(e))
                .find_map(|e| e.text().map(str::trim).filter(|t| !t.is_empty()))
        })
        .map_or_else(|| UNTITLED.to_string(), str::to_string)
}

fn contains_ci(value: Option<&str>, needle: &str) -> bool {
    value.is_some_and(|v| v.to_lowercase().contains(needle))
}
