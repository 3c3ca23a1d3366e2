//! Helpers over the `Vec<Vec<String>>` tag representation.

pub fn tag_name(tag: &[String]) -> Option<&str> {
    tag.first().map(String::as_str)
}

pub fn tag_field(tag: &[String], index: usize) -> Option<&str> {
    tag.get(index).map(String::as_str)
}

pub(crate) fn is_tag(tag: &[String], name: &str) -> bool {
    matches!(tag_name(tag), Some(tag_name) if tag_name == name)
}

/// A tag carries a value when its first field is present and non-empty.
pub fn has_value(tag: &[String]) -> bool {
    tag_field(tag, 1).is_some_and(|value| !value.is_empty())
}

/// Drop every tag without a value, preserving order.
pub fn retain_valued_tags(tags: &mut Vec<Vec<String>>) {
    tags.retain(|tag| has_value(tag));
}

pub fn find_tag_value<'a>(tags: &'a [Vec<String>], name: &str) -> Option<&'a str> {
    tags.iter()
        .find(|tag| is_tag(tag, name) && has_value(tag))
        .and_then(|tag| tag_field(tag, 1))
}

pub fn collect_tag_values(tags: &[Vec<String>], name: &str) -> Vec<String> {
    tags.iter()
        .filter(|tag| is_tag(tag, name) && has_value(tag))
        .filter_map(|tag| tag_field(tag, 1).map(str::to_owned))
        .collect()
}
