//! Prompt tag helpers.
//!
//! A prompt may contain a single `{tag}` placeholder whose value comes from
//! a sibling choice field, e.g. `"Progress toward {tgt_type} target"`. The
//! assembler resolves the tag value (walking parent rows when needed), maps
//! it through the tag field's choice list and interpolates it here.

/// Extract the tag key from a prompt: the content of the first `{...}`
/// placeholder, if any.
///
/// Only one tag per prompt is supported.
pub fn tag_key(prompt: &str) -> Option<&str> {
    let start = prompt.find('{')?;
    let end = prompt[start..].find('}')? + start;
    let key = &prompt[start + 1..end];
    if key.is_empty() {
        None
    } else {
        Some(key)
    }
}

/// Interpolate the resolved tag value into the prompt.
pub fn interpolate(prompt: &str, key: &str, value: &str) -> String {
    prompt.replace(&format!("{{{key}}}"), value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_tag() {
        assert_eq!(tag_key("Progress toward {tgt_type} target"), Some("tgt_type"));
        assert_eq!(tag_key("No placeholder here"), None);
        assert_eq!(tag_key("Empty {} braces"), None);
    }

    #[test]
    fn interpolates_tag_value() {
        assert_eq!(
            interpolate("Progress toward {tgt_type} target", "tgt_type", "absolute"),
            "Progress toward absolute target"
        );
    }
}
