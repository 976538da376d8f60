//! Custom image tags with an auto-increasing counter.

use serde::{Deserialize, Serialize};

pub const COUNTER_PLACEHOLDER: &str = "{X}";
pub const ENTITY_KEY_CI_PIPELINE: &str = "ci_pipeline_id";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomTag {
    pub id: i64,
    pub entity_key: String,
    pub entity_value: String,
    pub tag_pattern: String,
    pub auto_increasing_number: i64,
    pub enabled: bool,
    pub active: bool,
}

impl CustomTag {
    /// A pattern is usable when it carries exactly one counter placeholder.
    pub fn is_valid_pattern(pattern: &str) -> bool {
        pattern.matches(COUNTER_PLACEHOLDER).count() == 1
            && !pattern.contains(char::is_whitespace)
    }

    pub fn render(&self, counter: i64) -> String {
        self.tag_pattern
            .replacen(COUNTER_PLACEHOLDER, &counter.to_string(), 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("v1.{X}", true)]
    #[case("{X}", true)]
    #[case("release-{X}-{X}", false)]
    #[case("no-counter", false)]
    #[case("bad {X}", false)]
    fn pattern_needs_one_placeholder(#[case] pattern: &str, #[case] valid: bool) {
        assert_eq!(CustomTag::is_valid_pattern(pattern), valid);
    }

    #[test]
    fn render_substitutes_counter() {
        let tag = CustomTag {
            id: 1,
            entity_key: ENTITY_KEY_CI_PIPELINE.into(),
            entity_value: "4".into(),
            tag_pattern: "v1.{X}-rc".into(),
            auto_increasing_number: 7,
            enabled: true,
            active: true,
        };
        assert_eq!(tag.render(8), "v1.8-rc");
    }
}
