use regex::Regex;
use std::sync::LazyLock;

/// How thinking-phase `<details>` markup is rewritten before it reaches the
/// client: `strip` removes the tags, `think` rewrites them to `<think>`
/// markers, `raw` passes them through untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ThinkTagsMode {
    #[default]
    Strip,
    Think,
    Raw,
}

impl std::str::FromStr for ThinkTagsMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strip" => Ok(ThinkTagsMode::Strip),
            "think" => Ok(ThinkTagsMode::Think),
            "raw" => Ok(ThinkTagsMode::Raw),
            other => Err(format!("unknown think tags mode: {other}")),
        }
    }
}

static SUMMARY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<summary>.*?</summary>").unwrap());
static DETAILS_OPEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<details[^>]*>").unwrap());

/// Cleans one thinking-phase fragment. Pure; applied once per delta, never
/// cumulatively across fragments.
pub fn transform_thinking(text: &str, mode: ThinkTagsMode) -> String {
    if text.is_empty() {
        return String::new();
    }
    let s = SUMMARY_RE.replace_all(text, "");
    let s = s
        .replace("</thinking>", "")
        .replace("<Full>", "")
        .replace("</Full>", "");
    let mut s = s.trim().to_string();
    match mode {
        ThinkTagsMode::Strip => {
            s = DETAILS_OPEN_RE.replace_all(&s, "").into_owned();
            s = s.replace("</details>", "");
        }
        ThinkTagsMode::Think => {
            s = DETAILS_OPEN_RE.replace_all(&s, "<think>").into_owned();
            s = s.replace("</details>", "</think>");
        }
        ThinkTagsMode::Raw => {}
    }
    let s = match s.strip_prefix("> ") {
        Some(rest) => rest.to_string(),
        None => s,
    };
    let s = s.replace("\n> ", "\n");
    s.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_returns_empty() {
        assert_eq!(transform_thinking("", ThinkTagsMode::Strip), "");
    }

    #[test]
    fn strip_removes_details_tags() {
        let out = transform_thinking(
            "<details type=\"reasoning\" open>step one</details>",
            ThinkTagsMode::Strip,
        );
        assert_eq!(out, "step one");
    }

    #[test]
    fn think_rewrites_details_to_think_markers() {
        let out = transform_thinking("<details open>step</details>", ThinkTagsMode::Think);
        assert_eq!(out, "<think>step</think>");
    }

    #[test]
    fn raw_leaves_details_untouched() {
        let out = transform_thinking("<details>step</details>", ThinkTagsMode::Raw);
        assert_eq!(out, "<details>step</details>");
    }

    #[test]
    fn summary_span_is_removed_across_newlines() {
        let out = transform_thinking(
            "<summary>Thought for\n3 seconds</summary>actual",
            ThinkTagsMode::Strip,
        );
        assert_eq!(out, "actual");
    }

    #[test]
    fn residual_markers_are_removed() {
        let out = transform_thinking("a</thinking>b<Full>c</Full>", ThinkTagsMode::Strip);
        assert_eq!(out, "abc");
    }

    #[test]
    fn blockquote_prefixes_are_unwrapped() {
        let out = transform_thinking("> first line\n> second line", ThinkTagsMode::Strip);
        assert_eq!(out, "first line\nsecond line");
    }

    #[test]
    fn second_pass_over_clean_text_is_a_noop() {
        let once = transform_thinking("<details>reason\n> quoted</details>", ThinkTagsMode::Strip);
        let twice = transform_thinking(&once, ThinkTagsMode::Strip);
        assert_eq!(once, twice);
    }

    #[test]
    fn whitespace_only_fragment_transforms_to_empty() {
        assert_eq!(transform_thinking("  \n  ", ThinkTagsMode::Strip), "");
        assert_eq!(
            transform_thinking("<details></details>", ThinkTagsMode::Strip),
            ""
        );
    }

    #[test]
    fn mode_parses_from_str() {
        assert_eq!("strip".parse::<ThinkTagsMode>(), Ok(ThinkTagsMode::Strip));
        assert_eq!("think".parse::<ThinkTagsMode>(), Ok(ThinkTagsMode::Think));
        assert_eq!("raw".parse::<ThinkTagsMode>(), Ok(ThinkTagsMode::Raw));
        assert!("loud".parse::<ThinkTagsMode>().is_err());
    }
}
