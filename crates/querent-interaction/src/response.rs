//! Fragment extraction from model replies.

use once_cell::sync::Lazy;
use querent_core::agent::{AgentError, Fragment};
use querent_core::session::FragmentKind;
use regex::Regex;

static FENCED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[ \t]*([A-Za-z0-9_+-]*)[ \t]*\r?\n(.*?)```").expect("fence pattern is valid")
});

static SQL_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(select|with)\b").expect("sql start pattern is valid"));

/// Pulls the fragment out of a model reply.
///
/// A fenced block tagged for `expected` wins, then any fenced block, then the
/// whole reply. The returned kind reflects what the model actually wrote, so
/// a SQL reply for a tabular session is reported as SQL.
pub fn extract_fragment(reply: &str, expected: FragmentKind) -> Result<Fragment, AgentError> {
    let blocks: Vec<(String, String)> = FENCED
        .captures_iter(reply)
        .map(|caps| (caps[1].to_ascii_lowercase(), caps[2].trim().to_string()))
        .filter(|(_, body)| !body.is_empty())
        .collect();

    let chosen = blocks
        .iter()
        .find(|(tag, _)| kind_for_tag(tag) == Some(expected))
        .or_else(|| blocks.first())
        .map(|(tag, body)| (kind_for_tag(tag), body.clone()));

    let (tagged_kind, text) = match chosen {
        Some(found) => found,
        None => {
            let text = reply.trim();
            if text.is_empty() {
                return Err(AgentError::MalformedResponse("empty reply".into()));
            }
            if text.contains("```") {
                return Err(AgentError::MalformedResponse("unterminated code block".into()));
            }
            (None, text.to_string())
        }
    };

    let kind = tagged_kind.unwrap_or_else(|| sniff_kind(&text, expected));
    Ok(Fragment::new(kind, text))
}

fn kind_for_tag(tag: &str) -> Option<FragmentKind> {
    match tag {
        "sql" | "sqlite" => Some(FragmentKind::Sql),
        "python" | "py" | "pandas" => Some(FragmentKind::Code),
        _ => None,
    }
}

fn sniff_kind(text: &str, expected: FragmentKind) -> FragmentKind {
    let trimmed = text.trim_start();
    if SQL_START.is_match(trimmed) {
        FragmentKind::Sql
    } else if trimmed.starts_with("df") || trimmed.starts_with("len(") {
        FragmentKind::Code
    } else {
        expected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefers_block_matching_expected_kind() {
        let reply = "Here you go:\n```python\ndf.head()\n```\nor in SQL:\n```sql\nSELECT 1\n```";
        let fragment = extract_fragment(reply, FragmentKind::Sql).unwrap();
        assert_eq!(fragment, Fragment::sql("SELECT 1"));

        let fragment = extract_fragment(reply, FragmentKind::Code).unwrap();
        assert_eq!(fragment, Fragment::code("df.head()"));
    }

    #[test]
    fn test_untagged_block_is_sniffed() {
        let fragment = extract_fragment("```\nselect count(*) from t\n```", FragmentKind::Code).unwrap();
        assert_eq!(fragment.kind, FragmentKind::Sql);
    }

    #[test]
    fn test_bare_reply_is_used_whole() {
        let fragment = extract_fragment("  len(df)\n", FragmentKind::Code).unwrap();
        assert_eq!(fragment, Fragment::code("len(df)"));
    }

    #[test]
    fn test_malformed_replies() {
        assert!(matches!(
            extract_fragment("   ", FragmentKind::Sql),
            Err(AgentError::MalformedResponse(_))
        ));
        assert!(matches!(
            extract_fragment("```sql\nSELECT 1", FragmentKind::Sql),
            Err(AgentError::MalformedResponse(_))
        ));
    }
}
