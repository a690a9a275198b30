//! Prompt rendering for remote agents.
//!
//! Templates are rendered with minijinja from a [`ProposalRequest`]. The
//! system prompt states the fragment language and its limits; the user prompt
//! carries the schema, sample rows, optional regeneration feedback and the
//! question itself.

use minijinja::{Environment, context};
use once_cell::sync::Lazy;
use querent_core::agent::{AgentError, ProposalRequest};
use querent_core::session::DataMode;
use serde::Serialize;

const SYSTEM_TEMPLATE: &str = r#"You translate questions about a dataset into one read-only {{ language }} fragment.
{% if relational %}
Rules:
- Write exactly one SQLite SELECT statement (WITH ... SELECT is fine).
- Use only the tables and columns listed in the schema. Do not qualify tables with a schema name.
- No comments, no semicolons, no PRAGMA, no data modification of any kind.
- Prefer explicit column lists and add ORDER BY when the order matters.
{% else %}
Rules:
- Write one pandas-style expression over the DataFrame `df`.
- Allowed: df['col'], df[['a', 'b']], boolean filters combined with &, | and ~ using
  comparisons, .isin([...]), .str.contains('text'), .isna() and .notna();
  head, tail, sort_values(by='col', ascending=...), groupby('col')['x'].<aggregate>(),
  count, sum, mean, median, min, max, nunique, size, value_counts, unique,
  nlargest(n, 'col'), nsmallest(n, 'col'), drop_duplicates, .shape[0] and len(...).
- Nothing else: no imports, no lambdas, no assignments, no other functions.
{% endif %}
Reply with the fragment alone inside a single fenced code block tagged `{{ fence }}`."#;

const USER_TEMPLATE: &str = r#"Schema:
{{ schema }}
{% for preview in previews %}
Sample rows from {{ preview.table }}:
{{ preview.columns | join(" | ") }}
{% for row in preview.rows %}{{ row | join(" | ") }}
{% endfor %}{% endfor %}
{% if feedback %}
Your previous fragment was rejected by the query policy.
Rejected fragment:
{{ feedback.fragment }}
Reason: {{ feedback.reason }}
Write a corrected fragment that follows every rule.
{% endif %}
Question: {{ question }}"#;

static TEMPLATES: Lazy<Environment<'static>> = Lazy::new(|| {
    let mut env = Environment::new();
    env.add_template("system", SYSTEM_TEMPLATE)
        .expect("system template is valid");
    env.add_template("user", USER_TEMPLATE)
        .expect("user template is valid");
    env
});

/// A rendered prompt pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub system: String,
    pub user: String,
}

#[derive(Serialize)]
struct PreviewContext {
    table: String,
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

#[derive(Serialize)]
struct FeedbackContext {
    fragment: String,
    reason: String,
}

/// Renders both prompts for `request`.
pub fn render_prompt(request: &ProposalRequest) -> Result<RenderedPrompt, AgentError> {
    let relational = request.mode == DataMode::Relational;
    let (language, fence) = if relational {
        ("SQLite SQL", "sql")
    } else {
        ("DataFrame expression", "python")
    };

    let previews: Vec<PreviewContext> = request
        .preview
        .iter()
        .map(|preview| PreviewContext {
            table: preview.table.clone(),
            columns: preview.rows.columns.clone(),
            rows: preview
                .rows
                .rows
                .iter()
                .map(|row| row.iter().map(|value| value.to_string()).collect())
                .collect(),
        })
        .collect();

    let feedback = request.feedback.as_ref().map(|feedback| FeedbackContext {
        fragment: feedback.rejected_fragment.clone(),
        reason: feedback.reason.clone(),
    });

    let system = render(
        "system",
        context! { relational => relational, language => language, fence => fence },
    )?;
    let user = render(
        "user",
        context! {
            schema => request.schema.describe(),
            previews => previews,
            feedback => feedback,
            question => request.question.trim(),
        },
    )?;

    Ok(RenderedPrompt { system, user })
}

fn render(name: &str, ctx: minijinja::Value) -> Result<String, AgentError> {
    TEMPLATES
        .get_template(name)
        .and_then(|template| template.render(ctx))
        .map_err(|err| AgentError::ExecutionFailed(format!("Failed to render {name} prompt: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use querent_core::agent::RegenerationFeedback;
    use querent_core::table::{Table, Value};
    use querent_core::session::Binding;
    use std::sync::Arc;

    fn request() -> ProposalRequest {
        let table = Table::from_rows(
            "people",
            vec!["name".into(), "age".into()],
            vec![
                vec![Value::Text("ada".into()), Value::Int(36)],
                vec![Value::Text("bob".into()), Value::Int(41)],
            ],
        )
        .unwrap();
        let binding = Binding::tabular(table, 5);
        ProposalRequest::new(
            "  average age?  ",
            binding.mode,
            Arc::clone(&binding.schema),
            binding.preview.clone(),
        )
    }

    #[test]
    fn test_frame_prompt_lists_grammar_and_samples() {
        let prompt = render_prompt(&request()).unwrap();
        assert!(prompt.system.contains("DataFrame `df`"));
        assert!(prompt.system.contains("tagged `python`"));
        assert!(prompt.user.contains("name | age"));
        assert!(prompt.user.contains("ada | 36"));
        assert!(prompt.user.ends_with("Question: average age?"));
        assert!(!prompt.user.contains("rejected"));
    }

    #[test]
    fn test_feedback_is_included() {
        let request = request().with_feedback(RegenerationFeedback {
            rejected_fragment: "df.to_csv('x')".into(),
            reason: "hostile construct".into(),
        });
        let prompt = render_prompt(&request).unwrap();
        assert!(prompt.user.contains("Rejected fragment:\ndf.to_csv('x')"));
        assert!(prompt.user.contains("Reason: hostile construct"));
    }
}
