use std::collections::HashMap;
use std::sync::Arc;

use tracing::Instrument;
use viewchat_core::{Llm, LlmRequest, Value, ViewchatError};
use viewchat_memory::{transcript, ConversationTurn, Memory};
use viewchat_prompt::{ChatPromptTemplate, MessagePromptTemplate};
use viewchat_sql::SchemaContext;

const SYSTEM_PROMPT: &str = "\
You are a database expert that turns questions about the {{view}} view into exactly one read-only SQL query.

{{schema}}

Behaviour:
- Reply with the SELECT statement only, without explanations.
- {{identity_rule}}
- If the question repeats one asked earlier in this conversation, reproduce the query you resolved it to before instead of deriving a new one.
- If the question cannot be answered from the view, or needs a column or relation that is not listed, reply with exactly {{unsupported_marker}}.

Reply shape:
SELECT column1, column2, ...
FROM {{view}}
WHERE condition
ORDER BY column ASC/DESC
LIMIT n;";

/// Turns a question plus prior turns into one validated read-only query.
///
/// The model is called once, non-streaming, at low temperature. A
/// successful translation is recorded in the session's memory as
/// `(question, query)`.
pub struct QueryTranslator {
    llm: Arc<dyn Llm>,
    schema: Arc<SchemaContext>,
    memory: Arc<dyn Memory>,
    prompt: ChatPromptTemplate,
    model: String,
    temperature: f32,
}

impl QueryTranslator {
    pub fn new(llm: Arc<dyn Llm>, schema: Arc<SchemaContext>, memory: Arc<dyn Memory>) -> Self {
        Self {
            llm,
            schema,
            memory,
            prompt: ChatPromptTemplate::new(vec![
                MessagePromptTemplate::system(SYSTEM_PROMPT),
                MessagePromptTemplate::placeholder("history"),
                MessagePromptTemplate::human("Question: {{question}}"),
            ]),
            model: String::new(),
            temperature: 0.0,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn schema(&self) -> &SchemaContext {
        &self.schema
    }

    pub fn build_request(
        &self,
        question: &str,
        identity: Option<&str>,
        history: &[ConversationTurn],
    ) -> Result<LlmRequest, ViewchatError> {
        let mut vars = HashMap::new();
        vars.insert("view".to_string(), Value::from(self.schema.view()));
        vars.insert("schema".to_string(), Value::from(self.schema.render()));
        vars.insert(
            "identity_rule".to_string(),
            Value::from(identity_rule(&self.schema, identity)),
        );
        vars.insert(
            "unsupported_marker".to_string(),
            Value::from(self.schema.unsupported_marker()),
        );
        vars.insert("history".to_string(), serde_json::to_value(transcript(history))?);
        vars.insert("question".to_string(), Value::from(question));

        Ok(LlmRequest {
            model: self.model.clone(),
            messages: self.prompt.format_messages(&vars)?,
            temperature: Some(self.temperature),
        })
    }

    pub async fn translate(
        &self,
        session: &str,
        question: &str,
        identity: Option<&str>,
        history: &[ConversationTurn],
    ) -> Result<String, ViewchatError> {
        let span = tracing::info_span!("viewchat_translate", session = %session);
        async move {
            let request = self.build_request(question, identity, history)?;
            let response = self.llm.invoke(request).await?;
            let query = extract_query(&response.content, self.schema.unsupported_marker())?;
            tracing::debug!(query = %query, "question translated");

            self.memory
                .append(session, ConversationTurn::new(question, query.clone()))
                .await?;
            Ok(query)
        }
        .instrument(span)
        .await
    }
}

fn identity_rule(schema: &SchemaContext, identity: Option<&str>) -> String {
    let column = schema.descriptor().identity_column.as_deref();
    match (identity.map(str::trim).filter(|id| !id.is_empty()), column) {
        (Some(identity), Some(column)) => {
            let literal = identity_literal(identity);
            format!(
                "The caller is identified by {column} = {literal}. Add `{column} = {literal}` to \
                 the WHERE clause only when the question is about the caller's own activity \
                 (for example \"my donations\"); otherwise the query targets all data."
            )
        }
        _ => "The caller is anonymous. The query targets all data; never filter on a user \
              identity."
            .to_string(),
    }
}

fn identity_literal(identity: &str) -> String {
    match identity.parse::<i64>() {
        Ok(number) => number.to_string(),
        Err(_) => format!("'{}'", identity.replace('\'', "''")),
    }
}

/// Strips code fences and checks that the model produced a single SELECT.
pub fn extract_query(output: &str, unsupported_marker: &str) -> Result<String, ViewchatError> {
    let cleaned = strip_code_fences(output);

    if cleaned.is_empty() {
        return Err(ViewchatError::Translation {
            output: output.to_string(),
            reason: "model returned no query".to_string(),
        });
    }
    if cleaned.contains(unsupported_marker) {
        return Err(ViewchatError::Translation {
            output: output.to_string(),
            reason: "question cannot be answered from the view".to_string(),
        });
    }
    if !starts_with_select(&cleaned) {
        return Err(ViewchatError::Translation {
            output: output.to_string(),
            reason: "output is not a SELECT query".to_string(),
        });
    }
    Ok(cleaned)
}

fn strip_code_fences(output: &str) -> String {
    output
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn starts_with_select(query: &str) -> bool {
    let Some(head) = query.get(..6) else {
        return false;
    };
    let boundary = query[6..]
        .chars()
        .next()
        .map_or(true, |c| !(c.is_alphanumeric() || c == '_'));
    head.eq_ignore_ascii_case("select") && boundary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_output_is_unwrapped() {
        let output = "```sql\nSELECT title FROM funding_view LIMIT 1;\n```";
        assert_eq!(
            extract_query(output, "UNSUPPORTED").unwrap(),
            "SELECT title FROM funding_view LIMIT 1;"
        );
    }

    #[test]
    fn select_keyword_is_case_insensitive() {
        assert!(extract_query("  select * from funding_view", "UNSUPPORTED").is_ok());
        assert!(extract_query("Select\ncount(*) from funding_view", "UNSUPPORTED").is_ok());
    }

    #[test]
    fn non_queries_are_translation_errors() {
        for output in ["", "```\n```", "I cannot help with that.", "SELECTED works", "DELETE FROM funding_view"] {
            let err = extract_query(output, "UNSUPPORTED").unwrap_err();
            assert!(
                matches!(err, ViewchatError::Translation { .. }),
                "expected translation error for {output:?}"
            );
        }
    }

    #[test]
    fn unsupported_marker_carries_model_text() {
        let err = extract_query("UNSUPPORTED", "UNSUPPORTED").unwrap_err();
        match err {
            ViewchatError::Translation { output, .. } => assert_eq!(output, "UNSUPPORTED"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn identity_literals_are_numbers_or_quoted() {
        assert_eq!(identity_literal("42"), "42");
        assert_eq!(identity_literal("o'brien"), "'o''brien'");
    }
}
