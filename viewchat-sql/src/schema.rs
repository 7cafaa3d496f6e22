use std::collections::HashSet;
use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::SqlStoreError;

/// Reply the model must give verbatim when a question cannot be answered
/// from the view.
pub const DEFAULT_UNSUPPORTED_MARKER: &str = "UNSUPPORTED";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub sql_type: String,
    #[serde(default)]
    pub note: String,
    /// Allowed values for categorical columns.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domain: Vec<String>,
    #[serde(default)]
    pub nullable: bool,
}

impl ColumnSpec {
    pub fn new(name: &str, sql_type: &str, note: &str) -> Self {
        Self {
            name: name.to_string(),
            sql_type: sql_type.to_string(),
            note: note.to_string(),
            domain: Vec::new(),
            nullable: false,
        }
    }

    pub fn with_domain(mut self, values: &[&str]) -> Self {
        self.domain = values.iter().map(|v| v.to_string()).collect();
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// Description of the one queryable view.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub view: String,
    pub columns: Vec<ColumnSpec>,
    /// Column holding the caller identity, used for personalised questions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_column: Option<String>,
}

impl SchemaDescriptor {
    pub fn from_json(raw: &str) -> Result<Self, SqlStoreError> {
        let descriptor: SchemaDescriptor = serde_json::from_str(raw)
            .map_err(|err| SqlStoreError::InvalidSchema(err.to_string()))?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn validate(&self) -> Result<(), SqlStoreError> {
        if self.view.trim().is_empty() {
            return Err(SqlStoreError::InvalidSchema("view name is empty".to_string()));
        }
        if self.columns.is_empty() {
            return Err(SqlStoreError::InvalidSchema(format!(
                "view '{}' has no columns",
                self.view
            )));
        }
        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.to_ascii_lowercase()) {
                return Err(SqlStoreError::InvalidSchema(format!(
                    "duplicate column '{}'",
                    column.name
                )));
            }
        }
        if let Some(identity) = &self.identity_column {
            if self.column(identity).is_none() {
                return Err(SqlStoreError::InvalidSchema(format!(
                    "identity column '{identity}' is not part of '{}'",
                    self.view
                )));
            }
        }
        Ok(())
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns
            .iter()
            .find(|column| column.name.eq_ignore_ascii_case(name))
    }

    /// The donation-platform view the assistant was built for.
    pub fn funding_view() -> Self {
        const STATUS: &[&str] = &["INPROGRESS", "COMPLETED", "DELIVERING", "DELIVERED"];
        Self {
            view: "funding_view".to_string(),
            columns: vec![
                ColumnSpec::new("funding_id", "BIGINT", "unique funding identifier"),
                ColumnSpec::new("title", "VARCHAR", "funding title"),
                ColumnSpec::new("content", "TEXT", "funding description"),
                ColumnSpec::new("cur_amount", "BIGINT", "amount raised so far"),
                ColumnSpec::new("target_amount", "BIGINT", "fundraising goal"),
                ColumnSpec::new("percent", "FLOAT", "achievement rate in percent"),
                ColumnSpec::new("funding_status", "ENUM", "funding lifecycle state")
                    .with_domain(STATUS),
                ColumnSpec::new("category", "VARCHAR", "funding category").with_domain(&[
                    "CHILDREN",
                    "ANIMAL",
                    "ENVIRONMENT",
                    "DISABILITY",
                    "GLOBAL",
                    "ELDERLY",
                    "SOCIAL",
                ]),
                ColumnSpec::new("funding_start_date", "DATETIME", "funding start"),
                ColumnSpec::new("funding_end_date", "DATETIME", "funding end"),
                ColumnSpec::new("donation_start_date", "DATETIME", "donation period start"),
                ColumnSpec::new("donation_end_date", "DATETIME", "donation period end"),
                ColumnSpec::new("organization_id", "BIGINT", "recipient organization id"),
                ColumnSpec::new("organization_name", "VARCHAR", "recipient organization name"),
                ColumnSpec::new("organization_content", "TEXT", "recipient organization description"),
                ColumnSpec::new("myFunding_id", "BIGINT", "the user's donation id").nullable(),
                ColumnSpec::new("user_id", "BIGINT", "donating user id").nullable(),
                ColumnSpec::new("price", "BIGINT", "amount the user donated").nullable(),
                ColumnSpec::new("myFunding_status", "ENUM", "state of the user's donation")
                    .with_domain(STATUS)
                    .nullable(),
            ],
            identity_column: Some("user_id".to_string()),
        }
    }
}

/// Immutable schema block injected into every translation prompt.
#[derive(Clone, Debug)]
pub struct SchemaContext {
    descriptor: SchemaDescriptor,
    unsupported_marker: String,
}

impl SchemaContext {
    pub fn new(descriptor: SchemaDescriptor) -> Result<Self, SqlStoreError> {
        descriptor.validate()?;
        Ok(Self {
            descriptor,
            unsupported_marker: DEFAULT_UNSUPPORTED_MARKER.to_string(),
        })
    }

    pub fn with_unsupported_marker(mut self, marker: impl Into<String>) -> Self {
        let marker = marker.into();
        if !marker.trim().is_empty() {
            self.unsupported_marker = marker;
        }
        self
    }

    pub fn descriptor(&self) -> &SchemaDescriptor {
        &self.descriptor
    }

    pub fn view(&self) -> &str {
        &self.descriptor.view
    }

    pub fn unsupported_marker(&self) -> &str {
        &self.unsupported_marker
    }

    pub fn render(&self) -> String {
        let descriptor = &self.descriptor;
        let mut out = String::new();
        let _ = writeln!(out, "Queryable view (the only relation you may reference):");
        let _ = writeln!(out, "- {}(", descriptor.view);
        for (index, column) in descriptor.columns.iter().enumerate() {
            let separator = if index + 1 == descriptor.columns.len() { "" } else { "," };
            let _ = write!(out, "    {}: {}{}", column.name, column.sql_type, separator);
            let mut notes = Vec::new();
            if !column.note.is_empty() {
                notes.push(column.note.clone());
            }
            if !column.domain.is_empty() {
                let values = column
                    .domain
                    .iter()
                    .map(|v| format!("'{v}'"))
                    .collect::<Vec<_>>()
                    .join(", ");
                notes.push(format!("one of {values}"));
            }
            if column.nullable {
                notes.push("may be NULL".to_string());
            }
            if !notes.is_empty() {
                let _ = write!(out, " -- {}", notes.join("; "));
            }
            let _ = writeln!(out);
        }
        let _ = writeln!(out, "  )");
        let _ = writeln!(out);
        let _ = writeln!(out, "Hard rules:");
        let _ = writeln!(
            out,
            "1. Reply with exactly one read-only SELECT statement over {} and nothing else.",
            descriptor.view
        );
        let _ = writeln!(
            out,
            "2. Use only the columns and enumerated values listed above. Never invent tables, columns or values."
        );
        let _ = write!(
            out,
            "3. If the question cannot be answered from this view, reply with exactly: {}",
            self.unsupported_marker
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn funding_view_is_valid() {
        let descriptor = SchemaDescriptor::funding_view();
        descriptor.validate().expect("built-in schema validates");
        assert_eq!(descriptor.columns.len(), 19);
        assert!(descriptor.column("CATEGORY").is_some());
    }

    #[test]
    fn render_lists_columns_domains_and_rules() {
        let context = SchemaContext::new(SchemaDescriptor::funding_view())
            .unwrap()
            .with_unsupported_marker("지원되지 않는 요청입니다.");
        let text = context.render();

        assert!(text.contains("- funding_view("));
        assert!(text.contains("cur_amount: BIGINT"));
        assert!(text.contains("'ENVIRONMENT'"));
        assert!(text.contains("'DELIVERED'"));
        assert!(text.contains("user_id: BIGINT, -- donating user id; may be NULL"));
        assert!(text.contains("exactly one read-only SELECT"));
        assert!(text.ends_with("지원되지 않는 요청입니다."));
    }

    #[test]
    fn rejects_duplicate_columns_and_unknown_identity() {
        let mut descriptor = SchemaDescriptor::funding_view();
        descriptor.columns.push(ColumnSpec::new("Title", "TEXT", ""));
        assert!(matches!(
            descriptor.validate(),
            Err(SqlStoreError::InvalidSchema(_))
        ));

        let mut descriptor = SchemaDescriptor::funding_view();
        descriptor.identity_column = Some("owner".to_string());
        assert!(descriptor.validate().is_err());
    }

    #[test]
    fn loads_from_json() {
        let descriptor = SchemaDescriptor::from_json(
            r#"{"view":"sales_view","columns":[{"name":"region","sql_type":"VARCHAR","domain":["EU","US"]}]}"#,
        )
        .unwrap();
        assert_eq!(descriptor.view, "sales_view");
        assert_eq!(descriptor.columns[0].domain, vec!["EU", "US"]);
        assert!(descriptor.identity_column.is_none());

        assert!(SchemaDescriptor::from_json(r#"{"view":"","columns":[]}"#).is_err());
    }
}
