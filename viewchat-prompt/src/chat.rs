use std::collections::HashMap;

use viewchat_core::{Message, Role, Value, ViewchatError};

use crate::PromptTemplate;

#[derive(Debug, Clone)]
pub enum MessagePromptTemplate {
    Human(PromptTemplate),
    AI(PromptTemplate),
    System(PromptTemplate),
    Placeholder { variable_name: String },
}

impl MessagePromptTemplate {
    pub fn human(template: &str) -> Self {
        Self::Human(PromptTemplate::new(template))
    }

    pub fn ai(template: &str) -> Self {
        Self::AI(PromptTemplate::new(template))
    }

    pub fn system(template: &str) -> Self {
        Self::System(PromptTemplate::new(template))
    }

    pub fn placeholder(variable_name: &str) -> Self {
        Self::Placeholder {
            variable_name: variable_name.to_string(),
        }
    }

    pub fn format(&self, vars: &HashMap<String, Value>) -> Result<Vec<Message>, ViewchatError> {
        match self {
            MessagePromptTemplate::Human(t) => Ok(vec![Message {
                role: Role::User,
                content: t.render(vars)?,
            }]),
            MessagePromptTemplate::AI(t) => Ok(vec![Message {
                role: Role::Assistant,
                content: t.render(vars)?,
            }]),
            MessagePromptTemplate::System(t) => Ok(vec![Message {
                role: Role::System,
                content: t.render(vars)?,
            }]),
            MessagePromptTemplate::Placeholder { variable_name } => match vars.get(variable_name) {
                None | Some(Value::Null) => Ok(Vec::new()),
                Some(value) => {
                    if let Ok(messages) = serde_json::from_value::<Vec<Message>>(value.clone()) {
                        Ok(messages)
                    } else if let Ok(message) = serde_json::from_value::<Message>(value.clone()) {
                        Ok(vec![message])
                    } else {
                        Err(ViewchatError::InvalidConfig(format!(
                            "placeholder '{variable_name}' does not hold chat messages"
                        )))
                    }
                }
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatPromptTemplate {
    messages: Vec<MessagePromptTemplate>,
}

impl ChatPromptTemplate {
    pub fn new(messages: Vec<MessagePromptTemplate>) -> Self {
        Self { messages }
    }

    pub fn format_messages(
        &self,
        vars: &HashMap<String, Value>,
    ) -> Result<Vec<Message>, ViewchatError> {
        let mut result = Vec::new();
        for tmpl in &self.messages {
            result.extend(tmpl.format(vars)?);
        }
        Ok(result)
    }
}
