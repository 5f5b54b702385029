//! GraphQL request and result envelopes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single GraphQL request as carried in a `start` payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQLRequest {
    /// The document text.
    pub query: String,
    /// Variables object (absent and `null` both mean "no variables").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Map<String, Value>>,
    /// Operation to run when the document defines several.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    /// Protocol extensions (persisted-query hashes and the like).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
}

/// Which root type an operation runs against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// `query { .. }` or the `{ .. }` shorthand.
    Query,
    /// `mutation { .. }`.
    Mutation,
    /// `subscription { .. }`.
    Subscription,
}

impl OperationKind {
    /// Lowercase keyword.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
            Self::Subscription => "subscription",
        }
    }
}

impl GraphQLRequest {
    /// Build a request with only a document.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    /// Attach a variables object.
    #[must_use]
    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = Some(variables);
        self
    }

    /// Select a named operation.
    #[must_use]
    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// Parse a request out of a `start` payload.
    pub fn from_payload(payload: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(payload)
    }

    /// Look up a variable by name.
    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.as_ref().and_then(|vars| vars.get(name))
    }

    /// Determine the kind of the operation this request will run.
    ///
    /// Picks the definition named by `operation_name`, or the first one when no
    /// name is given. Documents with no recognisable definition are treated as
    /// queries and left for the executor to reject.
    pub fn operation_kind(&self) -> OperationKind {
        let definitions = scan_operations(&self.query);
        let selected = match self.operation_name.as_deref() {
            Some(wanted) => definitions
                .iter()
                .find(|(_, name)| name.as_deref() == Some(wanted))
                .or_else(|| definitions.first()),
            None => definitions.first(),
        };
        selected.map_or(OperationKind::Query, |(kind, _)| *kind)
    }
}

/// Walk a document and list its top-level operation definitions.
///
/// Tracks nesting so that field names such as `subscription` inside a selection
/// set are never mistaken for definitions. Strings, block strings and comments
/// are skipped.
fn scan_operations(document: &str) -> Vec<(OperationKind, Option<String>)> {
    let chars: Vec<char> = document.chars().collect();
    let mut found = Vec::new();
    let mut depth: usize = 0;
    let mut in_definition_header = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '"' => {
                if chars.get(i + 1) == Some(&'"') && chars.get(i + 2) == Some(&'"') {
                    i += 3;
                    while i < chars.len()
                        && !(chars[i] == '"'
                            && chars.get(i + 1) == Some(&'"')
                            && chars.get(i + 2) == Some(&'"'))
                    {
                        i += 1;
                    }
                    i += 2;
                } else {
                    i += 1;
                    while i < chars.len() && chars[i] != '"' {
                        if chars[i] == '\\' {
                            i += 1;
                        }
                        i += 1;
                    }
                }
            }
            '{' | '(' | '[' => {
                if depth == 0 && c == '{' {
                    if !in_definition_header {
                        found.push((OperationKind::Query, None));
                    }
                    in_definition_header = false;
                }
                depth += 1;
            }
            '}' | ')' | ']' => depth = depth.saturating_sub(1),
            c if depth == 0 && is_name_start(c) => {
                let start = i;
                while i < chars.len() && is_name_continue(chars[i]) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let kind = match word.as_str() {
                    "query" => Some(OperationKind::Query),
                    "mutation" => Some(OperationKind::Mutation),
                    "subscription" => Some(OperationKind::Subscription),
                    _ => None,
                };
                if !in_definition_header {
                    if let Some(kind) = kind {
                        while i < chars.len() && chars[i].is_whitespace() {
                            i += 1;
                        }
                        let name_start = i;
                        while i < chars.len() && is_name_continue(chars[i]) {
                            i += 1;
                        }
                        let name = (i > name_start)
                            .then(|| chars[name_start..i].iter().collect::<String>());
                        found.push((kind, name));
                        in_definition_header = true;
                    } else if word == "fragment" {
                        in_definition_header = true;
                    }
                }
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    found
}

fn is_name_start(c: char) -> bool {
    c == '_' || c.is_ascii_alphabetic()
}

fn is_name_continue(c: char) -> bool {
    c == '_' || c.is_ascii_alphanumeric()
}

/// The outcome of executing one operation (or one event of a subscription).
///
/// GraphQL errors are data: a result carrying `errors` is forwarded to the
/// client like any other result.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Resolved data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Field or request errors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Value>,
    /// Response extensions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
}

impl ExecutionResult {
    /// A successful result.
    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    /// A result carrying a single request error.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            errors: vec![serde_json::json!({ "message": message.into() })],
            ..Self::default()
        }
    }

    /// Whether any errors were reported.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Serialize into a protocol payload.
    pub fn to_payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
