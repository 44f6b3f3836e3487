//! Run-input decoding with structured validation errors.
//!
//! The body is checked field by field before typed deserialization so that
//! every problem is reported with its JSON location, not only the first one
//! serde trips over.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::{Role, RunAgentInput};

/// Validation error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    JsonInvalid,
    ModelType,
    Missing,
    StringType,
    ListType,
    DictType,
    Enum,
    ValueError,
}

/// One segment of an error location: a field name or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum LocSegment {
    Field(String),
    Index(usize),
}

impl From<&str> for LocSegment {
    fn from(field: &str) -> Self {
        Self::Field(field.to_string())
    }
}

impl From<usize> for LocSegment {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorDetail {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub loc: Vec<LocSegment>,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
}

impl ErrorDetail {
    fn new(kind: ErrorKind, loc: Vec<LocSegment>, msg: impl Into<String>) -> Self {
        Self {
            kind,
            loc,
            msg: msg.into(),
            input: None,
        }
    }

    fn with_input(mut self, input: &Value) -> Self {
        self.input = Some(input.clone());
        self
    }

    /// Whether the location names the given top-level field.
    pub fn refers_to(&self, field: &str) -> bool {
        self.loc
            .iter()
            .any(|seg| matches!(seg, LocSegment::Field(f) if f == field))
    }
}

/// The run input failed validation.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{} validation error(s) for RunAgentInput", .errors.len())]
pub struct ValidationError {
    pub errors: Vec<ErrorDetail>,
}

impl ValidationError {
    fn single(detail: ErrorDetail) -> Self {
        Self {
            errors: vec![detail],
        }
    }

    /// Serialized error list, the body of a 422 response.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.errors).unwrap_or_else(|_| "[]".to_string())
    }
}

/// Decode raw request bytes into a [`RunAgentInput`].
pub fn decode_run_input(body: &[u8]) -> Result<RunAgentInput, ValidationError> {
    let value: Value = serde_json::from_slice(body).map_err(|e| {
        ValidationError::single(ErrorDetail::new(
            ErrorKind::JsonInvalid,
            Vec::new(),
            format!("Invalid JSON: {e}"),
        ))
    })?;

    let mut errors = Vec::new();
    check_run_input(&value, &mut errors);
    if !errors.is_empty() {
        return Err(ValidationError { errors });
    }

    serde_json::from_value(value).map_err(|e| {
        ValidationError::single(ErrorDetail::new(ErrorKind::ValueError, Vec::new(), e.to_string()))
    })
}

struct Checker<'a> {
    errors: &'a mut Vec<ErrorDetail>,
}

impl Checker<'_> {
    fn push(&mut self, detail: ErrorDetail) {
        self.errors.push(detail);
    }

    fn path(base: &[LocSegment], seg: impl Into<LocSegment>) -> Vec<LocSegment> {
        let mut loc = base.to_vec();
        loc.push(seg.into());
        loc
    }

    /// Required string field.
    fn required_string(&mut self, obj: &Map<String, Value>, base: &[LocSegment], field: &str) {
        match obj.get(field) {
            None => self.push(ErrorDetail::new(
                ErrorKind::Missing,
                Self::path(base, field),
                "Field required",
            )),
            Some(v) => self.string(v, Self::path(base, field)),
        }
    }

    /// Optional string field; `null` counts as absent only when `nullable`.
    fn optional_string(
        &mut self,
        obj: &Map<String, Value>,
        base: &[LocSegment],
        field: &str,
        nullable: bool,
    ) {
        match obj.get(field) {
            None => {}
            Some(Value::Null) if nullable => {}
            Some(v) => self.string(v, Self::path(base, field)),
        }
    }

    fn string(&mut self, value: &Value, loc: Vec<LocSegment>) {
        if !value.is_string() {
            self.push(
                ErrorDetail::new(ErrorKind::StringType, loc, "Input should be a valid string")
                    .with_input(value),
            );
        }
    }

    /// Optional list field; returns the items when the field is a list.
    /// `null` counts as absent only when `nullable`.
    fn optional_list<'v>(
        &mut self,
        obj: &'v Map<String, Value>,
        base: &[LocSegment],
        field: &str,
        nullable: bool,
    ) -> Option<&'v Vec<Value>> {
        match obj.get(field) {
            None => None,
            Some(Value::Null) if nullable => None,
            Some(Value::Array(items)) => Some(items),
            Some(other) => {
                self.push(
                    ErrorDetail::new(
                        ErrorKind::ListType,
                        Self::path(base, field),
                        "Input should be a valid list",
                    )
                    .with_input(other),
                );
                None
            }
        }
    }

    fn object<'v>(&mut self, value: &'v Value, loc: Vec<LocSegment>) -> Option<&'v Map<String, Value>> {
        match value {
            Value::Object(map) => Some(map),
            other => {
                self.push(
                    ErrorDetail::new(ErrorKind::DictType, loc, "Input should be a valid dictionary")
                        .with_input(other),
                );
                None
            }
        }
    }
}

fn check_run_input(value: &Value, errors: &mut Vec<ErrorDetail>) {
    let mut c = Checker { errors };

    let Value::Object(root) = value else {
        c.push(
            ErrorDetail::new(
                ErrorKind::ModelType,
                Vec::new(),
                "Input should be a valid dictionary or object",
            )
            .with_input(value),
        );
        return;
    };

    c.optional_string(root, &[], "threadId", false);
    c.optional_string(root, &[], "runId", false);
    c.optional_string(root, &[], "parentRunId", true);

    match root.get("messages") {
        None => c.push(ErrorDetail::new(
            ErrorKind::Missing,
            vec!["messages".into()],
            "Field required",
        )),
        Some(_) => {
            if let Some(messages) = c.optional_list(root, &[], "messages", false) {
                for (i, msg) in messages.iter().enumerate() {
                    check_message(&mut c, msg, vec!["messages".into(), i.into()]);
                }
            }
        }
    }

    if let Some(tools) = c.optional_list(root, &[], "tools", false) {
        for (i, tool) in tools.iter().enumerate() {
            let loc = vec![LocSegment::from("tools"), i.into()];
            if let Some(obj) = c.object(tool, loc.clone()) {
                c.required_string(obj, &loc, "name");
                c.optional_string(obj, &loc, "description", false);
            }
        }
    }

    if let Some(context) = c.optional_list(root, &[], "context", false) {
        for (i, entry) in context.iter().enumerate() {
            let loc = vec![LocSegment::from("context"), i.into()];
            if let Some(obj) = c.object(entry, loc.clone()) {
                c.required_string(obj, &loc, "description");
                if !obj.contains_key("value") {
                    c.push(ErrorDetail::new(
                        ErrorKind::Missing,
                        Checker::path(&loc, "value"),
                        "Field required",
                    ));
                }
            }
        }
    }
}

fn check_message(c: &mut Checker<'_>, msg: &Value, loc: Vec<LocSegment>) {
    let Some(obj) = c.object(msg, loc.clone()) else {
        return;
    };

    c.optional_string(obj, &loc, "id", true);
    c.optional_string(obj, &loc, "content", true);
    c.optional_string(obj, &loc, "name", true);
    c.optional_string(obj, &loc, "toolCallId", true);

    let role = match obj.get("role") {
        None => {
            c.push(ErrorDetail::new(
                ErrorKind::Missing,
                Checker::path(&loc, "role"),
                "Field required",
            ));
            None
        }
        Some(Value::String(role)) if Role::ALL.contains(&role.as_str()) => Some(role.as_str()),
        Some(other) => {
            c.push(
                ErrorDetail::new(
                    ErrorKind::Enum,
                    Checker::path(&loc, "role"),
                    format!("Input should be one of: {}", Role::ALL.join(", ")),
                )
                .with_input(other),
            );
            None
        }
    };

    if role == Some("tool") && obj.get("toolCallId").is_none_or(Value::is_null) {
        c.push(ErrorDetail::new(
            ErrorKind::Missing,
            Checker::path(&loc, "toolCallId"),
            "Field required",
        ));
    }

    if let Some(calls) = c.optional_list(obj, &loc, "toolCalls", true) {
        for (i, call) in calls.iter().enumerate() {
            let call_loc = Checker::path(&Checker::path(&loc, "toolCalls"), i);
            let Some(call_obj) = c.object(call, call_loc.clone()) else {
                continue;
            };
            c.required_string(call_obj, &call_loc, "id");
            c.optional_string(call_obj, &call_loc, "type", false);
            let fn_loc = Checker::path(&call_loc, "function");
            match call_obj.get("function") {
                None => c.push(ErrorDetail::new(ErrorKind::Missing, fn_loc, "Field required")),
                Some(function) => {
                    if let Some(fn_obj) = c.object(function, fn_loc.clone()) {
                        c.required_string(fn_obj, &fn_loc, "name");
                        c.required_string(fn_obj, &fn_loc, "arguments");
                    }
                }
            }
        }
    }
}
