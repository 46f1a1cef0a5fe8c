// Copyright 2025 Cowboy AI, LLC.

//! Property types and per-verb payload validators
//!
//! Property schemas are declared once on the entity and composed into one
//! [`VerbSchema`] per verb when the model is built. Validation normalizes
//! values (trimmed strings, lower-cased emails, canonical dates) and collects
//! every failing field instead of stopping at the first.

use crate::errors::{FieldError, TenancyError, TenancyResult};
use crate::event::Verb;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::{Map, Value};

/// Value type of a property
#[derive(Debug, Clone, PartialEq)]
pub enum PropType {
    /// Trimmed string
    String,
    /// Lower-cased email address
    Email,
    /// Lower-case words joined by `-`
    Slug,
    /// `true` / `false`
    Boolean,
    /// Signed integer
    Integer,
    /// RFC 3339 timestamp
    Date,
    /// Entity id
    Id,
    /// One of a fixed set of strings
    Enum(Vec<String>),
    /// Any JSON object
    Object,
    /// Array of the inner type
    Array(Box<PropType>),
    /// No constraint
    Any,
}

impl PropType {
    fn coerce(&self, path: &str, value: &Value, errors: &mut Vec<FieldError>) -> Option<Value> {
        let fail = |errors: &mut Vec<FieldError>, message: String| {
            errors.push(FieldError::new(path, message));
            None
        };
        match self {
            PropType::String => match value {
                Value::String(s) => Some(Value::String(s.trim().to_string())),
                _ => fail(errors, "must be a string".into()),
            },
            PropType::Email => match value.as_str().map(|s| s.trim().to_lowercase()) {
                Some(email) if is_email(&email) => Some(Value::String(email)),
                _ => fail(errors, "must be a valid email address".into()),
            },
            PropType::Slug => match value.as_str().map(|s| s.trim().to_lowercase()) {
                Some(slug) if is_slug(&slug) => Some(Value::String(slug)),
                _ => fail(errors, "must be a slug".into()),
            },
            PropType::Boolean => match value {
                Value::Bool(_) => Some(value.clone()),
                _ => fail(errors, "must be a boolean".into()),
            },
            PropType::Integer => match value.as_i64() {
                Some(n) => Some(Value::from(n)),
                None => fail(errors, "must be an integer".into()),
            },
            PropType::Date => match value.as_str().map(DateTime::parse_from_rfc3339) {
                Some(Ok(date)) => serde_json::to_value(date.with_timezone(&Utc)).ok(),
                _ => fail(errors, "must be an RFC 3339 date".into()),
            },
            PropType::Id => match value.as_str().map(str::trim) {
                Some(id) if !id.is_empty() => Some(Value::String(id.to_string())),
                _ => fail(errors, "must be an id".into()),
            },
            PropType::Enum(allowed) => match value.as_str() {
                Some(s) if allowed.iter().any(|a| a == s) => Some(value.clone()),
                _ => fail(errors, format!("must be one of {}", allowed.join(", "))),
            },
            PropType::Object => match value {
                Value::Object(_) => Some(value.clone()),
                _ => fail(errors, "must be an object".into()),
            },
            PropType::Array(inner) => match value {
                Value::Array(items) => {
                    let before = errors.len();
                    let coerced: Vec<Value> = items
                        .iter()
                        .enumerate()
                        .filter_map(|(i, item)| inner.coerce(&format!("{path}.{i}"), item, errors))
                        .collect();
                    (errors.len() == before).then_some(Value::Array(coerced))
                }
                _ => fail(errors, "must be an array".into()),
            },
            PropType::Any => Some(value.clone()),
        }
    }
}

fn is_email(email: &str) -> bool {
    let mut parts = email.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        _ => false,
    }
}

fn is_slug(slug: &str) -> bool {
    !slug.is_empty()
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// A property: type plus modifiers
#[derive(Debug, Clone, PartialEq)]
pub struct Prop {
    /// Value type
    pub kind: PropType,
    /// Must be present on create
    pub required: bool,
    /// Value used on create when absent
    pub default: Option<Value>,
    /// Accepts `null`
    pub nullable: bool,
}

impl Prop {
    /// Optional property of `kind`
    pub fn new(kind: PropType) -> Self {
        Self {
            kind,
            required: false,
            default: None,
            nullable: false,
        }
    }

    /// String property
    pub fn string() -> Self {
        Self::new(PropType::String)
    }

    /// Email property
    pub fn email() -> Self {
        Self::new(PropType::Email)
    }

    /// Slug property
    pub fn slug() -> Self {
        Self::new(PropType::Slug)
    }

    /// Boolean property
    pub fn boolean() -> Self {
        Self::new(PropType::Boolean)
    }

    /// Integer property
    pub fn integer() -> Self {
        Self::new(PropType::Integer)
    }

    /// Date property
    pub fn date() -> Self {
        Self::new(PropType::Date)
    }

    /// Id property
    pub fn id() -> Self {
        Self::new(PropType::Id)
    }

    /// Enumerated string property
    pub fn one_of<S: Into<String>>(values: impl IntoIterator<Item = S>) -> Self {
        Self::new(PropType::Enum(values.into_iter().map(Into::into).collect()))
    }

    /// Object property
    pub fn object() -> Self {
        Self::new(PropType::Object)
    }

    /// Array property
    pub fn array(inner: PropType) -> Self {
        Self::new(PropType::Array(Box::new(inner)))
    }

    /// Unconstrained property
    pub fn any() -> Self {
        Self::new(PropType::Any)
    }

    /// Mark as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Set a default used when the value is absent
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Accept `null`
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Same type, neither required nor defaulted
    pub fn optional(&self) -> Self {
        Self {
            required: false,
            default: None,
            ..self.clone()
        }
    }

    fn validate(&self, path: &str, value: &Value, errors: &mut Vec<FieldError>) -> Option<Value> {
        if value.is_null() {
            if self.nullable {
                return Some(Value::Null);
            }
            errors.push(FieldError::new(path, "must not be null"));
            return None;
        }
        let coerced = self.kind.coerce(path, value, errors)?;
        if self.required && coerced.as_str().is_some_and(str::is_empty) {
            errors.push(FieldError::new(path, "must not be empty"));
            return None;
        }
        Some(coerced)
    }
}

/// How many values a payload must carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValuesRule {
    /// Any subset of the declared props
    Any,
    /// At least one declared prop
    AtLeastOne,
    /// No values at all
    Empty,
}

/// Validator for one verb's payload values
#[derive(Debug, Clone, PartialEq)]
pub struct VerbSchema {
    /// Verb this schema validates
    pub verb: Verb,
    /// Accepted properties, in declaration order
    pub props: IndexMap<String, Prop>,
    /// Cardinality rule on the values
    pub rule: ValuesRule,
}

impl VerbSchema {
    /// Empty schema accepting any subset of its props
    pub fn new(verb: Verb) -> Self {
        Self {
            verb,
            props: IndexMap::new(),
            rule: ValuesRule::Any,
        }
    }

    /// Accept a property
    pub fn prop(mut self, name: impl Into<String>, prop: Prop) -> Self {
        self.props.insert(name.into(), prop);
        self
    }

    /// Change the cardinality rule
    pub fn rule(mut self, rule: ValuesRule) -> Self {
        self.rule = rule;
        self
    }

    /// CREATE: props with their required flags and defaults
    pub fn for_create(props: &IndexMap<String, Prop>) -> Self {
        Self {
            verb: Verb::Create,
            props: props.clone(),
            rule: ValuesRule::Any,
        }
    }

    /// UPDATE: every prop optional, at least one value
    pub fn for_update(props: &IndexMap<String, Prop>) -> Self {
        Self {
            verb: Verb::Update,
            props: props.iter().map(|(k, p)| (k.clone(), p.optional())).collect(),
            rule: ValuesRule::AtLeastOne,
        }
    }

    /// DELETE: no values
    pub fn for_delete() -> Self {
        Self::new(Verb::Delete).rule(ValuesRule::Empty)
    }

    /// RESTORE: every prop optional
    pub fn for_restore(props: &IndexMap<String, Prop>) -> Self {
        Self {
            verb: Verb::Restore,
            props: props.iter().map(|(k, p)| (k.clone(), p.optional())).collect(),
            rule: ValuesRule::Any,
        }
    }

    /// Validate and normalize payload values
    pub fn validate(&self, values: &Map<String, Value>) -> TenancyResult<Map<String, Value>> {
        let mut errors = Vec::new();
        let mut out = Map::new();

        for key in values.keys().filter(|k| !self.props.contains_key(*k)) {
            errors.push(FieldError::new(format!("values.{key}"), "is not allowed"));
        }

        for (name, prop) in &self.props {
            let path = format!("values.{name}");
            match values.get(name) {
                Some(value) => {
                    if let Some(v) = prop.validate(&path, value, &mut errors) {
                        out.insert(name.clone(), v);
                    }
                }
                None => match &prop.default {
                    Some(default) => {
                        out.insert(name.clone(), default.clone());
                    }
                    None if prop.required => errors.push(FieldError::new(path, "is required")),
                    None => {}
                },
            }
        }

        match self.rule {
            ValuesRule::AtLeastOne if values.is_empty() => {
                errors.push(FieldError::new("values", "must contain at least one field"));
            }
            ValuesRule::Empty if !values.is_empty() => {
                errors.push(FieldError::new("values", "must be empty"));
            }
            _ => {}
        }

        if errors.is_empty() {
            Ok(out)
        } else {
            Err(TenancyError::Validation(errors))
        }
    }
}
