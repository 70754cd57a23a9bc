//! Action/feedback option schemas and boundary validation
//!
//! Option values arrive untyped from the surface. They are checked once
//! against the declaring schema (type, bounds, required) and come out as
//! [`ParsedOptions`] with typed accessors.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::error::{GatewayError, Result};
use crate::sync::Channel;

/// Raw option values as sent by the surface
pub type OptionValues = Map<String, Value>;

/// One dropdown entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Choice {
    pub id: String,
    pub label: String,
}

/// Type and bounds of one option
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OptionKind {
    Number {
        default: f64,
        min: f64,
        max: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        step: Option<f64>,
    },
    Checkbox {
        default: bool,
    },
    Dropdown {
        default: String,
        choices: Vec<Choice>,
    },
}

/// One option of an action or feedback
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionField {
    pub id: &'static str,
    pub label: String,
    pub required: bool,
    #[serde(flatten)]
    pub kind: OptionKind,
}

impl OptionField {
    /// Channel selector bounded to the amplifier's channel count
    pub fn channel(count: u8) -> Self {
        Self {
            id: "channel",
            label: "Channel".to_string(),
            required: true,
            kind: OptionKind::Number {
                default: 1.0,
                min: 1.0,
                max: f64::from(count),
                step: Some(1.0),
            },
        }
    }

    pub fn number(id: &'static str, label: impl Into<String>, min: f64, max: f64, default: f64) -> Self {
        Self {
            id,
            label: label.into(),
            required: true,
            kind: OptionKind::Number {
                default,
                min,
                max,
                step: None,
            },
        }
    }

    pub fn checkbox(id: &'static str, label: impl Into<String>, default: bool) -> Self {
        Self {
            id,
            label: label.into(),
            required: true,
            kind: OptionKind::Checkbox { default },
        }
    }

    pub fn dropdown(
        id: &'static str,
        label: impl Into<String>,
        default: impl Into<String>,
        choices: Vec<Choice>,
    ) -> Self {
        Self {
            id,
            label: label.into(),
            required: true,
            kind: OptionKind::Dropdown {
                default: default.into(),
                choices,
            },
        }
    }

    /// Set the UI step of a number option
    pub fn step(mut self, value: f64) -> Self {
        if let OptionKind::Number { step, .. } = &mut self.kind {
            *step = Some(value);
        }
        self
    }

    /// Allow the option to be absent
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    fn parse(&self, raw: &Value) -> Result<ParamValue> {
        match &self.kind {
            OptionKind::Number { min, max, step, .. } => {
                let number = coerce_number(raw)
                    .ok_or_else(|| self.invalid(format!("expected a number, got {}", raw)))?;
                if number < *min || number > *max {
                    return Err(self.invalid(format!(
                        "{} is outside {}..={}",
                        number, min, max
                    )));
                }
                if *step == Some(1.0) && number.fract() != 0.0 {
                    return Err(self.invalid(format!("{} is not a whole number", number)));
                }
                Ok(ParamValue::Number(number))
            },
            OptionKind::Checkbox { .. } => coerce_flag(raw)
                .map(ParamValue::Flag)
                .ok_or_else(|| self.invalid(format!("expected a boolean, got {}", raw))),
            OptionKind::Dropdown { choices, .. } => {
                let id = raw
                    .as_str()
                    .ok_or_else(|| self.invalid(format!("expected a string, got {}", raw)))?;
                if choices.iter().any(|c| c.id == id) {
                    Ok(ParamValue::Choice(id.to_string()))
                } else {
                    Err(self.invalid(format!("'{}' is not one of the choices", id)))
                }
            },
        }
    }

    fn invalid(&self, detail: String) -> GatewayError {
        GatewayError::Validation(format!("option '{}': {}", self.id, detail))
    }
}

fn coerce_number(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

fn coerce_flag(raw: &Value) -> Option<bool> {
    match raw {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|n| n != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "on" | "yes" => Some(true),
            "false" | "0" | "off" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// A validated option value
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Number(f64),
    Flag(bool),
    Choice(String),
}

/// Options that passed their schema
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedOptions {
    values: HashMap<&'static str, ParamValue>,
}

impl ParsedOptions {
    pub fn number(&self, id: &str) -> Option<f64> {
        match self.values.get(id) {
            Some(ParamValue::Number(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn flag(&self, id: &str) -> Option<bool> {
        match self.values.get(id) {
            Some(ParamValue::Flag(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn choice(&self, id: &str) -> Option<&str> {
        match self.values.get(id) {
            Some(ParamValue::Choice(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn require_number(&self, id: &str) -> Result<f64> {
        self.number(id)
            .ok_or_else(|| GatewayError::validation(format!("option '{}' not defined", id)))
    }

    pub fn require_flag(&self, id: &str) -> Result<bool> {
        self.flag(id)
            .ok_or_else(|| GatewayError::validation(format!("option '{}' not defined", id)))
    }

    pub fn require_choice(&self, id: &str) -> Result<&str> {
        self.choice(id)
            .ok_or_else(|| GatewayError::validation(format!("option '{}' not defined", id)))
    }

    /// The `channel` option as a bounded channel
    pub fn channel(&self, count: u8) -> Result<Channel> {
        let number = self.require_number("channel")?;
        Channel::from_number(number, count)
    }
}

/// Check raw option values against a schema
pub fn parse_options(fields: &[OptionField], raw: &OptionValues) -> Result<ParsedOptions> {
    let mut values = HashMap::new();
    for field in fields {
        match raw.get(field.id) {
            None | Some(Value::Null) => {
                if field.required {
                    return Err(GatewayError::validation(format!(
                        "option '{}' not defined",
                        field.id
                    )));
                }
            },
            Some(value) => {
                values.insert(field.id, field.parse(value)?);
            },
        }
    }
    Ok(ParsedOptions { values })
}
