//! Render parameter validation.
//!
//! Requests arrive either as JSON or as urlencoded forms, so every field is
//! first captured as a loosely-typed [`FormValue`] and then checked field by
//! field. All violations are collected so clients see every problem at once.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const MIN_SCALE: f64 = 0.1;
pub const MIN_HATCH_DENSITY: f64 = 0.1;

static COLOR_KEY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(#[0-9a-fA-F]{6}\s?)+$").expect("color key pattern is a valid regex")
});

/// A scalar as submitted by a client: JSON booleans and numbers stay typed,
/// form fields always arrive as text.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FormValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl FormValue {
    /// Empty strings count as absent, matching how browsers submit blank inputs.
    fn is_blank(&self) -> bool {
        matches!(self, FormValue::Text(text) if text.trim().is_empty())
    }

    fn as_number(&self) -> Option<f64> {
        let value = match self {
            FormValue::Number(number) => *number,
            FormValue::Text(text) => text.trim().parse::<f64>().ok()?,
            FormValue::Bool(_) => return None,
        };
        value.is_finite().then_some(value)
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            FormValue::Bool(value) => Some(*value),
            FormValue::Number(number) if *number == 1.0 => Some(true),
            FormValue::Number(number) if *number == 0.0 => Some(false),
            FormValue::Text(text) => match text.trim() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            },
            FormValue::Number(_) => None,
        }
    }

    /// Checkbox semantics: the flag is either absent or `"on"`. A literal
    /// JSON `true` is read as `"on"`; anything else, `false` included, is invalid.
    fn as_checkbox(&self) -> Option<bool> {
        match self {
            FormValue::Text(text) if text.trim() == "on" => Some(true),
            FormValue::Bool(true) => Some(true),
            _ => None,
        }
    }
}

/// Raw render request as posted by a client.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RenderForm {
    pub colors_only: Option<FormValue>,
    pub color_key: Option<FormValue>,
    pub scale: Option<FormValue>,
    pub cut: Option<FormValue>,
    pub hatch: Option<FormValue>,
    pub hatch_density: Option<FormValue>,
}

/// A validated `#RRGGBB` colour code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ColorCode(String);

impl ColorCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Parameters accepted for one render invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderParams {
    pub colors_only: bool,
    pub color_key: Vec<ColorCode>,
    pub scale: f64,
    pub cut: bool,
    pub hatch: bool,
    pub hatch_density: Option<f64>,
}

impl RenderParams {
    /// Parameters with only the required scale set.
    pub fn with_scale(scale: f64) -> Self {
        Self {
            colors_only: false,
            color_key: Vec::new(),
            scale,
            cut: false,
            hatch: false,
            hatch_density: None,
        }
    }
}

/// Field-keyed validation messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors {
    pub errors: BTreeMap<&'static str, Vec<String>>,
}

impl ValidationErrors {
    fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.errors.entry(field).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn summary(&self) -> String {
        self.errors
            .values()
            .flatten()
            .cloned()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.summary())
    }
}

impl std::error::Error for ValidationErrors {}

impl TryFrom<RenderForm> for RenderParams {
    type Error = ValidationErrors;

    fn try_from(form: RenderForm) -> Result<Self, Self::Error> {
        let mut errors = ValidationErrors::default();

        let colors_only = match present(form.colors_only) {
            None => false,
            Some(value) => value.as_bool().unwrap_or_else(|| {
                errors.push("colors_only", "The colors_only field must be true or false.");
                false
            }),
        };

        let color_key = match present(form.color_key) {
            None => Vec::new(),
            Some(FormValue::Text(text)) if COLOR_KEY_PATTERN.is_match(&text) => text
                .split_whitespace()
                .map(|code| ColorCode(code.to_string()))
                .collect(),
            Some(_) => {
                errors.push("color_key", "The color_key format is invalid.");
                Vec::new()
            }
        };

        let scale = match present(form.scale) {
            None => {
                errors.push("scale", "The scale field is required.");
                0.0
            }
            Some(value) => number_at_least(&mut errors, "scale", &value, MIN_SCALE).unwrap_or(0.0),
        };

        let cut = checkbox(&mut errors, "cut", form.cut);
        let hatch = checkbox(&mut errors, "hatch", form.hatch);

        let hatch_density = present(form.hatch_density).and_then(|value| {
            number_at_least(&mut errors, "hatch_density", &value, MIN_HATCH_DENSITY)
        });

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(RenderParams {
            colors_only,
            color_key,
            scale,
            cut,
            hatch,
            hatch_density,
        })
    }
}

fn present(value: Option<FormValue>) -> Option<FormValue> {
    value.filter(|value| !value.is_blank())
}

fn checkbox(errors: &mut ValidationErrors, field: &'static str, value: Option<FormValue>) -> bool {
    match present(value) {
        None => false,
        Some(value) => value.as_checkbox().unwrap_or_else(|| {
            errors.push(field, format!("The selected {field} is invalid."));
            false
        }),
    }
}

fn number_at_least(
    errors: &mut ValidationErrors,
    field: &'static str,
    value: &FormValue,
    min: f64,
) -> Option<f64> {
    let Some(number) = value.as_number() else {
        errors.push(field, format!("The {field} must be a number."));
        return None;
    };
    if number < min {
        errors.push(field, format!("The {field} must be at least {min}."));
        return None;
    }
    Some(number)
}
