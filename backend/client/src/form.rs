//! Raw form input held between submissions.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::errors::{DappError, Result};

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub required: bool,
    pub default: &'static str,
}

impl FieldSpec {
    pub const fn required(name: &'static str) -> Self {
        Self {
            name,
            required: true,
            default: "",
        }
    }

    pub const fn optional(name: &'static str, default: &'static str) -> Self {
        Self {
            name,
            required: false,
            default,
        }
    }
}

/// Snapshot of field values handed to a call builder.
pub type FormValues = BTreeMap<&'static str, String>;

/// String-typed fields with presence-only validation.
///
/// Values are not parsed or checked here; malformed input fails later when
/// the call is ABI-encoded.
#[derive(Debug, Clone)]
pub struct FormState {
    specs: &'static [FieldSpec],
    values: FormValues,
}

impl FormState {
    pub fn new(specs: &'static [FieldSpec]) -> Self {
        let values = specs.iter().map(|s| (s.name, s.default.to_string())).collect();
        Self { specs, values }
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) -> Result<()> {
        let spec = self
            .specs
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| DappError::Validation(format!("Unknown field: {name}")))?;
        self.values.insert(spec.name, value.into());
        Ok(())
    }

    /// Apply a batch of inputs, rejecting unknown names before touching anything.
    pub fn fill<'a, I>(&mut self, inputs: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let inputs: Vec<_> = inputs.into_iter().collect();
        if let Some((name, _)) = inputs
            .iter()
            .find(|(name, _)| !self.specs.iter().any(|s| s.name == *name))
        {
            return Err(DappError::Validation(format!("Unknown field: {name}")));
        }
        for (name, value) in inputs {
            self.set(name, value)?;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> &str {
        self.values.get(name).map(String::as_str).unwrap_or("")
    }

    /// All required fields must be non-empty.
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<_> = self
            .specs
            .iter()
            .filter(|s| s.required && self.get(s.name).is_empty())
            .map(|s| s.name)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(DappError::Validation(format!(
                "Please fill in all fields (missing: {})",
                missing.join(", ")
            )))
        }
    }

    pub fn values(&self) -> FormValues {
        self.values.clone()
    }

    pub fn reset(&mut self) {
        for spec in self.specs {
            self.values.insert(spec.name, spec.default.to_string());
        }
    }

    /// True when every field holds its default.
    pub fn is_pristine(&self) -> bool {
        self.specs.iter().all(|s| self.get(s.name) == s.default)
    }
}

impl Serialize for FormState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.values.serialize(serializer)
    }
}
