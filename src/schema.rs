// Copyright (c) 2022 Espresso Systems (espressosys.com)
// This file is part of the Net Contract library.

// This program is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License as published by the Free Software Foundation, either version 3 of the License, or (at your option) any later version.
// This program is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
// You should have received a copy of the GNU General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Declared data shapes and the adapter which checks data against them.
//!
//! A [Schema] comes in three kinds. An example value or a type name only documents the shape of
//! the data and has no effect at runtime. A checked schema carries a [Validate] implementation
//! which is run on every incoming body and query. Rust cannot infer request and response types
//! from a runtime value, so checked schemas are the only runtime guarantee this crate gives about
//! the data flowing through an endpoint.

use crate::error::ContractError;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Debug, Display, Formatter};
use std::marker::PhantomData;
use std::sync::Arc;

/// A single reason why a value does not match its schema.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Violation {
    /// JSON pointer to the offending part of the instance. Empty for the root.
    pub path: String,
    pub message: String,
}

impl Violation {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl Display for Violation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Failure of a checked schema.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

impl ValidationError {
    pub fn single(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            violations: vec![Violation::new(path, message)],
        }
    }

    /// Prefix every violation path with `prefix`, e.g. the name of a query parameter.
    pub fn nested(mut self, prefix: &str) -> Self {
        for violation in &mut self.violations {
            violation.path = format!("/{}{}", prefix, violation.path);
        }
        self
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for violation in &self.violations {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{}", violation)?;
            first = false;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// A runtime check which either accepts (and possibly coerces) a value or rejects it.
pub trait Validate: Send + Sync {
    fn validate(&self, data: Value) -> Result<Value, ValidationError>;
}

/// A declared data shape.
#[derive(Clone)]
pub enum Schema {
    /// A plain example of the data. Never checked.
    Example(Value),
    /// The name of the Rust type the data corresponds to. Never checked.
    Type(&'static str),
    /// A schema backed by a runtime validator.
    Checked(Arc<dyn Validate>),
}

impl Schema {
    pub fn example(value: impl Into<Value>) -> Self {
        Self::Example(value.into())
    }

    /// Document the data as an instance of `T` without checking it.
    pub fn of<T>() -> Self {
        Self::Type(std::any::type_name::<T>())
    }

    /// Check the data by deserializing it into `T`.
    pub fn typed<T>() -> Self
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        Self::Checked(Arc::new(Typed::<T>::default()))
    }

    /// Check the data against a JSON Schema document.
    pub fn json(document: Value) -> Result<Self, ContractError> {
        Ok(Self::Checked(Arc::new(JsonSchema::compile(document)?)))
    }

    pub fn checked(validator: impl Validate + 'static) -> Self {
        Self::Checked(Arc::new(validator))
    }

    /// The runtime check backing this schema, if it has one.
    pub fn validator(&self) -> Option<&dyn Validate> {
        match self {
            Self::Checked(validator) => Some(validator.as_ref()),
            _ => None,
        }
    }
}

impl Debug for Schema {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Example(value) => f.debug_tuple("Example").field(value).finish(),
            Self::Type(name) => f.debug_tuple("Type").field(name).finish(),
            Self::Checked(_) => f.debug_tuple("Checked").finish(),
        }
    }
}

/// Check `data` against `schema`.
///
/// Schemas without a validator, and a missing schema, return `data` unchanged.
pub fn check(schema: Option<&Schema>, data: Value) -> Result<Value, ValidationError> {
    match schema.and_then(Schema::validator) {
        Some(validator) => validator.validate(data),
        None => Ok(data),
    }
}

/// Validator which round-trips the data through the serde type `T`.
///
/// Defaults declared on `T` are filled in, so the returned value may differ from the input.
pub struct Typed<T>(PhantomData<fn() -> T>);

impl<T> Default for Typed<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<T: Serialize + DeserializeOwned> Validate for Typed<T> {
    fn validate(&self, data: Value) -> Result<Value, ValidationError> {
        let parsed: T = serde_json::from_value(data)
            .map_err(|err| ValidationError::single("", err.to_string()))?;
        serde_json::to_value(parsed).map_err(|err| ValidationError::single("", err.to_string()))
    }
}

/// Validator backed by a compiled JSON Schema document.
pub struct JsonSchema {
    validator: jsonschema::Validator,
}

impl JsonSchema {
    pub fn compile(document: Value) -> Result<Self, ContractError> {
        let validator =
            jsonschema::validator_for(&document).map_err(|err| ContractError::InvalidSchema {
                message: err.to_string(),
            })?;
        Ok(Self { validator })
    }
}

impl Validate for JsonSchema {
    fn validate(&self, data: Value) -> Result<Value, ValidationError> {
        let violations = self
            .validator
            .iter_errors(&data)
            .map(|err| Violation::new(err.instance_path.to_string(), err.to_string()))
            .collect::<Vec<_>>();
        if violations.is_empty() {
            Ok(data)
        } else {
            Err(ValidationError { violations })
        }
    }
}
