//! Typed call contracts
//!
//! A `Contract` is the closed set of function signatures one side accepts.
//! The dispatcher checks incoming calls against it before lookup: an unknown
//! name is reported as `FunctionNotExposed`, a shape mismatch as
//! `MalformedEnvelope`.

use crate::error::{ErrorInfo, kinds};
use serde_json::Value;
use std::collections::HashMap;

/// Shape of a single wire value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Any,
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl ValueKind {
    /// Check whether a value has this shape
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::Null => value.is_null(),
            Self::Bool => value.is_boolean(),
            Self::Number => value.is_number(),
            Self::String => value.is_string(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Number => "number",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// One positional parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Param {
    pub kind: ValueKind,
    pub optional: bool,
}

/// Signature of an exposed function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub params: Vec<Param>,
    pub returns: ValueKind,
}

impl Signature {
    /// Zero-argument signature returning anything
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            returns: ValueKind::Any,
        }
    }

    /// Append a required parameter
    pub fn param(mut self, kind: ValueKind) -> Self {
        self.params.push(Param {
            kind,
            optional: false,
        });
        self
    }

    /// Append an optional parameter. Optional parameters must trail required ones.
    pub fn optional(mut self, kind: ValueKind) -> Self {
        self.params.push(Param {
            kind,
            optional: true,
        });
        self
    }

    /// Set the result shape
    pub fn returns(mut self, kind: ValueKind) -> Self {
        self.returns = kind;
        self
    }

    fn required_count(&self) -> usize {
        self.params.iter().filter(|p| !p.optional).count()
    }

    /// Check an argument list against this signature
    pub fn check_args(&self, args: &[Value]) -> Result<(), ErrorInfo> {
        let required = self.required_count();
        if args.len() < required || args.len() > self.params.len() {
            let expected = if required == self.params.len() {
                required.to_string()
            } else {
                format!("{}..={}", required, self.params.len())
            };
            return Err(ErrorInfo::new(
                kinds::MALFORMED_ENVELOPE,
                format!(
                    "'{}' expects {} argument(s), got {}",
                    self.name,
                    expected,
                    args.len()
                ),
            ));
        }

        for (index, (param, arg)) in self.params.iter().zip(args).enumerate() {
            if !param.kind.accepts(arg) {
                return Err(ErrorInfo::new(
                    kinds::MALFORMED_ENVELOPE,
                    format!(
                        "'{}' argument {} must be {}",
                        self.name,
                        index,
                        param.kind.name()
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Check a result value against this signature
    pub fn check_result(&self, result: &Value) -> Result<(), ErrorInfo> {
        if self.returns.accepts(result) {
            Ok(())
        } else {
            Err(ErrorInfo::new(
                kinds::MALFORMED_ENVELOPE,
                format!("'{}' must return {}", self.name, self.returns.name()),
            ))
        }
    }
}

/// Closed set of signatures
#[derive(Debug, Clone, Default)]
pub struct Contract {
    signatures: HashMap<String, Signature>,
}

impl Contract {
    /// Create an empty contract
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a signature (replaces one with the same name)
    pub fn with(mut self, signature: Signature) -> Self {
        self.signatures.insert(signature.name.clone(), signature);
        self
    }

    /// Get a signature by name
    pub fn get(&self, name: &str) -> Option<&Signature> {
        self.signatures.get(name)
    }

    /// Whether the contract names this function
    pub fn contains(&self, name: &str) -> bool {
        self.signatures.contains_key(name)
    }

    /// Validate an incoming call
    pub fn check_call(&self, name: &str, args: &[Value]) -> Result<(), ErrorInfo> {
        match self.signatures.get(name) {
            Some(signature) => signature.check_args(args),
            None => Err(ErrorInfo::not_exposed(name)),
        }
    }

    /// Signature names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.signatures.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn contract() -> Contract {
        Contract::new()
            .with(Signature::new("DisplayMessage").param(ValueKind::String))
            .with(Signature::new("ShowHood"))
            .with(Signature::new("allCommand").optional(ValueKind::Any))
    }

    #[test]
    fn test_unknown_name_is_not_exposed() {
        let err = contract().check_call("render", &[]).unwrap_err();
        assert_eq!(err.kind, kinds::FUNCTION_NOT_EXPOSED);
    }

    #[test]
    fn test_arity_mismatch_is_malformed() {
        let err = contract().check_call("ShowHood", &[json!(1)]).unwrap_err();
        assert_eq!(err.kind, kinds::MALFORMED_ENVELOPE);
        assert!(err.message.contains("expects 0 argument(s), got 1"));
    }

    #[test]
    fn test_kind_mismatch_is_malformed() {
        let err = contract()
            .check_call("DisplayMessage", &[json!(42)])
            .unwrap_err();
        assert_eq!(err.kind, kinds::MALFORMED_ENVELOPE);
        assert!(err.message.contains("must be string"));
    }

    #[test]
    fn test_optional_parameter() {
        let contract = contract();
        assert!(contract.check_call("allCommand", &[]).is_ok());
        assert!(contract.check_call("allCommand", &[json!("open youtube")]).is_ok());

        let err = contract
            .check_call("allCommand", &[json!(1), json!(2)])
            .unwrap_err();
        assert!(err.message.contains("0..=1"));
    }

    #[test]
    fn test_names_sorted() {
        assert_eq!(
            contract().names(),
            vec!["DisplayMessage", "ShowHood", "allCommand"]
        );
    }

    #[test]
    fn test_result_check() {
        let sig = Signature::new("takeCommand").returns(ValueKind::String);
        assert!(sig.check_result(&json!("hello")).is_ok());

        let err = sig.check_result(&json!(null)).unwrap_err();
        assert_eq!(err.message, "'takeCommand' must return string");
    }
}
