//! Expression-language adapter used to resolve query placeholders.
//!
//! The [`ElEngine`] trait is the seam between the statement builder and whatever
//! evaluates `${...}` expressions. [`create_engine`] returns the built-in engine for a
//! configured [`ElEngineType`]; callers may supply their own implementation instead.

mod expr;
mod native;

pub use expr::{BinaryOp, Dialect, Expr, UnaryOp};
pub use native::{is_truthy, value_to_text, NativeElEngine};

use crate::query::QueryParameters;
use bson::Bson;
use mingo_common::{MingoError, Result};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Evaluates template expressions against a parameter map.
///
/// Implementations must be read-only over `parameters`: evaluating the same expression
/// twice with the same parameters yields the same value.
pub trait ElEngine: Send + Sync + fmt::Debug {
    /// The engine flavour, as named in the context configuration
    fn engine_type(&self) -> ElEngineType;

    /// Evaluate an expression to a value.
    ///
    /// # Errors
    /// - `UnresolvedVariable` when the expression reads an absent parameter
    /// - `ExpressionEvaluation` on syntax or type errors
    fn evaluate(&self, expression: &str, parameters: &QueryParameters) -> Result<Bson>;

    /// Evaluate a condition (`<if test="...">`).
    ///
    /// Absent parameters read as null here, so `test="status != null"` works for
    /// optional parameters.
    fn evaluate_condition(&self, expression: &str, parameters: &QueryParameters) -> Result<bool>;
}

/// Supported expression-language flavours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ElEngineType {
    /// Bare identifiers name parameters: `status != null`
    #[default]
    Jexl,
    /// Parameters are `#`-prefixed: `#status != null`
    SpringEl,
}

impl ElEngineType {
    /// Name used in context documents
    pub fn name(&self) -> &'static str {
        match self {
            ElEngineType::Jexl => "jexl",
            ElEngineType::SpringEl => "springEL",
        }
    }

    /// Look up an engine type by its configuration name
    pub fn from_name(name: &str) -> Option<Self> {
        [ElEngineType::Jexl, ElEngineType::SpringEl]
            .into_iter()
            .find(|ty| ty.name() == name)
    }

    fn dialect(&self) -> Dialect {
        match self {
            ElEngineType::Jexl => Dialect::Jexl,
            ElEngineType::SpringEl => Dialect::SpringEl,
        }
    }
}

impl fmt::Display for ElEngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ElEngineType {
    type Err = MingoError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s)
            .ok_or_else(|| MingoError::Parse(format!("unsupported query analyzer type '{}'", s)))
    }
}

/// Create the built-in engine for the given type
pub fn create_engine(engine_type: ElEngineType) -> Arc<dyn ElEngine> {
    Arc::new(NativeElEngine::new(engine_type.dialect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_type_names() {
        assert_eq!(ElEngineType::from_name("jexl"), Some(ElEngineType::Jexl));
        assert_eq!(ElEngineType::from_name("springEL"), Some(ElEngineType::SpringEl));
        assert_eq!(ElEngineType::from_name("mvel"), None);
        assert_eq!(ElEngineType::SpringEl.to_string(), "springEL");
    }

    #[test]
    fn test_engine_type_from_str_error() {
        let err = "ognl".parse::<ElEngineType>().unwrap_err();
        assert!(matches!(err, MingoError::Parse(_)));
    }

    #[test]
    fn test_create_engine_reports_type() {
        assert_eq!(create_engine(ElEngineType::SpringEl).engine_type(), ElEngineType::SpringEl);
        assert_eq!(create_engine(ElEngineType::Jexl).engine_type(), ElEngineType::Jexl);
    }
}
