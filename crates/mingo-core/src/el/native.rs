//! Built-in expression engine

use super::expr::{BinaryOp, Dialect, Expr, UnaryOp};
use super::{ElEngine, ElEngineType};
use crate::query::QueryParameters;
use bson::Bson;
use mingo_common::{MingoError, Result};
use std::cmp::Ordering;

/// Tree-walking evaluator for the JEXL / Spring-EL subset used by query templates
#[derive(Debug, Clone)]
pub struct NativeElEngine {
    dialect: Dialect,
}

impl NativeElEngine {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }
}

impl ElEngine for NativeElEngine {
    fn engine_type(&self) -> ElEngineType {
        match self.dialect {
            Dialect::Jexl => ElEngineType::Jexl,
            Dialect::SpringEl => ElEngineType::SpringEl,
        }
    }

    fn evaluate(&self, expression: &str, parameters: &QueryParameters) -> Result<Bson> {
        let expr = Expr::parse(expression, self.dialect)?;
        Evaluator {
            parameters,
            lenient: false,
        }
        .eval(&expr)
    }

    fn evaluate_condition(&self, expression: &str, parameters: &QueryParameters) -> Result<bool> {
        let expr = Expr::parse(expression, self.dialect)?;
        let value = Evaluator {
            parameters,
            lenient: true,
        }
        .eval(&expr)?;
        Ok(is_truthy(&value))
    }
}

/// Truthiness used by `!`, `&&`, `||` and conditions
pub fn is_truthy(value: &Bson) -> bool {
    match value {
        Bson::Null | Bson::Undefined => false,
        Bson::Boolean(b) => *b,
        Bson::String(s) => !s.is_empty(),
        Bson::Int32(n) => *n != 0,
        Bson::Int64(n) => *n != 0,
        Bson::Double(n) => *n != 0.0,
        Bson::Array(items) => !items.is_empty(),
        Bson::Document(doc) => !doc.is_empty(),
        _ => true,
    }
}

/// Text form of a value when spliced into a larger string
pub fn value_to_text(value: &Bson) -> String {
    match value {
        Bson::String(s) => s.clone(),
        Bson::Null => "null".to_string(),
        Bson::Boolean(b) => b.to_string(),
        Bson::Int32(n) => n.to_string(),
        Bson::Int64(n) => n.to_string(),
        Bson::Double(n) => n.to_string(),
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::DateTime(dt) => dt
            .try_to_rfc3339_string()
            .unwrap_or_else(|_| dt.timestamp_millis().to_string()),
        other => other.clone().into_relaxed_extjson().to_string(),
    }
}

#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn of(value: &Bson) -> Option<Number> {
        match value {
            Bson::Int32(n) => Some(Number::Int(i64::from(*n))),
            Bson::Int64(n) => Some(Number::Int(*n)),
            Bson::Double(n) => Some(Number::Float(*n)),
            _ => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Number::Int(n) => n as f64,
            Number::Float(n) => n,
        }
    }
}

fn int_to_bson(value: i64) -> Bson {
    match i32::try_from(value) {
        Ok(small) => Bson::Int32(small),
        Err(_) => Bson::Int64(value),
    }
}

fn type_error(msg: String) -> MingoError {
    MingoError::ExpressionEvaluation(msg)
}

struct Evaluator<'a> {
    parameters: &'a QueryParameters,
    /// Absent parameters read as null instead of failing
    lenient: bool,
}

impl Evaluator<'_> {
    fn eval(&self, expr: &Expr) -> Result<Bson> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Variable(name) => match self.parameters.get(name) {
                Some(value) => Ok(value.clone()),
                None if self.lenient => Ok(Bson::Null),
                None => Err(MingoError::UnresolvedVariable(name.clone())),
            },
            Expr::List(items) => Ok(Bson::Array(
                items.iter().map(|item| self.eval(item)).collect::<Result<_>>()?,
            )),
            Expr::Member(base, name) => match self.eval(base)? {
                Bson::Null => Ok(Bson::Null),
                Bson::Document(doc) => Ok(doc.get(name).cloned().unwrap_or(Bson::Null)),
                other => Err(type_error(format!(
                    "cannot read property '{}' of {:?}",
                    name,
                    other.element_type()
                ))),
            },
            Expr::Index(base, index) => {
                let base = self.eval(base)?;
                let index = self.eval(index)?;
                self.index(base, index)
            }
            Expr::Unary(UnaryOp::Not, operand) => Ok(Bson::Boolean(!is_truthy(&self.eval(operand)?))),
            Expr::Unary(UnaryOp::Neg, operand) => match self.eval(operand)? {
                Bson::Int32(n) => Ok(int_to_bson(-i64::from(n))),
                Bson::Int64(n) => n
                    .checked_neg()
                    .map(Bson::Int64)
                    .ok_or_else(|| type_error("integer overflow".to_string())),
                Bson::Double(n) => Ok(Bson::Double(-n)),
                other => Err(type_error(format!("cannot negate {:?}", other.element_type()))),
            },
            Expr::Binary(BinaryOp::And, left, right) => {
                if !is_truthy(&self.eval(left)?) {
                    return Ok(Bson::Boolean(false));
                }
                Ok(Bson::Boolean(is_truthy(&self.eval(right)?)))
            }
            Expr::Binary(BinaryOp::Or, left, right) => {
                if is_truthy(&self.eval(left)?) {
                    return Ok(Bson::Boolean(true));
                }
                Ok(Bson::Boolean(is_truthy(&self.eval(right)?)))
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                binary(*op, &left, &right)
            }
            Expr::Call(name, args) => {
                let args = args.iter().map(|arg| self.eval(arg)).collect::<Result<Vec<_>>>()?;
                call(name, &args)
            }
        }
    }

    fn index(&self, base: Bson, index: Bson) -> Result<Bson> {
        match (base, index) {
            (Bson::Null, _) => Ok(Bson::Null),
            (Bson::Array(items), index) => {
                let Some(Number::Int(i)) = Number::of(&index) else {
                    return Err(type_error(format!(
                        "array index must be an integer, got {:?}",
                        index.element_type()
                    )));
                };
                Ok(usize::try_from(i)
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or(Bson::Null))
            }
            (Bson::Document(doc), Bson::String(key)) => Ok(doc.get(&key).cloned().unwrap_or(Bson::Null)),
            (base, index) => Err(type_error(format!(
                "cannot index {:?} with {:?}",
                base.element_type(),
                index.element_type()
            ))),
        }
    }
}

fn values_equal(left: &Bson, right: &Bson) -> bool {
    match (Number::of(left), Number::of(right)) {
        (Some(Number::Int(a)), Some(Number::Int(b))) => a == b,
        (Some(a), Some(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn compare(left: &Bson, right: &Bson) -> Result<Ordering> {
    let ordering = match (left, right) {
        (Bson::String(a), Bson::String(b)) => Some(a.cmp(b)),
        (Bson::DateTime(a), Bson::DateTime(b)) => Some(a.cmp(b)),
        _ => match (Number::of(left), Number::of(right)) {
            (Some(Number::Int(a)), Some(Number::Int(b))) => Some(a.cmp(&b)),
            (Some(a), Some(b)) => a.as_f64().partial_cmp(&b.as_f64()),
            _ => None,
        },
    };
    ordering.ok_or_else(|| {
        type_error(format!(
            "cannot compare {:?} with {:?}",
            left.element_type(),
            right.element_type()
        ))
    })
}

fn arithmetic(op: BinaryOp, left: &Bson, right: &Bson) -> Result<Bson> {
    let (Some(a), Some(b)) = (Number::of(left), Number::of(right)) else {
        return Err(type_error(format!(
            "operator {:?} requires numbers, got {:?} and {:?}",
            op,
            left.element_type(),
            right.element_type()
        )));
    };

    match (a, b) {
        (Number::Int(a), Number::Int(b)) => {
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div if b == 0 => return Err(type_error("division by zero".to_string())),
                BinaryOp::Div => a.checked_div(b),
                BinaryOp::Mod if b == 0 => return Err(type_error("division by zero".to_string())),
                BinaryOp::Mod => a.checked_rem(b),
                _ => None,
            };
            result
                .map(int_to_bson)
                .ok_or_else(|| type_error("integer overflow".to_string()))
        }
        (a, b) => {
            let (a, b) = (a.as_f64(), b.as_f64());
            let result = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                BinaryOp::Mod => a % b,
                _ => return Err(type_error(format!("unsupported numeric operator {:?}", op))),
            };
            Ok(Bson::Double(result))
        }
    }
}

fn binary(op: BinaryOp, left: &Bson, right: &Bson) -> Result<Bson> {
    match op {
        BinaryOp::Eq => Ok(Bson::Boolean(values_equal(left, right))),
        BinaryOp::Ne => Ok(Bson::Boolean(!values_equal(left, right))),
        BinaryOp::Lt => Ok(Bson::Boolean(compare(left, right)? == Ordering::Less)),
        BinaryOp::Le => Ok(Bson::Boolean(compare(left, right)? != Ordering::Greater)),
        BinaryOp::Gt => Ok(Bson::Boolean(compare(left, right)? == Ordering::Greater)),
        BinaryOp::Ge => Ok(Bson::Boolean(compare(left, right)? != Ordering::Less)),
        BinaryOp::Add if matches!(left, Bson::String(_)) || matches!(right, Bson::String(_)) => {
            Ok(Bson::String(format!("{}{}", value_to_text(left), value_to_text(right))))
        }
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            arithmetic(op, left, right)
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("logical operators short-circuit in eval"),
    }
}

fn call(name: &str, args: &[Bson]) -> Result<Bson> {
    let [arg] = args else {
        return Err(type_error(format!(
            "function '{}' expects 1 argument, got {}",
            name,
            args.len()
        )));
    };

    match name {
        "empty" => Ok(Bson::Boolean(match arg {
            Bson::Null | Bson::Undefined => true,
            Bson::String(s) => s.is_empty(),
            Bson::Array(items) => items.is_empty(),
            Bson::Document(doc) => doc.is_empty(),
            _ => false,
        })),
        "size" => {
            let size = match arg {
                Bson::Null => 0,
                Bson::String(s) => s.chars().count(),
                Bson::Array(items) => items.len(),
                Bson::Document(doc) => doc.len(),
                other => {
                    return Err(type_error(format!(
                        "size() is undefined for {:?}",
                        other.element_type()
                    )))
                }
            };
            Ok(int_to_bson(size as i64))
        }
        other => Err(type_error(format!("unknown function '{}'", other))),
    }
}
