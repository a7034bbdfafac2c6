//! Query bodies with optional conditional blocks

use super::template::Template;
use crate::el::ElEngine;
use crate::query::QueryParameters;
use mingo_common::{MingoError, Result};
use std::borrow::Cow;

/// One `<if>` / `<elseIf>` / `<else>` arm. `test` is `None` for `<else>`.
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub test: Option<String>,
    pub parts: Vec<BodyPart>,
}

/// A piece of raw body text
#[derive(Debug, Clone, PartialEq)]
pub enum BodyPart {
    Text(String),
    /// First arm whose test holds is spliced in; nothing if none holds
    Choice(Vec<Branch>),
}

/// Which arm of each choice to take when assembling the body text
pub(crate) enum Selection<'a> {
    Runtime {
        engine: &'a dyn ElEngine,
        parameters: &'a QueryParameters,
    },
    AllTrue,
    AllFalse,
}

impl Selection<'_> {
    fn pick<'b>(&self, branches: &'b [Branch]) -> Result<Option<&'b Branch>> {
        match self {
            Selection::AllTrue => Ok(branches.first()),
            Selection::AllFalse => Ok(branches.iter().find(|b| b.test.is_none())),
            Selection::Runtime { engine, parameters } => {
                for branch in branches {
                    match &branch.test {
                        None => return Ok(Some(branch)),
                        Some(test) => {
                            if engine.evaluate_condition(test, parameters)? {
                                return Ok(Some(branch));
                            }
                        }
                    }
                }
                Ok(None)
            }
        }
    }
}

pub(crate) fn assemble(parts: &[BodyPart], selection: &Selection<'_>, out: &mut String) -> Result<()> {
    for part in parts {
        match part {
            BodyPart::Text(text) => out.push_str(text),
            BodyPart::Choice(branches) => {
                if let Some(branch) = selection.pick(branches)? {
                    assemble(&branch.parts, selection, out)?;
                }
            }
        }
    }
    Ok(())
}

/// The body of a query definition.
///
/// Bodies without conditionals are parsed once at load time; bodies with conditionals
/// keep their parts and are assembled and parsed on every build.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryBody {
    Static(Template),
    Dynamic(Vec<BodyPart>),
}

impl QueryBody {
    /// Build a body from its parts, parsing it right away if it has no conditionals
    pub fn from_parts(parts: Vec<BodyPart>) -> Result<Self> {
        if parts.iter().any(|p| matches!(p, BodyPart::Choice(_))) {
            return Ok(QueryBody::Dynamic(parts));
        }
        let mut text = String::new();
        assemble(&parts, &Selection::AllFalse, &mut text)?;
        Ok(QueryBody::Static(Template::parse(&text)?))
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, QueryBody::Dynamic(_))
    }

    /// The template for one invocation
    pub fn template(
        &self,
        engine: &dyn ElEngine,
        parameters: &QueryParameters,
    ) -> Result<Cow<'_, Template>> {
        match self {
            QueryBody::Static(template) => Ok(Cow::Borrowed(template)),
            QueryBody::Dynamic(parts) => {
                let mut text = String::new();
                assemble(parts, &Selection::Runtime { engine, parameters }, &mut text)?;
                // Load time only checked the all-true and all-false arms
                let template = Template::parse(&text).map_err(|e| match e {
                    MingoError::Parse(msg) => MingoError::ExpressionEvaluation(format!(
                        "conditional body assembled to invalid JSON for these parameters: {}",
                        msg
                    )),
                    other => other,
                })?;
                Ok(Cow::Owned(template))
            }
        }
    }

    /// Templates to validate at load time: the body as-is, or for conditional bodies the
    /// variants with every condition false and every condition true
    pub fn variants(&self) -> Result<Vec<Cow<'_, Template>>> {
        match self {
            QueryBody::Static(template) => Ok(vec![Cow::Borrowed(template)]),
            QueryBody::Dynamic(parts) => [Selection::AllFalse, Selection::AllTrue]
                .iter()
                .map(|selection| {
                    let mut text = String::new();
                    assemble(parts, selection, &mut text)?;
                    Template::parse(&text).map(Cow::Owned)
                })
                .collect(),
        }
    }
}
