use statewise_types::context::Context;
use statewise_types::error::{codes, DefinitionError, ExecutionError};

use super::{Behavior, Edge, EdgeKind, Progress, Tick};
use crate::workflow::choice_rule::ChoiceRule;
use crate::workflow::definition::Fields;
use crate::workflow::io::InputOutput;

/// Branches to the first rule that matches, else `Default`.
#[derive(Debug, Clone, PartialEq)]
pub struct Choice {
    pub(crate) choices: Vec<(ChoiceRule, String)>,
    pub(crate) default: Option<String>,
    pub(crate) io: InputOutput,
}

impl Choice {
    pub fn parse(fields: &Fields<'_>) -> Result<Self, DefinitionError> {
        let rules = fields.array("Choices")?.ok_or_else(|| fields.missing("Choices"))?;
        if rules.is_empty() {
            return Err(fields.error("field \"Choices\" must not be empty"));
        }
        let choices = rules
            .iter()
            .enumerate()
            .map(|(i, rule)| {
                let scoped = Fields::new(format!("{}.Choices[{i}]", fields.scope()), rule)?;
                let next = scoped.required_str("Next")?.to_string();
                Ok((ChoiceRule::parse(&scoped, true)?, next))
            })
            .collect::<Result<Vec<_>, DefinitionError>>()?;

        Ok(Self {
            choices,
            default: fields.str("Default")?.map(str::to_string),
            io: InputOutput::parse(fields, false, false)?,
        })
    }

    pub(crate) fn edges(&self) -> Vec<Edge> {
        let mut edges: Vec<Edge> = self
            .choices
            .iter()
            .map(|(rule, next)| Edge {
                target: next.clone(),
                kind: EdgeKind::Choice,
                label: Some(rule.to_dot_label()),
            })
            .collect();
        if let Some(default) = &self.default {
            edges.push(Edge {
                target: default.clone(),
                kind: EdgeKind::Default,
                label: Some("Default".to_string()),
            });
        }
        edges
    }
}

impl Behavior for Choice {
    fn start(&self, ctx: &mut Context, _tick: &Tick<'_>) -> Result<(), ExecutionError> {
        let context = ctx.to_value();
        let input = self.io.filter_input(&context, &ctx.state.input)?;

        let mut target = None;
        for (rule, next) in &self.choices {
            if rule.evaluate(&context, &input)? {
                target = Some(next);
                break;
            }
        }
        let next = target.or(self.default.as_ref()).ok_or_else(|| {
            ExecutionError::new(codes::NO_CHOICE_MATCHED, Some("no choice rule matched".to_string()))
        })?;

        ctx.state.output = Some(self.io.filter_output(&context, &input)?);
        ctx.state.next_state = Some(next.clone());
        Ok(())
    }

    fn poll(&self, _ctx: &mut Context, _tick: &Tick<'_>) -> Result<Progress, ExecutionError> {
        Ok(Progress::Complete)
    }
}
