use serde::{Deserialize, Serialize};

use crate::attribute_value::AttributeValue;
use crate::context::EvaluationContext;

/// TargetingRule maps contexts whose attribute satisfies a predicate to a named variation.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetingRule {
    pub attribute: String,
    pub operator: Operator,
    pub values: Vec<String>,
    pub variation: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    In,
    NotIn,
    GreaterThan,
    LessThan,
}

impl TargetingRule {
    pub fn new<I, S>(
        attribute: impl Into<String>,
        operator: Operator,
        values: I,
        variation: impl Into<String>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TargetingRule {
            attribute: attribute.into(),
            operator,
            values: values.into_iter().map(Into::into).collect(),
            variation: variation.into(),
        }
    }

    /// A rule matches when the context carries the attribute and the operator holds for it.
    /// Missing and null attributes never match, not even the negated operators.
    pub fn matches(&self, context: &EvaluationContext) -> bool {
        match context.attribute(&self.attribute) {
            None | Some(AttributeValue::Null) => false,
            Some(value) => self.operator.matches(value, &self.values),
        }
    }
}

/// Returns the index and the first rule in `rules` that matches `context`.
pub fn first_matching_rule<'a>(
    rules: &'a [TargetingRule],
    context: &EvaluationContext,
) -> Option<(usize, &'a TargetingRule)> {
    rules.iter().enumerate().find(|(_, rule)| rule.matches(context))
}

impl Operator {
    fn matches(self, lhs: &AttributeValue, values: &[String]) -> bool {
        match self {
            Operator::Equals => scalar_op(lhs, |l| values.iter().any(|r| fold(r) == l)),
            Operator::NotEquals => scalar_op(lhs, |l| values.iter().all(|r| fold(r) != l)),

            Operator::Contains => scalar_op(lhs, |l| values.iter().any(|r| l.contains(&fold(r)))),
            Operator::NotContains => {
                scalar_op(lhs, |l| values.iter().all(|r| !l.contains(&fold(r))))
            }

            // set membership also looks inside array attributes
            Operator::In => lhs.find(|v| in_set(v, values)).is_some(),
            Operator::NotIn => lhs.find(|v| in_set(v, values)).is_none(),

            Operator::GreaterThan => numeric_op(lhs, values, |l, r| l > r),
            Operator::LessThan => numeric_op(lhs, values, |l, r| l < r),
        }
    }
}

fn fold(s: &str) -> String {
    s.to_lowercase()
}

fn scalar_op<F: Fn(&str) -> bool>(lhs: &AttributeValue, f: F) -> bool {
    match lhs.to_comparable_string() {
        Some(l) => f(&fold(&l)),
        None => false,
    }
}

fn in_set(value: &AttributeValue, values: &[String]) -> bool {
    match value.to_comparable_string() {
        Some(v) => {
            let v = fold(&v);
            values.iter().any(|r| fold(r) == v)
        }
        None => false,
    }
}

// non-numeric rule values are skipped rather than failing the whole rule
fn numeric_op<F: Fn(f64, f64) -> bool>(lhs: &AttributeValue, values: &[String], f: F) -> bool {
    match lhs.to_f64() {
        Some(l) => values
            .iter()
            .filter_map(|r| r.trim().parse::<f64>().ok())
            .any(|r| f(l, r)),
        None => false,
    }
}
