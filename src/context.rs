use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AttributeValue;

/// EvaluationContext describes the request a flag is evaluated for: who is asking, on behalf of
/// which tenant, with which attributes, and at what instant.
///
/// Contexts are built once per evaluation with [ContextBuilder] and never change afterwards.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tenant_id: Option<String>,
    #[serde(default)]
    attributes: HashMap<String, AttributeValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    evaluated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time_zone: Option<String>,
}

impl EvaluationContext {
    /// A context with no subject and no attributes, evaluated at the current instant.
    pub fn anonymous() -> Self {
        EvaluationContext::default()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    /// The id variations and targeting are attributed to: the tenant if there is one, otherwise
    /// the user.
    pub fn subject_id(&self) -> Option<&str> {
        self.tenant_id().or_else(|| self.user_id())
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    pub fn attributes(&self) -> &HashMap<String, AttributeValue> {
        &self.attributes
    }

    /// The instant the caller pinned for this evaluation, if any.
    pub fn evaluated_at(&self) -> Option<DateTime<Utc>> {
        self.evaluated_at
    }

    /// IANA time zone used to read operational windows.
    pub fn time_zone(&self) -> Option<&str> {
        self.time_zone.as_deref()
    }
}

/// Contains methods for building an [EvaluationContext].
///
/// If you do not set any values, the context is anonymous, has no attributes, is evaluated at
/// whatever instant the evaluator's clock reports, and reads operational windows in each
/// window's own time zone.
#[derive(Clone, Debug, Default)]
pub struct ContextBuilder {
    user_id: Option<String>,
    tenant_id: Option<String>,
    attributes: HashMap<String, AttributeValue>,
    evaluated_at: Option<DateTime<Utc>>,
    time_zone: Option<String>,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a builder for the user `user_id`.
    pub fn for_user(user_id: impl Into<String>) -> Self {
        let mut builder = Self::default();
        builder.user(user_id);
        builder
    }

    pub fn user(&mut self, user_id: impl Into<String>) -> &mut Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn tenant(&mut self, tenant_id: impl Into<String>) -> &mut Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Sets an attribute to a string value. Exactly equivalent to calling
    /// `self.set_value(attribute_name, AttributeValue::String(value.into()))`.
    pub fn set_string(&mut self, attribute_name: &str, value: impl Into<String>) -> &mut Self {
        self.set_value(attribute_name, AttributeValue::String(value.into()))
    }

    pub fn set_float(&mut self, attribute_name: &str, value: f64) -> &mut Self {
        self.set_value(attribute_name, AttributeValue::Number(value))
    }

    pub fn set_bool(&mut self, attribute_name: &str, value: bool) -> &mut Self {
        self.set_value(attribute_name, AttributeValue::Bool(value))
    }

    /// Sets the value of any attribute. Setting an attribute to [AttributeValue::Null] removes
    /// it.
    pub fn set_value(&mut self, attribute_name: &str, value: AttributeValue) -> &mut Self {
        match value {
            AttributeValue::Null => {
                self.attributes.remove(attribute_name);
            }
            _ => {
                self.attributes.insert(attribute_name.to_owned(), value);
            }
        }
        self
    }

    /// Pins the evaluation instant instead of asking the clock.
    pub fn at(&mut self, instant: DateTime<Utc>) -> &mut Self {
        self.evaluated_at = Some(instant);
        self
    }

    pub fn time_zone(&mut self, time_zone: impl Into<String>) -> &mut Self {
        self.time_zone = Some(time_zone.into());
        self
    }

    pub fn build(&self) -> EvaluationContext {
        EvaluationContext {
            user_id: self.user_id.clone(),
            tenant_id: self.tenant_id.clone(),
            attributes: self.attributes.clone(),
            evaluated_at: self.evaluated_at,
            time_zone: self.time_zone.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use spectral::prelude::*;

    #[test]
    fn builder_defaults_to_anonymous() {
        let context = ContextBuilder::new().build();
        assert_that!(context).is_equal_to(EvaluationContext::anonymous());
        assert_that!(context.subject_id()).is_none();
        assert_that!(context.evaluated_at()).is_none();
    }

    #[test]
    fn tenant_is_preferred_subject() {
        let user_only = ContextBuilder::for_user("alice").build();
        assert_that!(user_only.subject_id()).contains_value("alice");

        let with_tenant = ContextBuilder::for_user("alice").tenant("acme").build();
        assert_that!(with_tenant.subject_id()).contains_value("acme");
        assert_that!(with_tenant.user_id()).contains_value("alice");
    }

    #[test]
    fn null_removes_attribute() {
        let context = ContextBuilder::new()
            .set_string("plan", "pro")
            .set_value("plan", AttributeValue::Null)
            .set_float("seats", 12.0)
            .build();
        assert_that!(context.attribute("plan")).is_none();
        assert_that!(context.attribute("seats")).contains_value(&AttributeValue::Number(12.0));
    }

    #[test]
    fn built_context_is_detached_from_builder() {
        let mut builder = ContextBuilder::for_user("alice");
        let first = builder.build();
        builder.set_bool("beta", true);
        assert_that!(first.attribute("beta")).is_none();
        assert_that!(builder.build().attribute("beta")).is_some();
    }

    #[test]
    fn deserializes_from_camel_case() {
        let context: EvaluationContext = serde_json::from_str(
            r#"{
                "userId": "alice",
                "attributes": {"country": "NZ"},
                "evaluatedAt": "2024-03-04T12:00:00Z",
                "timeZone": "Pacific/Auckland"
            }"#,
        )
        .unwrap();
        assert_that!(context.user_id()).contains_value("alice");
        assert_that!(context.time_zone()).contains_value("Pacific/Auckland");
        assert_that!(context.evaluated_at())
            .contains_value(Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap());
    }
}
