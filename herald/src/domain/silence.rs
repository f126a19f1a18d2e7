//! Silence entity.

use chrono::{DateTime, Utc};
use evalexpr::{
    ContextWithMutableVariables, DefaultNumericTypes, HashMapContext, Node, Value as ExprValue,
    build_operator_tree,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{JsonMap, Receiver};
use crate::{Error, Result};

/// Key of the optional receiver rule in a `subscription` silence's target
/// expression.
pub const RULE_KEY: &str = "rule";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SilenceType {
    /// Silences one subscription, identified by `target_id`. A `rule` in the
    /// target expression narrows it to the receivers the rule accepts.
    Subscription,
    /// Silences by label expression.
    Matchers,
}

impl SilenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscription => "subscription",
            Self::Matchers => "matchers",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "subscription" => Some(Self::Subscription),
            "matchers" => Some(Self::Matchers),
            _ => None,
        }
    }
}

/// A suppression rule. Never hard-deleted; `deleted_at` ends it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Silence {
    pub id: String,
    pub namespace_id: i64,
    pub silence_type: SilenceType,
    pub target_id: Option<i64>,
    #[serde(default)]
    pub target_expression: JsonMap,
    pub creator: String,
    pub comment: String,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Silence {
    fn new(namespace_id: i64, silence_type: SilenceType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            namespace_id,
            silence_type,
            target_id: None,
            target_expression: JsonMap::new(),
            creator: String::new(),
            comment: String::new(),
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    /// Silence every route of one subscription.
    pub fn for_subscription(namespace_id: i64, subscription_id: i64) -> Self {
        let mut silence = Self::new(namespace_id, SilenceType::Subscription);
        silence.target_id = Some(subscription_id);
        silence
    }

    /// Silence only the receivers of a subscription for which `rule` holds.
    pub fn for_subscription_receivers(
        namespace_id: i64,
        subscription_id: i64,
        rule: impl Into<String>,
    ) -> Self {
        let mut silence = Self::for_subscription(namespace_id, subscription_id);
        silence
            .target_expression
            .insert(RULE_KEY.to_string(), Value::String(rule.into()));
        silence
    }

    /// Silence everything whose labels contain `expression`.
    pub fn for_matchers(namespace_id: i64, expression: JsonMap) -> Self {
        let mut silence = Self::new(namespace_id, SilenceType::Matchers);
        silence.target_expression = expression;
        silence
    }

    pub fn with_creator(mut self, creator: impl Into<String>) -> Self {
        self.creator = creator.into();
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        match self.silence_type {
            SilenceType::Subscription => match self.target_id {
                Some(id) if id != 0 => self.receiver_rule().map(|_| ()),
                _ => Err(Error::invalid(
                    "subscription silence requires a non-zero target id",
                )),
            },
            SilenceType::Matchers => {
                if self.target_expression.is_empty() {
                    Err(Error::invalid(
                        "matchers silence requires a non-empty target expression",
                    ))
                } else {
                    Ok(())
                }
            }
        }
    }
}

impl Silence {
    /// Compiled receiver rule of a `subscription` silence. `None` when the
    /// silence covers every receiver of the subscription.
    pub fn receiver_rule(&self) -> Result<Option<Node<DefaultNumericTypes>>> {
        if self.silence_type != SilenceType::Subscription {
            return Err(Error::invalid(format!(
                "silence {} is not a subscription silence",
                self.id
            )));
        }
        match self.target_expression.get(RULE_KEY) {
            None => Ok(None),
            Some(Value::String(rule)) if rule.trim().is_empty() => Ok(None),
            Some(Value::String(rule)) => build_operator_tree::<DefaultNumericTypes>(rule)
                .map(Some)
                .map_err(|e| Error::invalid(format!("invalid silence rule {rule:?}: {e}"))),
            Some(other) => Err(Error::invalid(format!(
                "silence rule must be a string, got {other}"
            ))),
        }
    }

    /// Whether this `subscription` silence applies to `receiver`, whose
    /// effective configuration is `config`.
    ///
    /// The rule sees `ID`, `Type` and every scalar configuration entry as
    /// `config_<key>`. It must evaluate to a boolean.
    pub fn applies_to_receiver(&self, receiver: &Receiver, config: &JsonMap) -> Result<bool> {
        let Some(rule) = self.receiver_rule()? else {
            return Ok(true);
        };

        let env = receiver_env(receiver, config)?;
        rule.eval_boolean_with_context(&env)
            .map_err(|e| Error::invalid(format!("silence {} rule: {e}", self.id)))
    }
}

fn receiver_env(
    receiver: &Receiver,
    config: &JsonMap,
) -> Result<HashMapContext<DefaultNumericTypes>> {
    let mut env = HashMapContext::<DefaultNumericTypes>::new();
    let mut set = |name: String, value: ExprValue<DefaultNumericTypes>| {
        env.set_value(name, value)
            .map_err(|e| Error::Other(format!("silence rule environment: {e}")))
    };

    set("ID".to_string(), ExprValue::Int(receiver.id))?;
    set(
        "Type".to_string(),
        ExprValue::String(receiver.receiver_type.clone()),
    )?;
    for (key, value) in config {
        if !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            continue;
        }
        let value = match value {
            Value::String(s) => ExprValue::String(s.clone()),
            Value::Bool(b) => ExprValue::Boolean(*b),
            Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => ExprValue::Int(i),
                (None, Some(f)) => ExprValue::Float(f),
                (None, None) => continue,
            },
            _ => continue,
        };
        set(format!("config_{key}"), value)?;
    }
    Ok(env)
}

/// Listing filter for active silences.
#[derive(Debug, Clone, Default)]
pub struct SilenceFilter {
    pub namespace_id: Option<i64>,
    /// Only `subscription` silences targeting this subscription.
    pub subscription_id: Option<i64>,
    pub silence_type: Option<SilenceType>,
}

/// How much of an alert's routing was suppressed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SilenceStatus {
    /// Every matched subscription was silenced.
    Total,
    /// Some matched subscriptions were silenced, others still fired.
    Partial,
}

impl SilenceStatus {
    /// Status of an alert given how many of its routes were silenced and how
    /// many still fired. `None` when nothing was silenced.
    pub fn from_routes(silenced: usize, fired: usize) -> Option<Self> {
        match (silenced, fired) {
            (0, _) => None,
            (_, 0) => Some(Self::Total),
            _ => Some(Self::Partial),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Total => "total",
            Self::Partial => "partial",
        }
    }
}
