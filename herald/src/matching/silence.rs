//! Silence engine.
//!
//! Silences are evaluated against active silences only, at three levels:
//!
//! - alert: a `matchers` silence whose expression is a subset of the
//!   notification labels covers the alert, and with it every route;
//! - subscription: a `subscription` silence without a rule targeting the
//!   subscription id, or a `matchers` silence whose expression is a subset of
//!   the subscription's match set, removes every receiver of that subscription;
//! - receiver: a `subscription` silence carrying a rule removes only the
//!   receivers the rule accepts.
//!
//! Silences only apply within their own namespace.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::Result;
use crate::database::repositories::SilenceRepository;
use crate::domain::{JsonMap, Labels, Receiver, Silence, SilenceFilter, SilenceType, Subscription};

/// `true` iff every expression pair is present in `labels` with an equal
/// string value. Non-string expression values never match.
fn expression_subset_of(expression: &JsonMap, labels: &Labels) -> bool {
    expression.iter().all(|(key, expected)| match expected {
        Value::String(expected) => labels.get(key) == Some(expected),
        _ => false,
    })
}

fn is_matchers(silence: &Silence) -> bool {
    silence.is_active() && silence.silence_type == SilenceType::Matchers
}

fn targets(silence: &Silence, subscription: &Subscription) -> bool {
    silence.is_active()
        && silence.silence_type == SilenceType::Subscription
        && silence.namespace_id == subscription.namespace_id
        && silence.target_id == Some(subscription.id)
}

/// Active `matchers` silences that cover an alert with `labels`.
pub fn alert_silences<'a>(silences: &'a [Silence], labels: &Labels) -> Vec<&'a Silence> {
    silences
        .iter()
        .filter(|s| is_matchers(s) && expression_subset_of(&s.target_expression, labels))
        .collect()
}

/// Silences removing every receiver of `subscription` for an alert with
/// `labels`.
pub fn subscription_silences<'a>(
    silences: &'a [Silence],
    labels: &Labels,
    subscription: &Subscription,
) -> Vec<&'a Silence> {
    silences
        .iter()
        .filter(|s| s.namespace_id == subscription.namespace_id)
        .filter(|s| {
            if is_matchers(s) {
                expression_subset_of(&s.target_expression, labels)
                    || expression_subset_of(&s.target_expression, &subscription.match_labels)
            } else {
                targets(s, subscription) && matches!(s.receiver_rule(), Ok(None))
            }
        })
        .collect()
}

/// Rule-carrying silences of `subscription` that accept `receiver`.
///
/// A rule that fails to evaluate does not silence; the failure is logged.
pub fn receiver_silences<'a>(
    silences: &'a [Silence],
    subscription: &Subscription,
    receiver: &Receiver,
    config: &JsonMap,
) -> Vec<&'a Silence> {
    silences
        .iter()
        .filter(|s| targets(s, subscription) && matches!(s.receiver_rule(), Ok(Some(_))))
        .filter(|s| match s.applies_to_receiver(receiver, config) {
            Ok(applies) => applies,
            Err(e) => {
                warn!(
                    silence_id = %s.id,
                    subscription_id = subscription.id,
                    receiver_id = receiver.id,
                    error = %e,
                    "Silence rule could not be evaluated; not silencing"
                );
                false
            }
        })
        .collect()
}

/// Loads active silences per namespace.
pub struct SilenceEngine {
    repo: Arc<dyn SilenceRepository>,
}

impl SilenceEngine {
    pub fn new(repo: Arc<dyn SilenceRepository>) -> Self {
        Self { repo }
    }

    async fn load(&self, namespace_ids: &[i64]) -> Result<Vec<Silence>> {
        let mut by_namespace: HashMap<i64, Vec<Silence>> = HashMap::new();
        for &namespace_id in namespace_ids {
            if by_namespace.contains_key(&namespace_id) {
                continue;
            }
            let silences = self
                .repo
                .list(&SilenceFilter {
                    namespace_id: Some(namespace_id),
                    ..Default::default()
                })
                .await?;
            by_namespace.insert(namespace_id, silences);
        }
        Ok(by_namespace.into_values().flatten().collect())
    }

    /// Active silences in `namespace_id` covering an alert with `labels`.
    pub async fn silences_for_alert(
        &self,
        namespace_id: i64,
        labels: &Labels,
    ) -> Result<Vec<Silence>> {
        let silences = self.load(&[namespace_id]).await?;
        Ok(alert_silences(&silences, labels).into_iter().cloned().collect())
    }

    /// Active silences of every namespace `subscriptions` live in.
    pub async fn for_subscriptions(&self, subscriptions: &[Subscription]) -> Result<Vec<Silence>> {
        let namespace_ids: Vec<i64> = subscriptions.iter().map(|s| s.namespace_id).collect();
        self.load(&namespace_ids).await
    }
}

/// Ids of `silences`, for the notification log.
pub fn silence_ids(silences: Vec<&Silence>) -> Vec<String> {
    silences.into_iter().map(|s| s.id.clone()).collect()
}
