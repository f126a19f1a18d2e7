//! Subscription matcher.

use std::sync::Arc;

use crate::Result;
use crate::database::repositories::SubscriptionRepository;
use crate::domain::{Labels, Subscription, SubscriptionFilter};

/// `true` iff every `match_labels` pair is present and equal in `labels`.
/// An empty match set matches everything.
pub fn labels_match(match_labels: &Labels, labels: &Labels) -> bool {
    match_labels
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value))
}

/// All subscriptions whose match set is a subset of `labels`, in input order.
pub fn match_subscriptions<'a>(
    subscriptions: &'a [Subscription],
    labels: &Labels,
) -> Vec<&'a Subscription> {
    subscriptions
        .iter()
        .filter(|s| labels_match(&s.match_labels, labels))
        .collect()
}

/// Resolves subscriptions for a notification from the subscription store.
pub struct SubscriptionMatcher {
    repo: Arc<dyn SubscriptionRepository>,
}

impl SubscriptionMatcher {
    pub fn new(repo: Arc<dyn SubscriptionRepository>) -> Self {
        Self { repo }
    }

    /// Subscriptions in `namespace_id` (all namespaces when `None`) matching `labels`.
    pub async fn match_by_labels(
        &self,
        namespace_id: Option<i64>,
        labels: &Labels,
    ) -> Result<Vec<Subscription>> {
        let subscriptions = self.repo.list(&SubscriptionFilter { namespace_id }).await?;
        Ok(subscriptions
            .into_iter()
            .filter(|s| labels_match(&s.match_labels, labels))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::init_memory_pool;
    use crate::database::repositories::SqlxSubscriptionRepository;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_subset_matching() {
        let alert = labels(&[("team", "x"), ("severity", "CRITICAL")]);

        assert!(labels_match(&labels(&[("team", "x")]), &alert));
        assert!(labels_match(&alert, &alert));
        assert!(!labels_match(&labels(&[("team", "y")]), &alert));
        assert!(!labels_match(
            &labels(&[("team", "x"), ("env", "prod")]),
            &alert
        ));
        // key present with different value
        assert!(!labels_match(&labels(&[("severity", "WARNING")]), &alert));
    }

    #[test]
    fn test_empty_match_matches_everything() {
        assert!(labels_match(&Labels::new(), &Labels::new()));
        assert!(labels_match(&Labels::new(), &labels(&[("a", "b")])));
    }

    #[test]
    fn test_match_subscriptions_returns_every_match() {
        let subs = vec![
            Subscription::new("a", 1).with_match("team", "x"),
            Subscription::new("b", 1).with_match("team", "y"),
            Subscription::new("c", 1),
            Subscription::new("d", 1)
                .with_match("team", "x")
                .with_match("severity", "CRITICAL"),
        ];

        let matched: Vec<&str> = match_subscriptions(
            &subs,
            &labels(&[("team", "x"), ("severity", "CRITICAL")]),
        )
        .into_iter()
        .map(|s| s.urn.as_str())
        .collect();

        assert_eq!(matched, vec!["a", "c", "d"]);
    }

    #[tokio::test]
    async fn test_match_by_labels_respects_namespace() {
        let repo = Arc::new(SqlxSubscriptionRepository::new(
            init_memory_pool().await.unwrap(),
        ));
        repo.create(&Subscription::new("ns1", 1).with_match("team", "x"))
            .await
            .unwrap();
        repo.create(&Subscription::new("ns2", 2).with_match("team", "x"))
            .await
            .unwrap();

        let matcher = SubscriptionMatcher::new(repo);
        let alert = labels(&[("team", "x")]);

        let in_ns1 = matcher.match_by_labels(Some(1), &alert).await.unwrap();
        assert_eq!(in_ns1.len(), 1);
        assert_eq!(in_ns1[0].urn, "ns1");

        assert_eq!(matcher.match_by_labels(None, &alert).await.unwrap().len(), 2);
        assert!(
            matcher
                .match_by_labels(Some(1), &labels(&[("team", "z")]))
                .await
                .unwrap()
                .is_empty()
        );
    }
}
