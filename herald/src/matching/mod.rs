//! Routing decisions: which subscriptions a labelled notification reaches and
//! which of those routes are silenced.

pub mod silence;
pub mod subscription;

pub use silence::{
    SilenceEngine, alert_silences, receiver_silences, silence_ids, subscription_silences,
};
pub use subscription::{SubscriptionMatcher, labels_match, match_subscriptions};
