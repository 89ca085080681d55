//! A standing subscription: a subscription id paired with the filter set it
//! was opened with, plus local bookkeeping the relay protocol itself doesn't
//! track (batching, pause state).

use crate::filter::FilterSet;

#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: String,
    pub filters: FilterSet,
    /// Relays may be asked to send historical events in batches rather than
    /// all at once; this is the requested batch size, not a protocol field.
    pub batch_size: Option<u64>,
    pub paused: bool,
}

impl Subscription {
    pub fn new(id: impl Into<String>, filters: FilterSet) -> Self {
        Subscription {
            id: id.into(),
            filters,
            batch_size: None,
            paused: false,
        }
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn unpause(&mut self) {
        self.paused = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Filter;

    #[test]
    fn test_subscription_id_is_a_plain_string() {
        let sub = Subscription::new("s1", FilterSet::new(vec![Filter::new()]));
        assert_eq!(sub.id, "s1");
        assert!(!sub.paused);
    }

    #[test]
    fn test_pause_unpause() {
        let mut sub = Subscription::new("s1", FilterSet::new(vec![Filter::new()]));
        sub.pause();
        assert!(sub.paused);
        sub.unpause();
        assert!(!sub.paused);
    }
}
