/// Reference to an object, or to a whole kind, being tracked.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackedReference {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: Option<String>,
}

impl TrackedReference {
    pub fn object(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        namespace: Option<&str>,
        name: impl Into<String>,
    ) -> Self {
        TrackedReference {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: namespace.map(String::from),
            name: Some(name.into()),
        }
    }

    /// Track every object of a kind, the list-watch case.
    pub fn kind(api_version: impl Into<String>, kind: impl Into<String>) -> Self {
        TrackedReference {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: None,
            name: None,
        }
    }
}

/// Seam to the caller's tracking machinery. Implementations record that the
/// owner wants to be re-enqueued when the tracked reference changes; the
/// duck client reports what it read, it does not deliver events itself.
pub trait Tracker: Send + Sync {
    fn track(&self, tracked: &TrackedReference, by: &TrackedReference);
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    pub(crate) struct RecordingTracker {
        pub(crate) tracked: Mutex<Vec<(TrackedReference, TrackedReference)>>,
    }

    impl Tracker for RecordingTracker {
        fn track(&self, tracked: &TrackedReference, by: &TrackedReference) {
            self.tracked.lock().push((tracked.clone(), by.clone()));
        }
    }

    #[test]
    fn records_associations() {
        let tracker = RecordingTracker::default();
        let owner = TrackedReference::object("example.com/v1", "Owner", Some("ns"), "me");
        let tracked = TrackedReference::kind("apps/v1", "DeploymentList");

        tracker.track(&tracked, &owner);

        let seen = tracker.tracked.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, tracked);
        assert_eq!(seen[0].1, owner);
    }
}
