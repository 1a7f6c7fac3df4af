use kube::core::DynamicObject;
use serde::de::DeserializeOwned;

/// Convert a concrete payload into the overlay type the caller expects,
/// copying the fields the overlay declares and ignoring everything else.
pub fn overlay<T: DeserializeOwned>(obj: &DynamicObject) -> Result<T, serde_json::Error> {
    serde_json::from_value(serde_json::to_value(obj)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, ObjectMeta};
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    struct ConditionalOverlay {
        metadata: ObjectMeta,
        status: Option<ConditionalOverlayStatus>,
    }

    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    struct ConditionalOverlayStatus {
        #[serde(default)]
        observed_generation: Option<i64>,
        #[serde(default)]
        conditions: Vec<Condition>,
    }

    #[test]
    fn copies_declared_fields_and_ignores_the_rest() {
        let obj: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "namespace": "test-namespace", "name": "blue" },
            "spec": { "replicas": 3, "template": { "spec": { "containers": [] } } },
            "status": {
                "observedGeneration": 7,
                "replicas": 3,
                "conditions": [
                    {
                        "type": "Available",
                        "status": "True",
                        "reason": "MinimumReplicasAvailable",
                        "message": "",
                        "lastTransitionTime": "2025-01-01T00:00:00Z",
                    },
                ],
            },
        }))
        .unwrap();

        let overlay: ConditionalOverlay = overlay(&obj).unwrap();

        assert_eq!(overlay.metadata.name.as_deref(), Some("blue"));
        let status = overlay.status.unwrap();
        assert_eq!(status.observed_generation, Some(7));
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].type_, "Available");
    }

    #[test]
    fn missing_status_stays_none() {
        let obj: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": { "name": "green" },
        }))
        .unwrap();

        let overlay: ConditionalOverlay = overlay(&obj).unwrap();
        assert!(overlay.status.is_none());
    }
}
