use std::sync::Arc;

use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams},
    core::{ApiResource, DynamicObject, GroupVersionKind, TypeMeta},
    discovery::{oneshot, ApiCapabilities, Scope},
    Client,
};
use serde::de::DeserializeOwned;
use serde_json::Value;

use duck_operator_controller::crd::v1::duck::{duck_api_resource, Duck, GroupKind};
use duck_operator_controller::crd::v1::duck_type::{DuckType, DuckTypeStatus};

use crate::convert;
use crate::error::{DuckClientError, Result};
use crate::track::{TrackedReference, Tracker};

/// A polymorphic read/delete-many client keyed by a DuckType name.
///
/// Reads resolve each object's concrete group/version/kind through the
/// DuckType's Ready ducks before delegating to the real API; writes pass
/// through untouched because they already name a single concrete kind.
pub struct DuckClient {
    client: Client,
    duck_type: String,
    tracker: Option<Arc<dyn Tracker>>,
}

impl DuckClient {
    pub fn new(client: Client, duck_type: impl Into<String>) -> Self {
        DuckClient {
            client,
            duck_type: duck_type.into(),
            tracker: None,
        }
    }

    /// Record tracked reads through the given tracker so the caller's
    /// machinery can re-enqueue owners when what they read changes.
    pub fn with_tracker(mut self, tracker: Arc<dyn Tracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// The underlying client, for operations with no duck semantics.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Fetch the DuckType, apply defaulting, and refuse to serve reads until
    /// it reports Ready.
    async fn resolve_duck_type(&self) -> Result<DuckType> {
        let api = Api::<DuckType>::all(self.client.clone());
        let mut duck_type = api
            .get_opt(&self.duck_type)
            .await?
            .ok_or(DuckClientError::UnknownDuckType)?;
        duck_type.spec.apply_defaults();

        if !duck_type.status.as_ref().is_some_and(DuckTypeStatus::is_ready) {
            return Err(DuckClientError::DuckTypeNotReady);
        }

        Ok(duck_type)
    }

    /// List the DuckType's ducks and keep the Ready ones matching the filter.
    async fn ducks(&self, filter: Option<&GroupKind>, owner: Option<&TrackedReference>) -> Result<Vec<Duck>> {
        let duck_type = self.resolve_duck_type().await?;
        let resource = duck_api_resource(&duck_type);

        if let (Some(owner), Some(tracker)) = (owner, &self.tracker) {
            let list_kind = duck_type.spec.list_kind();
            tracker.track(&TrackedReference::kind(resource.api_version.clone(), list_kind), owner);
        }

        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &resource);
        let list = api.list(&ListParams::default()).await?;

        let mut ducks = Vec::with_capacity(list.items.len());
        for item in &list.items {
            ducks.push(Duck::from_dynamic(item)?);
        }

        select_ducks(ducks, filter)
    }

    /// The single duck matching a group/kind filter.
    async fn duck(&self, filter: &GroupKind, owner: Option<&TrackedReference>) -> Result<Duck> {
        let mut ducks = self.ducks(Some(filter), owner).await?;
        if ducks.len() != 1 {
            return Err(DuckClientError::UnknownDuck);
        }
        Ok(ducks.remove(0))
    }

    /// Get a member object. The caller's group and kind are preserved; the
    /// version is replaced by the one the matching duck declares.
    pub async fn get(&self, gk: &GroupKind, namespace: Option<&str>, name: &str) -> Result<DynamicObject> {
        self.get_inner(gk, namespace, name, None).await
    }

    /// Get, additionally recording the read for the owner.
    pub async fn track_and_get(
        &self,
        owner: &TrackedReference,
        gk: &GroupKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<DynamicObject> {
        self.get_inner(gk, namespace, name, Some(owner)).await
    }

    async fn get_inner(
        &self,
        gk: &GroupKind,
        namespace: Option<&str>,
        name: &str,
        owner: Option<&TrackedReference>,
    ) -> Result<DynamicObject> {
        let duck = self.duck(gk, owner).await?;
        let gvk = member_gvk(gk, &duck);
        let resource = ApiResource::from_gvk_with_plural(&gvk, &duck.group_resource().resource);

        if let (Some(owner), Some(tracker)) = (owner, &self.tracker) {
            tracker.track(
                &TrackedReference::object(resource.api_version.clone(), gvk.kind.clone(), namespace, name),
                owner,
            );
        }

        let api = self.scoped_api(&resource, namespace);
        Ok(api.get(name).await?)
    }

    /// List member objects across every selected duck, in the order ducks are
    /// returned by the underlying list. List options pass through unchanged
    /// to every per-kind list.
    pub async fn list(
        &self,
        filter: Option<&GroupKind>,
        namespace: Option<&str>,
        params: &ListParams,
    ) -> Result<Vec<DynamicObject>> {
        self.list_inner(filter, namespace, params, None).await
    }

    /// List, additionally recording each per-kind read for the owner.
    pub async fn track_and_list(
        &self,
        owner: &TrackedReference,
        filter: Option<&GroupKind>,
        namespace: Option<&str>,
        params: &ListParams,
    ) -> Result<Vec<DynamicObject>> {
        self.list_inner(filter, namespace, params, Some(owner)).await
    }

    /// List and convert every item into the caller's overlay type.
    pub async fn list_as<T: DeserializeOwned>(
        &self,
        filter: Option<&GroupKind>,
        namespace: Option<&str>,
        params: &ListParams,
    ) -> Result<Vec<T>> {
        let items = self.list_inner(filter, namespace, params, None).await?;
        items
            .iter()
            .map(|item| convert::overlay(item).map_err(DuckClientError::from))
            .collect()
    }

    async fn list_inner(
        &self,
        filter: Option<&GroupKind>,
        namespace: Option<&str>,
        params: &ListParams,
        owner: Option<&TrackedReference>,
    ) -> Result<Vec<DynamicObject>> {
        let ducks = self.ducks(filter, owner).await?;

        let mut items = vec![];
        for duck in &ducks {
            let resource = duck.member_api_resource();

            if let (Some(owner), Some(tracker)) = (owner, &self.tracker) {
                let list_kind = format!("{}List", duck.spec.kind);
                tracker.track(&TrackedReference::kind(resource.api_version.clone(), list_kind), owner);
            }

            let api = self.scoped_api(&resource, namespace);
            let list = api.list(params).await?;
            items.extend(list.items);
        }

        Ok(items)
    }

    /// Delete the matching member objects of every selected duck. The first
    /// per-kind error terminates; results are not aggregated.
    pub async fn delete_all_of(
        &self,
        filter: Option<&GroupKind>,
        namespace: Option<&str>,
        delete_params: &DeleteParams,
        list_params: &ListParams,
    ) -> Result<()> {
        let ducks = self.ducks(filter, None).await?;

        for duck in &ducks {
            let api = self.scoped_api(&duck.member_api_resource(), namespace);
            api.delete_collection(delete_params, list_params).await?;
        }

        Ok(())
    }

    /// The concrete group/version/kind a caller-supplied group/kind resolves
    /// to, with the version the matching duck declares.
    pub async fn group_version_kind_for(&self, gk: &GroupKind) -> Result<GroupVersionKind> {
        let duck = self.duck(gk, None).await?;
        Ok(member_gvk(gk, &duck))
    }

    /// Resolve a typed reference through the duck type.
    pub async fn resolve_reference(&self, api_version: &str, kind: &str) -> Result<Duck> {
        let group = match api_version.split_once('/') {
            Some((group, _)) => group,
            None => "",
        };
        match self.duck(&GroupKind::new(group, kind), None).await {
            Err(DuckClientError::UnknownDuck) => Err(DuckClientError::NotADuck),
            result => result,
        }
    }

    /// Create passes through with no rewriting: writes require a single
    /// concrete kind, which the caller already supplies.
    pub async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let (resource, caps) = self.api_resource_for(obj.types.as_ref()).await?;
        let api = self.capability_scoped_api(&resource, &caps, obj.metadata.namespace.as_deref());
        Ok(api.create(&PostParams::default(), obj).await?)
    }

    /// Update passes through with no rewriting.
    pub async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let name = obj
            .metadata
            .name
            .as_deref()
            .ok_or(DuckClientError::MissingObjectKeyError("metadata.name"))?;
        let (resource, caps) = self.api_resource_for(obj.types.as_ref()).await?;
        let api = self.capability_scoped_api(&resource, &caps, obj.metadata.namespace.as_deref());
        Ok(api.replace(name, &PostParams::default(), obj).await?)
    }

    /// Patch passes through with no rewriting.
    pub async fn patch(
        &self,
        obj: &DynamicObject,
        params: &PatchParams,
        patch: &Patch<Value>,
    ) -> Result<DynamicObject> {
        let name = obj
            .metadata
            .name
            .as_deref()
            .ok_or(DuckClientError::MissingObjectKeyError("metadata.name"))?;
        let (resource, caps) = self.api_resource_for(obj.types.as_ref()).await?;
        let api = self.capability_scoped_api(&resource, &caps, obj.metadata.namespace.as_deref());
        Ok(api.patch(name, params, patch).await?)
    }

    /// Server-side apply passes through with no rewriting.
    pub async fn apply(&self, obj: &DynamicObject, field_manager: &str) -> Result<DynamicObject> {
        let name = obj
            .metadata
            .name
            .as_deref()
            .ok_or(DuckClientError::MissingObjectKeyError("metadata.name"))?;
        let (resource, caps) = self.api_resource_for(obj.types.as_ref()).await?;
        let api = self.capability_scoped_api(&resource, &caps, obj.metadata.namespace.as_deref());
        Ok(api
            .patch(name, &PatchParams::apply(field_manager), &Patch::Apply(obj))
            .await?)
    }

    /// Delete passes through with no rewriting.
    pub async fn delete(&self, obj: &DynamicObject, params: &DeleteParams) -> Result<()> {
        let name = obj
            .metadata
            .name
            .as_deref()
            .ok_or(DuckClientError::MissingObjectKeyError("metadata.name"))?;
        let (resource, caps) = self.api_resource_for(obj.types.as_ref()).await?;
        let api = self.capability_scoped_api(&resource, &caps, obj.metadata.namespace.as_deref());
        api.delete(name, params).await?;
        Ok(())
    }

    /// Whether the object's kind is namespace scoped, per discovery.
    pub async fn is_object_namespaced(&self, types: Option<&TypeMeta>) -> Result<bool> {
        let (_, caps) = self.api_resource_for(types).await?;
        Ok(matches!(caps.scope, Scope::Namespaced))
    }

    /// Watch has no aggregated semantics over duck types.
    pub fn watch(&self) -> ! {
        unsupported("Watch")
    }

    /// Status has no aggregated semantics over duck types.
    pub fn status(&self) -> ! {
        unsupported("Status sub resource client")
    }

    /// Subresources have no aggregated semantics over duck types.
    pub fn subresource(&self, _subresource: &str) -> ! {
        unsupported("SubResource client")
    }

    fn scoped_api(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(namespace) => Api::namespaced_with(self.client.clone(), namespace, resource),
            None => Api::all_with(self.client.clone(), resource),
        }
    }

    fn capability_scoped_api(
        &self,
        resource: &ApiResource,
        caps: &ApiCapabilities,
        namespace: Option<&str>,
    ) -> Api<DynamicObject> {
        match namespace {
            Some(namespace) if matches!(caps.scope, Scope::Namespaced) => {
                Api::namespaced_with(self.client.clone(), namespace, resource)
            }
            _ => Api::all_with(self.client.clone(), resource),
        }
    }

    /// Resolve the full ApiResource for a caller-stated GVK through
    /// discovery; pass-through operations do not consult ducks at all.
    async fn api_resource_for(&self, types: Option<&TypeMeta>) -> Result<(ApiResource, ApiCapabilities)> {
        let types = types.ok_or(DuckClientError::MissingObjectKeyError("typeMeta"))?;
        let (group, version) = match types.api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", types.api_version.as_str()),
        };
        let gvk = GroupVersionKind {
            group: group.to_string(),
            version: version.to_string(),
            kind: types.kind.clone(),
        };
        Ok(oneshot::pinned_kind(&self.client, &gvk).await?)
    }
}

/// Keep Ready ducks, filtered by the caller's group/kind when supplied. A
/// kind of `<spec.kind>List` matches as a list read of the same duck.
fn select_ducks(ducks: Vec<Duck>, filter: Option<&GroupKind>) -> Result<Vec<Duck>> {
    let selected: Vec<Duck> = ducks
        .into_iter()
        .filter(|duck| duck.is_ready())
        .filter(|duck| match filter {
            None => true,
            Some(gk) => {
                gk.group == duck.spec.group
                    && (gk.kind == duck.spec.kind || gk.kind == format!("{}List", duck.spec.kind))
            }
        })
        .collect();

    if filter.is_some() && selected.is_empty() {
        return Err(DuckClientError::UnknownDuck);
    }

    Ok(selected)
}

/// The caller's group and kind with the duck's version.
fn member_gvk(gk: &GroupKind, duck: &Duck) -> GroupVersionKind {
    GroupVersionKind {
        group: gk.group.clone(),
        version: duck.spec.version.clone(),
        kind: gk.kind.clone(),
    }
}

fn unsupported(operation: &str) -> ! {
    panic!("{} is not implemented for duck types", operation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, ObjectMeta, Time};

    use duck_operator_controller::crd::v1::duck::{DuckSpec, DuckStatus};

    fn duck(name: &str, group: &str, version: &str, kind: &str, ready: bool) -> Duck {
        Duck {
            types: None,
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: DuckSpec {
                group: group.to_string(),
                version: version.to_string(),
                kind: kind.to_string(),
            },
            status: Some(DuckStatus {
                observed_generation: Some(1),
                conditions: vec![Condition {
                    type_: "Ready".to_string(),
                    status: if ready { "True" } else { "False" }.to_string(),
                    reason: "Ready".to_string(),
                    message: String::new(),
                    last_transition_time: Time(Utc::now()),
                    observed_generation: Some(1),
                }],
                resolved: None,
            }),
        }
    }

    fn ducks() -> Vec<Duck> {
        vec![
            duck("deployments.apps", "apps", "v1", "Deployment", true),
            duck("jobs.batch", "batch", "v1", "Job", true),
            duck("cronjobs.batch", "batch", "v1", "CronJob", false),
        ]
    }

    #[test]
    fn empty_filter_selects_every_ready_duck() {
        let selected = select_ducks(ducks(), None).unwrap();

        let names: Vec<_> = selected.iter().map(|d| d.name().to_string()).collect();
        assert_eq!(names, vec!["deployments.apps", "jobs.batch"]);
    }

    #[test]
    fn filter_matches_kind_directly() {
        let filter = GroupKind::new("batch", "Job");
        let selected = select_ducks(ducks(), Some(&filter)).unwrap();

        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name(), "jobs.batch");
    }

    #[test]
    fn filter_matches_list_kind() {
        let filter = GroupKind::new("batch", "JobList");
        let selected = select_ducks(ducks(), Some(&filter)).unwrap();

        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name(), "jobs.batch");
    }

    #[test]
    fn filter_never_matches_unready_ducks() {
        let filter = GroupKind::new("batch", "CronJob");

        assert!(matches!(
            select_ducks(ducks(), Some(&filter)),
            Err(DuckClientError::UnknownDuck)
        ));
    }

    #[test]
    fn unmatched_filter_is_an_unknown_duck() {
        let filter = GroupKind::new("example.com", "Goose");

        assert!(matches!(
            select_ducks(ducks(), Some(&filter)),
            Err(DuckClientError::UnknownDuck)
        ));
    }

    #[test]
    fn member_gvk_replaces_the_version_only() {
        // caller thinks in batch/v1beta1, the duck declares v1
        let gk = GroupKind::new("batch", "Job");
        let duck = duck("jobs.batch", "batch", "v1", "Job", true);

        let gvk = member_gvk(&gk, &duck);
        assert_eq!(gvk.group, "batch");
        assert_eq!(gvk.version, "v1");
        assert_eq!(gvk.kind, "Job");
    }

    #[test]
    #[should_panic(expected = "Watch is not implemented for duck types")]
    fn watch_is_unsupported() {
        unsupported("Watch")
    }

    #[test]
    #[should_panic(expected = "Status sub resource client is not implemented for duck types")]
    fn status_is_unsupported() {
        unsupported("Status sub resource client")
    }

    #[test]
    #[should_panic(expected = "SubResource client is not implemented for duck types")]
    fn subresource_is_unsupported() {
        unsupported("SubResource client")
    }
}
