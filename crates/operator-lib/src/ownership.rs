//! Controller owner references
//!
//! Recreated workloads are owned by the cluster network configuration object
//! so that the garbage collector removes them together with it.

use crate::error::OwnershipError;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::DynamicObject;

/// Make `owner` the controller of `object`.
///
/// An existing reference to the same owner is replaced. Fails if the owner is
/// incomplete, if a namespaced owner lives in another namespace, or if another
/// controller already owns the object.
pub fn set_controller_reference(
    owner: &DynamicObject,
    object: &mut DynamicObject,
) -> Result<(), OwnershipError> {
    let types = owner
        .types
        .as_ref()
        .ok_or(OwnershipError::MissingOwnerField("apiVersion/kind"))?;
    let name = owner
        .metadata
        .name
        .clone()
        .ok_or(OwnershipError::MissingOwnerField("name"))?;
    let uid = owner
        .metadata
        .uid
        .clone()
        .ok_or(OwnershipError::MissingOwnerField("uid"))?;

    if let Some(owner_ns) = owner.metadata.namespace.as_deref() {
        let object_ns = object.metadata.namespace.as_deref().unwrap_or_default();
        if owner_ns != object_ns {
            return Err(OwnershipError::CrossNamespace {
                owner: owner_ns.to_string(),
                object: object_ns.to_string(),
            });
        }
    }

    let refs = object.metadata.owner_references.get_or_insert_with(Vec::new);

    if let Some(existing) = refs
        .iter()
        .find(|r| r.controller == Some(true) && r.uid != uid)
    {
        return Err(OwnershipError::AlreadyOwned {
            kind: existing.kind.clone(),
            name: existing.name.clone(),
        });
    }

    let reference = OwnerReference {
        api_version: types.api_version.clone(),
        kind: types.kind.clone(),
        name,
        uid: uid.clone(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    };

    match refs.iter_mut().find(|r| r.uid == uid) {
        Some(slot) => *slot = reference,
        None => refs.push(reference),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::{ApiResource, GroupVersionKind};
    use serde_json::json;

    fn network_owner() -> DynamicObject {
        let ar = ApiResource::from_gvk(&GroupVersionKind::gvk("config.openshift.io", "v1", "Network"));
        let mut owner = DynamicObject::new("cluster", &ar);
        owner.metadata.uid = Some("owner-uid".into());
        owner
    }

    fn deployment() -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "nsx-ncp", "namespace": "nsx-system"},
            "spec": {"replicas": 1}
        }))
        .unwrap()
    }

    #[test]
    fn test_sets_controller_reference() {
        let mut obj = deployment();
        set_controller_reference(&network_owner(), &mut obj).unwrap();

        let refs = obj.metadata.owner_references.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].api_version, "config.openshift.io/v1");
        assert_eq!(refs[0].kind, "Network");
        assert_eq!(refs[0].name, "cluster");
        assert_eq!(refs[0].uid, "owner-uid");
        assert_eq!(refs[0].controller, Some(true));
        assert_eq!(refs[0].block_owner_deletion, Some(true));
    }

    #[test]
    fn test_is_idempotent() {
        let owner = network_owner();
        let mut obj = deployment();
        set_controller_reference(&owner, &mut obj).unwrap();
        set_controller_reference(&owner, &mut obj).unwrap();
        assert_eq!(obj.metadata.owner_references.unwrap().len(), 1);
    }

    #[test]
    fn test_owner_without_uid() {
        let mut owner = network_owner();
        owner.metadata.uid = None;
        let mut obj = deployment();
        assert_eq!(
            set_controller_reference(&owner, &mut obj),
            Err(OwnershipError::MissingOwnerField("uid"))
        );
        assert!(obj.metadata.owner_references.is_none());
    }

    #[test]
    fn test_cross_namespace_owner() {
        let mut owner = network_owner();
        owner.metadata.namespace = Some("openshift-config".into());
        let mut obj = deployment();
        assert!(matches!(
            set_controller_reference(&owner, &mut obj),
            Err(OwnershipError::CrossNamespace { .. })
        ));
    }

    #[test]
    fn test_already_owned_by_other_controller() {
        let mut obj = deployment();
        obj.metadata.owner_references = Some(vec![OwnerReference {
            api_version: "apps/v1".into(),
            kind: "ReplicaSet".into(),
            name: "other".into(),
            uid: "other-uid".into(),
            controller: Some(true),
            block_owner_deletion: None,
        }]);
        assert_eq!(
            set_controller_reference(&network_owner(), &mut obj),
            Err(OwnershipError::AlreadyOwned {
                kind: "ReplicaSet".into(),
                name: "other".into()
            })
        );
    }
}
