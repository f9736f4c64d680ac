use std::collections::BTreeMap;

use json_patch::jsonptr::PointerBuf;
use json_patch::{AddOperation, PatchOperation, ReplaceOperation};
use k8s_openapi::api::core::v1::{Container, HostPathVolumeSource, Pod, Volume, VolumeMount};

use crate::config::MountDescriptor;

fn volume_injected(volumes: &[Volume], mount: &MountDescriptor) -> bool {
    volumes.iter().any(|volume| {
        volume.name == mount.name()
            || volume
                .host_path
                .as_ref()
                .is_some_and(|source| source.path == mount.host_path())
    })
}

fn file_mounted(volume_mounts: &[VolumeMount], mount: &MountDescriptor) -> bool {
    volume_mounts
        .iter()
        .any(|vm| vm.name == mount.name() || vm.mount_path == mount.mount_path())
}

/// Replaces the whole volume list so the patch never depends on array indices.
pub fn update_volumes(
    volumes: &[Volume],
    mount: &MountDescriptor,
) -> Result<PatchOperation, serde_json::Error> {
    let mut volumes = volumes.to_vec();
    if !volume_injected(&volumes, mount) {
        volumes.push(Volume {
            name: mount.name().to_string(),
            host_path: Some(HostPathVolumeSource {
                path: mount.host_path().to_string(),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    Ok(PatchOperation::Replace(ReplaceOperation {
        path: PointerBuf::from_tokens(["spec", "volumes"]),
        value: serde_json::to_value(volumes)?,
    }))
}

pub fn update_containers(
    containers: &[Container],
    mount: &MountDescriptor,
) -> Result<PatchOperation, serde_json::Error> {
    let containers = containers
        .iter()
        .cloned()
        .map(|mut container| {
            let volume_mounts = container.volume_mounts.get_or_insert_with(Vec::new);
            if !file_mounted(volume_mounts, mount) {
                volume_mounts.push(VolumeMount {
                    name: mount.name().to_string(),
                    mount_path: mount.mount_path().to_string(),
                    read_only: Some(true),
                    ..Default::default()
                });
            }
            container
        })
        .collect::<Vec<_>>();

    Ok(PatchOperation::Replace(ReplaceOperation {
        path: PointerBuf::from_tokens(["spec", "containers"]),
        value: serde_json::to_value(containers)?,
    }))
}

/// Only the first key may create the annotation map, later keys are added as members
/// so annotations already on the pod survive.
pub fn update_annotations(
    target: Option<&BTreeMap<String, String>>,
    added: &BTreeMap<String, String>,
) -> Vec<PatchOperation> {
    let mut map_exists = target.is_some();
    let mut patch = Vec::with_capacity(added.len());

    for (key, value) in added {
        let current = target
            .and_then(|annotations| annotations.get(key))
            .filter(|current| !current.is_empty());

        let op = if !map_exists {
            map_exists = true;
            PatchOperation::Add(AddOperation {
                path: PointerBuf::from_tokens(["metadata", "annotations"]),
                value: serde_json::json!({ key: value }),
            })
        } else if current.is_some() {
            PatchOperation::Replace(ReplaceOperation {
                path: PointerBuf::from_tokens(["metadata", "annotations", key.as_str()]),
                value: value.as_str().into(),
            })
        } else {
            PatchOperation::Add(AddOperation {
                path: PointerBuf::from_tokens(["metadata", "annotations", key.as_str()]),
                value: value.as_str().into(),
            })
        };
        patch.push(op);
    }

    patch
}

pub fn build_patch(
    pod: &Pod,
    mount: &MountDescriptor,
    annotations: &BTreeMap<String, String>,
) -> Result<Vec<PatchOperation>, serde_json::Error> {
    let (containers, volumes) = pod
        .spec
        .as_ref()
        .map(|spec| {
            (
                spec.containers.as_slice(),
                spec.volumes.as_deref().unwrap_or_default(),
            )
        })
        .unwrap_or_default();

    let mut patch = vec![
        update_volumes(volumes, mount)?,
        update_containers(containers, mount)?,
    ];
    patch.extend(update_annotations(
        pod.metadata.annotations.as_ref(),
        annotations,
    ));

    Ok(patch)
}
