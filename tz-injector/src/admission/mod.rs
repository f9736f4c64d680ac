use std::error::Error as StdError;

use k8s_openapi::api::core::v1::Pod;
use kube::core::admission::{AdmissionRequest, AdmissionResponse};
use kube::core::{DynamicObject, GroupVersionKind};
use serde_json::Value;
use tracing::{debug, error};

pub mod injector;
pub mod patch;
pub mod policy;

pub use injector::{Injector, Outcome};

pub trait ResourceGvkExt {
    fn is(kind: &GroupVersionKind) -> bool;
}

impl<K: k8s_openapi::Resource> ResourceGvkExt for K {
    fn is(kind: &GroupVersionKind) -> bool {
        kind.group == K::GROUP && kind.version == K::VERSION && kind.kind == K::KIND
    }
}

/// Runs the injector against an admission request whose object was kept as raw JSON.
/// Anything that is not a pod with an object attached is admitted untouched.
pub fn mutate(
    injector: &Injector,
    req: &AdmissionRequest<DynamicObject>,
    object: Option<&Value>,
) -> AdmissionResponse {
    let res = AdmissionResponse::from(req);

    debug!(
        {
            uid = &req.uid,
            kind = &req.kind.kind,
            operation = ?req.operation,
            namespace = ?req.namespace,
            name = &req.name,
            user = ?req.user_info.username,
        },
        "received admission review"
    );

    if !Pod::is(&req.kind) {
        debug!({ uid = &req.uid, kind = &req.kind.kind }, "not a pod, allowing unchanged");
        return res;
    }

    let Some(object) = object else {
        debug!({ uid = &req.uid }, "no object in request, allowing unchanged");
        return res;
    };

    let outcome = match serde_json::to_vec(object) {
        Ok(raw) => injector.decide(req.namespace.as_deref(), &req.name, &raw),
        Err(err) => {
            error!({ err = &err as &dyn StdError }, "could not re-encode admitted object");
            Outcome::Failed(err.to_string())
        }
    };

    outcome.into_response(res)
}
