use std::collections::BTreeMap;
use std::error::Error as StdError;

use k8s_openapi::api::core::v1::Pod;
use kube::core::admission::AdmissionResponse;
use thiserror::Error;
use tracing::{debug, error, info};

use super::patch::build_patch;
use super::policy::{ANNOTATION_STATUS, StatusToken, Token as _, is_mutation_required};
use crate::config::InjectorConfig;
use crate::helper::PodExt as _;

#[derive(Debug, Error)]
pub enum DecideError {
    #[error("could not decode pod: {0}")]
    Descriptor(#[source] serde_json::Error),
    #[error("failed to serialize patch: {0}")]
    SerializePatch(#[source] serde_json::Error),
}

/// Result of a single admission decision. The pod is admitted in every case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Unchanged,
    Patched(json_patch::Patch),
    Failed(String),
}

impl Outcome {
    /// Fills in `res`, serializing the patch as a JSON-Patch document.
    pub fn into_response(self, res: AdmissionResponse) -> AdmissionResponse {
        let mut res = match self {
            Outcome::Unchanged => res,
            Outcome::Patched(patch) => match res.clone().with_patch(patch) {
                Ok(res) => res,
                Err(err) => {
                    error!({ err = &err as &dyn StdError }, "admitting pod without mutation");
                    let mut res = res;
                    res.result.message = err.to_string();
                    res
                }
            },
            Outcome::Failed(message) => {
                let mut res = res;
                res.result.message = message;
                res
            }
        };
        res.allowed = true;
        res
    }
}

impl From<DecideError> for Outcome {
    fn from(err: DecideError) -> Self {
        Outcome::Failed(err.to_string())
    }
}

pub struct Injector {
    config: InjectorConfig,
    status_annotations: BTreeMap<String, String>,
}

impl Injector {
    pub fn new(config: InjectorConfig) -> Self {
        let status_annotations = BTreeMap::from([(
            ANNOTATION_STATUS.to_string(),
            StatusToken::Injected.as_str().to_string(),
        )]);

        Self {
            config,
            status_annotations,
        }
    }

    /// Decides whether the pod in `raw` needs the timezone mount and computes the patch.
    ///
    /// Failures never block admission, they are reported through [`Outcome::Failed`].
    pub fn decide(&self, namespace: Option<&str>, name: &str, raw: &[u8]) -> Outcome {
        match self.try_decide(namespace, name, raw) {
            Ok(outcome) => outcome,
            Err(err) => {
                error!({ err = &err as &dyn StdError }, "admitting pod without mutation");
                err.into()
            }
        }
    }

    fn try_decide(
        &self,
        namespace: Option<&str>,
        name: &str,
        raw: &[u8],
    ) -> Result<Outcome, DecideError> {
        let pod: Pod = serde_json::from_slice(raw).map_err(DecideError::Descriptor)?;
        let namespace = pod.namespace_or(namespace);
        let name = pod.name_or(name);

        if !is_mutation_required(
            &self.config.ignored_namespaces,
            &namespace,
            &name,
            pod.metadata.annotations.as_ref(),
        ) {
            info!(
                { namespace = &namespace, name = &name },
                "skipping mutation due to policy check"
            );
            return Ok(Outcome::Unchanged);
        }

        let patch = build_patch(&pod, &self.config.mount, &self.status_annotations)
            .map(json_patch::Patch)
            .map_err(DecideError::SerializePatch)?;

        debug!(
            { namespace = &namespace, name = &name, patch = %patch },
            "mutating pod"
        );
        Ok(Outcome::Patched(patch))
    }
}
