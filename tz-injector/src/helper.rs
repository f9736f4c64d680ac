use k8s_openapi::api::core::v1::Pod;

pub const DEFAULT_NAMESPACE: &str = "default";

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.is_empty())
}

/// Identity of a pod under admission. Pods created by controllers usually reach the
/// webhook without `metadata.namespace` or `metadata.name`, so the request fields win.
pub trait PodExt {
    fn namespace_or(&self, request_namespace: Option<&str>) -> String;
    fn name_or(&self, request_name: &str) -> String;
}

impl PodExt for Pod {
    fn namespace_or(&self, request_namespace: Option<&str>) -> String {
        non_empty(request_namespace)
            .or_else(|| non_empty(self.metadata.namespace.as_deref()))
            .unwrap_or(DEFAULT_NAMESPACE)
            .to_string()
    }

    fn name_or(&self, request_name: &str) -> String {
        non_empty(Some(request_name))
            .or_else(|| non_empty(self.metadata.name.as_deref()))
            .or_else(|| non_empty(self.metadata.generate_name.as_deref()))
            .unwrap_or_default()
            .to_string()
    }
}
