use std::collections::BTreeSet;
use std::path::{Component, Path};

use thiserror::Error;

pub const DEFAULT_VOLUME_NAME: &str = "local-tz";
pub const DEFAULT_MOUNT_PATH: &str = "/etc/localtime";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("mount descriptor field '{0}' must not be empty")]
    EmptyField(&'static str),
    #[error("mount descriptor field '{0}' must be an absolute path, got {1:?}")]
    RelativePath(&'static str, String),
    #[error("invalid timezone name {0:?}")]
    InvalidTimezone(String),
    #[error("failed to find timezone file {0:?}")]
    MissingHostPath(String),
}

/// The volume injected into every pod, and where it ends up inside each container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountDescriptor {
    name: String,
    host_path: String,
    mount_path: String,
}

impl MountDescriptor {
    pub fn new(
        name: impl Into<String>,
        host_path: impl Into<String>,
        mount_path: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        let host_path = host_path.into();
        let mount_path = mount_path.into();

        for (field, value) in [
            ("name", &name),
            ("hostPath", &host_path),
            ("mountPath", &mount_path),
        ] {
            if value.is_empty() {
                return Err(ConfigError::EmptyField(field));
            }
        }

        for (field, value) in [("hostPath", &host_path), ("mountPath", &mount_path)] {
            if !Path::new(value).is_absolute() {
                return Err(ConfigError::RelativePath(field, value.clone()));
            }
        }

        Ok(Self {
            name,
            host_path,
            mount_path,
        })
    }

    /// Descriptor for `<zoneinfo_dir>/<tz>` mounted over `/etc/localtime`.
    pub fn for_timezone(zoneinfo_dir: impl AsRef<Path>, tz: &str) -> Result<Self, ConfigError> {
        let tz_path = Path::new(tz);
        let valid = !tz.is_empty()
            && tz_path
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !valid {
            return Err(ConfigError::InvalidTimezone(tz.to_string()));
        }

        let host_path = zoneinfo_dir.as_ref().join(tz_path);
        Self::new(
            DEFAULT_VOLUME_NAME,
            host_path.to_string_lossy(),
            DEFAULT_MOUNT_PATH,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host_path(&self) -> &str {
        &self.host_path
    }

    pub fn mount_path(&self) -> &str {
        &self.mount_path
    }

    pub fn verify_host_path(&self) -> Result<(), ConfigError> {
        if Path::new(&self.host_path).exists() {
            Ok(())
        } else {
            Err(ConfigError::MissingHostPath(self.host_path.clone()))
        }
    }
}

/// Startup configuration shared read-only by every admission request.
#[derive(Debug, Clone)]
pub struct InjectorConfig {
    pub ignored_namespaces: BTreeSet<String>,
    pub mount: MountDescriptor,
}

impl InjectorConfig {
    pub fn new<I, S>(ignored_namespaces: I, mount: MountDescriptor) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ignored_namespaces = ignored_namespaces
            .into_iter()
            .map(Into::into)
            .filter(|namespace: &String| !namespace.is_empty())
            .collect();

        Self {
            ignored_namespaces,
            mount,
        }
    }
}
