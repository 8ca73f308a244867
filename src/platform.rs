//! Platform information used to seed batch tags.

use std::collections::BTreeMap;

/// Supplies the default tags describing the host the logger runs on.
///
/// Configured tags are layered on top, so a host can override any key
/// reported here.
pub trait PlatformInfo: Send + Sync {
    fn tags(&self) -> BTreeMap<String, String>;
}

/// Reports the operating system and architecture the crate was built for,
/// plus an optional application name.
#[derive(Clone, Debug, Default)]
pub struct HostPlatform {
    app_name: Option<String>,
}

impl HostPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }
}

impl PlatformInfo for HostPlatform {
    fn tags(&self) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::from([
            ("platform".to_string(), std::env::consts::OS.to_string()),
            ("arch".to_string(), std::env::consts::ARCH.to_string()),
        ]);
        if let Some(app) = &self.app_name {
            tags.insert("app".to_string(), app.clone());
        }
        tags
    }
}

/// Contributes no tags.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoPlatformTags;

impl PlatformInfo for NoPlatformTags {
    fn tags(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_platform_reports_os_and_arch() {
        let tags = HostPlatform::new().with_app_name("demo").tags();
        assert_eq!(tags["platform"], std::env::consts::OS);
        assert_eq!(tags["arch"], std::env::consts::ARCH);
        assert_eq!(tags["app"], "demo");
    }
}
