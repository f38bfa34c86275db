use serde::Serialize;
use std::collections::BTreeMap;

const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Identifies the emitting process to the telemetry backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resource {
    pub service_name: String,
    pub service_version: String,
    pub host_name: Option<String>,
    pub process_id: u32,
}

impl Resource {
    pub fn detect(service_name: impl Into<String>) -> Self {
        Resource {
            service_name: service_name.into(),
            service_version: SDK_VERSION.to_string(),
            host_name: hostname::get().ok().and_then(|h| h.into_string().ok()),
            process_id: std::process::id(),
        }
    }

    /// Semantic-convention attribute map
    pub fn attributes(&self) -> BTreeMap<&'static str, String> {
        let mut attrs = BTreeMap::new();
        attrs.insert("service.name", self.service_name.clone());
        attrs.insert("service.version", self.service_version.clone());
        attrs.insert("process.pid", self.process_id.to_string());
        attrs.insert("telemetry.sdk.language", "rust".to_string());
        if let Some(host) = &self.host_name {
            attrs.insert("host.name", host.clone());
        }
        attrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_fills_process_fields() {
        let resource = Resource::detect("emails-worker");
        assert_eq!(resource.service_name, "emails-worker");
        assert_eq!(resource.process_id, std::process::id());

        let attrs = resource.attributes();
        assert_eq!(attrs["service.name"], "emails-worker");
        assert_eq!(attrs["telemetry.sdk.language"], "rust");
    }
}
