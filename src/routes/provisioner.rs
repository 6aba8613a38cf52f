use super::route::EndpointDescriptor;
use crate::config::EndpointEntry;
use crate::Result;
use async_trait::async_trait;

/// Source of egress endpoints, consulted once when the pool is built
#[async_trait]
pub trait GatewayProvisioner: Send + Sync {
    /// Lists endpoints available in `region`, or everywhere when None
    async fn list_endpoints(&self, region: Option<&str>) -> Result<Vec<EndpointDescriptor>>;
}

/// Provisioner serving a fixed endpoint list from configuration
///
/// The region filter matches the endpoint tag; untagged endpoints are
/// available in every region.
#[derive(Debug, Clone, Default)]
pub struct StaticProvisioner {
    endpoints: Vec<EndpointDescriptor>,
}

impl StaticProvisioner {
    pub fn new(endpoints: Vec<EndpointDescriptor>) -> Self {
        Self { endpoints }
    }

    pub fn from_entries(entries: &[EndpointEntry]) -> Self {
        Self::new(
            entries
                .iter()
                .map(|entry| EndpointDescriptor {
                    id: entry.id.clone(),
                    url: entry.url.clone(),
                    tag: entry.tag.clone(),
                })
                .collect(),
        )
    }
}

#[async_trait]
impl GatewayProvisioner for StaticProvisioner {
    async fn list_endpoints(&self, region: Option<&str>) -> Result<Vec<EndpointDescriptor>> {
        Ok(self
            .endpoints
            .iter()
            .filter(|endpoint| match (region, endpoint.tag.as_deref()) {
                (Some(region), Some(tag)) => region == tag,
                _ => true,
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RoutesConfig, SelectionMode};
    use crate::routes::ProxyHealthPool;

    fn entries() -> Vec<EndpointEntry> {
        vec![
            EndpointEntry {
                id: "us-1".to_string(),
                url: "http://10.0.0.1:3128".to_string(),
                tag: Some("us".to_string()),
            },
            EndpointEntry {
                id: "eu-1".to_string(),
                url: "socks5://10.0.0.2:1080".to_string(),
                tag: Some("eu".to_string()),
            },
            EndpointEntry {
                id: "any-1".to_string(),
                url: "http://10.0.0.3:3128".to_string(),
                tag: None,
            },
        ]
    }

    #[tokio::test]
    async fn test_region_filter() {
        let provisioner = StaticProvisioner::from_entries(&entries());

        let all = provisioner.list_endpoints(None).await.unwrap();
        assert_eq!(all.len(), 3);

        let eu: Vec<String> = provisioner
            .list_endpoints(Some("eu"))
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(eu, ["eu-1", "any-1"]);
    }

    #[tokio::test]
    async fn test_pool_built_from_provisioner() {
        let config = RoutesConfig {
            selection: SelectionMode::RoundRobin,
            region: Some("us".to_string()),
            ..Default::default()
        };
        let provisioner = StaticProvisioner::from_entries(&entries());
        let pool = ProxyHealthPool::provision(&config, &provisioner, None).await.unwrap();

        assert_eq!(pool.len(), 2);
        assert_eq!(pool.acquire_route(None).unwrap().id, "us-1");
    }
}
