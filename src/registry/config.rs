//! Registry configuration

/// Stream registry options
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Capacity of each viewer's delivery queue
    pub viewer_queue_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            viewer_queue_capacity: 100,
        }
    }
}

impl RegistryConfig {
    /// Set the viewer queue capacity (at least 1)
    pub fn viewer_queue_capacity(mut self, capacity: usize) -> Self {
        self.viewer_queue_capacity = capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        assert_eq!(RegistryConfig::default().viewer_queue_capacity, 100);
    }

    #[test]
    fn test_builder_capacity_floor() {
        let config = RegistryConfig::default().viewer_queue_capacity(0);
        assert_eq!(config.viewer_queue_capacity, 1);
    }
}
