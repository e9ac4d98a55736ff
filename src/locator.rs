//! Key to node routing

use std::sync::Arc;

use crate::node::Node;

/// Picks the node that owns a key.
pub trait NodeLocator: Send + Sync {
    fn primary(&self, key: &str) -> Arc<Node>;

    fn all(&self) -> &[Arc<Node>];
}

/// FNV-1a, 32 bit. Stable across processes, unlike `DefaultHasher`.
pub fn fnv1a_32(key: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    key.iter().fold(OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(PRIME)
    })
}

/// Hash modulo the node count.
pub struct ArrayModLocator {
    nodes: Vec<Arc<Node>>,
}

impl ArrayModLocator {
    /// `nodes` must not be empty.
    pub fn new(nodes: Vec<Arc<Node>>) -> Self {
        debug_assert!(!nodes.is_empty());
        Self { nodes }
    }

    pub fn index_of(&self, key: &str) -> usize {
        fnv1a_32(key.as_bytes()) as usize % self.nodes.len()
    }
}

impl NodeLocator for ArrayModLocator {
    fn primary(&self, key: &str) -> Arc<Node> {
        self.nodes[self.index_of(key)].clone()
    }

    fn all(&self) -> &[Arc<Node>] {
        &self.nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;

    #[test]
    fn test_fnv1a_reference_values() {
        assert_eq!(fnv1a_32(b""), 0x811c_9dc5);
        assert_eq!(fnv1a_32(b"a"), 0xe40c_292c);
        assert_eq!(fnv1a_32(b"foobar"), 0xbf9c_f968);
    }

    #[tokio::test]
    async fn test_routing_is_stable() {
        let config = ClientConfig::default();
        let nodes: Vec<_> = ["10.0.0.1:11211", "10.0.0.2:11211", "10.0.0.3:11211"]
            .iter()
            .map(|addr| Node::new(*addr, &config).0)
            .collect();
        let locator = ArrayModLocator::new(nodes);

        for key in ["user:1", "user:2", "session:abc"] {
            let first = locator.primary(key);
            let again = locator.primary(key);
            assert!(Arc::ptr_eq(&first, &again));
            assert_eq!(
                first.name(),
                locator.all()[fnv1a_32(key.as_bytes()) as usize % 3].name()
            );
        }
        assert_eq!(locator.all().len(), 3);
    }
}
