//! Device registry — which node serves which device.
//!
//! Built once at startup and passed around by `Arc`. There is no global
//! table: tests build a registry over fake nodes the same way the daemon
//! builds one over real transports.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use buildhub_domain::error::DeviceError;
use tokio::sync::mpsc;

use crate::ports::DeviceNode;
use crate::pull::Fetcher;
use crate::reading::Reading;

/// Maps device names to the node serving them.
#[derive(Debug)]
pub struct Registry<N> {
    nodes: HashMap<String, Arc<N>>,
    fallback: Option<Arc<N>>,
}

impl<N: DeviceNode> Registry<N> {
    #[must_use]
    pub fn builder() -> RegistryBuilder<N> {
        RegistryBuilder {
            nodes: HashMap::new(),
            fallback: None,
        }
    }

    /// The node serving `device`.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::UnknownDevice`] when no node is registered
    /// for `device` and there is no fallback node.
    pub fn node(&self, device: &str) -> Result<Arc<N>, DeviceError> {
        self.nodes
            .get(device)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| DeviceError::UnknownDevice {
                name: device.to_string(),
            })
    }

    /// A fetcher for `T` readings of `device`.
    ///
    /// # Errors
    ///
    /// Same as [`Registry::node`].
    pub fn fetcher<T: Reading>(&self, device: &str) -> Result<NodeFetcher<N, T>, DeviceError> {
        Ok(NodeFetcher {
            node: self.node(device)?,
            device: device.to_string(),
            _reading: PhantomData,
        })
    }
}

/// Builder for [`Registry`].
#[derive(Debug)]
pub struct RegistryBuilder<N> {
    nodes: HashMap<String, Arc<N>>,
    fallback: Option<Arc<N>>,
}

impl<N: DeviceNode> RegistryBuilder<N> {
    /// Route `device` to `node`.
    #[must_use]
    pub fn device(mut self, device: impl Into<String>, node: Arc<N>) -> Self {
        self.nodes.insert(device.into(), node);
        self
    }

    /// Route every unregistered device to `node`.
    #[must_use]
    pub fn fallback(mut self, node: Arc<N>) -> Self {
        self.fallback = Some(node);
        self
    }

    #[must_use]
    pub fn build(self) -> Registry<N> {
        Registry {
            nodes: self.nodes,
            fallback: self.fallback,
        }
    }
}

/// [`Fetcher`] over one capability of one device of a node.
pub struct NodeFetcher<N, T> {
    node: Arc<N>,
    device: String,
    _reading: PhantomData<fn() -> T>,
}

impl<N: DeviceNode, T: Reading> Fetcher for NodeFetcher<N, T> {
    type Item = T;

    fn pull(&self, tx: mpsc::Sender<T>) -> impl Future<Output = Result<(), DeviceError>> + Send {
        T::pull(self.node.as_ref(), &self.device, tx)
    }

    async fn poll(&self, tx: mpsc::Sender<T>) -> Result<(), DeviceError> {
        let value = T::get(self.node.as_ref(), &self.device).await?;
        tx.send(value).await.map_err(|_| DeviceError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildhub_domain::reading::{Brightness, Occupancy};

    #[derive(Debug)]
    struct NamedNode(&'static str);

    impl DeviceNode for NamedNode {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn get_brightness(&self, _device: &str) -> Result<Brightness, DeviceError> {
            Ok(Brightness {
                level_percent: 42.0,
            })
        }
    }

    #[test]
    fn should_route_registered_device_before_fallback() {
        let registry = Registry::builder()
            .device("light-1", Arc::new(NamedNode("bacnet")))
            .fallback(Arc::new(NamedNode("virtual")))
            .build();

        assert_eq!(registry.node("light-1").unwrap().name(), "bacnet");
        assert_eq!(registry.node("light-2").unwrap().name(), "virtual");
    }

    #[test]
    fn should_reject_unknown_device_without_fallback() {
        let registry = Registry::builder()
            .device("light-1", Arc::new(NamedNode("bacnet")))
            .build();

        let err = registry.node("pir-9").unwrap_err();
        assert!(matches!(err, DeviceError::UnknownDevice { name } if name == "pir-9"));
    }

    #[tokio::test]
    async fn should_poll_through_get_operation() {
        let registry = Registry::builder()
            .fallback(Arc::new(NamedNode("virtual")))
            .build();
        let fetcher = registry.fetcher::<Brightness>("light-1").unwrap();
        let (tx, mut rx) = mpsc::channel(1);

        fetcher.poll(tx).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().level_percent, 42.0);
    }

    #[tokio::test]
    async fn should_surface_unimplemented_pull() {
        let registry = Registry::builder()
            .fallback(Arc::new(NamedNode("virtual")))
            .build();
        let fetcher = registry.fetcher::<Occupancy>("pir-1").unwrap();
        let (tx, _rx) = mpsc::channel(1);

        let err = fetcher.pull(tx).await.unwrap_err();
        assert!(err.is_unimplemented());
    }
}
