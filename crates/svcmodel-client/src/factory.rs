//! Channel factories.
//!
//! A factory owns one endpoint. Opening it runs the endpoint behaviors,
//! builds the channel stack from the binding and opens the transport
//! factory; every channel it creates afterwards shares that stack and the
//! resulting [`ClientRuntime`].

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use url::Url;

use svcmodel_channels::{
    Binding, BindingParameters, ChannelShape, InnerChannelFactory, RequestChannel,
    RequestOverDuplex,
};
use svcmodel_core::{CommunicationObject, EndpointAddress, Error, Lifecycle, Result, Timeouts};

use crate::channel::{ChannelRegistry, ClientRuntimeChannel, InnerChannel};
use crate::config::ClientConfig;
use crate::description::ContractDescription;
use crate::duplex::DuplexClientRuntimeChannel;
use crate::endpoint::ServiceEndpoint;
use crate::inspector::EndpointBehavior;
use crate::instance::InstanceContext;
use crate::proxy::{DispatchTable, ProxyCache, ServiceContract};
use crate::runtime::ClientRuntime;

/// What an opened factory holds.
struct Opened {
    runtime: Arc<ClientRuntime>,
    inner: Arc<dyn InnerChannelFactory>,
    timeouts: Timeouts,
}

/// State shared by request/reply and duplex factories.
struct FactoryCore {
    lifecycle: Lifecycle,
    endpoint: RwLock<ServiceEndpoint>,
    table: Arc<DispatchTable>,
    instance: Option<Arc<InstanceContext>>,
    opened: RwLock<Option<Arc<Opened>>>,
    registry: Arc<ChannelRegistry>,
    next_channel: AtomicU64,
}

impl FactoryCore {
    fn new<C: ServiceContract>(endpoint: ServiceEndpoint, instance: Option<Arc<InstanceContext>>) -> Result<Self> {
        let duplex = instance.is_some();
        let contract = ContractDescription::for_contract::<C>(duplex)?;
        if endpoint.contract.name != contract.name || endpoint.contract.namespace != contract.namespace {
            return Err(Error::invalid_operation(format!(
                "the endpoint describes contract {} but the factory was created for {}",
                endpoint.contract.qualified_name(),
                contract.qualified_name()
            )));
        }
        let table = ProxyCache::dispatch_table::<C>(&contract, duplex);
        let kind = if duplex { "DuplexChannelFactory" } else { "ChannelFactory" };
        Ok(Self {
            lifecycle: Lifecycle::new(format!("{}({})", kind, contract.name)),
            endpoint: RwLock::new(ServiceEndpoint { contract, ..endpoint }),
            table,
            instance,
            opened: RwLock::new(None),
            registry: Arc::new(ChannelRegistry::default()),
            next_channel: AtomicU64::new(1),
        })
    }

    fn is_duplex(&self) -> bool {
        self.instance.is_some()
    }

    fn endpoint(&self) -> ServiceEndpoint {
        self.endpoint.read().clone()
    }

    fn add_behavior(&self, behavior: Arc<dyn EndpointBehavior>) -> Result<()> {
        self.lifecycle.ensure_mutable()?;
        self.endpoint.write().behaviors.push(behavior);
        Ok(())
    }

    fn opened(&self) -> Result<Arc<Opened>> {
        self.lifecycle.ensure_opened()?;
        self.opened
            .read()
            .clone()
            .ok_or_else(|| Error::ObjectDisposed(self.lifecycle.name().to_string()))
    }

    fn build(&self) -> Result<Opened> {
        let endpoint = self.endpoint();
        let (binding, _) = endpoint.validate()?;
        for behavior in &endpoint.behaviors {
            behavior.validate(&endpoint)?;
        }

        let mut parameters = BindingParameters::default();
        for behavior in &endpoint.behaviors {
            behavior.add_binding_parameters(&endpoint, &mut parameters)?;
        }

        let mut runtime = ClientRuntime::new(endpoint.contract.clone(), self.table.clone());
        if let Some(interval) = endpoint.receive_poll_interval {
            runtime.receive_poll_interval = interval;
        }
        for behavior in &endpoint.behaviors {
            behavior.apply_client_behavior(&endpoint, &mut runtime)?;
        }
        if runtime.receive_poll_interval.is_zero() {
            return Err(Error::invalid_operation(
                "the duplex receive poll interval must be greater than zero",
            ));
        }

        let inner = binding.build_channel_factory(&parameters)?;
        if self.is_duplex() && !inner.supports(ChannelShape::Duplex) {
            return Err(Error::invalid_operation(format!(
                "binding {} does not support duplex channels",
                binding.name()
            )));
        }
        if !inner.supports(ChannelShape::Request) && !inner.supports(ChannelShape::Duplex) {
            return Err(Error::invalid_operation(format!(
                "binding {} supports neither request nor duplex channels",
                binding.name()
            )));
        }
        Ok(Opened {
            runtime: Arc::new(runtime),
            inner,
            timeouts: binding.timeouts(),
        })
    }

    async fn create_channel(
        &self,
        address: Option<EndpointAddress>,
        via: Option<Url>,
        instance: Option<Arc<InstanceContext>>,
    ) -> Result<Arc<ClientRuntimeChannel>> {
        self.ensure_opened().await?;
        let opened = self.opened()?;
        let address = match address {
            Some(address) => address,
            None => self.endpoint.read().address.clone().ok_or_else(|| {
                Error::invalid_operation("the factory endpoint has no address")
            })?,
        };
        let via = via.unwrap_or_else(|| address.uri().clone());
        let factory = &opened.inner;

        let inner = match instance.or_else(|| self.instance.clone()) {
            Some(instance) => InnerChannel::Duplex(Arc::new(DuplexClientRuntimeChannel::new(
                factory.create_duplex_channel(&address, &via)?,
                instance,
                opened.runtime.callback_operations().cloned(),
                opened.timeouts,
                opened.runtime.receive_poll_interval,
            ))),
            None if factory.supports(ChannelShape::Request) => {
                InnerChannel::Request(factory.create_request_channel(&address, &via)?)
            }
            None => {
                let duplex = factory.create_duplex_channel(&address, &via)?;
                let request: Arc<dyn RequestChannel> = Arc::new(RequestOverDuplex::new(duplex));
                InnerChannel::Request(request)
            }
        };

        let channel = Arc::new(ClientRuntimeChannel::new(
            self.next_channel.fetch_add(1, Ordering::Relaxed),
            opened.runtime.clone(),
            inner,
            address,
            via,
            factory.message_version(),
            opened.timeouts,
            Arc::downgrade(&self.registry),
        ));
        self.registry.insert(&channel);
        tracing::debug!(
            factory = %self.lifecycle.name(),
            channel = channel.id(),
            via = %channel.via(),
            "channel created"
        );
        Ok(channel)
    }
}

impl fmt::Debug for FactoryCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryCore")
            .field("name", &self.lifecycle.name())
            .field("state", &self.lifecycle.state())
            .field("channels", &self.registry.len())
            .finish()
    }
}

#[async_trait]
impl CommunicationObject for FactoryCore {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn timeouts(&self) -> Timeouts {
        self.endpoint
            .read()
            .binding
            .as_ref()
            .map(|binding| binding.timeouts())
            .unwrap_or_default()
    }

    async fn on_open(&self, timeout: Duration) -> Result<()> {
        let opened = self.build()?;
        opened.inner.open_with_timeout(timeout).await?;
        *self.opened.write() = Some(Arc::new(opened));
        tracing::debug!(factory = %self.lifecycle.name(), "channel factory opened");
        Ok(())
    }

    async fn on_close(&self, timeout: Duration) -> Result<()> {
        for channel in self.registry.drain() {
            if let Err(e) = channel.close_with_timeout(timeout).await {
                tracing::debug!(channel = channel.id(), error = %e, "channel close failed");
            }
        }
        let opened = self.opened.write().take();
        match opened {
            Some(opened) => opened.inner.close_with_timeout(timeout).await,
            None => Ok(()),
        }
    }

    async fn on_abort(&self) {
        for channel in self.registry.drain() {
            channel.abort().await;
        }
        let opened = self.opened.write().take();
        if let Some(opened) = opened {
            opened.inner.abort().await;
        }
    }
}

macro_rules! delegate_communication_object {
    ($factory:ident) => {
        #[async_trait]
        impl<C: ServiceContract> CommunicationObject for $factory<C> {
            fn lifecycle(&self) -> &Lifecycle {
                self.core.lifecycle()
            }

            fn timeouts(&self) -> Timeouts {
                self.core.timeouts()
            }

            async fn on_open(&self, timeout: Duration) -> Result<()> {
                self.core.on_open(timeout).await
            }

            async fn on_close(&self, timeout: Duration) -> Result<()> {
                self.core.on_close(timeout).await
            }

            async fn on_abort(&self) {
                self.core.on_abort().await
            }
        }
    };
}

/// Creates request/reply channels for contract `C`.
///
/// ```rust,ignore
/// let factory = ChannelFactory::<Calculator>::new(binding, address)?;
/// let client = factory.create_channel().await?;
/// assert_eq!(client.add(1, 2).await?, 3);
/// ```
pub struct ChannelFactory<C: ServiceContract> {
    core: FactoryCore,
    _contract: PhantomData<fn() -> C>,
}

impl<C: ServiceContract> ChannelFactory<C> {
    /// Factory for `binding` at `address`
    pub fn new(binding: impl Binding + 'static, address: EndpointAddress) -> Result<Self> {
        let contract = ContractDescription::for_contract::<C>(false)?;
        Self::from_endpoint(
            ServiceEndpoint::new(contract)
                .with_binding(Arc::new(binding))
                .with_address(address),
        )
    }

    /// Factory for a prepared endpoint
    pub fn from_endpoint(endpoint: ServiceEndpoint) -> Result<Self> {
        Ok(Self {
            core: FactoryCore::new::<C>(endpoint, None)?,
            _contract: PhantomData,
        })
    }

    /// Factory for the configured endpoint of `C`.
    ///
    /// With `name`, the endpoint entry of that name; otherwise the only
    /// entry whose contract is `C`.
    pub fn from_config(config: &ClientConfig, name: Option<&str>) -> Result<Self> {
        let contract = ContractDescription::for_contract::<C>(false)?;
        Self::from_endpoint(config.endpoint_for(contract, name)?)
    }

    /// Snapshot of the endpoint
    pub fn endpoint(&self) -> ServiceEndpoint {
        self.core.endpoint()
    }

    /// Add a behavior; only before the factory opens
    pub fn add_behavior(&self, behavior: Arc<dyn EndpointBehavior>) -> Result<()> {
        self.core.add_behavior(behavior)
    }

    /// Runtime built when the factory opened
    pub fn runtime(&self) -> Result<Arc<ClientRuntime>> {
        Ok(self.core.opened()?.runtime.clone())
    }

    /// Channels created and not yet closed
    pub fn channel_count(&self) -> usize {
        self.core.registry.len()
    }

    /// Proxy to the endpoint address
    pub async fn create_channel(&self) -> Result<C::Proxy> {
        Ok(self.core.create_channel(None, None, None).await?.into())
    }

    /// Proxy to another address
    pub async fn create_channel_with_address(&self, address: EndpointAddress) -> Result<C::Proxy> {
        Ok(self.core.create_channel(Some(address), None, None).await?.into())
    }

    /// Proxy to `address`, physically connecting to `via`
    pub async fn create_channel_with_via(&self, address: EndpointAddress, via: Url) -> Result<C::Proxy> {
        Ok(self
            .core
            .create_channel(Some(address), Some(via), None)
            .await?
            .into())
    }

    /// Runtime channel without a proxy around it
    pub async fn create_runtime_channel(&self) -> Result<Arc<ClientRuntimeChannel>> {
        self.core.create_channel(None, None, None).await
    }
}

impl<C: ServiceContract> fmt::Debug for ChannelFactory<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelFactory").field("core", &self.core).finish()
    }
}

delegate_communication_object!(ChannelFactory);

/// Creates duplex channels for contract `C`, dispatching callbacks to an
/// [`InstanceContext`].
pub struct DuplexChannelFactory<C: ServiceContract> {
    core: FactoryCore,
    _contract: PhantomData<fn() -> C>,
}

impl<C: ServiceContract> DuplexChannelFactory<C> {
    /// Factory for `binding` at `address` delivering callbacks to `instance`
    pub fn new(
        instance: Arc<InstanceContext>,
        binding: impl Binding + 'static,
        address: EndpointAddress,
    ) -> Result<Self> {
        let contract = ContractDescription::for_contract::<C>(true)?;
        Self::from_endpoint(
            instance,
            ServiceEndpoint::new(contract)
                .with_binding(Arc::new(binding))
                .with_address(address),
        )
    }

    /// Factory for a prepared endpoint
    pub fn from_endpoint(instance: Arc<InstanceContext>, endpoint: ServiceEndpoint) -> Result<Self> {
        Ok(Self {
            core: FactoryCore::new::<C>(endpoint, Some(instance))?,
            _contract: PhantomData,
        })
    }

    /// Factory for the configured endpoint of `C`
    pub fn from_config(
        instance: Arc<InstanceContext>,
        config: &ClientConfig,
        name: Option<&str>,
    ) -> Result<Self> {
        let contract = ContractDescription::for_contract::<C>(true)?;
        Self::from_endpoint(instance, config.endpoint_for(contract, name)?)
    }

    /// Default instance context of created channels
    pub fn instance_context(&self) -> Option<&Arc<InstanceContext>> {
        self.core.instance.as_ref()
    }

    /// Snapshot of the endpoint
    pub fn endpoint(&self) -> ServiceEndpoint {
        self.core.endpoint()
    }

    /// Add a behavior; only before the factory opens
    pub fn add_behavior(&self, behavior: Arc<dyn EndpointBehavior>) -> Result<()> {
        self.core.add_behavior(behavior)
    }

    /// Channels created and not yet closed
    pub fn channel_count(&self) -> usize {
        self.core.registry.len()
    }

    /// Duplex proxy to the endpoint address
    pub async fn create_channel(&self) -> Result<C::Proxy> {
        Ok(self.core.create_channel(None, None, None).await?.into())
    }

    /// Duplex proxy delivering callbacks to `instance` instead of the factory's context
    pub async fn create_channel_with_instance(&self, instance: Arc<InstanceContext>) -> Result<C::Proxy> {
        Ok(self
            .core
            .create_channel(None, None, Some(instance))
            .await?
            .into())
    }

    /// Duplex proxy to another address
    pub async fn create_channel_with_address(&self, address: EndpointAddress) -> Result<C::Proxy> {
        Ok(self.core.create_channel(Some(address), None, None).await?.into())
    }

    /// Duplex proxy to `address`, physically connecting to `via`
    pub async fn create_channel_with_via(&self, address: EndpointAddress, via: Url) -> Result<C::Proxy> {
        Ok(self
            .core
            .create_channel(Some(address), Some(via), None)
            .await?
            .into())
    }
}

impl<C: ServiceContract> fmt::Debug for DuplexChannelFactory<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DuplexChannelFactory")
            .field("core", &self.core)
            .field("instance", &self.core.instance)
            .finish()
    }
}

delegate_communication_object!(DuplexChannelFactory);
