//! Lifecycle-managed registry of named services.
//!
//! Services are produced by async factories that receive a [`Resolver`] for
//! their own dependencies. Every resolve call tree carries the chain of names
//! currently being built; seeing a name twice on one chain is a
//! [`ContainerError::CircularDependency`].
//!
//! Singletons are cached in a per-name `tokio::sync::OnceCell`, so concurrent
//! first resolutions share one factory invocation.

mod error;
mod graph;

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

pub use error::ContainerError;

use crate::obs;

/// A type-erased service instance.
pub type Instance = Arc<dyn Any + Send + Sync>;

type FactoryFn = Arc<dyn Fn(Resolver) -> BoxFuture<'static, anyhow::Result<Instance>> + Send + Sync>;
type HookFn = Arc<dyn Fn(Instance) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationOptions {
    pub singleton: bool,
}

impl Default for RegistrationOptions {
    fn default() -> Self {
        Self { singleton: true }
    }
}

impl RegistrationOptions {
    pub fn transient() -> Self {
        Self { singleton: false }
    }
}

struct Registration {
    factory: FactoryFn,
    singleton: bool,
}

#[derive(Default)]
struct Registry {
    registrations: HashMap<String, Registration>,
    order: Vec<String>,
    initializers: HashMap<String, HookFn>,
    disposers: HashMap<String, HookFn>,
    singletons: HashMap<String, Arc<OnceCell<Instance>>>,
    edges: graph::Edges,
}

/// A disposer that returned an error during [`DependencyContainer::dispose`].
#[derive(Debug)]
pub struct DisposalFailure {
    pub name: String,
    pub error: anyhow::Error,
}

#[derive(Clone, Default)]
pub struct DependencyContainer {
    inner: Arc<Mutex<Registry>>,
}

impl fmt::Debug for DependencyContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyContainer")
            .field("registered", &self.registered_names())
            .finish()
    }
}

fn check_name(name: &str) -> Result<(), ContainerError> {
    if name.trim().is_empty() {
        return Err(ContainerError::InvalidRegistration(
            "dependency name must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Adapts a typed hook into a type-erased one.
fn erase_hook<T, F, Fut>(name: &str, hook: F) -> HookFn
where
    T: Clone + Send + Sync + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let name = name.to_string();
    Arc::new(move |instance: Instance| match instance.downcast_ref::<T>() {
        Some(value) => hook(value.clone()).boxed(),
        None => {
            let msg = format!("{name} is not a {}", type_name::<T>());
            async move { Err(anyhow::anyhow!(msg)) }.boxed()
        }
    })
}

impl DependencyContainer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers an async factory under `name`.
    ///
    /// Re-registering a name replaces its factory but keeps an already
    /// created singleton and the original registration position.
    pub fn register<T, F, Fut>(
        &self,
        name: &str,
        options: RegistrationOptions,
        factory: F,
    ) -> Result<(), ContainerError>
    where
        T: Send + Sync + 'static,
        F: Fn(Resolver) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        check_name(name)?;
        let factory: FactoryFn = Arc::new(move |resolver| {
            let fut = factory(resolver);
            async move { fut.await.map(|value| Arc::new(value) as Instance) }.boxed()
        });

        let mut reg = self.lock();
        if !reg.registrations.contains_key(name) {
            reg.order.push(name.to_string());
        }
        reg.registrations.insert(
            name.to_string(),
            Registration {
                factory,
                singleton: options.singleton,
            },
        );
        debug!(name, singleton = options.singleton, "dependency registered");
        Ok(())
    }

    /// Registers a ready-made value as a singleton.
    pub fn register_instance<T>(&self, name: &str, value: T) -> Result<(), ContainerError>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.register(name, RegistrationOptions::default(), move |_| {
            let value = value.clone();
            async move { Ok(value) }
        })
    }

    /// Runs `initializer` on every freshly built instance of `name` before it
    /// is cached or returned.
    pub fn set_initializer<T, F, Fut>(&self, name: &str, initializer: F) -> Result<(), ContainerError>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        check_name(name)?;
        let hook = erase_hook(name, initializer);
        self.lock().initializers.insert(name.to_string(), hook);
        Ok(())
    }

    /// Runs `disposer` on the cached singleton of `name` during [`dispose`].
    ///
    /// [`dispose`]: DependencyContainer::dispose
    pub fn set_disposer<T, F, Fut>(&self, name: &str, disposer: F) -> Result<(), ContainerError>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        check_name(name)?;
        let hook = erase_hook(name, disposer);
        self.lock().disposers.insert(name.to_string(), hook);
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.lock().registrations.contains_key(name)
    }

    /// Names in registration order.
    pub fn registered_names(&self) -> Vec<String> {
        self.lock().order.clone()
    }

    pub fn resolver(&self) -> Resolver {
        Resolver {
            container: self.clone(),
            chain: Vec::new(),
        }
    }

    pub async fn resolve<T>(&self, name: &str) -> Result<T, ContainerError>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.resolver().resolve(name).await
    }

    /// Resolves every registration in order, then checks the observed
    /// resolution graph for cycles.
    pub async fn initialize_all(&self) -> Result<(), ContainerError> {
        let names = self.registered_names();
        for name in &names {
            self.resolver().resolve_instance(name).await?;
        }

        let edges = self.lock().edges.clone();
        if let Some(chain) = graph::find_cycle(&edges) {
            return Err(ContainerError::CircularDependency { chain });
        }
        info!(count = names.len(), "container initialized");
        Ok(())
    }

    /// Disposes cached singletons in reverse registration order and clears
    /// the cache. Disposer errors are collected, never propagated.
    pub async fn dispose(&self) -> Vec<DisposalFailure> {
        let work: Vec<(String, HookFn, Instance)> = {
            let mut reg = self.lock();
            let singletons = std::mem::take(&mut reg.singletons);
            reg.edges.clear();
            reg.order
                .iter()
                .rev()
                .filter_map(|name| {
                    let instance = singletons.get(name)?.get()?.clone();
                    let disposer = reg.disposers.get(name)?.clone();
                    Some((name.clone(), disposer, instance))
                })
                .collect()
        };

        let total = work.len();
        let mut failures = Vec::new();
        for (name, disposer, instance) in work {
            match disposer(instance).await {
                Ok(()) => debug!(name = %name, "dependency disposed"),
                Err(error) => {
                    warn!(name = %name, error = %error, "disposer failed");
                    failures.push(DisposalFailure { name, error });
                }
            }
        }
        if !failures.is_empty() {
            obs::emit_disposal_failures(failures.len(), total);
        }
        failures
    }
}

/// Resolution handle handed to factories. Carries the chain of names being
/// built so nested resolutions can detect cycles.
#[derive(Clone)]
pub struct Resolver {
    container: DependencyContainer,
    chain: Vec<String>,
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver").field("chain", &self.chain).finish()
    }
}

impl Resolver {
    /// Names currently being resolved, outermost first.
    pub fn chain(&self) -> &[String] {
        &self.chain
    }

    pub async fn resolve<T>(&self, name: &str) -> Result<T, ContainerError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let instance = self.resolve_instance(name).await?;
        instance
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| ContainerError::TypeMismatch {
                name: name.to_string(),
                expected: type_name::<T>(),
            })
    }

    async fn resolve_instance(&self, name: &str) -> Result<Instance, ContainerError> {
        if self.chain.iter().any(|n| n == name) {
            let mut chain = self.chain.clone();
            chain.push(name.to_string());
            return Err(ContainerError::CircularDependency { chain });
        }

        let (factory, initializer, cell) = {
            let mut reg = self.container.lock();
            if let Some(parent) = self.chain.last() {
                reg.edges
                    .entry(parent.clone())
                    .or_default()
                    .insert(name.to_string());
            }
            let Some(registration) = reg.registrations.get(name) else {
                return Err(ContainerError::NotRegistered {
                    name: name.to_string(),
                    chain: self.chain.clone(),
                });
            };
            let factory = registration.factory.clone();
            let singleton = registration.singleton;
            let initializer = reg.initializers.get(name).cloned();
            let cell = singleton.then(|| {
                reg.singletons
                    .entry(name.to_string())
                    .or_insert_with(|| Arc::new(OnceCell::new()))
                    .clone()
            });
            (factory, initializer, cell)
        };

        let mut chain = self.chain.clone();
        chain.push(name.to_string());
        let child = Resolver {
            container: self.container.clone(),
            chain,
        };

        let build = || async move {
            let instance = factory(child).await.map_err(|e| lift_factory_error(name, e))?;
            if let Some(init) = initializer {
                init(instance.clone())
                    .await
                    .map_err(|source| ContainerError::Initializer {
                        name: name.to_string(),
                        source,
                    })?;
            }
            debug!(name, "dependency created");
            Ok::<Instance, ContainerError>(instance)
        };

        match cell {
            Some(cell) => cell.get_or_try_init(build).await.cloned(),
            None => build().await,
        }
    }
}

/// Configuration errors raised by a nested resolution surface unchanged;
/// anything else is attributed to the factory of `name`.
fn lift_factory_error(name: &str, error: anyhow::Error) -> ContainerError {
    match error.downcast::<ContainerError>() {
        Ok(inner) if inner.is_configuration_error() => inner,
        Ok(inner) => ContainerError::Factory {
            name: name.to_string(),
            source: inner.into(),
        },
        Err(error) => ContainerError::Factory {
            name: name.to_string(),
            source: error,
        },
    }
}
