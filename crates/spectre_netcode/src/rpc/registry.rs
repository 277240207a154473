//! RPC type registry.

use std::any::TypeId;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use super::builtin::{GoInGame, SetNetworkId};
use super::{OutgoingRpcBuffer, RpcCommand, RpcContext};
use crate::error::{NetError, NetResult};
use crate::protocol::DeltaBuffer;

trait RpcExecutor: Send + Sync {
    fn name(&self) -> &'static str;
    fn execute(&self, buffer: &mut DeltaBuffer, ctx: &mut RpcContext<'_>) -> NetResult<()>;
}

struct TypedExecutor<T>(PhantomData<fn() -> T>);

impl<T: RpcCommand> RpcExecutor for TypedExecutor<T> {
    fn name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn execute(&self, buffer: &mut DeltaBuffer, ctx: &mut RpcContext<'_>) -> NetResult<()> {
        T::deserialize(buffer)?.execute(ctx);
        Ok(())
    }
}

/// Collects RPC types at startup. Ids follow registration order.
pub struct RpcRegistryBuilder {
    executors: Vec<Box<dyn RpcExecutor>>,
    ids: HashMap<TypeId, u32>,
}

impl RpcRegistryBuilder {
    /// Creates a builder with [`SetNetworkId`] (id 0) and [`GoInGame`]
    /// (id 1) already registered.
    #[must_use]
    pub fn new() -> Self {
        Self {
            executors: Vec::new(),
            ids: HashMap::new(),
        }
        .register::<SetNetworkId>()
        .register::<GoInGame>()
    }

    /// Registers `T` under the next id.
    ///
    /// # Panics
    ///
    /// Panics if `T` is already registered.
    #[must_use]
    pub fn register<T: RpcCommand>(mut self) -> Self {
        let id = u32::try_from(self.executors.len()).unwrap_or_else(|_| panic!("rpc id space exhausted"));
        if self.ids.insert(TypeId::of::<T>(), id).is_some() {
            panic!("rpc {} registered twice", std::any::type_name::<T>());
        }
        self.executors.push(Box::new(TypedExecutor::<T>(PhantomData)));
        self
    }

    /// Freezes the registry.
    #[must_use]
    pub fn build(self) -> Arc<RpcRegistry> {
        tracing::debug!(rpcs = self.executors.len(), "rpc registry built");
        Arc::new(RpcRegistry {
            executors: self.executors,
            ids: self.ids,
        })
    }
}

impl Default for RpcRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable set of RPC types.
pub struct RpcRegistry {
    executors: Vec<Box<dyn RpcExecutor>>,
    ids: HashMap<TypeId, u32>,
}

impl RpcRegistry {
    /// Number of registered RPC types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.executors.len()
    }

    /// Always false: the handshake RPCs are always registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    /// Wire id of `T`.
    #[must_use]
    pub fn id_of<T: RpcCommand>(&self) -> Option<u32> {
        self.ids.get(&TypeId::of::<T>()).copied()
    }

    /// Typed handle for scheduling `T`.
    ///
    /// # Panics
    ///
    /// Panics if `T` was not registered.
    #[must_use]
    pub fn queue<T: RpcCommand>(&self) -> RpcQueue<T> {
        let id = self
            .id_of::<T>()
            .unwrap_or_else(|| panic!("rpc {} is not registered", std::any::type_name::<T>()));
        RpcQueue {
            id,
            _marker: PhantomData,
        }
    }

    /// Executes every RPC in `buffer`, in order.
    ///
    /// Returns the number executed.
    ///
    /// # Errors
    ///
    /// [`NetError::UnknownRpcType`] for an unregistered id, or any read
    /// error. RPCs before the failing one have already run.
    pub fn receive(&self, buffer: &mut DeltaBuffer, ctx: &mut RpcContext<'_>) -> NetResult<usize> {
        let mut executed = 0;
        while !buffer.is_finished() {
            let id = buffer.read_packed_uint()?;
            let executor = self
                .executors
                .get(id as usize)
                .ok_or(NetError::UnknownRpcType(id))?;
            tracing::trace!(rpc = executor.name(), "executing rpc");
            executor.execute(buffer, ctx)?;
            executed += 1;
        }
        Ok(executed)
    }
}

/// Typed scheduling handle returned by [`RpcRegistry::queue`].
pub struct RpcQueue<T> {
    id: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for RpcQueue<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for RpcQueue<T> {}

impl<T: RpcCommand> RpcQueue<T> {
    /// Wire id of `T`.
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Appends `[id][payload]` to `buffer`.
    pub fn schedule(&self, buffer: &mut OutgoingRpcBuffer, rpc: &T) {
        buffer.push(self.id, rpc);
    }
}
