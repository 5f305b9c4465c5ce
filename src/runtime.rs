//! Runtime - registry, identity cache and ownership forest behind one handle
//!
//! Design: the identity cache and the ownership forest share one mutex (the
//! runtime lock); the registry sits behind a read-mostly `RwLock`. Neither
//! lock is held while user code runs (convertors, constructors, casts) or
//! while a wrapper reference is dropped, since dropping a wrapper re-enters
//! the runtime.

use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::identity::{Identity, ObjectMap, ObjectMapStats};
use crate::logging;
use crate::ownership::{NodeId, OwnershipForest, Released, TransferTarget};
use crate::parser::{CallArgs, CallSignature, ParseState, ParsedArgs};
use crate::pending::{self, PendingHandoff};
use crate::registry::{SubclassFn, TypeDef, TypeEntry, TypeId, TypeRegistry};
use crate::value::{NativePtr, Value};
use crate::wrapper::{Ownership, Wrapper, WrapperFlags, WrapperType};
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Receives errors raised by dynamic overrides that native code cannot propagate.
pub type VirtualErrorHandler = dyn Fn(&Error, Option<&Arc<Wrapper>>) + Send + Sync;

/// How instances of wrapped types come into being.
pub trait ObjectModel: Send + Sync {
    /// Create an instance of `ty` with pre-bound constructor arguments.
    fn construct(&self, rt: &Runtime, ty: &Arc<WrapperType>, args: &CallArgs) -> Result<Arc<Wrapper>>;
}

/// Creates the wrapper, then adopts the pending handoff or runs the
/// type's constructor.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultObjectModel;

impl ObjectModel for DefaultObjectModel {
    fn construct(&self, rt: &Runtime, ty: &Arc<WrapperType>, args: &CallArgs) -> Result<Arc<Wrapper>> {
        let wrapper = rt.new_wrapper(ty.clone());
        rt.initialise(&wrapper, args)?;
        Ok(wrapper)
    }
}

/// What a constructor sees: the wrapper being initialised and its arguments.
pub struct InitContext<'a> {
    rt: &'a Runtime,
    wrapper: &'a Arc<Wrapper>,
    entry: &'a TypeEntry,
    args: &'a CallArgs,
}

impl<'a> InitContext<'a> {
    pub fn runtime(&self) -> &'a Runtime {
        self.rt
    }

    /// The instance under construction.
    pub fn wrapper(&self) -> &'a Arc<Wrapper> {
        self.wrapper
    }

    pub fn type_id(&self) -> TypeId {
        self.entry.id()
    }

    pub fn type_name(&self) -> &str {
        self.entry.name()
    }

    pub fn args(&self) -> &'a CallArgs {
        self.args
    }

    /// Try one constructor overload, with the instance as receiver.
    pub fn parse(&self, state: &mut ParseState, signature: &CallSignature) -> Result<Option<ParsedArgs>> {
        let args = self.args.clone().with_receiver(Value::Wrapper(self.wrapper.clone()));
        state.parse(self.rt, signature, &args)
    }
}

pub(crate) struct CoreState {
    pub(crate) objects: ObjectMap,
    pub(crate) forest: OwnershipForest,
}

#[derive(Default)]
struct Counters {
    wrappers_created: AtomicU64,
    native_releases: AtomicU64,
    overload_failures: AtomicU64,
}

pub(crate) struct Shared {
    registry: RwLock<TypeRegistry>,
    core: Mutex<CoreState>,
    config: RuntimeConfig,
    model: Arc<dyn ObjectModel>,
    error_handler: RwLock<Option<Arc<VirtualErrorHandler>>>,
    counters: Counters,
}

/// Serialisable snapshot of runtime counters.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStats {
    pub types: usize,
    pub identity: ObjectMapStats,
    pub ownership_nodes: usize,
    pub wrappers_created: u64,
    pub native_releases: u64,
    pub overload_failures: u64,
}

impl RuntimeStats {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::System(e.to_string()))
    }
}

pub struct RuntimeBuilder {
    config: RuntimeConfig,
    model: Arc<dyn ObjectModel>,
}

impl RuntimeBuilder {
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn object_model(mut self, model: impl ObjectModel + 'static) -> Self {
        self.model = Arc::new(model);
        self
    }

    pub fn build(self) -> Result<Runtime> {
        self.config.validate()?;
        Ok(self.build_unchecked())
    }

    fn build_unchecked(self) -> Runtime {
        let objects = ObjectMap::new(&self.config.identity);
        Runtime {
            shared: Arc::new(Shared {
                registry: RwLock::new(TypeRegistry::new()),
                core: Mutex::new(CoreState {
                    objects,
                    forest: OwnershipForest::new(),
                }),
                config: self.config,
                model: self.model,
                error_handler: RwLock::new(None),
                counters: Counters::default(),
            }),
        }
    }
}

/// Handle to a binding runtime. Clones share state.
#[derive(Clone)]
pub struct Runtime {
    shared: Arc<Shared>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("types", &self.registry().len())
            .finish()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self::builder().build_unchecked()
    }

    pub fn with_config(config: RuntimeConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder {
            config: RuntimeConfig::default(),
            model: Arc::new(DefaultObjectModel),
        }
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    pub(crate) fn registry(&self) -> RwLockReadGuard<'_, TypeRegistry> {
        self.shared.registry.read()
    }

    pub(crate) fn core(&self) -> MutexGuard<'_, CoreState> {
        self.shared.core.lock()
    }

    // ------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------

    pub fn register_type(&self, def: TypeDef) -> Result<TypeId> {
        self.shared.registry.write().register(def)
    }

    /// Register a down-cast convertor for instances of `base` and its subclasses.
    pub fn register_subclass_convertor<F>(&self, base: TypeId, convertor: F) -> Result<()>
    where
        F: Fn(NativePtr) -> Option<(NativePtr, TypeId)> + Send + Sync + 'static,
    {
        let func: Arc<SubclassFn> = Arc::new(convertor);
        self.shared.registry.write().add_subclass_convertor(base, func)
    }

    pub fn find_type(&self, name: &str) -> Option<TypeId> {
        self.registry().find(name)
    }

    pub fn type_entry(&self, ty: TypeId) -> Result<Arc<TypeEntry>> {
        self.registry().get(ty)
    }

    pub fn wrapper_type(&self, ty: TypeId) -> Result<Arc<WrapperType>> {
        self.registry().wrapper_type(ty)
    }

    /// The dynamic type object of a class.
    pub fn type_object(&self, ty: TypeId) -> Result<Value> {
        Ok(Value::Type(self.wrapper_type(ty)?))
    }

    pub fn is_subtype(&self, sub: TypeId, base: TypeId) -> bool {
        self.registry().is_subtype(sub, base)
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// A blank wrapper of `ty`, not yet bound to a native object.
    pub fn new_wrapper(&self, ty: Arc<WrapperType>) -> Arc<Wrapper> {
        self.shared.counters.wrappers_created.fetch_add(1, Ordering::Relaxed);
        Wrapper::new(ty, Arc::downgrade(&self.shared))
    }

    /// Instantiate `ty` from the dynamic side.
    pub fn construct(&self, ty: TypeId, args: &CallArgs) -> Result<Arc<Wrapper>> {
        let wrapper_type = self.wrapper_type(ty)?;
        self.shared.model.construct(self, &wrapper_type, args)
    }

    /// Wrap an existing native object through the normal construction path.
    pub fn wrap_instance(&self, ty: TypeId, handoff: PendingHandoff) -> Result<Arc<Wrapper>> {
        let wrapper_type = self.wrapper_type(ty)?;
        let _staged = pending::stage(handoff);
        self.shared.model.construct(self, &wrapper_type, &CallArgs::new())
    }

    /// Bind a freshly created wrapper to its native object: the pending
    /// handoff if there is one, otherwise whatever the constructor makes.
    pub fn initialise(&self, wrapper: &Arc<Wrapper>, args: &CallArgs) -> Result<()> {
        let entry = self.type_entry(wrapper.type_id())?;
        let (ptr, ownership, owner, flags, created) = match pending::take() {
            Some(handoff) => (handoff.ptr, handoff.ownership, handoff.owner, handoff.flags, false),
            None => {
                let mut cx = InitContext {
                    rt: self,
                    wrapper,
                    entry: &entry,
                    args,
                };
                let constructed = entry.behaviour().init(&mut cx)?;
                let (ownership, owner) = match constructed.owner {
                    None => (Ownership::DynamicOwned, None),
                    Some(TransferTarget::None) => (Ownership::NativeOwned, None),
                    Some(TransferTarget::NoDynamicOwner) => (Ownership::NativeHasExtraRef, None),
                    Some(TransferTarget::Owner(owner)) => (Ownership::DynamicOwned, Some(owner)),
                };
                (constructed.ptr, ownership, owner, WrapperFlags::CREATED, true)
            }
        };

        let bound = self.alias_addresses(wrapper.type_id(), ptr).and_then(|aliases| {
            wrapper.set_address(Some(ptr));
            wrapper.insert_flags(flags);
            let mut core = self.core();
            let released = match (owner, ownership) {
                (Some(owner), _) => core.forest.transfer_to(wrapper, TransferTarget::Owner(owner))?,
                (None, Ownership::NativeHasExtraRef) => {
                    core.forest.transfer_to(wrapper, TransferTarget::NoDynamicOwner)?
                }
                (None, ownership) => {
                    wrapper.set_ownership(ownership);
                    Released::default()
                }
            };
            let invalidated = if flags.contains(WrapperFlags::NOT_IN_MAP) {
                (Vec::new(), Released::default())
            } else {
                Self::add_identity_locked(&mut core, wrapper, ptr, &aliases)
            };
            Ok((released, invalidated))
        });
        let (released, invalidated) = match bound {
            Ok(bound) => bound,
            Err(error) => {
                // Unbound: the wrapper must not claim the object, and an
                // object its constructor made has no other owner.
                wrapper.set_address(None);
                if created {
                    logging::log_release(entry.name(), ptr.addr());
                    entry.behaviour().release(ptr, None);
                }
                return Err(error);
            }
        };
        drop(released);
        drop(invalidated);

        logging::log_wrap(wrapper.wrapper_type().name(), ptr.addr(), wrapper.ownership().as_str());
        Ok(())
    }

    /// The native side destroyed `wrapper`'s object.
    pub fn instance_destroyed(&self, wrapper: &Arc<Wrapper>) -> Result<()> {
        let Some(address) = wrapper.address() else {
            return Ok(());
        };
        let aliases = self.alias_addresses(wrapper.type_id(), address)?;
        let released = {
            let mut core = self.core();
            core.objects.remove(address, Arc::as_ptr(wrapper));
            for alias in &aliases {
                core.objects.remove(*alias, Arc::as_ptr(wrapper));
            }
            wrapper.set_address(None);
            core.forest.forget(wrapper)
        };
        drop(released);
        tracing::debug!(
            event = "instance_destroyed",
            native_type = wrapper.wrapper_type().name(),
            "Native object destroyed by native code"
        );
        Ok(())
    }

    /// Called by the last reference to a wrapper going away.
    pub(crate) fn wrapper_collected(
        &self,
        ty: &WrapperType,
        address: Option<NativePtr>,
        ownership: Ownership,
        node: Option<NodeId>,
    ) {
        let released = {
            let mut core = self.core();
            if let Some(address) = address {
                core.objects.purge(address);
            }
            node.map(|node| core.forest.release_node(node)).unwrap_or_default()
        };
        drop(released);

        if let (Some(ptr), Ownership::DynamicOwned) = (address, ownership) {
            match self.type_entry(ty.id()) {
                Ok(entry) => {
                    self.shared.counters.native_releases.fetch_add(1, Ordering::Relaxed);
                    logging::log_release(entry.name(), ptr.addr());
                    entry.behaviour().release(ptr, None);
                }
                Err(err) => logging::log_runtime_error(&err.to_string()),
            }
        }
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    /// The live wrapper of the native object at `ptr` viewed as `ty`.
    pub fn find_wrapper(&self, ptr: NativePtr, ty: TypeId) -> Option<Arc<Wrapper>> {
        let found = self.core().objects.find(ptr, ty);
        found.filter(|w| w.address().is_some())
    }

    /// Every live wrapper in the identity cache.
    pub fn live_wrappers(&self) -> Vec<Arc<Wrapper>> {
        self.core().objects.live_wrappers()
    }

    /// Register `wrapper` (and its super-type sub-objects) in the identity cache.
    pub fn register_identity(&self, wrapper: &Arc<Wrapper>) -> Result<()> {
        let Some(address) = wrapper.address() else {
            return Err(Error::Runtime(format!(
                "{} object has no native address",
                wrapper.wrapper_type().name()
            )));
        };
        let aliases = self.alias_addresses(wrapper.type_id(), address)?;
        let invalidated = {
            let mut core = self.core();
            Self::add_identity_locked(&mut core, wrapper, address, &aliases)
        };
        drop(invalidated);
        Ok(())
    }

    pub fn unregister_identity(&self, wrapper: &Arc<Wrapper>) -> Result<()> {
        let Some(address) = wrapper.address() else {
            return Ok(());
        };
        let aliases = self.alias_addresses(wrapper.type_id(), address)?;
        let mut core = self.core();
        core.objects.remove(address, Arc::as_ptr(wrapper));
        for alias in &aliases {
            core.objects.remove(*alias, Arc::as_ptr(wrapper));
        }
        Ok(())
    }

    pub fn identities(&self) -> Vec<Identity> {
        self.core().objects.identities()
    }

    /// Registers the wrapper and invalidates wrappers of deleted objects
    /// found at the same address. The returned references must be dropped
    /// after the lock.
    fn add_identity_locked(
        core: &mut CoreState,
        wrapper: &Arc<Wrapper>,
        address: NativePtr,
        aliases: &[NativePtr],
    ) -> (Vec<Arc<Wrapper>>, Released) {
        let mut stale = core.objects.add(address, wrapper, false);
        for alias in aliases {
            stale.extend(core.objects.add(*alias, wrapper, true));
        }
        let mut released = Released::default();
        for old in &stale {
            tracing::debug!(
                event = "identity_invalidated",
                native_type = old.wrapper_type().name(),
                address = ?address,
                "Wrapper of a deleted native object invalidated"
            );
            old.set_address(None);
            released.extend(core.forest.forget(old));
        }
        (stale, released)
    }

    /// Addresses of super-type sub-objects that differ from `address`.
    fn alias_addresses(&self, ty: TypeId, address: NativePtr) -> Result<Vec<NativePtr>> {
        let mut out = Vec::new();
        self.collect_aliases(ty, ty, address, &mut out)?;
        Ok(out)
    }

    fn collect_aliases(
        &self,
        most_derived: TypeId,
        ty: TypeId,
        address: NativePtr,
        out: &mut Vec<NativePtr>,
    ) -> Result<()> {
        let wrapper_type = self.wrapper_type(ty)?;
        for (index, base) in wrapper_type.supers().iter().enumerate() {
            // The primary base shares the object's address.
            if index > 0 {
                let sub_object = self.cast_ptr(address, most_derived, *base)?;
                if sub_object != address && !out.contains(&sub_object) {
                    out.push(sub_object);
                }
            }
            self.collect_aliases(most_derived, *base, address, out)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Ownership
    // ------------------------------------------------------------------

    pub fn transfer_to(&self, wrapper: &Arc<Wrapper>, target: TransferTarget) -> Result<()> {
        let released = self.core().forest.transfer_to(wrapper, target)?;
        drop(released);
        Ok(())
    }

    pub fn transfer_back(&self, wrapper: &Arc<Wrapper>) {
        let released = self.core().forest.transfer_back(wrapper);
        drop(released);
    }

    /// Make `parent` keep `child` alive.
    pub fn attach(&self, child: &Arc<Wrapper>, parent: &Arc<Wrapper>) -> Result<()> {
        let released = self.core().forest.attach(child, parent)?;
        drop(released);
        Ok(())
    }

    pub fn detach(&self, child: &Arc<Wrapper>) {
        let released = self.core().forest.detach(child);
        drop(released);
    }

    pub fn parent_of(&self, wrapper: &Wrapper) -> Option<Arc<Wrapper>> {
        self.core().forest.parent(wrapper)
    }

    pub fn children_of(&self, wrapper: &Wrapper) -> Vec<Arc<Wrapper>> {
        self.core().forest.children(wrapper)
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    pub fn set_virtual_error_handler<F>(&self, handler: F)
    where
        F: Fn(&Error, Option<&Arc<Wrapper>>) + Send + Sync + 'static,
    {
        *self.shared.error_handler.write() = Some(Arc::new(handler));
    }

    /// Report an error raised by a dynamic override that cannot propagate.
    pub fn report_virtual_error(&self, error: &Error, wrapper: Option<&Arc<Wrapper>>) {
        let handler = self.shared.error_handler.read().clone();
        match handler {
            Some(handler) => handler(error, wrapper),
            None => logging::log_runtime_error(&error.to_string()),
        }
    }

    pub(crate) fn count_overload_failure(&self) {
        self.shared.counters.overload_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> RuntimeStats {
        let types = self.registry().len();
        let core = self.core();
        let counters = &self.shared.counters;
        RuntimeStats {
            types,
            identity: core.objects.stats(),
            ownership_nodes: core.forest.node_count(),
            wrappers_created: counters.wrappers_created.load(Ordering::Relaxed),
            native_releases: counters.native_releases.load(Ordering::Relaxed),
            overload_failures: counters.overload_failures.load(Ordering::Relaxed),
        }
    }
}
