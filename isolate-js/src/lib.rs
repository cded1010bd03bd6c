//! Native-side isolate bridge for a JavaScript engine hosted in a managed runtime.
//!
//! Embedders written against a handle-based engine API (isolates, handles, handle scopes,
//! contexts) expect to own their values through small native proxies. Here the engine lives in a
//! managed runtime instead, reachable only through a thread-bound call surface. This crate is the
//! layer in between. It provides:
//! - An [`Isolate`] that owns the resolved binding table ([`Gateway`]), the shared
//!   [`ScratchBuffer`], and every [`Handle`] created through it
//! - Reference-counted, generation-checked handles over local/global/weak foreign references
//! - Wrapper pools that recycle handle entries ([`ObjectPool`])
//! - Value dispatch from a wire type tag ([`ValueType`]) to a typed [`Wrapper`]
//! - Handle-scope and context stacks ([`HandleScope`], [`ContextScope`])
//! - Native microtasks, GC callbacks, catch scopes ([`TryCatch`]) and the per-thread current
//!   isolate registry ([`current`])
//! - Cross-thread termination and interrupts through [`IsolateHandle`]
//!
//! # Handles and reference counts
//!
//! A [`Handle`] is a packed `{ index, generation }` pointing into the isolate's handle table. The
//! entry behind it carries a reference count: handle scopes, context stacks and embedder-held
//! globals each own references, and the handle is recycled (its foreign reference released and
//! its entry returned to a pool) when the count drops to zero. Using a handle after that yields
//! [`BridgeError::InvalidHandle`].
//!
//! # The managed runtime
//!
//! The bridge never talks to a concrete runtime; it goes through [`foreign::ManagedVm`] and
//! [`foreign::ManagedEnv`]. [`in_process::InProcessVm`] implements both over a simulated heap.

mod current;
mod dispatch;
mod error;
pub mod foreign;
mod gateway;
mod gc;
mod handle;
pub mod in_process;
mod interrupt;
mod isolate;
mod microtasks;
mod options;
mod pool;
mod scope;
mod scratch;
mod try_catch;
mod value;
mod value_type;

pub use crate::current::current;
pub use crate::current::IsolateScope;
pub use crate::dispatch::DispatchMode;
pub use crate::error::fatal_error;
pub use crate::error::BridgeError;
pub use crate::gateway::AccessMethod;
pub use crate::gateway::Gateway;
pub use crate::gateway::SHARED_BUFFER_BINDING;
pub use crate::gc::GcCallback;
pub use crate::gc::GcCallbackFlags;
pub use crate::gc::GcType;
pub use crate::gc::GlobalGcCallback;
pub use crate::gc::IsolateGcCallback;
pub use crate::gc::IsolateGcCallbackWithData;
pub use crate::handle::Handle;
pub use crate::handle::HandleId;
pub use crate::handle::RefKind;
pub use crate::interrupt::InterruptCallback;
pub use crate::interrupt::IsolateHandle;
pub use crate::interrupt::Locker;
pub use crate::isolate::Isolate;
pub use crate::isolate::IsolateStats;
pub use crate::isolate::WeakCallback;
pub use crate::isolate::NUMBER_CACHE_HIGH;
pub use crate::isolate::NUMBER_CACHE_LOW;
pub use crate::microtasks::Microtask;
pub use crate::microtasks::MicrotaskQueue;
pub use crate::options::IsolateOptions;
pub use crate::options::INTERNAL_ERROR_CHECK_ENV;
pub use crate::options::STACK_SIZE_ENV;
pub use crate::options::STACK_SIZE_RESERVE;
pub use crate::pool::ObjectPool;
pub use crate::pool::DEFAULT_POOL_CAPACITY;
pub use crate::scope::ContextScope;
pub use crate::scope::HandleScope;
pub use crate::scratch::ScratchBuffer;
pub use crate::try_catch::MessageListener;
pub use crate::try_catch::PromiseRejectCallback;
pub use crate::try_catch::TryCatch;
pub use crate::value::PoolKind;
pub use crate::value::View;
pub use crate::value::ViewKind;
pub use crate::value::Wrapper;
pub use crate::value_type::BufferStorage;
pub use crate::value_type::ElementKind;
pub use crate::value_type::ValueType;
