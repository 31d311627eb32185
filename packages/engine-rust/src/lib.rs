//! Switchyard engine: runs interface service chains under per-resource
//! transaction control.
//!
//! - [`registry`]: initialize-once chain, interface and executor registries
//! - [`processor`]: the service chain state machine
//! - [`coordinator`]: sequential multi-resource commit and the cleanup listener
//! - [`dynamic_code`]: dynamic code loading and dispatch
//! - [`services`]: built-in chain steps and error handlers
//! - [`dispatch`]: runs transactions on the blocking worker pool
//! - [`config`]: command line, engine file and assembly

pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod dynamic_code;
pub mod logging;
pub mod memory;
pub mod processor;
pub mod registry;
pub mod services;

pub use config::{Engine, EngineConfig, EngineFile, LogFormat};
pub use dispatch::{DispatchError, Dispatcher, Outcome};
pub use dynamic_code::{CatalogLoader, DynamicCodeLoader, DynamicCodeRegistry};
pub use memory::MemoryExecutor;
pub use processor::ServiceProcessor;
pub use registry::{ChainRegistry, ChainStep, Chains, InterfaceRegistry, ResourceExecutorRegistry};
