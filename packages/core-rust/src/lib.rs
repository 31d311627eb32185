//! Switchyard core: service context, transaction contexts, step contracts and
//! the `@{...}` expression resolver.

pub mod context;
pub mod error;
pub mod expression;
pub mod ident;
pub mod interface;
pub mod once;
pub mod process_code;
pub mod traits;
pub mod transaction;

pub use context::{ErrorTraceEntry, ServiceContext, RESPONSE_BODY_KEY};
pub use error::{
    ConfigError, DynamicCodeError, EnforcedFailure, ExpressionError, FailureKind, PanicFailure,
    TransactionError,
};
pub use expression::{to_seamless, ExpressionResolver, Macro, MacroResolver};
pub use interface::{InterfaceDefinition, MappingRule, QueryMap};
pub use once::InitOnce;
pub use process_code::ProcessCode;
pub use traits::{AfterProcessListener, DynamicCode, ErrorHandler, Service};
pub use transaction::{ResourceExecutor, TransactionContext, TransactionHandle};
