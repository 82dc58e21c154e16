//! Task descriptors, invocation contexts and the registry

pub mod descriptor;
pub mod registry;
pub mod request;

pub use descriptor::{
    AfterReturnHook, BeforeStartHook, BoxedTaskFn, FailureHook, RegisteredTask, SuccessHook,
    TaskHooks, TaskOptions,
};
pub use registry::{RegistryError, TaskRegistry};
pub use request::{CallOverrides, DeliveryInfo, Kwargs, Request};
