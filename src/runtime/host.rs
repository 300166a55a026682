use std::fmt::Debug;
use std::rc::Rc;

use crate::error::RuntimeError;
use crate::runtime::value::Value;

/// An opaque embedding object reachable from expression code.
///
/// Field reads, method calls, and component lookups all dispatch by name
/// through this trait, so the embedding decides exactly which types and
/// members the runtime may touch.
pub trait HostObject: Debug {
    fn host_type_name(&self) -> &str;

    fn field(&self, name: &str) -> Result<Value, RuntimeError> {
        Err(RuntimeError::UnknownFunction(format!(
            "{}.{}",
            self.host_type_name(),
            name
        )))
    }

    fn invoke(&self, name: &str, _args: &[Value]) -> Result<Value, RuntimeError> {
        Err(RuntimeError::UnknownFunction(format!(
            "{}.{}(..)",
            self.host_type_name(),
            name
        )))
    }

    /// Scene-graph component lookup; embedding-specific.
    fn component(&self, name: &str) -> Result<Value, RuntimeError> {
        Err(RuntimeError::UnknownFunction(format!(
            "{}::{}",
            self.host_type_name(),
            name
        )))
    }
}

/// A registered host function callable from expression position.
pub type HostFn = Rc<dyn Fn(&[Value]) -> Result<Value, RuntimeError>>;

/// A registered host constructor, invoked by `new type(...)` for types
/// that are not declared structs.
pub type HostCtor = Rc<dyn Fn(&[Value]) -> Result<Value, RuntimeError>>;
