//! Dynamically typed values exchanged through `resume`, task results and
//! task-local storage.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// A cheaply clonable, dynamically typed value.
///
/// Resumes carry arbitrary data (the same context may be resumed by a timer,
/// by a test simulating I/O, or by another library), so they are type-erased
/// and recovered with [`Value::downcast_ref`] or [`Value::get`].
#[derive(Clone)]
pub struct Value(Rc<dyn Any>);

impl Value {
    /// Wraps `value`. Wrapping a `Value` returns it unchanged.
    pub fn new<T: Any>(value: T) -> Self {
        let boxed: Box<dyn Any> = Box::new(value);
        match boxed.downcast::<Value>() {
            Ok(value) => *value,
            Err(other) => Self(Rc::from(other)),
        }
    }

    /// The unit value, delivered when a task is woken without data.
    pub fn unit() -> Self {
        Self::new(())
    }

    pub fn is<T: Any>(&self) -> bool {
        self.0.is::<T>()
    }

    pub fn is_unit(&self) -> bool {
        self.is::<()>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Returns a clone of the contained value if it has type `T`.
    pub fn get<T: Any + Clone>(&self) -> Option<T> {
        self.downcast_ref::<T>().cloned()
    }

    /// Returns true if both values share the same allocation.
    pub fn ptr_eq(&self, other: &Value) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::unit()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = self.downcast_ref::<&'static str>() {
            f.debug_tuple("Value").field(s).finish()
        } else if let Some(s) = self.downcast_ref::<String>() {
            f.debug_tuple("Value").field(s).finish()
        } else if let Some(n) = self.downcast_ref::<i32>() {
            f.debug_tuple("Value").field(n).finish()
        } else if let Some(n) = self.downcast_ref::<i64>() {
            f.debug_tuple("Value").field(n).finish()
        } else if let Some(n) = self.downcast_ref::<u64>() {
            f.debug_tuple("Value").field(n).finish()
        } else if let Some(n) = self.downcast_ref::<usize>() {
            f.debug_tuple("Value").field(n).finish()
        } else if let Some(b) = self.downcast_ref::<bool>() {
            f.debug_tuple("Value").field(b).finish()
        } else if self.is_unit() {
            f.write_str("Value(())")
        } else {
            f.write_str("Value(..)")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_downcast() {
        let value = Value::new(42_i32);
        assert!(value.is::<i32>());
        assert_eq!(value.get::<i32>(), Some(42));
        assert_eq!(value.get::<i64>(), None);
    }

    #[test]
    fn test_wrapping_a_value_is_identity() {
        let inner = Value::new("marker");
        let outer = Value::new(inner.clone());
        assert!(outer.ptr_eq(&inner));
        assert_eq!(outer.get::<&str>(), Some("marker"));
    }

    #[test]
    fn test_debug_formatting() {
        assert_eq!(format!("{:?}", Value::new("hi")), "Value(\"hi\")");
        assert_eq!(format!("{:?}", Value::unit()), "Value(())");
        assert_eq!(format!("{:?}", Value::new(vec![1u8])), "Value(..)");
    }
}
