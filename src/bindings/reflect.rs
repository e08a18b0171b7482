//! 反射式方法绑定
//!
//! Host types describe their script-callable methods once, through
//! [`Reflect::methods`]. Binding resolves a single method by name and keeps
//! its decoder, so the per-call path only decodes arguments and invokes.
//!
//! ```no_run
//! use webview_bridge::bindings::{MethodTable, Reflect};
//!
//! struct Calculator;
//!
//! impl Reflect for Calculator {
//!     fn methods(table: &mut MethodTable<Self>) {
//!         table.method("add", |_, (a, b): (i64, i64)| Ok::<_, anyhow::Error>(a + b));
//!     }
//! }
//! ```

use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::protocol::{encode_result, parse_request, CallFault, WireResult};
use crate::core::error::{WebviewError, WebviewResult};

/// Declared parameter of a host method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamDescriptor {
    pub index: usize,
    pub type_name: &'static str,
}

impl fmt::Display for ParamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}: {}", self.index, self.type_name)
    }
}

// ============================================================================
// Argument decoding
// ============================================================================

/// A parameter list that can be decoded from a wire argument array.
///
/// Implemented for tuples of up to eight elements.
pub trait MethodArgs: Sized + 'static {
    fn params() -> Vec<ParamDescriptor>;

    /// Decodes exactly `params().len()` arguments. JSON `null` becomes the
    /// parameter's default value.
    fn decode(args: Vec<Value>) -> WebviewResult<Self>;
}

fn decode_arg<T>(index: usize, value: Value) -> WebviewResult<T>
where
    T: DeserializeOwned + Default,
{
    if value.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(value).map_err(|source| WebviewError::ArgumentDecode {
        index,
        expected: type_name::<T>(),
        source,
    })
}

macro_rules! impl_method_args {
    ($len:expr; $($ty:ident : $idx:tt),*) => {
        impl<$($ty),*> MethodArgs for ($($ty,)*)
        where
            $($ty: DeserializeOwned + Default + Send + 'static),*
        {
            fn params() -> Vec<ParamDescriptor> {
                vec![$(ParamDescriptor { index: $idx, type_name: type_name::<$ty>() }),*]
            }

            #[allow(unused_variables, unused_mut)]
            fn decode(args: Vec<Value>) -> WebviewResult<Self> {
                if args.len() != $len {
                    return Err(WebviewError::ArgumentCount {
                        expected: $len,
                        actual: args.len(),
                    });
                }
                let mut args = args.into_iter();
                Ok(($(decode_arg::<$ty>($idx, args.next().unwrap_or(Value::Null))?,)*))
            }
        }
    };
}

impl_method_args!(0;);
impl_method_args!(1; A: 0);
impl_method_args!(2; A: 0, B: 1);
impl_method_args!(3; A: 0, B: 1, C: 2);
impl_method_args!(4; A: 0, B: 1, C: 2, D: 3);
impl_method_args!(5; A: 0, B: 1, C: 2, D: 3, E: 4);
impl_method_args!(6; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
impl_method_args!(7; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
impl_method_args!(8; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);

// ============================================================================
// Method table
// ============================================================================

type Invoker<T> = Arc<dyn Fn(&T, Vec<Value>) -> WireResult + Send + Sync>;

/// A script-callable method of `T`.
pub struct HostMethod<T> {
    name: String,
    params: Vec<ParamDescriptor>,
    invoker: Invoker<T>,
}

impl<T> HostMethod<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[ParamDescriptor] {
        &self.params
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Decodes `request` and invokes the method on `target`.
    pub fn invoke(&self, target: &T, request: &str) -> WireResult {
        let args = parse_request(request)?;
        (self.invoker)(target, args)
    }
}

impl<T> Clone for HostMethod<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            params: self.params.clone(),
            invoker: Arc::clone(&self.invoker),
        }
    }
}

impl<T> fmt::Debug for HostMethod<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostMethod")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Methods `T` exposes to script. Registering a name twice declares an
/// overload, which makes that name unbindable.
pub struct MethodTable<T> {
    methods: Vec<HostMethod<T>>,
}

impl<T: 'static> MethodTable<T> {
    pub fn new() -> Self {
        Self {
            methods: Vec::new(),
        }
    }

    /// Builds the table `T` declares.
    pub fn of() -> Self
    where
        T: Reflect,
    {
        let mut table = Self::new();
        T::methods(&mut table);
        table
    }

    pub fn method<A, R, E, F>(&mut self, name: &str, method: F) -> &mut Self
    where
        A: MethodArgs,
        R: Serialize + 'static,
        E: Into<anyhow::Error> + 'static,
        F: Fn(&T, A) -> Result<R, E> + Send + Sync + 'static,
    {
        let invoker = move |target: &T, args: Vec<Value>| -> WireResult {
            let args = A::decode(args)?;
            let result = method(target, args).map_err(CallFault::host)?;
            encode_result(&result)
        };
        self.methods.push(HostMethod {
            name: name.to_string(),
            params: A::params(),
            invoker: Arc::new(invoker),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.methods.iter().map(HostMethod::name).collect()
    }

    /// Resolves exactly one method named `name`.
    pub fn resolve(self, name: &str) -> WebviewResult<HostMethod<T>> {
        let mut candidates: Vec<HostMethod<T>> = self
            .methods
            .into_iter()
            .filter(|method| method.name == name)
            .collect();

        match candidates.len() {
            1 => Ok(candidates.remove(0)),
            0 => Err(WebviewError::InvalidBinding(format!(
                "{} has no method named {}",
                type_name::<T>(),
                name
            ))),
            n => Err(WebviewError::InvalidBinding(format!(
                "{}::{} is overloaded ({} candidates); bind a uniquely named method instead",
                type_name::<T>(),
                name,
                n
            ))),
        }
    }
}

impl<T: 'static> Default for MethodTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A host type with script-callable methods.
pub trait Reflect: Sized + Send + Sync + 'static {
    fn methods(table: &mut MethodTable<Self>);
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn wrong_length_is_always_argument_count(len in 0usize..12) {
            prop_assume!(len != 3);
            let args = vec![Value::from(1); len];
            let result = <(i32, i32, i32)>::decode(args);
            let is_count_error = matches!(
                result,
                Err(WebviewError::ArgumentCount { expected: 3, actual }) if actual == len
            );
            prop_assert!(is_count_error);
        }
    }
}
