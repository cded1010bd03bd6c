//! The foreign call gateway: a fixed table of named managed-side operations, resolved once per
//! isolate and invoked through exactly two calling shapes.

use crate::foreign::Arg;
use crate::foreign::ForeignRef;
use crate::foreign::ManagedEnv;
use crate::foreign::MethodId;
use crate::foreign::Ret;
use crate::BridgeError;

macro_rules! access_methods {
  ($($variant:ident => $name:literal, $signature:literal;)*) => {
    /// A symbolic identifier for one managed-side operation.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
    pub enum AccessMethod {
      $($variant,)*
    }

    impl AccessMethod {
      /// Every operation, in binding-table order.
      pub const ALL: &'static [AccessMethod] = &[$(AccessMethod::$variant,)*];
      pub const COUNT: usize = Self::ALL.len();

      /// The name the managed runtime exposes this operation under.
      pub fn name(self) -> &'static str {
        match self {
          $(AccessMethod::$variant => $name,)*
        }
      }

      pub fn signature(self) -> &'static str {
        match self {
          $(AccessMethod::$variant => $signature,)*
        }
      }
    }
  };
}

access_methods! {
  UndefinedInstance => "undefinedInstance", "()Ljava/lang/Object;";
  NullInstance => "nullInstance", "()Ljava/lang/Object;";
  TrueInstance => "trueInstance", "()Ljava/lang/Object;";
  FalseInstance => "falseInstance", "()Ljava/lang/Object;";
  ValueType => "valueType", "(Ljava/lang/Object;Z)I";
  ValueDouble => "valueDouble", "(Ljava/lang/Object;)D";
  ValueFlatten => "valueFlatten", "(Ljava/lang/Object;)Ljava/lang/Object;";
  ValueExternal => "valueExternal", "(Ljava/lang/Object;)J";
  ValueUnknown => "valueUnknown", "(Ljava/lang/Object;)Ljava/lang/String;";
  ValueStrictEquals => "valueStrictEquals", "(Ljava/lang/Object;Ljava/lang/Object;)Z";
  StringEquals => "stringEquals", "(Ljava/lang/Object;Ljava/lang/Object;)Z";
  ObjectNew => "objectNew", "(Ljava/lang/Object;)Ljava/lang/Object;";
  ArrayNew => "arrayNew", "(Ljava/lang/Object;I)Ljava/lang/Object;";
  ExternalNew => "externalNew", "(Ljava/lang/Object;J)Ljava/lang/Object;";
  NumberNew => "numberNew", "(D)Ljava/lang/Object;";
  DateNew => "dateNew", "(Ljava/lang/Object;D)Ljava/lang/Object;";
  DateValueOf => "dateValueOf", "(Ljava/lang/Object;)D";
  ArrayBufferViewByteLength => "arrayBufferViewByteLength", "(Ljava/lang/Object;)I";
  ArrayBufferViewByteOffset => "arrayBufferViewByteOffset", "(Ljava/lang/Object;)I";
  ContextNew => "contextNew", "()Ljava/lang/Object;";
  ContextGlobal => "contextGlobal", "(Ljava/lang/Object;)Ljava/lang/Object;";
  MakeWeak => "makeWeak", "(Ljava/lang/Object;J)V";
  ClearWeak => "clearWeak", "(Ljava/lang/Object;J)V";
  IsolateThrowException => "isolateThrowException", "(Ljava/lang/Object;)V";
  IsolateRunMicrotasks => "isolateRunMicrotasks", "()V";
  IsolateInternalErrorCheck => "isolateInternalErrorCheck", "(Ljava/lang/Object;)V";
  IsolateThrowStackOverflowError => "isolateThrowStackOverflowError", "()V";
  IsolateTerminateExecution => "isolateTerminateExecution", "()V";
  IsolateCancelTerminateExecution => "isolateCancelTerminateExecution", "()V";
  IsolateRequestInterrupt => "isolateRequestInterrupt", "()V";
  IsolateGetIntPlaceholder => "isolateGetIntPlaceholder", "()Ljava/lang/Object;";
  IsolateGetLargeIntPlaceholder => "isolateGetLargeIntPlaceholder", "()Ljava/lang/Object;";
  IsolateGetDoublePlaceholder => "isolateGetDoublePlaceholder", "()Ljava/lang/Object;";
  IsolateCreateInternalFieldKey => "isolateCreateInternalFieldKey", "(I)Ljava/lang/Object;";
  IsolatePerformGc => "isolatePerformGC", "()V";
  IsolateEnablePromiseRejectCallback => "isolateEnablePromiseRejectCallback", "(Z)V";
  IsolateDispose => "isolateDispose", "(ZI)V";
  TryCatchHasTerminated => "tryCatchHasTerminated", "(Ljava/lang/Object;)Z";
}

/// The name under which the shared scratch region is looked up.
pub const SHARED_BUFFER_BINDING: &str = "sharedBuffer";

/// The resolved binding table of one isolate.
///
/// Resolution is all-or-nothing: the first operation the managed runtime does not expose fails
/// the whole table.
#[derive(Debug, Clone)]
pub struct Gateway {
  access: ForeignRef,
  methods: Box<[MethodId]>,
}

impl Gateway {
  pub fn resolve(env: &dyn ManagedEnv, access: ForeignRef) -> Result<Self, BridgeError> {
    let mut methods = Vec::with_capacity(AccessMethod::COUNT);
    for &method in AccessMethod::ALL {
      let Some(id) = env.resolve_method(method.name(), method.signature()) else {
        return Err(BridgeError::MissingBinding {
          name: method.name(),
        });
      };
      methods.push(id);
    }
    Ok(Self {
      access,
      methods: methods.into_boxed_slice(),
    })
  }

  /// The managed access object every operation is invoked on.
  #[inline]
  pub fn access(&self) -> ForeignRef {
    self.access
  }

  #[inline]
  pub fn method(&self, method: AccessMethod) -> MethodId {
    self.methods[method as usize]
  }

  /// The "returns a value" calling shape.
  pub fn call(
    &self,
    env: &dyn ManagedEnv,
    method: AccessMethod,
    args: &[Arg],
    internal_error_check: bool,
  ) -> Ret {
    tracing::trace!(method = method.name(), "gateway call");
    let ret = env.call(self.access, self.method(method), args);
    if internal_error_check {
      self.internal_error_check(env);
    }
    ret
  }

  /// The "returns nothing" calling shape.
  pub fn call_void(
    &self,
    env: &dyn ManagedEnv,
    method: AccessMethod,
    args: &[Arg],
    internal_error_check: bool,
  ) {
    tracing::trace!(method = method.name(), "gateway call");
    env.call_void(self.access, self.method(method), args);
    if internal_error_check {
      self.internal_error_check(env);
    }
  }

  /// Forwards a pending exception (if any) to the managed side for inspection.
  ///
  /// This bypasses [`Gateway::call_void`] so the check never recurses into itself.
  pub fn internal_error_check(&self, env: &dyn ManagedEnv) {
    if env.exception_check() {
      let exception = env.exception_occurred();
      env.call_void(
        self.access,
        self.method(AccessMethod::IsolateInternalErrorCheck),
        &[Arg::Ref(exception)],
      );
      if let Some(exception) = exception {
        env.delete_local_ref(exception);
      }
    }
  }
}

impl Ret {
  pub fn into_ref(self, method: AccessMethod) -> Result<Option<ForeignRef>, BridgeError> {
    match self {
      Ret::Ref(r) => Ok(r),
      _ => Err(BridgeError::UnexpectedReturn(method.name())),
    }
  }

  pub fn into_int(self, method: AccessMethod) -> Result<i32, BridgeError> {
    match self {
      Ret::Int(v) => Ok(v),
      _ => Err(BridgeError::UnexpectedReturn(method.name())),
    }
  }

  pub fn into_long(self, method: AccessMethod) -> Result<i64, BridgeError> {
    match self {
      Ret::Long(v) => Ok(v),
      _ => Err(BridgeError::UnexpectedReturn(method.name())),
    }
  }

  pub fn into_double(self, method: AccessMethod) -> Result<f64, BridgeError> {
    match self {
      Ret::Double(v) => Ok(v),
      _ => Err(BridgeError::UnexpectedReturn(method.name())),
    }
  }

  pub fn into_bool(self, method: AccessMethod) -> Result<bool, BridgeError> {
    match self {
      Ret::Bool(v) => Ok(v),
      _ => Err(BridgeError::UnexpectedReturn(method.name())),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ahash::HashSet;
  use ahash::HashSetExt;

  #[test]
  fn binding_table_is_dense_and_names_are_unique() {
    assert_eq!(AccessMethod::COUNT, AccessMethod::ALL.len());
    for (i, method) in AccessMethod::ALL.iter().enumerate() {
      assert_eq!(*method as usize, i);
    }
    let mut names = HashSet::new();
    for method in AccessMethod::ALL {
      assert!(names.insert(method.name()), "duplicate {}", method.name());
    }
  }

  #[test]
  fn void_operations_have_void_signatures() {
    assert!(AccessMethod::IsolateRunMicrotasks.signature().ends_with('V'));
    assert!(AccessMethod::IsolateDispose.signature().ends_with('V'));
    assert!(AccessMethod::ValueType.signature().ends_with('I'));
  }
}
