//! Handler methods and the callables bound from them.
//!
//! A [`HandlerMethod`] describes a subscriber method: its name, whether it is
//! bound on an instance, its declared parameter list and an erased invoker.
//! At subscription time the parameter list is inspected once to pick a
//! [`HandlerShape`]; every later invocation goes through that shape.

use std::any::{Any, type_name};
use std::borrow::Cow;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use anyhow::anyhow;

use crate::error::{BrokerError, BrokerResult};
use crate::object::{ObjectRef, Sender, WeakObject};
use crate::payload::{DataEvent, Payload, PayloadType};
use crate::strategy::Invocation;

/// Result returned by subscriber handlers.
pub type HandlerResult = anyhow::Result<()>;

type Invoker = Arc<dyn Fn(&ObjectRef, HandlerArgs<'_>) -> HandlerResult + Send + Sync>;

/// What a handler method is bound on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receiver {
    /// An instance method, invoked on the subscriber.
    Instance,
    /// A type-level function with no subscriber instance.
    Static,
}

/// One declared handler parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    /// The object that raised the event.
    Sender,
    /// The whole payload, of the given type.
    Payload(PayloadType),
    /// The value inside a [`DataEvent`] payload of the given type.
    Value(PayloadType),
}

/// Arguments handed to an erased invoker, according to the handler's shape.
#[derive(Debug, Clone, Copy)]
pub enum HandlerArgs<'a> {
    /// No arguments.
    None,
    /// The payload only.
    Payload(&'a Payload),
    /// The sender and the payload.
    SenderAndPayload(&'a Sender, &'a Payload),
    /// The payload, to be unwrapped into its carried value.
    Value(&'a Payload),
}

impl<'a> HandlerArgs<'a> {
    /// The payload, if the shape passes one.
    #[must_use]
    pub fn payload(&self) -> Option<&'a Payload> {
        match *self {
            Self::None => None,
            Self::Payload(payload)
            | Self::SenderAndPayload(_, payload)
            | Self::Value(payload) => Some(payload),
        }
    }

    /// The sender, if the shape passes one.
    #[must_use]
    pub fn sender(&self) -> Option<&'a Sender> {
        match *self {
            Self::SenderAndPayload(sender, _) => Some(sender),
            _ => None,
        }
    }
}

/// A subscriber method that can be bound into a subscription.
#[derive(Clone)]
pub struct HandlerMethod {
    name: Cow<'static, str>,
    receiver: Receiver,
    params: Vec<Param>,
    invoker: Invoker,
}

impl HandlerMethod {
    /// A handler taking no arguments. Subscribes to every payload type.
    #[must_use]
    pub fn no_args<S, F>(name: impl Into<Cow<'static, str>>, handler: F) -> Self
    where
        S: Any + Send + Sync,
        F: Fn(&S) -> HandlerResult + Send + Sync + 'static,
    {
        Self::from_parts(name, Receiver::Instance, Vec::new(), move |target, _args| {
            handler(downcast_target::<S>(target)?)
        })
    }

    /// A handler taking the payload.
    #[must_use]
    pub fn payload<S, T, F>(name: impl Into<Cow<'static, str>>, handler: F) -> Self
    where
        S: Any + Send + Sync,
        T: Any + Send + Sync,
        F: Fn(&S, &T) -> HandlerResult + Send + Sync + 'static,
    {
        let params = vec![Param::Payload(PayloadType::of::<T>())];
        Self::from_parts(name, Receiver::Instance, params, move |target, args| {
            let payload = downcast_payload::<T>(args.payload())?;
            handler(downcast_target::<S>(target)?, payload)
        })
    }

    /// A handler taking the sender and the payload.
    #[must_use]
    pub fn sender_and_payload<S, T, F>(name: impl Into<Cow<'static, str>>, handler: F) -> Self
    where
        S: Any + Send + Sync,
        T: Any + Send + Sync,
        F: Fn(&S, &Sender, &T) -> HandlerResult + Send + Sync + 'static,
    {
        let params = vec![Param::Sender, Param::Payload(PayloadType::of::<T>())];
        Self::from_parts(name, Receiver::Instance, params, move |target, args| {
            let sender = args
                .sender()
                .ok_or_else(|| anyhow!("handler invoked without a sender"))?;
            let payload = downcast_payload::<T>(args.payload())?;
            handler(downcast_target::<S>(target)?, sender, payload)
        })
    }

    /// A handler taking the value carried by a [`DataEvent<V>`] payload.
    #[must_use]
    pub fn value<S, V, F>(name: impl Into<Cow<'static, str>>, handler: F) -> Self
    where
        S: Any + Send + Sync,
        V: Any + Send + Sync,
        F: Fn(&S, &V) -> HandlerResult + Send + Sync + 'static,
    {
        let params = vec![Param::Value(PayloadType::of::<DataEvent<V>>())];
        Self::from_parts(name, Receiver::Instance, params, move |target, args| {
            let event = downcast_payload::<DataEvent<V>>(args.payload())?;
            handler(downcast_target::<S>(target)?, &event.value)
        })
    }

    /// Build a handler from its raw parts.
    ///
    /// This is the form an [`Inspector`](crate::Inspector) emits. The
    /// parameter list is validated when the method is bound, not here.
    #[must_use]
    pub fn from_parts<F>(
        name: impl Into<Cow<'static, str>>,
        receiver: Receiver,
        params: Vec<Param>,
        invoker: F,
    ) -> Self
    where
        F: Fn(&ObjectRef, HandlerArgs<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            receiver,
            params,
            invoker: Arc::new(invoker),
        }
    }

    /// Method name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// What the method is bound on.
    #[must_use]
    pub fn receiver(&self) -> Receiver {
        self.receiver
    }

    /// Declared parameter list.
    #[must_use]
    pub fn params(&self) -> &[Param] {
        &self.params
    }
}

impl fmt::Debug for HandlerMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerMethod")
            .field("name", &self.name)
            .field("receiver", &self.receiver)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

fn downcast_target<S: Any>(target: &ObjectRef) -> anyhow::Result<&S> {
    (**target)
        .downcast_ref::<S>()
        .ok_or_else(|| anyhow!("subscriber is not a {}", type_name::<S>()))
}

fn downcast_payload<T: Any>(payload: Option<&Payload>) -> anyhow::Result<&T> {
    let payload = payload.ok_or_else(|| anyhow!("handler invoked without a payload"))?;
    payload.downcast_ref::<T>().ok_or_else(|| {
        anyhow!(
            "payload is a {}, handler expects {}",
            payload.payload_type(),
            type_name::<T>()
        )
    })
}

/// Canonical calling convention of a bound handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerShape {
    /// `handler()`
    NoArgs,
    /// `handler(payload)`
    PayloadOnly,
    /// `handler(sender, payload)`
    SenderAndPayload,
    /// `handler(payload.value)`
    UnwrappedValue,
}

impl HandlerShape {
    /// Pick the shape for a method and the payload type it declares.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::StaticHandler`] for type-level methods and
    /// [`BrokerError::InvalidHandlerSignature`] for unsupported parameter lists.
    pub fn derive(method: &HandlerMethod) -> BrokerResult<(Self, PayloadType)> {
        if method.receiver == Receiver::Static {
            return Err(BrokerError::StaticHandler {
                handler: method.name().to_string(),
            });
        }

        match method.params.as_slice() {
            [] => Ok((Self::NoArgs, PayloadType::any())),
            [Param::Payload(ty)] => Ok((Self::PayloadOnly, *ty)),
            [Param::Sender, Param::Payload(ty)] => Ok((Self::SenderAndPayload, *ty)),
            [Param::Value(ty)] => Ok((Self::UnwrappedValue, *ty)),
            other => Err(BrokerError::InvalidHandlerSignature {
                handler: method.name().to_string(),
                reason: format!("unsupported parameter list {other:?}"),
            }),
        }
    }
}

/// A handler method bound to a weakly held subscriber.
#[derive(Clone)]
pub struct BoundCallable {
    subscriber: WeakObject,
    method: HandlerMethod,
    shape: HandlerShape,
}

impl BoundCallable {
    /// Bind `method` to `subscriber`, returning the callable and its declared payload type.
    ///
    /// # Errors
    ///
    /// Fails when the method's shape cannot be derived; see [`HandlerShape::derive`].
    pub fn bind(
        subscriber: WeakObject,
        method: HandlerMethod,
    ) -> BrokerResult<(Self, PayloadType)> {
        let (shape, payload_type) = HandlerShape::derive(&method)?;
        Ok((
            Self {
                subscriber,
                method,
                shape,
            },
            payload_type,
        ))
    }

    /// Resolve against a live subscriber. `None` once the subscriber is gone.
    #[must_use]
    pub fn resolve(&self) -> Option<ResolvedCallable> {
        let target = self.subscriber.upgrade()?;
        Some(ResolvedCallable {
            target,
            invoker: Arc::clone(&self.method.invoker),
            shape: self.shape,
            handler: self.method.name.clone(),
        })
    }

    /// Shape chosen at bind time.
    #[must_use]
    pub fn shape(&self) -> HandlerShape {
        self.shape
    }

    /// The bound method.
    #[must_use]
    pub fn method(&self) -> &HandlerMethod {
        &self.method
    }
}

impl fmt::Debug for BoundCallable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundCallable")
            .field("subscriber", &self.subscriber)
            .field("handler", &self.method.name)
            .field("shape", &self.shape)
            .finish()
    }
}

/// A bound callable holding its subscriber alive for one invocation.
///
/// Calling consumes it, so a strategy can invoke it at most once.
pub struct ResolvedCallable {
    target: ObjectRef,
    invoker: Invoker,
    shape: HandlerShape,
    handler: Cow<'static, str>,
}

impl ResolvedCallable {
    /// Handler method name.
    #[must_use]
    pub fn handler(&self) -> &str {
        &self.handler
    }

    /// Invoke the handler. Panics unwind into the caller.
    ///
    /// # Errors
    ///
    /// Returns whatever the handler returns.
    pub fn call(self, invocation: &Invocation) -> HandlerResult {
        let args = match self.shape {
            HandlerShape::NoArgs => HandlerArgs::None,
            HandlerShape::PayloadOnly => HandlerArgs::Payload(invocation.payload()),
            HandlerShape::SenderAndPayload => {
                HandlerArgs::SenderAndPayload(invocation.sender(), invocation.payload())
            },
            HandlerShape::UnwrappedValue => HandlerArgs::Value(invocation.payload()),
        };
        (self.invoker)(&self.target, args)
    }

    /// Invoke the handler, converting a panic into an error.
    ///
    /// # Errors
    ///
    /// Returns the handler's error, or a "handler panicked" error.
    pub fn call_guarded(self, invocation: &Invocation) -> HandlerResult {
        let handler = self.handler.clone();
        match catch_unwind(AssertUnwindSafe(|| self.call(invocation))) {
            Ok(result) => result,
            Err(panic) => Err(anyhow!(
                "handler '{handler}' panicked: {}",
                panic_message(panic.as_ref())
            )),
        }
    }
}

impl fmt::Debug for ResolvedCallable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedCallable")
            .field("handler", &self.handler)
            .field("shape", &self.shape)
            .finish_non_exhaustive()
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn push(&self, entry: impl Into<String>) {
            self.seen.lock().unwrap().push(entry.into());
        }
    }

    fn invocation<T: Any + Send + Sync>(value: T) -> Invocation {
        Invocation::new("test.topic", Sender::none(), Payload::new(value))
    }

    fn bind(recorder: &Arc<Recorder>, method: HandlerMethod) -> BoundCallable {
        BoundCallable::bind(WeakObject::new(recorder), method).unwrap().0
    }

    #[test]
    fn test_shapes_from_typed_constructors() {
        let cases = [
            (
                HandlerMethod::no_args("a", |_: &Recorder| Ok(())),
                HandlerShape::NoArgs,
                PayloadType::any(),
            ),
            (
                HandlerMethod::payload("b", |_: &Recorder, _: &u32| Ok(())),
                HandlerShape::PayloadOnly,
                PayloadType::of::<u32>(),
            ),
            (
                HandlerMethod::sender_and_payload("c", |_: &Recorder, _: &Sender, _: &u32| Ok(())),
                HandlerShape::SenderAndPayload,
                PayloadType::of::<u32>(),
            ),
            (
                HandlerMethod::value("d", |_: &Recorder, _: &String| Ok(())),
                HandlerShape::UnwrappedValue,
                PayloadType::of::<DataEvent<String>>(),
            ),
        ];

        for (method, shape, payload_type) in cases {
            assert_eq!(HandlerShape::derive(&method).unwrap(), (shape, payload_type));
        }
    }

    #[test]
    fn test_unsupported_signature_rejected() {
        let method = HandlerMethod::from_parts(
            "on_two_payloads",
            Receiver::Instance,
            vec![
                Param::Payload(PayloadType::of::<u32>()),
                Param::Payload(PayloadType::of::<u32>()),
            ],
            |_, _| Ok(()),
        );

        let err = HandlerShape::derive(&method).unwrap_err();
        assert!(matches!(err, BrokerError::InvalidHandlerSignature { ref handler, .. } if handler == "on_two_payloads"));
    }

    #[test]
    fn test_static_handler_rejected() {
        let method = HandlerMethod::from_parts("on_static", Receiver::Static, Vec::new(), |_, _| {
            Ok(())
        });

        let err = HandlerShape::derive(&method).unwrap_err();
        assert!(matches!(err, BrokerError::StaticHandler { .. }));
    }

    #[test]
    fn test_bound_callable_passes_arguments_by_shape() {
        let recorder = Arc::new(Recorder::default());

        bind(
            &recorder,
            HandlerMethod::no_args("none", |r: &Recorder| {
                r.push("none");
                Ok(())
            }),
        )
        .resolve()
        .unwrap()
        .call(&invocation(1_u32))
        .unwrap();

        bind(
            &recorder,
            HandlerMethod::payload("payload", |r: &Recorder, x: &u32| {
                r.push(format!("payload {x}"));
                Ok(())
            }),
        )
        .resolve()
        .unwrap()
        .call(&invocation(7_u32))
        .unwrap();

        bind(
            &recorder,
            HandlerMethod::value("value", |r: &Recorder, v: &String| {
                r.push(format!("value {v}"));
                Ok(())
            }),
        )
        .resolve()
        .unwrap()
        .call(&invocation(DataEvent::new("x".to_string())))
        .unwrap();

        assert_eq!(
            *recorder.seen.lock().unwrap(),
            vec!["none", "payload 7", "value x"]
        );
    }

    #[test]
    fn test_resolve_fails_after_subscriber_dropped() {
        let recorder = Arc::new(Recorder::default());
        let callable = bind(&recorder, HandlerMethod::no_args("none", |_: &Recorder| Ok(())));

        drop(recorder);
        assert!(callable.resolve().is_none());
    }

    #[test]
    fn test_call_guarded_converts_panics() {
        let recorder = Arc::new(Recorder::default());
        let callable = bind(
            &recorder,
            HandlerMethod::no_args("explode", |_: &Recorder| panic!("kaboom")),
        );

        let err = callable
            .resolve()
            .unwrap()
            .call_guarded(&invocation(()))
            .unwrap_err();
        assert!(err.to_string().contains("kaboom"));
        assert!(err.to_string().contains("explode"));
    }
}
