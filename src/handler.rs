//! Route handlers.
//!
//! A handler is any `Fn(Event) -> impl Future<Output = impl IntoResponse>`.
//! Routes of one app hold handlers of unrelated types, so each is erased
//! into a shared trait object when it is registered:
//!
//! ```text
//! app.get("/", hello)
//!   -> hello.into_boxed_handler()      Arc<FnHandler<hello>> as BoxedHandler
//!   -> handler.call(event)             one vtable call per request
//!   -> hello(event).await.into_response()  -> Outcome
//! ```
//!
//! The future is boxed once per call; the handler itself is shared by every
//! request that reaches its route.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::event::Event;
use crate::response::{IntoResponse, Outcome};

/// A heap-allocated, type-erased future.
///
/// `Send + 'static` lets tokio move the future across worker threads.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Object-safe calling convention behind [`BoxedHandler`]. Public only
/// because `Handler::into_boxed_handler` names it.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, event: Event) -> BoxFuture<Outcome>;
}

/// A type-erased handler shared by every request that hits its route.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

/// Implemented for every valid route handler.
///
/// You never implement this yourself. It is satisfied by any function or
/// closure with the shape:
///
/// ```text
/// async fn name(event: Event) -> impl IntoResponse
/// ```
///
/// The trait is sealed: only the blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

/// Bridges a concrete handler `F` into the trait-object world.
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, event: Event) -> BoxFuture<Outcome> {
        let fut = (self.0)(event);
        Box::pin(async move { fut.await.into_response() })
    }
}
