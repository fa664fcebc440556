//! Handler traits.
//!
//! Command handlers are async closures taking a [`CommandContext`]. They may
//! return `()` or `Result<(), E>` for any printable `E`:
//!
//! ```rust,ignore
//! router.register(Command::text("ping", |ctx: CommandContext| async move {
//!     ctx.reply("pong")?;
//!     Ok::<_, SendError>(())
//! }));
//!
//! router.register(Command::text("lurk", |_ctx: CommandContext| async {}));
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::CommandContext;
use crate::error::{HandlerError, HandlerResult};

/// A boxed, pinned future that is `Send`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ============================================================================
// Return values
// ============================================================================

/// Conversion from a handler's return value into a [`HandlerResult`].
pub trait IntoHandlerResult {
    fn into_handler_result(self) -> HandlerResult;
}

impl IntoHandlerResult for () {
    fn into_handler_result(self) -> HandlerResult {
        Ok(())
    }
}

impl<E: std::fmt::Display> IntoHandlerResult for Result<(), E> {
    fn into_handler_result(self) -> HandlerResult {
        self.map_err(HandlerError::failed)
    }
}

// ============================================================================
// Handler
// ============================================================================

/// A command handler.
///
/// Implemented for every `Fn(CommandContext) -> impl Future` whose output
/// implements [`IntoHandlerResult`].
pub trait Handler: Send + Sync + 'static {
    fn call(&self, ctx: CommandContext) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> Handler for F
where
    F: Fn(CommandContext) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoHandlerResult,
{
    fn call(&self, ctx: CommandContext) -> BoxFuture<'static, HandlerResult> {
        let fut = (self)(ctx);
        Box::pin(async move { fut.await.into_handler_result() })
    }
}

/// A type-erased handler.
pub type BoxedHandler = Arc<dyn Handler>;

/// Boxes a handler.
pub fn into_handler<H: Handler>(handler: H) -> BoxedHandler {
    Arc::new(handler)
}
