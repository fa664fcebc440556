//! Bot lifecycle and event hooks.
//!
//! Hooks are async callbacks taking a [`HookContext`], registered on the
//! bot per [`HookKind`]:
//!
//! | Kind          | Fires                                         | Message |
//! |---------------|-----------------------------------------------|---------|
//! | `Start`       | once, after login and before the first event  | no      |
//! | `AnyMessage`  | for every inbound or injected message         | yes     |
//! | `ChatMessage` | for channel chat only, after `AnyMessage`     | yes     |
//! | `Disconnect`  | once, after the connection has been released  | no      |
//!
//! Hooks of one kind run in registration order. Errors and panics are logged
//! and do not stop the remaining hooks or command dispatch.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::RwLock;
use tracing::error;
use twirc_core::{EncodeError, Message, SendError, SendResult, SharedOutbox};
use twirc_framework::{BoxFuture, HandlerError, HandlerResult, IntoHandlerResult};

/// When a hook fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    Start,
    AnyMessage,
    ChatMessage,
    Disconnect,
}

impl HookKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::AnyMessage => "any_message",
            Self::ChatMessage => "chat_message",
            Self::Disconnect => "disconnect",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context handed to a hook.
#[derive(Clone)]
pub struct HookContext {
    message: Option<Arc<Message>>,
    outbox: SharedOutbox,
}

impl HookContext {
    pub fn new(message: Option<Arc<Message>>, outbox: SharedOutbox) -> Self {
        Self { message, outbox }
    }

    /// The message being dispatched. `None` for start and disconnect hooks.
    pub fn message(&self) -> Option<&Message> {
        self.message.as_deref()
    }

    pub fn outbox(&self) -> &SharedOutbox {
        &self.outbox
    }

    pub fn send(&self, message: Message) -> SendResult<()> {
        self.outbox.send(message)
    }

    /// Replies on the medium the message arrived on.
    pub fn reply(&self, text: impl Into<String>) -> SendResult<()> {
        let message = self.message.as_deref();
        let reply = message
            .and_then(|m| m.reply(text))
            .ok_or(SendError::Encode(EncodeError::NotSendable {
                kind: message.map_or("none", |m| m.kind().name()),
            }))?;
        self.outbox.send(reply)
    }
}

impl fmt::Debug for HookContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookContext")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// An event hook.
///
/// Implemented for every `Fn(HookContext) -> impl Future` whose output
/// implements [`IntoHandlerResult`].
pub trait Hook: Send + Sync + 'static {
    fn call(&self, ctx: HookContext) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> Hook for F
where
    F: Fn(HookContext) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoHandlerResult,
{
    fn call(&self, ctx: HookContext) -> BoxFuture<'static, HandlerResult> {
        let fut = (self)(ctx);
        Box::pin(async move { fut.await.into_handler_result() })
    }
}

/// Registered hooks, grouped by kind.
#[derive(Default)]
pub struct Hooks {
    start: RwLock<Vec<Arc<dyn Hook>>>,
    any_message: RwLock<Vec<Arc<dyn Hook>>>,
    chat_message: RwLock<Vec<Arc<dyn Hook>>>,
    disconnect: RwLock<Vec<Arc<dyn Hook>>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, kind: HookKind) -> &RwLock<Vec<Arc<dyn Hook>>> {
        match kind {
            HookKind::Start => &self.start,
            HookKind::AnyMessage => &self.any_message,
            HookKind::ChatMessage => &self.chat_message,
            HookKind::Disconnect => &self.disconnect,
        }
    }

    pub fn add<H: Hook>(&self, kind: HookKind, hook: H) {
        self.slot(kind).write().push(Arc::new(hook));
    }

    pub fn len(&self, kind: HookKind) -> usize {
        self.slot(kind).read().len()
    }

    /// Runs every hook of `kind` in registration order. Returns the number
    /// that failed.
    pub async fn fire(&self, kind: HookKind, ctx: HookContext) -> usize {
        let hooks: Vec<Arc<dyn Hook>> = self.slot(kind).read().clone();
        let mut failed = 0;
        for hook in hooks {
            let ctx = ctx.clone();
            let outcome = std::panic::AssertUnwindSafe(async move { hook.call(ctx).await })
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(HandlerError::from_panic(panic)));
            if let Err(e) = outcome {
                failed += 1;
                error!(hook = %kind, error = %e, "Hook failed");
            }
        }
        failed
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("start", &self.len(HookKind::Start))
            .field("any_message", &self.len(HookKind::AnyMessage))
            .field("chat_message", &self.len(HookKind::ChatMessage))
            .field("disconnect", &self.len(HookKind::Disconnect))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use twirc_core::MemoryOutbox;

    use super::*;

    fn context(message: Option<Message>) -> (Arc<MemoryOutbox>, HookContext) {
        let outbox = Arc::new(MemoryOutbox::new());
        let ctx = HookContext::new(message.map(Arc::new), outbox.clone());
        (outbox, ctx)
    }

    #[tokio::test]
    async fn test_hooks_run_in_order_past_failures() {
        let hooks = Hooks::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let o = order.clone();
        hooks.add(HookKind::AnyMessage, move |_ctx: HookContext| {
            let o = o.clone();
            async move {
                o.lock().push(1);
                Err::<(), _>("first failed")
            }
        });
        hooks.add(HookKind::AnyMessage, |ctx: HookContext| async move {
            if ctx.message().is_none() {
                panic!("second panicked");
            }
        });
        let o = order.clone();
        hooks.add(HookKind::AnyMessage, move |_ctx: HookContext| {
            let o = o.clone();
            async move { o.lock().push(3) }
        });

        let (_, ctx) = context(None);
        assert_eq!(hooks.fire(HookKind::AnyMessage, ctx).await, 2);
        assert_eq!(*order.lock(), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_kinds_are_separate() {
        let hooks = Hooks::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        hooks.add(HookKind::Start, move |_ctx: HookContext| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        let (_, ctx) = context(None);
        hooks.fire(HookKind::Disconnect, ctx.clone()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        hooks.fire(HookKind::Start, ctx).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reply_uses_message_medium() {
        let (outbox, ctx) = context(Some(Message::chat("chan", "hi").unwrap()));
        ctx.reply("hello").unwrap();
        assert_eq!(outbox.sent(), vec![Message::chat("chan", "hello").unwrap()]);

        let (_, ctx) = context(None);
        assert!(matches!(ctx.reply("x"), Err(SendError::Encode(_))));
    }
}
