//! The bot: one connection wired to a router, a scheduler and hooks.
//!
//! ```text
//!                   ┌──────────────────────── Bot ────────────────────────┐
//! Connection ──▶ read_loop ──▶ events ─┐                                  │
//!                                      ├─▶ dispatch ─▶ hooks ─▶ CommandRouter
//! Scheduler ──▶ Injector ──────────────┘        │                         │
//!                   │                           ▼                         │
//!                   └──────────▶ OutboundQueues (Outbox) ──▶ Connection   │
//!                   └─────────────────────────────────────────────────────┘
//! ```
//!
//! Inbound and injected messages are dispatched one at a time, so the side
//! effects of one message are never interleaved with the next.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use twirc_runtime::Bot;
//! use twirc_framework::{Command, CommandContext};
//!
//! let bot = Bot::builder().profile("production").build()?;
//! bot.register(Command::text("ping", |ctx: CommandContext| async move {
//!     ctx.reply("pong")
//! }));
//! bot.run().await?;
//! ```

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use twirc_core::{Message, Outbox, PermissionList, SendResult, SharedOutbox};
use twirc_framework::{
    Command, CommandId, CommandRouter, DispatchReport, Injector, PermissionStore, Scheduler,
    SchedulerResult, Task, TaskId,
};
use twirc_transport::{
    Connection, Connector, OutboundQueues, PrivilegeTracker, TcpConnector,
};

use crate::config::{ConfigLoader, ConnectionSettings, TransportKind, TwircConfig, validate_config};
use crate::error::{RuntimeError, RuntimeResult};
use crate::hooks::{Hook, HookContext, HookKind, Hooks};
use crate::logging;

type DeniedCallback = Arc<dyn Fn(&Message, &str, &PermissionList) + Send + Sync>;

// =============================================================================
// Bot
// =============================================================================

/// A chat bot on a single connection.
pub struct Bot {
    config: TwircConfig,
    connection: Arc<Connection>,
    queues: Arc<OutboundQueues>,
    outbox: SharedOutbox,
    router: CommandRouter,
    scheduler: Arc<Scheduler>,
    injector: Injector,
    injected: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    hooks: Hooks,
    stop: CancellationToken,
}

impl Bot {
    pub fn builder() -> BotBuilder {
        BotBuilder::new()
    }

    /// Builds a bot from an already loaded configuration.
    pub fn from_config(config: TwircConfig) -> RuntimeResult<Self> {
        BotBuilder::new().config(config).build()
    }

    fn assemble(
        config: TwircConfig,
        connector: Arc<dyn Connector>,
        on_denied: Option<DeniedCallback>,
    ) -> Self {
        let connection = Connection::new(config.connection.to_connection_config(), connector);
        let queues = OutboundQueues::new(
            config.rate_limits.to_rate_limits(),
            Arc::clone(connection.privileges()),
        );
        let outbox: SharedOutbox = queues.clone();

        let permissions = Arc::new(PermissionStore::from_snapshot(config.permissions.clone()));
        let mut router = CommandRouter::new(permissions)
            .with_prefix(config.commands.prefix.clone())
            .with_unknown_policy(config.commands.unknown_command);
        if let Some(hook) = on_denied {
            router = router.on_permission_denied(move |message, command, missing| {
                hook(message, command, missing)
            });
        }

        let (injector, injected) = Injector::channel();
        let scheduler = Scheduler::new(Arc::clone(&outbox), injector.clone())
            .with_failure_limit(config.scheduler.max_consecutive_failures);

        Self {
            config,
            connection,
            queues,
            outbox,
            router,
            scheduler: Arc::new(scheduler),
            injector,
            injected: Mutex::new(Some(injected)),
            hooks: Hooks::new(),
            stop: CancellationToken::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn config(&self) -> &TwircConfig {
        &self.config
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn queues(&self) -> &Arc<OutboundQueues> {
        &self.queues
    }

    /// The outbox handlers and tasks send through.
    pub fn outbox(&self) -> &SharedOutbox {
        &self.outbox
    }

    pub fn router(&self) -> &CommandRouter {
        &self.router
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn permissions(&self) -> &Arc<PermissionStore> {
        self.router.permissions()
    }

    /// Per-channel privilege learned from the bot's own `USERSTATE`.
    pub fn privileges(&self) -> &Arc<PrivilegeTracker> {
        self.queues.privileges()
    }

    // -------------------------------------------------------------------------
    // Commands and tasks
    // -------------------------------------------------------------------------

    pub fn register(&self, command: Command) -> CommandId {
        self.router.register(command)
    }

    pub fn unregister(&self, id: CommandId) -> bool {
        self.router.unregister(id)
    }

    /// Schedules `task` after `delay`, repeating every `interval` if given.
    pub fn schedule<T: Task>(&self, delay: Duration, interval: Option<Duration>, task: T) -> TaskId {
        self.scheduler.schedule(delay, interval, task)
    }

    pub fn once<T: Task>(&self, delay: Duration, task: T) -> TaskId {
        self.scheduler.once(delay, task)
    }

    pub fn every<T: Task>(&self, interval: Duration, task: T) -> TaskId {
        self.scheduler.every(interval, task)
    }

    pub fn cancel(&self, id: TaskId) -> SchedulerResult<()> {
        self.scheduler.cancel(id)
    }

    // -------------------------------------------------------------------------
    // Sending
    // -------------------------------------------------------------------------

    /// Enqueues `message` on the queue its kind and channel privilege select.
    pub fn send(&self, message: Message) -> SendResult<()> {
        self.outbox.send(message)
    }

    pub fn say(&self, channel: &str, text: &str) -> SendResult<()> {
        self.outbox.say(channel, text)
    }

    pub fn whisper(&self, user: &str, text: &str) -> SendResult<()> {
        self.outbox.send(Message::whisper(user, text)?)
    }

    /// Joins `channel`. It is re-joined after every reconnect.
    pub fn join(&self, channel: &str) -> SendResult<()> {
        self.outbox.send(Message::join(channel)?)
    }

    /// Leaves `channel` and stops re-joining it.
    pub fn part(&self, channel: &str) -> SendResult<()> {
        self.outbox.send(Message::part(channel)?)
    }

    /// Dispatches `message` as if it had been received.
    pub fn inject(&self, message: Message) -> SendResult<()> {
        self.injector.inject(message)
    }

    // -------------------------------------------------------------------------
    // Hooks
    // -------------------------------------------------------------------------

    /// Runs once after login, before the first message is dispatched.
    pub fn on_start<H: Hook>(&self, hook: H) {
        self.hooks.add(HookKind::Start, hook);
    }

    /// Runs for every inbound and injected message, before commands.
    pub fn on_any_message<H: Hook>(&self, hook: H) {
        self.hooks.add(HookKind::AnyMessage, hook);
    }

    /// Runs for channel chat messages, before commands.
    pub fn on_chat_message<H: Hook>(&self, hook: H) {
        self.hooks.add(HookKind::ChatMessage, hook);
    }

    /// Runs once after the connection has been released.
    pub fn on_disconnect<H: Hook>(&self, hook: H) {
        self.hooks.add(HookKind::Disconnect, hook);
    }

    // -------------------------------------------------------------------------
    // Running
    // -------------------------------------------------------------------------

    /// Asks a running bot to shut down.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Runs until Ctrl+C, SIGTERM, [`stop`](Self::stop), or the connection
    /// is lost for good.
    pub async fn run(&self) -> RuntimeResult<()> {
        info!("Bot is running. Press Ctrl+C to stop.");
        self.run_until(wait_for_shutdown()).await
    }

    /// Runs until `shutdown` completes, [`stop`](Self::stop) is called, or
    /// the connection is lost for good.
    ///
    /// Connect failures are returned without retrying. A bot runs at most
    /// once.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        let mut injected = self
            .injected
            .lock()
            .take()
            .ok_or(RuntimeError::AlreadyRunning)?;

        let guard = self.connection.connect().await?;
        info!(
            nickname = %self.config.connection.nickname,
            channels = ?self.connection.channels(),
            "Bot connected"
        );

        let (events_tx, mut events) = mpsc::channel(self.config.connection.inbound_buffer.max(1));
        let reader = {
            let connection = Arc::clone(&self.connection);
            tokio::spawn(async move { connection.read_loop(events_tx).await })
        };
        let drains = self.queues.start(Arc::clone(&self.connection));
        let closed = self.connection.shutdown_token();
        let ticker = {
            let scheduler = Arc::clone(&self.scheduler);
            let token = closed.child_token();
            tokio::spawn(async move { scheduler.run(token).await })
        };

        self.hooks
            .fire(HookKind::Start, HookContext::new(None, Arc::clone(&self.outbox)))
            .await;

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                _ = self.stop.cancelled() => {
                    info!("Stop requested");
                    break;
                }
                _ = closed.cancelled() => break,
                event = events.recv() => match event {
                    Some(message) => self.dispatch(message).await,
                    None => break,
                },
                Some(message) = injected.recv() => self.dispatch(message).await,
            }
        }

        guard.release().await;

        let read_result = match reader.await {
            Ok(result) => result.map_err(RuntimeError::from),
            Err(e) => Err(RuntimeError::Task(e.to_string())),
        };
        if let Err(e) = ticker.await {
            error!(error = %e, "Scheduler task failed");
        }
        for result in futures::future::join_all(drains).await {
            if let Err(e) = result {
                error!(error = %e, "Queue drain task failed");
            }
        }

        self.hooks
            .fire(HookKind::Disconnect, HookContext::new(None, Arc::clone(&self.outbox)))
            .await;

        match &read_result {
            Ok(()) => info!("Bot stopped"),
            Err(e) => error!(error = %e, "Bot stopped after losing the connection"),
        }
        read_result
    }

    async fn dispatch(&self, message: Message) {
        let message = Arc::new(message);

        let ctx = HookContext::new(Some(Arc::clone(&message)), Arc::clone(&self.outbox));
        self.hooks.fire(HookKind::AnyMessage, ctx.clone()).await;
        if message.is_chat() {
            self.hooks.fire(HookKind::ChatMessage, ctx).await;
        }

        let report = self.router.dispatch(message, &self.outbox).await;
        if report != DispatchReport::default() {
            trace!(?report, "Dispatched");
        }
    }
}

impl std::fmt::Debug for Bot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bot")
            .field("connection", &self.connection)
            .field("queues", &self.queues)
            .field("scheduler", &self.scheduler)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

/// Waits for Ctrl+C or, on Unix, SIGTERM.
pub async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

// =============================================================================
// BotBuilder
// =============================================================================

/// Builder for a [`Bot`].
///
/// Without an explicit [`config`](Self::config), configuration is loaded
/// with a [`ConfigLoader`] from files and `TWIRC_*` environment variables.
/// The configuration is validated and logging is initialized from it.
///
/// ```rust,ignore
/// let bot = Bot::builder()
///     .config_file("bot.toml")
///     .on_permission_denied(|msg, command, missing| {
///         tracing::info!(%command, %missing, sender = ?msg.sender(), "Denied");
///     })
///     .build()?;
/// ```
pub struct BotBuilder {
    loader: ConfigLoader,
    config: Option<TwircConfig>,
    connector: Option<Arc<dyn Connector>>,
    on_denied: Option<DeniedCallback>,
    init_logging: bool,
}

impl BotBuilder {
    pub fn new() -> Self {
        Self {
            loader: ConfigLoader::new(),
            config: None,
            connector: None,
            on_denied: None,
            init_logging: true,
        }
    }

    /// Uses `config` as is instead of loading one.
    pub fn config(mut self, config: TwircConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.loader = self.loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.loader = self.loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.loader = self.loader.search_path(path);
        self
    }

    pub fn without_env(mut self) -> Self {
        self.loader = self.loader.without_env();
        self
    }

    /// Base configuration that files and environment override.
    pub fn merge(mut self, config: TwircConfig) -> Self {
        self.loader = self.loader.merge(config);
        self
    }

    /// Overrides the connector chosen from `connection.transport`.
    pub fn connector<C: Connector + 'static>(mut self, connector: C) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Called when a matched command is skipped for lack of permissions.
    pub fn on_permission_denied<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Message, &str, &PermissionList) + Send + Sync + 'static,
    {
        self.on_denied = Some(Arc::new(hook));
        self
    }

    /// Leaves the global tracing subscriber alone.
    pub fn without_logging(mut self) -> Self {
        self.init_logging = false;
        self
    }

    pub fn build(self) -> RuntimeResult<Bot> {
        let config = match self.config {
            Some(config) => config,
            None => self.loader.load()?,
        };
        validate_config(&config)?;

        if self.init_logging {
            logging::init_from_config(&config.logging);
        }

        let connector = match self.connector {
            Some(connector) => connector,
            None => connector_for(&config.connection)?,
        };
        debug!(target = %connector.target(), "Building bot");

        Ok(Bot::assemble(config, connector, self.on_denied))
    }
}

impl Default for BotBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn connector_for(settings: &ConnectionSettings) -> RuntimeResult<Arc<dyn Connector>> {
    match settings.transport {
        TransportKind::Tcp => Ok(Arc::new(TcpConnector::new(
            settings.host.clone(),
            settings.port,
        ))),
        #[cfg(feature = "ws-client")]
        TransportKind::Websocket => Ok(Arc::new(twirc_transport::WsConnector::new(
            settings.url.clone(),
        ))),
        #[cfg(not(feature = "ws-client"))]
        TransportKind::Websocket => Err(RuntimeError::TransportUnavailable(
            "websocket (enable the `ws-client` feature)".to_string(),
        )),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::task::JoinHandle;
    use twirc_framework::{CommandContext, TaskContext};
    use twirc_transport::{
        ConnectionError, ConnectionState, MemoryConnector, MemoryServer, MemorySession,
        Privilege, QueueId,
    };

    use super::*;

    fn config() -> TwircConfig {
        let mut config = TwircConfig::default();
        config.connection.nickname = "bot".into();
        config.connection.channels = vec!["chan".into()];
        config.connection.reconnect.enabled = false;
        config
    }

    fn bot(config: TwircConfig) -> (Arc<Bot>, MemoryServer) {
        let (connector, server) = MemoryConnector::welcoming("bot");
        let bot = Bot::builder()
            .config(config)
            .connector(connector)
            .without_logging()
            .build()
            .unwrap();
        (Arc::new(bot), server)
    }

    fn ping_command() -> Command {
        Command::text("ping", |ctx: CommandContext| async move { ctx.reply("pong") })
    }

    async fn start(
        bot: &Arc<Bot>,
        server: &mut MemoryServer,
    ) -> (JoinHandle<RuntimeResult<()>>, MemorySession) {
        let runner = {
            let bot = Arc::clone(bot);
            tokio::spawn(async move { bot.run_until(std::future::pending()).await })
        };
        let mut session = server.accept().await.unwrap();
        assert_eq!(session.recv_starting_with("JOIN").await.unwrap(), "JOIN #chan");
        (runner, session)
    }

    #[tokio::test]
    async fn test_command_round_trip() {
        let (bot, mut server) = bot(config());
        bot.register(ping_command());
        let (runner, mut session) = start(&bot, &mut server).await;

        session.send(":alice!alice@alice.tmi.twitch.tv PRIVMSG #chan :!ping");
        assert_eq!(
            session.recv_starting_with("PRIVMSG").await.unwrap(),
            "PRIVMSG #chan :pong"
        );

        bot.stop();
        runner.await.unwrap().unwrap();
        assert_eq!(session.recv_starting_with("QUIT").await.unwrap(), "QUIT");
        assert_eq!(server.closes(), 1);
        assert_eq!(bot.connection().state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_task_injects_onto_dispatch_path() {
        let (bot, mut server) = bot(config());
        bot.register(ping_command());
        bot.once(Duration::from_secs(5), |ctx: TaskContext| async move {
            ctx.inject(Message::chat("chan", "!ping")?)
        });
        let (runner, mut session) = start(&bot, &mut server).await;

        let started = tokio::time::Instant::now();
        assert_eq!(
            session.recv_starting_with("PRIVMSG").await.unwrap(),
            "PRIVMSG #chan :pong"
        );
        assert!(started.elapsed() >= Duration::from_secs(5));

        bot.stop();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_userstate_elevates_channel() {
        let (bot, mut server) = bot(config());
        let (seen_tx, mut seen) = mpsc::unbounded_channel();
        bot.on_any_message(move |ctx: HookContext| {
            let seen_tx = seen_tx.clone();
            async move {
                if let Some(message) = ctx.message() {
                    let _ = seen_tx.send(message.kind().name());
                }
            }
        });
        let (runner, session) = start(&bot, &mut server).await;

        assert_eq!(bot.privileges().privilege("chan"), Privilege::Normal);
        session.send("@badges=moderator/1;mod=1 :tmi.twitch.tv USERSTATE #chan");
        while seen.recv().await.unwrap() != "UserState" {}
        assert_eq!(bot.privileges().privilege("chan"), Privilege::Elevated);

        session.send("@badges=;mod=0 :tmi.twitch.tv USERSTATE #chan");
        while seen.recv().await.unwrap() != "UserState" {}
        assert_eq!(bot.privileges().privilege("chan"), Privilege::Normal);

        bot.stop();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_hooks_fire_around_dispatch() {
        let (bot, mut server) = bot(config());
        let starts = Arc::new(AtomicUsize::new(0));
        let chats = Arc::new(AtomicUsize::new(0));
        let disconnects = Arc::new(AtomicUsize::new(0));

        let s = starts.clone();
        bot.on_start(move |_ctx: HookContext| {
            let s = s.clone();
            async move {
                s.fetch_add(1, Ordering::SeqCst);
            }
        });
        let c = chats.clone();
        bot.on_chat_message(move |ctx: HookContext| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                ctx.reply("seen")
            }
        });
        let d = disconnects.clone();
        bot.on_disconnect(move |_ctx: HookContext| {
            let d = d.clone();
            async move {
                d.fetch_add(1, Ordering::SeqCst);
            }
        });

        let (runner, mut session) = start(&bot, &mut server).await;
        session.send(":tmi.twitch.tv PING :tmi.twitch.tv");
        session.send(":alice!alice@alice.tmi.twitch.tv PRIVMSG #chan :hello");
        assert_eq!(
            session.recv_starting_with("PONG").await.unwrap(),
            "PONG :tmi.twitch.tv"
        );
        assert_eq!(
            session.recv_starting_with("PRIVMSG").await.unwrap(),
            "PRIVMSG #chan :seen"
        );

        bot.stop();
        runner.await.unwrap().unwrap();
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(chats.load(Ordering::SeqCst), 1);
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_is_returned() {
        let (bot, server) = bot(config());
        server.refuse_next(1);

        let err = bot.run_until(std::future::pending()).await.unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Connection(ConnectionError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_runs_at_most_once() {
        let (bot, mut server) = bot(config());
        let (runner, _session) = start(&bot, &mut server).await;

        let err = bot.run_until(std::future::pending()).await.unwrap_err();
        assert!(matches!(err, RuntimeError::AlreadyRunning));

        bot.stop();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_lost_connection_ends_run() {
        let (bot, mut server) = bot(config());
        let (runner, session) = start(&bot, &mut server).await;

        session.fail();
        let err = runner.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Connection(ConnectionError::Transport(_))
        ));
        assert_eq!(bot.connection().state(), ConnectionState::Closed);
        assert!(bot.say("chan", "too late").is_err());
    }

    #[tokio::test]
    async fn test_join_and_part_go_out_unthrottled() {
        let (bot, mut server) = bot(config());
        let (runner, mut session) = start(&bot, &mut server).await;

        bot.say("chan", "one").unwrap();
        bot.say("chan", "two").unwrap();
        bot.join("other").unwrap();
        bot.part("other").unwrap();

        // Chat and control drain on separate queues; only per-queue order
        // is fixed. The second chat line waits out the channel cooldown.
        let mut lines = Vec::new();
        for _ in 0..3 {
            lines.push(session.recv().await.unwrap());
        }
        let control: Vec<_> = lines.iter().filter(|l| !l.starts_with("PRIVMSG")).collect();
        assert_eq!(control, ["JOIN #other", "PART #other"]);
        assert!(lines.contains(&"PRIVMSG #chan :one".to_string()));
        assert!(session.try_recv().is_none());
        assert_eq!(bot.queues().depth(QueueId::Channel), 1);

        bot.stop();
        runner.await.unwrap().unwrap();
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = config();
        config.commands.prefix = String::new();
        let (connector, _server) = MemoryConnector::pair();
        let err = Bot::builder()
            .config(config)
            .connector(connector)
            .without_logging()
            .build()
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Config(_)));
    }

    #[cfg(not(feature = "ws-client"))]
    #[test]
    fn test_websocket_needs_feature() {
        let mut config = config();
        config.connection.transport = TransportKind::Websocket;
        let err = Bot::builder()
            .config(config)
            .without_logging()
            .build()
            .unwrap_err();
        assert!(matches!(err, RuntimeError::TransportUnavailable(_)));
    }
}
