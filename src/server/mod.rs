//! The server: accept loop, shared services, and per-connection wiring.

pub mod banlist;
pub mod controlchan;
pub mod datachan;
pub mod ident;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod shutdown;
pub mod site;
pub mod tls;

pub use controlchan::reply::{Reply, ReplyCode};

use crate::notification::{DupeStore, EventListener, NopDupeStore, NopListener, NopOverlay, NopZipscript, VirtualFileOverlay, Zipscript};
use crate::policy::{AccessEvaluator, CreditEngine, FxpPolicy, SectionMap};
use crate::race::RaceEngine;
use crate::rules::{NopRules, RuleEngine};
use crate::users::UserStore;
use crate::vfs::Vfs;
use banlist::{BanList, BanPolicy};
use registry::SessionRegistry;
use site::SiteRegistry;
use slog::{Drain, Logger};
use std::future::Future;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;

/// Default passive port range.
pub const DEFAULT_PASSIVE_PORTS: RangeInclusive<u16> = 49152..=65534;
/// Default idle timeout for sessions without an account override.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
/// Default greeting.
pub const DEFAULT_GREETING: &str = "amftpd ready.";

/// Errors that end [`Server::listen`].
#[derive(Debug, Error)]
pub enum ServerError {
    /// Could not bind the control port.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The requested address.
        addr: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Accept loop I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runtime options shared with every session.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// 220 banner text.
    pub greeting: String,
    /// Passive data port range, walked in order.
    pub passive_ports: RangeInclusive<u16>,
    /// Refuse USER/PASS on plaintext control connections.
    pub require_tls_for_auth: bool,
    /// Accept `anonymous` logins.
    pub allow_anonymous: bool,
    /// Idle timeout for sessions whose account does not set one.
    pub idle_timeout: Duration,
    /// Whether to query identd on login.
    pub ident_enabled: bool,
    /// Deadline for the ident query.
    pub ident_timeout: Duration,
    /// Deny logins of accounts with zero credits (the ratio login rule).
    pub deny_broke_logins: bool,
    /// Races idle longer than this are aged out by the scheduler.
    pub race_max_age: Duration,
    /// Where SITE NUKE appends its audit lines.
    pub nukes_log: PathBuf,
    /// How long shutdown waits for sessions to drain.
    pub shutdown_drain: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        ServerOptions {
            greeting: DEFAULT_GREETING.to_string(),
            passive_ports: DEFAULT_PASSIVE_PORTS,
            require_tls_for_auth: false,
            allow_anonymous: false,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            ident_enabled: false,
            ident_timeout: ident::DEFAULT_TIMEOUT,
            deny_broke_logins: false,
            race_max_age: Duration::from_secs(24 * 3600),
            nukes_log: PathBuf::from("logs/nukes.log"),
            shutdown_drain: Duration::from_secs(10),
        }
    }
}

/// Every shared service a session needs, bundled once per server.
pub struct ServerContext {
    /// The user store.
    pub store: Arc<UserStore>,
    /// The chroot-rooted virtual file system.
    pub vfs: Vfs,
    /// Section configuration.
    pub sections: SectionMap,
    /// Directory access rules.
    pub access: AccessEvaluator,
    /// The credit engine.
    pub credits: CreditEngine,
    /// The FXP policy.
    pub fxp: FxpPolicy,
    /// The rule-script host.
    pub rules: Arc<dyn RuleEngine>,
    /// The race engine.
    pub race: Arc<RaceEngine>,
    /// The ban list.
    pub banlist: Arc<BanList>,
    /// Live session registry.
    pub registry: Arc<SessionRegistry>,
    /// Event bus hook.
    pub events: Arc<dyn EventListener>,
    /// Zipscript hook.
    pub zipscript: Arc<dyn Zipscript>,
    /// Dupe store hook.
    pub dupes: Arc<dyn DupeStore>,
    /// Virtual listing overlay.
    pub overlay: Arc<dyn VirtualFileOverlay>,
    /// SITE subcommand registry.
    pub site: SiteRegistry,
    /// Server TLS material; `None` disables AUTH TLS.
    pub tls_config: Option<Arc<rustls::ServerConfig>>,
    /// Runtime options.
    pub opts: ServerOptions,
    /// Root logger.
    pub logger: Logger,
}

impl std::fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerContext").field("opts", &self.opts).finish()
    }
}

type ShutdownFuture = Pin<Box<dyn Future<Output = ()> + Send + Sync>>;

/// Builds [`Server`] instances.
pub struct ServerBuilder {
    store: Arc<UserStore>,
    vfs: Vfs,
    sections: SectionMap,
    access: AccessEvaluator,
    fxp: FxpPolicy,
    rules: Arc<dyn RuleEngine>,
    race: Option<Arc<RaceEngine>>,
    ban_policy: BanPolicy,
    events: Arc<dyn EventListener>,
    zipscript: Arc<dyn Zipscript>,
    dupes: Arc<dyn DupeStore>,
    overlay: Arc<dyn VirtualFileOverlay>,
    tls_config: Option<Arc<rustls::ServerConfig>>,
    opts: ServerOptions,
    logger: Option<Logger>,
    shutdown: ShutdownFuture,
}

impl ServerBuilder {
    /// Start building a server around a user store and a filesystem root.
    pub fn new(store: Arc<UserStore>, vfs: Vfs) -> ServerBuilder {
        ServerBuilder {
            store,
            vfs,
            sections: SectionMap::default(),
            access: AccessEvaluator::default(),
            fxp: FxpPolicy::default(),
            rules: Arc::new(NopRules),
            race: None,
            ban_policy: BanPolicy::default(),
            events: Arc::new(NopListener),
            zipscript: Arc::new(NopZipscript),
            dupes: Arc::new(NopDupeStore),
            overlay: Arc::new(NopOverlay),
            tls_config: None,
            opts: ServerOptions::default(),
            logger: None,
            shutdown: Box::pin(std::future::pending()),
        }
    }

    /// Set the 220 banner text.
    pub fn greeting(mut self, greeting: &str) -> Self {
        self.opts.greeting = greeting.to_string();
        self
    }

    /// Set the passive port range.
    pub fn passive_ports(mut self, ports: RangeInclusive<u16>) -> Self {
        self.opts.passive_ports = ports;
        self
    }

    /// Set the section configuration.
    pub fn sections(mut self, sections: SectionMap) -> Self {
        self.sections = sections;
        self
    }

    /// Set the directory access rules.
    pub fn access_rules(mut self, access: AccessEvaluator) -> Self {
        self.access = access;
        self
    }

    /// Set the FXP policy.
    pub fn fxp_policy(mut self, fxp: FxpPolicy) -> Self {
        self.fxp = fxp;
        self
    }

    /// Attach a rule-script engine.
    pub fn rules(mut self, rules: Arc<dyn RuleEngine>) -> Self {
        self.rules = rules;
        self
    }

    /// Attach a race engine (defaults to a fresh one).
    pub fn race_engine(mut self, race: Arc<RaceEngine>) -> Self {
        self.race = Some(race);
        self
    }

    /// Set the ban policy.
    pub fn ban_policy(mut self, policy: BanPolicy) -> Self {
        self.ban_policy = policy;
        self
    }

    /// Attach an event listener.
    pub fn notify(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.events = listener;
        self
    }

    /// Attach a zipscript hook.
    pub fn zipscript(mut self, zipscript: Arc<dyn Zipscript>) -> Self {
        self.zipscript = zipscript;
        self
    }

    /// Attach a dupe store hook.
    pub fn dupe_store(mut self, dupes: Arc<dyn DupeStore>) -> Self {
        self.dupes = dupes;
        self
    }

    /// Attach a virtual listing overlay.
    pub fn overlay(mut self, overlay: Arc<dyn VirtualFileOverlay>) -> Self {
        self.overlay = overlay;
        self
    }

    /// Enable FTPS with the given rustls server config.
    pub fn ftps(mut self, config: Arc<rustls::ServerConfig>) -> Self {
        self.tls_config = Some(config);
        self
    }

    /// Require TLS before USER/PASS.
    pub fn require_tls_for_auth(mut self, required: bool) -> Self {
        self.opts.require_tls_for_auth = required;
        self
    }

    /// Allow anonymous logins.
    pub fn allow_anonymous(mut self, allowed: bool) -> Self {
        self.opts.allow_anonymous = allowed;
        self
    }

    /// Set the default idle timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.opts.idle_timeout = timeout;
        self
    }

    /// Enable or disable ident lookups at login.
    pub fn ident(mut self, enabled: bool, timeout: Duration) -> Self {
        self.opts.ident_enabled = enabled;
        self.opts.ident_timeout = timeout;
        self
    }

    /// Deny logins with a zero credit balance.
    pub fn deny_broke_logins(mut self, deny: bool) -> Self {
        self.opts.deny_broke_logins = deny;
        self
    }

    /// Where nuke audit lines go.
    pub fn nukes_log(mut self, path: PathBuf) -> Self {
        self.opts.nukes_log = path;
        self
    }

    /// How long an idle race is kept before the scheduler drops it.
    pub fn race_max_age(mut self, age: Duration) -> Self {
        self.opts.race_max_age = age;
        self
    }

    /// Replace the logger (defaults to `slog-stdlog`).
    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// A future whose completion triggers graceful shutdown (typically
    /// Ctrl-C).
    pub fn shutdown_indicator<F>(mut self, indicator: F) -> Self
    where
        F: Future<Output = ()> + Send + Sync + 'static,
    {
        self.shutdown = Box::pin(indicator);
        self
    }

    /// Finish building.
    pub fn build(self) -> Server {
        let logger = self
            .logger
            .unwrap_or_else(|| Logger::root(slog_stdlog::StdLog {}.fuse(), slog::o!()));
        let race = self.race.unwrap_or_else(|| Arc::new(RaceEngine::new(crate::race::DEFAULT_MAX_RECENT)));
        let ctx = ServerContext {
            credits: CreditEngine::new(Arc::clone(&self.rules)),
            store: self.store,
            vfs: self.vfs,
            sections: self.sections,
            access: self.access,
            fxp: self.fxp,
            rules: self.rules,
            race,
            banlist: Arc::new(BanList::new(self.ban_policy)),
            registry: Arc::new(SessionRegistry::new()),
            events: self.events,
            zipscript: self.zipscript,
            dupes: self.dupes,
            overlay: self.overlay,
            site: SiteRegistry::new(),
            tls_config: self.tls_config,
            opts: self.opts,
            logger,
        };
        Server {
            ctx: Arc::new(ctx),
            shutdown: self.shutdown,
        }
    }
}

/// A built server, ready to listen.
pub struct Server {
    ctx: Arc<ServerContext>,
    shutdown: ShutdownFuture,
}

impl Server {
    /// The shared context, exposed for tests and embedding.
    pub fn context(&self) -> Arc<ServerContext> {
        Arc::clone(&self.ctx)
    }

    /// Bind `addr` and serve until the shutdown indicator fires, then
    /// drain in-flight sessions up to the configured deadline.
    pub async fn listen(self, addr: &str) -> Result<(), ServerError> {
        let Server { ctx, shutdown } = self;
        let listener = TcpListener::bind(addr).await.map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        let local = listener.local_addr()?;
        slog::info!(ctx.logger, "listening"; "addr" => %local);

        let coordinator = shutdown::ShutdownCoordinator::new(Arc::clone(&ctx.registry));
        spawn_scheduler(&ctx, &coordinator);

        let mut shutdown = shutdown;
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            Self::accept_connection(&ctx, &coordinator, stream, peer).await;
                        }
                        Err(err) => {
                            slog::warn!(ctx.logger, "accept failed"; "error" => %err);
                        }
                    }
                }
                _ = &mut shutdown => {
                    slog::info!(ctx.logger, "shutdown requested, draining sessions"; "sessions" => ctx.registry.len());
                    break;
                }
            }
        }

        coordinator.begin();
        coordinator.drain(ctx.opts.shutdown_drain, &ctx.logger).await;
        slog::info!(ctx.logger, "server stopped");
        Ok(())
    }

    async fn accept_connection(
        ctx: &Arc<ServerContext>,
        coordinator: &shutdown::ShutdownCoordinator,
        stream: tokio::net::TcpStream,
        peer: SocketAddr,
    ) {
        if let Some(reason) = ctx.banlist.is_banned(peer.ip()) {
            slog::info!(ctx.logger, "refusing banned peer"; "peer" => %peer, "reason" => %reason);
            let mut chan = controlchan::channel::ControlChannel::new(stream);
            let _ = chan
                .send(Reply::new_with_string(
                    ReplyCode::ServiceNotAvailable,
                    format!("Service not available, you are banned: {}.", reason),
                ))
                .await;
            chan.shutdown().await;
            return;
        }

        let session_id = ctx.registry.next_session_id();
        let kill = ctx.registry.register(session_id, peer);
        let shutdown_signal = coordinator.signal();
        let ctx = Arc::clone(ctx);
        tokio::spawn(async move {
            controlchan::control_loop::run(ctx, stream, peer, session_id, kill, shutdown_signal).await;
        });
    }
}

fn spawn_scheduler(ctx: &Arc<ServerContext>, coordinator: &shutdown::ShutdownCoordinator) {
    let race_max_age = ctx.opts.race_max_age;
    let store = Arc::clone(&ctx.store);
    let race = Arc::clone(&ctx.race);
    let bans = Arc::clone(&ctx.banlist);
    let tasks = vec![
        scheduler::Task::new("userstore-compaction", Duration::from_secs(60), move || {
            let store = Arc::clone(&store);
            async move {
                store.compact_if_needed().await?;
                Ok(())
            }
        }),
        scheduler::Task::new("race-aging", Duration::from_secs(300), move || {
            let race = Arc::clone(&race);
            async move {
                race.evict_older_than(race_max_age);
                Ok(())
            }
        }),
        scheduler::Task::new("ban-sweep", Duration::from_secs(30), move || {
            let bans = Arc::clone(&bans);
            async move {
                bans.sweep();
                Ok(())
            }
        }),
    ];
    let signal = coordinator.signal();
    let logger = ctx.logger.clone();
    tokio::spawn(scheduler::run(tasks, logger, signal));
}
