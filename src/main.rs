//! The amftpd daemon binary: configuration, logging and server wiring.

use amftpd::config::{Config, DEFAULT_CONFIG_FILE};
use amftpd::policy::{AccessEvaluator, FxpPolicy, SectionMap};
use amftpd::race::RaceEngine;
use amftpd::server::banlist::BanPolicy;
use amftpd::server::{tls, ServerBuilder};
use amftpd::users::store::StoreConfig;
use amftpd::users::UserStore;
use amftpd::vfs::Vfs;
use clap::Parser;
use slog::Drain;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Managed FTP(S) daemon for ratio-accounted file distribution sites.
#[derive(Parser, Debug)]
#[command(name = "amftpd", version, about)]
struct Cli {
    /// Path to the configuration file.
    #[arg(default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
}

fn build_logger(log_file: &std::path::Path) -> std::io::Result<slog::Logger> {
    if let Some(parent) = log_file.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let term_decorator = slog_term::TermDecorator::new().build();
    let term_drain = slog_term::FullFormat::new(term_decorator).build().fuse();

    let file = std::fs::OpenOptions::new().create(true).append(true).open(log_file)?;
    let file_decorator = slog_term::PlainDecorator::new(file);
    let file_drain = slog_term::FullFormat::new(file_decorator).build().fuse();

    let drain = slog::Duplicate::new(term_drain, file_drain).fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    Ok(slog::Logger::root(drain, slog::o!()))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("amftpd: {}", err);
            std::process::exit(1);
        }
    };

    let logger = match build_logger(&config.log_file) {
        Ok(logger) => logger,
        Err(err) => {
            eprintln!("amftpd: cannot open log file {}: {}", config.log_file.display(), err);
            std::process::exit(1);
        }
    };
    slog::info!(logger, "amftpd starting"; "config" => %cli.config.display());

    let store = match UserStore::open(
        StoreConfig {
            path: config.db.path.clone(),
            secret: config.db.secret.clone(),
            wal_compact_bytes: config.db.wal_compact_bytes,
        },
        logger.new(slog::o!("subsystem" => "userstore")),
    ) {
        Ok(store) => store,
        Err(err) => {
            slog::error!(logger, "cannot open user store"; "error" => %err);
            std::process::exit(1);
        }
    };
    if let Err(err) = store.watch() {
        slog::warn!(logger, "user store hot reload unavailable"; "error" => %err);
    }

    let vfs = match Vfs::new(&config.root) {
        Ok(vfs) => vfs,
        Err(err) => {
            slog::error!(logger, "cannot open site root"; "root" => %config.root.display(), "error" => %err);
            std::process::exit(1);
        }
    };

    let mut builder = ServerBuilder::new(store, vfs)
        .greeting(&config.greeting)
        .passive_ports(config.passive_ports.0..=config.passive_ports.1)
        .sections(SectionMap::new(config.sections.clone()))
        .access_rules(AccessEvaluator::new(config.dir_rules.clone()))
        .fxp_policy(FxpPolicy::new(config.fxp.rules.clone(), config.fxp.exempt_admins))
        .race_engine(Arc::new(RaceEngine::new(config.race.max_recent)))
        .ban_policy(BanPolicy {
            max_failed_logins: config.ban.max_failed_logins,
            failure_window: Duration::from_secs(config.ban.failure_window_secs),
            auto_ban_duration: Duration::from_secs(config.ban.ban_secs),
        })
        .require_tls_for_auth(config.require_tls_for_auth)
        .allow_anonymous(config.allow_anonymous)
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .ident(config.ident_enabled, Duration::from_secs(config.ident_timeout_secs))
        .deny_broke_logins(config.deny_broke_logins)
        .race_max_age(Duration::from_secs(config.race.max_age_secs))
        .nukes_log(config.nukes_log.clone())
        .logger(logger.clone())
        .shutdown_indicator(async {
            let _ = tokio::signal::ctrl_c().await;
        });

    if let Some(tls_files) = &config.tls {
        match tls::new_server_config(&tls_files.certs_file, &tls_files.key_file) {
            Ok(tls_config) => {
                builder = builder.ftps(tls_config);
            }
            Err(err) => {
                slog::error!(logger, "cannot load TLS material"; "error" => %err);
                std::process::exit(1);
            }
        }
    }

    if let Err(err) = builder.build().listen(&config.bind).await {
        slog::error!(logger, "server failed"; "error" => %err);
        std::process::exit(1);
    }
}
