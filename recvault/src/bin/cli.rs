#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]

#[macro_use]
extern crate tracing;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use camino::Utf8PathBuf;
use meeting_store::model::FileSize;
use recvault::cleanup::CleanupJob;
use recvault::client::ZoomClient;
use recvault::config::Conf;
use recvault::download::Downloader;
use recvault::selector::Selector;
use recvault::sync::Syncer;
use recvault::task::{ShutdownHandle, ShutdownSignal};
use recvault::{check, log, storage};
use seahorse::{App, Command, Context, Flag, FlagType};

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let app = App::new(env!("CARGO_PKG_NAME"))
        .description(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .usage("recvault-cli [command] --config <CONFIG_PATH>")
        .command(sync_command())
        .command(trash_command())
        .command(cloudcap_command())
        .command(check_command());

    app.run(args);
}

fn apply_common_flags(cmd: Command) -> Command {
    cmd.flag(
        Flag::new("config", FlagType::String)
            .description("yaml config file name (default: config.yml)")
            .alias("c"),
    )
    .flag(Flag::new("dbg", FlagType::Bool).description("show debug info"))
}

fn load_conf(c: &Context) -> anyhow::Result<Arc<Conf>> {
    let path = c.string_flag("config").unwrap_or_else(|_| "config.yml".to_owned());

    let mut conf = Conf::load_from_file(Utf8PathBuf::from(path).as_path())?;

    if c.bool_flag("dbg") {
        conf.dbg = true;
    }

    Ok(Arc::new(conf))
}

/// Runs one driver to completion, racing it against CTRL-C.
fn run<F, Fut>(conf: &Conf, f: F) -> anyhow::Result<()>
where
    F: FnOnce(ShutdownSignal) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let _log_guard = log::init(None, log::default_filter(conf.dbg))?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("runtime build failed")?;

    let res = rt.block_on(async {
        let (shutdown_handle, shutdown_signal) = ShutdownHandle::new();

        tokio::select! {
            res = f(shutdown_signal) => res,
            res = tokio::signal::ctrl_c() => {
                shutdown_handle.signal();
                res.context("ctrl-c event")
            }
        }
    });

    match &res {
        Ok(()) => info!("Cli job done"),
        Err(e) => error!("{e:#}"),
    }

    rt.shutdown_timeout(Duration::from_millis(100)); // Just to be safe.

    res
}

fn exit(res: anyhow::Result<()>) -> ! {
    match res {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("{e:?}");
            std::process::exit(1);
        }
    }
}

fn build_client(conf: &Conf, shutdown_signal: ShutdownSignal) -> Arc<ZoomClient> {
    Arc::new(
        ZoomClient::builder()
            .conf(conf.client.clone())
            .shutdown_signal(shutdown_signal)
            .build(),
    )
}

// sync

fn sync_command() -> Command {
    apply_common_flags(
        Command::new("sync")
            .description("Sync meetings recorded N days ago, then drain the download queue once")
            .usage("recvault-cli sync --days <N> --config <CONFIG_PATH>")
            .flag(Flag::new("days", FlagType::Int).description("days back to look at (default: 1)"))
            .action(sync_action),
    )
}

fn sync_action(c: &Context) {
    let res = (|| -> anyhow::Result<()> {
        let conf = load_conf(c)?;
        let days = i64::try_from(c.int_flag("days").unwrap_or(1)).context("invalid --days value")?;

        run(&Arc::clone(&conf), move |shutdown_signal| async move {
            let store = storage::load_store(&conf.storage).await?;
            storage::recover_in_flight(&store).await?;

            let client = build_client(&conf, shutdown_signal);

            let feed = client.list_meetings(days).await?;

            let syncer = Syncer::new(
                Arc::clone(&store),
                Arc::clone(&client),
                Selector::from_conf(&conf.syncable),
                conf.client.delete_skipped,
                conf.client.delete_downloaded,
            );
            syncer.sync_meetings(&feed).await?;

            let downloader = Downloader::new(store, client, Arc::clone(&conf));
            downloader.drain_queue().await
        })
    })();

    exit(res);
}

// trash

fn trash_command() -> Command {
    apply_common_flags(
        Command::new("trash")
            .description("Delete cloud-side recordings for a day once every peer has them")
            .usage("recvault-cli trash --trash <N> --config <CONFIG_PATH>")
            .flag(Flag::new("trash", FlagType::Int).description("trash meetings recorded N days ago"))
            .action(trash_action),
    )
}

fn trash_action(c: &Context) {
    let res = (|| -> anyhow::Result<()> {
        let conf = load_conf(c)?;

        // -1 is the "not set" sentinel; 0 is allowed and means today.
        let days = i64::try_from(c.int_flag("trash").unwrap_or(-1)).context("invalid --trash value")?;
        anyhow::ensure!(days != -1, "'--trash' option (days) is not set");

        run(&Arc::clone(&conf), move |mut shutdown_signal| async move {
            let client = build_client(&conf, shutdown_signal.clone());

            let job = CleanupJob::new(
                client,
                conf.instances.clone(),
                conf.access_key_salt.clone(),
                conf.client.delete_downloaded,
            );

            job.run(days, &mut shutdown_signal).await
        })
    })();

    exit(res);
}

// cloudcap

fn cloudcap_command() -> Command {
    apply_common_flags(
        Command::new("cloudcap")
            .description("Delete cloud-side recordings over the configured capacity limit")
            .usage("recvault-cli cloudcap --config <CONFIG_PATH>")
            .action(cloudcap_action),
    )
}

fn cloudcap_action(c: &Context) {
    let res = (|| -> anyhow::Result<()> {
        let conf = load_conf(c)?;

        run(&Arc::clone(&conf), move |shutdown_signal| async move {
            let client = build_client(&conf, shutdown_signal);

            let today = chrono::Local::now().date_naive().to_string();
            match client.cloud_storage_report(&today, &today).await {
                Ok(report) => {
                    for entry in &report.cloud_recording_storage {
                        info!(date = %entry.date, usage = %entry.usage, free = %entry.free_usage, "Cloud storage usage");
                    }
                }
                Err(e) => warn!(error = format!("{e:#}"), "Failed to fetch the cloud storage report"),
            }

            let deleted = client
                .delete_over_capacity(FileSize(conf.client.cloud_capacity_hard_limit))
                .await?;

            info!(deleted, "Cloud capacity sweep finished");
            Ok(())
        })
    })();

    exit(res);
}

// check

fn check_command() -> Command {
    apply_common_flags(
        Command::new("check")
            .description("Audit the filesystem against the store for downloaded records")
            .usage("recvault-cli check --config <CONFIG_PATH>")
            .action(check_action),
    )
}

fn check_action(c: &Context) {
    let res = (|| -> anyhow::Result<()> {
        let conf = load_conf(c)?;

        run(&Arc::clone(&conf), move |_shutdown_signal| async move {
            let store = storage::load_store(&conf.storage).await?;

            let report = check::check_consistency(&store).await?;

            anyhow::ensure!(
                report.is_clean(),
                "consistency check failed: {} problems out of {} records",
                report.problems.len(),
                report.checked,
            );

            info!(checked = report.checked, "Consistency check OK");
            Ok(())
        })
    })();

    exit(res);
}
