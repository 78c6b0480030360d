#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]

#[macro_use]
extern crate tracing;

mod service;

use anyhow::Context as _;
use camino::Utf8PathBuf;

use crate::service::RecvaultService;

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args();
    let executable = args.next().context("executable name is missing from the environment")?;

    let mut config_path = Utf8PathBuf::from("config.yml");
    let mut dbg = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                config_path = args
                    .next()
                    .context("missing value for --config")?
                    .into();
            }
            "--dbg" => dbg = true,
            "--help" | "-h" => {
                println!(
                    r#"HELP:

    Run:
        "{executable}"

    Options:
        --config <CONFIG_PATH>   yaml config file name (default: config.yml)
        --dbg                    show debug info
"#
                );
                return Ok(());
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }

    let mut conf = recvault::config::Conf::load_from_file(&config_path)
        .context("unable to initialize configuration")?;
    if dbg {
        conf.dbg = true;
    }

    let mut service = RecvaultService::load(conf).context("service loading failed")?;

    service.start()?;

    // Waiting for some stop signal (CTRL-C…)
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()
        .context("failed to build the async runtime")?;
    rt.block_on(build_signals_fut())?;

    service.stop();

    Ok(())
}

#[cfg(unix)]
async fn build_signals_fut() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate_signal = signal(SignalKind::terminate()).context("failed to create terminate signal stream")?;
    let mut quit_signal = signal(SignalKind::quit()).context("failed to create quit signal stream")?;
    let mut interrupt_signal = signal(SignalKind::interrupt()).context("failed to create interrupt signal stream")?;

    futures::future::select_all(vec![
        Box::pin(terminate_signal.recv()),
        Box::pin(quit_signal.recv()),
        Box::pin(interrupt_signal.recv()),
    ])
    .await;

    Ok(())
}

#[cfg(not(unix))]
async fn build_signals_fut() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await.context("CTRL_C signal failed")
}
