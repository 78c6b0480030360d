use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use recvault::api::HttpListenerTask;
use recvault::client::ZoomClient;
use recvault::config::Conf;
use recvault::download::{DownloadTask, Downloader};
use recvault::log::{self, LoggerGuard};
use recvault::selector::Selector;
use recvault::sync::{SyncTask, Syncer};
use recvault::task::{ChildTask, ShutdownHandle, ShutdownSignal, Task};
use recvault::{storage, AppState};
use tokio::runtime::{self, Runtime};

pub const SERVICE_NAME: &str = "recvault";

enum ServiceState {
    Stopped,
    Running {
        shutdown_handle: ShutdownHandle,
        runtime: Runtime,
    },
}

pub struct RecvaultService {
    conf: Arc<Conf>,
    state: ServiceState,
    _logger_guard: LoggerGuard,
}

impl RecvaultService {
    pub fn load(conf: Conf) -> anyhow::Result<Self> {
        let logger_guard =
            log::init(conf.log_file.as_deref(), log::default_filter(conf.dbg)).context("failed to setup logger")?;

        info!(version = env!("CARGO_PKG_VERSION"));

        if conf.dbg {
            warn!("**DEBUG OPTIONS ARE ENABLED, PLEASE DO NOT USE IN PRODUCTION**");
        }

        Ok(RecvaultService {
            conf: Arc::new(conf),
            state: ServiceState::Stopped,
            _logger_guard: logger_guard,
        })
    }

    pub fn start(&mut self) -> anyhow::Result<()> {
        let runtime = runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to create runtime")?;

        let conf = Arc::clone(&self.conf);

        // spawn_tasks needs to run in the runtime in order to bind the sockets.
        let tasks = runtime.block_on(spawn_tasks(conf))?;

        trace!("Tasks created");

        let mut join_all = futures::future::select_all(tasks.inner.into_iter().map(|child| Box::pin(child.join())));

        runtime.spawn(async {
            loop {
                let (result, _, rest) = join_all.await;

                match result {
                    Ok(Ok(())) => trace!("A task terminated gracefully"),
                    Ok(Err(error)) => error!(error = format!("{error:#}"), "A task failed"),
                    Err(error) => error!(%error, "Something went very wrong with a task"),
                }

                if rest.is_empty() {
                    break;
                } else {
                    join_all = futures::future::select_all(rest);
                }
            }
        });

        self.state = ServiceState::Running {
            shutdown_handle: tasks.shutdown_handle,
            runtime,
        };

        Ok(())
    }

    pub fn stop(&mut self) {
        match std::mem::replace(&mut self.state, ServiceState::Stopped) {
            ServiceState::Stopped => {
                info!("Attempted to stop {SERVICE_NAME}, but it’s already stopped");
            }
            ServiceState::Running {
                shutdown_handle,
                runtime,
            } => {
                info!("Stopping {SERVICE_NAME}");

                // Send shutdown signals to all tasks
                shutdown_handle.signal();

                runtime.block_on(async move {
                    tokio::select! {
                        _ = shutdown_handle.all_closed() => {
                            debug!("All tasks closed gracefully");
                        }
                        _ = tokio::time::sleep(Duration::from_secs(10)) => {
                            warn!("Some tasks didn’t terminate at all");
                        }
                    }
                });

                runtime.shutdown_timeout(Duration::from_secs(3));

                self.state = ServiceState::Stopped;
            }
        }
    }
}

struct Tasks {
    inner: Vec<ChildTask<anyhow::Result<()>>>,
    shutdown_handle: ShutdownHandle,
    shutdown_signal: ShutdownSignal,
}

impl Tasks {
    fn new() -> Self {
        let (shutdown_handle, shutdown_signal) = ShutdownHandle::new();

        Self {
            inner: Vec::new(),
            shutdown_handle,
            shutdown_signal,
        }
    }

    fn register<T>(&mut self, task: T)
    where
        T: Task<Output = anyhow::Result<()>> + 'static,
    {
        let child = recvault::task::spawn_task(task, self.shutdown_signal.clone());
        self.inner.push(child);
    }
}

async fn spawn_tasks(conf: Arc<Conf>) -> anyhow::Result<Tasks> {
    let mut tasks = Tasks::new();

    let store = storage::load_store(&conf.storage).await?;
    storage::recover_in_flight(&store).await?;

    let client = Arc::new(
        ZoomClient::builder()
            .conf(conf.client.clone())
            .shutdown_signal(tasks.shutdown_signal.clone())
            .build(),
    );

    tasks.register(HttpListenerTask {
        state: AppState {
            conf: Arc::clone(&conf),
            store: Arc::clone(&store),
        },
        listen: conf.listen,
    });

    if conf.sync_job {
        info!("Starting the sync driver");
        let syncer = Syncer::new(
            Arc::clone(&store),
            Arc::clone(&client),
            Selector::from_conf(&conf.syncable),
            conf.client.delete_skipped,
            conf.client.delete_downloaded,
        );
        tasks.register(SyncTask::new(Arc::clone(&client), syncer));
    }

    if conf.download_job {
        info!("Starting the download driver");
        let downloader = Downloader::new(Arc::clone(&store), Arc::clone(&client), Arc::clone(&conf));
        tasks.register(DownloadTask::new(downloader));
    }

    Ok(tasks)
}
