//! Runs the long-lived processes of the Application Server and shuts them
//! down together.
//!
//! Processes run concurrently until one of them fails, the cancellation
//! token is cancelled or SIGTERM/SIGINT is received. Closers then run
//! within a grace period, whatever the outcome.
//!
//! ```no_run
//! use runner::Runner;
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! Runner::new()
//!     .with_app_process("ticker", |token| async move {
//!         token.cancelled().await;
//!         Ok(())
//!     })
//!     .with_closer("flush", || async move { Ok(()) })
//!     .with_closer_timeout(Duration::from_secs(5))
//!     .run()
//!     .await
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

type BoxedResult = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// App process: runs until the token is cancelled.
pub type AppProcess = Box<dyn FnOnce(CancellationToken) -> BoxedResult + Send>;

/// Cleanup run after every process stopped.
pub type Closer = Box<dyn FnOnce() -> BoxedResult + Send>;

pub struct Runner {
    app_processes: Vec<(String, AppProcess)>,
    closers: Vec<(String, Closer)>,
    closer_timeout: Duration,
    cancellation_token: CancellationToken,
    handle_signals: bool,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    /// Runner with a 10 second closer timeout that listens for shutdown
    /// signals.
    pub fn new() -> Self {
        Self {
            app_processes: Vec::new(),
            closers: Vec::new(),
            closer_timeout: Duration::from_secs(10),
            cancellation_token: CancellationToken::new(),
            handle_signals: true,
        }
    }

    /// Adds a process. A process returning an error cancels all others.
    pub fn with_app_process<F, Fut>(mut self, name: impl Into<String>, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.app_processes
            .push((name.into(), Box::new(|token| Box::pin(process(token)))));
        self
    }

    /// Adds a closer. Closers run concurrently once every process stopped;
    /// a failing closer does not prevent the others from running.
    pub fn with_closer<F, Fut>(mut self, name: impl Into<String>, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.closers
            .push((name.into(), Box::new(|| Box::pin(closer()))));
        self
    }

    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    /// Uses `token` for cancellation, so callers can stop the runner.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Disables SIGTERM/SIGINT handling.
    pub fn without_signal_handlers(mut self) -> Self {
        self.handle_signals = false;
        self
    }

    /// Runs every process until shutdown, then the closers. Returns the
    /// first process error.
    pub async fn run(self) -> anyhow::Result<()> {
        let token = self.cancellation_token;
        let mut join_set = JoinSet::new();

        for (name, process) in self.app_processes {
            let process_token = token.clone();
            join_set.spawn(async move {
                debug!(process = %name, "app process started");
                (name, process(process_token).await)
            });
        }

        if self.handle_signals {
            spawn_signal_handlers(token.clone());
        }

        let mut first_error = None;
        loop {
            let result = tokio::select! {
                _ = token.cancelled() => break,
                result = join_set.join_next() => result,
            };
            match result {
                None => break,
                Some(Ok((name, Ok(())))) => debug!(process = %name, "app process completed"),
                Some(Ok((name, Err(err)))) => {
                    error!(process = %name, error = %format!("{:#}", err), "app process failed");
                    first_error = Some(err.context(format!("process `{}` failed", name)));
                    token.cancel();
                }
                Some(Err(err)) => {
                    error!(error = %err, "app process panicked");
                    first_error = Some(anyhow::anyhow!("app process panicked: {}", err));
                    token.cancel();
                }
            }
        }

        // Processes observe the cancellation; give them the grace period to
        // return before they are aborted.
        token.cancel();
        let drained = tokio::time::timeout(self.closer_timeout, async {
            while join_set.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            error!(timeout = ?self.closer_timeout, "app processes did not stop in time, aborting");
            join_set.shutdown().await;
        }

        if !self.closers.is_empty() {
            info!(timeout = ?self.closer_timeout, "running closers");
            match tokio::time::timeout(self.closer_timeout, run_closers(self.closers)).await {
                Ok(()) => info!("all closers completed"),
                Err(_) => error!(timeout = ?self.closer_timeout, "closers timed out"),
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => {
                info!("application stopped");
                Ok(())
            }
        }
    }
}

fn spawn_signal_handlers(token: CancellationToken) {
    let interrupt_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received SIGINT");
                interrupt_token.cancel();
            }
            Err(err) => error!(error = %err, "failed to listen for SIGINT"),
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("received SIGTERM");
                token.cancel();
            }
            Err(err) => error!(error = %err, "failed to listen for SIGTERM"),
        }
    });
}

async fn run_closers(closers: Vec<(String, Closer)>) {
    let mut closer_set = JoinSet::new();
    for (name, closer) in closers {
        closer_set.spawn(async move { (name, closer().await) });
    }

    while let Some(result) = closer_set.join_next().await {
        match result {
            Ok((name, Ok(()))) => debug!(closer = %name, "closer completed"),
            Ok((name, Err(err))) => {
                error!(closer = %name, error = %format!("{:#}", err), "closer failed")
            }
            Err(err) => error!(error = %err, "closer panicked"),
        }
    }
}
