use std::future::Future;
use std::thread::JoinHandle;

use strata_error::{StrataResult, strata_bail, strata_err};
use tokio::task::LocalSet;

trait TokioSpawn {
    fn spawn(self: Box<Self>);
}

/// Runs async object-store calls on a dedicated Tokio `current_thread` runtime so the
/// single-threaded pull runtime can block on them.
pub struct IoDispatcher {
    submitter: Option<flume::Sender<Box<dyn TokioSpawn + Send>>>,
    thread: Option<JoinHandle<()>>,
}

impl IoDispatcher {
    pub fn new() -> StrataResult<Self> {
        let (submitter, rx) = flume::unbounded::<Box<dyn TokioSpawn + Send>>();
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let thread = std::thread::Builder::new()
            .name("strata-io-dispatch".to_string())
            .spawn(move || {
                rt.block_on(async move {
                    LocalSet::new()
                        .run_until(async {
                            while let Ok(task) = rx.recv_async().await {
                                task.spawn();
                            }
                        })
                        .await;
                });
            })?;
        Ok(Self {
            submitter: Some(submitter),
            thread: Some(thread),
        })
    }

    /// Run `task` on the IO runtime and block the calling thread until it completes.
    pub fn block_on<F, Fut, R>(&self, task: F) -> StrataResult<R>
    where
        F: (FnOnce() -> Fut) + Send + 'static,
        Fut: Future<Output = R> + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = flume::bounded(1);
        let Some(submitter) = self.submitter.as_ref() else {
            strata_bail!("dispatcher is shut down");
        };
        if let Err(err) = submitter.send(Box::new(TokioTask { task, result: tx })) {
            strata_bail!("dispatcher error spawning task: {err}");
        }
        rx.recv()
            .map_err(|_| strata_err!("dispatcher task dropped before completing"))
    }
}

impl Drop for IoDispatcher {
    fn drop(&mut self) {
        // Dropping the submitter ends the worker loop.
        self.submitter.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::warn!("io dispatcher thread panicked");
            }
        }
    }
}

struct TokioTask<F, R> {
    task: F,
    result: flume::Sender<R>,
}

impl<F, Fut, R> TokioSpawn for TokioTask<F, R>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = R> + 'static,
    R: Send + 'static,
{
    fn spawn(self: Box<Self>) {
        let TokioTask { task, result } = *self;
        tokio::task::spawn_local(async move {
            let output = task().await;
            result.send(output).ok();
        });
    }
}
