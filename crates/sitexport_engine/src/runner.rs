use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use export_logging::{export_error, export_info, export_warn};
use sitexport_core::ExportId;

use crate::events::EventSink;
use crate::job::ExportJob;
use crate::{ExportError, ExportEvent, JobOutcome};

enum RunnerCommand {
    Run { export: ExportId },
}

/// What an [`ExportRunner`] reports back.
#[derive(Debug, Clone, PartialEq)]
pub enum RunnerEvent {
    Export(ExportEvent),
    JobFinished {
        export: ExportId,
        outcome: Result<JobOutcome, String>,
    },
}

struct RunnerEventSink {
    tx: mpsc::Sender<RunnerEvent>,
}

impl EventSink for RunnerEventSink {
    fn emit(&self, event: ExportEvent) {
        let _ = self.tx.send(RunnerEvent::Export(event));
    }
}

/// Runs export jobs on a background thread, one at a time, and reports
/// their progress through a channel.
pub struct ExportRunner {
    cmd_tx: Option<mpsc::Sender<RunnerCommand>>,
    event_rx: mpsc::Receiver<RunnerEvent>,
    worker: Option<JoinHandle<()>>,
}

impl ExportRunner {
    /// `make_job` builds the job for each queued export id.
    pub fn new<F>(make_job: F) -> Self
    where
        F: Fn(ExportId) -> Result<ExportJob, ExportError> + Send + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();

        let worker = thread::spawn(move || {
            let runtime = match tokio::runtime::Runtime::new() {
                Ok(runtime) => runtime,
                Err(err) => {
                    export_error!("Failed to start export runtime: {}", err);
                    for RunnerCommand::Run { export } in cmd_rx {
                        let _ = event_tx.send(RunnerEvent::JobFinished {
                            export,
                            outcome: Err(format!("export runtime unavailable: {err}")),
                        });
                    }
                    return;
                }
            };
            while let Ok(command) = cmd_rx.recv() {
                match command {
                    RunnerCommand::Run { export } => {
                        let outcome = runtime.block_on(run_export(&make_job, export, &event_tx));
                        let _ = event_tx.send(RunnerEvent::JobFinished { export, outcome });
                    }
                }
            }
            export_info!("Export runner stopped");
        });

        Self {
            cmd_tx: Some(cmd_tx),
            event_rx,
            worker: Some(worker),
        }
    }

    /// Queues `export`. Returns `false` when the worker is gone and the
    /// export will never run.
    pub fn enqueue(&self, export: ExportId) -> bool {
        let sent = self
            .cmd_tx
            .as_ref()
            .is_some_and(|tx| tx.send(RunnerCommand::Run { export }).is_ok());
        if !sent {
            export_warn!(export = export; "Export runner is not running; export dropped");
        }
        sent
    }

    pub fn try_recv(&self) -> Option<RunnerEvent> {
        self.event_rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<RunnerEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }

    /// Lets queued jobs finish, then stops the worker thread.
    pub fn shutdown(mut self) {
        self.cmd_tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                export_error!("Export runner thread panicked");
            }
        }
    }
}

async fn run_export<F>(
    make_job: &F,
    export: ExportId,
    event_tx: &mpsc::Sender<RunnerEvent>,
) -> Result<JobOutcome, String>
where
    F: Fn(ExportId) -> Result<ExportJob, ExportError>,
{
    let sink = RunnerEventSink {
        tx: event_tx.clone(),
    };
    let mut job = make_job(export)
        .map_err(|err| err.to_string())?
        .with_events(Arc::new(sink));
    job.execute().await.map_err(|err| err.to_string())
}
