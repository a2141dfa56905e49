//! TransferEngine: sole coordinator of all transfer logic.
//!
//! The engine runs as a single actor task, driven by [`EngineCommand`]s
//! from the cloneable [`EngineHandle`] — UI requests and inbound channel
//! traffic both arrive on the same mailbox, so there is exactly one logical
//! thread of control mutating transfer state. No ambient globals: the
//! engine owns the queue and the single active slot outright.
//!
//! **Architecture rule**: no transfer logic may exist outside this module.
//! The connection layer delivers raw [`ChannelEvent`]s; the presentation
//! layer renders what the [`Presenter`] callbacks tell it. All coordination
//! happens here.
//!
//! Exactly one transfer (upload XOR download) is active at a time. Uploads
//! queue FIFO and are executed by a spawned driver task; downloads are
//! peer-initiated and claim the active slot directly on `Header`.

use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::channel::{ChannelEvent, TransferChannel};
use crate::core::config::{BUFFER_LIMIT, CANCEL_FLUSH_DELAY, CHUNK_SIZE, DRAIN_POLL_INTERVAL};
use crate::core::heartbeat;
use crate::core::io::{FileSink, FileSource, SinkProvider};
use crate::core::presenter::Presenter;
use crate::core::protocol::ControlMessage;
use crate::core::queue::TransferQueue;
use crate::core::task::{percent, Direction, ProgressMeter, TaskStatus, TransferTask};
use crate::utils::sos::SignalOfStop;

// ── Commands ─────────────────────────────────────────────────────────────────

/// Everything that can make the engine act, serialized onto one mailbox.
pub enum EngineCommand {
    /// Queue a new upload task.
    Enqueue {
        id: Uuid,
        name: String,
        size: u64,
        source: Box<dyn FileSource>,
    },
    /// Abort a task: cancels it if active, removes it if still waiting.
    Cancel { id: Uuid },
    /// Remove a waiting task from the queue (rejected for active/terminal).
    Remove { id: Uuid },
    /// Inbound channel traffic or lifecycle.
    Channel(ChannelEvent),
    /// The upload driver finished (internal).
    UploadFinished { id: Uuid, outcome: UploadOutcome },
    /// Delayed slot release after an upload-side cancel (internal).
    ClearSlot { id: Uuid },
    /// End the session: send `Bye`, stop the heartbeat, abandon any active
    /// transfer, and exit the actor loop.
    Shutdown,
}

/// Terminal report from the upload driver task.
#[derive(Debug)]
pub enum UploadOutcome {
    Done,
    Cancelled,
    Failed(anyhow::Error),
}

/// Who initiated a cancellation — decides whether we owe the peer a
/// `Cancel` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CancelOrigin {
    Local,
    Remote,
}

// ── Active slot ──────────────────────────────────────────────────────────────

enum ActiveKind {
    /// Upload driver running; the token is its cancel capability.
    Upload { sos: SignalOfStop },
    /// Inbound stream; the sink and sampling state live in the slot.
    Download {
        sink: Box<dyn FileSink>,
        meter: ProgressMeter,
    },
}

/// The single active-transfer slot, shared by both directions.
struct ActiveSlot {
    id: Uuid,
    kind: ActiveKind,
}

// ── Handle ───────────────────────────────────────────────────────────────────

/// Cloneable public surface of the engine actor.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineCommand>,
    session: SignalOfStop,
}

impl EngineHandle {
    /// Queue a file for upload, returning the new task's id. The transfer
    /// starts as soon as the engine is idle and everything queued ahead of
    /// it has finished.
    pub fn enqueue_upload(&self, name: String, size: u64, source: Box<dyn FileSource>) -> Uuid {
        let id = Uuid::new_v4();
        let _ = self.tx.send(EngineCommand::Enqueue {
            id,
            name,
            size,
            source,
        });
        id
    }

    /// Cancel a task by id: aborts it if active, removes it if waiting.
    pub fn cancel(&self, id: Uuid) {
        let _ = self.tx.send(EngineCommand::Cancel { id });
    }

    /// Remove a waiting task from the queue.
    pub fn remove(&self, id: Uuid) {
        let _ = self.tx.send(EngineCommand::Remove { id });
    }

    /// Feed an inbound channel event to the engine. The connection layer
    /// must call this in transport delivery order.
    pub fn channel_event(&self, event: ChannelEvent) {
        let _ = self.tx.send(EngineCommand::Channel(event));
    }

    /// End the session gracefully.
    pub fn shutdown(&self) {
        let _ = self.tx.send(EngineCommand::Shutdown);
    }

    /// Session-level cancellation token; cancelled when the session ends.
    pub fn session(&self) -> SignalOfStop {
        self.session.clone()
    }
}

// ── TransferEngine ───────────────────────────────────────────────────────────

pub struct TransferEngine {
    channel: Arc<dyn TransferChannel>,
    sinks: Arc<dyn SinkProvider>,
    presenter: Arc<dyn Presenter>,
    queue: TransferQueue,
    active: Option<ActiveSlot>,
    rx: mpsc::UnboundedReceiver<EngineCommand>,
    /// Sender side of the mailbox, cloned into driver tasks and delayed
    /// reschedules.
    tx: mpsc::UnboundedSender<EngineCommand>,
    session: SignalOfStop,
    heartbeat_running: bool,
}

impl TransferEngine {
    pub fn new(
        channel: Arc<dyn TransferChannel>,
        sinks: Arc<dyn SinkProvider>,
        presenter: Arc<dyn Presenter>,
    ) -> (Self, EngineHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = SignalOfStop::new();
        let handle = EngineHandle {
            tx: tx.clone(),
            session: session.clone(),
        };
        (
            Self {
                channel,
                sinks,
                presenter,
                queue: TransferQueue::new(),
                active: None,
                rx,
                tx,
                session,
                heartbeat_running: false,
            },
            handle,
        )
    }

    /// Run the actor loop until `Shutdown`. The engine keeps its own sender
    /// for driver tasks, so the mailbox never closes on its own.
    pub async fn run(mut self) {
        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                EngineCommand::Enqueue {
                    id,
                    name,
                    size,
                    source,
                } => self.enqueue(id, name, size, source),
                EngineCommand::Cancel { id } => self.cancel(id),
                EngineCommand::Remove { id } => self.remove(id),
                EngineCommand::Channel(event) => self.handle_channel_event(event).await,
                EngineCommand::UploadFinished { id, outcome } => {
                    self.upload_finished(id, outcome);
                }
                EngineCommand::ClearSlot { id } => {
                    if self.active.as_ref().is_some_and(|s| s.id == id) {
                        self.active = None;
                        self.schedule_next();
                    }
                }
                EngineCommand::Shutdown => {
                    info!(event = "engine_shutdown", "Shutting down transfer engine");
                    let _ = self.channel.send_control(&ControlMessage::Bye);
                    self.abandon_active().await;
                    self.session.cancel();
                    return;
                }
            }
        }
    }

    // ── Queue operations ─────────────────────────────────────────────────

    fn enqueue(&mut self, id: Uuid, name: String, size: u64, source: Box<dyn FileSource>) {
        let task = TransferTask::upload(id, name, size, source);
        info!(event = "task_enqueued", task_id = %task.id, name = %task.name, size = task.size, "Upload queued");
        self.presenter
            .task_created(task.id, &task.name, task.size, Direction::Upload);
        self.queue.push(task);
        self.schedule_next();
    }

    fn remove(&mut self, id: Uuid) {
        if self.queue.remove_waiting(id) {
            info!(event = "task_removed", task_id = %id, "Waiting task removed from queue");
            self.presenter.task_removed(id);
        } else {
            debug!(event = "task_remove_rejected", task_id = %id, "Remove rejected: task not waiting");
        }
    }

    /// Idempotent scheduler: start the first waiting upload iff the active
    /// slot is free. Safe to call at any point.
    fn schedule_next(&mut self) {
        if self.active.is_some() {
            return;
        }
        let Some(id) = self.queue.next_waiting() else {
            return;
        };
        let task = self.queue.get_mut(id).expect("waiting task just found");
        task.status = TaskStatus::Active;
        let source = task
            .source
            .take()
            .expect("waiting upload always holds its source");
        let (name, size) = (task.name.clone(), task.size);

        info!(event = "upload_started", task_id = %id, name = %name, size, "Upload activated");
        self.presenter.status_changed(id, TaskStatus::Active);

        let sos = SignalOfStop::new();
        self.active = Some(ActiveSlot {
            id,
            kind: ActiveKind::Upload { sos: sos.clone() },
        });
        debug_assert!(self.queue.active_count() <= 1);

        let channel = Arc::clone(&self.channel);
        let presenter = Arc::clone(&self.presenter);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let outcome = drive_upload(id, &name, size, source, channel, presenter, sos).await;
            let _ = tx.send(EngineCommand::UploadFinished { id, outcome });
        });
    }

    // ── Cancellation ─────────────────────────────────────────────────────

    fn cancel(&mut self, id: Uuid) {
        if self.active.as_ref().is_some_and(|s| s.id == id) {
            self.cancel_active(CancelOrigin::Local);
        } else {
            // Cancelling a task that never started is a removal.
            self.remove(id);
        }
    }

    /// Cancel the task in the active slot. Idempotent: a task already in a
    /// terminal state is left alone, so racing local and remote cancels
    /// produce exactly one transition and at most one outbound `Cancel`.
    fn cancel_active(&mut self, origin: CancelOrigin) {
        let Some(slot) = self.active.as_mut() else {
            return;
        };
        let id = slot.id;
        let Some(task) = self.queue.get_mut(id) else {
            error!(event = "active_task_missing", task_id = %id, "Active slot points at unknown task");
            self.active = None;
            return;
        };
        if task.status.is_terminal() {
            debug!(event = "cancel_ignored", task_id = %id, "Task already terminal");
            return;
        }

        task.status = TaskStatus::Cancelled;
        info!(event = "transfer_cancelled", task_id = %id, origin = ?origin, "Transfer cancelled");

        if origin == CancelOrigin::Local {
            // Tell the peer to stop its side. Sent before the slot is
            // released so no later Header can overtake it on the channel.
            if let Err(e) = self.channel.send_control(&ControlMessage::Cancel { id }) {
                warn!(event = "cancel_send_failed", task_id = %id, error = %e, "Could not notify peer of cancellation");
            }
        }

        match &mut slot.kind {
            ActiveKind::Upload { sos } => {
                sos.cancel();
                self.presenter.status_changed(id, TaskStatus::Cancelled);
                // Hold the slot busy for a moment so the Cancel control
                // message flushes ahead of the next task's Header.
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(CANCEL_FLUSH_DELAY).await;
                    let _ = tx.send(EngineCommand::ClearSlot { id });
                });
            }
            ActiveKind::Download { sink, .. } => {
                let mut sink = std::mem::replace(sink, Box::new(ClosedSink));
                tokio::spawn(async move { sink.abort().await });
                self.presenter.status_changed(id, TaskStatus::Cancelled);
                self.active = None;
                self.schedule_next();
            }
        }
    }

    // ── Upload completion ────────────────────────────────────────────────

    fn upload_finished(&mut self, id: Uuid, outcome: UploadOutcome) {
        if !self.active.as_ref().is_some_and(|s| s.id == id) {
            debug!(event = "stale_upload_outcome", task_id = %id, "Driver outcome for task no longer in the slot");
            return;
        }
        let Some(task) = self.queue.get_mut(id) else {
            self.active = None;
            return;
        };

        match outcome {
            UploadOutcome::Done => {
                if task.status.is_terminal() {
                    // Cancel raced the final chunk; the cancel decided.
                    return;
                }
                task.transferred = task.size;
                task.status = TaskStatus::Done;
                info!(event = "upload_complete", task_id = %id, name = %task.name, "Upload finished");
                self.presenter.status_changed(id, TaskStatus::Done);
                self.active = None;
                self.schedule_next();
            }
            UploadOutcome::Cancelled => {
                // The engine marked the task and scheduled the delayed slot
                // release when the cancel was processed; nothing left to do.
                debug!(event = "upload_driver_stopped", task_id = %id, "Driver observed cancellation");
            }
            UploadOutcome::Failed(e) => {
                if task.status.is_terminal() {
                    return;
                }
                task.status = TaskStatus::Error;
                warn!(event = "upload_failed", task_id = %id, name = %task.name, error = %e, "Upload failed on local I/O");
                self.presenter.status_changed(id, TaskStatus::Error);
                self.active = None;
                self.schedule_next();
            }
        }
    }

    // ── Inbound channel traffic ──────────────────────────────────────────

    async fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Open => {
                info!(event = "channel_open", "Data channel open");
                if !self.heartbeat_running {
                    self.heartbeat_running = true;
                    let _ = heartbeat::spawn(Arc::clone(&self.channel), self.session.clone());
                }
            }
            ChannelEvent::Closed => {
                info!(event = "channel_closed", "Data channel closed, session over");
                self.abandon_active().await;
                self.session.cancel();
            }
            ChannelEvent::Error(e) => {
                warn!(event = "channel_error", error = %e, "Data channel failed, session over");
                self.abandon_active().await;
                self.session.cancel();
            }
            ChannelEvent::Control(msg) => self.handle_control(msg).await,
            ChannelEvent::Binary(data) => self.handle_binary(data).await,
        }
    }

    async fn handle_control(&mut self, msg: ControlMessage) {
        match msg {
            ControlMessage::Ping => {
                debug!(event = "ping_received", "Peer heartbeat");
            }
            ControlMessage::Bye => {
                info!(event = "bye_received", "Peer ended the session");
                self.abandon_active().await;
                self.session.cancel();
            }
            ControlMessage::Header { id, name, size } => self.handle_header(id, name, size).await,
            ControlMessage::End { id } => self.handle_end(id).await,
            ControlMessage::Cancel { id } => {
                if self.active.as_ref().is_some_and(|s| s.id == id) {
                    self.cancel_active(CancelOrigin::Remote);
                } else {
                    debug!(event = "cancel_for_inactive_task", task_id = %id, "Ignoring cancel for non-current id");
                }
            }
        }
    }

    async fn handle_header(&mut self, id: Uuid, name: String, size: u64) {
        if self.active.is_some() {
            // The single active slot is taken. Decline the inbound
            // transfer explicitly so the peer's upload stops instead of
            // streaming into the void.
            warn!(event = "header_while_busy", task_id = %id, name = %name, "Declining inbound transfer: active slot occupied");
            let _ = self.channel.send_control(&ControlMessage::Cancel { id });
            return;
        }

        let sink = match self.sinks.create(&name, size).await {
            Ok(sink) => sink,
            Err(e) => {
                warn!(event = "sink_open_failed", task_id = %id, name = %name, error = %e, "Cannot open sink, declining inbound transfer");
                let _ = self.channel.send_control(&ControlMessage::Cancel { id });
                return;
            }
        };

        info!(event = "download_started", task_id = %id, name = %name, size, "Inbound transfer announced");
        let task = TransferTask::download(id, name, size);
        self.presenter
            .task_created(id, &task.name, size, Direction::Download);
        self.presenter.status_changed(id, TaskStatus::Active);
        self.queue.push(task);
        self.active = Some(ActiveSlot {
            id,
            kind: ActiveKind::Download {
                sink,
                meter: ProgressMeter::new(Instant::now()),
            },
        });
        debug_assert!(self.queue.active_count() <= 1);
    }

    async fn handle_binary(&mut self, data: Bytes) {
        let Some(slot) = self.active.as_mut() else {
            debug!(event = "orphan_binary_frame", len = data.len(), "Discarding binary frame with no active download");
            return;
        };
        let id = slot.id;
        let ActiveKind::Download { sink, meter } = &mut slot.kind else {
            debug!(event = "orphan_binary_frame", len = data.len(), "Discarding binary frame while uploading");
            return;
        };
        let Some(task) = self.queue.get_mut(id) else {
            return;
        };
        if task.status != TaskStatus::Active {
            return;
        }

        if task.transferred + data.len() as u64 > task.size {
            let err = anyhow!(
                "Peer sent {} bytes past the announced size {}",
                task.transferred + data.len() as u64 - task.size,
                task.size
            );
            self.fail_download(err).await;
            return;
        }

        if let Err(e) = sink.write(&data).await {
            self.fail_download(e).await;
            return;
        }
        task.transferred += data.len() as u64;
        meter.record(data.len());
        if let Some(s) = meter.sample(Instant::now(), task.transferred, task.size) {
            self.presenter.progress(id, s.percent);
            self.presenter.throughput(s.mbps);
        }
    }

    async fn handle_end(&mut self, id: Uuid) {
        if !self.active.as_ref().is_some_and(|s| s.id == id) {
            debug!(event = "end_for_inactive_task", task_id = %id, "Ignoring end for non-current id");
            return;
        }
        let slot = self.active.as_mut().expect("checked above");
        let ActiveKind::Download { sink, .. } = &mut slot.kind else {
            debug!(event = "end_for_upload", task_id = %id, "Ignoring end aimed at our own upload");
            return;
        };

        // A done transfer has moved every announced byte. An end arriving
        // short is as wrong as an oversized frame and fails the same way.
        let task = self.queue.get_mut(id).expect("active task is queued");
        if task.transferred < task.size {
            let err = anyhow!(
                "Peer ended transfer at {} of {} bytes",
                task.transferred,
                task.size
            );
            self.fail_download(err).await;
            return;
        }

        if let Err(e) = sink.close().await {
            self.fail_download(e).await;
            return;
        }
        let task = self.queue.get_mut(id).expect("active task is queued");
        task.status = TaskStatus::Done;
        info!(event = "download_complete", task_id = %id, name = %task.name, bytes = task.transferred, "Download finished");
        self.presenter.progress(id, percent(task.transferred, task.size));
        self.presenter.status_changed(id, TaskStatus::Done);
        self.active = None;
        self.schedule_next();
    }

    /// Local I/O fault on the active download: abort the sink, mark the
    /// task failed, move on. The fault is never propagated to the peer.
    async fn fail_download(&mut self, err: anyhow::Error) {
        let Some(slot) = self.active.take() else {
            return;
        };
        let id = slot.id;
        if let ActiveKind::Download { mut sink, .. } = slot.kind {
            sink.abort().await;
        }
        if let Some(task) = self.queue.get_mut(id) {
            task.status = TaskStatus::Error;
        }
        warn!(event = "download_failed", task_id = %id, error = %err, "Download failed on local I/O");
        self.presenter.status_changed(id, TaskStatus::Error);
        self.schedule_next();
    }

    /// Transport-level session end: stop local I/O for whatever is active
    /// without a status transition — the session is over, not the task.
    async fn abandon_active(&mut self) {
        if let Some(slot) = self.active.take() {
            info!(event = "task_abandoned", task_id = %slot.id, "Session ended with a transfer in flight");
            match slot.kind {
                ActiveKind::Upload { sos } => sos.cancel(),
                ActiveKind::Download { mut sink, .. } => sink.abort().await,
            }
        }
    }
}

/// Placeholder sink left behind when a download's real sink is moved out
/// for an async abort.
struct ClosedSink;

#[async_trait::async_trait]
impl FileSink for ClosedSink {
    async fn write(&mut self, _data: &[u8]) -> anyhow::Result<()> {
        Err(anyhow!("Sink detached"))
    }
    async fn close(&mut self) -> anyhow::Result<()> {
        Err(anyhow!("Sink detached"))
    }
    async fn abort(&mut self) {}
}

// ── Upload driver ────────────────────────────────────────────────────────────

/// Stream one file to the peer: header, chunks under backpressure, end.
///
/// Cancellation is observed at every suspension point — before each read,
/// during the drain poll, and before each send — so at most one in-flight
/// step completes after the token fires, and no frame is sent once the
/// engine has emitted the `Cancel` control message.
async fn drive_upload(
    id: Uuid,
    name: &str,
    size: u64,
    mut source: Box<dyn FileSource>,
    channel: Arc<dyn TransferChannel>,
    presenter: Arc<dyn Presenter>,
    sos: SignalOfStop,
) -> UploadOutcome {
    if let Err(e) = channel.send_control(&ControlMessage::Header {
        id,
        name: name.to_string(),
        size,
    }) {
        return UploadOutcome::Failed(e);
    }

    let mut offset = 0u64;
    let mut meter = ProgressMeter::new(Instant::now());

    while offset < size {
        if sos.cancelled() {
            return UploadOutcome::Cancelled;
        }

        let want = CHUNK_SIZE.min((size - offset) as usize);
        let chunk = tokio::select! {
            res = source.read_slice(offset, want) => match res {
                Ok(chunk) => chunk,
                Err(e) => return UploadOutcome::Failed(e),
            },
            _ = sos.wait() => return UploadOutcome::Cancelled,
        };
        if chunk.is_empty() {
            return UploadOutcome::Failed(anyhow!(
                "Source ended early at {} of {} bytes",
                offset,
                size
            ));
        }

        // Backpressure: never hand the transport more than BUFFER_LIMIT of
        // unflushed bytes. Poll-and-wait, re-checking cancellation each turn.
        while channel.buffered_amount() > BUFFER_LIMIT {
            if sos.cancelled() {
                return UploadOutcome::Cancelled;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
        if sos.cancelled() {
            return UploadOutcome::Cancelled;
        }

        let len = chunk.len();
        if let Err(e) = channel.send_binary(chunk) {
            return UploadOutcome::Failed(e);
        }
        offset += len as u64;
        meter.record(len);
        if let Some(s) = meter.sample(Instant::now(), offset, size) {
            presenter.progress(id, s.percent);
            presenter.throughput(s.mbps);
        }
    }

    if sos.cancelled() {
        return UploadOutcome::Cancelled;
    }
    if let Err(e) = channel.send_control(&ControlMessage::End { id }) {
        return UploadOutcome::Failed(e);
    }
    presenter.progress(id, 100);
    UploadOutcome::Done
}
