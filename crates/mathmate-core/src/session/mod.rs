pub mod log;
pub mod render;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::artifact::{remove_file_if_exists, Artifact, ArtifactSnapshot, SessionLayout};
use crate::config::MathmateConfig;
use crate::error::{MathmateError, Result};
use crate::kernel::{Kernel, KernelConnector, KernelError, NotificationSender, Packet};

pub use log::ArtifactLog;

/// Lifecycle of a session: `Open -> Evaluating -> Open -> ... -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Evaluating,
    Closed,
}

/// Runtime knobs taken from [`MathmateConfig`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub image_width: u32,
    pub image_height: u32,
    pub image_extension: String,
    pub last_output_symbol: String,
    pub evaluate_timeout: Option<Duration>,
    pub notification_capacity: usize,
}

impl SessionOptions {
    pub fn from_config(config: &MathmateConfig) -> Self {
        Self {
            image_width: config.image.width,
            image_height: config.image.height,
            image_extension: config.image.extension.clone(),
            last_output_symbol: config.kernel.last_output_symbol.clone(),
            evaluate_timeout: config.kernel.evaluate_timeout(),
            notification_capacity: config.kernel.notification_capacity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EvalMode {
    /// Capture an image only when the result is graphical.
    Auto,
    /// Always try the image first.
    Image,
}

/// The kernel together with the queue its notifications land in.
struct KernelLink {
    kernel: Box<dyn Kernel>,
    packets: mpsc::Receiver<Packet>,
}

/// Whether a trailing terminator silences the expression's result.
pub fn is_silenced(expression: &str) -> bool {
    expression.trim().ends_with(';')
}

/// One evaluation session: the artifact log, its cache folder, and the kernel link.
///
/// Evaluations are serialized on the kernel link. Renders are serialized on
/// the transcript slot and only hold the log lock while assembling markup,
/// so a render can run while an evaluation waits on the kernel.
///
/// After a transport failure the kernel may still owe a late answer, so
/// evaluations and symbol queries are refused until [`Session::reconnect`]
/// succeeds. Render, release and close keep working.
pub struct Session {
    layout: SessionLayout,
    options: SessionOptions,
    connector: Arc<dyn KernelConnector>,
    link: Mutex<KernelLink>,
    log: Mutex<ArtifactLog>,
    transcript: Mutex<Option<PathBuf>>,
    state: StdMutex<SessionState>,
    reliable: AtomicBool,
}

impl Session {
    /// Connect to the kernel, discard its banner, and prepare a clean session folder.
    pub async fn open(
        session_id: &str,
        config: &MathmateConfig,
        connector: Arc<dyn KernelConnector>,
    ) -> Result<Self> {
        validate_session_id(session_id)?;
        let options = SessionOptions::from_config(config);

        let mut link = connect(connector.as_ref(), options.notification_capacity).await?;

        let layout = SessionLayout::new(&config.cache, session_id);
        if let Err(e) = layout.prepare() {
            link.kernel.close().await;
            return Err(e);
        }

        info!(session_id, folder = %layout.folder().display(), "session opened");
        Ok(Self {
            layout,
            options,
            connector,
            link: Mutex::new(link),
            log: Mutex::new(ArtifactLog::new()),
            transcript: Mutex::new(None),
            state: StdMutex::new(SessionState::Open),
            reliable: AtomicBool::new(true),
        })
    }

    pub fn id(&self) -> &str {
        self.layout.session_id()
    }

    pub fn folder(&self) -> &Path {
        self.layout.folder()
    }

    pub fn layout(&self) -> &SessionLayout {
        &self.layout
    }

    pub fn state(&self) -> SessionState {
        *self.lock_state()
    }

    /// False after a transport failure, until the next successful reconnect.
    pub fn is_reliable(&self) -> bool {
        self.reliable.load(Ordering::SeqCst)
    }

    /// Path of the current transcript, if one has been rendered.
    pub async fn transcript(&self) -> Option<PathBuf> {
        self.transcript.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.log.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.log.lock().await.is_empty()
    }

    /// The group the next evaluation's artifacts will carry.
    pub async fn group(&self) -> u32 {
        self.log.lock().await.group()
    }

    pub async fn snapshot(&self) -> Vec<ArtifactSnapshot> {
        self.log
            .lock()
            .await
            .artifacts()
            .iter()
            .map(ArtifactSnapshot::from)
            .collect()
    }

    /// Evaluate an expression, logging its input, notifications, and result.
    ///
    /// Graphical results are additionally captured as an image, which
    /// subdues the textual result.
    pub async fn evaluate(&self, expression: &str) -> Result<()> {
        self.run(expression, EvalMode::Auto).await
    }

    /// Like [`Session::evaluate`], but always tries to capture an image.
    /// Without image bytes the result is logged as plain text.
    pub async fn evaluate_as_image(&self, expression: &str) -> Result<()> {
        self.run(expression, EvalMode::Image).await
    }

    async fn run(&self, expression: &str, mode: EvalMode) -> Result<()> {
        self.begin_evaluation()?;
        let outcome = if expression.trim().is_empty() {
            Err(MathmateError::InvalidExpression(
                "expression is empty".into(),
            ))
        } else {
            self.evaluate_in_turn(expression, mode).await
        };
        self.end_evaluation();

        if let Err(e) = &outcome {
            self.note_failure(e);
        }
        outcome
    }

    async fn evaluate_in_turn(&self, expression: &str, mode: EvalMode) -> Result<()> {
        let mut link = self.link.lock().await;

        let group = {
            let mut log = self.log.lock().await;
            let group = log.group();
            log.push(Artifact::input(group, expression));
            group
        };
        info!(session_id = self.id(), group, ?mode, "evaluating expression");

        let outcome = self.exchange(&mut link, group, expression, mode).await;

        // The group closes even when the kernel failed, so every call owns one group.
        let mut log = self.log.lock().await;
        log.absorb(&mut link.packets);
        log.advance();
        debug!(session_id = self.id(), group, ok = outcome.is_ok(), "evaluation finished");
        outcome
    }

    async fn exchange(
        &self,
        link: &mut KernelLink,
        group: u32,
        expression: &str,
        mode: EvalMode,
    ) -> Result<()> {
        let KernelLink { kernel, packets } = link;
        let log = Some(&self.log);

        let request = format!("{} = {}", self.options.last_output_symbol, expression);
        let value = self.drive(packets, log, kernel.evaluate(&request)).await?;

        // Notifications arrive strictly before the answer they led up to.
        self.log.lock().await.absorb(packets);

        let mut capture_error = None;
        if !is_silenced(expression) {
            let mut result = Artifact::result(group, value);
            let want_image = match mode {
                EvalMode::Image => true,
                EvalMode::Auto => result.is_graphical_result()?,
            };

            if want_image {
                let data = self
                    .drive(
                        packets,
                        log,
                        kernel.evaluate_to_image(
                            &self.options.last_output_symbol,
                            self.options.image_width,
                            self.options.image_height,
                        ),
                    )
                    .await?;
                self.log.lock().await.absorb(packets);

                match data {
                    Some(bytes) => match Artifact::image(
                        &self.layout,
                        group,
                        &bytes,
                        &self.options.image_extension,
                    ) {
                        Ok(image) => {
                            self.log.lock().await.push(image);
                            result.suppress();
                        }
                        Err(e) => {
                            warn!(group, error = %e, "failed to store image, keeping textual result");
                            capture_error = Some(e);
                        }
                    },
                    None => debug!(group, "no image returned, keeping textual result"),
                }
            }
            self.log.lock().await.push(result);
        }

        self.drive(packets, log, kernel.new_packet()).await?;
        match capture_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Rebuild the transcript from the full log and publish it as a new file.
    ///
    /// The new file is written before the previous one is deleted, so at most
    /// one transcript is current at any time.
    pub async fn render(&self) -> Result<PathBuf> {
        self.ensure_not_closed()?;
        let mut current = self.transcript.lock().await;
        // Close may have released everything while this render waited.
        self.ensure_not_closed()?;

        let body = {
            let log = self.log.lock().await;
            render::render_body(self.id(), log.artifacts())
        };
        let page = self.layout.apply_template(&body)?;

        let path = self
            .layout
            .named_file(&SessionLayout::unique_name("html"));
        tokio::fs::write(&path, page)
            .await
            .map_err(|e| MathmateError::fs(&path, e))?;

        if let Some(previous) = current.replace(path.clone()) {
            remove_file_if_exists(&previous)?;
        }
        info!(session_id = self.id(), path = %path.display(), "transcript rendered");
        Ok(path)
    }

    /// Delete the transcript and every artifact's backing file, then clear the log.
    ///
    /// The kernel link and the session folder stay in place.
    pub async fn release(&self) -> Result<()> {
        match self.state() {
            SessionState::Open => self.release_resources().await,
            SessionState::Evaluating => Err(MathmateError::IllegalState(
                "cannot release while an evaluation is in flight".into(),
            )),
            SessionState::Closed => Err(self.closed_error()),
        }
    }

    async fn release_resources(&self) -> Result<()> {
        let mut first_error = None;

        if let Some(path) = self.transcript.lock().await.take() {
            if let Err(e) = remove_file_if_exists(&path) {
                first_error.get_or_insert(e);
            }
        }

        let artifacts = self.log.lock().await.take_all();
        let count = artifacts.len();
        for artifact in artifacts {
            if let Err(e) = artifact.release() {
                warn!(session_id = self.id(), error = %e, "failed to release artifact");
                first_error.get_or_insert(e);
            }
        }

        info!(session_id = self.id(), artifacts = count, "session resources released");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Close the kernel, release all resources, and remove the session folder.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.lock_state();
            if *state == SessionState::Closed {
                return Err(self.closed_error());
            }
            *state = SessionState::Closed;
        }

        // Waits for an in-flight evaluation to finish with the link.
        self.link.lock().await.kernel.close().await;
        self.release_resources().await?;
        self.layout.remove_folder()?;
        info!(session_id = self.id(), "session closed");
        Ok(())
    }

    /// Replace the kernel link with a fresh connection. The log is untouched.
    pub async fn reconnect(&self) -> Result<()> {
        self.ensure_not_closed()?;
        let mut link = self.link.lock().await;
        link.kernel.close().await;

        match connect(self.connector.as_ref(), self.options.notification_capacity).await {
            Ok(fresh) => {
                *link = fresh;
                self.reliable.store(true, Ordering::SeqCst);
                info!(session_id = self.id(), "kernel reconnected");
                Ok(())
            }
            Err(e) => {
                self.reliable.store(false, Ordering::SeqCst);
                warn!(session_id = self.id(), error = %e, "kernel reconnect failed");
                Err(e.into())
            }
        }
    }

    /// Names of every symbol on the kernel's context path, for completion.
    pub async fn symbol_names(&self) -> Result<Vec<String>> {
        self.ensure_not_closed()?;
        self.ensure_reliable()?;
        let outcome = self.query_symbol_names().await;
        if let Err(e) = &outcome {
            self.note_failure(e);
        }
        outcome
    }

    async fn query_symbol_names(&self) -> Result<Vec<String>> {
        let mut link = self.link.lock().await;
        let KernelLink { kernel, packets } = &mut *link;

        // Chatter from these queries belongs to no evaluation.
        let contexts = self
            .drive(packets, None, kernel.evaluate("$ContextPath"))
            .await?;

        let mut names = Vec::new();
        for context in contexts.args().iter().filter_map(|c| c.as_str()) {
            let query = format!("Names[\"{context}*\"]");
            let symbols = self.drive(packets, None, kernel.evaluate(&query)).await?;
            names.extend(
                symbols
                    .args()
                    .iter()
                    .filter_map(|s| s.as_str().map(str::to_string)),
            );
        }

        while let Ok(packet) = packets.try_recv() {
            debug!(kind = packet.kind().name(), "discarding packet from symbol query");
        }
        Ok(names)
    }

    /// Run one kernel request under the operator timeout, moving notifications
    /// into `log` as they arrive so the bounded queue never stalls the kernel.
    /// Without a log the notifications are discarded.
    async fn drive<T, F>(
        &self,
        packets: &mut mpsc::Receiver<Packet>,
        log: Option<&Mutex<ArtifactLog>>,
        request: F,
    ) -> std::result::Result<T, KernelError>
    where
        F: Future<Output = std::result::Result<T, KernelError>>,
    {
        let request = self.timed(request);
        tokio::pin!(request);
        loop {
            tokio::select! {
                biased;
                Some(packet) = packets.recv() => match log {
                    Some(log) => log.lock().await.record(packet),
                    None => debug!(kind = packet.kind().name(), "discarding kernel packet"),
                },
                outcome = &mut request => return outcome,
            }
        }
    }

    async fn timed<T, F>(&self, request: F) -> std::result::Result<T, KernelError>
    where
        F: Future<Output = std::result::Result<T, KernelError>>,
    {
        match self.options.evaluate_timeout {
            Some(limit) => tokio::time::timeout(limit, request)
                .await
                .map_err(|_| KernelError::TimedOut {
                    seconds: limit.as_secs(),
                })?,
            None => request.await,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn closed_error(&self) -> MathmateError {
        MathmateError::Closed {
            session_id: self.id().to_string(),
        }
    }

    fn ensure_not_closed(&self) -> Result<()> {
        if self.state() == SessionState::Closed {
            return Err(self.closed_error());
        }
        Ok(())
    }

    fn ensure_reliable(&self) -> Result<()> {
        if !self.is_reliable() {
            return Err(MathmateError::IllegalState(
                "kernel link is unreliable, reconnect before sending more requests".into(),
            ));
        }
        Ok(())
    }

    fn begin_evaluation(&self) -> Result<()> {
        let mut state = self.lock_state();
        match *state {
            SessionState::Open => {
                self.ensure_reliable()?;
                *state = SessionState::Evaluating;
                Ok(())
            }
            SessionState::Evaluating => Err(MathmateError::IllegalState(
                "an evaluation is already in flight".into(),
            )),
            SessionState::Closed => Err(self.closed_error()),
        }
    }

    fn end_evaluation(&self) {
        let mut state = self.lock_state();
        if *state == SessionState::Evaluating {
            *state = SessionState::Open;
        }
    }

    fn note_failure(&self, error: &MathmateError) {
        if let MathmateError::Transport(e) = error {
            warn!(session_id = self.id(), error = %e, "kernel transport failed, session unreliable");
            self.reliable.store(false, Ordering::SeqCst);
        }
    }
}

async fn connect(
    connector: &dyn KernelConnector,
    capacity: usize,
) -> std::result::Result<KernelLink, KernelError> {
    let (notifications, packets) = NotificationSender::channel(capacity);
    let mut kernel = connector.connect(notifications).await?;
    if let Err(e) = kernel.discard_answer().await {
        kernel.close().await;
        return Err(e);
    }
    debug!("kernel banner discarded");
    Ok(KernelLink { kernel, packets })
}

fn validate_session_id(session_id: &str) -> Result<()> {
    let valid = !session_id.is_empty()
        && session_id != "."
        && session_id != ".."
        && !session_id.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(MathmateError::IllegalState(format!(
            "session id '{session_id}' is not a single folder name"
        )))
    }
}

/// Re-render `session` every `period` until it is closed.
pub fn spawn_periodic_render(session: Arc<Session>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match session.render().await {
                Ok(path) => debug!(path = %path.display(), "periodic render"),
                Err(MathmateError::Closed { .. }) => break,
                Err(e) => warn!(session_id = session.id(), error = %e, "periodic render failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silencing_terminator() {
        assert!(is_silenced("1+1;"));
        assert!(is_silenced("  x = 3;  \n"));
        assert!(!is_silenced("1+1"));
        assert!(!is_silenced("f[a;b]"));
    }

    #[test]
    fn session_ids_must_be_single_components() {
        assert!(validate_session_id("a1b2").is_ok());
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id("..").is_err());
        assert!(validate_session_id("a/b").is_err());
    }
}
