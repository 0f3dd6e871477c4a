//! One render per recipient, sequentially, with progress events and
//! per-recipient failure isolation.
//!
//! `BatchRunner::run` drives a batch on the calling thread.
//! `BatchRunner::spawn` moves the same loop onto a single worker thread and
//! hands back a `BatchHandle` the caller can poll or block on.

use crate::error::BatchmarkError;
use crate::mail::{MailTemplate, MailTransport};
use crate::metrics::RenderStats;
use crate::recipients::RecipientDirectory;
use crate::render::{DocumentRenderer, RenderRequest};
use crate::watermark::{RenderOptions, WatermarkSpec};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use tracing::{error, info, warn};

const SOURCE_NAME_SLOT: &str = "文件名";
const RECIPIENT_SLOT: &str = "{company}";
const FORBIDDEN_FILENAME_CHARS: [char; 9] = ['\\', '/', '*', '?', ':', '"', '<', '>', '|'];

/// Replaces characters that are not allowed in file names with `_`.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if FORBIDDEN_FILENAME_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// Output file stem for one recipient, without the `.pdf` extension.
pub fn output_stem(pattern: &str, source_base: &str, recipient: &str) -> String {
    let filled = pattern
        .replace(SOURCE_NAME_SLOT, source_base)
        .replace(RECIPIENT_SLOT, recipient);
    sanitize_filename(&filled)
}

pub fn output_filename(pattern: &str, source_base: &str, recipient: &str) -> String {
    format!("{}.pdf", output_stem(pattern, source_base, recipient))
}

/// Everything a batch needs, owned so it can move onto the worker thread.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub source: Option<PathBuf>,
    pub recipients: Vec<String>,
    pub directory: RecipientDirectory,
    pub output_dir: PathBuf,
    pub filename_pattern: String,
    pub send_email: bool,
    pub spec: WatermarkSpec,
    pub options: RenderOptions,
    pub mail: MailTemplate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientJob {
    pub name: String,
    pub watermark_text: String,
    pub output_path: PathBuf,
    /// Output filename without the extension, used in mail.
    pub display_filename: String,
    pub emails: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailOutcome {
    pub address: String,
    pub error: Option<String>,
}

impl EmailOutcome {
    pub fn delivered(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOutcome {
    pub recipient: String,
    pub result: Result<PathBuf, String>,
    pub stats: RenderStats,
    pub emails: Vec<EmailOutcome>,
}

impl RenderOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// A validated batch, ready to run.
#[derive(Debug, Clone)]
pub struct BatchPlan {
    source: PathBuf,
    jobs: Vec<RecipientJob>,
    send_email: bool,
    spec: WatermarkSpec,
    options: RenderOptions,
    mail: MailTemplate,
    multi_mailbox: Vec<(String, usize)>,
}

impl BatchPlan {
    /// Checks the preconditions for starting a batch and derives the
    /// per-recipient jobs. Creates the output directory when missing.
    pub fn prepare(config: BatchConfig) -> Result<Self, BatchmarkError> {
        let source = match config.source {
            Some(path) if path.is_file() => path,
            _ => return Err(BatchmarkError::MissingSource),
        };
        if config.recipients.is_empty() {
            return Err(BatchmarkError::EmptyRecipients);
        }
        if config.send_email && config.directory.is_empty() {
            return Err(BatchmarkError::MissingEmailDirectory);
        }
        ensure_output_dir(&config.output_dir)?;

        let source_base = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let jobs = config
            .recipients
            .iter()
            .map(|name| {
                let display_filename = output_stem(&config.filename_pattern, &source_base, name);
                RecipientJob {
                    name: name.clone(),
                    watermark_text: config.spec.text_for(name),
                    output_path: config.output_dir.join(format!("{display_filename}.pdf")),
                    display_filename,
                    emails: config.directory.emails_for(name).to_vec(),
                }
            })
            .collect();

        Ok(Self {
            source,
            jobs,
            send_email: config.send_email,
            spec: config.spec,
            options: config.options,
            mail: config.mail,
            multi_mailbox: config.directory.multi_mailbox(),
        })
    }

    pub fn jobs(&self) -> &[RecipientJob] {
        &self.jobs
    }

    /// Recipients that will get a rendered file but no email. Empty when
    /// email is disabled.
    pub fn recipients_without_email(&self) -> Vec<&str> {
        if !self.send_email {
            return Vec::new();
        }
        self.jobs
            .iter()
            .filter(|job| job.emails.is_empty())
            .map(|job| job.name.as_str())
            .collect()
    }
}

fn ensure_output_dir(path: &Path) -> Result<(), BatchmarkError> {
    let unusable = |reason: String| BatchmarkError::OutputDirectory {
        path: path.to_path_buf(),
        reason,
    };
    std::fs::create_dir_all(path).map_err(|e| unusable(e.to_string()))?;
    // Mode bits alone miss directories owned by another user.
    tempfile::Builder::new()
        .prefix(".batchmark-write-check")
        .tempfile_in(path)
        .map_err(|e| unusable(format!("not writable: {e}")))?;
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub outcomes: Vec<RenderOutcome>,
    pub rendered: usize,
    pub failed: usize,
    pub emails_sent: usize,
    pub emails_failed: usize,
    pub multi_mailbox: Vec<(String, usize)>,
}

impl BatchReport {
    fn record(&mut self, outcome: RenderOutcome) {
        if outcome.succeeded() {
            self.rendered += 1;
        } else {
            self.failed += 1;
        }
        for email in &outcome.emails {
            if email.delivered() {
                self.emails_sent += 1;
            } else {
                self.emails_failed += 1;
            }
        }
        self.outcomes.push(outcome);
    }

    pub fn summary(&self) -> String {
        let mut text = format!(
            "{} of {} documents rendered, {} failed",
            self.rendered,
            self.outcomes.len(),
            self.failed
        );
        if self.emails_sent + self.emails_failed > 0 {
            text.push_str(&format!(
                "; {} emails sent, {} failed",
                self.emails_sent, self.emails_failed
            ));
        }
        if !self.multi_mailbox.is_empty() {
            let names: Vec<String> = self
                .multi_mailbox
                .iter()
                .map(|(name, count)| format!("{name} ({count})"))
                .collect();
            text.push_str(&format!("; multiple mailboxes: {}", names.join(", ")));
        }
        text
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEvent {
    Started { total: usize },
    Progress { completed: usize, total: usize, recipient: String },
    Log { level: LogLevel, message: String },
    Finished(BatchReport),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Idle,
    Running,
    Completed,
    Failed,
}

/// Fans batch messages out to `tracing` and, when attached, to an event
/// channel. Sends never block and a dropped receiver is ignored. Without a
/// channel, progress is logged instead.
struct EventSink {
    events: Option<Sender<BatchEvent>>,
}

impl EventSink {
    fn emit(&self, event: BatchEvent) {
        match &self.events {
            Some(events) => {
                let _ = events.send(event);
            }
            None => {
                if let BatchEvent::Progress {
                    completed,
                    total,
                    recipient,
                } = &event
                {
                    info!(completed, total, recipient = %recipient, "progress");
                }
            }
        }
    }

    fn log(&self, level: LogLevel, message: String) {
        match level {
            LogLevel::Info => info!("{message}"),
            LogLevel::Warn => warn!("{message}"),
            LogLevel::Error => error!("{message}"),
        }
        self.emit(BatchEvent::Log { level, message });
    }
}

/// Holds the single-batch slot. Dropping it frees the slot and, unless the
/// batch reached its report, marks the runner `Failed`.
struct RunGuard {
    running: Arc<AtomicBool>,
    state: Arc<Mutex<BatchState>>,
    completed: bool,
}

impl RunGuard {
    fn complete(mut self) {
        self.completed = true;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        *lock_state(&self.state) = if self.completed {
            BatchState::Completed
        } else {
            BatchState::Failed
        };
        self.running.store(false, Ordering::Release);
    }
}

fn lock_state(state: &Mutex<BatchState>) -> MutexGuard<'_, BatchState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct BatchRunner {
    running: Arc<AtomicBool>,
    state: Arc<Mutex<BatchState>>,
}

impl Default for BatchRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchRunner {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(BatchState::Idle)),
        }
    }

    pub fn state(&self) -> BatchState {
        *lock_state(&self.state)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn begin(&self, config: BatchConfig) -> Result<(RunGuard, BatchPlan), BatchmarkError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(BatchmarkError::BatchAlreadyRunning);
        }
        *lock_state(&self.state) = BatchState::Running;
        let guard = RunGuard {
            running: Arc::clone(&self.running),
            state: Arc::clone(&self.state),
            completed: false,
        };
        // On a setup error the guard drops here and the runner ends up Failed.
        let plan = BatchPlan::prepare(config)?;
        Ok((guard, plan))
    }

    /// Runs the whole batch on the calling thread.
    pub fn run(
        &self,
        config: BatchConfig,
        renderer: &dyn DocumentRenderer,
        transport: &dyn MailTransport,
    ) -> Result<BatchReport, BatchmarkError> {
        let (guard, plan) = self.begin(config)?;
        let report = execute(&plan, renderer, transport, &EventSink { events: None });
        guard.complete();
        Ok(report)
    }

    /// Validates the batch here, then runs it on a worker thread.
    pub fn spawn(
        &self,
        config: BatchConfig,
        renderer: Arc<dyn DocumentRenderer>,
        transport: Arc<dyn MailTransport>,
    ) -> Result<BatchHandle, BatchmarkError> {
        let (guard, plan) = self.begin(config)?;
        let (tx, rx) = mpsc::channel();
        let worker = std::thread::Builder::new()
            .name("batchmark-batch".to_string())
            .spawn(move || {
                let sink = EventSink { events: Some(tx) };
                let report = execute(&plan, renderer.as_ref(), transport.as_ref(), &sink);
                guard.complete();
                report
            })?;
        Ok(BatchHandle {
            events: rx,
            worker,
        })
    }
}

pub struct BatchHandle {
    events: Receiver<BatchEvent>,
    worker: JoinHandle<BatchReport>,
}

impl BatchHandle {
    /// Blocking iterator over events; ends when the worker finishes.
    pub fn events(&self) -> mpsc::Iter<'_, BatchEvent> {
        self.events.iter()
    }

    pub fn wait(self) -> Result<BatchReport, BatchmarkError> {
        self.worker
            .join()
            .map_err(|_| BatchmarkError::Io(std::io::Error::other("batch worker panicked")))
    }
}

fn execute(
    plan: &BatchPlan,
    renderer: &dyn DocumentRenderer,
    transport: &dyn MailTransport,
    sink: &EventSink,
) -> BatchReport {
    let total = plan.jobs.len();
    sink.emit(BatchEvent::Started { total });
    sink.log(
        LogLevel::Info,
        format!("starting batch of {total} from {}", plan.source.display()),
    );

    let mut report = BatchReport {
        multi_mailbox: plan.multi_mailbox.clone(),
        ..BatchReport::default()
    };
    for (index, job) in plan.jobs.iter().enumerate() {
        let outcome = process_job(plan, job, renderer, transport, sink);
        report.record(outcome);
        sink.emit(BatchEvent::Progress {
            completed: index + 1,
            total,
            recipient: job.name.clone(),
        });
    }

    sink.log(LogLevel::Info, format!("batch finished: {}", report.summary()));
    sink.emit(BatchEvent::Finished(report.clone()));
    report
}

fn process_job(
    plan: &BatchPlan,
    job: &RecipientJob,
    renderer: &dyn DocumentRenderer,
    transport: &dyn MailTransport,
    sink: &EventSink,
) -> RenderOutcome {
    let request = RenderRequest {
        source: &plan.source,
        output: &job.output_path,
        spec: &plan.spec,
        text: &job.watermark_text,
        options: &plan.options,
    };
    let stats = match renderer.render(&request) {
        Ok(stats) => stats,
        Err(err) => {
            error!(recipient = %job.name, error = %err, "render failed");
            sink.emit(BatchEvent::Log {
                level: LogLevel::Error,
                message: format!("{}: render failed: {err}", job.name),
            });
            return RenderOutcome {
                recipient: job.name.clone(),
                result: Err(err.to_string()),
                stats: RenderStats::default(),
                emails: Vec::new(),
            };
        }
    };
    info!(
        recipient = %job.name,
        pages = stats.pages,
        instances = stats.instances,
        output = %job.output_path.display(),
        "rendered"
    );

    let mut emails = Vec::new();
    if plan.send_email {
        if job.emails.is_empty() {
            sink.log(
                LogLevel::Warn,
                format!("{}: no email address, skipping delivery", job.name),
            );
        }
        for address in &job.emails {
            let delivery = plan.mail.delivery(
                &job.name,
                address,
                job.output_path.clone(),
                &job.display_filename,
            );
            let error = match transport.send(&delivery) {
                Ok(()) => {
                    sink.log(LogLevel::Info, format!("{}: email sent to {address}", job.name));
                    None
                }
                Err(err) => {
                    sink.log(
                        LogLevel::Warn,
                        format!("{}: email to {address} failed: {err}", job.name),
                    );
                    Some(err.to_string())
                }
            };
            emails.push(EmailOutcome {
                address: address.clone(),
                error,
            });
        }
    }

    RenderOutcome {
        recipient: job.name.clone(),
        result: Ok(job.output_path.clone()),
        stats,
        emails,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::fixtures;
    use crate::font::FontLocator;
    use crate::mail::testing::RecordingTransport;
    use crate::raster::testing::WhitePageRasterizer;
    use crate::render::Watermarker;
    use std::sync::mpsc::SyncSender;

    /// Writes a stub file per recipient; fails for the names in `fail_for`.
    /// With a gate attached, each render waits for one message first.
    #[derive(Default)]
    struct FakeRenderer {
        fail_for: Vec<String>,
        gate: Option<Mutex<Receiver<()>>>,
        seen: Mutex<Vec<String>>,
    }

    impl FakeRenderer {
        fn failing_for(names: &[&str]) -> Self {
            Self {
                fail_for: names.iter().map(|n| n.to_string()).collect(),
                ..Self::default()
            }
        }

        fn gated() -> (Self, SyncSender<()>) {
            let (tx, rx) = mpsc::sync_channel(8);
            let renderer = Self {
                gate: Some(Mutex::new(rx)),
                ..Self::default()
            };
            (renderer, tx)
        }
    }

    impl DocumentRenderer for FakeRenderer {
        fn render(&self, request: &RenderRequest<'_>) -> Result<RenderStats, BatchmarkError> {
            if let Some(gate) = &self.gate {
                gate.lock().unwrap().recv().unwrap();
            }
            self.seen.lock().unwrap().push(request.text.to_string());
            if self.fail_for.iter().any(|n| request.text.contains(n.as_str())) {
                return Err(BatchmarkError::Raster("page 1 failed".to_string()));
            }
            std::fs::write(request.output, b"%PDF-1.5")?;
            Ok(RenderStats {
                pages: 1,
                instances: 1,
            })
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        source: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("report.pdf");
        fixtures::write_text_pdf(&source, &["page one"]);
        Fixture { dir, source }
    }

    fn config(fx: &Fixture, recipients: &[&str]) -> BatchConfig {
        BatchConfig {
            source: Some(fx.source.clone()),
            recipients: recipients.iter().map(|r| r.to_string()).collect(),
            directory: RecipientDirectory::new(),
            output_dir: fx.dir.path().join("out"),
            filename_pattern: "文件名_{company}".to_string(),
            send_email: false,
            spec: WatermarkSpec::builder()
                .template("CONF:", ":END")
                .build()
                .unwrap(),
            options: RenderOptions::default(),
            mail: MailTemplate::default(),
        }
    }

    #[test]
    fn filename_pattern_fills_and_sanitizes() {
        assert_eq!(output_filename("文件名_{company}", "report", "A/B"), "report_A_B.pdf");
        assert_eq!(output_stem("{company}", "report", "a:b*c?"), "a_b_c_");
    }

    #[test]
    fn sanitize_is_idempotent() {
        for name in ["a\\b/c", "plain", "<x>|\"y\"", "名字:公司"] {
            let once = sanitize_filename(name);
            assert_eq!(sanitize_filename(&once), once);
            assert!(!once.contains(FORBIDDEN_FILENAME_CHARS));
        }
    }

    #[test]
    fn plan_derives_text_and_paths() {
        let fx = fixture();
        let plan = BatchPlan::prepare(config(&fx, &["Acme", "A/B"])).unwrap();
        let jobs = plan.jobs();
        assert_eq!(jobs[0].watermark_text, "CONF:Acme:END");
        assert_eq!(jobs[1].display_filename, "report_A_B");
        assert_eq!(jobs[1].output_path, fx.dir.path().join("out").join("report_A_B.pdf"));
        let out = fx.dir.path().join("out");
        assert!(out.is_dir());
        assert!(std::fs::read_dir(&out).unwrap().next().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn unwritable_output_dir_is_a_setup_error() {
        use std::fs::Permissions;
        use std::os::unix::fs::PermissionsExt;

        let fx = fixture();
        let locked = fx.dir.path().join("locked");
        std::fs::create_dir(&locked).unwrap();
        std::fs::set_permissions(&locked, Permissions::from_mode(0o555)).unwrap();
        let mut cfg = config(&fx, &["Acme"]);
        cfg.output_dir = locked.clone();

        let result = BatchPlan::prepare(cfg);
        let still_writable = std::fs::write(locked.join("check"), b"").is_ok();
        std::fs::set_permissions(&locked, Permissions::from_mode(0o755)).unwrap();

        // root ignores mode bits
        if still_writable {
            assert!(result.is_ok());
            return;
        }
        let err = result.err().unwrap();
        assert!(matches!(err, BatchmarkError::OutputDirectory { .. }), "{err}");
        assert!(err.is_setup_error());
    }

    #[test]
    fn setup_errors_abort_before_rendering() {
        let fx = fixture();
        let renderer = FakeRenderer::default();
        let transport = RecordingTransport::default();
        let runner = BatchRunner::new();

        let mut no_source = config(&fx, &["Acme"]);
        no_source.source = None;
        let mut missing_file = config(&fx, &["Acme"]);
        missing_file.source = Some(fx.dir.path().join("absent.pdf"));
        let no_recipients = config(&fx, &[]);
        let mut no_directory = config(&fx, &["Acme"]);
        no_directory.send_email = true;
        let mut bad_output = config(&fx, &["Acme"]);
        bad_output.output_dir = fx.source.join("nested");

        let cases: Vec<(BatchConfig, fn(&BatchmarkError) -> bool)> = vec![
            (no_source, |e| matches!(e, BatchmarkError::MissingSource)),
            (missing_file, |e| matches!(e, BatchmarkError::MissingSource)),
            (no_recipients, |e| matches!(e, BatchmarkError::EmptyRecipients)),
            (no_directory, |e| matches!(e, BatchmarkError::MissingEmailDirectory)),
            (bad_output, |e| matches!(e, BatchmarkError::OutputDirectory { .. })),
        ];
        for (cfg, expected) in cases {
            let err = runner.run(cfg, &renderer, &transport).unwrap_err();
            assert!(expected(&err), "{err}");
            assert!(err.is_setup_error());
            assert_eq!(runner.state(), BatchState::Failed);
            assert!(!runner.is_running());
        }
        assert!(renderer.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn failed_recipient_does_not_stop_the_batch() {
        let fx = fixture();
        let renderer = FakeRenderer::failing_for(&["Beta"]);
        let runner = BatchRunner::new();
        assert_eq!(runner.state(), BatchState::Idle);

        let report = runner
            .run(
                config(&fx, &["Alpha", "Beta", "Gamma"]),
                &renderer,
                &RecordingTransport::default(),
            )
            .unwrap();

        assert_eq!(report.rendered, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(runner.state(), BatchState::Completed);
        assert!(!report.outcomes[1].succeeded());
        assert!(report.outcomes[2].succeeded());
        assert_eq!(renderer.seen.lock().unwrap().len(), 3);
    }

    #[test]
    fn only_valid_addresses_reach_the_transport() {
        let fx = fixture();
        let mut cfg = config(&fx, &["Acme"]);
        cfg.send_email = true;
        cfg.directory.insert("Acme", ["a@x.com", "bad-email"]);
        let transport = RecordingTransport::default();

        let report = BatchRunner::new()
            .run(cfg, &FakeRenderer::default(), &transport)
            .unwrap();

        assert_eq!(transport.addresses(), vec!["a@x.com"]);
        assert_eq!(report.emails_sent, 1);
        assert_eq!(report.emails_failed, 0);
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent[0].display_filename, "report_Acme");
        assert_eq!(sent[0].attachment_name(), "report_Acme.pdf");
    }

    #[test]
    fn email_failures_are_counted_per_address() {
        let fx = fixture();
        let mut cfg = config(&fx, &["Acme", "Beta", "Gamma"]);
        cfg.send_email = true;
        cfg.directory.insert_cell("Acme", "a@x.com;down@x.com");
        cfg.directory.insert_cell("Beta", "b@y.org");
        let transport = RecordingTransport::failing_for(&["down@x.com"]);

        let plan = BatchPlan::prepare(cfg.clone()).unwrap();
        assert_eq!(plan.recipients_without_email(), vec!["Gamma"]);

        let report = BatchRunner::new()
            .run(cfg, &FakeRenderer::default(), &transport)
            .unwrap();
        assert_eq!(transport.addresses(), vec!["a@x.com", "b@y.org"]);
        assert_eq!(report.emails_sent, 2);
        assert_eq!(report.emails_failed, 1);
        assert_eq!(report.rendered, 3);
        assert_eq!(report.multi_mailbox, vec![("Acme".to_string(), 2)]);
        assert!(report.summary().contains("Acme (2)"));
    }

    #[test]
    fn email_results_are_forwarded_as_events() {
        let fx = fixture();
        let mut cfg = config(&fx, &["Acme"]);
        cfg.send_email = true;
        cfg.directory.insert_cell("Acme", "a@x.com;down@x.com");
        let handle = BatchRunner::new()
            .spawn(
                cfg,
                Arc::new(FakeRenderer::default()),
                Arc::new(RecordingTransport::failing_for(&["down@x.com"])),
            )
            .unwrap();

        let logs: Vec<(LogLevel, String)> = handle
            .events()
            .filter_map(|e| match e {
                BatchEvent::Log { level, message } => Some((level, message)),
                _ => None,
            })
            .collect();
        handle.wait().unwrap();

        assert!(logs.contains(&(LogLevel::Info, "Acme: email sent to a@x.com".to_string())));
        assert!(logs.iter().any(|(level, message)| {
            *level == LogLevel::Warn && message.starts_with("Acme: email to down@x.com failed")
        }));
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn synchronous_run_logs_progress() {
        let fx = fixture();
        let captured = CapturedLogs::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let report = tracing::subscriber::with_default(subscriber, || {
            BatchRunner::new()
                .run(
                    config(&fx, &["Alpha", "Beta"]),
                    &FakeRenderer::default(),
                    &RecordingTransport::default(),
                )
                .unwrap()
        });
        assert_eq!(report.rendered, 2);

        let text = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(text.contains("progress completed=1 total=2 recipient=Alpha"), "{text}");
        assert!(text.contains("progress completed=2 total=2 recipient=Beta"), "{text}");
    }

    #[test]
    fn no_mail_for_failed_render() {
        let fx = fixture();
        let mut cfg = config(&fx, &["Acme"]);
        cfg.send_email = true;
        cfg.directory.insert("Acme", ["a@x.com"]);
        let transport = RecordingTransport::default();
        let report = BatchRunner::new()
            .run(cfg, &FakeRenderer::failing_for(&["Acme"]), &transport)
            .unwrap();
        assert!(transport.addresses().is_empty());
        assert!(report.outcomes[0].emails.is_empty());
    }

    #[test]
    fn spawned_batch_reports_monotonic_progress() {
        let fx = fixture();
        let runner = BatchRunner::new();
        let handle = runner
            .spawn(
                config(&fx, &["Alpha", "Beta", "Gamma", "Delta"]),
                Arc::new(FakeRenderer::failing_for(&["Gamma"])),
                Arc::new(RecordingTransport::default()),
            )
            .unwrap();

        let events: Vec<BatchEvent> = handle.events().collect();
        let report = handle.wait().unwrap();

        assert_eq!(events.first(), Some(&BatchEvent::Started { total: 4 }));
        let progress: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                BatchEvent::Progress { completed, total, .. } => {
                    assert_eq!(*total, 4);
                    Some(*completed)
                }
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![1, 2, 3, 4]);
        assert!(events.iter().any(|e| matches!(
            e,
            BatchEvent::Log { level: LogLevel::Error, message } if message.starts_with("Gamma")
        )));
        assert_eq!(events.last(), Some(&BatchEvent::Finished(report.clone())));
        assert_eq!(report.failed, 1);
        assert_eq!(runner.state(), BatchState::Completed);
    }

    #[test]
    fn second_start_is_rejected_while_running() {
        let fx = fixture();
        let runner = BatchRunner::new();
        let (renderer, gate) = FakeRenderer::gated();
        let handle = runner
            .spawn(
                config(&fx, &["Alpha", "Beta"]),
                Arc::new(renderer),
                Arc::new(RecordingTransport::default()),
            )
            .unwrap();

        assert!(runner.is_running());
        assert_eq!(runner.state(), BatchState::Running);
        let second = runner.run(
            config(&fx, &["Gamma"]),
            &FakeRenderer::default(),
            &RecordingTransport::default(),
        );
        assert!(matches!(second, Err(BatchmarkError::BatchAlreadyRunning)));

        gate.send(()).unwrap();
        gate.send(()).unwrap();
        let report = handle.wait().unwrap();
        assert_eq!(report.rendered, 2);
        assert_eq!(runner.state(), BatchState::Completed);

        let again = runner
            .run(config(&fx, &["Gamma"]), &FakeRenderer::default(), &RecordingTransport::default())
            .unwrap();
        assert_eq!(again.rendered, 1);
    }

    struct NoFonts;

    impl FontLocator for NoFonts {
        fn locate(&self, _family: &str) -> Option<PathBuf> {
            None
        }
    }

    #[test]
    fn vector_batch_writes_one_pdf_per_recipient() {
        let fx = fixture();
        let mut cfg = config(&fx, &["Acme", "Beta"]);
        cfg.options.rasterize = false;
        let watermarker = Watermarker::new(
            Box::new(WhitePageRasterizer::new(1, 100, 100)),
            Box::new(NoFonts),
        );
        let report = BatchRunner::new()
            .run(cfg, &watermarker, &RecordingTransport::default())
            .unwrap();
        assert_eq!(report.rendered, 2);
        for name in ["report_Acme.pdf", "report_Beta.pdf"] {
            let doc = lopdf::Document::load(fx.dir.path().join("out").join(name)).unwrap();
            assert_eq!(doc.get_pages().len(), 1);
        }
        assert!(report.outcomes.iter().all(|o| o.stats.pages == 1));
    }
}
