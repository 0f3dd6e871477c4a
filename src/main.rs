use anyhow::{Context, Result, bail};
use batchmark::{
    BatchConfig, BatchEvent, BatchPlan, BatchRunner, LogFormat, LogTransport, PdftoppmRasterizer,
    RecipientDirectory, Settings, SystemFontLocator, Watermarker, init_tracing,
};
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "batchmark", version, about = "Stamps a PDF with a per-recipient watermark")]
struct Cli {
    /// Log output format: plain or json
    #[arg(long, global = true, default_value = "plain")]
    log_format: String,

    /// pdftoppm binary; defaults to $BATCHMARK_PDFTOPPM, then PATH
    #[arg(long, global = true)]
    pdftoppm: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render one watermarked PDF per recipient
    Run(RunArgs),
    /// Render the first page for one recipient as PNG
    Preview(PreviewArgs),
}

#[derive(Args)]
struct SettingsArg {
    /// JSON settings file; missing keys take their defaults
    #[arg(long)]
    settings: Option<PathBuf>,
}

#[derive(Args)]
struct RunArgs {
    /// Source PDF
    source: PathBuf,

    /// JSON array of recipient names or {"name", "emails"} objects
    #[arg(long)]
    recipients: PathBuf,

    #[command(flatten)]
    settings: SettingsArg,

    /// Directory for the rendered files
    #[arg(short, long, default_value = "watermarked")]
    out_dir: PathBuf,

    /// Hand each rendered file to the mail transport
    #[arg(long)]
    send_email: bool,

    /// Proceed even when some recipients have no email address
    #[arg(long)]
    allow_missing_email: bool,

    /// Overlay vector text instead of rasterizing pages
    #[arg(long)]
    vector: bool,
}

#[derive(Args)]
struct PreviewArgs {
    /// Source PDF
    source: PathBuf,

    /// Recipient name to put in the watermark
    #[arg(long, default_value = "示例公司")]
    recipient: String,

    #[command(flatten)]
    settings: SettingsArg,

    /// PNG output path
    #[arg(short, long, default_value = "preview.png")]
    output: PathBuf,

    /// Preview resolution
    #[arg(long, default_value = "72")]
    dpi: u32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RecipientEntry {
    Name(String),
    WithEmails {
        name: String,
        #[serde(default)]
        emails: Emails,
    },
}

#[derive(Deserialize, Default)]
#[serde(untagged)]
enum Emails {
    #[default]
    None,
    Cell(String),
    List(Vec<String>),
}

fn load_settings(arg: &SettingsArg) -> Result<Settings> {
    match &arg.settings {
        Some(path) => Settings::load(path)
            .with_context(|| format!("failed to read settings from {}", path.display())),
        None => Ok(Settings::default()),
    }
}

fn load_recipients(path: &Path) -> Result<(Vec<String>, RecipientDirectory)> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read recipients from {}", path.display()))?;
    let entries: Vec<RecipientEntry> =
        serde_json::from_str(&text).context("recipients must be a JSON array")?;

    let mut names = Vec::with_capacity(entries.len());
    let mut directory = RecipientDirectory::new();
    for entry in entries {
        let (name, emails) = match entry {
            RecipientEntry::Name(name) => (name, Emails::None),
            RecipientEntry::WithEmails { name, emails } => (name, emails),
        };
        let name = name.trim().to_string();
        if name.is_empty() {
            continue;
        }
        match emails {
            Emails::None => directory.insert(&name, Vec::<String>::new()),
            Emails::Cell(cell) => directory.insert_cell(&name, &cell),
            Emails::List(list) => directory.insert(&name, list),
        }
        names.push(name);
    }
    for rejected in directory.rejected() {
        warn!(email = %rejected, "ignoring malformed address");
    }
    info!(
        recipients = names.len(),
        addresses = directory.total_addresses(),
        "recipients loaded"
    );
    Ok((names, directory))
}

fn watermarker(pdftoppm: Option<PathBuf>) -> Watermarker {
    match pdftoppm {
        Some(binary) => Watermarker::new(
            Box::new(PdftoppmRasterizer::with_binary(binary)),
            Box::new(SystemFontLocator::new()),
        ),
        None => Watermarker::default(),
    }
}

fn run(args: RunArgs, renderer: Watermarker) -> Result<()> {
    let settings = load_settings(&args.settings)?;
    let (recipients, directory) = load_recipients(&args.recipients)?;
    let mut options = settings.render_options()?;
    if args.vector {
        options.rasterize = false;
    }
    let config = BatchConfig {
        source: Some(args.source),
        recipients,
        directory,
        output_dir: args.out_dir,
        filename_pattern: settings.filename_pattern.clone(),
        send_email: args.send_email,
        spec: settings.watermark_spec()?,
        options,
        mail: settings.mail_template(),
    };

    if args.send_email {
        let plan = BatchPlan::prepare(config.clone())?;
        let missing = plan.recipients_without_email();
        if !missing.is_empty() {
            warn!(recipients = ?missing, "no email address on file");
            if !args.allow_missing_email {
                bail!(
                    "{} recipient(s) have no email address; pass --allow-missing-email to continue",
                    missing.len()
                );
            }
        }
    }

    let runner = BatchRunner::new();
    let handle = runner.spawn(config, Arc::new(renderer), Arc::new(LogTransport))?;
    for event in handle.events() {
        match event {
            BatchEvent::Progress {
                completed,
                total,
                recipient,
            } => info!(completed, total, recipient = %recipient, "progress"),
            BatchEvent::Finished(report) => println!("{}", report.summary()),
            BatchEvent::Started { .. } | BatchEvent::Log { .. } => {}
        }
    }
    let report = handle.wait()?;
    if report.failed > 0 {
        bail!("{} of {} documents failed", report.failed, report.outcomes.len());
    }
    Ok(())
}

fn preview(args: PreviewArgs, renderer: Watermarker) -> Result<()> {
    let settings = load_settings(&args.settings)?;
    let spec = settings.watermark_spec()?;
    let text = spec.text_for(&args.recipient);
    let png = renderer.preview(&args.source, &spec, &text, args.dpi)?;
    std::fs::write(&args.output, png)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    info!(output = %args.output.display(), "preview written");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let Some(format) = LogFormat::parse(&cli.log_format) else {
        bail!("unknown log format {:?}", cli.log_format);
    };
    init_tracing(format);

    let renderer = watermarker(cli.pdftoppm);
    match cli.command {
        Command::Run(args) => run(args, renderer),
        Command::Preview(args) => preview(args, renderer),
    }
}
