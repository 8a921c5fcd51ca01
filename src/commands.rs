use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::capture::CaptureSession;
use crate::config::{self, Config};
use crate::errors::{AppError, AppResult};
use crate::session::Session;
use crate::uploader::{get_initials, DebriefLinks, UploadEvent, UploadHandle};

#[derive(Debug, Parser)]
#[command(name = "debrief-capture", version, about = "Capture training screenshots and upload debriefs")]
pub struct Cli {
    /// Path to config.json (defaults to the platform config directory)
    #[arg(long, global = true, env = "DEBRIEF_CAPTURE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Folder holding trainee folders; remembered for later runs
    #[arg(long, global = true)]
    pub session_root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Args)]
pub struct SessionArgs {
    /// Trainee display name (folder name under the session root)
    pub trainee: String,
    /// Training name (folder name under the trainee)
    pub training: String,
    /// Training date, defaults to today
    #[arg(long)]
    pub date: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Move new screenshots into the session until Ctrl-C
    Watch {
        #[command(flatten)]
        session: SessionArgs,
        /// Screenshot tool output folder
        #[arg(long)]
        source: Option<PathBuf>,
        /// Upload the session when watching ends
        #[arg(long)]
        finalize: bool,
    },
    /// Upload notes, comments and screenshots and print the debrief links
    Finalize {
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Set the comment of one screenshot
    Comment {
        #[command(flatten)]
        session: SessionArgs,
        screenshot: String,
        text: String,
    },
    /// Print the session notes, or replace them with TEXT
    Notes {
        #[command(flatten)]
        session: SessionArgs,
        text: Option<String>,
    },
    /// List screenshots in capture order with their comments
    List {
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Delete a screenshot (its comment is kept)
    Delete {
        #[command(flatten)]
        session: SessionArgs,
        screenshot: String,
    },
    /// Show the initials sent for a trainee name
    Initials { name: String },
}

impl SessionArgs {
    fn date(&self) -> String {
        self.date
            .clone()
            .unwrap_or_else(|| chrono::Local::now().format("%Y-%m-%d").to_string())
    }
}

/// Loaded configuration plus the file it came from.
pub struct Context {
    pub config: Config,
    pub config_path: PathBuf,
    pub session_root_arg: Option<PathBuf>,
}

impl Context {
    pub fn load(cli: &Cli) -> AppResult<Self> {
        let config_path = match &cli.config {
            Some(path) => path.clone(),
            None => config::get_config_path()?,
        };
        let config = config::load_config_from(&config_path)?;
        Ok(Self {
            config,
            config_path,
            session_root_arg: cli.session_root.clone(),
        })
    }

    fn open_session(&mut self, args: &SessionArgs) -> AppResult<CaptureSession> {
        let root = config::resolve_session_root(
            &mut self.config,
            &self.config_path,
            self.session_root_arg.clone(),
        )?;
        let session = Session::open(&root, &args.trainee, &args.training, &args.date())?;
        CaptureSession::open(&self.config, session)
    }
}

pub async fn run(command: Command, ctx: &mut Context) -> AppResult<()> {
    match command {
        Command::Watch {
            session,
            source,
            finalize,
        } => {
            let source = config::resolve_screenshot_source(&ctx.config, source)?;
            let capture = ctx.open_session(&session)?;
            watch(capture, &source, finalize).await
        }
        Command::Finalize { session } => {
            let capture = ctx.open_session(&session)?;
            let result = finalize_session(&capture).await;
            capture.close().await;
            result
        }
        Command::Comment {
            session,
            screenshot,
            text,
        } => {
            let capture = ctx.open_session(&session)?;
            capture.store().set_comment(&screenshot, &text)?;
            println!("Comment saved for {}", screenshot);
            Ok(())
        }
        Command::Notes { session, text } => {
            let capture = ctx.open_session(&session)?;
            match text {
                Some(text) => {
                    capture.store().save_notes(&text)?;
                    println!("Notes saved");
                }
                None => println!("{}", capture.store().load_notes()),
            }
            Ok(())
        }
        Command::List { session } => {
            let capture = ctx.open_session(&session)?;
            let comments = capture.store().get_all_comments();
            for name in capture.screenshots()? {
                match comments.get(&name) {
                    Some(comment) if !comment.is_empty() => println!("{}\t{}", name, comment),
                    _ => println!("{}", name),
                }
            }
            Ok(())
        }
        Command::Delete {
            session,
            screenshot,
        } => {
            let capture = ctx.open_session(&session)?;
            capture.delete_screenshot(&screenshot)?;
            println!("Deleted {}", screenshot);
            Ok(())
        }
        Command::Initials { name } => {
            println!("{}", get_initials(&name));
            Ok(())
        }
    }
}

async fn watch(mut capture: CaptureSession, source: &Path, finalize: bool) -> AppResult<()> {
    let mut available = capture.start_watching(source).await?;
    println!(
        "Watching {} for screenshots, saving to {}. Press Ctrl-C to stop.",
        source.display(),
        capture.session().screenshots_dir().display()
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            relocated = available.recv() => match relocated {
                Some(relocated) => println!("Screenshot saved: {}", relocated.filename),
                None => break,
            },
        }
    }

    let result = if finalize {
        // Keep watching while uploading so late captures are included.
        finalize_session(&capture).await
    } else {
        Ok(())
    };

    capture.close().await;
    result
}

async fn finalize_session(capture: &CaptureSession) -> AppResult<()> {
    let handle = capture.finalize();
    let session_id = handle.session_id().to_string();
    let result = report_upload(handle).await;

    if let Some(progress) = capture.coordinator().take_progress(&session_id) {
        println!(
            "{}/{} screenshots uploaded, {} failures",
            progress.successful_uploads.len(),
            progress.total_screenshots,
            progress.failed_uploads.len()
        );
    }
    result.map(|_| ())
}

/// Print upload events until the job ends. Ctrl-C cancels the upload.
pub async fn report_upload(mut handle: UploadHandle) -> AppResult<DebriefLinks> {
    println!("Uploading session {}", handle.session_id());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                handle.cancel();
                println!("Upload cancelled");
                return Err(AppError::upload_cancelled("upload", handle.session_id()));
            }
            event = handle.next_event() => match event {
                Some(UploadEvent::Progress { percent, phase, .. }) => {
                    println!("[{:>3}%] {:?}", percent, phase);
                }
                Some(UploadEvent::ItemUploaded { item, .. }) => println!("  uploaded {}", item),
                Some(UploadEvent::ItemFailed { failure, .. }) => {
                    println!("  failed {}: {}", failure.item, failure.error);
                }
                Some(UploadEvent::Completed { links, .. }) => {
                    println!("Trainer debrief: {}", links.trainer);
                    println!("Trainee debrief: {}", links.trainee);
                }
                None => break,
            },
        }
    }

    handle.wait().await
}
