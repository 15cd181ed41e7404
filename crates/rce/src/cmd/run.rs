use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Args;
use rce_engine::{CodeRequest, EngineResponse, FileEntry, FilesRequest, RunTimeStatus};
use tracing::info;

use super::{Service, load_config};
use crate::error::{AppError, AppResult};

#[derive(Args)]
pub struct RunArgs {
    /// Path to rce.yaml config file (defaults apply when omitted)
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// Language of the submission (e.g. python, java)
    #[arg(long, short)]
    language: String,
    /// Project directory; every file beneath it is submitted
    #[arg(long, conflicts_with = "files")]
    dir: Option<PathBuf>,
    /// Caller id recorded with the result
    #[arg(long)]
    user_id: Option<String>,
    /// Project id recorded with the result
    #[arg(long)]
    project_id: Option<String>,
    /// Source files; one file is a single-source job, several a project
    files: Vec<PathBuf>,
}

/// Execute one submission and print the engine response as JSON.
/// Exits nonzero unless the program ran successfully.
pub async fn run_once(args: RunArgs) -> AppResult<ExitCode> {
    let mut config = load_config(args.config.as_deref()).await?;
    // A one-shot run needs exactly one slot and no metrics.
    config.pool.max_concurrent = 1;
    config.metrics = Default::default();
    config.validate()?;

    let service = Service::start(&config).await?;
    let response = submit(&service, args).await;
    service.shutdown().await?;
    let response = response?;

    let rendered = serde_json::to_string_pretty(&response)
        .map_err(|e| AppError::Internal(format!("serialize response: {e}")))?;
    println!("{rendered}");

    let ok = response
        .result
        .as_ref()
        .is_some_and(|r| response.succeeded && r.run_time_status == RunTimeStatus::Success);
    Ok(if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn submit(service: &Service, args: RunArgs) -> AppResult<EngineResponse> {
    let engine = &service.engine;
    if let Some(dir) = &args.dir {
        let files = collect_dir(dir).await?;
        info!(dir = %dir.display(), files = files.len(), "submitting project");
        return Ok(engine
            .execute_files(FilesRequest {
                language: Some(args.language),
                files: Some(files),
                user_id: args.user_id,
                project_id: args.project_id,
                save_metric: false,
            })
            .await);
    }

    match args.files.as_slice() {
        [] => Err(AppError::Config("no input files (pass FILE... or --dir)".into())),
        [single] => {
            let code = read_source(single).await?;
            Ok(engine
                .execute(CodeRequest {
                    language: Some(args.language),
                    code: Some(code),
                    user_id: args.user_id,
                    project_id: args.project_id,
                    save_metric: false,
                })
                .await)
        }
        several => {
            let mut files = Vec::with_capacity(several.len());
            for path in several {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| AppError::Config(format!("not a file: {}", path.display())))?;
                files.push(FileEntry {
                    path: name,
                    content: read_source(path).await?,
                });
            }
            Ok(engine
                .execute_files(FilesRequest {
                    language: Some(args.language),
                    files: Some(files),
                    user_id: args.user_id,
                    project_id: args.project_id,
                    save_metric: false,
                })
                .await)
        }
    }
}

async fn read_source(path: &Path) -> AppResult<String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| AppError::Config(format!("read {}: {e}", path.display())))
}

/// Every regular file under `root`, as paths relative to it, sorted.
async fn collect_dir(root: &Path) -> AppResult<Vec<FileEntry>> {
    let mut pending = vec![root.to_path_buf()];
    let mut found = Vec::new();
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| AppError::Config(format!("read dir {}: {e}", dir.display())))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let kind = entry.file_type().await?;
            if kind.is_dir() {
                pending.push(path);
            } else if kind.is_file() {
                found.push(path);
            }
        }
    }
    found.sort();

    let mut files = Vec::with_capacity(found.len());
    for path in found {
        let relative = path
            .strip_prefix(root)
            .map_err(|e| AppError::Internal(format!("{}: {e}", path.display())))?;
        files.push(FileEntry {
            path: relative.to_string_lossy().into_owned(),
            content: read_source(&path).await?,
        });
    }
    Ok(files)
}
