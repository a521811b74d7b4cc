use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;

use importhost_core::{HarnessController, Sandbox};

use crate::config::ResolvedConfig;

#[derive(Debug)]
pub struct ServeArgs {
    pub package: String,
    pub root: Option<PathBuf>,
    pub commit: bool,
    pub json: bool,
}

#[derive(Debug, Serialize)]
pub struct ServeSummary {
    pub package: String,
    pub root: PathBuf,
    pub repo_dir: PathBuf,
    pub http_addr: String,
    pub go_import_url: String,
    pub transport_url: String,
    pub revision: Option<String>,
    pub commit_time: Option<String>,
}

/// Default sandbox root when `--root` is not given.
fn default_root() -> PathBuf {
    std::env::temp_dir().join(format!("importhost-{}", std::process::id()))
}

pub async fn run_serve(config: ResolvedConfig, args: ServeArgs) -> Result<()> {
    let root = args.root.unwrap_or_else(default_root);
    std::fs::create_dir_all(&root)
        .with_context(|| format!("failed to create sandbox root {}", root.display()))?;
    let root = root
        .canonicalize()
        .with_context(|| format!("failed to resolve {}", root.display()))?;

    let sandbox = Arc::new(Sandbox::new(&root));
    let repo_dir = sandbox
        .setup(&args.package)
        .with_context(|| format!("failed to create package dir for {}", args.package))?;

    let result = serve(&sandbox, config, &args.package, repo_dir, args.commit, args.json).await;
    sandbox.teardown().await;
    tracing::info!("importhost serve shut down");
    result
}

async fn serve(
    sandbox: &Arc<Sandbox>,
    config: ResolvedConfig,
    package: &str,
    repo_dir: PathBuf,
    commit: bool,
    json: bool,
) -> Result<()> {
    let harness = HarnessController::start(sandbox.clone(), config.backend, config.harness)
        .await
        .context("failed to start harness")?;
    let handle = harness.setup().await.context("failed to create repository")?;

    let committed = if commit {
        Some(handle.commit().await.context("failed to commit repository contents")?)
    } else {
        None
    };

    let summary = ServeSummary {
        package: package.to_owned(),
        root: sandbox.root().to_path_buf(),
        repo_dir,
        http_addr: harness.http_addr(),
        go_import_url: format!("http://{}/{package}?go-get=1", harness.http_addr()),
        transport_url: format!(
            "{}{package}{}",
            harness.transport_base(),
            harness.backend().transport_suffix()
        ),
        revision: committed.as_ref().map(|c| c.revision.clone()),
        commit_time: committed.as_ref().map(|c| c.time_rfc3339()),
    };
    print_summary(&summary, json)?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to install Ctrl+C handler")?;
    harness.close();
    Ok(())
}

fn print_summary(summary: &ServeSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }
    println!("package:    {}", summary.package);
    println!("repo dir:   {}", summary.repo_dir.display());
    println!("go-import:  {}", summary.go_import_url);
    println!("transport:  {}", summary.transport_url);
    if let (Some(rev), Some(time)) = (&summary.revision, &summary.commit_time) {
        println!("revision:   {rev} ({time})");
    }
    println!("Press Ctrl+C to stop.");
    Ok(())
}
