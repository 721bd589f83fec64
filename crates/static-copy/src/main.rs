mod prompt;

use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use static_copy_core::config::{load_config, log_everything};
use static_copy_core::error::EnvironmentError;
use static_copy_core::fetch::ProcessFetcher;
use static_copy_core::homepage::add_link_to_homepage;
use static_copy_core::reconcile::{CopyReport, ReconcileOptions, run_static_copy};
use static_copy_core::request::CopyRequest;
use static_copy_core::runtime::{
    PathOverrides, ResolutionContext, ResolvedPaths, ensure_prototype_root, resolve_paths,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::prompt::{CopyDetails, details_from_args, prompt_details};

#[derive(Debug, Parser)]
#[command(
    name = "static-copy",
    version,
    about = "Download a static copy of a website into a prototype's app/assets folder"
)]
struct Cli {
    #[arg(help = "Name for the copy; it is served under /public/<NAME>")]
    name: Option<String>,
    #[arg(help = "Absolute URL of the site to copy")]
    url: Option<String>,
    #[arg(help = "Username for basic auth, if the site needs one")]
    username: Option<String>,
    #[arg(help = "Password for basic auth, if the site needs one")]
    password: Option<String>,
    #[arg(long, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(long, help = "Do not add a link to app/views/index.html")]
    no_homepage_link: bool,
    #[arg(long, help = "Print the final report as JSON")]
    json: bool,
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            let code = error
                .chain()
                .find_map(|cause| cause.downcast_ref::<EnvironmentError>())
                .map(EnvironmentError::exit_code)
                .unwrap_or(1);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

fn init_logging() {
    let fallback = if log_everything() { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .compact()
        .try_init();
}

fn run(cli: Cli) -> Result<()> {
    let paths = resolve_runtime_paths(&cli)?;
    ensure_prototype_root(&paths)?;
    if cli.diagnostics {
        println!("[diagnostics]\n{}", paths.diagnostics());
    }
    let config = load_config(&paths.config_path)?;

    let details = match details_from_args(cli.name, cli.url, cli.username, cli.password)? {
        Some(details) => details,
        None => prompt_interactively()?,
    };
    let request = CopyRequest::new(
        &details.name,
        &details.url,
        details.username,
        details.password,
    )?;

    let options = ReconcileOptions {
        public_url: config.public_url(&request.name),
        scratch_dir: paths.scratch_dir_for_run(),
        destination: paths.destination_for(&request.name),
        fetch_policy: config.fetch.clone(),
    };
    let mut fetcher = ProcessFetcher::from_config(&config, log_everything());

    println!("This can take some time, feel free to make yourself a coffee while you wait.");
    println!();
    let report = run_static_copy(&mut fetcher, &request, &options, &mut |snapshot, ledger| {
        println!();
        println!("--- update ---");
        println!("Successes {}", snapshot.pages);
        println!("failures {}", ledger.failure_count());
        println!();
    })?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    finish(&paths, &report, cli.no_homepage_link);
    Ok(())
}

fn prompt_interactively() -> Result<CopyDetails> {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut output = io::stdout();
    prompt_details(&mut input, &mut output, |message: &str| {
        rpassword::prompt_password(message)
    })
}

fn finish(paths: &ResolvedPaths, report: &CopyReport, skip_link: bool) {
    println!();
    if skip_link {
        println!("Finished.");
        return;
    }
    match add_link_to_homepage(&paths.homepage_path, &report.public_url, &report.url) {
        Ok(true) => println!("Finished.  Link added to your prototype homepage."),
        Ok(false) => {
            info!(
                "no {{% endblock %}} marker in {}, homepage left unchanged",
                normalize_path(&paths.homepage_path)
            );
            println!("Finished.");
        }
        Err(error) => {
            warn!("{error:#}");
            println!("Finished.");
        }
    }
}

fn print_report(report: &CopyReport) {
    println!("static copy");
    println!("name: {}", report.name);
    println!("url: {}", report.url);
    println!("public_url: {}", report.public_url);
    println!("destination: {}", report.destination);
    println!("root_fetch: {}", report.root_fetch.as_str());
    println!("pages.processed: {}", report.scan.pages_processed);
    println!("pages.normalized: {}", report.scan.pages_normalized);
    println!("references.discovered: {}", report.scan.references.len());
    println!("gap.missing: {}", report.gap.missing.len());
    println!("gap.fetched: {}", report.gap.fetched.len());
    println!("gap.failed: {}", report.gap.failed.len());
    for failure in &report.scan.failures {
        println!("pages.failed: {} ({})", failure.path, failure.error);
    }

    let failed_urls = report.ledger.failed_urls();
    if failed_urls.is_empty() {
        return;
    }
    println!();
    println!("URLs named in fetcher diagnostics:");
    for url in failed_urls {
        println!("  - {url}");
    }
    let recent = report.ledger.recent_lines();
    if !recent.is_empty() {
        println!("last fetcher output:");
        for line in recent {
            println!("  | {line}");
        }
    }
}

fn resolve_runtime_paths(cli: &Cli) -> Result<ResolvedPaths> {
    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: cli.project_root.clone(),
        config: cli.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
