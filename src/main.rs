use anyhow::{bail, Context, Result};
use basecamp_export::auth::{
    apply_refresh, AuthState, SessionAuthenticator, SessionProvider, TokenAuthenticator,
};
use basecamp_export::basecamp::{
    parse_todo_url, BasecampClient, CrawlOptions, Crawler, ExportTree, API_BASE,
};
use basecamp_export::config::{ConfigStore, Credentials, DEFAULT_CONFIG_FILE};
use basecamp_export::export::{
    read_tree, write_csv, AttachmentDownloader, ExportError, Exporter, RunDirectory,
    DEFAULT_OUTPUT_ROOT,
};
use basecamp_export::jira::{IssueTracker, JiraClient, JiraSettings, JiraUploader};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "basecamp-export")]
#[command(
    about = "Export Basecamp 3 todos to JSON/CSV and push attachments to Jira",
    long_about = None
)]
struct Cli {
    /// Credentials document
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Debug logging for this crate
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the OAuth browser flow and store tokens and account id
    Authorize,
    /// Trade the stored refresh token for a new access token
    Refresh,
    /// Dump projects, crawl todos, write snapshots and CSV
    Export(ExportArgs),
    /// Export a single to-do from its Basecamp URL
    ExportTodo(ExportTodoArgs),
    /// Re-flatten an existing todos_deep.json snapshot to CSV
    Csv {
        #[arg(long)]
        snapshot: PathBuf,
        /// Directory for todos_jira.csv; defaults to the snapshot's directory
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Jira uploader
    Jira {
        #[command(subcommand)]
        command: JiraCommand,
    },
}

#[derive(Args, Debug)]
struct ExportArgs {
    #[arg(long, default_value = DEFAULT_OUTPUT_ROOT)]
    output: PathBuf,

    /// Log in with username/password and download attachments
    #[arg(long)]
    download_attachments: bool,

    /// Refresh the access token before crawling
    #[arg(long)]
    refresh_first: bool,

    /// Crawl lists flat, ignoring groups
    #[arg(long)]
    no_groups: bool,

    /// Read only the first page of each comment collection
    #[arg(long)]
    no_comment_pagination: bool,

    #[command(flatten)]
    retry: RetryArgs,
}

#[derive(Args, Debug)]
struct ExportTodoArgs {
    /// e.g. https://3.basecamp.com/<account>/buckets/<project>/todos/<id>
    url: String,

    #[arg(long, default_value = DEFAULT_OUTPUT_ROOT)]
    output: PathBuf,

    /// Log in with username/password and download the to-do's attachments
    #[arg(long)]
    download_attachments: bool,

    /// Refresh the access token first
    #[arg(long)]
    refresh_first: bool,

    #[command(flatten)]
    retry: RetryArgs,
}

#[derive(Args, Debug)]
struct RetryArgs {
    /// Attempts per to-do detail fetch
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..=10))]
    max_attempts: u32,

    /// First backoff delay; doubles after each failed attempt
    #[arg(long, default_value_t = 1.0, value_parser = parse_backoff_secs)]
    backoff_base_secs: f64,
}

const MAX_BACKOFF_BASE_SECS: f64 = 600.0;

fn parse_backoff_secs(value: &str) -> Result<f64, String> {
    let secs: f64 = value
        .parse()
        .map_err(|_| format!("`{}` is not a number of seconds", value))?;
    if !secs.is_finite() || !(0.0..=MAX_BACKOFF_BASE_SECS).contains(&secs) {
        return Err(format!(
            "must be between 0 and {} seconds",
            MAX_BACKOFF_BASE_SECS
        ));
    }
    Ok(secs)
}

impl RetryArgs {
    fn apply(&self, options: CrawlOptions) -> CrawlOptions {
        options.with_retry(
            self.max_attempts,
            Duration::from_secs_f64(self.backoff_base_secs),
        )
    }
}

#[derive(Subcommand, Debug)]
enum JiraCommand {
    /// Check credentials against /myself
    TestConnection,
    /// Upload attachments/todo_<id>/ files to the issue labelled <id>
    Upload {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        attachments: PathBuf,
        #[arg(long)]
        dry_run: bool,
    },
    /// Transition issues of completed todos
    UpdateCompleted {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long, default_value = "Done")]
        target_status: String,
        #[arg(long)]
        dry_run: bool,
    },
}

fn setup_logging(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::new("basecamp_export=debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("basecamp_export=info"))
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let store = ConfigStore::new(&cli.config);
    let mut credentials = store
        .load()
        .with_context(|| format!("Failed to load {}", store.path().display()))?;

    match cli.command {
        Command::Authorize => authorize(&store, &mut credentials).await,
        Command::Refresh => refresh(&store, &mut credentials).await,
        Command::Export(args) => {
            if args.refresh_first {
                refresh(&store, &mut credentials).await?;
            }
            export(&credentials, args).await
        }
        Command::ExportTodo(args) => {
            if args.refresh_first {
                refresh(&store, &mut credentials).await?;
            }
            export_todo(&credentials, args).await
        }
        Command::Csv { snapshot, output } => replay_csv(snapshot, output),
        Command::Jira { command } => jira(&credentials, command).await,
    }
}

async fn authorize(store: &ConfigStore, credentials: &mut Credentials) -> Result<()> {
    let (client_id, _) = credentials.client_credentials()?;
    let client_id = client_id.to_string();
    let redirect_uri = credentials.redirect_uri().to_string();

    let mut authenticator = TokenAuthenticator::new();
    authenticator
        .initiate_authorization(&client_id, &redirect_uri)
        .await?;

    match authenticator.await_callback(credentials).await {
        AuthState::Authenticated => {
            store.save(credentials)?;
            tracing::info!("Authorized; tokens saved to {}", store.path().display());
            Ok(())
        }
        state => bail!("Authorization did not complete (state: {:?})", state),
    }
}

async fn refresh(store: &ConfigStore, credentials: &mut Credentials) -> Result<()> {
    let Some(refresh_token) = credentials.refresh_token.clone().filter(|t| !t.is_empty()) else {
        bail!(
            "No refresh_token in {}; run `basecamp-export authorize` first",
            store.path().display()
        );
    };
    let (client_id, client_secret) = credentials
        .client_credentials()
        .context("Run `basecamp-export authorize` after setting client_id and client_secret")?;
    let (client_id, client_secret) = (client_id.to_string(), client_secret.to_string());

    let mut authenticator = TokenAuthenticator::new();
    let Some(tokens) = authenticator
        .refresh(&refresh_token, &client_id, &client_secret)
        .await
    else {
        bail!("Token refresh failed; run `basecamp-export authorize` again");
    };

    if !apply_refresh(credentials, tokens) {
        bail!("Token refresh returned no access token");
    }
    store.save(credentials)?;
    tracing::info!("Access token refreshed");
    Ok(())
}

async fn export(credentials: &Credentials, args: ExportArgs) -> Result<()> {
    let account_id = credentials
        .account_id
        .clone()
        .ok_or(ExportError::MissingAccountId)?;
    let client = BasecampClient::from_credentials(credentials)?;

    let options = args.retry.apply(CrawlOptions {
        follow_groups: !args.no_groups,
        paginate_comments: !args.no_comment_pagination,
        ..CrawlOptions::default()
    });
    let crawler = Crawler::new(&client, API_BASE, &account_id, options);

    let (summary, tree) = Exporter::new(crawler, &args.output).run().await?;
    tracing::info!(
        "Exported {} task(s) from {} project(s) into {}",
        summary.tasks,
        summary.projects,
        summary.run_dir.display()
    );

    if args.download_attachments {
        download_attachments(credentials, &RunDirectory::at(&summary.run_dir), &tree).await?;
    }

    Ok(())
}

async fn export_todo(credentials: &Credentials, args: ExportTodoArgs) -> Result<()> {
    let account_id = credentials
        .account_id
        .clone()
        .ok_or(ExportError::MissingAccountId)?;
    let link = parse_todo_url(&args.url)?;
    if let Some(linked) = link.account_id.as_deref().filter(|id| *id != account_id) {
        tracing::warn!(
            "URL belongs to account {}, fetching through configured account {}",
            linked,
            account_id
        );
    }

    let client = BasecampClient::from_credentials(credentials)?;
    let options = args.retry.apply(CrawlOptions::default());
    let crawler = Crawler::new(&client, API_BASE, &account_id, options);

    let (run, tree) = Exporter::new(crawler, &args.output)
        .export_todo(&link)
        .await?;
    println!("Exported JSON: {}", run.todo_json_path(link.todo_id).display());
    println!("Exported CSV : {}", run.todo_csv_path(link.todo_id).display());

    if args.download_attachments {
        download_attachments(credentials, &run, &tree).await?;
    }

    Ok(())
}

/// Session login then per-todo downloads. A failed login is logged and
/// leaves the JSON/CSV export standing.
async fn download_attachments(
    credentials: &Credentials,
    run: &RunDirectory,
    tree: &ExportTree,
) -> Result<()> {
    let mut session = SessionAuthenticator::new()?;
    if !session.login(credentials).await {
        tracing::error!("Session login failed; attachments were not downloaded");
        return Ok(());
    }

    let downloader = AttachmentDownloader::new(&session, run.attachments_dir());
    let downloads = downloader.download_all(tree).await?;
    tracing::info!(
        "{}/{} attachment(s) saved under {}",
        downloads.succeeded,
        downloads.attempted,
        downloader.root().display()
    );
    if downloads.failed() > 0 {
        tracing::warn!("{} attachment download(s) failed", downloads.failed());
    }
    Ok(())
}

fn replay_csv(snapshot: PathBuf, output: Option<PathBuf>) -> Result<()> {
    let tree = read_tree(&snapshot)
        .with_context(|| format!("Failed to read {}", snapshot.display()))?;

    let dir = match output {
        Some(dir) => dir,
        None => snapshot
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    std::fs::create_dir_all(&dir)?;

    let run = RunDirectory::at(dir);
    write_csv(&tree, &run.csv_path())?;
    Ok(())
}

async fn jira(credentials: &Credentials, command: JiraCommand) -> Result<()> {
    let settings = JiraSettings::from_credentials(credentials)?;
    let client = JiraClient::new(&settings)?;
    let uploader = JiraUploader::new(&client);

    match command {
        JiraCommand::TestConnection => {
            let user = client.test_connection().await?;
            println!(
                "Connected as {}",
                user.display_name.as_deref().unwrap_or("Unknown")
            );
        }
        JiraCommand::Upload {
            csv,
            attachments,
            dry_run,
        } => {
            let summary = uploader
                .upload_all_attachments(&csv, &attachments, dry_run)
                .await?;
            println!(
                "{} todo(s), {} issue(s) processed, {} file(s) uploaded, {} failed",
                summary.todos,
                summary.issues_processed,
                summary.files_uploaded,
                summary.files_failed
            );
        }
        JiraCommand::UpdateCompleted {
            csv,
            target_status,
            dry_run,
        } => {
            let summary = uploader
                .update_completed(&csv, &target_status, dry_run)
                .await?;
            println!(
                "{}/{} completed todo(s) moved to '{}', {} failed",
                summary.updated, summary.completed_todos, target_status, summary.failed
            );
        }
    }

    Ok(())
}
