//! Command definitions and handlers for the `juristi-sync` binary.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;

use juristi_sync::ClientConfig;
use juristi_sync::api::types::{
    CreateCalendarEvent, Document, DocumentStatus, ReasoningMode, UploadFile,
};
use juristi_sync::api::{CaseApi, HttpCaseApi};
use juristi_sync::auth::{self, HttpTokenRefresher, TokenProvider};
use juristi_sync::sync::{ChatRole, FileChatCache, GHOST_UPLOAD_ID};
use juristi_sync::transport::HttpPushConnector;
use juristi_sync::workspace::{CaseWorkspace, NoticeLevel, SendOutcome, WorkspaceOptions};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Real-time case document and chat client for the Juristi API.
#[derive(Parser)]
#[command(name = "juristi-sync", version, about)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in and print the tokens as shell exports.
    Login {
        username: String,
        #[arg(long, env = "JURISTI_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Follow live document updates for a case until interrupted.
    Watch {
        case_id: String,
    },

    /// Ask the case assistant a question and stream the answer.
    Chat {
        case_id: String,
        message: String,

        /// Use the deep reasoning tier (PRO subscriptions only).
        #[arg(long)]
        deep: bool,

        /// Restrict the answer to one document.
        #[arg(long)]
        document: Option<String>,

        /// Clear the case chat history instead of sending.
        #[arg(long, conflicts_with = "deep")]
        clear: bool,
    },

    /// Upload a file to a case.
    Upload {
        case_id: String,
        path: PathBuf,
    },

    /// List the documents of a case.
    Documents {
        case_id: String,
    },

    /// Delete one or more documents.
    Delete {
        case_id: String,
        #[arg(required = true)]
        document_ids: Vec<String>,
    },

    /// Rename a document. The original extension is kept.
    Rename {
        case_id: String,
        document_id: String,
        new_name: String,
    },

    /// Move a document into the archive.
    Archive {
        case_id: String,
        document_id: String,
    },

    /// Manage calendar events.
    Calendar {
        #[command(subcommand)]
        action: CalendarAction,
    },

    /// Query the law library.
    Laws {
        #[command(subcommand)]
        action: LawsAction,
    },

    /// Show the signed-in user.
    Me,

    /// List all users (administrators only).
    Users,
}

#[derive(Subcommand)]
enum CalendarAction {
    List,
    Add {
        #[arg(long)]
        case_id: String,
        #[arg(long)]
        title: String,
        /// ISO-8601 start date or datetime.
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        all_day: bool,
        #[arg(long, default_value = "DEADLINE")]
        event_type: String,
        #[arg(long, default_value = "MEDIUM")]
        priority: String,
    },
    Delete {
        event_id: String,
    },
}

#[derive(Subcommand)]
enum LawsAction {
    Search {
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
    Article {
        law_title: String,
        article_number: String,
    },
}

/// Transport stack shared by every command.
struct Client {
    config: ClientConfig,
    http: reqwest::Client,
    tokens: Arc<TokenProvider>,
    api: Arc<HttpCaseApi>,
    connector: Arc<HttpPushConnector>,
}

impl Client {
    fn connect(config: ClientConfig) -> anyhow::Result<Self> {
        // No total timeout: the push channel and chat responses are long-lived.
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("juristi-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;

        let refresher =
            HttpTokenRefresher::new(http.clone(), &config.api_url, config.refresh_token.clone())?;
        let tokens = Arc::new(TokenProvider::new(
            Arc::new(refresher),
            config.access_token.clone(),
        ));
        let api = Arc::new(HttpCaseApi::new(
            http.clone(),
            config.api_url.clone(),
            tokens.clone(),
            config.request_timeout,
        ));
        let connector = Arc::new(HttpPushConnector::new(http.clone(), &config.api_url)?);

        Ok(Self {
            config,
            http,
            tokens,
            api,
            connector,
        })
    }

    fn workspace(&self, deep_reasoning: bool) -> CaseWorkspace {
        let cache = FileChatCache::new(self.config.cache_dir.join("chat"));
        CaseWorkspace::new(
            self.api.clone(),
            self.connector.clone(),
            self.tokens.clone(),
            Arc::new(cache),
            self.config.reconnect,
            WorkspaceOptions {
                jurisdiction: self.config.jurisdiction.clone(),
                deep_reasoning,
            },
        )
    }

    /// Deep reasoning is allowed by configuration or by the account's tier.
    async fn deep_reasoning_allowed(&self) -> bool {
        if self.config.deep_reasoning {
            return true;
        }
        match self.api.current_user().await {
            Ok(profile) => profile.can_use_deep_reasoning(),
            Err(e) => {
                tracing::warn!("Could not read subscription tier: {}", e);
                false
            }
        }
    }
}

pub async fn run(cli: Cli, config: ClientConfig) -> anyhow::Result<()> {
    let client = Client::connect(config)?;

    match cli.command {
        Command::Login { username, password } => {
            let tokens =
                auth::login(&client.http, &client.config.api_url, &username, &password).await?;
            println!(
                "export JURISTI_ACCESS_TOKEN={}",
                tokens.access_token.expose_secret()
            );
            match tokens.refresh_token {
                Some(refresh) => println!("export JURISTI_REFRESH_TOKEN={}", refresh.expose_secret()),
                None => eprintln!("warning: server did not return a refresh token"),
            }
            Ok(())
        }
        Command::Watch { case_id } => watch(&client, &case_id).await,
        Command::Chat {
            case_id,
            message,
            deep,
            document,
            clear,
        } => {
            if clear {
                let workspace = client.workspace(false);
                workspace.open(&case_id).await?;
                workspace.clear_chat().await?;
                workspace.close().await;
                println!("Chat history cleared.");
                return Ok(());
            }
            let mode = if deep {
                ReasoningMode::Deep
            } else {
                ReasoningMode::Fast
            };
            let allowed = deep && client.deep_reasoning_allowed().await;
            chat(&client, &case_id, &message, mode, allowed, document.as_deref()).await
        }
        Command::Upload { case_id, path } => upload(&client, &case_id, path).await,
        Command::Documents { case_id } => {
            let documents = client.api.list_documents(&case_id).await?;
            if documents.is_empty() {
                println!("No documents.");
            }
            for document in &documents {
                print_document(document);
            }
            Ok(())
        }
        Command::Delete {
            case_id,
            document_ids,
        } => {
            let workspace = client.workspace(false);
            workspace.open(&case_id).await?;
            let findings = match document_ids.as_slice() {
                [single] => workspace.delete_document(single).await?,
                many => workspace.bulk_delete(many).await?,
            };
            workspace.close().await;
            println!(
                "Deleted {} document(s), {} finding(s).",
                document_ids.len(),
                findings.len()
            );
            Ok(())
        }
        Command::Rename {
            case_id,
            document_id,
            new_name,
        } => {
            let workspace = client.workspace(false);
            workspace.open(&case_id).await?;
            let file_name = workspace.rename_document(&document_id, &new_name).await?;
            workspace.close().await;
            println!("Renamed to {file_name}");
            Ok(())
        }
        Command::Archive {
            case_id,
            document_id,
        } => {
            let item = client.api.archive_document(&case_id, &document_id).await?;
            println!(
                "Archived {} as {}",
                item.title,
                item.id.as_deref().unwrap_or("-")
            );
            Ok(())
        }
        Command::Calendar { action } => calendar(&client, action).await,
        Command::Laws { action } => laws(&client, action).await,
        Command::Me => {
            let profile = client.api.current_user().await?;
            println!("{} <{}>", profile.username, profile.email.as_deref().unwrap_or("-"));
            println!("  role:   {}", profile.role.as_deref().unwrap_or("-"));
            println!(
                "  tier:   {}",
                profile.subscription_tier.as_deref().unwrap_or("-")
            );
            println!("  deep reasoning: {}", profile.can_use_deep_reasoning());
            Ok(())
        }
        Command::Users => {
            for user in client.api.list_users().await? {
                println!(
                    "{}  {}  {}",
                    user.id,
                    user.username,
                    user.role.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
    }
}

fn print_document(document: &Document) {
    let percent = document
        .progress_percent
        .map(|p| format!("{p:>3}%"))
        .unwrap_or_else(|| "   -".to_string());
    println!(
        "{:<26} {:<10} {} {}",
        document.id,
        format!("{:?}", document.status).to_uppercase(),
        percent,
        document.file_name
    );
    if document.status == DocumentStatus::Failed
        && let Some(error) = &document.error_message
    {
        println!("{:<26} error: {error}", "");
    }
}

async fn watch(client: &Client, case_id: &str) -> anyhow::Result<()> {
    let workspace = client.workspace(false);
    let mut status = workspace.connection_status();
    let mut changes = workspace.changes();
    let mut notices = workspace.notices();

    workspace.open(case_id).await?;
    let mut seen: HashMap<String, Document> = HashMap::new();
    for document in workspace.documents().await {
        print_document(&document);
        seen.insert(document.id.clone(), document);
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            Ok(()) = status.changed() => {
                let current = *status.borrow_and_update();
                eprintln!("[{current}]");
            }
            Ok(()) = changes.changed() => {
                changes.borrow_and_update();
                for document in workspace.documents().await {
                    if seen.get(&document.id) != Some(&document) {
                        print_document(&document);
                        seen.insert(document.id.clone(), document);
                    }
                }
            }
            Ok(notice) = notices.recv() => {
                if notice.level == NoticeLevel::Error {
                    eprintln!("error: {}", notice.message);
                }
            }
        }
    }

    workspace.close().await;
    Ok(())
}

async fn chat(
    client: &Client,
    case_id: &str,
    message: &str,
    mode: ReasoningMode,
    deep_reasoning: bool,
    document_id: Option<&str>,
) -> anyhow::Result<()> {
    let workspace = client.workspace(deep_reasoning);
    workspace.open(case_id).await?;
    if document_id.is_some() {
        workspace.set_document_context(document_id).await?;
    }

    let mut changes = workspace.changes();
    let mut printed = 0usize;
    let send = workspace.send_message(message, mode);
    tokio::pin!(send);
    let outcome = loop {
        tokio::select! {
            outcome = &mut send => break outcome,
            Ok(()) = changes.changed() => {
                changes.borrow_and_update();
                print_answer_delta(&workspace, &mut printed).await;
            }
        }
    };

    match outcome {
        SendOutcome::Completed => {
            print_answer_delta(&workspace, &mut printed).await;
            println!();
        }
        SendOutcome::Failed => {
            println!();
            if let Some(last) = workspace.messages().await.last() {
                eprintln!("{}", last.content);
            }
        }
        SendOutcome::Abandoned => eprintln!("Case closed before the answer finished."),
        SendOutcome::Rejected(reason) => anyhow::bail!("message not sent: {reason:?}"),
    }
    workspace.close().await;
    Ok(())
}

/// Print whatever part of the streaming answer has not been printed yet.
async fn print_answer_delta(workspace: &CaseWorkspace, printed: &mut usize) {
    use std::io::Write;

    let Some(last) = workspace.messages().await.pop() else {
        return;
    };
    if last.role != ChatRole::Ai {
        return;
    }
    if let Some(rest) = last.content.get(*printed..)
        && !rest.is_empty()
    {
        print!("{rest}");
        let _ = std::io::stdout().flush();
        *printed = last.content.len();
    }
}

async fn upload(client: &Client, case_id: &str, path: PathBuf) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .context("path has no file name")?;
    let mime_type = mime_guess::from_path(&path)
        .first_or_octet_stream()
        .essence_str()
        .to_string();

    let workspace = client.workspace(false);
    workspace.open(case_id).await?;
    let mut changes = workspace.changes();

    let upload = workspace.upload(UploadFile {
        file_name,
        mime_type,
        bytes: bytes.into(),
    });
    tokio::pin!(upload);
    let result = loop {
        tokio::select! {
            result = &mut upload => break result,
            Ok(()) = changes.changed() => {
                changes.borrow_and_update();
                let ghost = workspace.documents().await.into_iter().find(|d| d.id == GHOST_UPLOAD_ID);
                if let Some(percent) = ghost.and_then(|d| d.progress_percent) {
                    eprint!("\rUploading... {percent:>3}%");
                }
            }
        }
    };
    eprintln!();

    let document = result?;
    print_document(&document);
    workspace.close().await;
    Ok(())
}

async fn calendar(client: &Client, action: CalendarAction) -> anyhow::Result<()> {
    match action {
        CalendarAction::List => {
            for event in client.api.list_calendar_events().await? {
                println!(
                    "{}  {}  {}  {}",
                    event.id,
                    event.start_date,
                    event.event_type.as_deref().unwrap_or("-"),
                    event.title
                );
            }
        }
        CalendarAction::Add {
            case_id,
            title,
            start,
            end,
            description,
            all_day,
            event_type,
            priority,
        } => {
            let event = client
                .api
                .create_calendar_event(&CreateCalendarEvent {
                    case_id,
                    title,
                    description,
                    start_date: start,
                    end_date: end,
                    is_all_day: all_day,
                    event_type,
                    priority,
                })
                .await?;
            println!("Created event {}", event.id);
        }
        CalendarAction::Delete { event_id } => {
            client.api.delete_calendar_event(&event_id).await?;
            println!("Deleted event {event_id}");
        }
    }
    Ok(())
}

async fn laws(client: &Client, action: LawsAction) -> anyhow::Result<()> {
    match action {
        LawsAction::Search { query, limit } => {
            let hits = client.api.search_laws(&query, limit).await?;
            if hits.is_empty() {
                println!("No matches.");
            }
            for hit in hits {
                println!(
                    "{} neni {}",
                    hit.law_title.as_deref().unwrap_or("?"),
                    hit.article_number.as_deref().unwrap_or("?")
                );
                println!("  {}", hit.text.trim());
            }
        }
        LawsAction::Article {
            law_title,
            article_number,
        } => {
            let article = client.api.law_article(&law_title, &article_number).await?;
            println!("{} neni {}", article.law_title, article.article_number);
            println!();
            println!("{}", article.content);
        }
    }
    Ok(())
}
