use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "doorman", about = "Doorman access control CLI", version)]
struct Cli {
    /// Base URL of the doormand HTTP API
    #[arg(long, env = "DOORMAN_SERVER", default_value = "http://127.0.0.1:5000", global = true)]
    server: String,

    /// Print raw JSON responses
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a new person from a face image
    Register {
        image: PathBuf,
        #[arg(short, long)]
        name: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        /// Use this id instead of a generated one
        #[arg(long)]
        id: Option<String>,
    },
    /// Ask for an access decision on a face image
    Recognize { image: PathBuf },
    /// Check whether two images show the same person
    Verify { image1: PathBuf, image2: PathBuf },
    /// Manage enrolled users
    Users {
        #[command(subcommand)]
        command: UsersCommand,
    },
    /// Show recent access log entries
    Logs {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
        /// newest or insertion
        #[arg(long, default_value = "newest")]
        order: String,
    },
    /// Delete every access log entry
    LogsClear,
    /// Show daemon health and matching configuration
    Status,
}

#[derive(Subcommand)]
enum UsersCommand {
    List,
    Show {
        id: String,
    },
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        /// active or inactive
        #[arg(long)]
        status: Option<String>,
    },
    Remove {
        id: String,
    },
}

struct ApiClient {
    http: reqwest::Client,
    base: String,
}

impl ApiClient {
    fn new(base: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("doorman-cli/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    async fn call(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = format!("{}{path}", self.base);
        tracing::debug!(%method, %url, "sending request");
        let mut req = self.http.request(method, &url);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let response = req
            .send()
            .await
            .with_context(|| format!("cannot reach doormand at {}", self.base))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .with_context(|| format!("reading response from {url}"))?;
        interpret(status, &body)
    }
}

/// Turn a response into its JSON value, or an error naming the status.
///
/// Failures raised by middleware (timeouts, oversized bodies) may carry an
/// empty or plain-text body, so the status is checked before parsing.
fn interpret(status: StatusCode, body: &[u8]) -> Result<Value> {
    if !status.is_success() {
        let message = match serde_json::from_slice::<Value>(body) {
            Ok(value) => error_message(&value),
            Err(_) => {
                let text = String::from_utf8_lossy(body).trim().to_string();
                if text.is_empty() {
                    status.canonical_reason().unwrap_or("request failed").to_string()
                } else {
                    text
                }
            }
        };
        bail!("{message} ({status})");
    }
    serde_json::from_slice(body).context("unreadable response body")
}

fn error_message(value: &Value) -> String {
    value["error"]["message"]
        .as_str()
        .or_else(|| value["message"].as_str())
        .unwrap_or("request failed")
        .to_string()
}

fn read_image(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(STANDARD.encode(bytes))
}

fn summarize_recognition(value: &Value) -> String {
    if value["authorized"].as_bool() == Some(true) {
        format!(
            "GRANTED  {} ({})  confidence {:.1}%",
            value["identity"]["name"].as_str().unwrap_or("?"),
            value["identity"]["user_id"].as_str().unwrap_or("?"),
            value["confidence"].as_f64().unwrap_or(0.0) * 100.0
        )
    } else {
        format!("DENIED   {}", value["reason"].as_str().unwrap_or("no match"))
    }
}

fn summarize_user(user: &Value) -> String {
    format!(
        "{:<40} {:<24} {:<8} {}",
        user["user_id"].as_str().unwrap_or("?"),
        user["name"].as_str().unwrap_or("?"),
        user["status"].as_str().unwrap_or("?"),
        user["email"].as_str().unwrap_or("-")
    )
}

fn summarize_log(entry: &Value) -> String {
    let outcome = if entry["authorized"].as_bool() == Some(true) {
        "GRANTED"
    } else {
        "DENIED "
    };
    let detail = match entry["reason"].as_str() {
        Some(reason) => reason.to_string(),
        None => format!(
            "{} ({:.1}%)",
            entry["identity_name"].as_str().unwrap_or("?"),
            entry["confidence"].as_f64().unwrap_or(0.0) * 100.0
        ),
    };
    format!("{}  {}  {}", entry["timestamp"].as_str().unwrap_or("?"), outcome, detail)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = ApiClient::new(&cli.server)?;

    let (value, summary) = match cli.command {
        Commands::Register {
            image,
            name,
            email,
            phone,
            id,
        } => {
            let body = json!({
                "image": read_image(&image)?,
                "name": name,
                "email": email,
                "phone": phone,
                "user_id": id,
            });
            let value = client.call(Method::POST, "/api/register", Some(body)).await?;
            let summary = format!(
                "Registered {} as {}",
                value["name"].as_str().unwrap_or("?"),
                value["user_id"].as_str().unwrap_or("?")
            );
            (value, summary)
        }
        Commands::Recognize { image } => {
            let body = json!({ "image": read_image(&image)? });
            let value = client.call(Method::POST, "/api/recognize", Some(body)).await?;
            let summary = summarize_recognition(&value);
            (value, summary)
        }
        Commands::Verify { image1, image2 } => {
            let body = json!({ "image1": read_image(&image1)?, "image2": read_image(&image2)? });
            let value = client.call(Method::POST, "/api/verify", Some(body)).await?;
            let summary = format!(
                "{}  distance {:.4} (threshold {:.2})  similarity {:.2}%",
                if value["verified"].as_bool() == Some(true) {
                    "SAME PERSON"
                } else {
                    "DIFFERENT"
                },
                value["distance"].as_f64().unwrap_or(f64::NAN),
                value["threshold"].as_f64().unwrap_or(f64::NAN),
                value["similarity"].as_f64().unwrap_or(0.0)
            );
            (value, summary)
        }
        Commands::Users { command } => match command {
            UsersCommand::List => {
                let value = client.call(Method::GET, "/api/users", None).await?;
                let users = value["users"].as_array().cloned().unwrap_or_default();
                let mut lines: Vec<String> = users.iter().map(summarize_user).collect();
                lines.push(format!("{} user(s)", users.len()));
                (value, lines.join("\n"))
            }
            UsersCommand::Show { id } => {
                let value = client.call(Method::GET, &format!("/api/user/{id}"), None).await?;
                let summary = summarize_user(&value["user"]);
                (value, summary)
            }
            UsersCommand::Update {
                id,
                name,
                email,
                phone,
                status,
            } => {
                let mut patch = serde_json::Map::new();
                for (key, field) in [("name", name), ("email", email), ("phone", phone), ("status", status)] {
                    if let Some(v) = field {
                        patch.insert(key.to_string(), Value::String(v));
                    }
                }
                if patch.is_empty() {
                    bail!("nothing to update: pass at least one of --name, --email, --phone, --status");
                }
                let value = client
                    .call(Method::PUT, &format!("/api/user/{id}"), Some(Value::Object(patch)))
                    .await?;
                let summary = summarize_user(&value["user"]);
                (value, summary)
            }
            UsersCommand::Remove { id } => {
                let value = client.call(Method::DELETE, &format!("/api/user/{id}"), None).await?;
                let summary = error_message(&value);
                (value, summary)
            }
        },
        Commands::Logs { limit, order } => {
            let value = client
                .call(Method::GET, &format!("/api/logs?limit={limit}&order={order}"), None)
                .await?;
            let logs = value["logs"].as_array().cloned().unwrap_or_default();
            let summary = logs.iter().map(summarize_log).collect::<Vec<_>>().join("\n");
            (value, summary)
        }
        Commands::LogsClear => {
            let value = client.call(Method::DELETE, "/api/logs/clear", None).await?;
            let summary = error_message(&value);
            (value, summary)
        }
        Commands::Status => {
            let health = client.call(Method::GET, "/api/health", None).await?;
            let config = client.call(Method::GET, "/api/config", None).await?;
            let summary = format!(
                "doormand {} {}  model {}  metric {}  threshold {}",
                health["version"].as_str().unwrap_or("?"),
                health["status"].as_str().unwrap_or("?"),
                config["model"].as_str().unwrap_or("?"),
                config["metric"].as_str().unwrap_or("?"),
                config["recognition_threshold"]
            );
            (json!({ "health": health, "config": config }), summary)
        }
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else if !summary.is_empty() {
        println!("{summary}");
    }
    Ok(())
}
