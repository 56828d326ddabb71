//! haven-cli: terminal client for the Haven incident reporting API
//!
//! # Subcommands
//! - `intake`                 - guided conversation that ends in a report
//! - `report --type --description [--location] [--evidence]` - direct report
//! - `list [--json]`          - own incidents (all for authority users)
//! - `status <id> <status>`   - change an incident's status (authority)
//! - `hotspots [--json]`      - risk hotspots (authority)
//! - `health`                 - show server health
//!
//! The caller identity is sent in the `x-user-id` header (`--user` or
//! `HAVEN_USER_ID`).

use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};

const DEFAULT_SERVER: &str = "http://127.0.0.1:8780";
const USER_ID_HEADER: &str = "x-user-id";
const SUMMARY_COMMAND: &str = "/summary";

/// Suggested incident types, in menu order.
const INCIDENT_TYPES: [&str; 5] = [
    "Harassment",
    "Stalking",
    "Suspicious Activity",
    "Unsafe Environment",
    "Other",
];

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "haven-cli",
    version,
    about = "Haven — guided incident intake and reviewer triage from the terminal"
)]
struct Cli {
    /// Haven HTTP server URL (overrides HAVEN_HTTP_URL env var)
    #[arg(long, env = "HAVEN_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    /// Caller user id, sent as x-user-id
    #[arg(long, env = "HAVEN_USER_ID")]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Talk through an incident with the intake assistant, then submit it
    Intake {
        /// Incident type (prompted when omitted)
        #[arg(long = "type")]
        incident_type: Option<String>,

        /// Location: free text, "lat,lon" or "lat,lon|address"
        #[arg(long)]
        location: Option<String>,

        /// Submit without a reporter name
        #[arg(long)]
        anonymous: bool,

        /// Reporter name
        #[arg(long)]
        name: Option<String>,

        /// Print the drafted description without submitting
        #[arg(long)]
        no_submit: bool,
    },

    /// Submit an incident report directly
    Report {
        #[arg(long = "type")]
        incident_type: String,

        #[arg(long)]
        description: String,

        #[arg(long)]
        location: Option<String>,

        /// Evidence file to upload (jpeg, png, gif or mp4)
        #[arg(long)]
        evidence: Option<String>,

        #[arg(long)]
        anonymous: bool,

        #[arg(long)]
        name: Option<String>,
    },

    /// List incidents
    List {
        #[arg(long)]
        json: bool,
    },

    /// Change an incident's status (pending, in_review, resolved, closed)
    Status { id: String, status: String },

    /// Show risk hotspots
    Hotspots {
        #[arg(long)]
        json: bool,
    },

    /// Show Haven server health
    Health,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct IncidentSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub incident_type: String,
    pub description: String,
    pub status: String,
    pub location: Option<String>,
    pub reported_at: String,
    #[serde(default)]
    pub is_anonymous: bool,
}

#[derive(Debug, Deserialize)]
pub struct IncidentList {
    pub incidents: Vec<IncidentSummary>,
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct HotspotView {
    pub lat: f64,
    pub lon: f64,
    pub count: usize,
    pub name: String,
    pub level: String,
}

#[derive(Debug, Deserialize)]
pub struct HotspotList {
    pub hotspots: Vec<HotspotView>,
}

// ============================================================================
// Formatting helpers
// ============================================================================

/// One-line listing entry; descriptions are cut to 60 chars.
pub fn format_incident_line(incident: &IncidentSummary) -> String {
    let first_line = incident
        .description
        .lines()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("");
    let preview: String = first_line.chars().take(60).collect();
    let ellipsis = if first_line.chars().count() > 60 { "…" } else { "" };

    format!(
        "{}  [{}] {} — {}{}",
        incident.id, incident.status, incident.incident_type, preview, ellipsis
    )
}

pub fn format_hotspot_line(hotspot: &HotspotView) -> String {
    format!(
        "{:<6} {:>3} incidents  {:.3},{:.3}  {}",
        hotspot.level, hotspot.count, hotspot.lat, hotspot.lon, hotspot.name
    )
}

/// Accept a menu number (1-based) or a free-form type name.
pub fn parse_type_choice(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    match input.parse::<usize>() {
        Ok(n) if (1..=INCIDENT_TYPES.len()).contains(&n) => Some(INCIDENT_TYPES[n - 1].to_string()),
        Ok(_) => None,
        Err(_) => Some(input.to_string()),
    }
}

/// Evidence content type from the file extension.
pub fn content_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "mp4" => Some("video/mp4"),
        _ => None,
    }
}

/// What the reporter does with the drafted description before submitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftEdit {
    Keep,
    Replace,
    Append,
}

pub fn parse_draft_edit(input: &str) -> Option<DraftEdit> {
    match input.trim().to_ascii_lowercase().as_str() {
        "" | "k" | "keep" => Some(DraftEdit::Keep),
        "r" | "replace" => Some(DraftEdit::Replace),
        "a" | "add" | "append" => Some(DraftEdit::Append),
        _ => None,
    }
}

/// Apply an edit to the draft. Blank text leaves the draft as it was.
pub fn revise_description(draft: &str, edit: DraftEdit, text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        return draft.to_string();
    }
    match edit {
        DraftEdit::Keep => draft.to_string(),
        DraftEdit::Replace => text.to_string(),
        DraftEdit::Append => format!("{}\n\n{}", draft.trim_end(), text),
    }
}

pub fn error_message(body: &Value) -> String {
    body["error"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}

// ============================================================================
// HTTP Client
// ============================================================================

struct Api {
    client: Client,
    server: String,
    user: Option<String>,
}

impl Api {
    fn new(server: &str, user: Option<String>, timeout_secs: u64) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            server: server.trim_end_matches('/').to_string(),
            user,
        })
    }

    fn with_user(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.user {
            Some(user) => builder.header(USER_ID_HEADER, user),
            None => builder,
        }
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.with_user(self.client.get(format!("{}{}", self.server, path)))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.with_user(self.client.post(format!("{}{}", self.server, path)))
    }

    fn patch(&self, path: &str) -> RequestBuilder {
        self.with_user(self.client.patch(format!("{}{}", self.server, path)))
    }

    /// Send and decode the JSON body, whatever the status.
    fn send(&self, builder: RequestBuilder) -> anyhow::Result<(StatusCode, Value)> {
        let resp: Response = builder
            .send()
            .with_context(|| format!("connection failed to {}", self.server))?;
        let status = resp.status();
        let body = resp.json::<Value>().unwrap_or(Value::Null);
        Ok((status, body))
    }

    /// Send and require a 2xx response.
    fn send_ok(&self, builder: RequestBuilder) -> anyhow::Result<Value> {
        let (status, body) = self.send(builder)?;
        if !status.is_success() {
            bail!("server returned {}: {}", status, error_message(&body));
        }
        Ok(body)
    }
}

fn prompt(label: &str) -> anyhow::Result<Option<String>> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

/// Read lines until a blank line or EOF.
fn read_block() -> anyhow::Result<String> {
    let mut lines = Vec::new();
    while let Some(line) = prompt("> ")? {
        if line.trim().is_empty() {
            break;
        }
        lines.push(line);
    }
    Ok(lines.join("\n"))
}

/// Let the reporter keep, replace or extend the drafted description.
fn edit_draft(draft: String) -> anyhow::Result<String> {
    let edit = loop {
        let Some(answer) = prompt("Description: [Enter] keep, [r] replace, [a] add details: ")? else {
            return Ok(draft);
        };
        if let Some(edit) = parse_draft_edit(&answer) {
            break edit;
        }
    };
    if edit == DraftEdit::Keep {
        return Ok(draft);
    }

    println!("Type the text, then an empty line to finish:");
    let text = read_block()?;
    let description = revise_description(&draft, edit, &text);
    if description != draft {
        println!("--- Description to submit ---\n{}\n-----------------------------", description);
    }
    Ok(description)
}

// ============================================================================
// Commands
// ============================================================================

struct ReportFields {
    incident_type: Option<String>,
    location: Option<String>,
    anonymous: bool,
    name: Option<String>,
}

fn do_intake(api: &Api, fields: ReportFields, no_submit: bool) -> anyhow::Result<()> {
    let session = api.send_ok(api.post("/sessions"))?;
    let id = session["id"]
        .as_str()
        .context("server did not return a session id")?
        .to_string();

    println!("{}", session["greeting"].as_str().unwrap_or(""));
    println!("(type {} to finish early, Ctrl+D to abort)\n", SUMMARY_COMMAND);

    let summary = loop {
        let Some(line) = prompt("> ")? else {
            bail!("intake aborted");
        };

        let (status, body) = if line.trim() == SUMMARY_COMMAND {
            api.send(api.post(&format!("/sessions/{}/summary", id)))?
        } else {
            api.send(
                api.post(&format!("/sessions/{}/turns", id))
                    .json(&json!({ "text": line })),
            )?
        };

        if !status.is_success() {
            eprintln!("haven-cli: {}", error_message(&body));
            if body["retryable"].as_bool() == Some(true) || status == StatusCode::BAD_REQUEST {
                eprintln!("haven-cli: nothing was lost, please try again");
                continue;
            }
            bail!("intake stopped (HTTP {})", status);
        }

        if let Some(reply) = body["reply"]["content"].as_str() {
            println!("\n{}\n", reply);
        }
        if let Some(summary) = body["summary"].as_str() {
            break summary.to_string();
        }
    };

    let draft = api.send_ok(api.post(&format!("/sessions/{}/handoff", id)))?;
    let description = draft["description"].as_str().unwrap_or(&summary).to_string();

    println!("--- Drafted description ---\n{}\n---------------------------", description);
    if no_submit {
        return Ok(());
    }
    let description = edit_draft(description)?;

    let incident_type = match fields.incident_type {
        Some(t) => t,
        None => loop {
            for (i, t) in INCIDENT_TYPES.iter().enumerate() {
                println!("  {}. {}", i + 1, t);
            }
            let Some(choice) = prompt("Incident type: ")? else {
                bail!("intake aborted");
            };
            if let Some(t) = parse_type_choice(&choice) {
                break t;
            }
        },
    };

    let location = match fields.location {
        Some(l) => Some(l),
        None => prompt("Location (optional): ")?.filter(|l| !l.trim().is_empty()),
    };

    submit_report(
        api,
        json!({
            "type": incident_type,
            "description": description,
            "location": location,
            "reporter_name": fields.name,
            "is_anonymous": fields.anonymous,
        }),
    )
}

fn submit_report(api: &Api, body: Value) -> anyhow::Result<()> {
    let created = api.send_ok(api.post("/incidents").json(&body))?;
    println!(
        "Report submitted: {} ({})",
        created["id"].as_str().unwrap_or("?"),
        created["status"].as_str().unwrap_or("pending")
    );
    Ok(())
}

fn upload_evidence(api: &Api, path: &Path) -> anyhow::Result<String> {
    let content_type = content_type_for(path)
        .with_context(|| format!("unsupported evidence file type: {}", path.display()))?;
    let data = std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;

    let body = api.send_ok(
        api.post("/evidence")
            .header("content-type", content_type)
            .body(data),
    )?;
    body["key"]
        .as_str()
        .map(str::to_string)
        .context("server did not return an evidence key")
}

fn do_report(
    api: &Api,
    incident_type: String,
    description: String,
    evidence: Option<String>,
    fields: ReportFields,
) -> anyhow::Result<()> {
    let evidence_file = match evidence {
        Some(path) => Some(upload_evidence(api, Path::new(&path))?),
        None => None,
    };

    submit_report(
        api,
        json!({
            "type": incident_type,
            "description": description,
            "location": fields.location,
            "evidence_file": evidence_file,
            "reporter_name": fields.name,
            "is_anonymous": fields.anonymous,
        }),
    )
}

fn do_list(api: &Api, json_output: bool) -> anyhow::Result<()> {
    let body = api.send_ok(api.get("/incidents"))?;
    if json_output {
        println!("{}", serde_json::to_string_pretty(&body["incidents"])?);
        return Ok(());
    }

    let list: IncidentList = serde_json::from_value(body).context("failed to parse incident list")?;
    if list.count == 0 {
        eprintln!("No incidents found");
        return Ok(());
    }
    for incident in &list.incidents {
        println!("{}", format_incident_line(incident));
    }
    Ok(())
}

fn do_status(api: &Api, id: &str, status: &str) -> anyhow::Result<()> {
    let body = api.send_ok(
        api.patch(&format!("/incidents/{}/status", id))
            .json(&json!({ "status": status })),
    )?;
    println!(
        "{} is now {}",
        body["id"].as_str().unwrap_or(id),
        body["status"].as_str().unwrap_or(status)
    );
    Ok(())
}

fn do_hotspots(api: &Api, json_output: bool) -> anyhow::Result<()> {
    let body = api.send_ok(api.get("/incidents/hotspots"))?;
    if json_output {
        println!("{}", serde_json::to_string_pretty(&body["hotspots"])?);
        return Ok(());
    }

    let list: HotspotList = serde_json::from_value(body).context("failed to parse hotspots")?;
    if list.hotspots.is_empty() {
        eprintln!("No hotspots");
    }
    for hotspot in &list.hotspots {
        println!("{}", format_hotspot_line(hotspot));
    }
    Ok(())
}

/// Show the server status by calling GET /health.
fn do_health(api: &Api) -> anyhow::Result<()> {
    let (status, body) = api.send(api.get("/health"))?;
    if !status.is_success() {
        bail!("server unhealthy (HTTP {}): {}", status, error_message(&body));
    }

    println!("Haven server: {}", body["status"].as_str().unwrap_or("unknown"));
    println!("Version:      {}", body["version"].as_str().unwrap_or("?"));
    println!("PostgreSQL:   {}", body["postgresql"].as_str().unwrap_or("?"));
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn run(cli: Cli) -> anyhow::Result<()> {
    // Intake turns wait on the completion provider; give them room.
    let timeout = match cli.command {
        Commands::Intake { .. } => 180,
        _ => 30,
    };
    let api = Api::new(&cli.server, cli.user, timeout)?;

    match cli.command {
        Commands::Intake {
            incident_type,
            location,
            anonymous,
            name,
            no_submit,
        } => do_intake(
            &api,
            ReportFields {
                incident_type,
                location,
                anonymous,
                name,
            },
            no_submit,
        ),
        Commands::Report {
            incident_type,
            description,
            location,
            evidence,
            anonymous,
            name,
        } => do_report(
            &api,
            incident_type,
            description,
            evidence,
            ReportFields {
                incident_type: None,
                location,
                anonymous,
                name,
            },
        ),
        Commands::List { json } => do_list(&api, json),
        Commands::Status { id, status } => do_status(&api, &id, &status),
        Commands::Hotspots { json } => do_hotspots(&api, json),
        Commands::Health => do_health(&api),
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("haven-cli: {:#}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn incident(description: &str) -> IncidentSummary {
        IncidentSummary {
            id: "7b5c24ab-1234-5678-9abc-def012345678".to_string(),
            incident_type: "Stalking".to_string(),
            description: description.to_string(),
            status: "in_review".to_string(),
            location: None,
            reported_at: "2026-02-23T10:00:00Z".to_string(),
            is_anonymous: false,
        }
    }

    // ========================================================================
    // TEST 1: incident line shows id, status, type and a short preview
    // ========================================================================
    #[test]
    fn test_incident_line_format() {
        let line = format_incident_line(&incident("Followed from the station"));
        assert_eq!(
            line,
            "7b5c24ab-1234-5678-9abc-def012345678  [in_review] Stalking — Followed from the station"
        );
    }

    // ========================================================================
    // TEST 2: long descriptions are cut at 60 chars with an ellipsis
    // ========================================================================
    #[test]
    fn test_incident_line_truncates() {
        let line = format_incident_line(&incident(&"A".repeat(100)));
        assert!(line.ends_with(&format!("{}…", "A".repeat(60))));
    }

    // ========================================================================
    // TEST 3: preview uses the first non-empty line
    // ========================================================================
    #[test]
    fn test_incident_line_uses_first_nonempty_line() {
        let line = format_incident_line(&incident("\n\nIncident Report:\nDetails"));
        assert!(line.ends_with("Incident Report:"));
    }

    // ========================================================================
    // TEST 4: type menu accepts numbers and free text
    // ========================================================================
    #[test]
    fn test_parse_type_choice() {
        assert_eq!(parse_type_choice("1").as_deref(), Some("Harassment"));
        assert_eq!(parse_type_choice(" 3 ").as_deref(), Some("Suspicious Activity"));
        assert_eq!(parse_type_choice("Theft").as_deref(), Some("Theft"));
        assert_eq!(parse_type_choice("0"), None);
        assert_eq!(parse_type_choice("6"), None);
        assert_eq!(parse_type_choice("   "), None);
    }

    // ========================================================================
    // TEST 5: evidence content types come from the extension
    // ========================================================================
    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for(Path::new("photo.JPG")), Some("image/jpeg"));
        assert_eq!(content_type_for(Path::new("a/b/clip.mp4")), Some("video/mp4"));
        assert_eq!(content_type_for(Path::new("scan.png")), Some("image/png"));
        assert_eq!(content_type_for(Path::new("doc.pdf")), None);
        assert_eq!(content_type_for(Path::new("noext")), None);
    }

    // ========================================================================
    // TEST 6: error messages prefer the server's error field
    // ========================================================================
    #[test]
    fn test_error_message() {
        assert_eq!(
            error_message(&json!({ "error": "No message provided" })),
            "No message provided"
        );
        assert_eq!(error_message(&json!({ "detail": 1 })), "{\"detail\":1}");
    }

    // ========================================================================
    // TEST 7: hotspot line shows level, count and coordinates
    // ========================================================================
    #[test]
    fn test_hotspot_line_format() {
        let line = format_hotspot_line(&HotspotView {
            lat: 18.52,
            lon: 73.857,
            count: 5,
            name: "Stalking Risk Zone".to_string(),
            level: "high".to_string(),
        });
        assert_eq!(line, "high     5 incidents  18.520,73.857  Stalking Risk Zone");
    }

    // ========================================================================
    // TEST 8: incident list parses the server's list shape
    // ========================================================================
    #[test]
    fn test_incident_list_parses() {
        let list: IncidentList = serde_json::from_value(json!({
            "count": 1,
            "incidents": [{
                "id": "7b5c24ab-1234-5678-9abc-def012345678",
                "user_id": null,
                "reporter_name": null,
                "type": "Other",
                "description": "d",
                "location": "18.5,73.8",
                "evidence_file": null,
                "status": "pending",
                "reported_at": "2026-02-23T10:00:00Z",
                "is_anonymous": true,
                "log": ""
            }]
        }))
        .unwrap();
        assert_eq!(list.count, 1);
        assert_eq!(list.incidents[0].incident_type, "Other");
        assert!(list.incidents[0].is_anonymous);
    }

    // ========================================================================
    // TEST 9: CLI definition is consistent
    // ========================================================================
    #[test]
    fn test_cli_parses_subcommands() {
        use clap::CommandFactory;
        Cli::command().debug_assert();

        let cli = Cli::try_parse_from([
            "haven-cli",
            "--user",
            "7b5c24ab-1234-5678-9abc-def012345678",
            "status",
            "abc",
            "resolved",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Status { ref status, .. } if status == "resolved"));
    }

    // ========================================================================
    // TEST 10: drafted description can be kept, replaced or extended
    // ========================================================================
    #[test]
    fn test_draft_edit_choices() {
        assert_eq!(parse_draft_edit(""), Some(DraftEdit::Keep));
        assert_eq!(parse_draft_edit(" R "), Some(DraftEdit::Replace));
        assert_eq!(parse_draft_edit("add"), Some(DraftEdit::Append));
        assert_eq!(parse_draft_edit("x"), None);

        let draft = "Incident Report: followed near the station.\n";
        assert_eq!(revise_description(draft, DraftEdit::Keep, "ignored"), draft);
        assert_eq!(
            revise_description(draft, DraftEdit::Replace, "  Followed from the bus stop.  "),
            "Followed from the bus stop."
        );
        assert_eq!(
            revise_description(draft, DraftEdit::Append, "It was a grey car."),
            "Incident Report: followed near the station.\n\nIt was a grey car."
        );
        assert_eq!(revise_description(draft, DraftEdit::Replace, "   "), draft);
    }
}
