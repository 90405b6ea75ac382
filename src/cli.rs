//! CLI module
//!
//! This module provides the command-line interface for deepdive: it can host the API
//! server or act as a client of a running one.

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use colored::Colorize;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use crate::{
    api::{serve, Client, ClientConfig, HttpClientImpl, ServerConfig},
    assist::{AssistKind, AssistRequest},
    generate::{GeminiConfig, GeminiGenerator, DEFAULT_BASE_URL, DEFAULT_MODEL, DEFAULT_TIMEOUT_MS},
    models::{
        ActionField, Analysis, AnalysisResponse, AnalysisUpdate, Core, Node, NodeKind, NodeUpdate,
        Relation, Session, ROOT_SENTINEL,
    },
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// API server URL
    #[arg(short, long, env = "DEEPDIVE_SERVER", default_value = "http://localhost:3000")]
    server: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the deepdive API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value_t = 3000)]
        port: u16,

        /// Populate with an example analysis
        #[arg(long)]
        example: bool,

        #[command(flatten)]
        gemini: GeminiArgs,
    },

    /// Print the analysis as a tree
    Show,

    /// Print the forest exactly as it is sent to the text-generation service
    Context,

    /// Get a distilled summary of the analysis state
    Distilled,

    /// Node management commands
    Node {
        #[command(subcommand)]
        command: NodeCommands,
    },

    /// Action list commands, for a node or the whole analysis
    Action {
        #[command(subcommand)]
        command: ActionCommands,
    },

    /// Analysis-wide field commands
    Analysis {
        #[command(subcommand)]
        command: AnalysisCommands,
    },

    /// Ask the text-generation service for a suggestion and apply it
    Assist {
        #[arg(value_enum)]
        kind: AssistKind,

        /// Target node, required for node-level suggestions
        #[arg(long)]
        node: Option<String>,
    },

    /// Show or save the generated report
    Report {
        /// Generate a fresh report first
        #[arg(long)]
        generate: bool,

        /// Save to a file; defaults to DeepDive_Report_<date>.html
        #[arg(long)]
        out: Option<Option<PathBuf>>,

        /// Print as plain text instead of HTML
        #[arg(long)]
        text: bool,
    },

    /// Generate shell completions
    Completions {
        /// The shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum NodeCommands {
    /// Add a why step below or next to a node (use "root" with --relation sibling for a new problem)
    Add {
        target: String,

        #[arg(short, long, value_enum, default_value_t = Relation::Child)]
        relation: Relation,
    },

    /// Replace fields of a node
    Update {
        id: String,

        #[arg(long)]
        text: Option<String>,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        root_cause: Option<String>,

        #[arg(long)]
        solutions: Option<String>,
    },

    /// Delete a node and everything below it
    Delete { id: String },

    /// Print the chain from the root down to a node
    Path { id: String },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct ActionTarget {
    /// Node owning the action list
    #[arg(long)]
    node: Option<String>,

    /// Use the analysis-wide action list
    #[arg(long)]
    ultimate: bool,
}

#[derive(Subcommand)]
enum ActionCommands {
    /// Append an empty action
    Add {
        #[command(flatten)]
        target: ActionTarget,
    },

    /// Replace one field of an action
    Set {
        #[command(flatten)]
        target: ActionTarget,

        index: usize,

        #[arg(value_enum)]
        field: ActionField,

        value: String,
    },

    /// Remove an action
    Remove {
        #[command(flatten)]
        target: ActionTarget,

        index: usize,
    },
}

#[derive(Subcommand)]
enum AnalysisCommands {
    /// Replace analysis-wide fields
    Set {
        #[arg(long)]
        title: Option<String>,

        /// Purpose and context of the analysis
        #[arg(long)]
        context: Option<String>,

        #[arg(long)]
        ultimate_cause: Option<String>,

        #[arg(long)]
        ultimate_solutions: Option<String>,
    },
}

/// Text-generation service settings
#[derive(Args, Debug, Clone)]
struct GeminiArgs {
    /// API key for the Gemini service
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, env = "DEEPDIVE_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    #[arg(long, env = "GEMINI_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Request timeout in milliseconds
    #[arg(long, env = "DEEPDIVE_TIMEOUT_MS", default_value_t = DEFAULT_TIMEOUT_MS)]
    timeout_ms: u64,
}

impl From<GeminiArgs> for GeminiConfig {
    fn from(args: GeminiArgs) -> Self {
        Self {
            api_key: args.api_key,
            base_url: args.base_url,
            model: args.model,
            timeout_ms: args.timeout_ms,
        }
    }
}

/// Run the CLI application
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            port,
            example,
            gemini,
        } => {
            println!("Starting deepdive API server on port {}...", port);

            let mut session = Session::new();
            if example {
                println!("Populating with an example analysis...");
                create_example_analysis(&mut session);
            }

            let config: GeminiConfig = gemini.into();
            if config.api_key.is_none() {
                println!(
                    "{}",
                    "GEMINI_API_KEY is not set; suggestions will report a missing key".yellow()
                );
            }
            let generator = GeminiGenerator::new(config)?;
            let core = Core::new(session, Arc::new(generator));

            let config = ServerConfig {
                address: ([127, 0, 0, 1], port).into(),
            };

            serve(core, config).await?;
            Ok(())
        }

        Commands::Show => {
            let client = create_client(&cli.server);
            let response = client.get_analysis().await?;
            print_response(&response, print_analysis);
            Ok(())
        }

        Commands::Context => {
            let client = create_client(&cli.server);
            let response = client.get_forest_context().await?;
            println!("{}", response.inner());
            Ok(())
        }

        Commands::Distilled => {
            let client = create_client(&cli.server);
            let context = client.get_distilled_context().await?;
            print_distilled_context(&context);
            Ok(())
        }

        Commands::Node { command } => {
            let client = create_client(&cli.server);
            match command {
                NodeCommands::Add { target, relation } => {
                    let response = client.add_node(target.clone(), relation).await?;
                    print_response(&response, |id| {
                        if target == ROOT_SENTINEL || relation == Relation::Sibling {
                            println!("Added {} of '{}': {}", relation, target, id);
                        } else {
                            println!("Added why step below '{}': {}", target, id);
                        }
                    });
                }
                NodeCommands::Update {
                    id,
                    text,
                    title,
                    root_cause,
                    solutions,
                } => {
                    let update = NodeUpdate {
                        title,
                        text,
                        root_cause,
                        solutions_text: solutions,
                        actions: None,
                    };
                    if update.is_empty() {
                        return Err("Nothing to update; pass at least one field".into());
                    }
                    let response = client.update_node(id.clone(), update).await?;
                    print_response(&response, |_| println!("Updated node '{}'", id));
                }
                NodeCommands::Delete { id } => {
                    let response = client.delete_node(id.clone()).await?;
                    print_response(&response, |_| println!("Deleted node '{}'", id));
                }
                NodeCommands::Path { id } => {
                    let response = client.get_path(id).await?;
                    println!("{}", crate::context::format_path(response.inner()));
                }
            }
            Ok(())
        }

        Commands::Action { command } => {
            let client = create_client(&cli.server);
            let response = match command {
                ActionCommands::Add { target } => match target.node {
                    Some(node) => client.add_action(node).await?,
                    None => client.add_ultimate_action().await?,
                },
                ActionCommands::Set {
                    target,
                    index,
                    field,
                    value,
                } => match target.node {
                    Some(node) => client.update_action(node, index, field, value).await?,
                    None => client.update_ultimate_action(index, field, value).await?,
                },
                ActionCommands::Remove { target, index } => match target.node {
                    Some(node) => client.remove_action(node, index).await?,
                    None => client.remove_ultimate_action(index).await?,
                },
            };
            print_response(&response, |_| println!("Action list updated"));
            Ok(())
        }

        Commands::Analysis { command } => {
            let client = create_client(&cli.server);
            match command {
                AnalysisCommands::Set {
                    title,
                    context,
                    ultimate_cause,
                    ultimate_solutions,
                } => {
                    let update = AnalysisUpdate {
                        title,
                        context_description: context,
                        ultimate_cause,
                        ultimate_solutions_text: ultimate_solutions,
                        ultimate_actions: None,
                    };
                    let response = client.update_analysis(update).await?;
                    print_response(&response, |_| println!("Analysis updated"));
                }
            }
            Ok(())
        }

        Commands::Assist { kind, node } => {
            let client = create_client(&cli.server);
            let request = match node {
                Some(node) => AssistRequest::node(kind, node),
                None => AssistRequest::analysis(kind),
            };
            let response = client.assist(request).await?;
            print_response(&response, |outcome| {
                println!("{} {}", "Suggestion:".bold(), outcome.text);
                if !outcome.applied {
                    println!(
                        "{}",
                        "The target node was removed before the suggestion arrived".yellow()
                    );
                }
            });
            Ok(())
        }

        Commands::Report {
            generate,
            out,
            text,
        } => {
            let client = create_client(&cli.server);
            if generate {
                client
                    .assist(AssistRequest::analysis(AssistKind::Report))
                    .await?;
            }
            let report = client.get_report().await?.into_inner();
            let rendered = if text { html_to_text(&report) } else { report };

            match out {
                Some(path) => {
                    let path = path.unwrap_or_else(default_report_path);
                    std::fs::write(&path, rendered)?;
                    println!("Report saved to {}", path.display());
                }
                None => println!("{}", rendered),
            }
            Ok(())
        }

        Commands::Completions { shell } => {
            // Generate completions for the specified shell
            let mut cmd = Cli::command();
            let bin_name = cmd.get_name().to_string();
            generate(shell, &mut cmd, bin_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn create_client(server_url: &str) -> HttpClientImpl {
    let config = ClientConfig {
        base_url: server_url.to_string(),
    };

    HttpClientImpl::with_config(config)
}

fn default_report_path() -> PathBuf {
    PathBuf::from(format!(
        "DeepDive_Report_{}.html",
        chrono::Local::now().format("%Y-%m-%d")
    ))
}

/// Flattens report HTML into readable text: block ends become newlines, tags are dropped
/// and entities decoded
pub fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(start) = rest.find('<') {
        out.push_str(&rest[..start]);
        let Some(end) = rest[start..].find('>') else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let tag = rest[start + 1..start + end].trim().to_ascii_lowercase();
        let name = tag
            .trim_start_matches('/')
            .split(|c: char| c.is_whitespace() || c == '/')
            .next()
            .unwrap_or_default();
        match name {
            "br" | "p" | "h1" | "h2" | "h3" | "h4" | "tr" | "hr" | "div" | "table" | "ul" | "ol" => {
                out.push('\n')
            }
            "li" if !tag.starts_with('/') => out.push_str("\n• "),
            "td" | "th" if tag.starts_with('/') => out.push('\t'),
            _ => {}
        }
        rest = &rest[start + end + 1..];
    }
    out.push_str(rest);

    let decoded = html_escape::decode_html_entities(&out);
    let mut lines: Vec<&str> = Vec::new();
    for line in decoded.lines().map(str::trim_end) {
        if line.trim().is_empty() && lines.last().map_or(true, |l| l.trim().is_empty()) {
            continue;
        }
        lines.push(line);
    }
    lines.join("\n").trim().to_string()
}

/// Generic function to print any AnalysisResponse<T>
/// Takes a closure to handle printing the inner value
fn print_response<T, F>(response: &AnalysisResponse<T>, print_inner: F)
where
    F: FnOnce(&T),
{
    print_inner(response.inner());
    let context = &response.distilled_context;
    println!(
        "\n{} {} problem(s), {} node(s){}",
        "State:".dimmed(),
        context.problem_count,
        context.node_count,
        if context.is_generating {
            ", generating"
        } else {
            ""
        }
    );
}

fn print_analysis(analysis: &Analysis) {
    println!("{}", analysis.title().bold());
    if !analysis.context_description().is_empty() {
        println!("Context: {}", analysis.context_description());
    }
    println!();

    for root in analysis.problem_trees() {
        print_node(root, 0);
    }

    if !analysis.ultimate_cause().is_empty() {
        println!("\n{} {}", "Ultimate cause:".red().bold(), analysis.ultimate_cause());
    }
    if !analysis.ultimate_solutions_text().is_empty() {
        println!(
            "{}\n{}",
            "Strategic solutions:".green().bold(),
            analysis.ultimate_solutions_text()
        );
    }
    if !analysis.ultimate_actions().is_empty() {
        println!("{}", "Executive actions:".blue().bold());
        for (i, action) in analysis.ultimate_actions().iter().enumerate() {
            println!(
                "  {}. {} [{}] due {}",
                i, action.description, action.assignee, action.deadline
            );
        }
    }
}

/// Recursively prints a node and its children, two spaces per level
fn print_node(node: &Node, depth: usize) {
    let indent = "  ".repeat(depth);
    let text = if node.text().is_empty() {
        "(Empty)".dimmed().to_string()
    } else {
        node.text().to_string()
    };

    match node.kind() {
        NodeKind::Problem => println!(
            "{}{} {} {}",
            indent,
            format!("[{}]", node.title().unwrap_or("Problem")).bold(),
            text,
            format!("({})", node.id()).dimmed()
        ),
        NodeKind::Why => println!(
            "{}{} {} {}",
            indent,
            "why:".cyan(),
            text,
            format!("({})", node.id()).dimmed()
        ),
    }

    if node.is_leaf() {
        if !node.root_cause().is_empty() {
            println!("{}  {} {}", indent, "root cause:".red(), node.root_cause());
        }
        if !node.solutions_text().is_empty() {
            println!(
                "{}  {} {}",
                indent,
                "solutions:".green(),
                node.solutions_text().trim().replace('\n', " ")
            );
        }
        for (i, action) in node.actions().iter().enumerate() {
            println!(
                "{}  {} {}. {} [{}] {}",
                indent,
                "action".blue(),
                i,
                action.description,
                action.assignee,
                action.deadline
            );
        }
    }

    for child in node.children() {
        print_node(child, depth + 1);
    }
}

fn print_distilled_context(context: &crate::models::DistilledContext) {
    println!("\n=== DISTILLED CONTEXT ===\n");
    println!("Title: {}", context.title);
    println!("Problems: {}", context.problem_count);
    println!("Nodes: {}", context.node_count);
    println!(
        "Generating: {}",
        if context.is_generating { "Yes" } else { "No" }
    );

    if !context.transition_history.is_empty() {
        println!("\nRECENT TRANSITIONS:");
        for entry in &context.transition_history {
            println!(
                "  {} {}{}",
                entry.timestamp.format("%H:%M:%S"),
                entry.action,
                entry
                    .details
                    .as_ref()
                    .map(|d| format!(": {}", d))
                    .unwrap_or_default()
            );
        }
    }
    println!();
}

/// Creates an example two-problem analysis
fn create_example_analysis(session: &mut Session) {
    session.update_analysis(AnalysisUpdate {
        title: Some("Checkout Outage Review".to_string()),
        context_description: Some(
            "Post-incident review of the storefront outage on the release weekend".to_string(),
        ),
        ..AnalysisUpdate::default()
    });

    let analysis = session.get_analysis().into_inner();
    let first_root = analysis.problem_trees()[0].id().to_string();
    let first_why = analysis.problem_trees()[0].children()[0].id().to_string();

    session.update_node(
        &first_root,
        NodeUpdate {
            title: Some("Checkout failures".to_string()),
            text: Some("Checkout returned errors for 40 minutes on Saturday".to_string()),
            ..NodeUpdate::default()
        },
    );
    session.update_node(
        &first_why,
        NodeUpdate::text("The payment service exhausted its connection pool"),
    );

    if let Some(second_why) = session.add_node(&first_why, Relation::Child).into_inner() {
        session.update_node(
            &second_why,
            NodeUpdate {
                text: Some("A retry loop reopened connections without backoff".to_string()),
                root_cause: Some("Retry policy was never load tested".to_string()),
                solutions_text: Some("\n• Add exponential backoff to payment retries".to_string()),
                ..NodeUpdate::default()
            },
        );
        session.add_action(&second_why);
        session.update_action(
            &second_why,
            0,
            ActionField::Description,
            "Add a load test for the retry path".to_string(),
        );
        session.update_action(&second_why, 0, ActionField::Assignee, "Payments team".to_string());
        session.update_action(&second_why, 0, ActionField::Deadline, "Next sprint".to_string());
    }

    if let Some(sibling) = session.add_node(&first_why, Relation::Sibling).into_inner() {
        session.update_node(
            &sibling,
            NodeUpdate::text("Alerts fired only after the error budget was spent"),
        );
    }

    if let Some(second_root) = session.add_node(ROOT_SENTINEL, Relation::Sibling).into_inner() {
        session.update_node(
            &second_root,
            NodeUpdate::text("Support queue tripled during the outage"),
        );
        let second_root_why = session
            .find_node(&second_root)
            .into_inner()
            .and_then(|node| node.children().first().map(|c| c.id().to_string()));
        if let Some(why) = second_root_why {
            session.update_node(
                &why,
                NodeUpdate::text("Status page was not updated for 30 minutes"),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_html_to_text() {
        let html = "<h3>Executive Summary</h3><p>Pool &amp; retries</p><ul><li>One</li><li>Two</li></ul>";
        assert_eq!(
            html_to_text(html),
            "Executive Summary\n\nPool & retries\n\n• One\n• Two"
        );
    }

    #[test]
    fn test_html_to_text_plain_input() {
        assert_eq!(html_to_text("  no markup  "), "no markup");
    }

    #[test]
    fn test_example_analysis_shape() {
        let mut session = Session::new();
        create_example_analysis(&mut session);

        let analysis = session.get_analysis().into_inner();
        assert_eq!(analysis.title(), "Checkout Outage Review");
        assert_eq!(analysis.problem_trees().len(), 2);
        assert_eq!(tree::node_count(analysis.problem_trees()), 6);
        assert_eq!(analysis.problem_trees()[1].title(), Some("Problem 2"));
    }
}
