#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use anyhow::{bail, Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use console::style;
use dialoguer::{Input, Password};
use std::io::Write;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use wablast::config::Config;
use wablast::dispatch::{self, DispatchRequest, DispatchSummary};
use wablast::graph::{GraphClient, ProbeOutcome};
use wablast::hosting::{self, ImageHost, ImgbbHost, PostimagesHost};
use wablast::roster;
use wablast::template::TemplateDefinition;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CompletionShell {
    #[value(name = "bash")]
    Bash,
    #[value(name = "fish")]
    Fish,
    #[value(name = "zsh")]
    Zsh,
    #[value(name = "powershell")]
    PowerShell,
    #[value(name = "elvish")]
    Elvish,
}

/// wablast: bulk WhatsApp Business template and image sender.
#[derive(Parser, Debug)]
#[command(name = "wablast")]
#[command(version)]
#[command(about = "Send WhatsApp Business template and image messages in bulk.", long_about = None)]
struct Cli {
    /// Override the config directory (also: WABLAST_CONFIG_DIR)
    #[arg(long, global = true)]
    config_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write the config file, prompting for Cloud API credentials
    Init {
        /// Overwrite an existing config without asking
        #[arg(long)]
        force: bool,
    },

    /// Send template and/or image messages to a recipient roster
    #[command(long_about = "\
Send template and/or image messages to a recipient roster.

Recipients come from repeated --to flags and/or a --roster-file of
numbers separated by newlines or commas. Outside --simple mode the
template structure is fetched first so placeholders and header media
are detected automatically.

Examples:
  wablast send --to +4915112345678 --template hello_world
  wablast send --roster-file contacts.csv --template order_update \\
      --param Ada --param 4711
  wablast send --to +4915112345678 --direct-image --image-only \\
      --image-file promo.png --caption 'New arrivals'")]
    Send(SendArgs),

    /// Inspect message templates on the business account
    Template {
        #[command(subcommand)]
        template_command: TemplateCommands,
    },

    /// List phone numbers registered to the business account
    PhoneNumbers,

    /// Run connectivity diagnostics against the Cloud API
    Diagnose,

    /// Look up delivery status for previously sent message ids
    Status {
        /// Message ids as printed by `send` (wamid....)
        #[arg(required = true)]
        message_ids: Vec<String>,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell flavor
        shell: CompletionShell,
    },
}

#[derive(Subcommand, Debug)]
enum TemplateCommands {
    /// Fetch one template and show its structure and required inputs
    Check {
        /// Template name
        name: String,

        /// Template language code
        #[arg(short, long, default_value = "en_US")]
        language: String,
    },

    /// List all templates on the business account
    List,
}

#[derive(Args, Debug)]
struct SendArgs {
    /// Recipient in +<countrycode><digits> form (repeatable)
    #[arg(short = 't', long = "to", value_name = "NUMBER")]
    to: Vec<String>,

    /// File of recipients, newline- or comma-separated
    #[arg(long, value_name = "FILE")]
    roster_file: Option<PathBuf>,

    /// Template name to send
    #[arg(long, value_name = "NAME")]
    template: Option<String>,

    /// Template language code
    #[arg(long, default_value = "en_US")]
    language: String,

    /// Template body parameter, ordered by placeholder index (repeatable)
    #[arg(short = 'p', long = "param", value_name = "VALUE")]
    params: Vec<String>,

    /// Publicly reachable image URL for media templates / direct images
    #[arg(long, value_name = "URL")]
    image_url: Option<String>,

    /// Local image to upload to a hosting service first (ignored when
    /// --image-url is given)
    #[arg(long, value_name = "FILE")]
    image_file: Option<PathBuf>,

    /// Caption for the direct image message
    #[arg(long, value_name = "TEXT")]
    caption: Option<String>,

    /// Send the bare template without components
    #[arg(long)]
    simple: bool,

    /// Also send a direct image message to each recipient
    #[arg(long)]
    direct_image: bool,

    /// Send only the image message, no template (implies --direct-image)
    #[arg(long)]
    image_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install default crypto provider for Rustls TLS before any client is
    // built; reqwest needs a process-level provider.
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        eprintln!("Warning: Failed to install default crypto provider: {e:?}");
    }

    let cli = Cli::parse();

    if let Some(config_dir) = &cli.config_dir {
        if config_dir.trim().is_empty() {
            bail!("--config-dir cannot be empty");
        }
        std::env::set_var("WABLAST_CONFIG_DIR", config_dir);
    }

    // Completions stay stdout-only and skip config and logging init so
    // sourced scripts never pick up stray log lines.
    if let Commands::Completions { shell } = &cli.command {
        let mut stdout = std::io::stdout().lock();
        write_shell_completion(*shell, &mut stdout)?;
        return Ok(());
    }

    // Initialize logging - respects RUST_LOG env var, defaults to INFO
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    // Init writes a fresh config; it must not require loading one first.
    if let Commands::Init { force } = &cli.command {
        return run_init(*force).await;
    }

    let config = Config::load_or_init().await?;

    match cli.command {
        Commands::Init { .. } | Commands::Completions { .. } => unreachable!(),

        Commands::Send(args) => cmd_send(config, args).await,

        Commands::Template { template_command } => match template_command {
            TemplateCommands::Check { name, language } => {
                cmd_template_check(config, &name, &language).await
            }
            TemplateCommands::List => cmd_template_list(config).await,
        },

        Commands::PhoneNumbers => cmd_phone_numbers(config).await,

        Commands::Diagnose => cmd_diagnose(config).await,

        Commands::Status { message_ids } => cmd_status(config, message_ids).await,
    }
}

fn prompt_credentials() -> Result<(String, String, String)> {
    let access_token = Password::new()
        .with_prompt("Access token")
        .interact()
        .context("failed to read access token")?;
    let phone_number_id: String = Input::new()
        .with_prompt("Phone number id (the long numeric id)")
        .interact_text()
        .context("failed to read phone number id")?;
    let business_account_id: String = Input::new()
        .with_prompt("Business account id (empty to skip template lookups)")
        .allow_empty(true)
        .interact_text()
        .context("failed to read business account id")?;

    Ok((
        access_token.trim().to_string(),
        phone_number_id.trim().to_string(),
        business_account_id.trim().to_string(),
    ))
}

async fn run_init(force: bool) -> Result<()> {
    let config_dir = Config::config_dir()?;
    let config_path = config_dir.join("config.toml");
    if config_path.exists() && !force {
        bail!(
            "config already exists at {}; re-run with --force to overwrite",
            config_path.display()
        );
    }

    println!(
        "{}",
        style("wablast setup: WhatsApp Cloud API credentials")
            .cyan()
            .bold()
    );
    println!(
        "{}",
        style("Values come from Meta's developer dashboard (WhatsApp > API Setup).").dim()
    );
    println!();

    // dialoguer blocks on terminal input; keep it off the async runtime.
    let (access_token, phone_number_id, business_account_id) =
        tokio::task::spawn_blocking(prompt_credentials)
            .await
            .context("credential prompt task failed")??;

    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("failed to create {}", config_dir.display()))?;

    let mut config = Config::default();
    config.config_path = config_path.clone();
    config.access_token = access_token;
    config.phone_number_id = phone_number_id;
    config.business_account_id = business_account_id;
    config.validate()?;
    config.save().await?;

    #[cfg(unix)]
    {
        use std::{fs::Permissions, os::unix::fs::PermissionsExt};
        let _ = tokio::fs::set_permissions(&config_path, Permissions::from_mode(0o600)).await;
    }

    println!();
    println!(
        "{} Config written to {}",
        style("✓").green().bold(),
        style(config_path.display()).green()
    );
    Ok(())
}

async fn cmd_send(config: Config, args: SendArgs) -> Result<()> {
    if !config.has_credentials() {
        bail!(
            "access_token and phone_number_id are not configured; \
             run `wablast init` or set WABLAST_ACCESS_TOKEN / WABLAST_PHONE_NUMBER_ID"
        );
    }

    // Assemble and check the roster before anything touches the network.
    let mut recipients: Vec<String> = args.to.iter().flat_map(|raw| roster::parse(raw)).collect();
    if let Some(path) = &args.roster_file {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        recipients.extend(roster::parse(&contents));
    }
    if recipients.is_empty() {
        return Err(dispatch::ValidationError::EmptyRoster.into());
    }
    let invalid = roster::invalid_numbers(&recipients);
    if !invalid.is_empty() {
        return Err(dispatch::ValidationError::InvalidRecipients(invalid).into());
    }

    let client = GraphClient::from_config(&config);
    let template_name = args.template.clone().unwrap_or_default();
    let mut language = args.language.clone();
    let direct_image = args.direct_image || args.image_only;

    // Fetch the template structure so placeholders and header media are
    // known before validation. Lookup failures degrade to the
    // binding-only fallback instead of blocking the batch.
    let mut definition = None;
    if !args.image_only && !args.simple && !template_name.is_empty() {
        if config.business_account_id.is_empty() {
            warn!("business_account_id not configured; skipping template lookup");
        } else {
            match client.find_template(&template_name, &language).await {
                Ok(Some(found)) => {
                    if found.language != language {
                        info!(
                            template = %template_name,
                            "template is registered as {:?}; using that language",
                            found.language
                        );
                        language = found.language.clone();
                    }
                    definition = Some(found);
                }
                Ok(None) => warn!(
                    template = %template_name,
                    "template not found on the business account; sending without structure"
                ),
                Err(error) => {
                    warn!("template lookup failed: {error:#}; sending without structure");
                }
            }
        }
    }

    // Resolve the authoritative image URL. A manual URL wins over the
    // upload path; otherwise the uploaded URL becomes authoritative.
    let needs_media = direct_image
        || definition
            .as_ref()
            .and_then(TemplateDefinition::required_header_media)
            .is_some();
    let mut image_url = args.image_url.clone();
    if let Some(path) = &args.image_file {
        if image_url.is_some() {
            warn!("--image-url provided; skipping upload of {}", path.display());
        } else if needs_media {
            let image = hosting::load_image_file(path).await?;
            let hosts: Vec<Box<dyn ImageHost>> = vec![
                Box::new(ImgbbHost::new(
                    config.hosting.imgbb_endpoint.clone(),
                    config.hosting.imgbb_api_key.clone(),
                )),
                Box::new(PostimagesHost::new(
                    config.hosting.postimages_endpoint.clone(),
                )),
            ];
            image_url = Some(hosting::upload_with_fallback(&hosts, &image).await?);
        } else {
            warn!("--image-file given but nothing in this send uses media; ignoring it");
        }
    }

    let request = DispatchRequest {
        recipients,
        template_name,
        template_language: language,
        definition,
        bindings: args.params.clone(),
        image_url,
        caption: args.caption.clone(),
        simple_mode: args.simple,
        direct_image,
        image_only: args.image_only,
    };

    info!(recipients = request.recipients.len(), "dispatching batch");
    let summary = dispatch::dispatch(&client, &request).await?;
    print_summary(&summary);

    if summary.succeeded() == 0 {
        bail!("no message was accepted");
    }
    Ok(())
}

fn print_summary(summary: &DispatchSummary) {
    println!();
    for outcome in &summary.outcomes {
        if outcome.success {
            let id = outcome
                .message_id
                .as_deref()
                .or(outcome.image_message_id.as_deref())
                .unwrap_or("-");
            println!(
                "{} {}  {}",
                style("✓").green().bold(),
                outcome.recipient,
                style(id).dim()
            );
        } else {
            println!(
                "{} {}  {}",
                style("✗").red().bold(),
                outcome.recipient,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
    println!();
    println!(
        "Sent to {} recipient(s), {} failed.",
        summary.succeeded(),
        summary.failed()
    );
}

async fn cmd_template_check(config: Config, name: &str, language: &str) -> Result<()> {
    if config.business_account_id.is_empty() {
        bail!("business_account_id is not configured; run `wablast init`");
    }

    let client = GraphClient::from_config(&config);
    let Some(template) = client.find_template(name, language).await? else {
        bail!(
            "template {name:?} not found on business account {}",
            config.business_account_id
        );
    };

    println!("Template:  {}", template.name);
    println!("Language:  {}", template.language);
    println!(
        "Status:    {}",
        template.status.as_deref().unwrap_or("UNKNOWN")
    );
    if template.language != language {
        println!(
            "{} requested {:?} but the template is registered as {:?}; sends will use that",
            style("note:").yellow(),
            language,
            template.language
        );
    }

    println!();
    for component in &template.components {
        let format = component
            .format
            .as_deref()
            .map(|format| format!(" ({format})"))
            .unwrap_or_default();
        println!("  {}{}", component.kind, format);
        if let Some(text) = &component.text {
            println!("      {text}");
        }
    }

    let placeholders = template.placeholders();
    println!();
    if placeholders.is_empty() {
        println!("No body parameters required.");
    } else {
        let slots: Vec<String> = placeholders
            .iter()
            .map(|index| format!("{{{{{index}}}}}"))
            .collect();
        println!(
            "Body parameters required ({}): {}",
            placeholders.len(),
            slots.join(", ")
        );
    }

    if let Some(kind) = template.required_header_media() {
        println!(
            "{} header needs a dynamic {} — pass --image-file or --image-url, and do not use --simple",
            style("!").yellow().bold(),
            kind.as_str()
        );
    }
    Ok(())
}

async fn cmd_template_list(config: Config) -> Result<()> {
    if config.business_account_id.is_empty() {
        bail!("business_account_id is not configured; run `wablast init`");
    }

    let client = GraphClient::from_config(&config);
    let templates = client.list_templates().await?;
    if templates.is_empty() {
        println!("No templates found on business account {}.", config.business_account_id);
        return Ok(());
    }

    println!("{} template(s):", templates.len());
    for template in &templates {
        println!(
            "  {}  {}  {}",
            template.name,
            template.language,
            template.status.as_deref().unwrap_or("UNKNOWN")
        );
    }
    Ok(())
}

async fn cmd_phone_numbers(config: Config) -> Result<()> {
    if config.business_account_id.is_empty() {
        bail!("business_account_id is not configured; run `wablast init`");
    }

    let client = GraphClient::from_config(&config);
    let numbers = client.list_phone_numbers().await?;
    if numbers.is_empty() {
        println!("No phone numbers registered to business account {}.", config.business_account_id);
        return Ok(());
    }

    for number in &numbers {
        println!(
            "  {}  {}  {}",
            number.id,
            number.display_phone_number.as_deref().unwrap_or("-"),
            number.verified_name.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

async fn cmd_diagnose(config: Config) -> Result<()> {
    if !config.has_credentials() {
        bail!(
            "access_token and phone_number_id are not configured; \
             run `wablast init` before diagnosing"
        );
    }

    let client = GraphClient::from_config(&config);
    println!("wablast diagnostics");
    println!();

    match client.phone_number_info().await {
        Ok(phone_number) => println!(
            "{} phone number id {} is valid ({})",
            style("✓").green().bold(),
            phone_number.id,
            phone_number
                .display_phone_number
                .as_deref()
                .unwrap_or("number hidden")
        ),
        Err(error) => println!(
            "{} phone number lookup: {error:#}",
            style("✗").red().bold()
        ),
    }

    if config.business_account_id.is_empty() {
        println!(
            "{} business_account_id not configured; skipping account checks",
            style("-").dim()
        );
    } else {
        match client.business_account_info().await {
            Ok(_) => println!(
                "{} business account {} is reachable",
                style("✓").green().bold(),
                config.business_account_id
            ),
            Err(error) => println!(
                "{} business account lookup: {error:#}",
                style("✗").red().bold()
            ),
        }

        match client.list_templates().await {
            Ok(templates) => println!(
                "{} can read message templates ({} found)",
                style("✓").green().bold(),
                templates.len()
            ),
            Err(error) => println!("{} template access: {error:#}", style("✗").red().bold()),
        }
    }

    match client.probe_messages_endpoint().await? {
        ProbeOutcome::Reachable => println!(
            "{} messages endpoint accepts requests",
            style("✓").green().bold()
        ),
        ProbeOutcome::WrongPhoneNumberId => println!(
            "{} messages endpoint returned 404 — this phone number id cannot send; \
             check the API setup page",
            style("✗").red().bold()
        ),
        ProbeOutcome::Other(detail) => {
            println!("{} messages endpoint: {detail}", style("✗").red().bold());
        }
    }

    Ok(())
}

async fn cmd_status(config: Config, message_ids: Vec<String>) -> Result<()> {
    let client = GraphClient::from_config(&config);
    let results = client.message_statuses(&message_ids).await;
    for (id, result) in results {
        match result {
            Ok(value) => {
                println!("{} {}", style("✓").green().bold(), id);
                println!("{}", serde_json::to_string_pretty(&value)?);
            }
            Err(error) => println!("{} {}  {error:#}", style("✗").red().bold(), id),
        }
    }
    Ok(())
}

fn write_shell_completion<W: Write>(shell: CompletionShell, writer: &mut W) -> Result<()> {
    use clap_complete::generate;
    use clap_complete::shells;

    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();

    match shell {
        CompletionShell::Bash => generate(shells::Bash, &mut cmd, bin_name, writer),
        CompletionShell::Fish => generate(shells::Fish, &mut cmd, bin_name, writer),
        CompletionShell::Zsh => generate(shells::Zsh, &mut cmd, bin_name, writer),
        CompletionShell::PowerShell => generate(shells::PowerShell, &mut cmd, bin_name, writer),
        CompletionShell::Elvish => generate(shells::Elvish, &mut cmd, bin_name, writer),
    }
    Ok(())
}
