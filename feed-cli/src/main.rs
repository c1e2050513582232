//! my-feed CLI
//!
//! Terminal client for the my-feed reader server.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use colored::*;
use dialoguer::{Confirm, Password};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use feed_client::{ClientConfig, FeedClient, HttpTransport, MemoryTokenStore, Payload};
use feed_core::{ItemWithTags, NewSource, NewTag, Source, Tag, TimeWindow};

/// my-feed - RSS reader client
#[derive(Parser)]
#[command(name = "feed")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Server origin (overrides FEED_BASE_URL from the environment)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Auth token for write operations
    #[arg(long, global = true, env = "FEED_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List items of a time window
    Items {
        /// Time window (1d, 2d, 3d, 1w)
        #[arg(short, long)]
        window: Option<TimeWindow>,
        /// Include items already marked done
        #[arg(short, long)]
        all: bool,
        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },

    /// Keep an item list on screen and refresh it periodically
    Watch {
        /// Time window (1d, 2d, 3d, 1w)
        #[arg(short, long)]
        window: Option<TimeWindow>,
        /// Seconds between refreshes
        #[arg(short, long, default_value = "60")]
        interval: u64,
    },

    /// Mark an item as done
    Done {
        /// Item id
        id: i64,
        /// Time window whose cached list is updated
        #[arg(short, long)]
        window: Option<TimeWindow>,
    },

    /// List sources
    Sources {
        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },

    /// Subscribe to a new source
    AddSource(SourceArgs),

    /// Show the items a source would add without subscribing
    PreviewSource(SourceArgs),

    /// Unsubscribe from a source
    RemoveSource {
        /// Source id
        id: i64,
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// List tags
    Tags {
        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },

    /// Create a tag
    AddTag(TagArgs),

    /// Change a tag's colours
    EditTag(TagArgs),

    /// Delete a tag
    RemoveTag {
        /// Tag name
        name: String,
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Check a token with the server
    Login {
        /// Token to check (prompted for if omitted)
        token: Option<String>,
    },
}

#[derive(Args)]
struct SourceArgs {
    /// Display name
    name: String,
    /// Channel URL
    url: String,
    /// Ignore items published before this date (YYYY-MM-DD)
    #[arg(long)]
    min_date: Option<NaiveDate>,
}

impl SourceArgs {
    fn to_new_source(&self) -> Result<NewSource> {
        let mut source = NewSource::new(&self.name, &self.url);
        if let Some(date) = self.min_date {
            let midnight = date.and_hms_opt(0, 0, 0).context("Invalid min date")?;
            source = source.min_date(midnight);
        }
        Ok(source)
    }
}

#[derive(Args)]
struct TagArgs {
    /// Tag name
    name: String,
    /// Background colour (CSS)
    #[arg(long)]
    background: Option<String>,
    /// Text colour (CSS)
    #[arg(long)]
    text: Option<String>,
    /// Border colour (CSS)
    #[arg(long)]
    border: Option<String>,
}

impl TagArgs {
    fn to_new_tag(&self) -> NewTag {
        let mut tag = NewTag::new(&self.name);
        if let Some(color) = &self.background {
            tag = tag.background(color);
        }
        if let Some(color) = &self.text {
            tag = tag.text(color);
        }
        if let Some(color) = &self.border {
            tag = tag.border(color);
        }
        tag
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "feed=debug,info"
    } else {
        "feed=info,warn"
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = ClientConfig::from_env().context("Invalid FEED_* configuration")?;
    if let Some(url) = &cli.base_url {
        config.base_url = url.clone();
    }
    let client = connect(config, cli.token.clone())?;

    match cli.command {
        Commands::Items { window, all, json } => cmd_items(&client, window, all, json).await,
        Commands::Watch { window, interval } => cmd_watch(&client, window, interval).await,
        Commands::Done { id, window } => cmd_done(&client, id, window).await,
        Commands::Sources { json } => cmd_sources(&client, json).await,
        Commands::AddSource(args) => cmd_add_source(&client, &args).await,
        Commands::PreviewSource(args) => cmd_preview_source(&client, &args).await,
        Commands::RemoveSource { id, yes } => cmd_remove_source(&client, id, yes).await,
        Commands::Tags { json } => cmd_tags(&client, json).await,
        Commands::AddTag(args) => cmd_add_tag(&client, &args).await,
        Commands::EditTag(args) => cmd_edit_tag(&client, &args).await,
        Commands::RemoveTag { name, yes } => cmd_remove_tag(&client, &name, yes).await,
        Commands::Login { token } => cmd_login(&client, token).await,
    }
}

fn connect(config: ClientConfig, token: Option<String>) -> Result<FeedClient> {
    let transport = Arc::new(HttpTransport::new(&config).context("Failed to set up HTTP client")?);
    let tokens = match token {
        Some(token) => MemoryTokenStore::with_token(token),
        None => MemoryTokenStore::new(),
    };
    Ok(FeedClient::with_parts(config, transport, Arc::new(tokens)))
}

fn spinner(message: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    Ok(pb)
}

fn require_token(client: &FeedClient) -> Result<()> {
    if !client.is_authenticated() {
        bail!("This command needs a token: pass --token or set FEED_TOKEN");
    }
    Ok(())
}

fn print_items(items: &[ItemWithTags]) {
    if items.is_empty() {
        println!("{}", "Nothing new.".yellow());
        return;
    }
    for row in items {
        let title = row.item.display_title();
        let title = if row.item.done {
            title.dimmed().strikethrough()
        } else {
            title.bold()
        };
        let tags: Vec<&str> = row.tag_names().collect();
        print!("{:>6}  {}", row.id().to_string().dimmed(), title);
        if !tags.is_empty() {
            print!("  {}", format!("[{}]", tags.join(", ")).magenta());
        }
        println!();
        println!("        {}", row.item.link.blue().underline());
    }
}

fn print_sources(sources: &[Source]) {
    for source in sources {
        let polled = source
            .last_poll
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".into());
        println!(
            "{:>4}  {}  {}  {} {}",
            source.id.to_string().dimmed(),
            source.name.bold(),
            source.url.blue(),
            "polled:".dimmed(),
            polled
        );
    }
}

fn print_tags(tags: &[Tag]) {
    for tag in tags {
        let colours = [
            ("bg", &tag.background_color),
            ("text", &tag.text_color),
            ("border", &tag.border_color),
        ]
        .into_iter()
        .filter_map(|(label, color)| color.as_deref().map(|c| format!("{label}={c}")))
        .collect::<Vec<_>>()
        .join(" ");
        println!("  {}  {}", tag.name.bold(), colours.dimmed());
    }
}

/// List items
async fn cmd_items(
    client: &FeedClient,
    window: Option<TimeWindow>,
    all: bool,
    json: bool,
) -> Result<()> {
    let window = window.unwrap_or(client.config().default_window);
    let pb = spinner(&format!("Loading items from the {}...", window.label().to_lowercase()))?;
    let items = if all {
        client.all_items(window).await
    } else {
        client.items(window).await
    };
    pb.finish_and_clear();
    let items = items.context("Failed to load items")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    println!("{} {} ({})", "📰".cyan(), window.label().cyan().bold(), items.len());
    print_items(&items);
    Ok(())
}

/// Watch an item list
async fn cmd_watch(client: &FeedClient, window: Option<TimeWindow>, interval: u64) -> Result<()> {
    let window = window.unwrap_or(client.config().default_window);
    println!(
        "{} {} (refresh every {}s, Ctrl+C to stop)",
        "👀 Watching".cyan().bold(),
        window.label(),
        interval
    );

    let subscription = client.subscribe_items(window, move |entry| {
        if let Some(err) = &entry.error {
            println!("{} {}", "⚠️  Refresh failed:".yellow(), err);
        }
        if let Some(items) = entry.value.as_ref().and_then(Payload::as_items) {
            println!("\n{} {}", "──".dimmed(), chrono::Local::now().format("%H:%M:%S"));
            print_items(items);
        }
    });

    let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = client.refresh(&feed_core::FeedKey::items(window)).await {
                    tracing::debug!(error = %err, "Periodic refresh failed");
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.unsubscribe(&subscription);
    println!("\n{}", "Stopped.".dimmed());
    Ok(())
}

/// Mark an item as done
async fn cmd_done(client: &FeedClient, id: i64, window: Option<TimeWindow>) -> Result<()> {
    require_token(client)?;
    let window = window.unwrap_or(client.config().default_window);

    // Load first so the cached list carries the optimistic update.
    client.items(window).await.context("Failed to load items")?;
    client
        .mark_done(window, id)?
        .await
        .with_context(|| format!("Failed to mark item {id} as done"))?;

    println!("{} item {}", "✅ Marked done:".green(), id);
    Ok(())
}

/// List sources
async fn cmd_sources(client: &FeedClient, json: bool) -> Result<()> {
    let pb = spinner("Loading sources...")?;
    let sources = client.sources().await;
    pb.finish_and_clear();
    let sources = sources.context("Failed to load sources")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&sources)?);
    } else {
        println!("{} ({})", "📡 Sources".cyan().bold(), sources.len());
        print_sources(&sources);
    }
    Ok(())
}

/// Subscribe to a source
async fn cmd_add_source(client: &FeedClient, args: &SourceArgs) -> Result<()> {
    require_token(client)?;
    let source = args.to_new_source()?;
    client
        .create_source(&source)?
        .await
        .context("Failed to add source")?;

    println!("{} {}", "✅ Source added:".green(), source.name.bold());
    Ok(())
}

/// Preview a source
async fn cmd_preview_source(client: &FeedClient, args: &SourceArgs) -> Result<()> {
    require_token(client)?;
    let source = args.to_new_source()?;
    let pb = spinner(&format!("Fetching {}...", source.url))?;
    let items = client.preview_source(&source).await;
    pb.finish_and_clear();
    let items = items.context("Failed to preview source")?;

    println!("{} {} items", "🔍 Would add".cyan().bold(), items.len());
    print_items(&items);
    Ok(())
}

/// Unsubscribe from a source
async fn cmd_remove_source(client: &FeedClient, id: i64, yes: bool) -> Result<()> {
    require_token(client)?;
    if !yes
        && !Confirm::new()
            .with_prompt(format!("Remove source {id}?"))
            .default(false)
            .interact()?
    {
        println!("{}", "Cancelled.".dimmed());
        return Ok(());
    }

    client.sources().await.context("Failed to load sources")?;
    client
        .delete_source(id)?
        .await
        .with_context(|| format!("Failed to remove source {id}"))?;

    println!("{} {}", "✅ Source removed:".green(), id);
    Ok(())
}

/// List tags
async fn cmd_tags(client: &FeedClient, json: bool) -> Result<()> {
    let pb = spinner("Loading tags...")?;
    let tags = client.tags().await;
    pb.finish_and_clear();
    let tags = tags.context("Failed to load tags")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tags)?);
    } else {
        println!("{} ({})", "🏷️  Tags".cyan().bold(), tags.len());
        print_tags(&tags);
    }
    Ok(())
}

/// Create a tag
async fn cmd_add_tag(client: &FeedClient, args: &TagArgs) -> Result<()> {
    require_token(client)?;
    let tag = args.to_new_tag();
    client.create_tag(&tag)?.await.context("Failed to create tag")?;

    println!("{} {}", "✅ Tag created:".green(), tag.name.bold());
    Ok(())
}

/// Edit a tag
async fn cmd_edit_tag(client: &FeedClient, args: &TagArgs) -> Result<()> {
    require_token(client)?;
    let tag = args.to_new_tag();
    let catalog = client.tag_catalog().await.context("Failed to load tags")?;
    if !catalog.contains_key(&tag.name) {
        bail!("No tag named {:?}", tag.name);
    }

    client.update_tag(&tag)?.await.context("Failed to update tag")?;
    println!("{} {}", "✅ Tag updated:".green(), tag.name.bold());
    Ok(())
}

/// Delete a tag
async fn cmd_remove_tag(client: &FeedClient, name: &str, yes: bool) -> Result<()> {
    require_token(client)?;
    if !yes
        && !Confirm::new()
            .with_prompt(format!("Delete tag {name:?}?"))
            .default(false)
            .interact()?
    {
        println!("{}", "Cancelled.".dimmed());
        return Ok(());
    }

    client.tags().await.context("Failed to load tags")?;
    client
        .delete_tag(name)?
        .await
        .with_context(|| format!("Failed to delete tag {name:?}"))?;

    println!("{} {}", "✅ Tag deleted:".green(), name);
    Ok(())
}

/// Check a token
async fn cmd_login(client: &FeedClient, token: Option<String>) -> Result<()> {
    let token = match token {
        Some(token) => token,
        None => Password::new().with_prompt("Token").interact()?,
    };

    let pb = spinner("Checking token...")?;
    let outcome = client.login(&token).await;
    pb.finish_and_clear();

    match outcome {
        Ok(()) => {
            println!("{}", "✅ Token accepted.".green().bold());
            println!("   Export it as {} to use write commands.", "FEED_TOKEN".yellow());
            Ok(())
        }
        Err(feed_core::FeedError::Unauthorized) => bail!("Token rejected by the server"),
        Err(err) => Err(err).context("Login failed"),
    }
}
