use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use dialoguer::{Input, Password, Select, theme::ColorfulTheme};
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use archview::archive::{Archive, ChannelAccess, accessible_channels};
use archview::model::UNCATEGORIZED;
use archview::seal::{Passwords, SealOptions, seal};
use archview::{
    Config, KeyRing, MessageLink, Query, RenderContext, Renderer, ScrollOutcome,
    Session, TerminalRenderer, open_source, search,
};

#[derive(Parser)]
#[command(name = "archview", version, about = "Viewer for encrypted chat archives")]
struct Cli {
    /// Archive root directory or URL (default from ~/.archview/config.toml)
    #[arg(long, global = true)]
    source: Option<String>,

    /// Password to try; repeat for several. Prompted for when absent.
    #[arg(long = "key", global = true)]
    keys: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct Target {
    #[arg(long)]
    server: Option<String>,
    #[arg(long)]
    channel: String,
    #[arg(long, default_value_t = 0)]
    chunk: u32,
    /// Open the channel with the first key without reading its server descriptor
    #[arg(long)]
    force: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List servers the keys unlock
    #[command(name = "servers")]
    Servers,

    /// List channels of a server the keys unlock
    #[command(name = "channels")]
    Channels {
        #[arg(long)]
        server: String,
    },

    /// Print a chunk of a channel, optionally jumping to a message
    #[command(name = "view")]
    View {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        message: Option<String>,
        /// Page through the chunk interactively
        #[arg(short, long)]
        interactive: bool,
    },

    /// Pinned messages of a chunk
    #[command(name = "pins")]
    Pins {
        #[command(flatten)]
        target: Target,
    },

    /// Members who posted in a chunk
    #[command(name = "members")]
    Members {
        #[command(flatten)]
        target: Target,
    },

    /// Search a chunk (from:, mentions:, has:, before:, during:, after:, pinned:, reverse:)
    #[command(name = "search")]
    Search {
        #[command(flatten)]
        target: Target,
        query: String,
    },

    /// Print a link to a message
    #[command(name = "link")]
    Link {
        #[arg(long)]
        server: String,
        #[arg(long)]
        channel: String,
        #[arg(long, default_value_t = 0)]
        chunk: u32,
        #[arg(long)]
        message: String,
        /// Base URL (default: link_base from config)
        #[arg(long)]
        base: Option<String>,
    },

    /// Encrypt raw channel exports into an archive
    #[command(name = "seal")]
    Seal {
        /// Directory of exported channel .json files
        input: PathBuf,
        /// Output directory; servers/ is created inside it
        out: PathBuf,
        /// Archive-wide password (prompted for when absent)
        #[arg(long)]
        password: Option<String>,
        /// SERVER_ID=PASSWORD
        #[arg(long = "server-password", value_parser = parse_assignment)]
        server_passwords: Vec<(String, String)>,
        /// CATEGORY_ID=PASSWORD
        #[arg(long = "category-password", value_parser = parse_assignment)]
        category_passwords: Vec<(String, String)>,
        /// CHANNEL_ID=PASSWORD
        #[arg(long = "channel-password", value_parser = parse_assignment)]
        channel_passwords: Vec<(String, String)>,
        /// Messages per chunk (default from config or 10000)
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// View or modify config (~/.archview/config.toml)
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current config
    Show,
    /// Set a config value
    Set {
        /// Key to set (source, page_size, batch_size, date_format, chunk_size, link_base)
        key: String,
        /// Value to set
        value: String,
    },
    /// Reset config to defaults
    Reset,
}

fn parse_assignment(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((id, password)) if !id.is_empty() && !password.is_empty() => {
            Ok((id.to_string(), password.to_string()))
        }
        _ => Err(format!("expected ID=PASSWORD, got {value:?}")),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load().unwrap_or_default();
    let location = cli.source.clone().unwrap_or_else(|| config.source.clone());

    match cli.command {
        Commands::Servers => {
            let keys = key_ring(cli.keys)?;
            let archive = Archive::from_boxed(open_source(&location));
            let loads = archive.unlock_servers(&keys)?;
            if loads.is_empty() {
                println!("No servers match the given keys.");
            }
            for load in loads {
                match load.result {
                    Ok(unlocked) => println!(
                        "{}  {} ({} channels)",
                        load.server_id,
                        unlocked.server.name,
                        unlocked.server.channels().count()
                    ),
                    Err(err) => eprintln!("{}  failed: {}", load.server_id, err.user_message()),
                }
            }
        }
        Commands::Channels { server } => {
            let keys = key_ring(cli.keys)?;
            let archive = Archive::from_boxed(open_source(&location));
            print_channels(&archive, &server, &keys)?;
        }
        Commands::View {
            target,
            message,
            interactive,
        } => {
            let keys = key_ring(cli.keys)?;
            let archive = Archive::from_boxed(open_source(&location));
            let channel = resolve_channel(&archive, &target, &keys)?;
            let mut viewer = Viewer::open(&config, &archive, channel, target.chunk)?;
            if let Some(id) = message {
                viewer.jump(&id)?;
            }
            print!("{}", viewer.renderer.screen());
            if interactive {
                viewer.interact()?;
            }
        }
        Commands::Pins { target } => {
            let keys = key_ring(cli.keys)?;
            let archive = Archive::from_boxed(open_source(&location));
            let channel = resolve_channel(&archive, &target, &keys)?;
            let mut viewer = Viewer::open(&config, &archive, channel, target.chunk)?;
            viewer.print_pins();
        }
        Commands::Members { target } => {
            let keys = key_ring(cli.keys)?;
            let archive = Archive::from_boxed(open_source(&location));
            let channel = resolve_channel(&archive, &target, &keys)?;
            let viewer = Viewer::open(&config, &archive, channel, target.chunk)?;
            for member in viewer.session.window().members() {
                println!("{}", member.tag());
            }
        }
        Commands::Search { target, query } => {
            let keys = key_ring(cli.keys)?;
            let archive = Archive::from_boxed(open_source(&location));
            let channel = resolve_channel(&archive, &target, &keys)?;
            let mut viewer = Viewer::open(&config, &archive, channel, target.chunk)?;
            viewer.print_search(&query)?;
        }
        Commands::Link {
            server,
            channel,
            chunk,
            message,
            base,
        } => {
            let Some(base) = base.or(config.link_base) else {
                bail!("no link base: pass --base or run `archview config set link_base URL`");
            };
            let link = MessageLink {
                server,
                channel,
                chunk,
                message,
            };
            println!("{}", link.to_url(&base));
        }
        Commands::Seal {
            input,
            out,
            password,
            server_passwords,
            category_passwords,
            channel_passwords,
            chunk_size,
        } => {
            let password = match password {
                Some(password) => password,
                None => Password::with_theme(&ColorfulTheme::default())
                    .with_prompt("Archive password")
                    .with_confirmation("Confirm password", "Passwords don't match")
                    .interact()?,
            };
            let mut passwords = Passwords::new(password);
            passwords.servers.extend(server_passwords);
            passwords.categories.extend(category_passwords);
            passwords.channels.extend(channel_passwords);
            let mut options = SealOptions::new(passwords);
            options.chunk_size = chunk_size.unwrap_or(config.chunk_size);

            let report = seal(&input, &out, &options)?;
            println!(
                "sealed {} messages in {} chunks across {} channels and {} servers into {}",
                report.messages,
                report.chunks,
                report.channels,
                report.servers,
                out.join("servers").display()
            );
        }
        Commands::Config { action } => {
            handle_config(action)?;
        }
    }
    Ok(())
}

fn key_ring(keys: Vec<String>) -> Result<KeyRing> {
    let mut ring = KeyRing::new(keys);
    if ring.is_empty() {
        let password = Password::with_theme(&ColorfulTheme::default())
            .with_prompt("Password")
            .interact()?;
        ring.push(password);
    }
    if ring.is_empty() {
        bail!("no password given");
    }
    Ok(ring)
}

fn unlock_server(archive: &Archive, server_id: &str, keys: &KeyRing) -> Result<archview::model::Server> {
    let index = archive.index()?;
    let entry = index
        .into_iter()
        .find(|entry| entry.server_id == server_id)
        .ok_or_else(|| anyhow!("server {server_id} is not in {}", archive.describe()))?;
    let fingerprint = entry
        .fingerprint
        .ok_or_else(|| anyhow!("server {server_id} is not sealed"))?;
    let key = keys.resolve(&fingerprint)?;
    Ok(archive.server(server_id, key)?)
}

fn print_channels(archive: &Archive, server_id: &str, keys: &KeyRing) -> Result<()> {
    let server = unlock_server(archive, server_id, keys)?;
    let channels = accessible_channels(&server, keys);
    println!("{} ({})", server.name, server.id);
    if channels.is_empty() {
        println!("  no channels open with the given keys");
        return Ok(());
    }
    let mut current_category: Option<&str> = None;
    for channel in &channels {
        let indent = if channel.category_id == UNCATEGORIZED {
            "  "
        } else {
            if current_category != Some(channel.category_id.as_str()) {
                let name = server
                    .categories
                    .iter()
                    .find(|c| c.id == channel.category_id)
                    .map(|c| c.name.as_str())
                    .unwrap_or_default();
                println!("  {name}");
            }
            "    "
        };
        current_category = Some(channel.category_id.as_str());
        let chunks = if channel.chunks == 1 { "chunk" } else { "chunks" };
        println!(
            "{indent}#{} ({})  {} {chunks}",
            channel.name, channel.channel_id, channel.chunks
        );
        if let Some(topic) = &channel.topic {
            println!("{indent}  {topic}");
        }
    }
    Ok(())
}

fn resolve_channel(archive: &Archive, target: &Target, keys: &KeyRing) -> Result<ChannelAccess> {
    if target.force {
        let key = keys.first().context("no password given")?;
        let server = target.server.as_deref().unwrap_or_default();
        return Ok(ChannelAccess::forced(server, &target.channel, key));
    }
    let server_id = target
        .server
        .as_deref()
        .context("--server is required unless --force is given")?;
    let server = unlock_server(archive, server_id, keys)?;
    if server.channel(&target.channel).is_none() {
        bail!("channel {} is not in server {}", target.channel, server.name);
    }
    accessible_channels(&server, keys)
        .into_iter()
        .find(|access| access.channel_id == target.channel)
        .ok_or_else(|| anyhow!("no key opens channel {}", target.channel))
}

struct Viewer<'a> {
    archive: &'a Archive,
    channel: ChannelAccess,
    session: Session,
    renderer: TerminalRenderer,
    link_base: Option<String>,
}

impl<'a> Viewer<'a> {
    fn open(config: &Config, archive: &'a Archive, channel: ChannelAccess, chunk: u32) -> Result<Self> {
        let mut viewer = Self {
            archive,
            channel,
            session: Session::new(config.page_size, config.batch_size),
            renderer: TerminalRenderer::new(config.date_format),
            link_base: config.link_base.clone(),
        };
        viewer.load(chunk)?;
        Ok(viewer)
    }

    fn load(&mut self, chunk: u32) -> Result<()> {
        self.session
            .load_chunk(self.archive, &self.channel, chunk, &mut self.renderer)
            .map_err(|e| anyhow!("{} ({e})", e.user_message()))?;
        self.session.drain(&mut self.renderer);
        Ok(())
    }

    fn jump(&mut self, id: &str) -> Result<()> {
        self.session
            .jump_to(id, Instant::now(), &mut self.renderer)
            .map_err(|e| anyhow!("message {id}: {}", e.user_message()))?;
        Ok(())
    }

    fn print_pins(&mut self) {
        let window = self.session.window();
        let pinned = window.pinned();
        if pinned.is_empty() {
            println!("No pinned messages.");
            return;
        }
        for message in pinned {
            print!(
                "{}",
                self.renderer.render_single(window, message, RenderContext::Pinned)
            );
        }
    }

    fn print_search(&mut self, input: &str) -> Result<()> {
        let query = Query::parse(input)?;
        let window = self.session.window();
        let results = search(window.messages(), &query);
        if results.is_empty() {
            println!("No results found.");
            return Ok(());
        }
        println!("Found {} matches", results.len());
        for message in results {
            print!(
                "{}",
                self.renderer.render_single(window, message, RenderContext::Search)
            );
        }
        Ok(())
    }

    fn chunk_position(&self) -> (u32, u32) {
        self.session
            .active()
            .map(|active| (active.map.current, active.map.chunks))
            .unwrap_or((0, 0))
    }

    fn interact(&mut self) -> Result<()> {
        let theme = ColorfulTheme::default();
        let actions = [
            "Older messages",
            "Newer messages",
            "Jump to message",
            "Search",
            "Pinned messages",
            "Next chunk",
            "Previous chunk",
            "Copy link",
            "Quit",
        ];
        loop {
            let (current, chunks) = self.chunk_position();
            let choice = Select::with_theme(&theme)
                .with_prompt(format!(
                    "#{} chunk {}/{}",
                    self.channel.name,
                    current + 1,
                    chunks.max(1)
                ))
                .items(&actions)
                .default(0)
                .interact()?;
            self.session.tick(Instant::now(), &mut self.renderer);

            match choice {
                0 | 1 => {
                    let ratio = if choice == 0 { 0.0 } else { 1.0 };
                    match self.session.on_scroll(ratio, &mut self.renderer) {
                        ScrollOutcome::Ignored => println!("Nothing more to load."),
                        _ => print!("{}", self.renderer.screen()),
                    }
                }
                2 => {
                    let id: String = Input::with_theme(&theme)
                        .with_prompt("Message id")
                        .interact_text()?;
                    match self.jump(id.trim()) {
                        Ok(()) => print!("{}", self.renderer.screen()),
                        Err(err) => println!("{err}"),
                    }
                }
                3 => {
                    let query: String = Input::with_theme(&theme)
                        .with_prompt("Search")
                        .interact_text()?;
                    if let Err(err) = self.print_search(&query) {
                        println!("{err}");
                    }
                }
                4 => self.print_pins(),
                5 | 6 => {
                    let next = if choice == 5 {
                        current.checked_add(1).filter(|n| *n < chunks)
                    } else {
                        current.checked_sub(1)
                    };
                    match next {
                        Some(chunk) => match self.load(chunk) {
                            Ok(()) => print!("{}", self.renderer.screen()),
                            Err(err) => println!("{err}"),
                        },
                        None => println!("No more chunks."),
                    }
                }
                7 => self.print_link()?,
                _ => return Ok(()),
            }
        }
    }

    fn print_link(&self) -> Result<()> {
        let Some(base) = &self.link_base else {
            println!("Set link_base first: archview config set link_base URL");
            return Ok(());
        };
        let id: String = Input::with_theme(&ColorfulTheme::default())
            .with_prompt("Message id")
            .interact_text()?;
        let (current, _) = self.chunk_position();
        let link = MessageLink {
            server: self.channel.server_id.clone(),
            channel: self.channel.channel_id.clone(),
            chunk: current,
            message: id.trim().to_string(),
        };
        println!("{}", link.to_url(base));
        Ok(())
    }
}

fn handle_config(action: Option<ConfigAction>) -> Result<()> {
    match action {
        None | Some(ConfigAction::Show) => {
            let config = Config::load().unwrap_or_default();
            println!("source = \"{}\"", config.source);
            println!("page_size = {}", config.page_size);
            println!("batch_size = {}", config.batch_size);
            println!("date_format = \"{}\"", config.date_format);
            println!("chunk_size = {}", config.chunk_size);
            match &config.link_base {
                Some(base) => println!("link_base = \"{base}\""),
                None => println!("# link_base not set"),
            }
        }
        Some(ConfigAction::Set { key, value }) => {
            let mut config = Config::load().unwrap_or_default();
            config.set(&key, &value)?;
            let path = config.save()?;
            println!("saved to {}", path.display());
        }
        Some(ConfigAction::Reset) => {
            let config = Config::default();
            let path = config.save()?;
            println!("reset to defaults at {}", path.display());
        }
    }
    Ok(())
}
