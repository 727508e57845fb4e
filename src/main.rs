use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use smartdns_streams::catalog::DomainCatalog;
use smartdns_streams::config::{Settings, SettingsOverrides};
use smartdns_streams::conflict::Ownership;
use smartdns_streams::proxy::{HTTP_HOSTS_TABLE, HTTPS_HOSTS_TABLE, ProxyFile};
use smartdns_streams::resolver_file::ResolverFile;
use smartdns_streams::service::{ServiceAction, ServiceManager, Systemctl, restart_if_active};
use smartdns_streams::session::Session;
use smartdns_streams::upstream::RECOMMENDED_SERVERS;
use smartdns_streams::util::{is_root, public_ipv4};
use smartdns_streams::{AssignmentTable, ManagerError, Target};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "smartdns-streams")]
#[command(version)]
#[command(about = "Assign streaming platforms to SmartDNS upstream groups")]
struct Cli {
    /// Settings file path
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SmartDNS config path
    #[arg(long, value_name = "FILE")]
    resolver_config: Option<PathBuf>,

    /// sniproxy config path
    #[arg(long, value_name = "FILE")]
    proxy_config: Option<PathBuf>,

    /// Domain catalog path
    #[arg(long, value_name = "FILE")]
    catalog: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Default)]
struct TargetArgs {
    /// Upstream group name (nameserver rules)
    #[arg(long, conflicts_with_all = ["address", "unlock"])]
    group: Option<String>,

    /// Fixed answer address (address rules)
    #[arg(long)]
    address: Option<String>,

    /// Route through this host: address rules with its public IPv4
    #[arg(long)]
    unlock: bool,
}

#[derive(Args)]
struct PlatformArgs {
    /// Sub-platform to select, as TOP/SUB
    #[arg(long = "select", value_name = "TOP/SUB", value_parser = parse_platform)]
    select: Vec<(String, String)>,

    /// Select every sub-platform of a top category
    #[arg(long = "select-top", value_name = "TOP")]
    select_top: Vec<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Show platform assignments
    Status {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Edit which platforms route to a target and save
    Assign {
        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        platforms: PlatformArgs,

        /// Sub-platform to deselect, as TOP/SUB
        #[arg(long = "deselect", value_name = "TOP/SUB", value_parser = parse_platform)]
        deselect: Vec<(String, String)>,

        /// Start from an empty selection instead of the current one
        #[arg(long)]
        clear: bool,

        /// Restart SmartDNS after saving changes
        #[arg(long)]
        restart: bool,
    },
    /// Add platform domains to the sniproxy host tables
    Proxy {
        #[command(flatten)]
        platforms: PlatformArgs,

        /// Restart sniproxy after saving changes
        #[arg(long)]
        restart: bool,
    },
    /// Manage upstream DNS groups
    #[command(subcommand)]
    Groups(GroupsCommand),
    /// Manage default upstream servers
    #[command(subcommand)]
    Servers(ServersCommand),
    /// Inspect or refresh the domain catalog
    #[command(subcommand)]
    Catalog(CatalogCommand),
}

#[derive(Subcommand)]
enum GroupsCommand {
    /// List upstream groups
    List,
    /// Add an upstream group
    Add {
        #[arg(long)]
        ip: String,
        #[arg(long)]
        name: String,
    },
    /// Remove an upstream group
    Remove { name: String },
}

#[derive(Subcommand)]
enum ServersCommand {
    /// List default upstream servers
    List,
    /// Add a default upstream server
    Add { ip: String },
    /// Remove a default upstream server by its list number
    Remove { number: usize },
    /// List recommended public resolvers, or add those of one provider
    Recommended { provider: Option<String> },
}

#[derive(Subcommand)]
enum CatalogCommand {
    /// Print the catalog
    Show,
    /// Download the catalog again
    Refresh,
}

fn parse_platform(value: &str) -> Result<(String, String), String> {
    match value.split_once('/') {
        Some((top, sub)) if !top.trim().is_empty() && !sub.trim().is_empty() => {
            Ok((top.trim().to_string(), sub.trim().to_string()))
        }
        _ => Err(format!("expected TOP/SUB, got {value:?}")),
    }
}

fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let overrides = SettingsOverrides {
        resolver_config: cli.resolver_config,
        proxy_config: cli.proxy_config,
        catalog: cli.catalog,
        log_level: cli.log_level,
    };
    let settings = Settings::load(cli.config.as_deref(), overrides)?;
    init_logging(&settings.logging.level);

    match cli.command {
        Command::Status { target } => status(&settings, &target),
        Command::Assign {
            target,
            platforms,
            deselect,
            clear,
            restart,
        } => {
            warn_if_not_root();
            assign(&settings, &target, &platforms, &deselect, clear, restart)
        }
        Command::Proxy { platforms, restart } => {
            warn_if_not_root();
            proxy(&settings, &platforms, restart)
        }
        Command::Groups(cmd) => groups(&settings, cmd),
        Command::Servers(cmd) => servers(&settings, cmd),
        Command::Catalog(cmd) => catalog(&settings, cmd),
    }
}

fn warn_if_not_root() {
    if !is_root() {
        warn!("Not running as root; writing system config files will likely fail");
    }
}

fn load_catalog(settings: &Settings) -> anyhow::Result<DomainCatalog> {
    let path = &settings.paths.catalog;
    if !path.exists() {
        info!(path = %path.display(), "Domain catalog missing, downloading");
        return Ok(DomainCatalog::refresh(
            &settings.catalog.url,
            path,
            Duration::from_secs(settings.catalog.timeout_secs),
        )?);
    }
    DomainCatalog::load(path).with_context(|| format!("reading {}", path.display()))
}

/// Resolves the target flags; `None` when no target was requested.
fn resolve_target(args: &TargetArgs, table: &AssignmentTable) -> anyhow::Result<Option<Target>> {
    if let Some(group) = &args.group {
        let target = Target::nameserver(group.as_str());
        target.validate()?;
        return Ok(Some(target));
    }
    if args.unlock {
        let preferred = match &args.address {
            Some(ip) => Some(ip.trim().to_string()),
            None => match public_ipv4() {
                Ok(ip) => Some(ip.to_string()),
                Err(e) => {
                    warn!(error = %e, "Public IPv4 discovery failed");
                    None
                }
            },
        };
        let target = Target::for_unlock(preferred.as_deref(), table)
            .context("no unlock address known; pass --address")?;
        return Ok(Some(target));
    }
    if let Some(ip) = &args.address {
        let ip: Ipv4Addr = ip
            .trim()
            .parse()
            .map_err(|_| ManagerError::InvalidAddress(ip.clone()))?;
        return Ok(Some(Target::address(ip.to_string())));
    }
    Ok(None)
}

fn status(settings: &Settings, args: &TargetArgs) -> anyhow::Result<()> {
    let path = &settings.paths.resolver_config;
    let file = ResolverFile::open(path).with_context(|| format!("reading {}", path.display()))?;
    let table = file.assignments();

    let Some(target) = resolve_target(args, &table)? else {
        if table.is_empty() {
            println!("No platforms assigned.");
        }
        for (sub, assignment) in &table {
            println!("{sub:<24} {assignment}");
        }
        return Ok(());
    };

    let catalog = load_catalog(settings)?;
    let session = Session::open(target, table, &catalog);
    println!("Target: {}", session.target());
    for top in catalog.top_categories() {
        println!("{top}");
        for sub in catalog.sub_platforms(top) {
            let mark = match session.ownership(sub) {
                Ownership::OwnedByTarget => "[*]".to_string(),
                Ownership::Free => "[ ]".to_string(),
                Ownership::OwnedByOther => session
                    .assignments()
                    .get(sub)
                    .map_or_else(|| "[-]".to_string(), |a| format!("[-] {a}")),
            };
            println!("  {mark:<4} {sub}");
        }
    }
    Ok(())
}

fn assign(
    settings: &Settings,
    args: &TargetArgs,
    platforms: &PlatformArgs,
    deselect: &[(String, String)],
    clear: bool,
    restart: bool,
) -> anyhow::Result<()> {
    let catalog = load_catalog(settings)?;
    let mut file = ResolverFile::open_or_init(&settings.paths.resolver_config)?;
    let added = file.ensure_base_directives();

    let target = resolve_target(args, &file.assignments())?
        .context("a target is required: --group, --address, or --unlock")?;
    let mut session = Session::open(target, file.assignments(), &catalog);

    if clear {
        session.clear();
    }
    for top in &platforms.select_top {
        if catalog.sub_platforms(top).next().is_none() {
            warn!(top = %top, "Unknown top category");
        }
        let subs: Vec<String> = catalog.sub_platforms(top).map(str::to_owned).collect();
        for sub in subs {
            if let Err(e) = session.set_selected(top, &sub, true) {
                warn!(error = %e, "Skipping");
            }
        }
    }
    for (top, sub) in &platforms.select {
        if !catalog.contains(top, sub) {
            warn!(top = %top, sub_platform = %sub, "Not in the catalog");
        }
        if let Err(e) = session.set_selected(top, sub, true) {
            warn!(error = %e, "Skipping");
        }
    }
    for (top, sub) in deselect {
        if let Err(e) = session.set_selected(top, sub, false) {
            warn!(error = %e, "Skipping");
        }
    }

    let report = session.save(&mut file, &catalog)?;
    if report.is_noop() && added > 0 {
        file.save()?;
    }

    for (sub, e) in &report.failures {
        println!("failed: {sub}: {e}");
    }
    if report.is_noop() {
        println!("Nothing to save.");
        return Ok(());
    }
    println!(
        "Saved: {} platform(s) changed ({} written, {} removed).",
        report.changed,
        report.written.len(),
        report.removed.len()
    );
    restart_or_hint(&settings.service.resolver_unit, restart)
}

fn proxy(settings: &Settings, platforms: &PlatformArgs, restart: bool) -> anyhow::Result<()> {
    let catalog = load_catalog(settings)?;
    let mut domains: Vec<&str> = Vec::new();
    for top in &platforms.select_top {
        for sub in catalog.sub_platforms(top) {
            domains.extend(catalog.domains(top, sub).iter().map(String::as_str));
        }
    }
    for (top, sub) in &platforms.select {
        domains.extend(catalog.domains(top, sub).iter().map(String::as_str));
    }
    if domains.is_empty() {
        bail!("no domains selected");
    }

    let path = &settings.paths.proxy_config;
    let mut file = ProxyFile::open(path).with_context(|| format!("reading {}", path.display()))?;
    if !file.merge_domains(&[HTTP_HOSTS_TABLE, HTTPS_HOSTS_TABLE], &domains) {
        println!("Nothing to save.");
        return Ok(());
    }
    file.save()?;
    println!("Proxy tables updated.");
    restart_or_hint(&settings.service.proxy_unit, restart)
}

fn restart_or_hint(unit: &str, restart: bool) -> anyhow::Result<()> {
    let services = Systemctl;
    if restart {
        if restart_if_active(&services, unit)? {
            println!("Restarted {unit}.");
        } else {
            services.control(unit, ServiceAction::Start)?;
            println!("Started {unit}.");
        }
    } else if services.is_active(unit) {
        println!("Restart {unit} to apply the new configuration.");
    }
    Ok(())
}

fn groups(settings: &Settings, cmd: GroupsCommand) -> anyhow::Result<()> {
    let path = &settings.paths.resolver_config;
    match cmd {
        GroupsCommand::List => {
            let file = ResolverFile::open(path)?;
            let groups = file.upstream_groups();
            if groups.is_empty() {
                println!("No upstream groups.");
            }
            for group in groups {
                println!("{:<16} {}", group.name, group.ip);
            }
        }
        GroupsCommand::Add { ip, name } => {
            warn_if_not_root();
            let mut file = ResolverFile::open_or_init(path)?;
            file.add_upstream_group(&ip, &name)?;
            file.save()?;
            println!("Added group {name} ({ip}).");
        }
        GroupsCommand::Remove { name } => {
            warn_if_not_root();
            let mut file = ResolverFile::open(path)?;
            file.remove_upstream_group(&name)?;
            file.save()?;
            println!("Removed group {name}.");
        }
    }
    Ok(())
}

fn servers(settings: &Settings, cmd: ServersCommand) -> anyhow::Result<()> {
    let path = &settings.paths.resolver_config;
    match cmd {
        ServersCommand::List => {
            let file = ResolverFile::open(path)?;
            for (i, ip) in file.default_servers().iter().enumerate() {
                println!("{}. {ip}", i + 1);
            }
        }
        ServersCommand::Add { ip } => {
            warn_if_not_root();
            let mut file = ResolverFile::open_or_init(path)?;
            if file.add_default_server(&ip)? {
                file.save()?;
                println!("Added {ip}.");
            } else {
                println!("{ip} is already configured.");
            }
        }
        ServersCommand::Remove { number } => {
            warn_if_not_root();
            let mut file = ResolverFile::open(path)?;
            let index = number
                .checked_sub(1)
                .context("server numbers start at 1")?;
            let removed = file.remove_default_server(index)?;
            file.save()?;
            println!("Removed {removed}.");
        }
        ServersCommand::Recommended { provider: None } => {
            for (ip, provider) in RECOMMENDED_SERVERS {
                println!("{ip:<16} {provider}");
            }
        }
        ServersCommand::Recommended {
            provider: Some(provider),
        } => {
            warn_if_not_root();
            let mut file = ResolverFile::open_or_init(path)?;
            let added = file.add_recommended_servers(&provider)?;
            if added > 0 {
                file.save()?;
            }
            println!("Added {added} {provider} server(s).");
        }
    }
    Ok(())
}

fn catalog(settings: &Settings, cmd: CatalogCommand) -> anyhow::Result<()> {
    let catalog = match cmd {
        CatalogCommand::Show => load_catalog(settings)?,
        CatalogCommand::Refresh => DomainCatalog::refresh(
            &settings.catalog.url,
            &settings.paths.catalog,
            Duration::from_secs(settings.catalog.timeout_secs),
        )?,
    };
    for top in catalog.top_categories() {
        println!("{top}");
        for sub in catalog.sub_platforms(top) {
            println!("  {sub:<24} {} domain(s)", catalog.domains(top, sub).len());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn platform_values() {
        assert_eq!(
            parse_platform("USA/Netflix").unwrap(),
            ("USA".to_string(), "Netflix".to_string())
        );
        assert!(parse_platform("Netflix").is_err());
        assert!(parse_platform("/Netflix").is_err());
    }

    #[test]
    fn explicit_targets() {
        let table = AssignmentTable::new();
        let group = TargetArgs {
            group: Some("us".into()),
            ..TargetArgs::default()
        };
        assert_eq!(
            resolve_target(&group, &table).unwrap(),
            Some(Target::nameserver("us"))
        );

        let address = TargetArgs {
            address: Some("203.0.113.5".into()),
            ..TargetArgs::default()
        };
        assert_eq!(
            resolve_target(&address, &table).unwrap(),
            Some(Target::address("203.0.113.5"))
        );

        let bad = TargetArgs {
            address: Some("nope".into()),
            ..TargetArgs::default()
        };
        assert!(resolve_target(&bad, &table).is_err());
        assert_eq!(resolve_target(&TargetArgs::default(), &table).unwrap(), None);
    }

    #[test]
    fn unlock_with_explicit_address() {
        let args = TargetArgs {
            address: Some("198.51.100.7".into()),
            unlock: true,
            ..TargetArgs::default()
        };
        assert_eq!(
            resolve_target(&args, &AssignmentTable::new()).unwrap(),
            Some(Target::address("198.51.100.7"))
        );
    }
}
