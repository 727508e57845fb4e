//! Upstream server lines of the resolver config.
//!
//! Two kinds of `server` lines are managed:
//!
//! - default upstreams, `server <ipv4>`;
//! - upstream groups, `server <ipv4> IP -group <name> -exclude-default-group`.
//!
//! Group names are the identifiers used by `nameserver` rules.

use crate::error::{ManagerError, Result};
use crate::resolver_file::ResolverFile;
use std::collections::HashSet;
use std::net::Ipv4Addr;

/// Cache and serving directives every managed config should carry.
pub const BASE_DIRECTIVES: &[&str] = &[
    "dualstack-ip-selection no",
    "speed-check-mode none",
    "serve-expired-prefetch-time 21600",
    "prefetch-domain yes",
    "cache-size 32768",
    "cache-persist yes",
    "cache-file /etc/smartdns/cache",
    "serve-expired yes",
    "serve-expired-ttl 259200",
    "serve-expired-reply-ttl 3",
    "cache-checkpoint-time 86400",
];

/// Well-known public resolvers offered as default servers, with their
/// provider.
pub const RECOMMENDED_SERVERS: &[(Ipv4Addr, &str)] = &[
    (Ipv4Addr::new(223, 5, 5, 5), "AliDNS"),
    (Ipv4Addr::new(223, 6, 6, 6), "AliDNS"),
    (Ipv4Addr::new(119, 29, 29, 29), "DNSPod"),
    (Ipv4Addr::new(1, 1, 1, 1), "Cloudflare"),
    (Ipv4Addr::new(1, 0, 0, 1), "Cloudflare"),
    (Ipv4Addr::new(8, 8, 8, 8), "Google"),
    (Ipv4Addr::new(8, 8, 4, 4), "Google"),
    (Ipv4Addr::new(9, 9, 9, 9), "Quad9"),
    (Ipv4Addr::new(114, 114, 114, 114), "114DNS"),
    (Ipv4Addr::new(180, 76, 76, 76), "Baidu"),
];

/// Recommended servers whose provider or address matches `query`,
/// ignoring case.
#[must_use]
pub fn recommended_servers(query: &str) -> Vec<Ipv4Addr> {
    let query = query.trim();
    RECOMMENDED_SERVERS
        .iter()
        .filter(|(ip, provider)| provider.eq_ignore_ascii_case(query) || ip.to_string() == query)
        .map(|(ip, _)| *ip)
        .collect()
}

/// A named upstream server group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamGroup {
    /// Group name, referenced by `nameserver /<domain>/<name>`.
    pub name: String,
    /// Upstream server address.
    pub ip: Ipv4Addr,
}

/// Parsed `server` line.
#[derive(Debug, PartialEq, Eq)]
enum ServerLine<'a> {
    Default(Ipv4Addr),
    Group { ip: Ipv4Addr, name: &'a str },
}

fn parse_server_line(line: &str) -> Option<ServerLine<'_>> {
    let mut tokens = line.split_whitespace();
    if tokens.next()? != "server" {
        return None;
    }
    let ip = tokens.next()?.parse().ok()?;
    match (tokens.next(), tokens.next(), tokens.next()) {
        (None, _, _) => Some(ServerLine::Default(ip)),
        (Some("IP"), Some("-group"), Some(name)) => Some(ServerLine::Group { ip, name }),
        _ => None,
    }
}

fn parse_ipv4(ip: &str) -> Result<Ipv4Addr> {
    ip.trim()
        .parse()
        .map_err(|_| ManagerError::InvalidAddress(ip.trim().to_string()))
}

impl ResolverFile {
    /// Upstream groups, deduplicated by name and sorted by name.
    #[must_use]
    pub fn upstream_groups(&self) -> Vec<UpstreamGroup> {
        let mut seen = HashSet::new();
        let mut groups: Vec<UpstreamGroup> = self
            .lines()
            .iter()
            .filter_map(|l| match parse_server_line(l)? {
                ServerLine::Group { ip, name } => Some((ip, name)),
                ServerLine::Default(_) => None,
            })
            .filter(|(_, name)| seen.insert(*name))
            .map(|(ip, name)| UpstreamGroup {
                name: name.to_string(),
                ip,
            })
            .collect();
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        groups
    }

    /// Adds an upstream group line after the last `server` line, or at the
    /// top of the file when there is none.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::InvalidAddress`] for a bad IP or
    /// [`ManagerError::EmptyIdentifier`] for a blank name.
    pub fn add_upstream_group(&mut self, ip: &str, name: &str) -> Result<()> {
        let ip = parse_ipv4(ip)?;
        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(ManagerError::EmptyIdentifier);
        }
        let line = format!("server {ip} IP -group {name} -exclude-default-group");
        let lines = self.lines_mut();
        let at = lines
            .iter()
            .rposition(|l| l.starts_with("server "))
            .map_or(0, |i| i + 1);
        lines.insert(at, line);
        tracing::info!(group = %name, ip = %ip, "Added upstream group");
        Ok(())
    }

    /// Removes every line of the group `name` (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::NotFound`] if the group does not exist.
    pub fn remove_upstream_group(&mut self, name: &str) -> Result<()> {
        let wanted = name.trim().to_lowercase();
        let lines = self.lines_mut();
        let before = lines.len();
        lines.retain(|l| {
            !matches!(
                parse_server_line(l),
                Some(ServerLine::Group { name, .. }) if name.to_lowercase() == wanted
            )
        });
        if lines.len() == before {
            return Err(ManagerError::NotFound(format!("upstream group {name}")));
        }
        tracing::info!(group = %name, "Removed upstream group");
        Ok(())
    }

    /// Default upstream servers in file order.
    #[must_use]
    pub fn default_servers(&self) -> Vec<Ipv4Addr> {
        self.lines()
            .iter()
            .filter_map(|l| match parse_server_line(l.trim())? {
                ServerLine::Default(ip) => Some(ip),
                ServerLine::Group { .. } => None,
            })
            .collect()
    }

    /// Replaces all default server lines with `servers`, deduplicated and
    /// placed at the top of the file.
    pub fn set_default_servers(&mut self, servers: &[Ipv4Addr]) {
        let mut seen = HashSet::new();
        let mut next: Vec<String> = servers
            .iter()
            .filter(|ip| seen.insert(**ip))
            .map(|ip| format!("server {ip}"))
            .collect();
        let lines = self.lines_mut();
        next.extend(lines.drain(..).filter(|l| {
            !matches!(parse_server_line(l.trim()), Some(ServerLine::Default(_)))
        }));
        *lines = next;
        tracing::info!(servers = ?servers, "Set default upstream servers");
    }

    /// Appends a default server unless it is already configured.
    ///
    /// Returns `false` if it was already present.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::InvalidAddress`] for a bad IP.
    pub fn add_default_server(&mut self, ip: &str) -> Result<bool> {
        let ip = parse_ipv4(ip)?;
        let mut current = self.default_servers();
        if current.contains(&ip) {
            return Ok(false);
        }
        current.push(ip);
        self.set_default_servers(&current);
        Ok(true)
    }

    /// Adds the recommended servers matching `query` (a provider name or
    /// address). Returns how many were new.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::NotFound`] if nothing in
    /// [`RECOMMENDED_SERVERS`] matches.
    pub fn add_recommended_servers(&mut self, query: &str) -> Result<usize> {
        let picked = recommended_servers(query);
        if picked.is_empty() {
            return Err(ManagerError::NotFound(format!("recommended server {query:?}")));
        }
        let mut current = self.default_servers();
        let before = current.len();
        for ip in picked {
            if !current.contains(&ip) {
                current.push(ip);
            }
        }
        let added = current.len() - before;
        if added > 0 {
            self.set_default_servers(&current);
        }
        Ok(added)
    }

    /// Removes the default server at `index` (zero-based).
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::NotFound`] if `index` is out of range.
    pub fn remove_default_server(&mut self, index: usize) -> Result<Ipv4Addr> {
        let mut current = self.default_servers();
        if index >= current.len() {
            return Err(ManagerError::NotFound(format!("default server #{index}")));
        }
        let removed = current.remove(index);
        self.set_default_servers(&current);
        Ok(removed)
    }

    /// Appends any missing [`BASE_DIRECTIVES`] after a blank line.
    ///
    /// Appended lines take precedence since SmartDNS applies the last
    /// occurrence. Returns the number of directives added.
    pub fn ensure_base_directives(&mut self) -> usize {
        let have: HashSet<&str> = self.lines().iter().map(|l| l.trim()).collect();
        let missing: Vec<String> = BASE_DIRECTIVES
            .iter()
            .filter(|d| !have.contains(**d))
            .map(|d| (*d).to_string())
            .collect();
        if missing.is_empty() {
            return 0;
        }
        let added = missing.len();
        let lines = self.lines_mut();
        lines.push(String::new());
        lines.extend(missing);
        tracing::info!(added, "Added base SmartDNS directives");
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lines::split_lines;

    fn file(text: &str) -> ResolverFile {
        ResolverFile::from_lines("/tmp/unused.conf", split_lines(text))
    }

    const CONF: &str = "bind [::]:53\n\
                        server 8.8.8.8\n\
                        server 1.1.1.1 IP -group us -exclude-default-group\n\
                        server 9.9.9.9 IP -group hk -exclude-default-group\n\
                        server 1.0.0.1 IP -group us\n\
                        server 8.8.4.4\n\
                        #> Netflix us\n\
                        nameserver /netflix.com/us\n\
                        \n";

    #[test]
    fn parses_server_lines() {
        assert_eq!(
            parse_server_line("server 8.8.8.8"),
            Some(ServerLine::Default(Ipv4Addr::new(8, 8, 8, 8)))
        );
        assert_eq!(
            parse_server_line("server 1.1.1.1 IP -group us -exclude-default-group"),
            Some(ServerLine::Group {
                ip: Ipv4Addr::new(1, 1, 1, 1),
                name: "us"
            })
        );
        assert_eq!(parse_server_line("server dns.example"), None);
        assert_eq!(parse_server_line("server 8.8.8.8 -group us"), None);
        assert_eq!(parse_server_line("server-tcp 8.8.8.8"), None);
    }

    #[test]
    fn lists_groups_sorted_and_unique() {
        let groups = file(CONF).upstream_groups();
        assert_eq!(
            groups,
            vec![
                UpstreamGroup {
                    name: "hk".into(),
                    ip: Ipv4Addr::new(9, 9, 9, 9)
                },
                UpstreamGroup {
                    name: "us".into(),
                    ip: Ipv4Addr::new(1, 1, 1, 1)
                },
            ]
        );
    }

    #[test]
    fn add_group_after_last_server_line() {
        let mut f = file(CONF);
        f.add_upstream_group("5.6.7.8", "jp").unwrap();
        assert_eq!(f.lines()[6], "server 5.6.7.8 IP -group jp -exclude-default-group");
        assert_eq!(f.lines()[7], "#> Netflix us");
    }

    #[test]
    fn add_group_without_server_lines_goes_first() {
        let mut f = file("bind [::]:53\n");
        f.add_upstream_group("5.6.7.8", "jp").unwrap();
        assert_eq!(f.lines()[0], "server 5.6.7.8 IP -group jp -exclude-default-group");
    }

    #[test]
    fn add_group_validates() {
        let mut f = file("");
        assert!(matches!(
            f.add_upstream_group("not-an-ip", "jp"),
            Err(ManagerError::InvalidAddress(_))
        ));
        assert!(matches!(
            f.add_upstream_group("5.6.7.8", " "),
            Err(ManagerError::EmptyIdentifier)
        ));
        assert!(f.lines().is_empty());
    }

    #[test]
    fn remove_group_ignores_case() {
        let mut f = file(CONF);
        f.remove_upstream_group("US").unwrap();
        let names: Vec<_> = f.upstream_groups().into_iter().map(|g| g.name).collect();
        assert_eq!(names, vec!["hk"]);
        assert!(f.has_block("Netflix"));
        assert!(matches!(
            f.remove_upstream_group("us"),
            Err(ManagerError::NotFound(_))
        ));
    }

    #[test]
    fn default_servers_round_trip() {
        let mut f = file(CONF);
        assert_eq!(
            f.default_servers(),
            vec![Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(8, 8, 4, 4)]
        );
        assert!(f.add_default_server("1.1.1.1").unwrap());
        assert!(!f.add_default_server("8.8.8.8").unwrap());
        assert_eq!(f.lines()[0], "server 8.8.8.8");
        assert_eq!(f.lines()[1], "server 8.8.4.4");
        assert_eq!(f.lines()[2], "server 1.1.1.1");
        assert_eq!(f.lines()[3], "bind [::]:53");

        assert_eq!(f.remove_default_server(1).unwrap(), Ipv4Addr::new(8, 8, 4, 4));
        assert_eq!(
            f.default_servers(),
            vec![Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(1, 1, 1, 1)]
        );
        assert!(matches!(
            f.remove_default_server(5),
            Err(ManagerError::NotFound(_))
        ));
        assert_eq!(f.upstream_groups().len(), 2);
    }

    #[test]
    fn recommended_servers_by_provider() {
        assert_eq!(
            recommended_servers("cloudflare"),
            vec![Ipv4Addr::new(1, 1, 1, 1), Ipv4Addr::new(1, 0, 0, 1)]
        );
        assert_eq!(recommended_servers("9.9.9.9"), vec![Ipv4Addr::new(9, 9, 9, 9)]);
        assert!(recommended_servers("nobody").is_empty());

        let mut f = file("server 8.8.8.8\n");
        assert_eq!(f.add_recommended_servers("Google").unwrap(), 1);
        assert_eq!(
            f.default_servers(),
            vec![Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(8, 8, 4, 4)]
        );
        assert_eq!(f.add_recommended_servers("google").unwrap(), 0);
        assert!(matches!(
            f.add_recommended_servers("nobody"),
            Err(ManagerError::NotFound(_))
        ));
    }

    #[test]
    fn base_directives_only_added_once() {
        let mut f = file("bind [::]:53\ncache-size 32768\n");
        assert_eq!(f.ensure_base_directives(), BASE_DIRECTIVES.len() - 1);
        assert_eq!(f.lines()[2], "");
        assert_eq!(f.ensure_base_directives(), 0);
    }

    #[test]
    fn default_config_has_every_directive() {
        let mut f = file(crate::resolver_file::DEFAULT_RESOLVER_CONFIG);
        assert_eq!(f.ensure_base_directives(), 0);
        assert_eq!(f.default_servers().len(), 2);
    }
}
