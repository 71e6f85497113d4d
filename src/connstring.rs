//! Connection settings for the storage backend, parsed from a `mongodb://` URI.
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::Error::ArgumentError;
use crate::Result;

pub const DEFAULT_PORT: u16 = 27017;
pub const URI_SCHEME: &str = "mongodb://";

/// Bound applied to every bulk request when the URI does not set `socketTimeoutMS`.
pub const DEFAULT_SOCKET_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Encapsulates the hostname and port of a host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Host {
    pub host_name: String,
    pub ipc: String,
    pub port: u16,
}

impl Host {
    pub fn new(host_name: String, port: u16) -> Host {
        Host {
            host_name,
            port,
            ipc: String::new(),
        }
    }

    fn with_ipc(ipc: String) -> Host {
        Host {
            host_name: String::new(),
            port: DEFAULT_PORT,
            ipc,
        }
    }

    pub fn has_ipc(&self) -> bool {
        !self.ipc.is_empty()
    }
}

/// Everything a [`Connector`](crate::backend::Connector) needs to open a
/// backend. The aggregator treats it as opaque apart from the timeouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub hosts: Vec<Host>,
    pub string: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub options: BTreeMap<String, String>,
    pub read_pref_tags: Vec<String>,
    /// Upper bound on a single bulk request.
    pub socket_timeout: Duration,
    /// Upper bound on opening the backend connection.
    pub connect_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> ConnectionSettings {
        ConnectionSettings::new("localhost", DEFAULT_PORT)
    }
}

impl ConnectionSettings {
    /// Creates settings for a single, unreplicated host.
    pub fn new(host_name: &str, port: u16) -> ConnectionSettings {
        ConnectionSettings {
            hosts: vec![Host::new(host_name.to_ascii_lowercase(), port)],
            string: None,
            user: None,
            password: None,
            database: None,
            options: BTreeMap::new(),
            read_pref_tags: Vec::new(),
            socket_timeout: Duration::from_millis(DEFAULT_SOCKET_TIMEOUT_MS),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
        }
    }

    pub fn with_socket_timeout(mut self, timeout: Duration) -> ConnectionSettings {
        self.socket_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> ConnectionSettings {
        self.connect_timeout = timeout;
        self
    }

    /// Retrieves an option by its case-insensitive name.
    pub fn option(&self, key: &str) -> Option<&String> {
        self.options
            .iter()
            .find(|&(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }
}

/// Parses a MongoDB connection string URI as defined by
/// [the manual](http://docs.mongodb.org/manual/reference/connection-string/).
pub fn parse(address: &str) -> Result<ConnectionSettings> {
    if !address.starts_with(URI_SCHEME) {
        return Err(ArgumentError(
            "MongoDB connection string must start with 'mongodb://'.".to_owned(),
        ));
    }

    let addr = &address[URI_SCHEME.len()..];

    let (host_str, path_str) = if addr.contains(".sock") {
        let (host_part, path_part) = rsplit(addr, ".sock");
        (host_part, path_part.trim_start_matches('/'))
    } else {
        partition(addr, "/")
    };

    if path_str.is_empty() && host_str.contains('?') {
        return Err(ArgumentError(
            "A '/' is required between the host list and any options.".to_owned(),
        ));
    }

    let mut settings = ConnectionSettings::default();
    settings.string = Some(address.to_owned());

    let hosts = if host_str.contains('@') {
        let (user_info, host_string) = rpartition(host_str, "@");
        let (user, password) = parse_user_info(user_info)?;
        settings.user = Some(user.to_owned());
        settings.password = Some(password.to_owned());
        split_hosts(host_string)?
    } else {
        split_hosts(host_str)?
    };
    settings.hosts = hosts;

    let opts = if path_str.starts_with('?') {
        &path_str[1..]
    } else {
        let (database, opts) = partition(path_str, "?");
        if !database.is_empty() {
            settings.database = Some(database.to_owned());
        }
        opts
    };

    if !opts.is_empty() {
        let (options, tags) = split_options(opts)?;
        settings.options = options;
        settings.read_pref_tags = tags;
    }

    if let Some(ms) = settings.option("socketTimeoutMS") {
        settings.socket_timeout = parse_timeout("socketTimeoutMS", ms)?;
    }

    if let Some(ms) = settings.option("connectTimeoutMS") {
        settings.connect_timeout = parse_timeout("connectTimeoutMS", ms)?;
    }

    Ok(settings)
}

// Timeouts must be positive; an unbounded bulk request could stall the flush thread.
fn parse_timeout(name: &str, value: &str) -> Result<Duration> {
    match value.parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(Duration::from_millis(ms)),
        _ => Err(ArgumentError(format!(
            "{} must be a positive integer, got '{}'.",
            name, value
        ))),
    }
}

// Parse user information of the form user:password
fn parse_user_info(user_info: &str) -> Result<(&str, &str)> {
    let (user, password) = rpartition(user_info, ":");
    if user_info.contains('@') || user.contains(':') {
        return Err(ArgumentError(
            "':' or '@' characters in a username or password must be escaped according to RFC 2396."
                .to_owned(),
        ));
    }
    if user.is_empty() {
        return Err(ArgumentError("The empty string is not a valid username.".to_owned()));
    }
    Ok((user, password))
}

// Parses a literal IPv6 host entity of the form [host] or [host]:port
fn parse_ipv6_literal_host(entity: &str) -> Result<Host> {
    let close = match entity.find(']') {
        Some(idx) => idx,
        None => {
            return Err(ArgumentError(
                "An IPv6 address must be enclosed in '[' and ']' according to RFC 2732.".to_owned(),
            ))
        }
    };

    let name = entity[1..close].to_ascii_lowercase();
    match &entity[close + 1..] {
        "" => Ok(Host::new(name, DEFAULT_PORT)),
        rest if rest.starts_with(':') => rest[1..]
            .parse::<u16>()
            .map(|port| Host::new(name, port))
            .map_err(|_| ArgumentError("Port must be an integer.".to_owned())),
        _ => Err(ArgumentError(format!("Invalid IPv6 host entity '{}'.", entity))),
    }
}

/// Parses a host entity of the form host or host:port, and redirects IPv6 entities.
/// All host names are lowercased.
pub fn parse_host(entity: &str) -> Result<Host> {
    if entity.starts_with('[') {
        parse_ipv6_literal_host(entity)
    } else if entity.contains(':') {
        let (host, port) = partition(entity, ":");
        if port.contains(':') {
            return Err(ArgumentError(
                "Reserved characters such as ':' must be escaped according to RFC 2396. \
                 An IPv6 address literal must be enclosed in '[' and ']' according to RFC 2732."
                    .to_owned(),
            ));
        }
        port.parse::<u16>()
            .map(|port| Host::new(host.to_ascii_lowercase(), port))
            .map_err(|_| ArgumentError("Port must be an unsigned integer.".to_owned()))
    } else if entity.contains(".sock") {
        Ok(Host::with_ipc(entity.to_ascii_lowercase()))
    } else {
        Ok(Host::new(entity.to_ascii_lowercase(), DEFAULT_PORT))
    }
}

// Splits and parses comma-separated hosts.
fn split_hosts(host_str: &str) -> Result<Vec<Host>> {
    host_str
        .split(',')
        .map(|entity| {
            if entity.is_empty() {
                Err(ArgumentError("Empty host, or extra comma in host list.".to_owned()))
            } else {
                parse_host(entity)
            }
        })
        .collect()
}

// Splits the option string into its key/value map and read preference tags.
fn split_options(opts: &str) -> Result<(BTreeMap<String, String>, Vec<String>)> {
    let delim = match (opts.find('&'), opts.find(';')) {
        (Some(_), Some(_)) => {
            return Err(ArgumentError(
                "Cannot mix '&' and ';' for option separators.".to_owned(),
            ))
        }
        (Some(_), None) => '&',
        (None, Some(_)) => ';',
        (None, None) => '&',
    };

    let mut options = BTreeMap::new();
    let mut read_pref_tags = Vec::new();

    for opt in opts.split(delim).filter(|opt| !opt.is_empty()) {
        if !opt.contains('=') {
            return Err(ArgumentError(
                "InvalidURI: MongoDB URI options are key=value pairs.".to_owned(),
            ));
        }

        let (key, val) = partition(opt, "=");
        if key.eq_ignore_ascii_case("readpreferencetags") {
            read_pref_tags.push(val.to_owned());
        } else {
            options.insert(key.to_owned(), val.to_owned());
        }
    }

    Ok((options, read_pref_tags))
}

// Partitions a string around the left-most occurrence of the separator, if it exists.
fn partition<'a>(string: &'a str, sep: &str) -> (&'a str, &'a str) {
    match string.find(sep) {
        Some(idx) => (&string[..idx], &string[idx + sep.len()..]),
        None => (string, ""),
    }
}

// Partitions a string around the right-most occurrence of the separator, if it exists.
fn rpartition<'a>(string: &'a str, sep: &str) -> (&'a str, &'a str) {
    match string.rfind(sep) {
        Some(idx) => (&string[..idx], &string[idx + sep.len()..]),
        None => (string, ""),
    }
}

// Splits a string after the right-most occurrence of the separator, if it exists.
fn rsplit<'a>(string: &'a str, sep: &str) -> (&'a str, &'a str) {
    match string.rfind(sep) {
        Some(idx) => (&string[..idx + sep.len()], &string[idx + sep.len()..]),
        None => (string, ""),
    }
}
