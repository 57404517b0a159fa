//! Parses the client's positional `[user@]hostname[:port]` argument.

/// A parsed target: the bare hostname to resolve, the login string to hand
/// to `ssh` verbatim, and an optional mux-port override carried by `:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub hostname: String,
    pub login: String,
    pub mux_port: Option<u16>,
}

/// Parses `[user@]hostname[:port]`.
///
/// ```
/// use ssh_reverse_mux::host::parse_host;
///
/// let t = parse_host("deploy@example.com:9000");
/// assert_eq!(t.hostname, "example.com");
/// assert_eq!(t.login, "deploy@example.com");
/// assert_eq!(t.mux_port, Some(9000));
///
/// let t = parse_host("example.com");
/// assert_eq!(t.hostname, "example.com");
/// assert_eq!(t.login, "example.com");
/// assert_eq!(t.mux_port, None);
/// ```
pub fn parse_host(spec: &str) -> Target {
    let (user, rest) = match spec.split_once('@') {
        Some((user, rest)) => (Some(user), rest),
        None => (None, spec),
    };

    let (hostname, mux_port) = match rest.rsplit_once(':') {
        Some((hostname, port)) if !hostname.is_empty() => match port.parse::<u16>() {
            Ok(port) => (hostname, Some(port)),
            Err(_) => (rest, None),
        },
        _ => (rest, None),
    };

    let login = match user {
        Some(user) => format!("{user}@{hostname}"),
        None => hostname.to_string(),
    };

    Target {
        hostname: hostname.to_string(),
        login,
        mux_port,
    }
}
