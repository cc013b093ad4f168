//! # Seed Host Resolution
//!
//! Turns the caller's host specification into the ordered seed list used by
//! the first connect. Evaluated once, at client construction:
//!
//! 1. an explicit `HostSpec` when one was given;
//! 2. otherwise the comma-separated `SKV_HOSTS` environment variable;
//! 3. otherwise `127.0.0.1:3000`.
//!
//! Order is preserved and duplicates are kept.

use serde::{Deserialize, Deserializer};

use skv_common::{ArgumentError, Host, DEFAULT_PORT};

/// Environment variable consulted when no explicit hosts are given.
pub const HOSTS_ENV: &str = "SKV_HOSTS";

/// Host used when neither an explicit spec nor the environment names one.
pub const FALLBACK_HOST: &str = "127.0.0.1";

/// Explicit seed host specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostSpec {
    Host(Host),
    Hosts(Vec<Host>),
    /// `"host[:port]"` or `"host[:port],host[:port],..."`.
    Str(String),
}

impl From<Host> for HostSpec {
    fn from(host: Host) -> Self {
        HostSpec::Host(host)
    }
}

impl From<Vec<Host>> for HostSpec {
    fn from(hosts: Vec<Host>) -> Self {
        HostSpec::Hosts(hosts)
    }
}

impl From<&str> for HostSpec {
    fn from(s: &str) -> Self {
        HostSpec::Str(s.to_string())
    }
}

impl From<String> for HostSpec {
    fn from(s: String) -> Self {
        HostSpec::Str(s)
    }
}

// Config files carry hosts as one string or a list of strings.
impl<'de> Deserialize<'de> for HostSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(String),
            Many(Vec<String>),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::One(s) => HostSpec::Str(s),
            Raw::Many(list) => HostSpec::Str(list.join(",")),
        })
    }
}

/// Resolves seeds from `spec`, then `env`, then the fallback.
///
/// `env` is the raw value of `SKV_HOSTS`; a blank value counts as unset.
pub fn resolve_hosts(spec: Option<&HostSpec>, env: Option<&str>) -> Result<Vec<Host>, ArgumentError> {
    match spec {
        Some(HostSpec::Host(host)) => Ok(vec![host.clone()]),
        Some(HostSpec::Hosts(hosts)) if hosts.is_empty() => {
            Err(ArgumentError::InvalidHost("empty host list".into()))
        }
        Some(HostSpec::Hosts(hosts)) => Ok(hosts.clone()),
        Some(HostSpec::Str(s)) => parse_host_list(s),
        None => match env.map(str::trim).filter(|s| !s.is_empty()) {
            Some(list) => parse_host_list(list),
            None => Ok(vec![Host::new(FALLBACK_HOST, DEFAULT_PORT)]),
        },
    }
}

/// Same as `resolve_hosts`, reading `SKV_HOSTS` from the process environment.
pub fn resolve_hosts_from_env(spec: Option<&HostSpec>) -> Result<Vec<Host>, ArgumentError> {
    let env = std::env::var(HOSTS_ENV).ok();
    resolve_hosts(spec, env.as_deref())
}

fn parse_host_list(list: &str) -> Result<Vec<Host>, ArgumentError> {
    list.split(',')
        .map(|entry| Host::parse(entry, DEFAULT_PORT))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_spec_beats_environment() {
        let spec = HostSpec::from("db1:4000");
        let hosts = resolve_hosts(Some(&spec), Some("env1,env2")).unwrap();
        assert_eq!(hosts, vec![Host::new("db1", 4000)]);
    }

    #[test]
    fn comma_list_keeps_order_and_duplicates() {
        let spec = HostSpec::from("b:1, a ,b:1,[::1]:7");
        let hosts = resolve_hosts(Some(&spec), None).unwrap();
        assert_eq!(
            hosts,
            vec![
                Host::new("b", 1),
                Host::new("a", DEFAULT_PORT),
                Host::new("b", 1),
                Host::new("::1", 7),
            ]
        );
    }

    #[test]
    fn host_objects_pass_through() {
        let one = HostSpec::from(Host::new("x", 9));
        assert_eq!(resolve_hosts(Some(&one), None).unwrap(), vec![Host::new("x", 9)]);

        let many = HostSpec::from(vec![Host::new("x", 9), Host::new("y", 10)]);
        assert_eq!(resolve_hosts(Some(&many), None).unwrap().len(), 2);

        assert!(resolve_hosts(Some(&HostSpec::Hosts(vec![])), None).is_err());
    }

    #[test]
    fn environment_then_fallback() {
        let hosts = resolve_hosts(None, Some("e1:5000,e2")).unwrap();
        assert_eq!(hosts, vec![Host::new("e1", 5000), Host::new("e2", DEFAULT_PORT)]);

        let hosts = resolve_hosts(None, Some("  ")).unwrap();
        assert_eq!(hosts, vec![Host::new(FALLBACK_HOST, DEFAULT_PORT)]);

        let hosts = resolve_hosts(None, None).unwrap();
        assert_eq!(hosts, vec![Host::new("127.0.0.1", 3000)]);
    }

    #[test]
    fn malformed_entries_are_rejected() {
        for bad in ["", "a,,b", "a:x", "a:70000", "[::1"] {
            let spec = HostSpec::from(bad);
            assert!(
                matches!(resolve_hosts(Some(&spec), None), Err(ArgumentError::InvalidHost(_))),
                "`{bad}` should be rejected"
            );
        }
    }

    #[test]
    fn deserializes_string_or_list() {
        let spec: HostSpec = serde_json::from_str(r#""a:1,b""#).unwrap();
        assert_eq!(spec, HostSpec::Str("a:1,b".into()));
        let spec: HostSpec = serde_json::from_str(r#"["a:1", "b"]"#).unwrap();
        assert_eq!(resolve_hosts(Some(&spec), None).unwrap().len(), 2);
    }
}
