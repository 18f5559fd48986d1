//! Command-line switches recognized by the HTTP module.
//!
//! Parsed from whatever argument vector the embedder passes along. Switch
//! names are matched case-insensitively, with or without a leading dash.

use crate::config::HttpConfig;

/// Parsed command-line switches.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Switches {
    /// `-httpproxy=<host:port>`: proxy override.
    pub http_proxy: Option<String>,
    /// `-EnableHttpDomainRestrictions`: force the allow-list on in
    /// development builds.
    pub enable_domain_restrictions: bool,
    /// `-DisableHttpDomainRestrictions`: skip the allow-list in
    /// development builds.
    pub disable_domain_restrictions: bool,
    /// `-NoTimeouts`: disable inactivity timeouts in development.
    pub no_timeouts: bool,
    /// `-noreuseconn`: do not reuse connections between requests.
    pub no_reuse_connections: bool,
    /// `-MULTIHOMEHTTP=<ip>`: bind outgoing connections to an address.
    pub multihome_addr: Option<String>,
}

fn flag_matches(arg: &str, name: &str) -> bool {
    let arg = arg.trim_start_matches('-');
    arg.eq_ignore_ascii_case(name)
}

fn value_of<'a>(arg: &'a str, name: &str) -> Option<&'a str> {
    let arg = arg.trim_start_matches('-');
    let (key, value) = arg.split_once('=')?;
    key.eq_ignore_ascii_case(name).then_some(value)
}

impl Switches {
    /// Parse switches out of `args`, ignoring anything unrecognized.
    pub fn parse<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut switches = Switches::default();
        for arg in args {
            let arg = arg.as_ref();
            if let Some(value) = value_of(arg, "httpproxy") {
                switches.http_proxy = Some(value.to_owned());
            } else if let Some(value) = value_of(arg, "MULTIHOMEHTTP") {
                switches.multihome_addr = Some(value.to_owned());
            } else if flag_matches(arg, "EnableHttpDomainRestrictions") {
                switches.enable_domain_restrictions = true;
            } else if flag_matches(arg, "DisableHttpDomainRestrictions") {
                switches.disable_domain_restrictions = true;
            } else if flag_matches(arg, "NoTimeouts") {
                switches.no_timeouts = true;
            } else if flag_matches(arg, "noreuseconn") {
                switches.no_reuse_connections = true;
            }
        }
        switches
    }

    /// Fold the switches into `config`. The proxy switch wins over the
    /// configured address; the disable switch wins over the enable one.
    pub fn apply(&self, config: &mut HttpConfig) {
        if let Some(proxy) = &self.http_proxy {
            config.proxy_address = Some(proxy.clone());
        }
        if self.enable_domain_restrictions {
            config.enforce_domain_restrictions = Some(true);
        }
        if self.disable_domain_restrictions {
            config.enforce_domain_restrictions = Some(false);
        }
        if self.no_timeouts {
            config.no_timeouts = true;
        }
        if self.no_reuse_connections {
            config.reuse_connections = false;
        }
        if let Some(addr) = &self.multihome_addr {
            config.local_host_addr = Some(addr.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_values_and_flags() {
        let args = [
            "-httpproxy=proxy.example:8080",
            "-NoTimeouts",
            "-noreuseconn",
            "-MULTIHOMEHTTP=10.0.0.2",
            "unrelated",
        ];
        let switches = Switches::parse(args);
        assert_eq!(switches.http_proxy.as_deref(), Some("proxy.example:8080"));
        assert!(switches.no_timeouts);
        assert!(switches.no_reuse_connections);
        assert_eq!(switches.multihome_addr.as_deref(), Some("10.0.0.2"));
        assert!(!switches.enable_domain_restrictions);
    }

    #[test]
    fn parse_is_case_insensitive() {
        let switches = Switches::parse(["-notimeouts", "-ENABLEHTTPDOMAINRESTRICTIONS"]);
        assert!(switches.no_timeouts);
        assert!(switches.enable_domain_restrictions);
    }

    #[test]
    fn apply_overrides_config() {
        let mut config = HttpConfig {
            proxy_address: Some("old:1".into()),
            ..HttpConfig::default()
        };
        let switches = Switches::parse(["-httpproxy=new:2", "-DisableHttpDomainRestrictions"]);
        switches.apply(&mut config);
        assert_eq!(config.proxy_address.as_deref(), Some("new:2"));
        assert_eq!(config.enforce_domain_restrictions, Some(false));
    }

    #[test]
    fn disable_wins_over_enable() {
        let mut config = HttpConfig::default();
        Switches::parse(["-EnableHttpDomainRestrictions", "-DisableHttpDomainRestrictions"])
            .apply(&mut config);
        assert_eq!(config.enforce_domain_restrictions, Some(false));
    }
}
