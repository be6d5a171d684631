use crate::error::{Error, Result};
use crate::types::{
    mask_prefix, IfaceConf, PrefixConf, RaOptions, RadConf, DEFAULT_CUR_HOP_LIMIT,
    DEFAULT_PREFERRED_LIFETIME, DEFAULT_ROUTER_LIFETIME, DEFAULT_VALID_LIFETIME, IF_NAMESIZE,
};
use ipnet::Ipv6Net;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub ra: RaConfig,
    #[serde(default)]
    pub interfaces: Vec<InterfaceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Global RA options, used by every interface that does not override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaConfig {
    #[serde(default = "default_cur_hop_limit")]
    pub cur_hop_limit: u8,
    #[serde(default)]
    pub managed: bool,
    #[serde(default)]
    pub other: bool,
    #[serde(default = "default_true")]
    pub default_router: bool,
    #[serde(default = "default_router_lifetime")]
    pub router_lifetime: u16,
    #[serde(default)]
    pub reachable_time: u32,
    #[serde(default)]
    pub retrans_timer: u32,
}

impl Default for RaConfig {
    fn default() -> Self {
        Self {
            cur_hop_limit: default_cur_hop_limit(),
            managed: false,
            other: false,
            default_router: true,
            router_lifetime: default_router_lifetime(),
            reachable_time: 0,
            retrans_timer: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceConfig {
    pub name: String,
    #[serde(default)]
    pub cur_hop_limit: Option<u8>,
    #[serde(default)]
    pub managed: Option<bool>,
    #[serde(default)]
    pub other: Option<bool>,
    #[serde(default)]
    pub default_router: Option<bool>,
    #[serde(default)]
    pub router_lifetime: Option<u16>,
    #[serde(default)]
    pub reachable_time: Option<u32>,
    #[serde(default)]
    pub retrans_timer: Option<u32>,
    /// Present means: advertise the prefixes of the interface's own addresses.
    #[serde(default)]
    pub auto_prefix: Option<AutoPrefixConfig>,
    #[serde(default)]
    pub prefixes: Vec<PrefixConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoPrefixConfig {
    #[serde(default = "default_valid_lifetime")]
    pub valid_lifetime: u32,
    #[serde(default = "default_preferred_lifetime")]
    pub preferred_lifetime: u32,
    #[serde(default = "default_true")]
    pub on_link: bool,
    #[serde(default = "default_true")]
    pub autonomous: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefixConfig {
    pub prefix: Ipv6Net,
    #[serde(default = "default_valid_lifetime")]
    pub valid_lifetime: u32,
    #[serde(default = "default_preferred_lifetime")]
    pub preferred_lifetime: u32,
    #[serde(default = "default_true")]
    pub on_link: bool,
    #[serde(default = "default_true")]
    pub autonomous: bool,
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}
fn default_cur_hop_limit() -> u8 {
    DEFAULT_CUR_HOP_LIMIT
}
fn default_router_lifetime() -> u16 {
    DEFAULT_ROUTER_LIFETIME
}
fn default_valid_lifetime() -> u32 {
    DEFAULT_VALID_LIFETIME
}
fn default_preferred_lifetime() -> u32 {
    DEFAULT_PREFERRED_LIFETIME
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config: {e}")))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| Error::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (i, iface) in self.interfaces.iter().enumerate() {
            if iface.name.is_empty() || iface.name.len() >= IF_NAMESIZE {
                return Err(Error::Config(format!(
                    "interface {i}: name {:?} must be 1 to {} bytes",
                    iface.name,
                    IF_NAMESIZE - 1
                )));
            }
            if self.interfaces[..i].iter().any(|o| o.name == iface.name) {
                return Err(Error::Config(format!(
                    "interface {} configured twice",
                    iface.name
                )));
            }
            if let Some(ref auto) = iface.auto_prefix {
                check_lifetimes(
                    &iface.name,
                    "auto prefix",
                    auto.valid_lifetime,
                    auto.preferred_lifetime,
                )?;
            }
            for p in &iface.prefixes {
                check_lifetimes(
                    &iface.name,
                    &p.prefix.to_string(),
                    p.valid_lifetime,
                    p.preferred_lifetime,
                )?;
            }
        }
        Ok(())
    }

    pub fn global_options(&self) -> RaOptions {
        RaOptions {
            cur_hop_limit: self.ra.cur_hop_limit,
            managed: self.ra.managed,
            other: self.ra.other,
            default_router: self.ra.default_router,
            router_lifetime: self.ra.router_lifetime,
            reachable_time: self.ra.reachable_time,
            retrans_timer: self.ra.retrans_timer,
        }
    }

    /// Resolve per-interface overrides into the front-end's view of the configuration.
    pub fn to_rad_conf(&self) -> RadConf {
        let global = self.global_options();
        let interfaces = self
            .interfaces
            .iter()
            .map(|iface| IfaceConf {
                name: iface.name.clone(),
                options: iface.effective_options(&global),
                autoprefix: iface.auto_prefix.as_ref().map(|a| PrefixConf {
                    on_link: a.on_link,
                    autonomous: a.autonomous,
                    ..PrefixConf::rule(a.valid_lifetime, a.preferred_lifetime)
                }),
                prefixes: iface
                    .prefixes
                    .iter()
                    .map(|p| PrefixConf {
                        prefix: mask_prefix(p.prefix.addr(), p.prefix.prefix_len()),
                        prefix_len: p.prefix.prefix_len(),
                        valid_lifetime: p.valid_lifetime,
                        preferred_lifetime: p.preferred_lifetime,
                        on_link: p.on_link,
                        autonomous: p.autonomous,
                    })
                    .collect(),
            })
            .collect();

        RadConf {
            options: global,
            interfaces,
        }
    }
}

impl InterfaceConfig {
    pub fn effective_options(&self, global: &RaOptions) -> RaOptions {
        RaOptions {
            cur_hop_limit: self.cur_hop_limit.unwrap_or(global.cur_hop_limit),
            managed: self.managed.unwrap_or(global.managed),
            other: self.other.unwrap_or(global.other),
            default_router: self.default_router.unwrap_or(global.default_router),
            router_lifetime: self.router_lifetime.unwrap_or(global.router_lifetime),
            reachable_time: self.reachable_time.unwrap_or(global.reachable_time),
            retrans_timer: self.retrans_timer.unwrap_or(global.retrans_timer),
        }
    }
}

fn check_lifetimes(iface: &str, what: &str, valid: u32, preferred: u32) -> Result<()> {
    if preferred > valid {
        return Err(Error::Config(format!(
            "{iface}: {what}: preferred lifetime {preferred} exceeds valid lifetime {valid}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::Ipv6Addr;

    #[test]
    fn test_parse_minimal_config() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "text");
        assert!(config.interfaces.is_empty());
        assert_eq!(config.global_options(), RaOptions::default());
    }

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[logging]
level = "debug"
format = "json"

[ra]
cur_hop_limit = 32
managed = true
router_lifetime = 600

[[interfaces]]
name = "net0"
other = true
default_router = false

[interfaces.auto_prefix]
valid_lifetime = 7200
preferred_lifetime = 3600

[[interfaces.prefixes]]
prefix = "2001:db8::1/64"
valid_lifetime = 86400
preferred_lifetime = 14400

[[interfaces.prefixes]]
prefix = "2001:db8:2::/48"
on_link = false

[[interfaces]]
name = "net1"
"#;
        let config = Config::parse(toml_str).unwrap();
        let conf = config.to_rad_conf();
        assert_eq!(conf.interfaces.len(), 2);

        let net0 = conf.find_iface("net0").unwrap();
        assert_eq!(net0.options.cur_hop_limit, 32);
        assert!(net0.options.managed);
        assert!(net0.options.other);
        assert!(!net0.options.default_router);
        assert_eq!(net0.options.router_lifetime, 600);

        let auto = net0.autoprefix.unwrap();
        assert_eq!(auto.valid_lifetime, 7200);
        assert_eq!(auto.preferred_lifetime, 3600);

        // Host bits are masked off
        assert_eq!(net0.prefixes[0].prefix, "2001:db8::".parse::<Ipv6Addr>().unwrap());
        assert_eq!(net0.prefixes[0].prefix_len, 64);
        assert_eq!(net0.prefixes[1].valid_lifetime, DEFAULT_VALID_LIFETIME);
        assert!(!net0.prefixes[1].on_link);
        assert!(net0.prefixes[1].autonomous);

        let net1 = conf.find_iface("net1").unwrap();
        assert!(net1.autoprefix.is_none());
        assert!(!net1.options.other);
        assert!(net1.options.default_router);
    }

    #[test]
    fn test_reject_long_interface_name() {
        let toml_str = r#"
[[interfaces]]
name = "averyveryverylongname"
"#;
        assert!(matches!(Config::parse(toml_str), Err(Error::Config(_))));
    }

    #[test]
    fn test_reject_duplicate_interface() {
        let toml_str = r#"
[[interfaces]]
name = "net0"

[[interfaces]]
name = "net0"
"#;
        assert!(Config::parse(toml_str).is_err());
    }

    #[test]
    fn test_reject_preferred_over_valid() {
        let toml_str = r#"
[[interfaces]]
name = "net0"

[[interfaces.prefixes]]
prefix = "2001:db8::/64"
valid_lifetime = 100
preferred_lifetime = 200
"#;
        assert!(Config::parse(toml_str).is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[[interfaces]]\nname = \"em0\"").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.interfaces[0].name, "em0");

        assert!(Config::from_file(Path::new("/nonexistent/rad.toml")).is_err());
    }
}
