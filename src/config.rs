use std::path::PathBuf;

use anyhow::Result;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// The autosign setting is either a decided boolean or a path to a whitelist
/// file or executable policy script. The decision tree lives in
/// [`crate::autosign`].
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Autosign {
    Decided(bool),
    Source(PathBuf),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Certname minted for the master host certificate during initialization.
    pub certname: String,
    /// RSA modulus size in bits for generated keypairs.
    pub keylength: u32,
    pub ca: CaSettings,
    pub master: MasterSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaSettings {
    pub autosign: Autosign,
    pub allow_duplicate_certs: bool,
    pub cacert: PathBuf,
    pub cakey: PathBuf,
    pub capub: PathBuf,
    pub cacrl: PathBuf,
    pub ca_name: String,
    /// Certificate lifetime in seconds.
    pub ca_ttl: u64,
    pub cert_inventory: PathBuf,
    pub csrdir: PathBuf,
    pub signeddir: PathBuf,
    pub serial: PathBuf,
    /// Entries prepended to RUBYLIB when invoking an autosign script.
    pub load_path: Vec<String>,
    /// Wall-clock bound on autosign script execution. `None` waits forever,
    /// matching the legacy CA.
    #[serde(default)]
    pub autosign_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MasterSettings {
    pub certdir: PathBuf,
    pub requestdir: PathBuf,
    pub hostcert: PathBuf,
    pub hostprivkey: PathBuf,
    pub hostpubkey: PathBuf,
    pub localcacert: PathBuf,
    /// Comma-separated DNS alt names for the master certificate; may be empty.
    pub dns_alt_names: String,
}

const DEFAULT_CERTNAME: &str = "puppet";
const DEFAULT_KEYLENGTH: u32 = 4096;
const DEFAULT_CA_TTL_SECS: u64 = 157_680_000; // 5 years
const DEFAULT_SSLDIR: &str = "ssl";

const MIN_KEYLENGTH: u32 = 2048;

impl Settings {
    /// Loads settings from defaults, an optional TOML file, and `PUPPETCA_*`
    /// environment variables, in that order of precedence.
    ///
    /// # Errors
    /// Returns error if configuration parsing fails (e.g. invalid format).
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut s = Config::builder();

        s = s
            .set_default("certname", DEFAULT_CERTNAME)?
            .set_default("keylength", DEFAULT_KEYLENGTH)?
            .set_default("ca.autosign", false)?
            .set_default("ca.allow_duplicate_certs", false)?
            .set_default("ca.cacert", ssl_default("ca/ca_crt.pem"))?
            .set_default("ca.cakey", ssl_default("ca/ca_key.pem"))?
            .set_default("ca.capub", ssl_default("ca/ca_pub.pem"))?
            .set_default("ca.cacrl", ssl_default("ca/ca_crl.pem"))?
            .set_default("ca.ca_name", "")?
            .set_default("ca.ca_ttl", DEFAULT_CA_TTL_SECS)?
            .set_default("ca.cert_inventory", ssl_default("ca/inventory.txt"))?
            .set_default("ca.csrdir", ssl_default("ca/requests"))?
            .set_default("ca.signeddir", ssl_default("ca/signed"))?
            .set_default("ca.serial", ssl_default("ca/serial"))?
            .set_default("ca.load_path", Vec::<String>::new())?
            .set_default("master.certdir", ssl_default("certs"))?
            .set_default("master.requestdir", ssl_default("certificate_requests"))?
            .set_default("master.dns_alt_names", "")?;

        let path = config_path.unwrap_or_else(|| PathBuf::from("puppetca.toml"));
        s = s.add_source(File::from(path).required(false));
        s = s.add_source(Environment::with_prefix("PUPPETCA").separator("__"));

        let partial: PartialSettings = s.build()?.try_deserialize()?;
        let mut settings = partial.resolve();
        if settings.ca.ca_name.is_empty() {
            settings.ca.ca_name = format!("Puppet CA: {}", settings.certname);
        }
        Ok(settings)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Errors
    /// Returns error if any setting is invalid or out of range.
    pub fn validate(&self) -> Result<()> {
        if self.certname.is_empty() {
            anyhow::bail!("certname must not be empty");
        }
        if self.keylength < MIN_KEYLENGTH {
            anyhow::bail!("keylength must be at least {MIN_KEYLENGTH} bits");
        }
        if self.ca.ca_ttl == 0 {
            anyhow::bail!("ca.ca_ttl must be greater than 0");
        }
        if let Some(0) = self.ca.autosign_timeout_secs {
            anyhow::bail!("ca.autosign_timeout_secs must be greater than 0 when set");
        }
        Ok(())
    }
}

/// Master file defaults depend on the resolved certname, so deserialization
/// goes through this intermediate and fills them in afterwards.
#[derive(Debug, Deserialize)]
struct PartialSettings {
    certname: String,
    keylength: u32,
    ca: CaSettings,
    master: PartialMasterSettings,
}

#[derive(Debug, Deserialize)]
struct PartialMasterSettings {
    certdir: PathBuf,
    requestdir: PathBuf,
    #[serde(default)]
    hostcert: Option<PathBuf>,
    #[serde(default)]
    hostprivkey: Option<PathBuf>,
    #[serde(default)]
    hostpubkey: Option<PathBuf>,
    #[serde(default)]
    localcacert: Option<PathBuf>,
    dns_alt_names: String,
}

impl PartialSettings {
    fn resolve(self) -> Settings {
        let pem = format!("{}.pem", self.certname);
        let master = MasterSettings {
            hostcert: self
                .master
                .hostcert
                .unwrap_or_else(|| self.master.certdir.join(&pem)),
            hostprivkey: self.master.hostprivkey.unwrap_or_else(|| {
                PathBuf::from(DEFAULT_SSLDIR).join("private_keys").join(&pem)
            }),
            hostpubkey: self.master.hostpubkey.unwrap_or_else(|| {
                PathBuf::from(DEFAULT_SSLDIR).join("public_keys").join(&pem)
            }),
            localcacert: self
                .master
                .localcacert
                .unwrap_or_else(|| self.master.certdir.join("ca.pem")),
            certdir: self.master.certdir,
            requestdir: self.master.requestdir,
            dns_alt_names: self.master.dns_alt_names,
        };
        Settings {
            certname: self.certname,
            keylength: self.keylength,
            ca: self.ca,
            master,
        }
    }
}

fn ssl_default(rest: &str) -> String {
    format!("{DEFAULT_SSLDIR}/{rest}")
}
