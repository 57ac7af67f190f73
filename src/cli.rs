use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file (default: puppetca.toml)
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Bootstrap the CA and master certificates if they do not exist yet
    Init,

    /// Submit a certificate signing request from a PEM file
    Submit {
        /// Certname the request is for
        subject: String,

        /// Path to the PEM-encoded CSR
        csr: PathBuf,
    },

    /// Print the signed certificate for a certname ("ca" for the CA cert)
    Fetch {
        /// Certname to look up
        subject: String,
    },

    /// Print the certificate revocation list
    Crl,
}
