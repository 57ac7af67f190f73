use anyhow::Context;
use clap::Parser;
use puppetca::cli::{Args, Command};
use puppetca::{api, bootstrap, config};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let settings = config::Settings::new(args.config.clone())?;
    settings.validate()?;

    match args.command {
        Command::Init => {
            bootstrap::initialize(
                &settings.ca,
                &settings.master,
                &settings.certname,
                settings.keylength,
            )
            .await?;
            info!("CA ready; serving certificates as \"{}\"", settings.ca.ca_name);
        }
        Command::Submit { subject, csr } => {
            let file = tokio::fs::File::open(&csr)
                .await
                .with_context(|| format!("Failed to open CSR file {}", csr.display()))?;
            api::process_csr_submission(&subject, file, &settings.ca).await?;
        }
        Command::Fetch { subject } => {
            let pem = api::get_certificate(&subject, &settings.ca.cacert, &settings.ca.signeddir)
                .await?
                .with_context(|| format!("No certificate found for {subject}"))?;
            print!("{pem}");
        }
        Command::Crl => {
            let pem = api::get_certificate_revocation_list(&settings.ca.cacrl).await?;
            print!("{pem}");
        }
    }

    Ok(())
}
