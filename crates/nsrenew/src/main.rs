use anyhow::Context;
use nr_acme::{
    AcmeConfig, InstantAcmeService, PortSpec, RenewalController, RenewalOutcome, VerificationStrategy,
};
use nr_common::config::EnvConfig;
use nr_dns::{DnsUpdateConfig, NsupdateCommand, PropagationChecker, PropagationConfig, TsigKey, UdpQuerier};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Map the environment settings onto the renewal config.
fn acme_config(env: &EnvConfig) -> anyhow::Result<AcmeConfig> {
    let contact = env.contact.clone().context("NSRENEW_CONTACT is not set")?;

    let mut config = AcmeConfig::new(env.domains.clone(), contact);
    config.directory_url = env.endpoint.clone();
    config.data_dir = env.data_dir.clone();
    config.challenge = env.method.parse()?;
    config.webroot = env.webroot.clone();
    config.keep = env.keep;
    config.force = env.force;
    config.renewal_threshold_days = env.renewal_days;
    config.txt_ttl = env.txt_ttl;
    config.publish_tlsa = env.tlsa;
    config.tlsa_ports = env
        .tlsa_ports
        .iter()
        .map(|spec| spec.parse::<PortSpec>())
        .collect::<Result<Vec<_>, _>>()?;
    config.tlsa_ttl = env.tlsa_ttl;
    config.update = DnsUpdateConfig {
        server: env.master.clone(),
        tsig: env.tsig.as_deref().map(str::parse::<TsigKey>).transpose()?,
        nsupdate_path: env.nsupdate.clone(),
    };
    config.propagation = PropagationConfig {
        resolver: env.resolver.clone(),
        ..PropagationConfig::default()
    };
    Ok(config)
}

async fn run(config: AcmeConfig) -> anyhow::Result<()> {
    let nsupdate = Arc::new(NsupdateCommand::new(config.update.nsupdate_path.clone()));
    let querier = UdpQuerier::new(config.propagation.query_timeout());
    let checker = PropagationChecker::new(querier, config.propagation.clone(), config.update.server.clone());
    let strategy = VerificationStrategy::from_config(&config, nsupdate.clone(), checker)?;
    let service = InstantAcmeService::new(config.directory_url.clone());

    let controller = RenewalController::new(config, service, strategy, nsupdate);
    match controller.run().await? {
        RenewalOutcome::Skipped { expires_at } => {
            info!(expires = %expires_at, "No renewal needed");
        }
        RenewalOutcome::Renewed {
            expires_at, rotation, ..
        } => {
            info!(expires = %expires_at, "Certificate renewed");
            if let Some(report) = rotation {
                for (domain, reason) in &report.failed {
                    warn!(domain = %domain, reason = %reason, "TLSA records not updated");
                }
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,nsrenew=debug,nr_acme=debug,nr_dns=debug")),
        )
        .init();

    // .env is applied before the runtime starts any threads
    let env_file = std::env::args().nth(1).map(PathBuf::from);
    let env = EnvConfig::load(env_file.as_deref());
    if let Err(e) = env.validate() {
        error!("{}", e);
        return ExitCode::FAILURE;
    }

    let config = match acme_config(&env) {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Renewal failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nr_acme::ChallengeKind;

    fn env() -> EnvConfig {
        EnvConfig {
            domains: vec!["example.com".into(), "admin.example.com".into()],
            contact: Some("admin@example.com".into()),
            tsig: Some("update:c2VjcmV0".into()),
            master: Some("ns0.example.com".into()),
            tlsa_ports: vec!["443".into(), "admin:8443".into()],
            ..EnvConfig::default()
        }
    }

    #[test]
    fn test_acme_config_mapping() {
        let config = acme_config(&env()).unwrap();
        assert_eq!(config.challenge, ChallengeKind::Dns01);
        assert_eq!(config.tlsa_ports.len(), 2);
        assert_eq!(config.tlsa_ports[1].port(), 8443);
        assert_eq!(config.update.server.as_deref(), Some("ns0.example.com"));
        assert_eq!(config.update.tsig.as_ref().unwrap().name, "update");
        assert_eq!(config.propagation.resolver, "1.1.1.1");
        assert_eq!(config.renewal_threshold_days, 30);
    }

    #[test]
    fn test_bad_port_spec_rejected() {
        let mut env = env();
        env.tlsa_ports = vec!["https".into()];
        assert!(acme_config(&env).is_err());
    }
}
