//! Dynamic DNS update batches, executed through `nsupdate`.
//!
//! A [`DnsTransaction`] is a list of directives sent in one go, terminated by
//! `send`. The server either accepts the whole batch or the commit fails; a
//! failed batch must be rebuilt, never replayed partially.

use std::fmt;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error};

use crate::config::DnsUpdateConfig;
use crate::error::{DnsError, DnsResult};
use crate::records::RecordType;

/// Marker nsupdate puts in front of server-side complaints.
const REJECTION_MARKER: char = '>';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Server(String),
    Key { name: String, secret: String },
    Add {
        name: String,
        ttl: u32,
        rtype: RecordType,
        data: String,
    },
    Delete {
        name: String,
        rtype: Option<RecordType>,
        data: Option<String>,
    },
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server(host) => write!(f, "server {}", host),
            Self::Key { name, secret } => write!(f, "key {} {}", name, secret),
            Self::Add { name, ttl, rtype, data } => {
                write!(f, "update add {} {} {} {}", name, ttl, rtype, data)
            }
            Self::Delete { name, rtype, data } => {
                write!(f, "update del {}", name)?;
                if let Some(rtype) = rtype {
                    write!(f, " {}", rtype)?;
                    if let Some(data) = data {
                        write!(f, " {}", data)?;
                    }
                }
                Ok(())
            }
        }
    }
}

/// Runs an update script and hands back everything it printed.
#[allow(async_fn_in_trait)]
pub trait UpdateExecutor {
    async fn execute(&self, script: &str) -> DnsResult<UpdateOutput>;
}

impl<T: UpdateExecutor> UpdateExecutor for Arc<T> {
    async fn execute(&self, script: &str) -> DnsResult<UpdateOutput> {
        (**self).execute(script).await
    }
}

#[derive(Debug, Clone, Default)]
pub struct UpdateOutput {
    /// stdout followed by stderr
    pub output: String,
    pub success: bool,
}

/// Spawns the nsupdate binary once per commit.
pub struct NsupdateCommand {
    program: String,
}

impl NsupdateCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }
}

impl UpdateExecutor for NsupdateCommand {
    async fn execute(&self, script: &str) -> DnsResult<UpdateOutput> {
        let mut child = Command::new(&self.program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(script.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(UpdateOutput {
            output: text,
            success: output.status.success(),
        })
    }
}

/// One batch of update directives against one zone.
#[derive(Debug, Clone, Default)]
pub struct DnsTransaction {
    directives: Vec<Directive>,
}

impl DnsTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a batch carrying the configured server and TSIG key.
    pub fn from_config(config: &DnsUpdateConfig) -> Self {
        let mut tx = Self::new();
        if let Some(server) = &config.server {
            tx.set_server(server);
        }
        if let Some(key) = &config.tsig {
            tx.set_key(&key.name, &key.secret);
        }
        tx
    }

    pub fn set_server(&mut self, host: &str) -> &mut Self {
        self.directives.push(Directive::Server(host.to_string()));
        self
    }

    pub fn set_key(&mut self, name: &str, secret: &str) -> &mut Self {
        self.directives.push(Directive::Key {
            name: name.to_string(),
            secret: secret.to_string(),
        });
        self
    }

    pub fn add(&mut self, name: &str, rtype: RecordType, data: &str, ttl: u32) -> &mut Self {
        self.directives.push(Directive::Add {
            name: name.to_string(),
            ttl,
            rtype,
            data: data.to_string(),
        });
        self
    }

    pub fn delete(&mut self, name: &str, rtype: Option<RecordType>, data: Option<&str>) -> &mut Self {
        self.directives.push(Directive::Delete {
            name: name.to_string(),
            rtype,
            data: data.map(str::to_string),
        });
        self
    }

    pub fn directives(&self) -> &[Directive] {
        &self.directives
    }

    /// Number of record changes (server/key lines excluded).
    pub fn update_count(&self) -> usize {
        self.directives
            .iter()
            .filter(|d| matches!(d, Directive::Add { .. } | Directive::Delete { .. }))
            .count()
    }

    /// The text fed to nsupdate, including the final `send`.
    pub fn script(&self) -> String {
        let mut script = String::new();
        for directive in &self.directives {
            script.push_str(&directive.to_string());
            script.push('\n');
        }
        script.push_str("send\n");
        script
    }

    /// Send the batch. Fails with [`DnsError::Transaction`] when the server
    /// rejects any part of it; nothing is retried here.
    pub async fn commit<E: UpdateExecutor>(&self, executor: &E) -> DnsResult<()> {
        for directive in &self.directives {
            debug!(directive = %redact(directive), "nsupdate");
        }

        let result = executor.execute(&self.script()).await?;
        let mut errors = rejection_messages(&result.output);

        if errors.is_empty() && !result.success {
            let output = result.output.trim();
            errors.push(if output.is_empty() {
                "nsupdate exited with failure status".to_string()
            } else {
                output.lines().map(str::trim).collect::<Vec<_>>().join(" ")
            });
        }

        if errors.is_empty() {
            return Ok(());
        }

        // The protocol has no transaction id to correlate later, so dump the batch now
        error!(errors = %errors.join(" "), "DNS update rejected, transaction was:");
        for directive in &self.directives {
            error!("  {}", redact(directive));
        }
        Err(DnsError::Transaction(errors.join(" ")))
    }
}

/// Keep TSIG secrets out of the logs.
fn redact(directive: &Directive) -> String {
    match directive {
        Directive::Key { name, .. } => format!("key {} <redacted>", name),
        other => other.to_string(),
    }
}

/// Collect the text after each rejection marker, skipping empty remainders.
pub fn rejection_messages(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.trim_start().strip_prefix(REJECTION_MARKER))
        .map(|rest| rest.trim().to_string())
        .filter(|rest| !rest.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TsigKey;
    use std::sync::Mutex;

    struct Scripted {
        output: &'static str,
        success: bool,
        scripts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(output: &'static str, success: bool) -> Self {
            Self { output, success, scripts: Mutex::new(Vec::new()) }
        }
    }

    impl UpdateExecutor for Scripted {
        async fn execute(&self, script: &str) -> DnsResult<UpdateOutput> {
            self.scripts.lock().unwrap().push(script.to_string());
            Ok(UpdateOutput { output: self.output.to_string(), success: self.success })
        }
    }

    #[test]
    fn test_script_layout() {
        let config = DnsUpdateConfig {
            server: Some("ns0.example.com".into()),
            tsig: Some(TsigKey { name: "update".into(), secret: "c2VjcmV0".into() }),
            ..Default::default()
        };
        let mut tx = DnsTransaction::from_config(&config);
        tx.delete("_acme-challenge.example.com", Some(RecordType::TXT), None)
            .add("_acme-challenge.example.com", RecordType::TXT, "\"abc\"", 60)
            .delete("_443._tcp.example.com", None, None);

        assert_eq!(
            tx.script(),
            "server ns0.example.com\n\
             key update c2VjcmV0\n\
             update del _acme-challenge.example.com TXT\n\
             update add _acme-challenge.example.com 60 TXT \"abc\"\n\
             update del _443._tcp.example.com\n\
             send\n"
        );
        assert_eq!(tx.update_count(), 3);
    }

    #[test]
    fn test_delete_with_data() {
        let directive = Directive::Delete {
            name: "_443._tcp.example.com".into(),
            rtype: Some(RecordType::TLSA),
            data: Some("3 1 1 abcd".into()),
        };
        assert_eq!(directive.to_string(), "update del _443._tcp.example.com TLSA 3 1 1 abcd");
    }

    #[test]
    fn test_rejection_messages() {
        let output = "> update failed: REFUSED\n\
                      Outgoing update query:\n\
                      >   \n\
                      > ; TSIG error with server: tsig verify failure\n";
        assert_eq!(
            rejection_messages(output),
            vec!["update failed: REFUSED", "; TSIG error with server: tsig verify failure"]
        );
        assert!(rejection_messages("").is_empty());
    }

    #[tokio::test]
    async fn test_commit_accepted() {
        let executor = Scripted::new("", true);
        let mut tx = DnsTransaction::new();
        tx.add("example.com", RecordType::TXT, "\"v\"", 60);

        tx.commit(&executor).await.unwrap();
        let scripts = executor.scripts.lock().unwrap();
        assert_eq!(scripts.len(), 1);
        assert!(scripts[0].ends_with("send\n"));
    }

    #[tokio::test]
    async fn test_commit_rejected() {
        let executor = Scripted::new("> update failed: NOTAUTH\n> zone example.com\n", true);
        let mut tx = DnsTransaction::new();
        tx.add("example.com", RecordType::TXT, "\"v\"", 60);

        let err = tx.commit(&executor).await.unwrap_err();
        assert!(err.is_transaction());
        assert_eq!(err.to_string(), "DNS update rejected: update failed: NOTAUTH zone example.com");
    }

    #[tokio::test]
    async fn test_commit_failure_status_without_marker() {
        let executor = Scripted::new("could not reach server\n", false);
        let tx = DnsTransaction::new();

        let err = tx.commit(&executor).await.unwrap_err();
        match err {
            DnsError::Transaction(msg) => assert_eq!(msg, "could not reach server"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_redact_key() {
        let directive = Directive::Key { name: "update".into(), secret: "c2VjcmV0".into() };
        assert_eq!(redact(&directive), "key update <redacted>");
    }
}
