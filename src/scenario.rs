//! Scenario runner
//!
//! Wires the pieces together: start a [`FileServer`] on the fixture root,
//! connect a [`ProbeClient`] that trusts the fixture CA, run the probes and
//! let the [`Coordinator`] close both ends.

use crate::coordinator::Coordinator;
use crate::fixture::{FixtureStore, TlsMaterials};
use crate::http::h2::H2ServerBuilder;
use crate::probe::{Probe, ProbeClient, ProbeReport, DEFAULT_DEADLINE};
use crate::serve::FileServer;
use crate::Result;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// A set of probes against one fixture root
#[derive(Debug, Clone)]
pub struct Scenario {
    root: PathBuf,
    probes: Vec<Probe>,
    strict_errors: bool,
    deadline: Duration,
    servername: String,
    materials: Option<TlsMaterials>,
    h2: H2ServerBuilder,
}

/// Scenario builder
#[derive(Debug, Clone)]
pub struct ScenarioBuilder {
    scenario: Scenario,
}

impl ScenarioBuilder {
    pub fn probe(mut self, probe: Probe) -> Self {
        self.scenario.probes.push(probe);
        self
    }

    pub fn probes(mut self, probes: impl IntoIterator<Item = Probe>) -> Self {
        self.scenario.probes.extend(probes);
        self
    }

    /// See [`FileServerBuilder::strict_errors`](crate::serve::FileServerBuilder::strict_errors)
    pub fn strict_errors(mut self, strict: bool) -> Self {
        self.scenario.strict_errors = strict;
        self
    }

    /// Time allowed from the first request to the last response
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.scenario.deadline = deadline;
        self
    }

    /// Host name the client sends as SNI and checks the certificate for
    pub fn servername(mut self, name: impl Into<String>) -> Self {
        self.scenario.servername = name.into();
        self
    }

    /// TLS material to use instead of the root's `keys/` directory
    pub fn materials(mut self, materials: TlsMaterials) -> Self {
        self.scenario.materials = Some(materials);
        self
    }

    /// Server-side HTTP/2 settings
    pub fn h2(mut self, builder: H2ServerBuilder) -> Self {
        self.scenario.h2 = builder;
        self
    }

    pub fn build(self) -> Scenario {
        self.scenario
    }
}

/// What a scenario run observed
#[derive(Debug)]
pub struct ScenarioReport {
    pub server_addr: SocketAddr,
    pub probes: ProbeReport,
    /// Teardowns performed by the coordinator; always 1 after a successful run
    pub teardowns: usize,
    pub client_closed: bool,
    pub server_closed: bool,
}

impl Scenario {
    pub fn builder(root: impl Into<PathBuf>) -> ScenarioBuilder {
        ScenarioBuilder {
            scenario: Scenario {
                root: root.into(),
                probes: Vec::new(),
                strict_errors: false,
                deadline: DEFAULT_DEADLINE,
                servername: "localhost".to_string(),
                materials: None,
                h2: H2ServerBuilder::new(),
            },
        }
    }

    pub fn probes(&self) -> &[Probe] {
        &self.probes
    }

    /// Run every probe; fails on the first transport error, the deadline,
    /// or any response that does not match its probe
    pub fn run(&self) -> Result<ScenarioReport> {
        let store = FixtureStore::new(&self.root);
        let materials = match &self.materials {
            Some(materials) => materials.clone(),
            None => store.tls_materials()?,
        };

        let mut server = FileServer::builder(store)
            .tls(materials.server_config()?)
            .strict_errors(self.strict_errors)
            .h2(self.h2.clone())
            .start()?;
        let server_addr = server.local_addr();

        let client_tls = materials.client_config(&self.servername)?;
        let mut client = ProbeClient::connect(server_addr, &client_tls)?;

        let (probes, teardowns) = {
            let mut coordinator = Coordinator::new().on_done(&mut server);
            let probes = client.run(&self.probes, &mut coordinator, self.deadline)?;
            (probes, coordinator.teardowns())
        };

        info!(
            %server_addr,
            probes = probes.observations.len(),
            order = ?probes.completion_order,
            "scenario finished"
        );

        Ok(ScenarioReport {
            server_addr,
            probes,
            teardowns,
            client_closed: client.is_closed(),
            server_closed: server.is_closed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let scenario = Scenario::builder("tests/fixtures")
            .probe(Probe::body("/a.js", "AJS"))
            .probes([Probe::not_found("/missing")])
            .build();

        assert_eq!(scenario.probes().len(), 2);
        assert_eq!(scenario.deadline, DEFAULT_DEADLINE);
        assert_eq!(scenario.servername, "localhost");
        assert!(!scenario.strict_errors);
    }

    #[test]
    fn test_missing_keys_fail_before_listening() {
        let dir = tempfile::tempdir().unwrap();
        let err = Scenario::builder(dir.path())
            .probe(Probe::not_found("/x"))
            .build()
            .run()
            .unwrap_err();
        assert!(matches!(err, crate::Error::Tls(_)), "{:?}", err);
    }
}
