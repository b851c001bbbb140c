use crate::artifacts::{Artifact, ArtifactStore};
use crate::assertion::{AssertionEngine, ContractUnderTest};
use crate::client::{deploy_contract, ChainClient};
use crate::config::HarnessConfig;
use crate::encoder::encode_peer_constructor;
use crate::error::{HarnessError, Result};
use crate::fixtures::{
    InterfaceFixture, CONTEXT_INSPECTOR, CONTEXT_INSPECTOR_MOCK, DISABLED_FIXTURE, NOOP_FIXTURES,
    PEER_CALLER_CONTRACT, PRECOMPILE_CODE, RELAY_CONTRACT, STORAGE_BASIC, STORAGE_BASIC_MOCK,
};
use crate::matrix::{derive_context_cases, derive_disabled_cases, derive_interface_cases, CaseSpec};
use crate::report::{parity_mismatches, ParityReport, RunReport, SuiteReport};
use crate::types::TestResult;
use ethers::types::Address;
use tracing::{info, warn};

pub const STATE_GROUP: &str = "State";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Suite {
    All,
    AbiBasic,
    AbiDisabled,
    MessageCall,
    EmptyAccount,
}

impl Suite {
    pub fn name(&self) -> &'static str {
        match self {
            Suite::All => "all",
            Suite::AbiBasic => "abi-basic",
            Suite::AbiDisabled => "abi-disabled",
            Suite::MessageCall => "message-call",
            Suite::EmptyAccount => "empty-account",
        }
    }

    fn includes(&self, other: Suite) -> bool {
        *self == Suite::All || *self == other
    }
}

/// Which case matrix a fixture is run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Matrix {
    Interface,
    Disabled,
}

impl Matrix {
    fn derive(self, contract: &ContractUnderTest) -> Vec<CaseSpec> {
        match self {
            Matrix::Interface => derive_interface_cases(&contract.interface),
            Matrix::Disabled => derive_disabled_cases(&contract.interface),
        }
    }

    /// Only the interface matrix makes high-level calls.
    fn uses_peer_caller(self) -> bool {
        self == Matrix::Interface
    }
}

/// Composes the suites for mocks and precompiles and collects their reports.
pub struct ConformanceRunner<'a, C: ChainClient + ?Sized> {
    client: &'a C,
    config: &'a HarnessConfig,
    artifacts: ArtifactStore,
}

impl<'a, C: ChainClient + ?Sized> ConformanceRunner<'a, C> {
    pub fn new(client: &'a C, config: &'a HarnessConfig) -> Self {
        Self {
            client,
            config,
            artifacts: ArtifactStore::new(&config.artifacts_dir),
        }
    }

    pub async fn run(&self, suite: Suite) -> RunReport {
        let target_chain_available = self.config.target_chain_available();
        let mut report = RunReport {
            network: self.config.network.clone(),
            target_chain_available,
            ..Default::default()
        };
        if !target_chain_available {
            warn!(
                "Network {} is not {}: precompile suites will be skipped",
                self.config.network, self.config.target_network
            );
        }

        if suite.includes(Suite::AbiBasic) {
            for fixture in &NOOP_FIXTURES {
                self.run_fixture(Suite::AbiBasic, fixture, Matrix::Interface, &mut report)
                    .await;
            }
        }
        if suite.includes(Suite::AbiDisabled) {
            self.run_fixture(Suite::AbiDisabled, &DISABLED_FIXTURE, Matrix::Disabled, &mut report)
                .await;
        }
        if suite.includes(Suite::MessageCall) {
            report.suites.push(self.run_message_call().await);
        }
        if suite.includes(Suite::EmptyAccount) {
            report.suites.push(self.run_empty_account().await);
        }

        let summary = report.summary();
        info!(
            "Finished: {} passed, {} failed, {} skipped",
            summary.total_passed, summary.total_failed, summary.total_skipped
        );
        report
    }

    fn engine(&self, relay: Address) -> AssertionEngine<'_, C> {
        AssertionEngine::new(
            self.client,
            self.config.whale,
            relay,
            self.config.gas,
            self.config.polling,
        )
    }

    async fn deploy(&self, artifact: &Artifact, constructor_args: Option<&[u8]>) -> Result<Address> {
        deploy_contract(
            self.client,
            self.config.whale,
            &artifact.name,
            &artifact.bytecode,
            constructor_args,
            &self.config.polling,
        )
        .await
    }

    async fn deploy_named(&self, name: &str) -> Result<Address> {
        let artifact = self.artifacts.load(name)?;
        self.deploy(&artifact, None).await
    }

    async fn deploy_peer_caller(&self, matrix: Matrix, target: Address) -> Result<Option<Address>> {
        if !matrix.uses_peer_caller() {
            return Ok(None);
        }
        let artifact = self.artifacts.load(PEER_CALLER_CONTRACT)?;
        self.deploy(&artifact, Some(&encode_peer_constructor(target)))
            .await
            .map(Some)
    }

    /// Mock suite, then precompile suite when the target chain is available.
    async fn run_fixture(
        &self,
        suite: Suite,
        fixture: &InterfaceFixture,
        matrix: Matrix,
        report: &mut RunReport,
    ) {
        info!("Running {} against {}", suite.name(), fixture.interface);

        let mut mock = SuiteReport::new(suite.name(), format!("{} / Mock", fixture.interface));
        if let Err(e) = self.run_mock(fixture, matrix, &mut mock).await {
            warn!("{} mock suite aborted: {}", fixture.interface, e);
            mock.aborted = Some(e.to_string());
        }

        let mut precompile = SuiteReport::new(
            suite.name(),
            format!(
                "{} / Precompile {:#x}",
                fixture.interface,
                fixture.precompile_address()
            ),
        );
        if self.config.target_chain_available() {
            if let Err(e) = self.run_precompile(fixture, matrix, &mut precompile).await {
                warn!("{} precompile suite aborted: {}", fixture.interface, e);
                precompile.aborted = Some(e.to_string());
            }
        } else {
            precompile.push(
                STATE_GROUP,
                "precompile suite",
                TestResult::Skipped(format!(
                    "only runs on {} (network is {})",
                    self.config.target_network, self.config.network
                )),
            );
        }

        if mock.aborted.is_none() && precompile.aborted.is_none() && !precompile.is_skipped() {
            report.parity.push(ParityReport {
                interface: fixture.interface.to_string(),
                mismatches: parity_mismatches(&mock, &precompile),
            });
        }
        report.suites.push(mock);
        report.suites.push(precompile);
    }

    async fn run_mock(
        &self,
        fixture: &InterfaceFixture,
        matrix: Matrix,
        report: &mut SuiteReport,
    ) -> Result<()> {
        let interface = self.artifacts.interface(fixture.interface)?;
        let mock_artifact = self.artifacts.load(fixture.mock)?;
        let relay = self.deploy_named(RELAY_CONTRACT).await?;
        let address = self.deploy(&mock_artifact, None).await?;
        let peer_caller = self.deploy_peer_caller(matrix, address).await?;

        let contract = ContractUnderTest {
            name: fixture.mock.to_string(),
            address,
            interface,
            peer_caller,
        };
        self.run_contract(&contract, &mock_artifact.deployed_bytecode, relay, matrix, report)
            .await;
        Ok(())
    }

    async fn run_precompile(
        &self,
        fixture: &InterfaceFixture,
        matrix: Matrix,
        report: &mut SuiteReport,
    ) -> Result<()> {
        let interface = self.artifacts.interface(fixture.interface)?;
        let address = fixture.precompile_address();
        let relay = self.deploy_named(RELAY_CONTRACT).await?;
        let peer_caller = self.deploy_peer_caller(matrix, address).await?;

        let contract = ContractUnderTest {
            name: fixture.interface.to_string(),
            address,
            interface,
            peer_caller,
        };
        self.run_contract(&contract, &PRECOMPILE_CODE, relay, matrix, report)
            .await;
        Ok(())
    }

    async fn run_contract(
        &self,
        contract: &ContractUnderTest,
        expected_code: &[u8],
        relay: Address,
        matrix: Matrix,
        report: &mut SuiteReport,
    ) {
        let engine = self.engine(relay);
        for (name, result) in engine.check_state(contract.address, expected_code).await {
            report.push(STATE_GROUP, name, result);
        }

        let cases = matrix.derive(contract);
        info!("{}: {} cases", contract.name, cases.len());
        for spec in &cases {
            let result = engine.run_case(contract, spec).await;
            report.push(spec.group.clone(), spec.name.clone(), result);
        }
    }

    async fn run_message_call(&self) -> SuiteReport {
        let mut report = SuiteReport::new(Suite::MessageCall.name(), "Mock");
        if let Err(e) = self.run_message_call_mock(&mut report).await {
            warn!("message call suite aborted: {}", e);
            report.aborted = Some(e.to_string());
        }
        report
    }

    async fn run_message_call_mock(&self, report: &mut SuiteReport) -> Result<()> {
        let inspector_abi = self.artifacts.interface(CONTEXT_INSPECTOR)?;
        let storage_abi = self.artifacts.interface(STORAGE_BASIC)?;
        for (interface, function) in [
            (&inspector_abi, "emitMsgSender"),
            (&inspector_abi, "getMsgSender"),
            (&inspector_abi, "emitMsgValue"),
            (&storage_abi, "setStorageValue"),
        ] {
            if interface.function(function).is_none() {
                return Err(HarnessError::InvalidAbi {
                    name: interface.name.clone(),
                    reason: format!("missing function {}", function),
                });
            }
        }

        let relay = self.deploy_named(RELAY_CONTRACT).await?;
        let inspector = self.deploy_named(CONTEXT_INSPECTOR_MOCK).await?;
        let storage = self.deploy_named(STORAGE_BASIC_MOCK).await?;

        let engine = self.engine(relay);
        for case in derive_context_cases(&self.config.gas, self.config.callcode_forwards_value) {
            let result = engine.run_context_case(&case, inspector, storage).await;
            report.push(case.group, case.name, result);
        }
        Ok(())
    }

    async fn run_empty_account(&self) -> SuiteReport {
        let mut report = SuiteReport::new(Suite::EmptyAccount.name(), "EOA");
        let engine = self.engine(Address::zero());
        for (name, result) in engine.run_empty_account().await {
            report.push("empty account", name, result);
        }
        report
    }
}
