//! Fixture contracts and the precompile addresses implementing them.

use ethers::types::Address;

/// Relay exposing `functionCall`, `functionStaticCall`, `functionDelegateCall`
/// and the callcode forwarders.
pub const RELAY_CONTRACT: &str = "Caller";
/// Peer caller deployed with the target address as its only constructor argument.
pub const PEER_CALLER_CONTRACT: &str = "NoopCaller";

pub const CONTEXT_INSPECTOR: &str = "ContextInspector";
pub const CONTEXT_INSPECTOR_MOCK: &str = "ContextInspectorMock";
pub const STORAGE_BASIC: &str = "StorageBasic";
pub const STORAGE_BASIC_MOCK: &str = "StorageBasicMock";

/// Runtime code the chain reports for a precompile address.
pub const PRECOMPILE_CODE: [u8; 1] = [0x01];

/// An interface, the mock implementing it, and its precompile address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceFixture {
    pub interface: &'static str,
    pub mock: &'static str,
    /// Low-order byte of the `0x9000..00NN` precompile address.
    pub precompile: u8,
}

impl InterfaceFixture {
    pub fn precompile_address(&self) -> Address {
        precompile_address(self.precompile)
    }
}

/// `0x90000000000000000000000000000000000000NN`
pub fn precompile_address(index: u8) -> Address {
    let mut bytes = [0u8; 20];
    bytes[0] = 0x90;
    bytes[19] = index;
    Address::from(bytes)
}

pub const NOOP_FIXTURES: [InterfaceFixture; 6] = [
    InterfaceFixture {
        interface: "NoopNoReceiveNoFallback",
        mock: "NoopNoReceiveNoFallbackMock",
        precompile: 1,
    },
    InterfaceFixture {
        interface: "NoopReceiveNoFallback",
        mock: "NoopReceiveNoFallbackMock",
        precompile: 2,
    },
    InterfaceFixture {
        interface: "NoopReceivePayableFallback",
        mock: "NoopReceivePayableFallbackMock",
        precompile: 3,
    },
    InterfaceFixture {
        interface: "NoopReceiveNonpayableFallback",
        mock: "NoopReceiveNonpayableFallbackMock",
        precompile: 4,
    },
    InterfaceFixture {
        interface: "NoopNoReceivePayableFallback",
        mock: "NoopNoReceivePayableFallbackMock",
        precompile: 5,
    },
    InterfaceFixture {
        interface: "NoopNoReceiveNonpayableFallback",
        mock: "NoopNoReceiveNonpayableFallbackMock",
        precompile: 6,
    },
];

/// Selectors of the interface are used as payloads; the mock reverts on everything.
pub const DISABLED_FIXTURE: InterfaceFixture = InterfaceFixture {
    interface: "NoopReceivePayableFallback",
    mock: "NoopDisabledMock",
    precompile: 7,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn precompile_addresses_are_sequential() {
        assert_eq!(
            NOOP_FIXTURES[0].precompile_address(),
            Address::from_str("0x9000000000000000000000000000000000000001").unwrap()
        );
        assert_eq!(
            DISABLED_FIXTURE.precompile_address(),
            Address::from_str("0x9000000000000000000000000000000000000007").unwrap()
        );
        for (i, fixture) in NOOP_FIXTURES.iter().enumerate() {
            assert_eq!(fixture.precompile as usize, i + 1);
            assert_eq!(fixture.mock, format!("{}Mock", fixture.interface));
        }
    }
}
