//! Shared fixtures for provisioning BDD scenarios.

use std::cell::RefCell;
use std::rc::Rc;

use fluentcloud::test_support::StubTransport;
use fluentcloud::{Cloud, CloudError, ResourceId};
use rstest::fixture;

pub const SUBSCRIPTION: &str = "sub";

/// Result of the last provisioning step.
pub type Outcome = Result<ResourceId, CloudError>;

/// State shared by every step of one scenario. Clones share the provider
/// and the recorded outcome.
#[derive(Clone, Debug)]
pub struct ProvisionContext {
    pub stub: StubTransport,
    pub cloud: Cloud<StubTransport>,
    outcome: Rc<RefCell<Option<Outcome>>>,
}

impl ProvisionContext {
    pub fn record(&self, outcome: Outcome) {
        self.outcome.replace(Some(outcome));
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome.borrow().clone()
    }

    /// Last path segment of every PUT, in call order.
    pub fn put_names(&self) -> Vec<String> {
        self.stub
            .put_order()
            .iter()
            .filter_map(|id| id.rsplit('/').next().map(str::to_owned))
            .collect()
    }
}

#[fixture]
pub fn provision_context() -> ProvisionContext {
    let stub = StubTransport::new();
    ProvisionContext {
        cloud: Cloud::new(stub.clone(), SUBSCRIPTION),
        stub,
        outcome: Rc::new(RefCell::new(None)),
    }
}
