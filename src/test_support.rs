//! Test support utilities shared across unit and integration tests.

use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::rc::Rc;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::{Value, json};

use crate::error::TransportError;
use crate::identity::{ResourceId, ResourceType};
use crate::payload::Payload;
use crate::transport::{ListScope, Transport};

/// Provider operation recorded by [`StubTransport`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StubMethod {
    /// Single resource read.
    Get,
    /// Collection read.
    List,
    /// Create or replace.
    Put,
    /// Removal.
    Delete,
}

/// Records a single call made through [`StubTransport`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StubCall {
    /// Operation performed.
    pub method: StubMethod,
    /// Resource identity, or collection path for lists.
    pub target: String,
}

#[derive(Debug)]
struct Failure {
    put_of: Option<ResourceType>,
    error: TransportError,
}

#[derive(Debug, Default)]
struct StubState {
    resources: Vec<(String, Payload)>,
    calls: Vec<StubCall>,
    failures: VecDeque<Failure>,
    omit_put_bodies: bool,
}

/// In-memory provider that keeps resources in insertion order.
///
/// Clones share state, so a test can hand one clone to a [`Cloud`] and keep
/// another for assertions. Successful PUTs store the payload with its `id`,
/// `name`, and a `Succeeded` provisioning state filled in.
///
/// [`Cloud`]: crate::Cloud
#[derive(Clone, Debug, Default)]
pub struct StubTransport {
    state: Rc<RefCell<StubState>>,
}

impl StubTransport {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a raw payload under its `id` field, replacing any resource
    /// with the same identity. Payloads without a parsable `id` are ignored.
    pub fn insert_json(&self, value: Value) {
        let Some(payload) = Payload::from_value(value) else {
            return;
        };
        let Some(id) = payload.id().and_then(|text| ResourceId::parse(text).ok()) else {
            return;
        };
        self.store(&id, payload);
    }

    /// Seeds a resource group.
    pub fn seed_group(&self, subscription: &str, name: &str, region: &str) {
        let id = ResourceId::resource_group(subscription, name);
        self.insert_json(json!({
            "id": id.to_string(),
            "name": name,
            "location": region,
            "properties": { "provisioningState": "Succeeded" },
        }));
    }

    /// Fails the next call, whatever it is, with the given status.
    pub fn fail_next(&self, status: u16, message: &str) {
        self.state.borrow_mut().failures.push_back(Failure {
            put_of: None,
            error: TransportError::new(Some(status), message),
        });
    }

    /// Fails the next PUT of a resource of the given type.
    pub fn fail_next_put(&self, resource_type: ResourceType, status: u16, message: &str) {
        self.state.borrow_mut().failures.push_back(Failure {
            put_of: Some(resource_type),
            error: TransportError::new(Some(status), message),
        });
    }

    /// Makes every later PUT succeed without a response body.
    pub fn omit_put_bodies(&self) {
        self.state.borrow_mut().omit_put_bodies = true;
    }

    /// Returns a snapshot of every call recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<StubCall> {
        self.state.borrow().calls.clone()
    }

    /// Number of GET calls.
    #[must_use]
    pub fn get_count(&self) -> usize {
        self.count(StubMethod::Get)
    }

    /// Number of DELETE calls.
    #[must_use]
    pub fn delete_count(&self) -> usize {
        self.count(StubMethod::Delete)
    }

    /// Number of PUT calls against resources of one type.
    #[must_use]
    pub fn put_count(&self, resource_type: ResourceType) -> usize {
        self.put_order()
            .iter()
            .filter_map(|target| ResourceId::parse(target).ok())
            .filter(|id| id.resource_type() == Some(resource_type))
            .count()
    }

    /// Targets of every PUT call, in call order.
    #[must_use]
    pub fn put_order(&self) -> Vec<String> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|call| call.method == StubMethod::Put)
            .map(|call| call.target.clone())
            .collect()
    }

    fn count(&self, method: StubMethod) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|call| call.method == method)
            .count()
    }

    fn record(&self, method: StubMethod, target: String) -> Result<(), TransportError> {
        let mut state = self.state.borrow_mut();
        let put_type = (method == StubMethod::Put)
            .then(|| ResourceId::parse(&target).ok())
            .flatten()
            .and_then(|id| id.resource_type());
        state.calls.push(StubCall { method, target });
        let position = state.failures.iter().position(|failure| match failure.put_of {
            None => true,
            Some(wanted) => put_type == Some(wanted),
        });
        match position.and_then(|index| state.failures.remove(index)) {
            Some(failure) => Err(failure.error),
            None => Ok(()),
        }
    }

    fn store(&self, id: &ResourceId, payload: Payload) {
        let key = id.key();
        let mut state = self.state.borrow_mut();
        match state.resources.iter_mut().find(|(current, _)| *current == key) {
            Some(entry) => entry.1 = payload,
            None => state.resources.push((key, payload)),
        }
    }

    fn lookup(&self, id: &ResourceId) -> Option<Payload> {
        let key = id.key();
        self.state
            .borrow()
            .resources
            .iter()
            .find(|(current, _)| *current == key)
            .map(|(_, payload)| payload.clone())
    }
}

fn in_scope(payload: &Payload, scope: &ListScope) -> bool {
    let Some(id) = payload.id().and_then(|text| ResourceId::parse(text).ok()) else {
        return false;
    };
    id.resource_type() == Some(scope.resource_type)
        && id.subscription().eq_ignore_ascii_case(&scope.subscription)
        && scope
            .group
            .as_deref()
            .is_none_or(|group| id.group().eq_ignore_ascii_case(group))
}

impl Transport for StubTransport {
    fn get(&self, id: &ResourceId) -> Result<Option<Payload>, TransportError> {
        self.record(StubMethod::Get, id.to_string())?;
        Ok(self.lookup(id))
    }

    fn list(&self, scope: &ListScope) -> Result<Vec<Payload>, TransportError> {
        self.record(StubMethod::List, scope.path())?;
        Ok(self
            .state
            .borrow()
            .resources
            .iter()
            .map(|(_, payload)| payload)
            .filter(|payload| in_scope(payload, scope))
            .cloned()
            .collect())
    }

    fn put(&self, id: &ResourceId, payload: &Payload) -> Result<Option<Payload>, TransportError> {
        self.record(StubMethod::Put, id.to_string())?;
        let mut stored = payload.clone();
        stored.set("id", id.to_string());
        stored.set("name", id.short_name());
        stored.set("properties.provisioningState", "Succeeded");
        self.store(id, stored.clone());
        if self.state.borrow().omit_put_bodies {
            Ok(None)
        } else {
            Ok(Some(stored))
        }
    }

    fn delete(&self, id: &ResourceId) -> Result<(), TransportError> {
        self.record(StubMethod::Delete, id.to_string())?;
        let key = id.key();
        self.state
            .borrow_mut()
            .resources
            .retain(|(current, _)| *current != key);
        Ok(())
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }

    /// Removes variables for the guard's lifetime, restoring them on drop.
    pub fn unset_vars(keys: &[&str]) -> Self {
        let guard = ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let mut previous = Vec::with_capacity(keys.len());
        for key in keys {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::remove_var(key) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn targeted_failure_skips_other_calls() {
        let stub = StubTransport::new();
        stub.fail_next_put(ResourceType::StorageAccount, 409, "taken");
        let group = ResourceId::resource_group("sub", "rg");
        let store = ResourceId::new("sub", "rg", ResourceType::StorageAccount, "s1");

        assert!(stub.put(&group, &Payload::new()).is_ok());
        let Err(err) = stub.put(&store, &Payload::new()) else {
            panic!("storage PUT should fail");
        };
        assert_eq!(err.status, Some(409));
        assert!(stub.put(&store, &Payload::new()).is_ok());
    }

    #[rstest]
    fn listing_filters_by_type_and_group() {
        let stub = StubTransport::new();
        stub.seed_group("sub", "rg", "westus");
        let network = ResourceId::new("sub", "RG", ResourceType::Network, "n1");
        let other = ResourceId::new("sub", "other", ResourceType::Network, "n2");
        stub.put(&network, &Payload::new())
            .unwrap_or_else(|err| panic!("put: {err}"));
        stub.put(&other, &Payload::new())
            .unwrap_or_else(|err| panic!("put: {err}"));

        let scope = ListScope::subscription("sub", ResourceType::Network).in_group("rg");
        let listed = stub
            .list(&scope)
            .unwrap_or_else(|err| panic!("list: {err}"));
        assert_eq!(listed.len(), 1);
        assert_eq!(listed.first().and_then(Payload::name), Some("n1"));
    }
}
