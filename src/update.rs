//! Updates of existing resources.
//!
//! An [`Update`] starts from the provider's current payload, collects
//! changes, and submits them on [`Update::apply`]. Updates never derive
//! dependency names: new dependencies must be named explicitly.

use std::marker::PhantomData;

use crate::context::Context;
use crate::dependency::{DependencyKind, Requirement, Slot};
use crate::entity::Wrapper;
use crate::error::CloudError;
use crate::identity::ResourceId;
use crate::payload::{Payload, Tags, reference};
use crate::provision::{DependencyGraph, Inherited, Step, missing, submit};
use crate::resources::PublicIpSpec;
use crate::stage::WithTags;
use crate::transport::Transport;

/// Pending changes to an existing resource.
#[derive(Debug)]
pub struct Update<T, W> {
    wrapper: W,
    payload: Payload,
    tags: Tags,
    deferred: Vec<Deferred>,
    problems: Vec<String>,
    _transport: PhantomData<fn() -> T>,
}

/// Changes that need provider calls before the update can be submitted.
#[derive(Clone, Debug)]
pub(crate) enum Deferred {
    AttachPublicIp(Slot<PublicIpSpec>),
    DetachPublicIp,
}

impl<T: Transport, W: Wrapper<T>> Update<T, W> {
    pub(crate) fn new(mut wrapper: W) -> Result<Self, CloudError> {
        let payload = wrapper.inner()?.clone();
        let tags = payload.tags();
        Ok(Self {
            wrapper,
            payload,
            tags,
            deferred: Vec::new(),
            problems: Vec::new(),
            _transport: PhantomData,
        })
    }

    /// Identity of the resource being updated.
    #[must_use]
    pub fn identity(&self) -> &ResourceId {
        self.wrapper.identity()
    }

    /// Payload as it will be submitted, minus deferred changes.
    #[must_use]
    pub const fn payload(&self) -> &Payload {
        &self.payload
    }

    pub(crate) const fn payload_mut(&mut self) -> &mut Payload {
        &mut self.payload
    }

    /// Records a value that cannot be submitted; `apply()` will fail with
    /// `InvalidDefinitionState` without calling the provider.
    pub(crate) fn reject(&mut self, reason: impl Into<String>) {
        self.problems.push(reason.into());
    }

    pub(crate) fn defer(&mut self, change: Deferred) {
        self.deferred.push(change);
    }

    /// Submits the update and returns the refreshed wrapper.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::InvalidDefinitionState`] for rejected values,
    /// dependency errors for referenced resources, and
    /// [`CloudError::ProviderRequestFailed`] when the provider rejects the
    /// request.
    pub fn apply(self) -> Result<W, CloudError> {
        let Self {
            wrapper,
            mut payload,
            tags,
            deferred,
            problems,
            ..
        } = self;
        let entity = wrapper.entity();
        let id = entity.identity().clone();
        if !problems.is_empty() {
            return Err(CloudError::invalid(id.short_name(), problems.join("; ")));
        }
        let ctx = entity.context().clone();
        for change in deferred {
            change.apply(&ctx, &id, &mut payload)?;
        }
        payload.set_tags(&tags);
        submit(&ctx, id, &payload, "update")
    }
}

impl Deferred {
    fn apply<T: Transport>(
        self,
        ctx: &Context<T>,
        id: &ResourceId,
        payload: &mut Payload,
    ) -> Result<(), CloudError> {
        let resource = id.short_name();
        match self {
            Self::AttachPublicIp(slot) => {
                let inherited = Inherited {
                    region: payload.location().map(str::to_owned),
                    group: Some(id.group_id()),
                    ..Inherited::default()
                };
                let region = inherited.region(resource, None)?;
                let resolved = DependencyGraph::new(resource)
                    .with(Step::PublicIps(vec![slot], Requirement::Mandatory))
                    .resolve(ctx, &region, &inherited)?;
                let public_ip = resolved
                    .public_ips
                    .first()
                    .ok_or_else(|| missing(resource, DependencyKind::PublicIpAddress))?;
                Self::edit_ip_configuration(resource, payload, |config| {
                    config.set("properties.publicIPAddress", reference(public_ip));
                })
            }
            Self::DetachPublicIp => Self::edit_ip_configuration(resource, payload, |config| {
                config.remove("properties.publicIPAddress");
            }),
        }
    }

    fn edit_ip_configuration(
        resource: &str,
        payload: &mut Payload,
        edit: impl FnOnce(&mut Payload),
    ) -> Result<(), CloudError> {
        if payload.edit_first("properties.ipConfigurations", edit) {
            Ok(())
        } else {
            Err(CloudError::invalid(
                resource,
                "network interface has no IP configuration",
            ))
        }
    }
}

impl<T, W> WithTags for Update<T, W> {
    fn tags_mut(&mut self) -> &mut Tags {
        &mut self.tags
    }
}
