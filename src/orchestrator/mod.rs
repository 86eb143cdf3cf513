//! Deployment orchestration.
//!
//! Four stages, each owning one kind of remote operation, composed by the
//! [`Orchestrator`] into a strictly sequential pipeline:
//! provision the backing service, publish the artifact, bind, restart.
//! A failing stage ends the run; earlier side effects are left in place.

mod binder;
mod controller;
mod pipeline;
mod provisioner;
mod publisher;
mod report;

pub(crate) use binder::ServiceBinder;
pub(crate) use controller::AppController;
pub(crate) use pipeline::{DeployRequest, Orchestrator};
pub(crate) use provisioner::ServiceProvisioner;
pub(crate) use publisher::{readable_artifact, ArtifactPublisher};
pub(crate) use report::{CompletionReporter, TracingReporter};
