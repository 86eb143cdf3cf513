//! In-memory platform that records every call, for pipeline tests.

use super::{PlatformClient, PlatformStream};
use crate::error::DeployError;
use crate::model::{
    AppState, ApplicationDetail, PushSpec, ServiceInstanceSummary, ServiceOffering, ServicePlan,
};
use async_trait::async_trait;
use futures::{stream, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Op {
    ListServiceInstances,
    ListServiceOfferings,
    CreateServiceInstance,
    PushApplication,
    GetApplication,
    BindService,
    RestartApplication,
}

#[derive(Debug, Default)]
struct State {
    instances: Vec<String>,
    offerings: Vec<ServiceOffering>,
    apps: HashMap<String, AppState>,
    bindings: HashSet<(String, String)>,
    bind_requests: Vec<(String, String)>,
    calls: Vec<Op>,
    created: Vec<(String, String, String)>,
    pushed: Vec<PushSpec>,
    failures: HashMap<Op, DeployError>,
    hide_created_instances: bool,
    rename_pushed_app_to: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FakePlatform {
    state: Arc<Mutex<State>>,
}

impl FakePlatform {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub(crate) fn with_offering(self, label: &str, plans: &[(&str, bool)]) -> Self {
        self.lock().offerings.push(ServiceOffering {
            label: label.into(),
            plans: plans
                .iter()
                .map(|(name, is_free)| ServicePlan {
                    name: (*name).into(),
                    is_free: *is_free,
                })
                .collect(),
        });
        self
    }

    pub(crate) fn with_instance(self, name: &str) -> Self {
        self.lock().instances.push(name.into());
        self
    }

    pub(crate) fn with_app(self, name: &str, state: AppState) -> Self {
        self.lock().apps.insert(name.into(), state);
        self
    }

    pub(crate) fn with_binding(self, app: &str, instance: &str) -> Self {
        self.lock().bindings.insert((app.into(), instance.into()));
        self
    }

    /// Make `op` fail with `err` every time it is invoked.
    pub(crate) fn failing(self, op: Op, err: DeployError) -> Self {
        self.lock().failures.insert(op, err);
        self
    }

    /// Accept creation requests without the instance ever becoming visible.
    pub(crate) fn hiding_created_instances(self) -> Self {
        self.lock().hide_created_instances = true;
        self
    }

    /// Register pushed apps under a different name than requested.
    pub(crate) fn renaming_pushed_app(self, name: &str) -> Self {
        self.lock().rename_pushed_app_to = Some(name.into());
        self
    }

    pub(crate) fn calls(&self) -> Vec<Op> {
        self.lock().calls.clone()
    }

    pub(crate) fn count(&self, op: Op) -> usize {
        self.lock().calls.iter().filter(|c| **c == op).count()
    }

    pub(crate) fn created(&self) -> Vec<(String, String, String)> {
        self.lock().created.clone()
    }

    pub(crate) fn pushed(&self) -> Vec<PushSpec> {
        self.lock().pushed.clone()
    }

    pub(crate) fn app_state(&self, name: &str) -> Option<AppState> {
        self.lock().apps.get(name).copied()
    }

    /// `(app, instance)` exactly as passed to `bind_service`.
    pub(crate) fn bind_requests(&self) -> Vec<(String, String)> {
        self.lock().bind_requests.clone()
    }

    pub(crate) fn is_bound(&self, app: &str, instance: &str) -> bool {
        self.lock()
            .bindings
            .contains(&(app.to_string(), instance.to_string()))
    }

    fn record(&self, op: Op) -> Result<MutexGuard<'_, State>, DeployError> {
        let mut state = self.lock();
        state.calls.push(op);
        let failure = state.failures.get(&op).cloned();
        match failure {
            Some(err) => Err(err),
            None => Ok(state),
        }
    }
}

fn not_found(what: &str) -> DeployError {
    DeployError::platform_status(404, format!("{what} not found"))
}

#[async_trait]
impl PlatformClient for FakePlatform {
    fn list_service_instances(&self) -> PlatformStream<'_, ServiceInstanceSummary> {
        match self.record(Op::ListServiceInstances) {
            Ok(state) => {
                let items: Vec<_> = state
                    .instances
                    .iter()
                    .map(|name| Ok(ServiceInstanceSummary { name: name.clone() }))
                    .collect();
                stream::iter(items).boxed()
            }
            Err(e) => stream::iter(vec![Err(e)]).boxed(),
        }
    }

    fn list_service_offerings(&self) -> PlatformStream<'_, ServiceOffering> {
        match self.record(Op::ListServiceOfferings) {
            Ok(state) => {
                let items: Vec<_> = state.offerings.iter().cloned().map(Ok).collect();
                stream::iter(items).boxed()
            }
            Err(e) => stream::iter(vec![Err(e)]).boxed(),
        }
    }

    async fn create_service_instance(
        &self,
        offering_label: &str,
        plan_name: &str,
        instance_name: &str,
    ) -> Result<(), DeployError> {
        let mut state = self.record(Op::CreateServiceInstance)?;
        let plan_exists = state
            .offerings
            .iter()
            .filter(|o| o.label == offering_label)
            .any(|o| o.plans.iter().any(|p| p.name == plan_name));
        if !plan_exists {
            return Err(not_found(&format!("plan '{plan_name}'")));
        }
        state.created.push((
            offering_label.into(),
            plan_name.into(),
            instance_name.into(),
        ));
        if !state.hide_created_instances {
            state.instances.push(instance_name.into());
        }
        Ok(())
    }

    async fn push_application(&self, spec: &PushSpec) -> Result<(), DeployError> {
        let mut state = self.record(Op::PushApplication)?;
        state.pushed.push(spec.clone());
        let name = state
            .rename_pushed_app_to
            .clone()
            .unwrap_or_else(|| spec.application_name.clone());
        let app_state = if spec.defer_start {
            AppState::Stopped
        } else {
            AppState::Started
        };
        state.apps.insert(name, app_state);
        Ok(())
    }

    async fn get_application(&self, app_name: &str) -> Result<ApplicationDetail, DeployError> {
        let state = self.record(Op::GetApplication)?;
        // Stands in for a platform that answers with whatever it registered.
        let (name, app_state) = match state.rename_pushed_app_to.as_deref() {
            Some(renamed) => state.apps.get_key_value(renamed),
            None => state.apps.get_key_value(app_name),
        }
        .ok_or_else(|| not_found(&format!("application '{app_name}'")))?;
        Ok(ApplicationDetail {
            name: name.clone(),
            state: *app_state,
        })
    }

    async fn bind_service(&self, app_name: &str, instance_name: &str) -> Result<(), DeployError> {
        let mut state = self.record(Op::BindService)?;
        state
            .bind_requests
            .push((app_name.to_string(), instance_name.to_string()));
        if !state.apps.contains_key(app_name) {
            return Err(not_found(&format!("application '{app_name}'")));
        }
        let instance = state
            .instances
            .iter()
            .find(|i| i.eq_ignore_ascii_case(instance_name))
            .cloned()
            .ok_or_else(|| not_found(&format!("service instance '{instance_name}'")))?;
        if !state.bindings.insert((app_name.to_string(), instance)) {
            return Err(DeployError::BindConflict {
                app: app_name.into(),
                instance: instance_name.into(),
            });
        }
        Ok(())
    }

    async fn restart_application(&self, app_name: &str) -> Result<(), DeployError> {
        let mut state = self.record(Op::RestartApplication)?;
        match state.apps.get_mut(app_name) {
            Some(app_state) => {
                *app_state = AppState::Started;
                Ok(())
            }
            None => Err(not_found(&format!("application '{app_name}'"))),
        }
    }
}
