//! Cloud Foundry v3 REST client.

use super::{PlatformClient, PlatformStream};
use crate::error::DeployError;
use crate::model::{
    AppState, ApplicationDetail, DeployConfig, PushSpec, ServiceInstanceSummary, ServiceOffering,
    ServicePlan,
};
use async_trait::async_trait;
use futures::{future, stream, StreamExt, TryFutureExt, TryStreamExt};
use rand::{distributions::Alphanumeric, Rng};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, LOCATION};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Method, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

const PAGE_SIZE: &str = "100";
const RANDOM_ROUTE_SUFFIX_LEN: usize = 8;

#[derive(Deserialize)]
struct Page<T> {
    pagination: Pagination,
    resources: Vec<T>,
}

#[derive(Deserialize)]
struct Pagination {
    next: Option<Link>,
}

#[derive(Deserialize)]
struct Link {
    href: String,
}

#[derive(Deserialize)]
struct Guid {
    guid: String,
}

/// Any resource where only guid and name matter (instances, offerings, domains).
#[derive(Deserialize)]
struct Named {
    guid: String,
    name: String,
}

#[derive(Deserialize)]
struct PlanResource {
    name: String,
    #[serde(default)]
    free: bool,
    relationships: PlanRelationships,
}

#[derive(Deserialize)]
struct PlanRelationships {
    service_offering: ToOne,
}

#[derive(Deserialize)]
struct ToOne {
    data: Guid,
}

#[derive(Deserialize)]
struct AppResource {
    guid: String,
    name: String,
    state: AppState,
}

#[derive(Deserialize)]
struct PackageResource {
    guid: String,
    state: String,
}

#[derive(Deserialize)]
struct BuildResource {
    guid: String,
    state: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    droplet: Option<Guid>,
}

#[derive(Deserialize)]
struct JobResource {
    guid: String,
    state: String,
    #[serde(default)]
    errors: Vec<ApiErrorEntry>,
}

#[derive(Deserialize, Default)]
struct ApiErrors {
    #[serde(default)]
    errors: Vec<ApiErrorEntry>,
}

#[derive(Deserialize)]
struct ApiErrorEntry {
    #[serde(default)]
    title: String,
    #[serde(default)]
    detail: String,
}

/// HTTP client for a Cloud Foundry API endpoint, scoped to a single space.
#[derive(Clone)]
pub struct CloudFoundryClient {
    http: reqwest::Client,
    api: Url,
    space_guid: String,
    operation_timeout: Duration,
    poll_interval: Duration,
}

impl CloudFoundryClient {
    pub fn new(cfg: &DeployConfig) -> Result<Self, DeployError> {
        let api = Url::parse(&cfg.api_url).map_err(|e| {
            DeployError::platform(format!("invalid API URL '{}': {e}", cfg.api_url))
        })?;

        let mut headers = HeaderMap::new();
        if let Some(token) = cfg.token.as_deref() {
            let token = token.trim();
            let value = if token.to_ascii_lowercase().starts_with("bearer ") {
                token.to_string()
            } else {
                format!("bearer {token}")
            };
            let mut value = HeaderValue::from_str(&value)
                .map_err(|_| DeployError::platform("access token is not a valid header value"))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .default_headers(headers)
            .timeout(cfg.request_timeout)
            .danger_accept_invalid_certs(cfg.skip_tls_verify)
            .build()?;

        Ok(Self {
            http,
            api,
            space_guid: cfg.space_guid.clone(),
            operation_timeout: cfg.operation_timeout,
            poll_interval: cfg.poll_interval,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, DeployError> {
        self.api
            .join(path)
            .map_err(|e| DeployError::platform(format!("invalid endpoint '{path}': {e}")))
    }

    fn list_url(&self, path: &str, filters: &[(&str, &str)]) -> Result<Url, DeployError> {
        let mut url = self.endpoint(path)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("per_page", PAGE_SIZE);
            for (key, value) in filters {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<Response, DeployError> {
        let resp = req.send().await?;
        error_for_status(resp).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, DeployError> {
        debug!(%url, "GET");
        let resp = self.send(self.http.get(url)).await?;
        Ok(resp.json().await?)
    }

    async fn send_json(
        &self,
        method: Method,
        url: Url,
        body: &serde_json::Value,
    ) -> Result<Response, DeployError> {
        debug!(%method, %url, "request");
        self.send(self.http.request(method, url).json(body)).await
    }

    async fn post_action(&self, url: Url) -> Result<Response, DeployError> {
        debug!(%url, "POST action");
        self.send(self.http.post(url)).await
    }

    async fn next_page<T: DeserializeOwned>(
        &self,
        cursor: Option<Result<Url, DeployError>>,
    ) -> Result<Option<(Vec<T>, Option<Result<Url, DeployError>>)>, DeployError> {
        let Some(url) = cursor else {
            return Ok(None);
        };
        let page: Page<T> = self.get_json(url?).await?;
        let next = page.pagination.next.map(|link| {
            Url::parse(&link.href)
                .map_err(|e| DeployError::platform(format!("invalid pagination link: {e}")))
        });
        Ok(Some((page.resources, next)))
    }

    /// Stream every resource of a paginated list, following `pagination.next`.
    fn paginate<'a, T>(&'a self, first: Result<Url, DeployError>) -> PlatformStream<'a, T>
    where
        T: DeserializeOwned + Send + 'a,
    {
        stream::try_unfold(Some(first), move |cursor| self.next_page::<T>(cursor))
            .map_ok(|items| stream::iter(items.into_iter().map(Ok::<T, DeployError>)))
            .try_flatten()
            .boxed()
    }

    /// Re-fetch `url` every poll interval until `settle` reports an end state.
    async fn poll_until<T, F>(&self, url: Url, what: &str, settle: F) -> Result<T, DeployError>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> Option<Result<(), DeployError>>,
    {
        let deadline = Instant::now() + self.operation_timeout;
        loop {
            let resource: T = self.get_json(url.clone()).await?;
            match settle(&resource) {
                Some(Ok(())) => return Ok(resource),
                Some(Err(e)) => return Err(e),
                None if Instant::now() >= deadline => {
                    return Err(DeployError::platform(format!(
                        "timed out after {} waiting for {what}",
                        humantime::format_duration(self.operation_timeout)
                    )));
                }
                None => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }

    async fn await_job(&self, location: Url) -> Result<(), DeployError> {
        self.poll_until::<JobResource, _>(location, "asynchronous job", |job| {
            match job.state.as_str() {
                "COMPLETE" => Some(Ok(())),
                "FAILED" => Some(Err(DeployError::platform(format!(
                    "job {} failed: {}",
                    job.guid,
                    describe_errors(&job.errors)
                )))),
                _ => None,
            }
        })
        .await
        .map(|_| ())
    }

    async fn find_app(&self, name: &str) -> Result<Option<AppResource>, DeployError> {
        let url = self.list_url(
            "/v3/apps",
            &[("names", name), ("space_guids", self.space_guid.as_str())],
        )?;
        let page: Page<AppResource> = self.get_json(url).await?;
        Ok(page.resources.into_iter().next())
    }

    async fn require_app(&self, name: &str) -> Result<AppResource, DeployError> {
        self.find_app(name).await?.ok_or_else(|| {
            DeployError::platform_status(404, format!("application '{name}' not found"))
        })
    }

    /// Instance names match case-insensitively, as in the instance listing.
    async fn instance_guid(&self, name: &str) -> Result<String, DeployError> {
        let url = self.list_url(
            "/v3/service_instances",
            &[("space_guids", self.space_guid.as_str())],
        );
        let mut found: Vec<Named> = self
            .paginate::<Named>(url)
            .try_filter(|r| future::ready(r.name.eq_ignore_ascii_case(name)))
            .try_collect()
            .await?;
        match found.len() {
            0 => Err(DeployError::platform_status(
                404,
                format!("service instance '{name}' not found"),
            )),
            1 => Ok(found.remove(0).guid),
            count => Err(DeployError::AmbiguousServiceInstance {
                name: name.to_string(),
                count,
            }),
        }
    }

    async fn create_app(&self, name: &str) -> Result<AppResource, DeployError> {
        info!(app = name, "creating application");
        let body = json!({
            "name": name,
            "relationships": { "space": { "data": { "guid": self.space_guid } } },
        });
        let resp = self
            .send_json(Method::POST, self.endpoint("/v3/apps")?, &body)
            .await?;
        Ok(resp.json().await?)
    }

    async fn upload_package(&self, app_guid: &str, artifact: &Path) -> Result<String, DeployError> {
        let body = json!({
            "type": "bits",
            "relationships": { "app": { "data": { "guid": app_guid } } },
        });
        let package: Guid = self
            .send_json(Method::POST, self.endpoint("/v3/packages")?, &body)
            .await?
            .json()
            .await?;

        let missing = || DeployError::ArtifactNotFound(artifact.to_path_buf());
        let file = tokio::fs::File::open(artifact).await.map_err(|_| missing())?;
        let len = file.metadata().await.map_err(|_| missing())?.len();
        let file_name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact.zip".into());
        debug!(bytes = len, file = %file_name, "uploading package bits");
        let part = Part::stream_with_length(Body::from(file), len)
            .file_name(file_name)
            .mime_str("application/zip")?;
        let url = self.endpoint(&format!("/v3/packages/{}/upload", package.guid))?;
        self.send(self.http.post(url).multipart(Form::new().part("bits", part)))
            .await?;

        let url = self.endpoint(&format!("/v3/packages/{}", package.guid))?;
        self.poll_until::<PackageResource, _>(url, "package processing", |p| {
            match p.state.as_str() {
                "READY" => Some(Ok(())),
                "FAILED" | "EXPIRED" => Some(Err(DeployError::platform(format!(
                    "package {} is {}",
                    p.guid, p.state
                )))),
                _ => None,
            }
        })
        .await?;
        Ok(package.guid)
    }

    /// Stage a package and return the resulting droplet guid.
    async fn stage(&self, package_guid: &str) -> Result<String, DeployError> {
        let body = json!({ "package": { "guid": package_guid } });
        let build: Guid = self
            .send_json(Method::POST, self.endpoint("/v3/builds")?, &body)
            .await?
            .json()
            .await?;
        info!(build = %build.guid, "staging");

        let url = self.endpoint(&format!("/v3/builds/{}", build.guid))?;
        let staged = self
            .poll_until::<BuildResource, _>(url, "staging", |b| match b.state.as_str() {
                "STAGED" => Some(Ok(())),
                "FAILED" => Some(Err(DeployError::platform(format!(
                    "staging failed: {}",
                    b.error.as_deref().unwrap_or("unknown error")
                )))),
                _ => None,
            })
            .await?;
        staged.droplet.map(|d| d.guid).ok_or_else(|| {
            DeployError::platform(format!("build {} staged without a droplet", staged.guid))
        })
    }

    /// Map a freshly generated route unless the app already has one.
    async fn ensure_random_route(&self, app_guid: &str, app_name: &str) -> Result<(), DeployError> {
        let routes: Page<Guid> = self
            .get_json(self.list_url(&format!("/v3/apps/{app_guid}/routes"), &[])?)
            .await?;
        if !routes.resources.is_empty() {
            debug!(app = app_name, "application already has a route");
            return Ok(());
        }

        let domains: Page<Named> = self
            .get_json(self.list_url("/v3/domains", &[])?)
            .await?;
        let domain = domains
            .resources
            .into_iter()
            .next()
            .ok_or_else(|| DeployError::platform("no domain available for a random route"))?;

        let host = random_host(app_name);
        let body = json!({
            "host": host,
            "relationships": {
                "domain": { "data": { "guid": domain.guid } },
                "space": { "data": { "guid": self.space_guid } },
            },
        });
        let route: Guid = self
            .send_json(Method::POST, self.endpoint("/v3/routes")?, &body)
            .await?
            .json()
            .await?;

        let body = json!({ "destinations": [ { "app": { "guid": app_guid } } ] });
        let url = self.endpoint(&format!("/v3/routes/{}/destinations", route.guid))?;
        self.send_json(Method::POST, url, &body).await?;
        info!(route = %format!("{host}.{}", domain.name), "mapped random route");
        Ok(())
    }
}

#[async_trait]
impl PlatformClient for CloudFoundryClient {
    fn list_service_instances(&self) -> PlatformStream<'_, ServiceInstanceSummary> {
        let url = self.list_url(
            "/v3/service_instances",
            &[("space_guids", self.space_guid.as_str())],
        );
        self.paginate::<Named>(url)
            .map_ok(|r| ServiceInstanceSummary { name: r.name })
            .boxed()
    }

    /// Offerings and plans visible in the space, two paginated listings in
    /// total however many offerings the marketplace has.
    fn list_service_offerings(&self) -> PlatformStream<'_, ServiceOffering> {
        let space = [("space_guids", self.space_guid.as_str())];
        let offerings = self.list_url("/v3/service_offerings", &space);
        let plans = self.list_url("/v3/service_plans", &space);
        async move {
            let (offerings, plans): (Vec<Named>, Vec<PlanResource>) = future::try_join(
                self.paginate::<Named>(offerings).try_collect(),
                self.paginate::<PlanResource>(plans).try_collect(),
            )
            .await?;

            let mut by_offering: HashMap<String, Vec<ServicePlan>> = HashMap::new();
            for plan in plans {
                by_offering
                    .entry(plan.relationships.service_offering.data.guid)
                    .or_default()
                    .push(ServicePlan {
                        name: plan.name,
                        is_free: plan.free,
                    });
            }
            let items = offerings.into_iter().map(move |o| {
                Ok::<_, DeployError>(ServiceOffering {
                    plans: by_offering.remove(&o.guid).unwrap_or_default(),
                    label: o.name,
                })
            });
            Ok::<_, DeployError>(stream::iter(items))
        }
        .try_flatten_stream()
        .boxed()
    }

    async fn create_service_instance(
        &self,
        offering_label: &str,
        plan_name: &str,
        instance_name: &str,
    ) -> Result<(), DeployError> {
        let url = self.list_url(
            "/v3/service_plans",
            &[
                ("names", plan_name),
                ("service_offering_names", offering_label),
                ("space_guids", self.space_guid.as_str()),
            ],
        )?;
        let plans: Page<Guid> = self.get_json(url).await?;
        let plan = plans.resources.into_iter().next().ok_or_else(|| {
            DeployError::platform_status(
                404,
                format!("plan '{plan_name}' of offering '{offering_label}' not found"),
            )
        })?;

        let body = json!({
            "type": "managed",
            "name": instance_name,
            "relationships": {
                "space": { "data": { "guid": self.space_guid } },
                "service_plan": { "data": { "guid": plan.guid } },
            },
        });
        let resp = self
            .send_json(Method::POST, self.endpoint("/v3/service_instances")?, &body)
            .await?;
        let job = accepted_job(&resp);
        match job {
            Some(job) => self.await_job(job).await,
            None => Ok(()),
        }
    }

    async fn push_application(&self, spec: &PushSpec) -> Result<(), DeployError> {
        let name = spec.application_name.as_str();
        let app = match self.find_app(name).await? {
            Some(app) => app,
            None => self.create_app(name).await?,
        };

        let package_guid = self.upload_package(&app.guid, &spec.artifact_path).await?;
        let droplet_guid = self.stage(&package_guid).await?;

        let url = self.endpoint(&format!(
            "/v3/apps/{}/relationships/current_droplet",
            app.guid
        ))?;
        self.send_json(Method::PATCH, url, &json!({ "data": { "guid": droplet_guid } }))
            .await?;

        let url = self.endpoint(&format!("/v3/apps/{}/processes/web/actions/scale", app.guid))?;
        self.send_json(
            Method::POST,
            url,
            &json!({ "instances": spec.replica_count.get() }),
        )
        .await?;

        if spec.use_random_route {
            self.ensure_random_route(&app.guid, name).await?;
        }

        let action = if spec.defer_start {
            (app.state == AppState::Started).then_some("stop")
        } else {
            Some("start")
        };
        if let Some(action) = action {
            let url = self.endpoint(&format!("/v3/apps/{}/actions/{action}", app.guid))?;
            self.post_action(url).await?;
        }
        Ok(())
    }

    async fn get_application(&self, app_name: &str) -> Result<ApplicationDetail, DeployError> {
        let app = self.require_app(app_name).await?;
        Ok(ApplicationDetail {
            name: app.name,
            state: app.state,
        })
    }

    async fn bind_service(&self, app_name: &str, instance_name: &str) -> Result<(), DeployError> {
        let app = self.require_app(app_name).await?;
        let instance_guid = self.instance_guid(instance_name).await?;
        let body = json!({
            "type": "app",
            "relationships": {
                "app": { "data": { "guid": app.guid } },
                "service_instance": { "data": { "guid": instance_guid } },
            },
        });
        let url = self.endpoint("/v3/service_credential_bindings")?;
        let resp = match self.send_json(Method::POST, url, &body).await {
            Ok(resp) => resp,
            Err(DeployError::PlatformApi {
                status: Some(422),
                message,
            }) if is_already_bound(&message) => {
                return Err(DeployError::BindConflict {
                    app: app_name.to_string(),
                    instance: instance_name.to_string(),
                });
            }
            Err(e) => return Err(e),
        };
        let job = accepted_job(&resp);
        match job {
            Some(job) => self.await_job(job).await,
            None => Ok(()),
        }
    }

    async fn restart_application(&self, app_name: &str) -> Result<(), DeployError> {
        let app = self.require_app(app_name).await?;
        let url = self.endpoint(&format!("/v3/apps/{}/actions/restart", app.guid))?;
        self.post_action(url).await?;
        Ok(())
    }
}

async fn error_for_status(resp: Response) -> Result<Response, DeployError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(DeployError::platform_status(
        status.as_u16(),
        api_error_message(&body),
    ))
}

fn api_error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrors>(body) {
        Ok(parsed) if !parsed.errors.is_empty() => describe_errors(&parsed.errors),
        _ => body.trim().to_string(),
    }
}

fn describe_errors(errors: &[ApiErrorEntry]) -> String {
    if errors.is_empty() {
        return "no details".into();
    }
    errors
        .iter()
        .map(|e| format!("{}: {}", e.title, e.detail))
        .collect::<Vec<_>>()
        .join("; ")
}

fn is_already_bound(message: &str) -> bool {
    message.contains("ServiceBindingAppServiceTaken") || message.contains("already bound")
}

/// Job to wait for when the platform accepted a request asynchronously.
fn accepted_job(resp: &Response) -> Option<Url> {
    if resp.status() != StatusCode::ACCEPTED {
        return None;
    }
    resp.headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Url::parse(v).ok())
}

/// `<app>-<suffix>`: lowercase so it is a valid DNS label.
fn random_host(app_name: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RANDOM_ROUTE_SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("{}-{suffix}", app_name.to_ascii_lowercase())
}
