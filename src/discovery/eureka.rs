//! # Eureka Registry Client
//!
//! Speaks the Eureka REST protocol over `reqwest`:
//!
//! | Operation  | Request                                   |
//! |------------|-------------------------------------------|
//! | register   | `POST {url}/apps/{APP}` `{"instance":..}` |
//! | renew      | `PUT {url}/apps/{APP}/{id}?status=UP`     |
//! | deregister | `DELETE {url}/apps/{APP}/{id}`            |
//! | fetch      | `GET {url}/apps`                          |
//!
//! Application names are upper-case on the wire and lower-case as
//! service ids inside the center.

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::core::error::{CenterError, CenterResult};
use crate::core::types::{InstanceStatus, ServiceInstance};
use crate::discovery::client::{DiscoveryClient, LeaseRenewal};

const DATA_CENTER_CLASS: &str = "com.netflix.appinfo.InstanceInfo$DefaultDataCenterInfo";

/// Eureka-compatible registry backend
pub struct EurekaDiscovery {
    client: reqwest::Client,
    base_url: String,
    lease: LeaseInfo,
}

impl EurekaDiscovery {
    pub fn new(
        service_url: &str,
        timeout: Duration,
        lease_renewal_interval: Duration,
        lease_expiration_duration: Duration,
    ) -> CenterResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CenterError::service_discovery(format!("Failed to build registry client: {}", e)))?;

        Ok(Self {
            client,
            base_url: service_url.trim_end_matches('/').to_string(),
            lease: LeaseInfo {
                renewal_interval_in_secs: lease_renewal_interval.as_secs().max(1),
                duration_in_secs: lease_expiration_duration.as_secs().max(1),
            },
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn app_url(&self, instance: &ServiceInstance) -> String {
        format!("{}/apps/{}", self.base_url, instance.service_id.to_ascii_uppercase())
    }

    fn instance_url(&self, instance: &ServiceInstance) -> String {
        format!("{}/{}", self.app_url(instance), instance.instance_id)
    }

    /// Registration payload for one instance
    fn instance_info(&self, instance: &ServiceInstance) -> EurekaInstance {
        let app = instance.service_id.to_ascii_uppercase();
        let (port, secure_port) = if instance.secure {
            (EurekaPort::disabled(80), EurekaPort::enabled(instance.port))
        } else {
            (EurekaPort::enabled(instance.port), EurekaPort::disabled(443))
        };
        let home_page = format!("{}/", instance.base_url());

        EurekaInstance {
            instance_id: Some(instance.instance_id.clone()),
            host_name: instance.host.clone(),
            app,
            ip_addr: Some(
                instance
                    .ip_address
                    .clone()
                    .unwrap_or_else(|| instance.host.clone()),
            ),
            status: Some(instance.status.as_str().to_string()),
            port: Some(port),
            secure_port: Some(secure_port),
            vip_address: Some(instance.service_id.clone()),
            secure_vip_address: Some(instance.service_id.clone()),
            home_page_url: Some(home_page.clone()),
            status_page_url: Some(format!("{}actuator/info", home_page)),
            health_check_url: Some(format!("{}actuator/health", home_page)),
            data_center_info: Some(DataCenterInfo {
                class: DATA_CENTER_CLASS.to_string(),
                name: "MyOwn".to_string(),
            }),
            lease_info: Some(self.lease.clone()),
            metadata: instance
                .metadata
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        }
    }
}

fn registry_error(operation: &str, err: reqwest::Error) -> CenterError {
    CenterError::service_discovery(format!("Registry {} failed: {}", operation, err))
}

#[async_trait]
impl DiscoveryClient for EurekaDiscovery {
    fn description(&self) -> &'static str {
        "eureka"
    }

    async fn register(&self, instance: &ServiceInstance) -> CenterResult<()> {
        let body = json!({ "instance": self.instance_info(instance) });

        let response = self
            .client
            .post(self.app_url(instance))
            .header(ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| registry_error("registration", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CenterError::service_discovery(format!(
                "Registration of {} rejected with status {}",
                instance.instance_id, status
            )));
        }

        info!(
            instance_id = %instance.instance_id,
            registry = %self.base_url,
            "Registered with Eureka"
        );
        Ok(())
    }

    async fn renew(&self, instance: &ServiceInstance) -> CenterResult<LeaseRenewal> {
        let response = self
            .client
            .put(self.instance_url(instance))
            .query(&[("status", instance.status.as_str())])
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| registry_error("heartbeat", e))?;

        match response.status() {
            status if status.is_success() => Ok(LeaseRenewal::Renewed),
            StatusCode::NOT_FOUND => Ok(LeaseRenewal::UnknownInstance),
            status => Err(CenterError::service_discovery(format!(
                "Heartbeat for {} rejected with status {}",
                instance.instance_id, status
            ))),
        }
    }

    async fn deregister(&self, instance: &ServiceInstance) -> CenterResult<()> {
        let response = self
            .client
            .delete(self.instance_url(instance))
            .send()
            .await
            .map_err(|e| registry_error("deregistration", e))?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            info!(instance_id = %instance.instance_id, "Deregistered from Eureka");
            Ok(())
        } else {
            Err(CenterError::service_discovery(format!(
                "Deregistration of {} rejected with status {}",
                instance.instance_id, status
            )))
        }
    }

    async fn fetch_instances(&self) -> CenterResult<Vec<ServiceInstance>> {
        let response = self
            .client
            .get(format!("{}/apps", self.base_url))
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| registry_error("fetch", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CenterError::service_discovery(format!(
                "Registry fetch returned status {}",
                status
            )));
        }

        let envelope: ApplicationsEnvelope = response
            .json()
            .await
            .map_err(|e| registry_error("fetch", e))?;

        let instances: Vec<ServiceInstance> = envelope
            .applications
            .application
            .into_vec()
            .into_iter()
            .flat_map(|application| {
                let name = application.name;
                application
                    .instance
                    .into_vec()
                    .into_iter()
                    .map(move |instance| instance.into_service_instance(&name))
            })
            .collect();

        debug!(count = instances.len(), "Fetched instances from Eureka");
        Ok(instances)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeaseInfo {
    renewal_interval_in_secs: u64,
    duration_in_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DataCenterInfo {
    #[serde(rename = "@class")]
    class: String,
    name: String,
}

/// `{"$": 8080, "@enabled": "true"}`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EurekaPort {
    #[serde(rename = "$", deserialize_with = "lenient_port")]
    port: u16,
    #[serde(rename = "@enabled", default)]
    enabled: Value,
}

impl EurekaPort {
    fn enabled(port: u16) -> Self {
        Self {
            port,
            enabled: Value::String("true".to_string()),
        }
    }

    fn disabled(port: u16) -> Self {
        Self {
            port,
            enabled: Value::String("false".to_string()),
        }
    }

    fn is_enabled(&self) -> bool {
        match &self.enabled {
            Value::Bool(enabled) => *enabled,
            Value::String(enabled) => enabled.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }
}

fn lenient_port<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u16::try_from(n).ok())
            .ok_or_else(|| serde::de::Error::custom(format!("invalid port {}", n))),
        Value::String(s) => s
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid port {}", s))),
        other => Err(serde::de::Error::custom(format!("invalid port {}", other))),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EurekaInstance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    instance_id: Option<String>,
    host_name: String,
    app: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ip_addr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    port: Option<EurekaPort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    secure_port: Option<EurekaPort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    vip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    secure_vip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    home_page_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status_page_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    health_check_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data_center_info: Option<DataCenterInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lease_info: Option<LeaseInfo>,
    #[serde(default)]
    metadata: HashMap<String, Value>,
}

impl EurekaInstance {
    fn into_service_instance(self, application: &str) -> ServiceInstance {
        let app = if application.is_empty() { &self.app } else { application };

        // Plain port wins when both are enabled
        let (port, secure) = match (&self.port, &self.secure_port) {
            (Some(port), _) if port.is_enabled() => (port.port, false),
            (_, Some(secure)) if secure.is_enabled() => (secure.port, true),
            (Some(port), _) => (port.port, false),
            _ => (80, false),
        };

        let instance_id = self
            .instance_id
            .clone()
            .unwrap_or_else(|| format!("{}:{}:{}", self.host_name, app.to_ascii_lowercase(), port));

        let mut instance = ServiceInstance::new(instance_id, app, self.host_name, port);
        instance.secure = secure;
        instance.ip_address = self.ip_addr;
        instance.status = self
            .status
            .as_deref()
            .map(InstanceStatus::parse)
            .unwrap_or_default();
        instance.metadata = self
            .metadata
            .into_iter()
            .filter(|(key, _)| !key.starts_with('@'))
            .map(|(key, value)| {
                let value = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (key, value)
            })
            .collect();
        instance
    }
}

#[derive(Debug, Deserialize)]
struct ApplicationsEnvelope {
    applications: Applications,
}

#[derive(Debug, Deserialize)]
struct Applications {
    #[serde(default)]
    application: OneOrMany<Application>,
}

#[derive(Debug, Deserialize)]
struct Application {
    name: String,
    #[serde(default)]
    instance: OneOrMany<EurekaInstance>,
}

/// Eureka collapses single-element lists into a bare object
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}
