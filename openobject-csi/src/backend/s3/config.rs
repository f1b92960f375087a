//! Object store credentials and endpoint handling.

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};

use url::{Host, Url};

use crate::backend::Secrets;
use crate::error::{Error, Result};

pub const SECRET_ENDPOINT: &str = "endpoint";
pub const SECRET_ACCESS_KEY_ID: &str = "accessKeyID";
pub const SECRET_SECRET_ACCESS_KEY: &str = "secretAccessKey";
pub const SECRET_REGION: &str = "region";
pub const SECRET_BUCKET: &str = "bucket";

const DEFAULT_REGION: &str = "us-east-1";

/// Connection settings for an S3-compatible object store.
#[derive(Clone, PartialEq, Eq)]
pub struct S3Config {
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    /// Root bucket holding every storage unit.
    pub bucket: String,
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .finish()
    }
}

impl S3Config {
    /// Read settings from request secrets.
    ///
    /// Returns `None` for an empty secret map, which is what RPCs that carry
    /// no credentials provide. A partial map is an error.
    pub fn from_secrets(secrets: &Secrets) -> Result<Option<Self>> {
        if secrets.is_empty() {
            return Ok(None);
        }

        let get = |key: &'static str| {
            secrets
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or(Error::MissingSecret(key))
        };

        let endpoint = get(SECRET_ENDPOINT)?;
        Url::parse(&endpoint).map_err(|e| Error::InvalidSecret {
            key: SECRET_ENDPOINT,
            reason: e.to_string(),
        })?;

        Ok(Some(Self {
            endpoint,
            access_key_id: get(SECRET_ACCESS_KEY_ID)?,
            secret_access_key: get(SECRET_SECRET_ACCESS_KEY)?,
            region: get(SECRET_REGION).unwrap_or_else(|_| DEFAULT_REGION.to_string()),
            bucket: get(SECRET_BUCKET)?,
        }))
    }

    /// Contents of an s3fs password file.
    pub fn passwd_line(&self) -> String {
        format!("{}:{}\n", self.access_key_id, self.secret_access_key)
    }
}

/// Rewrite `endpoint` so its host is an IP address.
///
/// The mount runs in the host network namespace, where cluster DNS names do
/// not resolve.
pub async fn resolve_endpoint(endpoint: &str) -> Result<String> {
    let invalid = |reason: String| Error::InvalidSecret {
        key: SECRET_ENDPOINT,
        reason,
    };
    let url = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| invalid(format!("no port for scheme {}", url.scheme())))?;

    let addr = match url.host() {
        Some(Host::Ipv4(ip)) => SocketAddr::new(IpAddr::V4(ip), port),
        Some(Host::Ipv6(ip)) => SocketAddr::new(IpAddr::V6(ip), port),
        Some(Host::Domain(host)) => {
            let resolve_err = |source| Error::Resolve {
                host: host.to_string(),
                source,
            };
            tokio::net::lookup_host((host, port))
                .await
                .map_err(resolve_err)?
                .next()
                .ok_or_else(|| {
                    resolve_err(io::Error::new(io::ErrorKind::NotFound, "no addresses"))
                })?
        }
        None => return Err(invalid("missing host".to_string())),
    };

    // SocketAddr brackets IPv6 addresses.
    Ok(format!("{}://{addr}", url.scheme()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets(pairs: &[(&str, &str)]) -> Secrets {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn full() -> Secrets {
        secrets(&[
            (SECRET_ENDPOINT, "http://minio.storage.svc:9000"),
            (SECRET_ACCESS_KEY_ID, "AKIAEXAMPLE"),
            (SECRET_SECRET_ACCESS_KEY, "s3cr3t"),
            (SECRET_BUCKET, "volumes"),
        ])
    }

    #[test]
    fn empty_secrets_mean_no_config() {
        assert!(S3Config::from_secrets(&Secrets::new()).unwrap().is_none());
    }

    #[test]
    fn full_secrets_parse_with_default_region() {
        let config = S3Config::from_secrets(&full()).unwrap().unwrap();
        assert_eq!(config.bucket, "volumes");
        assert_eq!(config.region, DEFAULT_REGION);
        assert_eq!(config.passwd_line(), "AKIAEXAMPLE:s3cr3t\n");
    }

    #[test]
    fn partial_secrets_name_the_missing_key() {
        let mut partial = full();
        partial.remove(SECRET_SECRET_ACCESS_KEY);
        let err = S3Config::from_secrets(&partial).unwrap_err();
        assert!(matches!(err, Error::MissingSecret(SECRET_SECRET_ACCESS_KEY)));
    }

    #[test]
    fn unparsable_endpoint_is_rejected() {
        let mut bad = full();
        bad.insert(SECRET_ENDPOINT.to_string(), "not a url".to_string());
        assert!(matches!(
            S3Config::from_secrets(&bad),
            Err(Error::InvalidSecret { .. })
        ));
    }

    #[test]
    fn debug_redacts_secret_key() {
        let config = S3Config::from_secrets(&full()).unwrap().unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("s3cr3t"));
        assert!(debug.contains("<redacted>"));
    }

    #[tokio::test]
    async fn resolve_keeps_ip_literals() {
        assert_eq!(
            resolve_endpoint("http://10.0.0.7:9000").await.unwrap(),
            "http://10.0.0.7:9000"
        );
        assert_eq!(
            resolve_endpoint("https://[fd00::7]").await.unwrap(),
            "https://[fd00::7]:443"
        );
    }

    #[tokio::test]
    async fn resolve_looks_up_host_names() {
        let resolved = resolve_endpoint("http://localhost:9000").await.unwrap();
        assert!(
            resolved == "http://127.0.0.1:9000" || resolved == "http://[::1]:9000",
            "unexpected {resolved}"
        );
    }
}
