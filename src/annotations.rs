use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;

/// Name of the service account that owns a secret.
pub const SERVICE_ACCOUNT_NAME_KEY: &str = "kubernetes.io/service-account.name";
/// UID of the service account that owns a secret.
pub const SERVICE_ACCOUNT_UID_KEY: &str = "kubernetes.io/service-account.uid";
/// Token secret minted alongside a dockercfg secret.
pub const TOKEN_SECRET_NAME_KEY: &str = "openshift.io/token-secret.name";

pub const DOCKERCFG_SECRET_TYPE: &str = "kubernetes.io/dockercfg";

/// Server-side filter selecting only dockercfg secrets.
pub fn dockercfg_field_selector() -> String {
    format!("type={DOCKERCFG_SECRET_TYPE}")
}

/// Returns the backing token secret's name, or `None` when the secret isn't
/// one of ours.
pub fn token_secret_name(secret: &Secret) -> Option<&str> {
    secret
        .annotations()
        .get(TOKEN_SECRET_NAME_KEY)
        .map(String::as_str)
}

/// Identity of the service account that created a dockercfg secret.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackReference {
    pub name: String,
    pub uid: String,
}

impl BackReference {
    pub fn from_secret(secret: &Secret) -> Option<Self> {
        let annotations = secret.annotations();
        let name = annotations.get(SERVICE_ACCOUNT_NAME_KEY)?;
        let uid = annotations.get(SERVICE_ACCOUNT_UID_KEY)?;
        if name.is_empty() || uid.is_empty() {
            return None;
        }

        Some(Self {
            name: name.to_owned(),
            uid: uid.to_owned(),
        })
    }
}
