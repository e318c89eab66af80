use std::time::Duration;

use dockercfg_reaper::{
    annotations::{SERVICE_ACCOUNT_NAME_KEY, SERVICE_ACCOUNT_UID_KEY, TOKEN_SECRET_NAME_KEY},
    config::ControllerConfig,
};
use k8s_openapi::api::core::v1::{LocalObjectReference, Namespace, ObjectReference, Secret, ServiceAccount};
use kube::{
    Api, Client, ResourceExt,
    api::{DeleteParams, Patch, PatchParams},
    config::KubeConfigOptions,
};
use tokio::{sync::OnceCell, time::sleep};
use tokio_retry2::{Retry, RetryError, strategy::FixedInterval};

const NAMESPACE: &str = "reaper-test";

static ONCE_CLIENT: OnceCell<anyhow::Result<Client>> = OnceCell::const_new();

async fn init() -> &'static Client {
    async fn init_fun() -> anyhow::Result<Client> {
        tracing_subscriber::fmt().init();

        let options = KubeConfigOptions::default();
        let config = kube::Config::from_kubeconfig(&options).await?;

        let cluster_host = config.cluster_url.host().expect("Cluster URL has host");
        if !["localhost", "127.0.0.1"].contains(&cluster_host) {
            panic!("Danger! Cluster URL isn't local.");
        }

        let client = Client::try_from(config)?;

        let namespace = serde_yaml::from_str::<Namespace>(include_str!("./manifests/namespace.yaml"))?;
        Api::<Namespace>::all(client.clone())
            .patch(
                &namespace.name_any(),
                &PatchParams::apply("test"),
                &Patch::Apply(namespace.clone()),
            )
            .await?;

        tokio::spawn(dockercfg_reaper::run(ControllerConfig::default()));

        // Give the watcher time to finish its initial list
        sleep(Duration::from_secs(5)).await;

        Ok(client)
    }

    ONCE_CLIENT.get_or_init(init_fun).await.as_ref().unwrap()
}

/// Names of one service account's objects, suffixed so tests don't collide.
struct Fixture {
    service_account: String,
    dockercfg: String,
    other_dockercfg: String,
    token: String,
}

impl Fixture {
    fn new(suffix: &str) -> Self {
        Self {
            service_account: format!("builder-{suffix}"),
            dockercfg: format!("builder-{suffix}-dockercfg-a"),
            other_dockercfg: format!("builder-{suffix}-dockercfg-b"),
            token: format!("builder-{suffix}-token-a"),
        }
    }
}

async fn apply<K>(api: &Api<K>, object: K) -> K
where
    K: kube::Resource + Clone + serde::Serialize + serde::de::DeserializeOwned + std::fmt::Debug,
{
    api.patch(
        &object.name_any(),
        &PatchParams::apply("test"),
        &Patch::Apply(object.clone()),
    )
    .await
    .expect("Unable to apply manifest")
}

async fn setup_manifests(client: &Client, fixture: &Fixture) -> ServiceAccount {
    let sa_api = Api::<ServiceAccount>::namespaced(client.clone(), NAMESPACE);
    let secret_api = Api::<Secret>::namespaced(client.clone(), NAMESPACE);

    let mut sa = serde_yaml::from_str::<ServiceAccount>(include_str!("./manifests/serviceaccount.yaml"))
        .expect("Unable to deserialize ServiceAccount manifest");
    sa.metadata.name = Some(fixture.service_account.clone());
    sa.secrets = Some(vec![
        ObjectReference {
            name: Some(fixture.dockercfg.clone()),
            ..ObjectReference::default()
        },
        ObjectReference {
            name: Some(fixture.other_dockercfg.clone()),
            ..ObjectReference::default()
        },
    ]);
    sa.image_pull_secrets = Some(vec![LocalObjectReference {
        name: fixture.dockercfg.clone(),
    }]);
    let sa = apply(&sa_api, sa).await;

    let mut token = serde_yaml::from_str::<Secret>(include_str!("./manifests/token-secret.yaml"))
        .expect("Unable to deserialize token Secret manifest");
    token.metadata.name = Some(fixture.token.clone());
    apply(&secret_api, token).await;

    let mut dockercfg =
        serde_yaml::from_str::<Secret>(include_str!("./manifests/dockercfg-secret.yaml"))
            .expect("Unable to deserialize dockercfg Secret manifest");
    dockercfg.metadata.name = Some(fixture.dockercfg.clone());
    let annotations = dockercfg.annotations_mut();
    annotations.insert(SERVICE_ACCOUNT_NAME_KEY.to_owned(), fixture.service_account.clone());
    annotations.insert(SERVICE_ACCOUNT_UID_KEY.to_owned(), sa.uid().expect("ServiceAccount has a UID"));
    annotations.insert(TOKEN_SECRET_NAME_KEY.to_owned(), fixture.token.clone());
    apply(&secret_api, dockercfg).await;

    sa
}

async fn delete_secret(client: &Client, name: &str) {
    Api::<Secret>::namespaced(client.clone(), NAMESPACE)
        .delete(name, &DeleteParams::default())
        .await
        .expect("Unable to delete Secret");
}

async fn validate_token_deleted(secret_api: &Api<Secret>, name: &str) -> Result<(), RetryError<()>> {
    match secret_api.get(name).await {
        Ok(_) => Err(RetryError::transient(())),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(e) => panic!("Unable to get secret: {}", e),
    }
}

async fn validate_references_removed(
    sa_api: &Api<ServiceAccount>,
    fixture: &Fixture,
) -> Result<(), RetryError<()>> {
    let sa = sa_api
        .get(&fixture.service_account)
        .await
        .expect("Unable to get ServiceAccount");

    let secrets: Vec<_> = sa.secrets.iter().flatten().filter_map(|r| r.name.clone()).collect();
    let pull_secrets: Vec<_> = sa.image_pull_secrets.iter().flatten().map(|r| r.name.clone()).collect();

    if secrets.contains(&fixture.dockercfg) || pull_secrets.contains(&fixture.dockercfg) {
        return Err(RetryError::transient(()));
    }

    assert_eq!(secrets, [fixture.other_dockercfg.clone()]);
    assert!(pull_secrets.is_empty());
    Ok(())
}

fn retry_strategy() -> impl Iterator<Item = Duration> + Clone {
    FixedInterval::from_millis(500).take(20)
}

#[tokio::test]
#[ignore = "needs a local k3s cluster"]
async fn deleted_dockercfg_is_unlinked() {
    let client = init().await;
    let fixture = Fixture::new("unlink");
    setup_manifests(client, &fixture).await;

    delete_secret(client, &fixture.dockercfg).await;

    let sa_api = Api::<ServiceAccount>::namespaced(client.clone(), NAMESPACE);
    let secret_api = Api::<Secret>::namespaced(client.clone(), NAMESPACE);

    Retry::spawn(retry_strategy(), async || -> Result<(), RetryError<()>> {
        validate_references_removed(&sa_api, &fixture).await?;
        validate_token_deleted(&secret_api, &fixture.token).await
    })
    .await
    .expect("References to deleted dockercfg secret not removed");
}

#[tokio::test]
#[ignore = "needs a local k3s cluster"]
async fn token_removed_when_service_account_is_gone() {
    let client = init().await;
    let fixture = Fixture::new("orphan");
    setup_manifests(client, &fixture).await;

    Api::<ServiceAccount>::namespaced(client.clone(), NAMESPACE)
        .delete(&fixture.service_account, &DeleteParams::default())
        .await
        .expect("Unable to delete ServiceAccount");
    delete_secret(client, &fixture.dockercfg).await;

    let secret_api = Api::<Secret>::namespaced(client.clone(), NAMESPACE);

    Retry::spawn(retry_strategy(), async || -> Result<(), RetryError<()>> {
        validate_token_deleted(&secret_api, &fixture.token).await
    })
    .await
    .expect("Token secret not deleted");
}
