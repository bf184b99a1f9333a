use std::path::PathBuf;
use std::time::Duration;

use error_stack::Report;
use error_stack::ResultExt;
use kube::config::KubeConfigOptions;
use kube::config::Kubeconfig;
use kube::Client;
use kube::Config;

use crate::infrastructure::k8s::KubernetesError;

const PROBE_BASE_DELAY: Duration = Duration::from_secs(1);

/// Build a client and make sure the API server answers before returning it.
pub async fn init_kube_client(
    kubeconfig: Option<PathBuf>,
    startup_retries: u32,
) -> Result<Client, Report<KubernetesError>> {
    let config = load_config(kubeconfig).await?;
    let server = config.cluster_url.to_string();

    let client = Client::try_from(config).change_context(KubernetesError::ConnectionFailed {
        message: format!("Failed to create Kubernetes client for {server}"),
    })?;

    wait_for_api(&client, &server, startup_retries).await?;
    Ok(client)
}

async fn load_config(kubeconfig: Option<PathBuf>) -> Result<Config, Report<KubernetesError>> {
    match kubeconfig {
        Some(kubeconfig_path) => {
            let kubeconfig = Kubeconfig::read_from(&kubeconfig_path).change_context(
                KubernetesError::ConnectionFailed {
                    message: format!(
                        "Failed to read kubeconfig file: {}",
                        kubeconfig_path.display()
                    ),
                },
            )?;

            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .change_context(KubernetesError::ConnectionFailed {
                    message: format!(
                        "Failed to create config from kubeconfig: {}",
                        kubeconfig_path.display()
                    ),
                })
        }
        // in-cluster service account or ~/.kube/config
        None => Config::infer()
            .await
            .change_context(KubernetesError::ConnectionFailed {
                message: "Failed to infer Kubernetes configuration".to_string(),
            }),
    }
}

/// Probe the API server until it answers, waiting 1s, 2s, 4s... between
/// attempts. Gives up after `retries` probes.
pub async fn wait_for_api(
    client: &Client,
    server: &str,
    retries: u32,
) -> Result<(), Report<KubernetesError>> {
    let retries = retries.max(1);
    let mut last_error = None;

    for attempt in 0..retries {
        match client.apiserver_version().await {
            Ok(info) => {
                tracing::info!(
                    server,
                    git_version = %info.git_version,
                    "Connected to Kubernetes API server"
                );
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(
                    server,
                    attempt = attempt + 1,
                    retries,
                    "Kubernetes API server not reachable: {e}"
                );
                last_error = Some(e.to_string());
            }
        }
        if attempt + 1 < retries {
            tokio::time::sleep(probe_delay(attempt)).await;
        }
    }

    let report = Report::new(KubernetesError::ConnectionFailed {
        message: format!("Kubernetes API server {server} unreachable after {retries} attempts"),
    });
    Err(match last_error {
        Some(e) => report.attach_printable(e),
        None => report,
    })
}

fn probe_delay(attempt: u32) -> Duration {
    PROBE_BASE_DELAY.saturating_mul(1u32 << attempt.min(16))
}
