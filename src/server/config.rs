use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Deserialize, Debug, Clone)]
pub struct ServerConfig {
    pub jwt_secret: String,

    /// Secret the credential vault derives its AES key from.
    pub vault_secret: String,

    /// Externally reachable base URL of this server; per-bot webhook
    /// endpoints are registered under it.
    pub public_base_url: String,

    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Which provisioning backend to run: "graphql", "rest", "local" or
    /// "manual". Falls back to "manual" when no orchestrator token is set.
    #[serde(default = "default_provisioner")]
    pub provisioner: String,

    #[serde(default)]
    pub orchestrator_token: Option<String>,

    #[serde(default = "default_orchestrator_url")]
    pub orchestrator_url: String,

    /// Orchestrator project the worker services are created under.
    #[serde(default)]
    pub orchestrator_project: Option<String>,

    /// Source template the orchestrator builds worker services from.
    #[serde(default = "default_worker_template")]
    pub worker_template: String,

    #[serde(default = "default_worker_template_dir")]
    pub worker_template_dir: String,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialServerConfig {
    jwt_secret: Option<String>,
    vault_secret: Option<String>,
    public_base_url: Option<String>,
    listen_addr: Option<String>,
    provisioner: Option<String>,
    orchestrator_token: Option<String>,
    orchestrator_url: Option<String>,
    orchestrator_project: Option<String>,
    worker_template: Option<String>,
    worker_template_dir: Option<String>,
    log_dir: Option<String>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_provisioner() -> String {
    "manual".to_string()
}

fn default_orchestrator_url() -> String {
    "https://backboard.railway.app/graphql/v2".to_string()
}

fn default_worker_template() -> String {
    "botforge/worker-template".to_string()
}

fn default_worker_template_dir() -> String {
    "worker".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl ServerConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self, String> {
        dotenv::dotenv().ok();

        // 1. Load from file (optional)
        let file_config: PartialServerConfig = if let Some(path_str) = config_path {
            let path = Path::new(path_str);
            if path.exists() {
                let contents = fs::read_to_string(path)
                    .map_err(|e| format!("Failed to read config file at {path:?}: {e}"))?;
                toml::from_str(&contents)
                    .map_err(|e| format!("Failed to parse TOML from config file at {path:?}: {e}"))?
            } else {
                PartialServerConfig::default()
            }
        } else {
            PartialServerConfig::default()
        };

        // 2. Load from environment variables
        let env_config: PartialServerConfig = envy::from_env::<PartialServerConfig>()
            .map_err(|e| format!("Failed to load config from environment: {e}"))?;

        // 3. Merge: environment overrides file
        let final_config = ServerConfig {
            jwt_secret: env_config
                .jwt_secret
                .or(file_config.jwt_secret)
                .ok_or("JWT_SECRET is required")?,
            vault_secret: env_config
                .vault_secret
                .or(file_config.vault_secret)
                .ok_or("VAULT_SECRET is required")?,
            public_base_url: env_config
                .public_base_url
                .or(file_config.public_base_url)
                .ok_or("PUBLIC_BASE_URL is required")?,
            listen_addr: env_config
                .listen_addr
                .or(file_config.listen_addr)
                .unwrap_or_else(default_listen_addr),
            provisioner: env_config
                .provisioner
                .or(file_config.provisioner)
                .unwrap_or_else(default_provisioner),
            orchestrator_token: env_config.orchestrator_token.or(file_config.orchestrator_token),
            orchestrator_url: env_config
                .orchestrator_url
                .or(file_config.orchestrator_url)
                .unwrap_or_else(default_orchestrator_url),
            orchestrator_project: env_config
                .orchestrator_project
                .or(file_config.orchestrator_project),
            worker_template: env_config
                .worker_template
                .or(file_config.worker_template)
                .unwrap_or_else(default_worker_template),
            worker_template_dir: env_config
                .worker_template_dir
                .or(file_config.worker_template_dir)
                .unwrap_or_else(default_worker_template_dir),
            log_dir: env_config
                .log_dir
                .or(file_config.log_dir)
                .unwrap_or_else(default_log_dir),
        };

        Ok(final_config)
    }
}
