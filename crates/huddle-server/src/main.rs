use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use huddle_config::{Config, ConfigManager, LogLevel, ServerConfig, VerifierSettings};
use huddle_gateway::{
    Gateway, GatewayConfig, HttpTokenVerifier, Principal, StaticTokenVerifier, TokenVerifier,
};
use huddle_observability::LogManager;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Parser, Debug, Clone)]
#[command(name = "huddle-server")]
#[command(about = "Huddle WebRTC signaling relay")]
#[command(version)]
struct Cli {
    /// Config file path (default: ~/.huddle/config.json)
    #[arg(long, env = "HUDDLE_CONFIG")]
    config: Option<String>,

    /// Listen host (overrides config)
    #[arg(long, env = "HUDDLE_HOST")]
    host: Option<String>,

    /// Listen port (overrides config)
    #[arg(long, env = "HUDDLE_PORT")]
    port: Option<u16>,

    /// Log level (overrides config)
    #[arg(long, env = "HUDDLE_LOG_LEVEL")]
    log_level: Option<LogLevel>,

    /// Emit JSON logs
    #[arg(long, env = "HUDDLE_JSON_LOGS", default_value = "false")]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
enum Commands {
    /// 配置管理命令
    Config(ConfigArgs),
}

#[derive(Args, Debug, Clone)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand, Debug, Clone)]
enum ConfigCommands {
    /// 获取配置值
    Get {
        /// 配置键 (如: server.port, logging.level)
        key: String,
    },
    /// 设置配置值并写回文件
    Set {
        /// 配置键 (如: server.port, logging.level)
        key: String,
        /// 配置值
        value: String,
    },
    /// 显示配置文件路径
    Path,
}

/// 解析配置文件路径，未指定时使用 ~/.huddle/config.json
fn resolve_config_path(config: Option<&str>) -> anyhow::Result<PathBuf> {
    match config {
        Some(path) => Ok(huddle_config::expand_tilde(path).unwrap_or_else(|| PathBuf::from(path))),
        None => Ok(ConfigManager::default_config_path()?),
    }
}

/// 执行配置子命令，返回要打印的结果
async fn handle_config(command: ConfigCommands, manager: &ConfigManager) -> anyhow::Result<String> {
    match command {
        ConfigCommands::Get { key } => {
            let config = manager.snapshot().await;
            config
                .get_value(&key)
                .map(|value| format!("{} = {}", key, value))
                .ok_or_else(|| anyhow::anyhow!("Key not found: {}", key))
        }
        ConfigCommands::Set { key, value } => {
            {
                let shared = manager.get();
                let mut config = shared.write().await;
                let mut next = config.clone();
                next.set_value(&key, &value)?;
                ConfigManager::validate(&next)?;
                *config = next;
            }
            manager.save().await?;
            Ok(format!("Set {} = {}", key, value))
        }
        ConfigCommands::Path => Ok(manager.path().display().to_string()),
    }
}

/// CLI 参数覆盖配置文件
fn apply_overrides(cli: &Cli, config: &mut Config) {
    if let Some(host) = &cli.host {
        config.server.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json_logs {
        config.logging.json_format = true;
    }
}

fn gateway_config(server: &ServerConfig) -> GatewayConfig {
    let bind = if server.host.contains(':') && !server.host.starts_with('[') {
        format!("[{}]:{}", server.host, server.port)
    } else {
        format!("{}:{}", server.host, server.port)
    };

    GatewayConfig {
        bind,
        ws_path: server.ws_path.clone(),
        max_connections: server.max_connections,
        outbound_buffer: server.outbound_buffer,
        allow_query_token: server.allow_query_token,
        expose_room_stats: server.expose_room_stats,
    }
}

/// 根据配置构建 token 校验器
fn verifier_from_settings(settings: &VerifierSettings) -> anyhow::Result<Arc<dyn TokenVerifier>> {
    match settings {
        VerifierSettings::Static { tokens } => {
            if tokens.is_empty() {
                warn!("Static verifier has no tokens; every handshake will be rejected");
            }
            let tokens: HashMap<String, Principal> = tokens
                .iter()
                .map(|(token, p)| (token.clone(), Principal::new(&p.user_id, &p.role)))
                .collect();
            Ok(Arc::new(StaticTokenVerifier::new(tokens)))
        }
        VerifierSettings::Http {
            url,
            timeout_seconds,
        } => {
            let verifier = HttpTokenVerifier::new(url, Duration::from_secs(*timeout_seconds))
                .context("Failed to build HTTP token verifier")?;
            Ok(Arc::new(verifier))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = resolve_config_path(cli.config.as_deref())?;

    // 加载配置
    let config_manager = ConfigManager::load(&config_path)
        .await
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    if let Some(Commands::Config(args)) = cli.command.clone() {
        let output = handle_config(args.command, &config_manager).await?;
        println!("{}", output);
        return Ok(());
    }

    config_manager
        .update(|config| apply_overrides(&cli, config))
        .await
        .context("Invalid command line override")?;
    let config = config_manager.snapshot().await;

    // 初始化日志
    let _log_manager = LogManager::new(&huddle_observability::from_huddle_config(&config))
        .context("Failed to initialize logging")?;

    info!("Config loaded from {:?}", config_manager.path());
    info!("Token verifier: {}", config.auth.verifier.kind());

    let verifier = verifier_from_settings(&config.auth.verifier)?;
    let gateway = Gateway::new(gateway_config(&config.server), verifier);

    let listener = TcpListener::bind(&gateway.config().bind)
        .await
        .with_context(|| format!("Failed to bind {}", gateway.config().bind))?;

    gateway.serve(listener, shutdown_signal()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_config::PrincipalSettings;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("huddle-server").chain(args.iter().copied()))
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = Config::default();
        apply_overrides(
            &cli(&["--host", "0.0.0.0", "--port", "9000", "--log-level", "debug", "--json-logs"]),
            &mut config,
        );

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert!(config.logging.json_format);
    }

    #[test]
    fn test_no_overrides_keeps_file_values() {
        let mut config = Config::default();
        config.server.port = 7000;
        apply_overrides(&cli(&[]), &mut config);

        assert_eq!(config.server.port, 7000);
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_config_subcommand_parsing() {
        let parsed = cli(&["--config", "/tmp/huddle.json", "config", "set", "server.port", "9100"]);
        assert_eq!(parsed.config.as_deref(), Some("/tmp/huddle.json"));
        assert!(matches!(
            parsed.command,
            Some(Commands::Config(ConfigArgs {
                command: ConfigCommands::Set { ref key, ref value }
            })) if key == "server.port" && value == "9100"
        ));
        assert!(cli(&[]).command.is_none());
    }

    #[test]
    fn test_resolve_config_path() {
        assert_eq!(
            resolve_config_path(Some("/etc/huddle.json")).unwrap(),
            PathBuf::from("/etc/huddle.json")
        );
        let default = resolve_config_path(None).unwrap();
        assert!(default.ends_with(".huddle/config.json"));
    }

    #[tokio::test]
    async fn test_config_get_and_set() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        let manager = ConfigManager::load(&path).await.unwrap();

        let output = handle_config(
            ConfigCommands::Get {
                key: "server.port".to_string(),
            },
            &manager,
        )
        .await
        .unwrap();
        assert_eq!(output, "server.port = 8090");

        handle_config(
            ConfigCommands::Set {
                key: "server.port".to_string(),
                value: "9100".to_string(),
            },
            &manager,
        )
        .await
        .unwrap();

        let reloaded = ConfigManager::load(&path).await.unwrap();
        assert_eq!(reloaded.snapshot().await.server.port, 9100);

        let output = handle_config(ConfigCommands::Path, &manager).await.unwrap();
        assert_eq!(output, path.display().to_string());
    }

    #[tokio::test]
    async fn test_config_set_rejects_invalid_values() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        let manager = ConfigManager::load(&path).await.unwrap();

        let set = |key: &str, value: &str| ConfigCommands::Set {
            key: key.to_string(),
            value: value.to_string(),
        };
        assert!(handle_config(set("server.port", "0"), &manager).await.is_err());
        assert!(handle_config(set("server.nope", "1"), &manager).await.is_err());
        assert!(handle_config(
            ConfigCommands::Get {
                key: "server.nope".to_string()
            },
            &manager
        )
        .await
        .is_err());

        assert_eq!(manager.snapshot().await.server.port, 8090);
    }

    #[test]
    fn test_gateway_config_bind() {
        let mut server = ServerConfig::default();
        assert_eq!(gateway_config(&server).bind, "127.0.0.1:8090");

        server.host = "::1".to_string();
        let gateway = gateway_config(&server);
        assert_eq!(gateway.bind, "[::1]:8090");
        assert_eq!(gateway.ws_path, "/signaling");
    }

    #[test]
    fn test_static_verifier_from_settings() {
        let mut tokens = HashMap::new();
        tokens.insert(
            "tok-1".to_string(),
            PrincipalSettings {
                user_id: "U1".to_string(),
                role: "doctor".to_string(),
            },
        );
        let verifier = verifier_from_settings(&VerifierSettings::Static { tokens }).unwrap();

        let principal = tokio_test::block_on(verifier.verify("tok-1")).unwrap();
        assert_eq!(principal, Principal::new("U1", "doctor"));
        assert!(tokio_test::block_on(verifier.verify("tok-2")).is_err());
    }

    #[test]
    fn test_http_verifier_from_settings() {
        let settings = VerifierSettings::Http {
            url: "http://127.0.0.1:1/verify".to_string(),
            timeout_seconds: 1,
        };
        assert!(verifier_from_settings(&settings).is_ok());
    }
}
