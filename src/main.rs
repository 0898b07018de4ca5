//! # Castellan 请求服务入口
//!
//! 从第一个命令行参数或标准输入读取一条 JSON 提交消息，处理后把应答打印到标准输出。
//! 等待签发结果期间按 Ctrl+C 取消。

use castellan::app::{AppConfig, CastellanApp};
use std::io::Read;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志，应答独占标准输出
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config()?;
    let message = read_message()?;

    let app = CastellanApp::new(config).await?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("收到停止信号，取消等待");
            on_signal.cancel();
        }
    });

    let response = app.handle_message(&message, &cancel).await?;
    println!("{}", response);

    app.stop().await;
    Ok(())
}

/// 加载配置
///
/// 从 `CASTELLAN_CONFIG` 指定的文件或当前目录下的 castellan.toml 加载
fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    #[cfg(feature = "config")]
    {
        let config_path = std::env::var("CASTELLAN_CONFIG").unwrap_or_else(|_| "castellan.toml".to_string());

        if std::path::Path::new(&config_path).exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: AppConfig = toml::from_str(&content)?;
            tracing::info!("从配置文件加载: {}", config_path);
            return Ok(config);
        }
    }

    tracing::info!("使用默认配置");
    Ok(AppConfig::default())
}

/// 读取提交消息
fn read_message() -> Result<String, Box<dyn std::error::Error>> {
    if let Some(argument) = std::env::args().nth(1) {
        return Ok(argument);
    }
    let mut message = String::new();
    std::io::stdin().read_to_string(&mut message)?;
    Ok(message)
}
