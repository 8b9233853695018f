use anyhow::{Context, Result};

pub async fn show(config_path: &str) -> Result<()> {
    let path = bz_server::shellexpand(config_path);

    if std::path::Path::new(&path).exists() {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {path}"))?;
        println!("config file: {path}\n");
        println!("{content}");
    } else {
        println!("no config file at {path}");
    }

    let runtime = super::load_runtime_config(config_path)?;
    println!("resolved runtime config:\n");
    println!("[server]");
    println!("  bind_host = {}", runtime.server.bind_host);
    println!("  port = {}", runtime.server.port);
    if runtime.server.cors_allowed_origins.is_empty() {
        println!("  cors_allowed_origins = []");
    } else {
        println!(
            "  cors_allowed_origins = {}",
            runtime.server.cors_allowed_origins.join(", ")
        );
    }

    println!("\n[storage]");
    println!("  data_dir = {}", runtime.data_dir);
    if !runtime.is_in_memory() {
        println!("  database = {}", runtime.database_path().display());
    }

    println!("\n[live]");
    println!("  channel_capacity = {}", runtime.live_channel_capacity);

    Ok(())
}
